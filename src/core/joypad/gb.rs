// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Game Boy joypad (P1/JOYP at $FF00)
//!
//! One register: two select lines choose between the direction pad and
//! the buttons, and the low nibble reports the selected group with
//! active-low polarity.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::controller::{Controller, ControllerInstance};
use crate::core::error::Result;
use crate::core::input::{InputConfig, InputConfigId, InputEvent, InputHandler};
use crate::core::machine::Machine;
use crate::core::memory::{Address, MemOps, Region, RegionId};
use crate::core::resource::Resource;

const SELECT_DIRECTIONS: u8 = 0x10; // 0 = selected
const SELECT_BUTTONS: u8 = 0x20;

/// Key order: Right, Left, Up, Down, A, B, Select, Start
const DEFAULT_KEYS: [u8; 8] = [b'l', b'j', b'i', b'k', b'q', b'w', b'o', b'p'];

struct JoypadState {
    select: u8,
    directions: u8,
    buttons: u8,
}

impl JoypadState {
    fn new() -> Self {
        Self {
            select: SELECT_DIRECTIONS | SELECT_BUTTONS,
            directions: 0,
            buttons: 0,
        }
    }

    fn read(&self) -> u8 {
        let mut value = 0xC0 | self.select;
        // Active low: a pressed key pulls its line to 0
        let mut lines = 0x0F;
        if self.select & SELECT_DIRECTIONS == 0 {
            lines &= !self.directions;
        }
        if self.select & SELECT_BUTTONS == 0 {
            lines &= !self.buttons;
        }
        value |= lines;
        value
    }
}

struct JoypadPorts(Rc<RefCell<JoypadState>>);

impl MemOps for JoypadPorts {
    fn readb(&mut self, _m: &Machine, _address: Address) -> Option<u8> {
        Some(self.0.borrow().read())
    }

    fn writeb(&mut self, _m: &Machine, b: u8, _address: Address) -> bool {
        // Only the select lines are writable
        self.0.borrow_mut().select = b & (SELECT_DIRECTIONS | SELECT_BUTTONS);
        true
    }
}

struct JoypadInput(Rc<RefCell<JoypadState>>);

impl InputHandler for JoypadInput {
    fn event(&mut self, id: usize, pressed: bool) {
        let mut state = self.0.borrow_mut();
        let (group, bit) = if id < 4 {
            (&mut state.directions, id)
        } else {
            (&mut state.buttons, id - 4)
        };
        if pressed {
            *group |= 1 << bit;
        } else {
            *group &= !(1 << bit);
        }
    }
}

/// Game Boy joypad controller
pub struct GbJoypad {
    state: Rc<RefCell<JoypadState>>,
    region: Option<RegionId>,
    input: Option<InputConfigId>,
}

pub fn create() -> Box<dyn Controller> {
    Box::new(GbJoypad {
        state: Rc::new(RefCell::new(JoypadState::new())),
        region: None,
        input: None,
    })
}

impl Controller for GbJoypad {
    fn init(&mut self, m: &Machine, instance: &ControllerInstance) -> Result<()> {
        let area = Resource::find_mem(&instance.resources, "mem")?.clone();
        self.region = Some(m.memory().region_add(Region::new(
            area,
            Rc::new(RefCell::new(JoypadPorts(self.state.clone()))),
        )));

        let events = DEFAULT_KEYS
            .iter()
            .map(|&key| InputEvent::Keyboard { key: u32::from(key) })
            .collect();
        self.input = Some(m.input_register(InputConfig {
            events,
            handler: Rc::new(RefCell::new(JoypadInput(self.state.clone()))),
        }));

        Ok(())
    }

    fn reset(&mut self, _m: &Machine) {
        *self.state.borrow_mut() = JoypadState::new();
    }

    fn deinit(&mut self, m: &Machine) {
        if let Some(id) = self.region.take() {
            m.memory().region_remove(id);
        }
        if let Some(id) = self.input.take() {
            m.input_unregister(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EmulatorConfig;
    use crate::core::controller::MachData;
    use crate::core::memory::BusId;

    const BUS: BusId = 0;

    fn setup() -> (Machine, GbJoypad) {
        let m = Machine::new(EmulatorConfig::default());
        m.memory().bus_add(BUS, 16);

        let mut joypad = GbJoypad {
            state: Rc::new(RefCell::new(JoypadState::new())),
            region: None,
            input: None,
        };
        let instance = ControllerInstance {
            controller_name: "gb_joypad",
            bus_id: BUS,
            resources: vec![Resource::mem("mem", BUS, 0xFF00, 0xFF00)],
            mach_data: MachData::None,
        };
        joypad.init(&m, &instance).unwrap();
        (m, joypad)
    }

    #[test]
    fn test_idle_reads_all_released() {
        let (m, _joypad) = setup();
        assert_eq!(m.memory_readb(BUS, 0xFF00) & 0x0F, 0x0F);
    }

    #[test]
    fn test_direction_group_active_low() {
        let (m, _joypad) = setup();
        m.input()
            .report(&InputEvent::Keyboard { key: u32::from(b'l') }, true); // Right

        // Directions selected (bit 4 low): Right pulls bit 0 low
        m.memory_writeb(BUS, SELECT_BUTTONS, 0xFF00);
        assert_eq!(m.memory_readb(BUS, 0xFF00) & 0x0F, 0x0E);

        // Buttons selected: nothing pressed there
        m.memory_writeb(BUS, SELECT_DIRECTIONS, 0xFF00);
        assert_eq!(m.memory_readb(BUS, 0xFF00) & 0x0F, 0x0F);
    }

    #[test]
    fn test_button_group() {
        let (m, _joypad) = setup();
        m.input()
            .report(&InputEvent::Keyboard { key: u32::from(b'q') }, true); // A
        m.memory_writeb(BUS, SELECT_DIRECTIONS, 0xFF00);
        assert_eq!(m.memory_readb(BUS, 0xFF00) & 0x0F, 0x0E);
    }

    #[test]
    fn test_select_bits_read_back() {
        let (m, _joypad) = setup();
        m.memory_writeb(BUS, SELECT_BUTTONS, 0xFF00);
        let value = m.memory_readb(BUS, 0xFF00);
        assert_eq!(value & 0x30, SELECT_BUTTONS);
    }
}
