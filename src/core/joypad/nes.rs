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

//! NES controllers ($4016/$4017)
//!
//! Two 8-bit shift registers, one per player, reloaded from the live key
//! state while the strobe bit is set and shifted out one bit per read.
//! Key state arrives through the input listener registry; the default
//! binding maps both pads onto the keyboard.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::controller::{Controller, ControllerInstance};
use crate::core::error::Result;
use crate::core::input::{InputConfig, InputConfigId, InputEvent, InputHandler};
use crate::core::machine::Machine;
use crate::core::memory::{Address, MemOps, Region, RegionId};
use crate::core::resource::Resource;

const NUM_PLAYERS: usize = 2;
const NUM_KEYS: usize = 8;

// Open-bus bits present on real reads
const OPEN_BUS: u8 = 0xE0;

/// Default keyboard binding: A, B, Select, Start, Up, Down, Left, Right
/// for each player
const DEFAULT_KEYS: [[u8; NUM_KEYS]; NUM_PLAYERS] = [
    [b'q', b'w', b'o', b'p', b'i', b'k', b'j', b'l'],
    [b'e', b'r', b'n', b'm', b'y', b'h', b'g', b'u'],
];

struct PadState {
    strobe: bool,
    shift_regs: [u8; NUM_PLAYERS],
    keys: [[bool; NUM_KEYS]; NUM_PLAYERS],
}

impl PadState {
    fn new() -> Self {
        Self {
            strobe: false,
            shift_regs: [0; NUM_PLAYERS],
            keys: [[false; NUM_KEYS]; NUM_PLAYERS],
        }
    }

    fn reload(&mut self) {
        for player in 0..NUM_PLAYERS {
            self.shift_regs[player] = 0;
            for key in 0..NUM_KEYS {
                self.shift_regs[player] |= u8::from(self.keys[player][key]) << key;
            }
        }
    }
}

struct PadPorts(Rc<RefCell<PadState>>);

impl MemOps for PadPorts {
    fn readb(&mut self, _m: &Machine, address: Address) -> Option<u8> {
        let mut state = self.0.borrow_mut();
        let player = (address as usize) % NUM_PLAYERS;
        let serial = state.shift_regs[player] & 0x01;
        if !state.strobe {
            state.shift_regs[player] >>= 1;
        }
        Some(OPEN_BUS | serial)
    }

    fn writeb(&mut self, _m: &Machine, b: u8, address: Address) -> bool {
        if address != 0 {
            // $4017 writes belong to the APU frame sequencer
            return false;
        }
        let mut state = self.0.borrow_mut();
        state.strobe = b & 0x01 != 0;
        if state.strobe {
            state.reload();
        }
        true
    }
}

struct PadInput(Rc<RefCell<PadState>>);

impl InputHandler for PadInput {
    fn event(&mut self, id: usize, pressed: bool) {
        let mut state = self.0.borrow_mut();
        let player = id / NUM_KEYS;
        let key = id % NUM_KEYS;
        state.keys[player][key] = pressed;
        if state.strobe {
            state.reload();
        }
    }
}

/// NES controller ports
pub struct NesController {
    state: Rc<RefCell<PadState>>,
    region: Option<RegionId>,
    input: Option<InputConfigId>,
}

pub fn create() -> Box<dyn Controller> {
    Box::new(NesController {
        state: Rc::new(RefCell::new(PadState::new())),
        region: None,
        input: None,
    })
}

impl Controller for NesController {
    fn init(&mut self, m: &Machine, instance: &ControllerInstance) -> Result<()> {
        let area = Resource::find_mem(&instance.resources, "mem")?.clone();
        self.region = Some(m.memory().region_add(Region::new(
            area,
            Rc::new(RefCell::new(PadPorts(self.state.clone()))),
        )));

        let events = DEFAULT_KEYS
            .iter()
            .flatten()
            .map(|&key| InputEvent::Keyboard { key: u32::from(key) })
            .collect();
        self.input = Some(m.input_register(InputConfig {
            events,
            handler: Rc::new(RefCell::new(PadInput(self.state.clone()))),
        }));

        Ok(())
    }

    fn reset(&mut self, _m: &Machine) {
        let mut state = self.state.borrow_mut();
        state.strobe = false;
        state.shift_regs = [0; NUM_PLAYERS];
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

    fn setup() -> (Machine, NesController) {
        let m = Machine::new(EmulatorConfig::default());
        m.memory().bus_add(BUS, 16);

        let mut pad = NesController {
            state: Rc::new(RefCell::new(PadState::new())),
            region: None,
            input: None,
        };
        let instance = ControllerInstance {
            controller_name: "nes_controller",
            bus_id: BUS,
            resources: vec![Resource::mem("mem", BUS, 0x4016, 0x4017)],
            mach_data: MachData::None,
        };
        pad.init(&m, &instance).unwrap();
        (m, pad)
    }

    fn press(m: &Machine, key: u8) {
        m.input().report(&InputEvent::Keyboard { key: u32::from(key) }, true);
    }

    #[test]
    fn test_strobe_and_serial_read() {
        let (m, _pad) = setup();
        press(&m, b'q'); // player 1 A
        press(&m, b'p'); // player 1 Start

        m.memory_writeb(BUS, 1, 0x4016);
        m.memory_writeb(BUS, 0, 0x4016);

        // Button order out of the shift register: A, B, Select, Start...
        let bits: Vec<u8> = (0..4).map(|_| m.memory_readb(BUS, 0x4016) & 1).collect();
        assert_eq!(bits, vec![1, 0, 0, 1]);
    }

    #[test]
    fn test_strobe_high_keeps_reloading() {
        let (m, _pad) = setup();
        press(&m, b'q');
        m.memory_writeb(BUS, 1, 0x4016);

        // While strobed every read reports button A without shifting
        assert_eq!(m.memory_readb(BUS, 0x4016) & 1, 1);
        assert_eq!(m.memory_readb(BUS, 0x4016) & 1, 1);
    }

    #[test]
    fn test_second_player_reads_4017() {
        let (m, _pad) = setup();
        press(&m, b'e'); // player 2 A
        m.memory_writeb(BUS, 1, 0x4016);
        m.memory_writeb(BUS, 0, 0x4016);

        assert_eq!(m.memory_readb(BUS, 0x4017) & 1, 1);
        assert_eq!(m.memory_readb(BUS, 0x4016) & 1, 0);
    }

    #[test]
    fn test_open_bus_bits_present() {
        let (m, _pad) = setup();
        assert_eq!(m.memory_readb(BUS, 0x4016) & OPEN_BUS, OPEN_BUS);
    }

    #[test]
    fn test_release_clears_key() {
        let (m, pad) = setup();
        press(&m, b'q');
        m.input()
            .report(&InputEvent::Keyboard { key: u32::from(b'q') }, false);
        m.memory_writeb(BUS, 1, 0x4016);
        m.memory_writeb(BUS, 0, 0x4016);
        assert_eq!(m.memory_readb(BUS, 0x4016) & 1, 0);
        let _ = pad;
    }
}
