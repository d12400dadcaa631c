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

//! MBC1 (Game Boy)
//!
//! Four write windows over the fixed-ROM area control it: RAM enable
//! ($0000, value 0x0A in the low nibble), the 5-bit ROM bank number
//! ($2000, bank 0 maps to 1), the 2-bit upper bank/RAM bank number
//! ($4000) and the mode select ($6000) that decides whether those two
//! bits extend the ROM bank or select the RAM bank. External RAM is
//! battery-backed on cart type 0x03.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use crate::core::controller::{Controller, ControllerInstance, MachData};
use crate::core::error::{EmulatorError, Result};
use crate::core::file::PathKind;
use crate::core::machine::Machine;
use crate::core::memory::{Address, BusId, MemOps, Region, RegionId};
use crate::core::resource::Resource;

use super::{GbHeader, GB_HEADER_SIZE, GB_HEADER_START, GB_RAM_BANK_SIZE, GB_ROM_BANK_SIZE};

const ROM_SELECT_MODE: u8 = 0;
const RAM_SELECT_MODE: u8 = 1;

struct Mbc1State {
    /// Banked ROM contents, bank 0 excluded (the fixed window owns it)
    rom: Vec<u8>,
    ram: Vec<u8>,
    rom_num_low: u8,
    rom_num_high: u8,
    ram_enabled: bool,
    mode_sel: u8,
}

impl Mbc1State {
    fn rom_bank(&self) -> usize {
        let mut bank = usize::from(self.rom_num_low);
        if self.mode_sel == ROM_SELECT_MODE {
            bank |= usize::from(self.rom_num_high) << 5;
        }
        bank
    }

    fn ram_bank(&self) -> usize {
        if self.mode_sel == RAM_SELECT_MODE {
            usize::from(self.rom_num_high)
        } else {
            0
        }
    }
}

struct Rom1Ports(Rc<RefCell<Mbc1State>>);

impl MemOps for Rom1Ports {
    fn readb(&mut self, _m: &Machine, address: Address) -> Option<u8> {
        let state = self.0.borrow();
        // The banked buffer starts at bank 1
        let offset = address as usize + (state.rom_bank() - 1) * GB_ROM_BANK_SIZE;
        Some(state.rom.get(offset % state.rom.len().max(1)).copied().unwrap_or(0xFF))
    }
}

struct ExtRamPorts(Rc<RefCell<Mbc1State>>);

impl MemOps for ExtRamPorts {
    fn readb(&mut self, _m: &Machine, address: Address) -> Option<u8> {
        let state = self.0.borrow();
        if !state.ram_enabled {
            return Some(0);
        }
        let offset = address as usize + state.ram_bank() * GB_RAM_BANK_SIZE;
        Some(state.ram.get(offset).copied().unwrap_or(0xFF))
    }

    fn writeb(&mut self, _m: &Machine, b: u8, address: Address) -> bool {
        let mut state = self.0.borrow_mut();
        if !state.ram_enabled {
            return true;
        }
        let offset = address as usize + state.ram_bank() * GB_RAM_BANK_SIZE;
        if let Some(cell) = state.ram.get_mut(offset) {
            *cell = b;
        }
        true
    }
}

/// The four banking-control write windows ($0000-$7FFF in 8 KB strides)
struct ControlPorts(Rc<RefCell<Mbc1State>>);

impl MemOps for ControlPorts {
    fn writeb(&mut self, _m: &Machine, b: u8, address: Address) -> bool {
        let mut state = self.0.borrow_mut();
        match address >> 13 {
            // RAM enable: 0x0A in the low nibble
            0 => state.ram_enabled = b & 0x0F == 0x0A,
            // Low 5 bits of the ROM bank; bank 0 becomes 1
            1 => {
                state.rom_num_low = b & 0x1F;
                if state.rom_num_low == 0 {
                    state.rom_num_low = 1;
                }
            }
            // Upper ROM bank bits / RAM bank
            2 => state.rom_num_high = b & 0x03,
            // Mode select
            _ => state.mode_sel = b & 0x01,
        }
        true
    }
}

/// MBC1 controller
pub struct Mbc1 {
    state: Option<Rc<RefCell<Mbc1State>>>,
    regions: Vec<RegionId>,
    battery: Option<PathBuf>,
}

pub fn create() -> Box<dyn Controller> {
    Box::new(Mbc1 {
        state: None,
        regions: Vec::new(),
        battery: None,
    })
}

impl Controller for Mbc1 {
    fn init(&mut self, m: &Machine, instance: &ControllerInstance) -> Result<()> {
        let MachData::CartPath(path) = &instance.mach_data else {
            return Err(EmulatorError::Config("MBC1 needs a cart path".into()));
        };

        let header_data =
            m.files()
                .map(PathKind::Data, path, GB_HEADER_START, GB_HEADER_SIZE)?;
        let header = GbHeader::parse(&header_data)?;

        // Banked ROM skips the fixed bank 0
        let rom = m.files().map(
            PathKind::Data,
            path,
            GB_ROM_BANK_SIZE as u64,
            header.rom_bytes().saturating_sub(GB_ROM_BANK_SIZE),
        )?;

        let mut ram = vec![0; header.ram_bytes()];
        if header.battery() && !ram.is_empty() {
            super::load_battery(m, path, &mut ram);
            self.battery = Some(path.clone());
        }
        let has_ram = !ram.is_empty();

        let state = Rc::new(RefCell::new(Mbc1State {
            rom,
            ram,
            rom_num_low: 1,
            rom_num_high: 0,
            ram_enabled: false,
            mode_sel: ROM_SELECT_MODE,
        }));
        self.state = Some(state.clone());

        let rom1_area = Resource::find_mem(&instance.resources, "rom1")?.clone();
        self.regions.push(m.memory().region_add(Region::new(
            rom1_area,
            Rc::new(RefCell::new(Rom1Ports(state.clone()))),
        )));

        if has_ram {
            let extram_area = Resource::find_mem(&instance.resources, "extram")?.clone();
            self.regions.push(m.memory().region_add(Region::new(
                extram_area,
                Rc::new(RefCell::new(ExtRamPorts(state.clone()))),
            )));
        }

        // Banking control writes shadow the fixed-ROM address space
        let bus_id: BusId = instance.bus_id;
        self.regions.push(m.memory().region_add(Region::new(
            Resource::mem("mbc1_ctrl", bus_id, 0x0000, 0x7FFF),
            Rc::new(RefCell::new(ControlPorts(state))),
        )));

        Ok(())
    }

    fn reset(&mut self, _m: &Machine) {
        if let Some(state) = &self.state {
            let mut state = state.borrow_mut();
            state.rom_num_low = 1;
            state.rom_num_high = 0;
            state.ram_enabled = false;
            state.mode_sel = ROM_SELECT_MODE;
        }
    }

    fn deinit(&mut self, m: &Machine) {
        if let (Some(state), Some(path)) = (&self.state, &self.battery) {
            super::store_battery(m, path, &state.borrow().ram);
        }
        for id in self.regions.drain(..) {
            m.memory().region_remove(id);
        }
    }
}
