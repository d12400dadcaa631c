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

//! MBC2 (Game Boy)
//!
//! A 4-bit ROM bank select and 512 half-bytes of built-in RAM. The RAM
//! cells are stored as bytes with the upper nibble masked off on read,
//! preserving the observable 4-bit behaviour. Battery-backed on cart
//! type 0x06.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use crate::core::controller::{Controller, ControllerInstance, MachData};
use crate::core::error::{EmulatorError, Result};
use crate::core::file::PathKind;
use crate::core::machine::Machine;
use crate::core::memory::{Address, BusId, MemOps, Region, RegionId};
use crate::core::resource::Resource;

use super::{GbHeader, GB_HEADER_SIZE, GB_HEADER_START, GB_ROM_BANK_SIZE};

const RAM_SIZE: usize = 512;

struct Mbc2State {
    rom: Vec<u8>,
    ram: Vec<u8>,
    rom_num: u8,
    ram_enabled: bool,
}

struct Rom1Ports(Rc<RefCell<Mbc2State>>);

impl MemOps for Rom1Ports {
    fn readb(&mut self, _m: &Machine, address: Address) -> Option<u8> {
        let state = self.0.borrow();
        let offset = address as usize + (usize::from(state.rom_num) - 1) * GB_ROM_BANK_SIZE;
        Some(state.rom.get(offset % state.rom.len().max(1)).copied().unwrap_or(0xFF))
    }
}

struct ExtRamPorts(Rc<RefCell<Mbc2State>>);

impl MemOps for ExtRamPorts {
    fn readb(&mut self, _m: &Machine, address: Address) -> Option<u8> {
        let state = self.0.borrow();
        if !state.ram_enabled {
            return Some(0);
        }
        // 512 half-byte cells, mirrored across the window
        let value = state.ram[address as usize % RAM_SIZE];
        Some(value & 0x0F)
    }

    fn writeb(&mut self, _m: &Machine, b: u8, address: Address) -> bool {
        let mut state = self.0.borrow_mut();
        if state.ram_enabled {
            state.ram[address as usize % RAM_SIZE] = b & 0x0F;
        }
        true
    }
}

/// RAM-enable and ROM-select write windows
struct ControlPorts(Rc<RefCell<Mbc2State>>);

impl MemOps for ControlPorts {
    fn writeb(&mut self, _m: &Machine, b: u8, address: Address) -> bool {
        let mut state = self.0.borrow_mut();
        match address >> 13 {
            0 => state.ram_enabled = b & 0x0F == 0x0A,
            1 => {
                state.rom_num = b & 0x0F;
                if state.rom_num == 0 {
                    state.rom_num = 1;
                }
            }
            _ => return false,
        }
        true
    }
}

/// MBC2 controller
pub struct Mbc2 {
    state: Option<Rc<RefCell<Mbc2State>>>,
    regions: Vec<RegionId>,
    battery: Option<PathBuf>,
}

pub fn create() -> Box<dyn Controller> {
    Box::new(Mbc2 {
        state: None,
        regions: Vec::new(),
        battery: None,
    })
}

impl Controller for Mbc2 {
    fn init(&mut self, m: &Machine, instance: &ControllerInstance) -> Result<()> {
        let MachData::CartPath(path) = &instance.mach_data else {
            return Err(EmulatorError::Config("MBC2 needs a cart path".into()));
        };

        let header_data =
            m.files()
                .map(PathKind::Data, path, GB_HEADER_START, GB_HEADER_SIZE)?;
        let header = GbHeader::parse(&header_data)?;

        let rom = m.files().map(
            PathKind::Data,
            path,
            GB_ROM_BANK_SIZE as u64,
            header.rom_bytes().saturating_sub(GB_ROM_BANK_SIZE),
        )?;

        let mut ram = vec![0; RAM_SIZE];
        if header.battery() {
            super::load_battery(m, path, &mut ram);
            self.battery = Some(path.clone());
        }

        let state = Rc::new(RefCell::new(Mbc2State {
            rom,
            ram,
            rom_num: 1,
            ram_enabled: false,
        }));
        self.state = Some(state.clone());

        let rom1_area = Resource::find_mem(&instance.resources, "rom1")?.clone();
        self.regions.push(m.memory().region_add(Region::new(
            rom1_area,
            Rc::new(RefCell::new(Rom1Ports(state.clone()))),
        )));

        let extram_area = Resource::find_mem(&instance.resources, "extram")?.clone();
        self.regions.push(m.memory().region_add(Region::new(
            extram_area,
            Rc::new(RefCell::new(ExtRamPorts(state.clone()))),
        )));

        let bus_id: BusId = instance.bus_id;
        self.regions.push(m.memory().region_add(Region::new(
            Resource::mem("mbc2_ctrl", bus_id, 0x0000, 0x3FFF),
            Rc::new(RefCell::new(ControlPorts(state))),
        )));

        Ok(())
    }

    fn reset(&mut self, _m: &Machine) {
        if let Some(state) = &self.state {
            let mut state = state.borrow_mut();
            state.rom_num = 1;
            state.ram_enabled = false;
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

#[cfg(test)]
mod tests {
    use super::super::test_support::gb_image;
    use super::*;
    use crate::core::config::EmulatorConfig;

    const BUS: BusId = 0;

    fn setup_with(file: &tempfile::NamedTempFile) -> (Machine, Mbc2) {
        let m = Machine::new(EmulatorConfig::default());
        m.memory().bus_add(BUS, 16);

        let instance = ControllerInstance {
            controller_name: "mbc2",
            bus_id: BUS,
            resources: vec![
                Resource::mem("rom1", BUS, 0x4000, 0x7FFF),
                Resource::mem("extram", BUS, 0xA000, 0xA1FF),
            ],
            mach_data: MachData::CartPath(file.path().to_path_buf()),
        };
        let mut mbc2 = Mbc2 {
            state: None,
            regions: Vec::new(),
            battery: None,
        };
        mbc2.init(&m, &instance).unwrap();
        mbc2.reset(&m);
        (m, mbc2)
    }

    #[test]
    fn test_rom_bank_switch() {
        let file = gb_image(0x05, 8, 0);
        let (m, _mbc2) = setup_with(&file);
        assert_eq!(m.memory_readb(BUS, 0x4000), 1);
        m.memory_writeb(BUS, 3, 0x2000);
        assert_eq!(m.memory_readb(BUS, 0x4000), 3);
    }

    #[test]
    fn test_ram_stores_nibbles() {
        let file = gb_image(0x06, 4, 0);
        let (m, _mbc2) = setup_with(&file);
        m.memory_writeb(BUS, 0x0A, 0x0000);
        m.memory_writeb(BUS, 0xFF, 0xA010);
        // Only the low nibble survives
        assert_eq!(m.memory_readb(BUS, 0xA010), 0x0F);
    }

    #[test]
    fn test_ram_disabled_by_default() {
        let file = gb_image(0x06, 4, 0);
        let (m, _mbc2) = setup_with(&file);
        m.memory_writeb(BUS, 0x05, 0xA000);
        assert_eq!(m.memory_readb(BUS, 0xA000), 0);
    }

    #[test]
    fn test_battery_nibbles_persist() {
        let file = gb_image(0x06, 4, 0);
        {
            let (m, mut mbc2) = setup_with(&file);
            m.memory_writeb(BUS, 0x0A, 0x0000);
            m.memory_writeb(BUS, 0x09, 0xA000);
            mbc2.deinit(&m);
        }
        {
            let (m, _mbc2) = setup_with(&file);
            m.memory_writeb(BUS, 0x0A, 0x0000);
            assert_eq!(m.memory_readb(BUS, 0xA000), 0x09);
        }
        let _ = std::fs::remove_file(super::super::save_path(file.path()));
    }
}
