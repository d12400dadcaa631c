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

//! CHIP-8 machine
//!
//! The simplest description: one 16-bit bus, 4 KB of RAM and the CHIP-8
//! CPU. Reset seeds the character font at the bottom of RAM and copies
//! the ROM image to 0x200.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::cpu::CpuInstance;
use crate::core::error::Result;
use crate::core::file::PathKind;
use crate::core::machine::{Machine, MachineDesc};
use crate::core::memory::{BusId, Ram, Region, RegionId};
use crate::core::resource::Resource;

const CPU_BUS: BusId = 0;
const RAM_SIZE: usize = 4096;
const RAM_START: u32 = 0x0000;
const RAM_END: u32 = 0x0FFF;
const ROM_ADDRESS: usize = 0x0200;

/// Built-in hexadecimal character glyphs (5 bytes per digit)
static CHAR_MEM: [u8; 80] = [
    0xF0, 0x90, 0x90, 0x90, 0xF0, 0x20, 0x60, 0x20, 0x20, 0x70, 0xF0, 0x10, 0xF0, 0x80, 0xF0,
    0xF0, 0x10, 0xF0, 0x10, 0xF0, 0x90, 0x90, 0xF0, 0x10, 0x10, 0xF0, 0x80, 0xF0, 0x10, 0xF0,
    0xF0, 0x80, 0xF0, 0x90, 0xF0, 0xF0, 0x10, 0x20, 0x40, 0x40, 0xF0, 0x90, 0xF0, 0x90, 0xF0,
    0xF0, 0x90, 0xF0, 0x10, 0xF0, 0xF0, 0x90, 0xF0, 0x90, 0x90, 0xE0, 0x90, 0xE0, 0x90, 0xE0,
    0xF0, 0x80, 0x80, 0x80, 0xF0, 0xE0, 0x90, 0x90, 0x90, 0xE0, 0xF0, 0x80, 0xF0, 0x80, 0xF0,
    0xF0, 0x80, 0xF0, 0x80, 0x80,
];

pub struct Chip8Machine {
    ram: Option<Rc<RefCell<Vec<u8>>>>,
    rom: Vec<u8>,
    region: Option<RegionId>,
}

pub fn create() -> Box<dyn MachineDesc> {
    Box::new(Chip8Machine {
        ram: None,
        rom: Vec::new(),
        region: None,
    })
}

impl MachineDesc for Chip8Machine {
    fn init(&mut self, m: &Machine) -> Result<()> {
        // Load the ROM image up-front so reset can re-seed RAM
        let rom_path = m.config().cart_path()?;
        self.rom = m
            .files()
            .map(PathKind::Data, rom_path, 0, RAM_SIZE - ROM_ADDRESS)?;

        m.memory().bus_add(CPU_BUS, 16);

        let ram = Ram::with_size(RAM_SIZE);
        self.ram = Some(ram.buffer());
        self.region = Some(m.memory().region_add(Region::new(
            Resource::mem("mem", CPU_BUS, RAM_START, RAM_END),
            Rc::new(RefCell::new(ram)),
        )));

        m.cpu_add(CpuInstance::new("chip8").with_bus(CPU_BUS))?;

        Ok(())
    }

    fn reset(&mut self, _m: &Machine) {
        let Some(ram) = &self.ram else {
            return;
        };
        let mut ram = ram.borrow_mut();
        ram.fill(0);
        ram[..CHAR_MEM.len()].copy_from_slice(&CHAR_MEM);

        let size = self.rom.len().min(RAM_SIZE - ROM_ADDRESS);
        ram[ROM_ADDRESS..ROM_ADDRESS + size].copy_from_slice(&self.rom[..size]);
    }

    fn deinit(&mut self, m: &Machine) {
        if let Some(id) = self.region.take() {
            m.memory().region_remove(id);
        }
    }
}
