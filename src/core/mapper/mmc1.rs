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

//! MMC1 (NES mapper 1)
//!
//! Configuration arrives serially: five one-bit writes anywhere in
//! $8000-$FFFF shift into an internal register, and the fifth write
//! copies it into one of four registers selected by address bits 13-14
//! (control, CHR bank 0, CHR bank 1, PRG bank). A write with bit 7 set
//! resets the shift register. PRG banking switches 16 KB or 32 KB slots,
//! CHR banking 4 KB or 8 KB, and the control register also selects the
//! nametable mirroring. PRG RAM is battery-backed when the header says
//! so; deinit is the save point.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use crate::core::controller::{Controller, ControllerInstance, MachData};
use crate::core::error::{EmulatorError, Result};
use crate::core::file::PathKind;
use crate::core::machine::Machine;
use crate::core::memory::{Address, MemOps, Ram, Region, RegionId};
use crate::core::resource::Resource;

use super::InesHeader;

const PRG_ROM_BANK_SIZE: usize = 16 * 1024;
const CHR_ROM_BANK_SIZE: usize = 4 * 1024;
const CHR_RAM_SIZE: usize = 8 * 1024;
const NUM_SHIFT_STEPS: u8 = 5;

struct Mmc1State {
    control: u8,
    chr_bank_0: u8,
    chr_bank_1: u8,
    prg_bank: u8,
    shift_reg: u8,
    shift_reg_step: u8,
    num_prg_rom_banks: usize,
    prg_rom: Vec<u8>,
    chr_rom: Vec<u8>,
    chr_ram: Option<Vec<u8>>,
    prg_ram: Vec<u8>,
    vram: Rc<RefCell<Vec<u8>>>,
}

impl Mmc1State {
    fn mirroring(&self) -> u8 {
        self.control & 0x03
    }

    fn prg_bank_mode(&self) -> u8 {
        (self.control >> 2) & 0x03
    }

    fn chr_bank_mode(&self) -> u8 {
        (self.control >> 4) & 0x01
    }

    /// Fold a nametable offset per the control register's mirroring
    fn mirror_address(&self, address: Address) -> Address {
        match self.mirroring() {
            // One-screen modes use the lower/upper 1 KB bank
            0 => address & 0x03FF,
            1 => 0x0400 | (address & 0x03FF),
            // Vertical
            2 => address & !0x0800,
            // Horizontal
            _ => {
                let bit = (address >> 11) & 1;
                (address & !0x0C00) | (bit << 10)
            }
        }
    }

    /// Resolve a PRG window offset through the bank registers
    fn remap_prg(&self, address: Address) -> usize {
        let bank = self.prg_bank as usize & 0x0F;
        let banks: [usize; 2] = match self.prg_bank_mode() {
            // 32 KB switching ignores the low bank bit
            0 | 1 => [bank & 0xFE, bank | 0x01],
            // Fix first bank at $8000, switch at $C000
            2 => [0, bank],
            // Fix last bank at $C000, switch at $8000
            _ => [bank, self.num_prg_rom_banks - 1],
        };
        let slot = address as usize / PRG_ROM_BANK_SIZE;
        (address as usize % PRG_ROM_BANK_SIZE) + banks[slot.min(1)] * PRG_ROM_BANK_SIZE
    }

    /// Resolve a CHR window offset through the bank registers
    fn remap_chr(&self, address: Address) -> usize {
        let banks: [usize; 2] = match self.chr_bank_mode() {
            // 8 KB switching
            0 => [
                (self.chr_bank_0 & 0xFE) as usize,
                (self.chr_bank_0 | 0x01) as usize,
            ],
            // Two independent 4 KB banks
            _ => [self.chr_bank_0 as usize, self.chr_bank_1 as usize],
        };
        let slot = address as usize / CHR_ROM_BANK_SIZE;
        (address as usize % CHR_ROM_BANK_SIZE) + banks[slot.min(1)] * CHR_ROM_BANK_SIZE
    }

    /// Serial load-port write
    fn load_write(&mut self, b: u8, address: Address) {
        // Bit 7 set resets the shift register
        if b & 0x80 != 0 {
            self.shift_reg = 0;
            self.shift_reg_step = 0;
            return;
        }

        // First four writes shift bit 0 in from the top
        if self.shift_reg_step < NUM_SHIFT_STEPS - 1 {
            self.shift_reg >>= 1;
            self.shift_reg |= (b & 0x01) << (NUM_SHIFT_STEPS - 1);
            self.shift_reg_step += 1;
            return;
        }

        // Fifth write: combine and store into the register selected by
        // address bits 13-14
        let data = (self.shift_reg >> 1) | ((b & 0x01) << (NUM_SHIFT_STEPS - 1));
        match (address >> 13) & 0x03 {
            0 => self.control = data & 0x1F,
            1 => self.chr_bank_0 = data & 0x1F,
            2 => self.chr_bank_1 = data & 0x1F,
            _ => self.prg_bank = data & 0x1F,
        }

        self.shift_reg = 0;
        self.shift_reg_step = 0;
    }
}

// Region ops sharing the MMC1 state

struct PrgRomPorts(Rc<RefCell<Mmc1State>>);

impl MemOps for PrgRomPorts {
    fn readb(&mut self, _m: &Machine, address: Address) -> Option<u8> {
        let state = self.0.borrow();
        let offset = state.remap_prg(address) % state.prg_rom.len().max(1);
        state.prg_rom.get(offset).copied()
    }
}

struct LoadPorts(Rc<RefCell<Mmc1State>>);

impl MemOps for LoadPorts {
    fn writeb(&mut self, _m: &Machine, b: u8, address: Address) -> bool {
        self.0.borrow_mut().load_write(b, address);
        true
    }
}

struct ChrPorts(Rc<RefCell<Mmc1State>>);

impl MemOps for ChrPorts {
    fn readb(&mut self, _m: &Machine, address: Address) -> Option<u8> {
        let state = self.0.borrow();
        let offset = state.remap_chr(address);
        match &state.chr_ram {
            Some(ram) => ram.get(offset % ram.len()).copied(),
            None => state.chr_rom.get(offset % state.chr_rom.len().max(1)).copied(),
        }
    }

    fn writeb(&mut self, _m: &Machine, b: u8, address: Address) -> bool {
        let mut state = self.0.borrow_mut();
        let offset = state.remap_chr(address);
        match &mut state.chr_ram {
            Some(ram) => {
                let len = ram.len();
                ram[offset % len] = b;
                true
            }
            // CHR ROM: drop
            None => true,
        }
    }
}

struct VramPorts(Rc<RefCell<Mmc1State>>);

impl MemOps for VramPorts {
    fn readb(&mut self, _m: &Machine, address: Address) -> Option<u8> {
        let state = self.0.borrow();
        let index = state.mirror_address(address) as usize;
        let value = state.vram.borrow().get(index).copied();
        value
    }

    fn writeb(&mut self, _m: &Machine, b: u8, address: Address) -> bool {
        let state = self.0.borrow();
        let index = state.mirror_address(address) as usize;
        let result = match state.vram.borrow_mut().get_mut(index) {
            Some(cell) => {
                *cell = b;
                true
            }
            None => false,
        };
        result
    }
}

struct PrgRamPorts(Rc<RefCell<Mmc1State>>);

impl MemOps for PrgRamPorts {
    fn readb(&mut self, _m: &Machine, address: Address) -> Option<u8> {
        let state = self.0.borrow();
        state.prg_ram.get(address as usize).copied()
    }

    fn writeb(&mut self, _m: &Machine, b: u8, address: Address) -> bool {
        let mut state = self.0.borrow_mut();
        match state.prg_ram.get_mut(address as usize) {
            Some(cell) => {
                *cell = b;
                true
            }
            None => false,
        }
    }
}

/// MMC1 controller
pub struct Mmc1 {
    state: Option<Rc<RefCell<Mmc1State>>>,
    regions: Vec<RegionId>,
    battery: Option<PathBuf>,
}

pub fn create() -> Box<dyn Controller> {
    Box::new(Mmc1 {
        state: None,
        regions: Vec::new(),
        battery: None,
    })
}

impl Controller for Mmc1 {
    fn init(&mut self, m: &Machine, instance: &ControllerInstance) -> Result<()> {
        let MachData::NesCart { path, vram } = &instance.mach_data else {
            return Err(EmulatorError::Config("MMC1 needs cart data".into()));
        };

        let header_data = m
            .files()
            .map(PathKind::Data, path, 0, super::INES_HEADER_SIZE)?;
        let header = InesHeader::parse(&header_data)?;

        let prg_rom = m.files().map(
            PathKind::Data,
            path,
            header.prg_rom_offset(),
            header.prg_rom_bytes(),
        )?;
        if prg_rom.is_empty() {
            return Err(EmulatorError::MalformedImage("cart has no PRG ROM".into()));
        }
        let chr_rom = m.files().map(
            PathKind::Data,
            path,
            header.chr_rom_offset(),
            header.chr_rom_bytes(),
        )?;

        let mut prg_ram = vec![0; header.prg_ram_bytes()];
        if header.battery() {
            super::load_battery(m, path, &mut prg_ram);
            self.battery = Some(path.clone());
        }

        let state = Rc::new(RefCell::new(Mmc1State {
            control: 0x0C,
            chr_bank_0: 0,
            chr_bank_1: 0,
            prg_bank: 0,
            shift_reg: 0,
            shift_reg_step: 0,
            num_prg_rom_banks: usize::from(header.prg_rom_size),
            prg_rom,
            chr_ram: if header.chr_rom_bytes() == 0 {
                Some(vec![0; CHR_RAM_SIZE])
            } else {
                None
            },
            chr_rom,
            prg_ram,
            vram: vram.clone(),
        }));
        self.state = Some(state.clone());

        let prg_area = Resource::find_mem(&instance.resources, "prg_rom")?.clone();
        self.regions.push(
            m.memory()
                .region_add(Region::new(prg_area.clone(), Rc::new(RefCell::new(PrgRomPorts(state.clone()))))),
        );

        let chr_area = Resource::find_mem(&instance.resources, "chr")?.clone();
        self.regions.push(m.memory().region_add(Region::new(
            chr_area,
            Rc::new(RefCell::new(ChrPorts(state.clone()))),
        )));

        let vram_area = Resource::find_mem(&instance.resources, "vram")?.clone();
        self.regions.push(m.memory().region_add(Region::new(
            vram_area,
            Rc::new(RefCell::new(VramPorts(state.clone()))),
        )));

        let sram_area = Resource::find_mem(&instance.resources, "sram")?.clone();
        self.regions.push(m.memory().region_add(Region::new(
            sram_area,
            Rc::new(RefCell::new(PrgRamPorts(state.clone()))),
        )));

        // Serial load port shadows the whole PRG ROM window for writes
        self.regions.push(m.memory().region_add(Region::new(
            prg_area,
            Rc::new(RefCell::new(LoadPorts(state))),
        )));

        Ok(())
    }

    fn reset(&mut self, _m: &Machine) {
        if let Some(state) = &self.state {
            let mut state = state.borrow_mut();
            // Fix last bank at $C000, switch at $8000
            state.control = 0x0C;
            state.chr_bank_0 = 0;
            state.chr_bank_1 = 0;
            state.prg_bank = 0;
            state.shift_reg = 0;
            state.shift_reg_step = 0;
        }
    }

    fn deinit(&mut self, m: &Machine) {
        // Battery save point
        if let (Some(state), Some(path)) = (&self.state, &self.battery) {
            super::store_battery(m, path, &state.borrow().prg_ram);
        }
        for id in self.regions.drain(..) {
            m.memory().region_remove(id);
        }
    }
}
