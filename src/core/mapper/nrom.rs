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

//! NROM (NES mapper 0)
//!
//! No banking: PRG ROM is mirrored across its window when only one 16 KB
//! bank is present (NROM-128), CHR is ROM or 8 KB RAM, and the nametable
//! arrangement is hardwired by the cart header's mirroring bit.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::controller::{Controller, ControllerInstance, MachData};
use crate::core::error::{EmulatorError, Result};
use crate::core::file::PathKind;
use crate::core::machine::Machine;
use crate::core::memory::{Address, MemOps, Ram, Region, RegionId, Rom};
use crate::core::resource::Resource;

use super::InesHeader;

const CHR_RAM_SIZE: usize = 8 * 1024;

/// PRG ROM with NROM-128 mirroring
struct PrgRom {
    rom: Vec<u8>,
}

impl MemOps for PrgRom {
    fn readb(&mut self, _m: &Machine, address: Address) -> Option<u8> {
        let index = address as usize % self.rom.len();
        Some(self.rom[index])
    }
}

/// Nametable VRAM with hardwired mirroring
pub(super) struct NametableVram {
    pub vram: Rc<RefCell<Vec<u8>>>,
    pub horizontal: bool,
}

pub(super) fn mirror_nametable(address: Address, horizontal: bool) -> Address {
    if horizontal {
        // $2000 equals $2400, $2800 equals $2C00: move bit 11 to bit 10
        let bit = (address >> 11) & 1;
        (address & !0x0C00) | (bit << 10)
    } else {
        // Vertical: $2000 equals $2800, clear bit 11
        address & !0x0800
    }
}

impl MemOps for NametableVram {
    fn readb(&mut self, _m: &Machine, address: Address) -> Option<u8> {
        let index = mirror_nametable(address, self.horizontal) as usize;
        self.vram.borrow().get(index).copied()
    }

    fn writeb(&mut self, _m: &Machine, b: u8, address: Address) -> bool {
        let index = mirror_nametable(address, self.horizontal) as usize;
        match self.vram.borrow_mut().get_mut(index) {
            Some(cell) => {
                *cell = b;
                true
            }
            None => false,
        }
    }
}

/// NROM controller
pub struct Nrom {
    regions: Vec<RegionId>,
}

pub fn create() -> Box<dyn Controller> {
    Box::new(Nrom {
        regions: Vec::new(),
    })
}

impl Controller for Nrom {
    fn init(&mut self, m: &Machine, instance: &ControllerInstance) -> Result<()> {
        let MachData::NesCart { path, vram } = &instance.mach_data else {
            return Err(EmulatorError::Config("NROM needs cart data".into()));
        };

        let header_data = m
            .files()
            .map(PathKind::Data, path, 0, super::INES_HEADER_SIZE)?;
        let header = InesHeader::parse(&header_data)?;

        // PRG ROM (mirrored over the window for NROM-128)
        let prg_area = Resource::find_mem(&instance.resources, "prg_rom")?.clone();
        let prg_rom = m.files().map(
            PathKind::Data,
            path,
            header.prg_rom_offset(),
            header.prg_rom_bytes(),
        )?;
        if prg_rom.is_empty() {
            return Err(EmulatorError::MalformedImage("cart has no PRG ROM".into()));
        }
        self.regions.push(m.memory().region_add(Region::new(
            prg_area,
            Rc::new(RefCell::new(PrgRom { rom: prg_rom })),
        )));

        // CHR ROM, or CHR RAM when the cart ships none
        let chr_area = Resource::find_mem(&instance.resources, "chr")?.clone();
        let chr_ops: Rc<RefCell<dyn MemOps>> = if header.chr_rom_bytes() != 0 {
            let chr = m.files().map(
                PathKind::Data,
                path,
                header.chr_rom_offset(),
                header.chr_rom_bytes(),
            )?;
            Rc::new(RefCell::new(Rom::new(chr)))
        } else {
            Rc::new(RefCell::new(Ram::with_size(CHR_RAM_SIZE)))
        };
        self.regions
            .push(m.memory().region_add(Region::new(chr_area, chr_ops)));

        // Nametable VRAM, mirroring hardwired by the header
        let vram_area = Resource::find_mem(&instance.resources, "vram")?.clone();
        self.regions.push(m.memory().region_add(Region::new(
            vram_area,
            Rc::new(RefCell::new(NametableVram {
                vram: vram.clone(),
                horizontal: !header.vertical_mirroring(),
            })),
        )));

        Ok(())
    }

    fn deinit(&mut self, m: &Machine) {
        for id in self.regions.drain(..) {
            m.memory().region_remove(id);
        }
    }
}
