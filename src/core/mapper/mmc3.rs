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

//! MMC3 (NES mapper 4)
//!
//! Eight bank registers written through a select/data register pair, 8 KB
//! PRG and 1 KB CHR slots with the A12-inversion swap, and the scanline
//! counter: every rising edge of PPU address line A12, observed from
//! inside CHR reads, i.e. from the PPU's fetch pipeline through the bus
//! fabric, decrements the counter, reloading it from the latch when it
//! hits zero or a reload was requested, and raising the CPU IRQ when the
//! counter reaches zero with interrupts enabled.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use crate::core::controller::{Controller, ControllerInstance, MachData};
use crate::core::cpu::IrqLine;
use crate::core::error::{EmulatorError, Result};
use crate::core::file::PathKind;
use crate::core::machine::Machine;
use crate::core::memory::{Address, MemOps, Region, RegionId};
use crate::core::resource::Resource;

use super::InesHeader;

const PRG_ROM_BANK_SIZE: usize = 8 * 1024;
const CHR_ROM_BANK_SIZE: usize = 1024;
const NUM_BANK_REGISTERS: usize = 8;

struct Mmc3State {
    regs: [u8; NUM_BANK_REGISTERS],
    bank_select: u8,
    scanline_counter: u8,
    scanline_counter_latch: u8,
    scanline_counter_reload: bool,
    a12_state: bool,
    irq_enable: bool,
    horizontal_mirroring: bool,
    num_prg_rom_banks: usize,
    prg_rom: Vec<u8>,
    chr_rom: Vec<u8>,
    prg_ram: Vec<u8>,
    vram: Rc<RefCell<Vec<u8>>>,
    irq: IrqLine,
}

impl Mmc3State {
    fn prg_bank_mode(&self) -> bool {
        self.bank_select & 0x40 != 0
    }

    fn chr_a12_inversion(&self) -> bool {
        self.bank_select & 0x80 != 0
    }

    fn mirror_address(&self, address: Address) -> Address {
        if self.horizontal_mirroring {
            let bit = (address >> 11) & 1;
            (address & !0x0C00) | (bit << 10)
        } else {
            address & !0x0800
        }
    }

    /// PRG slot resolution:
    /// mode 0: R6, R7, (-2), (-1); mode 1: (-2), R7, R6, (-1)
    fn remap_prg(&self, address: Address) -> usize {
        let slot = address as usize / PRG_ROM_BANK_SIZE;
        let mode = self.prg_bank_mode();
        let bank = match slot {
            0 => {
                if mode {
                    self.num_prg_rom_banks - 2
                } else {
                    self.regs[6] as usize
                }
            }
            1 => self.regs[7] as usize,
            2 => {
                if mode {
                    self.regs[6] as usize
                } else {
                    self.num_prg_rom_banks - 2
                }
            }
            _ => self.num_prg_rom_banks - 1,
        };
        (address as usize % PRG_ROM_BANK_SIZE) + bank * PRG_ROM_BANK_SIZE
    }

    /// CHR slot resolution with the A12 inversion swap
    fn remap_chr(&self, address: Address) -> usize {
        let slot = address as usize / CHR_ROM_BANK_SIZE;
        let inv = self.chr_a12_inversion();
        let bank = match (slot, inv) {
            (0, false) | (4, true) => (self.regs[0] & 0xFE) as usize,
            (1, false) | (5, true) => (self.regs[0] | 0x01) as usize,
            (2, false) | (6, true) => (self.regs[1] & 0xFE) as usize,
            (3, false) | (7, true) => (self.regs[1] | 0x01) as usize,
            (0, true) | (4, false) => self.regs[2] as usize,
            (1, true) | (5, false) => self.regs[3] as usize,
            (2, true) | (6, false) => self.regs[4] as usize,
            _ => self.regs[5] as usize,
        };
        (address as usize % CHR_ROM_BANK_SIZE) + bank * CHR_ROM_BANK_SIZE
    }

    /// A12 snooping: rising edges clock the scanline counter
    fn chr_access(&mut self, m: &Machine, address: Address) {
        let a12 = address & 0x1000 != 0;
        if a12 && !self.a12_state {
            if self.scanline_counter == 0 || self.scanline_counter_reload {
                self.scanline_counter = self.scanline_counter_latch;
                self.scanline_counter_reload = false;
            } else {
                self.scanline_counter -= 1;
            }

            if self.scanline_counter == 0 && self.irq_enable {
                m.cpu_interrupt(self.irq);
            }
        }
        self.a12_state = a12;
    }
}

struct PrgRomPorts(Rc<RefCell<Mmc3State>>);

impl MemOps for PrgRomPorts {
    fn readb(&mut self, _m: &Machine, address: Address) -> Option<u8> {
        let state = self.0.borrow();
        let offset = state.remap_prg(address) % state.prg_rom.len().max(1);
        state.prg_rom.get(offset).copied()
    }
}

struct ChrRomPorts(Rc<RefCell<Mmc3State>>);

impl MemOps for ChrRomPorts {
    fn readb(&mut self, m: &Machine, address: Address) -> Option<u8> {
        let mut state = self.0.borrow_mut();
        state.chr_access(m, address);
        let offset = state.remap_chr(address) % state.chr_rom.len().max(1);
        state.chr_rom.get(offset).copied()
    }
}

struct VramPorts(Rc<RefCell<Mmc3State>>);

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

struct PrgRamPorts(Rc<RefCell<Mmc3State>>);

impl MemOps for PrgRamPorts {
    fn readb(&mut self, _m: &Machine, address: Address) -> Option<u8> {
        self.0.borrow().prg_ram.get(address as usize).copied()
    }

    fn writeb(&mut self, _m: &Machine, b: u8, address: Address) -> bool {
        match self.0.borrow_mut().prg_ram.get_mut(address as usize) {
            Some(cell) => {
                *cell = b;
                true
            }
            None => false,
        }
    }
}

/// The four write-register pairs covering $8000-$FFFF in 8 KB strides;
/// even/odd addresses select within each pair
struct ControlPorts(Rc<RefCell<Mmc3State>>);

impl MemOps for ControlPorts {
    fn writeb(&mut self, _m: &Machine, b: u8, address: Address) -> bool {
        let mut state = self.0.borrow_mut();
        let even = address & 1 == 0;
        match address >> 13 {
            // Bank select / bank data
            0 => {
                if even {
                    state.bank_select = b;
                } else {
                    let reg = (state.bank_select & 0x07) as usize;
                    state.regs[reg] = b;
                }
            }
            // Mirroring / PRG RAM protect (protect bits are a no-op)
            1 => {
                if even {
                    state.horizontal_mirroring = b & 0x01 != 0;
                }
            }
            // IRQ latch / reload
            2 => {
                if even {
                    state.scanline_counter_latch = b;
                } else {
                    state.scanline_counter_reload = true;
                }
            }
            // IRQ disable (and acknowledge) / enable
            _ => {
                state.irq_enable = !even;
            }
        }
        true
    }
}

/// MMC3 controller
pub struct Mmc3 {
    state: Option<Rc<RefCell<Mmc3State>>>,
    regions: Vec<RegionId>,
    battery: Option<PathBuf>,
}

pub fn create() -> Box<dyn Controller> {
    Box::new(Mmc3 {
        state: None,
        regions: Vec::new(),
        battery: None,
    })
}

impl Controller for Mmc3 {
    fn init(&mut self, m: &Machine, instance: &ControllerInstance) -> Result<()> {
        let MachData::NesCart { path, vram } = &instance.mach_data else {
            return Err(EmulatorError::Config("MMC3 needs cart data".into()));
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

        let state = Rc::new(RefCell::new(Mmc3State {
            regs: [0; NUM_BANK_REGISTERS],
            bank_select: 0,
            scanline_counter: 0,
            scanline_counter_latch: 0,
            scanline_counter_reload: false,
            a12_state: false,
            irq_enable: false,
            horizontal_mirroring: false,
            // MMC3 banks are 8 KB, half an iNES PRG unit
            num_prg_rom_banks: usize::from(header.prg_rom_size) * 2,
            prg_rom,
            chr_rom,
            prg_ram,
            vram: vram.clone(),
            irq: Resource::find_irq(&instance.resources, "irq")?,
        }));
        self.state = Some(state.clone());

        let prg_area = Resource::find_mem(&instance.resources, "prg_rom")?.clone();
        self.regions.push(m.memory().region_add(Region::new(
            prg_area.clone(),
            Rc::new(RefCell::new(PrgRomPorts(state.clone()))),
        )));

        let chr_area = Resource::find_mem(&instance.resources, "chr")?.clone();
        self.regions.push(m.memory().region_add(Region::new(
            chr_area,
            Rc::new(RefCell::new(ChrRomPorts(state.clone()))),
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

        // Write registers shadow the PRG ROM window
        self.regions.push(m.memory().region_add(Region::new(
            prg_area,
            Rc::new(RefCell::new(ControlPorts(state))),
        )));

        Ok(())
    }

    fn reset(&mut self, _m: &Machine) {
        if let Some(state) = &self.state {
            let mut state = state.borrow_mut();
            state.regs = [0; NUM_BANK_REGISTERS];
            state.bank_select = 0;
            state.scanline_counter = 0;
            state.scanline_counter_latch = 0;
            state.scanline_counter_reload = false;
            state.a12_state = false;
            state.irq_enable = false;
            state.horizontal_mirroring = false;
        }
    }

    fn deinit(&mut self, m: &Machine) {
        if let (Some(state), Some(path)) = (&self.state, &self.battery) {
            super::store_battery(m, path, &state.borrow().prg_ram);
        }
        for id in self.regions.drain(..) {
            m.memory().region_remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::ines_image;
    use super::*;
    use crate::core::config::EmulatorConfig;
    use crate::core::memory::BusId;

    const CPU_BUS: BusId = 0;
    const PPU_BUS: BusId = 1;

    fn setup() -> (Machine, Mmc3, tempfile::NamedTempFile) {
        let file = ines_image(4, 4, 2, 0);
        let m = Machine::new(EmulatorConfig::default());
        m.memory().bus_add(CPU_BUS, 16);
        m.memory().bus_add(PPU_BUS, 16);

        let instance = ControllerInstance {
            controller_name: "mmc3",
            bus_id: CPU_BUS,
            resources: vec![
                Resource::mem("prg_rom", CPU_BUS, 0x8000, 0xFFFF),
                Resource::mem("chr", PPU_BUS, 0x0000, 0x1FFF),
                Resource::mem_mirrored(
                    "vram",
                    PPU_BUS,
                    0x2000,
                    0x2FFF,
                    vec![Resource::mem("vram_mirror", PPU_BUS, 0x3000, 0x3EFF)],
                ),
                Resource::mem("sram", CPU_BUS, 0x6000, 0x7FFF),
                Resource::irq("irq", 0),
            ],
            mach_data: MachData::NesCart {
                path: file.path().to_path_buf(),
                vram: Rc::new(RefCell::new(vec![0u8; 0x0800])),
            },
        };
        let mut mmc3 = Mmc3 {
            state: None,
            regions: Vec::new(),
            battery: None,
        };
        mmc3.init(&m, &instance).unwrap();
        mmc3.reset(&m);
        (m, mmc3, file)
    }

    #[test]
    fn test_prg_fixed_banks() {
        let (m, _mmc3, _file) = setup();
        // 4 iNES banks = 8 MMC3 banks; image bank pattern repeats every
        // 16 KB, so 8 KB bank n reads 0x10 + n/2.
        // Mode 0 reset: slot 2 = bank 6, slot 3 = bank 7
        assert_eq!(m.memory_readb(CPU_BUS, 0xC000), 0x13);
        assert_eq!(m.memory_readb(CPU_BUS, 0xE000), 0x13);
    }

    #[test]
    fn test_prg_bank_data_write() {
        let (m, _mmc3, _file) = setup();
        m.memory_writeb(CPU_BUS, 6, 0x8000); // select R6
        m.memory_writeb(CPU_BUS, 2, 0x8001); // R6 = bank 2
        assert_eq!(m.memory_readb(CPU_BUS, 0x8000), 0x11);
    }

    #[test]
    fn test_prg_mode_swaps_slots() {
        let (m, _mmc3, _file) = setup();
        m.memory_writeb(CPU_BUS, 6, 0x8000);
        m.memory_writeb(CPU_BUS, 2, 0x8001);
        // Mode 1: slot 0 becomes second-to-last bank, slot 2 gets R6
        m.memory_writeb(CPU_BUS, 0x46, 0x8000);
        assert_eq!(m.memory_readb(CPU_BUS, 0x8000), 0x13);
        assert_eq!(m.memory_readb(CPU_BUS, 0xC000), 0x11);
    }

    #[test]
    fn test_scanline_counter_irq_on_a12_rise() {
        let (m, mmc3, _file) = setup();
        // Latch 2, reload, enable
        m.memory_writeb(CPU_BUS, 2, 0xC000);
        m.memory_writeb(CPU_BUS, 0, 0xC001);
        m.memory_writeb(CPU_BUS, 0, 0xE001);

        // Each A12 rising edge is one low fetch followed by a high fetch
        let edge = |m: &Machine| {
            let _ = m.memory_readb(PPU_BUS, 0x0000);
            let _ = m.memory_readb(PPU_BUS, 0x1000);
        };

        edge(&m); // reload to 2
        assert_eq!(m.pending_irqs(), 0);
        edge(&m); // 1
        assert_eq!(m.pending_irqs(), 0);
        edge(&m); // 0 → IRQ
        assert_ne!(m.take_pending_irqs() & 0b1, 0);
        let _ = mmc3;
    }

    #[test]
    fn test_irq_disable_acknowledges() {
        let (m, mmc3, _file) = setup();
        m.memory_writeb(CPU_BUS, 0, 0xE001); // enable
        assert!(mmc3.state.as_ref().unwrap().borrow().irq_enable);
        m.memory_writeb(CPU_BUS, 0, 0xE000); // disable
        assert!(!mmc3.state.as_ref().unwrap().borrow().irq_enable);
    }

    #[test]
    fn test_mirroring_register() {
        let (m, _mmc3, _file) = setup();
        m.memory_writeb(CPU_BUS, 0x01, 0xA000); // horizontal
        m.memory_writeb(PPU_BUS, 0x21, 0x2005);
        assert_eq!(m.memory_readb(PPU_BUS, 0x2405), 0x21);
    }

    #[test]
    fn test_chr_a12_inversion() {
        let (m, mmc3, _file) = setup();
        {
            let mut state = mmc3.state.as_ref().unwrap().borrow_mut();
            state.regs[0] = 2; // 1 KB banks 2/3 → within first 8 KB image bank
            state.regs[2] = 8; // second image bank
        }
        // No inversion: slot 0 uses R0 & 0xFE = bank 2 (fill 0x80)
        assert_eq!(m.memory_readb(PPU_BUS, 0x0000), 0x80);
        // Inversion: slot 0 uses R2 = bank 8 (fill 0x81)
        m.memory_writeb(CPU_BUS, 0x80, 0x8000);
        assert_eq!(m.memory_readb(PPU_BUS, 0x0000), 0x81);
    }
}
