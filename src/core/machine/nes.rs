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

//! NES machine
//!
//! Two buses: the CPU bus carries 2 KB of mirrored work RAM, the PPU
//! register window (mirrored up to $3FFF), the APU/sprite-DMA/joypad
//! register cluster and the cart PRG space; the PPU bus carries CHR,
//! the mapper-mirrored nametable VRAM and the palette. The nametable
//! backing store is owned here and lent to the mapper through its
//! machine data. The 2A03 CPU core is an external collaborator:
//! register it before instantiating this machine.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::controller::{ControllerInstance, MachData};
use crate::core::cpu::CpuInstance;
use crate::core::error::Result;
use crate::core::machine::{Machine, MachineDesc};
use crate::core::memory::{BusId, Ram, Region, RegionId};
use crate::core::resource::Resource;

const CPU_BUS: BusId = 0;
const PPU_BUS: BusId = 1;

const CPU_CLOCK_RATE: u64 = 1_789_773;
const APU_CLOCK_RATE: u64 = 894_886;
const SEQ_CLOCK_RATE: u64 = 240;
const PPU_CLOCK_RATE: u64 = 5_369_318;

const IRQ_LINE: u32 = 0;
const NMI_LINE: u32 = 1;

const RAM_SIZE: usize = 0x0800;
const VRAM_SIZE: usize = 0x0800;
const PALETTE_SIZE: usize = 0x20;

pub struct NesMachine {
    regions: Vec<RegionId>,
}

pub fn create() -> Box<dyn MachineDesc> {
    Box::new(NesMachine {
        regions: Vec::new(),
    })
}

impl MachineDesc for NesMachine {
    fn init(&mut self, m: &Machine) -> Result<()> {
        let cart_path = m.config().cart_path()?.to_path_buf();

        m.memory().bus_add(CPU_BUS, 16);
        m.memory().bus_add(PPU_BUS, 16);

        // 2 KB work RAM mirrored through $1FFF
        self.regions.push(m.memory().region_add(Region::new(
            Resource::mem_mirrored(
                "ram",
                CPU_BUS,
                0x0000,
                0x07FF,
                vec![Resource::mem("ram_mirror", CPU_BUS, 0x0800, 0x1FFF)],
            ),
            Rc::new(RefCell::new(Ram::with_size(RAM_SIZE))),
        )));

        // Palette RAM on the PPU bus, mirrored through $3FFF
        self.regions.push(m.memory().region_add(Region::new(
            Resource::mem_mirrored(
                "palette",
                PPU_BUS,
                0x3F00,
                0x3F1F,
                vec![Resource::mem("palette_mirror", PPU_BUS, 0x3F20, 0x3FFF)],
            ),
            Rc::new(RefCell::new(Ram::with_size(PALETTE_SIZE))),
        )));

        // Nametable VRAM backing store, mirrored by the mapper
        let vram = Rc::new(RefCell::new(vec![0u8; VRAM_SIZE]));

        m.cpu_add(
            CpuInstance::new("rp2a03")
                .with_bus(CPU_BUS)
                .with_resources(vec![
                    Resource::clk("clk", CPU_CLOCK_RATE),
                    Resource::irq("irq", IRQ_LINE),
                    Resource::irq("nmi", NMI_LINE),
                ]),
        )?;

        m.controller_add(
            ControllerInstance::new("ppu")
                .with_bus(PPU_BUS)
                .with_resources(vec![
                    Resource::mem_mirrored(
                        "mem",
                        CPU_BUS,
                        0x2000,
                        0x2007,
                        vec![Resource::mem("mem_mirror", CPU_BUS, 0x2008, 0x3FFF)],
                    ),
                    Resource::clk("clk", PPU_CLOCK_RATE),
                    Resource::irq("irq", NMI_LINE),
                ]),
        )?;

        m.controller_add(
            ControllerInstance::new("apu")
                .with_bus(CPU_BUS)
                .with_resources(vec![
                    Resource::mem("main", CPU_BUS, 0x4000, 0x4013),
                    Resource::mem("ctrl_stat", CPU_BUS, 0x4015, 0x4015),
                    Resource::mem("seq", CPU_BUS, 0x4017, 0x4017),
                    Resource::clk("clk", APU_CLOCK_RATE),
                    Resource::clk("seq_clk", SEQ_CLOCK_RATE),
                    Resource::irq("irq", IRQ_LINE),
                ]),
        )?;

        m.controller_add(
            ControllerInstance::new("nes_sprite")
                .with_bus(CPU_BUS)
                .with_resources(vec![Resource::mem("mem", CPU_BUS, 0x4014, 0x4014)]),
        )?;

        m.controller_add(
            ControllerInstance::new("nes_controller")
                .with_bus(CPU_BUS)
                .with_resources(vec![Resource::mem("mem", CPU_BUS, 0x4016, 0x4017)]),
        )?;

        m.controller_add(
            ControllerInstance::new("nes_mapper")
                .with_bus(CPU_BUS)
                .with_resources(vec![
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
                    Resource::irq("irq", IRQ_LINE),
                ])
                .with_mach_data(MachData::NesCart {
                    path: cart_path,
                    vram,
                }),
        )?;

        Ok(())
    }

    fn deinit(&mut self, m: &Machine) {
        for id in self.regions.drain(..) {
            m.memory().region_remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EmulatorConfig;
    use crate::core::cpu::Cpu;
    use crate::core::error::EmulatorError;
    use crate::core::mapper::test_support::ines_image;

    struct StubCpu;

    impl Cpu for StubCpu {
        fn init(&mut self, _m: &Machine, _instance: &CpuInstance) -> Result<()> {
            Ok(())
        }
    }

    fn create_stub() -> Box<dyn Cpu> {
        Box::new(StubCpu)
    }

    fn machine_for(file: &tempfile::NamedTempFile) -> Machine {
        let mut config = EmulatorConfig::default();
        config.machine = "nes".into();
        config.cart = Some(file.path().to_path_buf());
        let m = Machine::new(config);
        m.register_cpu("rp2a03", create_stub);
        m
    }

    #[test]
    fn test_boot_with_nrom_cart() {
        let file = ines_image(0, 2, 1, 0);
        let m = machine_for(&file);
        m.init().unwrap();
        m.reset();

        // Work RAM mirror and cart PRG visible on the CPU bus
        m.memory_writeb(CPU_BUS, 0x42, 0x0000);
        assert_eq!(m.memory_readb(CPU_BUS, 0x1800), 0x42);
        assert_eq!(m.memory_readb(CPU_BUS, 0x8000), 0x10);

        // CHR visible on the PPU bus
        assert_eq!(m.memory_readb(PPU_BUS, 0x0000), 0x80);
        m.deinit();
    }

    #[test]
    fn test_ppu_registers_reachable_through_mirrors() {
        let file = ines_image(0, 1, 1, 0);
        let m = machine_for(&file);
        m.init().unwrap();
        m.reset();

        // $2006/$2007 write path lands in nametable VRAM via the mapper
        m.memory_writeb(CPU_BUS, 0x20, 0x2006);
        m.memory_writeb(CPU_BUS, 0x00, 0x2006);
        m.memory_writeb(CPU_BUS, 0x99, 0x2007);
        assert_eq!(m.memory_readb(PPU_BUS, 0x2000), 0x99);
        m.deinit();
    }

    #[test]
    fn test_palette_mirror_folding() {
        let file = ines_image(0, 1, 1, 0);
        let m = machine_for(&file);
        m.init().unwrap();
        m.memory_writeb(PPU_BUS, 0x2A, 0x3F01);
        assert_eq!(m.memory_readb(PPU_BUS, 0x3F21), 0x2A);
        m.deinit();
    }

    #[test]
    fn test_missing_cpu_core_fails_with_not_found() {
        let file = ines_image(0, 1, 1, 0);
        let mut config = EmulatorConfig::default();
        config.machine = "nes".into();
        config.cart = Some(file.path().to_path_buf());
        let m = Machine::new(config);
        // No rp2a03 registered: the external collaborator is absent
        assert!(matches!(m.init(), Err(EmulatorError::NotFound(_))));
    }

    #[test]
    fn test_unsupported_mapper_aborts_init() {
        let file = ines_image(7, 1, 1, 0);
        let m = machine_for(&file);
        assert!(m.init().is_err());
        m.deinit();
    }
}
