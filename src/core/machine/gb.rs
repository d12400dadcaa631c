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

//! Game Boy machine
//!
//! One 16-bit bus. The machine owns the fixed cart bank, VRAM, work RAM
//! with its echo mirror, OAM and HRAM; the mapper dispatcher covers the
//! switchable bank and external RAM. When a boot ROM is configured it
//! overlays the bottom of the cart until the lock register at $FF50 is
//! written, which exercises the overlay mechanism of the region fabric.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::core::controller::{ControllerInstance, MachData};
use crate::core::cpu::CpuInstance;
use crate::core::error::Result;
use crate::core::file::PathKind;
use crate::core::machine::{Machine, MachineDesc};
use crate::core::memory::{Address, BusId, MemOps, Ram, Region, RegionId, Rom};
use crate::core::resource::Resource;

const BUS: BusId = 0;
const GB_CLOCK_RATE: u64 = 4_194_304;
const DIV_CLOCK_RATE: u64 = 16_384;

const VBLANK_IRQ: u32 = 0;
const LCDC_IRQ: u32 = 1;
const TIMER_IRQ: u32 = 2;

const VRAM_SIZE: usize = 8 * 1024;
const WRAM_SIZE: usize = 8 * 1024;
const OAM_SIZE: usize = 0xA0;
const HRAM_SIZE: usize = 127;
const ROM0_SIZE: usize = 16 * 1024;

/// $FF50: any write permanently drops the boot ROM overlay
struct BootLock {
    bootrom_region: Rc<Cell<Option<RegionId>>>,
}

impl MemOps for BootLock {
    fn writeb(&mut self, m: &Machine, _b: u8, _address: Address) -> bool {
        if let Some(id) = self.bootrom_region.take() {
            log::info!("boot ROM disabled");
            m.memory().region_remove(id);
        }
        true
    }
}

pub struct GbMachine {
    regions: Vec<RegionId>,
    bootrom_region: Rc<Cell<Option<RegionId>>>,
}

pub fn create() -> Box<dyn MachineDesc> {
    Box::new(GbMachine {
        regions: Vec::new(),
        bootrom_region: Rc::new(Cell::new(None)),
    })
}

impl MachineDesc for GbMachine {
    fn init(&mut self, m: &Machine) -> Result<()> {
        let cart_path = m.config().cart_path()?.to_path_buf();

        m.memory().bus_add(BUS, 16);

        // Fixed cart bank
        let rom0 = m.files().map(PathKind::Data, &cart_path, 0, ROM0_SIZE)?;
        self.regions.push(m.memory().region_add(Region::new(
            Resource::mem("rom0", BUS, 0x0000, 0x3FFF),
            Rc::new(RefCell::new(Rom::new(rom0))),
        )));

        // VRAM, work RAM (+ echo), OAM and HRAM
        self.regions.push(m.memory().region_add(Region::new(
            Resource::mem("vram", BUS, 0x8000, 0x9FFF),
            Rc::new(RefCell::new(Ram::with_size(VRAM_SIZE))),
        )));
        self.regions.push(m.memory().region_add(Region::new(
            Resource::mem_mirrored(
                "wram",
                BUS,
                0xC000,
                0xDFFF,
                vec![Resource::mem("echo", BUS, 0xE000, 0xFDFF)],
            ),
            Rc::new(RefCell::new(Ram::with_size(WRAM_SIZE))),
        )));
        self.regions.push(m.memory().region_add(Region::new(
            Resource::mem("oam", BUS, 0xFE00, 0xFE9F),
            Rc::new(RefCell::new(Ram::with_size(OAM_SIZE))),
        )));
        self.regions.push(m.memory().region_add(Region::new(
            Resource::mem("hram", BUS, 0xFF80, 0xFFFE),
            Rc::new(RefCell::new(Ram::with_size(HRAM_SIZE))),
        )));

        m.controller_add(
            ControllerInstance::new("gb_mapper")
                .with_bus(BUS)
                .with_resources(vec![
                    Resource::mem("rom1", BUS, 0x4000, 0x7FFF),
                    Resource::mem("extram", BUS, 0xA000, 0xBFFF),
                ])
                .with_mach_data(MachData::CartPath(cart_path)),
        )?;

        m.controller_add(
            ControllerInstance::new("lcdc")
                .with_bus(BUS)
                .with_resources(vec![
                    Resource::mem("mem", BUS, 0xFF40, 0xFF4B),
                    Resource::clk("clk", GB_CLOCK_RATE),
                    Resource::irq("vblank", VBLANK_IRQ),
                    Resource::irq("lcdc", LCDC_IRQ),
                ]),
        )?;

        m.controller_add(
            ControllerInstance::new("gb_timer")
                .with_bus(BUS)
                .with_resources(vec![
                    Resource::mem("mem", BUS, 0xFF04, 0xFF07),
                    Resource::clk("div_clk", DIV_CLOCK_RATE),
                    Resource::clk("tima_clk", GB_CLOCK_RATE),
                    Resource::irq("irq", TIMER_IRQ),
                ]),
        )?;

        m.controller_add(
            ControllerInstance::new("papu")
                .with_bus(BUS)
                .with_resources(vec![
                    Resource::mem("mem", BUS, 0xFF10, 0xFF26),
                    Resource::mem("wave", BUS, 0xFF30, 0xFF3F),
                    Resource::clk("clk", GB_CLOCK_RATE),
                ]),
        )?;

        m.controller_add(
            ControllerInstance::new("gb_joypad")
                .with_bus(BUS)
                .with_resources(vec![Resource::mem("mem", BUS, 0xFF00, 0xFF00)]),
        )?;

        // Boot ROM overlay and its lock register
        if let Some(bootrom_path) = &m.config().bootrom {
            let bootrom = m.files().map(PathKind::System, bootrom_path, 0, 256)?;
            let end = (bootrom.len().max(1) - 1) as Address;
            let id = m.memory().region_add(Region::new(
                Resource::mem("bootrom", BUS, 0x0000, end),
                Rc::new(RefCell::new(Rom::new(bootrom))),
            ));
            self.bootrom_region.set(Some(id));

            self.regions.push(m.memory().region_add(Region::new(
                Resource::mem("boot_lock", BUS, 0xFF50, 0xFF50),
                Rc::new(RefCell::new(BootLock {
                    bootrom_region: self.bootrom_region.clone(),
                })),
            )));
        }

        m.cpu_add(
            CpuInstance::new("lr35902")
                .with_bus(BUS)
                .with_resources(vec![
                    Resource::clk("clk", GB_CLOCK_RATE),
                    Resource::mem("ifr", BUS, 0xFF0F, 0xFF0F),
                    Resource::mem("ier", BUS, 0xFFFF, 0xFFFF),
                ]),
        )?;

        Ok(())
    }

    fn deinit(&mut self, m: &Machine) {
        if let Some(id) = self.bootrom_region.take() {
            m.memory().region_remove(id);
        }
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
    use crate::core::mapper::test_support::gb_image;
    use std::io::Write;

    struct StubCpu;

    impl Cpu for StubCpu {
        fn init(&mut self, _m: &Machine, _instance: &CpuInstance) -> Result<()> {
            Ok(())
        }
    }

    fn create_stub() -> Box<dyn Cpu> {
        Box::new(StubCpu)
    }

    fn machine_for(
        cart: &tempfile::NamedTempFile,
        bootrom: Option<&tempfile::NamedTempFile>,
    ) -> Machine {
        let mut config = EmulatorConfig::default();
        config.machine = "gb".into();
        config.cart = Some(cart.path().to_path_buf());
        config.bootrom = bootrom.map(|f| f.path().to_path_buf());
        let m = Machine::new(config);
        m.register_cpu("lr35902", create_stub);
        m
    }

    #[test]
    fn test_boot_layout() {
        let cart = gb_image(0x00, 2, 0);
        let m = machine_for(&cart, None);
        m.init().unwrap();
        m.reset();

        // Fixed bank, switchable bank, work RAM echo
        assert_eq!(m.memory_readb(BUS, 0x0000), 0);
        assert_eq!(m.memory_readb(BUS, 0x4000), 1);
        m.memory_writeb(BUS, 0x42, 0xC123);
        assert_eq!(m.memory_readb(BUS, 0xE123), 0x42);
        m.deinit();
    }

    #[test]
    fn test_bootrom_overlay_until_lock_write() {
        // The overlay scenario: boot byte shadows the cart, removing the
        // region restores the cart byte.
        let cart = gb_image(0x00, 2, 0);
        let mut boot = tempfile::NamedTempFile::new().unwrap();
        boot.write_all(&[0xB0u8; 256]).unwrap();

        let m = machine_for(&cart, Some(&boot));
        m.init().unwrap();
        m.reset();

        assert_eq!(m.memory_readb(BUS, 0x0050), 0xB0);
        // Past the overlay the cart shows through
        assert_eq!(m.memory_readb(BUS, 0x0150), 0);

        m.memory_writeb(BUS, 0x01, 0xFF50);
        assert_eq!(m.memory_readb(BUS, 0x0050), 0);
        m.deinit();
    }

    #[test]
    fn test_timer_registers_reachable() {
        let cart = gb_image(0x00, 2, 0);
        let m = machine_for(&cart, None);
        m.init().unwrap();
        m.reset();

        m.memory_writeb(BUS, 0x23, 0xFF06); // TMA
        assert_eq!(m.memory_readb(BUS, 0xFF06), 0x23);
        m.deinit();
    }

    #[test]
    fn test_machine_ticks_without_cpu_work() {
        let cart = gb_image(0x00, 2, 0);
        let m = machine_for(&cart, None);
        m.init().unwrap();
        m.reset();

        for _ in 0..50 {
            m.scheduler().tick_all(&m, false);
        }
        assert!(m.scheduler().current_cycle() > 0);
        m.deinit();
    }
}
