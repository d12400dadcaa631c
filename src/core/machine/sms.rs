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

//! Sega Master System machine
//!
//! The port-mapped console: the PSG sits behind port 0x7F (mirrored
//! across 0x40-0x7E), the VDP behind 0xBE/0xBF (mirrored across
//! 0x80-0xBD) with the V/H counter ports at 0x7E/0x7F, and the
//! slot-control mapper owns port 0x3E. Work RAM is echoed over the top
//! of the address space. All derived clock rates come off the one master
//! crystal.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::controller::{ControllerInstance, MachData};
use crate::core::cpu::CpuInstance;
use crate::core::error::Result;
use crate::core::machine::{Machine, MachineDesc};
use crate::core::memory::{BusId, Ram, Region, RegionId};
use crate::core::resource::Resource;

const CPU_BUS: BusId = 0;
const VDP_BUS: BusId = 1;

const MASTER_CLOCK_RATE: u64 = 53_693_100;
const CPU_CLOCK_RATE: u64 = MASTER_CLOCK_RATE / 15;
const AUDIO_CLOCK_RATE: u64 = MASTER_CLOCK_RATE / 15;
const VDP_CLOCK_RATE: u64 = MASTER_CLOCK_RATE / 5;

const VDP_IRQ: u32 = 0;

const RAM_SIZE: usize = 0x2000;

pub struct SmsMachine {
    regions: Vec<RegionId>,
}

pub fn create() -> Box<dyn MachineDesc> {
    Box::new(SmsMachine {
        regions: Vec::new(),
    })
}

impl MachineDesc for SmsMachine {
    fn init(&mut self, m: &Machine) -> Result<()> {
        let cart_path = m.config().cart_path()?.to_path_buf();

        m.memory().bus_add(CPU_BUS, 16);

        // Work RAM with its echo mirror over the top of the map
        self.regions.push(m.memory().region_add(Region::new(
            Resource::mem_mirrored(
                "ram",
                CPU_BUS,
                0xC000,
                0xDFFF,
                vec![Resource::mem("echo", CPU_BUS, 0xE000, 0xFFFF)],
            ),
            Rc::new(RefCell::new(Ram::with_size(RAM_SIZE))),
        )));

        m.controller_add(
            ControllerInstance::new("sn76489")
                .with_bus(CPU_BUS)
                .with_resources(vec![
                    Resource::port_mirrored(
                        "port",
                        0x7F,
                        0x7F,
                        vec![Resource::port("port_mirror", 0x40, 0x7E)],
                    ),
                    Resource::clk("clk", AUDIO_CLOCK_RATE),
                ]),
        )?;

        m.controller_add(
            ControllerInstance::new("vdp")
                .with_bus(VDP_BUS)
                .with_resources(vec![
                    Resource::port_mirrored(
                        "port",
                        0xBE,
                        0xBF,
                        vec![Resource::port("port_mirror", 0x80, 0xBD)],
                    ),
                    Resource::port("scanline", 0x7E, 0x7F),
                    Resource::irq("irq", VDP_IRQ),
                    Resource::clk("clk", VDP_CLOCK_RATE),
                ]),
        )?;

        m.controller_add(
            ControllerInstance::new("sms_mapper")
                .with_bus(CPU_BUS)
                .with_resources(vec![
                    Resource::mem("mapper", CPU_BUS, 0x0000, 0xBFFF),
                    Resource::port("port", 0x3E, 0x3E),
                ])
                .with_mach_data(MachData::SmsCart {
                    cart_path,
                    bios_path: m.config().bios.clone(),
                }),
        )?;

        m.cpu_add(
            CpuInstance::new("z80")
                .with_bus(CPU_BUS)
                .with_resources(vec![Resource::clk("clk", CPU_CLOCK_RATE)]),
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

    fn cart_image() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for bank in 0..4u8 {
            file.write_all(&vec![bank; 0x4000]).unwrap();
        }
        file
    }

    fn machine_for(cart: &tempfile::NamedTempFile) -> Machine {
        let mut config = EmulatorConfig::default();
        config.machine = "sms".into();
        config.cart = Some(cart.path().to_path_buf());
        let m = Machine::new(config);
        m.register_cpu("z80", create_stub);
        m
    }

    #[test]
    fn test_boot_layout() {
        let cart = cart_image();
        let m = machine_for(&cart);
        m.init().unwrap();
        m.reset();

        // No BIOS configured: the cart boots directly
        assert_eq!(m.memory_readb(CPU_BUS, 0x0000), 0);
        assert_eq!(m.memory_readb(CPU_BUS, 0x4000), 1);

        // RAM echo over the top of the address space
        m.memory_writeb(CPU_BUS, 0x55, 0xC100);
        assert_eq!(m.memory_readb(CPU_BUS, 0xE100), 0x55);
        m.deinit();
    }

    #[test]
    fn test_vdp_reachable_through_ports() {
        let cart = cart_image();
        let m = machine_for(&cart);
        m.init().unwrap();
        m.reset();

        // Register write through the control port
        m.port_write(0x12, 0xBF);
        m.port_write(0x88, 0xBF);
        // Status read must not panic and clears the latch
        let _ = m.port_read(0xBF);
        m.deinit();
    }

    #[test]
    fn test_psg_reachable_through_mirror() {
        let cart = cart_image();
        let m = machine_for(&cart);
        m.init().unwrap();
        m.reset();
        // A volume latch through the mirrored range is absorbed
        m.port_write(0x9F, 0x40);
        m.deinit();
    }

    #[test]
    fn test_machine_rate_derived_from_crystal() {
        let cart = cart_image();
        let m = machine_for(&cart);
        m.init().unwrap();
        // PSG (/16 of CPU clock) and VDP rates share the crystal; the
        // machine rate must be an exact multiple of both
        let rate = m.scheduler().machine_rate();
        assert_eq!(rate % VDP_CLOCK_RATE, 0);
        assert_eq!(rate % (AUDIO_CLOCK_RATE / 16), 0);
        m.deinit();
    }
}
