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

//! PlayStation machine
//!
//! One 32-bit physical bus: 2 MB of RAM at the bottom, the 512 KB BIOS
//! ROM, and the I/O cluster (CD-ROM, DMA master, GPU, MDEC, SPU, timers)
//! in the 0x1F80xxxx window. The R3051 core is an external collaborator;
//! its scratchpad, interrupt-control and cache-control ranges travel as
//! resources of the CPU instance. DMA channel assignments follow the
//! hardware numbering (MDEC in/out 0/1, GPU 2, CD-ROM 3, SPU 4).

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::controller::ControllerInstance;
use crate::core::cpu::CpuInstance;
use crate::core::error::{EmulatorError, Result};
use crate::core::file::PathKind;
use crate::core::machine::{Machine, MachineDesc};
use crate::core::memory::{BusId, Ram, Region, RegionId, Rom};
use crate::core::resource::Resource;

const CPU_BUS: BusId = 0;

const CPU_CLOCK_RATE: u64 = 33_868_800;
const GPU_CLOCK_RATE: u64 = 53_222_400;

const RAM_SIZE: usize = 2 * 1024 * 1024;
const BIOS_SIZE: usize = 512 * 1024;

// DMA channels
const MDEC_IN_DMA: usize = 0;
const MDEC_OUT_DMA: usize = 1;
const GPU_DMA: usize = 2;
const CDROM_DMA: usize = 3;
const SPU_DMA: usize = 4;

// IRQ lines
const VBLANK_IRQ: u32 = 0;
const GPU_IRQ: u32 = 1;
const CDROM_IRQ: u32 = 2;
const DMA_IRQ: u32 = 3;
const TMR0_IRQ: u32 = 4;
const TMR1_IRQ: u32 = 5;
const TMR2_IRQ: u32 = 6;

pub struct PsxMachine {
    regions: Vec<RegionId>,
}

pub fn create() -> Box<dyn MachineDesc> {
    Box::new(PsxMachine {
        regions: Vec::new(),
    })
}

impl MachineDesc for PsxMachine {
    fn init(&mut self, m: &Machine) -> Result<()> {
        m.memory().bus_add(CPU_BUS, 32);

        // Main RAM
        self.regions.push(m.memory().region_add(Region::new(
            Resource::mem("ram", CPU_BUS, 0x0000_0000, 0x001F_FFFF),
            Rc::new(RefCell::new(Ram::with_size(RAM_SIZE))),
        )));

        // BIOS
        let bios_path = m.config().bios_path()?;
        let bios = m.files().map(PathKind::System, bios_path, 0, BIOS_SIZE)?;
        if bios.is_empty() {
            return Err(EmulatorError::MalformedImage("BIOS image is empty".into()));
        }
        self.regions.push(m.memory().region_add(Region::new(
            Resource::mem("bios", CPU_BUS, 0x1FC0_0000, 0x1FC7_FFFF),
            Rc::new(RefCell::new(Rom::new(bios))),
        )));

        m.cpu_add(
            CpuInstance::new("r3051")
                .with_bus(CPU_BUS)
                .with_resources(vec![
                    Resource::clk("clk", CPU_CLOCK_RATE),
                    Resource::mem("scratchpad", CPU_BUS, 0x1F80_0000, 0x1F80_03FF),
                    Resource::mem("int_control", CPU_BUS, 0x1F80_1070, 0x1F80_1077),
                    Resource::mem("cache_control", CPU_BUS, 0xFFFE_0130, 0xFFFE_0133),
                ]),
        )?;

        m.controller_add(
            ControllerInstance::new("psx_cdrom")
                .with_bus(CPU_BUS)
                .with_resources(vec![
                    Resource::mem("mem", CPU_BUS, 0x1F80_1800, 0x1F80_1803),
                    Resource::dma("dma", CDROM_DMA),
                    Resource::irq("irq", CDROM_IRQ),
                    Resource::clk("clk", CPU_CLOCK_RATE),
                ]),
        )?;

        m.controller_add(
            ControllerInstance::new("psx_dma")
                .with_bus(CPU_BUS)
                .with_resources(vec![
                    Resource::mem("mem", CPU_BUS, 0x1F80_1080, 0x1F80_10FF),
                    Resource::irq("irq", DMA_IRQ),
                ]),
        )?;

        m.controller_add(
            ControllerInstance::new("gpu")
                .with_bus(CPU_BUS)
                .with_resources(vec![
                    Resource::mem("mem", CPU_BUS, 0x1F80_1810, 0x1F80_1817),
                    Resource::dma("dma", GPU_DMA),
                    Resource::irq("vblk_irq", VBLANK_IRQ),
                    Resource::irq("gpu_irq", GPU_IRQ),
                    Resource::clk("clk", GPU_CLOCK_RATE),
                ]),
        )?;

        m.controller_add(
            ControllerInstance::new("mdec")
                .with_bus(CPU_BUS)
                .with_resources(vec![
                    Resource::mem("mem", CPU_BUS, 0x1F80_1820, 0x1F80_1827),
                    Resource::dma("dma_in", MDEC_IN_DMA),
                    Resource::dma("dma_out", MDEC_OUT_DMA),
                ]),
        )?;

        m.controller_add(
            ControllerInstance::new("spu")
                .with_bus(CPU_BUS)
                .with_resources(vec![
                    Resource::mem("mem", CPU_BUS, 0x1F80_1C00, 0x1F80_1FFF),
                    Resource::dma("dma", SPU_DMA),
                ]),
        )?;

        m.controller_add(
            ControllerInstance::new("psx_timer")
                .with_bus(CPU_BUS)
                .with_resources(vec![
                    Resource::mem("mem", CPU_BUS, 0x1F80_1100, 0x1F80_112F),
                    Resource::irq("tmr0_irq", TMR0_IRQ),
                    Resource::irq("tmr1_irq", TMR1_IRQ),
                    Resource::irq("tmr2_irq", TMR2_IRQ),
                    Resource::clk("clk", CPU_CLOCK_RATE),
                ]),
        )?;

        Ok(())
    }

    fn deinit(&mut self, m: &Machine) {
        for id in self.regions.drain(..) {
            m.memory().region_remove(id);
        }
    }
}
