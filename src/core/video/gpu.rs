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

//! PSX GPU (status and control registers)
//!
//! The command FIFO body is deliberately not modelled: GP0 words are
//! accepted and dropped at debug log level, while GPUSTAT and the GP1
//! control operations that affect it (reset, display enable, DMA
//! direction, IRQ acknowledge) behave. The video clock walks the raster
//! line by line, firing the hblank/vblank edges the timer block listens
//! for and raising the VBLANK interrupt once per frame.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::clock::ClockTick;
use crate::core::controller::{Controller, ControllerInstance};
use crate::core::cpu::IrqLine;
use crate::core::dma::{DmaChannelRef, DmaOps};
use crate::core::error::Result;
use crate::core::machine::Machine;
use crate::core::memory::{Address, MemOps, Region, RegionId};
use crate::core::resource::Resource;

const GP0: Address = 0x00;
const GP1: Address = 0x04;
const GPUREAD: Address = 0x00;
const GPUSTAT: Address = 0x04;

// NTSC raster geometry in GPU clock cycles
const CYCLES_PER_SCANLINE: u32 = 3413;
const NUM_SCANLINES: u32 = 263;
const VBLANK_LINE: u32 = 240;

// GPUSTAT bits
const STAT_DISPLAY_DISABLE: u32 = 1 << 23;
const STAT_IRQ: u32 = 1 << 24;
const STAT_READY_RECV_CMD: u32 = 1 << 26;
const STAT_READY_SEND_VRAM: u32 = 1 << 27;
const STAT_READY_RECV_DMA: u32 = 1 << 28;
const STAT_DMA_DIR_SHIFT: u32 = 29;
const STAT_ODD_LINE: u32 = 1 << 31;

struct GpuState {
    stat: u32,
    read_latch: u32,
    line: u32,
    vblank_irq: IrqLine,
    gpu_irq: IrqLine,
}

impl GpuState {
    fn new() -> Self {
        Self {
            stat: Self::reset_stat(),
            read_latch: 0,
            line: 0,
            vblank_irq: 0,
            gpu_irq: 0,
        }
    }

    fn reset_stat() -> u32 {
        STAT_DISPLAY_DISABLE | STAT_READY_RECV_CMD | STAT_READY_SEND_VRAM | STAT_READY_RECV_DMA
    }
}

fn gp0_write(state: &mut GpuState, l: u32) {
    // Command FIFO is a stub: accept and drop
    log::debug!("GP0 word {l:#010x} dropped (command FIFO not modelled)");
    let _ = state;
}

fn gp1_write(m: &Machine, state: &mut GpuState, l: u32) {
    let opcode = l >> 24;
    match opcode {
        // Reset GPU
        0x00 => state.stat = GpuState::reset_stat(),
        // Acknowledge GPU IRQ
        0x02 => state.stat &= !STAT_IRQ,
        // Display enable (bit 0: 1 = disabled)
        0x03 => {
            if l & 1 != 0 {
                state.stat |= STAT_DISPLAY_DISABLE;
            } else {
                state.stat &= !STAT_DISPLAY_DISABLE;
            }
        }
        // DMA direction
        0x04 => {
            state.stat =
                (state.stat & !(0x03 << STAT_DMA_DIR_SHIFT)) | ((l & 0x03) << STAT_DMA_DIR_SHIFT);
        }
        // Display area / mode settings only matter to the renderer
        0x05..=0x08 => log::trace!("GP1 display setting {opcode:#04x}"),
        // GPU info reads land in the read latch
        0x10 => state.read_latch = 0,
        _ => {
            log::debug!("unhandled GP1 command {opcode:#04x}");
            let _ = m;
        }
    }
}

fn gpu_tick(m: &Machine, state: &mut GpuState) {
    // Advance one scanline, firing the edges the timers listen for
    m.event_fire("hblank");
    m.event_fire("hblank_end");

    state.line += 1;
    if state.line == VBLANK_LINE {
        m.event_fire("vblank");
        m.cpu_interrupt(state.vblank_irq);
        m.video_update();
        state.stat ^= STAT_ODD_LINE;
    }
    if state.line == NUM_SCANLINES {
        m.event_fire("vblank_end");
        state.line = 0;
    }

    m.clock_consume(CYCLES_PER_SCANLINE);
}

struct GpuPorts(Rc<RefCell<GpuState>>);

impl MemOps for GpuPorts {
    fn readl(&mut self, _m: &Machine, address: Address) -> Option<u32> {
        let state = self.0.borrow();
        Some(match address {
            GPUREAD => state.read_latch,
            GPUSTAT => state.stat,
            _ => 0,
        })
    }

    fn writel(&mut self, m: &Machine, l: u32, address: Address) -> bool {
        let mut state = self.0.borrow_mut();
        match address {
            GP0 => gp0_write(&mut state, l),
            GP1 => gp1_write(m, &mut state, l),
            _ => {}
        }
        true
    }
}

struct GpuDma(Rc<RefCell<GpuState>>);

impl DmaOps for GpuDma {
    fn readl(&mut self, m: &Machine) -> Option<u32> {
        m.clock_consume(1);
        Some(self.0.borrow().read_latch)
    }

    fn writel(&mut self, m: &Machine, l: u32) -> bool {
        m.clock_consume(1);
        gp0_write(&mut self.0.borrow_mut(), l);
        true
    }
}

struct GpuTick(Rc<RefCell<GpuState>>);

impl ClockTick for GpuTick {
    fn tick(&mut self, m: &Machine) {
        gpu_tick(m, &mut self.0.borrow_mut());
    }
}

/// PSX GPU controller
pub struct Gpu {
    state: Rc<RefCell<GpuState>>,
    region: Option<RegionId>,
    dma_channel: Option<DmaChannelRef>,
}

pub fn create() -> Box<dyn Controller> {
    Box::new(Gpu {
        state: Rc::new(RefCell::new(GpuState::new())),
        region: None,
        dma_channel: None,
    })
}

impl Controller for Gpu {
    fn init(&mut self, m: &Machine, instance: &ControllerInstance) -> Result<()> {
        let area = Resource::find_mem(&instance.resources, "mem")?.clone();
        self.region = Some(m.memory().region_add(Region::new(
            area,
            Rc::new(RefCell::new(GpuPorts(self.state.clone()))),
        )));

        let channel = Resource::find_dma(&instance.resources, "dma")?;
        self.dma_channel = Some(
            m.dma()
                .add(channel, Rc::new(RefCell::new(GpuDma(self.state.clone())))),
        );

        {
            let mut state = self.state.borrow_mut();
            state.vblank_irq = Resource::find_irq(&instance.resources, "vblk_irq")?;
            state.gpu_irq = Resource::find_irq(&instance.resources, "gpu_irq")?;
        }

        let rate = Resource::find_clk(&instance.resources, "clk")?;
        m.clock_add(rate, Box::new(GpuTick(self.state.clone())));

        Ok(())
    }

    fn reset(&mut self, _m: &Machine) {
        let mut state = self.state.borrow_mut();
        let (vblank_irq, gpu_irq) = (state.vblank_irq, state.gpu_irq);
        *state = GpuState::new();
        state.vblank_irq = vblank_irq;
        state.gpu_irq = gpu_irq;
    }

    fn deinit(&mut self, m: &Machine) {
        if let Some(id) = self.region.take() {
            m.memory().region_remove(id);
        }
        if let Some(id) = self.dma_channel.take() {
            m.dma().remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EmulatorConfig;
    use crate::core::controller::MachData;
    use crate::core::memory::BusId;

    const BUS: BusId = 0;
    const BASE: Address = 0x1F80_1810;

    fn setup() -> (Machine, Gpu) {
        let m = Machine::new(EmulatorConfig::default());
        m.memory().bus_add(BUS, 32);

        let mut gpu = Gpu {
            state: Rc::new(RefCell::new(GpuState::new())),
            region: None,
            dma_channel: None,
        };
        let instance = ControllerInstance {
            controller_name: "gpu",
            bus_id: BUS,
            resources: vec![
                Resource::mem("mem", BUS, BASE, BASE + 7),
                Resource::dma("dma", 2),
                Resource::irq("vblk_irq", 0),
                Resource::irq("gpu_irq", 1),
                Resource::clk("clk", 53_222_400),
            ],
            mach_data: MachData::None,
        };
        gpu.init(&m, &instance).unwrap();
        (m, gpu)
    }

    #[test]
    fn test_stat_reports_ready_bits() {
        let (m, _gpu) = setup();
        let stat = m.memory_readl(BUS, BASE + GPUSTAT);
        assert_ne!(stat & STAT_READY_RECV_CMD, 0);
        assert_ne!(stat & STAT_READY_RECV_DMA, 0);
        assert_ne!(stat & STAT_DISPLAY_DISABLE, 0);
    }

    #[test]
    fn test_gp1_display_enable() {
        let (m, _gpu) = setup();
        m.memory_writel(BUS, 0x0300_0000, BASE + GP1); // enable
        assert_eq!(m.memory_readl(BUS, BASE + GPUSTAT) & STAT_DISPLAY_DISABLE, 0);
        m.memory_writel(BUS, 0x0300_0001, BASE + GP1); // disable
        assert_ne!(m.memory_readl(BUS, BASE + GPUSTAT) & STAT_DISPLAY_DISABLE, 0);
    }

    #[test]
    fn test_gp1_dma_direction() {
        let (m, _gpu) = setup();
        m.memory_writel(BUS, 0x0400_0002, BASE + GP1);
        let stat = m.memory_readl(BUS, BASE + GPUSTAT);
        assert_eq!((stat >> STAT_DMA_DIR_SHIFT) & 0x03, 2);
    }

    #[test]
    fn test_gp1_reset_restores_defaults() {
        let (m, _gpu) = setup();
        m.memory_writel(BUS, 0x0400_0003, BASE + GP1);
        m.memory_writel(BUS, 0x0000_0000, BASE + GP1);
        assert_eq!(m.memory_readl(BUS, BASE + GPUSTAT), GpuState::reset_stat());
    }

    #[test]
    fn test_vblank_fires_once_per_frame() {
        let (m, gpu) = setup();
        for _ in 0..NUM_SCANLINES {
            gpu_tick(&m, &mut gpu.state.borrow_mut());
        }
        assert_ne!(m.take_pending_irqs() & 0b1, 0);
        assert_eq!(gpu.state.borrow().line, 0);
    }

    #[test]
    fn test_gp0_words_are_dropped() {
        let (m, _gpu) = setup();
        // A polygon command must not wedge anything
        m.memory_writel(BUS, 0x2000_0000, BASE + GP0);
        m.memory_writel(BUS, 0x0102_0304, BASE + GP0);
        let stat = m.memory_readl(BUS, BASE + GPUSTAT);
        assert_ne!(stat & STAT_READY_RECV_CMD, 0);
    }
}
