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

//! PSX DMA master
//!
//! Seven channels of MADR/BCR/CHCR registers plus the global DPCR/DICR
//! pair. Starting a channel moves whole 32-bit longs between CPU RAM and
//! the peripheral registered on the matching DMA channel of the fabric;
//! the peripheral's ops bill the cycles each word costs, so a long
//! transfer stalls the initiating clock exactly like the hardware stalls
//! the CPU. Completion sets the channel's DICR flag and raises the DMA
//! interrupt when enabled.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::controller::{Controller, ControllerInstance};
use crate::core::cpu::IrqLine;
use crate::core::error::Result;
use crate::core::machine::Machine;
use crate::core::memory::{Address, BusId, MemOps, Region, RegionId};
use crate::core::resource::Resource;

const NUM_CHANNELS: usize = 7;
const CHANNEL_STRIDE: Address = 0x10;
const DPCR_OFFSET: Address = 0x70;
const DICR_OFFSET: Address = 0x74;

// CHCR bits
const CHCR_FROM_RAM: u32 = 1 << 0;
const CHCR_STEP_BACK: u32 = 1 << 1;
const CHCR_START: u32 = 1 << 24;
const CHCR_TRIGGER: u32 = 1 << 28;

// DICR bits
const DICR_MASTER_ENABLE: u32 = 1 << 23;
const DICR_FLAG_SHIFT: u32 = 24;
const DICR_MASTER_FLAG: u32 = 1 << 31;

#[derive(Default, Clone, Copy)]
struct Channel {
    madr: u32,
    bcr: u32,
    chcr: u32,
}

impl Channel {
    /// Number of words to move (block mode multiplies size by count)
    fn num_words(&self) -> u32 {
        let size = self.bcr & 0xFFFF;
        let count = (self.bcr >> 16) & 0xFFFF;
        let size = if size == 0 { 0x10000 } else { size };
        let count = if count == 0 { 1 } else { count };
        size * count
    }
}

struct DmaState {
    channels: [Channel; NUM_CHANNELS],
    dpcr: u32,
    dicr: u32,
    bus_id: BusId,
    irq: IrqLine,
}

impl DmaState {
    fn new() -> Self {
        Self {
            channels: [Channel::default(); NUM_CHANNELS],
            // Power-on priority assignment
            dpcr: 0x0765_4321,
            dicr: 0,
            bus_id: 0,
            irq: 0,
        }
    }

    fn channel_enabled(&self, index: usize) -> bool {
        self.dpcr & (1 << (index * 4 + 3)) != 0
    }
}

/// Run one whole channel transfer synchronously
fn run_channel(m: &Machine, state: &mut DmaState, index: usize) {
    let channel = state.channels[index];
    let words = channel.num_words();
    let step: i64 = if channel.chcr & CHCR_STEP_BACK != 0 {
        -4
    } else {
        4
    };
    let mut addr = i64::from(channel.madr & 0x00FF_FFFC);

    log::debug!(
        "DMA channel {index}: {words} words {} RAM at {addr:#x}",
        if channel.chcr & CHCR_FROM_RAM != 0 {
            "from"
        } else {
            "to"
        }
    );

    for _ in 0..words {
        if channel.chcr & CHCR_FROM_RAM != 0 {
            let l = m.memory_readl(state.bus_id, addr as Address);
            m.dma_writel(index, l);
        } else {
            let l = m.dma_readl(index);
            m.memory_writel(state.bus_id, l, addr as Address);
        }
        addr += step;
    }

    // Transfer complete: clear the busy bits and flag the interrupt
    state.channels[index].chcr &= !(CHCR_START | CHCR_TRIGGER);
    state.channels[index].madr = (addr as u32) & 0x00FF_FFFC;

    if state.dicr & (1 << (16 + index)) != 0 && state.dicr & DICR_MASTER_ENABLE != 0 {
        state.dicr |= 1 << (DICR_FLAG_SHIFT + index as u32);
        state.dicr |= DICR_MASTER_FLAG;
        m.cpu_interrupt(state.irq);
    }
}

fn dma_readl(state: &DmaState, address: Address) -> u32 {
    match address {
        DPCR_OFFSET => state.dpcr,
        DICR_OFFSET => state.dicr,
        _ => {
            let index = (address / CHANNEL_STRIDE) as usize;
            let reg = address % CHANNEL_STRIDE;
            if index >= NUM_CHANNELS {
                return 0;
            }
            match reg {
                0x0 => state.channels[index].madr,
                0x4 => state.channels[index].bcr,
                0x8 => state.channels[index].chcr,
                _ => 0,
            }
        }
    }
}

fn dma_writel(m: &Machine, state: &mut DmaState, l: u32, address: Address) {
    match address {
        DPCR_OFFSET => state.dpcr = l,
        DICR_OFFSET => {
            // Flag bits are write-1-to-clear; the rest is stored
            let ack = l & (0x7F << DICR_FLAG_SHIFT);
            state.dicr = (l & 0x00FF_FFFF) | (state.dicr & !ack & 0xFF00_0000);
            if state.dicr & (0x7F << DICR_FLAG_SHIFT) == 0 {
                state.dicr &= !DICR_MASTER_FLAG;
            }
        }
        _ => {
            let index = (address / CHANNEL_STRIDE) as usize;
            let reg = address % CHANNEL_STRIDE;
            if index >= NUM_CHANNELS {
                return;
            }
            match reg {
                0x0 => state.channels[index].madr = l & 0x00FF_FFFF,
                0x4 => state.channels[index].bcr = l,
                0x8 => {
                    state.channels[index].chcr = l;
                    if l & CHCR_START != 0 && state.channel_enabled(index) {
                        run_channel(m, state, index);
                    }
                }
                _ => {}
            }
        }
    }
}

struct DmaPorts(Rc<RefCell<DmaState>>);

impl MemOps for DmaPorts {
    fn readl(&mut self, _m: &Machine, address: Address) -> Option<u32> {
        Some(dma_readl(&self.0.borrow(), address))
    }

    fn writel(&mut self, m: &Machine, l: u32, address: Address) -> bool {
        dma_writel(m, &mut self.0.borrow_mut(), l, address);
        true
    }
}

/// PSX DMA master controller
pub struct PsxDma {
    state: Rc<RefCell<DmaState>>,
    region: Option<RegionId>,
}

pub fn create() -> Box<dyn Controller> {
    Box::new(PsxDma {
        state: Rc::new(RefCell::new(DmaState::new())),
        region: None,
    })
}

impl Controller for PsxDma {
    fn init(&mut self, m: &Machine, instance: &ControllerInstance) -> Result<()> {
        self.state.borrow_mut().bus_id = instance.bus_id;
        self.state.borrow_mut().irq = Resource::find_irq(&instance.resources, "irq")?;

        let area = Resource::find_mem(&instance.resources, "mem")?.clone();
        self.region = Some(m.memory().region_add(Region::new(
            area,
            Rc::new(RefCell::new(DmaPorts(self.state.clone()))),
        )));

        Ok(())
    }

    fn reset(&mut self, _m: &Machine) {
        let mut state = self.state.borrow_mut();
        let (bus_id, irq) = (state.bus_id, state.irq);
        *state = DmaState::new();
        state.bus_id = bus_id;
        state.irq = irq;
    }

    fn deinit(&mut self, m: &Machine) {
        if let Some(id) = self.region.take() {
            m.memory().region_remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EmulatorConfig;
    use crate::core::controller::MachData;
    use crate::core::dma::DmaOps;
    use crate::core::memory::Ram;

    const BUS: BusId = 0;
    const BASE: Address = 0x1F80_1080;
    const DMA_IRQ: IrqLine = 3;

    struct WordSink {
        received: Vec<u32>,
    }

    impl DmaOps for WordSink {
        fn readl(&mut self, m: &Machine) -> Option<u32> {
            m.clock_consume(4);
            Some(0xCAFE_0000 + self.received.len() as u32)
        }
        fn writel(&mut self, m: &Machine, l: u32) -> bool {
            m.clock_consume(4);
            self.received.push(l);
            true
        }
    }

    fn setup() -> (Machine, PsxDma, Rc<RefCell<WordSink>>, Rc<RefCell<Vec<u8>>>) {
        let m = Machine::new(EmulatorConfig::default());
        m.memory().bus_add(BUS, 32);

        let ram = Ram::with_size(0x1000);
        let buffer = ram.buffer();
        m.memory().region_add(Region::new(
            Resource::mem("ram", BUS, 0x0000, 0x0FFF),
            Rc::new(RefCell::new(ram)),
        ));

        let sink = Rc::new(RefCell::new(WordSink { received: vec![] }));
        m.dma().add(4, sink.clone());

        let mut dma = PsxDma {
            state: Rc::new(RefCell::new(DmaState::new())),
            region: None,
        };
        let instance = ControllerInstance {
            controller_name: "psx_dma",
            bus_id: BUS,
            resources: vec![
                Resource::mem("mem", BUS, BASE, BASE + 0x7F),
                Resource::irq("irq", DMA_IRQ),
            ],
            mach_data: MachData::None,
        };
        dma.init(&m, &instance).unwrap();
        dma.reset(&m);

        // Enable channel 4 in DPCR (power-on state has all channels off)
        let dpcr = dma.state.borrow().dpcr | (1 << (4 * 4 + 3));
        m.memory_writel(BUS, dpcr, BASE + DPCR_OFFSET);

        (m, dma, sink, buffer)
    }

    fn channel4(reg: Address) -> Address {
        BASE + 4 * CHANNEL_STRIDE + reg
    }

    #[test]
    fn test_to_device_transfer_pushes_ram_words() {
        let (m, _dma, sink, buffer) = setup();
        for (i, b) in buffer.borrow_mut()[0x100..0x10C].iter_mut().enumerate() {
            *b = i as u8;
        }

        m.memory_writel(BUS, 0x100, channel4(0x0)); // MADR
        m.memory_writel(BUS, 3, channel4(0x4)); // BCR: 3 words
        m.memory_writel(BUS, CHCR_START | CHCR_FROM_RAM, channel4(0x8));

        let received = &sink.borrow().received;
        assert_eq!(received.len(), 3);
        assert_eq!(received[0], 0x0302_0100);
        // Busy bit cleared after completion
        assert_eq!(m.memory_readl(BUS, channel4(0x8)) & CHCR_START, 0);
    }

    #[test]
    fn test_from_device_transfer_fills_ram() {
        let (m, _dma, _sink, buffer) = setup();
        m.memory_writel(BUS, 0x200, channel4(0x0));
        m.memory_writel(BUS, 2, channel4(0x4));
        m.memory_writel(BUS, CHCR_START, channel4(0x8)); // to RAM

        let ram = buffer.borrow();
        assert_eq!(
            u32::from_le_bytes([ram[0x200], ram[0x201], ram[0x202], ram[0x203]]),
            0xCAFE_0000
        );
        assert_eq!(
            u32::from_le_bytes([ram[0x204], ram[0x205], ram[0x206], ram[0x207]]),
            0xCAFE_0001
        );
    }

    #[test]
    fn test_disabled_channel_does_not_start() {
        let (m, dma, sink, _buffer) = setup();
        // Clear the channel 4 enable bit in DPCR
        let dpcr = dma.state.borrow().dpcr & !(1 << (4 * 4 + 3));
        m.memory_writel(BUS, dpcr, BASE + DPCR_OFFSET);

        m.memory_writel(BUS, 2, channel4(0x4));
        m.memory_writel(BUS, CHCR_START | CHCR_FROM_RAM, channel4(0x8));
        assert!(sink.borrow().received.is_empty());
    }

    #[test]
    fn test_completion_interrupt_when_enabled() {
        let (m, _dma, _sink, _buffer) = setup();
        // DICR: master enable + channel 4 enable
        m.memory_writel(
            BUS,
            DICR_MASTER_ENABLE | (1 << (16 + 4)),
            BASE + DICR_OFFSET,
        );
        m.memory_writel(BUS, 1, channel4(0x4));
        m.memory_writel(BUS, CHCR_START | CHCR_FROM_RAM, channel4(0x8));

        assert_ne!(m.take_pending_irqs() & (1 << DMA_IRQ), 0);
        let dicr = m.memory_readl(BUS, BASE + DICR_OFFSET);
        assert_ne!(dicr & (1 << (DICR_FLAG_SHIFT + 4)), 0);
        assert_ne!(dicr & DICR_MASTER_FLAG, 0);

        // Write-1-to-clear acknowledges the flag
        m.memory_writel(
            BUS,
            DICR_MASTER_ENABLE | (1 << (16 + 4)) | (1 << (DICR_FLAG_SHIFT + 4)),
            BASE + DICR_OFFSET,
        );
        let dicr = m.memory_readl(BUS, BASE + DICR_OFFSET);
        assert_eq!(dicr & (1 << (DICR_FLAG_SHIFT + 4)), 0);
        assert_eq!(dicr & DICR_MASTER_FLAG, 0);
    }
}
