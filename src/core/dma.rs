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

//! DMA channel fabric
//!
//! Peripherals that stream whole words (SPU sound RAM, MDEC macroblock
//! data, CD-ROM sector data) register a [`DmaOps`] against a channel
//! number; the DMA master drives them one 32-bit long at a time. Every
//! transfer consumes scheduler cycles explicitly inside the ops, so DMA
//! time is accounted against the clock that initiated it.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::machine::Machine;

/// DMA channel number
pub type ChannelId = usize;

/// Long-word transfer operations of one DMA channel
pub trait DmaOps {
    fn readl(&mut self, m: &Machine) -> Option<u32> {
        let _ = m;
        None
    }

    fn writel(&mut self, m: &Machine, l: u32) -> bool {
        let _ = (m, l);
        false
    }
}

/// Handle identifying a registered channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaChannelRef(u64);

/// The DMA channel list
///
/// Ordered newest-first per channel number, mirroring region precedence.
pub struct DmaChannels {
    channels: RefCell<Vec<(DmaChannelRef, ChannelId, Rc<RefCell<dyn DmaOps>>)>>,
    next_id: std::cell::Cell<u64>,
}

impl DmaChannels {
    pub fn new() -> Self {
        Self {
            channels: RefCell::new(Vec::new()),
            next_id: std::cell::Cell::new(0),
        }
    }

    pub fn add(&self, channel: ChannelId, ops: Rc<RefCell<dyn DmaOps>>) -> DmaChannelRef {
        let id = DmaChannelRef(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        self.channels.borrow_mut().insert(0, (id, channel, ops));
        id
    }

    pub fn remove(&self, id: DmaChannelRef) {
        self.channels.borrow_mut().retain(|(rid, _, _)| *rid != id);
    }

    pub fn remove_all(&self) {
        self.channels.borrow_mut().clear();
    }

    fn find(&self, channel: ChannelId) -> Option<Rc<RefCell<dyn DmaOps>>> {
        self.channels
            .borrow()
            .iter()
            .find(|(_, ch, _)| *ch == channel)
            .map(|(_, _, ops)| ops.clone())
    }

    /// Read one long from a channel (0 when the channel is absent)
    pub fn readl(&self, m: &Machine, channel: ChannelId) -> u32 {
        match self.find(channel) {
            Some(ops) => ops.borrow_mut().readl(m).unwrap_or(0),
            None => {
                log::warn!("DMA read on unmapped channel {channel}");
                0
            }
        }
    }

    /// Write one long to a channel (dropped when the channel is absent)
    pub fn writel(&self, m: &Machine, channel: ChannelId, l: u32) {
        match self.find(channel) {
            Some(ops) => {
                ops.borrow_mut().writel(m, l);
            }
            None => log::warn!("DMA write on unmapped channel {channel}"),
        }
    }
}

impl Default for DmaChannels {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EmulatorConfig;

    struct Sink {
        received: Vec<u32>,
    }

    impl DmaOps for Sink {
        fn readl(&mut self, m: &Machine) -> Option<u32> {
            m.clock_consume(4);
            Some(self.received.len() as u32)
        }
        fn writel(&mut self, m: &Machine, l: u32) -> bool {
            m.clock_consume(4);
            self.received.push(l);
            true
        }
    }

    #[test]
    fn test_channel_round_trip() {
        let m = Machine::new(EmulatorConfig::default());
        let sink = Rc::new(RefCell::new(Sink { received: vec![] }));
        m.dma().add(4, sink.clone());

        m.dma_writel(4, 0x1234_5678);
        m.dma_writel(4, 0x9ABC_DEF0);
        assert_eq!(sink.borrow().received, vec![0x1234_5678, 0x9ABC_DEF0]);
        assert_eq!(m.dma_readl(4), 2);
    }

    #[test]
    fn test_unmapped_channel() {
        let m = Machine::new(EmulatorConfig::default());
        assert_eq!(m.dma_readl(7), 0);
        m.dma_writel(7, 0xFFFF_FFFF);
    }

    #[test]
    fn test_channel_removal() {
        let m = Machine::new(EmulatorConfig::default());
        let sink = Rc::new(RefCell::new(Sink { received: vec![] }));
        let id = m.dma().add(0, sink);
        m.dma().remove(id);
        assert_eq!(m.dma_readl(0), 0);
    }
}
