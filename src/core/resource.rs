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

//! Resource model
//!
//! A [`Resource`] is a typed binding record handed to a controller or CPU
//! through its instance: an address range on a named bus, an I/O port
//! range, an interrupt line, a clock rate or a DMA channel. Memory and
//! port resources may carry *children*: mirror ranges that alias the
//! parent modulo its size.
//!
//! Machine descriptions build resource vectors; controllers resolve the
//! entries they need by name and type during `init`.

use crate::core::cpu::IrqLine;
use crate::core::dma::ChannelId;
use crate::core::error::{EmulatorError, Result};
use crate::core::memory::{Address, BusId};

/// Typed payload of a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    /// Address range on a named bus
    Mem {
        bus_id: BusId,
        start: Address,
        end: Address,
    },
    /// Byte-indexed I/O port range (shared namespace across controllers)
    Port { start: u8, end: u8 },
    /// Interrupt line number
    Irq(IrqLine),
    /// Nominal clock frequency in Hz
    Clk(u64),
    /// DMA channel number
    Dma(ChannelId),
}

/// A named, typed binding record
///
/// `children` holds mirror ranges for `Mem` and `Port` resources. The
/// fabric folds an address that hits a mirror back into the parent range
/// modulo the parent size, so a mirror's size must divide the parent's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub name: &'static str,
    pub kind: ResourceKind,
    pub children: Vec<Resource>,
}

impl Resource {
    /// Memory range resource
    pub fn mem(name: &'static str, bus_id: BusId, start: Address, end: Address) -> Self {
        Self {
            name,
            kind: ResourceKind::Mem { bus_id, start, end },
            children: Vec::new(),
        }
    }

    /// Memory range resource with mirror children
    pub fn mem_mirrored(
        name: &'static str,
        bus_id: BusId,
        start: Address,
        end: Address,
        children: Vec<Resource>,
    ) -> Self {
        Self {
            name,
            kind: ResourceKind::Mem { bus_id, start, end },
            children,
        }
    }

    /// I/O port range resource
    pub fn port(name: &'static str, start: u8, end: u8) -> Self {
        Self {
            name,
            kind: ResourceKind::Port { start, end },
            children: Vec::new(),
        }
    }

    /// I/O port range resource with mirror children
    pub fn port_mirrored(name: &'static str, start: u8, end: u8, children: Vec<Resource>) -> Self {
        Self {
            name,
            kind: ResourceKind::Port { start, end },
            children,
        }
    }

    /// Interrupt line resource
    pub fn irq(name: &'static str, line: IrqLine) -> Self {
        Self {
            name,
            kind: ResourceKind::Irq(line),
            children: Vec::new(),
        }
    }

    /// Clock rate resource
    pub fn clk(name: &'static str, rate: u64) -> Self {
        Self {
            name,
            kind: ResourceKind::Clk(rate),
            children: Vec::new(),
        }
    }

    /// DMA channel resource
    pub fn dma(name: &'static str, channel: ChannelId) -> Self {
        Self {
            name,
            kind: ResourceKind::Dma(channel),
            children: Vec::new(),
        }
    }

    /// Size of a memory or port range (`end - start + 1`)
    pub fn size(&self) -> Address {
        match self.kind {
            ResourceKind::Mem { start, end, .. } => end - start + 1,
            ResourceKind::Port { start, end } => Address::from(end) - Address::from(start) + 1,
            _ => 0,
        }
    }

    /// Find a memory resource by name
    pub fn find_mem<'a>(resources: &'a [Resource], name: &str) -> Result<&'a Resource> {
        resources
            .iter()
            .find(|r| r.name == name && matches!(r.kind, ResourceKind::Mem { .. }))
            .ok_or_else(|| EmulatorError::Resource(name.to_string()))
    }

    /// Find a port resource by name
    pub fn find_port<'a>(resources: &'a [Resource], name: &str) -> Result<&'a Resource> {
        resources
            .iter()
            .find(|r| r.name == name && matches!(r.kind, ResourceKind::Port { .. }))
            .ok_or_else(|| EmulatorError::Resource(name.to_string()))
    }

    /// Find an IRQ resource by name and return its line number
    pub fn find_irq(resources: &[Resource], name: &str) -> Result<IrqLine> {
        resources
            .iter()
            .find_map(|r| match (r.name == name, &r.kind) {
                (true, ResourceKind::Irq(line)) => Some(*line),
                _ => None,
            })
            .ok_or_else(|| EmulatorError::Resource(name.to_string()))
    }

    /// Find a clock resource by name and return its rate in Hz
    pub fn find_clk(resources: &[Resource], name: &str) -> Result<u64> {
        resources
            .iter()
            .find_map(|r| match (r.name == name, &r.kind) {
                (true, ResourceKind::Clk(rate)) => Some(*rate),
                _ => None,
            })
            .ok_or_else(|| EmulatorError::Resource(name.to_string()))
    }

    /// Find a DMA resource by name and return its channel number
    pub fn find_dma(resources: &[Resource], name: &str) -> Result<ChannelId> {
        resources
            .iter()
            .find_map(|r| match (r.name == name, &r.kind) {
                (true, ResourceKind::Dma(channel)) => Some(*channel),
                _ => None,
            })
            .ok_or_else(|| EmulatorError::Resource(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_resources() -> Vec<Resource> {
        vec![
            Resource::mem("mem", 0, 0x2000, 0x2007),
            Resource::clk("clk", 5_369_318),
            Resource::irq("irq", 1),
            Resource::dma("dma", 4),
            Resource::port("port", 0xBE, 0xBF),
        ]
    }

    #[test]
    fn test_find_mem() {
        let resources = sample_resources();
        let res = Resource::find_mem(&resources, "mem").unwrap();
        assert_eq!(res.size(), 8);
    }

    #[test]
    fn test_find_clk() {
        let resources = sample_resources();
        assert_eq!(Resource::find_clk(&resources, "clk").unwrap(), 5_369_318);
    }

    #[test]
    fn test_find_irq() {
        let resources = sample_resources();
        assert_eq!(Resource::find_irq(&resources, "irq").unwrap(), 1);
    }

    #[test]
    fn test_find_dma() {
        let resources = sample_resources();
        assert_eq!(Resource::find_dma(&resources, "dma").unwrap(), 4);
    }

    #[test]
    fn test_find_port() {
        let resources = sample_resources();
        let res = Resource::find_port(&resources, "port").unwrap();
        assert_eq!(res.size(), 2);
    }

    #[test]
    fn test_lookup_is_typed() {
        // A name lookup must not match a resource of the wrong type.
        let resources = vec![Resource::clk("mem", 100)];
        assert!(Resource::find_mem(&resources, "mem").is_err());
    }

    #[test]
    fn test_missing_resource_error() {
        let resources = sample_resources();
        let err = Resource::find_clk(&resources, "seq_clk").unwrap_err();
        assert!(matches!(err, EmulatorError::Resource(_)));
    }

    #[test]
    fn test_mirrored_mem_size() {
        let mirror = Resource::mem("echo", 0, 0xE000, 0xFFFF);
        let parent = Resource::mem_mirrored("ram", 0, 0xC000, 0xDFFF, vec![mirror]);
        assert_eq!(parent.size(), 0x2000);
        assert_eq!(parent.children[0].size(), 0x2000);
    }
}
