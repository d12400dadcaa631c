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

//! Port-mapped I/O fabric
//!
//! A flat 256-entry port space shared by every controller of the machine
//! (the Z80 machines and the PSX peripheral ports use it). Regions are
//! resolved like memory regions: most recent registration first, mirror
//! children folded modulo the parent size, and the operation receives the
//! port offset local to the region.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::machine::Machine;
use crate::core::resource::{Resource, ResourceKind};

const NUM_PORTS: usize = 256;

/// Operations a port region exposes
///
/// Defaults mean "not provided", letting the access fall through to an
/// older region on the same port.
pub trait PortOps {
    fn read(&mut self, m: &Machine, port: u8) -> Option<u8> {
        let _ = (m, port);
        None
    }

    fn write(&mut self, m: &Machine, b: u8, port: u8) -> bool {
        let _ = (m, b, port);
        false
    }
}

/// A registered port region
#[derive(Clone)]
pub struct PortRegion {
    pub area: Resource,
    pub ops: Rc<RefCell<dyn PortOps>>,
}

impl PortRegion {
    pub fn new(area: Resource, ops: Rc<RefCell<dyn PortOps>>) -> Self {
        Self { area, ops }
    }

    /// Fold an absolute port number into a region-local offset
    fn fold(&self, port: u8) -> Option<u8> {
        let ResourceKind::Port { start, end } = self.area.kind else {
            return None;
        };
        if (start..=end).contains(&port) {
            return Some(port - start);
        }

        let size = u16::from(end) - u16::from(start) + 1;
        for child in &self.area.children {
            let ResourceKind::Port {
                start: c_start,
                end: c_end,
            } = child.kind
            else {
                continue;
            };
            if (c_start..=c_end).contains(&port) {
                return Some(((u16::from(port) - u16::from(c_start)) % size) as u8);
            }
        }
        None
    }
}

/// Handle identifying a registered port region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRegionId(u64);

/// The port fabric
pub struct Ports {
    // One candidate list per port, newest registration first
    map: RefCell<Vec<Vec<(PortRegionId, PortRegion)>>>,
    next_id: std::cell::Cell<u64>,
    warned: RefCell<[bool; NUM_PORTS]>,
}

impl Ports {
    pub fn new() -> Self {
        Self {
            map: RefCell::new(vec![Vec::new(); NUM_PORTS]),
            next_id: std::cell::Cell::new(0),
            warned: RefCell::new([false; NUM_PORTS]),
        }
    }

    fn covered_ports(region: &PortRegion) -> Vec<u8> {
        let mut ports = Vec::new();
        let mut push_range = |kind: &ResourceKind| {
            if let ResourceKind::Port { start, end } = *kind {
                ports.extend(start..=end);
            }
        };
        push_range(&region.area.kind);
        for child in &region.area.children {
            push_range(&child.kind);
        }
        ports
    }

    /// Register a port region over its parent range and mirrors
    pub fn region_add(&self, region: PortRegion) -> PortRegionId {
        let id = PortRegionId(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);

        let mut map = self.map.borrow_mut();
        for port in Self::covered_ports(&region) {
            // Insert before others: it takes precedence on dispatch
            map[usize::from(port)].insert(0, (id, region.clone()));
        }
        id
    }

    /// Remove a region from every port it covers
    pub fn region_remove(&self, id: PortRegionId) {
        for list in self.map.borrow_mut().iter_mut() {
            list.retain(|(rid, _)| *rid != id);
        }
    }

    pub fn remove_all(&self) {
        for list in self.map.borrow_mut().iter_mut() {
            list.clear();
        }
        *self.warned.borrow_mut() = [false; NUM_PORTS];
    }

    fn warn_unmapped(&self, port: u8, what: &str) {
        let mut warned = self.warned.borrow_mut();
        if !warned[usize::from(port)] {
            warned[usize::from(port)] = true;
            log::warn!("port region not found ({what} {port:#04x})");
        }
    }

    pub fn read(&self, m: &Machine, port: u8) -> u8 {
        let candidates: Vec<PortRegion> = self.map.borrow()[usize::from(port)]
            .iter()
            .map(|(_, r)| r.clone())
            .collect();
        for region in candidates {
            let Some(offset) = region.fold(port) else {
                continue;
            };
            if let Some(b) = region.ops.borrow_mut().read(m, offset) {
                return b;
            }
        }
        self.warn_unmapped(port, "read");
        0
    }

    pub fn write(&self, m: &Machine, b: u8, port: u8) {
        let candidates: Vec<PortRegion> = self.map.borrow()[usize::from(port)]
            .iter()
            .map(|(_, r)| r.clone())
            .collect();
        for region in candidates {
            let Some(offset) = region.fold(port) else {
                continue;
            };
            if region.ops.borrow_mut().write(m, b, offset) {
                return;
            }
        }
        self.warn_unmapped(port, "write");
    }
}

impl Default for Ports {
    fn default() -> Self {
        Self::new()
    }
}
