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

//! NES sprite DMA ($4014)
//!
//! Writing a page number copies 256 bytes from CPU address `page << 8` to
//! the PPU OAM data port, stalling the writer for 512 cycles. The copy
//! happens inline through the bus fabric, so it observes whatever
//! regions are mapped (including mapper overlays).

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::controller::{Controller, ControllerInstance};
use crate::core::error::Result;
use crate::core::machine::Machine;
use crate::core::memory::{Address, BusId, MemOps, Region, RegionId};
use crate::core::resource::Resource;

/// PPU OAM data port on the CPU bus
const DEST_ADDRESS: Address = 0x2004;
const TRANSFER_SIZE: u32 = 256;
const TRANSFER_CYCLES: u32 = 512;

struct SpritePorts {
    bus_id: BusId,
}

impl MemOps for SpritePorts {
    fn writeb(&mut self, m: &Machine, b: u8, _address: Address) -> bool {
        // The written byte is the upper byte of the source address
        let src = Address::from(b) << 8;
        for i in 0..TRANSFER_SIZE {
            let byte = m.memory_readb(self.bus_id, src + i);
            m.memory_writeb(self.bus_id, byte, DEST_ADDRESS);
        }

        // The transfer halts the execution unit for 512 cycles
        m.clock_consume(TRANSFER_CYCLES);
        true
    }
}

/// NES sprite DMA controller
pub struct NesSprite {
    region: Option<RegionId>,
}

pub fn create() -> Box<dyn Controller> {
    Box::new(NesSprite { region: None })
}

impl Controller for NesSprite {
    fn init(&mut self, m: &Machine, instance: &ControllerInstance) -> Result<()> {
        let area = Resource::find_mem(&instance.resources, "mem")?.clone();
        self.region = Some(m.memory().region_add(Region::new(
            area,
            Rc::new(RefCell::new(SpritePorts {
                bus_id: instance.bus_id,
            })),
        )));
        Ok(())
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
    use crate::core::memory::Ram;

    const BUS: BusId = 0;

    struct OamSink {
        bytes: Vec<u8>,
    }

    impl MemOps for OamSink {
        fn writeb(&mut self, _m: &Machine, b: u8, _address: Address) -> bool {
            self.bytes.push(b);
            true
        }
    }

    #[test]
    fn test_page_copy_to_oam_port() {
        let m = Machine::new(EmulatorConfig::default());
        m.memory().bus_add(BUS, 16);

        // Source RAM with a recognizable pattern at page 3
        let ram = Ram::with_size(0x0800);
        for i in 0..256 {
            ram.0.borrow_mut()[0x0300 + i] = i as u8;
        }
        m.memory().region_add(Region::new(
            Resource::mem("ram", BUS, 0x0000, 0x07FF),
            Rc::new(RefCell::new(ram)),
        ));

        // OAM data port sink at $2004
        let sink = Rc::new(RefCell::new(OamSink { bytes: Vec::new() }));
        m.memory().region_add(Region::new(
            Resource::mem("oam", BUS, 0x2004, 0x2004),
            sink.clone(),
        ));

        let mut dma = NesSprite { region: None };
        let instance = ControllerInstance {
            controller_name: "nes_sprite",
            bus_id: BUS,
            resources: vec![Resource::mem("mem", BUS, 0x4014, 0x4014)],
            mach_data: MachData::None,
        };
        dma.init(&m, &instance).unwrap();

        m.memory_writeb(BUS, 0x03, 0x4014);

        let bytes = &sink.borrow().bytes;
        assert_eq!(bytes.len(), 256);
        for (i, &b) in bytes.iter().enumerate() {
            assert_eq!(b, i as u8);
        }
    }
}
