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

//! Controller framework
//!
//! Every peripheral is a [`Controller`] with four hooks: `init`, `reset`,
//! tick (implicit through the clocks it registers) and `deinit`. `init`
//! receives a [`ControllerInstance`] carrying the bus id, the resource
//! vector and opaque machine data; it resolves the resources it needs,
//! registers regions/ports/clocks/DMA channels and remembers the IRQ
//! lines it will raise. `reset` re-initializes state without
//! re-registration. `deinit` reverses every registration; it is also the
//! save point for battery-backed cart RAM.
//!
//! Concrete controllers are found through a compile-time table of
//! `(name, factory)` pairs walked at instantiation time.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use crate::core::error::Result;
use crate::core::machine::Machine;
use crate::core::memory::{BusId, Region};
use crate::core::resource::Resource;

/// Opaque machine data handed from a machine description to a controller
///
/// The original design passed an untyped pointer here; the variants below
/// are the payloads the bundled machines actually exchange (documented
/// sharing, e.g. the NES mapper borrowing the PPU nametable VRAM).
#[derive(Clone, Default)]
pub enum MachData {
    #[default]
    None,
    /// Path of the cart image
    CartPath(PathBuf),
    /// NES cart image plus the console-owned nametable VRAM the mapper
    /// mirrors
    NesCart {
        path: PathBuf,
        vram: Rc<RefCell<Vec<u8>>>,
    },
    /// SMS cart and BIOS images
    SmsCart {
        cart_path: PathBuf,
        bios_path: Option<PathBuf>,
    },
    /// Sega paging mapper: cart image plus the slot the enclosing
    /// slot-control mapper toggles on the bus
    SegaCart {
        cart_path: PathBuf,
        slot: Rc<RefCell<Option<Region>>>,
    },
}

/// Instantiation record for one controller
#[derive(Clone)]
pub struct ControllerInstance {
    pub controller_name: &'static str,
    pub bus_id: BusId,
    pub resources: Vec<Resource>,
    pub mach_data: MachData,
}

impl ControllerInstance {
    pub fn new(controller_name: &'static str) -> Self {
        Self {
            controller_name,
            bus_id: 0,
            resources: Vec::new(),
            mach_data: MachData::None,
        }
    }

    pub fn with_bus(mut self, bus_id: BusId) -> Self {
        self.bus_id = bus_id;
        self
    }

    pub fn with_resources(mut self, resources: Vec<Resource>) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_mach_data(mut self, mach_data: MachData) -> Self {
        self.mach_data = mach_data;
        self
    }
}

/// Lifecycle hooks every peripheral implements
pub trait Controller {
    /// Bind resources and register regions, clocks and channels
    fn init(&mut self, m: &Machine, instance: &ControllerInstance) -> Result<()>;

    /// Re-initialize internal state; never re-registers anything
    fn reset(&mut self, m: &Machine) {
        let _ = m;
    }

    /// Reverse every registration made in `init`
    fn deinit(&mut self, m: &Machine) {
        let _ = m;
    }
}

/// Registry entry: controller name and factory
pub struct ControllerEntry {
    pub name: &'static str,
    pub create: fn() -> Box<dyn Controller>,
}

/// The compile-time controller registry
pub fn controller_list() -> &'static [ControllerEntry] {
    &[
        ControllerEntry {
            name: "apu",
            create: crate::core::audio::apu::create,
        },
        ControllerEntry {
            name: "papu",
            create: crate::core::audio::papu::create,
        },
        ControllerEntry {
            name: "sn76489",
            create: crate::core::audio::sn76489::create,
        },
        ControllerEntry {
            name: "spu",
            create: crate::core::audio::spu::create,
        },
        ControllerEntry {
            name: "ppu",
            create: crate::core::video::ppu::create,
        },
        ControllerEntry {
            name: "lcdc",
            create: crate::core::video::lcdc::create,
        },
        ControllerEntry {
            name: "vdp",
            create: crate::core::video::vdp::create,
        },
        ControllerEntry {
            name: "gpu",
            create: crate::core::video::gpu::create,
        },
        ControllerEntry {
            name: "mdec",
            create: crate::core::media::mdec::create,
        },
        ControllerEntry {
            name: "psx_cdrom",
            create: crate::core::cdrom::create,
        },
        ControllerEntry {
            name: "psx_dma",
            create: crate::core::dma_units::psx::create,
        },
        ControllerEntry {
            name: "nes_sprite",
            create: crate::core::dma_units::nes_sprite::create,
        },
        ControllerEntry {
            name: "gb_timer",
            create: crate::core::timer::gb::create,
        },
        ControllerEntry {
            name: "psx_timer",
            create: crate::core::timer::psx::create,
        },
        ControllerEntry {
            name: "nes_mapper",
            create: crate::core::mapper::create_nes_mapper,
        },
        ControllerEntry {
            name: "nrom",
            create: crate::core::mapper::nrom::create,
        },
        ControllerEntry {
            name: "mmc1",
            create: crate::core::mapper::mmc1::create,
        },
        ControllerEntry {
            name: "mmc3",
            create: crate::core::mapper::mmc3::create,
        },
        ControllerEntry {
            name: "gb_mapper",
            create: crate::core::mapper::create_gb_mapper,
        },
        ControllerEntry {
            name: "rom",
            create: crate::core::mapper::rom::create,
        },
        ControllerEntry {
            name: "mbc1",
            create: crate::core::mapper::mbc1::create,
        },
        ControllerEntry {
            name: "mbc2",
            create: crate::core::mapper::mbc2::create,
        },
        ControllerEntry {
            name: "sms_mapper",
            create: crate::core::mapper::sms::create_slot_mapper,
        },
        ControllerEntry {
            name: "sega_mapper",
            create: crate::core::mapper::sms::create_sega_mapper,
        },
        ControllerEntry {
            name: "nes_controller",
            create: crate::core::joypad::nes::create,
        },
        ControllerEntry {
            name: "gb_joypad",
            create: crate::core::joypad::gb::create,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_no_duplicate_names() {
        let list = controller_list();
        for (i, entry) in list.iter().enumerate() {
            for other in &list[i + 1..] {
                assert_ne!(entry.name, other.name);
            }
        }
    }

    #[test]
    fn test_registry_contains_core_peripherals() {
        let names: Vec<&str> = controller_list().iter().map(|e| e.name).collect();
        for expected in ["apu", "ppu", "spu", "psx_cdrom", "mmc1", "mmc3", "lcdc"] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn test_instance_builder() {
        let instance = ControllerInstance::new("apu")
            .with_bus(1)
            .with_resources(vec![Resource::clk("clk", 100)]);
        assert_eq!(instance.controller_name, "apu");
        assert_eq!(instance.bus_id, 1);
        assert_eq!(instance.resources.len(), 1);
    }
}
