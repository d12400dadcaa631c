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

//! ROM-only Game Boy cart
//!
//! No banking hardware: the second 16 KB bank is mapped read-only into
//! the switchable window and that is all.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::controller::{Controller, ControllerInstance, MachData};
use crate::core::error::{EmulatorError, Result};
use crate::core::file::PathKind;
use crate::core::machine::Machine;
use crate::core::memory::{Region, RegionId, Rom};
use crate::core::resource::Resource;

use super::GB_ROM_BANK_SIZE;

/// ROM-only cart controller
pub struct GbRom {
    region: Option<RegionId>,
}

pub fn create() -> Box<dyn Controller> {
    Box::new(GbRom { region: None })
}

impl Controller for GbRom {
    fn init(&mut self, m: &Machine, instance: &ControllerInstance) -> Result<()> {
        let MachData::CartPath(path) = &instance.mach_data else {
            return Err(EmulatorError::Config("ROM cart needs a cart path".into()));
        };

        let rom1 = m.files().map(
            PathKind::Data,
            path,
            GB_ROM_BANK_SIZE as u64,
            GB_ROM_BANK_SIZE,
        )?;

        let area = Resource::find_mem(&instance.resources, "rom1")?.clone();
        self.region = Some(
            m.memory()
                .region_add(Region::new(area, Rc::new(RefCell::new(Rom::new(rom1))))),
        );
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
    use super::super::test_support::gb_image;
    use super::*;
    use crate::core::config::EmulatorConfig;
    use crate::core::memory::BusId;

    const BUS: BusId = 0;

    #[test]
    fn test_rom1_mapped_read_only() {
        let file = gb_image(0x00, 2, 0);
        let m = Machine::new(EmulatorConfig::default());
        m.memory().bus_add(BUS, 16);

        let mut rom = GbRom { region: None };
        let instance = ControllerInstance {
            controller_name: "rom",
            bus_id: BUS,
            resources: vec![Resource::mem("rom1", BUS, 0x4000, 0x7FFF)],
            mach_data: MachData::CartPath(file.path().to_path_buf()),
        };
        rom.init(&m, &instance).unwrap();

        // Bank 1 content, writes dropped
        assert_eq!(m.memory_readb(BUS, 0x4000), 1);
        m.memory_writeb(BUS, 0xFF, 0x4000);
        assert_eq!(m.memory_readb(BUS, 0x4000), 1);
    }
}
