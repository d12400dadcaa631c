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

//! SMS mappers
//!
//! The slot-control mapper owns port 0x3E: each write may add or remove
//! the BIOS and cart regions from the bus, the live demonstration of
//! overlay precedence in the fabric. The Sega paging mapper behind it
//! serves the cart region through three 16 KB page registers at
//! $FFFD-$FFFF, with the first kilobyte hardwired to page 0.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::controller::{Controller, ControllerInstance, MachData};
use crate::core::error::{EmulatorError, Result};
use crate::core::file::PathKind;
use crate::core::machine::Machine;
use crate::core::memory::{Address, MemOps, Region, RegionId, Rom};
use crate::core::port::{PortOps, PortRegion, PortRegionId};
use crate::core::resource::Resource;

const BIOS_SIZE: usize = 0x2000;
const BANK_SIZE: usize = 0x4000;
const NUM_BANKS: usize = 3;
const PAGE_OFFSET: Address = 0x0400;

// Slot control bits (1 = disabled)
const SLOT_BIOS_DISABLE: u8 = 0x08;
const SLOT_CART_DISABLE: u8 = 0x40;

// ----------------------------------------------------------------------
// Sega paging mapper

struct SegaState {
    rom: Vec<u8>,
    rom_banks: [u8; NUM_BANKS],
}

struct SegaRomPorts(Rc<RefCell<SegaState>>);

impl MemOps for SegaRomPorts {
    fn readb(&mut self, _m: &Machine, address: Address) -> Option<u8> {
        let state = self.0.borrow();
        if state.rom.is_empty() {
            return Some(0xFF);
        }
        let slot = (address as usize / BANK_SIZE).min(NUM_BANKS - 1);
        // The first page cannot be swapped out
        let offset = if address >= PAGE_OFFSET {
            i64::from(address)
                + (i64::from(state.rom_banks[slot]) - slot as i64) * BANK_SIZE as i64
        } else {
            i64::from(address)
        };
        let len = state.rom.len().max(1) as i64;
        Some(state.rom[offset.rem_euclid(len) as usize])
    }
}

struct RomSelPorts(Rc<RefCell<SegaState>>);

impl MemOps for RomSelPorts {
    fn writeb(&mut self, _m: &Machine, b: u8, address: Address) -> bool {
        let mut state = self.0.borrow_mut();
        // Mask by the number of banks present
        let num_banks = (state.rom.len() / BANK_SIZE).max(1) as u8;
        let bank = b & num_banks.wrapping_sub(1);
        if let Some(slot) = state.rom_banks.get_mut(address as usize) {
            *slot = bank;
        }
        true
    }
}

/// Sega paging mapper controller
pub struct SegaMapper {
    state: Option<Rc<RefCell<SegaState>>>,
    rom_sel_region: Option<RegionId>,
}

pub fn create_sega_mapper() -> Box<dyn Controller> {
    Box::new(SegaMapper {
        state: None,
        rom_sel_region: None,
    })
}

impl Controller for SegaMapper {
    fn init(&mut self, m: &Machine, instance: &ControllerInstance) -> Result<()> {
        let MachData::SegaCart { cart_path, slot } = &instance.mach_data else {
            return Err(EmulatorError::Config(
                "Sega mapper needs cart data and a region slot".into(),
            ));
        };

        let size = m.files().size(PathKind::Data, cart_path)? as usize;
        let rom = m.files().map(PathKind::Data, cart_path, 0, size)?;

        let state = Rc::new(RefCell::new(SegaState {
            rom,
            rom_banks: [0, 1, 2],
        }));
        self.state = Some(state.clone());

        // Hand the cart region to the enclosing slot-control mapper; it
        // decides when the region joins the bus.
        let mapper_area = Resource::find_mem(&instance.resources, "mapper")?.clone();
        *slot.borrow_mut() = Some(Region::new(
            Resource::mem(
                "cart",
                instance.bus_id,
                match mapper_area.kind {
                    crate::core::resource::ResourceKind::Mem { start, .. } => start,
                    _ => 0,
                },
                0xBFFF,
            ),
            Rc::new(RefCell::new(SegaRomPorts(state.clone()))),
        ));

        // Page registers live at the very top of the address space
        self.rom_sel_region = Some(m.memory().region_add(Region::new(
            Resource::mem("rom_sel", instance.bus_id, 0xFFFD, 0xFFFF),
            Rc::new(RefCell::new(RomSelPorts(state))),
        )));

        Ok(())
    }

    fn reset(&mut self, _m: &Machine) {
        if let Some(state) = &self.state {
            state.borrow_mut().rom_banks = [0, 1, 2];
        }
    }

    fn deinit(&mut self, m: &Machine) {
        if let Some(id) = self.rom_sel_region.take() {
            m.memory().region_remove(id);
        }
    }
}

// ----------------------------------------------------------------------
// Slot-control mapper

struct SlotState {
    slot_control: u8,
    bios_region: Option<Region>,
    bios_region_id: Option<RegionId>,
    cart_slot: Rc<RefCell<Option<Region>>>,
    cart_region_id: Option<RegionId>,
}

struct SlotCtrlPorts(Rc<RefCell<SlotState>>);

impl PortOps for SlotCtrlPorts {
    fn write(&mut self, m: &Machine, b: u8, _port: u8) -> bool {
        let mut state = self.0.borrow_mut();
        let prev = state.slot_control;
        state.slot_control = b;

        // BIOS region add/remove on the disable-bit edges
        let bios_was_on = prev & SLOT_BIOS_DISABLE == 0;
        let bios_on = b & SLOT_BIOS_DISABLE == 0;
        if !bios_was_on && bios_on {
            if let Some(region) = state.bios_region.clone() {
                state.bios_region_id = Some(m.memory().region_add(region));
            }
        } else if bios_was_on && !bios_on {
            if let Some(id) = state.bios_region_id.take() {
                m.memory().region_remove(id);
            }
        }

        // Cart region add/remove
        let cart_was_on = prev & SLOT_CART_DISABLE == 0;
        let cart_on = b & SLOT_CART_DISABLE == 0;
        if !cart_was_on && cart_on {
            let region = state.cart_slot.borrow().clone();
            if let Some(region) = region {
                state.cart_region_id = Some(m.memory().region_add(region));
            }
        } else if cart_was_on && !cart_on {
            if let Some(id) = state.cart_region_id.take() {
                m.memory().region_remove(id);
            }
        }

        true
    }
}

/// SMS slot-control mapper controller
pub struct SmsMapper {
    state: Option<Rc<RefCell<SlotState>>>,
    port_region: Option<PortRegionId>,
}

pub fn create_slot_mapper() -> Box<dyn Controller> {
    Box::new(SmsMapper {
        state: None,
        port_region: None,
    })
}

impl Controller for SmsMapper {
    fn init(&mut self, m: &Machine, instance: &ControllerInstance) -> Result<()> {
        let MachData::SmsCart {
            cart_path,
            bios_path,
        } = &instance.mach_data
        else {
            return Err(EmulatorError::Config("SMS mapper needs cart data".into()));
        };

        // BIOS region prepared but not mapped; reset decides
        let mapper_area = Resource::find_mem(&instance.resources, "mapper")?.clone();
        let bios_region = match bios_path {
            Some(path) => {
                let bios = m.files().map(PathKind::System, path, 0, BIOS_SIZE)?;
                let start = match mapper_area.kind {
                    crate::core::resource::ResourceKind::Mem { start, .. } => start,
                    _ => 0,
                };
                Some(Region::new(
                    Resource::mem("bios", instance.bus_id, start, start + BIOS_SIZE as Address - 1),
                    Rc::new(RefCell::new(Rom::new(bios))),
                ))
            }
            None => None,
        };

        let cart_slot = Rc::new(RefCell::new(None));
        let state = Rc::new(RefCell::new(SlotState {
            slot_control: 0xFF,
            bios_region,
            bios_region_id: None,
            cart_slot: cart_slot.clone(),
            cart_region_id: None,
        }));
        self.state = Some(state.clone());

        let port_area = Resource::find_port(&instance.resources, "port")?.clone();
        self.port_region = Some(
            m.ports()
                .region_add(PortRegion::new(port_area, Rc::new(RefCell::new(SlotCtrlPorts(state))))),
        );

        // Spawn the actual paging mapper
        m.controller_add(
            ControllerInstance::new("sega_mapper")
                .with_bus(instance.bus_id)
                .with_resources(instance.resources.clone())
                .with_mach_data(MachData::SegaCart {
                    cart_path: cart_path.clone(),
                    slot: cart_slot,
                }),
        )?;

        Ok(())
    }

    fn reset(&mut self, m: &Machine) {
        let Some(state) = &self.state else {
            return;
        };
        let mut state = state.borrow_mut();

        // Drop whatever was mapped
        if let Some(id) = state.bios_region_id.take() {
            m.memory().region_remove(id);
        }
        if let Some(id) = state.cart_region_id.take() {
            m.memory().region_remove(id);
        }

        // Everything disabled, then enable the boot medium: BIOS when
        // present, the cart otherwise.
        state.slot_control = 0xFF;
        if let Some(region) = state.bios_region.clone() {
            state.slot_control &= !SLOT_BIOS_DISABLE;
            state.bios_region_id = Some(m.memory().region_add(region));
        } else {
            let region = state.cart_slot.borrow().clone();
            if let Some(region) = region {
                state.slot_control &= !SLOT_CART_DISABLE;
                state.cart_region_id = Some(m.memory().region_add(region));
            }
        }
    }

    fn deinit(&mut self, m: &Machine) {
        if let Some(state) = &self.state {
            let mut state = state.borrow_mut();
            if let Some(id) = state.bios_region_id.take() {
                m.memory().region_remove(id);
            }
            if let Some(id) = state.cart_region_id.take() {
                m.memory().region_remove(id);
            }
        }
        if let Some(id) = self.port_region.take() {
            m.ports().region_remove(id);
        }
    }
}
