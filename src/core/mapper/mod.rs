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

//! Cart mappers
//!
//! The `nes_mapper` and `gb_mapper` controllers parse the cart header,
//! pick the concrete mapper by its number/type and spawn it as another
//! controller with the same resources: the abstract cart contract every
//! mapper variant plugs into. Battery-backed external RAM is loaded at
//! mapper init and written back at deinit (the save point), to a `.sav`
//! file next to the cart image.

pub mod mbc1;
pub mod mbc2;
pub mod mmc1;
pub mod mmc3;
pub mod nrom;
pub mod rom;
pub mod sms;

use std::path::{Path, PathBuf};

use crate::core::controller::{Controller, ControllerInstance, MachData};
use crate::core::error::{EmulatorError, Result};
use crate::core::file::PathKind;
use crate::core::machine::Machine;

/// iNES cart header
#[derive(Debug, Clone)]
pub struct InesHeader {
    pub prg_rom_size: u8,
    pub chr_rom_size: u8,
    pub flags6: u8,
    pub flags7: u8,
    pub prg_ram_size: u8,
}

pub const INES_HEADER_SIZE: usize = 16;
const INES_MAGIC: [u8; 4] = [b'N', b'E', b'S', 0x1A];

impl InesHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < INES_HEADER_SIZE || data[0..4] != INES_MAGIC {
            return Err(EmulatorError::MalformedImage(
                "cart header does not have valid iNES format".into(),
            ));
        }
        Ok(Self {
            prg_rom_size: data[4],
            chr_rom_size: data[5],
            flags6: data[6],
            flags7: data[7],
            prg_ram_size: data[8],
        })
    }

    pub fn mapper_number(&self) -> u8 {
        (self.flags6 >> 4) | (self.flags7 & 0xF0)
    }

    pub fn prg_rom_bytes(&self) -> usize {
        usize::from(self.prg_rom_size) * 16 * 1024
    }

    pub fn chr_rom_bytes(&self) -> usize {
        usize::from(self.chr_rom_size) * 8 * 1024
    }

    pub fn prg_ram_bytes(&self) -> usize {
        usize::from(self.prg_ram_size).max(1) * 8 * 1024
    }

    pub fn prg_rom_offset(&self) -> u64 {
        INES_HEADER_SIZE as u64
    }

    pub fn chr_rom_offset(&self) -> u64 {
        self.prg_rom_offset() + self.prg_rom_bytes() as u64
    }

    /// Hardwired nametable arrangement (flag 6 bit 0: 1 = vertical)
    pub fn vertical_mirroring(&self) -> bool {
        self.flags6 & 0x01 != 0
    }

    /// Battery-backed PRG RAM present (flag 6 bit 1)
    pub fn battery(&self) -> bool {
        self.flags6 & 0x02 != 0
    }
}

/// Game Boy cart header (at offset 0x100 of the image)
#[derive(Debug, Clone)]
pub struct GbHeader {
    pub title: String,
    pub cartridge_type: u8,
    pub rom_size_code: u8,
    pub ram_size_code: u8,
}

pub const GB_HEADER_START: u64 = 0x100;
pub const GB_HEADER_SIZE: usize = 0x50;
pub const GB_ROM_BANK_SIZE: usize = 16 * 1024;
pub const GB_RAM_BANK_SIZE: usize = 8 * 1024;

impl GbHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < GB_HEADER_SIZE {
            return Err(EmulatorError::MalformedImage(
                "cart image too small for a Game Boy header".into(),
            ));
        }
        // Offsets relative to 0x100: title 0x34, type 0x47, sizes 0x48/0x49
        let title = data[0x34..0x3F]
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| char::from(b))
            .collect();
        Ok(Self {
            title,
            cartridge_type: data[0x47],
            rom_size_code: data[0x48],
            ram_size_code: data[0x49],
        })
    }

    pub fn rom_bytes(&self) -> usize {
        (32 * 1024) << self.rom_size_code.min(8)
    }

    pub fn ram_bytes(&self) -> usize {
        match self.ram_size_code {
            1 => 2 * 1024,
            2 => 8 * 1024,
            3 => 32 * 1024,
            4 => 128 * 1024,
            5 => 64 * 1024,
            _ => 0,
        }
    }

    /// Cart types that carry a battery behind their external RAM
    pub fn battery(&self) -> bool {
        matches!(self.cartridge_type, 0x03 | 0x06 | 0x09 | 0x0F | 0x10 | 0x13)
    }
}

/// Battery save path: the cart image with a `.sav` extension
pub fn save_path(cart_path: &Path) -> PathBuf {
    cart_path.with_extension("sav")
}

/// Load a battery RAM image when one exists
pub fn load_battery(m: &Machine, cart_path: &Path, ram: &mut [u8]) {
    let path = save_path(cart_path);
    match m.files().map(PathKind::Data, &path, 0, ram.len()) {
        Ok(data) => {
            ram[..data.len()].copy_from_slice(&data);
            log::info!("battery RAM loaded from \"{}\"", path.display());
        }
        Err(_) => log::debug!("no battery RAM image at \"{}\"", path.display()),
    }
}

/// Persist a battery RAM image (called from mapper deinit)
pub fn store_battery(m: &Machine, cart_path: &Path, ram: &[u8]) {
    let path = save_path(cart_path);
    match m.files().write_back(PathKind::Data, &path, 0, ram) {
        Ok(()) => log::info!("battery RAM saved to \"{}\"", path.display()),
        Err(e) => log::warn!("could not save battery RAM: {e}"),
    }
}

// ----------------------------------------------------------------------
// Dispatchers

/// NES mapper numbers with an implementation
fn nes_mapper_name(number: u8) -> Option<&'static str> {
    match number {
        0 => Some("nrom"),
        1 => Some("mmc1"),
        4 => Some("mmc3"),
        _ => None,
    }
}

/// GB cartridge types with an implementation
fn gb_mapper_name(cartridge_type: u8) -> Option<&'static str> {
    match cartridge_type {
        0x00 => Some("rom"),
        0x01..=0x03 => Some("mbc1"),
        0x05 | 0x06 => Some("mbc2"),
        _ => None,
    }
}

/// Dispatcher spawning the concrete NES mapper from the cart header
pub struct NesMapper;

pub fn create_nes_mapper() -> Box<dyn Controller> {
    Box::new(NesMapper)
}

impl Controller for NesMapper {
    fn init(&mut self, m: &Machine, instance: &ControllerInstance) -> Result<()> {
        let MachData::NesCart { path, .. } = &instance.mach_data else {
            return Err(EmulatorError::Config("NES mapper needs cart data".into()));
        };

        let header_data = m
            .files()
            .map(PathKind::Data, path, 0, INES_HEADER_SIZE)?;
        let header = InesHeader::parse(&header_data)?;

        log::info!("PRG ROM size: {}", header.prg_rom_size);
        log::info!("CHR ROM size: {}", header.chr_rom_size);
        log::info!("PRG RAM size: {}", header.prg_ram_size);

        let number = header.mapper_number();
        let name = nes_mapper_name(number)
            .ok_or_else(|| EmulatorError::NotFound(format!("NES mapper {number}")))?;
        log::info!("Mapper {number} ({name}) detected.");

        m.controller_add(
            ControllerInstance::new(name)
                .with_bus(instance.bus_id)
                .with_resources(instance.resources.clone())
                .with_mach_data(instance.mach_data.clone()),
        )
    }
}

/// Dispatcher spawning the concrete GB mapper from the cart header
pub struct GbMapper;

pub fn create_gb_mapper() -> Box<dyn Controller> {
    Box::new(GbMapper)
}

impl Controller for GbMapper {
    fn init(&mut self, m: &Machine, instance: &ControllerInstance) -> Result<()> {
        let MachData::CartPath(path) = &instance.mach_data else {
            return Err(EmulatorError::Config("GB mapper needs a cart path".into()));
        };

        let header_data = m
            .files()
            .map(PathKind::Data, path, GB_HEADER_START, GB_HEADER_SIZE)?;
        let header = GbHeader::parse(&header_data)?;

        log::info!("Title: {}", header.title);
        log::info!("Cartridge type: {:02x}", header.cartridge_type);
        log::info!("ROM size: {:02x}", header.rom_size_code);
        log::info!("RAM size: {:02x}", header.ram_size_code);

        let name = gb_mapper_name(header.cartridge_type).ok_or_else(|| {
            EmulatorError::NotFound(format!("GB cart type {:#04x}", header.cartridge_type))
        })?;
        log::info!("Cart type {:02x} ({name}) detected.", header.cartridge_type);

        m.controller_add(
            ControllerInstance::new(name)
                .with_bus(instance.bus_id)
                .with_resources(instance.resources.clone())
                .with_mach_data(instance.mach_data.clone()),
        )
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Write;

    /// Build an iNES image: header + patterned PRG/CHR banks
    pub fn ines_image(
        mapper: u8,
        prg_banks: u8,
        chr_banks: u8,
        flags6_extra: u8,
    ) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut header = [0u8; 16];
        header[0..4].copy_from_slice(b"NES\x1A");
        header[4] = prg_banks;
        header[5] = chr_banks;
        header[6] = (mapper << 4) | flags6_extra;
        file.write_all(&header).unwrap();
        for bank in 0..prg_banks {
            file.write_all(&vec![0x10 + bank; 16 * 1024]).unwrap();
        }
        for bank in 0..chr_banks {
            file.write_all(&vec![0x80 + bank; 8 * 1024]).unwrap();
        }
        file
    }

    /// Build a GB image of `banks` 16 KB ROM banks
    pub fn gb_image(cartridge_type: u8, banks: u8, ram_size_code: u8) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let rom_size_code = (banks / 2).trailing_zeros() as u8;
        let mut data = vec![0u8; usize::from(banks) * 16 * 1024];
        for (bank, chunk) in data.chunks_mut(16 * 1024).enumerate() {
            chunk.fill(bank as u8);
        }
        data[0x134..0x13F].copy_from_slice(b"TESTCART\0\0\0");
        data[0x147] = cartridge_type;
        data[0x148] = rom_size_code;
        data[0x149] = ram_size_code;
        file.write_all(&data).unwrap();
        file
    }
}
