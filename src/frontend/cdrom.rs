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

//! CD-ROM source backends
//!
//! `bin` reads a raw single-track disc image of 2352-byte sectors. MSF
//! addresses carry the standard 150-sector (two second) lead-in offset:
//! LSN 0 is MSF 00:02:00.

use std::path::Path;

use crate::core::error::Result;
use crate::core::file::FileHandle;
use crate::frontend::{CdReadMode, CdromFrontend, Msf};

const RAW_SECTOR_SIZE: u64 = 2352;
const SECTORS_PER_SEC: u32 = 75;
const SECS_PER_MIN: u32 = 60;
const LEADIN_SECTORS: u32 = 150;

/// Byte offset of each read mode's payload inside a raw sector
fn payload_offset(mode: CdReadMode) -> u64 {
    match mode {
        CdReadMode::Audio => 0,
        // Skip 12-byte sync, 3-byte address, 1-byte mode
        CdReadMode::M1F1 | CdReadMode::M1F2 => 16,
        // Mode 2 additionally skips the 8-byte subheader
        CdReadMode::M2F1 | CdReadMode::M2F2 => 24,
    }
}

/// Raw .bin disc image source
pub struct BinCdrom {
    file: Option<FileHandle>,
    num_sectors: u32,
}

pub fn create_bin() -> Box<dyn CdromFrontend> {
    Box::new(BinCdrom {
        file: None,
        num_sectors: 0,
    })
}

impl CdromFrontend for BinCdrom {
    fn init(&mut self, source: &Path) -> Result<()> {
        let store =
            crate::core::file::FileStore::from_config(&crate::core::config::EmulatorConfig::default());
        let handle = store.open(crate::core::file::PathKind::Data, source, false)?;
        let size = handle.size()?;
        self.num_sectors = (size / RAW_SECTOR_SIZE) as u32;
        self.file = Some(handle);
        log::info!(
            "disc image \"{}\" loaded ({} sectors)",
            source.display(),
            self.num_sectors
        );
        Ok(())
    }

    fn msf_from_sector(&self, lsn: u32) -> Msf {
        let absolute = lsn + LEADIN_SECTORS;
        Msf {
            m: (absolute / (SECTORS_PER_SEC * SECS_PER_MIN)) as u8,
            s: ((absolute / SECTORS_PER_SEC) % SECS_PER_MIN) as u8,
            f: (absolute % SECTORS_PER_SEC) as u8,
        }
    }

    fn sector_from_msf(&self, msf: &Msf) -> u32 {
        let absolute = u32::from(msf.m) * SECTORS_PER_SEC * SECS_PER_MIN
            + u32::from(msf.s) * SECTORS_PER_SEC
            + u32::from(msf.f);
        absolute.saturating_sub(LEADIN_SECTORS)
    }

    fn msf_from_track(&self, track: u8) -> Msf {
        // Single-track image: track 1 starts at LSN 0, the "lead-out
        // track" request (0xAA convention, mapped to last+1) reports the
        // image end.
        if track <= 1 {
            self.msf_from_sector(0)
        } else {
            self.msf_from_sector(self.num_sectors)
        }
    }

    fn track_from_sector(&self, _lsn: u32) -> u8 {
        1
    }

    fn first_track(&self) -> u8 {
        1
    }

    fn last_track(&self) -> u8 {
        1
    }

    fn read_sector(&mut self, buf: &mut [u8], lsn: u32, mode: CdReadMode) -> bool {
        let Some(file) = self.file.as_mut() else {
            return false;
        };
        if lsn >= self.num_sectors {
            log::warn!("sector read past end of disc (LSN {lsn})");
            return false;
        }

        let size = mode.sector_size().min(buf.len());
        let offset = u64::from(lsn) * RAW_SECTOR_SIZE + payload_offset(mode);
        match file.read_at(&mut buf[..size], offset) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("sector read failed (LSN {lsn}): {e}");
                false
            }
        }
    }
}
