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

//! File access
//!
//! Machines and mappers reach the host filesystem through three path
//! categories: `Data` (cart/ROM/disc images, absolute or cwd-relative),
//! `System` (BIOS images resolved under the configured system directory)
//! and `Config` (resolved under the configured config directory).
//!
//! `map` loads a window of a file into an owned buffer; battery-backed
//! RAM is written back explicitly with `write_at` at the controller's
//! deinit save point.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::core::config::EmulatorConfig;
use crate::core::error::Result;

/// Path category a file is resolved in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Data,
    System,
    Config,
}

/// Open file handle
#[derive(Debug)]
pub struct FileHandle {
    file: File,
}

impl FileHandle {
    /// Size of the file in bytes
    pub fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Read `buf.len()` bytes starting at `offset`
    pub fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Write `buf` starting at `offset`
    pub fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }
}

/// Path resolution and file access for one machine
pub struct FileStore {
    system_dir: PathBuf,
    config_dir: PathBuf,
}

impl FileStore {
    pub fn from_config(config: &EmulatorConfig) -> Self {
        Self {
            system_dir: config.system_dir.clone(),
            config_dir: config.config_dir.clone(),
        }
    }

    /// Resolve a path within its category
    pub fn resolve(&self, kind: PathKind, path: &Path) -> PathBuf {
        match kind {
            PathKind::Data => path.to_path_buf(),
            PathKind::System => self.system_dir.join(path),
            PathKind::Config => self.config_dir.join(path),
        }
    }

    /// Open a file for reading (and writing when `writable`)
    pub fn open(&self, kind: PathKind, path: &Path, writable: bool) -> Result<FileHandle> {
        let resolved = self.resolve(kind, path);
        let file = if writable {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&resolved)?
        } else {
            File::open(&resolved)?
        };
        Ok(FileHandle { file })
    }

    /// Size of a file without keeping it open
    pub fn size(&self, kind: PathKind, path: &Path) -> Result<u64> {
        Ok(std::fs::metadata(self.resolve(kind, path))?.len())
    }

    /// Load `size` bytes at `offset` into an owned buffer
    ///
    /// Stands in for the original memory mapping; a short file yields a
    /// buffer truncated at end-of-file rather than an error, since cart
    /// dumps are frequently smaller than the address window they fill.
    pub fn map(&self, kind: PathKind, path: &Path, offset: u64, size: usize) -> Result<Vec<u8>> {
        let mut handle = self.open(kind, path, false)?;
        let file_size = handle.size()?;
        let available = file_size.saturating_sub(offset).min(size as u64) as usize;
        let mut buf = vec![0u8; available];
        handle.read_at(&mut buf, offset)?;
        Ok(buf)
    }

    /// Write a buffer at `offset`, creating the file when absent
    pub fn write_back(&self, kind: PathKind, path: &Path, offset: u64, data: &[u8]) -> Result<()> {
        let mut handle = self.open(kind, path, true)?;
        handle.write_at(data, offset)
    }
}
