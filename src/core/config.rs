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

//! Emulator configuration
//!
//! The typed configuration surface of the core. How the fields get
//! populated is a frontend concern: the bundled binary fills them from
//! command-line flags and an optional TOML file, embedders build the
//! struct directly.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::{EmulatorError, Result};

/// Typed configuration fields consumed by the core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Machine to instantiate (registry name, e.g. "chip8")
    pub machine: String,
    /// Data image: cart, ROM or disc, depending on the machine
    pub cart: Option<PathBuf>,
    /// System image (PSX BIOS, SMS BIOS)
    pub bios: Option<PathBuf>,
    /// Boot ROM overlay image (Game Boy)
    pub bootrom: Option<PathBuf>,
    /// Directory for system images resolved by name
    pub system_dir: PathBuf,
    /// Directory for configuration files
    pub config_dir: PathBuf,
    /// Audio frontend name ("null", "cpal")
    pub audio_frontend: String,
    /// Video frontend name ("buffer", "null")
    pub video_frontend: String,
    /// Input frontend name ("null")
    pub input_frontend: String,
    /// CD-ROM frontend name ("bin")
    pub cdrom_frontend: String,
    /// Integer upscaling factor requested from the video frontend
    pub video_scale: u32,
    /// Pace the scheduler to wall time
    pub pace: bool,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            machine: String::new(),
            cart: None,
            bios: None,
            bootrom: None,
            system_dir: PathBuf::from("."),
            config_dir: PathBuf::from("."),
            audio_frontend: "null".into(),
            video_frontend: "buffer".into(),
            input_frontend: "null".into(),
            cdrom_frontend: "bin".into(),
            video_scale: 1,
            pace: true,
        }
    }
}

impl EmulatorConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| EmulatorError::Config(e.to_string()))
    }

    /// Data image path; machines that need a cart call this during init
    pub fn cart_path(&self) -> Result<&Path> {
        self.cart
            .as_deref()
            .ok_or_else(|| EmulatorError::Config("no cart/data image configured".into()))
    }

    /// System image path (BIOS)
    pub fn bios_path(&self) -> Result<&Path> {
        self.bios
            .as_deref()
            .ok_or_else(|| EmulatorError::Config("no BIOS image configured".into()))
    }
}
