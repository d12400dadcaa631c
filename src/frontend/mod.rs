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

//! Frontend interfaces
//!
//! The narrow surfaces the core consumes: an audio sink, a video surface,
//! an input source and a CD-ROM source. Concrete backends are looked up
//! by name in per-category registries and selected through the
//! configuration; the bundled ones are headless (plus a cpal audio sink
//! behind the `audio` feature), which keeps the whole core testable
//! without a display or sound device.

pub mod audio;
pub mod cdrom;
pub mod input;
pub mod video;

use std::path::Path;

use crate::core::error::Result;
use crate::core::input::InputEvent;

/// Audio stream parameters
#[derive(Debug, Clone)]
pub struct AudioSpecs {
    pub sample_rate: u32,
    pub channels: u8,
}

/// Audio sink
///
/// Samples are signed 16-bit PCM; mono cores pass the same value on both
/// channels. There is no backpressure; the backend owns whatever ring
/// buffer it needs and deals with overflow itself.
pub trait AudioFrontend {
    fn init(&mut self, specs: &AudioSpecs) -> Result<()>;
    fn enqueue(&mut self, left: i16, right: i16);
    fn start(&mut self) {}
    fn stop(&mut self) {}
    fn deinit(&mut self) {}
}

/// Video surface parameters
#[derive(Debug, Clone)]
pub struct VideoSpecs {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub scale: u32,
}

/// RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };
    pub const WHITE: Color = Color {
        r: 255,
        g: 255,
        b: 255,
    };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Video surface
///
/// Frames are delimited by `lock`/`unlock`; `update` presents the frame.
pub trait VideoFrontend {
    fn init(&mut self, specs: &VideoSpecs) -> Result<()>;
    fn lock(&mut self) {}
    fn unlock(&mut self) {}
    fn set_pixel(&mut self, x: u32, y: u32, color: Color);
    fn get_pixel(&self, x: u32, y: u32) -> Color;
    fn update(&mut self) {}
    fn deinit(&mut self) {}
}

/// Input source
///
/// `poll` drains host events since the last call; each is reported with
/// its pressed state and dispatched through the listener registry.
pub trait InputFrontend {
    fn init(&mut self) -> Result<()>;
    fn poll(&mut self, out: &mut Vec<(InputEvent, bool)>);
    fn deinit(&mut self) {}
}

/// Minute/Second/Frame sector address (binary values; BCD conversion
/// happens at the register interface that transports them)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Msf {
    pub m: u8,
    pub s: u8,
    pub f: u8,
}

/// Sector read mode and the payload size it yields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdReadMode {
    Audio,
    M1F1,
    M1F2,
    M2F1,
    M2F2,
}

impl CdReadMode {
    /// Payload bytes delivered per sector in this mode
    pub fn sector_size(self) -> usize {
        match self {
            CdReadMode::Audio => 2352,
            CdReadMode::M1F1 => 2048,
            CdReadMode::M1F2 => 2336,
            CdReadMode::M2F1 => 2048,
            CdReadMode::M2F2 => 2328,
        }
    }
}

/// CD-ROM source (an opaque disc image)
pub trait CdromFrontend {
    fn init(&mut self, source: &Path) -> Result<()>;
    fn msf_from_sector(&self, lsn: u32) -> Msf;
    fn sector_from_msf(&self, msf: &Msf) -> u32;
    fn msf_from_track(&self, track: u8) -> Msf;
    fn track_from_sector(&self, lsn: u32) -> u8;
    fn first_track(&self) -> u8;
    fn last_track(&self) -> u8;
    fn read_sector(&mut self, buf: &mut [u8], lsn: u32, mode: CdReadMode) -> bool;
    fn deinit(&mut self) {}
}

/// Audio backend registry
pub fn audio_list() -> &'static [(&'static str, fn() -> Box<dyn AudioFrontend>)] {
    &[
        ("null", audio::create_null),
        #[cfg(feature = "audio")]
        ("cpal", audio::create_cpal),
    ]
}

/// Video backend registry
pub fn video_list() -> &'static [(&'static str, fn() -> Box<dyn VideoFrontend>)] {
    &[("buffer", video::create_buffer), ("null", video::create_null)]
}

/// Input backend registry
pub fn input_list() -> &'static [(&'static str, fn() -> Box<dyn InputFrontend>)] {
    &[("null", input::create_null)]
}

/// CD-ROM backend registry
pub fn cdrom_list() -> &'static [(&'static str, fn() -> Box<dyn CdromFrontend>)] {
    &[("bin", cdrom::create_bin)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registries_resolve_defaults() {
        assert!(audio_list().iter().any(|(n, _)| *n == "null"));
        assert!(video_list().iter().any(|(n, _)| *n == "buffer"));
        assert!(input_list().iter().any(|(n, _)| *n == "null"));
        assert!(cdrom_list().iter().any(|(n, _)| *n == "bin"));
    }

    #[test]
    fn test_sector_sizes() {
        assert_eq!(CdReadMode::Audio.sector_size(), 2352);
        assert_eq!(CdReadMode::M1F1.sector_size(), 2048);
        assert_eq!(CdReadMode::M2F2.sector_size(), 2328);
    }
}
