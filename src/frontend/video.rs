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

//! Video backends
//!
//! `buffer` keeps the frame in memory and is the default: video cores
//! read pixels back (the CHIP-8 XOR draw does), and tests assert on frame
//! contents. `null` discards everything.

use crate::core::error::Result;
use crate::frontend::{Color, VideoFrontend, VideoSpecs};

/// In-memory framebuffer backend
pub struct BufferVideo {
    width: u32,
    height: u32,
    pixels: Vec<Color>,
    frames: u64,
}

pub fn create_buffer() -> Box<dyn VideoFrontend> {
    Box::new(BufferVideo {
        width: 0,
        height: 0,
        pixels: Vec::new(),
        frames: 0,
    })
}

impl BufferVideo {
    fn index(&self, x: u32, y: u32) -> Option<usize> {
        if x < self.width && y < self.height {
            Some((y * self.width + x) as usize)
        } else {
            None
        }
    }
}

impl VideoFrontend for BufferVideo {
    fn init(&mut self, specs: &VideoSpecs) -> Result<()> {
        self.width = specs.width;
        self.height = specs.height;
        self.pixels = vec![Color::BLACK; (specs.width * specs.height) as usize];
        log::info!(
            "buffer video initialized ({}x{} @ {:.2} fps)",
            specs.width,
            specs.height,
            specs.fps
        );
        Ok(())
    }

    fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        if let Some(index) = self.index(x, y) {
            self.pixels[index] = color;
        }
    }

    fn get_pixel(&self, x: u32, y: u32) -> Color {
        self.index(x, y)
            .map(|i| self.pixels[i])
            .unwrap_or(Color::BLACK)
    }

    fn update(&mut self) {
        self.frames += 1;
    }
}

/// Backend that drops every pixel
pub struct NullVideo;

pub fn create_null() -> Box<dyn VideoFrontend> {
    Box::new(NullVideo)
}

impl VideoFrontend for NullVideo {
    fn init(&mut self, _specs: &VideoSpecs) -> Result<()> {
        Ok(())
    }

    fn set_pixel(&mut self, _x: u32, _y: u32, _color: Color) {}

    fn get_pixel(&self, _x: u32, _y: u32) -> Color {
        Color::BLACK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs() -> VideoSpecs {
        VideoSpecs {
            width: 64,
            height: 32,
            fps: 60.0,
            scale: 1,
        }
    }

    #[test]
    fn test_buffer_round_trip() {
        let mut video = BufferVideo {
            width: 0,
            height: 0,
            pixels: Vec::new(),
            frames: 0,
        };
        video.init(&specs()).unwrap();

        let red = Color::new(255, 0, 0);
        video.set_pixel(10, 20, red);
        assert_eq!(video.get_pixel(10, 20), red);
        assert_eq!(video.get_pixel(0, 0), Color::BLACK);
    }

    #[test]
    fn test_buffer_out_of_bounds_is_safe() {
        let mut video = BufferVideo {
            width: 0,
            height: 0,
            pixels: Vec::new(),
            frames: 0,
        };
        video.init(&specs()).unwrap();
        video.set_pixel(1000, 1000, Color::WHITE);
        assert_eq!(video.get_pixel(1000, 1000), Color::BLACK);
    }

    #[test]
    fn test_update_counts_frames() {
        let mut video = BufferVideo {
            width: 0,
            height: 0,
            pixels: Vec::new(),
            frames: 0,
        };
        video.init(&specs()).unwrap();
        video.update();
        video.update();
        assert_eq!(video.frames, 2);
    }
}
