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

//! Audio backends
//!
//! `null` swallows samples (headless runs and tests); `cpal` streams them
//! to the default output device through a shared ring buffer, available
//! behind the `audio` feature.

use crate::core::error::Result;
use crate::frontend::{AudioFrontend, AudioSpecs};

/// Backend that discards every sample
pub struct NullAudio {
    enqueued: u64,
}

pub fn create_null() -> Box<dyn AudioFrontend> {
    Box::new(NullAudio { enqueued: 0 })
}

impl AudioFrontend for NullAudio {
    fn init(&mut self, specs: &AudioSpecs) -> Result<()> {
        log::info!(
            "null audio initialized ({} Hz, {} channel(s))",
            specs.sample_rate,
            specs.channels
        );
        Ok(())
    }

    fn enqueue(&mut self, _left: i16, _right: i16) {
        self.enqueued += 1;
    }

    fn deinit(&mut self) {
        log::debug!("null audio dropped {} frames", self.enqueued);
    }
}

#[cfg(feature = "audio")]
pub use cpal_backend::create_cpal;

#[cfg(feature = "audio")]
mod cpal_backend {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    use crate::core::error::{EmulatorError, Result};
    use crate::frontend::{AudioFrontend, AudioSpecs};

    // Enough for ~250 ms at 44.1 kHz stereo; older frames are dropped on
    // overflow since there is no backpressure toward the core.
    const RING_CAPACITY: usize = 32 * 1024;

    /// cpal-backed audio sink
    pub struct CpalAudio {
        ring: Arc<Mutex<VecDeque<i16>>>,
        stream: Option<cpal::Stream>,
    }

    pub fn create_cpal() -> Box<dyn AudioFrontend> {
        Box::new(CpalAudio {
            ring: Arc::new(Mutex::new(VecDeque::new())),
            stream: None,
        })
    }

    impl AudioFrontend for CpalAudio {
        fn init(&mut self, specs: &AudioSpecs) -> Result<()> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| EmulatorError::Frontend("no audio output device".into()))?;

            let config = cpal::StreamConfig {
                channels: 2,
                sample_rate: cpal::SampleRate(specs.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let ring = self.ring.clone();
            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [i16], _| {
                        let mut ring = ring.lock().unwrap();
                        for sample in data.iter_mut() {
                            *sample = ring.pop_front().unwrap_or(0);
                        }
                    },
                    |err| log::warn!("audio stream error: {err}"),
                    None,
                )
                .map_err(|e| EmulatorError::Frontend(e.to_string()))?;

            stream
                .play()
                .map_err(|e| EmulatorError::Frontend(e.to_string()))?;
            self.stream = Some(stream);
            log::info!("cpal audio initialized ({} Hz)", specs.sample_rate);
            Ok(())
        }

        fn enqueue(&mut self, left: i16, right: i16) {
            let mut ring = self.ring.lock().unwrap();
            if ring.len() >= RING_CAPACITY {
                ring.pop_front();
                ring.pop_front();
            }
            ring.push_back(left);
            ring.push_back(right);
        }

        fn start(&mut self) {
            if let Some(stream) = &self.stream {
                let _ = stream.play();
            }
        }

        fn stop(&mut self) {
            if let Some(stream) = &self.stream {
                let _ = stream.pause();
            }
        }

        fn deinit(&mut self) {
            self.stream = None;
        }
    }
}
