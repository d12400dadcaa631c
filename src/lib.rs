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

//! emux: a multi-system cycle-driven emulator
//!
//! This crate models several vintage consoles (NES, Game Boy, Sega Master
//! System, PlayStation, CHIP-8) as collections of interacting hardware
//! blocks driven by a single cooperative scheduler.
//!
//! # Architecture
//!
//! - [`core::clock`]: the scheduler advancing heterogeneous clocks in
//!   locked-ratio steps, paced to wall time
//! - [`core::memory`], [`core::port`], [`core::dma`]: the routing fabric
//!   dispatching reads and writes to pluggable regions (with mirrors and
//!   overlay precedence)
//! - [`core::controller`] / [`core::cpu`]: the lifecycle framework every
//!   peripheral and processor plugs into
//! - [`core::machine`]: machine descriptions tying buses, controllers and
//!   CPUs together, plus the run loop
//! - [`frontend`]: the narrow audio/video/input/CD-ROM interfaces the core
//!   consumes
//!
//! # Example
//!
//! ```no_run
//! use emux::core::config::EmulatorConfig;
//! use emux::core::machine::Machine;
//!
//! let mut config = EmulatorConfig::default();
//! config.machine = "chip8".into();
//! config.cart = Some("game.ch8".into());
//!
//! let machine = Machine::new(config);
//! machine.init()?;
//! machine.reset();
//! machine.run();
//! machine.deinit();
//! # Ok::<(), emux::EmulatorError>(())
//! ```
//!
//! # Error Handling
//!
//! All fallible operations return [`core::error::Result<T>`] which is an
//! alias for `Result<T, EmulatorError>`. Faults hit while the machine is
//! running (unmapped bus accesses, FIFO overruns, ticks that forget to
//! consume cycles) are never fatal; they are logged and the loop keeps
//! going, because buggy guest software must not take the emulator down.

pub mod core;
pub mod frontend;

// Re-export commonly used types
pub use core::error::{EmulatorError, Result};
