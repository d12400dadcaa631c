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

//! Core emulation components
//!
//! Everything needed to assemble and run a machine: the scheduler, the
//! bus/port/DMA routing fabric, the controller and CPU frameworks, the
//! peripheral state machines, and the machine descriptions themselves.

pub mod audio;
pub mod cdrom;
pub mod clock;
pub mod config;
pub mod controller;
pub mod cpu;
pub mod dma;
pub mod dma_units;
pub mod error;
pub mod event;
pub mod fifo;
pub mod file;
pub mod input;
pub mod joypad;
pub mod machine;
pub mod mapper;
pub mod media;
pub mod memory;
pub mod port;
pub mod resource;
pub mod timer;
pub mod video;
