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

//! CPU framework
//!
//! CPUs plug into the machine exactly like controllers: `init` registers
//! their clocks and regions, ticking happens through the scheduler, and
//! instruction decoding is the core's opaque tick function. The bundled
//! registry ships the CHIP-8 interpreter; other instruction decoders are
//! external collaborators registered at runtime through
//! [`Machine::register_cpu`] before the machine is initialized.
//!
//! Interrupt delivery: any component may call
//! [`Machine::cpu_interrupt`] with a line number; this sets a pending bit
//! that a CPU examines at its next tick boundary. CPUs never service an
//! interrupt mid-instruction, and a region operation firing an IRQ from
//! inside a CPU's own tick cannot re-enter the CPU.
//!
//! [`Machine::register_cpu`]: crate::core::machine::Machine::register_cpu
//! [`Machine::cpu_interrupt`]: crate::core::machine::Machine::cpu_interrupt

pub mod chip8;

use crate::core::error::Result;
use crate::core::machine::Machine;
use crate::core::memory::BusId;
use crate::core::resource::Resource;

/// Interrupt line number
pub type IrqLine = u32;

/// Instantiation record for one CPU
#[derive(Clone)]
pub struct CpuInstance {
    pub cpu_name: String,
    pub bus_id: BusId,
    pub resources: Vec<Resource>,
}

impl CpuInstance {
    pub fn new(cpu_name: &str) -> Self {
        Self {
            cpu_name: cpu_name.to_string(),
            bus_id: 0,
            resources: Vec::new(),
        }
    }

    pub fn with_bus(mut self, bus_id: BusId) -> Self {
        self.bus_id = bus_id;
        self
    }

    pub fn with_resources(mut self, resources: Vec<Resource>) -> Self {
        self.resources = resources;
        self
    }
}

/// Lifecycle hooks of a CPU core
pub trait Cpu {
    /// Bind resources and register execution clocks
    fn init(&mut self, m: &Machine, instance: &CpuInstance) -> Result<()>;

    /// Re-initialize architectural state
    fn reset(&mut self, m: &Machine) {
        let _ = m;
    }

    /// Reverse every registration made in `init`
    fn deinit(&mut self, m: &Machine) {
        let _ = m;
    }
}

/// Factory signature used by both the compile-time table and
/// runtime-registered external cores
pub type CpuFactory = fn() -> Box<dyn Cpu>;

/// Registry entry: CPU name and factory
pub struct CpuEntry {
    pub name: &'static str,
    pub create: CpuFactory,
}

/// The compile-time CPU registry
pub fn cpu_list() -> &'static [CpuEntry] {
    &[CpuEntry {
        name: "chip8",
        create: chip8::create,
    }]
}
