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

//! Machine runtime and machine registry
//!
//! [`Machine`] is the hub every component talks to: it owns the routing
//! fabrics, the scheduler, the frontends and the component instances. A
//! machine *description* (one per supported console) lists the buses,
//! memory regions, controller and CPU instances to create; the runtime
//! walks that list at init time, in declaration order, since controllers
//! may register IRQ lines the CPU consults.
//!
//! Lifecycle: `init` → instantiate CPUs, controllers, regions and clocks;
//! `reset` → every registered component's reset hook (idempotent state
//! re-initialization only); `run` → the scheduler loop, exited solely by
//! the Quit input event; `deinit` → teardown in reverse order, which is
//! also where battery-backed cart RAM gets saved.

pub mod chip8;
pub mod gb;
pub mod nes;
pub mod psx;
pub mod sms;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use crate::core::clock::{Clock, ClockTick, Scheduler};
use crate::core::config::EmulatorConfig;
use crate::core::controller::{controller_list, Controller, ControllerInstance};
use crate::core::cpu::{cpu_list, Cpu, CpuFactory, CpuInstance, IrqLine};
use crate::core::dma::{ChannelId, DmaChannels};
use crate::core::error::{EmulatorError, Result};
use crate::core::event::EventHub;
use crate::core::file::FileStore;
use crate::core::input::{InputConfig, InputConfigId, InputHub};
use crate::core::memory::{Address, BusId, Memory};
use crate::core::port::Ports;
use crate::frontend::{
    audio_list, cdrom_list, input_list, video_list, AudioFrontend, AudioSpecs, CdReadMode,
    CdromFrontend, Color, InputFrontend, Msf, VideoFrontend, VideoSpecs,
};

/// Hooks implemented by each machine description
pub trait MachineDesc {
    /// Create buses, regions, controllers and CPUs
    fn init(&mut self, m: &Machine) -> Result<()>;

    /// Machine-level reset work beyond the component hooks
    fn reset(&mut self, m: &Machine) {
        let _ = m;
    }

    /// Release machine-level resources
    fn deinit(&mut self, m: &Machine) {
        let _ = m;
    }
}

/// Registry entry: machine name, human description, factory
pub struct MachineEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub create: fn() -> Box<dyn MachineDesc>,
}

/// The compile-time machine registry
pub fn machine_list() -> &'static [MachineEntry] {
    &[
        MachineEntry {
            name: "chip8",
            description: "CHIP-8",
            create: chip8::create,
        },
        MachineEntry {
            name: "nes",
            description: "Nintendo Entertainment System",
            create: nes::create,
        },
        MachineEntry {
            name: "gb",
            description: "Nintendo Game Boy",
            create: gb::create,
        },
        MachineEntry {
            name: "sms",
            description: "Sega Master System",
            create: sms::create,
        },
        MachineEntry {
            name: "psx",
            description: "Sony PlayStation",
            create: psx::create,
        },
    ]
}

struct ControllerSlot {
    name: String,
    controller: Rc<RefCell<Box<dyn Controller>>>,
}

struct CpuSlot {
    name: String,
    cpu: Rc<RefCell<Box<dyn Cpu>>>,
}

/// The machine runtime
pub struct Machine {
    config: EmulatorConfig,
    files: FileStore,
    memory: Memory,
    ports: Ports,
    dma: DmaChannels,
    scheduler: Scheduler,
    events: EventHub,
    input: InputHub,
    pending_irqs: Cell<u64>,
    controllers: RefCell<Vec<ControllerSlot>>,
    cpus: RefCell<Vec<CpuSlot>>,
    external_cpus: RefCell<HashMap<String, CpuFactory>>,
    desc: RefCell<Option<Box<dyn MachineDesc>>>,
    audio: RefCell<Option<Box<dyn AudioFrontend>>>,
    video: RefCell<Option<Box<dyn VideoFrontend>>>,
    input_fe: RefCell<Option<Box<dyn InputFrontend>>>,
    cdrom_fe: RefCell<Option<Box<dyn CdromFrontend>>>,
    running: Cell<bool>,
}

impl Machine {
    /// Create an empty machine runtime around a configuration
    pub fn new(config: EmulatorConfig) -> Self {
        let files = FileStore::from_config(&config);
        Self {
            config,
            files,
            memory: Memory::new(),
            ports: Ports::new(),
            dma: DmaChannels::new(),
            scheduler: Scheduler::new(),
            events: EventHub::new(),
            input: InputHub::new(),
            pending_irqs: Cell::new(0),
            controllers: RefCell::new(Vec::new()),
            cpus: RefCell::new(Vec::new()),
            external_cpus: RefCell::new(HashMap::new()),
            desc: RefCell::new(None),
            audio: RefCell::new(None),
            video: RefCell::new(None),
            input_fe: RefCell::new(None),
            cdrom_fe: RefCell::new(None),
            running: Cell::new(false),
        }
    }

    // ------------------------------------------------------------------
    // Subsystem access

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn ports(&self) -> &Ports {
        &self.ports
    }

    pub fn dma(&self) -> &DmaChannels {
        &self.dma
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn input(&self) -> &InputHub {
        &self.input
    }

    // ------------------------------------------------------------------
    // Memory / port / DMA convenience wrappers

    pub fn memory_readb(&self, bus_id: BusId, address: Address) -> u8 {
        self.memory.readb(self, bus_id, address)
    }

    pub fn memory_readw(&self, bus_id: BusId, address: Address) -> u16 {
        self.memory.readw(self, bus_id, address)
    }

    pub fn memory_readl(&self, bus_id: BusId, address: Address) -> u32 {
        self.memory.readl(self, bus_id, address)
    }

    pub fn memory_writeb(&self, bus_id: BusId, b: u8, address: Address) {
        self.memory.writeb(self, bus_id, b, address);
    }

    pub fn memory_writew(&self, bus_id: BusId, w: u16, address: Address) {
        self.memory.writew(self, bus_id, w, address);
    }

    pub fn memory_writel(&self, bus_id: BusId, l: u32, address: Address) {
        self.memory.writel(self, bus_id, l, address);
    }

    pub fn port_read(&self, port: u8) -> u8 {
        self.ports.read(self, port)
    }

    pub fn port_write(&self, b: u8, port: u8) {
        self.ports.write(self, b, port);
    }

    pub fn dma_readl(&self, channel: ChannelId) -> u32 {
        self.dma.readl(self, channel)
    }

    pub fn dma_writel(&self, channel: ChannelId, l: u32) {
        self.dma.writel(self, channel, l);
    }

    // ------------------------------------------------------------------
    // Clocks and interrupts

    /// Register a clock with the scheduler
    pub fn clock_add(&self, rate: u64, tick: Box<dyn ClockTick>) -> Rc<Clock> {
        self.scheduler.add(rate, tick)
    }

    /// Bill cycles of the currently-ticking clock
    pub fn clock_consume(&self, num_cycles: u32) {
        self.scheduler.consume(num_cycles);
    }

    /// Assert an interrupt line
    ///
    /// Sets a pending bit the CPU examines at its next tick boundary.
    /// Level-sensitive sources simply keep calling this every tick until
    /// software acknowledges them.
    pub fn cpu_interrupt(&self, line: IrqLine) {
        if line >= 64 {
            log::error!("interrupt line {line} out of range");
            return;
        }
        self.pending_irqs.set(self.pending_irqs.get() | (1 << line));
    }

    /// Read and clear the pending interrupt mask
    pub fn take_pending_irqs(&self) -> u64 {
        self.pending_irqs.replace(0)
    }

    /// Peek at the pending interrupt mask
    pub fn pending_irqs(&self) -> u64 {
        self.pending_irqs.get()
    }

    // ------------------------------------------------------------------
    // Component instantiation

    /// Instantiate a controller by name and run its `init` hook
    ///
    /// May be called from inside another controller's `init` (mapper
    /// dispatchers spawn the concrete mapper this way).
    pub fn controller_add(&self, instance: ControllerInstance) -> Result<()> {
        let entry = controller_list()
            .iter()
            .find(|e| e.name == instance.controller_name)
            .ok_or_else(|| EmulatorError::NotFound(instance.controller_name.to_string()))?;

        let mut controller = (entry.create)();
        controller
            .init(self, &instance)
            .map_err(|e| EmulatorError::init_failure(instance.controller_name, &e))?;

        self.controllers.borrow_mut().push(ControllerSlot {
            name: instance.controller_name.to_string(),
            controller: Rc::new(RefCell::new(controller)),
        });
        log::debug!("controller \"{}\" added", instance.controller_name);
        Ok(())
    }

    /// Make an external CPU core available to machine descriptions
    ///
    /// Must be called before `init`. Instruction decoders other than the
    /// bundled CHIP-8 are external collaborators plugged in through this.
    pub fn register_cpu(&self, name: &str, factory: CpuFactory) {
        self.external_cpus
            .borrow_mut()
            .insert(name.to_string(), factory);
    }

    /// Instantiate a CPU by name and run its `init` hook
    pub fn cpu_add(&self, instance: CpuInstance) -> Result<()> {
        let factory = self
            .external_cpus
            .borrow()
            .get(&instance.cpu_name)
            .copied()
            .or_else(|| {
                cpu_list()
                    .iter()
                    .find(|e| e.name == instance.cpu_name)
                    .map(|e| e.create)
            })
            .ok_or_else(|| EmulatorError::NotFound(instance.cpu_name.clone()))?;

        let mut cpu = factory();
        cpu.init(self, &instance)
            .map_err(|e| EmulatorError::init_failure(&instance.cpu_name, &e))?;

        self.cpus.borrow_mut().push(CpuSlot {
            name: instance.cpu_name.clone(),
            cpu: Rc::new(RefCell::new(cpu)),
        });
        log::debug!("CPU \"{}\" added", instance.cpu_name);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle

    /// Instantiate the configured machine
    pub fn init(&self) -> Result<()> {
        let name = self.config.machine.clone();
        let entry = machine_list()
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| EmulatorError::NotFound(name.clone()))?;

        log::info!("Machine: {} ({})", entry.name, entry.description);

        let mut desc = (entry.create)();
        if let Err(e) = desc.init(self) {
            log::error!("machine \"{}\" failed to initialize: {e}", entry.name);
            // Controllers already initialized must be torn down in
            // reverse order before reporting the failure.
            self.teardown_components();
            return Err(e);
        }
        *self.desc.borrow_mut() = Some(desc);

        // Bring up the input frontend; losing input is not fatal for
        // headless runs.
        let input_name = self.config.input_frontend.clone();
        match Self::create_frontend(input_list(), &input_name) {
            Ok(mut fe) => match fe.init() {
                Ok(()) => *self.input_fe.borrow_mut() = Some(fe),
                Err(e) => log::warn!("input frontend \"{input_name}\" failed: {e}"),
            },
            Err(e) => log::warn!("{e}"),
        }

        Ok(())
    }

    /// Reset every registered component
    pub fn reset(&self) {
        self.pending_irqs.set(0);
        self.scheduler.reset();
        self.input.clear_quit();

        let cpus: Vec<Rc<RefCell<Box<dyn Cpu>>>> =
            self.cpus.borrow().iter().map(|s| s.cpu.clone()).collect();
        for cpu in cpus {
            cpu.borrow_mut().reset(self);
        }

        let controllers: Vec<Rc<RefCell<Box<dyn Controller>>>> = self
            .controllers
            .borrow()
            .iter()
            .map(|s| s.controller.clone())
            .collect();
        for controller in controllers {
            controller.borrow_mut().reset(self);
        }

        let desc = self.desc.borrow_mut().take();
        if let Some(mut desc) = desc {
            desc.reset(self);
            *self.desc.borrow_mut() = Some(desc);
        }
    }

    /// Run the scheduler loop until a Quit event arrives
    pub fn run(&self) {
        let machine_rate = self.scheduler.machine_rate();
        if machine_rate == 0 {
            log::error!("no clock registered for this machine!");
            return;
        }
        log::info!("Machine clock rate: {machine_rate} Hz");

        self.running.set(true);
        while self.running.get() && !self.input.quit_requested() {
            self.input_update();
            self.scheduler.tick_all(self, self.config.pace);
        }
        self.running.set(false);
    }

    /// Request the run loop to stop at the next iteration
    pub fn stop(&self) {
        self.running.set(false);
    }

    /// Tear down every component in reverse registration order
    pub fn deinit(&self) {
        // Reverse of creation order: the description's regions were laid
        // down before any controller came up, so they go away last.
        self.teardown_components();
        let desc = self.desc.borrow_mut().take();
        if let Some(mut desc) = desc {
            desc.deinit(self);
        }

        self.scheduler.remove_all();
        self.memory.remove_all();
        self.ports.remove_all();
        self.dma.remove_all();
        self.events.remove_all();
        self.input.remove_all();

        if let Some(mut fe) = self.audio.borrow_mut().take() {
            fe.deinit();
        }
        if let Some(mut fe) = self.video.borrow_mut().take() {
            fe.deinit();
        }
        if let Some(mut fe) = self.input_fe.borrow_mut().take() {
            fe.deinit();
        }
        if let Some(mut fe) = self.cdrom_fe.borrow_mut().take() {
            fe.deinit();
        }
    }

    fn teardown_components(&self) {
        let controllers: Vec<ControllerSlot> = self.controllers.borrow_mut().drain(..).collect();
        for slot in controllers.into_iter().rev() {
            slot.controller.borrow_mut().deinit(self);
            log::debug!("controller \"{}\" removed", slot.name);
        }

        let cpus: Vec<CpuSlot> = self.cpus.borrow_mut().drain(..).collect();
        for slot in cpus.into_iter().rev() {
            slot.cpu.borrow_mut().deinit(self);
            log::debug!("CPU \"{}\" removed", slot.name);
        }
    }

    // ------------------------------------------------------------------
    // Event hub / input

    pub fn event_fire(&self, name: &str) {
        self.events.fire(self, name);
    }

    pub fn input_register(&self, config: InputConfig) -> InputConfigId {
        self.input.register(config)
    }

    pub fn input_unregister(&self, id: InputConfigId) {
        self.input.unregister(id);
    }

    /// Poll the input frontend and dispatch its events
    pub fn input_update(&self) {
        let mut reported = Vec::new();
        if let Some(fe) = self.input_fe.borrow_mut().as_mut() {
            fe.poll(&mut reported);
        }
        for (event, pressed) in reported {
            self.input.report(&event, pressed);
        }
    }

    // ------------------------------------------------------------------
    // Frontends

    fn create_frontend<T: ?Sized>(
        list: &[(&'static str, fn() -> Box<T>)],
        name: &str,
    ) -> Result<Box<T>> {
        list.iter()
            .find(|(n, _)| *n == name)
            .map(|(_, create)| create())
            .ok_or_else(|| EmulatorError::Frontend(format!("frontend \"{name}\" not recognized")))
    }

    /// Initialize the configured audio frontend
    pub fn audio_init(&self, specs: &AudioSpecs) -> Result<()> {
        if self.audio.borrow().is_some() {
            return Err(EmulatorError::Frontend(
                "audio frontend already initialized".into(),
            ));
        }
        let name = self.config.audio_frontend.clone();
        let mut fe = Self::create_frontend(audio_list(), &name)?;
        fe.init(specs)?;
        *self.audio.borrow_mut() = Some(fe);
        Ok(())
    }

    pub fn audio_enqueue(&self, left: i16, right: i16) {
        if let Some(fe) = self.audio.borrow_mut().as_mut() {
            fe.enqueue(left, right);
        }
    }

    pub fn audio_start(&self) {
        if let Some(fe) = self.audio.borrow_mut().as_mut() {
            fe.start();
        }
    }

    pub fn audio_stop(&self) {
        if let Some(fe) = self.audio.borrow_mut().as_mut() {
            fe.stop();
        }
    }

    /// Initialize the configured video frontend
    pub fn video_init(&self, specs: &VideoSpecs) -> Result<()> {
        if self.video.borrow().is_some() {
            return Err(EmulatorError::Frontend(
                "video frontend already initialized".into(),
            ));
        }
        let name = self.config.video_frontend.clone();
        let mut specs = specs.clone();
        specs.scale = self.config.video_scale;
        let mut fe = Self::create_frontend(video_list(), &name)?;
        fe.init(&specs)?;
        *self.video.borrow_mut() = Some(fe);
        Ok(())
    }

    pub fn video_lock(&self) {
        if let Some(fe) = self.video.borrow_mut().as_mut() {
            fe.lock();
        }
    }

    pub fn video_unlock(&self) {
        if let Some(fe) = self.video.borrow_mut().as_mut() {
            fe.unlock();
        }
    }

    pub fn video_set_pixel(&self, x: u32, y: u32, color: Color) {
        if let Some(fe) = self.video.borrow_mut().as_mut() {
            fe.set_pixel(x, y, color);
        }
    }

    pub fn video_get_pixel(&self, x: u32, y: u32) -> Color {
        match self.video.borrow().as_ref() {
            Some(fe) => fe.get_pixel(x, y),
            None => Color::BLACK,
        }
    }

    pub fn video_update(&self) {
        if let Some(fe) = self.video.borrow_mut().as_mut() {
            fe.update();
        }
    }

    /// Initialize the configured CD-ROM source over a disc image
    pub fn cdrom_init(&self, source: &Path) -> Result<()> {
        if self.cdrom_fe.borrow().is_some() {
            return Err(EmulatorError::Frontend(
                "CD-ROM frontend already initialized".into(),
            ));
        }
        let name = self.config.cdrom_frontend.clone();
        let mut fe = Self::create_frontend(cdrom_list(), &name)?;
        fe.init(source)?;
        *self.cdrom_fe.borrow_mut() = Some(fe);
        Ok(())
    }

    /// Whether a disc source is attached
    pub fn cdrom_present(&self) -> bool {
        self.cdrom_fe.borrow().is_some()
    }

    pub fn cdrom_msf_from_sector(&self, lsn: u32) -> Msf {
        self.cdrom_fe
            .borrow()
            .as_ref()
            .map(|fe| fe.msf_from_sector(lsn))
            .unwrap_or_default()
    }

    pub fn cdrom_sector_from_msf(&self, msf: &Msf) -> u32 {
        self.cdrom_fe
            .borrow()
            .as_ref()
            .map(|fe| fe.sector_from_msf(msf))
            .unwrap_or(0)
    }

    pub fn cdrom_msf_from_track(&self, track: u8) -> Msf {
        self.cdrom_fe
            .borrow()
            .as_ref()
            .map(|fe| fe.msf_from_track(track))
            .unwrap_or_default()
    }

    pub fn cdrom_first_track(&self) -> u8 {
        self.cdrom_fe
            .borrow()
            .as_ref()
            .map(|fe| fe.first_track())
            .unwrap_or(0)
    }

    pub fn cdrom_last_track(&self) -> u8 {
        self.cdrom_fe
            .borrow()
            .as_ref()
            .map(|fe| fe.last_track())
            .unwrap_or(0)
    }

    pub fn cdrom_read_sector(&self, buf: &mut [u8], lsn: u32, mode: CdReadMode) -> bool {
        self.cdrom_fe
            .borrow_mut()
            .as_mut()
            .map(|fe| fe.read_sector(buf, lsn, mode))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resource::Resource;

    struct TestCpu;

    impl Cpu for TestCpu {
        fn init(&mut self, _m: &Machine, _instance: &CpuInstance) -> Result<()> {
            Ok(())
        }
    }

    fn create_test_cpu() -> Box<dyn Cpu> {
        Box::new(TestCpu)
    }

    #[test]
    fn test_machine_registry_lists_all_consoles() {
        let names: Vec<&str> = machine_list().iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["chip8", "nes", "gb", "sms", "psx"]);
    }

    #[test]
    fn test_unknown_machine_is_not_found() {
        let mut config = EmulatorConfig::default();
        config.machine = "vectrex".into();
        let m = Machine::new(config);
        assert!(matches!(m.init(), Err(EmulatorError::NotFound(_))));
    }

    #[test]
    fn test_unknown_controller_is_not_found() {
        let m = Machine::new(EmulatorConfig::default());
        let err = m
            .controller_add(ControllerInstance::new("does_not_exist"))
            .unwrap_err();
        assert!(matches!(err, EmulatorError::NotFound(_)));
    }

    #[test]
    fn test_unknown_cpu_is_not_found() {
        let m = Machine::new(EmulatorConfig::default());
        let err = m.cpu_add(CpuInstance::new("r3051")).unwrap_err();
        assert!(matches!(err, EmulatorError::NotFound(_)));
    }

    #[test]
    fn test_external_cpu_registration() {
        let m = Machine::new(EmulatorConfig::default());
        m.register_cpu("r3051", create_test_cpu);
        let instance = CpuInstance::new("r3051")
            .with_resources(vec![Resource::clk("clk", 33_868_800)]);
        assert!(m.cpu_add(instance).is_ok());
    }

    #[test]
    fn test_interrupt_pending_mask() {
        let m = Machine::new(EmulatorConfig::default());
        m.cpu_interrupt(0);
        m.cpu_interrupt(3);
        assert_eq!(m.pending_irqs(), 0b1001);
        assert_eq!(m.take_pending_irqs(), 0b1001);
        assert_eq!(m.pending_irqs(), 0);
    }

    #[test]
    fn test_interrupt_line_out_of_range_ignored() {
        let m = Machine::new(EmulatorConfig::default());
        m.cpu_interrupt(64);
        assert_eq!(m.pending_irqs(), 0);
    }

    #[test]
    fn test_run_without_clocks_returns() {
        let m = Machine::new(EmulatorConfig::default());
        // Must not spin forever when no clock has been registered.
        m.run();
    }

    #[test]
    fn test_reset_clears_pending_irqs() {
        let m = Machine::new(EmulatorConfig::default());
        m.cpu_interrupt(1);
        m.reset();
        assert_eq!(m.pending_irqs(), 0);
    }

    #[test]
    fn test_deinit_is_idempotent() {
        let m = Machine::new(EmulatorConfig::default());
        m.deinit();
        m.deinit();
    }
}
