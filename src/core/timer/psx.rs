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

//! PSX timers
//!
//! Three counter channels behind one register block (value/mode/target
//! per channel). The system clock ticks them directly; the dot-clock,
//! hblank and vblank edges arrive as named events fired by the GPU, which
//! both gate the synchronization modes and serve as alternative clock
//! sources. IRQs fire on target or 0xFFFF matches with one-shot/repeat
//! and pulse/toggle semantics; the reached bits clear when the mode
//! register is read.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::clock::ClockTick;
use crate::core::controller::{Controller, ControllerInstance};
use crate::core::cpu::IrqLine;
use crate::core::error::Result;
use crate::core::event::{EventListener, EventListenerId};
use crate::core::machine::Machine;
use crate::core::memory::{Address, MemOps, Region, RegionId};
use crate::core::resource::Resource;

const NUM_TIMERS: usize = 3;
const REGS_STRIDE: Address = 0x10;

// Mode register bits
const MODE_SYNC_ENABLE: u16 = 1 << 0;
const MODE_RESET_ON_TARGET: u16 = 1 << 3;
const MODE_IRQ_ON_TARGET: u16 = 1 << 4;
const MODE_IRQ_ON_FFFF: u16 = 1 << 5;
const MODE_IRQ_REPEAT: u16 = 1 << 6;
const MODE_IRQ_TOGGLE: u16 = 1 << 7;
const MODE_INT_REQUEST: u16 = 1 << 10; // 1 = no request
const MODE_REACHED_TARGET: u16 = 1 << 11;
const MODE_REACHED_FFFF: u16 = 1 << 12;

#[derive(Default)]
struct Channel {
    value: u16,
    mode: u16,
    target: u16,
    running: bool,
    interrupted: bool,
    step: u8,
    irq: IrqLine,
}

impl Channel {
    fn sync_mode(&self) -> u16 {
        (self.mode >> 1) & 0x03
    }

    fn clock_src(&self) -> u16 {
        (self.mode >> 8) & 0x03
    }
}

struct TimerState {
    channels: [Channel; NUM_TIMERS],
}

impl TimerState {
    fn new() -> Self {
        Self {
            channels: [Channel::default(), Channel::default(), Channel::default()],
        }
    }
}

fn channel_tick(m: &Machine, ch: &mut Channel) {
    // With the target-reset bit set the counter wraps through the target
    let reset = ch.mode & MODE_RESET_ON_TARGET != 0 && ch.value == ch.target;
    ch.value = if reset { 0 } else { ch.value.wrapping_add(1) };

    let mut interrupt = false;
    if ch.value == ch.target {
        ch.mode |= MODE_REACHED_TARGET;
        interrupt |= ch.mode & MODE_IRQ_ON_TARGET != 0;
    }
    if ch.value == 0xFFFF {
        ch.mode |= MODE_REACHED_FFFF;
        interrupt |= ch.mode & MODE_IRQ_ON_FFFF != 0;
    }
    if !interrupt {
        return;
    }

    // One-shot mode suppresses further IRQs until the mode is rewritten
    if ch.mode & MODE_IRQ_REPEAT == 0 && ch.interrupted {
        return;
    }

    // Toggle bit 10; the interrupt fires on the 1→0 edge
    ch.mode ^= MODE_INT_REQUEST;
    if ch.mode & MODE_INT_REQUEST == 0 {
        ch.interrupted = true;
        m.cpu_interrupt(ch.irq);
        if ch.mode & MODE_IRQ_TOGGLE == 0 {
            // Pulse mode: the request bit is only briefly low
            ch.mode |= MODE_INT_REQUEST;
        }
    }
}

fn timer_tick(m: &Machine, state: &mut TimerState) {
    for index in 0..NUM_TIMERS {
        let ch = &mut state.channels[index];
        if !ch.running {
            continue;
        }

        let src = ch.clock_src();
        let tick = match index {
            // Timer 0/1: sources 0 and 2 are the system clock
            0 | 1 => src == 0 || src == 2,
            // Timer 2: sources 2 and 3 are system clock / 8
            _ => {
                let mut tick = src == 0 || src == 1;
                if src >= 2 {
                    tick |= ch.step == 0;
                    ch.step += 1;
                    if ch.step == 8 {
                        ch.step = 0;
                    }
                }
                tick
            }
        };

        if tick {
            channel_tick(m, ch);
        }
    }

    m.clock_consume(1);
}

fn timer_readl(state: &mut TimerState, address: Address) -> u32 {
    let index = (address / REGS_STRIDE) as usize;
    let reg = (address % REGS_STRIDE) / 4;
    if index >= NUM_TIMERS {
        return 0;
    }
    let ch = &mut state.channels[index];

    match reg {
        0 => u32::from(ch.value),
        1 => {
            let mode = ch.mode;
            // The reached bits clear on mode reads
            ch.mode &= !(MODE_REACHED_TARGET | MODE_REACHED_FFFF);
            u32::from(mode)
        }
        2 => u32::from(ch.target),
        _ => 0,
    }
}

fn timer_writel(state: &mut TimerState, l: u32, address: Address) {
    let index = (address / REGS_STRIDE) as usize;
    let reg = (address % REGS_STRIDE) / 4;
    if index >= NUM_TIMERS {
        return;
    }
    let ch = &mut state.channels[index];

    match reg {
        0 => ch.value = l as u16,
        1 => {
            ch.mode = l as u16;
            ch.value = 0;

            if ch.mode & MODE_IRQ_REPEAT == 0 {
                ch.interrupted = false;
            }
            // Interrupt request bit reads back as "no request"
            ch.mode |= MODE_INT_REQUEST;

            if ch.mode & MODE_SYNC_ENABLE == 0 {
                ch.running = true;
            } else if index == 2 {
                // Timer 2 sync: modes 0/3 stop the counter, 1/2 free-run
                ch.running = matches!(ch.sync_mode(), 1 | 2);
            } else {
                // Timers 0/1 wait for their blanking events
                ch.running = true;
            }
        }
        2 => ch.target = l as u16,
        _ => {}
    }
}

// Blanking-edge listeners gating the sync modes (and serving as clock
// sources 1/3 of timers 0 and 1)

fn hblank_start(m: &Machine, state: &mut TimerState) {
    let ch0 = &mut state.channels[0];
    if ch0.mode & MODE_SYNC_ENABLE != 0 {
        match ch0.sync_mode() {
            0 => {
                ch0.running = false;
                return;
            }
            1 => ch0.value = 0,
            2 => {
                ch0.value = 0;
                ch0.running = true;
            }
            _ => ch0.running = true,
        }
    }

    let ch1 = &mut state.channels[1];
    if ch1.running {
        let src = ch1.clock_src();
        if src == 1 || src == 3 {
            channel_tick(m, ch1);
        }
    }
}

fn hblank_end(state: &mut TimerState) {
    let ch0 = &mut state.channels[0];
    if ch0.mode & MODE_SYNC_ENABLE != 0 {
        match ch0.sync_mode() {
            0 => ch0.running = true,
            2 => ch0.running = false,
            _ => {}
        }
    }
}

fn vblank_start(state: &mut TimerState) {
    let ch1 = &mut state.channels[1];
    if ch1.mode & MODE_SYNC_ENABLE != 0 {
        match ch1.sync_mode() {
            0 => {
                ch1.running = false;
                return;
            }
            1 => ch1.value = 0,
            2 => {
                ch1.value = 0;
                ch1.running = true;
            }
            _ => ch1.running = true,
        }
    }
}

fn vblank_end(state: &mut TimerState) {
    let ch1 = &mut state.channels[1];
    if ch1.mode & MODE_SYNC_ENABLE != 0 {
        match ch1.sync_mode() {
            0 => ch1.running = true,
            2 => ch1.running = false,
            _ => {}
        }
    }
}

fn dot_clk(m: &Machine, state: &mut TimerState) {
    let ch0 = &mut state.channels[0];
    if !ch0.running {
        return;
    }
    let src = ch0.clock_src();
    if src == 1 || src == 3 {
        channel_tick(m, ch0);
    }
}

// ----------------------------------------------------------------------
// Fabric glue

struct TimerPorts(Rc<RefCell<TimerState>>);

impl MemOps for TimerPorts {
    fn readw(&mut self, _m: &Machine, address: Address) -> Option<u16> {
        Some(timer_readl(&mut self.0.borrow_mut(), address) as u16)
    }

    fn readl(&mut self, _m: &Machine, address: Address) -> Option<u32> {
        Some(timer_readl(&mut self.0.borrow_mut(), address))
    }

    fn writew(&mut self, _m: &Machine, w: u16, address: Address) -> bool {
        timer_writel(&mut self.0.borrow_mut(), u32::from(w), address);
        true
    }

    fn writel(&mut self, _m: &Machine, l: u32, address: Address) -> bool {
        timer_writel(&mut self.0.borrow_mut(), l, address);
        true
    }
}

struct TimerTick(Rc<RefCell<TimerState>>);

impl ClockTick for TimerTick {
    fn tick(&mut self, m: &Machine) {
        timer_tick(m, &mut self.0.borrow_mut());
    }
}

enum Edge {
    HblankStart,
    HblankEnd,
    VblankStart,
    VblankEnd,
    DotClk,
}

struct EdgeListener {
    state: Rc<RefCell<TimerState>>,
    edge: Edge,
}

impl EventListener for EdgeListener {
    fn fire(&mut self, m: &Machine) {
        let mut state = self.state.borrow_mut();
        match self.edge {
            Edge::HblankStart => hblank_start(m, &mut state),
            Edge::HblankEnd => hblank_end(&mut state),
            Edge::VblankStart => vblank_start(&mut state),
            Edge::VblankEnd => vblank_end(&mut state),
            Edge::DotClk => dot_clk(m, &mut state),
        }
    }
}

/// PSX timer block controller
pub struct PsxTimer {
    state: Rc<RefCell<TimerState>>,
    region: Option<RegionId>,
    listeners: Vec<EventListenerId>,
}

pub fn create() -> Box<dyn Controller> {
    Box::new(PsxTimer {
        state: Rc::new(RefCell::new(TimerState::new())),
        region: None,
        listeners: Vec::new(),
    })
}

impl Controller for PsxTimer {
    fn init(&mut self, m: &Machine, instance: &ControllerInstance) -> Result<()> {
        let area = Resource::find_mem(&instance.resources, "mem")?.clone();
        self.region = Some(m.memory().region_add(Region::new(
            area,
            Rc::new(RefCell::new(TimerPorts(self.state.clone()))),
        )));

        {
            let mut state = self.state.borrow_mut();
            state.channels[0].irq = Resource::find_irq(&instance.resources, "tmr0_irq")?;
            state.channels[1].irq = Resource::find_irq(&instance.resources, "tmr1_irq")?;
            state.channels[2].irq = Resource::find_irq(&instance.resources, "tmr2_irq")?;
        }

        let rate = Resource::find_clk(&instance.resources, "clk")?;
        m.clock_add(rate, Box::new(TimerTick(self.state.clone())));

        for (name, edge) in [
            ("hblank", Edge::HblankStart),
            ("hblank_end", Edge::HblankEnd),
            ("vblank", Edge::VblankStart),
            ("vblank_end", Edge::VblankEnd),
            ("dot", Edge::DotClk),
        ] {
            self.listeners.push(m.events().add(
                name,
                Rc::new(RefCell::new(EdgeListener {
                    state: self.state.clone(),
                    edge,
                })),
            ));
        }

        Ok(())
    }

    fn reset(&mut self, _m: &Machine) {
        let mut state = self.state.borrow_mut();
        for ch in state.channels.iter_mut() {
            let irq = ch.irq;
            *ch = Channel::default();
            ch.irq = irq;
        }
    }

    fn deinit(&mut self, m: &Machine) {
        if let Some(id) = self.region.take() {
            m.memory().region_remove(id);
        }
        for id in self.listeners.drain(..) {
            m.events().remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EmulatorConfig;
    use crate::core::controller::MachData;
    use crate::core::memory::BusId;

    const BUS: BusId = 0;
    const BASE: Address = 0x1F80_1100;

    fn setup() -> (Machine, PsxTimer) {
        let m = Machine::new(EmulatorConfig::default());
        m.memory().bus_add(BUS, 32);

        let mut timer = PsxTimer {
            state: Rc::new(RefCell::new(TimerState::new())),
            region: None,
            listeners: Vec::new(),
        };
        let instance = ControllerInstance {
            controller_name: "psx_timer",
            bus_id: BUS,
            resources: vec![
                Resource::mem("mem", BUS, BASE, BASE + 0x2F),
                Resource::irq("tmr0_irq", 4),
                Resource::irq("tmr1_irq", 5),
                Resource::irq("tmr2_irq", 6),
                Resource::clk("clk", 33_868_800),
            ],
            mach_data: MachData::None,
        };
        timer.init(&m, &instance).unwrap();
        timer.reset(&m);
        (m, timer)
    }

    #[test]
    fn test_mode_write_starts_counter() {
        let (m, timer) = setup();
        m.memory_writel(BUS, 0x0000, BASE + 4); // timer 0 mode, sync off
        assert!(timer.state.borrow().channels[0].running);
        assert_eq!(timer.state.borrow().channels[0].value, 0);

        timer_tick(&m, &mut timer.state.borrow_mut());
        assert_eq!(m.memory_readl(BUS, BASE), 1);
    }

    #[test]
    fn test_target_irq_and_reset() {
        let (m, timer) = setup();
        m.memory_writel(BUS, 3, BASE + 8); // timer 0 target
        // Reset on target, IRQ on target, repeat mode
        m.memory_writel(
            BUS,
            u32::from(MODE_RESET_ON_TARGET | MODE_IRQ_ON_TARGET | MODE_IRQ_REPEAT),
            BASE + 4,
        );

        for _ in 0..3 {
            timer_tick(&m, &mut timer.state.borrow_mut());
        }
        assert_ne!(m.take_pending_irqs() & (1 << 4), 0);

        // Reached-target bit visible once, cleared by the mode read
        let mode = m.memory_readl(BUS, BASE + 4);
        assert_ne!(mode as u16 & MODE_REACHED_TARGET, 0);
        let mode = m.memory_readl(BUS, BASE + 4);
        assert_eq!(mode as u16 & MODE_REACHED_TARGET, 0);

        // Counter wrapped through the target
        timer_tick(&m, &mut timer.state.borrow_mut());
        assert_eq!(m.memory_readl(BUS, BASE), 0);
    }

    #[test]
    fn test_one_shot_suppresses_second_irq() {
        let (m, timer) = setup();
        m.memory_writel(BUS, 1, BASE + 8);
        m.memory_writel(
            BUS,
            u32::from(MODE_RESET_ON_TARGET | MODE_IRQ_ON_TARGET),
            BASE + 4,
        );

        timer_tick(&m, &mut timer.state.borrow_mut());
        assert_ne!(m.take_pending_irqs() & (1 << 4), 0);

        for _ in 0..4 {
            timer_tick(&m, &mut timer.state.borrow_mut());
        }
        assert_eq!(m.pending_irqs() & (1 << 4), 0);
    }

    #[test]
    fn test_timer2_divide_by_eight() {
        let (m, timer) = setup();
        // Timer 2, clock source 2 (system clock / 8), sync off
        m.memory_writel(BUS, 2 << 8, BASE + 0x24);
        for _ in 0..16 {
            timer_tick(&m, &mut timer.state.borrow_mut());
        }
        assert_eq!(m.memory_readl(BUS, BASE + 0x20), 2);
    }

    #[test]
    fn test_hblank_sync_mode_reset() {
        let (m, timer) = setup();
        // Timer 0, sync enabled, mode 1 (reset at hblank)
        m.memory_writel(BUS, u32::from(MODE_SYNC_ENABLE) | (1 << 1), BASE + 4);
        for _ in 0..5 {
            timer_tick(&m, &mut timer.state.borrow_mut());
        }
        assert_eq!(timer.state.borrow().channels[0].value, 5);

        m.event_fire("hblank");
        assert_eq!(timer.state.borrow().channels[0].value, 0);
    }

    #[test]
    fn test_hblank_as_timer1_clock_source() {
        let (m, timer) = setup();
        // Timer 1, clock source 1 (hblank), sync off
        m.memory_writel(BUS, 1 << 8, BASE + 0x14);
        for _ in 0..7 {
            m.event_fire("hblank");
        }
        assert_eq!(timer.state.borrow().channels[1].value, 7);
        // The system clock does not tick it in this mode
        timer_tick(&m, &mut timer.state.borrow_mut());
        assert_eq!(timer.state.borrow().channels[1].value, 7);
    }
}
