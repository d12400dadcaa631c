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

//! Scheduler and clock model
//!
//! Every component that does work over time registers a [`Clock`] with its
//! nominal rate. The scheduler derives a single *machine rate* `M` as the
//! LCM of all registered rates and assigns each clock an integer divider
//! `div = M / rate`. A clock consumes `n` cycles of its own time by adding
//! `n × div` machine cycles to its remaining-cycle count.
//!
//! Per iteration the scheduler ticks every enabled clock that has no
//! remaining cycles (in insertion order), then advances virtual time by
//! the minimum remaining count across enabled clocks. A callback that
//! returns without calling [`Machine::clock_consume`] is a progress
//! violation: it is logged and counted, never fatal.
//!
//! Pacing to wall time is best effort (sleep when virtual time runs ahead
//! of real time, re-anchoring once per emulated second) and never alters
//! simulated timing.
//!
//! [`Machine::clock_consume`]: crate::core::machine::Machine::clock_consume

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::core::machine::Machine;

const NS_PER_SEC: u128 = 1_000_000_000;

/// Per-tick callback of a clock
pub trait ClockTick {
    /// Advance the component owning this clock
    ///
    /// Must call `m.clock_consume(n)` with `n >= 1` before returning.
    fn tick(&mut self, m: &Machine);
}

/// A registered clock
///
/// Shared between the scheduler and the owning component (which may need
/// to enable/disable it or reset its divider, e.g. the APU frame
/// sequencer register write).
pub struct Clock {
    rate: u64,
    div: Cell<u64>,
    num_remaining_cycles: Cell<u64>,
    enabled: Cell<bool>,
    tick: RefCell<Box<dyn ClockTick>>,
}

impl Clock {
    /// Nominal rate in Hz
    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Machine cycles per own cycle (assigned by the scheduler)
    pub fn div(&self) -> u64 {
        self.div.get()
    }

    /// Machine cycles left before the next tick
    pub fn remaining(&self) -> u64 {
        self.num_remaining_cycles.get()
    }

    /// Whether the scheduler advances this clock
    pub fn enabled(&self) -> bool {
        self.enabled.get()
    }

    /// Enable or disable this clock
    ///
    /// Disabling from inside the clock's own tick takes effect at the next
    /// scheduler iteration.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    /// Drop all pending cycles so the clock ticks on the next iteration
    ///
    /// Used by components whose divider is reset by a register write.
    pub fn clear_remaining(&self) {
        self.num_remaining_cycles.set(0);
    }
}

/// Greatest common divisor
pub fn gcd(a: u64, b: u64) -> u64 {
    let (mut a, mut b) = (a, b);
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Least common multiple
///
/// Computed through a u128 intermediate so that combining video and CPU
/// crystal rates cannot overflow.
pub fn lcm(a: u64, b: u64) -> u64 {
    if a == 0 || b == 0 {
        return 0;
    }
    let g = gcd(a, b);
    let wide = (a / g) as u128 * b as u128;
    debug_assert!(wide <= u64::MAX as u128, "machine rate overflow");
    wide as u64
}

/// The cooperative scheduler
///
/// Owned by [`Machine`]; single-threaded. The currently-ticking clock is
/// tracked around each callback invocation so that `clock_consume` knows
/// which clock to bill.
pub struct Scheduler {
    clocks: RefCell<Vec<Rc<Clock>>>,
    machine_rate: Cell<u64>,
    current: RefCell<Option<Rc<Clock>>>,
    consumed_in_tick: Cell<bool>,
    current_cycle: Cell<u64>,
    anchor: RefCell<Instant>,
    progress_violations: Cell<u64>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            clocks: RefCell::new(Vec::new()),
            machine_rate: Cell::new(0),
            current: RefCell::new(None),
            consumed_in_tick: Cell::new(false),
            current_cycle: Cell::new(0),
            anchor: RefCell::new(Instant::now()),
            progress_violations: Cell::new(0),
        }
    }

    /// Register a clock and rederive the machine rate
    ///
    /// Updates the divider of every registered clock so that
    /// `rate × div == machine_rate` holds for all of them, regardless of
    /// registration order.
    pub fn add(&self, rate: u64, tick: Box<dyn ClockTick>) -> Rc<Clock> {
        assert!(rate > 0, "clock rate must be non-zero");

        let clock = Rc::new(Clock {
            rate,
            div: Cell::new(1),
            num_remaining_cycles: Cell::new(0),
            enabled: Cell::new(true),
            tick: RefCell::new(tick),
        });

        let mut clocks = self.clocks.borrow_mut();
        clocks.push(clock.clone());

        // Update machine rate and clock dividers
        let machine_rate = clocks.iter().fold(1, |acc, c| lcm(acc, c.rate));
        self.machine_rate.set(machine_rate);
        for c in clocks.iter() {
            c.div.set(machine_rate / c.rate);
        }

        log::debug!(
            "clock added ({} Hz), machine rate is now {} Hz",
            rate,
            machine_rate
        );

        clock
    }

    /// Current machine rate in Hz (0 when no clock is registered)
    pub fn machine_rate(&self) -> u64 {
        self.machine_rate.get()
    }

    /// Number of registered clocks
    pub fn len(&self) -> usize {
        self.clocks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.borrow().is_empty()
    }

    /// Progress violations observed so far (ticks that consumed nothing)
    pub fn progress_violations(&self) -> u64 {
        self.progress_violations.get()
    }

    /// Virtual machine cycle count within the current second
    pub fn current_cycle(&self) -> u64 {
        self.current_cycle.get()
    }

    /// Bill `num_cycles` of the currently-ticking clock's own time
    pub fn consume(&self, num_cycles: u32) {
        match self.current.borrow().as_ref() {
            Some(clock) => {
                let cycles = u64::from(num_cycles) * clock.div.get();
                clock
                    .num_remaining_cycles
                    .set(clock.num_remaining_cycles.get() + cycles);
                self.consumed_in_tick.set(true);
            }
            None => log::error!("clock_consume called outside of a tick callback"),
        }
    }

    /// Reset virtual time and the pacing anchor
    pub fn reset(&self) {
        self.current_cycle.set(0);
        *self.anchor.borrow_mut() = Instant::now();
    }

    /// Run one scheduler iteration
    ///
    /// Ticks due clocks in insertion order, advances virtual time by the
    /// minimum remaining count, and optionally sleeps to match wall time.
    /// Tolerates an empty or fully-disabled clock set (the iteration is a
    /// no-op, letting the caller's loop idle).
    pub fn tick_all(&self, m: &Machine, pace: bool) {
        let clocks: Vec<Rc<Clock>> = self.clocks.borrow().clone();

        for clock in &clocks {
            if !clock.enabled.get() || clock.num_remaining_cycles.get() != 0 {
                continue;
            }

            *self.current.borrow_mut() = Some(clock.clone());
            self.consumed_in_tick.set(false);
            clock.tick.borrow_mut().tick(m);
            if !self.consumed_in_tick.get() {
                self.progress_violations
                    .set(self.progress_violations.get() + 1);
                log::warn!("clock action should consume cycles!");
            }
        }

        // No clock is being ticked anymore
        *self.current.borrow_mut() = None;

        // Find minimum number of remaining cycles among enabled clocks
        let step = clocks
            .iter()
            .filter(|c| c.enabled.get())
            .map(|c| c.num_remaining_cycles.get())
            .min();
        let Some(mut step) = step else {
            return;
        };

        // A zero step means some tick made no progress; force one machine
        // cycle so a buggy peripheral cannot wedge the loop.
        if step == 0 {
            self.progress_violations
                .set(self.progress_violations.get() + 1);
            log::warn!("scheduler iteration made no progress");
            step = 1;
        }

        self.current_cycle.set(self.current_cycle.get() + step);
        for clock in &clocks {
            if clock.enabled.get() {
                let remaining = clock.num_remaining_cycles.get();
                clock.num_remaining_cycles.set(remaining.saturating_sub(step));
            }
        }

        if pace {
            self.pace();
        }

        // Re-anchor once per emulated second
        let machine_rate = self.machine_rate.get();
        if machine_rate != 0 && self.current_cycle.get() >= machine_rate {
            self.current_cycle
                .set(self.current_cycle.get() - machine_rate);
            if pace {
                *self.anchor.borrow_mut() = Instant::now();
            }
        }
    }

    /// Sleep off any lead of virtual time over wall time
    fn pace(&self) {
        let machine_rate = self.machine_rate.get();
        if machine_rate == 0 {
            return;
        }

        let virtual_ns = self.current_cycle.get() as u128 * NS_PER_SEC / machine_rate as u128;
        let real_ns = self.anchor.borrow().elapsed().as_nanos();
        if virtual_ns > real_ns {
            std::thread::sleep(Duration::from_nanos((virtual_ns - real_ns) as u64));
        }
    }

    /// Drop every registered clock
    pub fn remove_all(&self) {
        self.clocks.borrow_mut().clear();
        self.machine_rate.set(0);
        *self.current.borrow_mut() = None;
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EmulatorConfig;
    use proptest::prelude::*;

    struct Consume(u32);

    impl ClockTick for Consume {
        fn tick(&mut self, m: &Machine) {
            m.clock_consume(self.0);
        }
    }

    struct Forgetful;

    impl ClockTick for Forgetful {
        fn tick(&mut self, _m: &Machine) {}
    }

    fn machine() -> Machine {
        Machine::new(EmulatorConfig::default())
    }

    #[test]
    fn test_gcd_lcm() {
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(lcm(4, 6), 12);
        assert_eq!(lcm(1, 7), 7);
    }

    #[test]
    fn test_single_clock_machine_rate() {
        let m = machine();
        let clock = m.clock_add(840, Box::new(Consume(1)));
        assert_eq!(m.scheduler().machine_rate(), 840);
        assert_eq!(clock.div(), 1);
    }

    #[test]
    fn test_divider_assignment() {
        let m = machine();
        let a = m.clock_add(60, Box::new(Consume(1)));
        let b = m.clock_add(840, Box::new(Consume(1)));
        let rate = m.scheduler().machine_rate();
        assert_eq!(rate, 840);
        assert_eq!(a.div(), 14);
        assert_eq!(b.div(), 1);
        // rate × div identical for all clocks
        assert_eq!(a.rate() * a.div(), b.rate() * b.div());
    }

    #[test]
    fn test_tick_consume_accounting() {
        let m = machine();
        let clock = m.clock_add(100, Box::new(Consume(3)));
        m.scheduler().tick_all(&m, false);
        // 3 own cycles consumed, 3 machine cycles stepped off immediately
        // (single clock, div 1, min remaining equals own consumption).
        assert_eq!(clock.remaining(), 0);
        assert_eq!(m.scheduler().current_cycle(), 3);
    }

    #[test]
    fn test_two_clock_interleaving() {
        let m = machine();
        let slow = m.clock_add(10, Box::new(Consume(1)));
        let fast = m.clock_add(100, Box::new(Consume(1)));
        // slow div = 10, fast div = 1; one iteration ticks both, steps by 1
        m.scheduler().tick_all(&m, false);
        assert_eq!(slow.remaining(), 9);
        assert_eq!(fast.remaining(), 0);
        assert_eq!(m.scheduler().current_cycle(), 1);
    }

    #[test]
    fn test_progress_violation_counted() {
        let m = machine();
        let _clock = m.clock_add(100, Box::new(Forgetful));
        m.scheduler().tick_all(&m, false);
        assert!(m.scheduler().progress_violations() > 0);
        // The forced step still advanced virtual time.
        assert_eq!(m.scheduler().current_cycle(), 1);
    }

    #[test]
    fn test_virtual_time_strictly_increases() {
        let m = machine();
        m.clock_add(100, Box::new(Consume(2)));
        let mut last = 0;
        for _ in 0..10 {
            m.scheduler().tick_all(&m, false);
            let now = m.scheduler().current_cycle();
            assert!(now > last);
            last = now;
        }
    }

    #[test]
    fn test_idles_with_no_clocks() {
        let m = machine();
        // Must not panic or spin forever with nothing registered.
        m.scheduler().tick_all(&m, false);
        assert_eq!(m.scheduler().current_cycle(), 0);
    }

    #[test]
    fn test_disabled_clock_ignored() {
        let m = machine();
        let clock = m.clock_add(100, Box::new(Consume(1)));
        clock.set_enabled(false);
        m.scheduler().tick_all(&m, false);
        assert_eq!(m.scheduler().current_cycle(), 0);
    }

    #[test]
    fn test_clear_remaining_forces_tick() {
        let m = machine();
        let clock = m.clock_add(100, Box::new(Consume(5)));
        m.scheduler().tick_all(&m, false);
        // Mid-wait the owner resets the divider (e.g. $4017 write).
        clock.num_remaining_cycles.set(3);
        clock.clear_remaining();
        assert_eq!(clock.remaining(), 0);
    }

    #[test]
    fn test_lap_wraps_cycle_counter() {
        let m = machine();
        m.clock_add(4, Box::new(Consume(4)));
        // machine rate 4; one iteration consumes a full second
        m.scheduler().tick_all(&m, false);
        assert_eq!(m.scheduler().current_cycle(), 0);
    }

    proptest! {
        #[test]
        fn prop_lcm_derivation_order_independent(
            mut rates in proptest::collection::vec(1u64..10_000, 2..5)
        ) {
            let m1 = machine();
            for &r in &rates {
                m1.clock_add(r, Box::new(Consume(1)));
            }
            let rate1 = m1.scheduler().machine_rate();

            rates.reverse();
            let m2 = machine();
            let mut products = Vec::new();
            for &r in &rates {
                let c = m2.clock_add(r, Box::new(Consume(1)));
                products.push((r, c));
            }
            let rate2 = m2.scheduler().machine_rate();

            prop_assert_eq!(rate1, rate2);
            for (r, c) in products {
                prop_assert_eq!(r * c.div(), rate2);
            }
        }
    }
}
