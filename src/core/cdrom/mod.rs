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

//! PSX CD-ROM controller
//!
//! Four registers multiplex the whole interface through an index field:
//! command, parameter FIFO (16 bytes), response FIFO (16 bytes), data
//! FIFO (4 KB) fed from a 32 KB sector buffer, interrupt enable and the
//! interrupt flag register, which doubles as the acknowledge register
//! (acknowledging a response also resets the response FIFO, and a
//! dedicated bit resets the parameter FIFO).
//!
//! Commands complete asynchronously: a byte written to the command
//! register arms the engine, which burns a command-specific number of CPU
//! cycles (amortized into bounded `clock_consume` chunks so other clocks
//! keep interleaving) before queueing one or more response packets, each
//! tagged INT0..INT5. A pending unacknowledged interrupt holds back later
//! packets, exactly as guest drivers expect. The READ state keeps
//! delivering whole sectors from the disc source into the sector buffer
//! with INT1 until paused.
//!
//! MSF↔sector conversion (BCD on the wire), track lookup and raw sector
//! reads are delegated to the CD-ROM source frontend.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::core::clock::ClockTick;
use crate::core::controller::{Controller, ControllerInstance};
use crate::core::cpu::IrqLine;
use crate::core::error::Result;
use crate::core::fifo::Fifo;
use crate::core::machine::Machine;
use crate::core::memory::{Address, MemOps, Region, RegionId};
use crate::core::resource::Resource;
use crate::frontend::{CdReadMode, Msf};

const RESP_FIFO_SIZE: usize = 16;
const PARAM_FIFO_SIZE: usize = 16;
const DATA_FIFO_SIZE: usize = 4096;
const SRAM_SIZE: usize = 32 * 1024;

// Completion delays in CPU cycles
const CYCLES_1_DEF_NORMAL: u64 = 0x0000_C4E1;
const CYCLES_1_DEF_STOPPED: u64 = 0x0000_5CF4;
const CYCLES_1_INIT: u64 = 0x0001_3CCE;
const CYCLES_2_GETID: u64 = 0x0000_4A00;
const CYCLES_2_PAUSE_SINGLE: u64 = 0x0021_181C;
const CYCLES_2_PAUSE_DOUBLE: u64 = 0x0010_BD93;
const CYCLES_2_PAUSE_PAUSED: u64 = 0x0000_1DF2;
const CYCLES_2_STOP_SINGLE: u64 = 0x00D3_8ACA;
const CYCLES_2_STOP_DOUBLE: u64 = 0x018A_6076;
const CYCLES_READ_SINGLE: u64 = 0x0006_E1CD;
const CYCLES_READ_DOUBLE: u64 = 0x0003_6CD2;

// Largest cycle bite one tick takes; keeps other clocks interleaving
const TICK_CHUNK: u32 = 2048;

// Drive state bits (status byte bits 5-7)
const STATE_NORMAL: u8 = 0x00;
const STATE_READ: u8 = 0x01;
const STATE_SEEK: u8 = 0x02;
const STATE_PLAY: u8 = 0x04;

// Error codes (response byte 1 of INT5 packets)
const ERR_WRONG_NUM_PARAMS: u8 = 0x20;
const ERR_INVALID_CMD: u8 = 0x40;
const ERR_DRIVE_OPENED: u8 = 0x08;

// Status byte bits
const STAT_ERROR: u8 = 0x01;
const STAT_SPINDLE_MOTOR: u8 = 0x02;
const STAT_SHELL_OPEN: u8 = 0x10;

// Index/status register bits
const IDX_XA_FIFO_EMPTY: u8 = 0x04;
const IDX_PARAM_FIFO_EMPTY: u8 = 0x08; // 1 = empty
const IDX_PARAM_FIFO_FULL: u8 = 0x10; // 0 = full
const IDX_RESP_FIFO_EMPTY: u8 = 0x20; // 0 = empty
const IDX_DATA_FIFO_EMPTY: u8 = 0x40; // 0 = empty
const IDX_BUSY: u8 = 0x80;

// Mode register bits
const MODE_SECTOR_SIZE: u8 = 0x20;
const MODE_SPEED: u8 = 0x80;

const REGION_BYTE_US: u8 = 0x41;

fn from_bcd(v: u8) -> u8 {
    (v & 0x0F) + (v >> 4) * 10
}

fn to_bcd(v: u8) -> u8 {
    (v % 10) | ((v / 10) << 4)
}

/// One queued response packet
struct Response {
    int: u8,
    data: Vec<u8>,
    /// CPU cycles left before delivery
    cycles: u64,
}

struct CdromState {
    index: u8,
    index_status: u8,
    int_enable: u8,
    int_flag: u8,
    stat: u8,
    mode: u8,
    loc: u32,
    next_loc: u32,
    reading: bool,
    read_countdown: u64,
    pending_cmd: Option<u8>,
    responses: VecDeque<Response>,
    resp_fifo: Fifo<u8>,
    param_fifo: Fifo<u8>,
    data_fifo: Fifo<u8>,
    sram: Vec<u8>,
    sram_size: usize,
    region_byte: u8,
    irq: IrqLine,
}

impl CdromState {
    fn new() -> Self {
        Self {
            index: 0,
            index_status: IDX_PARAM_FIFO_EMPTY | IDX_PARAM_FIFO_FULL,
            int_enable: 0,
            int_flag: 0xE0,
            stat: 0,
            mode: 0,
            loc: 0,
            next_loc: 0,
            reading: false,
            read_countdown: 0,
            pending_cmd: None,
            responses: VecDeque::new(),
            resp_fifo: Fifo::with_capacity(RESP_FIFO_SIZE),
            param_fifo: Fifo::with_capacity(PARAM_FIFO_SIZE),
            data_fifo: Fifo::with_capacity(DATA_FIFO_SIZE),
            sram: vec![0; SRAM_SIZE],
            sram_size: 0,
            region_byte: REGION_BYTE_US,
            irq: 0,
        }
    }

    fn set_state_bits(&mut self, state: u8) {
        self.stat = (self.stat & 0x1F) | (state << 5);
    }

    fn double_speed(&self) -> bool {
        self.mode & MODE_SPEED != 0
    }

    fn read_mode(&self) -> CdReadMode {
        if self.mode & MODE_SECTOR_SIZE != 0 {
            CdReadMode::M1F2
        } else {
            CdReadMode::M1F1
        }
    }

    fn read_period(&self) -> u64 {
        if self.double_speed() {
            CYCLES_READ_DOUBLE
        } else {
            CYCLES_READ_SINGLE
        }
    }

    /// Whether an unacknowledged response interrupt is outstanding
    fn int_pending(&self) -> bool {
        self.int_flag & 0x07 != 0
    }

    // FIFO wrappers maintaining the status-register flags (the polarity
    // follows the register layout: 1 means "empty" for the parameter
    // FIFO but "has data" for the response and data FIFOs)

    fn resp_enqueue(&mut self, data: u8) {
        if !self.resp_fifo.enqueue(data) {
            log::warn!("could not enqueue response FIFO!");
        }
        self.index_status |= IDX_RESP_FIFO_EMPTY;
    }

    fn resp_dequeue(&mut self) -> u8 {
        let b = self.resp_fifo.dequeue();
        if b.is_none() {
            log::warn!("could not dequeue response FIFO!");
        }
        if self.resp_fifo.is_empty() {
            self.index_status &= !IDX_RESP_FIFO_EMPTY;
        }
        b.unwrap_or(0)
    }

    fn resp_reset(&mut self) {
        self.resp_fifo.reset();
        self.index_status &= !IDX_RESP_FIFO_EMPTY;
    }

    fn param_enqueue(&mut self, data: u8) {
        if !self.param_fifo.enqueue(data) {
            log::warn!("could not enqueue parameter FIFO!");
        }
        self.index_status &= !IDX_PARAM_FIFO_EMPTY;
        if self.param_fifo.is_full() {
            self.index_status &= !IDX_PARAM_FIFO_FULL;
        }
    }

    fn param_dequeue(&mut self) -> Option<u8> {
        let b = self.param_fifo.dequeue();
        if self.param_fifo.is_empty() {
            self.index_status |= IDX_PARAM_FIFO_EMPTY;
        }
        self.index_status |= IDX_PARAM_FIFO_FULL;
        b
    }

    fn param_reset(&mut self) {
        self.param_fifo.reset();
        self.index_status |= IDX_PARAM_FIFO_EMPTY | IDX_PARAM_FIFO_FULL;
    }

    fn data_enqueue(&mut self, data: u8) {
        if !self.data_fifo.enqueue(data) {
            log::warn!("could not enqueue data FIFO!");
        }
        self.index_status |= IDX_DATA_FIFO_EMPTY;
    }

    fn data_dequeue(&mut self) -> u8 {
        let b = self.data_fifo.dequeue();
        if b.is_none() {
            log::warn!("could not dequeue data FIFO!");
        }
        if self.data_fifo.is_empty() {
            self.index_status &= !IDX_DATA_FIFO_EMPTY;
        }
        b.unwrap_or(0)
    }

    fn data_reset(&mut self) {
        self.data_fifo.reset();
        self.index_status &= !IDX_DATA_FIFO_EMPTY;
    }

    /// Queue a response packet for delivery after `cycles`
    fn respond(&mut self, int: u8, data: Vec<u8>, cycles: u64) {
        self.responses.push_back(Response { int, data, cycles });
    }

    /// First-response delay for most commands
    fn default_delay(&self) -> u64 {
        if self.stat & STAT_SPINDLE_MOTOR != 0 {
            CYCLES_1_DEF_NORMAL
        } else {
            CYCLES_1_DEF_STOPPED
        }
    }
}

// ----------------------------------------------------------------------
// Command execution

fn execute_command(m: &Machine, state: &mut CdromState, code: u8) {
    log::trace!("CD-ROM command {code:#04x}");
    let delay = state.default_delay();

    match code {
        // GetStat
        0x01 => {
            let stat = state.stat;
            state.respond(3, vec![stat], delay);
            // Reading the status acknowledges a latched shell-open event
            state.stat &= !STAT_SHELL_OPEN;
        }
        // SetLoc (amm, ass, asect as BCD)
        0x02 => {
            let (Some(mm), Some(ss), Some(sect)) = (
                state.param_dequeue(),
                state.param_dequeue(),
                state.param_dequeue(),
            ) else {
                let stat = state.stat | STAT_ERROR;
                state.respond(5, vec![stat, ERR_WRONG_NUM_PARAMS], delay);
                return;
            };
            let msf = Msf {
                m: from_bcd(mm),
                s: from_bcd(ss),
                f: from_bcd(sect),
            };
            state.next_loc = m.cdrom_sector_from_msf(&msf);
            state.respond(3, vec![state.stat], delay);
        }
        // Play (audio tracks are acknowledged but not mixed)
        0x03 => {
            state.stat |= STAT_SPINDLE_MOTOR;
            state.set_state_bits(STATE_PLAY);
            state.respond(3, vec![state.stat], delay);
        }
        // ReadN / ReadS
        0x06 | 0x1B => {
            state.stat |= STAT_SPINDLE_MOTOR;
            state.loc = state.next_loc;
            state.set_state_bits(STATE_READ);
            state.reading = true;
            state.read_countdown = state.read_period();
            state.respond(3, vec![state.stat], delay);
        }
        // Stop
        0x08 => {
            let was_reading = state.reading;
            state.reading = false;
            state.set_state_bits(STATE_NORMAL);
            state.respond(3, vec![state.stat], delay);
            state.stat &= !STAT_SPINDLE_MOTOR;
            let second = if state.double_speed() {
                CYCLES_2_STOP_DOUBLE
            } else {
                CYCLES_2_STOP_SINGLE
            };
            let second = if was_reading { second } else { second / 2 };
            state.respond(2, vec![state.stat], second);
        }
        // Pause
        0x09 => {
            let was_reading = state.reading;
            state.respond(3, vec![state.stat], delay);
            state.reading = false;
            state.set_state_bits(STATE_NORMAL);
            let second = if !was_reading {
                CYCLES_2_PAUSE_PAUSED
            } else if state.double_speed() {
                CYCLES_2_PAUSE_DOUBLE
            } else {
                CYCLES_2_PAUSE_SINGLE
            };
            state.respond(2, vec![state.stat], second);
        }
        // Init
        0x0A => {
            state.respond(3, vec![state.stat], delay);
            state.mode = 0;
            state.reading = false;
            state.stat |= STAT_SPINDLE_MOTOR;
            state.set_state_bits(STATE_NORMAL);
            state.respond(2, vec![state.stat], CYCLES_1_INIT);
        }
        // Mute / Demute: no audio path, acknowledge only
        0x0B | 0x0C => {
            state.respond(3, vec![state.stat], delay);
        }
        // SetMode
        0x0E => {
            match state.param_dequeue() {
                Some(mode) => {
                    state.mode = mode;
                    state.respond(3, vec![state.stat], delay);
                }
                None => {
                    let stat = state.stat | STAT_ERROR;
                    state.respond(5, vec![stat, ERR_WRONG_NUM_PARAMS], delay);
                }
            };
        }
        // GetLocP: position as BCD (track, index, relative + absolute MSF)
        0x11 => {
            let msf = m.cdrom_msf_from_sector(state.loc);
            let track = to_bcd(m.cdrom_first_track());
            state.respond(
                3,
                vec![
                    track,
                    0x01,
                    to_bcd(msf.m),
                    to_bcd(msf.s),
                    to_bcd(msf.f),
                    to_bcd(msf.m),
                    to_bcd(msf.s),
                    to_bcd(msf.f),
                ],
                delay,
            );
        }
        // GetTN: first and last track as BCD
        0x13 => {
            let first = to_bcd(m.cdrom_first_track());
            let last = to_bcd(m.cdrom_last_track());
            state.respond(3, vec![state.stat, first, last], delay);
        }
        // GetTD: track start as BCD minute/second
        0x14 => {
            let track = state.param_dequeue().map(from_bcd).unwrap_or(0);
            let msf = m.cdrom_msf_from_track(track);
            state.respond(3, vec![state.stat, to_bcd(msf.m), to_bcd(msf.s)], delay);
        }
        // SeekL / SeekP
        0x15 | 0x16 => {
            state.stat |= STAT_SPINDLE_MOTOR;
            state.set_state_bits(STATE_SEEK);
            state.respond(3, vec![state.stat], delay);
            state.loc = state.next_loc;
            state.set_state_bits(STATE_NORMAL);
            state.respond(2, vec![state.stat], delay * 2);
        }
        // Test: only the BIOS version sub-function is meaningful here
        0x19 => {
            match state.param_dequeue() {
                Some(0x20) => state.respond(3, vec![0x94, 0x09, 0x19, 0xC0], delay),
                sub => {
                    log::debug!("unhandled CD-ROM test sub-function {sub:?}");
                    let stat = state.stat | STAT_ERROR;
                    state.respond(5, vec![stat, ERR_INVALID_CMD], delay);
                }
            };
        }
        // GetID
        0x1A => {
            state.respond(3, vec![state.stat], delay);
            if m.cdrom_present() {
                let region = state.region_byte;
                state.respond(
                    2,
                    vec![0x02, 0x00, 0x20, 0x00, b'S', b'C', b'E', region],
                    CYCLES_2_GETID,
                );
            } else {
                state.respond(
                    5,
                    vec![ERR_DRIVE_OPENED, 0x40, 0, 0, 0, 0, 0, 0],
                    CYCLES_2_GETID,
                );
            }
        }
        _ => {
            log::warn!("invalid CD-ROM command {code:#04x}");
            let stat = state.stat | STAT_ERROR;
            state.respond(5, vec![stat, ERR_INVALID_CMD], state.default_delay());
        }
    }

    // Leftover parameters do not carry over to the next command
    state.param_reset();
}

/// Move a due response packet into the response FIFO and raise the IRQ
fn deliver_response(m: &Machine, state: &mut CdromState) {
    let Some(response) = state.responses.pop_front() else {
        return;
    };

    state.resp_reset();
    for b in &response.data {
        state.resp_enqueue(*b);
    }
    state.int_flag = (state.int_flag & !0x07) | (response.int & 0x07);
    state.index_status &= !IDX_BUSY;

    if response.int > 0 && state.int_enable & (1 << (response.int - 1)) != 0 {
        m.cpu_interrupt(state.irq);
    }
}

/// Read the next sector into the sector buffer and queue INT1
fn deliver_sector(m: &Machine, state: &mut CdromState) {
    let mode = state.read_mode();
    let size = mode.sector_size().min(SRAM_SIZE);
    let loc = state.loc;
    let ok = {
        let sram = &mut state.sram[..size];
        m.cdrom_read_sector(sram, loc, mode)
    };
    if ok {
        state.sram_size = size;
        state.loc += 1;
        state.respond(1, vec![state.stat], 0);
    } else {
        // Ran off the disc: fault the read like a seek error
        state.reading = false;
        state.set_state_bits(STATE_NORMAL);
        let stat = state.stat | STAT_ERROR;
        state.respond(5, vec![stat, 0x04], 0);
    }
}

/// Advance the engine by `cycles` CPU cycles
fn advance(m: &Machine, state: &mut CdromState, cycles: u64) {
    // Start a freshly written command
    if let Some(code) = state.pending_cmd.take() {
        execute_command(m, state, code);
    }

    // Deliver the head response once its delay has elapsed, but only
    // when the previous interrupt has been acknowledged.
    if let Some(head) = state.responses.front_mut() {
        head.cycles = head.cycles.saturating_sub(cycles);
        if head.cycles == 0 && !state.int_pending() {
            deliver_response(m, state);
        }
    }

    // Sector pacing in READ state
    if state.reading {
        state.read_countdown = state.read_countdown.saturating_sub(cycles);
        if state.read_countdown == 0 {
            state.read_countdown = state.read_period();
            deliver_sector(m, state);
        }
    }

    // A level-pending, enabled interrupt keeps the line asserted
    let int = state.int_flag & 0x07;
    if int != 0 && state.int_enable & (1 << (int - 1)) != 0 {
        m.cpu_interrupt(state.irq);
    }
}

// ----------------------------------------------------------------------
// Register file

fn cdrom_readb(state: &mut CdromState, address: Address) -> u8 {
    // Registers 1-3 bank on the index field
    let reg = if address == 0 {
        0
    } else {
        address + u32::from(state.index) * 4
    };

    match reg {
        0 => (state.index_status & !0x03) | state.index,
        // Response FIFO (all banks of register 1)
        1 | 5 | 9 | 13 => state.resp_dequeue(),
        // Interrupt enable mirrors
        3 | 11 => state.int_enable | 0xE0,
        // Interrupt flag
        7 | 15 => state.int_flag | 0xE0,
        // Data FIFO
        _ => state.data_dequeue(),
    }
}

fn cdrom_writeb(state: &mut CdromState, b: u8, address: Address) {
    let reg = if address == 0 {
        0
    } else {
        address + u32::from(state.index) * 4
    };

    match reg {
        // Index select
        0 => state.index = b & 0x03,
        // Command
        1 => {
            state.index_status |= IDX_BUSY;
            state.pending_cmd = Some(b);
        }
        // Parameter FIFO
        2 => state.param_enqueue(b),
        // Request register
        3 => {
            if b & 0x80 != 0 {
                // Want data: move the sector buffer into the data FIFO
                for i in 0..state.sram_size {
                    let byte = state.sram[i];
                    state.data_enqueue(byte);
                }
                state.sram_size = 0;
            } else {
                state.data_reset();
            }
        }
        // Interrupt enable
        6 => state.int_enable = b & 0x1F,
        // Interrupt flag / acknowledge
        7 => {
            if b & 0x40 != 0 {
                state.param_reset();
            }
            let ack = b & 0x07;
            state.int_flag &= !(ack & 0x07);
            if ack != 0 {
                state.resp_reset();
            }
        }
        // Sound map and volume registers are accepted and ignored
        _ => log::trace!("CD-ROM write {b:#04x} to banked register {reg}"),
    }
}

// ----------------------------------------------------------------------
// Fabric glue

struct CdromPorts(Rc<RefCell<CdromState>>);

impl MemOps for CdromPorts {
    fn readb(&mut self, _m: &Machine, address: Address) -> Option<u8> {
        Some(cdrom_readb(&mut self.0.borrow_mut(), address))
    }

    fn writeb(&mut self, _m: &Machine, b: u8, address: Address) -> bool {
        cdrom_writeb(&mut self.0.borrow_mut(), b, address);
        true
    }
}

struct CdromTick(Rc<RefCell<CdromState>>);

impl ClockTick for CdromTick {
    fn tick(&mut self, m: &Machine) {
        let step = {
            let state = self.0.borrow();
            let mut step = u64::from(TICK_CHUNK);
            if let Some(head) = state.responses.front() {
                if head.cycles > 0 {
                    step = step.min(head.cycles);
                }
            }
            if state.reading && state.read_countdown > 0 {
                step = step.min(state.read_countdown);
            }
            step.max(1)
        };
        advance(m, &mut self.0.borrow_mut(), step);
        m.clock_consume(step as u32);
    }
}

/// PSX CD-ROM controller
pub struct Cdrom {
    state: Rc<RefCell<CdromState>>,
    region: Option<RegionId>,
}

pub fn create() -> Box<dyn Controller> {
    Box::new(Cdrom {
        state: Rc::new(RefCell::new(CdromState::new())),
        region: None,
    })
}

impl Controller for Cdrom {
    fn init(&mut self, m: &Machine, instance: &ControllerInstance) -> Result<()> {
        let area = Resource::find_mem(&instance.resources, "mem")?.clone();
        self.region = Some(m.memory().region_add(Region::new(
            area,
            Rc::new(RefCell::new(CdromPorts(self.state.clone()))),
        )));

        self.state.borrow_mut().irq = Resource::find_irq(&instance.resources, "irq")?;

        let rate = Resource::find_clk(&instance.resources, "clk")?;
        m.clock_add(rate, Box::new(CdromTick(self.state.clone())));

        // Attach the disc source when a data image is configured; an
        // empty drive is perfectly valid.
        if let Ok(path) = m.config().cart_path() {
            if let Err(e) = m.cdrom_init(path) {
                log::warn!("no disc attached: {e}");
            }
        }

        Ok(())
    }

    fn reset(&mut self, m: &Machine) {
        let mut state = self.state.borrow_mut();
        let irq = state.irq;
        *state = CdromState::new();
        state.irq = irq;
        state.stat = STAT_SPINDLE_MOTOR;
        if !m.cdrom_present() {
            state.stat |= STAT_SHELL_OPEN;
        }
    }

    fn deinit(&mut self, m: &Machine) {
        if let Some(id) = self.region.take() {
            m.memory().region_remove(id);
        }
    }
}
