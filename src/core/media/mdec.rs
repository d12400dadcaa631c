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

//! PSX MDEC (macroblock decoder)
//!
//! Command words and parameters flow into a 32-word input FIFO (either
//! through the command register or DMA channel 0); decoded output leaves
//! through the output FIFO and DMA channel 1. The quant/scale table
//! uploads drain their parameter words once enough have accumulated; the
//! macroblock decode command body is a stub, matching the source design
//! the spec was distilled from.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::controller::{Controller, ControllerInstance};
use crate::core::dma::{DmaChannelRef, DmaOps};
use crate::core::error::Result;
use crate::core::fifo::Fifo;
use crate::core::machine::Machine;
use crate::core::memory::{Address, MemOps, Region, RegionId};
use crate::core::resource::Resource;

const COMMAND: Address = 0;
const RESPONSE: Address = 0;
const STATUS: Address = 4;
const CONTROL: Address = 4;

const FIFO_SIZE: usize = 32;
const LUM_IQTAB_SIZE: usize = 64;
const COL_IQTAB_SIZE: usize = 64;
const SCALE_TAB_SIZE: usize = 64;

// Status register bits
const STAT_BLOCK_SHIFT: u32 = 16;
const STAT_DATA_OUT_REQ: u32 = 1 << 27;
const STAT_DATA_IN_REQ: u32 = 1 << 28;
const STAT_CMD_BUSY: u32 = 1 << 29;
const STAT_DATA_IN_FULL: u32 = 1 << 30;
const STAT_DATA_OUT_EMPTY: u32 = 1 << 31;
const BLOCK_Y: u32 = 4;

// Control register bits
const CTRL_EN_DATA_OUT_REQ: u32 = 1 << 29;
const CTRL_EN_DATA_IN_REQ: u32 = 1 << 30;
const CTRL_RESET: u32 = 1 << 31;

struct MdecState {
    stat: u32,
    ctrl: u32,
    cmd: u32,
    lum_iqtab: [u8; LUM_IQTAB_SIZE],
    col_iqtab: [u8; COL_IQTAB_SIZE],
    scale_tab: [i16; SCALE_TAB_SIZE],
    fifo_in: Fifo<u32>,
    fifo_out: Fifo<u32>,
}

impl MdecState {
    fn new() -> Self {
        Self {
            stat: STAT_DATA_OUT_EMPTY | (BLOCK_Y << STAT_BLOCK_SHIFT),
            ctrl: 0,
            cmd: 0,
            lum_iqtab: [0; LUM_IQTAB_SIZE],
            col_iqtab: [0; COL_IQTAB_SIZE],
            scale_tab: [0; SCALE_TAB_SIZE],
            fifo_in: Fifo::with_capacity(FIFO_SIZE),
            fifo_out: Fifo::with_capacity(FIFO_SIZE),
        }
    }

    fn cmd_code(&self) -> u32 {
        self.cmd >> 29
    }

    fn cmd_busy(&self) -> bool {
        self.stat & STAT_CMD_BUSY != 0
    }

    /// Copy command bits 25-28 to status bits 23-26 and flag busy
    fn start_command(&mut self) {
        if !self.cmd_busy() {
            self.stat = (self.stat & !(0x0F << 23)) | (((self.cmd >> 25) & 0x0F) << 23);
            self.stat |= STAT_CMD_BUSY;
        }
    }

    fn update_requests(&mut self) {
        // Data-in request: DMA0 enabled and room to receive
        self.stat &= !(STAT_DATA_IN_REQ | STAT_DATA_OUT_REQ);
        if self.ctrl & CTRL_EN_DATA_IN_REQ != 0 && !self.fifo_in.is_full() {
            self.stat |= STAT_DATA_IN_REQ;
        }
        // Data-out request: DMA1 enabled and data to send
        if self.ctrl & CTRL_EN_DATA_OUT_REQ != 0 && !self.fifo_out.is_empty() {
            self.stat |= STAT_DATA_OUT_REQ;
        }
        if self.fifo_in.is_full() {
            self.stat |= STAT_DATA_IN_FULL;
        } else {
            self.stat &= !STAT_DATA_IN_FULL;
        }
        if self.fifo_out.is_empty() {
            self.stat |= STAT_DATA_OUT_EMPTY;
        } else {
            self.stat &= !STAT_DATA_OUT_EMPTY;
        }
    }
}

/// MDEC(0): no function: command bits reflect into status
fn cmd_no_function(state: &mut MdecState) {
    state.stat = (state.stat & !0xFFFF) | (state.cmd & 0xFFFF);
    state.stat = (state.stat & !(0x0F << 23)) | (((state.cmd >> 25) & 0x0F) << 23);
}

/// MDEC(1): decode macroblock(s): stub
fn cmd_decode_macroblock(state: &mut MdecState) {
    log::debug!(
        "macroblock decode requested ({} parameter words)",
        state.cmd & 0xFFFF
    );
}

/// MDEC(2): set quant tables (64 luminance bytes, optionally 64 color)
fn cmd_set_iqtab(state: &mut MdecState) {
    state.start_command();

    let color = state.cmd & 0x01 != 0;
    let num_bytes = LUM_IQTAB_SIZE + if color { COL_IQTAB_SIZE } else { 0 };
    if state.fifo_in.len() < num_bytes / 4 {
        return;
    }

    for i in 0..LUM_IQTAB_SIZE / 4 {
        let l = state.fifo_in.dequeue().unwrap_or(0);
        for j in 0..4 {
            state.lum_iqtab[i * 4 + j] = (l >> (j * 8)) as u8;
        }
    }
    if color {
        for i in 0..COL_IQTAB_SIZE / 4 {
            let l = state.fifo_in.dequeue().unwrap_or(0);
            for j in 0..4 {
                state.col_iqtab[i * 4 + j] = (l >> (j * 8)) as u8;
            }
        }
    }

    state.stat &= !STAT_CMD_BUSY;
}

/// MDEC(3): set scale table (64 signed half-words)
fn cmd_set_scale(state: &mut MdecState) {
    state.start_command();

    if state.fifo_in.len() < SCALE_TAB_SIZE / 2 {
        return;
    }

    for i in 0..SCALE_TAB_SIZE / 2 {
        let l = state.fifo_in.dequeue().unwrap_or(0);
        state.scale_tab[i * 2] = l as u16 as i16;
        state.scale_tab[i * 2 + 1] = (l >> 16) as u16 as i16;
    }

    state.stat &= !STAT_CMD_BUSY;
}

fn process_cmd(state: &mut MdecState) {
    // The first queued word of an idle engine becomes the command word
    if !state.cmd_busy() {
        let Some(cmd) = state.fifo_in.dequeue() else {
            return;
        };
        state.cmd = cmd;
    }

    match state.cmd_code() {
        1 => cmd_decode_macroblock(state),
        2 => cmd_set_iqtab(state),
        3 => cmd_set_scale(state),
        _ => cmd_no_function(state),
    }
}

fn mdec_readl(state: &mut MdecState, address: Address) -> u32 {
    match address {
        RESPONSE => {
            let l = state.fifo_out.dequeue().unwrap_or(0);
            state.update_requests();
            l
        }
        STATUS => state.stat,
        _ => 0,
    }
}

fn mdec_writel(state: &mut MdecState, l: u32, address: Address) {
    match address {
        COMMAND => {
            if !state.fifo_in.enqueue(l) {
                log::warn!("could not enqueue MDEC input FIFO!");
            }
            process_cmd(state);
            state.update_requests();
        }
        CONTROL => {
            state.ctrl = l;
            if state.ctrl & CTRL_RESET != 0 {
                state.stat = STAT_DATA_OUT_EMPTY | (BLOCK_Y << STAT_BLOCK_SHIFT);
                state.ctrl = 0;
                state.fifo_in.reset();
                state.fifo_out.reset();
            }
            state.update_requests();
        }
        _ => {}
    }
}

// ----------------------------------------------------------------------
// Fabric glue

struct MdecPorts(Rc<RefCell<MdecState>>);

impl MemOps for MdecPorts {
    fn readl(&mut self, _m: &Machine, address: Address) -> Option<u32> {
        Some(mdec_readl(&mut self.0.borrow_mut(), address))
    }

    fn writel(&mut self, _m: &Machine, l: u32, address: Address) -> bool {
        mdec_writel(&mut self.0.borrow_mut(), l, address);
        true
    }
}

struct MdecDmaIn(Rc<RefCell<MdecState>>);

impl DmaOps for MdecDmaIn {
    fn writel(&mut self, m: &Machine, l: u32) -> bool {
        // 1 clk per word
        m.clock_consume(1);
        let mut state = self.0.borrow_mut();
        if state.ctrl & CTRL_EN_DATA_IN_REQ == 0 {
            return true;
        }
        mdec_writel(&mut state, l, COMMAND);
        true
    }
}

struct MdecDmaOut(Rc<RefCell<MdecState>>);

impl DmaOps for MdecDmaOut {
    fn readl(&mut self, m: &Machine) -> Option<u32> {
        // 1 clk per word
        m.clock_consume(1);
        let mut state = self.0.borrow_mut();
        if state.ctrl & CTRL_EN_DATA_OUT_REQ == 0 {
            return Some(0);
        }
        Some(mdec_readl(&mut state, RESPONSE))
    }
}

/// PSX MDEC controller
pub struct Mdec {
    state: Rc<RefCell<MdecState>>,
    region: Option<RegionId>,
    dma_in: Option<DmaChannelRef>,
    dma_out: Option<DmaChannelRef>,
}

pub fn create() -> Box<dyn Controller> {
    Box::new(Mdec {
        state: Rc::new(RefCell::new(MdecState::new())),
        region: None,
        dma_in: None,
        dma_out: None,
    })
}

impl Controller for Mdec {
    fn init(&mut self, m: &Machine, instance: &ControllerInstance) -> Result<()> {
        let area = Resource::find_mem(&instance.resources, "mem")?.clone();
        self.region = Some(m.memory().region_add(Region::new(
            area,
            Rc::new(RefCell::new(MdecPorts(self.state.clone()))),
        )));

        let ch_in = Resource::find_dma(&instance.resources, "dma_in")?;
        self.dma_in = Some(
            m.dma()
                .add(ch_in, Rc::new(RefCell::new(MdecDmaIn(self.state.clone())))),
        );

        let ch_out = Resource::find_dma(&instance.resources, "dma_out")?;
        self.dma_out = Some(
            m.dma()
                .add(ch_out, Rc::new(RefCell::new(MdecDmaOut(self.state.clone())))),
        );

        Ok(())
    }

    fn reset(&mut self, _m: &Machine) {
        *self.state.borrow_mut() = MdecState::new();
    }

    fn deinit(&mut self, m: &Machine) {
        if let Some(id) = self.region.take() {
            m.memory().region_remove(id);
        }
        if let Some(id) = self.dma_in.take() {
            m.dma().remove(id);
        }
        if let Some(id) = self.dma_out.take() {
            m.dma().remove(id);
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
    const BASE: Address = 0x1F80_1820;

    fn setup() -> (Machine, Mdec) {
        let m = Machine::new(EmulatorConfig::default());
        m.memory().bus_add(BUS, 32);

        let mut mdec = Mdec {
            state: Rc::new(RefCell::new(MdecState::new())),
            region: None,
            dma_in: None,
            dma_out: None,
        };
        let instance = ControllerInstance {
            controller_name: "mdec",
            bus_id: BUS,
            resources: vec![
                Resource::mem("mem", BUS, BASE, BASE + 7),
                Resource::dma("dma_in", 0),
                Resource::dma("dma_out", 1),
            ],
            mach_data: MachData::None,
        };
        mdec.init(&m, &instance).unwrap();
        (m, mdec)
    }

    #[test]
    fn test_status_after_reset() {
        let (m, _mdec) = setup();
        let stat = m.memory_readl(BUS, BASE + STATUS);
        assert_ne!(stat & STAT_DATA_OUT_EMPTY, 0);
        assert_eq!(stat & STAT_CMD_BUSY, 0);
        assert_eq!((stat >> STAT_BLOCK_SHIFT) & 0x07, BLOCK_Y);
    }

    #[test]
    fn test_no_function_reflects_bits() {
        let (m, _mdec) = setup();
        // Command 0 with bits 0-15 = 0xBEEF and bits 25-28 = 0x5
        m.memory_writel(BUS, (0x5 << 25) | 0xBEEF, BASE + COMMAND);
        let stat = m.memory_readl(BUS, BASE + STATUS);
        assert_eq!(stat & 0xFFFF, 0xBEEF);
        assert_eq!((stat >> 23) & 0x0F, 0x5);
    }

    #[test]
    fn test_set_iqtab_drains_parameters() {
        let (m, mdec) = setup();
        // MDEC(2), luminance only: command + 16 parameter words
        m.memory_writel(BUS, 2 << 29, BASE + COMMAND);
        assert_ne!(m.memory_readl(BUS, BASE + STATUS) & STAT_CMD_BUSY, 0);

        for i in 0..16u32 {
            let word = u32::from_le_bytes([
                (i * 4) as u8,
                (i * 4 + 1) as u8,
                (i * 4 + 2) as u8,
                (i * 4 + 3) as u8,
            ]);
            m.memory_writel(BUS, word, BASE + COMMAND);
        }

        assert_eq!(m.memory_readl(BUS, BASE + STATUS) & STAT_CMD_BUSY, 0);
        let state = mdec.state.borrow();
        for (i, &b) in state.lum_iqtab.iter().enumerate() {
            assert_eq!(b, i as u8);
        }
    }

    #[test]
    fn test_set_scale_drains_half_words() {
        let (m, mdec) = setup();
        m.memory_writel(BUS, 3 << 29, BASE + COMMAND);
        for i in 0..32u32 {
            let lo = (i * 2) as u16;
            let hi = (i * 2 + 1) as u16;
            m.memory_writel(BUS, u32::from(lo) | (u32::from(hi) << 16), BASE + COMMAND);
        }
        assert_eq!(m.memory_readl(BUS, BASE + STATUS) & STAT_CMD_BUSY, 0);
        let state = mdec.state.borrow();
        assert_eq!(state.scale_tab[0], 0);
        assert_eq!(state.scale_tab[63], 63);
    }

    #[test]
    fn test_control_reset_clears_engine() {
        let (m, mdec) = setup();
        m.memory_writel(BUS, 2 << 29, BASE + COMMAND); // leave busy
        m.memory_writel(BUS, CTRL_RESET, BASE + CONTROL);

        let stat = m.memory_readl(BUS, BASE + STATUS);
        assert_eq!(stat & STAT_CMD_BUSY, 0);
        assert_ne!(stat & STAT_DATA_OUT_EMPTY, 0);
        assert!(mdec.state.borrow().fifo_in.is_empty());
    }

    #[test]
    fn test_dma_in_respects_enable() {
        let (m, mdec) = setup();
        // Channel disabled: words dropped
        m.dma_writel(0, 2 << 29);
        assert!(mdec.state.borrow().fifo_in.is_empty());
        assert!(!mdec.state.borrow().cmd_busy());

        // Enable data-in requests and retry
        m.memory_writel(BUS, CTRL_EN_DATA_IN_REQ, BASE + CONTROL);
        m.dma_writel(0, 2 << 29);
        assert!(mdec.state.borrow().cmd_busy());
    }

    #[test]
    fn test_data_in_request_tracks_fifo_room() {
        let (m, mdec) = setup();
        m.memory_writel(BUS, CTRL_EN_DATA_IN_REQ, BASE + CONTROL);
        assert_ne!(m.memory_readl(BUS, BASE + STATUS) & STAT_DATA_IN_REQ, 0);
        let _ = mdec;
    }
}
