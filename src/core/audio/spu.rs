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

//! PSX SPU
//!
//! Register file for the 24 voices plus the sound-RAM transfer engine:
//! a 32-word FIFO drained into SPU RAM according to the transfer type
//! selected in the data-transfer control register:
//!
//! ```text
//! Transfer Type   Words in FIFO           Words written to SPU RAM
//! 0,1,6,7 (Fill)  A,B,C,D,E,F,G,H,...,X   X,X,X,X,X,X,X,X,...
//! 2 (Normal)      A,B,C,D,E,F,G,H,...,X   A,B,C,D,E,F,G,H,...
//! 3 (Rep2)        A,B,C,D,E,F,G,H,...,X   A,A,C,C,E,E,G,G,...
//! 4 (Rep4)        A,B,C,D,E,F,G,H,...,X   A,A,A,A,E,E,E,E,...
//! 5 (Rep8)        A,B,C,D,E,F,G,H,...,X   H,H,H,H,H,H,H,H,...
//! ```
//!
//! Words arrive either through the manual-write FIFO register or through
//! the DMA channel (two half-words per long, 4 cycles each). SPUCNT's low
//! bits shadow into SPUSTAT together with the DMA request bits software
//! polls.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::controller::{Controller, ControllerInstance};
use crate::core::dma::{DmaChannelRef, DmaOps};
use crate::core::error::Result;
use crate::core::fifo::Fifo;
use crate::core::machine::Machine;
use crate::core::memory::{Address, MemOps, Region, RegionId};
use crate::core::resource::Resource;

// Register offsets within the SPU window
const MAIN_VOLUME_LEFT: Address = 0x0180;
const MAIN_VOLUME_RIGHT: Address = 0x0182;
const REVERB_OUTPUT_VOLUME_LEFT: Address = 0x0184;
const REVERB_OUTPUT_VOLUME_RIGHT: Address = 0x0186;
const VOICE_KEY_ON_LO: Address = 0x0188;
const VOICE_KEY_ON_HI: Address = 0x018A;
const VOICE_KEY_OFF_LO: Address = 0x018C;
const VOICE_KEY_OFF_HI: Address = 0x018E;
const VOICE_PITCH_MODE_ENABLE_LO: Address = 0x0190;
const VOICE_PITCH_MODE_ENABLE_HI: Address = 0x0192;
const VOICE_NOISE_MODE_ENABLE_LO: Address = 0x0194;
const VOICE_NOISE_MODE_ENABLE_HI: Address = 0x0196;
const VOICE_REVERB_MODE_ENABLE_LO: Address = 0x0198;
const VOICE_REVERB_MODE_ENABLE_HI: Address = 0x019A;
const SND_RAM_REVERB_WORK_AREA_START_ADDR: Address = 0x01A2;
const SND_RAM_DATA_TRANSFER_ADDR: Address = 0x01A6;
const SND_RAM_DATA_TRANSFER_FIFO: Address = 0x01A8;
const SPUCNT: Address = 0x01AA;
const SND_RAM_DATA_TRANSFER_CTRL: Address = 0x01AC;
const SPUSTAT: Address = 0x01AE;
const CD_AUDIO_INPUT_VOL_LEFT: Address = 0x01B0;
const CD_AUDIO_INPUT_VOL_RIGHT: Address = 0x01B2;
const EXT_AUDIO_INPUT_VOL_LEFT: Address = 0x01B4;
const EXT_AUDIO_INPUT_VOL_RIGHT: Address = 0x01B6;

const SPU_RAM_SIZE: usize = 512 * 1024;
const FIFO_SIZE: usize = 32;
const NUM_VOICES: usize = 24;

// Transfer types (data transfer control bits 1-3)
const TRANSFER_NORMAL: u16 = 2;
const TRANSFER_REP2: u16 = 3;
const TRANSFER_REP4: u16 = 4;
const TRANSFER_REP8: u16 = 5;

// Transfer modes (SPUCNT bits 4-5)
const TRANSFER_MODE_MANUAL_WRITE: u16 = 1;
const TRANSFER_MODE_DMA_WRITE: u16 = 2;
const TRANSFER_MODE_DMA_READ: u16 = 3;

// SPUSTAT bits
const STAT_MODE_SHIFT: u16 = 4;
const STAT_DMA_RW_REQ: u16 = 1 << 7;
const STAT_DMA_R_REQ: u16 = 1 << 8;
const STAT_DMA_W_REQ: u16 = 1 << 9;

#[derive(Default, Clone, Copy)]
struct Voice {
    vol_left: u16,
    vol_right: u16,
    adpcm_sample_rate: u16,
    adpcm_start_addr: u16,
    adsr_lo: u16,
    adsr_hi: u16,
    adsr_current_vol: u16,
}

pub(crate) struct SpuState {
    voices: [Voice; NUM_VOICES],
    main_vol_left: u16,
    main_vol_right: u16,
    reverb_output_vol_left: u16,
    reverb_output_vol_right: u16,
    voice_pitch_mode_en: u32,
    voice_noise_mode_en: u32,
    voice_reverb_mode_en: u32,
    snd_ram_reverb_work_area_start_addr: u16,
    snd_ram_data_addr: u16,
    cnt: u16,
    snd_ram_data_transfer_ctrl: u16,
    stat: u16,
    cd_audio_input_vol_left: u16,
    cd_audio_input_vol_right: u16,
    ext_audio_input_vol_left: u16,
    ext_audio_input_vol_right: u16,
    cur_snd_ram_data_addr: u32,
    ram: Vec<u8>,
    fifo: Fifo<u16>,
}

impl SpuState {
    fn new() -> Self {
        Self {
            voices: [Voice::default(); NUM_VOICES],
            main_vol_left: 0,
            main_vol_right: 0,
            reverb_output_vol_left: 0,
            reverb_output_vol_right: 0,
            voice_pitch_mode_en: 0,
            voice_noise_mode_en: 0,
            voice_reverb_mode_en: 0,
            snd_ram_reverb_work_area_start_addr: 0,
            snd_ram_data_addr: 0,
            cnt: 0,
            snd_ram_data_transfer_ctrl: 0,
            stat: 0,
            cd_audio_input_vol_left: 0,
            cd_audio_input_vol_right: 0,
            ext_audio_input_vol_left: 0,
            ext_audio_input_vol_right: 0,
            cur_snd_ram_data_addr: 0,
            ram: vec![0; SPU_RAM_SIZE],
            fifo: Fifo::with_capacity(FIFO_SIZE),
        }
    }

    fn transfer_mode(&self) -> u16 {
        (self.stat >> STAT_MODE_SHIFT) & 0x03
    }

    fn transfer_type(&self) -> u16 {
        (self.snd_ram_data_transfer_ctrl >> 1) & 0x07
    }

    pub(crate) fn ram(&self) -> &[u8] {
        &self.ram
    }
}

fn spu_readw(state: &SpuState, address: Address) -> u16 {
    // Voice register block: 8 half-word registers per voice
    if address < 0x0180 {
        let voice = (address / 0x10) as usize;
        let reg = address % 0x10;
        if voice < NUM_VOICES {
            let v = &state.voices[voice];
            return match reg {
                0x0 => v.vol_left,
                0x2 => v.vol_right,
                0x4 => v.adpcm_sample_rate,
                0x6 => v.adpcm_start_addr,
                0x8 => v.adsr_lo,
                0xA => v.adsr_hi,
                0xC => v.adsr_current_vol,
                _ => 0,
            };
        }
        return 0;
    }

    match address {
        MAIN_VOLUME_LEFT => state.main_vol_left,
        MAIN_VOLUME_RIGHT => state.main_vol_right,
        REVERB_OUTPUT_VOLUME_LEFT => state.reverb_output_vol_left,
        REVERB_OUTPUT_VOLUME_RIGHT => state.reverb_output_vol_right,
        VOICE_PITCH_MODE_ENABLE_LO => state.voice_pitch_mode_en as u16,
        VOICE_PITCH_MODE_ENABLE_HI => (state.voice_pitch_mode_en >> 16) as u16,
        VOICE_NOISE_MODE_ENABLE_LO => state.voice_noise_mode_en as u16,
        VOICE_NOISE_MODE_ENABLE_HI => (state.voice_noise_mode_en >> 16) as u16,
        VOICE_REVERB_MODE_ENABLE_LO => state.voice_reverb_mode_en as u16,
        VOICE_REVERB_MODE_ENABLE_HI => (state.voice_reverb_mode_en >> 16) as u16,
        SND_RAM_REVERB_WORK_AREA_START_ADDR => state.snd_ram_reverb_work_area_start_addr,
        SND_RAM_DATA_TRANSFER_ADDR => state.snd_ram_data_addr,
        SPUCNT => state.cnt,
        SND_RAM_DATA_TRANSFER_CTRL => state.snd_ram_data_transfer_ctrl,
        SPUSTAT => state.stat,
        CD_AUDIO_INPUT_VOL_LEFT => state.cd_audio_input_vol_left,
        CD_AUDIO_INPUT_VOL_RIGHT => state.cd_audio_input_vol_right,
        EXT_AUDIO_INPUT_VOL_LEFT => state.ext_audio_input_vol_left,
        EXT_AUDIO_INPUT_VOL_RIGHT => state.ext_audio_input_vol_right,
        _ => {
            log::debug!("unknown SPU read at {address:#x}");
            0
        }
    }
}

fn spu_writew(state: &mut SpuState, w: u16, address: Address) {
    if address < 0x0180 {
        let voice = (address / 0x10) as usize;
        let reg = address % 0x10;
        if voice < NUM_VOICES {
            let v = &mut state.voices[voice];
            match reg {
                0x0 => v.vol_left = w,
                0x2 => v.vol_right = w,
                0x4 => v.adpcm_sample_rate = w,
                0x6 => v.adpcm_start_addr = w,
                0x8 => v.adsr_lo = w,
                0xA => v.adsr_hi = w,
                0xC => v.adsr_current_vol = w,
                _ => {}
            }
        }
        return;
    }

    match address {
        MAIN_VOLUME_LEFT => state.main_vol_left = w,
        MAIN_VOLUME_RIGHT => state.main_vol_right = w,
        REVERB_OUTPUT_VOLUME_LEFT => state.reverb_output_vol_left = w,
        REVERB_OUTPUT_VOLUME_RIGHT => state.reverb_output_vol_right = w,
        VOICE_KEY_ON_LO | VOICE_KEY_ON_HI => {
            let shift = if address == VOICE_KEY_ON_LO { 0 } else { 16 };
            let mask = u32::from(w) << shift;
            for voice in 0..NUM_VOICES {
                if mask & (1 << voice) != 0 {
                    log::debug!("voice {voice} key on");
                }
            }
        }
        VOICE_KEY_OFF_LO | VOICE_KEY_OFF_HI => {
            let shift = if address == VOICE_KEY_OFF_LO { 0 } else { 16 };
            let mask = u32::from(w) << shift;
            for voice in 0..NUM_VOICES {
                if mask & (1 << voice) != 0 {
                    log::debug!("voice {voice} key off");
                }
            }
        }
        VOICE_PITCH_MODE_ENABLE_LO => {
            state.voice_pitch_mode_en = (state.voice_pitch_mode_en & 0xFFFF_0000) | u32::from(w);
        }
        VOICE_PITCH_MODE_ENABLE_HI => {
            state.voice_pitch_mode_en =
                (state.voice_pitch_mode_en & 0x0000_FFFF) | (u32::from(w) << 16);
        }
        VOICE_NOISE_MODE_ENABLE_LO => {
            state.voice_noise_mode_en = (state.voice_noise_mode_en & 0xFFFF_0000) | u32::from(w);
        }
        VOICE_NOISE_MODE_ENABLE_HI => {
            state.voice_noise_mode_en =
                (state.voice_noise_mode_en & 0x0000_FFFF) | (u32::from(w) << 16);
        }
        VOICE_REVERB_MODE_ENABLE_LO => {
            state.voice_reverb_mode_en = (state.voice_reverb_mode_en & 0xFFFF_0000) | u32::from(w);
        }
        VOICE_REVERB_MODE_ENABLE_HI => {
            state.voice_reverb_mode_en =
                (state.voice_reverb_mode_en & 0x0000_FFFF) | (u32::from(w) << 16);
        }
        SND_RAM_REVERB_WORK_AREA_START_ADDR => state.snd_ram_reverb_work_area_start_addr = w,
        SND_RAM_DATA_TRANSFER_ADDR => {
            state.snd_ram_data_addr = w;
            // The internal current-address register latches value × 8
            state.cur_snd_ram_data_addr = u32::from(w) * 8;
        }
        SND_RAM_DATA_TRANSFER_FIFO => {
            if state.transfer_mode() == TRANSFER_MODE_MANUAL_WRITE {
                fifo_enqueue(state, w);
            }
        }
        SPUCNT => {
            state.cnt = w;

            // Bits 0-5 shadow into SPUSTAT
            state.stat = (state.stat & !0x003F) | (w & 0x003F);

            // DMA request bits follow the transfer mode
            let mode = state.transfer_mode();
            let wreq = mode == TRANSFER_MODE_DMA_WRITE;
            let rreq = mode == TRANSFER_MODE_DMA_READ;
            state.stat &= !(STAT_DMA_RW_REQ | STAT_DMA_R_REQ | STAT_DMA_W_REQ);
            if wreq {
                state.stat |= STAT_DMA_W_REQ;
            }
            if rreq {
                state.stat |= STAT_DMA_R_REQ;
            }
            if wreq || rreq {
                state.stat |= STAT_DMA_RW_REQ;
            }
        }
        SND_RAM_DATA_TRANSFER_CTRL => state.snd_ram_data_transfer_ctrl = w,
        CD_AUDIO_INPUT_VOL_LEFT => state.cd_audio_input_vol_left = w,
        CD_AUDIO_INPUT_VOL_RIGHT => state.cd_audio_input_vol_right = w,
        EXT_AUDIO_INPUT_VOL_LEFT => state.ext_audio_input_vol_left = w,
        EXT_AUDIO_INPUT_VOL_RIGHT => state.ext_audio_input_vol_right = w,
        _ => log::debug!("unknown SPU write {w:#x} at {address:#x}"),
    }
}

/// Enqueue a word and drain the FIFO into SPU RAM per the transfer type
fn fifo_enqueue(state: &mut SpuState, data: u16) {
    if !state.fifo.enqueue(data) {
        log::warn!("could not enqueue SPU transfer FIFO!");
    }

    loop {
        // num = group size, index = which queued word of the group is
        // replicated
        let (num, index) = match state.transfer_type() {
            TRANSFER_NORMAL => (1, 0),
            TRANSFER_REP2 => (2, 0),
            TRANSFER_REP4 => (4, 0),
            TRANSFER_REP8 => (8, 7),
            // Fill drains only once the FIFO is full, repeating its last
            // word
            _ => (FIFO_SIZE, FIFO_SIZE - 1),
        };

        let mut words = [0u16; FIFO_SIZE];
        if !state.fifo.dequeue_into(&mut words[..num]) {
            break;
        }
        let w = words[index];

        for _ in 0..num {
            let addr = state.cur_snd_ram_data_addr as usize % SPU_RAM_SIZE;
            state.ram[addr] = w as u8;
            state.ram[(addr + 1) % SPU_RAM_SIZE] = (w >> 8) as u8;
            state.cur_snd_ram_data_addr = state.cur_snd_ram_data_addr.wrapping_add(2);
        }
    }
}

fn spu_dma_readl(m: &Machine, state: &mut SpuState) -> u32 {
    // 4 clks per word
    m.clock_consume(4);

    if state.transfer_mode() != TRANSFER_MODE_DMA_READ {
        return 0;
    }

    let mut l = 0u32;
    for i in 0..4 {
        let addr = state.cur_snd_ram_data_addr as usize % SPU_RAM_SIZE;
        l |= u32::from(state.ram[addr]) << (8 * i);
        state.cur_snd_ram_data_addr = state.cur_snd_ram_data_addr.wrapping_add(1);
    }
    l
}

fn spu_dma_writel(m: &Machine, state: &mut SpuState, l: u32) {
    // 4 clks per word
    m.clock_consume(4);

    if state.transfer_mode() != TRANSFER_MODE_DMA_WRITE {
        return;
    }

    fifo_enqueue(state, l as u16);
    fifo_enqueue(state, (l >> 16) as u16);
}

// ----------------------------------------------------------------------
// Fabric glue

struct SpuPorts(Rc<RefCell<SpuState>>);

impl MemOps for SpuPorts {
    fn readw(&mut self, _m: &Machine, address: Address) -> Option<u16> {
        Some(spu_readw(&self.0.borrow(), address))
    }

    fn writew(&mut self, _m: &Machine, w: u16, address: Address) -> bool {
        spu_writew(&mut self.0.borrow_mut(), w, address);
        true
    }
}

struct SpuDma(Rc<RefCell<SpuState>>);

impl DmaOps for SpuDma {
    fn readl(&mut self, m: &Machine) -> Option<u32> {
        Some(spu_dma_readl(m, &mut self.0.borrow_mut()))
    }

    fn writel(&mut self, m: &Machine, l: u32) -> bool {
        spu_dma_writel(m, &mut self.0.borrow_mut(), l);
        true
    }
}

/// PSX SPU controller
pub struct Spu {
    state: Rc<RefCell<SpuState>>,
    region: Option<RegionId>,
    dma_channel: Option<DmaChannelRef>,
}

pub fn create() -> Box<dyn Controller> {
    Box::new(Spu {
        state: Rc::new(RefCell::new(SpuState::new())),
        region: None,
        dma_channel: None,
    })
}

impl Controller for Spu {
    fn init(&mut self, m: &Machine, instance: &ControllerInstance) -> Result<()> {
        let area = Resource::find_mem(&instance.resources, "mem")?.clone();
        self.region = Some(m.memory().region_add(Region::new(
            area,
            Rc::new(RefCell::new(SpuPorts(self.state.clone()))),
        )));

        let channel = Resource::find_dma(&instance.resources, "dma")?;
        self.dma_channel = Some(
            m.dma()
                .add(channel, Rc::new(RefCell::new(SpuDma(self.state.clone())))),
        );

        Ok(())
    }

    fn reset(&mut self, _m: &Machine) {
        let mut state = self.state.borrow_mut();
        state.voices = [Voice::default(); NUM_VOICES];
        state.main_vol_left = 0;
        state.main_vol_right = 0;
        state.reverb_output_vol_left = 0;
        state.reverb_output_vol_right = 0;
        state.voice_pitch_mode_en = 0;
        state.voice_noise_mode_en = 0;
        state.voice_reverb_mode_en = 0;
        state.snd_ram_data_addr = 0;
        state.cnt = 0;
        state.stat = 0;
        state.cd_audio_input_vol_left = 0;
        state.cd_audio_input_vol_right = 0;
        state.ext_audio_input_vol_left = 0;
        state.ext_audio_input_vol_right = 0;
        state.snd_ram_reverb_work_area_start_addr = 0;
        state.cur_snd_ram_data_addr = 0;
        state.fifo.reset();
        state.ram.fill(0);
    }

    fn deinit(&mut self, m: &Machine) {
        if let Some(id) = self.region.take() {
            m.memory().region_remove(id);
        }
        if let Some(id) = self.dma_channel.take() {
            m.dma().remove(id);
        }
    }
}
