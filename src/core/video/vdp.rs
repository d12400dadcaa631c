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

//! SMS VDP
//!
//! Port-mapped: the control port takes two-byte command words (VRAM read
//! setup, register writes, CRAM addressing), the data port reads through
//! a one-byte buffer, with the quirk that data writes also load that
//! buffer. The clock renders one background line per tick, consuming an
//! entire row of pixel cycles at once; the line counter underneath the
//! active display drives the line interrupt, the frame interrupt fires at
//! the bottom of the active area and is cleared by reading the status
//! port.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::clock::ClockTick;
use crate::core::controller::{Controller, ControllerInstance};
use crate::core::cpu::IrqLine;
use crate::core::error::Result;
use crate::core::machine::Machine;
use crate::core::port::{PortOps, PortRegion, PortRegionId};
use crate::core::resource::Resource;
use crate::frontend::{Color, VideoSpecs};

// Register indices
const MODE_CTRL_1: usize = 0x00;
const MODE_CTRL_2: usize = 0x01;
const NAME_TABLE_BASE: usize = 0x02;
const OVERSCAN_COLOR: usize = 0x07;
const BG_X_SCROLL: usize = 0x08;
const BG_Y_SCROLL: usize = 0x09;
const LINE_COUNTER: usize = 0x0A;
const NUM_REGS: usize = 16;

// Ports local to the region
const DATA_PORT: u8 = 0;
const CTRL_PORT: u8 = 1;

const SCREEN_WIDTH: u32 = 256;
const SCREEN_HEIGHT: u32 = 192;
const SCREEN_REFRESH_RATE: f64 = 60.0;
const NUM_COLUMNS: u32 = 342;
const NUM_ROWS: u32 = 262;
const MAX_BG_Y: u32 = 224;
const VRAM_SIZE: usize = 16 * 1024;
const CRAM_SIZE: usize = 32;
const TILE_WIDTH: u32 = 8;
const TILE_HEIGHT: u32 = 8;
const TILE_SIZE: u32 = 32;
const NUM_BIT_PLANES: u32 = 4;
const SPRITE_PALETTE_OFFSET: usize = 16;
const HORI_SCROLL_LOCK_HEIGHT: u32 = 16;

// Mode control 1 bits
const M1_LINE_INTERRUPTS: u8 = 0x10;
const M1_MASK_COL_0: u8 = 0x20;
const M1_HORI_SCROLL_LOCK: u8 = 0x40;

// Mode control 2 bits
const M2_FRAME_INTERRUPTS: u8 = 0x20;
const M2_ENABLE_DISPLAY: u8 = 0x40;

// Status bits
const STATUS_FRAME_INTERRUPT: u8 = 0x80;

fn cram_color(v: u8) -> Color {
    Color {
        r: (v & 0x03) << 6,
        g: ((v >> 2) & 0x03) << 6,
        b: ((v >> 4) & 0x03) << 6,
    }
}

struct VdpState {
    regs: [u8; NUM_REGS],
    status: u8,
    code: u8,
    address: u16,
    read_buffer: u8,
    cmd_byte: u8,
    cmd_first_write: bool,
    v_counter: u32,
    line_counter: u8,
    vram: Vec<u8>,
    cram: [u8; CRAM_SIZE],
    irq: IrqLine,
}

impl VdpState {
    fn new() -> Self {
        Self {
            regs: [0; NUM_REGS],
            status: 0,
            code: 0,
            address: 0,
            read_buffer: 0,
            cmd_byte: 0,
            cmd_first_write: true,
            v_counter: 0,
            line_counter: 0xFF,
            vram: vec![0; VRAM_SIZE],
            cram: [0; CRAM_SIZE],
            irq: 0,
        }
    }

    fn display_enabled(&self) -> bool {
        self.regs[MODE_CTRL_2] & M2_ENABLE_DISPLAY != 0
    }
}

fn ctrl_read(state: &mut VdpState) -> u8 {
    state.cmd_first_write = true;
    let status = state.status | 0x1F;
    state.status = 0;
    status
}

fn ctrl_write(state: &mut VdpState, b: u8) {
    if state.cmd_first_write {
        state.cmd_byte = b;
        state.cmd_first_write = false;
        return;
    }
    state.cmd_first_write = true;

    let word = u16::from(state.cmd_byte) | (u16::from(b) << 8);
    state.code = (word >> 14) as u8;
    state.address = word & 0x3FFF;

    match state.code {
        // VRAM read setup: prime the buffer and advance
        0 => {
            state.read_buffer = state.vram[usize::from(state.address)];
            state.address = (state.address + 1) & (VRAM_SIZE as u16 - 1);
        }
        // Register write
        2 => {
            let reg = usize::from((word >> 8) & 0x0F);
            state.regs[reg] = word as u8;
        }
        _ => {}
    }
}

fn data_read(state: &mut VdpState) -> u8 {
    // Buffered: return the previous byte, refill, advance
    let b = state.read_buffer;
    state.read_buffer = state.vram[usize::from(state.address)];
    state.address = (state.address + 1) & (VRAM_SIZE as u16 - 1);
    b
}

fn data_write(state: &mut VdpState, b: u8) {
    match state.code {
        3 => {
            state.cram[usize::from(state.address) % CRAM_SIZE] = b;
            state.address = (state.address + 1) & (VRAM_SIZE as u16 - 1);
        }
        _ => {
            state.vram[usize::from(state.address)] = b;
            state.address = (state.address + 1) & (VRAM_SIZE as u16 - 1);
        }
    }
    // Writing also loads the read buffer
    state.read_buffer = b;
}

/// Render one background line
fn draw_line_bg(m: &Machine, state: &VdpState) {
    let mut final_y = state.v_counter + u32::from(state.regs[BG_Y_SCROLL]);
    if final_y >= MAX_BG_Y {
        final_y -= MAX_BG_Y;
    }
    let mut row = final_y / TILE_HEIGHT;

    // Name-table address bit 0 masks row bit 4, mirroring the lower rows
    let bit0 = state.regs[NAME_TABLE_BASE] & 0x01;
    row &= !(u32::from(bit0 ^ 1) << 4);

    for x in 0..SCREEN_WIDTH {
        if !state.display_enabled() {
            m.video_set_pixel(x, state.v_counter, Color::BLACK);
            continue;
        }

        if state.regs[MODE_CTRL_1] & M1_MASK_COL_0 != 0 && x < TILE_WIDTH {
            let index = usize::from(state.regs[OVERSCAN_COLOR] & 0x0F);
            let v = state.cram[index + SPRITE_PALETTE_OFFSET];
            m.video_set_pixel(x, state.v_counter, cram_color(v));
            continue;
        }

        // Horizontal scroll, lockable for the top status-bar rows
        let locked = state.regs[MODE_CTRL_1] & M1_HORI_SCROLL_LOCK != 0
            && state.v_counter < HORI_SCROLL_LOCK_HEIGHT;
        let final_x = if locked {
            x
        } else {
            x.wrapping_sub(u32::from(state.regs[BG_X_SCROLL])) & 0xFF
        };
        let col = final_x / TILE_WIDTH;

        // Name table entry: two bytes of index and attribute bits
        let name_base = u32::from((state.regs[NAME_TABLE_BASE] >> 1) & 0x07) << 11;
        let entry_addr = (name_base | (row << 6) | (col << 1)) as usize;
        let tile =
            u16::from(state.vram[entry_addr]) | (u16::from(state.vram[entry_addr + 1]) << 8);
        let pattern_index = u32::from(tile & 0x01FF);
        let h_flip = tile & 0x0200 != 0;
        let v_flip = tile & 0x0400 != 0;
        let palette_sel = tile & 0x0800 != 0;

        let mut x_off = TILE_WIDTH - 1 - (final_x % TILE_WIDTH);
        if h_flip {
            x_off = final_x % TILE_WIDTH;
        }
        let mut y_off = final_y % TILE_HEIGHT;
        if v_flip {
            y_off = TILE_HEIGHT - 1 - y_off;
        }

        // Four bit planes per row
        let mut tile_data_addr =
            (pattern_index * TILE_SIZE + y_off * (TILE_SIZE / TILE_WIDTH)) as usize;
        let mut palette_index = 0usize;
        for plane in 0..NUM_BIT_PLANES {
            let data = state.vram[tile_data_addr % VRAM_SIZE];
            palette_index |= usize::from((data >> x_off) & 1) << plane;
            tile_data_addr += 1;
        }

        if palette_sel {
            palette_index += SPRITE_PALETTE_OFFSET;
        }
        m.video_set_pixel(x, state.v_counter, cram_color(state.cram[palette_index]));
    }
}

fn vdp_tick(m: &Machine, state: &mut VdpState) {
    if state.v_counter < SCREEN_HEIGHT {
        m.video_lock();
        draw_line_bg(m, state);
        m.video_unlock();
    }

    // Line counter underflows within the active area raise the line IRQ
    if state.v_counter <= SCREEN_HEIGHT {
        state.line_counter = state.line_counter.wrapping_sub(1);
        if state.line_counter == 0xFF {
            state.line_counter = state.regs[LINE_COUNTER];
            if state.regs[MODE_CTRL_1] & M1_LINE_INTERRUPTS != 0 {
                m.cpu_interrupt(state.irq);
            }
        }
    }

    if state.v_counter == SCREEN_HEIGHT {
        m.video_update();
        state.status |= STATUS_FRAME_INTERRUPT;
        if state.regs[MODE_CTRL_2] & M2_FRAME_INTERRUPTS != 0 {
            m.cpu_interrupt(state.irq);
        }
    }

    // Below the active area the line counter reloads continuously
    if state.v_counter > SCREEN_HEIGHT {
        state.line_counter = state.regs[LINE_COUNTER];
    }

    state.v_counter += 1;
    if state.v_counter == NUM_ROWS {
        state.v_counter = 0;
    }

    // A whole row of pixels, two clocks each
    m.clock_consume(NUM_COLUMNS * 2);
}

// ----------------------------------------------------------------------
// Fabric glue

struct VdpPorts(Rc<RefCell<VdpState>>);

impl PortOps for VdpPorts {
    fn read(&mut self, _m: &Machine, port: u8) -> Option<u8> {
        let mut state = self.0.borrow_mut();
        Some(match port {
            DATA_PORT => data_read(&mut state),
            _ => ctrl_read(&mut state),
        })
    }

    fn write(&mut self, _m: &Machine, b: u8, port: u8) -> bool {
        let mut state = self.0.borrow_mut();
        match port {
            DATA_PORT => data_write(&mut state, b),
            _ => ctrl_write(&mut state, b),
        }
        true
    }
}

/// V/H counter ports (reads only)
struct ScanlinePorts(Rc<RefCell<VdpState>>);

impl PortOps for ScanlinePorts {
    fn read(&mut self, _m: &Machine, port: u8) -> Option<u8> {
        let state = self.0.borrow();
        Some(match port {
            0 => state.v_counter.min(0xFF) as u8,
            _ => 0,
        })
    }
}

struct VdpTick(Rc<RefCell<VdpState>>);

impl ClockTick for VdpTick {
    fn tick(&mut self, m: &Machine) {
        vdp_tick(m, &mut self.0.borrow_mut());
    }
}

/// SMS VDP controller
pub struct Vdp {
    state: Rc<RefCell<VdpState>>,
    port_regions: Vec<PortRegionId>,
}

pub fn create() -> Box<dyn Controller> {
    Box::new(Vdp {
        state: Rc::new(RefCell::new(VdpState::new())),
        port_regions: Vec::new(),
    })
}

impl Controller for Vdp {
    fn init(&mut self, m: &Machine, instance: &ControllerInstance) -> Result<()> {
        m.video_init(&VideoSpecs {
            width: SCREEN_WIDTH,
            height: SCREEN_HEIGHT,
            fps: SCREEN_REFRESH_RATE,
            scale: 1,
        })?;

        let port_area = Resource::find_port(&instance.resources, "port")?.clone();
        self.port_regions.push(m.ports().region_add(PortRegion::new(
            port_area,
            Rc::new(RefCell::new(VdpPorts(self.state.clone()))),
        )));

        let scanline_area = Resource::find_port(&instance.resources, "scanline")?.clone();
        self.port_regions.push(m.ports().region_add(PortRegion::new(
            scanline_area,
            Rc::new(RefCell::new(ScanlinePorts(self.state.clone()))),
        )));

        self.state.borrow_mut().irq = Resource::find_irq(&instance.resources, "irq")?;

        let rate = Resource::find_clk(&instance.resources, "clk")?;
        m.clock_add(rate, Box::new(VdpTick(self.state.clone())));

        Ok(())
    }

    fn reset(&mut self, _m: &Machine) {
        let mut state = self.state.borrow_mut();
        let irq = state.irq;
        *state = VdpState::new();
        state.irq = irq;
    }

    fn deinit(&mut self, m: &Machine) {
        for id in self.port_regions.drain(..) {
            m.ports().region_remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EmulatorConfig;
    use crate::core::controller::MachData;

    const DATA: u8 = 0xBE;
    const CTRL: u8 = 0xBF;

    fn setup() -> (Machine, Vdp) {
        let m = Machine::new(EmulatorConfig::default());

        let mut vdp = Vdp {
            state: Rc::new(RefCell::new(VdpState::new())),
            port_regions: Vec::new(),
        };
        let instance = ControllerInstance {
            controller_name: "vdp",
            bus_id: 1,
            resources: vec![
                Resource::port_mirrored(
                    "port",
                    0xBE,
                    0xBF,
                    vec![Resource::port("port_mirror", 0x80, 0xBD)],
                ),
                Resource::port("scanline", 0x7E, 0x7F),
                Resource::irq("irq", 0),
                Resource::clk("clk", 10_738_620),
            ],
            mach_data: MachData::None,
        };
        vdp.init(&m, &instance).unwrap();
        vdp.reset(&m);
        (m, vdp)
    }

    /// Issue a control-port command word
    fn command(m: &Machine, code: u8, address: u16) {
        m.port_write(address as u8, CTRL);
        m.port_write((u16::from(code) << 6) as u8 | ((address >> 8) as u8 & 0x3F), CTRL);
    }

    #[test]
    fn test_vram_write_then_buffered_read() {
        let (m, _vdp) = setup();
        command(&m, 1, 0x1000);
        m.port_write(0xAB, DATA);
        m.port_write(0xCD, DATA);

        // Read setup primes the buffer with the first byte
        command(&m, 0, 0x1000);
        assert_eq!(m.port_read(DATA), 0xAB);
        assert_eq!(m.port_read(DATA), 0xCD);
    }

    #[test]
    fn test_data_write_loads_read_buffer() {
        let (m, vdp) = setup();
        command(&m, 1, 0x0000);
        m.port_write(0x42, DATA);
        assert_eq!(vdp.state.borrow().read_buffer, 0x42);
    }

    #[test]
    fn test_register_write_through_control_port() {
        let (m, vdp) = setup();
        m.port_write(0x55, CTRL);
        m.port_write(0x88, CTRL); // code 2, register 8
        assert_eq!(vdp.state.borrow().regs[BG_X_SCROLL], 0x55);
    }

    #[test]
    fn test_cram_write() {
        let (m, vdp) = setup();
        command(&m, 3, 0x0005);
        m.port_write(0x3F, DATA);
        assert_eq!(vdp.state.borrow().cram[5], 0x3F);
    }

    #[test]
    fn test_status_read_clears_flags_and_write_toggle() {
        let (m, vdp) = setup();
        vdp.state.borrow_mut().status = STATUS_FRAME_INTERRUPT;
        vdp.state.borrow_mut().cmd_first_write = false;

        let status = m.port_read(CTRL);
        assert_ne!(status & STATUS_FRAME_INTERRUPT, 0);
        assert_eq!(vdp.state.borrow().status, 0);
        assert!(vdp.state.borrow().cmd_first_write);
    }

    #[test]
    fn test_frame_interrupt_at_bottom_of_display() {
        let (m, vdp) = setup();
        // Enable frame interrupts
        vdp.state.borrow_mut().regs[MODE_CTRL_2] = M2_FRAME_INTERRUPTS;
        for _ in 0..=SCREEN_HEIGHT {
            vdp_tick(&m, &mut vdp.state.borrow_mut());
        }
        assert_ne!(vdp.state.borrow().status & STATUS_FRAME_INTERRUPT, 0);
        assert_ne!(m.take_pending_irqs() & 0b1, 0);
    }

    #[test]
    fn test_line_counter_interrupt() {
        let (m, vdp) = setup();
        {
            let mut state = vdp.state.borrow_mut();
            state.regs[MODE_CTRL_1] = M1_LINE_INTERRUPTS;
            state.regs[LINE_COUNTER] = 4;
            state.line_counter = 4;
        }
        // Underflow after 5 lines
        for _ in 0..5 {
            vdp_tick(&m, &mut vdp.state.borrow_mut());
        }
        assert_ne!(m.take_pending_irqs() & 0b1, 0);
    }

    #[test]
    fn test_port_mirrors_reach_the_vdp() {
        let (m, vdp) = setup();
        // 0x80 mirrors the data port, 0x81 the control port
        m.port_write(0x10, 0x81);
        m.port_write(0x80, 0x81);
        assert_eq!(vdp.state.borrow().regs[0], 0x10);
    }

    #[test]
    fn test_v_counter_port() {
        let (m, vdp) = setup();
        for _ in 0..10 {
            vdp_tick(&m, &mut vdp.state.borrow_mut());
        }
        assert_eq!(m.port_read(0x7E), 10);
    }

    #[test]
    fn test_background_renders_cram_color() {
        let (m, vdp) = setup();
        {
            let mut state = vdp.state.borrow_mut();
            state.regs[MODE_CTRL_2] = M2_ENABLE_DISPLAY;
            // Tile 1, plane 0 solid for row 0
            state.vram[TILE_SIZE as usize] = 0xFF;
            // Name table entry (0,0) = tile 1
            state.vram[0] = 0x01;
            state.cram[1] = 0x03; // red
        }
        vdp_tick(&m, &mut vdp.state.borrow_mut());
        assert_eq!(m.video_get_pixel(0, 0), cram_color(0x03));
    }
}
