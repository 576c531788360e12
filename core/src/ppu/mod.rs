use bitflags::bitflags;
use log::debug;

use frame::{Frame, FrameBuffers};
use memory::{Oam, Vram};
use palette::PaletteRam;
use pixel_pipeline::{DrawContext, PixelPipeline};

pub mod frame;
pub mod memory;
pub mod palette;
pub mod pixel_pipeline;
pub mod save_state;

/// Dots in one full frame: 154 scanlines of 456 dots.
pub const DOTS_PER_FRAME: u32 = 70224;

pub const CYCLES_PER_SCANLINE: u16 = 456;
pub const SCANLINES_PER_FRAME: u8 = 154;
pub const VISIBLE_SCANLINES: u8 = 144;

/// The PPU's phase within a scanline. The numeric value is what the
/// status register reports in its low two bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Mode {
    HBlank = 0,
    VBlank = 1,
    OamEvaluation = 2,
    Drawing = 3,
}

impl Mode {
    pub(crate) fn from_u8(value: u8) -> Mode {
        match value & 0x03 {
            0 => Mode::HBlank,
            1 => Mode::VBlank,
            2 => Mode::OamEvaluation,
            _ => Mode::Drawing,
        }
    }
}

/// The console variant the PPU is fitted to. The color model adds VRAM
/// banking, tile attributes and the palette RAMs; everything else is
/// shared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Model {
    Dmg,
    Cgb,
}

impl Model {
    pub fn is_cgb(self) -> bool {
        matches!(self, Model::Cgb)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrqSource {
    VerticalBlank,
    LcdStat,
    Joypad,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PpuEvent {
    StartFrame,
    EndFrame,
}

/// The collaborators the PPU calls back into, injected per `step`. The
/// PPU holds no reference to its host between dots.
pub trait Host {
    /// Which console variant the PPU is embedded in.
    fn model(&self) -> Model;

    /// Master clock cycles elapsed since power-on. Only consulted for
    /// frame pacing while the LCD is off.
    fn master_cycle_count(&self) -> u64;

    /// Whether the OAM DMA controller currently owns OAM.
    fn oam_dma_running(&self) -> bool;

    fn request_irq(&mut self, irq: IrqSource);

    fn event(&mut self, event: PpuEvent);

    /// Deliver a completed frame. The borrow is only valid for the
    /// duration of the call; copy the pixels to keep them.
    fn frame_ready(&mut self, frame: Frame<'_>);

    /// Sampled before and after `end_of_frame`; a changed value requests
    /// the joypad interrupt.
    fn input_port(&self) -> u8 {
        0xFF
    }

    /// Host processing that runs once per delivered frame.
    fn end_of_frame(&mut self) {}
}

bitflags! {
    /// LCDC, 0xFF40.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Control: u8 {
        const LCD_ENABLE      = 0b1000_0000;
        const WINDOW_TILEMAP  = 0b0100_0000;
        const WINDOW_ENABLE   = 0b0010_0000;
        const BG_TILE_SELECT  = 0b0001_0000;
        const BG_TILEMAP      = 0b0000_1000;
        const LARGE_SPRITES   = 0b0000_0100;
        const SPRITES_ENABLE  = 0b0000_0010;
        const BG_ENABLE       = 0b0000_0001;
    }
}

bitflags! {
    /// The writable interrupt-enable bits of STAT, 0xFF41.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct StatusFlags: u8 {
        const COINCIDENCE_IRQ = 0b0100_0000;
        const OAM_IRQ         = 0b0010_0000;
        const VBLANK_IRQ      = 0b0001_0000;
        const HBLANK_IRQ      = 0b0000_1000;
    }
}

/// The memory-mapped register file. The pixel pipeline reads these
/// through a fresh snapshot every dot; the CPU writes land between dots.
pub(crate) struct Registers {
    pub control: Control,
    pub status: StatusFlags,
    pub scroll_x: u8,
    pub scroll_y: u8,
    pub window_x: u8,
    pub window_y: u8,
    pub ly_compare: u8,
    pub bg_palette: u8,
    pub obj_palette0: u8,
    pub obj_palette1: u8,
}

pub struct Ppu {
    registers: Registers,

    scanline: u8,
    cycle: u16,
    mode: Mode,
    /// Result of the most recent LY=LYC comparison, as visible in STAT.
    ly_coincidence_flag: bool,
    /// Previous level of the STAT interrupt line, for edge detection.
    stat_irq_flag: bool,
    frame_count: u32,
    /// Master cycle count at the last delivered frame, used to pace
    /// blank frames while the LCD is off.
    last_frame_time: u64,

    vram: Vram,
    oam: Oam,

    cgb_vram_bank: u8,
    cgb_bg_palettes: PaletteRam,
    cgb_obj_palettes: PaletteRam,

    pipeline: PixelPipeline,
    buffers: FrameBuffers,
}

impl Ppu {
    /// A PPU in the state the boot ROM leaves behind: LCD on, mid
    /// scanline 0, the monochrome palettes at their power-on values.
    pub fn new() -> Self {
        let mut ppu = Self {
            registers: Registers {
                control: Control::from_bits_retain(0x91),
                status: StatusFlags::empty(),
                scroll_x: 0,
                scroll_y: 0,
                window_x: 0,
                window_y: 0,
                ly_compare: 0,
                bg_palette: 0xFC,
                obj_palette0: 0xFF,
                obj_palette1: 0xFF,
            },
            scanline: 0,
            cycle: 4,
            mode: Mode::HBlank,
            ly_coincidence_flag: false,
            stat_irq_flag: false,
            frame_count: 0,
            last_frame_time: 0,
            vram: Vram::new(),
            oam: Oam::new(),
            cgb_vram_bank: 0,
            cgb_bg_palettes: PaletteRam::new(),
            cgb_obj_palettes: PaletteRam::new(),
            pipeline: PixelPipeline::new(),
            buffers: FrameBuffers::new(),
        };
        ppu.pipeline.reset_renderer(0);
        ppu.update_ly_coincidence_flag();
        ppu
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn scanline(&self) -> u8 {
        self.scanline
    }

    pub fn cycle(&self) -> u16 {
        self.cycle
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Advance the PPU by one dot. The scheduler calls this once per
    /// dot-clock tick; in double speed it simply calls twice as often.
    pub fn step(&mut self, host: &mut impl Host) {
        if !self.registers.control.contains(Control::LCD_ENABLE) {
            // The LCD is off: no rendering and no interrupts, but keep
            // the display paced with a blank frame per frame period.
            if host.master_cycle_count().wrapping_sub(self.last_frame_time) > DOTS_PER_FRAME as u64
            {
                self.last_frame_time = host.master_cycle_count();
                self.send_frame(host);
            }
            return;
        }

        self.exec_cycle(host);
    }

    fn exec_cycle(&mut self, host: &mut impl Host) {
        self.cycle += 1;

        let old_mode = self.mode;
        let old_coincidence = self.ly_coincidence_flag;

        match self.cycle {
            4 => {
                if self.scanline < VISIBLE_SCANLINES {
                    self.pipeline.begin_oam_scan();
                    self.mode = Mode::OamEvaluation;
                } else if self.scanline == VISIBLE_SCANLINES {
                    self.mode = Mode::VBlank;
                    host.request_irq(IrqSource::VerticalBlank);
                    self.send_frame(host);
                }
            }

            84 => {
                if self.scanline < VISIBLE_SCANLINES {
                    self.pipeline.sort_sprites();
                    self.mode = Mode::Drawing;
                    self.pipeline.reset_renderer(self.registers.scroll_x);
                }
            }

            CYCLES_PER_SCANLINE => {
                self.cycle = 0;
                self.scanline += 1;

                if self.scanline < VISIBLE_SCANLINES {
                    self.mode = Mode::HBlank;
                } else if self.scanline == SCANLINES_PER_FRAME {
                    self.scanline = 0;
                    self.mode = Mode::HBlank;
                    host.event(PpuEvent::StartFrame);
                }
            }

            _ => {}
        }

        if self.mode == Mode::Drawing {
            if self.pipeline.drawn_pixels() < 160 {
                let ctx = DrawContext {
                    scanline: self.scanline,
                    cycle: self.cycle,
                    model: host.model(),
                    regs: &self.registers,
                    bg_palettes: &self.cgb_bg_palettes,
                    obj_palettes: &self.cgb_obj_palettes,
                };
                self.pipeline
                    .draw_cycle(&ctx, &self.vram, &self.oam, self.buffers.current_mut());
            } else {
                self.mode = Mode::HBlank;
            }
        } else if self.mode == Mode::OamEvaluation {
            self.pipeline.evaluate_sprite(
                self.cycle,
                self.scanline,
                self.registers.control.contains(Control::LARGE_SPRITES),
                &self.oam,
            );
        }

        self.update_ly_coincidence_flag();
        if self.mode != old_mode || self.ly_coincidence_flag != old_coincidence {
            self.update_stat_irq(host);
        }

        debug_assert!(self.cycle < CYCLES_PER_SCANLINE);
        debug_assert!(self.scanline < SCANLINES_PER_FRAME);
    }

    /// The LY=LYC comparison with its model-specific timing windows. LY
    /// changes 4 dots into a line, except that line 153 reports itself
    /// for only 4 dots before reading as line 0 for the rest of VBlank.
    fn update_ly_coincidence_flag(&mut self) {
        let lyc = self.registers.ly_compare;
        self.ly_coincidence_flag = if self.scanline < 153 {
            lyc == self.scanline && (self.cycle >= 4 || self.scanline == 0)
        } else if lyc == 153 {
            self.cycle >= 4 && self.cycle < 8
        } else {
            lyc == 0 && self.cycle >= 12
        };
    }

    /// Recompute the STAT interrupt line and request the interrupt on a
    /// rising edge. The line is the OR of the enabled conditions; holding
    /// one condition high masks edges from the others.
    fn update_stat_irq(&mut self, host: &mut impl Host) {
        let status = self.registers.status;
        let level = self.registers.control.contains(Control::LCD_ENABLE)
            && ((self.ly_coincidence_flag && status.contains(StatusFlags::COINCIDENCE_IRQ))
                || (self.mode == Mode::HBlank && status.contains(StatusFlags::HBLANK_IRQ))
                || (self.mode == Mode::OamEvaluation && status.contains(StatusFlags::OAM_IRQ))
                || (self.mode == Mode::VBlank
                    && (status.contains(StatusFlags::VBLANK_IRQ)
                        || status.contains(StatusFlags::OAM_IRQ))));

        if level && !self.stat_irq_flag {
            host.request_irq(IrqSource::LcdStat);
        }
        self.stat_irq_flag = level;
    }

    fn send_frame(&mut self, host: &mut impl Host) {
        host.event(PpuEvent::EndFrame);
        self.frame_count += 1;
        host.frame_ready(self.buffers.frame(self.frame_count));

        // Input is polled once per frame; a changed port value after the
        // host's end-of-frame processing raises the joypad interrupt.
        let prev_input = host.input_port();
        host.end_of_frame();
        if prev_input != host.input_port() {
            host.request_irq(IrqSource::Joypad);
        }

        self.buffers.flip();
    }

    pub fn read_register(&self, addr: u16) -> u8 {
        match addr {
            0xFF40 => self.registers.control.bits(),
            0xFF41 => {
                0x80 | self.registers.status.bits()
                    | ((self.ly_coincidence_flag as u8) << 2)
                    | self.mode as u8
            }
            0xFF42 => self.registers.scroll_y,
            0xFF43 => self.registers.scroll_x,
            0xFF44 => self.scanline,
            0xFF45 => self.registers.ly_compare,
            0xFF47 => self.registers.bg_palette,
            0xFF48 => self.registers.obj_palette0,
            0xFF49 => self.registers.obj_palette1,
            0xFF4A => self.registers.window_y,
            0xFF4B => self.registers.window_x,
            0xFF4F => self.cgb_vram_bank,
            0xFF68 => self.cgb_bg_palettes.read_index(),
            0xFF69 => self.cgb_bg_palettes.read_data(),
            0xFF6A => self.cgb_obj_palettes.read_index(),
            0xFF6B => self.cgb_obj_palettes.read_data(),
            _ => {
                debug!("missing PPU read handler: {addr:#06x}");
                0xFF
            }
        }
    }

    pub fn write_register(&mut self, host: &mut impl Host, addr: u16, value: u8) {
        match addr {
            0xFF40 => {
                let was_enabled = self.registers.control.contains(Control::LCD_ENABLE);
                self.registers.control = Control::from_bits_retain(value);
                let now_enabled = self.registers.control.contains(Control::LCD_ENABLE);

                if was_enabled != now_enabled {
                    if !now_enabled {
                        // Turning the LCD off resets the beam to the top
                        // of the screen and shows a blank frame.
                        self.cycle = 0;
                        self.scanline = 0;
                        self.mode = Mode::HBlank;

                        self.last_frame_time = host.master_cycle_count();
                        self.buffers.fill_blank();
                        self.send_frame(host);
                    } else {
                        self.cycle = 4;
                        self.scanline = 0;
                        self.pipeline.reset_renderer(self.registers.scroll_x);
                        self.mode = Mode::HBlank;
                        self.update_ly_coincidence_flag();
                        self.update_stat_irq(host);

                        host.event(PpuEvent::StartFrame);
                    }
                }
            }

            0xFF41 => {
                self.registers.status = StatusFlags::from_bits_truncate(value);
                self.update_stat_irq(host);
            }

            0xFF42 => self.registers.scroll_y = value,
            0xFF43 => self.registers.scroll_x = value,
            0xFF45 => self.registers.ly_compare = value,
            0xFF47 => self.registers.bg_palette = value,
            0xFF48 => self.registers.obj_palette0 = value,
            0xFF49 => self.registers.obj_palette1 = value,
            0xFF4A => self.registers.window_y = value,
            0xFF4B => self.registers.window_x = value,

            0xFF4F => self.cgb_vram_bank = value & 0x01,
            0xFF68 => self.cgb_bg_palettes.write_index(value),
            0xFF69 => {
                let writable = self.mode <= Mode::OamEvaluation;
                self.cgb_bg_palettes.write_data(value, writable);
            }
            0xFF6A => self.cgb_obj_palettes.write_index(value),
            0xFF6B => {
                let writable = self.mode <= Mode::OamEvaluation;
                self.cgb_obj_palettes.write_data(value, writable);
            }

            _ => debug!("missing PPU write handler: {addr:#06x} = {value:#04x}"),
        }
    }

    /// CPU-side VRAM read. Blocked while the pixel pipeline owns the
    /// VRAM bus (mode 3); blocked reads see 0xFF.
    pub fn read_vram(&self, addr: u16) -> u8 {
        if self.mode <= Mode::OamEvaluation {
            self.vram
                .read(((self.cgb_vram_bank as u16) << 13) | (addr & 0x1FFF))
        } else {
            0xFF
        }
    }

    /// CPU-side VRAM write, dropped while blocked.
    pub fn write_vram(&mut self, addr: u16, value: u8) {
        if self.mode <= Mode::OamEvaluation {
            self.vram
                .write(((self.cgb_vram_bank as u16) << 13) | (addr & 0x1FFF), value);
        }
    }

    /// CPU-side OAM read. Blocked during scanning and drawing and while
    /// an OAM DMA transfer is in flight.
    pub fn read_oam(&self, host: &impl Host, addr: u8) -> u8 {
        if addr < Oam::SIZE as u8 {
            if self.mode >= Mode::OamEvaluation || host.oam_dma_running() {
                0xFF
            } else {
                self.oam.read(addr)
            }
        } else {
            0
        }
    }

    /// CPU- or DMA-side OAM write. The DMA controller writes
    /// unconditionally; the CPU is gated by mode and the DMA lock, with
    /// a narrow window between scanning and drawing where writes land.
    pub fn write_oam(&mut self, host: &impl Host, addr: u8, value: u8, for_dma: bool) {
        if addr < Oam::SIZE as u8 {
            if for_dma
                || (self.mode <= Mode::VBlank && !host.oam_dma_running())
                || (self.cycle >= 80 && self.cycle < 84)
            {
                self.oam.write(addr, value);
            }
        }
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}
