use std::{fs, path::Path};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use nanoserde::{DeRon, DeRonErr, DeRonState, SerRon, SerRonState};

use super::memory::{Oam, Vram};
use super::palette::PaletteRam;
use super::pixel_pipeline::{Fetcher, FifoEntry, PixelFifo, PixelPipeline};
use super::frame::FrameBuffers;
use super::{Control, Mode, Ppu, Registers, StatusFlags, CYCLES_PER_SCANLINE, SCANLINES_PER_FRAME};

/// A bulk memory block (VRAM, OAM). Stored in the RON as a single
/// base64 string rather than a multi-thousand-entry integer list,
/// piggybacking on the `String` serializer for quoting.
pub struct Blob(pub Vec<u8>);

impl SerRon for Blob {
    fn ser_ron(&self, indent_level: usize, state: &mut SerRonState) {
        STANDARD.encode(&self.0).ser_ron(indent_level, state);
    }
}

impl DeRon for Blob {
    fn de_ron(state: &mut DeRonState, input: &mut std::str::Chars<'_>) -> Result<Self, DeRonErr> {
        let text = String::de_ron(state, input)?;
        match STANDARD.decode(text.as_bytes()) {
            Ok(data) => Ok(Blob(data)),
            Err(err) => Err(state.err_parse(&format!("bad base64 block: {err}"))),
        }
    }
}

#[derive(SerRon, DeRon)]
pub struct FetcherState {
    pub step: u8,
    pub addr: u16,
    pub attributes: u8,
    pub low_byte: u8,
    pub high_byte: u8,
}

impl FetcherState {
    fn capture(fetcher: &Fetcher) -> Self {
        Self {
            step: fetcher.step,
            addr: fetcher.addr,
            attributes: fetcher.attributes,
            low_byte: fetcher.low_byte,
            high_byte: fetcher.high_byte,
        }
    }

    fn restore(&self) -> Fetcher {
        Fetcher {
            step: self.step,
            addr: self.addr,
            attributes: self.attributes,
            low_byte: self.low_byte,
            high_byte: self.high_byte,
        }
    }
}

#[derive(SerRon, DeRon)]
pub struct FifoState {
    pub colors: Vec<u8>,
    pub attributes: Vec<u8>,
    pub position: u8,
    pub size: u8,
}

impl FifoState {
    fn capture(fifo: &PixelFifo) -> Self {
        Self {
            colors: fifo.content.iter().map(|entry| entry.color).collect(),
            attributes: fifo.content.iter().map(|entry| entry.attributes).collect(),
            position: fifo.position,
            size: fifo.size,
        }
    }

    fn restore(&self) -> PixelFifo {
        let mut fifo = PixelFifo {
            content: [FifoEntry::default(); 8],
            position: self.position & 0x07,
            size: self.size.min(8),
        };
        for i in 0..8 {
            fifo.content[i] = FifoEntry {
                color: self.colors.get(i).copied().unwrap_or(0),
                attributes: self.attributes.get(i).copied().unwrap_or(0),
            };
        }
        fifo
    }
}

#[derive(SerRon, DeRon)]
pub struct PipelineState {
    pub bg_fifo: FifoState,
    pub oam_fifo: FifoState,
    pub bg_fetcher: FetcherState,
    pub oam_fetcher: FetcherState,
    pub sprite_x: Vec<u8>,
    pub sprite_indexes: Vec<u8>,
    pub sprite_count: u8,
    pub prev_sprite: u8,
    pub drawn_pixels: i16,
    pub fetch_column: u8,
    pub fetch_window: bool,
    pub fetch_sprite: i16,
}

impl PipelineState {
    fn capture(pipeline: &PixelPipeline) -> Self {
        Self {
            bg_fifo: FifoState::capture(&pipeline.bg_fifo),
            oam_fifo: FifoState::capture(&pipeline.oam_fifo),
            bg_fetcher: FetcherState::capture(&pipeline.bg_fetcher),
            oam_fetcher: FetcherState::capture(&pipeline.oam_fetcher),
            sprite_x: pipeline.sprite_x.to_vec(),
            sprite_indexes: pipeline.sprite_indexes.to_vec(),
            sprite_count: pipeline.sprite_count,
            prev_sprite: pipeline.prev_sprite,
            drawn_pixels: pipeline.drawn_pixels,
            fetch_column: pipeline.fetch_column,
            fetch_window: pipeline.fetch_window,
            fetch_sprite: pipeline.fetch_sprite,
        }
    }

    fn restore(&self) -> PixelPipeline {
        let mut pipeline = PixelPipeline::new();
        pipeline.bg_fifo = self.bg_fifo.restore();
        pipeline.oam_fifo = self.oam_fifo.restore();
        pipeline.bg_fetcher = self.bg_fetcher.restore();
        pipeline.oam_fetcher = self.oam_fetcher.restore();
        for i in 0..10 {
            pipeline.sprite_x[i] = self.sprite_x.get(i).copied().unwrap_or(0);
            pipeline.sprite_indexes[i] = self.sprite_indexes.get(i).copied().unwrap_or(0);
        }
        pipeline.sprite_count = self.sprite_count.min(10);
        pipeline.prev_sprite = self.prev_sprite.min(10);
        pipeline.drawn_pixels = self.drawn_pixels;
        pipeline.fetch_column = self.fetch_column & 0x1F;
        pipeline.fetch_window = self.fetch_window;
        pipeline.fetch_sprite = self.fetch_sprite;
        pipeline
    }
}

#[derive(SerRon, DeRon)]
pub struct PaletteRamState {
    pub colors: Vec<u16>,
    pub position: u8,
    pub auto_increment: bool,
}

impl PaletteRamState {
    fn capture(ram: &PaletteRam) -> Self {
        let (colors, position, auto_increment) = ram.save();
        Self {
            colors,
            position,
            auto_increment,
        }
    }

    fn restore(&self) -> PaletteRam {
        PaletteRam::restore(&self.colors, self.position, self.auto_increment)
    }
}

/// A complete snapshot of the PPU. The output buffers are transient and
/// are not included; a restored PPU starts writing into blank buffers.
#[derive(SerRon, DeRon)]
pub struct PpuSaveState {
    pub control: u8,
    pub status: u8,
    pub scroll_x: u8,
    pub scroll_y: u8,
    pub window_x: u8,
    pub window_y: u8,
    pub ly_compare: u8,
    pub bg_palette: u8,
    pub obj_palette0: u8,
    pub obj_palette1: u8,

    pub scanline: u8,
    pub cycle: u16,
    pub mode: u8,
    pub ly_coincidence_flag: bool,
    pub stat_irq_flag: bool,
    pub frame_count: u32,
    pub last_frame_time: u64,

    pub cgb_vram_bank: u8,
    pub cgb_bg_palettes: PaletteRamState,
    pub cgb_obj_palettes: PaletteRamState,

    pub vram: Blob,
    pub oam: Blob,

    pub pipeline: PipelineState,
}

impl PpuSaveState {
    pub fn capture(ppu: &Ppu) -> Self {
        Self {
            control: ppu.registers.control.bits(),
            status: ppu.registers.status.bits(),
            scroll_x: ppu.registers.scroll_x,
            scroll_y: ppu.registers.scroll_y,
            window_x: ppu.registers.window_x,
            window_y: ppu.registers.window_y,
            ly_compare: ppu.registers.ly_compare,
            bg_palette: ppu.registers.bg_palette,
            obj_palette0: ppu.registers.obj_palette0,
            obj_palette1: ppu.registers.obj_palette1,

            scanline: ppu.scanline,
            cycle: ppu.cycle,
            mode: ppu.mode as u8,
            ly_coincidence_flag: ppu.ly_coincidence_flag,
            stat_irq_flag: ppu.stat_irq_flag,
            frame_count: ppu.frame_count,
            last_frame_time: ppu.last_frame_time,

            cgb_vram_bank: ppu.cgb_vram_bank,
            cgb_bg_palettes: PaletteRamState::capture(&ppu.cgb_bg_palettes),
            cgb_obj_palettes: PaletteRamState::capture(&ppu.cgb_obj_palettes),

            vram: Blob(ppu.vram.bytes().to_vec()),
            oam: Blob(ppu.oam.bytes().to_vec()),

            pipeline: PipelineState::capture(&ppu.pipeline),
        }
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), String> {
        fs::write(path, self.serialize_ron())
            .map_err(|err| format!("could not write PPU state to {}: {err}", path.display()))
    }

    pub fn load_from_file(path: &Path) -> Result<Self, String> {
        let text = fs::read_to_string(path)
            .map_err(|err| format!("could not read PPU state from {}: {err}", path.display()))?;
        Self::deserialize_ron(&text)
            .map_err(|err| format!("malformed PPU state in {}: {err}", path.display()))
    }
}

impl Ppu {
    pub fn save_state(&self) -> PpuSaveState {
        PpuSaveState::capture(self)
    }

    pub fn from_state(state: &PpuSaveState) -> Ppu {
        let mut vram = Vram::new();
        vram.copy_from(&state.vram.0);
        let mut oam = Oam::new();
        oam.copy_from(&state.oam.0);

        Ppu {
            registers: Registers {
                control: Control::from_bits_retain(state.control),
                status: StatusFlags::from_bits_truncate(state.status),
                scroll_x: state.scroll_x,
                scroll_y: state.scroll_y,
                window_x: state.window_x,
                window_y: state.window_y,
                ly_compare: state.ly_compare,
                bg_palette: state.bg_palette,
                obj_palette0: state.obj_palette0,
                obj_palette1: state.obj_palette1,
            },
            scanline: state.scanline % SCANLINES_PER_FRAME,
            cycle: state.cycle % CYCLES_PER_SCANLINE,
            mode: Mode::from_u8(state.mode),
            ly_coincidence_flag: state.ly_coincidence_flag,
            stat_irq_flag: state.stat_irq_flag,
            frame_count: state.frame_count,
            last_frame_time: state.last_frame_time,
            vram,
            oam,
            cgb_vram_bank: state.cgb_vram_bank & 0x01,
            cgb_bg_palettes: state.cgb_bg_palettes.restore(),
            cgb_obj_palettes: state.cgb_obj_palettes.restore(),
            pipeline: state.pipeline.restore(),
            buffers: FrameBuffers::new(),
        }
    }
}
