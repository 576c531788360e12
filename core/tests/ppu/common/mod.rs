use dotmatrix_core::ppu::frame::{Frame, BUFFER_WIDTH};
use dotmatrix_core::ppu::DOTS_PER_FRAME;
use dotmatrix_core::{Host, IrqSource, Model, Ppu, PpuEvent};

/// A recording host: captures every IRQ request, event and delivered
/// frame, and lets tests control the model, the master clock, the OAM
/// DMA flag and the input port.
pub struct TestHost {
    pub model: Model,
    pub cycles: u64,
    pub dma_running: bool,
    pub input: u8,
    /// Applied by `end_of_frame`, to exercise the per-frame input poll.
    pub input_after_frame: Option<u8>,
    pub irqs: Vec<IrqSource>,
    pub events: Vec<PpuEvent>,
    pub frames: Vec<Vec<u16>>,
    pub frame_counts: Vec<u32>,
}

impl TestHost {
    pub fn new() -> Self {
        Self {
            model: Model::Dmg,
            cycles: 0,
            dma_running: false,
            input: 0xFF,
            input_after_frame: None,
            irqs: Vec::new(),
            events: Vec::new(),
            frames: Vec::new(),
            frame_counts: Vec::new(),
        }
    }

    pub fn cgb() -> Self {
        Self {
            model: Model::Cgb,
            ..Self::new()
        }
    }

    pub fn clear(&mut self) {
        self.irqs.clear();
        self.events.clear();
        self.frames.clear();
        self.frame_counts.clear();
    }

    pub fn irq_count(&self, irq: IrqSource) -> usize {
        self.irqs.iter().filter(|&&i| i == irq).count()
    }

    pub fn event_count(&self, event: PpuEvent) -> usize {
        self.events.iter().filter(|&&e| e == event).count()
    }
}

impl Host for TestHost {
    fn model(&self) -> Model {
        self.model
    }

    fn master_cycle_count(&self) -> u64 {
        self.cycles
    }

    fn oam_dma_running(&self) -> bool {
        self.dma_running
    }

    fn request_irq(&mut self, irq: IrqSource) {
        self.irqs.push(irq);
    }

    fn event(&mut self, event: PpuEvent) {
        self.events.push(event);
    }

    fn frame_ready(&mut self, frame: Frame<'_>) {
        self.frames.push(frame.raw().to_vec());
        self.frame_counts.push(frame.frame_count());
    }

    fn input_port(&self) -> u8 {
        self.input
    }

    fn end_of_frame(&mut self) {
        if let Some(value) = self.input_after_frame.take() {
            self.input = value;
        }
    }
}

/// Step the PPU for a fixed number of dots, advancing the master clock
/// one cycle per dot.
pub fn run_dots(ppu: &mut Ppu, host: &mut TestHost, dots: u32) {
    for _ in 0..dots {
        host.cycles += 1;
        ppu.step(host);
    }
}

/// Step until `count` more frames have been delivered.
pub fn run_frames(ppu: &mut Ppu, host: &mut TestHost, count: u32) {
    let target = host.frames.len() + count as usize;
    for _ in 0..(count + 1) * DOTS_PER_FRAME {
        host.cycles += 1;
        ppu.step(host);
        if host.frames.len() >= target {
            return;
        }
    }
    panic!(
        "PPU delivered {} frames, expected {}",
        host.frames.len(),
        target
    );
}

/// Visible pixel of a captured frame buffer.
pub fn pixel(frame: &[u16], x: usize, y: usize) -> u16 {
    frame[y * BUFFER_WIDTH + x]
}

pub fn visible_pixels(frame: &[u16]) -> impl Iterator<Item = u16> + '_ {
    (0..144).flat_map(move |y| (0..160).map(move |x| pixel(frame, x, y)))
}

/// Write one 8-pixel row of tile data: `low`/`high` are the two
/// bitplanes, bit 7 leftmost.
pub fn set_tile_row(ppu: &mut Ppu, tile_addr: u16, row: u16, low: u8, high: u8) {
    ppu.write_vram(tile_addr + row * 2, low);
    ppu.write_vram(tile_addr + row * 2 + 1, high);
}

/// Fill all 8 rows of a tile with the same bitplane pair, making a tile
/// of one solid color index.
pub fn solid_tile(ppu: &mut Ppu, tile_addr: u16, low: u8, high: u8) {
    for row in 0..8 {
        set_tile_row(ppu, tile_addr, row, low, high);
    }
}

/// Fill a 32x32 tilemap with a single tile index.
pub fn fill_tilemap(ppu: &mut Ppu, map_addr: u16, tile_index: u8) {
    for offset in 0..0x400 {
        ppu.write_vram(map_addr + offset, tile_index);
    }
}

/// Write one OAM entry through the CPU-visible gate (the fresh PPU sits
/// in HBlank, where writes land).
pub fn set_sprite(ppu: &mut Ppu, host: &TestHost, index: u8, y: u8, x: u8, tile: u8, attr: u8) {
    ppu.write_oam(host, index * 4, y, false);
    ppu.write_oam(host, index * 4 + 1, x, false);
    ppu.write_oam(host, index * 4 + 2, tile, false);
    ppu.write_oam(host, index * 4 + 3, attr, false);
}

/// Shades of the power-on monochrome palettes, for readable assertions.
pub const WHITE: u16 = 0x7FFF;
pub const LIGHT_GRAY: u16 = 0x6318;
pub const DARK_GRAY: u16 = 0x318C;
pub const BLACK: u16 = 0x0000;

/// The identity-style palette used by most rendering tests:
/// index 0 -> white, 1 -> light gray, 2 -> dark gray, 3 -> black.
pub const IDENTITY_PALETTE: u8 = 0xE4;
