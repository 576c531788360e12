use super::frame::BUFFER_WIDTH;
use super::memory::{Oam, Vram};
use super::palette::{self, PaletteRam};
use super::{Control, Model, Registers};

/// Everything the per-dot renderer reads but does not own: the register
/// file, the model variant and the color palette RAMs. Rebuilt by the
/// caller every dot so the pipeline always sees the current register
/// snapshot.
pub(crate) struct DrawContext<'a> {
    pub scanline: u8,
    pub cycle: u16,
    pub model: Model,
    pub regs: &'a Registers,
    pub bg_palettes: &'a PaletteRam,
    pub obj_palettes: &'a PaletteRam,
}

impl DrawContext<'_> {
    fn sprite_height(&self) -> u8 {
        if self.regs.control.contains(Control::LARGE_SPRITES) {
            16
        } else {
            8
        }
    }
}

/// One pixel waiting in a FIFO. The attribute byte carries the palette
/// selection, tile bank, horizontal mirror and the background-over-sprite
/// priority bit, in the OAM/tile-attribute layout.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub(crate) struct FifoEntry {
    pub color: u8,
    pub attributes: u8,
}

/// Fixed 8-slot pixel queue. A ring buffer with a read head and a fill
/// count; a whole tile row is loaded at once and pixels leave one per dot.
pub(crate) struct PixelFifo {
    pub content: [FifoEntry; 8],
    pub position: u8,
    pub size: u8,
}

impl PixelFifo {
    fn new() -> Self {
        Self {
            content: [FifoEntry::default(); 8],
            position: 0,
            size: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.position = 0;
        self.size = 0;
        self.content = [FifoEntry::default(); 8];
    }

    fn front(&self) -> FifoEntry {
        self.content[self.position as usize]
    }

    /// Remove the front pixel. The vacated slot reads as transparent so
    /// a later sprite overlay can claim it.
    fn pop(&mut self) {
        debug_assert!(self.size > 0);
        self.content[self.position as usize].color = 0;
        self.size -= 1;
        self.position = (self.position + 1) & 0x07;
    }
}

/// A tile fetcher. Both the background/window fetcher and the sprite
/// fetcher run the same 6-step micro-sequence (address generation on
/// step 1, bitplane reads on steps 3 and 5) with steps 6 and 7 acting as
/// hold states while a full FIFO drains.
#[derive(Default)]
pub(crate) struct Fetcher {
    pub step: u8,
    pub addr: u16,
    pub attributes: u8,
    pub low_byte: u8,
    pub high_byte: u8,
}

/// The mode 3 pixel pipeline: two fetchers feeding two FIFOs, the sprite
/// scan results gathered during mode 2, and the line's drawing cursors.
pub(crate) struct PixelPipeline {
    pub bg_fifo: PixelFifo,
    pub oam_fifo: PixelFifo,
    pub bg_fetcher: Fetcher,
    pub oam_fetcher: Fetcher,

    /// X positions and OAM byte offsets of the sprites selected during
    /// mode 2, kept in matching order.
    pub sprite_x: [u8; 10],
    pub sprite_indexes: [u8; 10],
    pub sprite_count: u8,
    /// Cursor into the selected sprite list during mode 3.
    pub prev_sprite: u8,

    /// Pixels emitted on the current line. Starts negative: the first
    /// 8 + (scroll_x & 7) pops discard the stale pre-roll row and the
    /// partial first tile, which implements fine X scrolling.
    pub drawn_pixels: i16,
    /// Background tile column the fetcher will read next (0..31).
    pub fetch_column: u8,
    /// Latched once the beam enters the window rectangle.
    pub fetch_window: bool,
    /// OAM byte offset of the sprite being fetched, or -1.
    pub fetch_sprite: i16,
}

impl PixelPipeline {
    pub(crate) fn new() -> Self {
        Self {
            bg_fifo: PixelFifo::new(),
            oam_fifo: PixelFifo::new(),
            bg_fetcher: Fetcher::default(),
            oam_fetcher: Fetcher::default(),
            sprite_x: [0; 10],
            sprite_indexes: [0; 10],
            sprite_count: 0,
            prev_sprite: 0,
            drawn_pixels: 0,
            fetch_column: 0,
            fetch_window: false,
            fetch_sprite: -1,
        }
    }

    pub(crate) fn drawn_pixels(&self) -> i16 {
        self.drawn_pixels
    }

    pub(crate) fn begin_oam_scan(&mut self) {
        self.sprite_count = 0;
        self.prev_sprite = 0;
    }

    /// Prepare the fetchers and FIFOs for a line of mode 3. The BG FIFO
    /// is marked full so its stale contents shift out during the initial
    /// discard window; its pixels are never written to the output.
    pub(crate) fn reset_renderer(&mut self, scroll_x: u8) {
        self.oam_fifo.reset();
        self.oam_fetcher.step = 0;

        self.bg_fifo.reset();
        self.bg_fifo.size = 8;
        self.bg_fetcher.step = 0;

        self.drawn_pixels = -8 - (scroll_x & 0x07) as i16;
        self.fetch_sprite = -1;
        self.fetch_window = false;
        self.fetch_column = scroll_x / 8;
    }

    /// Mode 2 sprite evaluation. The hardware takes two cycles per OAM
    /// slot; the comparison work lands on the odd cycle of each pair.
    /// At most 10 sprites are kept, in OAM order.
    pub(crate) fn evaluate_sprite(&mut self, cycle: u16, scanline: u8, large_sprites: bool, oam: &Oam) {
        if cycle & 0x01 == 0 {
            return;
        }
        if self.sprite_count >= 10 {
            return;
        }

        let sprite_index = (((cycle - 4) >> 1) * 4) as u8;
        let sprite_y = oam.read(sprite_index) as i16 - 16;
        let height = if large_sprites { 16 } else { 8 };
        if (scanline as i16) >= sprite_y && (scanline as i16) < sprite_y + height {
            self.sprite_x[self.sprite_count as usize] = oam.read(sprite_index + 1);
            self.sprite_indexes[self.sprite_count as usize] = sprite_index;
            self.sprite_count += 1;
        }
    }

    /// Order the selected sprites for mode 3: X position ascending, OAM
    /// index breaking ties. The X and index arrays are sorted as pairs so
    /// the trigger position and the fetched sprite stay in correspondence.
    pub(crate) fn sort_sprites(&mut self) {
        debug_assert!(self.sprite_count <= 10);
        let count = self.sprite_count as usize;

        let mut pairs = [(0u8, 0u8); 10];
        for i in 0..count {
            pairs[i] = (self.sprite_x[i], self.sprite_indexes[i]);
        }
        pairs[..count].sort_unstable_by_key(|&(x, index)| (x, index));
        for i in 0..count {
            self.sprite_x[i] = pairs[i].0;
            self.sprite_indexes[i] = pairs[i].1;
        }
    }

    /// One dot of mode 3: mix and emit a pixel if one is ready, then
    /// clock the fetchers.
    pub(crate) fn draw_cycle(
        &mut self,
        ctx: &DrawContext,
        vram: &Vram,
        oam: &Oam,
        output: &mut [u16],
    ) {
        if ctx.cycle < 89 {
            // The pipeline idles for the first dots of mode 3.
            return;
        }

        let fetch_window = ctx.regs.control.contains(Control::WINDOW_ENABLE)
            && self.drawn_pixels >= ctx.regs.window_x as i16 - 7
            && ctx.scanline >= ctx.regs.window_y;
        if self.fetch_window != fetch_window {
            // Switched between window and background: restart the fetcher
            // from window column 0 with an empty FIFO. This dot is idle.
            self.fetch_window = fetch_window;
            self.fetch_column = 0;

            self.bg_fetcher.step = 0;
            self.bg_fifo.reset();
            return;
        }

        if self.fetch_sprite == -1 && self.bg_fifo.size > 0 {
            if self.drawn_pixels >= 0 {
                let offset = ctx.scanline as usize * BUFFER_WIDTH + self.drawn_pixels as usize;

                let mut entry = self.bg_fifo.front();
                let mut is_sprite = false;
                if self.oam_fifo.size > 0 {
                    let sprite = self.oam_fifo.front();
                    if sprite.color != 0 && (entry.color == 0 || sprite.attributes & 0x80 == 0) {
                        entry = sprite;
                        is_sprite = true;
                    }
                }

                output[offset] = Self::lookup_color(ctx, entry, is_sprite);
            }

            self.bg_fifo.pop();
            self.drawn_pixels += 1;

            if self.oam_fifo.size > 0 {
                self.oam_fifo.pop();
            }
        }

        self.clock_tile_fetcher(ctx, vram, oam);
    }

    fn lookup_color(ctx: &DrawContext, entry: FifoEntry, is_sprite: bool) -> u16 {
        if ctx.model.is_cgb() {
            let index = (entry.color | ((entry.attributes & 0x07) << 2)) as usize;
            if is_sprite {
                ctx.obj_palettes.color(index)
            } else {
                ctx.bg_palettes.color(index)
            }
        } else if is_sprite {
            let packed = if entry.attributes & 0x10 != 0 {
                ctx.regs.obj_palette1
            } else {
                ctx.regs.obj_palette0
            };
            palette::bw_color(packed, entry.color)
        } else {
            palette::bw_color(ctx.regs.bg_palette, entry.color)
        }
    }

    /// Clock the background fetcher, unless a latched sprite preempts it.
    /// The background fetcher keeps running underneath a pending sprite
    /// only until it has both bitplanes and a row in the FIFO; from then
    /// on the sprite fetcher gets the VRAM bus.
    fn clock_tile_fetcher(&mut self, ctx: &DrawContext, vram: &Vram, oam: &Oam) {
        self.find_next_sprite(ctx);
        if self.fetch_sprite >= 0 && self.bg_fetcher.step >= 5 && self.bg_fifo.size > 0 {
            self.clock_sprite_fetcher(ctx, vram, oam);
            self.find_next_sprite(ctx);
            return;
        }

        let step = self.bg_fetcher.step;
        self.bg_fetcher.step += 1;
        match step {
            1 => {
                // Fetch the tile index, and on the color model the
                // co-located attribute byte from bank 1.
                let (tilemap_addr, y_offset) = if self.fetch_window {
                    let base: u16 = if ctx.regs.control.contains(Control::WINDOW_TILEMAP) {
                        0x1C00
                    } else {
                        0x1800
                    };
                    (base, ctx.scanline.wrapping_sub(ctx.regs.window_y))
                } else {
                    let base: u16 = if ctx.regs.control.contains(Control::BG_TILEMAP) {
                        0x1C00
                    } else {
                        0x1800
                    };
                    (base, ctx.regs.scroll_y.wrapping_add(ctx.scanline))
                };

                let row = y_offset >> 3;
                let tile_addr = tilemap_addr + self.fetch_column as u16 + row as u16 * 32;
                let tile_index = vram.read(tile_addr);

                let attributes = if ctx.model.is_cgb() {
                    vram.read(tile_addr | 0x2000)
                } else {
                    0
                };
                let v_mirror = attributes & 0x40 != 0;
                let tile_bank: u16 = if attributes & 0x08 != 0 { 0x2000 } else { 0 };

                let tile_y = if v_mirror {
                    (7 - (y_offset & 0x07)) as u16
                } else {
                    (y_offset & 0x07) as u16
                };
                // Tile index is signed when the 0x1000 data area is
                // selected, unsigned from 0x0000 otherwise.
                let tile_row_addr = if ctx.regs.control.contains(Control::BG_TILE_SELECT) {
                    tile_index as u16 * 16 + tile_y * 2
                } else {
                    (0x1000 + (tile_index as i8 as i32) * 16) as u16 + tile_y * 2
                };
                self.bg_fetcher.addr = tile_row_addr | tile_bank;
                self.bg_fetcher.attributes = attributes & 0xBF;
            }

            3 => {
                self.bg_fetcher.low_byte = vram.read(self.bg_fetcher.addr);
            }

            5 | 6 | 7 => {
                if step == 5 {
                    self.bg_fetcher.high_byte = vram.read(self.bg_fetcher.addr + 1);
                }
                if self.bg_fifo.size == 0 {
                    self.push_tile_to_fifo(ctx);
                } else if self.bg_fetcher.step == 8 {
                    // Hold until the FIFO drains.
                    self.bg_fetcher.step = 7;
                }
            }

            _ => {}
        }
    }

    /// Latch the next sprite whose left edge sits at the current pixel.
    /// On the color model the timing penalty applies even with sprites
    /// disabled; only the final FIFO write is suppressed.
    fn find_next_sprite(&mut self, ctx: &DrawContext) {
        if self.prev_sprite < self.sprite_count
            && self.fetch_sprite < 0
            && (ctx.regs.control.contains(Control::SPRITES_ENABLE) || ctx.model.is_cgb())
        {
            for i in self.prev_sprite..self.sprite_count {
                if self.sprite_x[i as usize] as i16 - 8 == self.drawn_pixels {
                    self.fetch_sprite = self.sprite_indexes[i as usize] as i16;
                    self.prev_sprite += 1;
                    self.oam_fetcher.step = 0;
                    break;
                }
            }
        }
    }

    fn clock_sprite_fetcher(&mut self, ctx: &DrawContext, vram: &Vram, oam: &Oam) {
        let step = self.oam_fetcher.step;
        self.oam_fetcher.step += 1;
        match step {
            1 => {
                // Compute the sprite tile row address.
                let index = self.fetch_sprite as u8;
                let sprite_y = oam.read(index) as i16 - 16;
                let mut tile = oam.read(index + 2);
                let attributes = oam.read(index + 3);
                let v_mirror = attributes & 0x40 != 0;
                let tile_bank: u16 = if ctx.model.is_cgb() && attributes & 0x08 != 0 {
                    0x2000
                } else {
                    0
                };

                let line = ctx.scanline as i16 - sprite_y;
                let offset_y = if v_mirror {
                    ((ctx.sprite_height() - 1) as i16 - line) as u8
                } else {
                    line as u8
                };
                if ctx.regs.control.contains(Control::LARGE_SPRITES) {
                    tile &= 0xFE;
                }

                self.oam_fetcher.addr = (tile as u16 * 16 + offset_y as u16 * 2) | tile_bank;
                self.oam_fetcher.attributes = attributes;
            }

            3 => {
                self.oam_fetcher.low_byte = vram.read(self.oam_fetcher.addr);
            }

            5 => {
                self.oam_fetcher.high_byte = vram.read(self.oam_fetcher.addr + 1);
                self.push_sprite_to_fifo(ctx);
            }

            _ => {}
        }
    }

    /// Overlay the fetched sprite row onto the sprite FIFO. A slot is
    /// only taken when it currently holds a transparent pixel and the new
    /// pixel is opaque, so the first sprite latched at a position wins.
    fn push_sprite_to_fifo(&mut self, ctx: &DrawContext) {
        self.fetch_sprite = -1;
        self.oam_fetcher.step = 0;

        if !ctx.regs.control.contains(Control::SPRITES_ENABLE) {
            return;
        }

        let mut pos = self.oam_fifo.position as usize;
        for i in 0..8 {
            let shift = if self.oam_fetcher.attributes & 0x20 != 0 {
                i
            } else {
                7 - i
            };
            let mut bits = (self.oam_fetcher.low_byte >> shift) & 0x01;
            bits |= ((self.oam_fetcher.high_byte >> shift) & 0x01) << 1;

            if bits > 0 && self.oam_fifo.content[pos].color == 0 {
                self.oam_fifo.content[pos].color = bits;
                self.oam_fifo.content[pos].attributes = self.oam_fetcher.attributes;
            }
            pos = (pos + 1) & 0x07;
        }
        self.oam_fifo.size = 8;
    }

    /// Load the fetched tile row into the (empty) background FIFO. The
    /// horizontal mirror attribute picks the bit order; with the
    /// background disabled every pixel is pushed as color 0.
    fn push_tile_to_fifo(&mut self, ctx: &DrawContext) {
        let bg_enabled = ctx.regs.control.contains(Control::BG_ENABLE);
        for i in 0..8 {
            let shift = if self.bg_fetcher.attributes & 0x20 != 0 {
                i
            } else {
                7 - i
            };
            let mut bits = (self.bg_fetcher.low_byte >> shift) & 0x01;
            bits |= ((self.bg_fetcher.high_byte >> shift) & 0x01) << 1;

            self.bg_fifo.content[i as usize].color = if bg_enabled { bits } else { 0 };
            self.bg_fifo.content[i as usize].attributes = self.bg_fetcher.attributes;
        }

        self.fetch_column = (self.fetch_column + 1) & 0x1F;
        self.bg_fifo.position = 0;
        self.bg_fifo.size = 8;
        self.bg_fetcher.step = 0;
    }
}
