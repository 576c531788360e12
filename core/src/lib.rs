pub mod ppu;

pub use ppu::{Host, IrqSource, Mode, Model, Ppu, PpuEvent};
