use dotmatrix_core::ppu::DOTS_PER_FRAME;
use dotmatrix_core::{IrqSource, Ppu, PpuEvent};

use crate::common::{run_dots, run_frames, TestHost};

fn run_until(ppu: &mut Ppu, host: &mut TestHost, pred: impl Fn(&Ppu, &TestHost) -> bool) {
    for _ in 0..2 * DOTS_PER_FRAME {
        host.cycles += 1;
        ppu.step(host);
        if pred(ppu, host) {
            return;
        }
    }
    panic!("condition never reached");
}

/// Count LCD STAT interrupts over one full frame, starting at a frame
/// boundary.
fn stat_irqs_in_one_frame(ppu: &mut Ppu, host: &mut TestHost) -> usize {
    run_until(ppu, host, |_, h| h.event_count(PpuEvent::StartFrame) > 0);
    host.clear();
    run_dots(ppu, host, DOTS_PER_FRAME);
    host.irq_count(IrqSource::LcdStat)
}

#[test]
fn coincidence_irq_fires_once_per_frame_at_the_compared_line() {
    let mut ppu = Ppu::new();
    let mut host = TestHost::new();
    ppu.write_register(&mut host, 0xFF45, 80);
    ppu.write_register(&mut host, 0xFF41, 0x40);

    host.clear();
    run_until(&mut ppu, &mut host, |_, h| {
        h.irq_count(IrqSource::LcdStat) == 1
    });
    assert_eq!(ppu.scanline(), 80);
    assert_eq!(ppu.cycle(), 4);

    host.clear();
    run_dots(&mut ppu, &mut host, DOTS_PER_FRAME);
    assert_eq!(host.irq_count(IrqSource::LcdStat), 1);
}

#[test]
fn lyc_zero_matches_late_on_line_153() {
    let mut ppu = Ppu::new();
    let mut host = TestHost::new();
    ppu.write_register(&mut host, 0xFF45, 0);
    ppu.write_register(&mut host, 0xFF41, 0x40);

    // The flag holds from line 153 cycle 12 all the way through line 0,
    // so the only rising edge of the frame is at (153, 12).
    host.clear();
    run_until(&mut ppu, &mut host, |_, h| {
        h.irq_count(IrqSource::LcdStat) == 1
    });
    assert_eq!(ppu.scanline(), 153);
    assert_eq!(ppu.cycle(), 12);

    host.clear();
    run_dots(&mut ppu, &mut host, DOTS_PER_FRAME);
    assert_eq!(host.irq_count(IrqSource::LcdStat), 1);
}

#[test]
fn lyc_153_matches_only_cycles_4_to_7() {
    let mut ppu = Ppu::new();
    let mut host = TestHost::new();
    ppu.write_register(&mut host, 0xFF45, 153);

    run_until(&mut ppu, &mut host, |p, _| p.scanline() == 153 && p.cycle() == 5);
    assert_eq!(ppu.read_register(0xFF41) & 0x04, 0x04);

    run_until(&mut ppu, &mut host, |p, _| p.cycle() == 8);
    assert_eq!(ppu.read_register(0xFF41) & 0x04, 0);

    // And the edge lands at cycle 4.
    ppu.write_register(&mut host, 0xFF41, 0x40);
    host.clear();
    run_until(&mut ppu, &mut host, |_, h| {
        h.irq_count(IrqSource::LcdStat) == 1
    });
    assert_eq!(ppu.scanline(), 153);
    assert_eq!(ppu.cycle(), 4);
}

#[test]
fn hblank_irq_fires_once_per_hblank_entry() {
    let mut ppu = Ppu::new();
    let mut host = TestHost::new();
    ppu.write_register(&mut host, 0xFF41, 0x08);

    // 144 mid-line entries plus the early HBlank when line 153 wraps to
    // line 0 four dots before its OAM scan begins.
    assert_eq!(stat_irqs_in_one_frame(&mut ppu, &mut host), 145);
}

#[test]
fn oam_irq_fires_per_scan_entry_and_at_vblank() {
    let mut ppu = Ppu::new();
    let mut host = TestHost::new();
    ppu.write_register(&mut host, 0xFF41, 0x20);

    // 144 OAM scan entries; the OAM condition also raises the line when
    // VBlank begins.
    assert_eq!(stat_irqs_in_one_frame(&mut ppu, &mut host), 145);
}

#[test]
fn vblank_stat_irq_fires_once_per_frame() {
    let mut ppu = Ppu::new();
    let mut host = TestHost::new();
    ppu.write_register(&mut host, 0xFF41, 0x10);

    assert_eq!(stat_irqs_in_one_frame(&mut ppu, &mut host), 1);
}

#[test]
fn a_held_condition_masks_edges_from_other_sources() {
    let mut ppu = Ppu::new();
    let mut host = TestHost::new();
    // Coincidence on line 0 with LYC=0 holds the line high across the
    // frame wrap, swallowing the wrap HBlank edge and line 0's own
    // HBlank edge.
    ppu.write_register(&mut host, 0xFF45, 0);
    ppu.write_register(&mut host, 0xFF41, 0x48);

    assert_eq!(stat_irqs_in_one_frame(&mut ppu, &mut host), 144);
}

#[test]
fn stat_write_requests_irq_when_its_condition_is_already_active() {
    let mut ppu = Ppu::new();
    let mut host = TestHost::new();

    // Fresh PPU sits in HBlank; enabling the HBlank condition produces
    // an immediate rising edge.
    assert_eq!(host.irq_count(IrqSource::LcdStat), 0);
    ppu.write_register(&mut host, 0xFF41, 0x08);
    assert_eq!(host.irq_count(IrqSource::LcdStat), 1);

    // Writing the same value again is not a new edge.
    ppu.write_register(&mut host, 0xFF41, 0x08);
    assert_eq!(host.irq_count(IrqSource::LcdStat), 1);
}

#[test]
fn input_change_at_frame_end_requests_joypad_irq() {
    let mut ppu = Ppu::new();
    let mut host = TestHost::new();
    host.input_after_frame = Some(0xEF);

    run_frames(&mut ppu, &mut host, 1);
    assert_eq!(host.irq_count(IrqSource::Joypad), 1);

    // With the input stable, later frames raise nothing.
    run_frames(&mut ppu, &mut host, 1);
    assert_eq!(host.irq_count(IrqSource::Joypad), 1);
}
