//! A20 gate behavior observed through byte accesses and port 0x92.

use std::cell::Cell;
use std::rc::Rc;

use gale_mem::{A20Mode, AddressSpace, MemoryConfig};

fn machine(a20: A20Mode) -> AddressSpace {
    AddressSpace::new(MemoryConfig {
        megabytes: 4,
        a20,
        ..MemoryConfig::default()
    })
    .unwrap()
}

#[test]
fn disabled_gate_aliases_the_hma_onto_low_memory() {
    let mut mem = machine(A20Mode::Mask);
    assert!(!mem.a20_enabled());

    mem.write_u8(0x10_0010, 0x5A);
    assert_eq!(mem.read_u8(0x10), 0x5A, "1 MiB + 0x10 wraps to 0x10");

    mem.a20_enable(true);
    mem.write_u8(0x10_0010, 0xA5);
    assert_eq!(mem.read_u8(0x10), 0x5A, "addresses are independent with the gate open");
    assert_eq!(mem.read_u8(0x10_0010), 0xA5);
}

#[test]
fn fast_gate_behaves_like_the_masked_gate_at_the_boundary() {
    let mut mem = machine(A20Mode::Fast);
    mem.a20_enable(false);

    mem.write_u8(0x10_0010, 0x5A);
    assert_eq!(mem.read_u8(0x10), 0x5A);

    mem.a20_enable(true);
    mem.write_u8(0x10_0010, 0xA5);
    assert_eq!(mem.read_u8(0x10), 0x5A);
    assert_eq!(mem.read_u8(0x10_0010), 0xA5);
}

#[test]
fn fast_gate_block_path_tracks_toggles() {
    let mut mem = machine(A20Mode::Fast);
    mem.a20_enable(false);

    // Populate the bulk fast path for the boundary window, then toggle.
    mem.block_write(0x10_0010, &[0x5A]);
    let mut buf = [0u8; 1];
    mem.block_read(0x10, &mut buf);
    assert_eq!(buf[0], 0x5A);

    mem.a20_enable(true);
    mem.block_write(0x10_0010, &[0xA5]);
    mem.block_read(0x10, &mut buf);
    assert_eq!(buf[0], 0x5A, "low copy untouched with the gate open");
    mem.block_read(0x10_0010, &mut buf);
    assert_eq!(buf[0], 0xA5);

    mem.a20_control_write(0x00);
    mem.block_read(0x10_0010, &mut buf);
    assert_eq!(buf[0], 0x5A, "closing the gate via port 0x92 wraps again");
}

#[test]
fn pinned_gate_ignores_guest_toggles() {
    let mut mem = machine(A20Mode::On);
    mem.a20_enable(false);
    assert!(mem.a20_enabled());

    mem.write_u8(0x10_0010, 0x5A);
    assert_eq!(mem.read_u8(0x10), 0x00, "no wrap on a pinned-open gate");
}

#[test]
fn fake_gate_reports_toggles_without_remapping() {
    let mut mem = machine(A20Mode::OnFake);

    mem.a20_enable(false);
    assert!(!mem.a20_enabled(), "readback follows the request");

    mem.write_u8(0x10_0010, 0x5A);
    assert_eq!(mem.read_u8(0x10), 0x00, "the mapping stays pinned open");
}

#[test]
fn control_port_drives_the_gate() {
    let mut mem = machine(A20Mode::Mask);
    assert_eq!(mem.a20_control_read() & 0x02, 0);

    mem.a20_control_write(0x02);
    assert!(mem.a20_enabled());
    assert_eq!(mem.a20_control_read() & 0x02, 0x02);

    mem.a20_control_write(0x00);
    assert!(!mem.a20_enabled());

    mem.write_u8(0x10_0020, 0x77);
    assert_eq!(mem.read_u8(0x20), 0x77);
}

#[test]
fn control_port_reset_bit_pulses_the_sink() {
    let mut mem = machine(A20Mode::Mask);
    let fired = Rc::new(Cell::new(0u32));
    let sink = fired.clone();
    mem.set_a20_reset_sink(Box::new(move || sink.set(sink.get() + 1)));

    mem.a20_control_write(0x03);
    assert_eq!(fired.get(), 1);
    assert!(mem.a20_enabled());
    // Bit 0 reads back clear (self-clearing pulse).
    assert_eq!(mem.a20_control_read() & 0x01, 0);
}

#[test]
fn block_transfers_respect_the_gate_across_the_boundary() {
    let mut mem = machine(A20Mode::Mask);

    // Gate closed: a write spanning the 1 MiB line lands in low memory.
    let data = [1u8, 2, 3, 4];
    mem.block_write(0xF_FFFE, &data);
    assert_eq!(mem.read_u8(0xF_FFFE), 1);
    assert_eq!(mem.read_u8(0xF_FFFF), 2);
    assert_eq!(mem.read_u8(0x0), 3);
    assert_eq!(mem.read_u8(0x1), 4);

    mem.a20_enable(true);
    let mut buf = [0u8; 4];
    mem.block_read(0xF_FFFE, &mut buf);
    assert_eq!(buf[0], 1);
    assert_eq!(buf[1], 2);
    assert_eq!(&buf[2..], &[0, 0], "with the gate open the HMA is its own memory");
}
