//! End-to-end dispatch behavior through the public surface: fast path,
//! invalidation, bus arbitration, and the framebuffer window.

use std::cell::Cell;
use std::rc::Rc;

use gale_mem::{
    A20Mode, AddressSpace, BusClass, CalloutError, HandlerFlags, HandlerRef, MemMask,
    MemoryConfig, PageHandler,
};

struct TestDevice {
    value: u8,
    reads: Cell<u32>,
}

impl TestDevice {
    fn new(value: u8) -> Rc<Self> {
        Rc::new(Self {
            value,
            reads: Cell::new(0),
        })
    }
}

impl PageHandler for TestDevice {
    fn flags(&self) -> HandlerFlags {
        HandlerFlags::READABLE | HandlerFlags::WRITEABLE
    }

    fn read_u8(&self, _addr: u64) -> u8 {
        self.reads.set(self.reads.get() + 1);
        self.value
    }

    fn write_u8(&self, _addr: u64, _value: u8) {}
}

fn machine() -> AddressSpace {
    AddressSpace::new(MemoryConfig {
        megabytes: 4,
        a20: A20Mode::Mask,
        ..MemoryConfig::default()
    })
    .unwrap()
}

fn same(a: &HandlerRef, b: &HandlerRef) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

fn resolver(dev: Rc<TestDevice>, calls: Rc<Cell<u32>>) -> Box<dyn FnMut(u32) -> Option<HandlerRef>> {
    Box::new(move |_page| {
        calls.set(calls.get() + 1);
        Some(dev.clone() as HandlerRef)
    })
}

#[test]
fn every_sampled_page_terminates_with_a_handler() {
    let mut mem = machine();
    for page in (0..mem.handler_pages()).step_by(0x777) {
        let _ = mem.get_page_handler(page).flags();
    }
    let _ = mem.get_page_handler(mem.handler_pages() - 1).flags();
}

#[test]
fn registered_handler_round_trips_without_resolution() {
    let mut mem = machine();
    let dev = TestDevice::new(0x42);
    let calls = Rc::new(Cell::new(0));

    let id = mem.allocate_callout(BusClass::Isa).unwrap();
    mem.install_callout(
        id,
        0x8000,
        MemMask::aligned(1).unwrap(),
        resolver(dev.clone(), calls.clone()),
    )
    .unwrap();

    let first = mem.get_page_handler(0x8000);
    assert!(same(&first, &(dev as HandlerRef)));
    assert_eq!(calls.get(), 1);

    // Cached: ten more lookups, zero further resolver calls.
    for _ in 0..10 {
        let _ = mem.get_page_handler(0x8000);
    }
    assert_eq!(calls.get(), 1);
}

#[test]
fn install_and_uninstall_invalidate_the_page() {
    let mut mem = machine();
    let dev = TestDevice::new(0x42);
    let calls = Rc::new(Cell::new(0));

    let unclaimed = mem.get_page_handler(0x8000);
    let id = mem.allocate_callout(BusClass::Isa).unwrap();
    mem.install_callout(
        id,
        0x8000,
        MemMask::aligned(1).unwrap(),
        resolver(dev.clone(), calls.clone()),
    )
    .unwrap();

    let claimed = mem.get_page_handler(0x8000);
    assert!(!same(&unclaimed, &claimed), "install must drop the stale cache entry");

    mem.uninstall_callout(id);
    let released = mem.get_page_handler(0x8000);
    assert!(!same(&claimed, &released), "uninstall must drop the cached claim");
}

#[test]
fn conflicting_claims_are_served_but_never_cached() {
    let mut mem = machine();
    let dev_a = TestDevice::new(0xAA);
    let dev_b = TestDevice::new(0xBB);
    let calls_a = Rc::new(Cell::new(0));
    let calls_b = Rc::new(Cell::new(0));

    let a = mem.allocate_callout(BusClass::Isa).unwrap();
    let b = mem.allocate_callout(BusClass::Isa).unwrap();
    mem.install_callout(a, 0x8000, MemMask::aligned(1).unwrap(), resolver(dev_a, calls_a.clone()))
        .unwrap();
    mem.install_callout(b, 0x8000, MemMask::aligned(1).unwrap(), resolver(dev_b, calls_b.clone()))
        .unwrap();

    let _ = mem.get_page_handler(0x8000);
    let _ = mem.get_page_handler(0x8000);
    assert_eq!(calls_a.get(), 2);
    assert_eq!(calls_b.get(), 2);

    // Removing one claimant ends the conflict and caching resumes.
    mem.free_callout(b);
    let _ = mem.get_page_handler(0x8000);
    let _ = mem.get_page_handler(0x8000);
    assert_eq!(calls_a.get(), 3);
}

#[test]
fn invalid_mask_algebra_is_rejected_without_side_effects() {
    let mut mem = machine();
    assert!(matches!(
        MemMask::new(0x0A, 0x0F),
        Err(CalloutError::MaskHasGaps { .. })
    ));

    let before = mem.get_page_handler(0x8000);
    let id = mem.allocate_callout(BusClass::Isa).unwrap();
    let err = mem.install_callout(
        id,
        3,
        MemMask::aligned(16).unwrap(),
        Box::new(|_page| None),
    );
    assert!(matches!(err, Err(CalloutError::MisalignedBase { .. })));
    let after = mem.get_page_handler(0x8000);
    assert!(same(&before, &after));
}

#[test]
fn lfb_window_rounds_to_a_power_of_two() {
    let mut mem = machine();
    let fb = TestDevice::new(0x3C);
    let start = 0xC000_0000u32 >> 12;
    mem.set_lfb_window(start, 5, Some(fb.clone() as HandlerRef), None)
        .unwrap();

    let fb_ref = fb as HandlerRef;
    for offset in [0, 4, 5, 6, 7] {
        let got = mem.get_page_handler(start + offset);
        assert!(same(&got, &fb_ref), "page start+{offset} must serve the framebuffer");
    }
    assert!(!same(&mem.get_page_handler(start + 8), &fb_ref));
}

#[test]
fn word_and_dword_accesses_are_little_endian_and_unaligned_safe() {
    let mut mem = machine();
    mem.write_u32(0x6_0001, 0x0403_0201);
    assert_eq!(mem.read_u8(0x6_0001), 0x01);
    assert_eq!(mem.read_u8(0x6_0004), 0x04);
    assert_eq!(mem.read_u16(0x6_0002), 0x0302);
    assert_eq!(mem.read_u32(0x6_0001), 0x0403_0201);
}
