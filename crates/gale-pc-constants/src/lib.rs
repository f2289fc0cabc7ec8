#![forbid(unsafe_code)]

//! Shared physical-address / topology constants for the emulated PC.
//!
//! This crate exists so the memory core (`gale-mem`) and the device models
//! that claim pieces of the physical address space agree on addresses that
//! must match exactly at runtime.

/// Size of one physical page, the granularity of handler dispatch.
pub const PAGE_SIZE: usize = 4096;

/// `log2(PAGE_SIZE)`; shift between byte addresses and page numbers.
pub const PAGE_SHIFT: u32 = 12;

/// Number of pages in the first megabyte.
pub const FIRST_MB_PAGES: u32 = 0x100;

/// Address bit gated by the A20 line.
pub const A20_ADDR_BIT: u64 = 1 << 20;

/// The A20 address bit expressed in page-number units (bit 20 − 12 = 8).
pub const A20_PAGE_BIT: u32 = 1 << 8;

/// First page of the 64 KiB window at the 1 MiB boundary whose mapping
/// depends on the A20 gate (the HMA region that wraps to page 0 when the
/// gate is closed).
pub const A20_FAST_WINDOW_START_PAGE: u32 = 0x100;

/// Page count of the A20-sensitive window (64 KiB).
pub const A20_FAST_WINDOW_PAGES: u32 = 0x10;

/// PS/2 system control port A, the legacy fast-A20/reset port.
pub const SYSTEM_CONTROL_PORT_A: u16 = 0x92;

/// First page handed out by the extended-memory allocator.
///
/// Everything below this (conventional memory plus the HMA) is managed by the
/// guest's real-mode memory services, not leased through page handles.
pub const XMS_START_PAGE: u32 = 0x110;

/// Start of the adapter / option-ROM space in the 20-bit real-mode window.
pub const ADAPTER_SPACE_BASE: u64 = 0xA_0000;

/// End of the adapter space (exclusive): the top of the first megabyte.
pub const ADAPTER_SPACE_END: u64 = 0x10_0000;

/// Base physical address of the video BIOS window.
pub const VIDEO_BIOS_BASE: u64 = 0xC_0000;

/// Size of the video BIOS window (32 KiB).
///
/// Writes into this window are silently discarded rather than reported as
/// ROM-write errors: real-mode software routinely zero-fills it speculatively
/// while probing for adapters.
pub const VIDEO_BIOS_SIZE: usize = 0x8000;

/// First page of the video BIOS window.
pub const VIDEO_BIOS_START_PAGE: u32 = 0xC0;

/// One-past-last page of the video BIOS window.
pub const VIDEO_BIOS_END_PAGE: u32 = 0xC8;

/// Private scratch area between the video BIOS and the EMS frame, kept
/// RAM-backed and zeroed at power-on.
pub const PRIVATE_AREA_START_PAGE: u32 = 0xC8;
pub const PRIVATE_AREA_END_PAGE: u32 = 0xD0;

/// Base physical address of the system BIOS ROM in the 20-bit window.
pub const SYSTEM_BIOS_BASE: u64 = 0xF_0000;

/// Size of the system BIOS ROM mapping (64 KiB, the `F000` segment).
pub const SYSTEM_BIOS_SIZE: usize = 0x1_0000;

/// First page of the system BIOS ROM.
pub const SYSTEM_BIOS_START_PAGE: u32 = 0xF0;

/// One-past-last page of the system BIOS ROM.
pub const SYSTEM_BIOS_END_PAGE: u32 = 0x100;

/// Offset, in pages, from the linear-framebuffer base to its companion MMIO
/// register window (16 MiB past the framebuffer, matching the hardware being
/// modeled).
pub const LFB_MMIO_OFFSET_PAGES: u32 = (0x0100_0000 / PAGE_SIZE) as u32;

/// Page count of the LFB companion MMIO register window.
pub const LFB_MMIO_PAGES: u32 = 16;

/// Hard cap on emulated RAM in MiB.
pub const MAX_MEMORY_MB: u32 = 512;

/// RAM sizes above this many MiB are legal but discouraged (guest software of
/// the era starts misbehaving, and save states get large).
pub const SAFE_MEMORY_MB: u32 = 32;

/// Cap on the extra-KiB term of the memory size (512 MiB expressed in KiB).
pub const MAX_MEMORY_KB: u32 = 524_288;

/// Cap on `handler_pages`: one handler slot per page of a 4 GiB space.
pub const MAX_HANDLER_PAGES: u32 = (0x1_0000_0000u64 / PAGE_SIZE as u64) as u32;

/// Bounds for the configured physical address width.
pub const MIN_ADDRESS_BITS: u32 = 20;
pub const MAX_ADDRESS_BITS: u32 = 32;
