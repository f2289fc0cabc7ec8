//! Per-page responders.
//!
//! Every physical page resolves to exactly one [`PageHandler`]. The built-in
//! variants cover RAM, ROM and the two flavors of "nothing there"; device
//! models supply their own implementations through the callout registries.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bitflags::bitflags;
use gale_pc_constants::{
    A20_FAST_WINDOW_PAGES, A20_FAST_WINDOW_START_PAGE, A20_PAGE_BIT, PAGE_SHIFT,
    SYSTEM_BIOS_START_PAGE, VIDEO_BIOS_END_PAGE, VIDEO_BIOS_START_PAGE,
};
use tracing::warn;

use crate::a20::AliasState;
use crate::arena::RamArena;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HandlerFlags: u8 {
        const READABLE = 1 << 0;
        const WRITEABLE = 1 << 1;
        /// Reads come straight from the RAM arena; [`PageHandler::backing_page`]
        /// may return `Some` and bulk operations may bypass per-byte calls.
        const RAM_BACKED = 1 << 2;
        /// Contents are ROM: readable, possibly arena-backed, never writable.
        const HAS_ROM = 1 << 3;
    }
}

/// Identity of a handler for save states.
///
/// Only the singleton kinds restore directly; `Device` pages are left
/// unresolved so the slow path re-binds them against the callout registries
/// on first access after a restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandlerKind {
    Ram = 1,
    Rom = 2,
    Unmapped = 3,
    Illegal = 4,
    RomAlias = 5,
    Device = 6,
}

/// A page's responder.
///
/// Multi-byte accesses are little-endian. The default word/dword methods
/// decompose into byte accesses in ascending address order, which is also the
/// documented behavior when an access straddles two differently-handled pages
/// (the address space splits such accesses before they reach a handler).
pub trait PageHandler {
    fn flags(&self) -> HandlerFlags;

    fn kind(&self) -> HandlerKind {
        HandlerKind::Device
    }

    fn read_u8(&self, addr: u64) -> u8;

    fn write_u8(&self, addr: u64, value: u8);

    fn read_u16(&self, addr: u64) -> u16 {
        u16::from(self.read_u8(addr)) | u16::from(self.read_u8(addr + 1)) << 8
    }

    fn read_u32(&self, addr: u64) -> u32 {
        u32::from(self.read_u8(addr))
            | u32::from(self.read_u8(addr + 1)) << 8
            | u32::from(self.read_u8(addr + 2)) << 16
            | u32::from(self.read_u8(addr + 3)) << 24
    }

    fn write_u16(&self, addr: u64, value: u16) {
        self.write_u8(addr, value as u8);
        self.write_u8(addr + 1, (value >> 8) as u8);
    }

    fn write_u32(&self, addr: u64, value: u32) {
        self.write_u8(addr, value as u8);
        self.write_u8(addr + 1, (value >> 8) as u8);
        self.write_u8(addr + 2, (value >> 16) as u8);
        self.write_u8(addr + 3, (value >> 24) as u8);
    }

    /// Arena page backing `page`, when accesses may bypass the handler.
    ///
    /// `page` is the already-alias-masked page number the cache was indexed
    /// with. Returning `Some` promises that reads (and writes, if
    /// [`HandlerFlags::WRITEABLE`]) hit exactly those arena bytes.
    fn backing_page(&self, _page: u32) -> Option<u32> {
        None
    }
}

pub type HandlerRef = Rc<dyn PageHandler>;

/// Open bus: reads all-ones, writes discarded. The default for in-range pages
/// nothing claims.
pub struct UnmappedHandler;

impl PageHandler for UnmappedHandler {
    fn flags(&self) -> HandlerFlags {
        HandlerFlags::empty()
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Unmapped
    }

    fn read_u8(&self, _addr: u64) -> u8 {
        0xFF
    }

    fn write_u8(&self, _addr: u64, _value: u8) {}
}

/// Like [`UnmappedHandler`] but for accesses that indicate a probable guest or
/// configuration bug (past the handler table). Logs a bounded number of times.
pub struct IllegalHandler {
    read_logged: Cell<u32>,
    write_logged: Cell<u32>,
}

const ILLEGAL_LOG_LIMIT: u32 = 1000;

impl IllegalHandler {
    pub(crate) fn new() -> Self {
        Self {
            read_logged: Cell::new(0),
            write_logged: Cell::new(0),
        }
    }
}

impl PageHandler for IllegalHandler {
    fn flags(&self) -> HandlerFlags {
        HandlerFlags::empty()
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Illegal
    }

    fn read_u8(&self, addr: u64) -> u8 {
        let n = self.read_logged.get();
        if n < ILLEGAL_LOG_LIMIT {
            self.read_logged.set(n + 1);
            warn!("illegal read from {addr:#x}");
        }
        // Real hardware returns 0xFF here, not 0x00.
        0xFF
    }

    fn write_u8(&self, addr: u64, value: u8) {
        let n = self.write_logged.get();
        if n < ILLEGAL_LOG_LIMIT {
            self.write_logged.set(n + 1);
            warn!("illegal write of {value:#x} to {addr:#x}");
        }
    }
}

/// How the RAM singleton maps page numbers onto the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RamMode {
    /// No aliasing configured and the gate is pinned open.
    Direct,
    /// Every access goes through the active alias mask.
    Aliased,
    /// Direct mapping except in the 64 KiB window at the 1 MiB boundary,
    /// where the gate is checked per access ("fast" A20).
    A20Fast,
}

pub struct RamHandler {
    arena: Rc<RefCell<RamArena>>,
    alias: Rc<AliasState>,
    mode: RamMode,
}

impl RamHandler {
    pub(crate) fn new(arena: Rc<RefCell<RamArena>>, alias: Rc<AliasState>, mode: RamMode) -> Self {
        Self { arena, alias, mode }
    }

    #[inline]
    fn map_page(&self, page: u32) -> Option<u32> {
        let mapped = match self.mode {
            RamMode::Direct => page,
            RamMode::Aliased => page & self.alias.active_mask(),
            RamMode::A20Fast => {
                let in_window = page >= A20_FAST_WINDOW_START_PAGE
                    && page < A20_FAST_WINDOW_START_PAGE + A20_FAST_WINDOW_PAGES;
                if in_window && !self.alias.a20_enabled() {
                    page & self.alias.active_mask() & !A20_PAGE_BIT
                } else {
                    page
                }
            }
        };
        (mapped < self.arena.borrow().pages()).then_some(mapped)
    }

    #[inline]
    fn map_addr(&self, addr: u64) -> Option<usize> {
        let page = self.map_page((addr >> PAGE_SHIFT) as u32)?;
        Some(((page as usize) << PAGE_SHIFT) | (addr as usize & 0xFFF))
    }
}

impl PageHandler for RamHandler {
    fn flags(&self) -> HandlerFlags {
        HandlerFlags::READABLE | HandlerFlags::WRITEABLE | HandlerFlags::RAM_BACKED
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Ram
    }

    fn read_u8(&self, addr: u64) -> u8 {
        match self.map_addr(addr) {
            Some(off) => self.arena.borrow().data()[off],
            None => 0xFF,
        }
    }

    fn write_u8(&self, addr: u64, value: u8) {
        if let Some(off) = self.map_addr(addr) {
            self.arena.borrow_mut().data_mut()[off] = value;
        }
    }

    fn read_u16(&self, addr: u64) -> u16 {
        match self.map_addr(addr) {
            Some(off) if addr & 0xFFF <= 0xFFE => {
                let arena = self.arena.borrow();
                let b = &arena.data()[off..off + 2];
                u16::from_le_bytes([b[0], b[1]])
            }
            _ => u16::from(self.read_u8(addr)) | u16::from(self.read_u8(addr + 1)) << 8,
        }
    }

    fn read_u32(&self, addr: u64) -> u32 {
        match self.map_addr(addr) {
            Some(off) if addr & 0xFFF <= 0xFFC => {
                let arena = self.arena.borrow();
                let b = &arena.data()[off..off + 4];
                u32::from_le_bytes([b[0], b[1], b[2], b[3]])
            }
            _ => {
                u32::from(self.read_u8(addr))
                    | u32::from(self.read_u8(addr + 1)) << 8
                    | u32::from(self.read_u8(addr + 2)) << 16
                    | u32::from(self.read_u8(addr + 3)) << 24
            }
        }
    }

    fn write_u16(&self, addr: u64, value: u16) {
        match self.map_addr(addr) {
            Some(off) if addr & 0xFFF <= 0xFFE => {
                let mut arena = self.arena.borrow_mut();
                arena.data_mut()[off..off + 2].copy_from_slice(&value.to_le_bytes());
            }
            _ => {
                self.write_u8(addr, value as u8);
                self.write_u8(addr + 1, (value >> 8) as u8);
            }
        }
    }

    fn write_u32(&self, addr: u64, value: u32) {
        match self.map_addr(addr) {
            Some(off) if addr & 0xFFF <= 0xFFC => {
                let mut arena = self.arena.borrow_mut();
                arena.data_mut()[off..off + 4].copy_from_slice(&value.to_le_bytes());
            }
            _ => {
                self.write_u8(addr, value as u8);
                self.write_u8(addr + 1, (value >> 8) as u8);
                self.write_u8(addr + 2, (value >> 16) as u8);
                self.write_u8(addr + 3, (value >> 24) as u8);
            }
        }
    }

    fn backing_page(&self, page: u32) -> Option<u32> {
        self.map_page(page)
    }
}

/// Read-only arena-backed pages. Write attempts are reported, except inside
/// the 32 KiB video-BIOS window, which real-mode software zero-fills
/// speculatively while probing for adapters; those writes are dropped
/// without a sound.
pub struct RomHandler {
    arena: Rc<RefCell<RamArena>>,
    alias: Rc<AliasState>,
    write_logged: Cell<u32>,
}

impl RomHandler {
    pub(crate) fn new(arena: Rc<RefCell<RamArena>>, alias: Rc<AliasState>) -> Self {
        Self {
            arena,
            alias,
            write_logged: Cell::new(0),
        }
    }

    #[inline]
    fn map_addr(&self, addr: u64) -> Option<usize> {
        let page = (addr >> PAGE_SHIFT) as u32 & self.alias.active_mask();
        (page < self.arena.borrow().pages())
            .then(|| ((page as usize) << PAGE_SHIFT) | (addr as usize & 0xFFF))
    }

    fn report_write(&self, addr: u64, value: u8) {
        let page = (addr >> PAGE_SHIFT) as u32 & self.alias.active_mask();
        if (VIDEO_BIOS_START_PAGE..VIDEO_BIOS_END_PAGE).contains(&page) {
            return;
        }
        let n = self.write_logged.get();
        if n < ILLEGAL_LOG_LIMIT {
            self.write_logged.set(n + 1);
            warn!("write of {value:#x} to rom at {addr:#x}");
        }
    }
}

impl PageHandler for RomHandler {
    fn flags(&self) -> HandlerFlags {
        HandlerFlags::READABLE | HandlerFlags::HAS_ROM | HandlerFlags::RAM_BACKED
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Rom
    }

    fn read_u8(&self, addr: u64) -> u8 {
        match self.map_addr(addr) {
            Some(off) => self.arena.borrow().data()[off],
            None => 0xFF,
        }
    }

    fn write_u8(&self, addr: u64, value: u8) {
        self.report_write(addr, value);
    }

    fn backing_page(&self, page: u32) -> Option<u32> {
        let mapped = page & self.alias.active_mask();
        (mapped < self.arena.borrow().pages()).then_some(mapped)
    }
}

/// Maps a low window onto the fixed system-BIOS image: the requested page's
/// high bits are ignored and the access lands inside the 64 KiB ROM at the
/// top of the first megabyte. Read-only.
pub struct RomAliasHandler {
    arena: Rc<RefCell<RamArena>>,
    write_logged: Cell<u32>,
}

impl RomAliasHandler {
    pub(crate) fn new(arena: Rc<RefCell<RamArena>>) -> Self {
        Self {
            arena,
            write_logged: Cell::new(0),
        }
    }

    #[inline]
    fn map_addr(addr: u64) -> usize {
        ((SYSTEM_BIOS_START_PAGE as usize) << PAGE_SHIFT) | (addr as usize & 0xFFFF)
    }
}

impl PageHandler for RomAliasHandler {
    fn flags(&self) -> HandlerFlags {
        HandlerFlags::READABLE | HandlerFlags::HAS_ROM | HandlerFlags::RAM_BACKED
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::RomAlias
    }

    fn read_u8(&self, addr: u64) -> u8 {
        self.arena.borrow().data()[Self::map_addr(addr)]
    }

    fn write_u8(&self, addr: u64, value: u8) {
        let n = self.write_logged.get();
        if n < ILLEGAL_LOG_LIMIT {
            self.write_logged.set(n + 1);
            warn!("write of {value:#x} to rom alias window at {addr:#x}");
        }
    }

    fn backing_page(&self, page: u32) -> Option<u32> {
        Some(SYSTEM_BIOS_START_PAGE + (page & 0xF))
    }
}
