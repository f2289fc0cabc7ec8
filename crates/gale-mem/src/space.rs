//! The address space: configuration, the per-page handler cache, and the
//! slow-path resolver that arbitrates device claims.

use std::cell::{Ref, RefCell};
use std::rc::Rc;
use std::str::FromStr;

use gale_pc_constants::{
    A20_FAST_WINDOW_PAGES, A20_FAST_WINDOW_START_PAGE, A20_PAGE_BIT, FIRST_MB_PAGES,
    MAX_ADDRESS_BITS, MAX_HANDLER_PAGES, MAX_MEMORY_KB, MAX_MEMORY_MB, PAGE_SHIFT, PAGE_SIZE,
    PRIVATE_AREA_END_PAGE, PRIVATE_AREA_START_PAGE, SAFE_MEMORY_MB, SYSTEM_BIOS_END_PAGE,
    SYSTEM_BIOS_START_PAGE, VIDEO_BIOS_END_PAGE, VIDEO_BIOS_START_PAGE,
};
use thiserror::Error;
use tracing::{error, warn};

use crate::a20::{A20Gate, A20Mode, AliasState};
use crate::arena::RamArena;
use crate::callout::{
    BusClass, CalloutError, CalloutId, CalloutObject, CalloutRegistry, MemMask, ResolverFn,
};
use crate::handler::{
    HandlerFlags, HandlerRef, IllegalHandler, RamHandler, RamMode, RomAliasHandler, RomHandler,
    UnmappedHandler,
};
use crate::handles::PageLink;
use crate::lfb::LfbWindow;

/// Which expansion bus the machine carries. The slow path consults the
/// Motherboard registry first, then PCI (falling through to ISA only when PCI
/// produces no match) or ISA directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusTopology {
    Pci,
    IsaOnly,
}

#[derive(Debug, Clone, Error)]
#[error("unknown bus topology `{0}` (expected pci or isa)")]
pub struct ParseBusTopologyError(String);

impl FromStr for BusTopology {
    type Err = ParseBusTopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pci" => Ok(BusTopology::Pci),
            "isa" => Ok(BusTopology::IsaOnly),
            other => Err(ParseBusTopologyError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The configured address width would alias addresses inside the first
    /// megabyte, which the real-mode machine cannot survive.
    #[error("alias mask {mask:#x} from {address_bits} address bits cuts into the first megabyte")]
    AliasMaskBelowFirstMegabyte { address_bits: u32, mask: u32 },
}

/// Machine memory configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Installed RAM in MiB.
    pub megabytes: u32,
    /// Extra RAM in KiB on top of `megabytes` (rounded down to whole pages).
    pub extra_kilobytes: u32,
    /// Physical address width in bits; `0` means the full 32.
    pub address_bits: u32,
    pub a20: A20Mode,
    pub topology: BusTopology,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            megabytes: 16,
            extra_kilobytes: 0,
            address_bits: 0,
            a20: A20Mode::Fast,
            topology: BusTopology::Pci,
        }
    }
}

/// Cached page-to-arena mapping used by bulk operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HostMap {
    Unknown,
    NoFast,
    Fast { arena_page: u32, writable: bool },
}

/// The physical address space of one machine.
///
/// Owned by the virtual-machine instance and handed (by reference) to device
/// models at attach time; there are no process-wide singletons.
pub struct AddressSpace {
    /// Pages backed by the arena.
    pub(crate) pages: u32,
    /// Pages reported to the guest as installed RAM.
    pub(crate) reported_pages: u32,
    /// Pages with handler-cache slots: the full aliased address space.
    pub(crate) handler_pages: u32,
    pub(crate) topology: BusTopology,

    pub(crate) arena: Rc<RefCell<RamArena>>,
    pub(crate) alias: Rc<AliasState>,
    pub(crate) a20: A20Gate,

    cache: Vec<Option<HandlerRef>>,
    host_map: Vec<HostMap>,
    pub(crate) links: Vec<PageLink>,

    motherboard: CalloutRegistry,
    pci: CalloutRegistry,
    isa: CalloutRegistry,
    pub(crate) lfb: LfbWindow,

    pub(crate) ram: HandlerRef,
    pub(crate) rom: HandlerRef,
    pub(crate) rom_alias: HandlerRef,
    pub(crate) unmapped: HandlerRef,
    pub(crate) illegal: HandlerRef,
}

impl std::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("pages", &self.pages)
            .field("reported_pages", &self.reported_pages)
            .field("handler_pages", &self.handler_pages)
            .finish_non_exhaustive()
    }
}

impl AddressSpace {
    pub fn new(config: MemoryConfig) -> Result<Self, ConfigError> {
        let bits = match config.address_bits {
            0 => MAX_ADDRESS_BITS,
            b => b.min(MAX_ADDRESS_BITS),
        };
        let base_mask = (((1u64 << bits) - 1) >> PAGE_SHIFT) as u32;
        if base_mask & (FIRST_MB_PAGES - 1) != FIRST_MB_PAGES - 1 {
            return Err(ConfigError::AliasMaskBelowFirstMegabyte {
                address_bits: bits,
                mask: base_mask,
            });
        }
        let handler_pages = base_mask + 1;

        let mut megabytes = u64::from(config.megabytes);
        let mut extra_kb = u64::from(config.extra_kilobytes.min(MAX_MEMORY_KB));
        if extra_kb == 0 && megabytes < 1 {
            megabytes = 1;
        }
        if bits < MAX_ADDRESS_BITS {
            let cap_pages = u64::from(handler_pages);
            if megabytes * 256 + extra_kb / 4 > cap_pages {
                warn!(
                    address_bits = bits,
                    "memory aliasing limits RAM to {} MiB",
                    cap_pages / 256
                );
                megabytes = cap_pages / 256;
                extra_kb = 0;
            }
        }
        if megabytes + extra_kb / 1024 > u64::from(MAX_MEMORY_MB) - 1 {
            warn!("maximum memory size is {} MiB", MAX_MEMORY_MB - 1);
            megabytes = u64::from(MAX_MEMORY_MB) - 1;
            extra_kb = 0;
        }
        if megabytes + extra_kb / 1024 > u64::from(SAFE_MEMORY_MB) - 1 {
            warn!("memory sizes above {} MiB are not recommended", SAFE_MEMORY_MB - 1);
        }

        let reported_pages = (megabytes * 256 + extra_kb / 4) as u32;
        let pages = reported_pages.max(FIRST_MB_PAGES);

        let active_mask = if config.a20.initial_mask_open() {
            base_mask
        } else {
            base_mask & !A20_PAGE_BIT
        };
        let alias = AliasState::new(active_mask, config.a20.initial_enabled());
        let arena = Rc::new(RefCell::new(RamArena::new(pages, reported_pages)));

        let ram_mode = if bits < MAX_ADDRESS_BITS {
            RamMode::Aliased
        } else if config.a20 == A20Mode::Fast {
            RamMode::A20Fast
        } else if config.a20.initial_enabled() && !config.a20.guest_changeable() {
            RamMode::Direct
        } else {
            RamMode::Aliased
        };

        let ram: HandlerRef = Rc::new(RamHandler::new(arena.clone(), alias.clone(), ram_mode));
        let rom: HandlerRef = Rc::new(RomHandler::new(arena.clone(), alias.clone()));
        let rom_alias: HandlerRef = Rc::new(RomAliasHandler::new(arena.clone()));
        let unmapped: HandlerRef = Rc::new(UnmappedHandler);
        let illegal: HandlerRef = Rc::new(IllegalHandler::new());

        let mut cache: Vec<Option<HandlerRef>> = vec![None; handler_pages as usize];
        for p in 0..reported_pages {
            cache[p as usize] = Some(ram.clone());
        }
        for p in PRIVATE_AREA_START_PAGE..PRIVATE_AREA_END_PAGE {
            cache[p as usize] = Some(ram.clone());
        }
        for p in VIDEO_BIOS_START_PAGE..VIDEO_BIOS_END_PAGE {
            cache[p as usize] = Some(rom.clone());
        }
        for p in SYSTEM_BIOS_START_PAGE..SYSTEM_BIOS_END_PAGE {
            cache[p as usize] = Some(rom.clone());
        }
        // Reset-vector alias of the system BIOS at the top of the space.
        if handler_pages >= 16 {
            for p in handler_pages - 16..handler_pages {
                cache[p as usize] = Some(rom_alias.clone());
            }
        }

        Ok(Self {
            pages,
            reported_pages,
            handler_pages,
            topology: config.topology,
            a20: A20Gate::new(config.a20, base_mask, handler_pages, alias.clone()),
            alias,
            arena,
            cache,
            host_map: vec![HostMap::Unknown; handler_pages as usize],
            links: vec![PageLink::Free; pages as usize],
            motherboard: CalloutRegistry::new(BusClass::Motherboard),
            pci: CalloutRegistry::new(BusClass::Pci),
            isa: CalloutRegistry::new(BusClass::Isa),
            lfb: LfbWindow::new(),
            ram,
            rom,
            rom_alias,
            unmapped,
            illegal,
        })
    }

    #[inline]
    pub fn pages(&self) -> u32 {
        self.pages
    }

    /// Pages reported to the guest as installed RAM.
    #[inline]
    pub fn total_pages(&self) -> u32 {
        self.reported_pages
    }

    #[inline]
    pub fn handler_pages(&self) -> u32 {
        self.handler_pages
    }

    #[inline]
    pub fn topology(&self) -> BusTopology {
        self.topology
    }

    /// Direct view of the RAM arena, bypassing handlers. Intended for
    /// firmware loading and host-side inspection.
    pub fn arena(&self) -> Ref<'_, RamArena> {
        self.arena.borrow()
    }

    // ---------------------------------------------------------------------
    // Page handler dispatch
    // ---------------------------------------------------------------------

    /// The single entry point the instruction core uses: fast path on a
    /// cached handler, full bus resolution otherwise.
    pub fn get_page_handler(&mut self, page: u32) -> HandlerRef {
        let page = page & self.alias.active_mask();
        if let Some(Some(h)) = self.cache.get(page as usize) {
            return h.clone();
        }
        self.resolve_page(page)
    }

    /// Cache-miss resolution: consult the bus registries in priority order
    /// and cache the outcome when it is unambiguous.
    fn resolve_page(&mut self, page: u32) -> HandlerRef {
        if page >= self.handler_pages {
            // Out of range is permanent; nothing to cache.
            return self.illegal.clone();
        }
        if page < self.reported_pages {
            warn!(page, "unresolved page below reported RAM, rebinding to RAM");
            let h = self.ram.clone();
            self.cache[page as usize] = Some(h.clone());
            return h;
        }

        let mut first: Option<HandlerRef> = None;
        let mut matches = self.motherboard.resolve_matches(page, |h| {
            first.get_or_insert(h);
        });
        if matches == 0 {
            match self.topology {
                BusTopology::Pci => {
                    matches = self.pci.resolve_matches(page, |h| {
                        first.get_or_insert(h);
                    });
                    if matches == 0 {
                        matches = self.isa.resolve_matches(page, |h| {
                            first.get_or_insert(h);
                        });
                    }
                }
                BusTopology::IsaOnly => {
                    matches = self.isa.resolve_matches(page, |h| {
                        first.get_or_insert(h);
                    });
                }
            }
        }

        let Some(handler) = first else {
            let h = if page < self.pages {
                warn!(page, "unclaimed page inside the RAM arena, falling back to RAM");
                self.ram.clone()
            } else {
                self.unmapped.clone()
            };
            self.cache[page as usize] = Some(h.clone());
            return h;
        };

        if matches > 1 {
            // Deliberately left uncached: every access re-arbitrates rather
            // than silently pinning one of the claimants.
            warn!(page, matches, "bus conflict, serving first match uncached");
            return handler;
        }

        self.cache[page as usize] = Some(handler.clone());
        handler
    }

    /// Bulk direct-assignment path for simple devices that do not need bus
    /// arbitration.
    pub fn register_handler(&mut self, base_page: u32, handler: HandlerRef, pages: u32) {
        let start = base_page.min(self.handler_pages);
        let end = base_page.saturating_add(pages).min(self.handler_pages);
        for p in start..end {
            self.cache[p as usize] = Some(handler.clone());
            self.host_map[p as usize] = HostMap::Unknown;
        }
    }

    /// Drops cached handlers so the next access re-resolves.
    pub fn invalidate_cached(&mut self, base_page: u32, pages: u32) {
        let start = base_page.min(self.handler_pages);
        let end = base_page.saturating_add(pages).min(self.handler_pages);
        for p in start..end {
            self.cache[p as usize] = None;
            self.host_map[p as usize] = HostMap::Unknown;
        }
    }

    /// Rebinds a page range to the ROM singleton (EMS frame removal,
    /// cartridge setup and similar).
    pub fn map_rom_pages(&mut self, base_page: u32, pages: u32) {
        let rom = self.rom.clone();
        self.register_handler(base_page, rom, pages);
    }

    /// Rebinds a page range to the ROM-alias singleton (high BIOS mirror).
    pub fn map_rom_alias_pages(&mut self, base_page: u32, pages: u32) {
        let rom_alias = self.rom_alias.clone();
        self.register_handler(base_page, rom_alias, pages);
    }

    // ---------------------------------------------------------------------
    // Callout facade
    // ---------------------------------------------------------------------

    fn registry_mut(&mut self, bus: BusClass) -> &mut CalloutRegistry {
        match bus {
            BusClass::Motherboard => &mut self.motherboard,
            BusClass::Pci => &mut self.pci,
            BusClass::Isa => &mut self.isa,
        }
    }

    fn registry(&self, bus: BusClass) -> &CalloutRegistry {
        match bus {
            BusClass::Motherboard => &self.motherboard,
            BusClass::Pci => &self.pci,
            BusClass::Isa => &self.isa,
        }
    }

    pub fn allocate_callout(&mut self, bus: BusClass) -> Option<CalloutId> {
        self.registry_mut(bus).allocate()
    }

    /// Frees a slot, uninstalling (and invalidating) first if needed.
    pub fn free_callout(&mut self, id: CalloutId) {
        self.uninstall_callout(id);
        self.registry_mut(id.bus).free(id.index);
    }

    pub fn callout(&self, id: CalloutId) -> Option<&CalloutObject> {
        self.registry(id.bus).get(id.index)
    }

    /// Installs a claim and invalidates every cached page across its
    /// periodic aliases. A malformed mask or misaligned base is rejected
    /// with no side effect.
    pub fn install_callout(
        &mut self,
        id: CalloutId,
        base_page: u32,
        mask: MemMask,
        resolver: ResolverFn,
    ) -> Result<(), CalloutError> {
        let object = self
            .registry_mut(id.bus)
            .get_mut(id.index)
            .ok_or(CalloutError::NotAllocated)?;
        if let Err(err) = object.install(base_page, mask, resolver) {
            error!(?id, base_page, %err, "callout install rejected");
            return Err(err);
        }
        self.invalidate_claim(base_page, mask);
        Ok(())
    }

    pub fn uninstall_callout(&mut self, id: CalloutId) {
        let Some(object) = self.registry_mut(id.bus).get_mut(id.index) else {
            return;
        };
        if !object.installed() {
            return;
        }
        let base_page = object.base_page();
        let mask = object.mask();
        object.uninstall();
        self.invalidate_claim(base_page, mask);
    }

    fn invalidate_claim(&mut self, base_page: u32, mask: MemMask) {
        let stride = mask.alias_mask().wrapping_add(1);
        let mut p = base_page;
        while p < self.handler_pages {
            let end = p
                .saturating_add(mask.range_mask())
                .saturating_add(1)
                .min(self.handler_pages);
            self.invalidate_cached(p, end - p);
            if stride == 0 {
                break;
            }
            let Some(next) = p.checked_add(stride) else {
                break;
            };
            p = next;
        }
    }

    // ---------------------------------------------------------------------
    // A20 facade
    // ---------------------------------------------------------------------

    pub fn a20_enable(&mut self, enabled: bool) {
        if self.a20.set_enabled(enabled) {
            self.flush_host_map();
        } else if self.a20.fast_changeable() {
            // No global mask recompute in fast mode, but the boundary
            // window's arena mapping still depends on the gate.
            self.flush_host_window();
        }
    }

    #[inline]
    pub fn a20_enabled(&self) -> bool {
        self.a20.enabled()
    }

    /// PS/2 system control port A (0x92) read.
    pub fn a20_control_read(&self) -> u8 {
        self.a20.control_read()
    }

    /// PS/2 system control port A (0x92) write.
    pub fn a20_control_write(&mut self, value: u8) {
        if self.a20.control_write(value) {
            self.flush_host_map();
        } else if self.a20.fast_changeable() {
            self.flush_host_window();
        }
    }

    /// Hook invoked when the guest pulses the port-0x92 reset bit.
    pub fn set_a20_reset_sink(&mut self, sink: Box<dyn FnMut()>) {
        self.a20.set_reset_sink(sink);
    }

    pub(crate) fn flush_host_map(&mut self) {
        self.host_map.fill(HostMap::Unknown);
    }

    fn flush_host_window(&mut self) {
        let start = A20_FAST_WINDOW_START_PAGE.min(self.handler_pages);
        let end = (A20_FAST_WINDOW_START_PAGE + A20_FAST_WINDOW_PAGES).min(self.handler_pages);
        for p in start..end {
            self.host_map[p as usize] = HostMap::Unknown;
        }
    }

    // ---------------------------------------------------------------------
    // Snapshot support
    // ---------------------------------------------------------------------

    pub(crate) fn cached_kind(&self, page: u32) -> Option<crate::handler::HandlerKind> {
        self.cache
            .get(page as usize)?
            .as_ref()
            .map(|handler| handler.kind())
    }

    pub(crate) fn a20_control_shadow(&self) -> u8 {
        self.a20.control_shadow()
    }

    pub(crate) fn restore_a20(&mut self, enabled: bool, control_port: u8) {
        if self.a20.restore(enabled, control_port) {
            self.flush_host_map();
        }
    }

    /// Re-binds one page from its persisted handler kind. Unknown and
    /// device kinds restore as unresolved.
    pub(crate) fn rebind_kind(&mut self, page: u32, kind: u8) {
        use crate::handler::HandlerKind;
        let entry = match kind {
            k if k == HandlerKind::Ram as u8 => Some(self.ram.clone()),
            k if k == HandlerKind::Rom as u8 => Some(self.rom.clone()),
            k if k == HandlerKind::Unmapped as u8 => Some(self.unmapped.clone()),
            k if k == HandlerKind::Illegal as u8 => Some(self.illegal.clone()),
            k if k == HandlerKind::RomAlias as u8 => Some(self.rom_alias.clone()),
            _ => None,
        };
        self.cache[page as usize] = entry;
    }

    // ---------------------------------------------------------------------
    // Sized accessors (little-endian, unaligned-safe)
    // ---------------------------------------------------------------------

    /// Alias masking applies within the 32-bit physical space; anything past
    /// it is permanently out of range.
    #[inline]
    fn page_for_addr(&self, addr: u64) -> Option<u32> {
        let page = addr >> PAGE_SHIFT;
        (page < u64::from(MAX_HANDLER_PAGES)).then_some(page as u32)
    }

    #[inline]
    fn handler_for_addr(&mut self, addr: u64) -> HandlerRef {
        match self.page_for_addr(addr) {
            Some(page) => self.get_page_handler(page),
            None => self.illegal.clone(),
        }
    }

    pub fn read_u8(&mut self, addr: u64) -> u8 {
        self.handler_for_addr(addr).read_u8(addr)
    }

    pub fn write_u8(&mut self, addr: u64, value: u8) {
        self.handler_for_addr(addr).write_u8(addr, value);
    }

    pub fn read_u16(&mut self, addr: u64) -> u16 {
        if addr & 0xFFF <= 0xFFE {
            self.handler_for_addr(addr).read_u16(addr)
        } else {
            u16::from(self.read_u8(addr)) | u16::from(self.read_u8(addr + 1)) << 8
        }
    }

    pub fn read_u32(&mut self, addr: u64) -> u32 {
        if addr & 0xFFF <= 0xFFC {
            self.handler_for_addr(addr).read_u32(addr)
        } else {
            u32::from(self.read_u8(addr))
                | u32::from(self.read_u8(addr + 1)) << 8
                | u32::from(self.read_u8(addr + 2)) << 16
                | u32::from(self.read_u8(addr + 3)) << 24
        }
    }

    pub fn write_u16(&mut self, addr: u64, value: u16) {
        if addr & 0xFFF <= 0xFFE {
            self.handler_for_addr(addr).write_u16(addr, value);
        } else {
            self.write_u8(addr, value as u8);
            self.write_u8(addr + 1, (value >> 8) as u8);
        }
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) {
        if addr & 0xFFF <= 0xFFC {
            self.handler_for_addr(addr).write_u32(addr, value);
        } else {
            self.write_u8(addr, value as u8);
            self.write_u8(addr + 1, (value >> 8) as u8);
            self.write_u8(addr + 2, (value >> 16) as u8);
            self.write_u8(addr + 3, (value >> 24) as u8);
        }
    }

    // ---------------------------------------------------------------------
    // Bulk and string operations
    // ---------------------------------------------------------------------

    /// Page-to-arena mapping for bulk operations. Only populated from cached
    /// resolutions, so conflict pages keep re-arbitrating.
    fn host_entry(&mut self, page: u32) -> HostMap {
        match self.host_map.get(page as usize).copied() {
            Some(HostMap::Unknown) => {
                let handler = self.get_page_handler(page);
                let flags = handler.flags();
                let entry = match handler.backing_page(page) {
                    Some(arena_page)
                        if flags.contains(HandlerFlags::READABLE | HandlerFlags::RAM_BACKED) =>
                    {
                        HostMap::Fast {
                            arena_page,
                            writable: flags.contains(HandlerFlags::WRITEABLE),
                        }
                    }
                    _ => HostMap::NoFast,
                };
                if matches!(self.cache.get(page as usize), Some(Some(_))) {
                    self.host_map[page as usize] = entry;
                }
                entry
            }
            Some(entry) => entry,
            None => HostMap::NoFast,
        }
    }

    pub fn block_read(&mut self, addr: u64, dst: &mut [u8]) {
        let mut pos = 0usize;
        while pos < dst.len() {
            let cur = addr + pos as u64;
            let offset = (cur & (PAGE_SIZE as u64 - 1)) as usize;
            let take = (PAGE_SIZE - offset).min(dst.len() - pos);
            let Some(page) = self.page_for_addr(cur) else {
                dst[pos..pos + take].fill(0xFF);
                pos += take;
                continue;
            };
            let page = page & self.alias.active_mask();
            match self.host_entry(page) {
                HostMap::Fast { arena_page, .. } => {
                    let arena = self.arena.borrow();
                    dst[pos..pos + take]
                        .copy_from_slice(&arena.page(arena_page)[offset..offset + take]);
                }
                _ => {
                    let handler = self.get_page_handler(page);
                    for (i, byte) in dst[pos..pos + take].iter_mut().enumerate() {
                        *byte = handler.read_u8(cur + i as u64);
                    }
                }
            }
            pos += take;
        }
    }

    pub fn block_write(&mut self, addr: u64, src: &[u8]) {
        let mut pos = 0usize;
        while pos < src.len() {
            let cur = addr + pos as u64;
            let offset = (cur & (PAGE_SIZE as u64 - 1)) as usize;
            let take = (PAGE_SIZE - offset).min(src.len() - pos);
            let Some(page) = self.page_for_addr(cur) else {
                pos += take;
                continue;
            };
            let page = page & self.alias.active_mask();
            match self.host_entry(page) {
                HostMap::Fast {
                    arena_page,
                    writable: true,
                } => {
                    let mut arena = self.arena.borrow_mut();
                    arena.page_mut(arena_page)[offset..offset + take]
                        .copy_from_slice(&src[pos..pos + take]);
                }
                _ => {
                    let handler = self.get_page_handler(page);
                    for (i, byte) in src[pos..pos + take].iter().enumerate() {
                        handler.write_u8(cur + i as u64, *byte);
                    }
                }
            }
            pos += take;
        }
    }

    /// Guest-to-guest copy in ascending byte order (overlap-safe forward).
    pub fn block_copy(&mut self, dst: u64, src: u64, len: usize) {
        for i in 0..len as u64 {
            let byte = self.read_u8(src + i);
            self.write_u8(dst + i, byte);
        }
    }

    /// Length of a NUL-terminated string, bounded at 1024; `0` when no NUL is
    /// found in bounds.
    pub fn str_len(&mut self, addr: u64) -> usize {
        for i in 0..1024u64 {
            if self.read_u8(addr + i) == 0 {
                return i as usize;
            }
        }
        0
    }

    /// Guest-to-guest NUL-terminated string copy, including the terminator.
    pub fn str_copy(&mut self, dst: u64, src: u64) {
        let mut i = 0u64;
        loop {
            let byte = self.read_u8(src + i);
            self.write_u8(dst + i, byte);
            if byte == 0 {
                return;
            }
            i += 1;
        }
    }

    /// Copies out at most `max` bytes, stopping before a NUL terminator.
    pub fn str_read(&mut self, addr: u64, max: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for i in 0..max as u64 {
            let byte = self.read_u8(addr + i);
            if byte == 0 {
                break;
            }
            out.push(byte);
        }
        out
    }

    // ---------------------------------------------------------------------
    // Direct arena access (firmware loading, host-side pokes)
    // ---------------------------------------------------------------------

    pub fn phys_read_u8(&self, addr: u64) -> u8 {
        let arena = self.arena.borrow();
        arena.data().get(addr as usize).copied().unwrap_or(0xFF)
    }

    pub fn phys_write_u8(&mut self, addr: u64, value: u8) {
        let mut arena = self.arena.borrow_mut();
        if let Some(slot) = arena.data_mut().get_mut(addr as usize) {
            *slot = value;
        }
    }

    /// Writes `data` straight into the arena, for loading firmware images.
    pub fn phys_write(&mut self, addr: u64, data: &[u8]) {
        let mut arena = self.arena.borrow_mut();
        let start = addr as usize;
        if let Some(slice) = arena.data_mut().get_mut(start..start + data.len()) {
            slice.copy_from_slice(data);
        }
    }
}
