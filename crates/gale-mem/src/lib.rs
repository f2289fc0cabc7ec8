#![forbid(unsafe_code)]

//! Physical address-space management for the gale PC emulator.
//!
//! Every byte address the guest (or guest-visible hardware) can touch
//! resolves, at page granularity, to exactly one [`PageHandler`]. Device
//! models claim pieces of the space through per-bus callout registries and
//! never talk to each other; the slow-path resolver arbitrates overlapping
//! claims in bus-priority order and caches unambiguous outcomes.
//!
//! The crate also owns the pieces tightly coupled to that dispatch: the A20
//! gate (which changes what a page number *means*), the linear-framebuffer /
//! MMIO window manager, and the extended-memory page allocator backing the
//! guest's memory-management services.
//!
//! Everything here is single-threaded by design: one [`AddressSpace`] per
//! machine, owned by the VM and driven from its execution thread.

mod a20;
mod arena;
mod bus;
mod callout;
mod handler;
mod handles;
mod lfb;
mod real;
mod snapshot;
mod space;

pub use a20::{A20Mode, ParseA20ModeError};
pub use arena::RamArena;
pub use bus::MemoryBus;
pub use callout::{BusClass, CalloutError, CalloutId, CalloutObject, MemMask, ResolverFn};
pub use handler::{
    HandlerFlags, HandlerKind, HandlerRef, IllegalHandler, PageHandler, RamHandler,
    RomAliasHandler, RomHandler, UnmappedHandler,
};
pub use handles::{MemHandle, PageLink};
pub use real::{phys_make, real_make, real_off, real_seg, real_to_phys, RealPt};
pub use snapshot::{SnapshotError, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
pub use space::{
    AddressSpace, BusTopology, ConfigError, MemoryConfig, ParseBusTopologyError,
};
