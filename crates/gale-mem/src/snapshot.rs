//! Save-state encoding for the address space.
//!
//! The layout is deliberately dumb: geometry, A20 state, one handler-kind
//! byte per handler page, the raw RAM arena, and the chain-link array.
//! Singleton kinds re-bind directly on restore; pages that were bound to a
//! device handler are restored as unresolved, so the slow path re-arbitrates
//! them against whatever devices the rebuilt machine has installed.
//!
//! Snapshots may come from untrusted files; decoding is bounds-checked and
//! never allocates based on unvalidated lengths.

use thiserror::Error;

use crate::handles::PageLink;
use crate::space::AddressSpace;

pub const SNAPSHOT_MAGIC: [u8; 4] = *b"GMEM";
pub const SNAPSHOT_VERSION: (u16, u16) = (1, 0);

const LINK_FREE: u32 = 0;
const LINK_END: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("bad snapshot magic")]
    BadMagic,
    #[error("unsupported snapshot version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },
    #[error("snapshot truncated")]
    Truncated,
    #[error("snapshot {field} is {found:#x}, this machine has {expected:#x}")]
    GeometryMismatch {
        field: &'static str,
        expected: u32,
        found: u32,
    },
    #[error("corrupt chain link at page {page:#x}: {value:#x}")]
    CorruptChainLink { page: u32, value: u32 },
}

struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }
}

struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], SnapshotError> {
        if self.buf.len() < len {
            return Err(SnapshotError::Truncated);
        }
        let (head, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(head)
    }

    fn get_u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.take(1)?[0])
    }

    fn get_u16(&mut self) -> Result<u16, SnapshotError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn get_u32(&mut self) -> Result<u32, SnapshotError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

impl AddressSpace {
    pub fn save_state(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_bytes(&SNAPSHOT_MAGIC);
        enc.put_u16(SNAPSHOT_VERSION.0);
        enc.put_u16(SNAPSHOT_VERSION.1);

        enc.put_u32(self.pages);
        enc.put_u32(self.reported_pages);
        enc.put_u32(self.handler_pages);
        enc.put_u8(self.a20_enabled() as u8);
        enc.put_u8(self.a20_control_shadow());

        for page in 0..self.handler_pages {
            enc.put_u8(self.cached_kind(page).map_or(0, |kind| kind as u8));
        }
        enc.put_bytes(self.arena().data());
        for link in &self.links {
            enc.put_u32(match *link {
                PageLink::Free => LINK_FREE,
                PageLink::Chained(next) => next,
                PageLink::End => LINK_END,
            });
        }
        enc.buf
    }

    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), SnapshotError> {
        let mut dec = Decoder::new(bytes);
        if dec.take(4)? != &SNAPSHOT_MAGIC[..] {
            return Err(SnapshotError::BadMagic);
        }
        let major = dec.get_u16()?;
        let minor = dec.get_u16()?;
        if major != SNAPSHOT_VERSION.0 {
            return Err(SnapshotError::UnsupportedVersion { major, minor });
        }

        for (field, expected) in [
            ("pages", self.pages),
            ("reported_pages", self.reported_pages),
            ("handler_pages", self.handler_pages),
        ] {
            let found = dec.get_u32()?;
            if found != expected {
                return Err(SnapshotError::GeometryMismatch {
                    field,
                    expected,
                    found,
                });
            }
        }
        let a20_enabled = dec.get_u8()? != 0;
        let a20_control = dec.get_u8()?;

        let kinds = dec.take(self.handler_pages as usize)?;
        let arena_len = self.arena().data().len();
        let arena_bytes = dec.take(arena_len)?;

        let mut links = Vec::with_capacity(self.pages as usize);
        for page in 0..self.pages {
            let value = dec.get_u32()?;
            links.push(match value {
                LINK_FREE => PageLink::Free,
                LINK_END => PageLink::End,
                next if next < self.pages => PageLink::Chained(next),
                value => return Err(SnapshotError::CorruptChainLink { page, value }),
            });
        }

        // Everything validated; mutate.
        self.arena.borrow_mut().data_mut().copy_from_slice(arena_bytes);
        self.links = links;
        self.restore_a20(a20_enabled, a20_control);
        for (page, kind) in kinds.iter().enumerate() {
            self.rebind_kind(page as u32, *kind);
        }
        self.flush_host_map();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callout::{BusClass, MemMask};
    use crate::handler::{HandlerFlags, HandlerKind, PageHandler};
    use crate::space::MemoryConfig;
    use crate::A20Mode;
    use std::rc::Rc;

    struct DevHandler;

    impl PageHandler for DevHandler {
        fn flags(&self) -> HandlerFlags {
            HandlerFlags::READABLE
        }

        fn read_u8(&self, _addr: u64) -> u8 {
            0x42
        }

        fn write_u8(&self, _addr: u64, _value: u8) {}
    }

    fn space() -> AddressSpace {
        AddressSpace::new(MemoryConfig {
            megabytes: 2,
            a20: A20Mode::Mask,
            ..MemoryConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn round_trip_preserves_ram_leases_and_a20() {
        let mut mem = space();
        mem.a20_enable(true);
        mem.write_u32(0x12_3456, 0xCAFE_F00D);
        let lease = mem.allocate_pages(3, true).unwrap();

        let state = mem.save_state();

        let mut restored = space();
        restored.load_state(&state).unwrap();
        assert!(restored.a20_enabled());
        assert_eq!(restored.read_u32(0x12_3456), 0xCAFE_F00D);
        assert_eq!(restored.allocated_pages(lease), 3);
        assert_eq!(restored.next_free_page(), Some(lease.page() + 3));
    }

    #[test]
    fn device_pages_restore_as_unresolved() {
        let mut mem = space();
        let dev: Rc<dyn PageHandler> = Rc::new(DevHandler);
        mem.register_handler(0x5000, dev, 1);
        assert_eq!(mem.get_page_handler(0x5000).kind(), HandlerKind::Device);

        let state = mem.save_state();
        let mut restored = space();
        restored.load_state(&state).unwrap();

        // Nothing claims the page in the restored machine.
        assert_eq!(restored.get_page_handler(0x5000).kind(), HandlerKind::Unmapped);
    }

    #[test]
    fn singleton_pages_rebind_directly() {
        let mut mem = space();
        mem.map_rom_pages(0xE0, 0x10);
        let state = mem.save_state();

        let mut restored = space();
        restored.load_state(&state).unwrap();
        assert_eq!(restored.get_page_handler(0xE0).kind(), HandlerKind::Rom);
        assert_eq!(restored.get_page_handler(0xC0).kind(), HandlerKind::Rom);
        assert_eq!(restored.get_page_handler(0).kind(), HandlerKind::Ram);
    }

    #[test]
    fn restored_device_pages_re_resolve_against_new_callouts() {
        let mut mem = space();
        let dev: Rc<dyn PageHandler> = Rc::new(DevHandler);
        mem.register_handler(0x5000, dev, 1);
        let state = mem.save_state();

        let mut restored = space();
        let id = restored.allocate_callout(BusClass::Isa).unwrap();
        let dev2: Rc<dyn PageHandler> = Rc::new(DevHandler);
        restored
            .install_callout(
                id,
                0x5000,
                MemMask::aligned(1).unwrap(),
                Box::new(move |_page| Some(dev2.clone())),
            )
            .unwrap();
        restored.load_state(&state).unwrap();

        assert_eq!(restored.get_page_handler(0x5000).kind(), HandlerKind::Device);
        assert_eq!(restored.read_u8(0x5000u64 << 12), 0x42);
    }

    #[test]
    fn geometry_mismatch_is_rejected() {
        let mem = space();
        let state = mem.save_state();

        let mut other = AddressSpace::new(MemoryConfig {
            megabytes: 4,
            a20: A20Mode::Mask,
            ..MemoryConfig::default()
        })
        .unwrap();
        assert!(matches!(
            other.load_state(&state),
            Err(SnapshotError::GeometryMismatch { field: "pages", .. })
        ));
    }

    #[test]
    fn corrupt_input_is_rejected_without_side_effects() {
        let mut mem = space();
        mem.write_u8(0x1000, 0x55);

        assert_eq!(mem.load_state(b"GM"), Err(SnapshotError::Truncated));
        assert_eq!(
            mem.load_state(b"XXXX\x01\x00\x00\x00"),
            Err(SnapshotError::BadMagic)
        );

        let mut state = mem.save_state();
        state.truncate(state.len() - 1);
        assert_eq!(mem.load_state(&state), Err(SnapshotError::Truncated));

        assert_eq!(mem.read_u8(0x1000), 0x55);
    }
}
