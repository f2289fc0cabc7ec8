//! The narrow contract the instruction core consumes.

use crate::space::AddressSpace;

/// Abstraction over guest physical memory access.
///
/// The required methods are the byte primitives; every multi-byte default
/// decomposes into them in ascending address order, little-endian, the same
/// contract the page handlers follow. Implementations are expected to
/// override the bulk and sized methods where they can do better (the address
/// space substitutes its page-aware fast paths). Reads are `&mut self`
/// because resolving a page may update the handler cache, and device
/// handlers may have read side effects.
pub trait MemoryBus {
    fn read_u8(&mut self, paddr: u64) -> u8;
    fn write_u8(&mut self, paddr: u64, value: u8);

    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read_u8(paddr + i as u64);
        }
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) {
        for (i, byte) in buf.iter().enumerate() {
            self.write_u8(paddr + i as u64, *byte);
        }
    }

    fn read_u16(&mut self, paddr: u64) -> u16 {
        u16::from(self.read_u8(paddr)) | u16::from(self.read_u8(paddr + 1)) << 8
    }

    fn read_u32(&mut self, paddr: u64) -> u32 {
        u32::from(self.read_u16(paddr)) | u32::from(self.read_u16(paddr + 2)) << 16
    }

    fn write_u16(&mut self, paddr: u64, value: u16) {
        self.write_u8(paddr, value as u8);
        self.write_u8(paddr + 1, (value >> 8) as u8);
    }

    fn write_u32(&mut self, paddr: u64, value: u32) {
        self.write_u16(paddr, value as u16);
        self.write_u16(paddr + 2, (value >> 16) as u16);
    }
}

impl MemoryBus for AddressSpace {
    fn read_u8(&mut self, paddr: u64) -> u8 {
        AddressSpace::read_u8(self, paddr)
    }

    fn write_u8(&mut self, paddr: u64, value: u8) {
        AddressSpace::write_u8(self, paddr, value);
    }

    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]) {
        self.block_read(paddr, buf);
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) {
        self.block_write(paddr, buf);
    }

    fn read_u16(&mut self, paddr: u64) -> u16 {
        AddressSpace::read_u16(self, paddr)
    }

    fn read_u32(&mut self, paddr: u64) -> u32 {
        AddressSpace::read_u32(self, paddr)
    }

    fn write_u16(&mut self, paddr: u64, value: u16) {
        AddressSpace::write_u16(self, paddr, value);
    }

    fn write_u32(&mut self, paddr: u64, value: u32) {
        AddressSpace::write_u32(self, paddr, value);
    }
}
