//! DMA Buffer Abstraction
//!
//! Descriptor rings and firmware scratch buffers live in DMA-coherent memory
//! supplied by the host. The buffer owns its memory; dropping it releases the
//! mapping, so a buffer must outlive every descriptor that points at it.

/// Memory shared with the WFDMA engine
pub trait DmaBuf {
    /// CPU mapping
    fn vaddr(&self) -> u64;
    /// Bus address written into descriptors and ring BASE registers
    fn paddr(&self) -> u64;
    fn size(&self) -> usize;

    /// Before handing the buffer to the device. Coherent memory: no-op.
    fn sync_for_device(&self) {}

    /// Before reading what the device wrote. Coherent memory: no-op.
    fn sync_for_cpu(&self) {}

    fn read32(&self, offset: usize) -> u32 {
        debug_assert!(offset + 4 <= self.size());
        unsafe { core::ptr::read_volatile((self.vaddr() + offset as u64) as *const u32) }
    }

    fn write32(&self, offset: usize, val: u32) {
        debug_assert!(offset + 4 <= self.size());
        unsafe { core::ptr::write_volatile((self.vaddr() + offset as u64) as *mut u32, val) }
    }

    /// Copy `data` in at `offset`. Returns bytes copied.
    fn write_bytes(&self, offset: usize, data: &[u8]) -> usize {
        let n = data.len().min(self.size().saturating_sub(offset));
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), (self.vaddr() + offset as u64) as *mut u8, n);
        }
        n
    }

    /// Borrow the first `len` bytes
    fn bytes(&self, len: usize) -> &[u8] {
        let len = len.min(self.size());
        unsafe { core::slice::from_raw_parts(self.vaddr() as *const u8, len) }
    }
}

/// Source of zeroed DMA-coherent buffers
pub trait DmaAllocator {
    type Buf: DmaBuf;

    /// Allocate `size` zeroed bytes, or `None` if the pool is exhausted
    fn alloc(&self, size: usize) -> Option<Self::Buf>;
}
