//! The [`MemoryAllocator`] collaborator: allocates buffers inside a memory
//! domain and bridges host and DSP addressing.

use corebind_types::{BindError, MemoryDomain, MemoryKind};

/// A live allocation.  Freed by handing it back to
/// [`MemoryAllocator::free`]; the handle is not `Clone` so it can only be
/// freed once.
#[derive(Debug, PartialEq, Eq)]
pub struct MemoryHandle {
    pub id: u64,
    pub domain: MemoryDomain,
    pub kind: MemoryKind,
    pub size: usize,
    logical: u64,
    device: u32,
}

impl MemoryHandle {
    /// Only allocators create handles.
    pub fn new(id: u64, domain: MemoryDomain, kind: MemoryKind, size: usize, logical: u64, device: u32) -> Self {
        Self {
            id,
            domain,
            kind,
            size,
            logical,
            device,
        }
    }
}

/// Snapshot of allocator bookkeeping, used to check for leaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    pub live_allocations: usize,
    pub live_bytes: usize,
}

/// Memory allocator of the platform.
pub trait MemoryAllocator: Send + Sync {
    /// Allocate `size` bytes aligned to `alignment` in `domain`.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::OutOfMemory`] when the domain is exhausted.
    fn allocate(
        &self,
        domain: MemoryDomain,
        kind: MemoryKind,
        size: usize,
        alignment: usize,
    ) -> Result<MemoryHandle, BindError>;

    fn free(&self, handle: MemoryHandle);

    /// Address of the allocation as seen by the host.
    fn logical_address(&self, handle: &MemoryHandle) -> u64 {
        handle.logical
    }

    /// Address of the allocation as seen by the DSP owning the domain.
    fn device_address(&self, handle: &MemoryHandle) -> u32 {
        handle.device
    }

    fn stats(&self) -> AllocatorStats;
}
