//! [`EventQueue`] – fixed-capacity, pre-linked list of deferred-call records.
//!
//! The queue is one contiguous allocation in the owner's memory domain,
//! modelled as an arena of equally sized records.  Links are record indices
//! rather than addresses, so the same arena is meaningful in any address
//! space: a DSP resolves record `i` as `its_base + i * record_size`.
//!
//! Static fields (`next`, priority, owner) are written once at creation.
//! Capacity never changes; [`EventQueue::acquire`] fails once every record is
//! in use.

use corebind_hal::{MemoryAllocator, MemoryHandle};
use corebind_types::{BindError, MemoryDomain, MemoryKind, Priority};
use tracing::{debug, warn};

/// Words of static header in every record: next, priority, owner.
const HEADER_WORDS: usize = 3;

/// One record of the arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Index of the following record; `None` terminates the list.
    pub next: Option<u32>,
    pub priority: Priority,
    /// "this" of the component the event is delivered to.
    pub owner: u32,
    pub payload: Vec<u32>,
}

/// A queue of `depth` records seeded against one owner.
#[derive(Debug)]
pub struct EventQueue {
    memory: MemoryHandle,
    records: Vec<EventRecord>,
    /// Head of the list of records not currently handed out.
    free: Option<u32>,
    /// Per record: currently handed out.
    taken: Vec<bool>,
    in_use: usize,
}

impl EventQueue {
    /// Bytes one record occupies for a `payload_words` payload.
    pub fn record_size(payload_words: usize) -> usize {
        (HEADER_WORDS + payload_words) * 4
    }

    /// Allocate and seed a queue of `depth` records in `domain`.
    ///
    /// # Errors
    ///
    /// - [`BindError::IllegalBinding`] – `depth` is zero.
    /// - [`BindError::OutOfMemory`] – the allocator cannot hold the arena.
    pub fn create(
        allocator: &dyn MemoryAllocator,
        domain: MemoryDomain,
        depth: usize,
        payload_words: usize,
        owner: u32,
        priority: Priority,
    ) -> Result<Self, BindError> {
        if depth == 0 {
            return Err(BindError::IllegalBinding("event queue depth must be non-zero".into()));
        }
        let memory = allocator.allocate(
            domain,
            MemoryKind::Sdram,
            depth * Self::record_size(payload_words),
            8,
        )?;
        let records = (0..depth)
            .map(|i| EventRecord {
                next: (i + 1 < depth).then_some((i + 1) as u32),
                priority,
                owner,
                payload: vec![0; payload_words],
            })
            .collect();
        debug!(depth, payload_words, owner, "event queue created");
        Ok(Self {
            memory,
            records,
            free: Some(0),
            taken: vec![false; depth],
            in_use: 0,
        })
    }

    pub fn depth(&self) -> usize {
        self.records.len()
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn record(&self, index: u32) -> Option<&EventRecord> {
        self.records.get(index as usize)
    }

    /// Device address of the arena, as published to the owning processor.
    pub fn device_address(&self, allocator: &dyn MemoryAllocator) -> u32 {
        allocator.device_address(&self.memory)
    }

    /// Take the record at the head of the free list and fill its payload.
    ///
    /// # Errors
    ///
    /// - [`BindError::IllegalBinding`] – `payload` does not fit one record.
    /// - [`BindError::ChannelOverflow`] – every record is in use.
    pub fn acquire(&mut self, payload: &[u32]) -> Result<u32, BindError> {
        let capacity = self.records.first().map_or(0, |r| r.payload.len());
        if payload.len() > capacity {
            return Err(BindError::IllegalBinding(format!(
                "{} payload words exceed event record of {capacity}",
                payload.len()
            )));
        }
        let index = self
            .free
            .ok_or(BindError::ChannelOverflow(self.memory.domain.processor))?;
        let record = &mut self.records[index as usize];
        self.free = record.next.take();
        record.payload[..payload.len()].copy_from_slice(payload);
        record.payload[payload.len()..].fill(0);
        self.taken[index as usize] = true;
        self.in_use += 1;
        Ok(index)
    }

    /// Return a record to the free list once its event has been delivered.
    ///
    /// Returns `false`, leaving the list untouched, when `index` is out of
    /// range or not currently handed out.
    pub fn release(&mut self, index: u32) -> bool {
        let Some(taken) = self.taken.get_mut(index as usize) else {
            warn!(index, "release of unknown event record ignored");
            return false;
        };
        if !*taken {
            warn!(index, "release of free event record ignored");
            return false;
        }
        *taken = false;
        self.records[index as usize].next = self.free;
        self.free = Some(index);
        self.in_use -= 1;
        true
    }

    /// Release the backing allocation.
    pub fn destroy(self, allocator: &dyn MemoryAllocator) {
        allocator.free(self.memory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corebind_hal::SimPlatform;
    use corebind_types::ProcessorId;

    fn domain() -> MemoryDomain {
        SimPlatform::domain(ProcessorId(1))
    }

    #[test]
    fn records_are_prelinked_and_seeded() {
        let p = SimPlatform::builder().build();
        let q = EventQueue::create(&*p, domain(), 3, 2, 0xabc, Priority::Urgent).unwrap();
        assert_eq!(q.depth(), 3);
        assert_eq!(q.record(0).unwrap().next, Some(1));
        assert_eq!(q.record(1).unwrap().next, Some(2));
        assert_eq!(q.record(2).unwrap().next, None);
        assert!(q.record(2).unwrap().owner == 0xabc);
        assert_eq!(q.record(1).unwrap().priority, Priority::Urgent);
        assert_eq!(p.stats().live_bytes, 3 * EventQueue::record_size(2));
        q.destroy(&*p);
        assert_eq!(p.stats().live_allocations, 0);
    }

    #[test]
    fn capacity_is_fixed() {
        let p = SimPlatform::builder().build();
        let mut q = EventQueue::create(&*p, domain(), 2, 1, 1, Priority::Normal).unwrap();
        let a = q.acquire(&[7]).unwrap();
        let _b = q.acquire(&[8]).unwrap();
        assert!(matches!(q.acquire(&[9]), Err(BindError::ChannelOverflow(_))));

        assert!(q.release(a));
        assert_eq!(q.in_use(), 1);
        let c = q.acquire(&[10]).unwrap();
        assert_eq!(c, a);
        assert_eq!(q.record(c).unwrap().payload, vec![10]);
        q.destroy(&*p);
    }

    #[test]
    fn double_release_does_not_duplicate_a_record() {
        let p = SimPlatform::builder().build();
        let mut q = EventQueue::create(&*p, domain(), 2, 1, 1, Priority::Normal).unwrap();
        let a = q.acquire(&[1]).unwrap();
        assert!(q.release(a));
        assert!(!q.release(a));
        assert!(!q.release(99));
        assert_eq!(q.in_use(), 0);

        let x = q.acquire(&[2]).unwrap();
        let y = q.acquire(&[3]).unwrap();
        assert_ne!(x, y);
        assert_eq!(q.in_use(), 2);
        assert!(matches!(q.acquire(&[4]), Err(BindError::ChannelOverflow(_))));
        q.destroy(&*p);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let p = SimPlatform::builder().build();
        let mut q = EventQueue::create(&*p, domain(), 2, 2, 1, Priority::Normal).unwrap();
        assert!(matches!(
            q.acquire(&[1, 2, 3, 4]),
            Err(BindError::IllegalBinding(_))
        ));
        assert_eq!(q.in_use(), 0);

        let short = q.acquire(&[5]).unwrap();
        assert_eq!(q.record(short).unwrap().payload, vec![5, 0]);
        q.destroy(&*p);
    }

    #[test]
    fn zero_depth_is_rejected() {
        let p = SimPlatform::builder().build();
        let result = EventQueue::create(&*p, domain(), 0, 1, 1, Priority::Normal);
        assert!(matches!(result, Err(BindError::IllegalBinding(_))));
        assert_eq!(p.stats().live_allocations, 0);
    }

    #[test]
    fn allocation_failure_is_out_of_memory() {
        let p = SimPlatform::builder().with_memory_limit(8).build();
        let result = EventQueue::create(&*p, domain(), 4, 4, 1, Priority::Normal);
        assert!(matches!(result, Err(BindError::OutOfMemory(_))));
    }
}
