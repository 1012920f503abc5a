//! [`ParamFifo`] – shared-memory circular buffer of call-argument records
//! exchanged by a stub/skeleton pair.
//!
//! # Layout
//!
//! | Region | Words |
//! |---|---|
//! | Shared fields | `1 + method_count`: the call target locator followed by the callee's resolved method addresses |
//! | Ring | `depth * element_words`: one record per call, `[method, args…]` |
//!
//! Shared fields are written exactly once, at bind time, so the remote
//! proxy resolves both the call target and the method address from the FIFO
//! itself without a second round trip.
//!
//! # Flow control
//!
//! A producer [`push_call`][ParamFifo::push_call]es records, the consumer
//! [`pop`][ParamFifo::pop]s them and [`acknowledge`][ParamFifo::acknowledge]s
//! once the call is complete.  At most `depth` calls are in flight; a
//! producer that asked to wait blocks until an acknowledgment frees a slot.
//!
//! Destroying a FIFO performs no flush: it fails with
//! [`BindError::CallsInFlight`] until every call has been acknowledged.

use std::sync::OnceLock;

use corebind_hal::{MemoryAllocator, MemoryHandle};
use corebind_types::{BindError, MemoryDomain, MemoryKind, ProcessorId};
use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// What word 0 of the shared fields tells the remote proxy about the callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FifoTarget {
    /// Self-describing address of a DSP-resident skeleton.
    Skeleton(u32),
    /// Opaque token identifying the host-side receiver.
    HostContext(u32),
    /// Size of the marshalling descriptor of a foreign-ABI proxy.
    DescriptorSize(u32),
}

impl FifoTarget {
    pub fn word(self) -> u32 {
        match self {
            FifoTarget::Skeleton(w) | FifoTarget::HostContext(w) | FifoTarget::DescriptorSize(w) => w,
        }
    }
}

/// Out-of-band values written once when the binding is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFields {
    pub target: FifoTarget,
    pub methods: Vec<u32>,
}

/// One call read back by the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FifoCall {
    pub slot: usize,
    pub method: u32,
    pub args: Vec<u32>,
}

#[derive(Debug)]
struct Ring {
    data: Vec<u32>,
    write: usize,
    read: usize,
    /// Pushed and not yet popped.
    pending: usize,
    /// Pushed and not yet acknowledged.
    in_flight: usize,
    paired: bool,
    closed: bool,
}

/// Param FIFO of one distributed binding.
#[derive(Debug)]
pub struct ParamFifo {
    memory: Mutex<Option<MemoryHandle>>,
    processor: ProcessorId,
    device_address: u32,
    depth: usize,
    element_words: usize,
    method_count: usize,
    shared: OnceLock<SharedFields>,
    ring: Mutex<Ring>,
    slot_freed: Condvar,
}

impl ParamFifo {
    /// Bytes needed for `depth` records of `param_words` argument words plus
    /// the shared fields of a `method_count`-method interface.
    pub fn allocation_size(depth: usize, param_words: usize, method_count: usize) -> usize {
        (1 + method_count + depth * (param_words + 1)) * 4
    }

    /// Allocate a FIFO in `domain`.
    ///
    /// # Errors
    ///
    /// - [`BindError::IllegalBinding`] – `depth` is zero.
    /// - [`BindError::OutOfMemory`] – the allocator cannot hold the buffer.
    pub fn create(
        allocator: &dyn MemoryAllocator,
        domain: MemoryDomain,
        depth: usize,
        param_words: usize,
        method_count: usize,
    ) -> Result<Self, BindError> {
        if depth == 0 {
            return Err(BindError::IllegalBinding("FIFO depth must be non-zero".into()));
        }
        let size = Self::allocation_size(depth, param_words, method_count);
        let memory = allocator.allocate(domain, MemoryKind::Sdram, size, 8)?;
        let device_address = allocator.device_address(&memory);
        let element_words = param_words + 1;
        debug!(depth, element_words, device_address, "param FIFO created");
        Ok(Self {
            memory: Mutex::new(Some(memory)),
            processor: domain.processor,
            device_address,
            depth,
            element_words,
            method_count,
            shared: OnceLock::new(),
            ring: Mutex::new(Ring {
                data: vec![0; depth * element_words],
                write: 0,
                read: 0,
                pending: 0,
                in_flight: 0,
                paired: false,
                closed: false,
            }),
            slot_freed: Condvar::new(),
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Words per record, the method word included.
    pub fn element_words(&self) -> usize {
        self.element_words
    }

    /// Address the remote proxy reads the FIFO from.
    pub fn device_address(&self) -> u32 {
        self.device_address
    }

    /// Write the shared fields.
    ///
    /// # Errors
    ///
    /// [`BindError::IllegalBinding`] when they were already written or when
    /// `methods` does not match the interface the FIFO was sized for.
    pub fn set_shared_fields(&self, target: FifoTarget, methods: &[u32]) -> Result<(), BindError> {
        if methods.len() > self.method_count {
            return Err(BindError::IllegalBinding(format!(
                "{} method addresses for a {}-method FIFO",
                methods.len(),
                self.method_count
            )));
        }
        self.shared
            .set(SharedFields {
                target,
                methods: methods.to_vec(),
            })
            .map_err(|_| BindError::IllegalBinding("FIFO shared fields already set".into()))
    }

    pub fn shared_fields(&self) -> Option<&SharedFields> {
        self.shared.get()
    }

    /// Connect the producing stub (or host) to the consuming skeleton.
    pub fn pair(&self) {
        self.ring.lock().paired = true;
    }

    /// Disconnect producer and consumer.
    ///
    /// # Errors
    ///
    /// [`BindError::CallsInFlight`] while calls are unacknowledged.
    pub fn unpair(&self) -> Result<(), BindError> {
        let mut ring = self.ring.lock();
        if ring.in_flight > 0 {
            return Err(BindError::CallsInFlight(ring.in_flight));
        }
        ring.paired = false;
        Ok(())
    }

    pub fn is_paired(&self) -> bool {
        self.ring.lock().paired
    }

    /// Write one call record.  Returns the ring slot used.
    ///
    /// With `wait == false` a full FIFO fails immediately with
    /// [`BindError::ChannelOverflow`]; otherwise the caller blocks until an
    /// acknowledgment frees a slot.
    ///
    /// # Errors
    ///
    /// - [`BindError::ChannelClosed`] – the FIFO is unpaired or destroyed.
    /// - [`BindError::IllegalBinding`] – `args` does not fit one record.
    /// - [`BindError::ChannelOverflow`] – full and `wait == false`.
    pub fn push_call(&self, method: u32, args: &[u32], wait: bool) -> Result<usize, BindError> {
        if args.len() >= self.element_words {
            return Err(BindError::IllegalBinding(format!(
                "{} argument words exceed FIFO element of {}",
                args.len(),
                self.element_words - 1
            )));
        }
        let mut ring = self.ring.lock();
        loop {
            if ring.closed || !ring.paired {
                return Err(BindError::ChannelClosed(format!(
                    "param FIFO at {:#x}",
                    self.device_address
                )));
            }
            if ring.in_flight < self.depth {
                break;
            }
            if !wait {
                return Err(BindError::ChannelOverflow(self.processor));
            }
            self.slot_freed.wait(&mut ring);
        }
        let slot = ring.write;
        let base = slot * self.element_words;
        let record = &mut ring.data[base..base + self.element_words];
        record.fill(0);
        record[0] = method;
        record[1..=args.len()].copy_from_slice(args);
        ring.write = (slot + 1) % self.depth;
        ring.pending += 1;
        ring.in_flight += 1;
        Ok(slot)
    }

    /// Read the oldest unread call, consumer side.
    pub fn pop(&self) -> Option<FifoCall> {
        let mut ring = self.ring.lock();
        if ring.pending == 0 {
            return None;
        }
        let slot = ring.read;
        let base = slot * self.element_words;
        let record = &ring.data[base..base + self.element_words];
        let call = FifoCall {
            slot,
            method: record[0],
            args: record[1..].to_vec(),
        };
        ring.read = (slot + 1) % self.depth;
        ring.pending -= 1;
        Some(call)
    }

    /// Complete the oldest popped call and free its slot.  A no-op when no
    /// popped call is outstanding.
    pub fn acknowledge(&self) {
        let mut ring = self.ring.lock();
        if ring.in_flight > ring.pending {
            ring.in_flight -= 1;
            self.slot_freed.notify_one();
        }
    }

    pub fn in_flight(&self) -> usize {
        self.ring.lock().in_flight
    }

    pub fn is_drained(&self) -> bool {
        self.in_flight() == 0
    }

    /// Release the buffer.  Idempotent.
    ///
    /// # Errors
    ///
    /// [`BindError::CallsInFlight`] while calls are unacknowledged; the FIFO
    /// is left untouched.
    pub fn destroy(&self, allocator: &dyn MemoryAllocator) -> Result<(), BindError> {
        {
            let mut ring = self.ring.lock();
            if ring.in_flight > 0 {
                return Err(BindError::CallsInFlight(ring.in_flight));
            }
            ring.closed = true;
            ring.paired = false;
        }
        self.slot_freed.notify_all();
        if let Some(memory) = self.memory.lock().take() {
            allocator.free(memory);
            debug!(device_address = self.device_address, "param FIFO destroyed");
        }
        Ok(())
    }
}
