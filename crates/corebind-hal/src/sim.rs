//! In-process simulated platform for tests and the demo binary.
//!
//! [`SimPlatform`] implements every collaborator trait of this crate
//! ([`Loader`], [`MemoryAllocator`], [`ProcessorLink`]) without touching real
//! hardware, so the full binding engine can run headless.
//!
//! # Stub behaviour
//!
//! | Collaborator | Simulated behaviour |
//! |---|---|
//! | [`Loader`] | Instantiates registered templates into a [`ComponentTable`]; unknown names fail with `NotFound`. |
//! | [`MemoryAllocator`] | Hands out increasing addresses and counts live allocations; an optional byte limit produces `OutOfMemory`. |
//! | [`ProcessorLink`] | Per processor: acknowledge inline, hold messages until [`SimPlatform::release_deferred`], or never answer. |
//!
//! # Example
//!
//! ```rust
//! use corebind_hal::sim::SimPlatform;
//! use corebind_hal::loader::Loader;
//! use corebind_types::{ComponentClass, ComponentTemplate, ProcessorId};
//!
//! let platform = SimPlatform::builder()
//!     .with_template(ComponentTemplate::new("mixer", ComponentClass::Ordinary))
//!     .build();
//!
//! let id = platform.spawn("mixer", ProcessorId(1)).unwrap();
//! assert!(platform.component(id).is_some());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use corebind_types::{
    BindError, ComponentId, ComponentState, ComponentTemplate, InterfaceType, MemoryDomain,
    MemoryKind, Priority, ProcessorId,
};
use parking_lot::Mutex;
use tracing::debug;

use crate::component::ComponentInstance;
use crate::component_table::ComponentTable;
use crate::link::{ProcessorLink, ReplySink, ServiceMessage, ServiceReply, ServiceRequest};
use crate::loader::Loader;
use crate::memory::{AllocatorStats, MemoryAllocator, MemoryHandle};

/// Void trap addresses are `VOID_BASE + processor`.
const VOID_BASE: u32 = 0xdead_0000;

/// How a simulated processor answers service messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkBehaviour {
    /// Acknowledge every message before `post` returns.
    #[default]
    Responsive,
    /// Queue messages until [`SimPlatform::release_deferred`] is called.
    Deferred,
    /// Never answer.
    Unresponsive,
}

type Deferred = (ProcessorId, ServiceMessage, Arc<dyn ReplySink>);

#[derive(Default)]
struct SimState {
    table: ComponentTable,
    next_this: u32,
    next_allocation: u64,
    next_device: u32,
    allocations: HashMap<u64, usize>,
    memory_limit: Option<usize>,
    behaviour: HashMap<ProcessorId, LinkBehaviour>,
    deferred: Vec<Deferred>,
    posted: Vec<(ProcessorId, ServiceRequest)>,
    panics: Vec<ProcessorId>,
}

impl SimState {
    fn live_bytes(&self) -> usize {
        self.allocations.values().sum()
    }
}

/// A host plus any number of DSP cores, all simulated in-process.
pub struct SimPlatform {
    templates: HashMap<String, Arc<ComponentTemplate>>,
    state: Mutex<SimState>,
}

impl SimPlatform {
    /// Start configuring a platform.
    pub fn builder() -> SimPlatformBuilder {
        SimPlatformBuilder::default()
    }

    /// The default memory domain of `processor`.
    pub fn domain(processor: ProcessorId) -> MemoryDomain {
        MemoryDomain {
            id: processor.0 as u32,
            processor,
        }
    }

    /// Instantiate `template` on `processor` and mark it constructed, the way
    /// the owner of a user component would.
    pub fn spawn(&self, template: &str, processor: ProcessorId) -> Result<ComponentId, BindError> {
        let id = self.instantiate(template, Self::domain(processor), Priority::Normal)?;
        if let Some(instance) = self.component(id) {
            instance.set_state(ComponentState::Stopped);
        }
        Ok(id)
    }

    /// Change the link behaviour of `processor`.
    pub fn set_behaviour(&self, processor: ProcessorId, behaviour: LinkBehaviour) {
        self.state.lock().behaviour.insert(processor, behaviour);
    }

    /// Acknowledge every message held by a [`LinkBehaviour::Deferred`]
    /// processor.  Returns the number of messages released.
    pub fn release_deferred(&self) -> usize {
        let deferred = std::mem::take(&mut self.state.lock().deferred);
        let released = deferred.len();
        for (_, message, replies) in deferred {
            replies.acknowledge(message.seq, ServiceReply::Done);
        }
        released
    }

    /// Cap the total number of live bytes; `None` removes the cap.
    pub fn set_memory_limit(&self, limit: Option<usize>) {
        self.state.lock().memory_limit = limit;
    }

    /// Every service request posted so far, in order.
    pub fn posted(&self) -> Vec<(ProcessorId, ServiceRequest)> {
        self.state.lock().posted.clone()
    }

    /// Processors that received the panic interrupt.
    pub fn panicked(&self) -> Vec<ProcessorId> {
        self.state.lock().panics.clone()
    }

    pub fn live_components(&self) -> usize {
        self.state.lock().table.len()
    }

    /// Live instances whose template name starts with `prefix`.
    pub fn live_with_prefix(&self, prefix: &str) -> usize {
        self.state.lock().table.count_with_prefix(prefix)
    }
}

impl Loader for SimPlatform {
    fn instantiate(
        &self,
        template: &str,
        domain: MemoryDomain,
        priority: Priority,
    ) -> Result<ComponentId, BindError> {
        let tpl = self
            .templates
            .get(template)
            .cloned()
            .ok_or_else(|| BindError::NotFound(template.to_string()))?;
        let mut state = self.state.lock();
        let id = state.table.next_id();
        state.next_this += 0x40;
        let this = 0x1000_0000 + state.next_this;
        let name = format!("{template}#{}", id.0);
        let instance = ComponentInstance::new(
            id,
            name,
            tpl,
            domain,
            priority,
            this,
            VOID_BASE + domain.processor.0 as u32,
        );
        state.table.insert(instance);
        debug!(%id, template, processor = %domain.processor, "sim: instantiated");
        Ok(id)
    }

    fn destroy(&self, id: ComponentId) -> Result<(), BindError> {
        self.state.lock().table.remove(id)?;
        debug!(%id, "sim: destroyed");
        Ok(())
    }

    fn component(&self, id: ComponentId) -> Option<Arc<ComponentInstance>> {
        self.state.lock().table.get(id)
    }

    fn void_method(&self, processor: ProcessorId) -> u32 {
        VOID_BASE + processor.0 as u32
    }
}

impl MemoryAllocator for SimPlatform {
    fn allocate(
        &self,
        domain: MemoryDomain,
        kind: MemoryKind,
        size: usize,
        alignment: usize,
    ) -> Result<MemoryHandle, BindError> {
        let mut state = self.state.lock();
        if let Some(limit) = state.memory_limit
            && state.live_bytes() + size > limit
        {
            return Err(BindError::OutOfMemory(format!(
                "{size} bytes in domain {} ({} of {limit} in use)",
                domain.id,
                state.live_bytes()
            )));
        }
        let alignment = alignment.max(1) as u32;
        let device = state.next_device.div_ceil(alignment) * alignment + 0x2000_0000;
        state.next_device = device - 0x2000_0000 + size as u32;
        state.next_allocation += 1;
        let id = state.next_allocation;
        state.allocations.insert(id, size);
        let logical = 0xffff_0000_0000 | device as u64;
        Ok(MemoryHandle::new(id, domain, kind, size, logical, device))
    }

    fn free(&self, handle: MemoryHandle) {
        self.state.lock().allocations.remove(&handle.id);
    }

    fn stats(&self) -> AllocatorStats {
        let state = self.state.lock();
        AllocatorStats {
            live_allocations: state.allocations.len(),
            live_bytes: state.live_bytes(),
        }
    }
}

impl ProcessorLink for SimPlatform {
    fn post(&self, processor: ProcessorId, message: ServiceMessage, replies: Arc<dyn ReplySink>) {
        let behaviour = {
            let mut state = self.state.lock();
            state.posted.push((processor, message.request.clone()));
            let behaviour = state.behaviour.get(&processor).copied().unwrap_or_default();
            if behaviour == LinkBehaviour::Deferred {
                state.deferred.push((processor, message.clone(), replies.clone()));
            }
            behaviour
        };
        // The lock is released before acknowledging: the reply path may
        // re-enter the platform.
        if behaviour == LinkBehaviour::Responsive {
            replies.acknowledge(message.seq, ServiceReply::Done);
        }
    }

    fn signal_panic(&self, processor: ProcessorId) {
        self.state.lock().panics.push(processor);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for a [`SimPlatform`].
#[derive(Default)]
pub struct SimPlatformBuilder {
    templates: Vec<ComponentTemplate>,
    memory_limit: Option<usize>,
}

impl SimPlatformBuilder {
    /// Make `template` loadable by name.
    pub fn with_template(mut self, template: ComponentTemplate) -> Self {
        self.templates.push(template);
        self
    }

    /// Register the generated trace, event, stub and skeleton templates for
    /// `itf`, each marshalling `param_size` words.
    pub fn with_helpers(self, itf: &InterfaceType, param_size: u32) -> Self {
        self.with_template(ComponentTemplate::trace_helper(itf, 0x3000))
            .with_template(ComponentTemplate::event_helper(itf, 0x3100, param_size))
            .with_template(ComponentTemplate::stub(itf, 0x3200, param_size))
            .with_template(ComponentTemplate::skeleton(itf, 0x3300, param_size))
    }

    /// Cap the total number of live allocated bytes.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Consume the builder.
    pub fn build(self) -> Arc<SimPlatform> {
        let templates = self
            .templates
            .into_iter()
            .map(|t| (t.name.clone(), Arc::new(t)))
            .collect();
        Arc::new(SimPlatform {
            templates,
            state: Mutex::new(SimState {
                memory_limit: self.memory_limit,
                ..SimState::default()
            }),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
