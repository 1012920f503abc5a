//! [`InterfaceRefTable`] – the binding slots of one client component.
//!
//! One [`InterfaceRef`] exists per required interface element
//! (`slot × collection index`).  A reference is [`RefTarget::Unbound`],
//! deliberately bound to [`RefTarget::Void`], or bound to a server; when
//! bound it carries the [`BindingPayload`] of the factory that created it,
//! which owns every helper and buffer needed to undo the binding.

use std::sync::Arc;

use corebind_types::{
    BindError, BindingKind, ComponentId, ComponentTemplate, InterfaceDesc, ProcessorId,
};
use corebind_transport::{EventQueue, ParamFifo};

/// Where a binding slot points.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RefTarget {
    #[default]
    Unbound,
    /// Bound to the void trap method on purpose.
    Void,
    /// Bound to a provided interface element.
    Server(InterfaceDesc),
    /// Bound to a receiver on the host identified by an opaque token.
    Host { context: u32 },
}

impl RefTarget {
    pub fn is_bound(&self) -> bool {
        !matches!(self, RefTarget::Unbound)
    }

    pub fn server(&self) -> Option<&InterfaceDesc> {
        match self {
            RefTarget::Server(desc) => Some(desc),
            _ => None,
        }
    }
}

/// A helper component created by a factory.  The handle is a weak
/// back-reference into the loader's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Helper {
    pub id: ComponentId,
    pub processor: ProcessorId,
}

/// Factory-private state of one binding.
#[derive(Debug)]
pub enum BindingPayload {
    Synchronous,
    Void,
    Traced {
        tracer: Helper,
    },
    Asynchronous {
        event: Helper,
        queue: EventQueue,
    },
    /// A host client calling into a DSP skeleton.  No stub exists.
    HostToDsp {
        skeleton: Helper,
        queue: EventQueue,
        fifo: Arc<ParamFifo>,
    },
    /// A DSP stub calling out to the host.  No skeleton exists.
    DspToHost {
        stub: Helper,
        fifo: Arc<ParamFifo>,
        host_context: u32,
    },
    DspToDsp {
        stub: Helper,
        skeleton: Helper,
        queue: EventQueue,
        fifo: Arc<ParamFifo>,
    },
}

impl BindingPayload {
    pub fn kind(&self) -> BindingKind {
        match self {
            BindingPayload::Synchronous => BindingKind::Synchronous,
            BindingPayload::Void => BindingKind::Void,
            BindingPayload::Traced { .. } => BindingKind::Traced,
            BindingPayload::Asynchronous { .. } => BindingKind::Asynchronous,
            BindingPayload::HostToDsp { .. } => BindingKind::HostToDsp,
            BindingPayload::DspToHost { .. } => BindingKind::DspToHost,
            BindingPayload::DspToDsp { .. } => BindingKind::DspToDsp,
        }
    }

    /// Param FIFO of a distributed binding.
    pub fn fifo(&self) -> Option<&Arc<ParamFifo>> {
        match self {
            BindingPayload::HostToDsp { fifo, .. }
            | BindingPayload::DspToHost { fifo, .. }
            | BindingPayload::DspToDsp { fifo, .. } => Some(fifo),
            _ => None,
        }
    }
}

/// One binding slot.
#[derive(Debug, Default)]
pub struct InterfaceRef {
    pub target: RefTarget,
    pub binding: Option<BindingPayload>,
}

impl InterfaceRef {
    pub fn kind(&self) -> Option<BindingKind> {
        self.binding.as_ref().map(BindingPayload::kind)
    }
}

/// Binding slots of a component, sized from its template.
#[derive(Debug)]
pub struct InterfaceRefTable {
    slots: Vec<Vec<InterfaceRef>>,
}

impl InterfaceRefTable {
    /// One unbound reference per required interface element of `template`.
    pub fn for_template(template: &ComponentTemplate) -> Self {
        let slots = template
            .requires
            .iter()
            .map(|r| (0..r.collection_size).map(|_| InterfaceRef::default()).collect())
            .collect();
        Self { slots }
    }

    pub fn get(&self, slot: usize, index: usize) -> Option<&InterfaceRef> {
        self.slots.get(slot).and_then(|s| s.get(index))
    }

    /// Store `reference` in `desc`'s slot.
    ///
    /// # Errors
    ///
    /// [`BindError::NotFound`] when the slot does not exist.
    pub fn set(&mut self, desc: &InterfaceDesc, reference: InterfaceRef) -> Result<(), BindError> {
        let entry = self
            .slots
            .get_mut(desc.slot)
            .and_then(|s| s.get_mut(desc.index))
            .ok_or_else(|| BindError::NotFound(desc.to_string()))?;
        *entry = reference;
        Ok(())
    }

    /// Reset `desc`'s slot to unbound and hand back what it held.
    pub fn take(&mut self, desc: &InterfaceDesc) -> Option<InterfaceRef> {
        self.slots
            .get_mut(desc.slot)
            .and_then(|s| s.get_mut(desc.index))
            .map(std::mem::take)
    }

    /// Number of slots currently bound, void included.
    pub fn bound_count(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|r| r.target.is_bound())
            .count()
    }
}
