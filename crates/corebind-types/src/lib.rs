//! `corebind-types` – shared vocabulary of the binding engine.
//!
//! Every other crate in the workspace speaks in terms of these types:
//! processor and component identifiers, interface descriptions, binding
//! kinds, the diagnostics [`TraceRecord`], and the [`BindError`] taxonomy.
//!
//! # Modules
//!
//! - [`template`] – immutable component templates and interface types.
//! - [`config`] – [`EngineConfig`][config::EngineConfig], the tunables the
//!   runtime reads at start-up.
//! - [`conventions`] – helper template prefixes and attribute names that
//!   generated trace/event/stub/skeleton components publish.

pub mod config;
pub mod conventions;
pub mod template;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use config::EngineConfig;
pub use template::{ComponentClass, ComponentTemplate, InterfaceType, ProvidedInterface, RequiredInterface};

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Identifier of a processor on the platform.  Processor `0` is the host
/// control processor; every other id names an independent DSP core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessorId(pub u8);

impl ProcessorId {
    /// The host control processor.
    pub const HOST: ProcessorId = ProcessorId(0);

    pub fn is_host(self) -> bool {
        self == Self::HOST
    }
}

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_host() {
            write!(f, "host")
        } else {
            write!(f, "dsp{}", self.0)
        }
    }
}

/// Handle of a component instance in the loader's component table.
///
/// The handle is a weak back-reference: holding one never keeps the
/// instance alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(pub u32);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component#{}", self.0)
    }
}

/// A logical client of the engine (a host process, a firmware session, …).
/// Singleton bind counters are kept per logical client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u32);

/// A memory domain: a region of memory owned by one processor from which
/// components, event queues and FIFOs are allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryDomain {
    pub id: u32,
    pub processor: ProcessorId,
}

/// Kind of memory requested from a [`MemoryDomain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryKind {
    /// Large external memory, visible to every processor.
    Sdram,
    /// Fast embedded memory shared between cores.
    Esram,
}

/// Scheduling priority of a component instance or event record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Background,
    #[default]
    Normal,
    Urgent,
}

/// Lifecycle state of a component instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentState {
    /// Loaded but not yet constructed.
    Instantiated,
    /// Constructed and not executing.
    Stopped,
    /// Started; may be executing calls at any moment.
    Runnable,
}

impl ComponentState {
    /// A component may have its required interfaces rewired only while it is
    /// not running.
    pub fn is_stopped(self) -> bool {
        !matches!(self, ComponentState::Runnable)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Interface descriptions
// ─────────────────────────────────────────────────────────────────────────────

/// Non-owning locator of one required or provided interface element:
/// component, interface slot, collection index and declared name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceDesc {
    pub component: ComponentId,
    pub slot: usize,
    pub index: usize,
    pub name: String,
}

impl fmt::Display for InterfaceDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}[{}]", self.component, self.name, self.index)
    }
}

/// Strategy used to create a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingKind {
    /// Direct, same-processor call.
    Synchronous,
    /// Deliberately bound to the void trap method.
    Void,
    /// Synchronous call through an instrumentation proxy.
    Traced,
    /// Deferred same-processor call through an event queue.
    Asynchronous,
    /// Host engine calling into a DSP-resident server.
    HostToDsp,
    /// DSP-resident client calling into the host.
    DspToHost,
    /// DSP-resident client calling into a server on another DSP.
    DspToDsp,
}

impl BindingKind {
    /// `true` for the three kinds that marshal calls through a Param FIFO.
    pub fn is_distributed(self) -> bool {
        matches!(
            self,
            BindingKind::HostToDsp | BindingKind::DspToHost | BindingKind::DspToDsp
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Diagnostics records
// ─────────────────────────────────────────────────────────────────────────────

/// Which binder operation a [`TraceRecord`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceOperation {
    Bind,
    Unbind,
}

/// One structured diagnostics record, emitted for every successful bind or
/// unbind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub operation: TraceOperation,
    /// `None` for bindings created by the host engine itself.
    pub client: Option<ComponentId>,
    /// `None` for void bindings and bindings that terminate on the host.
    pub server: Option<ComponentId>,
    pub interface: String,
    pub kind: BindingKind,
}

impl TraceRecord {
    pub fn new(
        operation: TraceOperation,
        client: Option<ComponentId>,
        server: Option<ComponentId>,
        interface: impl Into<String>,
        kind: BindingKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            operation,
            client,
            server,
            interface: interface.into(),
            kind,
        }
    }
}

/// Variants of data routed over the diagnostics bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Diagnostic {
    Binding(TraceRecord),
    /// A processor stopped answering service calls and was marked unusable.
    ProcessorPanic {
        processor: ProcessorId,
        timestamp: DateTime<Utc>,
        reason: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Error taxonomy of the binding engine.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindError {
    #[error("interface or component not found: {0}")]
    NotFound(String),

    #[error("interface {0} is already bound")]
    AlreadyBound(String),

    #[error("component {0} is not stopped")]
    NotStopped(ComponentId),

    #[error("illegal binding: {0}")]
    IllegalBinding(String),

    #[error("out of memory allocating {0}")]
    OutOfMemory(String),

    #[error("binding component template not found: {0}")]
    BindingComponentNotFound(String),

    #[error("command channel to {0} has no free slot")]
    ChannelOverflow(ProcessorId),

    #[error("processor {0} is unresponsive")]
    PeerUnresponsive(ProcessorId),

    #[error("no command channel registered for {0}")]
    UnknownProcessor(ProcessorId),

    #[error("{0} call(s) still in flight on the binding FIFO")]
    CallsInFlight(usize),

    #[error("channel closed: {0}")]
    ChannelClosed(String),
}
