//! `corebind-hal` – platform collaborators of the binding engine.
//!
//! The binder never touches hardware directly.  It talks to three traits:
//!
//! - [`loader`] – [`Loader`]: instantiates and destroys helper components
//!   from named templates.
//! - [`memory`] – [`MemoryAllocator`]: allocates event queues and Param FIFOs
//!   inside a memory domain and translates between host and DSP addresses.
//! - [`link`] – [`ProcessorLink`]: the mailbox carrying service messages to
//!   DSP cores.
//!
//! [`component`] models the component instances those collaborators manage,
//! including the per-call [`DispatchTable`] the binder rewrites, and
//! [`sim`] provides an in-process [`SimPlatform`] implementing all three.

pub mod component;
pub mod component_table;
pub mod link;
pub mod loader;
pub mod memory;
pub mod sim;

pub use component::{ComponentInstance, DispatchTable};
pub use component_table::ComponentTable;
pub use link::{ProcessorLink, ReplySink, ServiceMessage, ServiceReply, ServiceRequest};
pub use loader::Loader;
pub use memory::{AllocatorStats, MemoryAllocator, MemoryHandle};
pub use sim::{LinkBehaviour, SimPlatform};
