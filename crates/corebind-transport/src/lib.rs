//! `corebind-transport` – the data paths a binding is built from.
//!
//! Routes calls and control messages between processors without caring
//! what the calls mean.
//!
//! # Modules
//!
//! - [`event_queue`] – fixed-capacity, pre-linked arenas of deferred-call
//!   records used by asynchronous bindings.
//! - [`fifo`] – Param FIFOs carrying marshalled call arguments between a
//!   stub and a skeleton on different processors.
//! - [`channel`] – per-DSP command channels for synchronous service calls,
//!   with bounded waits and panic detection.
//! - [`bus`] – the diagnostics bus every bind and unbind is reported on.

pub mod bus;
pub mod channel;
pub mod event_queue;
pub mod fifo;

pub use bus::{Lane, LaneReceiver, TraceBus};
pub use channel::{ChannelRegistry, CommandChannel, ProcessorState};
pub use event_queue::{EventQueue, EventRecord};
pub use fifo::{FifoCall, FifoTarget, ParamFifo, SharedFields};
