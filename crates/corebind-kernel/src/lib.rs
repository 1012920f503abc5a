//! `corebind-kernel` – the binding engine.
//!
//! Connects a component's required interface to a provided interface on the
//! same or another processor, and undoes that connection again.
//!
//! # Modules
//!
//! - [`interface_table`] – [`InterfaceRefTable`]: the binding slots of one
//!   client component and the [`BindingPayload`] each bound slot owns.
//! - [`checks`] – sanity checks run before every bind and unbind.
//! - [`factory`] – one [`BindingFactory`][factory::BindingFactory] per kind
//!   of call path: synchronous, traced, asynchronous and the three
//!   distributed variants.
//! - [`singleton`] – per-client singleton counters and per-server reference
//!   counts.
//! - [`binder`] – [`Binder`]: lookup, bind and unbind, dispatching to the
//!   right factory and publishing a trace record per change.

pub mod binder;
pub mod checks;
pub mod factory;
pub mod interface_table;
pub mod singleton;

pub use binder::{BindRequest, Binder, HostBinding};
pub use interface_table::{BindingPayload, Helper, InterfaceRef, InterfaceRefTable, RefTarget};
pub use singleton::{ServerRefCounts, SingletonCounters};
