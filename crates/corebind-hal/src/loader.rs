//! The [`Loader`] collaborator: instantiates components from named templates.
//!
//! The binder only calls the loader to create and destroy its own helper
//! instances (trace, event, stub and skeleton components).  User components
//! are created by whoever owns them and merely looked up here.

use std::sync::Arc;

use corebind_types::{BindError, ComponentId, MemoryDomain, Priority, ProcessorId};

use crate::component::ComponentInstance;

/// Component loader of the platform.
pub trait Loader: Send + Sync {
    /// Instantiate the template called `template` in `domain`.
    ///
    /// The new instance starts in the
    /// [`Instantiated`][corebind_types::ComponentState::Instantiated] state
    /// with every dispatch table pointing at the void method.
    ///
    /// # Errors
    ///
    /// - [`BindError::NotFound`] – no template of that name is loadable.
    /// - [`BindError::OutOfMemory`] – the domain cannot hold the instance.
    fn instantiate(
        &self,
        template: &str,
        domain: MemoryDomain,
        priority: Priority,
    ) -> Result<ComponentId, BindError>;

    /// Destroy an instance previously returned by [`Loader::instantiate`].
    fn destroy(&self, id: ComponentId) -> Result<(), BindError>;

    /// Resolve a handle to the live instance, if it still exists.
    fn component(&self, id: ComponentId) -> Option<Arc<ComponentInstance>>;

    /// Address of the trap method unbound and void-bound calls land on.
    fn void_method(&self, processor: ProcessorId) -> u32;
}
