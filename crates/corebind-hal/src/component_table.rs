//! [`ComponentTable`] – the loader-side table of live component instances.
//!
//! Every [`ComponentId`] handed out by a loader resolves through a table.
//! Handles are never reused, so a stale handle simply resolves to `None`
//! instead of aliasing a newer instance.

use std::collections::HashMap;
use std::sync::Arc;

use corebind_types::{BindError, ComponentId, ProcessorId};

use crate::component::ComponentInstance;

/// Live instances keyed by handle.
#[derive(Default)]
pub struct ComponentTable {
    next_id: u32,
    instances: HashMap<ComponentId, Arc<ComponentInstance>>,
}

impl ComponentTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next handle.
    pub fn next_id(&mut self) -> ComponentId {
        self.next_id += 1;
        ComponentId(self.next_id)
    }

    /// Insert an instance under its own handle.  Any previous instance with
    /// the same handle is replaced.
    pub fn insert(&mut self, instance: ComponentInstance) -> Arc<ComponentInstance> {
        let instance = Arc::new(instance);
        self.instances.insert(instance.id, instance.clone());
        instance
    }

    /// Remove an instance.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::NotFound`] when the handle is not live.
    pub fn remove(&mut self, id: ComponentId) -> Result<Arc<ComponentInstance>, BindError> {
        self.instances
            .remove(&id)
            .ok_or_else(|| BindError::NotFound(id.to_string()))
    }

    pub fn get(&self, id: ComponentId) -> Option<Arc<ComponentInstance>> {
        self.instances.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Number of live instances whose template name starts with `prefix`.
    pub fn count_with_prefix(&self, prefix: &str) -> usize {
        self.instances
            .values()
            .filter(|i| i.template.name.starts_with(prefix))
            .count()
    }

    /// Handles of every live instance on `processor`.
    pub fn on_processor(&self, processor: ProcessorId) -> Vec<ComponentId> {
        let mut ids: Vec<_> = self
            .instances
            .values()
            .filter(|i| i.processor() == processor)
            .map(|i| i.id)
            .collect();
        ids.sort();
        ids
    }
}
