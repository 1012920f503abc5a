//! Synchronous and void bindings: the client's dispatch table is pointed
//! straight at the server (or the void trap).  No helper, no allocation.

use std::sync::Arc;

use corebind_hal::ComponentInstance;
use corebind_types::{BindError, BindingKind};

use super::{BindingFactory, Endpoint, FactoryContext, Wire};
use crate::interface_table::BindingPayload;

/// Direct same-processor calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct SynchronousFactory;

impl BindingFactory for SynchronousFactory {
    fn kind(&self) -> BindingKind {
        BindingKind::Synchronous
    }

    fn create(
        &self,
        cx: &FactoryContext<'_>,
        client: &Endpoint,
        server: &Endpoint,
    ) -> Result<BindingPayload, BindError> {
        Wire::between(client, server)?.apply(cx);
        Ok(BindingPayload::Synchronous)
    }
}

/// Point client `slot[index]` at the void trap of its processor.
pub fn bind_void(
    cx: &FactoryContext<'_>,
    client: &Arc<ComponentInstance>,
    slot: usize,
    index: usize,
) -> Result<BindingPayload, BindError> {
    Wire::void(cx, client, slot, index)?.apply(cx);
    Ok(BindingPayload::Void)
}
