//! Asynchronous bindings: calls are turned into events on a queue owned by a
//! generated event helper, which later delivers them to the server on the
//! same processor.

use corebind_transport::EventQueue;
use corebind_types::conventions::{self, EVENT_SIZE_ATTR};
use corebind_types::{BindError, BindingKind, Priority};

use super::{
    BindingFactory, Endpoint, FactoryContext, PartialBinding, Wire, create_helper,
    helper_attribute, start_helper,
};
use crate::interface_table::BindingPayload;

/// Event-queue binding with `depth` records delivered at `priority`.
#[derive(Debug, Clone, Copy)]
pub struct AsynchronousFactory {
    pub depth: usize,
    pub priority: Priority,
}

impl BindingFactory for AsynchronousFactory {
    fn kind(&self) -> BindingKind {
        BindingKind::Asynchronous
    }

    fn create(
        &self,
        cx: &FactoryContext<'_>,
        client: &Endpoint,
        server: &Endpoint,
    ) -> Result<BindingPayload, BindError> {
        let template = conventions::event_template_name(&server.provided_type()?.name);

        let mut partial = PartialBinding::new(cx);
        let (event, instance) = create_helper(cx, &template, server.domain(), self.priority)?;
        partial.helper(event);
        let payload_words = helper_attribute(&instance, EVENT_SIZE_ATTR)? as usize;
        partial.wire(Wire::from_helper(&instance, server)?);
        start_helper(cx, event, &instance)?;

        let to_helper = Wire::to_helper(client, &instance)?;
        let queue = EventQueue::create(
            cx.allocator,
            server.domain(),
            self.depth,
            payload_words,
            instance.this,
            self.priority,
        )?;
        partial.wire(to_helper);
        partial.commit();
        Ok(BindingPayload::Asynchronous { event, queue })
    }
}
