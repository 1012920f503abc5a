//! Traced bindings: a synchronous binding with a generated trace proxy
//! inserted between client and server.

use corebind_types::{BindError, BindingKind, conventions};

use super::{
    BindingFactory, Endpoint, FactoryContext, PartialBinding, Wire, create_helper, start_helper,
};
use crate::interface_table::BindingPayload;

#[derive(Debug, Default, Clone, Copy)]
pub struct TracedFactory;

impl BindingFactory for TracedFactory {
    fn kind(&self) -> BindingKind {
        BindingKind::Traced
    }

    fn create(
        &self,
        cx: &FactoryContext<'_>,
        client: &Endpoint,
        server: &Endpoint,
    ) -> Result<BindingPayload, BindError> {
        let template = conventions::trace_template_name(&server.provided_type()?.name);

        let mut partial = PartialBinding::new(cx);
        let (tracer, instance) =
            create_helper(cx, &template, server.domain(), server.instance.priority)?;
        partial.helper(tracer);
        partial.wire(Wire::from_helper(&instance, server)?);
        start_helper(cx, tracer, &instance)?;
        partial.wire(Wire::to_helper(client, &instance)?);
        partial.commit();
        Ok(BindingPayload::Traced { tracer })
    }
}
