//! Distributed bindings: calls cross a processor boundary through a Param
//! FIFO written by a stub on the client's core and drained by a skeleton on
//! the server's core.
//!
//! | Variant | Stub | Skeleton | FIFO domain | Shared field 0 |
//! |---|---|---|---|---|
//! | Host → DSP | – (the host pushes) | server core | server | skeleton address |
//! | DSP → Host | client core | – | client | host context or descriptor size |
//! | DSP → DSP | client core | server core | server | skeleton address |
//!
//! The remaining shared fields mirror the server's method addresses.  The
//! FIFO's device address is written into the `fifo` attribute of the stub
//! and skeleton so each proxy can find it.

use std::sync::Arc;

use corebind_hal::ComponentInstance;
use corebind_transport::{EventQueue, FifoTarget, ParamFifo};
use corebind_types::conventions::{
    self, DESCRIPTOR_SIZE_ATTR, EVENT_SIZE_ATTR, FIFO_ADDRESS_ATTR, FIFO_PARAM_SIZE_ATTR,
};
use corebind_types::{BindError, BindingKind, MemoryDomain};
use tracing::debug;

use super::{
    BindingFactory, Endpoint, FactoryContext, PartialBinding, Wire, create_helper,
    helper_attribute, start_helper,
};
use crate::interface_table::{BindingPayload, Helper};

/// DSP client → server on another DSP.
#[derive(Debug, Clone, Copy)]
pub struct DspToDspFactory {
    pub fifo_depth: usize,
}

/// DSP client → server on the host.  The server's `this` is the host
/// context the stub's calls are delivered to.
#[derive(Debug, Clone, Copy)]
pub struct DspToHostFactory {
    pub fifo_depth: usize,
}

impl BindingFactory for DspToDspFactory {
    fn kind(&self) -> BindingKind {
        BindingKind::DspToDsp
    }

    fn create(
        &self,
        cx: &FactoryContext<'_>,
        client: &Endpoint,
        server: &Endpoint,
    ) -> Result<BindingPayload, BindError> {
        let mut partial = PartialBinding::new(cx);
        let (skeleton, skeleton_inst) = create_skeleton(cx, &mut partial, server)?;
        let (stub, stub_inst) = create_stub(cx, &mut partial, client)?;

        let param_words = helper_attribute(&stub_inst, FIFO_PARAM_SIZE_ATTR)?
            .max(helper_attribute(&skeleton_inst, FIFO_PARAM_SIZE_ATTR)?);
        let methods = server_methods(server)?;
        let fifo = create_fifo(
            cx,
            &mut partial,
            server.domain(),
            self.fifo_depth,
            param_words as usize,
            methods.len(),
        )?;
        fifo.set_shared_fields(FifoTarget::Skeleton(skeleton_inst.this), &methods)?;
        publish_fifo(&fifo, &[&*stub_inst, &*skeleton_inst])?;
        fifo.pair();

        start_helper(cx, skeleton, &skeleton_inst)?;
        start_helper(cx, stub, &stub_inst)?;

        let to_stub = Wire::to_helper(client, &stub_inst)?;
        let queue = skeleton_queue(cx, server, &skeleton_inst, self.fifo_depth)?;
        partial.wire(to_stub);
        partial.commit();
        Ok(BindingPayload::DspToDsp {
            stub,
            skeleton,
            queue,
            fifo,
        })
    }
}

impl BindingFactory for DspToHostFactory {
    fn kind(&self) -> BindingKind {
        BindingKind::DspToHost
    }

    fn create(
        &self,
        cx: &FactoryContext<'_>,
        client: &Endpoint,
        server: &Endpoint,
    ) -> Result<BindingPayload, BindError> {
        let methods = server_methods(server)?;
        let payload = bind_to_host(cx, client, server.instance.this, &methods, self.fifo_depth)?;
        cx.refs.acquire(server.instance.id);
        Ok(payload)
    }
}

/// Bind DSP `client` to a host receiver identified by `host_context`.
/// `methods` are the receiver's method addresses, if it has any the stub
/// should see.
pub fn bind_to_host(
    cx: &FactoryContext<'_>,
    client: &Endpoint,
    host_context: u32,
    methods: &[u32],
    fifo_depth: usize,
) -> Result<BindingPayload, BindError> {
    let mut partial = PartialBinding::new(cx);
    let (stub, stub_inst) = create_stub(cx, &mut partial, client)?;

    let param_words = helper_attribute(&stub_inst, FIFO_PARAM_SIZE_ATTR)? as usize;
    let method_count = client.required_type()?.method_count().max(methods.len());
    let fifo = create_fifo(
        cx,
        &mut partial,
        client.domain(),
        fifo_depth,
        param_words,
        method_count,
    )?;
    let target = match stub_inst.attribute(DESCRIPTOR_SIZE_ATTR) {
        Some(size) if size > 0 => FifoTarget::DescriptorSize(size),
        _ => FifoTarget::HostContext(host_context),
    };
    fifo.set_shared_fields(target, methods)?;
    publish_fifo(&fifo, &[&*stub_inst])?;
    fifo.pair();

    start_helper(cx, stub, &stub_inst)?;
    partial.wire(Wire::to_helper(client, &stub_inst)?);
    partial.commit();
    Ok(BindingPayload::DspToHost {
        stub,
        fifo,
        host_context,
    })
}

/// Let the host call DSP-resident `server`: a skeleton drains a FIFO the
/// host pushes into directly.  Returns the payload and the FIFO the host
/// produces into.
pub fn bind_from_host(
    cx: &FactoryContext<'_>,
    server: &Endpoint,
    fifo_depth: usize,
) -> Result<(BindingPayload, Arc<ParamFifo>), BindError> {
    let mut partial = PartialBinding::new(cx);
    let (skeleton, skeleton_inst) = create_skeleton(cx, &mut partial, server)?;

    let param_words = helper_attribute(&skeleton_inst, FIFO_PARAM_SIZE_ATTR)? as usize;
    let methods = server_methods(server)?;
    let fifo = create_fifo(
        cx,
        &mut partial,
        server.domain(),
        fifo_depth,
        param_words,
        methods.len(),
    )?;
    fifo.set_shared_fields(FifoTarget::Skeleton(skeleton_inst.this), &methods)?;
    publish_fifo(&fifo, &[&*skeleton_inst])?;
    fifo.pair();

    start_helper(cx, skeleton, &skeleton_inst)?;
    let queue = skeleton_queue(cx, server, &skeleton_inst, fifo_depth)?;
    partial.commit();
    let producer = fifo.clone();
    Ok((
        BindingPayload::HostToDsp {
            skeleton,
            queue,
            fifo,
        },
        producer,
    ))
}

// ────────────────────────────────────────────────────────────────────────────
// Shared steps
// ────────────────────────────────────────────────────────────────────────────

fn create_skeleton(
    cx: &FactoryContext<'_>,
    partial: &mut PartialBinding<'_, '_>,
    server: &Endpoint,
) -> Result<(Helper, Arc<ComponentInstance>), BindError> {
    let template = conventions::skeleton_template_name(&server.provided_type()?.name);
    let (skeleton, instance) =
        create_helper(cx, &template, server.domain(), server.instance.priority)?;
    partial.helper(skeleton);
    partial.wire(Wire::from_helper(&instance, server)?);
    Ok((skeleton, instance))
}

fn create_stub(
    cx: &FactoryContext<'_>,
    partial: &mut PartialBinding<'_, '_>,
    client: &Endpoint,
) -> Result<(Helper, Arc<ComponentInstance>), BindError> {
    let template = conventions::stub_template_name(&client.required_type()?.name);
    let (stub, instance) =
        create_helper(cx, &template, client.domain(), client.instance.priority)?;
    partial.helper(stub);
    Ok((stub, instance))
}

fn create_fifo(
    cx: &FactoryContext<'_>,
    partial: &mut PartialBinding<'_, '_>,
    domain: MemoryDomain,
    depth: usize,
    param_words: usize,
    method_count: usize,
) -> Result<Arc<ParamFifo>, BindError> {
    let fifo = Arc::new(ParamFifo::create(
        cx.allocator,
        domain,
        depth,
        param_words,
        method_count,
    )?);
    partial.fifo(fifo.clone());
    Ok(fifo)
}

/// Write the FIFO address into every proxy that uses it.
fn publish_fifo(fifo: &ParamFifo, proxies: &[&ComponentInstance]) -> Result<(), BindError> {
    for proxy in proxies {
        proxy.set_attribute(FIFO_ADDRESS_ATTR, fifo.device_address())?;
        debug!(proxy = %proxy.id, fifo = fifo.device_address(), "FIFO address published");
    }
    Ok(())
}

fn server_methods(server: &Endpoint) -> Result<Vec<u32>, BindError> {
    server
        .instance
        .provided_methods(server.desc.slot, server.desc.index)
        .map(<[u32]>::to_vec)
        .ok_or_else(|| BindError::NotFound(server.desc.to_string()))
}

/// The queue the skeleton turns FIFO records into events on.
fn skeleton_queue(
    cx: &FactoryContext<'_>,
    server: &Endpoint,
    skeleton: &ComponentInstance,
    depth: usize,
) -> Result<EventQueue, BindError> {
    let payload_words = helper_attribute(skeleton, EVENT_SIZE_ATTR)? as usize;
    EventQueue::create(
        cx.allocator,
        server.domain(),
        depth,
        payload_words,
        skeleton.this,
        server.instance.priority,
    )
}
