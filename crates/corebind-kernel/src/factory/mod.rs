//! Binding factories.
//!
//! A factory creates one kind of call path between a client's required
//! interface element and a server's provided one, and returns the
//! [`BindingPayload`] that owns whatever it had to create.  Tearing a
//! binding down is a single match over that payload ([`destroy_payload`]).
//!
//! | Factory | Helpers | Buffers |
//! |---|---|---|
//! | [`SynchronousFactory`] | – | – |
//! | [`TracedFactory`] | trace proxy | – |
//! | [`AsynchronousFactory`] | event helper | event queue |
//! | [`DspToHostFactory`] | stub | Param FIFO |
//! | [`DspToDspFactory`] | stub + skeleton | event queue + Param FIFO |
//! | [`distributed::bind_from_host`] | skeleton | event queue + Param FIFO |
//!
//! Creation is all-or-nothing: every helper and wire is recorded in a
//! [`PartialBinding`] guard that undoes them in reverse order unless the
//! factory commits.

pub mod asynchronous;
pub mod distributed;
pub mod synchronous;
pub mod traced;

use std::sync::Arc;

use corebind_hal::{ComponentInstance, Loader, MemoryAllocator, ServiceRequest};
use corebind_transport::{ChannelRegistry, ParamFifo};
use corebind_types::conventions::{FIFO_ADDRESS_ATTR, HELPER_INTERFACE};
use corebind_types::{
    BindError, BindingKind, ComponentId, ComponentState, InterfaceDesc, InterfaceType, MemoryDomain,
    Priority, ProcessorId,
};
use tracing::{debug, warn};

use crate::interface_table::{BindingPayload, Helper, RefTarget};
use crate::singleton::ServerRefCounts;

pub use asynchronous::AsynchronousFactory;
pub use distributed::{DspToDspFactory, DspToHostFactory};
pub use synchronous::SynchronousFactory;
pub use traced::TracedFactory;

/// Collaborators every factory works with.
pub struct FactoryContext<'a> {
    pub loader: &'a dyn Loader,
    pub allocator: &'a dyn MemoryAllocator,
    pub channels: &'a ChannelRegistry,
    pub refs: &'a ServerRefCounts,
}

/// A resolved interface element: the live instance and the descriptor.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub instance: Arc<ComponentInstance>,
    pub desc: InterfaceDesc,
}

impl Endpoint {
    pub fn processor(&self) -> ProcessorId {
        self.instance.processor()
    }

    pub fn domain(&self) -> MemoryDomain {
        self.instance.domain
    }

    /// Interface type of this element seen as a provided interface.
    pub fn provided_type(&self) -> Result<&InterfaceType, BindError> {
        self.instance
            .template
            .provides
            .get(self.desc.slot)
            .map(|p| &p.itf)
            .ok_or_else(|| BindError::NotFound(self.desc.to_string()))
    }

    /// Interface type of this element seen as a required interface.
    pub fn required_type(&self) -> Result<&InterfaceType, BindError> {
        self.instance
            .template
            .requires
            .get(self.desc.slot)
            .map(|r| &r.itf)
            .ok_or_else(|| BindError::NotFound(self.desc.to_string()))
    }
}

/// One strategy for creating a binding.
pub trait BindingFactory: Send + Sync {
    fn kind(&self) -> BindingKind;

    /// Build the call path from `client` to `server`.  On error nothing the
    /// factory created survives.
    fn create(
        &self,
        cx: &FactoryContext<'_>,
        client: &Endpoint,
        server: &Endpoint,
    ) -> Result<BindingPayload, BindError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Wires: dispatch-table rewrites
// ────────────────────────────────────────────────────────────────────────────

/// A dispatch-table rewrite resolved ahead of time so that applying it
/// cannot fail.
pub(crate) struct Wire {
    client: Arc<ComponentInstance>,
    slot: usize,
    index: usize,
    server: Option<Arc<ComponentInstance>>,
    this: u32,
    methods: Vec<u32>,
}

impl Wire {
    /// Resolve client `slot[index]` → server provided `server_slot[server_index]`.
    ///
    /// # Errors
    ///
    /// [`BindError::NotFound`] when either end does not exist.
    pub(crate) fn resolve(
        client: &Arc<ComponentInstance>,
        slot: usize,
        index: usize,
        server: &Arc<ComponentInstance>,
        server_slot: usize,
        server_index: usize,
    ) -> Result<Self, BindError> {
        if client.dispatch(slot, index).is_none() {
            return Err(BindError::NotFound(format!("{} slot {slot}[{index}]", client.name)));
        }
        let methods = server
            .provided_methods(server_slot, server_index)
            .ok_or_else(|| {
                BindError::NotFound(format!("{} provided {server_slot}[{server_index}]", server.name))
            })?
            .to_vec();
        Ok(Self {
            client: client.clone(),
            slot,
            index,
            server: Some(server.clone()),
            this: server.this,
            methods,
        })
    }

    /// Resolve `client` requirement → `server` provided, both given as
    /// endpoints.
    pub(crate) fn between(client: &Endpoint, server: &Endpoint) -> Result<Self, BindError> {
        Self::resolve(
            &client.instance,
            client.desc.slot,
            client.desc.index,
            &server.instance,
            server.desc.slot,
            server.desc.index,
        )
    }

    /// Resolve a helper's outward requirement → `server`.
    pub(crate) fn from_helper(helper: &Arc<ComponentInstance>, server: &Endpoint) -> Result<Self, BindError> {
        let slot = helper_required_slot(helper)?;
        Self::resolve(helper, slot, 0, &server.instance, server.desc.slot, server.desc.index)
    }

    /// Resolve `client` requirement → the helper's provided entry point.
    pub(crate) fn to_helper(client: &Endpoint, helper: &Arc<ComponentInstance>) -> Result<Self, BindError> {
        let slot = helper_provided_slot(helper)?;
        Self::resolve(&client.instance, client.desc.slot, client.desc.index, helper, slot, 0)
    }

    /// Resolve client `slot[index]` → the void trap of its processor.
    pub(crate) fn void(
        cx: &FactoryContext<'_>,
        client: &Arc<ComponentInstance>,
        slot: usize,
        index: usize,
    ) -> Result<Self, BindError> {
        let table = client
            .dispatch(slot, index)
            .ok_or_else(|| BindError::NotFound(format!("{} slot {slot}[{index}]", client.name)))?;
        let void = cx.loader.void_method(client.processor());
        Ok(Self {
            client: client.clone(),
            slot,
            index,
            server: None,
            this: 0,
            methods: vec![void; table.method_count()],
        })
    }

    /// Rewrite the dispatch table and take a reference on the server.
    pub(crate) fn apply(self, cx: &FactoryContext<'_>) -> Link {
        if let Some(table) = self.client.dispatch(self.slot, self.index) {
            table.write(self.this, &self.methods);
        }
        let server = self.server.map(|s| s.id);
        if let Some(server) = server {
            cx.refs.acquire(server);
        }
        debug!(client = %self.client.id, slot = self.slot, index = self.index, ?server, "dispatch table rewritten");
        Link {
            client: self.client,
            slot: self.slot,
            index: self.index,
            server,
        }
    }
}

/// An applied wire, kept so it can be undone.
pub(crate) struct Link {
    pub client: Arc<ComponentInstance>,
    pub slot: usize,
    pub index: usize,
    pub server: Option<ComponentId>,
}

/// Point `client` `slot[index]` back at the void trap and release the
/// reference it held on `server`.
pub(crate) fn disconnect(
    cx: &FactoryContext<'_>,
    client: &ComponentInstance,
    slot: usize,
    index: usize,
    server: Option<ComponentId>,
) {
    if let Some(table) = client.dispatch(slot, index) {
        let void = cx.loader.void_method(client.processor());
        table.write(0, &vec![void; table.method_count()]);
    }
    if let Some(server) = server {
        cx.refs.release(server);
    }
}

fn helper_required_slot(helper: &ComponentInstance) -> Result<usize, BindError> {
    helper
        .template
        .required_slot(HELPER_INTERFACE)
        .ok_or_else(|| BindError::BindingComponentNotFound(format!("{} has no {HELPER_INTERFACE} requirement", helper.template.name)))
}

fn helper_provided_slot(helper: &ComponentInstance) -> Result<usize, BindError> {
    helper
        .template
        .provided_slot(HELPER_INTERFACE)
        .ok_or_else(|| BindError::BindingComponentNotFound(format!("{} provides no {HELPER_INTERFACE}", helper.template.name)))
}

/// Attribute a helper template must publish.
pub(crate) fn helper_attribute(helper: &ComponentInstance, name: &str) -> Result<u32, BindError> {
    helper.attribute(name).ok_or_else(|| {
        BindError::IllegalBinding(format!("{} publishes no {name} attribute", helper.template.name))
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Helper lifecycle
// ────────────────────────────────────────────────────────────────────────────

/// Load `template` into `domain` and construct it.
///
/// # Errors
///
/// - [`BindError::BindingComponentNotFound`] – the loader has no such template.
/// - Any error of the `Construct` service call; the instance is unloaded.
pub(crate) fn create_helper(
    cx: &FactoryContext<'_>,
    template: &str,
    domain: MemoryDomain,
    priority: Priority,
) -> Result<(Helper, Arc<ComponentInstance>), BindError> {
    let id = cx
        .loader
        .instantiate(template, domain, priority)
        .map_err(|e| match e {
            BindError::NotFound(_) => BindError::BindingComponentNotFound(template.to_string()),
            other => other,
        })?;
    let Some(instance) = cx.loader.component(id) else {
        return Err(BindError::BindingComponentNotFound(template.to_string()));
    };
    let helper = Helper {
        id,
        processor: domain.processor,
    };
    let constructed = cx.channels.service_call(
        helper.processor,
        ServiceRequest::Construct {
            component: id,
            this: instance.this,
        },
    );
    if let Err(e) = constructed {
        if let Err(unload) = cx.loader.destroy(id) {
            warn!(%id, error = %unload, "failed to unload helper after construct error");
        }
        return Err(e);
    }
    instance.set_state(ComponentState::Stopped);
    debug!(%id, template, processor = %helper.processor, "helper created");
    Ok((helper, instance))
}

pub(crate) fn start_helper(
    cx: &FactoryContext<'_>,
    helper: Helper,
    instance: &ComponentInstance,
) -> Result<(), BindError> {
    cx.channels
        .service_call(helper.processor, ServiceRequest::Start { component: helper.id })?;
    instance.set_state(ComponentState::Runnable);
    Ok(())
}

/// Stop, destruct and unload a helper.  Every step is attempted; the first
/// failure is returned.
pub(crate) fn destroy_helper(cx: &FactoryContext<'_>, helper: Helper) -> Result<(), BindError> {
    let mut outcome = Outcome::default();
    if let Some(instance) = cx.loader.component(helper.id)
        && instance.state() == ComponentState::Runnable
    {
        outcome.note(
            "stop helper",
            cx.channels
                .service_call(helper.processor, ServiceRequest::Stop { component: helper.id }),
        );
        instance.set_state(ComponentState::Stopped);
    }
    outcome.note(
        "destruct helper",
        cx.channels
            .service_call(helper.processor, ServiceRequest::Destroy { component: helper.id }),
    );
    outcome.note("unload helper", cx.loader.destroy(helper.id));
    debug!(id = %helper.id, "helper destroyed");
    outcome.finish()
}

/// First error of a best-effort sequence.
#[derive(Default)]
pub(crate) struct Outcome(Option<BindError>);

impl Outcome {
    pub(crate) fn note(&mut self, step: &str, result: Result<(), BindError>) {
        if let Err(e) = result {
            warn!(step, error = %e, "teardown step failed");
            self.0.get_or_insert(e);
        }
    }

    pub(crate) fn finish(self) -> Result<(), BindError> {
        self.0.map_or(Ok(()), Err)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Partial-failure rollback
// ────────────────────────────────────────────────────────────────────────────

/// Everything a factory has created so far.  Dropped without
/// [`commit`][PartialBinding::commit], it disconnects every wire, destroys
/// the FIFO and unloads every helper, newest first.
pub(crate) struct PartialBinding<'c, 'a> {
    cx: &'c FactoryContext<'a>,
    helpers: Vec<Helper>,
    links: Vec<Link>,
    fifo: Option<Arc<ParamFifo>>,
    committed: bool,
}

impl<'c, 'a> PartialBinding<'c, 'a> {
    pub(crate) fn new(cx: &'c FactoryContext<'a>) -> Self {
        Self {
            cx,
            helpers: Vec::new(),
            links: Vec::new(),
            fifo: None,
            committed: false,
        }
    }

    pub(crate) fn helper(&mut self, helper: Helper) {
        self.helpers.push(helper);
    }

    pub(crate) fn wire(&mut self, wire: Wire) {
        let link = wire.apply(self.cx);
        self.links.push(link);
    }

    pub(crate) fn fifo(&mut self, fifo: Arc<ParamFifo>) {
        self.fifo = Some(fifo);
    }

    pub(crate) fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PartialBinding<'_, '_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        warn!(
            helpers = self.helpers.len(),
            wires = self.links.len(),
            "bind failed, rolling back"
        );
        for link in self.links.drain(..).rev() {
            disconnect(self.cx, &link.client, link.slot, link.index, link.server);
        }
        if let Some(fifo) = self.fifo.take() {
            // Nothing can have been pushed: the FIFO never left this guard.
            if let Err(e) = fifo.unpair() {
                warn!(error = %e, "FIFO still paired during rollback");
            }
            if let Err(e) = fifo.destroy(self.cx.allocator) {
                warn!(error = %e, "failed to free FIFO during rollback");
            }
        }
        for helper in self.helpers.drain(..).rev() {
            if let Err(e) = destroy_helper(self.cx, helper) {
                warn!(id = %helper.id, error = %e, "failed to destroy helper during rollback");
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Teardown
// ────────────────────────────────────────────────────────────────────────────

/// The client end of a binding being torn down.
#[derive(Clone, Copy)]
pub(crate) struct ClientSlot<'a> {
    pub instance: &'a ComponentInstance,
    pub slot: usize,
    pub index: usize,
}

/// Undo `payload`, which bound `client` (absent for host-side bindings) to
/// `target`.  The client's dispatch table is cleared first, then the
/// factory-private state is released in reverse creation order.
///
/// A distributed payload's FIFO must already be unpaired.
pub(crate) fn destroy_payload(
    cx: &FactoryContext<'_>,
    client: Option<ClientSlot<'_>>,
    target: &RefTarget,
    payload: BindingPayload,
) -> Result<(), BindError> {
    let server = target.server().map(|s| s.component);
    let clear = |via: Option<ComponentId>| {
        if let Some(c) = client {
            disconnect(cx, c.instance, c.slot, c.index, via);
        }
    };
    let mut outcome = Outcome::default();
    match payload {
        BindingPayload::Synchronous => clear(server),
        BindingPayload::Void => clear(None),
        BindingPayload::Traced { tracer } => {
            clear(Some(tracer.id));
            unwire_helper(cx, tracer, server);
            outcome.note("destroy tracer", destroy_helper(cx, tracer));
        }
        BindingPayload::Asynchronous { event, queue } => {
            clear(Some(event.id));
            // The whole path goes away; only the bookkeeping is released.
            if let Some(server) = server {
                cx.refs.release(server);
            }
            queue.destroy(cx.allocator);
            outcome.note("destroy event helper", destroy_helper(cx, event));
        }
        BindingPayload::DspToHost { stub, fifo, .. } => {
            clear(Some(stub.id));
            if let Some(server) = server {
                cx.refs.release(server);
            }
            outcome.note("destroy FIFO", fifo.destroy(cx.allocator));
            forget_fifo(cx, stub);
            outcome.note("destroy stub", destroy_helper(cx, stub));
        }
        BindingPayload::DspToDsp {
            stub,
            skeleton,
            queue,
            fifo,
        } => {
            clear(Some(stub.id));
            outcome.note("destroy FIFO", fifo.destroy(cx.allocator));
            forget_fifo(cx, stub);
            outcome.note("destroy stub", destroy_helper(cx, stub));
            unwire_helper(cx, skeleton, server);
            forget_fifo(cx, skeleton);
            queue.destroy(cx.allocator);
            outcome.note("destroy skeleton", destroy_helper(cx, skeleton));
        }
        BindingPayload::HostToDsp {
            skeleton,
            queue,
            fifo,
        } => {
            outcome.note("destroy FIFO", fifo.destroy(cx.allocator));
            unwire_helper(cx, skeleton, server);
            forget_fifo(cx, skeleton);
            queue.destroy(cx.allocator);
            outcome.note("destroy skeleton", destroy_helper(cx, skeleton));
        }
    }
    outcome.finish()
}

/// Disconnect a helper's outward requirement from `server`.
fn unwire_helper(cx: &FactoryContext<'_>, helper: Helper, server: Option<ComponentId>) {
    match cx.loader.component(helper.id) {
        Some(instance) => {
            let slot = helper_required_slot(&instance).unwrap_or(0);
            disconnect(cx, &instance, slot, 0, server);
        }
        None => {
            if let Some(server) = server {
                cx.refs.release(server);
            }
        }
    }
}

/// Clear the FIFO address a stub or skeleton reads.
fn forget_fifo(cx: &FactoryContext<'_>, helper: Helper) {
    if let Some(instance) = cx.loader.component(helper.id)
        && let Err(e) = instance.set_attribute(FIFO_ADDRESS_ATTR, 0)
    {
        warn!(helper = %helper.id, error = %e, "FIFO address not cleared");
    }
}
