//! [`Binder`] – bind, unbind and lookup of component interfaces.
//!
//! Every operation takes the binding lock of the client's processor, runs
//! the sanity checks of [`crate::checks`], hands the physical work to a
//! [`BindingFactory`] and finally records the result in the client's
//! [`InterfaceRefTable`].  The engine state itself is only locked for the
//! short check and record steps, never across a service call.
//!
//! Singleton servers are bound once per slot and counted per logical client
//! ([`SingletonCounters`]); the physical binding is torn down when the last
//! client unbinds, with the server's processor held awake for the duration.
//!
//! Every successful bind and unbind publishes a [`TraceRecord`] on the
//! [`TraceBus`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use corebind_hal::SimPlatform;
//! use corebind_kernel::{BindRequest, Binder, RefTarget};
//! use corebind_transport::{ChannelRegistry, TraceBus};
//! use corebind_types::{
//!     ClientId, ComponentClass, ComponentTemplate, EngineConfig, InterfaceType, ProcessorId,
//!     ProvidedInterface, RequiredInterface,
//! };
//!
//! let pcm = InterfaceType::new("audio.pcm", &["open", "write"]);
//! let platform = SimPlatform::builder()
//!     .with_template(
//!         ComponentTemplate::new("mixer", ComponentClass::Ordinary)
//!             .requires(RequiredInterface::new("output", pcm.clone())),
//!     )
//!     .with_template(
//!         ComponentTemplate::new("sink", ComponentClass::Ordinary)
//!             .provides(ProvidedInterface::new("input", pcm, 0x4000)),
//!     )
//!     .build();
//! let bus = TraceBus::default();
//! let channels = Arc::new(ChannelRegistry::new(&EngineConfig::default(), platform.clone(), bus.clone()));
//! let binder = Binder::new(platform.clone(), platform.clone(), channels, bus);
//!
//! let mixer = platform.spawn("mixer", ProcessorId(1)).unwrap();
//! let sink = platform.spawn("sink", ProcessorId(1)).unwrap();
//! let output = binder.lookup_required(mixer, "output").unwrap();
//! let input = binder.lookup_provided(sink, "input").unwrap();
//!
//! binder.bind(ClientId(1), &output, &input, BindRequest::Synchronous).unwrap();
//! assert_eq!(binder.lookup(&output).unwrap(), RefTarget::Server(input));
//!
//! binder.unbind(ClientId(1), &output).unwrap();
//! assert!(binder.lookup(&output).is_err());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use corebind_hal::{ComponentInstance, Loader, MemoryAllocator, ServiceRequest};
use corebind_transport::{ChannelRegistry, ParamFifo, TraceBus};
use corebind_types::{
    BindError, BindingKind, ClientId, ComponentId, InterfaceDesc, Priority, ProcessorId,
    TraceOperation, TraceRecord,
};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::checks::{
    self, ClientCheck, UnbindCheck, check_valid_binding, check_valid_client,
    check_valid_server, check_valid_unbinding,
};
use crate::factory::{
    AsynchronousFactory, BindingFactory, ClientSlot, DspToDspFactory, DspToHostFactory, Endpoint,
    FactoryContext, SynchronousFactory, TracedFactory, destroy_payload, distributed,
    synchronous,
};
use crate::interface_table::{BindingPayload, InterfaceRef, InterfaceRefTable, RefTarget};
use crate::singleton::{ServerRefCounts, SingletonCounters, slot_key};

/// Which kind of call path [`Binder::bind`] should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindRequest {
    Synchronous,
    Traced,
    Asynchronous { depth: usize, priority: Priority },
    /// Host ↔ DSP or DSP ↔ DSP, chosen from the two processors.
    Distributed { fifo_depth: usize },
}

/// A host-side producer bound to a DSP-resident server by
/// [`Binder::bind_from_host`].
#[derive(Debug, Clone)]
pub struct HostBinding {
    pub id: u32,
    pub server: InterfaceDesc,
    /// The FIFO the host pushes calls into.
    pub fifo: Arc<ParamFifo>,
}

struct HostRecord {
    server: InterfaceDesc,
    payload: BindingPayload,
}

#[derive(Default)]
struct BinderState {
    tables: HashMap<ComponentId, InterfaceRefTable>,
    singletons: SingletonCounters,
    host_bindings: HashMap<u32, HostRecord>,
    next_host_binding: u32,
}

/// Binding engine of one platform.
pub struct Binder {
    loader: Arc<dyn Loader>,
    allocator: Arc<dyn MemoryAllocator>,
    channels: Arc<ChannelRegistry>,
    bus: TraceBus,
    refs: ServerRefCounts,
    /// One binding lock per processor; slot mutations of a processor's
    /// components are serialized on it.
    locks: HashMap<ProcessorId, Mutex<()>>,
    state: Mutex<BinderState>,
}

impl Binder {
    pub fn new(
        loader: Arc<dyn Loader>,
        allocator: Arc<dyn MemoryAllocator>,
        channels: Arc<ChannelRegistry>,
        bus: TraceBus,
    ) -> Self {
        let locks = std::iter::once(ProcessorId::HOST)
            .chain(channels.processors())
            .map(|p| (p, Mutex::new(())))
            .collect();
        Self {
            loader,
            allocator,
            channels,
            bus,
            refs: ServerRefCounts::new(),
            locks,
            state: Mutex::new(BinderState::default()),
        }
    }

    pub fn channels(&self) -> &Arc<ChannelRegistry> {
        &self.channels
    }

    // ── Interface lookup ────────────────────────────────────────────────

    /// Describe the required interface `name` (or `name[i]`) of `component`.
    ///
    /// # Errors
    ///
    /// [`BindError::NotFound`] for an unknown component, interface or index.
    pub fn lookup_required(
        &self,
        component: ComponentId,
        name: &str,
    ) -> Result<InterfaceDesc, BindError> {
        let instance = self.instance(component)?;
        let (base, index) = parse_element(name)?;
        let slot = instance
            .template
            .required_slot(base)
            .filter(|&s| index < instance.template.requires[s].collection_size)
            .ok_or_else(|| BindError::NotFound(format!("{component} requires no {name}")))?;
        Ok(InterfaceDesc {
            component,
            slot,
            index,
            name: base.to_string(),
        })
    }

    /// Describe the provided interface `name` (or `name[i]`) of `component`.
    pub fn lookup_provided(
        &self,
        component: ComponentId,
        name: &str,
    ) -> Result<InterfaceDesc, BindError> {
        let instance = self.instance(component)?;
        let (base, index) = parse_element(name)?;
        let slot = instance
            .template
            .provided_slot(base)
            .filter(|&s| index < instance.template.provides[s].collection_size)
            .ok_or_else(|| BindError::NotFound(format!("{component} provides no {name}")))?;
        Ok(InterfaceDesc {
            component,
            slot,
            index,
            name: base.to_string(),
        })
    }

    // ── Bind ────────────────────────────────────────────────────────────

    /// Bind `client` to `server` on behalf of `logical`.
    ///
    /// `logical` only matters for singleton servers, whose binds are
    /// counted per logical client.
    ///
    /// # Errors
    ///
    /// Any check failure (`NotFound`, `IllegalBinding`, `AlreadyBound`,
    /// `NotStopped`), `IllegalBinding` when `request` cannot connect the two
    /// processors, and any factory error.  On error nothing has changed.
    pub fn bind(
        &self,
        logical: ClientId,
        client: &InterfaceDesc,
        server: &InterfaceDesc,
        request: BindRequest,
    ) -> Result<(), BindError> {
        let client_inst = self.instance(client.component)?;
        let server_inst = self.instance(server.component)?;
        let _lock = self.lock(client_inst.processor())?;

        let check = {
            let mut state = self.state.lock();
            let table = table_of(&mut state.tables, &client_inst);
            check_valid_binding(&client_inst, table, client, &server_inst, server)?
        };
        let singleton = server_inst.template.is_singleton();

        if check == ClientCheck::SameSingletonTarget {
            let (total, kind) = {
                let mut state = self.state.lock();
                let total = state.singletons.increment(slot_key(client), logical);
                let kind = state
                    .tables
                    .get(&client.component)
                    .and_then(|t| t.get(client.slot, client.index))
                    .and_then(InterfaceRef::kind);
                (total, kind)
            };
            debug!(%client, %server, clients = total, "singleton bind counted");
            self.report(TraceOperation::Bind, client, Some(server.component), kind.unwrap_or(BindingKind::Synchronous));
            return Ok(());
        }

        let factory = self.factory_for(request, &client_inst, &server_inst)?;
        let client_ep = Endpoint {
            instance: client_inst,
            desc: client.clone(),
        };
        let server_ep = Endpoint {
            instance: server_inst,
            desc: server.clone(),
        };
        let payload = factory.create(&self.cx(), &client_ep, &server_ep)?;
        let kind = payload.kind();

        {
            let mut state = self.state.lock();
            let table = table_of(&mut state.tables, &client_ep.instance);
            table.set(
                client,
                InterfaceRef {
                    target: RefTarget::Server(server.clone()),
                    binding: Some(payload),
                },
            )?;
            if singleton {
                state.singletons.increment(slot_key(client), logical);
            }
        }
        self.report(TraceOperation::Bind, client, Some(server.component), kind);
        Ok(())
    }

    pub fn bind_synchronous(
        &self,
        logical: ClientId,
        client: &InterfaceDesc,
        server: &InterfaceDesc,
    ) -> Result<(), BindError> {
        self.bind(logical, client, server, BindRequest::Synchronous)
    }

    pub fn bind_traced(
        &self,
        logical: ClientId,
        client: &InterfaceDesc,
        server: &InterfaceDesc,
    ) -> Result<(), BindError> {
        self.bind(logical, client, server, BindRequest::Traced)
    }

    pub fn bind_asynchronous(
        &self,
        logical: ClientId,
        client: &InterfaceDesc,
        server: &InterfaceDesc,
        depth: usize,
        priority: Priority,
    ) -> Result<(), BindError> {
        self.bind(
            logical,
            client,
            server,
            BindRequest::Asynchronous { depth, priority },
        )
    }

    pub fn bind_distributed(
        &self,
        logical: ClientId,
        client: &InterfaceDesc,
        server: &InterfaceDesc,
        fifo_depth: usize,
    ) -> Result<(), BindError> {
        self.bind(logical, client, server, BindRequest::Distributed { fifo_depth })
    }

    /// Bind `client` to the void trap of its processor.
    pub fn bind_to_void(&self, client: &InterfaceDesc) -> Result<(), BindError> {
        let client_inst = self.instance(client.component)?;
        let _lock = self.lock(client_inst.processor())?;
        {
            let mut state = self.state.lock();
            let table = table_of(&mut state.tables, &client_inst);
            check_valid_client(&client_inst, table, client, None)?;
        }
        let payload = synchronous::bind_void(&self.cx(), &client_inst, client.slot, client.index)?;
        {
            let mut state = self.state.lock();
            let table = table_of(&mut state.tables, &client_inst);
            table.set(
                client,
                InterfaceRef {
                    target: RefTarget::Void,
                    binding: Some(payload),
                },
            )?;
        }
        self.report(TraceOperation::Bind, client, None, BindingKind::Void);
        Ok(())
    }

    /// Bind DSP-resident `client` to a host receiver identified by the
    /// opaque `host_context`.  `methods` are the receiver's method
    /// addresses mirrored into the FIFO's shared fields.
    ///
    /// # Errors
    ///
    /// [`BindError::IllegalBinding`] when `client` runs on the host.
    pub fn bind_to_host(
        &self,
        client: &InterfaceDesc,
        host_context: u32,
        methods: &[u32],
        fifo_depth: usize,
    ) -> Result<(), BindError> {
        let client_inst = self.instance(client.component)?;
        if client_inst.processor().is_host() {
            return Err(BindError::IllegalBinding(format!(
                "{client} already runs on the host"
            )));
        }
        let _lock = self.lock(client_inst.processor())?;
        {
            let mut state = self.state.lock();
            let table = table_of(&mut state.tables, &client_inst);
            check_valid_client(&client_inst, table, client, None)?;
        }
        let client_ep = Endpoint {
            instance: client_inst,
            desc: client.clone(),
        };
        let payload =
            distributed::bind_to_host(&self.cx(), &client_ep, host_context, methods, fifo_depth)?;
        {
            let mut state = self.state.lock();
            let table = table_of(&mut state.tables, &client_ep.instance);
            table.set(
                client,
                InterfaceRef {
                    target: RefTarget::Host {
                        context: host_context,
                    },
                    binding: Some(payload),
                },
            )?;
        }
        self.report(TraceOperation::Bind, client, None, BindingKind::DspToHost);
        Ok(())
    }

    /// Let the host engine call DSP-resident `server`.  The returned
    /// [`HostBinding`] carries the FIFO the host produces calls into.
    pub fn bind_from_host(
        &self,
        server: &InterfaceDesc,
        fifo_depth: usize,
    ) -> Result<HostBinding, BindError> {
        let server_inst = self.instance(server.component)?;
        if server_inst.processor().is_host() {
            return Err(BindError::IllegalBinding(format!(
                "{server} runs on the host; bind it synchronously"
            )));
        }
        check_valid_server(&server_inst, server)?;
        let _lock = self.lock(server_inst.processor())?;

        let server_ep = Endpoint {
            instance: server_inst,
            desc: server.clone(),
        };
        let (payload, fifo) = distributed::bind_from_host(&self.cx(), &server_ep, fifo_depth)?;
        let id = {
            let mut state = self.state.lock();
            state.next_host_binding += 1;
            let id = state.next_host_binding;
            state.host_bindings.insert(
                id,
                HostRecord {
                    server: server.clone(),
                    payload,
                },
            );
            id
        };
        self.report_host(TraceOperation::Bind, server);
        Ok(HostBinding {
            id,
            server: server.clone(),
            fifo,
        })
    }

    // ── Unbind ──────────────────────────────────────────────────────────

    /// Undo a binding made by [`Binder::bind`] and friends.
    ///
    /// Unbinding an optional static requirement that is not bound is a
    /// no-op.  A singleton binding is only torn down when the last logical
    /// client unbinds.
    ///
    /// # Errors
    ///
    /// - [`BindError::NotFound`] – the slot is not bound, or `logical` holds
    ///   no bind on a singleton slot.
    /// - [`BindError::CallsInFlight`] – a distributed binding's FIFO is not
    ///   drained; the binding is left intact.
    /// - The first error of a best-effort teardown; the slot is unbound
    ///   regardless.
    pub fn unbind(&self, logical: ClientId, client: &InterfaceDesc) -> Result<(), BindError> {
        let client_inst = self.instance(client.component)?;
        let _lock = self.lock(client_inst.processor())?;
        let key = slot_key(client);

        let singleton = {
            let mut state = self.state.lock();
            let BinderState {
                tables, singletons, ..
            } = &mut *state;
            let table = table_of(tables, &client_inst);
            if check_valid_unbinding(&client_inst, table, client)? == UnbindCheck::AlreadyUnbound {
                debug!(%client, "optional interface already unbound");
                return Ok(());
            }
            let entry = table
                .get(client.slot, client.index)
                .ok_or_else(|| BindError::NotFound(client.to_string()))?;
            let server = entry.target.server().cloned();
            let kind = entry.kind().unwrap_or(BindingKind::Synchronous);
            let singleton = server
                .as_ref()
                .and_then(|s| self.loader.component(s.component))
                .filter(|s| s.template.is_singleton());

            if let (Some(server), Some(_)) = (&server, &singleton) {
                if singletons.held_by(key, logical) == 0 {
                    return Err(BindError::NotFound(format!(
                        "client {} holds no binding on {client}",
                        logical.0
                    )));
                }
                if singletons.total(key) > 1 {
                    let remaining = singletons.decrement(key, logical)?;
                    drop(state);
                    debug!(%client, clients = remaining, "singleton unbind counted");
                    self.report(TraceOperation::Unbind, client, Some(server.component), kind);
                    return Ok(());
                }
            }
            singleton
        };

        // Last reference: keep the server's processor awake while tearing down.
        let awake = singleton.map(|s| s.processor());
        if let Some(processor) = awake {
            self.channels.service_call(processor, ServiceRequest::ForceWake)?;
        }

        let detached = {
            let mut state = self.state.lock();
            let BinderState {
                tables, singletons, ..
            } = &mut *state;
            let table = table_of(tables, &client_inst);
            let drained = table
                .get(client.slot, client.index)
                .and_then(|e| e.binding.as_ref())
                .and_then(BindingPayload::fifo)
                .map_or(Ok(()), |fifo| fifo.unpair());
            drained.map(|()| {
                if awake.is_some()
                    && let Err(e) = singletons.decrement(key, logical)
                {
                    warn!(%client, error = %e, "singleton counter out of step");
                }
                table.take(client).unwrap_or_default()
            })
        };
        let detached = match detached {
            Ok(entry) => entry,
            Err(e) => {
                self.allow_sleep(awake);
                return Err(e);
            }
        };

        let InterfaceRef { target, binding } = detached;
        let kind = binding
            .as_ref()
            .map(BindingPayload::kind)
            .unwrap_or(BindingKind::Synchronous);
        let torn_down = match binding {
            Some(payload) => {
                let slot = ClientSlot {
                    instance: &client_inst,
                    slot: client.slot,
                    index: client.index,
                };
                destroy_payload(&self.cx(), Some(slot), &target, payload)
            }
            None => Ok(()),
        };
        self.allow_sleep(awake);
        self.report(
            TraceOperation::Unbind,
            client,
            target.server().map(|s| s.component),
            kind,
        );
        torn_down
    }

    /// Undo a [`Binder::bind_from_host`] binding.
    ///
    /// # Errors
    ///
    /// - [`BindError::NotFound`] – no such host binding.
    /// - [`BindError::CallsInFlight`] – the host still has calls in the FIFO.
    pub fn unbind_from_host(&self, binding: u32) -> Result<(), BindError> {
        let processor = {
            let state = self.state.lock();
            let record = state
                .host_bindings
                .get(&binding)
                .ok_or_else(|| BindError::NotFound(format!("host binding {binding}")))?;
            self.instance(record.server.component)?.processor()
        };
        let _lock = self.lock(processor)?;

        let record = {
            let mut state = self.state.lock();
            let record = state
                .host_bindings
                .get(&binding)
                .ok_or_else(|| BindError::NotFound(format!("host binding {binding}")))?;
            if let Some(fifo) = record.payload.fifo() {
                fifo.unpair()?;
            }
            state
                .host_bindings
                .remove(&binding)
                .ok_or_else(|| BindError::NotFound(format!("host binding {binding}")))?
        };
        let target = RefTarget::Server(record.server.clone());
        let result = destroy_payload(&self.cx(), None, &target, record.payload);
        self.report_host(TraceOperation::Unbind, &record.server);
        result
    }

    // ── Introspection ───────────────────────────────────────────────────

    /// What `client` is bound to.
    ///
    /// # Errors
    ///
    /// [`BindError::NotFound`] when the slot does not exist or is unbound.
    pub fn lookup(&self, client: &InterfaceDesc) -> Result<RefTarget, BindError> {
        let state = self.state.lock();
        state
            .tables
            .get(&client.component)
            .and_then(|t| t.get(client.slot, client.index))
            .map(|e| e.target.clone())
            .filter(RefTarget::is_bound)
            .ok_or_else(|| BindError::NotFound(format!("{client} is not bound")))
    }

    /// Kind of the binding in `client`, `None` while unbound.
    pub fn binding_kind(&self, client: &InterfaceDesc) -> Result<Option<BindingKind>, BindError> {
        let instance = self.instance(client.component)?;
        checks::requirement(&instance, client)?;
        let state = self.state.lock();
        Ok(state
            .tables
            .get(&client.component)
            .and_then(|t| t.get(client.slot, client.index))
            .and_then(InterfaceRef::kind))
    }

    /// Param FIFO of the distributed binding in `client`, if any.
    pub fn binding_fifo(&self, client: &InterfaceDesc) -> Option<Arc<ParamFifo>> {
        let state = self.state.lock();
        state
            .tables
            .get(&client.component)
            .and_then(|t| t.get(client.slot, client.index))
            .and_then(|e| e.binding.as_ref())
            .and_then(BindingPayload::fifo)
            .cloned()
    }

    /// Physical bindings currently targeting `server`.
    pub fn server_reference_count(&self, server: ComponentId) -> usize {
        self.refs.count(server)
    }

    /// Outstanding singleton binds on `client`, summed over logical clients.
    pub fn singleton_clients(&self, client: &InterfaceDesc) -> u32 {
        self.state.lock().singletons.total(slot_key(client))
    }

    /// Drop the reference table of a component its owner is destroying.
    ///
    /// # Errors
    ///
    /// [`BindError::AlreadyBound`] while any of its slots is still bound.
    pub fn forget_component(&self, component: ComponentId) -> Result<(), BindError> {
        let mut state = self.state.lock();
        if let Some(table) = state.tables.get(&component) {
            let bound = table.bound_count();
            if bound > 0 {
                return Err(BindError::AlreadyBound(format!(
                    "{component} still has {bound} bound interface(s)"
                )));
            }
        }
        state.tables.remove(&component);
        Ok(())
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn cx(&self) -> FactoryContext<'_> {
        FactoryContext {
            loader: &*self.loader,
            allocator: &*self.allocator,
            channels: &self.channels,
            refs: &self.refs,
        }
    }

    fn instance(&self, id: ComponentId) -> Result<Arc<ComponentInstance>, BindError> {
        self.loader
            .component(id)
            .ok_or_else(|| BindError::NotFound(format!("component {id}")))
    }

    fn lock(&self, processor: ProcessorId) -> Result<MutexGuard<'_, ()>, BindError> {
        self.locks
            .get(&processor)
            .map(|m| m.lock())
            .ok_or(BindError::UnknownProcessor(processor))
    }

    /// Pick the factory able to connect `client` to `server`.
    fn factory_for(
        &self,
        request: BindRequest,
        client: &ComponentInstance,
        server: &ComponentInstance,
    ) -> Result<Box<dyn BindingFactory>, BindError> {
        let (from, to) = (client.processor(), server.processor());
        if !self.channels.knows(to) {
            return Err(BindError::UnknownProcessor(to));
        }
        let local = from == to;
        let factory: Box<dyn BindingFactory> = match request {
            BindRequest::Synchronous if local => Box::new(SynchronousFactory),
            BindRequest::Traced if local => Box::new(TracedFactory),
            BindRequest::Asynchronous { depth, priority } if local => {
                Box::new(AsynchronousFactory { depth, priority })
            }
            BindRequest::Distributed { .. } if local => {
                return Err(BindError::IllegalBinding(format!(
                    "{} and {} share {from}; bind them locally",
                    client.name, server.name
                )));
            }
            BindRequest::Distributed { .. } if from.is_host() => {
                return Err(BindError::IllegalBinding(format!(
                    "host client {} must bind to {} through bind_from_host",
                    client.name, server.name
                )));
            }
            BindRequest::Distributed { fifo_depth } if to.is_host() => {
                Box::new(DspToHostFactory { fifo_depth })
            }
            BindRequest::Distributed { fifo_depth } => Box::new(DspToDspFactory { fifo_depth }),
            _ => {
                return Err(BindError::IllegalBinding(format!(
                    "{:?} cannot cross from {from} to {to}",
                    request
                )));
            }
        };
        Ok(factory)
    }

    fn allow_sleep(&self, awake: Option<ProcessorId>) {
        if let Some(processor) = awake
            && let Err(e) = self.channels.service_call(processor, ServiceRequest::AllowSleep)
        {
            warn!(%processor, error = %e, "failed to release wake lock");
        }
    }

    fn report(
        &self,
        operation: TraceOperation,
        client: &InterfaceDesc,
        server: Option<ComponentId>,
        kind: BindingKind,
    ) {
        info!(?operation, %client, ?server, ?kind, "binding changed");
        self.bus.record(TraceRecord::new(
            operation,
            Some(client.component),
            server,
            client.name.clone(),
            kind,
        ));
    }

    fn report_host(&self, operation: TraceOperation, server: &InterfaceDesc) {
        info!(?operation, %server, "host binding changed");
        self.bus.record(TraceRecord::new(
            operation,
            None,
            Some(server.component),
            server.name.clone(),
            BindingKind::HostToDsp,
        ));
    }
}

/// Reference table of `instance`, created on first use.
fn table_of<'t>(
    tables: &'t mut HashMap<ComponentId, InterfaceRefTable>,
    instance: &ComponentInstance,
) -> &'t mut InterfaceRefTable {
    tables
        .entry(instance.id)
        .or_insert_with(|| InterfaceRefTable::for_template(&instance.template))
}

/// Split `name[i]` into `("name", i)`; a bare name is element 0.
fn parse_element(name: &str) -> Result<(&str, usize), BindError> {
    let Some(open) = name.find('[') else {
        return Ok((name, 0));
    };
    let index = name[open + 1..]
        .strip_suffix(']')
        .and_then(|i| i.parse().ok())
        .ok_or_else(|| BindError::NotFound(format!("malformed interface name {name}")))?;
    Ok((&name[..open], index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use corebind_hal::SimPlatform;
    use corebind_transport::Lane;
    use corebind_types::{
        ComponentClass, ComponentTemplate, Diagnostic, EngineConfig, InterfaceType,
        ProvidedInterface, RequiredInterface,
    };

    const DSP: ProcessorId = ProcessorId(1);

    fn pcm() -> InterfaceType {
        InterfaceType::new("audio.pcm", &["open", "write"])
    }

    fn setup() -> (Arc<SimPlatform>, Binder, TraceBus) {
        let platform = SimPlatform::builder()
            .with_template(
                ComponentTemplate::new("mixer", ComponentClass::Ordinary)
                    .requires(RequiredInterface::new("output", pcm()).collection(2))
                    .requires(RequiredInterface::new("monitor", pcm()).optional())
                    .requires(RequiredInterface::new("clock", pcm()).static_binding().optional()),
            )
            .with_template(
                ComponentTemplate::new("sink", ComponentClass::Ordinary)
                    .provides(ProvidedInterface::new("input", pcm(), 0x4000).collection(2)),
            )
            .with_helpers(&pcm(), 4)
            .build();
        let bus = TraceBus::default();
        let channels = Arc::new(ChannelRegistry::new(
            &EngineConfig::default(),
            platform.clone(),
            bus.clone(),
        ));
        let binder = Binder::new(platform.clone(), platform.clone(), channels, bus.clone());
        (platform, binder, bus)
    }

    #[test]
    fn element_names_parse() {
        assert_eq!(parse_element("output").unwrap(), ("output", 0));
        assert_eq!(parse_element("output[3]").unwrap(), ("output", 3));
        assert!(parse_element("output[x]").is_err());
        assert!(parse_element("output[1").is_err());
    }

    #[test]
    fn lookup_resolves_collection_elements() {
        let (p, binder, _) = setup();
        let mixer = p.spawn("mixer", DSP).unwrap();
        let second = binder.lookup_required(mixer, "output[1]").unwrap();
        assert_eq!((second.slot, second.index, second.name.as_str()), (0, 1, "output"));
        let monitor = binder.lookup_required(mixer, "monitor").unwrap();
        assert_eq!(monitor.slot, 1);
        assert!(matches!(binder.lookup_required(mixer, "output[2]"), Err(BindError::NotFound(_))));
        assert!(matches!(binder.lookup_provided(mixer, "input"), Err(BindError::NotFound(_))));
    }

    #[test]
    fn void_binding_is_distinct_from_unbound() {
        let (p, binder, _) = setup();
        let mixer = p.spawn("mixer", DSP).unwrap();
        let output = binder.lookup_required(mixer, "output").unwrap();
        assert_eq!(binder.binding_kind(&output).unwrap(), None);

        binder.bind_to_void(&output).unwrap();
        assert_eq!(binder.lookup(&output).unwrap(), RefTarget::Void);
        assert_eq!(binder.binding_kind(&output).unwrap(), Some(BindingKind::Void));

        binder.unbind(ClientId(1), &output).unwrap();
        assert!(binder.lookup(&output).is_err());
    }

    #[test]
    fn unbinding_unbound_optional_singleton_slot_is_noop() {
        let (p, binder, bus) = setup();
        let mut rx = bus.subscribe(Lane::Bindings);
        let mixer = p.spawn("mixer", DSP).unwrap();
        let clock = binder.lookup_required(mixer, "clock").unwrap();
        binder.unbind(ClientId(1), &clock).unwrap();
        assert!(rx.try_recv().is_none());

        let monitor = binder.lookup_required(mixer, "monitor").unwrap();
        assert!(matches!(binder.unbind(ClientId(1), &monitor), Err(BindError::NotFound(_))));

        let output = binder.lookup_required(mixer, "output").unwrap();
        assert!(matches!(binder.unbind(ClientId(1), &output), Err(BindError::NotFound(_))));
    }

    #[test]
    fn bind_and_unbind_publish_trace_records() {
        let (p, binder, bus) = setup();
        let mut rx = bus.subscribe(Lane::Bindings);
        let mixer = p.spawn("mixer", DSP).unwrap();
        let sink = p.spawn("sink", DSP).unwrap();
        let output = binder.lookup_required(mixer, "output").unwrap();
        let input = binder.lookup_provided(sink, "input[1]").unwrap();

        binder.bind_traced(ClientId(1), &output, &input).unwrap();
        binder.unbind(ClientId(1), &output).unwrap();

        for expected in [TraceOperation::Bind, TraceOperation::Unbind] {
            let Some(Diagnostic::Binding(record)) = rx.try_recv() else {
                panic!("expected a binding record");
            };
            assert_eq!(record.operation, expected);
            assert_eq!(record.client, Some(mixer));
            assert_eq!(record.server, Some(sink));
            assert_eq!(record.interface, "output");
            assert_eq!(record.kind, BindingKind::Traced);
        }
    }

    #[test]
    fn distributed_request_between_local_components_is_illegal() {
        let (p, binder, _) = setup();
        let mixer = p.spawn("mixer", DSP).unwrap();
        let sink = p.spawn("sink", DSP).unwrap();
        let output = binder.lookup_required(mixer, "output").unwrap();
        let input = binder.lookup_provided(sink, "input").unwrap();
        assert!(matches!(
            binder.bind_distributed(ClientId(1), &output, &input, 4),
            Err(BindError::IllegalBinding(_))
        ));
        assert!(matches!(
            binder.bind(ClientId(1), &output, &input, BindRequest::Synchronous),
            Ok(())
        ));
    }

    #[test]
    fn local_request_across_processors_is_illegal() {
        let (p, binder, _) = setup();
        let mixer = p.spawn("mixer", DSP).unwrap();
        let sink = p.spawn("sink", ProcessorId(2)).unwrap();
        let output = binder.lookup_required(mixer, "output").unwrap();
        let input = binder.lookup_provided(sink, "input").unwrap();
        assert!(matches!(
            binder.bind_synchronous(ClientId(1), &output, &input),
            Err(BindError::IllegalBinding(_))
        ));
        assert!(binder.lookup(&output).is_err());
    }

    #[test]
    fn forget_component_requires_unbound_slots() {
        let (p, binder, _) = setup();
        let mixer = p.spawn("mixer", DSP).unwrap();
        let output = binder.lookup_required(mixer, "output").unwrap();
        binder.bind_to_void(&output).unwrap();
        assert!(matches!(binder.forget_component(mixer), Err(BindError::AlreadyBound(_))));
        binder.unbind(ClientId(1), &output).unwrap();
        binder.forget_component(mixer).unwrap();
    }
}
