//! Engine – assembles one binding engine from an [`EngineConfig`] and the
//! platform collaborators.
//!
//! The [`Engine`] owns the diagnostics bus, the command channels of every
//! configured DSP and the [`Binder`] on top of them.  Callers that know the
//! [`BindingKind`] they want go through [`Engine::bind`], which fills in
//! queue and FIFO depths from the configuration.
//!
//! # Example
//!
//! ```rust
//! use corebind_hal::SimPlatform;
//! use corebind_runtime::Engine;
//! use corebind_types::{
//!     BindingKind, ClientId, ComponentClass, ComponentTemplate, EngineConfig, InterfaceType,
//!     ProcessorId, ProvidedInterface, RequiredInterface,
//! };
//!
//! let pcm = InterfaceType::new("audio.pcm", &["write"]);
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
//! let engine = Engine::simulated(EngineConfig::default(), platform.clone());
//!
//! let mixer = platform.spawn("mixer", ProcessorId(1)).unwrap();
//! let sink = platform.spawn("sink", ProcessorId(1)).unwrap();
//! let output = engine.binder().lookup_required(mixer, "output").unwrap();
//! let input = engine.binder().lookup_provided(sink, "input").unwrap();
//!
//! engine.bind(ClientId(1), &output, &input, BindingKind::Synchronous).unwrap();
//! assert_eq!(engine.binder().lookup(&output).unwrap().server(), Some(&input));
//! ```

use std::sync::Arc;

use corebind_hal::{Loader, MemoryAllocator, ProcessorLink, SimPlatform};
use corebind_kernel::{BindRequest, Binder, HostBinding};
use corebind_transport::{ChannelRegistry, Lane, LaneReceiver, ProcessorState, TraceBus};
use corebind_types::{
    BindError, BindingKind, ClientId, EngineConfig, InterfaceDesc, Priority, ProcessorId,
};
use tracing::{info, warn};

pub struct Engine {
    config: EngineConfig,
    loader: Arc<dyn Loader>,
    bus: TraceBus,
    channels: Arc<ChannelRegistry>,
    binder: Binder,
}

impl Engine {
    /// Create an engine with one command channel per DSP in `config`.
    pub fn new(
        config: EngineConfig,
        loader: Arc<dyn Loader>,
        allocator: Arc<dyn MemoryAllocator>,
        link: Arc<dyn ProcessorLink>,
    ) -> Self {
        let bus = TraceBus::default();
        let channels = Arc::new(ChannelRegistry::new(&config, link, bus.clone()));
        let binder = Binder::new(loader.clone(), allocator, channels.clone(), bus.clone());
        info!(
            dsps = ?channels.processors(),
            timeout_ms = config.service_timeout_ms,
            "binding engine ready"
        );
        Self {
            config,
            loader,
            bus,
            channels,
            binder,
        }
    }

    /// An engine whose loader, allocator and link are all `platform`.
    pub fn simulated(config: EngineConfig, platform: Arc<SimPlatform>) -> Self {
        Self::new(config, platform.clone(), platform.clone(), platform)
    }

    pub fn binder(&self) -> &Binder {
        &self.binder
    }

    pub fn bus(&self) -> &TraceBus {
        &self.bus
    }

    pub fn channels(&self) -> &Arc<ChannelRegistry> {
        &self.channels
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to one lane of the diagnostics bus.
    pub fn subscribe(&self, lane: Lane) -> LaneReceiver {
        self.bus.subscribe(lane)
    }

    /// The [`BindRequest`] building a `kind` binding with configured depths.
    ///
    /// # Errors
    ///
    /// [`BindError::IllegalBinding`] for [`BindingKind::Void`] and
    /// [`BindingKind::HostToDsp`], which have dedicated entry points.
    pub fn request(&self, kind: BindingKind) -> Result<BindRequest, BindError> {
        match kind {
            BindingKind::Synchronous => Ok(BindRequest::Synchronous),
            BindingKind::Traced => Ok(BindRequest::Traced),
            BindingKind::Asynchronous => Ok(BindRequest::Asynchronous {
                depth: self.config.default_event_queue_depth,
                priority: Priority::Normal,
            }),
            BindingKind::DspToDsp | BindingKind::DspToHost => Ok(BindRequest::Distributed {
                fifo_depth: self.config.default_fifo_depth,
            }),
            BindingKind::Void => Err(BindError::IllegalBinding(
                "void bindings have no server; use Binder::bind_to_void".into(),
            )),
            BindingKind::HostToDsp => Err(BindError::IllegalBinding(
                "host bindings have no client slot; use Engine::bind_from_host".into(),
            )),
        }
    }

    /// Bind `client` to `server` with a binding of exactly `kind`.
    ///
    /// # Errors
    ///
    /// [`BindError::IllegalBinding`] when the two processors cannot carry a
    /// `kind` binding, otherwise whatever [`Binder::bind`] returns.
    pub fn bind(
        &self,
        logical: ClientId,
        client: &InterfaceDesc,
        server: &InterfaceDesc,
        kind: BindingKind,
    ) -> Result<(), BindError> {
        let request = self.request(kind)?;
        if kind.is_distributed() {
            let from = self.processor_of(client)?;
            let to = self.processor_of(server)?;
            let fits = match kind {
                BindingKind::DspToHost => to == ProcessorId::HOST,
                _ => to != ProcessorId::HOST,
            };
            if from == ProcessorId::HOST || from == to || !fits {
                return Err(BindError::IllegalBinding(format!(
                    "{kind:?} cannot connect {client} on {from} to {server} on {to}"
                )));
            }
        }
        self.binder.bind(logical, client, server, request)
    }

    /// Bind the host to DSP-resident `server` with the configured FIFO depth.
    pub fn bind_from_host(&self, server: &InterfaceDesc) -> Result<HostBinding, BindError> {
        self.binder.bind_from_host(server, self.config.default_fifo_depth)
    }

    /// Health of every DSP with a command channel.
    pub fn processor_states(&self) -> Vec<(ProcessorId, ProcessorState)> {
        self.channels
            .processors()
            .into_iter()
            .filter_map(|p| self.channels.state(p).ok().map(|s| (p, s)))
            .collect()
    }

    /// Flush and close every healthy command channel.
    pub fn shutdown(&self) -> Result<(), BindError> {
        info!("shutting down command channels");
        self.channels.shutdown().inspect_err(|e| {
            warn!(error = %e, "command channel shutdown incomplete");
        })
    }

    fn processor_of(&self, desc: &InterfaceDesc) -> Result<ProcessorId, BindError> {
        self.loader
            .component(desc.component)
            .map(|c| c.processor())
            .ok_or_else(|| BindError::NotFound(desc.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corebind_types::{
        ComponentClass, ComponentTemplate, Diagnostic, InterfaceType, ProvidedInterface,
        RequiredInterface, TraceOperation,
    };

    fn pcm() -> InterfaceType {
        InterfaceType::new("audio.pcm", &["open", "write"])
    }

    fn platform() -> Arc<SimPlatform> {
        SimPlatform::builder()
            .with_template(
                ComponentTemplate::new("mixer", ComponentClass::Ordinary)
                    .requires(RequiredInterface::new("output", pcm())),
            )
            .with_template(
                ComponentTemplate::new("sink", ComponentClass::Ordinary)
                    .provides(ProvidedInterface::new("input", pcm(), 0x4000)),
            )
            .with_helpers(&pcm(), 4)
            .build()
    }

    fn pair(engine: &Engine, p: &SimPlatform, on: ProcessorId) -> (InterfaceDesc, InterfaceDesc) {
        let mixer = p.spawn("mixer", ProcessorId(1)).unwrap();
        let sink = p.spawn("sink", on).unwrap();
        (
            engine.binder().lookup_required(mixer, "output").unwrap(),
            engine.binder().lookup_provided(sink, "input").unwrap(),
        )
    }

    #[test]
    fn requests_use_configured_depths() {
        let config = EngineConfig {
            default_fifo_depth: 6,
            default_event_queue_depth: 3,
            ..EngineConfig::default()
        };
        let engine = Engine::simulated(config, platform());
        assert_eq!(
            engine.request(BindingKind::Asynchronous).unwrap(),
            BindRequest::Asynchronous { depth: 3, priority: Priority::Normal }
        );
        assert_eq!(
            engine.request(BindingKind::DspToDsp).unwrap(),
            BindRequest::Distributed { fifo_depth: 6 }
        );
        assert!(matches!(
            engine.request(BindingKind::Void),
            Err(BindError::IllegalBinding(_))
        ));
        assert!(matches!(
            engine.request(BindingKind::HostToDsp),
            Err(BindError::IllegalBinding(_))
        ));
    }

    #[test]
    fn distributed_kind_must_match_the_processors() {
        let p = platform();
        let engine = Engine::simulated(EngineConfig::default(), p.clone());
        let (output, input) = pair(&engine, &p, ProcessorId(2));

        assert!(matches!(
            engine.bind(ClientId(1), &output, &input, BindingKind::DspToHost),
            Err(BindError::IllegalBinding(_))
        ));
        assert!(engine.binder().lookup(&output).is_err());

        engine.bind(ClientId(1), &output, &input, BindingKind::DspToDsp).unwrap();
        assert_eq!(
            engine.binder().binding_kind(&output).unwrap(),
            Some(BindingKind::DspToDsp)
        );
        assert_eq!(engine.binder().binding_fifo(&output).unwrap().depth(), 4);
    }

    #[test]
    fn host_binding_uses_default_fifo_depth() {
        let p = platform();
        let config = EngineConfig {
            default_fifo_depth: 2,
            ..EngineConfig::default()
        };
        let engine = Engine::simulated(config, p.clone());
        let sink = p.spawn("sink", ProcessorId(2)).unwrap();
        let input = engine.binder().lookup_provided(sink, "input").unwrap();
        let host = engine.bind_from_host(&input).unwrap();
        assert_eq!(host.fifo.depth(), 2);
        engine.binder().unbind_from_host(host.id).unwrap();
    }

    #[test]
    fn processor_states_cover_configured_dsps() {
        let engine = Engine::simulated(EngineConfig::default(), platform());
        assert_eq!(
            engine.processor_states(),
            vec![
                (ProcessorId(1), ProcessorState::Ready),
                (ProcessorId(2), ProcessorState::Ready),
            ]
        );
        engine.shutdown().unwrap();
    }

    #[tokio::test]
    async fn subscribers_receive_bind_records() {
        let p = platform();
        let engine = Engine::simulated(EngineConfig::default(), p.clone());
        let mut rx = engine.subscribe(Lane::Bindings);
        let (output, input) = pair(&engine, &p, ProcessorId(1));

        engine.bind(ClientId(1), &output, &input, BindingKind::Synchronous).unwrap();
        match rx.recv().await {
            Some(Diagnostic::Binding(record)) => {
                assert_eq!(record.operation, TraceOperation::Bind);
                assert_eq!(record.kind, BindingKind::Synchronous);
            }
            other => panic!("unexpected diagnostic {other:?}"),
        }
    }
}
