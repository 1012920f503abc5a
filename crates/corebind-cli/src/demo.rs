//! Simulated host + two-DSP scenario exercising every binding kind.
//!
//! Each [`Step`] binds, inspects and unbinds one configuration on a
//! [`SimPlatform`], so a clean run ends with no helper component and no
//! allocation left behind.  The last steps make DSP 2 stop answering and
//! show the engine marking it unusable.

use std::sync::Arc;

use corebind_hal::{LinkBehaviour, MemoryAllocator, SimPlatform};
use corebind_runtime::Engine;
use corebind_transport::{LaneReceiver, Lane, ProcessorState};
use corebind_types::{
    BindError, BindingKind, ClientId, ComponentClass, ComponentTemplate, EngineConfig,
    InterfaceType, ProcessorId, ProvidedInterface, RequiredInterface,
};
use tracing::info;

const DSP_A: ProcessorId = ProcessorId(1);
const DSP_B: ProcessorId = ProcessorId(2);
const APP: ClientId = ClientId(1);
const SETTINGS: ClientId = ClientId(2);

/// Outcome of one scenario step.
#[derive(Debug)]
pub struct Step {
    pub name: &'static str,
    pub outcome: Result<String, BindError>,
}

pub struct Scenario {
    platform: Arc<SimPlatform>,
    engine: Engine,
}

fn pcm() -> InterfaceType {
    InterfaceType::new("audio.pcm", &["open", "write", "close"])
}

fn tick() -> InterfaceType {
    InterfaceType::new("time.tick", &["now", "wait"])
}

impl Scenario {
    pub fn new(config: EngineConfig) -> Self {
        let platform = SimPlatform::builder()
            .with_template(
                ComponentTemplate::new("mixer", ComponentClass::Ordinary)
                    .requires(RequiredInterface::new("output", pcm()))
                    .requires(RequiredInterface::new("clock", tick()).static_binding().optional()),
            )
            .with_template(
                ComponentTemplate::new("sink", ComponentClass::Ordinary)
                    .provides(ProvidedInterface::new("input", pcm(), 0x4000)),
            )
            .with_template(
                ComponentTemplate::new("clock", ComponentClass::Singleton)
                    .provides(ProvidedInterface::new("tick", tick(), 0x5000)),
            )
            .with_helpers(&pcm(), 4)
            .with_helpers(&tick(), 2)
            .build();
        let engine = Engine::simulated(config, platform.clone());
        Self { platform, engine }
    }

    pub fn subscribe(&self, lane: Lane) -> LaneReceiver {
        self.engine.subscribe(lane)
    }

    /// Run every step in order.  Steps are independent: a failing step
    /// does not stop the ones after it.
    pub fn run(self) -> Vec<Step> {
        let steps: [(&'static str, fn(&Self) -> Result<String, BindError>); 8] = [
            ("synchronous bind on DSP 1", Self::synchronous),
            ("traced bind on DSP 1", Self::traced),
            ("asynchronous bind on DSP 1", Self::asynchronous),
            ("DSP 1 -> DSP 2 through a Param FIFO", Self::dsp_to_dsp),
            ("host -> DSP 2", Self::host_to_dsp),
            ("singleton clock shared by two clients", Self::singleton),
            ("DSP 2 stops answering", Self::unresponsive_peer),
            ("leak check and shutdown", Self::finish),
        ];
        steps
            .into_iter()
            .map(|(name, step)| {
                info!(step = name, "running scenario step");
                Step {
                    name,
                    outcome: step(&self),
                }
            })
            .collect()
    }

    fn local_pair(&self, kind: BindingKind) -> Result<String, BindError> {
        let mixer = self.platform.spawn("mixer", DSP_A)?;
        let sink = self.platform.spawn("sink", DSP_A)?;
        let binder = self.engine.binder();
        let output = binder.lookup_required(mixer, "output")?;
        let input = binder.lookup_provided(sink, "input")?;

        self.engine.bind(APP, &output, &input, kind)?;
        let bound = binder.binding_kind(&output)?;
        binder.unbind(APP, &output)?;
        Ok(format!("{output} -> {input} bound as {bound:?}, then unbound"))
    }

    fn synchronous(&self) -> Result<String, BindError> {
        self.local_pair(BindingKind::Synchronous)
    }

    fn traced(&self) -> Result<String, BindError> {
        self.local_pair(BindingKind::Traced)
    }

    fn asynchronous(&self) -> Result<String, BindError> {
        self.local_pair(BindingKind::Asynchronous)
    }

    fn dsp_to_dsp(&self) -> Result<String, BindError> {
        let mixer = self.platform.spawn("mixer", DSP_A)?;
        let sink = self.platform.spawn("sink", DSP_B)?;
        let binder = self.engine.binder();
        let output = binder.lookup_required(mixer, "output")?;
        let input = binder.lookup_provided(sink, "input")?;

        self.engine.bind(APP, &output, &input, BindingKind::DspToDsp)?;
        let fifo = binder
            .binding_fifo(&output)
            .ok_or_else(|| BindError::NotFound(format!("FIFO of {output}")))?;
        let mut accepted = 0;
        while fifo.push_call(0x4004, &[accepted as u32], false).is_ok() {
            accepted += 1;
        }
        let mut drained = 0;
        while fifo.pop().is_some() {
            fifo.acknowledge();
            drained += 1;
        }
        binder.unbind(APP, &output)?;
        Ok(format!(
            "depth {} FIFO accepted {accepted} calls before overflowing, drained {drained}",
            fifo.depth()
        ))
    }

    fn host_to_dsp(&self) -> Result<String, BindError> {
        let sink = self.platform.spawn("sink", DSP_B)?;
        let input = self.engine.binder().lookup_provided(sink, "input")?;

        let host = self.engine.bind_from_host(&input)?;
        host.fifo.push_call(0x4000, &[1], false)?;
        let call = host
            .fifo
            .pop()
            .ok_or_else(|| BindError::NotFound("queued host call".into()))?;
        host.fifo.acknowledge();
        self.engine.binder().unbind_from_host(host.id)?;
        Ok(format!(
            "host call to method {:#x} reached the skeleton of {input}",
            call.method
        ))
    }

    fn singleton(&self) -> Result<String, BindError> {
        let mixer = self.platform.spawn("mixer", DSP_A)?;
        let clock = self.platform.spawn("clock", DSP_A)?;
        let binder = self.engine.binder();
        let slot = binder.lookup_required(mixer, "clock")?;
        let tick = binder.lookup_provided(clock, "tick")?;

        self.engine.bind(APP, &slot, &tick, BindingKind::Synchronous)?;
        self.engine.bind(SETTINGS, &slot, &tick, BindingKind::Synchronous)?;
        let clients = binder.singleton_clients(&slot);
        binder.unbind(APP, &slot)?;
        let still_bound = binder.lookup(&slot).is_ok();
        binder.unbind(SETTINGS, &slot)?;
        Ok(format!(
            "{clients} client(s) counted, bound after first unbind: {still_bound}, refs now {}",
            binder.server_reference_count(clock)
        ))
    }

    fn unresponsive_peer(&self) -> Result<String, BindError> {
        let mixer = self.platform.spawn("mixer", DSP_A)?;
        let sink = self.platform.spawn("sink", DSP_B)?;
        let binder = self.engine.binder();
        let output = binder.lookup_required(mixer, "output")?;
        let input = binder.lookup_provided(sink, "input")?;

        self.platform.set_behaviour(DSP_B, LinkBehaviour::Unresponsive);
        match self.engine.bind(APP, &output, &input, BindingKind::DspToDsp) {
            Err(BindError::PeerUnresponsive(p)) => {
                let again = self.engine.bind(APP, &output, &input, BindingKind::DspToDsp);
                Ok(format!(
                    "{p} timed out after {} ms; retry: {}",
                    self.engine.config().service_timeout_ms,
                    again.err().map_or_else(|| "bound".to_string(), |e| e.to_string())
                ))
            }
            Err(other) => Err(other),
            Ok(()) => Err(BindError::IllegalBinding(
                "bind to an unresponsive processor succeeded".into(),
            )),
        }
    }

    fn finish(&self) -> Result<String, BindError> {
        let stats = self.platform.stats();
        let panicked: Vec<_> = self
            .engine
            .processor_states()
            .into_iter()
            .filter(|(_, s)| *s == ProcessorState::Panicked)
            .map(|(p, _)| p.to_string())
            .collect();
        self.engine.shutdown()?;
        Ok(format!(
            "{} live allocation(s), {} byte(s); unusable: [{}]",
            stats.live_allocations,
            stats.live_bytes,
            panicked.join(", ")
        ))
    }
}
