//! Platform shared by the binding scenarios: a host and two DSPs, a
//! `mixer` client, an ordinary `sink` server and a singleton `clock`.

#![allow(dead_code)]

use std::sync::Arc;

use corebind_hal::SimPlatform;
use corebind_kernel::Binder;
use corebind_transport::{ChannelRegistry, TraceBus};
use corebind_types::{
    ComponentClass, ComponentTemplate, EngineConfig, InterfaceType, ProcessorId,
    ProvidedInterface, RequiredInterface,
};

pub const HOST: ProcessorId = ProcessorId::HOST;
pub const DSP_A: ProcessorId = ProcessorId(1);
pub const DSP_B: ProcessorId = ProcessorId(2);

pub fn pcm() -> InterfaceType {
    InterfaceType::new("audio.pcm", &["open", "write", "close"])
}

pub fn ctl() -> InterfaceType {
    InterfaceType::new("audio.ctl", &["set"])
}

pub fn tick() -> InterfaceType {
    InterfaceType::new("time.tick", &["now", "wait"])
}

pub struct Rig {
    pub platform: Arc<SimPlatform>,
    pub binder: Binder,
    pub bus: TraceBus,
}

pub fn rig() -> Rig {
    rig_with(EngineConfig::default())
}

pub fn rig_with(config: EngineConfig) -> Rig {
    let platform = SimPlatform::builder()
        .with_template(
            ComponentTemplate::new("mixer", ComponentClass::Ordinary)
                .requires(RequiredInterface::new("output", pcm()))
                .requires(RequiredInterface::new("control", ctl()))
                .requires(RequiredInterface::new("clock", tick()).static_binding().optional()),
        )
        .with_template(
            ComponentTemplate::new("sink", ComponentClass::Ordinary)
                .provides(ProvidedInterface::new("input", pcm(), 0x4000))
                .provides(ProvidedInterface::new("control", ctl(), 0x4800)),
        )
        .with_template(
            ComponentTemplate::new("clock", ComponentClass::Singleton)
                .provides(ProvidedInterface::new("tick", tick(), 0x5000)),
        )
        // No helpers for `audio.ctl`: traced and distributed binds of it
        // cannot find their proxies.
        .with_helpers(&pcm(), 4)
        .with_helpers(&tick(), 2)
        .build();
    let bus = TraceBus::default();
    let channels = Arc::new(ChannelRegistry::new(&config, platform.clone(), bus.clone()));
    let binder = Binder::new(platform.clone(), platform.clone(), channels, bus.clone());
    Rig {
        platform,
        binder,
        bus,
    }
}
