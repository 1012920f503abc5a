//! `corebind-runtime` – engine assembly and process-wide telemetry.
//!
//! # Modules
//!
//! - [`engine`] – [`Engine`][engine::Engine]: owns the command-channel
//!   registry, the trace bus and the [`Binder`][corebind_kernel::Binder] of
//!   one platform, built from an [`EngineConfig`][corebind_types::EngineConfig].
//!   Several engines may coexist in one process.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export
//!   to Jaeger, Grafana Tempo, or any OTLP-compatible collector.

pub mod engine;
pub mod telemetry;

pub use engine::Engine;
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
