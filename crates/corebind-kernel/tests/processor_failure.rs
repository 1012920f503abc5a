//! An unresponsive DSP is declared panicked once and fails fast afterwards.

mod common;

use std::time::{Duration, Instant};

use common::{DSP_A, DSP_B, rig_with};
use corebind_hal::LinkBehaviour;
use corebind_transport::{Lane, ProcessorState};
use corebind_types::conventions::TRACE_PREFIX;
use corebind_types::{BindError, ClientId, Diagnostic, EngineConfig};

const TIMEOUT: Duration = Duration::from_millis(150);

fn config() -> EngineConfig {
    EngineConfig {
        service_timeout_ms: TIMEOUT.as_millis() as u64,
        ..EngineConfig::default()
    }
}

#[test]
fn unresponsive_processor_times_out_once_then_fails_fast() {
    let rig = rig_with(config());
    let mut alerts = rig.bus.subscribe(Lane::Alerts);
    rig.platform.set_behaviour(DSP_B, LinkBehaviour::Unresponsive);
    let mixer = rig.platform.spawn("mixer", DSP_B).unwrap();
    let sink = rig.platform.spawn("sink", DSP_B).unwrap();
    let before = rig.platform.live_components();
    let output = rig.binder.lookup_required(mixer, "output").unwrap();
    let input = rig.binder.lookup_provided(sink, "input").unwrap();

    let started = Instant::now();
    assert_eq!(
        rig.binder.bind_traced(ClientId(1), &output, &input),
        Err(BindError::PeerUnresponsive(DSP_B))
    );
    assert!(started.elapsed() >= TIMEOUT);
    assert_eq!(rig.platform.panicked(), vec![DSP_B]);
    assert_eq!(rig.binder.channels().state(DSP_B).unwrap(), ProcessorState::Panicked);
    assert_eq!(rig.platform.live_with_prefix(TRACE_PREFIX), 0);
    assert_eq!(rig.platform.live_components(), before);
    assert!(rig.binder.lookup(&output).is_err());
    match alerts.try_recv() {
        Some(Diagnostic::ProcessorPanic { processor, .. }) => assert_eq!(processor, DSP_B),
        other => panic!("expected a panic alert, got {other:?}"),
    }

    let started = Instant::now();
    assert_eq!(
        rig.binder.bind_traced(ClientId(1), &output, &input),
        Err(BindError::PeerUnresponsive(DSP_B))
    );
    assert!(started.elapsed() < TIMEOUT);
    assert_eq!(rig.platform.panicked(), vec![DSP_B], "panic is raised once");
    assert!(alerts.try_recv().is_none());

    // Direct bindings need no service call and still work.
    rig.binder
        .bind_synchronous(ClientId(1), &output, &input)
        .unwrap();
}

#[test]
fn other_processors_are_unaffected() {
    let rig = rig_with(config());
    rig.platform.set_behaviour(DSP_B, LinkBehaviour::Unresponsive);
    let wedged = rig.platform.spawn("sink", DSP_B).unwrap();
    let mixer = rig.platform.spawn("mixer", DSP_A).unwrap();
    let sink = rig.platform.spawn("sink", DSP_A).unwrap();
    let output = rig.binder.lookup_required(mixer, "output").unwrap();

    let remote = rig.binder.lookup_provided(wedged, "input").unwrap();
    assert_eq!(
        rig.binder.bind_distributed(ClientId(1), &output, &remote, 4),
        Err(BindError::PeerUnresponsive(DSP_B))
    );

    let input = rig.binder.lookup_provided(sink, "input").unwrap();
    rig.binder.bind_traced(ClientId(1), &output, &input).unwrap();
    assert_eq!(rig.binder.channels().state(DSP_A).unwrap(), ProcessorState::Ready);
}

#[tokio::test(flavor = "multi_thread")]
async fn panic_alert_is_delivered_to_async_subscribers() {
    let rig = rig_with(config());
    let mut alerts = rig.bus.subscribe(Lane::Alerts);
    rig.platform.set_behaviour(DSP_B, LinkBehaviour::Unresponsive);
    let sink = rig.platform.spawn("sink", DSP_B).unwrap();
    let input = rig.binder.lookup_provided(sink, "input").unwrap();

    let binder_result = tokio::task::block_in_place(|| rig.binder.bind_from_host(&input, 4));
    assert!(matches!(binder_result, Err(BindError::PeerUnresponsive(_))));

    let alert = tokio::time::timeout(Duration::from_secs(1), alerts.recv())
        .await
        .unwrap();
    assert!(matches!(
        alert,
        Some(Diagnostic::ProcessorPanic { processor, .. }) if processor == DSP_B
    ));
}
