//! Diagnostics bus: the trace sink of the binding engine.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every record without any single subscriber blocking
//! the binder.  Publishing never requires a running Tokio runtime.
//!
//! # Lanes
//!
//! | Lane | Traffic |
//! |---|---|
//! | [`Lane::Bindings`] | One [`TraceRecord`] per successful bind or unbind |
//! | [`Lane::Alerts`] | Processor panics and other fatal conditions |
//!
//! The bus is a pure side channel: a record published while nobody listens
//! is dropped, and nothing published here feeds back into binder logic.

use corebind_types::{Diagnostic, TraceRecord};
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered records before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes of the diagnostics bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    Bindings,
    Alerts,
}

impl Lane {
    fn of(diagnostic: &Diagnostic) -> Self {
        match diagnostic {
            Diagnostic::Binding(_) => Lane::Bindings,
            Diagnostic::ProcessorPanic { .. } => Lane::Alerts,
        }
    }
}

/// Shared diagnostics bus.  Clone it cheaply – all clones share the same
/// underlying broadcast channels.
#[derive(Clone, Debug)]
pub struct TraceBus {
    bindings: broadcast::Sender<Diagnostic>,
    alerts: broadcast::Sender<Diagnostic>,
}

impl TraceBus {
    /// Create a new bus with the given per-lane capacity.
    pub fn new(capacity: usize) -> Self {
        let (bindings, _) = broadcast::channel(capacity);
        let (alerts, _) = broadcast::channel(capacity);
        Self { bindings, alerts }
    }

    /// Publish `diagnostic` on its lane.
    ///
    /// Returns the number of subscribers that were handed the record; `0`
    /// when nobody is listening, which is a normal condition.
    pub fn publish(&self, diagnostic: Diagnostic) -> usize {
        self.sender(Lane::of(&diagnostic)).send(diagnostic).unwrap_or(0)
    }

    /// Convenience wrapper for binding records.
    pub fn record(&self, record: TraceRecord) -> usize {
        self.publish(Diagnostic::Binding(record))
    }

    /// Subscribe to one lane.
    pub fn subscribe(&self, lane: Lane) -> LaneReceiver {
        LaneReceiver {
            lane,
            receiver: self.sender(lane).subscribe(),
        }
    }

    fn sender(&self, lane: Lane) -> &broadcast::Sender<Diagnostic> {
        match lane {
            Lane::Bindings => &self.bindings,
            Lane::Alerts => &self.alerts,
        }
    }
}

impl Default for TraceBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A receiver bound to a single [`Lane`].
pub struct LaneReceiver {
    lane: Lane,
    receiver: broadcast::Receiver<Diagnostic>,
}

impl LaneReceiver {
    /// Wait for the next record on this lane.  Lagging is logged and skipped;
    /// returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Diagnostic> {
        loop {
            match self.receiver.recv().await {
                Ok(d) => return Some(d),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lane = ?self.lane, lagged_by = n, "diagnostics subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant for synchronous callers and tests.
    pub fn try_recv(&mut self) -> Option<Diagnostic> {
        loop {
            match self.receiver.try_recv() {
                Ok(d) => return Some(d),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(lane = ?self.lane, lagged_by = n, "diagnostics subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }
}
