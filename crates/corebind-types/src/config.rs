//! Engine tunables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ProcessorId;

/// Tunables read by the runtime when it assembles an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bound on every synchronous service call to a remote processor.
    #[serde(default = "default_service_timeout_ms")]
    pub service_timeout_ms: u64,

    /// Number of command-channel slots that may be in flight per processor.
    #[serde(default = "default_channel_depth")]
    pub command_channel_depth: usize,

    /// Param FIFO depth used when a distributed bind does not ask for one.
    #[serde(default = "default_fifo_depth")]
    pub default_fifo_depth: usize,

    /// Event queue depth used when an asynchronous bind does not ask for one.
    #[serde(default = "default_event_queue_depth")]
    pub default_event_queue_depth: usize,

    /// DSP cores that get a command channel.
    #[serde(default = "default_dsp_processors")]
    pub dsp_processors: Vec<u8>,
}

fn default_service_timeout_ms() -> u64 {
    2000
}
fn default_channel_depth() -> usize {
    32
}
fn default_fifo_depth() -> usize {
    4
}
fn default_event_queue_depth() -> usize {
    8
}
fn default_dsp_processors() -> Vec<u8> {
    vec![1, 2]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service_timeout_ms: default_service_timeout_ms(),
            command_channel_depth: default_channel_depth(),
            default_fifo_depth: default_fifo_depth(),
            default_event_queue_depth: default_event_queue_depth(),
            dsp_processors: default_dsp_processors(),
        }
    }
}

impl EngineConfig {
    pub fn service_timeout(&self) -> Duration {
        Duration::from_millis(self.service_timeout_ms)
    }

    pub fn dsps(&self) -> impl Iterator<Item = ProcessorId> + '_ {
        self.dsp_processors
            .iter()
            .copied()
            .filter(|&p| p != 0)
            .map(ProcessorId)
    }
}
