//! The [`ProcessorLink`] collaborator: the mailbox hardware that carries
//! service messages from the host to a DSP core and acknowledgments back.

use std::sync::Arc;

use corebind_types::{ComponentId, ProcessorId};
use serde::{Deserialize, Serialize};

/// Control requests a remote processor answers synchronously.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceRequest {
    /// Run the constructor of a freshly loaded instance.
    Construct { component: ComponentId, this: u32 },
    Start { component: ComponentId },
    Stop { component: ComponentId },
    /// Run the destructor before the loader frees the instance.
    Destroy { component: ComponentId },
    /// Keep the processor awake until the matching [`ServiceRequest::AllowSleep`].
    ForceWake,
    AllowSleep,
    /// Answered once every earlier request on the channel has been handled.
    Flush,
}

/// Outcome reported by the remote processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceReply {
    Done,
    Failed(String),
}

/// One request written into a command channel slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMessage {
    pub seq: u64,
    pub request: ServiceRequest,
}

/// Receiving end of acknowledgments for one command channel.
pub trait ReplySink: Send + Sync {
    /// Deliver the reply to request `seq` and free its channel slot.
    fn acknowledge(&self, seq: u64, reply: ServiceReply);
}

/// Inter-processor mailbox of the platform.
pub trait ProcessorLink: Send + Sync {
    /// Hand `message` to `processor`.  The processor answers, possibly from
    /// another thread and possibly never, through `replies`.
    fn post(&self, processor: ProcessorId, message: ServiceMessage, replies: Arc<dyn ReplySink>);

    /// Raise the diagnostic interrupt that tells `processor` it has been
    /// declared unusable.
    fn signal_panic(&self, processor: ProcessorId);
}
