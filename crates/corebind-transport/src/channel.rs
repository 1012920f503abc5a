//! Command channels – synchronous service calls from the host to DSP cores.
//!
//! Each DSP processor has one [`CommandChannel`] with a fixed number of slots.
//! A caller acquires a slot, posts its [`ServiceRequest`] through the
//! platform [`ProcessorLink`] and waits for the acknowledgment, which frees
//! the slot.  Posts on one channel are serialised.
//!
//! # Unresponsive processors
//!
//! Every wait is bounded by the configured service timeout.  When it expires
//! the processor is declared [`ProcessorState::Panicked`]: the platform panic
//! interrupt is raised, a [`Diagnostic::ProcessorPanic`] is published, and
//! every later call to that processor fails fast with
//! [`BindError::PeerUnresponsive`].
//!
//! Calls addressed to the host processor are local no-ops.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use corebind_hal::{ProcessorLink, ReplySink, ServiceMessage, ServiceReply, ServiceRequest};
use corebind_types::{BindError, Diagnostic, EngineConfig, ProcessorId};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::bus::TraceBus;

/// Health of a remote processor as seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Ready,
    Panicked,
}

enum Acquire {
    Acquired,
    Full,
    Closed,
    TimedOut,
}

/// Counting semaphore over the channel slots.
struct Slots {
    free: Mutex<usize>,
    closed: AtomicBool,
    released: Condvar,
}

impl Slots {
    fn new(depth: usize) -> Self {
        Self {
            free: Mutex::new(depth),
            closed: AtomicBool::new(false),
            released: Condvar::new(),
        }
    }

    fn acquire(&self, wait: bool, deadline: Instant) -> Acquire {
        let mut free = self.free.lock();
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Acquire::Closed;
            }
            if *free > 0 {
                *free -= 1;
                return Acquire::Acquired;
            }
            if !wait {
                return Acquire::Full;
            }
            if self.released.wait_until(&mut free, deadline).timed_out() {
                return Acquire::TimedOut;
            }
        }
    }

    fn release(&self) {
        *self.free.lock() += 1;
        self.released.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _guard = self.free.lock();
        self.released.notify_all();
    }
}

#[derive(Default)]
struct Replies {
    /// Outstanding sequence numbers and, once acknowledged, their replies.
    pending: HashMap<u64, Option<ServiceReply>>,
    /// Requests whose caller gave up; they still hold a slot.
    abandoned: HashSet<u64>,
}

/// Reply side of a channel, handed to the link with every post.
struct Mailbox {
    replies: Mutex<Replies>,
    arrived: Condvar,
    slots: Slots,
}

impl ReplySink for Mailbox {
    /// Only the first acknowledgment of an outstanding or abandoned request
    /// frees its slot.
    fn acknowledge(&self, seq: u64, reply: ServiceReply) {
        let frees_slot = {
            let mut guard = self.replies.lock();
            let replies = &mut *guard;
            let frees_slot = match replies.pending.get_mut(&seq) {
                Some(entry) if entry.is_none() => {
                    *entry = Some(reply);
                    true
                }
                Some(_) => {
                    warn!(seq, "duplicate acknowledgment ignored");
                    false
                }
                None if replies.abandoned.remove(&seq) => {
                    debug!(seq, "late acknowledgment dropped");
                    true
                }
                None => {
                    warn!(seq, "acknowledgment of unknown request ignored");
                    false
                }
            };
            self.arrived.notify_all();
            frees_slot
        };
        if frees_slot {
            self.slots.release();
        }
    }
}

/// Channel to one DSP processor.
pub struct CommandChannel {
    processor: ProcessorId,
    depth: usize,
    timeout: Duration,
    link: Arc<dyn ProcessorLink>,
    mailbox: Arc<Mailbox>,
    /// Serialises writes into the channel; holds the last sequence number.
    writer: Mutex<u64>,
    panicked: AtomicBool,
    bus: TraceBus,
}

impl CommandChannel {
    pub fn new(
        processor: ProcessorId,
        depth: usize,
        timeout: Duration,
        link: Arc<dyn ProcessorLink>,
        bus: TraceBus,
    ) -> Self {
        Self {
            processor,
            depth,
            timeout,
            link,
            mailbox: Arc::new(Mailbox {
                replies: Mutex::new(Replies::default()),
                arrived: Condvar::new(),
                slots: Slots::new(depth.max(1)),
            }),
            writer: Mutex::new(0),
            panicked: AtomicBool::new(false),
            bus,
        }
    }

    pub fn processor(&self) -> ProcessorId {
        self.processor
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn state(&self) -> ProcessorState {
        if self.panicked.load(Ordering::Acquire) {
            ProcessorState::Panicked
        } else {
            ProcessorState::Ready
        }
    }

    /// Requests posted and not yet acknowledged or abandoned.
    pub fn outstanding(&self) -> usize {
        self.mailbox.replies.lock().pending.len()
    }

    /// Post `request` and wait for its acknowledgment.
    ///
    /// With `wait_for_slot == false` a full channel fails immediately with
    /// [`BindError::ChannelOverflow`].  Otherwise the caller waits for a free
    /// slot, bounded by the service timeout like the reply itself.
    ///
    /// # Errors
    ///
    /// - [`BindError::PeerUnresponsive`] – the processor timed out now or
    ///   earlier.
    /// - [`BindError::ChannelOverflow`] – no free slot and `wait_for_slot`
    ///   is false.
    /// - [`BindError::ChannelClosed`] – the channel was shut down.
    /// - [`BindError::IllegalBinding`] – the processor rejected the request.
    pub fn service_call(
        &self,
        request: ServiceRequest,
        wait_for_slot: bool,
    ) -> Result<(), BindError> {
        if self.state() == ProcessorState::Panicked {
            return Err(BindError::PeerUnresponsive(self.processor));
        }
        let deadline = Instant::now() + self.timeout;
        match self.mailbox.slots.acquire(wait_for_slot, deadline) {
            Acquire::Acquired => {}
            Acquire::Full => return Err(BindError::ChannelOverflow(self.processor)),
            Acquire::Closed => {
                return Err(if self.state() == ProcessorState::Panicked {
                    BindError::PeerUnresponsive(self.processor)
                } else {
                    BindError::ChannelClosed(format!("command channel to {}", self.processor))
                });
            }
            Acquire::TimedOut => {
                self.declare_panic(format!("no free slot after {:?}", self.timeout));
                return Err(BindError::PeerUnresponsive(self.processor));
            }
        }

        let seq = {
            let mut writer = self.writer.lock();
            *writer += 1;
            let seq = *writer;
            self.mailbox.replies.lock().pending.insert(seq, None);
            debug!(processor = %self.processor, seq, ?request, "service call posted");
            self.link.post(
                self.processor,
                ServiceMessage { seq, request: request.clone() },
                self.mailbox.clone(),
            );
            seq
        };

        let reply = {
            let mut replies = self.mailbox.replies.lock();
            loop {
                if let Some(Some(_)) = replies.pending.get(&seq) {
                    break replies.pending.remove(&seq).flatten();
                }
                if self.mailbox.arrived.wait_until(&mut replies, deadline).timed_out() {
                    replies.pending.remove(&seq);
                    replies.abandoned.insert(seq);
                    break None;
                }
            }
        };

        match reply {
            Some(ServiceReply::Done) => Ok(()),
            Some(ServiceReply::Failed(reason)) => {
                warn!(processor = %self.processor, ?request, %reason, "service call failed");
                Err(BindError::IllegalBinding(format!(
                    "{} rejected {request:?}: {reason}",
                    self.processor
                )))
            }
            None => {
                self.declare_panic(format!("{request:?} not acknowledged within {:?}", self.timeout));
                Err(BindError::PeerUnresponsive(self.processor))
            }
        }
    }

    /// Post a [`ServiceRequest::Flush`] so every earlier request is answered,
    /// then close the channel.
    pub fn shutdown(&self) -> Result<(), BindError> {
        let result = match self.state() {
            ProcessorState::Ready => self.service_call(ServiceRequest::Flush, true),
            ProcessorState::Panicked => Ok(()),
        };
        self.mailbox.slots.close();
        info!(processor = %self.processor, "command channel closed");
        result
    }

    fn declare_panic(&self, reason: String) {
        if self.panicked.swap(true, Ordering::AcqRel) {
            return;
        }
        error!(processor = %self.processor, %reason, "processor unresponsive, declared panicked");
        self.link.signal_panic(self.processor);
        self.mailbox.slots.close();
        self.bus.publish(Diagnostic::ProcessorPanic {
            processor: self.processor,
            timestamp: Utc::now(),
            reason,
        });
    }
}

/// Command channels of every configured DSP processor.
pub struct ChannelRegistry {
    channels: HashMap<ProcessorId, Arc<CommandChannel>>,
}

impl ChannelRegistry {
    /// Open one channel per DSP listed in `config`.
    pub fn new(config: &EngineConfig, link: Arc<dyn ProcessorLink>, bus: TraceBus) -> Self {
        let channels = config
            .dsps()
            .into_iter()
            .map(|processor| {
                let channel = CommandChannel::new(
                    processor,
                    config.command_channel_depth,
                    config.service_timeout(),
                    link.clone(),
                    bus.clone(),
                );
                (processor, Arc::new(channel))
            })
            .collect();
        Self { channels }
    }

    /// # Errors
    ///
    /// [`BindError::UnknownProcessor`] when no channel exists for `processor`.
    pub fn channel(&self, processor: ProcessorId) -> Result<&Arc<CommandChannel>, BindError> {
        self.channels
            .get(&processor)
            .ok_or(BindError::UnknownProcessor(processor))
    }

    /// Configured DSP processors, in ascending order.
    pub fn processors(&self) -> Vec<ProcessorId> {
        let mut processors: Vec<_> = self.channels.keys().copied().collect();
        processors.sort();
        processors
    }

    /// Whether `processor` is the host or a configured DSP.
    pub fn knows(&self, processor: ProcessorId) -> bool {
        processor.is_host() || self.channels.contains_key(&processor)
    }

    /// Run `request` on `processor`, waiting for a slot if needed.  A no-op
    /// on the host.
    pub fn service_call(
        &self,
        processor: ProcessorId,
        request: ServiceRequest,
    ) -> Result<(), BindError> {
        if processor.is_host() {
            return Ok(());
        }
        self.channel(processor)?.service_call(request, true)
    }

    pub fn state(&self, processor: ProcessorId) -> Result<ProcessorState, BindError> {
        if processor.is_host() {
            return Ok(ProcessorState::Ready);
        }
        Ok(self.channel(processor)?.state())
    }

    /// Flush and close every channel.  All channels are closed even when one
    /// of them fails; the first error is returned.
    pub fn shutdown(&self) -> Result<(), BindError> {
        let mut first_error = None;
        for processor in self.processors() {
            if let Err(e) = self.channels[&processor].shutdown() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Lane;
    use corebind_hal::{LinkBehaviour, SimPlatform};
    use corebind_types::ComponentId;
    use std::thread;

    const DSP: ProcessorId = ProcessorId(1);

    fn config(timeout_ms: u64, depth: usize) -> EngineConfig {
        EngineConfig {
            service_timeout_ms: timeout_ms,
            command_channel_depth: depth,
            ..EngineConfig::default()
        }
    }

    fn registry(p: &Arc<SimPlatform>, timeout_ms: u64, depth: usize) -> ChannelRegistry {
        ChannelRegistry::new(&config(timeout_ms, depth), p.clone(), TraceBus::default())
    }

    #[test]
    fn responsive_processor_acknowledges() {
        let p = SimPlatform::builder().build();
        let reg = registry(&p, 500, 4);
        reg.service_call(DSP, ServiceRequest::Start { component: ComponentId(3) })
            .unwrap();
        assert_eq!(
            p.posted(),
            vec![(DSP, ServiceRequest::Start { component: ComponentId(3) })]
        );
        assert_eq!(reg.channel(DSP).unwrap().outstanding(), 0);
    }

    #[test]
    fn host_calls_are_local() {
        let p = SimPlatform::builder().build();
        let reg = registry(&p, 500, 4);
        reg.service_call(ProcessorId::HOST, ServiceRequest::ForceWake).unwrap();
        assert!(p.posted().is_empty());
        assert_eq!(reg.state(ProcessorId::HOST).unwrap(), ProcessorState::Ready);
    }

    #[test]
    fn unknown_processor_is_rejected() {
        let p = SimPlatform::builder().build();
        let reg = registry(&p, 500, 4);
        assert!(matches!(
            reg.service_call(ProcessorId(9), ServiceRequest::Flush),
            Err(BindError::UnknownProcessor(ProcessorId(9)))
        ));
        assert!(!reg.knows(ProcessorId(9)));
        assert!(reg.knows(DSP));
    }

    #[test]
    fn timeout_declares_panic_and_later_calls_fail_fast() {
        let p = SimPlatform::builder().build();
        p.set_behaviour(DSP, LinkBehaviour::Unresponsive);
        let bus = TraceBus::default();
        let mut alerts = bus.subscribe(Lane::Alerts);
        let reg = ChannelRegistry::new(&config(50, 4), p.clone(), bus);

        let started = Instant::now();
        assert!(matches!(
            reg.service_call(DSP, ServiceRequest::ForceWake),
            Err(BindError::PeerUnresponsive(DSP))
        ));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(reg.state(DSP).unwrap(), ProcessorState::Panicked);
        assert_eq!(p.panicked(), vec![DSP]);
        assert!(matches!(alerts.try_recv(), Some(Diagnostic::ProcessorPanic { processor, .. }) if processor == DSP));

        let posted_before = p.posted().len();
        let started = Instant::now();
        assert!(matches!(
            reg.service_call(DSP, ServiceRequest::AllowSleep),
            Err(BindError::PeerUnresponsive(DSP))
        ));
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(p.posted().len(), posted_before);
        // The other DSP is unaffected.
        reg.service_call(ProcessorId(2), ServiceRequest::Flush).unwrap();
    }

    #[test]
    fn full_channel_without_waiting_overflows() {
        let p = SimPlatform::builder().build();
        p.set_behaviour(DSP, LinkBehaviour::Deferred);
        let reg = Arc::new(registry(&p, 2_000, 1));

        let pending = {
            let reg = reg.clone();
            thread::spawn(move || reg.service_call(DSP, ServiceRequest::ForceWake))
        };
        while p.posted().is_empty() {
            thread::yield_now();
        }
        let channel = reg.channel(DSP).unwrap();
        assert!(matches!(
            channel.service_call(ServiceRequest::AllowSleep, false),
            Err(BindError::ChannelOverflow(DSP))
        ));

        assert_eq!(p.release_deferred(), 1);
        pending.join().unwrap().unwrap();
        assert_eq!(channel.state(), ProcessorState::Ready);
    }

    /// Acknowledges the first message twice and holds every later one.
    #[derive(Default)]
    struct EchoingLink {
        posts: Mutex<usize>,
        held: Mutex<Vec<(u64, Arc<dyn ReplySink>)>>,
    }

    impl ProcessorLink for EchoingLink {
        fn post(&self, _: ProcessorId, message: ServiceMessage, replies: Arc<dyn ReplySink>) {
            let first = {
                let mut posts = self.posts.lock();
                *posts += 1;
                *posts == 1
            };
            if first {
                replies.acknowledge(message.seq, ServiceReply::Done);
                replies.acknowledge(message.seq, ServiceReply::Done);
            } else {
                self.held.lock().push((message.seq, replies));
            }
        }

        fn signal_panic(&self, _: ProcessorId) {}
    }

    #[test]
    fn repeated_acknowledgments_do_not_add_slots() {
        let link = Arc::new(EchoingLink::default());
        let channel = Arc::new(CommandChannel::new(
            DSP,
            1,
            Duration::from_secs(2),
            link.clone(),
            TraceBus::default(),
        ));
        channel.service_call(ServiceRequest::Flush, false).unwrap();
        // A stray answer to a request that was never posted.
        channel.mailbox.acknowledge(77, ServiceReply::Done);

        let pending = {
            let channel = channel.clone();
            thread::spawn(move || channel.service_call(ServiceRequest::ForceWake, false))
        };
        while link.held.lock().is_empty() {
            thread::yield_now();
        }
        assert!(matches!(
            channel.service_call(ServiceRequest::AllowSleep, false),
            Err(BindError::ChannelOverflow(DSP))
        ));
        assert_eq!(*link.posts.lock(), 2);

        let (seq, replies) = link.held.lock().pop().unwrap();
        replies.acknowledge(seq, ServiceReply::Done);
        pending.join().unwrap().unwrap();
        assert_eq!(channel.outstanding(), 0);
        assert_eq!(*channel.mailbox.slots.free.lock(), 1);
    }

    #[test]
    fn late_acknowledgment_frees_the_abandoned_slot() {
        let p = SimPlatform::builder().build();
        p.set_behaviour(DSP, LinkBehaviour::Deferred);
        let channel = CommandChannel::new(
            DSP,
            1,
            Duration::from_millis(20),
            p.clone(),
            TraceBus::default(),
        );
        assert!(matches!(
            channel.service_call(ServiceRequest::Flush, false),
            Err(BindError::PeerUnresponsive(DSP))
        ));
        assert_eq!(*channel.mailbox.slots.free.lock(), 0);
        assert_eq!(p.release_deferred(), 1);
        assert_eq!(*channel.mailbox.slots.free.lock(), 1);
    }

    #[test]
    fn waiting_caller_gets_slot_after_acknowledgment() {
        let p = SimPlatform::builder().build();
        p.set_behaviour(DSP, LinkBehaviour::Deferred);
        let reg = Arc::new(registry(&p, 2_000, 1));

        let callers: Vec<_> = (0..2)
            .map(|_| {
                let reg = reg.clone();
                thread::spawn(move || reg.service_call(DSP, ServiceRequest::Flush))
            })
            .collect();

        let mut released = 0;
        while released < 2 {
            released += p.release_deferred();
            thread::yield_now();
        }
        for caller in callers {
            caller.join().unwrap().unwrap();
        }
        assert_eq!(p.posted().len(), 2);
    }

    #[test]
    fn shutdown_flushes_and_closes() {
        let p = SimPlatform::builder().build();
        let reg = registry(&p, 500, 4);
        reg.shutdown().unwrap();
        let flushes = p
            .posted()
            .iter()
            .filter(|(_, r)| *r == ServiceRequest::Flush)
            .count();
        assert_eq!(flushes, 2);
        assert!(matches!(
            reg.service_call(DSP, ServiceRequest::ForceWake),
            Err(BindError::ChannelClosed(_))
        ));
    }

    #[test]
    fn shutdown_skips_panicked_processor() {
        let p = SimPlatform::builder().build();
        p.set_behaviour(DSP, LinkBehaviour::Unresponsive);
        let reg = registry(&p, 20, 4);
        let _ = reg.service_call(DSP, ServiceRequest::ForceWake);
        let posted = p.posted().len();
        reg.shutdown().unwrap();
        // Only the healthy DSP got a flush.
        assert_eq!(p.posted().len(), posted + 1);
    }
}
