// SPDX-License-Identifier: GPL-3.0-only

//! Bridge from engine threads to the session
//!
//! The engine calls [`EngineCallback`] from its own threads, sometimes while
//! a session command is still on the stack. The callback therefore never
//! touches session state: it queues an [`EngineMessage`] that the session's
//! dispatcher thread applies under the session lock.
//!
//! Samples are gated before they are copied. While the session is not
//! previewing the gate is closed and samples are dropped at the source.
//! At most [`MAX_QUEUED_SAMPLES`] copies wait in the queue at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace};

use super::MediaSample;
use super::types::{BackendResult, EngineEvent};
use crate::constants::pipeline::MAX_QUEUED_SAMPLES;

/// Message from the bridge to the dispatcher
#[derive(Debug)]
pub enum EngineMessage {
    Event { generation: u64, event: EngineEvent },
    Sample { generation: u64, data: Vec<u8> },
    /// Stop the dispatcher
    Shutdown,
}

/// Admission control for preview samples
#[derive(Debug, Default)]
pub struct SampleGate {
    open: AtomicBool,
    queued: AtomicUsize,
}

impl SampleGate {
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Reserve a queue slot, failing when the queue is full
    fn try_reserve(&self) -> bool {
        self.queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                (queued < MAX_QUEUED_SAMPLES).then_some(queued + 1)
            })
            .is_ok()
    }

    /// Release a slot once a queued sample has been handled
    pub fn release(&self) {
        let _ = self
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| queued.checked_sub(1));
    }
}

/// Callback handed to the engine on initialize
#[derive(Debug)]
pub struct EngineCallback {
    generation: u64,
    sender: UnboundedSender<EngineMessage>,
    gate: Arc<SampleGate>,
}

impl EngineCallback {
    pub(crate) fn new(generation: u64, sender: UnboundedSender<EngineMessage>, gate: Arc<SampleGate>) -> Self {
        Self {
            generation,
            sender,
            gate,
        }
    }

    /// Engine instance this callback belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Forward an engine event
    pub fn on_event(&self, event: EngineEvent) {
        trace!(generation = self.generation, kind = ?event.kind, "Engine event");
        let message = EngineMessage::Event {
            generation: self.generation,
            event,
        };
        if self.sender.send(message).is_err() {
            debug!(generation = self.generation, "Session gone, dropping engine event");
        }
    }

    /// Forward a preview sample
    ///
    /// The sample is locked, copied and unlocked before this returns. Dropped
    /// samples are not an error.
    pub fn on_sample(&self, sample: &dyn MediaSample) -> BackendResult<()> {
        if !self.gate.is_open() {
            return Ok(());
        }
        if !self.gate.try_reserve() {
            trace!("Dispatcher busy, dropping preview sample");
            return Ok(());
        }

        let mut data = Vec::new();
        let locked = sample.with_contiguous_buffer(&mut |bytes| data.extend_from_slice(bytes));
        if let Err(e) = locked {
            self.gate.release();
            return Err(e);
        }

        let message = EngineMessage::Sample {
            generation: self.generation,
            data,
        };
        if self.sender.send(message).is_err() {
            self.gate.release();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{BackendError, EngineEventKind};
    use tokio::sync::mpsc::unbounded_channel;

    struct Bytes(Vec<u8>);

    impl MediaSample for Bytes {
        fn with_contiguous_buffer(&self, f: &mut dyn FnMut(&[u8])) -> BackendResult<()> {
            f(&self.0);
            Ok(())
        }
    }

    struct Unlockable;

    impl MediaSample for Unlockable {
        fn with_contiguous_buffer(&self, _f: &mut dyn FnMut(&[u8])) -> BackendResult<()> {
            Err(BackendError::Other("lock failed".into()))
        }
    }

    #[test]
    fn events_carry_generation() {
        let (tx, mut rx) = unbounded_channel();
        let callback = EngineCallback::new(7, tx, Arc::default());

        callback.on_event(EngineEvent::succeeded(EngineEventKind::PhotoTaken));

        match rx.try_recv().unwrap() {
            EngineMessage::Event { generation, event } => {
                assert_eq!(generation, 7);
                assert_eq!(event.kind, EngineEventKind::PhotoTaken);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn closed_gate_drops_samples() {
        let (tx, mut rx) = unbounded_channel();
        let callback = EngineCallback::new(1, tx, Arc::default());

        callback.on_sample(&Bytes(vec![1, 2, 3, 4])).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn queue_is_bounded() {
        let (tx, mut rx) = unbounded_channel();
        let gate = Arc::new(SampleGate::default());
        gate.set_open(true);
        let callback = EngineCallback::new(1, tx, gate.clone());

        for _ in 0..MAX_QUEUED_SAMPLES + 3 {
            callback.on_sample(&Bytes(vec![0; 4])).unwrap();
        }

        let mut queued = 0;
        while rx.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, MAX_QUEUED_SAMPLES);

        gate.release();
        callback.on_sample(&Bytes(vec![0; 4])).unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn failed_lock_releases_slot() {
        let (tx, _rx) = unbounded_channel();
        let gate = Arc::new(SampleGate::default());
        gate.set_open(true);
        let callback = EngineCallback::new(1, tx, gate.clone());

        for _ in 0..MAX_QUEUED_SAMPLES + 1 {
            assert!(callback.on_sample(&Unlockable).is_err());
        }
        assert!(gate.try_reserve());
    }

    #[test]
    fn send_after_session_gone_is_ignored() {
        let (tx, rx) = unbounded_channel();
        drop(rx);
        let callback = EngineCallback::new(1, tx, Arc::default());
        callback.on_event(EngineEvent::succeeded(EngineEventKind::Initialized));
    }
}
