// SPDX-License-Identifier: GPL-3.0-only

//! Outstanding caller requests, at most one per kind
//!
//! A request is registered here when the session accepts it and removed when
//! its outcome is known. Removal hands back the sender, so whichever path
//! takes the entry is the only one able to resolve it.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::errors::CaptureError;

/// Kind of a caller request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    CreateCamera,
    /// Start preview, resolved with the preview size
    Initialize,
    PausePreview,
    ResumePreview,
    StartRecord,
    StopRecord,
    TakePicture,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self {
            RequestKind::CreateCamera => "create camera",
            RequestKind::Initialize => "initialize",
            RequestKind::PausePreview => "pause preview",
            RequestKind::ResumePreview => "resume preview",
            RequestKind::StartRecord => "start recording",
            RequestKind::StopRecord => "stop recording",
            RequestKind::TakePicture => "take picture",
        };
        write!(f, "{}", action)
    }
}

/// Success payload of a resolved request
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Session identifier of a created camera
    CameraId(i64),
    /// Negotiated preview dimensions
    PreviewSize { width: f64, height: f64 },
    /// Output file written by a photo or a recording (empty when nothing was recorded)
    Path(PathBuf),
    Done,
}

/// Outcome delivered to the waiting caller
pub type Outcome = Result<Reply, CaptureError>;

/// Completion handle for one request
pub type PendingResult = oneshot::Sender<Outcome>;

/// Resolve a handle, tolerating a caller that stopped waiting
pub fn resolve(kind: RequestKind, result: PendingResult, outcome: Outcome) {
    if result.send(outcome).is_err() {
        debug!(%kind, "Caller no longer waiting for result");
    }
}

/// Ledger of outstanding requests keyed by kind
#[derive(Debug, Default)]
pub struct PendingResults {
    results: HashMap<RequestKind, PendingResult>,
}

impl PendingResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request.
    ///
    /// If a request of the same kind is outstanding, the new handle is
    /// resolved immediately with [`CaptureError::DuplicateRequest`], the
    /// existing entry is left untouched and `false` is returned.
    pub fn add(&mut self, kind: RequestKind, result: PendingResult) -> bool {
        if self.results.contains_key(&kind) {
            warn!(%kind, "Rejecting duplicate request");
            resolve(kind, result, Err(CaptureError::DuplicateRequest(kind)));
            return false;
        }
        self.results.insert(kind, result);
        true
    }

    /// Remove and return the handle for `kind`
    pub fn take(&mut self, kind: RequestKind) -> Option<PendingResult> {
        self.results.remove(&kind)
    }

    pub fn has(&self, kind: RequestKind) -> bool {
        self.results.contains_key(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Take the handle for `kind` and resolve it.
    ///
    /// Returns `false` when nothing was outstanding; the outcome is dropped.
    pub fn complete(&mut self, kind: RequestKind, outcome: Outcome) -> bool {
        match self.take(kind) {
            Some(result) => {
                resolve(kind, result, outcome);
                true
            }
            None => {
                debug!(%kind, ok = outcome.is_ok(), "No pending request for outcome");
                false
            }
        }
    }

    /// Resolve every outstanding request with [`CaptureError::Disposed`]
    pub fn clear_all(&mut self) {
        for (kind, result) in self.results.drain() {
            resolve(kind, result, Err(CaptureError::Disposed));
        }
    }
}

impl Drop for PendingResults {
    fn drop(&mut self) {
        self.clear_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (PendingResult, oneshot::Receiver<Outcome>) {
        oneshot::channel()
    }

    #[test]
    fn duplicate_resolves_new_handle_only() {
        let mut ledger = PendingResults::new();
        let (first, mut first_rx) = handle();
        let (second, mut second_rx) = handle();

        assert!(ledger.add(RequestKind::TakePicture, first));
        assert!(!ledger.add(RequestKind::TakePicture, second));

        assert_eq!(
            second_rx.try_recv().unwrap(),
            Err(CaptureError::DuplicateRequest(RequestKind::TakePicture))
        );
        assert!(first_rx.try_recv().is_err());
        assert!(ledger.has(RequestKind::TakePicture));

        assert!(ledger.complete(RequestKind::TakePicture, Ok(Reply::Done)));
        assert_eq!(first_rx.try_recv().unwrap(), Ok(Reply::Done));
    }

    #[test]
    fn take_returns_handle_once() {
        let mut ledger = PendingResults::new();
        let (result, _rx) = handle();
        ledger.add(RequestKind::StopRecord, result);

        assert!(ledger.take(RequestKind::StopRecord).is_some());
        assert!(ledger.take(RequestKind::StopRecord).is_none());
        assert!(!ledger.has(RequestKind::StopRecord));
    }

    #[test]
    fn kinds_are_independent() {
        let mut ledger = PendingResults::new();
        let (a, _a_rx) = handle();
        let (b, _b_rx) = handle();

        assert!(ledger.add(RequestKind::StartRecord, a));
        assert!(ledger.add(RequestKind::TakePicture, b));
        assert!(ledger.has(RequestKind::StartRecord));
        assert!(ledger.has(RequestKind::TakePicture));
    }

    #[test]
    fn complete_without_entry_is_dropped() {
        let mut ledger = PendingResults::new();
        assert!(!ledger.complete(RequestKind::PausePreview, Ok(Reply::Done)));
    }

    #[test]
    fn clear_all_disposes_everything() {
        let mut ledger = PendingResults::new();
        let (a, mut a_rx) = handle();
        let (b, mut b_rx) = handle();
        ledger.add(RequestKind::Initialize, a);
        ledger.add(RequestKind::StopRecord, b);

        ledger.clear_all();

        assert!(ledger.is_empty());
        assert_eq!(a_rx.try_recv().unwrap(), Err(CaptureError::Disposed));
        assert_eq!(b_rx.try_recv().unwrap(), Err(CaptureError::Disposed));

        ledger.clear_all();
        assert!(ledger.is_empty());
    }

    #[test]
    fn resolving_after_receiver_dropped_is_harmless() {
        let mut ledger = PendingResults::new();
        let (result, rx) = handle();
        ledger.add(RequestKind::TakePicture, result);
        drop(rx);
        assert!(ledger.complete(RequestKind::TakePicture, Ok(Reply::Done)));
    }
}
