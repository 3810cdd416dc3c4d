//! Dispatches a classified connection to its registered handler, or closes
//! it. Keeps read-only counters for observability.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use thiserror::Error;

use crate::protocol::detector::ProtocolVersion;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("no handler registered for this protocol version")]
    NoHandlerRegistered,
    #[error("router is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RouterSnapshot {
    pub v1: u64,
    pub v2: u64,
    pub failed: u64,
}

/// Only v1 has a real handler in this crate; v2 is recognized for
/// classification but has no handler registered, matching the spec's note
/// that v2 decoding is out of detailed scope.
pub struct Router {
    v1_registered: bool,
    v2_registered: bool,
    v1_count: AtomicU64,
    v2_count: AtomicU64,
    failed_count: AtomicU64,
    closed: AtomicBool,
}

impl Router {
    pub fn new(v1_registered: bool, v2_registered: bool) -> Self {
        Self {
            v1_registered,
            v2_registered,
            v1_count: AtomicU64::new(0),
            v2_count: AtomicU64::new(0),
            failed_count: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Classify-and-record: returns `Ok(())` if a handler exists for
    /// `version`, incrementing its counter; otherwise records a failed
    /// route and returns the reason.
    pub fn route(&self, version: ProtocolVersion) -> Result<(), RouteError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RouteError::Closed);
        }

        match version {
            ProtocolVersion::V1 if self.v1_registered => {
                self.v1_count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            ProtocolVersion::V2 if self.v2_registered => {
                self.v2_count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            _ => {
                self.failed_count.fetch_add(1, Ordering::Relaxed);
                Err(RouteError::NoHandlerRegistered)
            }
        }
    }

    pub fn record_failed_detection(&self) {
        self.failed_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RouterSnapshot {
        RouterSnapshot {
            v1: self.v1_count.load(Ordering::Relaxed),
            v2: self.v2_count.load(Ordering::Relaxed),
            failed: self.failed_count.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Idempotent: marks the router closed and rejects further routes.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(true, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_v1_when_registered() {
        let router = Router::new(true, false);
        assert!(router.route(ProtocolVersion::V1).is_ok());
        assert_eq!(router.snapshot().v1, 1);
    }

    #[test]
    fn unregistered_v2_fails_and_counts_toward_failed() {
        let router = Router::new(true, false);
        let err = router.route(ProtocolVersion::V2).unwrap_err();
        assert_eq!(err, RouteError::NoHandlerRegistered);
        assert_eq!(router.snapshot().failed, 1);
    }

    #[test]
    fn unknown_version_always_fails() {
        let router = Router::new(true, true);
        assert!(router.route(ProtocolVersion::Unknown).is_err());
    }

    #[test]
    fn close_is_idempotent_and_rejects_further_routes() {
        let router = Router::new(true, false);
        router.close();
        router.close();
        assert!(router.is_closed());
        assert_eq!(router.route(ProtocolVersion::V1).unwrap_err(), RouteError::Closed);
    }
}
