//! Per-connection state

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One dashboard connection; closing cancels its timer and in-flight calls
#[derive(Debug)]
pub struct ConnectionSession {
    id: Uuid,
    opened_at: DateTime<Utc>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl ConnectionSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            opened_at: Utc::now(),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Token bound to this connection's lifetime
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Idempotent; returns true only for the call that closed the session
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            self.cancel.cancel();
        }
        first
    }
}

impl Default for ConnectionSession {
    fn default() -> Self {
        Self::new()
    }
}
