use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

const REASON_NONE: u8 = 0;
const REASON_REQUESTED: u8 = 1;
const REASON_DEADLINE: u8 = 2;

/// Why a turn was aborted. The first abort wins; later aborts keep the
/// original reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Requested,
    DeadlineExceeded,
}

/// Cancellation signal threaded through a turn: the orchestrator, the
/// fallback chain, and tool execution all select against it.
#[derive(Clone)]
pub struct TurnAbortSignal {
    inner: Arc<AbortInner>,
}

struct AbortInner {
    reason: AtomicU8,
    notify: Notify,
}

impl TurnAbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.inner.reason.load(Ordering::SeqCst) != REASON_NONE
    }

    pub fn reason(&self) -> Option<AbortReason> {
        match self.inner.reason.load(Ordering::SeqCst) {
            REASON_REQUESTED => Some(AbortReason::Requested),
            REASON_DEADLINE => Some(AbortReason::DeadlineExceeded),
            _ => None,
        }
    }

    pub async fn cancelled(&self) {
        if self.is_aborted() {
            return;
        }
        self.inner.notify.notified().await;
    }

    fn abort_with(&self, reason: u8) {
        if self
            .inner
            .reason
            .compare_exchange(REASON_NONE, reason, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.inner.notify.notify_waiters();
        }
    }
}

pub struct TurnAbortController {
    signal: TurnAbortSignal,
}

impl TurnAbortController {
    pub fn new() -> Self {
        Self {
            signal: TurnAbortSignal {
                inner: Arc::new(AbortInner {
                    reason: AtomicU8::new(REASON_NONE),
                    notify: Notify::new(),
                }),
            },
        }
    }

    pub fn signal(&self) -> TurnAbortSignal {
        self.signal.clone()
    }

    pub fn abort(&self) {
        self.signal.abort_with(REASON_REQUESTED);
    }

    /// Arms a turn deadline: when it elapses the turn aborts with
    /// `DeadlineExceeded`, unless it was already aborted.
    pub fn deadline(&self, after: Duration) {
        let signal = self.signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            signal.abort_with(REASON_DEADLINE);
        });
    }
}

impl Default for TurnAbortController {
    fn default() -> Self {
        Self::new()
    }
}
