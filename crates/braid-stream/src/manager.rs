use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use braid_events::{BraidErrorCode, Event, EventKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::frame::{CloseReason, Frame};
use crate::ring::EventRing;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub buffer_capacity: usize,
    pub heartbeat_interval: Duration,
    pub retry_hint_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 256,
            heartbeat_interval: Duration::from_secs(15),
            retry_hint_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    UnknownSession(String),
}

impl Display for StreamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::UnknownSession(session_id) => {
                write!(f, "unknown session '{session_id}'")
            }
        }
    }
}

impl std::error::Error for StreamError {}

struct LiveConnection {
    connection_id: u64,
    sender: mpsc::UnboundedSender<Frame>,
    heartbeat: JoinHandle<()>,
}

impl LiveConnection {
    fn close(self, reason: CloseReason) {
        let _ = self.sender.send(Frame::Close { reason });
        self.heartbeat.abort();
    }
}

struct SessionEntry {
    ring: EventRing,
    next_sequence: u64,
    live: Option<LiveConnection>,
}

impl SessionEntry {
    fn new(capacity: usize) -> Self {
        Self {
            ring: EventRing::new(capacity),
            next_sequence: 1,
            live: None,
        }
    }

    /// Assigns the next sequence id, buffers the event, and forwards it to
    /// the live connection if one is attached. Never blocks; a dead
    /// receiver tears the connection down while the buffer survives.
    fn enqueue(&mut self, kind: EventKind) -> u64 {
        let sequence_id = self.next_sequence;
        self.next_sequence += 1;
        let event = Event {
            sequence_id,
            kind,
            created_at: now_millis(),
        };
        self.ring.push(event.clone());

        if let Some(live) = &self.live {
            if live.sender.send(Frame::Event { event }).is_err() {
                let connection_id = live.connection_id;
                if let Some(dead) = self.live.take() {
                    dead.heartbeat.abort();
                }
                debug!(connection_id, "live connection unreachable, torn down");
            }
        }
        sequence_id
    }
}

/// Owns every session's connection buffer and at most one live connection
/// per session. `push` is safe to call from any task.
pub struct StreamManager {
    config: StreamConfig,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    next_connection_id: AtomicU64,
}

impl StreamManager {
    pub fn new(config: StreamConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
        })
    }

    /// Idempotent; the buffer lives until `end_session`, across any number
    /// of client connections.
    pub fn open_session(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().expect("session table mutex poisoned");
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry::new(self.config.buffer_capacity));
    }

    pub fn end_session(&self, session_id: &str) {
        let removed = {
            let mut sessions = self.sessions.lock().expect("session table mutex poisoned");
            sessions.remove(session_id)
        };
        if let Some(mut entry) = removed {
            if let Some(live) = entry.live.take() {
                live.close(CloseReason::SessionEnded);
            }
        }
    }

    pub fn session_exists(&self, session_id: &str) -> bool {
        let sessions = self.sessions.lock().expect("session table mutex poisoned");
        sessions.contains_key(session_id)
    }

    /// The sequence id the next pushed event will receive.
    pub fn next_sequence(&self, session_id: &str) -> Option<u64> {
        let sessions = self.sessions.lock().expect("session table mutex poisoned");
        sessions.get(session_id).map(|entry| entry.next_sequence)
    }

    /// Accepts a (re)connection for a session, preempting any prior live
    /// connection. With a `last_event_id` still inside the buffer, the
    /// newer buffered events are replayed before live delivery; a cursor
    /// older than the buffer window yields a single non-recoverable
    /// `GapDetected` error event, then delivery continues live.
    pub fn attach(&self, session_id: &str, last_event_id: Option<u64>) -> ConnectionHandle {
        let mut sessions = self.sessions.lock().expect("session table mutex poisoned");
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry::new(self.config.buffer_capacity));

        if let Some(previous) = entry.live.take() {
            debug!(
                session_id,
                previous_connection_id = previous.connection_id,
                "live connection preempted by a newer attach"
            );
            previous.close(CloseReason::Preempted);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);

        // Retry hint goes out once, before anything else on the stream.
        let _ = sender.send(Frame::RetryHint {
            retry_ms: self.config.retry_hint_ms,
        });

        let mut gap_detected = false;
        if let Some(cursor) = last_event_id {
            if entry.ring.covers(cursor) {
                for event in entry.ring.replay_after(cursor) {
                    let _ = sender.send(Frame::Event {
                        event: event.clone(),
                    });
                }
            } else {
                warn!(
                    session_id,
                    cursor,
                    oldest_buffered = entry.ring.oldest_id().unwrap_or(0),
                    "resumption cursor predates buffer window"
                );
                gap_detected = true;
            }
        }

        let heartbeat = spawn_heartbeat(sender.clone(), self.config.heartbeat_interval);
        entry.live = Some(LiveConnection {
            connection_id,
            sender,
            heartbeat,
        });

        if gap_detected {
            // Sequenced through the normal path so ordering invariants
            // hold for this and any later resume.
            entry.enqueue(EventKind::Error {
                message: "resumption cursor predates the buffered window".to_string(),
                code: BraidErrorCode::GapDetected,
                recoverable: false,
            });
        }

        ConnectionHandle {
            connection_id,
            receiver,
        }
    }

    /// Appends an event to the session's buffer and forwards it to the
    /// live connection, if any. Returns the assigned sequence id.
    pub fn push(&self, session_id: &str, kind: EventKind) -> Result<u64, StreamError> {
        let mut sessions = self.sessions.lock().expect("session table mutex poisoned");
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| StreamError::UnknownSession(session_id.to_string()))?;
        Ok(entry.enqueue(kind))
    }
}

pub struct ConnectionHandle {
    connection_id: u64,
    receiver: mpsc::UnboundedReceiver<Frame>,
}

impl ConnectionHandle {
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub async fn next(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }

    pub fn try_next(&mut self) -> Option<Frame> {
        self.receiver.try_recv().ok()
    }
}

fn spawn_heartbeat(sender: mpsc::UnboundedSender<Frame>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The immediate first tick would race the retry hint.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if sender.send(Frame::Heartbeat).is_err() {
                break;
            }
        }
    })
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(text: &str) -> EventKind {
        EventKind::Token {
            text: text.to_string(),
        }
    }

    fn manager() -> Arc<StreamManager> {
        StreamManager::new(StreamConfig {
            buffer_capacity: 4,
            heartbeat_interval: Duration::from_secs(600),
            retry_hint_ms: 3_000,
        })
    }

    #[tokio::test]
    async fn push_assigns_strictly_increasing_sequence_ids() {
        let manager = manager();
        manager.open_session("s");
        let first = manager.push("s", token("a")).expect("session is open");
        let second = manager.push("s", token("b")).expect("session is open");
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn push_to_unknown_session_is_an_error() {
        let manager = manager();
        assert!(manager.push("nope", token("a")).is_err());
    }

    #[tokio::test]
    async fn attach_sends_retry_hint_first() {
        let manager = manager();
        let mut handle = manager.attach("s", None);
        assert_eq!(
            handle.next().await,
            Some(Frame::RetryHint { retry_ms: 3_000 })
        );
    }

    #[tokio::test]
    async fn live_events_are_forwarded_in_order() {
        let manager = manager();
        let mut handle = manager.attach("s", None);
        let _ = handle.next().await; // retry hint
        manager.push("s", token("a")).expect("session is open");
        manager.push("s", token("b")).expect("session is open");

        let ids: Vec<u64> = [handle.next().await, handle.next().await]
            .into_iter()
            .filter_map(|frame| match frame {
                Some(Frame::Event { event }) => Some(event.sequence_id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn resume_replays_exactly_the_events_after_the_cursor() {
        let manager = manager();
        manager.open_session("s");
        for text in ["a", "b", "c"] {
            manager.push("s", token(text)).expect("session is open");
        }

        let mut handle = manager.attach("s", Some(1));
        let _ = handle.next().await; // retry hint
        let mut replayed = Vec::new();
        while let Some(Frame::Event { event }) = handle.try_next() {
            replayed.push(event.sequence_id);
        }
        assert_eq!(replayed, vec![2, 3]);
    }

    #[tokio::test]
    async fn stale_cursor_yields_a_single_gap_error_then_continues_live() {
        let manager = manager();
        manager.open_session("s");
        // Capacity 4; six events leave 3..=6 buffered.
        for text in ["a", "b", "c", "d", "e", "f"] {
            manager.push("s", token(text)).expect("session is open");
        }

        let mut handle = manager.attach("s", Some(1));
        let _ = handle.next().await; // retry hint
        let gap = handle.next().await;
        match gap {
            Some(Frame::Event { event }) => match event.kind {
                EventKind::Error {
                    code, recoverable, ..
                } => {
                    assert_eq!(code, BraidErrorCode::GapDetected);
                    assert!(!recoverable);
                }
                other => panic!("expected gap error, got {other:?}"),
            },
            other => panic!("expected gap error frame, got {other:?}"),
        }

        manager.push("s", token("g")).expect("session is open");
        match handle.next().await {
            Some(Frame::Event { event }) => {
                assert_eq!(event.kind, token("g"));
            }
            other => panic!("expected live event after gap, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_attach_preempts_the_first_connection() {
        let manager = manager();
        let mut first = manager.attach("s", None);
        let _ = first.next().await; // retry hint
        let mut second = manager.attach("s", None);
        let _ = second.next().await; // retry hint

        assert_eq!(
            first.next().await,
            Some(Frame::Close {
                reason: CloseReason::Preempted
            })
        );
        manager.push("s", token("a")).expect("session is open");
        assert!(matches!(
            second.next().await,
            Some(Frame::Event { .. })
        ));
    }

    #[tokio::test]
    async fn dropped_receiver_tears_down_live_but_preserves_the_buffer() {
        let manager = manager();
        let handle = manager.attach("s", None);
        drop(handle);

        manager.push("s", token("a")).expect("session is open");
        manager.push("s", token("b")).expect("session is open");

        let mut resumed = manager.attach("s", Some(0));
        let _ = resumed.next().await; // retry hint
        let mut replayed = Vec::new();
        while let Some(Frame::Event { event }) = resumed.try_next() {
            replayed.push(event.sequence_id);
        }
        assert_eq!(replayed, vec![1, 2]);
    }

    #[tokio::test]
    async fn end_session_closes_live_and_destroys_the_buffer() {
        let manager = manager();
        let mut handle = manager.attach("s", None);
        let _ = handle.next().await; // retry hint
        manager.end_session("s");

        assert_eq!(
            handle.next().await,
            Some(Frame::Close {
                reason: CloseReason::SessionEnded
            })
        );
        assert!(!manager.session_exists("s"));
        assert!(manager.push("s", token("a")).is_err());
    }

    #[tokio::test]
    async fn heartbeats_flow_on_an_idle_connection() {
        let manager = StreamManager::new(StreamConfig {
            buffer_capacity: 4,
            heartbeat_interval: Duration::from_millis(10),
            retry_hint_ms: 3_000,
        });
        let mut handle = manager.attach("s", None);
        let _ = handle.next().await; // retry hint
        assert_eq!(handle.next().await, Some(Frame::Heartbeat));
    }
}
