use braid_events::Event;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// A newer connection for the same session took over. Not an error.
    Preempted,
    SessionEnded,
}

/// One unit on the wire. The event's `sequence_id` doubles as the
/// client's resumption token; heartbeats carry no payload and do not
/// advance it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    #[serde(rename = "event")]
    Event { event: Event },
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "retry_hint")]
    RetryHint {
        #[serde(rename = "retryMs")]
        retry_ms: u64,
    },
    #[serde(rename = "close")]
    Close { reason: CloseReason },
}

pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    match serde_json::to_vec(frame) {
        Ok(bytes) => bytes,
        Err(error) => {
            debug_assert!(false, "frame encoding failed: {error}");
            Vec::new()
        }
    }
}

pub fn decode_frame(bytes: &[u8]) -> Option<Frame> {
    serde_json::from_slice(bytes).ok()
}
