//! Client-facing stream management: per-session buffering, resumable
//! delivery, heartbeats, and connection preemption.

mod frame;
mod manager;
mod ring;

pub use frame::{decode_frame, encode_frame, CloseReason, Frame};
pub use manager::{ConnectionHandle, StreamConfig, StreamError, StreamManager};
pub use ring::EventRing;
