//! Typed event model for the braid streaming core.

mod codec;
mod error;
mod event;

pub use codec::{decode, encode};
pub use error::{BraidError, BraidErrorCode};
pub use event::{Event, EventKind, StatusState};
