use crate::error::BraidErrorCode;
use crate::event::{Event, EventKind};

/// Encodes an event for the wire. Total: serialization of the closed
/// event union cannot fail for well-formed events; a failure here is a
/// programmer error and trips the debug assertion.
pub fn encode(event: &Event) -> Vec<u8> {
    match serde_json::to_vec(event) {
        Ok(bytes) => bytes,
        Err(error) => {
            debug_assert!(false, "event encoding failed: {error}");
            fallback_protocol_error(event.sequence_id, &error.to_string())
        }
    }
}

/// Decodes a wire frame back into an event. Total: malformed input is a
/// programmer error upstream (we only ever decode what we encoded), so
/// development builds panic while release builds degrade to a protocol
/// error event instead of corrupting the stream.
pub fn decode(bytes: &[u8]) -> Event {
    match serde_json::from_slice(bytes) {
        Ok(event) => event,
        Err(error) => {
            debug_assert!(false, "event decoding failed: {error}");
            Event {
                sequence_id: 0,
                kind: EventKind::Error {
                    message: format!("malformed event frame: {error}"),
                    code: BraidErrorCode::ProviderProtocol,
                    recoverable: false,
                },
                created_at: 0,
            }
        }
    }
}

fn fallback_protocol_error(sequence_id: u64, message: &str) -> Vec<u8> {
    let event = Event {
        sequence_id,
        kind: EventKind::Error {
            message: format!("event encoding failed: {message}"),
            code: BraidErrorCode::ProviderProtocol,
            recoverable: false,
        },
        created_at: 0,
    };
    serde_json::to_vec(&event).unwrap_or_default()
}
