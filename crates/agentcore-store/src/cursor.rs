//! Opaque pagination cursors for `Store::list_messages` (spec §4.1/§6:
//! "base64 of the next sequence number"). Callers must treat the string
//! as opaque; only this module knows it's a base64-encoded integer.

use base64::Engine;

pub fn encode(sequence: u64) -> String {
    base64::engine::general_purpose::STANDARD.encode(sequence.to_string())
}

pub fn decode(cursor: &str) -> Option<u64> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(cursor).ok()?;
    String::from_utf8(bytes).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_base64() {
        let cursor = encode(42);
        assert_ne!(cursor, "42");
        assert_eq!(decode(&cursor), Some(42));
    }

    #[test]
    fn rejects_garbage_input() {
        assert_eq!(decode("not valid base64!!"), None);
    }
}
