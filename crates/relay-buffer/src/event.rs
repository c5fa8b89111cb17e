//! Buffered events and their ids.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{BufferError, Result};

/// One stored event. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferedEvent {
    /// `{run_id}:{sequence}`.
    pub id: String,
    /// Position within the run, starting at 0.
    pub sequence: u64,
    /// SSE event tag, e.g. `text-delta`.
    pub event_type: String,
    /// Serialized payload, opaque to the buffer.
    pub payload: String,
    /// When the event was stored.
    pub timestamp: DateTime<Utc>,
}

/// Render an event id.
pub fn format_event_id(run_id: &str, sequence: u64) -> String {
    format!("{run_id}:{sequence}")
}

/// Split an event id into run id and sequence.
///
/// Splits on the last `:` so run ids may contain colons themselves.
pub fn parse_event_id(event_id: &str) -> Result<(&str, u64)> {
    let (run_id, sequence) = event_id
        .rsplit_once(':')
        .ok_or_else(|| BufferError::MalformedEventId(event_id.to_string()))?;
    if run_id.is_empty() {
        return Err(BufferError::MalformedEventId(event_id.to_string()));
    }
    let sequence = sequence
        .parse()
        .map_err(|_| BufferError::MalformedEventId(event_id.to_string()))?;
    Ok((run_id, sequence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_id() {
        assert_eq!(parse_event_id("run_1:7").unwrap(), ("run_1", 7));
    }

    #[test]
    fn test_parse_run_id_with_colons() {
        assert_eq!(
            parse_event_id("tenant:a:run:12").unwrap(),
            ("tenant:a:run", 12)
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_event_id("no-separator").is_err());
        assert!(parse_event_id(":3").is_err());
        assert!(parse_event_id("run:abc").is_err());
        assert!(parse_event_id("run:-1").is_err());
    }

    #[test]
    fn test_format_matches_parse() {
        let id = format_event_id("r", 42);
        assert_eq!(id, "r:42");
        assert_eq!(parse_event_id(&id).unwrap(), ("r", 42));
    }
}
