use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::dao::models::TimestampMs;

pub mod command;
/// Health check payloads.
pub mod health;
/// Server view payloads.
pub mod info;
pub mod player;
/// WebSocket message envelopes.
pub mod ws;

/// Render a millisecond Unix timestamp as RFC 3339.
pub fn format_timestamp(ms: TimestampMs) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|at| at.format(&Rfc3339).ok())
        .unwrap_or_else(|| "invalid-timestamp".into())
}

/// `serialize_with` helpers emitting [`TimestampMs`] fields as RFC 3339 strings.
pub(crate) mod rfc3339 {
    use serde::Serializer;

    use super::format_timestamp;
    use crate::dao::models::TimestampMs;

    pub fn serialize<S: Serializer>(ms: &TimestampMs, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp(*ms))
    }

    pub mod option {
        use serde::Serializer;

        use super::format_timestamp;
        use crate::dao::models::TimestampMs;

        pub fn serialize<S: Serializer>(
            ms: &Option<TimestampMs>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match ms {
                Some(ms) => serializer.serialize_str(&format_timestamp(*ms)),
                None => serializer.serialize_none(),
            }
        }
    }
}
