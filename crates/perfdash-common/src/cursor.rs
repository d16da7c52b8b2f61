//! Versioned continuation tokens.
//!
//! A cursor is a snapshot of the sort key of the last record served
//! (`timestamp`, `key`) together with the direction of the order it was
//! taken under. It is serialized as compact JSON and then base64url encoded,
//! so it is opaque to clients but independent of any particular store's
//! native pagination token.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::types::{AlertRecord, SortOrder};

/// Current cursor format version. Tokens carrying any other version are
/// rejected rather than guessed at.
pub const CURSOR_VERSION: u32 = 1;

/// Errors produced while decoding a client-supplied cursor.
#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    #[error("cursor is empty")]
    Empty,

    #[error("cursor is not valid base64url: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("cursor payload is malformed: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("cursor version {0} is not supported")]
    UnsupportedVersion(u32),

    #[error("cursor timestamp {0} is out of range")]
    TimestampOutOfRange(i64),
}

/// Resumable position in the `(timestamp, key)` order.
///
/// # Examples
///
/// ```
/// use perfdash_common::cursor::Cursor;
/// use perfdash_common::types::SortOrder;
///
/// let cursor = Cursor::new(SortOrder::NewestFirst, 1_700_000_000_000, "alert-42");
/// let token = cursor.encode();
/// assert_eq!(Cursor::decode(&token).unwrap(), cursor);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub order: SortOrder,
    /// Milliseconds since the Unix epoch of the last record served.
    pub timestamp_ms: i64,
    /// Key of the last record served.
    pub key: String,
}

#[derive(Deserialize)]
struct CursorPayload {
    v: u32,
    o: SortOrder,
    ts: i64,
    k: String,
}

impl Cursor {
    pub fn new(order: SortOrder, timestamp_ms: i64, key: impl Into<String>) -> Self {
        Self {
            order,
            timestamp_ms,
            key: key.into(),
        }
    }

    /// Cursor positioned just after `record` in `order`.
    pub fn after(record: &AlertRecord, order: SortOrder) -> Self {
        Self::new(order, record.timestamp.timestamp_millis(), record.key.clone())
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_ms)
    }

    pub fn encode(&self) -> String {
        let payload = serde_json::json!({
            "v": CURSOR_VERSION,
            "o": self.order,
            "ts": self.timestamp_ms,
            "k": self.key,
        });
        URL_SAFE_NO_PAD.encode(payload.to_string())
    }

    pub fn decode(token: &str) -> Result<Self, CursorError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(CursorError::Empty);
        }
        let bytes = URL_SAFE_NO_PAD.decode(token)?;
        let payload: CursorPayload = serde_json::from_slice(&bytes)?;
        if payload.v != CURSOR_VERSION {
            return Err(CursorError::UnsupportedVersion(payload.v));
        }
        if DateTime::from_timestamp_millis(payload.ts).is_none() {
            return Err(CursorError::TimestampOutOfRange(payload.ts));
        }
        Ok(Self {
            order: payload.o,
            timestamp_ms: payload.ts,
            key: payload.k,
        })
    }
}
