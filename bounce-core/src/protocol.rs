//! Wire envelopes for room events.
//!
//! Every event a room emits is serialized as one JSON envelope:
//! ```text
//! { "From": ["id"...], "To": ["id"...], "Num": 7,
//!   "Time": 1714070990123, "Intent": "Peer", "Body": "bWVzc2FnZQ==" }
//! ```
//! `Num` is the room's monotonic sequence number, `Time` is server
//! wall-clock in integer milliseconds since the epoch, and `Body` is
//! base64 (present only on `Peer` and `Receipt`, where it carries the
//! producer's bytes verbatim).

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::error::ProtocolError;

/// Resume-point sentinel meaning "I have no history; start me fresh".
pub const NO_LASTNUM: i64 = -1;

/// What an event is intended to convey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    /// Sent to a joiner, listing everyone already in the room.
    Welcome,
    /// Broadcast to existing members when someone joins.
    Joiner,
    /// Broadcast to remaining members when someone's grace expires.
    Leaver,
    /// A member's payload, fanned out to the other members.
    Peer,
    /// The sender's own copy of a peer broadcast.
    Receipt,
    /// The declared resume-point cannot be fulfilled.
    BadLastnum,
}

/// One room event, as delivered to clients.
///
/// Immutable once composed. A `Peer` and its paired `Receipt` share
/// `num`, `time`, `from`, `to`, and `body`; they differ only in intent
/// and recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Event {
    /// Ids that originated, or are the subject of, this event.
    pub from: Vec<String>,
    /// Ids of the recipients.
    pub to: Vec<String>,
    /// Room sequence number.
    pub num: i64,
    /// Server wall-clock, ms since the epoch.
    pub time: i64,
    pub intent: Intent,
    /// Producer bytes, verbatim. `None` except on Peer/Receipt.
    #[serde(with = "body_base64")]
    pub body: Option<Vec<u8>>,
}

impl Event {
    /// Welcome for a joiner: `from` lists everyone already present.
    pub fn welcome(others: Vec<String>, joiner: &str, num: i64, time: i64) -> Self {
        Self {
            from: others,
            to: vec![joiner.to_string()],
            num,
            time,
            intent: Intent::Welcome,
            body: None,
        }
    }

    /// Joiner announcement to the existing members.
    pub fn joiner(joiner: &str, others: Vec<String>, num: i64, time: i64) -> Self {
        Self {
            from: vec![joiner.to_string()],
            to: others,
            num,
            time,
            intent: Intent::Joiner,
            body: None,
        }
    }

    /// Leaver announcement to the members that remain.
    pub fn leaver(leaver: &str, remaining: Vec<String>, num: i64, time: i64) -> Self {
        Self {
            from: vec![leaver.to_string()],
            to: remaining,
            num,
            time,
            intent: Intent::Leaver,
            body: None,
        }
    }

    /// A member's payload for the other members.
    pub fn peer(sender: &str, recipients: Vec<String>, num: i64, time: i64, body: Vec<u8>) -> Self {
        Self {
            from: vec![sender.to_string()],
            to: recipients,
            num,
            time,
            intent: Intent::Peer,
            body: Some(body),
        }
    }

    /// The sender's receipt for a peer broadcast. Shares everything with
    /// the `Peer` event except the intent.
    pub fn receipt(sender: &str, recipients: Vec<String>, num: i64, time: i64, body: Vec<u8>) -> Self {
        Self {
            from: vec![sender.to_string()],
            to: recipients,
            num,
            time,
            intent: Intent::Receipt,
            body: Some(body),
        }
    }

    /// Rejection notice for an unfulfillable resume-point.
    pub fn bad_lastnum(joiner: &str, num: i64, time: i64) -> Self {
        Self {
            from: Vec::new(),
            to: vec![joiner.to_string()],
            num,
            time,
            intent: Intent::BadLastnum,
            body: None,
        }
    }

    /// Serialize to the JSON wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Serialize(e.to_string()))
    }

    /// Deserialize from the JSON wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Deserialize(e.to_string()))
    }
}

/// `Body` travels as base64, or null when absent.
mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => s.serialize_some(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(text) => STANDARD
                .decode(text.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// A session-scoped handle to one attaching client.
///
/// `id` is the stable client identity (two sessions may share it across
/// a reconnection); `tag` is process-unique and is what rooms key their
/// membership on, so a reconnecting client is distinguishable from its
/// predecessor. `last_num` is the last seq the predecessor consumed, or
/// [`NO_LASTNUM`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRef {
    pub id: String,
    pub tag: Uuid,
    pub last_num: i64,
}

impl ClientRef {
    /// A ref for a client that declared an identity.
    pub fn new(id: impl Into<String>, last_num: i64) -> Self {
        Self {
            id: id.into(),
            tag: Uuid::new_v4(),
            last_num,
        }
    }

    /// Whether the client declared a resume-point at all.
    pub fn wants_resume(&self) -> bool {
        self.last_num >= 0
    }
}

/// Server wall-clock in integer milliseconds since the epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
