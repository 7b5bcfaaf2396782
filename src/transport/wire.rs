//! Wire types
//!
//! A packet is a routed header plus one message. Messages are adjacently
//! tagged so the wire form is `{type, body}`; the tags are part of the
//! protocol. Packets are CBOR on the wire.

use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::crdt::CrdtOperation;

use super::socket::TransportError;

/// Routing header carried by every packet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub source: String,
    pub relayed_by: String,
    pub destination: String,
    pub packet_id: Uuid,
}

impl Header {
    pub fn new(
        source: impl Into<String>,
        relayed_by: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            relayed_by: relayed_by.into(),
            destination: destination.into(),
            packet_id: Uuid::new_v4(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub header: Header,
    pub message: Message,
}

/// Per-origin highest contiguous rumor sequence. Ordered map so logged and
/// serialized forms are stable.
pub type StatusMessage = BTreeMap<String, u64>;

/// One delivery record: an opaque message stamped with the origin's next
/// rumor sequence number.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rumor {
    pub origin: String,
    pub sequence: u64,
    pub payload: Box<Message>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RumorsMessage {
    pub rumors: Vec<Rumor>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AckMessage {
    pub acked_packet_id: Uuid,
    pub status: StatusMessage,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrdtOperationsMessage {
    pub operations: Vec<CrdtOperation>,
}

/// Every message the core understands. `Empty` is the heartbeat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body")]
pub enum Message {
    #[serde(rename = "rumors")]
    Rumors(RumorsMessage),
    #[serde(rename = "status")]
    Status(StatusMessage),
    #[serde(rename = "ack")]
    Ack(AckMessage),
    #[serde(rename = "crdtoperations")]
    CrdtOperations(CrdtOperationsMessage),
    #[serde(rename = "empty")]
    Empty,
}

/// Serialize a value to CBOR bytes.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, TransportError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| TransportError::Codec(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a value from CBOR bytes.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, TransportError> {
    ciborium::from_reader(data).map_err(|e| TransportError::Codec(e.to_string()))
}
