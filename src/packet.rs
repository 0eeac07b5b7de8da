//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Wire packet definitions.
//!
//! Everything crossing a port is a JSON object tagged with a `type` field:
//!
//! - `full` packets carry a complete message in one piece;
//! - `chunk` packets split an array payload across a header announcing the
//!   element count followed by one packet per element;
//! - `chunk-abort` packets cancel a chunked transfer in flight.
//!
//! Keys are camelCase on the wire. A full `event-send` looks like:
//!
//! ```json
//! {
//!   "type": "full",
//!   "id": 4,
//!   "from": "app",
//!   "to": "background",
//!   "messageType": "event-send",
//!   "messageProps": { "event": "sum" },
//!   "payload": { "a": 1, "b": 2 }
//! }
//! ```
//!
//! The hub relays packets between spokes without decoding them; only the
//! addressed node parses a packet into a [`Message`].

use crate::error::RemoteError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Distinguishes a request from the reply it correlates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    /// A new event addressed to another node's listeners.
    EventSend,
    /// The reply to a previously received `event-send` with the same id.
    EventResponse,
}

/// Metadata travelling alongside a message payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageProps {
    /// Event name the listeners are keyed by. Present on sends, absent on
    /// responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Failure reported by the responding node, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
    /// Suppresses warnings when the other side cannot match this message
    /// to a pending request.
    #[serde(default, skip_serializing_if = "is_false")]
    pub quiet: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl MessageProps {
    /// Props for an `event-send` carrying `event`.
    #[must_use]
    pub fn for_event(event: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            ..Self::default()
        }
    }

    /// Props for an `event-response` reporting a failure.
    #[must_use]
    pub fn for_error(error: RemoteError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

/// A message delivered whole in a single packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullPacket {
    /// Correlation id, unique per sending node.
    pub id: u64,
    /// Name of the originating port.
    pub from: String,
    /// Name of the destination port.
    pub to: String,
    /// Whether this is a send or a response.
    pub message_type: MessageType,
    /// Event name, error, and delivery flags.
    pub message_props: MessageProps,
    /// Message body. Omitted entirely when the message carries none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// One piece of a chunked transfer.
///
/// A header carries `chunks_number`, `message_type` and `message_props`
/// and no payload; each subsequent element carries `chunk_index` and one
/// array element as its payload, and repeats none of the header fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPacket {
    /// Correlation id shared by every piece of the transfer.
    pub id: u64,
    /// Name of the originating port.
    pub from: String,
    /// Name of the destination port.
    pub to: String,
    /// Number of elements to follow. Present only on the header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks_number: Option<u64>,
    /// Send or response. Present only on the header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
    /// Message metadata. Present only on the header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_props: Option<MessageProps>,
    /// Zero-based position of this element. Absent on the header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u64>,
    /// One element of the original array. Absent on the header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ChunkPacket {
    /// Returns `true` when this packet opens a transfer rather than
    /// carrying an element of one.
    #[must_use]
    pub fn is_header(&self) -> bool {
        self.chunks_number.is_some()
    }
}

/// Cancels a chunked transfer before its last element arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortPacket {
    /// Correlation id of the transfer being abandoned.
    pub id: u64,
    /// Name of the originating port.
    pub from: String,
    /// Name of the destination port.
    pub to: String,
}

/// Any value crossing a port, discriminated by its `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Packet {
    /// A complete message.
    #[serde(rename = "full")]
    Full(FullPacket),
    /// One piece of a chunked transfer.
    #[serde(rename = "chunk")]
    Chunk(ChunkPacket),
    /// Cancellation of a chunked transfer.
    #[serde(rename = "chunk-abort")]
    ChunkAbort(AbortPacket),
}

impl Packet {
    /// Correlation id of this packet.
    #[must_use]
    pub fn id(&self) -> u64 {
        match self {
            Self::Full(packet) => packet.id,
            Self::Chunk(packet) => packet.id,
            Self::ChunkAbort(packet) => packet.id,
        }
    }

    /// Name of the originating port.
    #[must_use]
    pub fn from(&self) -> &str {
        match self {
            Self::Full(packet) => &packet.from,
            Self::Chunk(packet) => &packet.from,
            Self::ChunkAbort(packet) => &packet.from,
        }
    }

    /// Name of the destination port.
    #[must_use]
    pub fn to(&self) -> &str {
        match self {
            Self::Full(packet) => &packet.to,
            Self::Chunk(packet) => &packet.to,
            Self::ChunkAbort(packet) => &packet.to,
        }
    }
}

/// A fully reassembled message, ready for dispatch.
///
/// This is what the bridge works with once the codec has dealt with
/// chunking: either a decoded [`FullPacket`] or the recombination of a
/// chunked transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Correlation id, unique per sending node.
    pub id: u64,
    /// Name of the originating port.
    pub from: String,
    /// Name of the destination port.
    pub to: String,
    /// Whether this is a send or a response.
    pub message_type: MessageType,
    /// Event name, error, and delivery flags.
    pub props: MessageProps,
    /// Message body, if any.
    pub payload: Option<Value>,
}

impl From<FullPacket> for Message {
    fn from(packet: FullPacket) -> Self {
        Self {
            id: packet.id,
            from: packet.from,
            to: packet.to,
            message_type: packet.message_type,
            props: packet.message_props,
            payload: packet.payload,
        }
    }
}

/// Checks whether a raw value is shaped like a packet at all.
///
/// The hub uses this to triage traffic without decoding: anything with a
/// numeric `id` and string `from`, `to` and `type` fields is routable.
#[must_use]
pub fn looks_like_packet(value: &Value) -> bool {
    value.get("id").is_some_and(Value::is_u64)
        && value.get("from").is_some_and(Value::is_string)
        && value.get("to").is_some_and(Value::is_string)
        && value.get("type").is_some_and(Value::is_string)
}

/// Reads the destination port off a raw packet value.
#[must_use]
pub fn packet_target(value: &Value) -> Option<&str> {
    value.get("to")?.as_str()
}

/// Reads the originating port off a raw packet value.
#[must_use]
pub fn packet_source(value: &Value) -> Option<&str> {
    value.get("from")?.as_str()
}

/// Reads the correlation id off a raw packet value.
#[must_use]
pub fn packet_id(value: &Value) -> Option<u64> {
    value.get("id")?.as_u64()
}
