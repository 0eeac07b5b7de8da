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

//! Message encoding and chunk reassembly.
//!
//! Array payloads are split on the wire: a header packet announces the
//! element count, then one packet follows per element. Everything else
//! travels as a single `full` packet. The receiving side reassembles
//! chunked transfers keyed by `(sender, id)`, so interleaved transfers
//! from different peers never mix.

use crate::packet::{AbortPacket, ChunkPacket, FullPacket, Message, MessageProps, MessageType, Packet};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Turns a message into the packets that carry it.
///
/// An array payload of `n` elements becomes `n + 1` packets: the chunk
/// header plus one packet per element, in index order. Any other payload,
/// or no payload, becomes a single full packet.
pub(crate) fn encode(message: Message) -> Vec<Packet> {
    let Message {
        id,
        from,
        to,
        message_type,
        props,
        payload,
    } = message;

    match payload {
        Some(Value::Array(elements)) => {
            let mut packets = Vec::with_capacity(elements.len() + 1);
            packets.push(Packet::Chunk(ChunkPacket {
                id,
                from: from.clone(),
                to: to.clone(),
                chunks_number: Some(elements.len() as u64),
                message_type: Some(message_type),
                message_props: Some(props),
                chunk_index: None,
                payload: None,
            }));
            for (index, element) in elements.into_iter().enumerate() {
                packets.push(Packet::Chunk(ChunkPacket {
                    id,
                    from: from.clone(),
                    to: to.clone(),
                    chunks_number: None,
                    message_type: None,
                    message_props: None,
                    chunk_index: Some(index as u64),
                    payload: Some(element),
                }));
            }
            packets
        }
        payload => vec![Packet::Full(FullPacket {
            id,
            from,
            to,
            message_type,
            message_props: props,
            payload,
        })],
    }
}

/// Builds the abort packet cancelling a chunked transfer.
pub(crate) fn abort_packet(id: u64, from: &str, to: &str) -> Packet {
    Packet::ChunkAbort(AbortPacket {
        id,
        from: from.to_string(),
        to: to.to_string(),
    })
}

/// Something off about an incoming chunk. The packet (or the whole
/// transfer) was dropped; the caller decides how loudly to say so.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkAnomaly {
    /// A header arrived for a transfer that was already open. The old
    /// partial transfer was discarded and the new one opened.
    Reopened,
    /// An element arrived with no open transfer to join.
    Unregistered,
    /// An element's index did not match the next expected position. The
    /// whole transfer was discarded.
    OutOfOrder,
    /// The packet was neither a usable header nor a usable element.
    Malformed,
}

/// What an incoming chunk did to the reassembly state.
pub(crate) struct ChunkProgress {
    pub(crate) anomaly: Option<ChunkAnomaly>,
    pub(crate) message: Option<Message>,
}

impl ChunkProgress {
    fn anomaly(anomaly: ChunkAnomaly) -> Self {
        Self {
            anomaly: Some(anomaly),
            message: None,
        }
    }

    fn in_flight() -> Self {
        Self {
            anomaly: None,
            message: None,
        }
    }
}

struct ChunkRecord {
    to: String,
    expected: u64,
    message_type: MessageType,
    props: MessageProps,
    elements: Vec<Value>,
}

/// Receiving-side state for chunked transfers, keyed by `(sender, id)`.
#[derive(Default)]
pub(crate) struct Reassembler {
    records: Mutex<HashMap<(String, u64), ChunkRecord>>,
}

impl Reassembler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk packet into the reassembly state.
    pub(crate) async fn accept(&self, chunk: ChunkPacket) -> ChunkProgress {
        let ChunkPacket {
            id,
            from,
            to,
            chunks_number,
            message_type,
            message_props,
            chunk_index,
            payload,
        } = chunk;
        let key = (from, id);
        let mut records = self.records.lock().await;

        if let Some(expected) = chunks_number {
            let (message_type, props) = match (message_type, message_props) {
                (Some(message_type), Some(props)) => (message_type, props),
                _ => return ChunkProgress::anomaly(ChunkAnomaly::Malformed),
            };
            let anomaly = records
                .remove(&key)
                .is_some()
                .then_some(ChunkAnomaly::Reopened);
            if expected == 0 {
                // Empty arrays are announced and complete in one packet.
                return ChunkProgress {
                    anomaly,
                    message: Some(Message {
                        id,
                        from: key.0,
                        to,
                        message_type,
                        props,
                        payload: Some(Value::Array(Vec::new())),
                    }),
                };
            }
            records.insert(
                key,
                ChunkRecord {
                    to,
                    expected,
                    message_type,
                    props,
                    elements: Vec::new(),
                },
            );
            return ChunkProgress { anomaly, message: None };
        }

        if let Some(index) = chunk_index {
            match records.get_mut(&key) {
                None => return ChunkProgress::anomaly(ChunkAnomaly::Unregistered),
                Some(record) => {
                    if index != record.elements.len() as u64 {
                        records.remove(&key);
                        return ChunkProgress::anomaly(ChunkAnomaly::OutOfOrder);
                    }
                    record.elements.push(payload.unwrap_or(Value::Null));
                }
            }
            let complete = records
                .get(&key)
                .is_some_and(|record| record.elements.len() as u64 == record.expected);
            if complete {
                if let Some(record) = records.remove(&key) {
                    return ChunkProgress {
                        anomaly: None,
                        message: Some(Message {
                            id,
                            from: key.0,
                            to: record.to,
                            message_type: record.message_type,
                            props: record.props,
                            payload: Some(Value::Array(record.elements)),
                        }),
                    };
                }
            }
            return ChunkProgress::in_flight();
        }

        ChunkProgress::anomaly(ChunkAnomaly::Malformed)
    }

    /// Discards the transfer a `chunk-abort` names. Returns `true` when
    /// there was one to discard.
    pub(crate) async fn abort(&self, from: &str, id: u64) -> bool {
        self.records
            .lock()
            .await
            .remove(&(from.to_string(), id))
            .is_some()
    }

    /// Discards every partial transfer originating from `port`.
    pub(crate) async fn drop_for_port(&self, port: &str) -> usize {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|(from, _), _| from != port);
        before - records.len()
    }

    /// Discards all partial transfers.
    pub(crate) async fn clear(&self) {
        self.records.lock().await.clear();
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}
