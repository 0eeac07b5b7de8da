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

#![doc = include_str!("../README.md")]
#![allow(clippy::module_inception)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

//! # Bridge Protocol Overview
//!
//! Every context of a browser extension runs one [`Bridge`] node identified
//! by a port name: `"background"` for the hub, `"app"` for the page context,
//! and `"content@<name>-<suffix>"` for content scripts. Peers hold a single
//! port to the hub; the hub holds one port per peer and relays packets
//! between them without decoding payloads.
//!
//! A logical message travels as one `full` packet, unless its payload is a
//! JSON array, in which case it travels as a `chunk` header followed by one
//! `chunk` packet per element. Requests (`event-send`) are dispatched to
//! listeners registered with [`Bridge::on`]/[`Bridge::once`]; the first
//! listener that returns a value produces the `event-response` that settles
//! the sender's [`Bridge::send`] call.
//!
//! Topology is push-based: whenever a peer connects or disconnects, the hub
//! broadcasts the reserved [`PORTS_EVENT`] carrying the updated list of
//! reachable peers, and every peer updates its local cache and rejects any
//! requests pending on a peer that disappeared.
//!
//! ## Layers
//!
//! - [`transport`]: named ports carrying opaque JSON values
//! - [`packet`]: the wire model shared by all nodes
//! - [`bridge`]: codec, correlation, listeners, topology, and the
//!   [`Bridge`] orchestrator
//! - [`error`]: the [`BridgeError`] taxonomy
//!
//! ## Concurrency Model
//!
//! Each node owns its state exclusively; contexts share nothing but the
//! transport. Packets from one port are processed strictly in arrival
//! order, listener dispatch runs on detached tasks so a slow handler never
//! stalls the port, and a pending request settles only through a matching
//! response or a disconnect sweep; there is no timeout.

pub mod bridge;
pub mod error;
pub mod packet;
pub mod transport;

pub use bridge::{
    Bridge, BridgeMessage, BridgeOptions, ContextKind, ListenerId, MessageIdGenerator,
    PendingRequests, PortsUpdate, APP_PORT_NAME, CONTENT_PORT_PREFIX, HUB_PORT_NAME,
    INTERNAL_EVENT_PREFIX, PORTS_EVENT,
};
pub use error::{BridgeError, RemoteError};
pub use packet::{Message, MessageProps, MessageType, Packet};
pub use transport::{NativeRuntime, Port, PortListener, PortReceiver, TransportError};
