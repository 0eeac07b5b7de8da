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

//! Error types for bridge operations.
//!
//! [`BridgeError`] covers everything a public bridge operation can fail
//! with; [`RemoteError`] is the serialized form of a listener failure on
//! another node, carried inside an `event-response` packet.

use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Placeholder used when a remote failure carries no stack trace.
const NO_STACK: &str = "no stack available";

/// A listener failure captured on a remote node.
///
/// When a listener returns an error, the responding node serializes the
/// failure into the response packet as a message plus a stack trace (or a
/// placeholder when no stack is available), and the sender's
/// [`send`](crate::Bridge::send) call rejects with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Human-readable description of the failure.
    pub message: String,
    /// Stack trace captured on the remote side, if any.
    #[serde(default = "default_stack")]
    pub stack: String,
}

fn default_stack() -> String {
    NO_STACK.to_string()
}

impl RemoteError {
    /// Creates a remote error with no stack trace.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: NO_STACK.to_string(),
        }
    }

    /// Creates a remote error carrying a stack trace.
    #[must_use]
    pub fn with_stack(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: stack.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RemoteError {}

/// Errors surfaced by bridge operations.
///
/// Variants fall into four groups: usage errors (calling an operation in
/// the wrong state or with missing arguments), topology errors (the
/// destination is not reachable), transport errors (the underlying channel
/// failed), and application errors (the remote listener failed). Protocol
/// anomalies such as malformed or out-of-order packets are not errors; they
/// are logged and dropped.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// `connect_to_background` was called on the hub node.
    #[error("the background bridge does not need to connect")]
    HubDoesNotConnect,

    /// `disconnect_from_background` was called on the hub node.
    #[error("the background bridge does not need to disconnect")]
    HubDoesNotDisconnect,

    /// `connect_to_background` was called while already connected.
    #[error("the bridge is already connected")]
    AlreadyConnected,

    /// An operation that requires a live hub connection was called while
    /// disconnected.
    #[error("the bridge is not connected")]
    NotConnected,

    /// The hub rejected the connection attempt.
    #[error("could not connect to the background")]
    ConnectFailed,

    /// `send` was called without an event name.
    #[error("tried to send a message without specifying an event")]
    MissingEvent,

    /// `send` was called without a destination.
    #[error("tried to send a message without specifying a destination")]
    MissingTarget,

    /// The destination port name is not currently reachable.
    #[error("tried to reach \"{port}\" but there is no connection to it")]
    UnknownPort {
        /// The unreachable destination.
        port: String,
    },

    /// The peer disconnected while a request to it was outstanding, or the
    /// connection dropped during transmission.
    #[error("connection to \"{port}\" was closed while waiting for a response")]
    ConnectionClosed {
        /// The peer that went away.
        port: String,
    },

    /// The underlying channel rejected a transmission.
    #[error("failed to post a packet to \"{port}\"")]
    Transport {
        /// The destination whose channel failed.
        port: String,
        /// The transport-level cause.
        #[source]
        source: TransportError,
    },

    /// The remote listener handling the request failed.
    #[error("{error}")]
    Remote {
        /// The failure as reported by the remote node.
        error: RemoteError,
    },
}

impl BridgeError {
    /// Returns `true` for errors caused by calling an operation in the
    /// wrong state or with missing arguments.
    #[must_use]
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::HubDoesNotConnect
                | Self::HubDoesNotDisconnect
                | Self::AlreadyConnected
                | Self::NotConnected
                | Self::MissingEvent
                | Self::MissingTarget
        )
    }

    /// Returns `true` when the failure means the peer (or the hub) went
    /// away, either before or while the request was in flight.
    #[must_use]
    pub fn is_disconnection(&self) -> bool {
        matches!(self, Self::ConnectionClosed { .. } | Self::ConnectFailed)
    }

    /// Returns `true` when the failure originated in a remote listener.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}

impl From<RemoteError> for BridgeError {
    fn from(error: RemoteError) -> Self {
        Self::Remote { error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display_is_message() {
        let err = RemoteError::new("listener exploded");
        assert_eq!(err.to_string(), "listener exploded");
        assert_eq!(err.stack, "no stack available");
    }

    #[test]
    fn test_remote_error_serde_defaults_stack() {
        let decoded: RemoteError =
            serde_json::from_value(serde_json::json!({ "message": "boom" })).unwrap();
        assert_eq!(decoded.message, "boom");
        assert_eq!(decoded.stack, "no stack available");
    }

    #[test]
    fn test_remote_error_round_trip() {
        let err = RemoteError::with_stack("boom", "at line 3");
        let value = serde_json::to_value(&err).unwrap();
        let back: RemoteError = serde_json::from_value(value).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_usage_predicate() {
        assert!(BridgeError::NotConnected.is_usage());
        assert!(BridgeError::MissingEvent.is_usage());
        assert!(!BridgeError::ConnectFailed.is_usage());
        assert!(!BridgeError::UnknownPort {
            port: "app".to_string()
        }
        .is_usage());
    }

    #[test]
    fn test_disconnection_predicate() {
        assert!(BridgeError::ConnectFailed.is_disconnection());
        assert!(BridgeError::ConnectionClosed {
            port: "app".to_string()
        }
        .is_disconnection());
        assert!(!BridgeError::AlreadyConnected.is_disconnection());
    }

    #[test]
    fn test_remote_conversion() {
        let err: BridgeError = RemoteError::new("boom").into();
        assert!(err.is_remote());
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_display_names_the_port() {
        let err = BridgeError::ConnectionClosed {
            port: "content@tab-17".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "connection to \"content@tab-17\" was closed while waiting for a response"
        );
    }
}
