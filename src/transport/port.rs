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

//! In-memory message ports.
//!
//! A [`Port`] is one end of a bidirectional, ordered channel carrying JSON
//! values. Ports come in connected pairs: values posted on one end arrive
//! on the other in posting order, and dropping either end closes both.

use crate::transport::TransportError;
use serde_json::Value;
use tokio::sync::mpsc;

/// One end of a connected port pair.
///
/// # Example
///
/// ```rust
/// use exbridge::Port;
/// use serde_json::json;
///
/// # async fn example() {
/// let (local, mut remote) = Port::pair("app");
/// let mut incoming = remote.take_receiver().unwrap();
///
/// local.post(json!({ "hello": "world" })).unwrap();
/// assert_eq!(incoming.recv().await, Some(json!({ "hello": "world" })));
/// # }
/// ```
#[derive(Debug)]
pub struct Port {
    name: String,
    tx: mpsc::UnboundedSender<Value>,
    rx: Option<mpsc::UnboundedReceiver<Value>>,
}

impl Port {
    /// Creates a connected pair of ports sharing `name`.
    ///
    /// Values posted on either end arrive on the other, in order.
    #[must_use]
    pub fn pair(name: impl Into<String>) -> (Port, Port) {
        let name = name.into();
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let left = Port {
            name: name.clone(),
            tx: a_tx,
            rx: Some(b_rx),
        };
        let right = Port {
            name,
            tx: b_tx,
            rx: Some(a_rx),
        };
        (left, right)
    }

    /// Returns the name this port was created with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Posts a value to the other end.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] when the other end has been
    /// dropped.
    pub fn post(&self, value: Value) -> Result<(), TransportError> {
        self.tx.send(value).map_err(|_| TransportError::Closed)
    }

    /// Takes the receiving half of this port.
    ///
    /// Returns `None` if the receiver was already taken. Splitting the
    /// receiver off lets a reader task own it while the [`Port`] itself
    /// stays available for posting.
    pub fn take_receiver(&mut self) -> Option<PortReceiver> {
        self.rx.take().map(|rx| PortReceiver { rx })
    }

    /// Returns `true` when the other end has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Closes this port, notifying the other end.
    pub fn disconnect(self) {
        drop(self);
    }
}

/// The receiving half of a [`Port`].
#[derive(Debug)]
pub struct PortReceiver {
    rx: mpsc::UnboundedReceiver<Value>,
}

impl PortReceiver {
    /// Waits for the next value from the other end.
    ///
    /// Returns `None` once the other end has been dropped and all queued
    /// values have been drained.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}
