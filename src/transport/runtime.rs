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

//! Connection fabric between bridge nodes.
//!
//! [`NativeRuntime`] plays the role the extension platform plays in a real
//! browser: spoke nodes call [`connect`](NativeRuntime::connect) to open a
//! named port, and the hub listens for those ports through
//! [`incoming`](NativeRuntime::incoming). All nodes of one topology share a
//! single runtime instance.

use crate::transport::Port;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Hands freshly connected ports from spokes to the hub.
///
/// # Example
///
/// ```rust
/// use exbridge::NativeRuntime;
///
/// # async fn example() {
/// let runtime = NativeRuntime::new();
/// let mut listener = runtime.incoming();
///
/// let _local = runtime.connect("app");
/// let accepted = listener.accept().await.unwrap();
/// assert_eq!(accepted.name(), "app");
/// # }
/// ```
#[derive(Debug, Default)]
pub struct NativeRuntime {
    acceptor: Mutex<Option<mpsc::UnboundedSender<Port>>>,
}

impl NativeRuntime {
    /// Creates a runtime with no hub listening yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a named port towards whoever is accepting connections.
    ///
    /// The local end is returned immediately. If no hub is listening, the
    /// remote end is dropped on the floor and the returned port reports
    /// closed as soon as it is used.
    #[must_use]
    pub fn connect(&self, name: impl Into<String>) -> Port {
        let (local, remote) = Port::pair(name);
        if let Some(acceptor) = self.acceptor.lock().as_ref() {
            // A failed handoff means the listener is gone; the dropped
            // remote end makes that visible to the caller as a closed port.
            let _ = acceptor.send(remote);
        }
        local
    }

    /// Starts accepting connections, returning the listener.
    ///
    /// Only one listener is active at a time; calling this again detaches
    /// the previous listener, whose [`accept`](PortListener::accept) then
    /// drains and returns `None`.
    #[must_use]
    pub fn incoming(&self) -> PortListener {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.acceptor.lock() = Some(tx);
        PortListener { rx }
    }
}

/// Receives ports opened by spokes, in connection order.
#[derive(Debug)]
pub struct PortListener {
    rx: mpsc::UnboundedReceiver<Port>,
}

impl PortListener {
    /// Waits for the next incoming connection.
    ///
    /// Returns `None` once this listener has been replaced by a newer call
    /// to [`NativeRuntime::incoming`] and all queued ports are drained.
    pub async fn accept(&mut self) -> Option<Port> {
        self.rx.recv().await
    }
}
