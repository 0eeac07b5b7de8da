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

//! The bridge node and its supporting machinery.
//!
//! A [`Bridge`] is one node of a hub-and-spoke topology. The `background`
//! node is the hub: it accepts connections, tracks who is online, and
//! relays traffic between spokes. Every other node is a spoke holding a
//! single port to the hub. On top of that topology the bridge offers an
//! evented request-response surface: [`on`](Bridge::on) registers
//! listeners, [`send`](Bridge::send) awaits the reply from whichever
//! listener answers.

use std::fmt;

#[allow(clippy::module_inception)]
mod bridge;
mod codec;
mod correlation;
mod listener;
mod pending;
mod topology;

pub use bridge::Bridge;
pub use correlation::MessageIdGenerator;
pub use listener::{BridgeMessage, ListenerId};
pub use pending::{PendingRequests, RequestOutcome};
pub use topology::{
    is_valid_port_name, PortsUpdate, APP_PORT_NAME, CONTENT_PORT_PREFIX, HUB_PORT_NAME,
    INTERNAL_EVENT_PREFIX, PORTS_EVENT,
};

/// Which kind of context a bridge node lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// The hub. Exactly one per topology, named `background`.
    Background,
    /// An injected page context, named `content@<name>-<n>`.
    Content,
    /// The extension page context, named `app`.
    App,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Background => "background",
            Self::Content => "content",
            Self::App => "app",
        };
        write!(f, "{kind}")
    }
}

/// Configuration for a new [`Bridge`].
///
/// The context kind decides the node's port name and role; content
/// contexts also supply the page name their generated port name embeds.
///
/// # Example
///
/// ```rust
/// use exbridge::BridgeOptions;
///
/// let options = BridgeOptions::content("overlay").debug(true);
/// ```
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    kind: ContextKind,
    name: Option<String>,
    debug: bool,
}

impl BridgeOptions {
    /// Options for the hub node.
    #[must_use]
    pub fn background() -> Self {
        Self {
            kind: ContextKind::Background,
            name: None,
            debug: false,
        }
    }

    /// Options for the extension page node.
    #[must_use]
    pub fn app() -> Self {
        Self {
            kind: ContextKind::App,
            name: None,
            debug: false,
        }
    }

    /// Options for a content node embedding `name` in its port name.
    #[must_use]
    pub fn content(name: impl Into<String>) -> Self {
        Self {
            kind: ContextKind::Content,
            name: Some(name.into()),
            debug: false,
        }
    }

    /// Enables or disables debug logging for the node.
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub(crate) fn kind(&self) -> ContextKind {
        self.kind
    }

    pub(crate) fn page_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn debug_enabled(&self) -> bool {
        self.debug
    }
}
