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

//! Port naming and topology bookkeeping.
//!
//! Every node in a bridge topology is addressed by its port name. The hub
//! is always `"background"`, the extension page is `"app"`, and content
//! contexts take a generated `content@<name>-<n>` name so several copies
//! of the same page can coexist. The hub tracks connected spokes in a
//! [`PortTable`] and announces every change through the reserved
//! [`PORTS_EVENT`] event.

use crate::transport::Port;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

/// Port name of the hub node.
pub const HUB_PORT_NAME: &str = "background";

/// Port name of the extension page node.
pub const APP_PORT_NAME: &str = "app";

/// Prefix of every content-context port name.
pub const CONTENT_PORT_PREFIX: &str = "content@";

/// Prefix reserved for the bridge's own events.
///
/// Listener bookkeeping treats events under this prefix specially:
/// removing all listeners for one spares the bridge's internal listener.
pub const INTERNAL_EVENT_PREFIX: &str = "@bridge:";

/// Event carrying a [`PortsUpdate`] from the hub to every spoke.
pub const PORTS_EVENT: &str = "@bridge:ports";

/// Checks whether a name is acceptable as a port name.
///
/// The hub drops connections announcing any other name.
#[must_use]
pub fn is_valid_port_name(name: &str) -> bool {
    name == HUB_PORT_NAME || name == APP_PORT_NAME || name.starts_with(CONTENT_PORT_PREFIX)
}

/// Builds a content port name from a page name plus a random suffix.
pub(crate) fn content_port_name(name: &str) -> String {
    let n = rand::thread_rng().gen_range(0..10_000);
    format!("{CONTENT_PORT_PREFIX}{name}-{n}")
}

/// Topology announcement broadcast by the hub whenever a spoke connects
/// or disconnects.
///
/// `port_list` names every spoke visible to the recipient, never the hub
/// itself and never the recipient. `added` and `removed` name the spoke
/// whose arrival or departure triggered the announcement, when there is
/// one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortsUpdate {
    /// Spokes currently reachable from the recipient.
    pub port_list: Vec<String>,
    /// Spoke that just connected, if the update announces an arrival.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added: Option<String>,
    /// Spoke that just disconnected, if the update announces a departure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<String>,
}

/// One connected spoke as the hub sees it.
pub(crate) struct PortEntry {
    pub(crate) name: String,
    /// Distinguishes reconnections under the same name. A reader task
    /// only tears down the entry whose serial it was started with.
    pub(crate) serial: u64,
    pub(crate) port: Port,
    /// Reader task draining the port. Never aborted by drop; the owner
    /// decides when to abort because a reader may be removing itself.
    pub(crate) reader: JoinHandle<()>,
}

/// Hub-side table of connected spokes, in connection order.
#[derive(Default)]
pub(crate) struct PortTable {
    entries: Vec<PortEntry>,
}

impl PortTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, entry: PortEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<PortEntry> {
        let index = self.entries.iter().position(|entry| entry.name == name)?;
        Some(self.entries.remove(index))
    }

    pub(crate) fn get(&self, name: &str) -> Option<&PortEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.name.clone()).collect()
    }

    pub(crate) fn take_all(&mut self) -> Vec<PortEntry> {
        std::mem::take(&mut self.entries)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reserved_names_are_valid() {
        assert!(is_valid_port_name("background"));
        assert!(is_valid_port_name("app"));
        assert!(is_valid_port_name("content@devtools-panel-41"));
        assert!(!is_valid_port_name("popup"));
        assert!(!is_valid_port_name(""));
        assert!(!is_valid_port_name("Background"));
    }

    #[test]
    fn test_content_names_carry_a_bounded_suffix() {
        for _ in 0..50 {
            let name = content_port_name("overlay");
            let suffix = name
                .strip_prefix("content@overlay-")
                .expect("prefix and page name");
            let n: u32 = suffix.parse().expect("numeric suffix");
            assert!(n < 10_000);
            assert!(is_valid_port_name(&name));
        }
    }

    #[test]
    fn test_ports_update_wire_shape() {
        let update = PortsUpdate {
            port_list: vec!["app".to_string(), "content@overlay-12".to_string()],
            added: Some("content@overlay-12".to_string()),
            removed: None,
        };

        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(
            value,
            json!({
                "portList": ["app", "content@overlay-12"],
                "added": "content@overlay-12"
            })
        );

        let back: PortsUpdate = serde_json::from_value(value).unwrap();
        assert_eq!(back, update);
    }

    #[test]
    fn test_ports_update_tolerates_bare_list() {
        let update: PortsUpdate =
            serde_json::from_value(json!({ "portList": [] })).unwrap();
        assert!(update.port_list.is_empty());
        assert_eq!(update.added, None);
        assert_eq!(update.removed, None);
    }

    #[tokio::test]
    async fn test_port_table_keeps_connection_order() {
        let mut table = PortTable::new();
        for (serial, name) in ["app", "content@a-1", "content@b-2"].iter().enumerate() {
            let (port, _remote) = Port::pair(*name);
            table.insert(PortEntry {
                name: name.to_string(),
                serial: serial as u64,
                port,
                reader: tokio::spawn(async {}),
            });
        }

        assert_eq!(table.names(), vec!["app", "content@a-1", "content@b-2"]);
        assert!(table.contains("content@a-1"));
        assert_eq!(table.len(), 3);

        let removed = table.remove("content@a-1").unwrap();
        assert_eq!(removed.name, "content@a-1");
        assert_eq!(table.names(), vec!["app", "content@b-2"]);
        assert!(table.remove("content@a-1").is_none());

        let drained = table.take_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(table.len(), 0);
    }
}
