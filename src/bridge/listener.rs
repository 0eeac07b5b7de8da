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

//! Event listener registration and dispatch.
//!
//! Listeners are keyed by event name and run in registration order. The
//! first listener to return a value decides the response payload, but
//! every listener still runs; a listener returning an error aborts the
//! dispatch and the error travels back to the sender.

use crate::bridge::topology::INTERNAL_EVENT_PREFIX;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle identifying one registered listener.
///
/// Returned by [`on`](crate::Bridge::on) and [`once`](crate::Bridge::once),
/// and passed to [`off`](crate::Bridge::off) to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({})", self.0)
    }
}

/// An incoming event as seen by a listener.
#[derive(Debug, Clone)]
pub struct BridgeMessage {
    /// Port the event originated from.
    pub from: String,
    /// Port the event was addressed to, normally this node.
    pub to: String,
    /// Event name the listener matched on.
    pub event: String,
    /// Message body; `Value::Null` when the sender attached none.
    pub payload: Value,
}

pub(crate) type BoxedListenerFuture =
    Pin<Box<dyn Future<Output = Result<Option<Value>, String>> + Send>>;

pub(crate) type ListenerCallback =
    Arc<dyn Fn(BridgeMessage) -> BoxedListenerFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListenerMode {
    /// Stays registered until removed.
    On,
    /// Unregisters when first invoked.
    Once,
}

struct ListenerEntry {
    id: ListenerId,
    mode: ListenerMode,
    callback: ListenerCallback,
}

/// Per-node listener table.
///
/// The lock is only held for table manipulation; callbacks run after it
/// is released, so a listener may register or remove listeners itself.
pub(crate) struct ListenerRegistry {
    listeners: Mutex<HashMap<String, Vec<ListenerEntry>>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Claims a listener id without registering anything under it.
    pub(crate) fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn insert(
        &self,
        event: &str,
        id: ListenerId,
        mode: ListenerMode,
        callback: ListenerCallback,
    ) {
        self.listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(ListenerEntry { id, mode, callback });
    }

    /// Removes the listener registered under `id`.
    ///
    /// Returns the event it was listening on, or `None` if the id is not
    /// registered.
    pub(crate) fn remove(&self, id: ListenerId) -> Option<String> {
        let mut listeners = self.listeners.lock();
        let event = listeners.iter().find_map(|(event, entries)| {
            entries
                .iter()
                .any(|entry| entry.id == id)
                .then(|| event.clone())
        })?;
        if let Some(entries) = listeners.get_mut(&event) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                listeners.remove(&event);
            }
        }
        Some(event)
    }

    /// Removes every listener for `event`.
    ///
    /// Internal events keep their first registration, which is the
    /// bridge's own bookkeeping listener; only the user-added ones go.
    /// Returns the number of listeners removed.
    pub(crate) fn remove_all(&self, event: &str) -> usize {
        let mut listeners = self.listeners.lock();
        if event.starts_with(INTERNAL_EVENT_PREFIX) {
            match listeners.get_mut(event) {
                Some(entries) if entries.len() > 1 => {
                    let removed = entries.len() - 1;
                    entries.truncate(1);
                    removed
                }
                _ => 0,
            }
        } else {
            listeners.remove(event).map_or(0, |entries| entries.len())
        }
    }

    #[cfg(test)]
    pub(crate) fn count(&self, event: &str) -> usize {
        self.listeners.lock().get(event).map_or(0, Vec::len)
    }

    /// Removes one entry for `event` if it is still registered.
    ///
    /// Used to claim a one-shot listener so that of all the dispatches
    /// holding it in their snapshot, exactly one invokes it.
    fn claim(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let entries = match listeners.get_mut(event) {
            Some(entries) => entries,
            None => return false,
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let claimed = entries.len() < before;
        if entries.is_empty() {
            listeners.remove(event);
        }
        claimed
    }

    /// Runs every listener for `event` in registration order.
    ///
    /// A one-shot listener is unregistered immediately before its callback
    /// runs; an entry the run never reaches stays registered. The first
    /// listener returning a value decides the reply; an error stops the
    /// run and skips the remaining listeners.
    pub(crate) async fn dispatch(
        &self,
        event: &str,
        message: BridgeMessage,
    ) -> Result<Option<Value>, String> {
        let snapshot: Vec<(ListenerId, ListenerMode, ListenerCallback)> = {
            let listeners = self.listeners.lock();
            match listeners.get(event) {
                Some(entries) => entries
                    .iter()
                    .map(|entry| (entry.id, entry.mode, entry.callback.clone()))
                    .collect(),
                None => Vec::new(),
            }
        };

        let mut reply = None;
        for (id, mode, callback) in snapshot {
            if mode == ListenerMode::Once && !self.claim(event, id) {
                // Another dispatch of the same event got here first.
                continue;
            }
            match callback(message.clone()).await {
                Ok(Some(value)) if reply.is_none() => reply = Some(value),
                Ok(_) => {}
                Err(failure) => return Err(failure),
            }
        }
        Ok(reply)
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("events", &self.listeners.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn message(event: &str) -> BridgeMessage {
        BridgeMessage {
            from: "app".to_string(),
            to: "background".to_string(),
            event: event.to_string(),
            payload: Value::Null,
        }
    }

    fn counting(calls: &Arc<AtomicUsize>, reply: Option<Value>) -> ListenerCallback {
        let calls = calls.clone();
        Arc::new(move |_message| {
            let calls = calls.clone();
            let reply = reply.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(reply)
            })
        })
    }

    #[tokio::test]
    async fn test_first_reply_wins_but_all_run() {
        let registry = ListenerRegistry::new();
        let first_calls = Arc::new(AtomicUsize::new(0));
        let second_calls = Arc::new(AtomicUsize::new(0));

        let first = registry.next_id();
        registry.insert(
            "ping",
            first,
            ListenerMode::On,
            counting(&first_calls, Some(json!("first"))),
        );
        let second = registry.next_id();
        registry.insert(
            "ping",
            second,
            ListenerMode::On,
            counting(&second_calls, Some(json!("second"))),
        );

        let reply = registry.dispatch("ping", message("ping")).await.unwrap();
        assert_eq!(reply, Some(json!("first")));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_stops_the_run() {
        let registry = ListenerRegistry::new();
        let later_calls = Arc::new(AtomicUsize::new(0));

        let failing = registry.next_id();
        registry.insert(
            "ping",
            failing,
            ListenerMode::On,
            Arc::new(|_message| Box::pin(async { Err("boom".to_string()) })),
        );
        let later = registry.next_id();
        registry.insert("ping", later, ListenerMode::On, counting(&later_calls, None));

        let outcome = registry.dispatch("ping", message("ping")).await;
        assert_eq!(outcome, Err("boom".to_string()));
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_once_runs_exactly_once() {
        let registry = ListenerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let id = registry.next_id();
        registry.insert("tick", id, ListenerMode::Once, counting(&calls, None));

        registry.dispatch("tick", message("tick")).await.unwrap();
        registry.dispatch("tick", message("tick")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.count("tick"), 0);
    }

    #[tokio::test]
    async fn test_once_survives_an_aborted_run() {
        let registry = ListenerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = registry.next_id();
        registry.insert(
            "job",
            failing,
            ListenerMode::On,
            Arc::new(|_message| Box::pin(async { Err("boom".to_string()) })),
        );
        let one_shot = registry.next_id();
        registry.insert(
            "job",
            one_shot,
            ListenerMode::Once,
            counting(&calls, Some(json!("handled"))),
        );

        // The failure aborts the run before the one-shot entry is
        // reached; never invoked, it stays registered.
        let outcome = registry.dispatch("job", message("job")).await;
        assert_eq!(outcome, Err("boom".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(registry.count("job"), 2);

        registry.remove(failing);
        let reply = registry.dispatch("job", message("job")).await.unwrap();
        assert_eq!(reply, Some(json!("handled")));

        let reply = registry.dispatch("job", message("job")).await.unwrap();
        assert_eq!(reply, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remove_by_id() {
        let registry = ListenerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let id = registry.next_id();
        registry.insert("tick", id, ListenerMode::On, counting(&calls, None));

        assert_eq!(registry.remove(id), Some("tick".to_string()));
        assert_eq!(registry.remove(id), None);

        registry.dispatch("tick", message("tick")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_remove_all_clears_ordinary_events() {
        let registry = ListenerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let id = registry.next_id();
            registry.insert("tick", id, ListenerMode::On, counting(&calls, None));
        }

        assert_eq!(registry.remove_all("tick"), 3);
        assert_eq!(registry.count("tick"), 0);
    }

    #[tokio::test]
    async fn test_remove_all_spares_the_internal_listener() {
        let registry = ListenerRegistry::new();
        let internal_calls = Arc::new(AtomicUsize::new(0));
        let user_calls = Arc::new(AtomicUsize::new(0));

        let event = format!("{}ports", INTERNAL_EVENT_PREFIX);
        let internal = registry.next_id();
        registry.insert(
            &event,
            internal,
            ListenerMode::On,
            counting(&internal_calls, None),
        );
        let user = registry.next_id();
        registry.insert(&event, user, ListenerMode::On, counting(&user_calls, None));

        assert_eq!(registry.remove_all(&event), 1);
        assert_eq!(registry.count(&event), 1);

        registry.dispatch(&event, message(&event)).await.unwrap();
        assert_eq!(internal_calls.load(Ordering::SeqCst), 1);
        assert_eq!(user_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dispatch_without_listeners_replies_nothing() {
        let registry = ListenerRegistry::new();
        let reply = registry.dispatch("ghost", message("ghost")).await.unwrap();
        assert_eq!(reply, None);
    }
}
