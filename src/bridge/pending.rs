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

//! Tracking of in-flight requests awaiting responses.
//!
//! Every [`send`](crate::Bridge::send) registers its message id here before
//! the packet leaves the node, so a response arriving immediately still
//! finds its waiter. Requests stay registered until a response resolves
//! them or the destination disconnects; there is no timeout.

use crate::error::BridgeError;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{oneshot, Mutex};

/// The outcome a waiter receives: the response payload or a failure.
pub type RequestOutcome = Result<Value, BridgeError>;

struct PendingRequest {
    destination: String,
    resolver: oneshot::Sender<RequestOutcome>,
}

/// In-flight requests keyed by message id.
///
/// Each entry remembers which port the request went to, so a peer
/// disconnection can reject exactly the requests that were waiting on
/// that peer.
///
/// # Thread Safety
///
/// All operations take `&self` and may be called from any task.
///
/// # Example
///
/// ```rust
/// use exbridge::PendingRequests;
/// use serde_json::json;
///
/// # async fn example() {
/// let pending = PendingRequests::new();
/// let waiter = pending.register(1, "background").await;
///
/// pending.complete(1, Ok(json!(42))).await;
/// assert_eq!(waiter.await.unwrap().unwrap(), json!(42));
/// # }
/// ```
#[derive(Default)]
pub struct PendingRequests {
    requests: Mutex<HashMap<u64, PendingRequest>>,
}

impl PendingRequests {
    /// Creates an empty request table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request and returns the channel its outcome arrives on.
    ///
    /// Must be called before the request packet is transmitted, otherwise
    /// a fast responder could answer before the waiter exists.
    pub async fn register(&self, id: u64, destination: impl Into<String>) -> oneshot::Receiver<RequestOutcome> {
        let (resolver, waiter) = oneshot::channel();
        self.requests.lock().await.insert(
            id,
            PendingRequest {
                destination: destination.into(),
                resolver,
            },
        );
        waiter
    }

    /// Resolves the request registered under `id`.
    ///
    /// Returns `true` when a waiter was found and received the outcome;
    /// `false` when no request with that id was pending.
    pub async fn complete(&self, id: u64, outcome: RequestOutcome) -> bool {
        match self.requests.lock().await.remove(&id) {
            Some(request) => request.resolver.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Removes a request without resolving it.
    ///
    /// Used when transmission fails and the caller reports the failure
    /// directly instead of through the waiter.
    pub async fn discard(&self, id: u64) -> bool {
        self.requests.lock().await.remove(&id).is_some()
    }

    /// Rejects every request that was waiting on `port`.
    ///
    /// Each waiter receives [`BridgeError::ConnectionClosed`]. Returns the
    /// number of requests rejected.
    pub async fn drop_all_for(&self, port: &str) -> usize {
        let mut requests = self.requests.lock().await;
        let ids: Vec<u64> = requests
            .iter()
            .filter(|(_, request)| request.destination == port)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some(request) = requests.remove(id) {
                let _ = request.resolver.send(Err(BridgeError::ConnectionClosed {
                    port: request.destination,
                }));
            }
        }
        ids.len()
    }

    /// Rejects every pending request, whatever it was waiting on.
    ///
    /// Returns the number of requests rejected.
    pub async fn drop_all(&self) -> usize {
        let mut requests = self.requests.lock().await;
        let count = requests.len();
        for (_, request) in requests.drain() {
            let _ = request.resolver.send(Err(BridgeError::ConnectionClosed {
                port: request.destination,
            }));
        }
        count
    }

    /// Number of requests currently awaiting a response.
    pub async fn len(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Returns `true` when nothing is in flight.
    pub async fn is_empty(&self) -> bool {
        self.requests.lock().await.is_empty()
    }
}

impl std::fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequests").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_then_complete() {
        let pending = PendingRequests::new();
        let waiter = pending.register(1, "background").await;
        assert_eq!(pending.len().await, 1);

        assert!(pending.complete(1, Ok(json!("done"))).await);
        assert_eq!(waiter.await.unwrap().unwrap(), json!("done"));
        assert!(pending.is_empty().await);
    }

    #[tokio::test]
    async fn test_complete_unknown_id_reports_no_waiter() {
        let pending = PendingRequests::new();
        assert!(!pending.complete(99, Ok(json!(null))).await);
    }

    #[tokio::test]
    async fn test_discard_leaves_waiter_hanging() {
        let pending = PendingRequests::new();
        let waiter = pending.register(1, "background").await;

        assert!(pending.discard(1).await);
        assert!(!pending.discard(1).await);
        assert!(waiter.await.is_err());
    }

    #[tokio::test]
    async fn test_drop_all_for_rejects_only_that_destination() {
        let pending = PendingRequests::new();
        let to_app = pending.register(1, "app").await;
        let to_content = pending.register(2, "content@tab-1").await;

        assert_eq!(pending.drop_all_for("app").await, 1);
        assert_eq!(pending.len().await, 1);

        let outcome = to_app.await.unwrap();
        assert!(matches!(
            outcome,
            Err(BridgeError::ConnectionClosed { port }) if port == "app"
        ));

        pending.complete(2, Ok(json!(1))).await;
        assert!(to_content.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_drop_all_rejects_everything() {
        let pending = PendingRequests::new();
        let first = pending.register(1, "background").await;
        let second = pending.register(2, "content@tab-3").await;

        assert_eq!(pending.drop_all().await, 2);
        assert!(pending.is_empty().await);

        assert!(matches!(
            first.await.unwrap(),
            Err(BridgeError::ConnectionClosed { port }) if port == "background"
        ));
        assert!(matches!(
            second.await.unwrap(),
            Err(BridgeError::ConnectionClosed { port }) if port == "content@tab-3"
        ));
    }

    #[tokio::test]
    async fn test_reregistering_an_id_replaces_the_waiter() {
        let pending = PendingRequests::new();
        let stale = pending.register(1, "background").await;
        let fresh = pending.register(1, "background").await;

        pending.complete(1, Ok(json!("latest"))).await;
        assert!(stale.await.is_err());
        assert_eq!(fresh.await.unwrap().unwrap(), json!("latest"));
    }
}

// Made with Bob
