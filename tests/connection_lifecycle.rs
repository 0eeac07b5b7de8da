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

//! Integration tests for the connection lifecycle.
//!
//! These tests verify that bridges correctly handle:
//! - Connecting to the hub and resolving with a current port list
//! - Usage errors on double connects and stray disconnects
//! - Input validation before a message leaves the node
//! - Reconnecting after a voluntary disconnect
//! - Requests in flight when the connection goes away
//! - A hub appearing after a failed attempt, and disappearing entirely

use exbridge::{Bridge, BridgeError, BridgeOptions, NativeRuntime};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn runtime() -> Arc<NativeRuntime> {
    Arc::new(NativeRuntime::new())
}

#[tokio::test]
async fn test_connect_resolves_with_a_current_port_list() {
    let runtime = runtime();
    let _hub = Bridge::new(runtime.clone(), BridgeOptions::background());
    let app = Bridge::new(runtime.clone(), BridgeOptions::app());

    assert!(!app.is_connected());
    app.connect_to_background().await.unwrap();
    assert!(app.is_connected());

    // The connect waited for the first announcement, so the list is
    // usable without settling time. Nobody else is connected yet.
    assert!(app.port_list().await.is_empty());
}

#[tokio::test]
async fn test_connect_sees_existing_peers_immediately() {
    let runtime = runtime();
    let _hub = Bridge::new(runtime.clone(), BridgeOptions::background());
    let content = Bridge::new(runtime.clone(), BridgeOptions::content("sidebar"));
    content.connect_to_background().await.unwrap();

    let app = Bridge::new(runtime.clone(), BridgeOptions::app());
    app.connect_to_background().await.unwrap();

    let listed = app.port_list().await;
    assert_eq!(listed, vec![content.port_name().to_string()]);
}

#[tokio::test]
async fn test_double_connect_is_rejected() {
    let runtime = runtime();
    let _hub = Bridge::new(runtime.clone(), BridgeOptions::background());
    let app = Bridge::new(runtime.clone(), BridgeOptions::app());

    app.connect_to_background().await.unwrap();
    let failure = app.connect_to_background().await.unwrap_err();
    assert!(matches!(failure, BridgeError::AlreadyConnected));
    assert!(failure.is_usage());

    // The established connection is untouched.
    assert!(app.is_connected());
}

#[tokio::test]
async fn test_disconnect_requires_a_connection() {
    let runtime = runtime();
    let app = Bridge::new(runtime.clone(), BridgeOptions::app());

    let failure = app.disconnect_from_background().await.unwrap_err();
    assert!(matches!(failure, BridgeError::NotConnected));
}

#[tokio::test]
async fn test_send_validates_its_inputs_before_transmitting() {
    let runtime = runtime();
    let _hub = Bridge::new(runtime.clone(), BridgeOptions::background());

    let offline = Bridge::new(runtime.clone(), BridgeOptions::app());
    let failure = offline.send("anything", "background", None).await.unwrap_err();
    assert!(matches!(failure, BridgeError::NotConnected));

    let app = Bridge::new(runtime.clone(), BridgeOptions::app());
    app.connect_to_background().await.unwrap();

    let failure = app.send("", "background", None).await.unwrap_err();
    assert!(matches!(failure, BridgeError::MissingEvent));

    let failure = app.send("anything", "", None).await.unwrap_err();
    assert!(matches!(failure, BridgeError::MissingTarget));
}

#[tokio::test]
async fn test_reconnect_after_disconnect() {
    let runtime = runtime();
    let hub = Bridge::new(runtime.clone(), BridgeOptions::background());
    hub.on("echo", |message| async move { Ok(Some(message.payload)) });

    let content = Bridge::new(runtime.clone(), BridgeOptions::content("sidebar"));
    content.connect_to_background().await.unwrap();

    let app = Bridge::new(runtime.clone(), BridgeOptions::app());
    app.connect_to_background().await.unwrap();
    app.disconnect_from_background().await.unwrap();
    assert!(!app.is_connected());
    assert!(app.port_list().await.is_empty());

    app.connect_to_background().await.unwrap();
    assert!(app.is_connected());

    // The fresh announcement repopulated the list before connect returned.
    assert_eq!(app.port_list().await, vec![content.port_name().to_string()]);

    let reply = app.send("echo", "background", json!("again")).await.unwrap();
    assert_eq!(reply, json!("again"));
}

#[tokio::test]
async fn test_disconnect_rejects_requests_in_flight() {
    let runtime = runtime();
    let hub = Bridge::new(runtime.clone(), BridgeOptions::background());
    hub.on("hang", |_message| async move {
        sleep(Duration::from_secs(3600)).await;
        Ok(None)
    });

    let app = Bridge::new(runtime.clone(), BridgeOptions::app());
    app.connect_to_background().await.unwrap();

    let sender = {
        let app = app.clone();
        tokio::spawn(async move { app.send("hang", "background", None).await })
    };

    // Give the request time to reach the hanging listener.
    sleep(Duration::from_millis(50)).await;
    app.disconnect_from_background().await.unwrap();

    let failure = sender.await.unwrap().unwrap_err();
    match &failure {
        BridgeError::ConnectionClosed { port } => assert_eq!(port, "background"),
        other => panic!("expected a closed connection error, got {:?}", other),
    }
    assert!(failure.is_disconnection());
}

#[tokio::test]
async fn test_connect_succeeds_once_a_hub_appears() {
    let runtime = runtime();
    let app = Bridge::new(runtime.clone(), BridgeOptions::app());

    let failure = app.connect_to_background().await.unwrap_err();
    assert!(matches!(failure, BridgeError::ConnectFailed));
    assert!(!app.is_connected());

    let _hub = Bridge::new(runtime.clone(), BridgeOptions::background());
    app.connect_to_background().await.unwrap();
    assert!(app.is_connected());
}

#[tokio::test]
async fn test_losing_the_hub_disconnects_spokes() {
    let runtime = runtime();
    let hub = Bridge::new(runtime.clone(), BridgeOptions::background());
    let app = Bridge::new(runtime.clone(), BridgeOptions::app());
    app.connect_to_background().await.unwrap();

    drop(hub);
    for _ in 0..200 {
        if !app.is_connected() {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    assert!(!app.is_connected());

    let failure = app.send("anything", "background", None).await.unwrap_err();
    assert!(matches!(failure, BridgeError::NotConnected));
}
