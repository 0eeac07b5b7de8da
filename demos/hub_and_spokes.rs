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

//! Hub-and-spokes walkthrough covering the whole messaging surface.
//!
//! One process stands in for a browser extension: a background hub plus an
//! app spoke and a content-script spoke, all wired through the same
//! in-process runtime.
//!
//! # Features Demonstrated
//! - Connecting spokes to the background hub
//! - Request-response messaging in both directions
//! - Spoke-to-spoke requests relayed through the hub
//! - Array payloads travelling chunked
//! - Port list announcements on connect and disconnect
//!
//! # Running the Example
//! ```bash
//! RUST_LOG=debug cargo run --example hub_and_spokes
//! ```

use exbridge::{Bridge, BridgeOptions, NativeRuntime};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Hub and Spokes Walkthrough ===\n");

    let runtime = Arc::new(NativeRuntime::new());
    let background = Bridge::new(runtime.clone(), BridgeOptions::background().debug(true));
    let app = Bridge::new(runtime.clone(), BridgeOptions::app());
    let content = Bridge::new(runtime.clone(), BridgeOptions::content("toolbar"));

    // The hub serves arithmetic to anyone who asks.
    background.on("sum", |message| async move {
        let a = message.payload["a"].as_i64().unwrap_or(0);
        let b = message.payload["b"].as_i64().unwrap_or(0);
        Ok(Some(json!(a + b)))
    });

    // The app spoke answers identity questions, including relayed ones.
    app.on("describe", |message| async move {
        Ok(Some(json!(format!("app here, asked by {}", message.from))))
    });

    // The content spoke reverses whatever list it is handed.
    content.on("reverse", |message| async move {
        let mut items = message.payload.as_array().cloned().unwrap_or_default();
        items.reverse();
        Ok(Some(serde_json::Value::Array(items)))
    });

    app.connect_to_background().await?;
    println!("✓ App connected, sees ports: {:?}", app.port_list().await);

    content.connect_to_background().await?;
    println!(
        "✓ Content connected as \"{}\", sees ports: {:?}",
        content.port_name(),
        content.port_list().await
    );

    // Spoke to hub.
    println!("\n→ app asks the background for 1 + 2");
    let sum = app.send("sum", "background", json!({ "a": 1, "b": 2 })).await?;
    println!("← background answered: {}", sum);

    // Hub to spoke.
    println!("\n→ background asks the app to describe itself");
    let description = background.send("describe", "app", None).await?;
    println!("← app answered: {}", description);

    // Spoke to spoke, relayed through the hub.
    println!("\n→ content asks the app to describe itself");
    let description = content.send("describe", "app", None).await?;
    println!("← app answered: {}", description);

    // Array payloads chunk on the wire and reassemble on arrival.
    println!("\n→ app sends [1, 2, 3, 4] to the content context");
    let reversed = app
        .send("reverse", content.port_name(), json!([1, 2, 3, 4]))
        .await?;
    println!("← content answered: {}", reversed);

    // Departures propagate to everyone left behind.
    content.disconnect_from_background().await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!(
        "\n✓ Content disconnected, app now sees ports: {:?}",
        app.port_list().await
    );

    println!("\n=== Walkthrough Complete ===");
    Ok(())
}

// Made with Bob
