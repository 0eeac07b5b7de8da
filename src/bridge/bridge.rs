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

//! The bridge node itself.
//!
//! One [`Bridge`] instance runs per context. The hub owns a port per
//! connected spoke and relays packets between them without decoding;
//! spokes own a single port to the hub. Each port has a dedicated reader
//! task that processes packets inline, which keeps chunk reassembly and
//! relay ordering intact; only listener dispatch is spawned off so a slow
//! listener cannot stall the reader. Topology announcements are applied
//! by one serialized worker per spoke so updates land in arrival order.

use crate::bridge::codec::{self, ChunkAnomaly, Reassembler};
use crate::bridge::correlation::MessageIdGenerator;
use crate::bridge::listener::{
    BridgeMessage, ListenerCallback, ListenerId, ListenerMode, ListenerRegistry,
};
use crate::bridge::pending::{PendingRequests, RequestOutcome};
use crate::bridge::topology::{
    content_port_name, is_valid_port_name, PortEntry, PortTable, PortsUpdate, APP_PORT_NAME,
    HUB_PORT_NAME, PORTS_EVENT,
};
use crate::bridge::{BridgeOptions, ContextKind};
use crate::error::{BridgeError, RemoteError};
use crate::packet::{self, Message, MessageProps, MessageType, Packet};
use crate::transport::{NativeRuntime, Port, PortReceiver, TransportError};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One node of a hub-and-spoke messaging topology.
///
/// Cloning a `Bridge` is cheap and every clone drives the same node.
/// Dropping the last clone tears the node down: its reader tasks stop and
/// its ports close.
///
/// # Example
///
/// ```rust
/// use exbridge::{Bridge, BridgeOptions, NativeRuntime};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), exbridge::BridgeError> {
/// let runtime = Arc::new(NativeRuntime::new());
///
/// let hub = Bridge::new(runtime.clone(), BridgeOptions::background());
/// hub.on("greet", |message| async move {
///     Ok(Some(json!(format!("hello {}", message.from))))
/// });
///
/// let app = Bridge::new(runtime.clone(), BridgeOptions::app());
/// app.connect_to_background().await?;
///
/// let reply = app.send("greet", "background", None).await?;
/// assert_eq!(reply, json!("hello app"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

struct Inner {
    kind: ContextKind,
    port_name: String,
    debug: AtomicBool,
    /// Spokes: whether the hub handshake has completed. Always true on
    /// the hub itself.
    connected: AtomicBool,
    /// Guards against overlapping connection attempts.
    connecting: AtomicBool,
    runtime: Arc<NativeRuntime>,
    ids: MessageIdGenerator,
    serials: AtomicU64,
    pending: PendingRequests,
    listeners: ListenerRegistry,
    reassembly: Reassembler,
    /// Connected ports. The hub holds one entry per spoke; a spoke holds
    /// at most the single entry for the hub.
    ports: AsyncMutex<PortTable>,
    /// Spoke-side cache of the hub's last announcement.
    port_list: RwLock<Vec<String>>,
    /// Serializes hub announcements so overlapping topology changes
    /// cannot interleave their per-recipient sends.
    publishing: AsyncMutex<()>,
    /// Resolver for the connection attempt in progress, if any.
    handshake: Mutex<Option<oneshot::Sender<Result<(), BridgeError>>>>,
    /// Feed of the spoke's topology worker.
    topology_tx: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    /// Long-lived tasks: the hub's acceptor or the spoke's topology
    /// worker. Port reader handles live with their entries instead.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Bridge {
    /// Creates the bridge node for one context and starts its machinery.
    ///
    /// The hub immediately begins accepting connections on `runtime`.
    /// Spokes stay idle until [`connect_to_background`] is called.
    ///
    /// [`connect_to_background`]: Bridge::connect_to_background
    #[must_use]
    pub fn new(runtime: Arc<NativeRuntime>, options: BridgeOptions) -> Self {
        let kind = options.kind();
        let port_name = match kind {
            ContextKind::Background => HUB_PORT_NAME.to_string(),
            ContextKind::App => APP_PORT_NAME.to_string(),
            ContextKind::Content => content_port_name(options.page_name().unwrap_or("content")),
        };

        let bridge = Self {
            inner: Arc::new(Inner {
                kind,
                port_name,
                debug: AtomicBool::new(options.debug_enabled()),
                connected: AtomicBool::new(kind == ContextKind::Background),
                connecting: AtomicBool::new(false),
                runtime,
                ids: MessageIdGenerator::new(),
                serials: AtomicU64::new(1),
                pending: PendingRequests::new(),
                listeners: ListenerRegistry::new(),
                reassembly: Reassembler::new(),
                ports: AsyncMutex::new(PortTable::new()),
                port_list: RwLock::new(Vec::new()),
                publishing: AsyncMutex::new(()),
                handshake: Mutex::new(None),
                topology_tx: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        };

        match kind {
            ContextKind::Background => bridge.start_hub(),
            ContextKind::App | ContextKind::Content => bridge.start_spoke(),
        }
        bridge
    }

    /// Registers a listener for `event`.
    ///
    /// Listeners for the same event run in registration order on every
    /// delivery. The first one to return a value decides the response
    /// payload; returning `Ok(None)` passes. Returning `Err` stops the
    /// run and sends the error back to the sender.
    ///
    /// Registering with an empty event name is ignored with a warning and
    /// the returned id removes nothing.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use serde_json::json;
    /// # fn example(bridge: exbridge::Bridge) {
    /// let id = bridge.on("sum", |message| async move {
    ///     let a = message.payload["a"].as_i64().unwrap_or(0);
    ///     let b = message.payload["b"].as_i64().unwrap_or(0);
    ///     Ok(Some(json!(a + b)))
    /// });
    /// bridge.off(id);
    /// # }
    /// ```
    pub fn on<F, Fut>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(BridgeMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, String>> + Send + 'static,
    {
        self.register_listener(event, ListenerMode::On, callback)
    }

    /// Registers a listener that unregisters itself after one delivery.
    pub fn once<F, Fut>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(BridgeMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, String>> + Send + 'static,
    {
        self.register_listener(event, ListenerMode::Once, callback)
    }

    /// Removes the listener registered under `id`.
    ///
    /// Removing an id that is not registered is not an error; it logs a
    /// warning and does nothing.
    pub fn off(&self, id: ListenerId) {
        match self.inner.listeners.remove(id) {
            Some(event) => self.log_with("Listener removed", &event),
            None => self.warn_with("Tried to remove an unknown listener", &id),
        }
    }

    /// Removes every listener for `event`.
    ///
    /// Events reserved by the bridge keep their internal listener; only
    /// user registrations are removed.
    pub fn off_all(&self, event: &str) {
        let removed = self.inner.listeners.remove_all(event);
        self.log_with("Listeners removed", &(event, removed));
    }

    /// Sends `event` to the node named `to` and awaits the response.
    ///
    /// The returned value is whatever the responding listener produced,
    /// or `Value::Null` when no listener claimed the event. There is no
    /// timeout: the call resolves when the response arrives or rejects
    /// when the destination disconnects while the request is in flight.
    ///
    /// Array payloads are chunked on the wire and reassembled on the
    /// receiving side; callers never see the difference.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::NotConnected`] when a spoke has no hub connection
    /// - [`BridgeError::MissingEvent`] / [`BridgeError::MissingTarget`]
    ///   when `event` or `to` is empty
    /// - [`BridgeError::UnknownPort`] when `to` is not currently reachable
    /// - [`BridgeError::ConnectionClosed`] when the destination goes away
    ///   before the response arrives
    /// - [`BridgeError::Remote`] when the responding listener failed
    ///
    /// # Example
    ///
    /// ```rust
    /// # use serde_json::json;
    /// # async fn example(bridge: exbridge::Bridge) -> Result<(), exbridge::BridgeError> {
    /// let sum = bridge.send("sum", "background", json!({ "a": 1, "b": 2 })).await?;
    /// assert_eq!(sum, json!(3));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn send(
        &self,
        event: &str,
        to: &str,
        payload: impl Into<Option<Value>>,
    ) -> Result<Value, BridgeError> {
        let waiter = self.begin_send(event, to, payload.into()).await?;
        match waiter.await {
            Ok(outcome) => outcome,
            Err(_) => Err(BridgeError::ConnectionClosed {
                port: to.to_string(),
            }),
        }
    }

    /// Connects this spoke to the hub.
    ///
    /// Resolves once the hub has accepted the connection and its first
    /// topology announcement has been applied, so
    /// [`port_list`](Bridge::port_list) is already meaningful afterwards.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::HubDoesNotConnect`] on the hub node
    /// - [`BridgeError::AlreadyConnected`] when connected or while another
    ///   attempt is in progress
    /// - [`BridgeError::ConnectFailed`] when no hub is accepting
    ///   connections or the hub dropped the port
    pub async fn connect_to_background(&self) -> Result<(), BridgeError> {
        if self.is_hub() {
            return Err(BridgeError::HubDoesNotConnect);
        }
        if self.is_connected() {
            return Err(BridgeError::AlreadyConnected);
        }
        if self
            .inner
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BridgeError::AlreadyConnected);
        }

        let (resolver, waiter) = oneshot::channel();
        *self.inner.handshake.lock() = Some(resolver);

        let mut port = self.inner.runtime.connect(self.inner.port_name.clone());
        let receiver = match port.take_receiver() {
            Some(receiver) => receiver,
            None => {
                self.abandon_connect().await;
                return Err(BridgeError::ConnectFailed);
            }
        };
        {
            // Insert under the same lock hold that spawns the reader, so
            // the reader never observes a table without its own entry.
            let mut ports = self.inner.ports.lock().await;
            let reader = self.spawn_spoke_reader(receiver);
            ports.insert(PortEntry {
                name: HUB_PORT_NAME.to_string(),
                serial: 0,
                port,
                reader,
            });
        }

        match waiter.await {
            Ok(Ok(())) => {
                self.inner.connecting.store(false, Ordering::SeqCst);
                self.log("Connected to the background");
                Ok(())
            }
            Ok(Err(error)) => {
                self.abandon_connect().await;
                Err(error)
            }
            Err(_) => {
                self.abandon_connect().await;
                Err(BridgeError::ConnectFailed)
            }
        }
    }

    /// Disconnects this spoke from the hub.
    ///
    /// Every request still awaiting a response rejects with
    /// [`BridgeError::ConnectionClosed`], partial chunked transfers are
    /// discarded, and the hub announces the departure to the remaining
    /// spokes.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::HubDoesNotDisconnect`] on the hub node
    /// - [`BridgeError::NotConnected`] when there is nothing to disconnect
    pub async fn disconnect_from_background(&self) -> Result<(), BridgeError> {
        if self.is_hub() {
            return Err(BridgeError::HubDoesNotDisconnect);
        }
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return Err(BridgeError::NotConnected);
        }

        let removed = { self.inner.ports.lock().await.remove(HUB_PORT_NAME) };
        if let Some(entry) = removed {
            entry.reader.abort();
            entry.port.disconnect();
        }
        self.inner.port_list.write().await.clear();

        let rejected = self.inner.pending.drop_all().await;
        if rejected > 0 {
            self.log_with("Rejected requests pending at disconnect", &rejected);
        }
        self.inner.reassembly.clear().await;
        self.log("Disconnected from the background");
        Ok(())
    }

    /// Name this node is addressed by.
    #[must_use]
    pub fn port_name(&self) -> &str {
        &self.inner.port_name
    }

    /// Which kind of context this node lives in.
    #[must_use]
    pub fn context_kind(&self) -> ContextKind {
        self.inner.kind
    }

    /// Whether this spoke currently holds a hub connection. The hub
    /// itself always reports `true`.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Names of the peers currently reachable from this node.
    ///
    /// On the hub this is the live connection table; on a spoke it is the
    /// hub's last announcement. Neither includes the node itself, and a
    /// spoke's list never includes the hub.
    pub async fn port_list(&self) -> Vec<String> {
        if self.is_hub() {
            self.inner.ports.lock().await.names()
        } else {
            self.inner.port_list.read().await.clone()
        }
    }

    /// Turns debug logging on or off at runtime.
    pub fn set_debug(&self, debug: bool) {
        self.inner.debug.store(debug, Ordering::SeqCst);
    }

    /// Emits a debug record tagged with this node's port name.
    ///
    /// Silent unless debug logging is enabled, either through
    /// [`BridgeOptions::debug`](crate::BridgeOptions::debug) or
    /// [`set_debug`](Bridge::set_debug). The bridge logs its own protocol
    /// activity through the same channel.
    pub fn log(&self, message: &str) {
        if self.inner.debug.load(Ordering::Relaxed) {
            debug!(port = %self.inner.port_name, "{}", message);
        }
    }

    /// Like [`log`](Bridge::log), with a structured detail attached.
    pub fn log_with<D: fmt::Debug>(&self, message: &str, detail: &D) {
        if self.inner.debug.load(Ordering::Relaxed) {
            debug!(port = %self.inner.port_name, detail = ?detail, "{}", message);
        }
    }

    /// Emits a warning tagged with this node's port name.
    ///
    /// Warnings are emitted regardless of the debug flag.
    pub fn warn(&self, message: &str) {
        warn!(port = %self.inner.port_name, "{}", message);
    }

    /// Like [`warn`](Bridge::warn), with a structured detail attached.
    pub fn warn_with<D: fmt::Debug>(&self, message: &str, detail: &D) {
        warn!(port = %self.inner.port_name, detail = ?detail, "{}", message);
    }

    // ---- node startup ----------------------------------------------------

    fn start_hub(&self) {
        let mut listener = self.inner.runtime.incoming();
        let weak = Arc::downgrade(&self.inner);
        let acceptor = tokio::spawn(async move {
            while let Some(port) = listener.accept().await {
                let inner = match weak.upgrade() {
                    Some(inner) => inner,
                    None => return,
                };
                Bridge { inner }.accept_peer(port).await;
            }
        });
        self.inner.tasks.lock().push(acceptor);
    }

    fn start_spoke(&self) {
        let (topology_tx, mut topology_rx) = mpsc::unbounded_channel();
        *self.inner.topology_tx.lock() = Some(topology_tx);

        // The bookkeeping listener goes in before any user listener can,
        // so the cache is already updated when user listeners observe a
        // topology event.
        let weak = Arc::downgrade(&self.inner);
        let callback: ListenerCallback = Arc::new(move |message: BridgeMessage| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    Bridge { inner }.apply_ports_update(&message.payload).await;
                }
                Ok(None)
            })
        });
        let id = self.inner.listeners.next_id();
        self.inner
            .listeners
            .insert(PORTS_EVENT, id, ListenerMode::On, callback);

        let weak = Arc::downgrade(&self.inner);
        let worker = tokio::spawn(async move {
            while let Some(message) = topology_rx.recv().await {
                let inner = match weak.upgrade() {
                    Some(inner) => inner,
                    None => return,
                };
                Bridge { inner }.dispatch_and_respond(message).await;
            }
        });
        self.inner.tasks.lock().push(worker);
    }

    // ---- listener plumbing -----------------------------------------------

    fn register_listener<F, Fut>(&self, event: &str, mode: ListenerMode, callback: F) -> ListenerId
    where
        F: Fn(BridgeMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, String>> + Send + 'static,
    {
        let id = self.inner.listeners.next_id();
        if event.is_empty() {
            self.warn("Ignored a listener registered without an event name");
            return id;
        }
        let callback: ListenerCallback =
            Arc::new(move |message| Box::pin(callback(message)));
        self.inner.listeners.insert(event, id, mode, callback);
        self.log_with("Listener registered", &event);
        id
    }

    // ---- sending ---------------------------------------------------------

    /// Validates, registers and transmits a request, returning the waiter
    /// its outcome arrives on.
    async fn begin_send(
        &self,
        event: &str,
        to: &str,
        payload: Option<Value>,
    ) -> Result<oneshot::Receiver<RequestOutcome>, BridgeError> {
        if !self.is_connected() {
            return Err(BridgeError::NotConnected);
        }
        if event.is_empty() {
            return Err(BridgeError::MissingEvent);
        }
        if to.is_empty() {
            return Err(BridgeError::MissingTarget);
        }
        if !self.is_reachable(to).await {
            return Err(BridgeError::UnknownPort {
                port: to.to_string(),
            });
        }

        let id = self.inner.ids.next();
        // Registered before transmission so a response racing back cannot
        // miss its waiter.
        let waiter = self.inner.pending.register(id, to).await;
        let message = Message {
            id,
            from: self.inner.port_name.clone(),
            to: to.to_string(),
            message_type: MessageType::EventSend,
            props: MessageProps::for_event(event),
            payload,
        };
        if let Err(error) = self.transmit_message(message).await {
            self.inner.pending.discard(id).await;
            return Err(error);
        }
        // The destination may have vanished mid-transmission; posting into
        // a port that closed moments ago does not fail. If the request is
        // already resolved the discard finds nothing and the waiter wins.
        if !self.is_reachable(to).await && self.inner.pending.discard(id).await {
            return Err(BridgeError::ConnectionClosed {
                port: to.to_string(),
            });
        }
        Ok(waiter)
    }

    async fn is_reachable(&self, to: &str) -> bool {
        if self.is_hub() {
            self.inner.ports.lock().await.contains(to)
        } else if to == HUB_PORT_NAME {
            self.is_connected()
        } else {
            self.inner.port_list.read().await.iter().any(|name| name == to)
        }
    }

    /// Encodes a message and posts its packets in order.
    ///
    /// If a chunked transmission fails partway, a best-effort abort packet
    /// tells the receiver to discard what already arrived.
    async fn transmit_message(&self, message: Message) -> Result<(), BridgeError> {
        let id = message.id;
        let to = message.to.clone();
        let packets = codec::encode(message);
        let chunked = matches!(packets.first(), Some(Packet::Chunk(_)));
        for packet in &packets {
            if let Err(error) = self.transmit_packet(&to, packet).await {
                if chunked {
                    let abort = codec::abort_packet(id, &self.inner.port_name, &to);
                    let _ = self.transmit_packet(&to, &abort).await;
                }
                return Err(error);
            }
        }
        Ok(())
    }

    async fn transmit_packet(&self, to: &str, packet: &Packet) -> Result<(), BridgeError> {
        let value = serde_json::to_value(packet).map_err(|source| BridgeError::Transport {
            port: to.to_string(),
            source: TransportError::Encode { source },
        })?;
        self.transmit_raw(to, value).await
    }

    /// Posts an already-encoded value towards `to`: directly on the hub,
    /// via the hub port on a spoke.
    async fn transmit_raw(&self, to: &str, value: Value) -> Result<(), BridgeError> {
        let ports = self.inner.ports.lock().await;
        let via = if self.is_hub() { to } else { HUB_PORT_NAME };
        match ports.get(via) {
            Some(entry) => entry.port.post(value).map_err(|source| BridgeError::Transport {
                port: to.to_string(),
                source,
            }),
            None => Err(BridgeError::UnknownPort {
                port: to.to_string(),
            }),
        }
    }

    // ---- receiving -------------------------------------------------------

    /// Triage for every value read off a port.
    ///
    /// Values addressed elsewhere are passed on undecoded: straight to the
    /// destination port on the hub, towards the hub from anywhere else.
    /// Only values addressed to this node are decoded.
    async fn handle_incoming(&self, value: Value) {
        if !packet::looks_like_packet(&value) {
            self.log_with("Discarded a value that is not a packet", &value);
            return;
        }
        let to = packet::packet_target(&value).unwrap_or_default();
        if to != self.inner.port_name {
            self.relay(value).await;
            return;
        }

        let decoded: Packet = match serde_json::from_value(value) {
            Ok(packet) => packet,
            Err(error) => {
                self.warn_with("Discarded an undecodable packet", &error);
                return;
            }
        };
        match decoded {
            Packet::Full(full) => self.handle_message(Message::from(full)).await,
            Packet::Chunk(chunk) => {
                let from = chunk.from.clone();
                let id = chunk.id;
                let progress = self.inner.reassembly.accept(chunk).await;
                if let Some(anomaly) = progress.anomaly {
                    self.warn_chunk(anomaly, &from, id);
                }
                if let Some(message) = progress.message {
                    self.handle_message(message).await;
                }
            }
            Packet::ChunkAbort(abort) => {
                if self.inner.reassembly.abort(&abort.from, abort.id).await {
                    self.log_with("Chunked transfer aborted by its sender", &abort.from);
                }
            }
        }
    }

    /// Store-and-forward: pass a packet through untouched.
    ///
    /// When the next hop is gone the original sender gets a synthetic
    /// quiet error response, so a request does not hang on a port that
    /// disappeared between lookup and delivery.
    async fn relay(&self, value: Value) {
        let to = packet::packet_target(&value).unwrap_or_default().to_string();
        let from = packet::packet_source(&value).unwrap_or_default().to_string();
        let id = packet::packet_id(&value).unwrap_or_default();

        if let Err(error) = self.transmit_raw(&to, value).await {
            self.warn_with("Could not relay a packet", &error);
            self.send_synthetic_error(&from, &to, id).await;
        }
    }

    async fn send_synthetic_error(&self, requester: &str, unreachable: &str, id: u64) {
        let error = RemoteError::new(format!(
            "tried to reach \"{unreachable}\" but there is no connection to it"
        ));
        let message = Message {
            id,
            from: self.inner.port_name.clone(),
            to: requester.to_string(),
            message_type: MessageType::EventResponse,
            props: MessageProps {
                quiet: true,
                ..MessageProps::for_error(error)
            },
            payload: None,
        };
        if let Err(error) = self.transmit_message(message).await {
            self.log_with("Could not report a failed relay", &error);
        }
    }

    /// A fully decoded message addressed to this node.
    async fn handle_message(&self, message: Message) {
        match message.message_type {
            MessageType::EventResponse => {
                let quiet = message.props.quiet;
                let id = message.id;
                let outcome = match message.props.error {
                    Some(error) => Err(BridgeError::Remote { error }),
                    None => Ok(message.payload.unwrap_or(Value::Null)),
                };
                let delivered = self.inner.pending.complete(id, outcome).await;
                if !delivered && !quiet {
                    self.warn_with("Received a response no request is waiting for", &id);
                }
            }
            MessageType::EventSend => {
                if message.props.event.as_deref() == Some(PORTS_EVENT) {
                    let topology_tx = self.inner.topology_tx.lock().clone();
                    match topology_tx {
                        Some(topology_tx) => {
                            let _ = topology_tx.send(message);
                        }
                        None => {
                            self.warn("Received a topology announcement meant for spokes");
                        }
                    }
                } else {
                    // Dispatch off the reader so a slow listener cannot
                    // stall packet processing for this port.
                    let bridge = self.clone();
                    tokio::spawn(async move {
                        bridge.dispatch_and_respond(message).await;
                    });
                }
            }
        }
    }

    /// Runs the listeners for an event and sends the response back.
    async fn dispatch_and_respond(&self, message: Message) {
        let event = message.props.event.clone().unwrap_or_default();
        if event.is_empty() {
            self.log_with("Received an event without a name", &message.id);
        }
        let delivery = BridgeMessage {
            from: message.from.clone(),
            to: message.to.clone(),
            event: event.clone(),
            payload: message.payload.clone().unwrap_or(Value::Null),
        };

        let (props, payload) = match self.inner.listeners.dispatch(&event, delivery).await {
            Ok(reply) => (MessageProps::default(), reply),
            Err(failure) => (MessageProps::for_error(RemoteError::new(failure)), None),
        };
        let response = Message {
            id: message.id,
            from: self.inner.port_name.clone(),
            to: message.from,
            message_type: MessageType::EventResponse,
            props,
            payload,
        };
        if let Err(error) = self.transmit_message(response).await {
            self.warn_with("Could not deliver a response", &error);
        }
    }

    // ---- spoke topology --------------------------------------------------

    /// Applies a topology announcement to the spoke's cache.
    ///
    /// Runs on the topology worker, in announcement order. A departure
    /// rejects every request that was waiting on the departed peer. The
    /// in-progress connection attempt, if any, completes here once the
    /// node is marked connected.
    async fn apply_ports_update(&self, payload: &Value) {
        let update: PortsUpdate = match serde_json::from_value(payload.clone()) {
            Ok(update) => update,
            Err(error) => {
                self.warn_with("Discarded a malformed topology announcement", &error);
                self.finish_handshake_if_connected();
                return;
            }
        };

        self.log_with("Topology updated", &update.port_list);
        *self.inner.port_list.write().await = update.port_list;

        if let Some(removed) = update.removed {
            self.cleanup_peer_state(&removed).await;
        }
        self.finish_handshake_if_connected();
    }

    fn finish_handshake_if_connected(&self) {
        if self.is_connected() {
            self.finish_handshake(Ok(()));
        }
    }

    fn finish_handshake(&self, outcome: Result<(), BridgeError>) {
        if let Some(resolver) = self.inner.handshake.lock().take() {
            let _ = resolver.send(outcome);
        }
    }

    /// Rolls back a failed or aborted connection attempt.
    async fn abandon_connect(&self) {
        self.inner.connecting.store(false, Ordering::SeqCst);
        self.inner.connected.store(false, Ordering::SeqCst);
        *self.inner.handshake.lock() = None;
        let removed = { self.inner.ports.lock().await.remove(HUB_PORT_NAME) };
        if let Some(entry) = removed {
            entry.reader.abort();
            entry.port.disconnect();
        }
    }

    /// The spoke's port to the hub dropped while connected.
    async fn handle_lost_connection(&self) {
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        // A connect attempt that got as far as receiving traffic but not
        // its topology announcement still has a waiter to resolve.
        self.finish_handshake(Err(BridgeError::ConnectFailed));
        self.warn("Lost the connection to the background");
        // The reader calling this is the entry's own task; dropping the
        // entry detaches the handle without aborting it.
        let _ = self.inner.ports.lock().await.remove(HUB_PORT_NAME);
        self.inner.port_list.write().await.clear();
        let rejected = self.inner.pending.drop_all().await;
        if rejected > 0 {
            self.log_with("Rejected requests pending at connection loss", &rejected);
        }
        self.inner.reassembly.clear().await;
    }

    fn spawn_spoke_reader(&self, mut receiver: PortReceiver) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut first = true;
            loop {
                let value = receiver.recv().await;
                let inner = match weak.upgrade() {
                    Some(inner) => inner,
                    None => return,
                };
                let bridge = Bridge { inner };
                match value {
                    Some(value) => {
                        if first {
                            first = false;
                            // The hub speaking at all means it accepted us.
                            bridge.inner.connected.store(true, Ordering::SeqCst);
                            let announcement = is_ports_announcement(&value);
                            bridge.handle_incoming(value).await;
                            if !announcement {
                                // No topology announcement to wait for;
                                // consider the handshake done now.
                                bridge.finish_handshake(Ok(()));
                            }
                        } else {
                            bridge.handle_incoming(value).await;
                        }
                    }
                    None => {
                        if bridge.is_connected() {
                            bridge.handle_lost_connection().await;
                        } else {
                            bridge.finish_handshake(Err(BridgeError::ConnectFailed));
                        }
                        return;
                    }
                }
            }
        })
    }

    // ---- hub connection handling -----------------------------------------

    /// Admits a freshly connected port into the topology.
    async fn accept_peer(&self, mut port: Port) {
        let name = port.name().to_string();
        if !is_valid_port_name(&name) {
            self.log_with("Rejected a connection with an invalid port name", &name);
            return;
        }
        if name == self.inner.port_name {
            self.log_with("Rejected a connection claiming the hub name", &name);
            return;
        }

        // Last connection wins: a spoke reconnecting under a name that is
        // still registered replaces the stale registration silently, with
        // a single announcement for the arrival.
        let previous = { self.inner.ports.lock().await.remove(&name) };
        if let Some(previous) = previous {
            self.warn_with("A reconnection replaced an existing port", &name);
            previous.reader.abort();
            previous.port.disconnect();
            self.cleanup_peer_state(&name).await;
        }

        let receiver = match port.take_receiver() {
            Some(receiver) => receiver,
            None => return,
        };
        let serial = self.inner.serials.fetch_add(1, Ordering::Relaxed);
        {
            let mut ports = self.inner.ports.lock().await;
            let reader = self.spawn_hub_reader(name.clone(), serial, receiver);
            ports.insert(PortEntry {
                name: name.clone(),
                serial,
                port,
                reader,
            });
        }
        self.log_with("New connection", &name);
        self.publish_port_list(Some(name), None).await;
    }

    fn spawn_hub_reader(&self, name: String, serial: u64, mut receiver: PortReceiver) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let value = receiver.recv().await;
                let inner = match weak.upgrade() {
                    Some(inner) => inner,
                    None => return,
                };
                let bridge = Bridge { inner };
                match value {
                    Some(value) => bridge.handle_incoming(value).await,
                    None => {
                        bridge.peer_disconnected(&name, serial).await;
                        return;
                    }
                }
            }
        })
    }

    /// A spoke's port closed. Announce the departure, unless a newer
    /// connection already took over the name.
    async fn peer_disconnected(&self, name: &str, serial: u64) {
        let removed = {
            let mut ports = self.inner.ports.lock().await;
            let current = ports
                .get(name)
                .is_some_and(|entry| entry.serial == serial);
            if current {
                ports.remove(name)
            } else {
                None
            }
        };
        let entry = match removed {
            Some(entry) => entry,
            None => return,
        };
        entry.port.disconnect();
        self.log_with("Connection closed", &name.to_string());
        self.cleanup_peer_state(name).await;
        self.publish_port_list(None, Some(name.to_string())).await;
    }

    /// Drops everything still tied to a departed peer.
    async fn cleanup_peer_state(&self, name: &str) {
        let rejected = self.inner.pending.drop_all_for(name).await;
        if rejected > 0 {
            self.log_with("Rejected requests pending on a lost peer", &rejected);
        }
        let discarded = self.inner.reassembly.drop_for_port(name).await;
        if discarded > 0 {
            self.log_with("Discarded partial transfers from a lost peer", &discarded);
        }
    }

    /// Announces the current topology to every connected spoke.
    ///
    /// Each recipient gets the list with itself filtered out. Transmission
    /// happens inline so announcements interleave with nothing; only the
    /// acknowledgements are awaited off to the side.
    async fn publish_port_list(&self, added: Option<String>, removed: Option<String>) {
        let _publishing = self.inner.publishing.lock().await;
        let names = { self.inner.ports.lock().await.names() };

        for recipient in &names {
            let update = PortsUpdate {
                port_list: names
                    .iter()
                    .filter(|name| *name != recipient)
                    .cloned()
                    .collect(),
                added: added.clone(),
                removed: removed.clone(),
            };
            let payload = match serde_json::to_value(&update) {
                Ok(payload) => payload,
                Err(error) => {
                    self.warn_with("Could not encode a topology announcement", &error);
                    continue;
                }
            };

            let id = self.inner.ids.next();
            let waiter = self.inner.pending.register(id, recipient).await;
            let message = Message {
                id,
                from: self.inner.port_name.clone(),
                to: recipient.clone(),
                message_type: MessageType::EventSend,
                props: MessageProps::for_event(PORTS_EVENT),
                payload: Some(payload),
            };
            if let Err(error) = self.transmit_message(message).await {
                self.inner.pending.discard(id).await;
                self.log_with("Could not announce the topology", &error);
                continue;
            }

            let bridge = self.clone();
            let recipient = recipient.clone();
            tokio::spawn(async move {
                if let Ok(Err(error)) = waiter.await {
                    bridge.log_with(
                        "Topology announcement not acknowledged",
                        &(recipient, error.to_string()),
                    );
                }
            });
        }
    }

    // ---- logging ---------------------------------------------------------

    fn is_hub(&self) -> bool {
        self.inner.kind == ContextKind::Background
    }

    fn warn_chunk(&self, anomaly: ChunkAnomaly, from: &str, id: u64) {
        warn!(
            port = %self.inner.port_name,
            from = %from,
            id,
            anomaly = ?anomaly,
            "Chunked transfer anomaly"
        );
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("port", &self.inner.port_name)
            .field("kind", &self.inner.kind)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
        for entry in self.ports.get_mut().take_all() {
            entry.reader.abort();
        }
    }
}

/// Raw peek at whether a value is the hub's topology announcement, used
/// before the packet is decoded.
fn is_ports_announcement(value: &Value) -> bool {
    value.get("messageType").and_then(Value::as_str) == Some("event-send")
        && value
            .get("messageProps")
            .and_then(|props| props.get("event"))
            .and_then(Value::as_str)
            == Some(PORTS_EVENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn runtime() -> Arc<NativeRuntime> {
        Arc::new(NativeRuntime::new())
    }

    #[tokio::test]
    async fn test_hub_never_connects_or_disconnects() {
        let hub = Bridge::new(runtime(), BridgeOptions::background());
        assert!(matches!(
            hub.connect_to_background().await,
            Err(BridgeError::HubDoesNotConnect)
        ));
        assert!(matches!(
            hub.disconnect_from_background().await,
            Err(BridgeError::HubDoesNotDisconnect)
        ));
        assert!(hub.is_connected());
        assert_eq!(hub.port_name(), "background");
    }

    #[tokio::test]
    async fn test_port_names_follow_the_context() {
        let runtime = runtime();
        let app = Bridge::new(runtime.clone(), BridgeOptions::app());
        assert_eq!(app.port_name(), "app");
        assert_eq!(app.context_kind(), ContextKind::App);
        assert!(!app.is_connected());

        let content = Bridge::new(runtime, BridgeOptions::content("overlay"));
        assert!(content.port_name().starts_with("content@overlay-"));
        assert_eq!(content.context_kind(), ContextKind::Content);
    }

    #[tokio::test]
    async fn test_connect_without_a_hub_fails() {
        let app = Bridge::new(runtime(), BridgeOptions::app());
        assert!(matches!(
            app.connect_to_background().await,
            Err(BridgeError::ConnectFailed)
        ));
        assert!(!app.is_connected());

        // The failed attempt rolled back; a later one may try again.
        assert!(matches!(
            app.connect_to_background().await,
            Err(BridgeError::ConnectFailed)
        ));
    }

    #[tokio::test]
    async fn test_send_requires_a_connection() {
        let app = Bridge::new(runtime(), BridgeOptions::app());
        assert!(matches!(
            app.send("ping", "background", json!(1)).await,
            Err(BridgeError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_announcement_detection_peeks_at_raw_values() {
        let announcement = json!({
            "type": "full",
            "id": 1,
            "from": "background",
            "to": "app",
            "messageType": "event-send",
            "messageProps": { "event": "@bridge:ports" },
            "payload": { "portList": [] }
        });
        assert!(is_ports_announcement(&announcement));

        let ordinary = json!({
            "type": "full",
            "id": 1,
            "from": "background",
            "to": "app",
            "messageType": "event-send",
            "messageProps": { "event": "ping" }
        });
        assert!(!is_ports_announcement(&ordinary));
        assert!(!is_ports_announcement(&json!("noise")));
    }

    #[tokio::test]
    async fn test_dropping_the_last_clone_stops_the_node() {
        let runtime = runtime();
        let hub = Bridge::new(runtime.clone(), BridgeOptions::background());
        let clone = hub.clone();
        drop(hub);

        // Still alive through the clone.
        assert_eq!(clone.port_name(), "background");
        drop(clone);

        // Give the acceptor time to be torn down; connecting afterwards
        // finds nobody listening.
        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        let app = Bridge::new(runtime, BridgeOptions::app());
        assert!(matches!(
            app.connect_to_background().await,
            Err(BridgeError::ConnectFailed)
        ));
    }
}

// Made with Bob
