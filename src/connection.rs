//! Middleware connection façade
//!
//! Owns the transport session, the subscription registry, and the
//! request correlator; runs a reader task that routes inbound
//! traffic, an optional auto-dispatch task, and bounded reconnect
//! handling. This struct is cheaply cloneable as it uses an internal
//! Arc.

use crate::config::{options, Config};
use crate::correlator::{
    ReplyCallback, ReplyDisposition, RequestCorrelator, REPLY_UNIQUE_ID_FIELD, REPUBLISH_NEVER,
};
use crate::error::{BusError, Result, StatusClass, StatusCode};
use crate::factory::MessageFactory;
use crate::field::Field;
use crate::message::{Kind, Message};
use crate::subscription::{MessageCallback, SubscriptionInfo, SubscriptionRegistry};
use crate::transport::{Transport, WireMessage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Inbound messages buffered for receive()/dispatch; further
/// arrivals are dropped (with a warning) until the queue drains
const QUEUE_DEPTH: usize = 1000;

/// Grace period when joining the auto-dispatch or reader task
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

const DEFAULT_RETRY_INTERVAL_MS: i32 = 5000;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created but never connected, or connect() failed
    NotConnected,
    /// Transport session established
    Connected,
    /// Session lost; retrying in the background
    Reconnecting,
    /// Shut down by disconnect() or by exhausting reconnect attempts
    Disconnected,
}

/// Conditions surfaced through event callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    /// A dispatched callback failed
    DispatcherError,
    /// No reply arrived for a pending request within its timeout
    RequestTimeout,
    /// Transport session established (initially or on reconnect)
    ConnectionSuccessful,
    /// Transport session lost
    ConnectionBroken,
    /// A reconnect attempt is about to be made
    ConnectionReconnect,
    /// Reconnect attempts exhausted; connection is done
    ConnectionException,
    /// A background (re)publish failed
    MsgPublishFailure,
    /// An inbound message failed to decode or validate
    InvalidMessage,
    /// Register interest in every event
    All,
}

/// Handler for connection events. The status argument carries the
/// triggering condition; informational events use a status with code
/// `Other`. Handlers shared across connections may be invoked
/// concurrently and must be internally thread-safe.
pub type EventCallback = Arc<dyn Fn(ConnectionEvent, &BusError) + Send + Sync>;

struct ConnInner {
    transport: Arc<dyn Transport>,
    factory: MessageFactory,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    registry: Mutex<SubscriptionRegistry>,
    correlator: RequestCorrelator,
    events: Mutex<HashMap<ConnectionEvent, EventCallback>>,
    queue_tx: mpsc::Sender<Message>,
    queue_rx: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    auto_dispatch: AtomicBool,
    dispatch_stop: Mutex<Option<watch::Sender<bool>>>,
    dispatch_handle: Mutex<Option<JoinHandle<()>>>,
    reader_stop: Mutex<Option<watch::Sender<bool>>>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    validate_send: bool,
    validate_recv: bool,
    max_retries: i32,
    retry_interval: Duration,
}

/// The top-level client handle
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnInner>,
}

impl Connection {
    /// Create a connection over the given transport. No session is
    /// established until connect().
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let factory = MessageFactory::new(&config)?;
        let correlator = RequestCorrelator::new(&config);
        let (state_tx, state_rx) = watch::channel(ConnectionState::NotConnected);
        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_DEPTH);

        let validate_all = config.get_bool(options::VALIDATE_ALL, false);
        let retry_interval_ms =
            config.get_i32(options::CONN_RETRY_INTERVAL, DEFAULT_RETRY_INTERVAL_MS).max(0) as u64;

        let inner = Arc::new(ConnInner {
            transport,
            factory,
            state_tx,
            state_rx,
            registry: Mutex::new(SubscriptionRegistry::new()),
            correlator,
            events: Mutex::new(HashMap::new()),
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            auto_dispatch: AtomicBool::new(false),
            dispatch_stop: Mutex::new(None),
            dispatch_handle: Mutex::new(None),
            reader_stop: Mutex::new(None),
            reader_handle: Mutex::new(None),
            validate_send: config.get_bool(options::VALIDATE_SEND, validate_all),
            validate_recv: config.get_bool(options::VALIDATE_RECV, validate_all),
            max_retries: config.get_i32(options::MAX_CONN_RETRIES, -1),
            retry_interval: Duration::from_millis(retry_interval_ms),
        });

        Ok(Self { inner })
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_rx.borrow()
    }

    /// Receiver for state changes (for waiting on reconnects)
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    pub fn message_factory(&self) -> &MessageFactory {
        &self.inner.factory
    }

    /// Establish the transport session and start the reader task
    pub async fn connect(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Connected | ConnectionState::Reconnecting => {
                return Err(BusError::connection(
                    StatusCode::InvalidState,
                    "connection is already established",
                ));
            }
            ConnectionState::NotConnected | ConnectionState::Disconnected => {}
        }

        self.inner.transport.connect().await.map_err(|e| {
            BusError::connection(
                StatusCode::ConnectFailed,
                format!("transport connect failed: {}", e.reason()),
            )
        })?;

        self.inner.set_state(ConnectionState::Connected);
        info!("connected to middleware");
        self.inner.emit(
            ConnectionEvent::ConnectionSuccessful,
            &BusError::connection(StatusCode::Other, "connection established"),
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        *self.inner.reader_stop.lock() = Some(stop_tx);
        let handle = tokio::spawn(reader_task(self.inner.clone(), stop_rx));
        *self.inner.reader_handle.lock() = Some(handle);

        Ok(())
    }

    /// Tear down the session. Idempotent; stops the auto-dispatcher
    /// first and cancels pending requests.
    pub async fn disconnect(&self) -> Result<()> {
        match self.state() {
            ConnectionState::NotConnected | ConnectionState::Disconnected => {
                self.inner.set_state(ConnectionState::Disconnected);
                return Ok(());
            }
            _ => {}
        }

        self.stop_auto_dispatch(true).await;

        if let Some(stop) = self.inner.reader_stop.lock().take() {
            let _ = stop.send(true);
        }
        let _ = self.inner.transport.disconnect().await;

        let handle = self.inner.reader_handle.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("reader task did not stop within the shutdown grace period");
            }
        }

        self.inner.correlator.cancel_all();
        self.inner.set_state(ConnectionState::Disconnected);
        info!("disconnected from middleware");
        Ok(())
    }

    /// Publish a PUBLISH-kind message
    pub async fn publish(&self, msg: &Message) -> Result<()> {
        self.inner.require_connected()?;
        require_kind(msg, Kind::Publish)?;
        require_subject(msg)?;

        if self.inner.validate_send {
            self.inner.factory.specification().validate_message(msg)?;
        }

        self.inner.send_message(msg).await
    }

    /// Publish with per-call overrides; only validation toggles are
    /// meaningful here, middleware-specific options belong to the
    /// transport.
    pub async fn publish_with_config(&self, msg: &Message, config: &Config) -> Result<()> {
        self.inner.require_connected()?;
        require_kind(msg, Kind::Publish)?;
        require_subject(msg)?;

        if config.get_bool(options::VALIDATE_SEND, self.inner.validate_send) {
            self.inner.factory.specification().validate_message(msg)?;
        }

        self.inner.send_message(msg).await
    }

    /// Subscribe to a subject pattern; matching inbound messages are
    /// queued for receive()
    pub fn subscribe(&self, pattern: &str) -> Result<SubscriptionInfo> {
        self.inner.require_connected()?;
        self.inner.registry.lock().register(pattern, None)
    }

    /// Subscribe with a callback, invoked by dispatch() or the
    /// auto-dispatcher
    pub fn subscribe_with_callback(
        &self,
        pattern: &str,
        callback: MessageCallback,
    ) -> Result<SubscriptionInfo> {
        self.inner.require_connected()?;
        self.inner.registry.lock().register(pattern, Some(callback))
    }

    /// Cancel a subscription. Takes effect for future inbound
    /// messages only; a callback already in progress is not
    /// interrupted.
    pub fn unsubscribe(&self, info: &SubscriptionInfo) -> Result<()> {
        self.inner.require_connected()?;
        self.inner.registry.lock().remove(info)
    }

    /// Suppress delivery of subjects matching the pattern, even when
    /// they match a subscription
    pub fn exclude_subject(&self, pattern: &str) -> Result<()> {
        self.inner.require_connected()?;
        self.inner.registry.lock().exclude(pattern)
    }

    /// Lift an exclusion; returns whether it existed
    pub fn remove_excluded_subject(&self, pattern: &str) -> Result<bool> {
        self.inner.require_connected()?;
        Ok(self.inner.registry.lock().remove_exclusion(pattern))
    }

    /// Issue a request and block for the matching reply.
    ///
    /// `timeout_ms < 0` waits forever. `republish_ms` follows the
    /// interval contract: 0 uses the configured default, negative
    /// disables republishing, positive values are floored at
    /// `MIN_REPUBLISH_MS`. Returns `Ok(None)` on timeout.
    pub async fn request(
        &self,
        request: &Message,
        timeout_ms: i32,
        republish_ms: i32,
    ) -> Result<Option<Message>> {
        let (id, req) = self.prepare_request(request).await?;

        let multi = self.inner.correlator.multi_response_for(&req);
        let rx = self.inner.correlator.register_blocking(&id, req.clone(), multi);

        if let Err(e) = self.inner.send_message(&req).await {
            self.inner.correlator.remove(&id);
            return Err(e);
        }

        let republish = self.inner.correlator.resolve_republish(republish_ms);
        if republish != REPUBLISH_NEVER {
            spawn_republish(self.inner.clone(), id.clone(), &req, republish);
        }

        if timeout_ms < 0 {
            // wait forever; an error means the request was cancelled
            return Ok(rx.await.ok());
        }

        match tokio::time::timeout(Duration::from_millis(timeout_ms as u64), rx).await {
            Ok(Ok(reply)) => Ok(Some(reply)),
            Ok(Err(_)) => Ok(None), // cancelled by disconnect
            Err(_) => {
                self.inner.correlator.remove(&id);
                self.inner.emit(
                    ConnectionEvent::RequestTimeout,
                    &BusError::timeout("request timed out"),
                );
                Ok(None)
            }
        }
    }

    /// Issue a request and return immediately; replies go to the
    /// callback. With multi-response enabled the callback stays
    /// registered through Acknowledgement/WorkingKeepAlive replies
    /// until a terminal status arrives. On timeout a RequestTimeout
    /// event fires; the request is abandoned unless republishing is
    /// active, in which case the deadline extends by the republish
    /// interval.
    pub async fn request_with_callback(
        &self,
        request: &Message,
        timeout_ms: i32,
        republish_ms: i32,
        on_reply: ReplyCallback,
    ) -> Result<()> {
        let (id, req) = self.prepare_request(request).await?;

        let multi = self.inner.correlator.multi_response_for(&req);
        self.inner.correlator.register_callback(&id, req.clone(), multi, on_reply);

        if let Err(e) = self.inner.send_message(&req).await {
            self.inner.correlator.remove(&id);
            return Err(e);
        }

        let republish = self.inner.correlator.resolve_republish(republish_ms);
        if republish != REPUBLISH_NEVER {
            spawn_republish(self.inner.clone(), id.clone(), &req, republish);
        }

        if timeout_ms >= 0 {
            spawn_request_monitor(self.inner.clone(), id, timeout_ms, republish);
        }

        Ok(())
    }

    /// Send a reply back to a request received from the bus. The
    /// request's correlation ID is copied onto the response; if the
    /// response has no subject, the request's subject is reused.
    pub async fn reply(&self, request: &Message, response: &Message) -> Result<()> {
        self.inner.require_connected()?;
        require_kind(response, Kind::Reply)?;

        let id = request.get_string_value(REPLY_UNIQUE_ID_FIELD).map_err(|_| {
            BusError::message(
                StatusCode::FieldNotFound,
                "request carries no correlation ID; was it received from the bus?",
            )
        })?;

        let mut resp = response.clone();
        if resp.subject().is_empty() {
            resp.set_subject(request.subject())?;
        }
        resp.add_field(Field::header(REPLY_UNIQUE_ID_FIELD, id.as_str())?);

        if self.inner.validate_send {
            self.inner.factory.specification().validate_message(&resp)?;
        }

        self.inner
            .send_message(&resp)
            .await
            .map_err(|e| BusError::transport(StatusCode::SendFailed, e.reason().to_string()))
    }

    /// Pull the next queued inbound message. `timeout_ms < 0` waits
    /// forever; `Ok(None)` means the timeout elapsed. Not available
    /// while the auto-dispatcher runs.
    pub async fn receive(&self, timeout_ms: i32) -> Result<Option<Message>> {
        if self.inner.auto_dispatch.load(Ordering::SeqCst) {
            return Err(BusError::callback(
                StatusCode::AutoDispatchActive,
                "receive() cannot be mixed with the auto-dispatcher",
            ));
        }
        self.inner.require_connected()?;

        let mut rx = self.inner.queue_rx.lock().await;
        if timeout_ms < 0 {
            return Ok(rx.recv().await);
        }
        match tokio::time::timeout(Duration::from_millis(timeout_ms as u64), rx.recv()).await {
            Ok(msg) => Ok(msg),
            Err(_) => Ok(None),
        }
    }

    /// Invoke the callbacks of every subscription matching the
    /// message's subject, serially, in subscribe order
    pub fn dispatch(&self, msg: &Message) -> Result<()> {
        let callbacks = self.inner.registry.lock().matching_callbacks(msg.subject());
        for cb in callbacks {
            self.inner.dispatch_one(&cb, msg);
        }
        Ok(())
    }

    /// Start the auto-dispatch task: an internal receive+dispatch
    /// loop. Mixing with manual receive() is rejected.
    pub fn start_auto_dispatch(&self) -> Result<()> {
        self.inner.require_connected()?;
        if self.inner.auto_dispatch.swap(true, Ordering::SeqCst) {
            return Err(BusError::callback(
                StatusCode::AutoDispatchActive,
                "auto-dispatcher is already running",
            ));
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        *self.inner.dispatch_stop.lock() = Some(stop_tx);
        let handle = tokio::spawn(auto_dispatch_task(self.inner.clone(), stop_rx));
        *self.inner.dispatch_handle.lock() = Some(handle);
        debug!("auto-dispatcher started");
        Ok(())
    }

    /// Stop the auto-dispatch task; returns whether it was running.
    /// With `wait_for_completion` the call joins the task, bounded
    /// by the shutdown grace period.
    pub async fn stop_auto_dispatch(&self, wait_for_completion: bool) -> bool {
        if !self.inner.auto_dispatch.swap(false, Ordering::SeqCst) {
            return false;
        }

        if let Some(stop) = self.inner.dispatch_stop.lock().take() {
            let _ = stop.send(true);
        }

        let handle = self.inner.dispatch_handle.lock().take();
        if let Some(handle) = handle {
            if wait_for_completion {
                if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                    warn!("auto-dispatcher did not stop within the shutdown grace period");
                }
            }
        }
        debug!("auto-dispatcher stopped");
        true
    }

    /// Register a handler for a connection event, replacing any
    /// prior handler for that event. `ConnectionEvent::All`
    /// subscribes to everything.
    pub fn register_event_callback(&self, event: ConnectionEvent, callback: EventCallback) {
        self.inner.events.lock().insert(event, callback);
    }

    async fn prepare_request(&self, request: &Message) -> Result<(String, Message)> {
        self.inner.require_connected()?;
        require_kind(request, Kind::Request)?;
        require_subject(request)?;

        if self.inner.validate_send {
            self.inner.factory.specification().validate_message(request)?;
        }

        let mut req = request.clone();
        let id = RequestCorrelator::stamp(&mut req)?;
        Ok((id, req))
    }
}

impl ConnInner {
    fn set_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
    }

    fn require_connected(&self) -> Result<()> {
        if *self.state_rx.borrow() != ConnectionState::Connected {
            return Err(BusError::connection(
                StatusCode::NotConnected,
                "connection has not been established",
            ));
        }
        Ok(())
    }

    async fn send_message(&self, msg: &Message) -> Result<()> {
        let wire = WireMessage {
            subject: msg.subject().to_string(),
            payload: msg.to_json(),
        };
        self.transport.send(wire).await
    }

    /// Route one inbound wire message
    fn handle_inbound(&self, wire: WireMessage) {
        let msg = match Message::from_data(&wire.payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(subject = %wire.subject, error = %e, "dropping undecodable message");
                self.emit(ConnectionEvent::InvalidMessage, &e);
                return;
            }
        };

        // replies with a correlation ID belong to the correlator,
        // whether or not any subscription matches
        if msg.kind() == Kind::Reply && msg.has_field(REPLY_UNIQUE_ID_FIELD) {
            match self.correlator.on_reply(msg) {
                ReplyDisposition::Callback {
                    callback,
                    request,
                    reply,
                } => {
                    if let Err(e) = guarded(|| callback(&request, &reply)) {
                        self.emit(ConnectionEvent::DispatcherError, &e);
                    }
                }
                ReplyDisposition::Delivered | ReplyDisposition::Unmatched => {}
            }
            return;
        }

        if !self.registry.lock().deliverable(msg.subject()) {
            return;
        }

        if self.validate_recv {
            if let Err(e) = self.factory.specification().validate_message(&msg) {
                debug!(subject = %msg.subject(), "inbound message failed validation");
                self.emit(ConnectionEvent::InvalidMessage, &e);
                return;
            }
        }

        if let Err(e) = self.queue_tx.try_send(msg) {
            warn!(error = %e, "inbound queue full, dropping message");
        }
    }

    /// Invoke a subscription callback, converting a panic into a
    /// DispatcherError event instead of taking down the dispatcher
    fn dispatch_one(&self, callback: &MessageCallback, msg: &Message) {
        if let Err(e) = guarded(|| callback(msg)) {
            self.emit(ConnectionEvent::DispatcherError, &e);
        }
    }

    fn emit(&self, event: ConnectionEvent, status: &BusError) {
        let handlers = {
            let events = self.events.lock();
            let mut out = Vec::new();
            if let Some(cb) = events.get(&event) {
                out.push(cb.clone());
            }
            if event != ConnectionEvent::All {
                if let Some(cb) = events.get(&ConnectionEvent::All) {
                    out.push(cb.clone());
                }
            }
            out
        };

        for cb in handlers {
            if guarded(|| cb(event, status)).is_err() {
                warn!(?event, "event callback failed");
            }
        }
    }

    /// Reconnect after a lost session. Returns true when the session
    /// is back and reading should resume.
    async fn reconnect(self: &Arc<Self>, stop_rx: &mut watch::Receiver<bool>) -> bool {
        self.set_state(ConnectionState::Reconnecting);
        self.emit(
            ConnectionEvent::ConnectionBroken,
            &BusError::new(
                StatusClass::Connection,
                StatusCode::SessionLost,
                "connection to middleware lost",
            ),
        );

        let mut attempt: i32 = 0;
        loop {
            if *stop_rx.borrow() {
                return false;
            }

            attempt += 1;
            if self.max_retries >= 0 && attempt > self.max_retries {
                warn!(attempts = attempt - 1, "reconnect attempts exhausted");
                self.emit(
                    ConnectionEvent::ConnectionException,
                    &BusError::connection(
                        StatusCode::ReconnectExhausted,
                        format!("gave up after {} reconnect attempts", attempt - 1),
                    ),
                );
                self.correlator.cancel_all();
                self.set_state(ConnectionState::Disconnected);
                return false;
            }

            self.emit(
                ConnectionEvent::ConnectionReconnect,
                &BusError::connection(
                    StatusCode::Other,
                    format!("reconnect attempt {}", attempt),
                ),
            );

            tokio::select! {
                _ = stop_rx.changed() => return false,
                _ = tokio::time::sleep(self.retry_interval) => {}
            }

            match self.transport.connect().await {
                Ok(()) => {
                    info!(attempt, "reconnected to middleware");
                    self.set_state(ConnectionState::Connected);
                    self.emit(
                        ConnectionEvent::ConnectionSuccessful,
                        &BusError::connection(StatusCode::Other, "connection re-established"),
                    );
                    return true;
                }
                Err(e) => {
                    debug!(attempt, error = %e, "reconnect attempt failed");
                }
            }
        }
    }
}

/// Run a callback, translating a panic into a dispatcher error
fn guarded<F: FnOnce()>(f: F) -> Result<()> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "callback panicked".to_string());
        BusError::callback(StatusCode::Other, detail)
    })
}

fn require_kind(msg: &Message, kind: Kind) -> Result<()> {
    if msg.kind() != kind {
        return Err(BusError::message(
            StatusCode::InvalidKind,
            format!("operation requires a {} message, got {}", kind, msg.kind()),
        ));
    }
    Ok(())
}

fn require_subject(msg: &Message) -> Result<()> {
    if msg.subject().is_empty() {
        return Err(BusError::message(
            StatusCode::InvalidSubject,
            "message has no subject",
        ));
    }
    Ok(())
}

/// Reader: pull from the transport, route, and reconnect on session
/// loss
async fn reader_task(inner: Arc<ConnInner>, mut stop_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            result = inner.transport.recv(None) => match result {
                Ok(Some(wire)) => inner.handle_inbound(wire),
                Ok(None) => continue,
                Err(e) => {
                    if *stop_rx.borrow() {
                        break;
                    }
                    warn!(error = %e, "transport receive failed");
                    if !inner.reconnect(&mut stop_rx).await {
                        break;
                    }
                }
            }
        }
    }
    debug!("reader task stopped");
}

/// Auto-dispatch: internal receive+dispatch loop
async fn auto_dispatch_task(inner: Arc<ConnInner>, mut stop_rx: watch::Receiver<bool>) {
    let mut rx = inner.queue_rx.lock().await;
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            msg = rx.recv() => match msg {
                Some(msg) => {
                    let callbacks = inner.registry.lock().matching_callbacks(msg.subject());
                    for cb in callbacks {
                        inner.dispatch_one(&cb, &msg);
                    }
                }
                None => break,
            }
        }
    }
    debug!("auto-dispatch task stopped");
}

/// Resend a pending request at its republish interval until it is
/// answered, cancelled, or the connection is gone
fn spawn_republish(inner: Arc<ConnInner>, id: String, request: &Message, interval_ms: i32) {
    let wire = WireMessage {
        subject: request.subject().to_string(),
        payload: request.to_json(),
    };
    let interval = Duration::from_millis(interval_ms as u64);

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            if !inner.correlator.contains(&id) {
                break;
            }
            match *inner.state_rx.borrow() {
                ConnectionState::Connected => {}
                ConnectionState::Reconnecting => continue,
                _ => break,
            }
            debug!(id = %id, "republishing request");
            if let Err(e) = inner.transport.send(wire.clone()).await {
                inner.emit(ConnectionEvent::MsgPublishFailure, &e);
            }
        }
    });
}

/// Watch an asynchronous request's deadline: fire RequestTimeout on
/// expiry, and abandon the request unless republishing keeps it
/// alive
fn spawn_request_monitor(inner: Arc<ConnInner>, id: String, timeout_ms: i32, republish_ms: i32) {
    tokio::spawn(async move {
        let mut deadline =
            tokio::time::Instant::now() + Duration::from_millis(timeout_ms as u64);
        loop {
            tokio::time::sleep_until(deadline).await;
            if !inner.correlator.contains(&id) {
                break;
            }
            inner.emit(
                ConnectionEvent::RequestTimeout,
                &BusError::timeout("request timed out"),
            );
            if republish_ms == REPUBLISH_NEVER {
                inner.correlator.remove(&id);
                break;
            }
            deadline += Duration::from_millis(republish_ms as u64);
        }
    });
}
