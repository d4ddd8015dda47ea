//! Transport seam and in-process loopback
//!
//! The core never speaks a wire protocol itself; a middleware driver
//! implements `Transport` and the connection hands it encoded
//! messages. `LoopbackHub` provides an in-process broadcast bus for
//! tests and demos: every endpoint sees everything sent by any
//! endpoint, and subject filtering stays the client's job, exactly
//! like broadcast delivery on a real bus.

use crate::error::{BusError, Result, StatusCode};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// An encoded message in flight
#[derive(Debug, Clone)]
pub struct WireMessage {
    /// Routing subject, duplicated out of the payload for middleware
    /// visibility
    pub subject: String,
    /// Encoded message text
    pub payload: String,
}

/// Middleware driver interface
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn send(&self, msg: WireMessage) -> Result<()>;

    /// Next inbound message; `None` on timeout. `timeout: None`
    /// blocks until a message arrives or the session is lost.
    async fn recv(&self, timeout: Option<Duration>) -> Result<Option<WireMessage>>;
}

struct HubInner {
    endpoints: Mutex<Vec<mpsc::UnboundedSender<WireMessage>>>,
}

/// In-process broadcast bus
#[derive(Clone)]
pub struct LoopbackHub {
    inner: Arc<HubInner>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                endpoints: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a new endpoint attached to this hub
    pub fn endpoint(&self) -> LoopbackTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.endpoints.lock().push(tx);
        let (drop_tx, drop_rx) = watch::channel(false);
        LoopbackTransport {
            hub: self.inner.clone(),
            rx: tokio::sync::Mutex::new(rx),
            connected: AtomicBool::new(false),
            fail_next_send: AtomicBool::new(false),
            drop_tx,
            drop_rx,
        }
    }
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One endpoint of a `LoopbackHub`
pub struct LoopbackTransport {
    hub: Arc<HubInner>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<WireMessage>>,
    connected: AtomicBool,
    fail_next_send: AtomicBool,
    drop_tx: watch::Sender<bool>,
    drop_rx: watch::Receiver<bool>,
}

impl LoopbackTransport {
    /// Fail the next `send` with a transport error (test hook)
    pub fn fail_next_send(&self) {
        self.fail_next_send.store(true, Ordering::SeqCst);
    }

    /// Simulate an irrecoverable session loss: blocked and future
    /// `recv` calls fail until the endpoint reconnects (test hook)
    pub fn drop_link(&self) {
        let _ = self.drop_tx.send(true);
    }

    fn link_dropped(&self) -> bool {
        *self.drop_rx.borrow()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self) -> Result<()> {
        let _ = self.drop_tx.send(false);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, msg: WireMessage) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) || self.link_dropped() {
            return Err(BusError::transport(
                StatusCode::SendFailed,
                "loopback endpoint is not connected",
            ));
        }
        if self.fail_next_send.swap(false, Ordering::SeqCst) {
            return Err(BusError::transport(
                StatusCode::SendFailed,
                "injected send failure",
            ));
        }

        let endpoints = self.hub.endpoints.lock();
        for tx in endpoints.iter() {
            // a closed endpoint just misses the broadcast
            if tx.send(msg.clone()).is_err() {
                debug!(subject = %msg.subject, "loopback endpoint gone, skipping");
            }
        }
        Ok(())
    }

    async fn recv(&self, timeout: Option<Duration>) -> Result<Option<WireMessage>> {
        if self.link_dropped() {
            return Err(BusError::transport(
                StatusCode::SessionLost,
                "loopback link dropped",
            ));
        }

        let mut rx = self.rx.lock().await;
        let mut drop_rx = self.drop_rx.clone();

        let next = async {
            tokio::select! {
                msg = rx.recv() => msg.ok_or_else(|| {
                    BusError::transport(StatusCode::SessionLost, "loopback hub closed")
                }),
                _ = drop_rx.changed() => Err(BusError::transport(
                    StatusCode::SessionLost,
                    "loopback link dropped",
                )),
            }
        };

        match timeout {
            None => next.await.map(Some),
            Some(dur) => match tokio::time::timeout(dur, next).await {
                Ok(result) => result.map(Some),
                Err(_) => Ok(None),
            },
        }
    }
}
