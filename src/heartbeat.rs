//! Heartbeat generation
//!
//! Publishes a heartbeat message on its own task at a configurable
//! rate. A publish rate of zero publishes exactly once; the
//! generator then idles until the rate changes or it is stopped.

use crate::connection::Connection;
use crate::error::Result;
use crate::field::{Field, FieldValue};
use crate::message::Message;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const STOP_GRACE: Duration = Duration::from_secs(3);

struct HbInner {
    conn: Connection,
    template: Mutex<Message>,
    rate_tx: watch::Sender<u32>,
    rate_rx: watch::Receiver<u32>,
    counter: AtomicU32,
    running: AtomicBool,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Periodic heartbeat publisher
pub struct HeartbeatGenerator {
    inner: Arc<HbInner>,
}

impl HeartbeatGenerator {
    /// Build a generator that publishes a heartbeat message on
    /// `subject` every `pub_rate_s` seconds, carrying `fields` in
    /// addition to the heartbeat template's own fields.
    pub fn new(
        conn: Connection,
        subject: &str,
        pub_rate_s: u32,
        fields: Vec<Field>,
    ) -> Result<Self> {
        let mut template = conn.message_factory().create_message("MSG.HB")?;
        template.set_subject(subject)?;
        template.add_fields(fields);

        let (rate_tx, rate_rx) = watch::channel(pub_rate_s);
        Ok(Self {
            inner: Arc::new(HbInner {
                conn,
                template: Mutex::new(template),
                rate_tx,
                rate_rx,
                counter: AtomicU32::new(1),
                running: AtomicBool::new(false),
                stop_tx: Mutex::new(None),
                handle: Mutex::new(None),
            }),
        })
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn publish_rate(&self) -> u32 {
        *self.inner.rate_rx.borrow()
    }

    /// Start publishing. The first heartbeat goes out immediately.
    pub fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        *self.inner.stop_tx.lock() = Some(stop_tx);
        let handle = tokio::spawn(heartbeat_task(self.inner.clone(), stop_rx));
        *self.inner.handle.lock() = Some(handle);
        debug!("heartbeat generator started");
        Ok(())
    }

    /// Stop publishing; returns whether the generator was running
    pub async fn stop(&self) -> bool {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        if let Some(stop) = self.inner.stop_tx.lock().take() {
            let _ = stop.send(true);
        }
        let handle = self.inner.handle.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(STOP_GRACE, handle).await.is_err() {
                warn!("heartbeat task did not stop within the grace period");
            }
        }
        debug!("heartbeat generator stopped");
        true
    }

    /// Change the publish rate; takes effect on the next cycle. A
    /// rate of zero publishes once more, then idles.
    pub fn change_publish_rate(&self, pub_rate_s: u32) {
        let _ = self.inner.rate_tx.send(pub_rate_s);
    }

    /// Set or replace a field on the heartbeat template; returns
    /// whether an existing field was replaced. Setting PUB-RATE also
    /// adjusts the publish rate.
    pub fn set_field(&self, field: Field) -> Result<bool> {
        if field.name() == "PUB-RATE" {
            let rate = field.i64_value()?;
            self.change_publish_rate(rate.max(0) as u32);
        }
        Ok(self.inner.template.lock().add_field(field))
    }
}

async fn heartbeat_task(inner: Arc<HbInner>, mut stop_rx: watch::Receiver<bool>) {
    let mut rate_rx = inner.rate_rx.clone();

    'running: loop {
        publish_heartbeat(&inner).await;

        // wait out the interval; a rate change restarts the wait, and
        // a rate of zero idles until the next change
        loop {
            let rate = *rate_rx.borrow_and_update();
            if rate == 0 {
                tokio::select! {
                    _ = stop_rx.changed() => break 'running,
                    _ = rate_rx.changed() => {}
                }
            } else {
                tokio::select! {
                    _ = stop_rx.changed() => break 'running,
                    _ = tokio::time::sleep(Duration::from_secs(rate as u64)) => continue 'running,
                    _ = rate_rx.changed() => {}
                }
            }
        }
    }
}

async fn publish_heartbeat(inner: &Arc<HbInner>) {
    let msg: Message = {
        let mut msg = inner.template.lock().clone();
        let count = inner.counter.fetch_add(1, Ordering::SeqCst);
        if let Ok(f) = Field::new("COUNTER", FieldValue::U32(count)) {
            msg.add_field(f);
        }
        let rate = *inner.rate_rx.borrow();
        if let Ok(f) = Field::new("PUB-RATE", FieldValue::U32(rate)) {
            msg.add_field(f);
        }
        msg
    };

    if let Err(e) = inner.conn.publish(&msg).await {
        warn!(error = %e, "heartbeat publish failed");
    }
}
