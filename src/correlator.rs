//! Request/reply correlation
//!
//! Outstanding requests are tracked by a hidden reply-ID header
//! field stamped onto each outgoing request. Inbound replies are
//! matched against the pending table and handed to the blocked
//! caller or the registered reply callback; unmatched replies are
//! dropped quietly, since broadcast delivery routinely shows one
//! requester another's replies.
//!
//! Deadline and republish bookkeeping runs in the connection's
//! tasks; this table only owns correlation state.

use crate::config::{options, Config};
use crate::error::Result;
use crate::field::Field;
use crate::message::Message;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// Blocking-call sentinel: wait indefinitely
pub const WAIT_FOREVER: i32 = -1;

/// Republish sentinel: send the request exactly once
pub const REPUBLISH_NEVER: i32 = -1;

/// Republish interval substituted for an interval of 0
pub const DEFAULT_REPUBLISH_MS: i32 = 60_000;

/// Smallest allowed republish interval; positive values below this
/// are clamped up to it
pub const MIN_REPUBLISH_MS: i32 = 100;

/// Hidden header field carrying the correlation ID
pub(crate) const REPLY_UNIQUE_ID_FIELD: &str = "__STB-REPLY-UNIQUE-ID__";

/// Handler for replies to an asynchronous request; receives the
/// original request and the reply. Handlers shared across
/// connections must be internally thread-safe.
pub type ReplyCallback = Arc<dyn Fn(&Message, &Message) + Send + Sync>;

enum Slot {
    Blocking(oneshot::Sender<Message>),
    Callback(ReplyCallback),
}

struct Pending {
    request: Message,
    slot: Slot,
    multi_response: bool,
}

/// What the connection should do with a correlated reply
pub(crate) enum ReplyDisposition {
    /// Invoke the callback (outside any correlator lock)
    Callback {
        callback: ReplyCallback,
        request: Message,
        reply: Message,
    },
    /// A blocked requester was handed the reply
    Delivered,
    /// Nothing pending for this ID; reply dropped
    Unmatched,
}

pub(crate) struct RequestCorrelator {
    pending: Mutex<HashMap<String, Pending>>,
    default_republish_ms: i32,
    multi_response: bool,
}

impl RequestCorrelator {
    pub(crate) fn new(config: &Config) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            default_republish_ms: config.get_i32(options::REPUBLISH_MS, DEFAULT_REPUBLISH_MS),
            multi_response: config.get_bool(options::MULTI_RESP, false),
        }
    }

    /// Apply the republish interval contract: 0 means the configured
    /// default, negative means never, positives are floored at
    /// `MIN_REPUBLISH_MS`.
    pub(crate) fn resolve_republish(&self, republish_ms: i32) -> i32 {
        if republish_ms == 0 {
            self.default_republish_ms
        } else if republish_ms < 0 {
            REPUBLISH_NEVER
        } else if republish_ms < MIN_REPUBLISH_MS {
            MIN_REPUBLISH_MS
        } else {
            republish_ms
        }
    }

    /// Whether replies beyond the first are allowed for this request
    /// (per-message override wins over the connection default)
    pub(crate) fn multi_response_for(&self, request: &Message) -> bool {
        request.config().get_bool(options::MULTI_RESP, self.multi_response)
    }

    /// Stamp the hidden correlation-ID field onto an outgoing
    /// request and return the ID
    pub(crate) fn stamp(request: &mut Message) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        request.add_field(Field::header(REPLY_UNIQUE_ID_FIELD, id.as_str())?);
        Ok(id)
    }

    /// Register a blocking request; the returned receiver yields the
    /// matching reply
    pub(crate) fn register_blocking(
        &self,
        id: &str,
        request: Message,
        multi_response: bool,
    ) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            id.to_string(),
            Pending {
                request,
                slot: Slot::Blocking(tx),
                multi_response,
            },
        );
        rx
    }

    /// Register an asynchronous request with a reply callback
    pub(crate) fn register_callback(
        &self,
        id: &str,
        request: Message,
        multi_response: bool,
        callback: ReplyCallback,
    ) {
        self.pending.lock().insert(
            id.to_string(),
            Pending {
                request,
                slot: Slot::Callback(callback),
                multi_response,
            },
        );
    }

    pub(crate) fn remove(&self, id: &str) -> bool {
        self.pending.lock().remove(id).is_some()
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.pending.lock().contains_key(id)
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Correlate an inbound reply. The hidden ID field is cleared
    /// from the reply before delivery.
    pub(crate) fn on_reply(&self, mut reply: Message) -> ReplyDisposition {
        let id = match reply.get_string_value(REPLY_UNIQUE_ID_FIELD) {
            Ok(id) => id,
            Err(_) => {
                debug!(subject = %reply.subject(), "reply carries no correlation ID, dropping");
                return ReplyDisposition::Unmatched;
            }
        };
        reply.clear_field(REPLY_UNIQUE_ID_FIELD);

        let mut pending = self.pending.lock();
        let entry = match pending.remove(&id) {
            Some(e) => e,
            None => {
                debug!(id = %id, "nothing pending for reply, dropping");
                return ReplyDisposition::Unmatched;
            }
        };

        let keep_open = entry.multi_response
            && reply
                .response_status()
                .map(|s| !s.is_terminal())
                .unwrap_or(false);

        match entry.slot {
            Slot::Blocking(tx) => {
                // a caller that timed out just before delivery has
                // dropped its receiver; the reply is stale
                if tx.send(reply).is_err() {
                    debug!(id = %id, "blocked requester gone, reply dropped");
                    return ReplyDisposition::Unmatched;
                }
                ReplyDisposition::Delivered
            }
            Slot::Callback(callback) => {
                let disposition = ReplyDisposition::Callback {
                    callback: callback.clone(),
                    request: entry.request.clone(),
                    reply,
                };
                if keep_open {
                    pending.insert(
                        id,
                        Pending {
                            request: entry.request,
                            slot: Slot::Callback(callback),
                            multi_response: entry.multi_response,
                        },
                    );
                }
                disposition
            }
        }
    }

    /// Drop every pending request (disconnect path); blocked callers
    /// observe a timeout-style `None`
    pub(crate) fn cancel_all(&self) {
        let count = {
            let mut pending = self.pending.lock();
            let count = pending.len();
            pending.clear();
            count
        };
        if count > 0 {
            debug!(count, "cancelled pending requests");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldValue;
    use crate::message::Kind;

    fn correlator() -> RequestCorrelator {
        RequestCorrelator::new(&Config::new())
    }

    fn request() -> Message {
        Message::new("MSN1.SAT1.REQ.DIR.COMP", Kind::Request).unwrap()
    }

    fn reply_for(id: &str, status: i16) -> Message {
        let mut m = Message::new("MSN1.SAT1.RESP.DIR.COMP", Kind::Reply).unwrap();
        m.add_field(Field::header(REPLY_UNIQUE_ID_FIELD, id).unwrap());
        m.add_field(Field::new("RESPONSE-STATUS", FieldValue::I16(status)).unwrap());
        m
    }

    #[test]
    fn test_resolve_republish_contract() {
        let c = correlator();
        assert_eq!(c.resolve_republish(0), DEFAULT_REPUBLISH_MS);
        assert_eq!(c.resolve_republish(-1), REPUBLISH_NEVER);
        assert_eq!(c.resolve_republish(-500), REPUBLISH_NEVER);
        assert_eq!(c.resolve_republish(50), MIN_REPUBLISH_MS);
        assert_eq!(c.resolve_republish(100), 100);
        assert_eq!(c.resolve_republish(2500), 2500);
    }

    #[test]
    fn test_resolve_republish_configured_default() {
        let cfg = Config::from_args(&["mw-republish-ms=5000"]);
        let c = RequestCorrelator::new(&cfg);
        assert_eq!(c.resolve_republish(0), 5000);
    }

    #[test]
    fn test_stamp_adds_hidden_header_field() {
        let mut req = request();
        let id = RequestCorrelator::stamp(&mut req).unwrap();
        let field = req.get_field(REPLY_UNIQUE_ID_FIELD).unwrap();
        assert!(field.is_header());
        assert_eq!(field.string_value(), id);
    }

    #[tokio::test]
    async fn test_blocking_delivery() {
        let c = correlator();
        let mut req = request();
        let id = RequestCorrelator::stamp(&mut req).unwrap();
        let rx = c.register_blocking(&id, req, false);

        assert!(matches!(c.on_reply(reply_for(&id, 3)), ReplyDisposition::Delivered));
        let reply = rx.await.unwrap();
        // the hidden ID is cleared before delivery
        assert!(!reply.has_field(REPLY_UNIQUE_ID_FIELD));
        assert_eq!(c.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_each_get_their_own_reply() {
        let c = correlator();

        let mut r1 = request();
        let mut r2 = request();
        let id1 = RequestCorrelator::stamp(&mut r1).unwrap();
        let id2 = RequestCorrelator::stamp(&mut r2).unwrap();
        let rx1 = c.register_blocking(&id1, r1, false);
        let rx2 = c.register_blocking(&id2, r2, false);

        // replies arrive out of order
        let mut reply2 = reply_for(&id2, 3);
        reply2.add_field(Field::new("DATA", "for-two").unwrap());
        let mut reply1 = reply_for(&id1, 3);
        reply1.add_field(Field::new("DATA", "for-one").unwrap());

        c.on_reply(reply2);
        c.on_reply(reply1);

        assert_eq!(rx1.await.unwrap().get_string_field("DATA").unwrap(), "for-one");
        assert_eq!(rx2.await.unwrap().get_string_field("DATA").unwrap(), "for-two");
    }

    #[test]
    fn test_unmatched_reply_dropped() {
        let c = correlator();
        assert!(matches!(
            c.on_reply(reply_for("no-such-id", 3)),
            ReplyDisposition::Unmatched
        ));

        // reply without the hidden field at all
        let bare = Message::new("A.RESP.B", Kind::Reply).unwrap();
        assert!(matches!(c.on_reply(bare), ReplyDisposition::Unmatched));
    }

    #[test]
    fn test_callback_multi_response_lifecycle() {
        let c = correlator();
        let mut req = request();
        let id = RequestCorrelator::stamp(&mut req).unwrap();
        c.register_callback(&id, req, true, Arc::new(|_req, _reply| {}));

        // ack and working keep the entry alive
        assert!(matches!(c.on_reply(reply_for(&id, 1)), ReplyDisposition::Callback { .. }));
        assert!(c.contains(&id));
        assert!(matches!(c.on_reply(reply_for(&id, 2)), ReplyDisposition::Callback { .. }));
        assert!(c.contains(&id));

        // successful completion is terminal
        assert!(matches!(c.on_reply(reply_for(&id, 3)), ReplyDisposition::Callback { .. }));
        assert!(!c.contains(&id));
    }

    #[test]
    fn test_single_response_callback_removed_on_first_reply() {
        let c = correlator();
        let mut req = request();
        let id = RequestCorrelator::stamp(&mut req).unwrap();
        c.register_callback(&id, req, false, Arc::new(|_req, _reply| {}));

        // even a working status is terminal without multi-response
        assert!(matches!(c.on_reply(reply_for(&id, 2)), ReplyDisposition::Callback { .. }));
        assert!(!c.contains(&id));
    }

    #[test]
    fn test_multi_response_per_message_override() {
        let cfg = Config::from_args(&["mw-multi-resp=true"]);
        let c = RequestCorrelator::new(&cfg);

        let plain = request();
        assert!(c.multi_response_for(&plain));

        let mut opted_out = request();
        let mut mcfg = Config::new();
        mcfg.add_value(options::MULTI_RESP, "false");
        opted_out.set_config(mcfg);
        assert!(!c.multi_response_for(&opted_out));
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let c = correlator();
        let mut req = request();
        let id = RequestCorrelator::stamp(&mut req).unwrap();
        let rx = c.register_blocking(&id, req, false);

        c.cancel_all();
        assert_eq!(c.pending_count(), 0);
        assert!(rx.await.is_err());
    }
}
