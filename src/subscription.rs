//! Subscription tracking and exclusion filtering
//!
//! Maps subject patterns to at most one callback per registration,
//! tracked through opaque handles. An inbound subject is deliverable
//! only when it matches at least one subscription pattern and no
//! exclusion pattern.

use crate::error::{BusError, Result, StatusCode};
use crate::message::Message;
use crate::subject::SubjectPattern;
use std::sync::Arc;
use uuid::Uuid;

/// Handler invoked for each dispatched message matching a
/// subscription. Handlers shared across multiple connections may be
/// invoked concurrently and must be internally thread-safe.
pub type MessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;

/// Opaque subscription handle; scoped to the connection that issued
/// it
#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    id: Uuid,
    registry_id: Uuid,
    pattern: String,
}

impl SubscriptionInfo {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

struct Entry {
    id: Uuid,
    pattern: SubjectPattern,
    callback: Option<MessageCallback>,
}

/// Per-connection registry of subscriptions and exclusions
pub(crate) struct SubscriptionRegistry {
    id: Uuid,
    entries: Vec<Entry>,
    exclusions: Vec<SubjectPattern>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            entries: Vec::new(),
            exclusions: Vec::new(),
        }
    }

    /// Register a pattern. Plain subscriptions are unique per
    /// pattern; callback subscriptions are unique per (pattern,
    /// callback) pair.
    pub(crate) fn register(
        &mut self,
        pattern: &str,
        callback: Option<MessageCallback>,
    ) -> Result<SubscriptionInfo> {
        let parsed = SubjectPattern::parse(pattern)?;

        for entry in &self.entries {
            if entry.pattern.as_str() != parsed.as_str() {
                continue;
            }
            let duplicate = match (&entry.callback, &callback) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            };
            if duplicate {
                return Err(BusError::callback(
                    StatusCode::DuplicateSubscription,
                    format!("already subscribed to {:?}", pattern),
                ));
            }
        }

        let entry = Entry {
            id: Uuid::new_v4(),
            pattern: parsed,
            callback,
        };
        let info = SubscriptionInfo {
            id: entry.id,
            registry_id: self.id,
            pattern: pattern.to_string(),
        };
        self.entries.push(entry);
        Ok(info)
    }

    /// Remove a subscription by handle
    pub(crate) fn remove(&mut self, info: &SubscriptionInfo) -> Result<()> {
        if info.registry_id != self.id {
            return Err(BusError::callback(
                StatusCode::ForeignHandle,
                "subscription handle belongs to a different connection",
            ));
        }
        match self.entries.iter().position(|e| e.id == info.id) {
            Some(i) => {
                self.entries.remove(i);
                Ok(())
            }
            // issued here but already removed
            None => Err(BusError::callback(
                StatusCode::ForeignHandle,
                format!("subscription to {:?} is no longer active", info.pattern),
            )),
        }
    }

    pub(crate) fn exclude(&mut self, pattern: &str) -> Result<()> {
        let parsed = SubjectPattern::parse(pattern)?;
        if !self.exclusions.iter().any(|p| p.as_str() == parsed.as_str()) {
            self.exclusions.push(parsed);
        }
        Ok(())
    }

    /// Remove an exclusion; returns whether it existed
    pub(crate) fn remove_exclusion(&mut self, pattern: &str) -> bool {
        match self.exclusions.iter().position(|p| p.as_str() == pattern) {
            Some(i) => {
                self.exclusions.remove(i);
                true
            }
            None => false,
        }
    }

    fn is_excluded(&self, subject: &str) -> bool {
        self.exclusions.iter().any(|p| p.matches(subject))
    }

    /// Whether an inbound subject should be delivered at all
    pub(crate) fn deliverable(&self, subject: &str) -> bool {
        !self.is_excluded(subject) && self.entries.iter().any(|e| e.pattern.matches(subject))
    }

    /// Callbacks whose pattern matches the subject, in subscribe-call
    /// order, each at most once
    pub(crate) fn matching_callbacks(&self, subject: &str) -> Vec<MessageCallback> {
        if self.is_excluded(subject) {
            return Vec::new();
        }
        self.entries
            .iter()
            .filter(|e| e.pattern.matches(subject))
            .filter_map(|e| e.callback.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
