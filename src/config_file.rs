//! Named-entry configuration store
//!
//! Holds named configs, message definitions, and subscription
//! entries, populated programmatically or from a JSON document. The
//! core only consumes lookups; richer file formats belong to
//! external tooling.

use crate::config::Config;
use crate::error::{BusError, Result, StatusCode};
use crate::message::Message;
use serde_json::Value;
use std::collections::HashMap;

/// A named subscription definition
#[derive(Debug, Clone)]
pub struct SubscriptionEntry {
    name: String,
    pattern: String,
}

impl SubscriptionEntry {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// Store of named configs, messages, and subscription entries
#[derive(Default)]
pub struct ConfigFile {
    configs: HashMap<String, Config>,
    messages: HashMap<String, Message>,
    subscriptions: HashMap<String, SubscriptionEntry>,
}

impl ConfigFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON document:
    ///
    /// ```json
    /// {
    ///   "configs": {"name": {"mw-server": "host"}},
    ///   "messages": {"name": "<MESSAGE .../>"},
    ///   "subscriptions": {"name": "A.B.>"}
    /// }
    /// ```
    pub fn from_json(data: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(data)?;
        let obj = root.as_object().ok_or_else(|| {
            BusError::config(StatusCode::InvalidValue, "config file must be a JSON object")
        })?;

        let mut file = Self::new();

        if let Some(configs) = obj.get("configs") {
            let configs = configs.as_object().ok_or_else(|| {
                BusError::config(StatusCode::InvalidValue, "\"configs\" must be an object")
            })?;
            for (name, value) in configs {
                file.add_config(name, Config::from_data(&value.to_string())?);
            }
        }

        if let Some(messages) = obj.get("messages") {
            let messages = messages.as_object().ok_or_else(|| {
                BusError::config(StatusCode::InvalidValue, "\"messages\" must be an object")
            })?;
            for (name, value) in messages {
                let text = value.as_str().ok_or_else(|| {
                    BusError::config(
                        StatusCode::InvalidValue,
                        format!("message entry {:?} must be a string", name),
                    )
                })?;
                file.add_message(name, Message::from_data(text)?);
            }
        }

        if let Some(subs) = obj.get("subscriptions") {
            let subs = subs.as_object().ok_or_else(|| {
                BusError::config(StatusCode::InvalidValue, "\"subscriptions\" must be an object")
            })?;
            for (name, value) in subs {
                let pattern = value.as_str().ok_or_else(|| {
                    BusError::config(
                        StatusCode::InvalidValue,
                        format!("subscription entry {:?} must be a string", name),
                    )
                })?;
                file.add_subscription_entry(SubscriptionEntry::new(name, pattern));
            }
        }

        Ok(file)
    }

    pub fn add_config(&mut self, name: impl Into<String>, config: Config) {
        self.configs.insert(name.into(), config);
    }

    pub fn add_message(&mut self, name: impl Into<String>, message: Message) {
        self.messages.insert(name.into(), message);
    }

    pub fn add_subscription_entry(&mut self, entry: SubscriptionEntry) {
        self.subscriptions.insert(entry.name.clone(), entry);
    }

    pub fn lookup_config(&self, name: &str) -> Result<&Config> {
        self.configs.get(name).ok_or_else(|| entry_not_found("config", name))
    }

    pub fn lookup_message(&self, name: &str) -> Result<&Message> {
        self.messages.get(name).ok_or_else(|| entry_not_found("message", name))
    }

    pub fn lookup_subscription_entry(&self, name: &str) -> Result<&SubscriptionEntry> {
        self.subscriptions.get(name).ok_or_else(|| entry_not_found("subscription", name))
    }
}

fn entry_not_found(kind: &str, name: &str) -> BusError {
    BusError::config(
        StatusCode::EntryNotFound,
        format!("no {} entry named {:?}", kind, name),
    )
}
