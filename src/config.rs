//! Key-value configuration consumed by connections, specifications,
//! and per-call overrides
//!
//! Keys are matched case-insensitively and insertion order is kept so
//! that iteration and serialization are deterministic. The last write
//! to a key wins.

use crate::error::{BusError, Result, StatusCode};
use serde_json::Value;

/// Well-known option keys. The exact strings are external contracts;
/// tooling writes them into config files and command lines.
pub mod options {
    /// Middleware server address, passed through to the transport
    pub const MW_SERVER: &str = "mw-server";
    /// Validate messages on publish/request ("true"/"false")
    pub const VALIDATE_SEND: &str = "msg-content-validate-send";
    /// Validate inbound messages before delivery
    pub const VALIDATE_RECV: &str = "msg-content-validate-recv";
    /// Shorthand for both of the above
    pub const VALIDATE_ALL: &str = "msg-content-validate-all";
    /// Message specification version, e.g. "2019.00"
    pub const SPEC_VERSION: &str = "specification-version";
    /// Schema addendum level, 0..=6
    pub const SCHEMA_LEVEL: &str = "schema-level";
    /// Directory of additional schema template files
    pub const SCHEMA_PATH: &str = "schema-path";
    /// Allow multiple responses per request ("open response" mode)
    pub const MULTI_RESP: &str = "mw-multi-resp";
    /// Default republish interval for requests, in milliseconds
    pub const REPUBLISH_MS: &str = "mw-republish-ms";
    /// Reconnect attempts before giving up; -1 retries forever
    pub const MAX_CONN_RETRIES: &str = "mw-max-conn-retries";
    /// Delay between reconnect attempts, in milliseconds
    pub const CONN_RETRY_INTERVAL: &str = "mw-conn-retry-interval";
}

/// Ordered key=value store
#[derive(Debug, Clone, Default)]
pub struct Config {
    entries: Vec<(String, String)>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from command-line style `key=value` tokens. Tokens
    /// without `=` are ignored.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Self {
        let mut cfg = Self::new();
        for arg in args {
            if let Some((name, value)) = arg.as_ref().split_once('=') {
                if !name.is_empty() {
                    cfg.add_value(name, value);
                }
            }
        }
        cfg
    }

    /// Build from raw text: either a JSON object or `name=value`
    /// lines (one per line, `#` comments allowed).
    pub fn from_data(data: &str) -> Result<Self> {
        let trimmed = data.trim_start();
        if trimmed.starts_with('{') {
            return Self::from_json(data);
        }

        let mut cfg = Self::new();
        for line in data.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, value) = line.split_once('=').ok_or_else(|| {
                BusError::config(
                    StatusCode::InvalidValue,
                    format!("config line is not name=value: {:?}", line),
                )
            })?;
            if name.is_empty() {
                return Err(BusError::config(
                    StatusCode::InvalidValue,
                    "config entry name cannot be empty",
                ));
            }
            cfg.add_value(name, value);
        }
        Ok(cfg)
    }

    fn from_json(data: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(data)?;
        let obj = value.as_object().ok_or_else(|| {
            BusError::config(StatusCode::InvalidValue, "config JSON must be an object")
        })?;

        let mut cfg = Self::new();
        for (name, v) in obj {
            let text = match v {
                Value::String(s) => s.clone(),
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                other => {
                    return Err(BusError::config(
                        StatusCode::InvalidValue,
                        format!("config entry {:?} has non-scalar value: {}", name, other),
                    ));
                }
            };
            cfg.add_value(name, text);
        }
        Ok(cfg)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Set a value, replacing any existing entry for the key (the
    /// original position is kept on replace).
    pub fn add_value(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Remove an entry; returns whether it existed
    pub fn clear_value(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// Boolean lookup accepting true/false/1/0 (case-insensitive);
    /// anything else falls back to the default.
    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        match self.get(name) {
            Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => true,
            Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => false,
            _ => default,
        }
    }

    pub fn get_i32(&self, name: &str, default: i32) -> i32 {
        self.get(name).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
    }

    pub fn get_f64(&self, name: &str, default: f64) -> f64 {
        self.get(name).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
    }

    /// Copy entries from `other`; existing keys are only replaced
    /// when `overwrite` is set.
    pub fn merge(&mut self, other: &Config, overwrite: bool) {
        for (name, value) in &other.entries {
            if overwrite || self.get(name).is_none() {
                self.add_value(name.clone(), value.clone());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn to_json(&self) -> String {
        let obj: serde_json::Map<String, Value> = self
            .entries
            .iter()
            .map(|(n, v)| (n.clone(), Value::String(v.clone())))
            .collect();
        Value::Object(obj).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_args() {
        let args = ["mw-server=tcp://localhost:9100", "loglevel", "schema-level=2"];
        let cfg = Config::from_args(&args);
        assert_eq!(cfg.get("mw-server"), Some("tcp://localhost:9100"));
        assert_eq!(cfg.get("schema-level"), Some("2"));
        assert_eq!(cfg.len(), 2);
    }

    #[test]
    fn test_from_data_lines() {
        let cfg = Config::from_data("# comment\nmw-server=host\n\nmw-multi-resp=true\n").unwrap();
        assert_eq!(cfg.get("mw-server"), Some("host"));
        assert!(cfg.get_bool("mw-multi-resp", false));
    }

    #[test]
    fn test_from_data_bad_line() {
        let err = Config::from_data("just-a-word\n").unwrap_err();
        assert_eq!(err.code(), StatusCode::InvalidValue);
    }

    #[test]
    fn test_from_data_json() {
        let cfg = Config::from_data(r#"{"mw-server": "host", "schema-level": 3, "tracking": true}"#)
            .unwrap();
        assert_eq!(cfg.get("mw-server"), Some("host"));
        assert_eq!(cfg.get_i32("schema-level", 0), 3);
        assert!(cfg.get_bool("tracking", false));
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let mut cfg = Config::new();
        cfg.add_value("MW-Server", "host");
        assert_eq!(cfg.get("mw-server"), Some("host"));
        assert_eq!(cfg.get("MW-SERVER"), Some("host"));
    }

    #[test]
    fn test_last_write_wins_keeps_position() {
        let mut cfg = Config::new();
        cfg.add_value("a", "1");
        cfg.add_value("b", "2");
        cfg.add_value("A", "3");
        let entries: Vec<_> = cfg.iter().collect();
        assert_eq!(entries, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn test_typed_getters_fall_back() {
        let mut cfg = Config::new();
        cfg.add_value("n", "not-a-number");
        assert_eq!(cfg.get_i32("n", 7), 7);
        assert_eq!(cfg.get_f64("n", 0.5), 0.5);
        assert!(!cfg.get_bool("n", false));
    }

    #[test]
    fn test_clear_value() {
        let mut cfg = Config::new();
        cfg.add_value("a", "1");
        assert!(cfg.clear_value("A"));
        assert!(!cfg.clear_value("a"));
        assert!(cfg.is_empty());
    }

    #[test]
    fn test_merge() {
        let mut base = Config::from_args(&["a=1", "b=2"]);
        let other = Config::from_args(&["b=9", "c=3"]);
        base.merge(&other, false);
        assert_eq!(base.get("b"), Some("2"));
        assert_eq!(base.get("c"), Some("3"));
        base.merge(&other, true);
        assert_eq!(base.get("b"), Some("9"));
    }

    #[test]
    fn test_to_json_round_trip() {
        let cfg = Config::from_args(&["a=1", "b=two"]);
        let back = Config::from_data(&cfg.to_json()).unwrap();
        assert_eq!(back.get("a"), Some("1"));
        assert_eq!(back.get("b"), Some("two"));
    }
}
