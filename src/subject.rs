//! Subject naming and pattern matching
//!
//! Subjects are dot-separated elements: `MSN1.SAT1.MSG.HB.GCSPUB`.
//! Each element must match `[A-Za-z0-9_-]+`.
//!
//! Subscription patterns may additionally use:
//! - `*`  matches exactly one element at its position
//! - `>`  as the last element, matches one or more remaining elements
//! - `+`  as the last element, matches zero or more remaining elements
//!
//! Wildcards are never legal in the subject of an outgoing message.

use crate::error::{BusError, Result, StatusCode};
use std::fmt;

fn is_valid_element_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_valid_element(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_valid_element_char)
}

fn check_shape(subject: &str) -> Result<()> {
    if subject.is_empty() {
        return Err(BusError::message(
            StatusCode::InvalidSubject,
            "subject cannot be empty",
        ));
    }
    if subject.contains("..") {
        return Err(BusError::message(
            StatusCode::InvalidSubject,
            format!("subject {:?} has an empty element (missing element?)", subject),
        ));
    }
    if subject.starts_with('.') || subject.ends_with('.') {
        return Err(BusError::message(
            StatusCode::InvalidSubject,
            format!("subject {:?} starts or ends with a dot", subject),
        ));
    }
    Ok(())
}

/// Validate a concrete message subject (wildcards rejected)
pub fn validate_subject(subject: &str) -> Result<()> {
    check_shape(subject)?;
    for element in subject.split('.') {
        if !is_valid_element(element) {
            return Err(BusError::message(
                StatusCode::InvalidSubject,
                format!("subject element {:?} is invalid", element),
            ));
        }
    }
    Ok(())
}

/// A validated subscription pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubjectPattern {
    pattern: String,
    elements: Vec<String>,
}

impl SubjectPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        check_shape(pattern)?;

        let elements: Vec<String> = pattern.split('.').map(str::to_string).collect();
        let last = elements.len() - 1;

        for (i, element) in elements.iter().enumerate() {
            let ok = match element.as_str() {
                "*" => true,
                ">" | "+" => i == last,
                other => is_valid_element(other),
            };
            if !ok {
                return Err(BusError::message(
                    StatusCode::InvalidSubject,
                    format!("pattern {:?}: element {:?} is invalid", pattern, element),
                ));
            }
        }

        Ok(Self {
            pattern: pattern.to_string(),
            elements,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Match a concrete subject against this pattern
    pub fn matches(&self, subject: &str) -> bool {
        let mut sub = subject.split('.');
        let mut pat = self.elements.iter();

        loop {
            match (sub.next(), pat.next()) {
                (Some(_), Some(p)) if p == ">" || p == "+" => return true,
                (Some(_), Some(p)) if p == "*" => continue,
                (Some(s), Some(p)) if s == p => continue,
                (Some(_), Some(_)) => return false,
                (None, Some(p)) => return p == "+" && pat.next().is_none(),
                (Some(_), None) => return false,
                (None, None) => return true,
            }
        }
    }
}

impl fmt::Display for SubjectPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}
