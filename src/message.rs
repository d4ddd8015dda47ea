//! Application messages
//!
//! A message is an ordered collection of uniquely-named fields plus a
//! subject, a kind, and an optional per-message config that is never
//! transmitted. Replacing a field keeps its original position so the
//! serialized form stays stable.

use crate::config::Config;
use crate::error::{BusError, Result, StatusCode};
use crate::field::{Field, FieldType, FieldValue};
use crate::subject;
use std::fmt;

/// What the transport layer does with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Publish,
    Request,
    Reply,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Publish => "PUBLISH",
            Kind::Request => "REQUEST",
            Kind::Reply => "REPLY",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PUBLISH" => Ok(Kind::Publish),
            "REQUEST" => Ok(Kind::Request),
            "REPLY" => Ok(Kind::Reply),
            other => Err(BusError::message(
                StatusCode::ParseError,
                format!("unknown message kind {:?}", other),
            )),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Value of the RESPONSE-STATUS field in reply messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Acknowledgement = 1,
    WorkingKeepAlive = 2,
    SuccessfulCompletion = 3,
    FailedCompletion = 4,
    InvalidRequest = 5,
    FinalMessage = 6,
}

impl ResponseStatus {
    pub fn from_i64(v: i64) -> Result<Self> {
        match v {
            1 => Ok(ResponseStatus::Acknowledgement),
            2 => Ok(ResponseStatus::WorkingKeepAlive),
            3 => Ok(ResponseStatus::SuccessfulCompletion),
            4 => Ok(ResponseStatus::FailedCompletion),
            5 => Ok(ResponseStatus::InvalidRequest),
            6 => Ok(ResponseStatus::FinalMessage),
            other => Err(BusError::message(
                StatusCode::InvalidValue,
                format!("response status {} is out of range", other),
            )),
        }
    }

    /// Whether this status closes out a pending request. Only
    /// Acknowledgement and WorkingKeepAlive leave it open (and only
    /// in multi-response mode).
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            ResponseStatus::Acknowledgement | ResponseStatus::WorkingKeepAlive
        )
    }
}

/// Which fields a `FieldIterator` yields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldSelector {
    #[default]
    All,
    HeaderOnly,
    NonHeaderOnly,
}

impl FieldSelector {
    fn accepts(&self, field: &Field) -> bool {
        match self {
            FieldSelector::All => true,
            FieldSelector::HeaderOnly => field.is_header(),
            FieldSelector::NonHeaderOnly => !field.is_header(),
        }
    }
}

/// Restartable iterator over a snapshot of a message's fields, taken
/// at creation time; later mutation of the message is not observed.
#[derive(Debug)]
pub struct FieldIterator {
    fields: Vec<Field>,
    index: usize,
}

impl FieldIterator {
    fn new(message: &Message, selector: FieldSelector) -> Self {
        Self {
            fields: message
                .fields
                .iter()
                .filter(|f| selector.accepts(f))
                .cloned()
                .collect(),
            index: 0,
        }
    }

    pub fn has_next(&self) -> bool {
        self.index < self.fields.len()
    }

    /// Next field; fails with an iterator error once exhausted
    pub fn next(&mut self) -> Result<&Field> {
        let field = self.fields.get(self.index).ok_or_else(|| {
            BusError::iterator(StatusCode::IteratorExhausted, "field iterator is exhausted")
        })?;
        self.index += 1;
        Ok(field)
    }

    /// Restart from the first field of the snapshot
    pub fn reset(&mut self) {
        self.index = 0;
    }
}

/// An application message
#[derive(Debug, Clone)]
pub struct Message {
    subject: String,
    kind: Kind,
    fields: Vec<Field>,
    config: Config,
    schema_id: Option<String>,
}

impl Message {
    /// Create a message with a validated subject
    pub fn new(subject: impl Into<String>, kind: Kind) -> Result<Self> {
        let subject = subject.into();
        subject::validate_subject(&subject)?;
        Ok(Self {
            subject,
            kind,
            fields: Vec::new(),
            config: Config::new(),
            schema_id: None,
        })
    }

    /// Create a message whose subject will be set later (factory use)
    pub(crate) fn unaddressed(kind: Kind) -> Self {
        Self {
            subject: String::new(),
            kind,
            fields: Vec::new(),
            config: Config::new(),
            schema_id: None,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn set_subject(&mut self, subject: impl Into<String>) -> Result<()> {
        let subject = subject.into();
        subject::validate_subject(&subject)?;
        self.subject = subject;
        Ok(())
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: Kind) {
        self.kind = kind;
    }

    /// Local-only settings for this message (never transmitted)
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn set_config(&mut self, config: Config) {
        self.config.merge(&config, true);
    }

    /// Schema ID used by validation, e.g. "MSG.HB"
    pub fn schema_id(&self) -> Option<&str> {
        self.schema_id.as_deref()
    }

    pub(crate) fn set_schema_id(&mut self, schema_id: impl Into<String>) {
        self.schema_id = Some(schema_id.into());
    }

    fn field_position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }

    /// Add a field (copy-in), replacing any existing field of the
    /// same name in place. Returns whether a replacement occurred.
    pub fn add_field(&mut self, field: Field) -> bool {
        match self.field_position(field.name()) {
            Some(i) => {
                self.fields[i] = field;
                true
            }
            None => {
                self.fields.push(field);
                false
            }
        }
    }

    pub fn add_fields<I: IntoIterator<Item = Field>>(&mut self, fields: I) {
        for field in fields {
            self.add_field(field);
        }
    }

    /// Remove a field; returns whether it existed
    pub fn clear_field(&mut self, name: &str) -> bool {
        match self.field_position(name) {
            Some(i) => {
                self.fields.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn clear_fields(&mut self) {
        self.fields.clear();
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field_position(name).is_some()
    }

    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.field_position(name).map(|i| &self.fields[i])
    }

    fn require_field(&self, name: &str) -> Result<&Field> {
        self.get_field(name).ok_or_else(|| {
            BusError::message(
                StatusCode::FieldNotFound,
                format!("message has no field named {:?}", name),
            )
        })
    }

    fn type_mismatch(&self, name: &str, want: FieldType, have: FieldType) -> BusError {
        BusError::message(
            StatusCode::TypeMismatch,
            format!("field {:?} has type {}, not {}", name, have, want),
        )
    }

    /// Fields in insertion order (no snapshot; borrows the message)
    pub(crate) fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    /// Iterator over a snapshot of the current fields
    pub fn field_iter(&self, selector: FieldSelector) -> FieldIterator {
        FieldIterator::new(self, selector)
    }

    pub fn get_string_field(&self, name: &str) -> Result<&str> {
        let field = self.require_field(name)?;
        match field.value() {
            FieldValue::String(v) => Ok(v),
            other => Err(self.type_mismatch(name, FieldType::String, other.field_type())),
        }
    }

    pub fn get_binary_field(&self, name: &str) -> Result<&[u8]> {
        let field = self.require_field(name)?;
        match field.value() {
            FieldValue::Binary(v) => Ok(v),
            other => Err(self.type_mismatch(name, FieldType::Binary, other.field_type())),
        }
    }

    pub fn get_bool_field(&self, name: &str) -> Result<bool> {
        let field = self.require_field(name)?;
        match field.value() {
            FieldValue::Bool(v) => Ok(*v),
            other => Err(self.type_mismatch(name, FieldType::Bool, other.field_type())),
        }
    }

    pub fn get_char_field(&self, name: &str) -> Result<char> {
        let field = self.require_field(name)?;
        match field.value() {
            FieldValue::Char(v) => Ok(*v),
            other => Err(self.type_mismatch(name, FieldType::Char, other.field_type())),
        }
    }

    pub fn get_i8_field(&self, name: &str) -> Result<i8> {
        let field = self.require_field(name)?;
        match field.value() {
            FieldValue::I8(v) => Ok(*v),
            other => Err(self.type_mismatch(name, FieldType::I8, other.field_type())),
        }
    }

    pub fn get_i16_field(&self, name: &str) -> Result<i16> {
        let field = self.require_field(name)?;
        match field.value() {
            FieldValue::I16(v) => Ok(*v),
            other => Err(self.type_mismatch(name, FieldType::I16, other.field_type())),
        }
    }

    pub fn get_i32_field(&self, name: &str) -> Result<i32> {
        let field = self.require_field(name)?;
        match field.value() {
            FieldValue::I32(v) => Ok(*v),
            other => Err(self.type_mismatch(name, FieldType::I32, other.field_type())),
        }
    }

    pub fn get_i64_field(&self, name: &str) -> Result<i64> {
        let field = self.require_field(name)?;
        match field.value() {
            FieldValue::I64(v) => Ok(*v),
            other => Err(self.type_mismatch(name, FieldType::I64, other.field_type())),
        }
    }

    pub fn get_u8_field(&self, name: &str) -> Result<u8> {
        let field = self.require_field(name)?;
        match field.value() {
            FieldValue::U8(v) => Ok(*v),
            other => Err(self.type_mismatch(name, FieldType::U8, other.field_type())),
        }
    }

    pub fn get_u16_field(&self, name: &str) -> Result<u16> {
        let field = self.require_field(name)?;
        match field.value() {
            FieldValue::U16(v) => Ok(*v),
            other => Err(self.type_mismatch(name, FieldType::U16, other.field_type())),
        }
    }

    pub fn get_u32_field(&self, name: &str) -> Result<u32> {
        let field = self.require_field(name)?;
        match field.value() {
            FieldValue::U32(v) => Ok(*v),
            other => Err(self.type_mismatch(name, FieldType::U32, other.field_type())),
        }
    }

    pub fn get_u64_field(&self, name: &str) -> Result<u64> {
        let field = self.require_field(name)?;
        match field.value() {
            FieldValue::U64(v) => Ok(*v),
            other => Err(self.type_mismatch(name, FieldType::U64, other.field_type())),
        }
    }

    pub fn get_f32_field(&self, name: &str) -> Result<f32> {
        let field = self.require_field(name)?;
        match field.value() {
            FieldValue::F32(v) => Ok(*v),
            other => Err(self.type_mismatch(name, FieldType::F32, other.field_type())),
        }
    }

    pub fn get_f64_field(&self, name: &str) -> Result<f64> {
        let field = self.require_field(name)?;
        match field.value() {
            FieldValue::F64(v) => Ok(*v),
            other => Err(self.type_mismatch(name, FieldType::F64, other.field_type())),
        }
    }

    /// Best-effort string rendering of any field
    pub fn get_string_value(&self, name: &str) -> Result<String> {
        Ok(self.require_field(name)?.string_value())
    }

    /// Best-effort integer coercion of any field
    pub fn get_i64_value(&self, name: &str) -> Result<i64> {
        self.require_field(name)?.i64_value()
    }

    pub fn get_f64_value(&self, name: &str) -> Result<f64> {
        self.require_field(name)?.f64_value()
    }

    pub fn get_bool_value(&self, name: &str) -> Result<bool> {
        self.require_field(name)?.bool_value()
    }

    /// Read the RESPONSE-STATUS field of a reply
    pub fn response_status(&self) -> Result<ResponseStatus> {
        ResponseStatus::from_i64(self.get_i64_value("RESPONSE-STATUS")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg() -> Message {
        Message::new("MSN1.SAT1.MSG.HB.COMP", Kind::Publish).unwrap()
    }

    #[test]
    fn test_new_validates_subject() {
        assert!(Message::new("A.B.C", Kind::Publish).is_ok());
        assert!(Message::new("", Kind::Publish).is_err());
        assert!(Message::new("A.*.C", Kind::Publish).is_err());
    }

    #[test]
    fn test_add_field_reports_replacement() {
        let mut m = msg();
        assert!(!m.add_field(Field::new("A", 1i32).unwrap()));
        assert!(m.add_field(Field::new("A", 2i32).unwrap()));
        assert_eq!(m.field_count(), 1);
        assert_eq!(m.get_i32_field("A").unwrap(), 2);
    }

    #[test]
    fn test_unique_names_last_value_wins() {
        let mut m = msg();
        for i in 0..10 {
            m.add_field(Field::new(format!("F{}", i % 3), i as i32).unwrap());
        }
        assert_eq!(m.field_count(), 3);
        assert_eq!(m.get_i32_field("F0").unwrap(), 9);
        assert_eq!(m.get_i32_field("F1").unwrap(), 7);
        assert_eq!(m.get_i32_field("F2").unwrap(), 8);
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut m = msg();
        m.add_field(Field::new("A", 1i32).unwrap());
        m.add_field(Field::new("B", 2i32).unwrap());
        m.add_field(Field::new("A", 3i32).unwrap());
        let names: Vec<_> = m.fields().map(|f| f.name().to_string()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn test_typed_getters() {
        let mut m = msg();
        m.add_field(Field::new("S", "text").unwrap());
        m.add_field(Field::new("N", 5i32).unwrap());
        m.add_field(Field::new("BIG", FieldValue::U64(u64::MAX)).unwrap());
        m.add_field(Field::new("MARK", FieldValue::Char('Q')).unwrap());

        assert_eq!(m.get_string_field("S").unwrap(), "text");
        assert_eq!(m.get_i32_field("N").unwrap(), 5);
        assert_eq!(m.get_u64_field("BIG").unwrap(), u64::MAX);
        assert_eq!(m.get_char_field("MARK").unwrap(), 'Q');

        let err = m.get_i32_field("S").unwrap_err();
        assert_eq!(err.code(), StatusCode::TypeMismatch);
        let err = m.get_i64_field("N").unwrap_err();
        assert_eq!(err.code(), StatusCode::TypeMismatch);
        let err = m.get_string_field("MISSING").unwrap_err();
        assert_eq!(err.code(), StatusCode::FieldNotFound);
    }

    #[test]
    fn test_coercing_getters() {
        let mut m = msg();
        m.add_field(Field::new("N", 5i32).unwrap());
        m.add_field(Field::new("S", "12").unwrap());

        assert_eq!(m.get_string_value("N").unwrap(), "5");
        assert_eq!(m.get_i64_value("S").unwrap(), 12);
        assert_eq!(m.get_f64_value("N").unwrap(), 5.0);
        assert_eq!(m.get_string_value("MISSING").unwrap_err().code(), StatusCode::FieldNotFound);
    }

    #[test]
    fn test_clear_field() {
        let mut m = msg();
        m.add_field(Field::new("A", 1i32).unwrap());
        assert!(m.clear_field("A"));
        assert!(!m.clear_field("A"));
        assert!(!m.has_field("A"));
    }

    #[test]
    fn test_field_iterator_snapshot_and_reset() {
        let mut m = msg();
        m.add_field(Field::new("A", 1i32).unwrap());
        m.add_field(Field::new("B", 2i32).unwrap());

        let mut it = m.field_iter(FieldSelector::All);
        m.add_field(Field::new("C", 3i32).unwrap());

        assert_eq!(it.next().unwrap().name(), "A");
        assert_eq!(it.next().unwrap().name(), "B");
        assert!(!it.has_next());
        assert_eq!(it.next().unwrap_err().code(), StatusCode::IteratorExhausted);

        it.reset();
        assert!(it.has_next());
        assert_eq!(it.next().unwrap().name(), "A");
    }

    #[test]
    fn test_field_iterator_selector() {
        let mut m = msg();
        m.add_field(Field::header("H", 1i32).unwrap());
        m.add_field(Field::new("P", 2i32).unwrap());

        let mut headers = m.field_iter(FieldSelector::HeaderOnly);
        assert_eq!(headers.next().unwrap().name(), "H");
        assert!(!headers.has_next());

        let mut payload = m.field_iter(FieldSelector::NonHeaderOnly);
        assert_eq!(payload.next().unwrap().name(), "P");
        assert!(!payload.has_next());
    }

    #[test]
    fn test_response_status() {
        let mut m = Message::new("A.RESP.B", Kind::Reply).unwrap();
        m.add_field(Field::new("RESPONSE-STATUS", FieldValue::I16(3)).unwrap());
        assert_eq!(m.response_status().unwrap(), ResponseStatus::SuccessfulCompletion);
        assert!(m.response_status().unwrap().is_terminal());

        m.add_field(Field::new("RESPONSE-STATUS", FieldValue::I16(2)).unwrap());
        assert!(!m.response_status().unwrap().is_terminal());

        m.add_field(Field::new("RESPONSE-STATUS", FieldValue::I16(9)).unwrap());
        assert!(m.response_status().is_err());
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [Kind::Publish, Kind::Request, Kind::Reply] {
            assert_eq!(Kind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(Kind::parse("BROADCAST").is_err());
    }

    #[test]
    fn test_per_message_config() {
        let mut m = msg();
        let mut cfg = Config::new();
        cfg.add_value("mw-multi-resp", "true");
        m.set_config(cfg);
        assert!(m.config().get_bool("mw-multi-resp", false));
    }
}
