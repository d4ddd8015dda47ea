//! Message factory
//!
//! Produces messages pre-populated with the standard fields and the
//! identity fields of their schema template, and owns the
//! Specification used for validation.

use crate::config::Config;
use crate::error::{BusError, Result, StatusCode};
use crate::field::{Field, FieldValue};
use crate::message::Message;
use crate::schema::Specification;
use parking_lot::Mutex;
use std::sync::Arc;

pub struct MessageFactory {
    spec: Arc<Specification>,
    standard_fields: Mutex<Vec<Field>>,
}

impl MessageFactory {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            spec: Arc::new(Specification::new(config)?),
            standard_fields: Mutex::new(Vec::new()),
        })
    }

    pub fn specification(&self) -> Arc<Specification> {
        self.spec.clone()
    }

    /// Fields applied (as header fields) to every subsequently
    /// created message. Replaces any prior set.
    pub fn set_standard_fields(&self, fields: Vec<Field>) {
        let mut standard = self.standard_fields.lock();
        *standard = fields;
        for f in standard.iter_mut() {
            f.set_header(true);
        }
    }

    pub fn clear_standard_fields(&self) {
        self.standard_fields.lock().clear();
    }

    /// Create a message for a schema ID ("MSG.HB", or the "HB"
    /// shorthand for message schemas). The message carries the
    /// standard fields, the template's pinned identity fields, and
    /// the template's kind; its subject must be set by the caller.
    pub fn create_message(&self, schema_id: &str) -> Result<Message> {
        let resolved = if schema_id.contains('.') {
            schema_id.to_string()
        } else {
            format!("MSG.{}", schema_id)
        };

        let template = self.spec.find_template(&resolved).ok_or_else(|| {
            BusError::message(
                StatusCode::UnknownSchemaId,
                format!("no schema template for ID {:?}", schema_id),
            )
        })?;

        let mut msg = Message::unaddressed(template.kind());
        msg.set_schema_id(template.id());

        for field in self.standard_fields.lock().iter() {
            msg.add_field(field.clone());
        }

        for ft in template.field_templates() {
            if let Some(value) = ft.fixed_value() {
                let mut field = Field::new(ft.name(), FieldValue::String(value.to_string()))?;
                field.set_header(ft.is_header());
                msg.add_field(field);
            }
        }
        Ok(msg)
    }

    /// Decode wire text; the result reflects the data exactly (no
    /// standard fields are applied)
    pub fn from_data(&self, data: &str) -> Result<Message> {
        Message::from_data(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Kind;

    fn factory() -> MessageFactory {
        MessageFactory::new(&Config::new()).unwrap()
    }

    #[test]
    fn test_create_message_carries_identity_fields() {
        let msg = factory().create_message("MSG.HB").unwrap();
        assert_eq!(msg.kind(), Kind::Publish);
        assert_eq!(msg.schema_id(), Some("MSG.HB"));
        assert_eq!(msg.get_string_field("MESSAGE-TYPE").unwrap(), "MSG");
        assert_eq!(msg.get_string_field("MESSAGE-SUBTYPE").unwrap(), "HB");
        assert!(msg.get_field("MESSAGE-TYPE").unwrap().is_header());
    }

    #[test]
    fn test_short_schema_id() {
        let msg = factory().create_message("LOG").unwrap();
        assert_eq!(msg.schema_id(), Some("MSG.LOG"));
    }

    #[test]
    fn test_request_and_reply_kinds() {
        let f = factory();
        assert_eq!(f.create_message("REQ.DIR").unwrap().kind(), Kind::Request);
        assert_eq!(f.create_message("RESP.DIR").unwrap().kind(), Kind::Reply);
    }

    #[test]
    fn test_unknown_schema_id() {
        let err = factory().create_message("MSG.NOPE").unwrap_err();
        assert_eq!(err.code(), StatusCode::UnknownSchemaId);
    }

    #[test]
    fn test_standard_fields_applied_as_headers() {
        let f = factory();
        f.set_standard_fields(vec![
            Field::new("MISSION-ID", "MSN1").unwrap(),
            Field::new("COMPONENT", "GCSPUB").unwrap(),
        ]);

        let msg = f.create_message("HB").unwrap();
        assert_eq!(msg.get_string_field("MISSION-ID").unwrap(), "MSN1");
        assert!(msg.get_field("MISSION-ID").unwrap().is_header());

        f.clear_standard_fields();
        let msg = f.create_message("HB").unwrap();
        assert!(!msg.has_field("MISSION-ID"));
    }

    #[test]
    fn test_created_message_validates_once_completed() {
        let f = factory();
        f.set_standard_fields(vec![
            Field::new("MISSION-ID", "MSN1").unwrap(),
            Field::new("COMPONENT", "GCSPUB").unwrap(),
        ]);

        let mut msg = f.create_message("HB").unwrap();
        msg.set_subject("MSN1.SAT1.MSG.HB.GCSPUB").unwrap();
        msg.add_field(Field::new("COUNTER", 1u16).unwrap());

        assert!(f.specification().validate_message(&msg).is_ok());
    }

    #[test]
    fn test_from_data_round_trip() {
        let f = factory();
        let mut msg = f.create_message("HB").unwrap();
        msg.set_subject("MSN1.SAT1.MSG.HB.GCSPUB").unwrap();
        let back = f.from_data(&msg.to_json()).unwrap();
        assert_eq!(back.subject(), msg.subject());
        assert_eq!(back.field_count(), msg.field_count());
    }
}
