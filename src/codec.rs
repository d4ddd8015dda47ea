//! Wire-text encodings for messages
//!
//! Two deterministic, field-order-preserving representations:
//!
//! ```text
//! <MESSAGE SUBJECT="A.B.C" KIND="PUBLISH">
//!     <FIELD NAME="COMPONENT" TYPE="STRING">GCSPUB</FIELD>
//! </MESSAGE>
//! ```
//!
//! and the JSON equivalent under a top-level "MESSAGE" key. Binary
//! payloads are uppercase hex in XML and base64 in JSON. Round-trips
//! are lossless for every supported field type.

use crate::error::{BusError, Result, StatusCode};
use crate::field::{self, Field, FieldType, FieldValue};
use crate::message::{Kind, Message};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

/// How binary payloads are rendered in a given encoding
#[derive(Clone, Copy, PartialEq)]
enum BinaryText {
    Hex,
    Base64,
}

impl Message {
    /// XML wire text, fields in insertion order
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "<MESSAGE SUBJECT=\"{}\" KIND=\"{}\"",
            escape_xml(self.subject()),
            self.kind()
        ));

        if self.field_count() == 0 {
            out.push_str("/>");
            return out;
        }

        out.push('>');
        for f in self.fields() {
            out.push_str("\n\t<FIELD NAME=\"");
            out.push_str(&escape_xml(f.name()));
            out.push_str("\" TYPE=\"");
            out.push_str(f.field_type().as_str());
            out.push('"');
            if f.is_header() {
                out.push_str(" HEAD=\"T\"");
            }
            out.push('>');
            out.push_str(&escape_xml(&value_text(f, BinaryText::Hex)));
            out.push_str("</FIELD>");
        }
        out.push_str("\n</MESSAGE>");
        out
    }

    /// JSON wire text, fields in insertion order
    pub fn to_json(&self) -> String {
        let fields: Vec<Value> = self
            .fields()
            .map(|f| {
                let mut obj = json!({
                    "NAME": f.name(),
                    "TYPE": f.field_type().as_str(),
                    "VALUE": value_text(f, BinaryText::Base64),
                });
                if f.is_header() {
                    obj["HEADER"] = Value::Bool(true);
                }
                obj
            })
            .collect();

        json!({
            "MESSAGE": {
                "SUBJECT": self.subject(),
                "KIND": self.kind().as_str(),
                "FIELD": fields,
            }
        })
        .to_string()
    }

    /// Reconstruct a message from XML or JSON wire text (detected by
    /// the first non-whitespace character)
    pub fn from_data(data: &str) -> Result<Self> {
        let trimmed = data.trim();
        if trimmed.starts_with('<') {
            from_xml(trimmed)
        } else if trimmed.starts_with('{') {
            from_json(trimmed)
        } else {
            Err(BusError::message(
                StatusCode::ParseError,
                "message data is neither XML nor JSON",
            ))
        }
    }
}

fn value_text(field: &Field, binary: BinaryText) -> String {
    match (field.value(), binary) {
        (FieldValue::Binary(b), BinaryText::Base64) => BASE64.encode(b),
        _ => field.string_value(),
    }
}

fn parse_value(ftype: FieldType, text: &str, binary: BinaryText) -> Result<FieldValue> {
    let bad = |detail: &str| {
        BusError::message(
            StatusCode::ParseError,
            format!("value {:?} is not a valid {}: {}", text, ftype, detail),
        )
    };

    let value = match ftype {
        FieldType::Binary => match binary {
            BinaryText::Hex => FieldValue::Binary(field::from_hex(text)?),
            BinaryText::Base64 => {
                FieldValue::Binary(BASE64.decode(text).map_err(|e| bad(&e.to_string()))?)
            }
        },
        FieldType::Bool => {
            if text.eq_ignore_ascii_case("true") {
                FieldValue::Bool(true)
            } else if text.eq_ignore_ascii_case("false") {
                FieldValue::Bool(false)
            } else {
                return Err(bad("expected true or false"));
            }
        }
        FieldType::Char => {
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => FieldValue::Char(c),
                _ => return Err(bad("expected a single character")),
            }
        }
        FieldType::I8 => FieldValue::I8(text.parse().map_err(|_| bad("integer parse"))?),
        FieldType::I16 => FieldValue::I16(text.parse().map_err(|_| bad("integer parse"))?),
        FieldType::I32 => FieldValue::I32(text.parse().map_err(|_| bad("integer parse"))?),
        FieldType::I64 => FieldValue::I64(text.parse().map_err(|_| bad("integer parse"))?),
        FieldType::U8 => FieldValue::U8(text.parse().map_err(|_| bad("integer parse"))?),
        FieldType::U16 => FieldValue::U16(text.parse().map_err(|_| bad("integer parse"))?),
        FieldType::U32 => FieldValue::U32(text.parse().map_err(|_| bad("integer parse"))?),
        FieldType::U64 => FieldValue::U64(text.parse().map_err(|_| bad("integer parse"))?),
        FieldType::F32 => FieldValue::F32(text.parse().map_err(|_| bad("float parse"))?),
        FieldType::F64 => FieldValue::F64(text.parse().map_err(|_| bad("float parse"))?),
        FieldType::String => FieldValue::String(text.to_string()),
    };
    Ok(value)
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_xml(s: &str) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let entity = [
            ("&amp;", '&'),
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&quot;", '"'),
            ("&apos;", '\''),
        ]
        .iter()
        .find(|(e, _)| rest.starts_with(e));
        match entity {
            Some((e, c)) => {
                out.push(*c);
                rest = &rest[e.len()..];
            }
            None => {
                return Err(BusError::message(
                    StatusCode::ParseError,
                    "unknown XML entity",
                ));
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// Parse the attribute list of a tag head: `NAME="value" ...`
fn parse_attrs(head: &str) -> Result<Vec<(String, String)>> {
    let err = |detail: &str| BusError::message(StatusCode::ParseError, format!("bad tag: {}", detail));

    let mut attrs = Vec::new();
    let mut rest = head.trim();
    while !rest.is_empty() {
        let eq = rest.find('=').ok_or_else(|| err("attribute missing '='"))?;
        let name = rest[..eq].trim();
        if name.is_empty() {
            return Err(err("attribute name is empty"));
        }
        let after = rest[eq + 1..].trim_start();
        if !after.starts_with('"') {
            return Err(err("attribute value is not quoted"));
        }
        let close = after[1..].find('"').ok_or_else(|| err("unterminated attribute value"))?;
        attrs.push((name.to_string(), unescape_xml(&after[1..1 + close])?));
        rest = after[close + 2..].trim_start();
    }
    Ok(attrs)
}

fn attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
}

fn from_xml(text: &str) -> Result<Message> {
    let err = |detail: &str| BusError::message(StatusCode::ParseError, format!("bad message XML: {}", detail));

    let rest = text
        .strip_prefix("<MESSAGE")
        .ok_or_else(|| err("expected <MESSAGE"))?;
    let head_end = rest.find('>').ok_or_else(|| err("unterminated <MESSAGE tag"))?;
    let (head, self_closed) = match rest[..head_end].strip_suffix('/') {
        Some(h) => (h, true),
        None => (&rest[..head_end], false),
    };

    let attrs = parse_attrs(head)?;
    let subject = attr(&attrs, "SUBJECT").ok_or_else(|| err("missing SUBJECT attribute"))?;
    let kind = Kind::parse(attr(&attrs, "KIND").ok_or_else(|| err("missing KIND attribute"))?)?;
    let mut msg = Message::new(subject, kind)?;

    if self_closed {
        return Ok(msg);
    }

    let mut body = rest[head_end + 1..].trim_start();
    loop {
        if let Some(after) = body.strip_prefix("</MESSAGE>") {
            if !after.trim().is_empty() {
                return Err(err("trailing content after </MESSAGE>"));
            }
            return Ok(msg);
        }

        let rest = body.strip_prefix("<FIELD").ok_or_else(|| err("expected <FIELD"))?;
        let head_end = rest.find('>').ok_or_else(|| err("unterminated <FIELD tag"))?;
        let (head, self_closed) = match rest[..head_end].strip_suffix('/') {
            Some(h) => (h, true),
            None => (&rest[..head_end], false),
        };
        let attrs = parse_attrs(head)?;
        let name = attr(&attrs, "NAME").ok_or_else(|| err("field missing NAME attribute"))?;
        let ftype = FieldType::parse(attr(&attrs, "TYPE").ok_or_else(|| err("field missing TYPE attribute"))?)?;

        let (raw_value, after) = if self_closed {
            (String::new(), &rest[head_end + 1..])
        } else {
            let content = &rest[head_end + 1..];
            let close = content.find("</FIELD>").ok_or_else(|| err("field missing </FIELD>"))?;
            (unescape_xml(&content[..close])?, &content[close + "</FIELD>".len()..])
        };

        let mut field = Field::new(name, parse_value(ftype, &raw_value, BinaryText::Hex)?)?;
        field.set_header(attr(&attrs, "HEAD") == Some("T"));
        msg.add_field(field);

        body = after.trim_start();
    }
}

fn from_json(text: &str) -> Result<Message> {
    let err = |detail: &str| BusError::message(StatusCode::ParseError, format!("bad message JSON: {}", detail));

    let root: Value = serde_json::from_str(text)?;
    let envelope = root.get("MESSAGE").ok_or_else(|| err("missing MESSAGE key"))?;

    let subject = envelope
        .get("SUBJECT")
        .and_then(Value::as_str)
        .ok_or_else(|| err("missing SUBJECT"))?;
    let kind = Kind::parse(
        envelope
            .get("KIND")
            .and_then(Value::as_str)
            .ok_or_else(|| err("missing KIND"))?,
    )?;
    let mut msg = Message::new(subject, kind)?;

    let fields = match envelope.get("FIELD") {
        None => return Ok(msg),
        Some(Value::Array(fields)) => fields,
        Some(_) => return Err(err("FIELD is not an array")),
    };

    for entry in fields {
        let name = entry
            .get("NAME")
            .and_then(Value::as_str)
            .ok_or_else(|| err("field missing NAME"))?;
        let ftype = FieldType::parse(
            entry
                .get("TYPE")
                .and_then(Value::as_str)
                .ok_or_else(|| err("field missing TYPE"))?,
        )?;
        let raw_value = match entry.get("VALUE") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => return Err(err("field missing VALUE")),
        };

        let mut field = Field::new(name, parse_value(ftype, &raw_value, BinaryText::Base64)?)?;
        field.set_header(entry.get("HEADER").and_then(Value::as_bool).unwrap_or(false));
        msg.add_field(field);
    }

    Ok(msg)
}
