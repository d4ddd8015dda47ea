//! Typed message fields
//!
//! A field is a named, typed value. The name is immutable after
//! construction; type and value travel together in `FieldValue`.
//! Header fields are protocol/tracking metadata as opposed to
//! payload.

use crate::error::{BusError, Result, StatusCode};
use std::fmt;

/// The wire type of a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Binary,
    Bool,
    Char,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    String,
}

impl FieldType {
    /// Wire-text name, as it appears in XML/JSON TYPE attributes
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Binary => "BIN",
            FieldType::Bool => "BOOL",
            FieldType::Char => "CHAR",
            FieldType::I8 => "I8",
            FieldType::I16 => "I16",
            FieldType::I32 => "I32",
            FieldType::I64 => "I64",
            FieldType::U8 => "U8",
            FieldType::U16 => "U16",
            FieldType::U32 => "U32",
            FieldType::U64 => "U64",
            FieldType::F32 => "F32",
            FieldType::F64 => "F64",
            FieldType::String => "STRING",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let t = match s.to_ascii_uppercase().as_str() {
            "BIN" | "BINARY" | "BLOB" => FieldType::Binary,
            "BOOL" | "BOOLEAN" => FieldType::Bool,
            "CHAR" => FieldType::Char,
            "I8" => FieldType::I8,
            "I16" | "SHORT" => FieldType::I16,
            "I32" | "LONG" => FieldType::I32,
            "I64" => FieldType::I64,
            "U8" => FieldType::U8,
            "U16" | "USHORT" => FieldType::U16,
            "U32" | "ULONG" => FieldType::U32,
            "U64" => FieldType::U64,
            "F32" | "FLOAT" => FieldType::F32,
            "F64" | "DOUBLE" => FieldType::F64,
            "STRING" => FieldType::String,
            other => {
                return Err(BusError::message(
                    StatusCode::ParseError,
                    format!("unknown field type {:?}", other),
                ));
            }
        };
        Ok(t)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed field value; the type tag and payload are inseparable
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Binary(Vec<u8>),
    Bool(bool),
    Char(char),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Binary(_) => FieldType::Binary,
            FieldValue::Bool(_) => FieldType::Bool,
            FieldValue::Char(_) => FieldType::Char,
            FieldValue::I8(_) => FieldType::I8,
            FieldValue::I16(_) => FieldType::I16,
            FieldValue::I32(_) => FieldType::I32,
            FieldValue::I64(_) => FieldType::I64,
            FieldValue::U8(_) => FieldType::U8,
            FieldValue::U16(_) => FieldType::U16,
            FieldValue::U32(_) => FieldType::U32,
            FieldValue::U64(_) => FieldType::U64,
            FieldValue::F32(_) => FieldType::F32,
            FieldValue::F64(_) => FieldType::F64,
            FieldValue::String(_) => FieldType::String,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<char> for FieldValue {
    fn from(v: char) -> Self {
        FieldValue::Char(v)
    }
}

impl From<i8> for FieldValue {
    fn from(v: i8) -> Self {
        FieldValue::I8(v)
    }
}

impl From<i16> for FieldValue {
    fn from(v: i16) -> Self {
        FieldValue::I16(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::I32(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::I64(v)
    }
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        FieldValue::U8(v)
    }
}

impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        FieldValue::U16(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::U32(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::U64(v)
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::F32(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::F64(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Binary(v)
    }
}

fn is_valid_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'
}

/// A named, typed value within a message
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    value: FieldValue,
    header: bool,
}

impl Field {
    /// Create a field. Fails if the name is empty or contains
    /// characters outside `[A-Za-z0-9_.-]`.
    pub fn new(name: impl Into<String>, value: impl Into<FieldValue>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(BusError::message(
                StatusCode::InvalidFieldName,
                "field name cannot be empty",
            ));
        }
        if !name.chars().all(is_valid_name_char) {
            return Err(BusError::message(
                StatusCode::InvalidFieldName,
                format!("field name {:?} contains an illegal character", name),
            ));
        }
        Ok(Self {
            name,
            value: value.into(),
            header: false,
        })
    }

    /// Create a header (protocol/tracking) field
    pub fn header(name: impl Into<String>, value: impl Into<FieldValue>) -> Result<Self> {
        let mut field = Self::new(name, value)?;
        field.header = true;
        Ok(field)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.value.field_type()
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    pub fn is_header(&self) -> bool {
        self.header
    }

    pub fn set_header(&mut self, header: bool) {
        self.header = header;
    }

    /// Best-effort string rendering; always succeeds. Binary values
    /// render as uppercase hex.
    pub fn string_value(&self) -> String {
        match &self.value {
            FieldValue::Binary(b) => to_hex(b),
            FieldValue::Bool(v) => v.to_string(),
            FieldValue::Char(v) => v.to_string(),
            FieldValue::I8(v) => v.to_string(),
            FieldValue::I16(v) => v.to_string(),
            FieldValue::I32(v) => v.to_string(),
            FieldValue::I64(v) => v.to_string(),
            FieldValue::U8(v) => v.to_string(),
            FieldValue::U16(v) => v.to_string(),
            FieldValue::U32(v) => v.to_string(),
            FieldValue::U64(v) => v.to_string(),
            FieldValue::F32(v) => format_float(*v as f64),
            FieldValue::F64(v) => format_float(*v),
            FieldValue::String(v) => v.clone(),
        }
    }

    /// Integer coercion. Fails with `ConversionError` when the value
    /// is lossy (fractional float, out-of-range u64) or unparseable.
    pub fn i64_value(&self) -> Result<i64> {
        match &self.value {
            FieldValue::Bool(v) => Ok(*v as i64),
            FieldValue::Char(v) => Ok(*v as i64),
            FieldValue::I8(v) => Ok(*v as i64),
            FieldValue::I16(v) => Ok(*v as i64),
            FieldValue::I32(v) => Ok(*v as i64),
            FieldValue::I64(v) => Ok(*v),
            FieldValue::U8(v) => Ok(*v as i64),
            FieldValue::U16(v) => Ok(*v as i64),
            FieldValue::U32(v) => Ok(*v as i64),
            FieldValue::U64(v) => i64::try_from(*v).map_err(|_| {
                self.conversion_error("U64 value exceeds the I64 range")
            }),
            FieldValue::F32(v) => float_to_i64(*v as f64).ok_or_else(|| {
                self.conversion_error("F32 value is not a whole number in the I64 range")
            }),
            FieldValue::F64(v) => float_to_i64(*v).ok_or_else(|| {
                self.conversion_error("F64 value is not a whole number in the I64 range")
            }),
            FieldValue::String(v) => v.trim().parse().map_err(|_| {
                self.conversion_error("string value does not parse as an integer")
            }),
            FieldValue::Binary(_) => Err(self.conversion_error("binary value has no integer form")),
        }
    }

    /// Floating-point coercion
    pub fn f64_value(&self) -> Result<f64> {
        match &self.value {
            FieldValue::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            FieldValue::I8(v) => Ok(*v as f64),
            FieldValue::I16(v) => Ok(*v as f64),
            FieldValue::I32(v) => Ok(*v as f64),
            FieldValue::I64(v) => Ok(*v as f64),
            FieldValue::U8(v) => Ok(*v as f64),
            FieldValue::U16(v) => Ok(*v as f64),
            FieldValue::U32(v) => Ok(*v as f64),
            FieldValue::U64(v) => Ok(*v as f64),
            FieldValue::F32(v) => Ok(*v as f64),
            FieldValue::F64(v) => Ok(*v),
            FieldValue::String(v) => v.trim().parse().map_err(|_| {
                self.conversion_error("string value does not parse as a number")
            }),
            FieldValue::Char(_) => Err(self.conversion_error("char value has no floating form")),
            FieldValue::Binary(_) => Err(self.conversion_error("binary value has no floating form")),
        }
    }

    /// Boolean coercion: bool itself, zero/nonzero integers, or the
    /// strings "true"/"false"
    pub fn bool_value(&self) -> Result<bool> {
        match &self.value {
            FieldValue::Bool(v) => Ok(*v),
            FieldValue::String(v) if v.eq_ignore_ascii_case("true") => Ok(true),
            FieldValue::String(v) if v.eq_ignore_ascii_case("false") => Ok(false),
            FieldValue::String(_) => Err(self.conversion_error("string value is not true/false")),
            FieldValue::Binary(_) | FieldValue::Char(_) => {
                Err(self.conversion_error("value has no boolean form"))
            }
            _ => Ok(self.i64_value()? != 0),
        }
    }

    fn conversion_error(&self, detail: &str) -> BusError {
        BusError::message(
            StatusCode::ConversionError,
            format!("field {:?}: {}", self.name, detail),
        )
    }
}

/// Render a float so integral values keep a trailing ".0" and
/// round-trip through parse::<f64>() losslessly
fn format_float(v: f64) -> String {
    if v.fract() == 0.0 && v.is_finite() && v.abs() < 1e15 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

fn float_to_i64(v: f64) -> Option<i64> {
    if v.is_finite() && v.fract() == 0.0 && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02X}", b));
    }
    out
}

pub(crate) fn from_hex(text: &str) -> Result<Vec<u8>> {
    if text.len() % 2 != 0 {
        return Err(BusError::message(
            StatusCode::ParseError,
            "hex data has odd length",
        ));
    }
    let mut out = Vec::with_capacity(text.len() / 2);
    let bytes = text.as_bytes();
    for pair in bytes.chunks(2) {
        let s = std::str::from_utf8(pair).map_err(|_| {
            BusError::message(StatusCode::ParseError, "hex data is not ASCII")
        })?;
        let b = u8::from_str_radix(s, 16).map_err(|_| {
            BusError::message(StatusCode::ParseError, format!("invalid hex pair {:?}", s))
        })?;
        out.push(b);
    }
    Ok(out)
}
