//! Message specification and schema validation
//!
//! A `Specification` holds schema templates keyed by (schema ID,
//! addendum level). Validation applies the union of every template
//! registered for the message's schema ID at levels 0 through the
//! configured level, and reports the complete list of discrepancies
//! rather than stopping at the first.

use crate::config::{options, Config};
use crate::error::{BusError, Result, StatusCode};
use crate::field::FieldType;
use crate::message::{Kind, Message};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Default specification version
pub const CURRENT_SPEC_VERSION: &str = "2019.00";

/// Highest supported schema addendum level
pub const MAX_SCHEMA_LEVEL: u8 = 6;

/// User-supplied validation hook; runs before schema validation and
/// short-circuits it on failure
pub type MessageValidator = Arc<dyn Fn(&Message) -> Result<()> + Send + Sync>;

/// Whether a templated field must be present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldMode {
    Required,
    Optional,
}

/// One field requirement within a schema template
#[derive(Debug, Clone)]
pub struct FieldTemplate {
    name: String,
    types: Vec<FieldType>,
    mode: FieldMode,
    value: Option<String>,
    header: bool,
}

impl FieldTemplate {
    fn new(name: &str, types: &[FieldType], mode: FieldMode) -> Self {
        Self {
            name: name.to_string(),
            types: types.to_vec(),
            mode,
            value: None,
            header: false,
        }
    }

    fn with_value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }

    fn header(mut self) -> Self {
        self.header = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> FieldMode {
        self.mode
    }

    pub fn is_header(&self) -> bool {
        self.header
    }

    /// Fixed value the field must carry, if the template pins one
    pub fn fixed_value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

/// A message schema at one addendum level
#[derive(Debug, Clone)]
pub struct SchemaTemplate {
    id: String,
    level: u8,
    kind: Kind,
    strict: bool,
    fields: Vec<FieldTemplate>,
}

impl SchemaTemplate {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn field_templates(&self) -> &[FieldTemplate] {
        &self.fields
    }
}

/// On-disk template format (one JSON template per file)
#[derive(Deserialize)]
struct TemplateFile {
    id: String,
    #[serde(default)]
    level: u8,
    kind: String,
    #[serde(default)]
    strict: bool,
    #[serde(default)]
    fields: Vec<TemplateFileField>,
}

#[derive(Deserialize)]
struct TemplateFileField {
    name: String,
    #[serde(default)]
    types: Vec<String>,
    mode: FieldMode,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    header: bool,
}

/// Loaded, read-mostly schema registry
pub struct Specification {
    version: String,
    schema_level: u8,
    templates: HashMap<(String, u8), SchemaTemplate>,
    validator: RwLock<Option<MessageValidator>>,
}

impl std::fmt::Debug for Specification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Specification")
            .field("version", &self.version)
            .field("schema_level", &self.schema_level)
            .field("templates", &self.templates)
            .field("validator", &self.validator.read().is_some())
            .finish()
    }
}

impl Specification {
    /// Build from configuration: resolves the version and schema
    /// level, installs the built-in templates, then overlays any
    /// templates found under the configured schema path.
    pub fn new(config: &Config) -> Result<Self> {
        let version = config.get_or(options::SPEC_VERSION, CURRENT_SPEC_VERSION).to_string();

        let level = config.get_i32(options::SCHEMA_LEVEL, 0);
        if !(0..=MAX_SCHEMA_LEVEL as i32).contains(&level) {
            return Err(BusError::config(
                StatusCode::InvalidSchemaLevel,
                format!("schema level {} is outside 0..={}", level, MAX_SCHEMA_LEVEL),
            ));
        }

        let mut spec = Self {
            version,
            schema_level: level as u8,
            templates: HashMap::new(),
            validator: RwLock::new(None),
        };

        for template in builtin_templates() {
            spec.install(template);
        }

        if let Some(path) = config.get(options::SCHEMA_PATH) {
            spec.load_directory(Path::new(path))?;
        }

        Ok(spec)
    }

    fn install(&mut self, template: SchemaTemplate) {
        self.templates.insert((template.id.clone(), template.level), template);
    }

    fn load_directory(&mut self, dir: &Path) -> Result<()> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            BusError::schema(
                StatusCode::TemplateDirNotFound,
                format!("cannot read schema path {:?}: {}", dir, e),
            )
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                BusError::schema(StatusCode::TemplateDirNotFound, e.to_string())
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = std::fs::read_to_string(&path).map_err(|e| {
                BusError::schema(
                    StatusCode::TemplateMalformed,
                    format!("cannot read template {:?}: {}", path, e),
                )
            })?;
            let template = parse_template(&text).map_err(|e| {
                BusError::schema(
                    StatusCode::TemplateMalformed,
                    format!("template {:?}: {}", path, e.reason()),
                )
            })?;
            self.install(template);
        }
        Ok(())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn schema_level(&self) -> u8 {
        self.schema_level
    }

    /// Register the custom validation hook, replacing any prior one
    pub fn register_message_validator(&self, validator: MessageValidator) {
        *self.validator.write() = Some(validator);
    }

    /// Schema IDs with at least one template loaded, sorted
    pub fn schema_id_iter(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.templates.keys().map(|(id, _)| id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Most specific template for an ID: highest populated level at
    /// or below the configured schema level
    pub fn find_template(&self, schema_id: &str) -> Option<&SchemaTemplate> {
        (0..=self.schema_level)
            .rev()
            .find_map(|level| self.templates.get(&(schema_id.to_string(), level)))
    }

    fn applicable_templates(&self, schema_id: &str) -> Vec<&SchemaTemplate> {
        (0..=self.schema_level)
            .filter_map(|level| self.templates.get(&(schema_id.to_string(), level)))
            .collect()
    }

    /// Derive a schema ID from a message: an explicit association
    /// wins; otherwise scan the subject for a message-type element
    /// (MSG/REQ/RESP) followed by a subtype.
    fn resolve_schema_id(&self, msg: &Message) -> Option<String> {
        if let Some(id) = msg.schema_id() {
            return Some(id.to_string());
        }
        let elements: Vec<&str> = msg.subject().split('.').collect();
        elements.windows(2).find_map(|w| match w[0] {
            "MSG" | "REQ" | "RESP" => Some(format!("{}.{}", w[0], w[1])),
            _ => None,
        })
    }

    /// Validate a message against its schema. Returns every
    /// discrepancy found, never just the first.
    pub fn validate_message(&self, msg: &Message) -> Result<()> {
        if let Some(validator) = self.validator.read().clone() {
            validator(msg)?;
        }

        let mut discrepancies = Vec::new();

        let schema_id = match self.resolve_schema_id(msg) {
            Some(id) => id,
            None => {
                return Err(BusError::validation(vec![format!(
                    "no schema ID associated with message, and none derivable from subject {:?}",
                    msg.subject()
                )]));
            }
        };

        let templates = self.applicable_templates(&schema_id);
        if templates.is_empty() {
            return Err(BusError::validation(vec![format!(
                "no schema template loaded for ID {:?} at levels 0..={}",
                schema_id, self.schema_level
            )]));
        }

        let mut known_fields: Vec<&str> = Vec::new();
        let mut strict = false;

        for template in &templates {
            if template.kind != msg.kind() {
                discrepancies.push(format!(
                    "message kind {} does not match schema {} kind {}",
                    msg.kind(),
                    template.id,
                    template.kind
                ));
            }
            strict = strict || template.strict;

            for ft in &template.fields {
                known_fields.push(&ft.name);
                let field = match msg.get_field(&ft.name) {
                    Some(f) => f,
                    None => {
                        if ft.mode == FieldMode::Required {
                            discrepancies.push(format!(
                                "required field {} is missing (schema {}, level {})",
                                ft.name, template.id, template.level
                            ));
                        }
                        continue;
                    }
                };

                if !ft.types.is_empty() && !ft.types.contains(&field.field_type()) {
                    discrepancies.push(format!(
                        "field {} has type {}, expected one of {:?}",
                        ft.name,
                        field.field_type(),
                        ft.types.iter().map(|t| t.as_str()).collect::<Vec<_>>()
                    ));
                }

                if let Some(want) = &ft.value {
                    let have = field.string_value();
                    if &have != want {
                        discrepancies.push(format!(
                            "field {} has value {:?}, expected {:?}",
                            ft.name, have, want
                        ));
                    }
                }
            }
        }

        if strict {
            for field in msg.fields() {
                // internal tracking fields are never schema subjects
                if field.name().starts_with("__") {
                    continue;
                }
                if !known_fields.contains(&field.name()) {
                    discrepancies.push(format!(
                        "field {} is not defined by schema {} (strict mode)",
                        field.name(),
                        schema_id
                    ));
                }
            }
        }

        if discrepancies.is_empty() {
            Ok(())
        } else {
            Err(BusError::validation(discrepancies))
        }
    }
}

fn parse_template(text: &str) -> Result<SchemaTemplate> {
    let file: TemplateFile = serde_json::from_str(text)
        .map_err(|e| BusError::schema(StatusCode::TemplateMalformed, e.to_string()))?;

    if file.id.is_empty() {
        return Err(BusError::schema(
            StatusCode::TemplateMalformed,
            "template id cannot be empty",
        ));
    }
    if file.level > MAX_SCHEMA_LEVEL {
        return Err(BusError::schema(
            StatusCode::TemplateMalformed,
            format!("template level {} is outside 0..={}", file.level, MAX_SCHEMA_LEVEL),
        ));
    }

    let kind = Kind::parse(&file.kind)
        .map_err(|e| BusError::schema(StatusCode::TemplateMalformed, e.reason().to_string()))?;

    let mut fields = Vec::with_capacity(file.fields.len());
    for f in file.fields {
        let mut types = Vec::with_capacity(f.types.len());
        for t in &f.types {
            types.push(FieldType::parse(t).map_err(|e| {
                BusError::schema(StatusCode::TemplateMalformed, e.reason().to_string())
            })?);
        }
        fields.push(FieldTemplate {
            name: f.name,
            types,
            mode: f.mode,
            value: f.value,
            header: f.header,
        });
    }

    Ok(SchemaTemplate {
        id: file.id,
        level: file.level,
        kind,
        strict: file.strict,
        fields,
    })
}

/// Level-0 templates installed by every Specification
fn builtin_templates() -> Vec<SchemaTemplate> {
    use FieldType::*;

    let identity = |mtype: &str, subtype: &str| {
        vec![
            FieldTemplate::new("MISSION-ID", &[String], FieldMode::Required).header(),
            FieldTemplate::new("CONSTELLATION-ID", &[String], FieldMode::Optional).header(),
            FieldTemplate::new("SAT-ID-PHYSICAL", &[String], FieldMode::Optional).header(),
            FieldTemplate::new("COMPONENT", &[String], FieldMode::Required).header(),
            FieldTemplate::new("MESSAGE-TYPE", &[String], FieldMode::Required)
                .with_value(mtype)
                .header(),
            FieldTemplate::new("MESSAGE-SUBTYPE", &[String], FieldMode::Required)
                .with_value(subtype)
                .header(),
        ]
    };

    let mut hb_fields = identity("MSG", "HB");
    hb_fields.push(FieldTemplate::new("COUNTER", &[U16, U32], FieldMode::Required));
    hb_fields.push(FieldTemplate::new("PUB-RATE", &[U16, U32], FieldMode::Optional));

    let mut log_fields = identity("MSG", "LOG");
    log_fields.push(FieldTemplate::new("SEVERITY", &[I16], FieldMode::Required));
    log_fields.push(FieldTemplate::new("MSG-TEXT", &[String], FieldMode::Required));
    log_fields.push(FieldTemplate::new("SUBCLASS", &[String], FieldMode::Optional));
    log_fields.push(FieldTemplate::new("EVENT-TIME", &[String], FieldMode::Optional));

    let mut req_dir_fields = identity("REQ", "DIR");
    req_dir_fields.push(FieldTemplate::new("DIRECTIVE-STRING", &[String], FieldMode::Required));
    req_dir_fields.push(FieldTemplate::new("DESTINATION-COMPONENT", &[String], FieldMode::Optional));
    req_dir_fields.push(FieldTemplate::new("REQUEST-ID", &[U16, U32], FieldMode::Optional));

    let mut resp_dir_fields = identity("RESP", "DIR");
    resp_dir_fields.push(FieldTemplate::new("RESPONSE-STATUS", &[I16], FieldMode::Required));
    resp_dir_fields.push(FieldTemplate::new("RETURN-VALUE", &[I32], FieldMode::Optional));
    resp_dir_fields.push(FieldTemplate::new("DATA", &[String], FieldMode::Optional));

    vec![
        SchemaTemplate {
            id: "MSG.HB".to_string(),
            level: 0,
            kind: Kind::Publish,
            strict: false,
            fields: hb_fields,
        },
        SchemaTemplate {
            id: "MSG.LOG".to_string(),
            level: 0,
            kind: Kind::Publish,
            strict: false,
            fields: log_fields,
        },
        SchemaTemplate {
            id: "REQ.DIR".to_string(),
            level: 0,
            kind: Kind::Request,
            strict: false,
            fields: req_dir_fields,
        },
        SchemaTemplate {
            id: "RESP.DIR".to_string(),
            level: 0,
            kind: Kind::Reply,
            strict: false,
            fields: resp_dir_fields,
        },
    ]
}
