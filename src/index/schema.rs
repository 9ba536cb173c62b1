//! Immutable index schema: field definitions and validation.
//!
//! The schema is written once at index creation and never changes for the
//! life of the index. Like the manifest, it is self-checksummed: the
//! `checksum` field is computed over the JSON rendering of the document
//! with that field cleared.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScourError};
use crate::index::directory::IndexDir;
use crate::storage::{self, Checksum};

/// Maximum number of fields in a schema.
pub const MAX_FIELDS_PER_SCHEMA: usize = 256;

/// Maximum field name length in bytes.
pub const MAX_FIELD_NAME_LEN: usize = 255;

/// Field names reserved for internal use.
pub const RESERVED_FIELD_NAMES: [&str; 3] = ["_id", "_score", "_source"];

/// Built-in analyzer names.
pub const ANALYZER_STANDARD: &str = "standard";
pub const ANALYZER_WHITESPACE: &str = "whitespace";
pub const ANALYZER_KEYWORD: &str = "keyword";

/// Field type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Analyzed free text; requires an analyzer.
    Text,
    /// Indexed verbatim as a single term.
    Keyword,
    /// Stored but never indexed.
    StoredOnly,
}

/// A single field definition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    pub stored: bool,
    pub indexed: bool,
    #[serde(default)]
    pub positions: bool,
    #[serde(default)]
    pub multi_valued: bool,
}

impl FieldDef {
    /// A text field with the given analyzer, stored and indexed.
    pub fn text(name: impl Into<String>, analyzer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Text,
            analyzer: Some(analyzer.into()),
            stored: true,
            indexed: true,
            positions: false,
            multi_valued: false,
        }
    }

    /// A keyword field, stored and indexed.
    pub fn keyword(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Keyword,
            analyzer: None,
            stored: true,
            indexed: true,
            positions: false,
            multi_valued: false,
        }
    }

    /// A stored-only field.
    pub fn stored_only(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::StoredOnly,
            analyzer: None,
            stored: true,
            indexed: false,
            positions: false,
            multi_valued: false,
        }
    }

    pub fn with_positions(mut self) -> Self {
        self.positions = true;
        self
    }

    pub fn multi_valued(mut self) -> Self {
        self.multi_valued = true;
        self
    }
}

/// Immutable schema definition for an index
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub fields: Vec<FieldDef>,
    pub default_analyzer: String,
    #[serde(default)]
    pub checksum: Checksum,
}

impl Schema {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self {
            version: 1,
            created_at: Utc::now(),
            fields,
            default_analyzer: ANALYZER_STANDARD.to_string(),
            checksum: Checksum::empty(),
        }
    }

    /// Look up a field definition by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate the schema against all structural rules.
    pub fn validate(&self) -> Result<()> {
        if self.version == 0 {
            return Err(ScourError::SchemaValidation(
                "version must be a positive integer".to_string(),
            ));
        }
        if self.fields.len() > MAX_FIELDS_PER_SCHEMA {
            return Err(ScourError::SchemaValidation(format!(
                "{} fields exceeds maximum of {MAX_FIELDS_PER_SCHEMA}",
                self.fields.len()
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for f in &self.fields {
            if RESERVED_FIELD_NAMES.contains(&f.name.as_str()) {
                return Err(ScourError::SchemaValidation(format!(
                    "field name {:?} is reserved",
                    f.name
                )));
            }
            if !seen.insert(f.name.as_str()) {
                return Err(ScourError::SchemaValidation(format!(
                    "duplicate field name {:?}",
                    f.name
                )));
            }
            if f.name.len() > MAX_FIELD_NAME_LEN {
                return Err(ScourError::SchemaValidation(format!(
                    "field name {:?} exceeds {MAX_FIELD_NAME_LEN} bytes",
                    f.name
                )));
            }
            if let Some(analyzer) = &f.analyzer {
                validate_analyzer(&f.name, analyzer)?;
            }
            if f.field_type == FieldType::Text && f.analyzer.is_none() {
                return Err(ScourError::SchemaValidation(format!(
                    "text field {:?} requires an analyzer",
                    f.name
                )));
            }
            if f.positions && f.field_type != FieldType::Text {
                return Err(ScourError::SchemaValidation(format!(
                    "field {:?}: positions only allowed on text fields",
                    f.name
                )));
            }
            if f.field_type == FieldType::StoredOnly {
                if f.indexed {
                    return Err(ScourError::SchemaValidation(format!(
                        "field {:?}: stored_only fields cannot be indexed",
                        f.name
                    )));
                }
                if !f.stored {
                    return Err(ScourError::SchemaValidation(format!(
                        "field {:?}: stored_only fields must be stored",
                        f.name
                    )));
                }
            }
        }

        if !self.default_analyzer.is_empty() {
            validate_analyzer("default_analyzer", &self.default_analyzer)?;
        }

        Ok(())
    }

    /// Serialize to JSON with the self-checksum filled in.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let mut doc = self.clone();
        doc.checksum = doc.compute_checksum()?;
        Ok(serde_json::to_vec_pretty(&doc)?)
    }

    /// Deserialize from JSON and verify the self-checksum.
    pub fn from_json(data: &[u8]) -> Result<Schema> {
        let schema: Schema = serde_json::from_slice(data)
            .map_err(|e| ScourError::SchemaCorrupt(format!("unparseable: {e}")))?;
        let computed = schema.compute_checksum()?;
        if computed != schema.checksum {
            return Err(ScourError::SchemaCorrupt(format!(
                "checksum mismatch: stored {}, computed {}",
                schema.checksum, computed
            )));
        }
        Ok(schema)
    }

    fn compute_checksum(&self) -> Result<Checksum> {
        let mut cleared = self.clone();
        cleared.checksum = Checksum::empty();
        let data = serde_json::to_vec_pretty(&cleared)?;
        Ok(storage::compute_checksum(&data))
    }
}

fn validate_analyzer(context: &str, analyzer: &str) -> Result<()> {
    match analyzer {
        ANALYZER_STANDARD | ANALYZER_WHITESPACE | ANALYZER_KEYWORD => Ok(()),
        other => Err(ScourError::SchemaValidation(format!(
            "{context}: unknown analyzer {other:?}"
        ))),
    }
}

/// Atomically write the schema file. The schema is immutable after creation.
pub fn write_schema(dir: &IndexDir, schema: &Schema) -> Result<()> {
    schema.validate()?;
    let data = schema.to_json()?;
    storage::atomic_write(&dir.schema_path(), &data, &dir.tmp_dir())
}

/// Read and verify the schema file.
pub fn load_schema(dir: &IndexDir) -> Result<Schema> {
    let path = dir.schema_path();
    let data = std::fs::read(&path).map_err(|e| ScourError::io(&path, e))?;
    Schema::from_json(&data)
}
