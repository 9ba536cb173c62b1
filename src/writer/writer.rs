//! The exclusive writer: validates documents, runs per-field analysis, and
//! fills the write buffer.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::analysis::AnalyzerRegistry;
use crate::error::{Result, ScourError};
use crate::index::schema::{FieldDef, FieldType, Schema};
use crate::writer::buffer::WriteBuffer;
use crate::writer::lock::WriterLock;

/// A JSON document to be indexed.
#[derive(Clone, Debug, Default)]
pub struct Document {
    pub fields: serde_json::Map<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// The exclusive writer for a single index.
///
/// Holds the index writer lock for its lifetime; dropping the writer
/// releases the lock.
pub struct Writer {
    schema: Arc<Schema>,
    registry: Arc<AnalyzerRegistry>,
    buffer: WriteBuffer,
    lock: Arc<WriterLock>,
    active: bool,
}

impl Writer {
    pub(crate) fn new(
        schema: Arc<Schema>,
        registry: Arc<AnalyzerRegistry>,
        buffer: WriteBuffer,
        lock: Arc<WriterLock>,
    ) -> Self {
        Self {
            schema,
            registry,
            buffer,
            lock,
            active: true,
        }
    }

    /// Validate and index a single document into the write buffer.
    ///
    /// The document must carry a string `id` field unique within the
    /// buffer.
    pub fn add_document(&mut self, doc: &Document) -> Result<()> {
        if !self.active {
            return Err(ScourError::WriterNotActive);
        }
        if self.buffer.is_full() {
            return Err(ScourError::BufferFull);
        }

        let external_id = extract_external_id(doc)?;
        let doc_id = self.buffer.allocate_doc_id(&external_id)?;

        let schema = Arc::clone(&self.schema);
        for field_def in &schema.fields {
            let Some(value) = doc.fields.get(&field_def.name) else {
                continue;
            };

            match field_def.field_type {
                FieldType::Text => self.index_text_field(field_def, doc_id, value)?,
                FieldType::Keyword => self.index_keyword_field(field_def, doc_id, value)?,
                FieldType::StoredOnly => {}
            }

            if field_def.stored {
                self.buffer
                    .store_field(doc_id, &field_def.name, marshal_field_value(value)?);
            }
        }

        Ok(())
    }

    /// Index multiple documents; stops at the first failure.
    pub fn add_documents(&mut self, docs: &[Document]) -> Result<()> {
        for (i, doc) in docs.iter().enumerate() {
            self.add_document(doc)
                .map_err(|e| ScourError::InvalidDocument(format!("document {i}: {e}")))?;
        }
        Ok(())
    }

    /// Mark a document for deletion by external id, applied at commit time.
    pub fn delete_document(&mut self, external_id: &str) -> Result<()> {
        if !self.active {
            return Err(ScourError::WriterNotActive);
        }
        self.buffer.mark_deleted(external_id);
        Ok(())
    }

    pub fn doc_count(&self) -> usize {
        self.buffer.doc_count()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.is_full()
    }

    /// The buffered inverted index, for the committer.
    pub fn buffer(&self) -> &WriteBuffer {
        &self.buffer
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut WriteBuffer {
        &mut self.buffer
    }

    /// Discard all buffered changes.
    pub fn abort(&mut self) {
        self.buffer.reset();
    }

    /// Deactivate the writer and release the writer lock.
    pub fn release(&mut self) {
        self.active = false;
        self.lock.release();
    }

    fn index_text_field(&mut self, field_def: &FieldDef, doc_id: u32, value: &Value) -> Result<()> {
        let Value::String(text) = value else {
            return Err(ScourError::InvalidDocument(format!(
                "text field {:?} must be a string",
                field_def.name
            )));
        };

        let analyzer_name = field_def
            .analyzer
            .as_deref()
            .unwrap_or(&self.schema.default_analyzer);
        let analyzer = self.registry.get(analyzer_name)?;
        let tokens = analyzer.analyze(text);

        // Fold the token stream into per-term frequencies and positions.
        let mut freqs: HashMap<&str, u32> = HashMap::new();
        let mut positions: HashMap<&str, Vec<u32>> = HashMap::new();
        for token in &tokens {
            *freqs.entry(token.term.as_str()).or_insert(0) += 1;
            if field_def.positions {
                positions
                    .entry(token.term.as_str())
                    .or_default()
                    .push(token.position);
            }
        }

        // Deterministic posting order within the document.
        let mut terms: Vec<&str> = freqs.keys().copied().collect();
        terms.sort_unstable();
        for term in terms {
            let term_positions = positions.remove(term).unwrap_or_default();
            self.buffer
                .add_posting(&field_def.name, term, doc_id, freqs[term], term_positions);
        }

        Ok(())
    }

    fn index_keyword_field(
        &mut self,
        field_def: &FieldDef,
        doc_id: u32,
        value: &Value,
    ) -> Result<()> {
        match value {
            Value::String(s) => {
                self.buffer
                    .add_posting(&field_def.name, s, doc_id, 1, Vec::new());
                Ok(())
            }
            Value::Array(items) => {
                if !field_def.multi_valued {
                    return Err(ScourError::InvalidDocument(format!(
                        "field {:?} is not multi-valued but received an array",
                        field_def.name
                    )));
                }
                // Repeated values fold into one posting with the combined
                // frequency so each term's list stays strictly ascending.
                let mut freqs: std::collections::BTreeMap<&str, u32> =
                    std::collections::BTreeMap::new();
                for item in items {
                    let Value::String(s) = item else {
                        return Err(ScourError::InvalidDocument(format!(
                            "keyword array values in {:?} must be strings",
                            field_def.name
                        )));
                    };
                    *freqs.entry(s.as_str()).or_insert(0) += 1;
                }
                for (term, freq) in freqs {
                    self.buffer
                        .add_posting(&field_def.name, term, doc_id, freq, Vec::new());
                }
                Ok(())
            }
            _ => Err(ScourError::InvalidDocument(format!(
                "keyword field {:?} must be a string or string array",
                field_def.name
            ))),
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if self.active {
            self.release();
        }
    }
}

fn extract_external_id(doc: &Document) -> Result<String> {
    match doc.fields.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::String(_)) => Err(ScourError::InvalidDocument(
            "document 'id' must not be empty".to_string(),
        )),
        Some(_) => Err(ScourError::InvalidDocument(
            "document 'id' must be a string".to_string(),
        )),
        None => Err(ScourError::InvalidDocument(
            "document missing 'id' field".to_string(),
        )),
    }
}

fn marshal_field_value(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        other => Ok(serde_json::to_vec(other)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::schema::{FieldDef, Schema, ANALYZER_STANDARD};
    use serde_json::json;

    fn test_writer() -> Writer {
        let schema = Schema::new(vec![
            FieldDef::text("body", ANALYZER_STANDARD).with_positions(),
            FieldDef::keyword("tags").multi_valued(),
            FieldDef::stored_only("raw"),
        ]);
        Writer::new(
            Arc::new(schema),
            Arc::new(AnalyzerRegistry::new()),
            WriteBuffer::new(),
            Arc::new(WriterLock::new()),
        )
    }

    fn doc(id: &str, body: &str) -> Document {
        Document::new()
            .with_field("id", id)
            .with_field("body", body)
    }

    #[test]
    fn test_add_document_builds_postings() {
        let mut w = test_writer();
        w.add_document(&doc("d1", "rust is fast and rust is safe"))
            .unwrap();

        let buffer = w.buffer();
        assert_eq!(buffer.doc_count(), 1);

        let rust = &buffer.inverted()["body"]["rust"];
        assert_eq!(rust.entries.len(), 1);
        assert_eq!(rust.entries[0].freq, 2);
        assert_eq!(rust.entries[0].positions, vec![0, 4]);
    }

    #[test]
    fn test_missing_id_rejected() {
        let mut w = test_writer();
        let err = w
            .add_document(&Document::new().with_field("body", "text"))
            .unwrap_err();
        assert!(matches!(err, ScourError::InvalidDocument(_)));
    }

    #[test]
    fn test_non_string_id_rejected() {
        let mut w = test_writer();
        let err = w
            .add_document(&Document::new().with_field("id", 7))
            .unwrap_err();
        assert!(matches!(err, ScourError::InvalidDocument(_)));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut w = test_writer();
        w.add_document(&doc("d1", "one")).unwrap();
        let err = w.add_document(&doc("d1", "two")).unwrap_err();
        assert!(matches!(err, ScourError::DuplicateDocInBuffer(_)));
    }

    #[test]
    fn test_multi_valued_keyword() {
        let mut w = test_writer();
        let d = Document::new()
            .with_field("id", "d1")
            .with_field("tags", json!(["alpha", "beta"]));
        w.add_document(&d).unwrap();

        let tags = &w.buffer().inverted()["tags"];
        assert!(tags.contains_key("alpha"));
        assert!(tags.contains_key("beta"));
    }

    #[test]
    fn test_stored_only_not_indexed() {
        let mut w = test_writer();
        let d = Document::new()
            .with_field("id", "d1")
            .with_field("raw", "opaque payload");
        w.add_document(&d).unwrap();

        assert!(!w.buffer().inverted().contains_key("raw"));
        assert_eq!(
            w.buffer().stored()[&0]["raw"],
            b"opaque payload".to_vec()
        );
    }

    #[test]
    fn test_delete_records_tombstone() {
        let mut w = test_writer();
        w.delete_document("gone").unwrap();
        assert!(w.buffer().deletions().contains("gone"));
    }

    #[test]
    fn test_released_writer_rejects_writes() {
        let mut w = test_writer();
        w.release();
        assert!(matches!(
            w.add_document(&doc("d1", "x")),
            Err(ScourError::WriterNotActive)
        ));
        assert!(matches!(
            w.delete_document("d1"),
            Err(ScourError::WriterNotActive)
        ));
    }

    #[test]
    fn test_drop_releases_lock() {
        let lock = Arc::new(WriterLock::new());
        lock.acquire().unwrap();
        let schema = Schema::new(vec![FieldDef::keyword("k")]);
        let w = Writer::new(
            Arc::new(schema),
            Arc::new(AnalyzerRegistry::new()),
            WriteBuffer::new(),
            Arc::clone(&lock),
        );
        assert!(lock.is_held());
        drop(w);
        assert!(!lock.is_held());
    }
}
