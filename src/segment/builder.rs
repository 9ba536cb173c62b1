//! Converts a write buffer into the file bundle handed to the commit
//! protocol.

use std::collections::BTreeMap;

use fst::MapBuilder;

use crate::commit::SegmentData;
use crate::error::{Result, ScourError};
use crate::writer::WriteBuffer;

use super::format::{
    term_key, DocTable, FieldStats, SegmentInfo, StoredPostings, DOCS_FILE, META_FILE,
    POSTINGS_FILE, TERMS_FILE, TOMBSTONES_FILE,
};

/// Build the segment file bundle from a non-empty write buffer.
pub fn build_segment(buffer: &WriteBuffer) -> Result<SegmentData> {
    if buffer.doc_count() == 0 {
        return Err(ScourError::IndexEmpty);
    }

    // The FST requires keys in ascending byte order; nested iteration over
    // the ordered field and term maps produces exactly that (the key
    // separator sorts below every other byte).
    let mut fst_builder = MapBuilder::memory();
    let mut postings: Vec<StoredPostings> = Vec::with_capacity(buffer.term_count());
    let mut field_stats: BTreeMap<String, FieldStats> = BTreeMap::new();

    for (field, terms) in buffer.inverted() {
        let stats = field_stats.entry(field.clone()).or_default();
        for (term, list) in terms {
            let ordinal = postings.len() as u64;
            fst_builder
                .insert(term_key(field, term), ordinal)
                .map_err(|e| ScourError::SegmentCorrupt(format!("term dictionary: {e}")))?;

            let has_positions = list.entries.iter().any(|e| !e.positions.is_empty());
            let mut stored = StoredPostings::default();
            for entry in &list.entries {
                stored.doc_ids.push(entry.doc_id);
                stored.freqs.push(entry.freq);
                stats.total_term_freq += u64::from(entry.freq);
            }
            if has_positions {
                stored.positions = Some(
                    list.entries
                        .iter()
                        .map(|e| e.positions.clone())
                        .collect(),
                );
            }
            stats.term_count += 1;
            postings.push(stored);
        }
    }

    let terms_bytes = fst_builder
        .into_inner()
        .map_err(|e| ScourError::SegmentCorrupt(format!("term dictionary: {e}")))?;

    let doc_count = buffer.doc_count() as u32;
    let info = SegmentInfo {
        doc_count,
        field_stats,
        checksum: crate::storage::Checksum::empty(),
    };

    let doc_table = DocTable {
        external_ids: buffer.external_ids().to_vec(),
        doc_lengths: buffer.doc_lengths().to_vec(),
        stored: (0..doc_count)
            .map(|doc_id| buffer.stored().get(&doc_id).cloned().unwrap_or_default())
            .collect(),
    };

    let tombstones: Vec<&String> = buffer.deletions().iter().collect();

    let mut files = BTreeMap::new();
    files.insert(META_FILE.to_string(), info.to_json()?);
    files.insert(TERMS_FILE.to_string(), terms_bytes);
    files.insert(POSTINGS_FILE.to_string(), serde_json::to_vec(&postings)?);
    files.insert(DOCS_FILE.to_string(), serde_json::to_vec(&doc_table)?);
    files.insert(
        TOMBSTONES_FILE.to_string(),
        serde_json::to_vec(&tombstones)?,
    );

    Ok(SegmentData {
        files,
        doc_count,
        doc_count_alive: doc_count,
        del_count: buffer.deletions().len() as u32,
        min_doc_id: 0,
        max_doc_id: u64::from(doc_count - 1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_buffer() -> WriteBuffer {
        let mut buf = WriteBuffer::new();
        let d0 = buf.allocate_doc_id("doc-a").unwrap();
        let d1 = buf.allocate_doc_id("doc-b").unwrap();
        buf.add_posting("body", "rust", d0, 2, vec![0, 3]);
        buf.add_posting("body", "rust", d1, 1, vec![1]);
        buf.add_posting("body", "search", d1, 1, vec![0]);
        buf.add_posting("tags", "lang", d0, 1, Vec::new());
        buf.store_field(d0, "body", b"rust is rust".to_vec());
        buf.mark_deleted("stale-doc");
        buf
    }

    #[test]
    fn test_build_produces_all_files() {
        let data = build_segment(&filled_buffer()).unwrap();
        for name in [META_FILE, TERMS_FILE, POSTINGS_FILE, DOCS_FILE, TOMBSTONES_FILE] {
            assert!(data.files.contains_key(name), "missing {name}");
        }
        assert_eq!(data.doc_count, 2);
        assert_eq!(data.doc_count_alive, 2);
        assert_eq!(data.del_count, 1);
        assert_eq!(data.min_doc_id, 0);
        assert_eq!(data.max_doc_id, 1);
    }

    #[test]
    fn test_meta_verifies() {
        let data = build_segment(&filled_buffer()).unwrap();
        let info = SegmentInfo::from_json(&data.files[META_FILE]).unwrap();
        assert_eq!(info.doc_count, 2);
        assert_eq!(info.field_stats["body"].term_count, 2);
        assert_eq!(info.field_stats["body"].total_term_freq, 4);
        assert_eq!(info.field_stats["tags"].term_count, 1);
    }

    #[test]
    fn test_fst_is_loadable_and_ordered() {
        let data = build_segment(&filled_buffer()).unwrap();
        let map = fst::Map::new(data.files[TERMS_FILE].clone()).unwrap();
        assert_eq!(map.len(), 3);
        assert!(map.get(term_key("body", "rust")).is_some());
        assert!(map.get(term_key("body", "search")).is_some());
        assert!(map.get(term_key("tags", "lang")).is_some());
        assert!(map.get(term_key("body", "absent")).is_none());
    }

    #[test]
    fn test_empty_buffer_rejected() {
        let buf = WriteBuffer::new();
        assert!(matches!(
            build_segment(&buf).unwrap_err(),
            ScourError::IndexEmpty
        ));
    }

    #[test]
    fn test_postings_parallel_arrays() {
        let data = build_segment(&filled_buffer()).unwrap();
        let postings: Vec<StoredPostings> =
            serde_json::from_slice(&data.files[POSTINGS_FILE]).unwrap();
        let map = fst::Map::new(data.files[TERMS_FILE].clone()).unwrap();

        let ord = map.get(term_key("body", "rust")).unwrap() as usize;
        let list = &postings[ord];
        assert_eq!(list.doc_ids, vec![0, 1]);
        assert_eq!(list.freqs, vec![2, 1]);
        assert_eq!(
            list.positions.as_ref().unwrap(),
            &vec![vec![0, 3], vec![1]]
        );
    }
}
