//! Segment assembly: windows plus metadata, ready for the vector store.

use crate::ingest::chunker::segment_paragraph;
use crate::ingest::paragraphs::{TitleHeuristics, prepare_paragraphs};
use crate::ingest::sql::BookPageRecord;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

/// Page bodies at or above this many bytes store a hash instead of the full text.
const PAGE_FULL_TEXT_LIMIT: usize = 50_000;

/// Sizing and enrichment knobs for segment construction.
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    /// Maximum characters per segment window.
    pub max_length: usize,
    /// Overlap characters between windows.
    pub context_length: usize,
    /// Minimum merged paragraph line count.
    pub min_paragraph_lines: usize,
    /// Importance assigned to heading segments.
    pub title_weight: f64,
    /// Emit an extra whole-page document per page.
    pub include_page_level: bool,
    /// Store the full paragraph text on each segment for cheap context expansion.
    pub store_paragraph_text: bool,
    /// Heading detection configuration.
    pub title_heuristics: TitleHeuristics,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_length: 200,
            context_length: 100,
            min_paragraph_lines: 3,
            title_weight: 1.5,
            include_page_level: false,
            store_paragraph_text: true,
            title_heuristics: TitleHeuristics::default(),
        }
    }
}

/// A stored document: id, text, and scalar metadata.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Identifier `{book}-{page}-{paragraph}-{segment}-{8 hex}`.
    pub document_id: String,
    /// Document text sent to the store.
    pub text: String,
    /// Scalar metadata map.
    pub metadata: Map<String, Value>,
}

/// Build all segments for one page: paragraph windows plus the optional page-level doc.
pub fn build_segments(record: &BookPageRecord, text: &str, config: &SegmentConfig) -> Vec<Segment> {
    let paragraphs = prepare_paragraphs(text, config.min_paragraph_lines, &config.title_heuristics);
    let mut segments = Vec::new();

    for (paragraph_index, paragraph) in paragraphs.iter().enumerate() {
        let windows = segment_paragraph(&paragraph.text, config.max_length, config.context_length);
        let chunked = windows.len() > 1;
        for (segment_index, window) in windows.into_iter().enumerate() {
            let mut metadata = base_metadata(record);
            metadata.insert("paragraph_index".into(), json!(paragraph_index));
            metadata.insert("segment_index".into(), json!(segment_index));
            metadata.insert("segment_start".into(), json!(window.start));
            metadata.insert("segment_end".into(), json!(window.end));
            metadata.insert("segment_length".into(), json!(window.text.chars().count()));
            metadata.insert("paragraph_line_count".into(), json!(paragraph.line_count));
            metadata.insert("paragraph_is_title".into(), json!(paragraph.is_title));
            metadata.insert(
                "paragraph_sources".into(),
                json!(join_indices(&paragraph.source_indices)),
            );
            metadata.insert(
                "importance".into(),
                json!(if paragraph.is_title {
                    config.title_weight
                } else {
                    1.0
                }),
            );
            if config.store_paragraph_text && chunked {
                metadata.insert("paragraph_full_text".into(), json!(paragraph.text));
            }
            segments.push(Segment {
                document_id: document_id(record, paragraph_index as i64, segment_index as i64),
                text: window.text,
                metadata: ensure_scalar_metadata(metadata),
            });
        }
    }

    if segments.is_empty() && !text.trim().is_empty() {
        // Whole-page fallback for pages whose blocks all collapse to nothing.
        let char_count = text.chars().count();
        let mut metadata = base_metadata(record);
        metadata.insert("paragraph_index".into(), json!(0));
        metadata.insert("segment_index".into(), json!(0));
        metadata.insert("segment_start".into(), json!(0));
        metadata.insert("segment_end".into(), json!(char_count));
        metadata.insert("segment_length".into(), json!(char_count));
        metadata.insert("paragraph_line_count".into(), json!(1));
        metadata.insert("paragraph_is_title".into(), json!(false));
        metadata.insert("paragraph_sources".into(), json!("0"));
        metadata.insert("importance".into(), json!(1.0));
        segments.push(Segment {
            document_id: document_id(record, 0, 0),
            text: text.to_string(),
            metadata: ensure_scalar_metadata(metadata),
        });
    }

    if config.include_page_level && !text.trim().is_empty() {
        segments.push(page_level_segment(record, text));
    }

    segments
}

/// The auxiliary whole-page document (`paragraph_index = segment_index = -1`).
fn page_level_segment(record: &BookPageRecord, text: &str) -> Segment {
    let mut metadata = base_metadata(record);
    metadata.insert("paragraph_index".into(), json!(-1));
    metadata.insert("segment_index".into(), json!(-1));
    metadata.insert("page_level".into(), json!(true));
    if text.len() < PAGE_FULL_TEXT_LIMIT {
        metadata.insert("page_full_text".into(), json!(text));
    } else {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        metadata.insert("page_full_text_hash".into(), json!(hex::encode(hasher.finalize())));
    }
    Segment {
        document_id: document_id(record, -1, -1),
        text: text.to_string(),
        metadata: ensure_scalar_metadata(metadata),
    }
}

fn base_metadata(record: &BookPageRecord) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("book_id".into(), json!(record.book_id));
    metadata.insert("book_title".into(), json!(record.book_title));
    metadata.insert("section_id".into(), json!(record.section_id));
    metadata.insert("section_title".into(), json!(record.section_title));
    metadata.insert("page_id".into(), json!(record.page_id));
    metadata.insert("source_link".into(), json!(record.source_link));
    metadata.insert("record_id".into(), json!(record.record_id));
    metadata.insert("has_error".into(), json!(!record.error.is_empty()));
    metadata.insert("error".into(), json!(record.error));
    metadata
}

fn document_id(record: &BookPageRecord, paragraph_index: i64, segment_index: i64) -> String {
    let suffix: String = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    format!(
        "{}-{}-{}-{}-{}",
        record.book_id, record.page_id, paragraph_index, segment_index, suffix
    )
}

fn join_indices(indices: &[usize]) -> String {
    indices
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Force every metadata value to a store-compatible scalar; arrays and objects are
/// serialized to JSON strings.
pub fn ensure_scalar_metadata(metadata: Map<String, Value>) -> Map<String, Value> {
    metadata
        .into_iter()
        .map(|(key, value)| match value {
            Value::Array(_) | Value::Object(_) => {
                let encoded = value.to_string();
                (key, Value::String(encoded))
            }
            scalar => (key, scalar),
        })
        .collect()
}
