//! Note record encoding.
//!
//! Free-text fields are stored as base64 of their UTF-8 bytes so anything a
//! user pastes (control characters, stray separators, clipboard junk) survives
//! the trip through the JSON file untouched. Records written before the
//! encoding existed carry no `encoding` marker and are read as plain text.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::types::{Language, Note};

const ENCODING_BASE64: &str = "base64";

// On-disk shape of a note
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NoteRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encoding: Option<String>,
    id: String,
    title: String,
    content: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default = "default_folder_id")]
    folder_id: String,
    #[serde(default)]
    language: Language,
    #[serde(default)]
    created_at: i64,
    #[serde(default)]
    updated_at: i64,
    #[serde(default)]
    is_archived: bool,
    #[serde(default)]
    is_pinned: bool,
}

fn default_folder_id() -> String {
    crate::types::CATCH_ALL_FOLDER_ID.to_string()
}

/// A record that could not be turned back into a note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptRecord {
    pub reason: String,
}

impl std::fmt::Display for CorruptRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

fn encode_text(text: &str) -> String {
    BASE64.encode(text.as_bytes())
}

fn decode_text(field: &str, encoded: &str) -> Result<String, CorruptRecord> {
    let bytes = BASE64.decode(encoded).map_err(|e| CorruptRecord {
        reason: format!("field '{}' is not valid base64: {}", field, e),
    })?;
    String::from_utf8(bytes).map_err(|e| CorruptRecord {
        reason: format!("field '{}' is not valid UTF-8: {}", field, e),
    })
}

fn to_record(note: &Note) -> NoteRecord {
    NoteRecord {
        encoding: Some(ENCODING_BASE64.to_string()),
        id: note.id.clone(),
        title: encode_text(&note.title),
        content: encode_text(&note.content),
        tags: note.tags.clone(),
        folder_id: note.folder_id.clone(),
        language: note.language,
        created_at: note.created_at,
        updated_at: note.updated_at,
        is_archived: note.is_archived,
        is_pinned: note.is_pinned,
    }
}

fn from_record(record: NoteRecord) -> Result<Note, CorruptRecord> {
    let (title, content) = match record.encoding.as_deref() {
        None => (record.title, record.content),
        Some(ENCODING_BASE64) => (
            decode_text("title", &record.title)?,
            decode_text("content", &record.content)?,
        ),
        Some(other) => {
            return Err(CorruptRecord {
                reason: format!("unknown encoding '{}'", other),
            })
        }
    };

    if record.id.is_empty() {
        return Err(CorruptRecord {
            reason: "record has an empty id".to_string(),
        });
    }

    let mut note = Note {
        id: record.id,
        title,
        content,
        tags: record.tags,
        folder_id: record.folder_id,
        language: record.language,
        created_at: record.created_at,
        updated_at: record.updated_at,
        is_archived: record.is_archived,
        is_pinned: record.is_pinned,
    };
    note.dedup_tags();
    Ok(note)
}

/// Encode a note as the pretty-printed JSON written to its file.
pub fn encode(note: &Note) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&to_record(note))
}

pub fn decode(raw: &str) -> Result<Note, CorruptRecord> {
    let record: NoteRecord = serde_json::from_str(raw).map_err(|e| CorruptRecord {
        reason: format!("not a note record: {}", e),
    })?;
    from_record(record)
}

/// Decode one entry of a JSON value (used for the legacy aggregate file,
/// which is an array of plain records).
pub fn decode_value(value: serde_json::Value) -> Result<Note, CorruptRecord> {
    let record: NoteRecord = serde_json::from_value(value).map_err(|e| CorruptRecord {
        reason: format!("not a note record: {}", e),
    })?;
    from_record(record)
}
