//! Maps raw records onto the unified content item.

use chrono::DateTime;
use serde::Serialize;
use serde_json::Value;

use crate::types::{ContentItem, ContentItemBuilder, ContentType, RawRecord, SkyError, SkyResult};

/// Outcome of normalizing a batch of records.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizeReport {
    /// Records turned into content items.
    pub normalized: usize,
    /// Records dropped for shape errors.
    pub dropped: usize,
    /// Uri and reason for each dropped record.
    pub errors: Vec<(String, String)>,
}

/// Normalize one record. Fails with `RecordShape` when a required field is
/// absent or malformed; nothing is ever filled in with a placeholder.
pub fn normalize(record: &RawRecord) -> SkyResult<ContentItem> {
    let uri = record.uri();
    let shape = |reason: &str| SkyError::RecordShape {
        uri: uri.clone(),
        reason: reason.to_string(),
    };

    let content_type = ContentType::from_collection(&record.collection)
        .ok_or_else(|| shape("untracked collection"))?;
    if !record.value.is_object() {
        return Err(shape("record body is not an object"));
    }
    let author = record
        .owner
        .as_deref()
        .ok_or_else(|| shape("record owner is unknown"))?;

    let created_at = record
        .value
        .get("createdAt")
        .and_then(Value::as_str)
        .ok_or_else(|| shape("missing createdAt"))?;
    let created_at = DateTime::parse_from_rfc3339(created_at)
        .map_err(|e| shape(&format!("invalid createdAt: {e}")))?
        .timestamp();

    let builder = ContentItemBuilder::new(content_type, uri.clone())
        .content_hash(record.cid.clone())
        .created_at(created_at)
        .author_id(author);

    let item = match content_type {
        ContentType::Post => {
            let text = record
                .value
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| shape("missing text"))?;
            builder.text(text).build()
        }
        ContentType::Like | ContentType::Repost => {
            let subject = record
                .value
                .get("subject")
                .and_then(|s| s.get("uri"))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| shape("missing subject.uri"))?;
            builder.subject_uri(subject).build()
        }
    };
    Ok(item)
}

/// Normalize every record, dropping (and logging) malformed ones.
pub fn normalize_all(records: &[RawRecord]) -> (Vec<ContentItem>, NormalizeReport) {
    let mut items = Vec::with_capacity(records.len());
    let mut report = NormalizeReport::default();

    for record in records {
        match normalize(record) {
            Ok(item) => items.push(item),
            Err(e) => {
                log::warn!("dropping record: {e}");
                let reason = match &e {
                    SkyError::RecordShape { reason, .. } => reason.clone(),
                    other => other.to_string(),
                };
                report.errors.push((record.uri(), reason));
            }
        }
    }
    report.normalized = items.len();
    report.dropped = report.errors.len();
    (items, report)
}
