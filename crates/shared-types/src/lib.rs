use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

mod datasets;

pub use datasets::{
    BranchSummary, BranchSummaryBuilder, DatasetBuildError, DistrictKpi, DistrictSummary,
    UpcomingArrival, UpcomingBirthday,
};

/// Reference to a mailbox message. The id is assigned by the mail provider
/// and treated as opaque by everything downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub id: String,
}

impl MessageRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Attachment extracted from an incoming message. The orchestrator owns the
/// bytes for the duration of a cycle and hands them to the object store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentBlob {
    pub file_name: String,
    pub content_type: Option<String>,
    pub size: usize,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl AttachmentBlob {
    pub fn is_pdf(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.eq_ignore_ascii_case("application/pdf"))
            || self.file_name.to_lowercase().ends_with(".pdf")
    }
}

/// A fetched mailbox message, read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub received_at: Option<DateTime<Utc>>,
    pub body_text: String,
    pub body_html: String,
    pub attachments: Vec<AttachmentBlob>,
}

/// Lightweight message view returned by the debug search endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub date: Option<DateTime<Utc>>,
    pub has_attachments: bool,
}

/// Table extracted from an HTML mail body.
///
/// Every row carries exactly the header set as keys; cells the source row did
/// not have are present as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<HashMap<String, String>>,
    pub extra_texts: Vec<String>,
}

impl ParsedTable {
    /// Collect all textual content (headers, cells, pre-header texts) for
    /// auxiliary parsing such as generation-date derivation.
    pub fn collect_texts(&self) -> Vec<String> {
        let mut texts: Vec<String> = self
            .headers
            .iter()
            .filter(|h| !h.is_empty())
            .cloned()
            .collect();
        for row in &self.rows {
            for header in &self.headers {
                if let Some(value) = row.get(header) {
                    if !value.is_empty() {
                        texts.push(value.clone());
                    }
                }
            }
        }
        texts.extend(self.extra_texts.iter().filter(|t| !t.is_empty()).cloned());
        texts
    }
}

/// File stored by the object-store adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: String,
    pub name: String,
    pub view_link: Option<String>,
    pub download_link: Option<String>,
}

/// Entry returned when listing a folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: String,
    pub name: String,
    pub size: Option<u64>,
}

/// Error recorded while filing attachments, tagged with the stage it
/// happened in ("folder" or "upload").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadError {
    pub stage: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Per-message outcome of a processing cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageOutcome {
    pub success: bool,
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub generation_date: Option<String>,
    pub attachments_count: usize,
    pub validation_errors: Vec<String>,
    pub parsed_table: Option<ParsedTable>,
    pub table_errors: Vec<String>,
    pub folder_id: Option<String>,
    pub uploaded_files: Vec<StoredFile>,
    pub upload_errors: Vec<UploadError>,
}

/// Aggregate result of one processing cycle over the mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub success: bool,
    pub processed: usize,
    pub errors: usize,
    pub details: Vec<MessageOutcome>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
}

/// Normalized spreadsheet row ready for insertion.
///
/// `id` is the primary identity; boolean fields default to false and are
/// never absent; `active` is always true on insert and `created_at` equals
/// `updated_at` at mapping time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionaryRecord {
    pub id: i32,
    pub district_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub branch: Option<i32>,
    pub district: Option<String>,
    pub country: Option<String>,
    pub list_number: Option<i32>,
    pub companionship_number: Option<i32>,
    pub treatment: Option<String>,
    pub name: String,
    pub companion: Option<String>,
    pub assigned_mission: Option<String>,
    pub stake: Option<String>,
    pub lodging: Option<String>,
    pub photo: Option<String>,
    pub arrival: Option<NaiveDate>,
    pub departure: Option<NaiveDate>,
    pub generation: Option<NaiveDate>,
    pub comments: Option<String>,
    pub endowed: bool,
    pub birth_date: Option<NaiveDate>,
    pub photo_taken: bool,
    pub passport: bool,
    pub passport_folio: Option<String>,
    pub fm: Option<String>,
    pub ipad: bool,
    pub closet: Option<String>,
    pub secondary_arrival: Option<String>,
    pub p_day: Option<String>,
    pub host: bool,
    pub three_weeks: bool,
    pub device: bool,
    pub mission_email: Option<String>,
    pub personal_email: Option<String>,
    pub in_person_date: Option<NaiveDate>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-file breakdown inside a sync report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    pub file_id: String,
    pub file_name: String,
    pub rows_total: usize,
    pub inserted: usize,
    pub skipped: usize,
}

/// Problem surfaced during a sync run, attributed to a file when possible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncIssue {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

/// Outcome of one sync run over a generation folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub generation_date: String,
    pub folder_id: String,
    pub processed_files: Vec<FileReport>,
    pub inserted_count: usize,
    pub skipped_count: usize,
    pub errors: Vec<SyncIssue>,
    pub duration_seconds: f64,
    pub continuation_token: Option<String>,
}

impl SyncReport {
    pub fn new(generation_date: impl Into<String>, folder_id: impl Into<String>) -> Self {
        Self {
            generation_date: generation_date.into(),
            folder_id: folder_id.into(),
            processed_files: Vec::new(),
            inserted_count: 0,
            skipped_count: 0,
            errors: Vec::new(),
            duration_seconds: 0.0,
            continuation_token: None,
        }
    }
}

/// Event published when a generation finishes syncing into the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetInvalidated {
    pub generation_date: String,
    pub branch_id: i32,
}

/// Cumulative cache counters, exposed read-only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub invalidations: u64,
    pub expirations: u64,
}

/// Metadata attached to every prepared dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub dataset_id: String,
    pub branch_id: i32,
    pub generation_date: String,
    pub built_at: DateTime<Utc>,
    pub row_count: usize,
    pub cache_key: String,
    pub cache_hit: bool,
    pub duration_ms: i64,
}

/// A dataset plus its metadata, as stored in the cache and served over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetResult {
    pub metadata: DatasetMetadata,
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_texts_walks_headers_rows_and_extras() {
        let mut row = HashMap::new();
        row.insert("Distrito".to_string(), "14A".to_string());
        row.insert("Zona".to_string(), String::new());
        let table = ParsedTable {
            headers: vec!["Distrito".to_string(), "Zona".to_string()],
            rows: vec![row],
            extra_texts: vec!["Generación del 10 de enero de 2025".to_string()],
        };

        let texts = table.collect_texts();
        assert_eq!(
            texts,
            vec![
                "Distrito".to_string(),
                "Zona".to_string(),
                "14A".to_string(),
                "Generación del 10 de enero de 2025".to_string(),
            ]
        );
    }

    #[test]
    fn pdf_detection_checks_content_type_and_extension() {
        let by_type = AttachmentBlob {
            file_name: "listado".to_string(),
            content_type: Some("application/pdf".to_string()),
            size: 10,
            data: vec![1, 2],
        };
        let by_name = AttachmentBlob {
            file_name: "listado.PDF".to_string(),
            content_type: Some("application/octet-stream".to_string()),
            size: 10,
            data: vec![1, 2],
        };
        let neither = AttachmentBlob {
            file_name: "listado.xlsx".to_string(),
            content_type: None,
            size: 10,
            data: vec![1, 2],
        };
        assert!(by_type.is_pdf());
        assert!(by_name.is_pdf());
        assert!(!neither.is_pdf());
    }
}
