//! Object-store adapter: per-generation folders and attachment filing.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use shared_types::{AttachmentBlob, FileEntry, ParsedTable, StoredFile, UploadError};
use thiserror::Error;

use crate::error::codes;
use crate::normalize;
use crate::retry::{retry, RetryPolicy};

pub mod gdrive;

/// Spreadsheet MIME types a generation folder is expected to contain.
pub const EXCEL_MIME_TYPES: &[&str] = &[
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-excel",
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("folder unavailable: {0}")]
    FolderMissing(String),
    #[error("upload failed: {0}")]
    UploadFailed(String),
    #[error("listing failed: {0}")]
    ListingFailed(String),
    #[error("download failed for {file_id}: {message}")]
    DownloadFailed { file_id: String, message: String },
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::FolderMissing(_) => codes::DRIVE_FOLDER_MISSING,
            StoreError::UploadFailed(_) => codes::DRIVE_UPLOAD_FAILED,
            StoreError::ListingFailed(_) => codes::DRIVE_LISTING_FAILED,
            StoreError::DownloadFailed { .. } => codes::DRIVE_DOWNLOAD_FAILED,
        }
    }
}

/// Capability set the core needs from the object-store provider.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Find or create a folder named `name` under `parent_id`. Concurrent
    /// calls with the same pair converge to the same id.
    async fn ensure_folder(&self, parent_id: &str, name: &str) -> Result<String, StoreError>;

    async fn upload(
        &self,
        folder_id: &str,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredFile, StoreError>;

    /// List folder contents, optionally filtered by MIME type. Provider
    /// ordering; callers sort client-side when they need determinism.
    async fn list_folder_files(
        &self,
        folder_id: &str,
        mime_types: Option<&[&str]>,
    ) -> Result<Vec<FileEntry>, StoreError>;

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, StoreError>;
}

/// Compose the stored name `<generation_date>_<district>_<original>` (the
/// district component is omitted when unknown).
pub fn format_attachment_name(
    generation_date: &str,
    district: Option<&str>,
    original_name: &str,
) -> String {
    let sanitized = strip_gender_prefix(&normalize::sanitize_filename(original_name));
    let (base, ext) = normalize::split_extension(&sanitized);

    let mut components: Vec<String> = vec![generation_date.to_string()];
    if let Some(district) = district {
        let cleaned = strip_gender_prefix(&normalize::sanitize_filename(district));
        let trimmed = cleaned.trim_matches('_');
        if !trimmed.is_empty() {
            components.push(trimmed.to_string());
        }
    }
    let base = base.trim_matches('_');
    if !base.is_empty() {
        components.push(base.to_string());
    }

    let combined = format!("{}{}", components.join("_"), ext);
    normalize::sanitize_filename(&combined)
}

/// Drop leading single-letter tokens (`F_`, `M_`) that some source files
/// prepend to the real name.
fn strip_gender_prefix(name: &str) -> String {
    let (base, ext) = normalize::split_extension(name);
    let tokens: Vec<&str> = base.split('_').collect();
    if tokens.len() <= 1 {
        return name.to_string();
    }

    let mut index = 0;
    while index < tokens.len() && tokens[index].len() == 1 && tokens[index].chars().all(char::is_alphabetic)
    {
        index += 1;
    }
    if index == 0 || index >= tokens.len() {
        return name.to_string();
    }

    let remainder = tokens[index..].join("_");
    let remainder = remainder.trim_matches('_');
    if remainder.is_empty() {
        return name.to_string();
    }
    format!("{remainder}{ext}")
}

/// Infer the cohort's district from the parsed table: first row whose
/// district-like column holds a digit-bearing value, cleaned of single-letter
/// prefixes.
pub fn guess_primary_district(table: Option<&ParsedTable>) -> Option<String> {
    static LEADING_LETTER: once_cell::sync::Lazy<Regex> =
        once_cell::sync::Lazy::new(|| Regex::new(r"^[A-Za-z][\s_\-:]+(.+)$").expect("static regex"));

    let table = table?;
    for row in &table.rows {
        for header in &table.headers {
            if !header.to_lowercase().contains("distrito") {
                continue;
            }
            let Some(value) = row.get(header) else {
                continue;
            };
            let mut candidate = value.trim().to_string();
            if candidate.is_empty() {
                continue;
            }
            while let Some(captures) = LEADING_LETTER.captures(&candidate) {
                candidate = captures[1].trim().to_string();
            }
            if candidate.chars().any(|c| c.is_ascii_digit()) {
                return Some(candidate);
            }
        }
    }
    None
}

/// Ensure the generation folder and file every attachment into it.
///
/// Uploads run sequentially (provider quotas favor it) with the transport
/// retry policy; failures are collected per attachment so one bad blob never
/// blocks its siblings.
pub async fn upload_attachments(
    store: &Arc<dyn ObjectStore>,
    retry_policy: &RetryPolicy,
    parent_folder_id: &str,
    generation_date: &str,
    attachments: &[AttachmentBlob],
    district: Option<&str>,
) -> (Option<String>, Vec<StoredFile>, Vec<UploadError>) {
    let mut uploaded = Vec::new();
    let mut errors = Vec::new();

    if attachments.is_empty() {
        return (None, uploaded, errors);
    }

    let folder_id = match retry(retry_policy, "ensure_folder", || {
        store.ensure_folder(parent_folder_id, generation_date)
    })
    .await
    {
        Ok(folder_id) => folder_id,
        Err(err) => {
            errors.push(UploadError {
                stage: "folder".to_string(),
                code: codes::DRIVE_FOLDER_MISSING.to_string(),
                file_name: None,
                message: Some(err.to_string()),
            });
            return (None, uploaded, errors);
        }
    };

    let mut existing: HashSet<String> = match store.list_folder_files(&folder_id, None).await {
        Ok(entries) => entries.into_iter().map(|e| e.name).collect(),
        Err(err) => {
            tracing::warn!(
                folder_id = %folder_id,
                error = %err,
                "could not list existing names, collision resolution starts empty"
            );
            HashSet::new()
        }
    };

    for attachment in attachments {
        if attachment.data.is_empty() {
            errors.push(UploadError {
                stage: "upload".to_string(),
                code: codes::DRIVE_ATTACHMENT_WITHOUT_DATA.to_string(),
                file_name: Some(attachment.file_name.clone()),
                message: Some("attachment carries no bytes".to_string()),
            });
            continue;
        }

        let desired = format_attachment_name(generation_date, district, &attachment.file_name);
        let unique = normalize::resolve_collision(
            &desired,
            |name| existing.contains(name),
            Utc::now().timestamp_millis(),
        );
        if unique != desired {
            tracing::info!(
                original = %desired,
                adjusted = %unique,
                generation_date = %generation_date,
                "attachment renamed to avoid a duplicate"
            );
        }

        let content_type = attachment
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let outcome = retry(retry_policy, "upload_attachment", || {
            store.upload(
                &folder_id,
                &unique,
                attachment.data.clone(),
                &content_type,
            )
        })
        .await;

        match outcome {
            Ok(stored) => {
                existing.insert(stored.name.clone());
                uploaded.push(stored);
            }
            Err(err) => {
                errors.push(UploadError {
                    stage: "upload".to_string(),
                    code: codes::DRIVE_UPLOAD_FAILED.to_string(),
                    file_name: Some(attachment.file_name.clone()),
                    message: Some(err.to_string()),
                });
            }
        }
    }

    (Some(folder_id), uploaded, errors)
}


#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::testing::MemoryStore;
    use super::*;

    fn attachment(name: &str, content_type: &str, bytes: &[u8]) -> AttachmentBlob {
        AttachmentBlob {
            file_name: name.to_string(),
            content_type: Some(content_type.to_string()),
            size: bytes.len(),
            data: bytes.to_vec(),
        }
    }

    #[test]
    fn attachment_names_carry_generation_and_district() {
        assert_eq!(
            format_attachment_name("20250110", Some("District 10C"), "lista llegada.pdf"),
            "20250110_District_10C_lista_llegada.pdf"
        );
        assert_eq!(
            format_attachment_name("20250110", None, "F_lista.pdf"),
            "20250110_lista.pdf"
        );
    }

    #[test]
    fn district_inference_wants_a_digit_and_strips_prefixes() {
        let mut row = HashMap::new();
        row.insert("Distrito".to_string(), "F District 10C".to_string());
        let table = ParsedTable {
            headers: vec!["Distrito".to_string()],
            rows: vec![row],
            extra_texts: vec![],
        };
        assert_eq!(
            guess_primary_district(Some(&table)),
            Some("District 10C".to_string())
        );

        let mut row = HashMap::new();
        row.insert("Distrito".to_string(), "Norte".to_string());
        let table = ParsedTable {
            headers: vec!["Distrito".to_string()],
            rows: vec![row],
            extra_texts: vec![],
        };
        assert_eq!(guess_primary_district(Some(&table)), None);
        assert_eq!(guess_primary_district(None), None);
    }

    #[tokio::test]
    async fn ensure_folder_is_idempotent() {
        let store = MemoryStore::new();
        let first = store.ensure_folder("parent", "20250110").await.unwrap();
        let second = store.ensure_folder("parent", "20250110").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn uploads_every_attachment_into_the_generation_folder() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let attachments = vec![
            attachment("lista.pdf", "application/pdf", b"pdf-1"),
            attachment("datos.xlsx", EXCEL_MIME_TYPES[0], b"xlsx"),
        ];

        let (folder_id, uploaded, errors) = upload_attachments(
            &store,
            &RetryPolicy::immediate(),
            "parent",
            "20250110",
            &attachments,
            None,
        )
        .await;

        assert!(folder_id.is_some());
        assert!(errors.is_empty());
        assert_eq!(uploaded.len(), 2);
        assert_eq!(uploaded[0].name, "20250110_lista.pdf");
    }

    #[tokio::test]
    async fn upload_failures_are_reported_per_attachment() {
        let memory = Arc::new(MemoryStore::new());
        memory
            .fail_uploads
            .lock()
            .unwrap()
            .insert("segundo".to_string());
        let store: Arc<dyn ObjectStore> = memory;

        let attachments = vec![
            attachment("primero.pdf", "application/pdf", b"1"),
            attachment("segundo.pdf", "application/pdf", b"2"),
        ];

        let (_, uploaded, errors) = upload_attachments(
            &store,
            &RetryPolicy::immediate(),
            "parent",
            "20250110",
            &attachments,
            None,
        )
        .await;

        assert_eq!(uploaded.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].stage, "upload");
        assert_eq!(errors[0].code, codes::DRIVE_UPLOAD_FAILED);
    }

    #[tokio::test]
    async fn empty_attachments_are_flagged_without_aborting() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let attachments = vec![
            attachment("vacio.pdf", "application/pdf", b""),
            attachment("bueno.pdf", "application/pdf", b"ok"),
        ];

        let (_, uploaded, errors) = upload_attachments(
            &store,
            &RetryPolicy::immediate(),
            "parent",
            "20250110",
            &attachments,
            None,
        )
        .await;

        assert_eq!(uploaded.len(), 1);
        assert_eq!(errors[0].code, codes::DRIVE_ATTACHMENT_WITHOUT_DATA);
    }

    #[tokio::test]
    async fn duplicate_names_get_a_timestamp_suffix() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let attachments = vec![
            attachment("lista.pdf", "application/pdf", b"1"),
            attachment("lista.pdf", "application/pdf", b"2"),
        ];

        let (_, uploaded, errors) = upload_attachments(
            &store,
            &RetryPolicy::immediate(),
            "parent",
            "20250110",
            &attachments,
            None,
        )
        .await;

        assert!(errors.is_empty());
        assert_eq!(uploaded.len(), 2);
        assert_ne!(uploaded[0].name, uploaded[1].name);
        assert!(uploaded[1].name.starts_with("20250110_lista_"));
        assert!(uploaded[1].name.ends_with(".pdf"));
    }
}
