//! Weekly-cycle orchestration: fetch, parse, validate, file, mark.
//!
//! Messages are handled sequentially to bound memory; every external call is
//! a suspension point. A message is marked processed only after its
//! attachments are durably stored, so any earlier failure leaves it
//! unprocessed for the next cycle.

use std::sync::Arc;

use chrono::Utc;
use shared_types::{
    AttachmentBlob, MessageOutcome, MessageRef, MessageSummary, ProcessingSummary, UploadError,
};

use super::{MailError, MailGateway};
use crate::drive::{self, ObjectStore};
use crate::error::codes;
use crate::normalize;
use crate::parser::{generation_date, html_table};
use crate::retry::RetryPolicy;

pub struct EmailProcessor {
    gateway: Arc<dyn MailGateway>,
    store: Arc<dyn ObjectStore>,
    subject_pattern: String,
    attachments_folder_id: String,
    required_columns: Vec<String>,
    retry: RetryPolicy,
}

impl EmailProcessor {
    pub fn new(
        gateway: Arc<dyn MailGateway>,
        store: Arc<dyn ObjectStore>,
        subject_pattern: impl Into<String>,
        attachments_folder_id: impl Into<String>,
        required_columns: Vec<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            gateway,
            store,
            subject_pattern: subject_pattern.into(),
            attachments_folder_id: attachments_folder_id.into(),
            required_columns,
            retry,
        }
    }

    /// Run one full processing cycle over the unprocessed mailbox messages.
    pub async fn process_incoming(&self) -> Result<ProcessingSummary, MailError> {
        let start_time = Utc::now();
        let references = self.gateway.list_unprocessed(&self.subject_pattern).await?;

        tracing::info!(total = references.len(), "processing incoming messages");

        let mut details = Vec::with_capacity(references.len());
        for reference in &references {
            let outcome = self.process_message(reference).await;
            details.push(outcome);
        }

        let processed = details.iter().filter(|d| d.success).count();
        let errors = details.len() - processed;
        let end_time = Utc::now();
        let duration_seconds = (end_time - start_time).num_milliseconds() as f64 / 1000.0;

        tracing::info!(processed, errors, duration_seconds, "processing cycle finished");

        Ok(ProcessingSummary {
            success: true,
            processed,
            errors,
            details,
            start_time,
            end_time,
            duration_seconds,
        })
    }

    async fn process_message(&self, reference: &MessageRef) -> MessageOutcome {
        let message = match self.gateway.fetch(reference).await {
            Ok(message) => message,
            Err(error) => {
                tracing::error!(
                    message_id = %reference.id,
                    error_code = error.code(),
                    error = %error,
                    "message fetch failed"
                );
                return failed_outcome(reference, error.code());
            }
        };

        let (parsed_table, mut table_errors) = html_table::extract_primary_table(&message.body_html);
        let stripped_html = if message.body_html.is_empty() {
            String::new()
        } else {
            html_table::strip_tags(&message.body_html)
        };
        let table_texts = parsed_table
            .as_ref()
            .map(|t| t.collect_texts())
            .unwrap_or_default();

        let generation = generation_date::extract_generation_date(
            &message.body_text,
            &stripped_html,
            &table_texts,
            &message.subject,
        );

        let validation_errors = validate_structure(
            &message.subject,
            generation.as_deref(),
            &message.attachments,
            &self.subject_pattern,
        );

        if let Some(table) = &parsed_table {
            table_errors.extend(html_table::validate_table(table, &self.required_columns));
        }

        let mut folder_id = None;
        let mut uploaded_files = Vec::new();
        let mut upload_errors: Vec<UploadError> = Vec::new();

        // Filing runs only once the message validated; an invalid message
        // must stay free of side effects so its retry next cycle starts
        // clean.
        if validation_errors.is_empty() && !message.attachments.is_empty() {
            let generation = generation.as_deref().unwrap_or_default();
            let district = drive::guess_primary_district(parsed_table.as_ref());
            let (folder, uploaded, errors) = drive::upload_attachments(
                &self.store,
                &self.retry,
                &self.attachments_folder_id,
                generation,
                &message.attachments,
                district.as_deref(),
            )
            .await;
            folder_id = folder;
            uploaded_files = uploaded;
            upload_errors = errors;
        }

        let mut success = validation_errors.is_empty() && upload_errors.is_empty();

        if success {
            if let Err(error) = self.gateway.mark_processed(reference).await {
                tracing::error!(
                    message_id = %reference.id,
                    error_code = error.code(),
                    error = %error,
                    "marking message failed, it will be reprocessed"
                );
                upload_errors.push(UploadError {
                    stage: "mark".to_string(),
                    code: error.code().to_string(),
                    file_name: None,
                    message: Some(error.to_string()),
                });
                success = false;
            }
        }

        if success {
            tracing::info!(
                message_id = %message.id,
                subject = %message.subject,
                generation_date = generation.as_deref().unwrap_or(""),
                attachments = message.attachments.len(),
                uploaded = uploaded_files.len(),
                "message processed"
            );
        } else {
            tracing::warn!(
                message_id = %message.id,
                subject = %message.subject,
                validation_errors = ?validation_errors,
                table_errors = ?table_errors,
                upload_errors = ?upload_errors,
                "message left unprocessed"
            );
        }

        MessageOutcome {
            success,
            message_id: message.id.clone(),
            subject: message.subject.clone(),
            sender: message.sender.clone(),
            generation_date: generation,
            attachments_count: message.attachments.len(),
            validation_errors,
            parsed_table,
            table_errors,
            folder_id,
            uploaded_files,
            upload_errors,
        }
    }

    /// Debug read-through to the mailbox.
    pub async fn search(&self, query: Option<&str>) -> Result<Vec<MessageSummary>, MailError> {
        self.gateway.search(query).await
    }
}

fn failed_outcome(reference: &MessageRef, code: &str) -> MessageOutcome {
    MessageOutcome {
        success: false,
        message_id: reference.id.clone(),
        subject: String::new(),
        sender: String::new(),
        generation_date: None,
        attachments_count: 0,
        validation_errors: vec![code.to_string()],
        parsed_table: None,
        table_errors: Vec::new(),
        folder_id: None,
        uploaded_files: Vec::new(),
        upload_errors: Vec::new(),
    }
}

/// Structural validation of an incoming message.
fn validate_structure(
    subject: &str,
    generation_date: Option<&str>,
    attachments: &[AttachmentBlob],
    subject_pattern: &str,
) -> Vec<String> {
    let mut errors = Vec::new();

    if !normalize::subject_matches(subject, subject_pattern) {
        errors.push(codes::SUBJECT_PATTERN_MISMATCH.to_string());
    }
    if generation_date.is_none() {
        errors.push(codes::GENERATION_DATE_MISSING.to_string());
    }
    if attachments.is_empty() {
        errors.push(codes::ATTACHMENTS_MISSING.to_string());
    } else if !attachments.iter().any(AttachmentBlob::is_pdf) {
        errors.push(codes::PDF_ATTACHMENT_MISSING.to_string());
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::testing::MemoryStore;
    use crate::mail::testing::MemoryGateway;

    const PARENT: &str = "parent-folder";
    const PATTERN: &str = "Misioneros que llegan";

    fn attachment(name: &str, content_type: &str) -> AttachmentBlob {
        AttachmentBlob {
            file_name: name.to_string(),
            content_type: Some(content_type.to_string()),
            size: 4,
            data: b"data".to_vec(),
        }
    }

    use shared_types::IncomingMessage;

    fn arrival_message(id: &str) -> IncomingMessage {
        IncomingMessage {
            id: id.to_string(),
            subject: "Misioneros que llegan el 10 de enero".to_string(),
            sender: "centro@example.org".to_string(),
            received_at: Some(Utc::now()),
            body_text: "Generación del 10 de enero de 2025".to_string(),
            body_html: r#"<table>
                <tr><th>Distrito</th><th>Zona</th></tr>
                <tr><td>District 10A</td><td>Norte</td></tr>
            </table>"#
                .to_string(),
            attachments: vec![
                attachment("lista1.pdf", "application/pdf"),
                attachment("lista2.pdf", "application/pdf"),
                attachment(
                    "datos.xlsx",
                    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                ),
            ],
        }
    }

    fn processor(
        gateway: Arc<MemoryGateway>,
        store: Arc<MemoryStore>,
    ) -> EmailProcessor {
        EmailProcessor::new(
            gateway,
            store,
            PATTERN,
            PARENT,
            vec!["Distrito".to_string(), "Zona".to_string()],
            RetryPolicy::immediate(),
        )
    }

    #[tokio::test]
    async fn happy_path_uploads_everything_and_marks_the_message() {
        let gateway = Arc::new(MemoryGateway::new(vec![arrival_message("m1")]));
        let store = Arc::new(MemoryStore::new());
        let summary = processor(Arc::clone(&gateway), Arc::clone(&store))
            .process_incoming()
            .await
            .unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.errors, 0);

        let outcome = &summary.details[0];
        assert!(outcome.success);
        assert_eq!(outcome.generation_date.as_deref(), Some("20250110"));
        assert!(outcome.validation_errors.is_empty());
        assert!(outcome.upload_errors.is_empty());
        assert_eq!(outcome.uploaded_files.len(), outcome.attachments_count);
        assert!(gateway.is_marked("m1"));

        // The folder is named after the generation date, under the
        // configured parent.
        let folders = store.folders.lock().unwrap();
        assert!(folders.contains_key(&(PARENT.to_string(), "20250110".to_string())));
    }

    #[tokio::test]
    async fn upload_failure_surfaces_and_leaves_the_message_unmarked() {
        let mut message = arrival_message("m1");
        message.attachments.truncate(2);
        let gateway = Arc::new(MemoryGateway::new(vec![message]));
        let store = Arc::new(MemoryStore::new());
        store
            .fail_uploads
            .lock()
            .unwrap()
            .insert("lista2".to_string());

        let summary = processor(Arc::clone(&gateway), Arc::clone(&store))
            .process_incoming()
            .await
            .unwrap();

        let outcome = &summary.details[0];
        assert!(!outcome.success);
        assert_eq!(outcome.uploaded_files.len(), 1);
        assert_eq!(outcome.upload_errors.len(), 1);
        assert_eq!(outcome.upload_errors[0].stage, "upload");
        assert_eq!(outcome.upload_errors[0].code, codes::DRIVE_UPLOAD_FAILED);
        assert!(!gateway.is_marked("m1"));
    }

    #[tokio::test]
    async fn subject_mismatch_is_reported_without_side_effects() {
        let mut irrelevant = arrival_message("m1");
        irrelevant.subject = "Boletín semanal".to_string();
        let valid = arrival_message("m2");

        let gateway = Arc::new(MemoryGateway::new(vec![irrelevant, valid]));
        let store = Arc::new(MemoryStore::new());
        let summary = processor(Arc::clone(&gateway), Arc::clone(&store))
            .process_incoming()
            .await
            .unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.errors, 1);

        let failed = &summary.details[0];
        assert!(!failed.success);
        assert!(failed
            .validation_errors
            .contains(&codes::SUBJECT_PATTERN_MISMATCH.to_string()));
        assert!(failed.uploaded_files.is_empty());
        assert!(!gateway.is_marked("m1"));
        assert!(gateway.is_marked("m2"));
    }

    #[tokio::test]
    async fn missing_generation_date_blocks_the_upload() {
        let mut message = arrival_message("m1");
        message.body_text = "sin fecha en el cuerpo".to_string();
        message.body_html = String::new();
        message.subject = "Misioneros que llegan pronto".to_string();

        let gateway = Arc::new(MemoryGateway::new(vec![message]));
        let store = Arc::new(MemoryStore::new());
        let summary = processor(Arc::clone(&gateway), Arc::clone(&store))
            .process_incoming()
            .await
            .unwrap();

        let outcome = &summary.details[0];
        assert!(!outcome.success);
        assert!(outcome
            .validation_errors
            .contains(&codes::GENERATION_DATE_MISSING.to_string()));
        assert!(outcome.folder_id.is_none());
        assert!(store.folders.lock().unwrap().is_empty());
        assert!(!gateway.is_marked("m1"));
    }

    #[tokio::test]
    async fn a_fetch_failure_does_not_stop_sibling_messages() {
        let gateway = Arc::new(MemoryGateway::new(vec![
            arrival_message("m1"),
            arrival_message("m2"),
        ]));
        gateway.fail_fetch.lock().unwrap().insert("m1".to_string());
        let store = Arc::new(MemoryStore::new());

        let summary = processor(Arc::clone(&gateway), Arc::clone(&store))
            .process_incoming()
            .await
            .unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.errors, 1);
        assert!(summary.details[0]
            .validation_errors
            .contains(&codes::MAIL_FETCH_FAILED.to_string()));
        assert!(gateway.is_marked("m2"));
    }

    #[tokio::test]
    async fn messages_without_attachments_fail_validation() {
        let mut message = arrival_message("m1");
        message.attachments.clear();

        let gateway = Arc::new(MemoryGateway::new(vec![message]));
        let store = Arc::new(MemoryStore::new());
        let summary = processor(gateway, store).process_incoming().await.unwrap();

        assert!(summary.details[0]
            .validation_errors
            .contains(&codes::ATTACHMENTS_MISSING.to_string()));
    }
}
