//! Gmail API variant of the mail gateway.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use google_gmail1::api::{Label, Message, MessagePart, ModifyMessageRequest};
use google_gmail1::hyper_rustls::HttpsConnector;
use google_gmail1::Gmail;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use shared_types::{AttachmentBlob, IncomingMessage, MessageRef, MessageSummary};
use tokio::sync::Mutex;

use super::{MailError, MailGateway};
use crate::config::AppConfig;
use crate::retry::{retry, RetryPolicy};

pub struct GmailGateway {
    hub: Gmail<HttpsConnector<HttpConnector>>,
    processed_marker: String,
    processed_label_id: Mutex<Option<String>>,
    retry: RetryPolicy,
}

impl GmailGateway {
    /// Create a Gmail client from the stored OAuth refresh token.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let client_id = config
            .google_client_id
            .clone()
            .context("GOOGLE_CLIENT_ID must be set for the Gmail gateway")?;
        let client_secret = config
            .google_client_secret
            .clone()
            .context("GOOGLE_CLIENT_SECRET must be set for the Gmail gateway")?;
        let refresh_token = config
            .google_refresh_token
            .clone()
            .context("GOOGLE_REFRESH_TOKEN must be set for the Gmail gateway")?;

        // Use the yup_oauth2 re-exported by google_gmail1 to avoid version mismatch
        let secret = google_gmail1::yup_oauth2::authorized_user::AuthorizedUserSecret {
            client_id,
            client_secret,
            refresh_token,
            key_type: "authorized_user".to_string(),
        };

        let auth = google_gmail1::yup_oauth2::AuthorizedUserAuthenticator::builder(secret)
            .build()
            .await
            .context("Failed to build authenticator from refresh token")?;

        let connector = google_gmail1::hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .context("Failed to load native TLS roots")?
            .https_or_http()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(connector);
        let hub = Gmail::new(client, auth);

        Ok(Self {
            hub,
            processed_marker: config.processed_marker.clone(),
            processed_label_id: Mutex::new(None),
            retry: RetryPolicy::default(),
        })
    }

    /// Resolve the processed-marker label, creating it on first use.
    async fn processed_label(&self) -> Result<String> {
        let mut cached = self.processed_label_id.lock().await;
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }

        let (_, listing) = self
            .hub
            .users()
            .labels_list("me")
            .doit()
            .await
            .context("Failed to list labels")?;

        if let Some(found) = listing
            .labels
            .unwrap_or_default()
            .into_iter()
            .find(|l| l.name.as_deref() == Some(self.processed_marker.as_str()))
            .and_then(|l| l.id)
        {
            *cached = Some(found.clone());
            return Ok(found);
        }

        let label = Label {
            name: Some(self.processed_marker.clone()),
            label_list_visibility: Some("labelShow".to_string()),
            message_list_visibility: Some("show".to_string()),
            ..Default::default()
        };
        let (_, created) = self
            .hub
            .users()
            .labels_create(label, "me")
            .doit()
            .await
            .context("Failed to create processed label")?;

        let id = created.id.context("label create returned no id")?;
        *cached = Some(id.clone());
        Ok(id)
    }

    async fn get_message(&self, message_id: &str) -> Result<IncomingMessage> {
        let (_, message) = self
            .hub
            .users()
            .messages_get("me", message_id)
            .format("full")
            .doit()
            .await
            .context("Failed to get message")?;

        let mut incoming = parse_message(&message);
        self.download_attachments(message_id, message.payload.as_ref(), &mut incoming)
            .await?;
        Ok(incoming)
    }

    /// Attachment bytes arrive out of band: parts carry an attachment id that
    /// is fetched separately.
    async fn download_attachments(
        &self,
        message_id: &str,
        payload: Option<&MessagePart>,
        incoming: &mut IncomingMessage,
    ) -> Result<()> {
        let mut pending: Vec<(String, String, Option<String>)> = Vec::new();
        if let Some(payload) = payload {
            collect_attachment_refs(payload, &mut pending);
        }

        for (filename, attachment_id, mime_type) in pending {
            let (_, body) = self
                .hub
                .users()
                .messages_attachments_get("me", message_id, &attachment_id)
                .doit()
                .await
                .with_context(|| format!("Failed to download attachment {filename}"))?;

            let data = body.data.unwrap_or_default();
            incoming.attachments.push(AttachmentBlob {
                file_name: filename,
                content_type: mime_type,
                size: data.len(),
                data,
            });
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl MailGateway for GmailGateway {
    async fn list_unprocessed(
        &self,
        subject_pattern: &str,
    ) -> Result<Vec<MessageRef>, MailError> {
        let pattern = subject_pattern.replace('"', "");
        let query = format!(
            "subject:\"{pattern}\" is:unread -label:{}",
            self.processed_marker
        );

        retry(&self.retry, "gmail_list_unprocessed", || {
            let query = query.clone();
            async move {
                let (_, listing) = self
                    .hub
                    .users()
                    .messages_list("me")
                    .q(&query)
                    .add_label_ids("INBOX")
                    .max_results(50)
                    .doit()
                    .await
                    .context("Failed to list messages")?;

                Ok(listing
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| m.id)
                    .map(MessageRef::new)
                    .collect())
            }
        })
        .await
        .map_err(MailError::List)
    }

    async fn fetch(&self, message: &MessageRef) -> Result<IncomingMessage, MailError> {
        retry(&self.retry, "gmail_fetch", || self.get_message(&message.id))
            .await
            .map_err(MailError::Fetch)
    }

    async fn mark_processed(&self, message: &MessageRef) -> Result<(), MailError> {
        retry(&self.retry, "gmail_mark_processed", || async {
            let label_id = self.processed_label().await?;
            let modify_request = ModifyMessageRequest {
                add_label_ids: Some(vec![label_id]),
                remove_label_ids: Some(vec!["UNREAD".to_string()]),
            };

            self.hub
                .users()
                .messages_modify(modify_request, "me", &message.id)
                .doit()
                .await
                .context("Failed to mark message processed")?;
            Ok(())
        })
        .await
        .map_err(MailError::Mark)
    }

    async fn search(&self, query: Option<&str>) -> Result<Vec<MessageSummary>, MailError> {
        let query = query.unwrap_or("in:inbox").to_string();

        retry(&self.retry, "gmail_search", || {
            let query = query.clone();
            async move {
                let (_, listing) = self
                    .hub
                    .users()
                    .messages_list("me")
                    .q(&query)
                    .max_results(10)
                    .doit()
                    .await
                    .context("Failed to search messages")?;

                let mut summaries = Vec::new();
                for reference in listing.messages.unwrap_or_default() {
                    let Some(id) = reference.id else { continue };
                    match self.get_message(&id).await {
                        Ok(incoming) => summaries.push(MessageSummary {
                            id: incoming.id,
                            subject: incoming.subject,
                            sender: incoming.sender,
                            date: incoming.received_at,
                            has_attachments: !incoming.attachments.is_empty(),
                        }),
                        Err(e) => {
                            tracing::warn!("Failed to fetch message {}: {}", id, e);
                        }
                    }
                }
                Ok(summaries)
            }
        })
        .await
        .map_err(MailError::Search)
    }
}

fn parse_message(message: &Message) -> IncomingMessage {
    let id = message.id.clone().unwrap_or_default();

    let mut subject = String::new();
    let mut sender = String::new();
    let mut received_at = None;

    if let Some(payload) = &message.payload {
        if let Some(headers) = &payload.headers {
            for header in headers {
                match header.name.as_deref() {
                    Some("Subject") => subject = header.value.clone().unwrap_or_default(),
                    Some("From") => sender = header.value.clone().unwrap_or_default(),
                    Some("Date") => {
                        if let Some(date_str) = &header.value {
                            received_at = parse_date(date_str);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    let (body_text, body_html) = extract_bodies(message);

    IncomingMessage {
        id,
        subject,
        sender,
        received_at,
        body_text: body_text.unwrap_or_default(),
        body_html: body_html.unwrap_or_default(),
        attachments: Vec::new(),
    }
}

fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(date_str.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn extract_bodies(message: &Message) -> (Option<String>, Option<String>) {
    let payload = match message.payload.as_ref() {
        Some(p) => p,
        None => return (None, None),
    };

    let mut text_body = None;
    let mut html_body = None;

    if let Some(body) = &payload.body {
        if let Some(data) = &body.data {
            if let Some(decoded) = bytes_to_string(data) {
                match payload.mime_type.as_deref() {
                    Some("text/html") => html_body = Some(decoded),
                    _ => text_body = Some(decoded),
                }
            }
        }
    }

    if let Some(parts) = &payload.parts {
        extract_bodies_from_parts(parts, &mut text_body, &mut html_body);
    }

    (text_body, html_body)
}

fn extract_bodies_from_parts(
    parts: &[MessagePart],
    text_body: &mut Option<String>,
    html_body: &mut Option<String>,
) {
    for part in parts {
        match part.mime_type.as_deref() {
            Some("text/plain") if text_body.is_none() => {
                if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_ref()) {
                    *text_body = bytes_to_string(data);
                }
            }
            Some("text/html") if html_body.is_none() => {
                if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_ref()) {
                    *html_body = bytes_to_string(data);
                }
            }
            Some(mime) if mime.starts_with("multipart/") => {
                if let Some(nested_parts) = &part.parts {
                    extract_bodies_from_parts(nested_parts, text_body, html_body);
                }
            }
            _ => {}
        }
    }
}

fn bytes_to_string(data: &[u8]) -> Option<String> {
    String::from_utf8(data.to_vec()).ok()
}

/// Gather `(filename, attachment_id, mime_type)` for every attachment part.
fn collect_attachment_refs(part: &MessagePart, out: &mut Vec<(String, String, Option<String>)>) {
    let filename = part.filename.clone().unwrap_or_default();
    if !filename.is_empty() {
        if let Some(attachment_id) = part.body.as_ref().and_then(|b| b.attachment_id.clone()) {
            out.push((filename, attachment_id, part.mime_type.clone()));
        }
    }

    if let Some(parts) = &part.parts {
        for nested in parts {
            collect_attachment_refs(nested, out);
        }
    }
}
