//! IMAP variant of the mail gateway.

use anyhow::{anyhow, Context, Result};
use async_imap::Session;
use async_native_tls::TlsStream;
use async_std::net::TcpStream;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use shared_types::{AttachmentBlob, IncomingMessage, MessageRef, MessageSummary};

use super::{MailError, MailGateway};
use crate::config::AppConfig;
use crate::retry::{retry, RetryPolicy};

pub struct ImapGateway {
    server: String,
    port: u16,
    user: String,
    password: String,
    processed_marker: String,
    retry: RetryPolicy,
}

impl ImapGateway {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let password = config
            .mail_app_password
            .clone()
            .context("MAIL_APP_PASSWORD must be set for the IMAP gateway")?;

        Ok(Self {
            server: config.imap_server.clone(),
            port: config.imap_port,
            user: config.mail_user.clone(),
            password,
            processed_marker: config.processed_marker.clone(),
            retry: RetryPolicy::default(),
        })
    }

    async fn connect(&self) -> Result<Session<TlsStream<TcpStream>>> {
        let tcp = TcpStream::connect((self.server.as_str(), self.port))
            .await
            .context("Failed to connect to IMAP server")?;

        let tls = async_native_tls::TlsConnector::new();
        let tls_stream = tls
            .connect(self.server.as_str(), tcp)
            .await
            .context("TLS handshake failed")?;

        let client = async_imap::Client::new(tls_stream);

        let mut session = client
            .login(&self.user, &self.password)
            .await
            .map_err(|e| anyhow!("Login failed: {}", e.0))?;

        session
            .select("INBOX")
            .await
            .context("Failed to select INBOX")?;

        Ok(session)
    }

    async fn fetch_raw(&self, uid: u32) -> Result<Vec<u8>> {
        let mut session = self.connect().await?;

        let messages: Vec<_> = session
            .uid_fetch(format!("{uid}"), "(UID RFC822)")
            .await
            .context("Failed to fetch message")?
            .try_collect()
            .await?;

        let raw = messages
            .iter()
            .find(|m| m.uid == Some(uid))
            .and_then(|m| m.body())
            .map(<[u8]>::to_vec)
            .ok_or_else(|| anyhow!("message {uid} has no body"))?;

        session.logout().await.ok();
        Ok(raw)
    }
}

#[async_trait::async_trait]
impl MailGateway for ImapGateway {
    async fn list_unprocessed(
        &self,
        subject_pattern: &str,
    ) -> Result<Vec<MessageRef>, MailError> {
        let pattern = subject_pattern.replace('"', "");
        let query = format!("UNSEEN SUBJECT \"{pattern}\"");

        retry(&self.retry, "imap_search_unseen", || {
            let query = query.clone();
            async move {
                let mut session = self.connect().await?;
                let uids = session
                    .uid_search(&query)
                    .await
                    .context("Failed to search INBOX")?;
                session.logout().await.ok();

                let mut uids: Vec<u32> = uids.into_iter().collect();
                uids.sort_unstable();
                Ok(uids
                    .into_iter()
                    .map(|uid| MessageRef::new(uid.to_string()))
                    .collect())
            }
        })
        .await
        .map_err(MailError::List)
    }

    async fn fetch(&self, message: &MessageRef) -> Result<IncomingMessage, MailError> {
        let uid: u32 = message
            .id
            .parse()
            .map_err(|_| MailError::Fetch(anyhow!("invalid IMAP uid {}", message.id)))?;

        let raw = retry(&self.retry, "imap_fetch", || self.fetch_raw(uid))
            .await
            .map_err(MailError::Fetch)?;

        let parsed = mailparse::parse_mail(&raw)
            .map_err(|e| MailError::Fetch(anyhow!("message parse failed: {e}")))?;

        Ok(build_incoming(&message.id, &parsed))
    }

    async fn mark_processed(&self, message: &MessageRef) -> Result<(), MailError> {
        let uid = message.id.clone();
        let label = self.processed_marker.clone();

        retry(&self.retry, "imap_mark_processed", || {
            let uid = uid.clone();
            let label = label.clone();
            async move {
                let mut session = self.connect().await?;

                session
                    .uid_store(&uid, "+FLAGS (\\Seen)")
                    .await
                    .context("Failed to flag message as seen")?
                    .try_collect::<Vec<_>>()
                    .await?;

                if !label.is_empty() {
                    // Gmail keyword labels; applied best-effort since plain
                    // IMAP servers reject the extension.
                    if let Ok(stream) = session
                        .uid_store(&uid, format!("+X-GM-LABELS (\"{label}\")"))
                        .await
                    {
                        let _ = stream.try_collect::<Vec<_>>().await;
                    }
                }

                session.logout().await.ok();
                Ok(())
            }
        })
        .await
        .map_err(MailError::Mark)
    }

    async fn search(&self, query: Option<&str>) -> Result<Vec<MessageSummary>, MailError> {
        let criteria = query.unwrap_or("ALL").to_string();

        retry(&self.retry, "imap_search", || {
            let criteria = criteria.clone();
            async move {
                let mut session = self.connect().await?;
                let uids = session
                    .uid_search(&criteria)
                    .await
                    .context("Failed to search INBOX")?;

                let mut uids: Vec<u32> = uids.into_iter().collect();
                uids.sort_unstable();
                // Bound the debug surface to the ten most recent matches.
                let recent: Vec<u32> = uids.into_iter().rev().take(10).collect();

                let mut summaries = Vec::new();
                if !recent.is_empty() {
                    let set = recent
                        .iter()
                        .map(u32::to_string)
                        .collect::<Vec<_>>()
                        .join(",");
                    let messages: Vec<_> = session
                        .uid_fetch(&set, "(UID RFC822)")
                        .await
                        .context("Failed to fetch search results")?
                        .try_collect()
                        .await?;

                    for fetched in &messages {
                        let Some(uid) = fetched.uid else { continue };
                        let Some(body) = fetched.body() else { continue };
                        if let Ok(parsed) = mailparse::parse_mail(body) {
                            let incoming = build_incoming(&uid.to_string(), &parsed);
                            summaries.push(MessageSummary {
                                id: incoming.id,
                                subject: incoming.subject,
                                sender: incoming.sender,
                                date: incoming.received_at,
                                has_attachments: !incoming.attachments.is_empty(),
                            });
                        }
                    }
                }

                session.logout().await.ok();
                Ok(summaries)
            }
        })
        .await
        .map_err(MailError::Search)
    }
}

/// Assemble an [`IncomingMessage`] from a parsed MIME tree.
fn build_incoming(id: &str, parsed: &ParsedMail<'_>) -> IncomingMessage {
    let subject = parsed
        .headers
        .get_first_value("Subject")
        .unwrap_or_default();
    let sender = parsed.headers.get_first_value("From").unwrap_or_default();
    let received_at = parsed.headers.get_first_value("Date").and_then(|value| {
        DateTime::parse_from_rfc2822(value.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    });

    let mut body_text = Vec::new();
    let mut body_html = Vec::new();
    let mut attachments = Vec::new();
    collect_parts(parsed, &mut body_text, &mut body_html, &mut attachments);

    IncomingMessage {
        id: id.to_string(),
        subject,
        sender,
        received_at,
        body_text: body_text.join("\n").trim().to_string(),
        body_html: body_html.join("\n").trim().to_string(),
        attachments,
    }
}

fn collect_parts(
    part: &ParsedMail<'_>,
    body_text: &mut Vec<String>,
    body_html: &mut Vec<String>,
    attachments: &mut Vec<AttachmentBlob>,
) {
    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned();

    if disposition.disposition == DispositionType::Attachment
        || (filename.is_some() && !part.ctype.mimetype.starts_with("text/"))
    {
        if let Ok(data) = part.get_body_raw() {
            attachments.push(AttachmentBlob {
                file_name: filename.unwrap_or_else(|| "archivo_sin_nombre".to_string()),
                content_type: Some(part.ctype.mimetype.clone()),
                size: data.len(),
                data,
            });
        }
        return;
    }

    match part.ctype.mimetype.as_str() {
        "text/plain" => {
            if let Ok(body) = part.get_body() {
                body_text.push(body);
            }
        }
        "text/html" => {
            if let Ok(body) = part.get_body() {
                body_html.push(body);
            }
        }
        _ => {}
    }

    for subpart in &part.subparts {
        collect_parts(subpart, body_text, body_html, attachments);
    }
}
