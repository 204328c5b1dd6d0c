//! Mailbox access: polymorphic gateway over the OAuth API and IMAP variants.

use std::sync::Arc;

use async_trait::async_trait;
use shared_types::{IncomingMessage, MessageRef, MessageSummary};
use thiserror::Error;

use crate::config::{AppConfig, MailProvider};
use crate::error::codes;

pub mod gmail_client;
pub mod imap_client;
pub mod processor;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail listing failed: {0}")]
    List(#[source] anyhow::Error),
    #[error("mail fetch failed: {0}")]
    Fetch(#[source] anyhow::Error),
    #[error("marking message failed: {0}")]
    Mark(#[source] anyhow::Error),
    #[error("mail search failed: {0}")]
    Search(#[source] anyhow::Error),
}

impl MailError {
    pub fn code(&self) -> &'static str {
        // Every transport-level mailbox failure surfaces under the same
        // stable code; the variant only drives logging.
        codes::MAIL_FETCH_FAILED
    }
}

/// Capability set the orchestrator needs from the mailbox.
#[async_trait]
pub trait MailGateway: Send + Sync {
    /// Unprocessed messages whose subject matches the configured pattern.
    /// Mailbox-native ordering; finite per call.
    async fn list_unprocessed(&self, subject_pattern: &str)
        -> Result<Vec<MessageRef>, MailError>;

    async fn fetch(&self, message: &MessageRef) -> Result<IncomingMessage, MailError>;

    /// Apply the durable processed marker. Idempotent: marking twice leaves
    /// the mailbox as after the first call.
    async fn mark_processed(&self, message: &MessageRef) -> Result<(), MailError>;

    /// Debug read-through used by the search endpoint.
    async fn search(&self, query: Option<&str>) -> Result<Vec<MessageSummary>, MailError>;
}

/// Select the gateway variant from configuration.
pub async fn build_gateway(config: &AppConfig) -> anyhow::Result<Arc<dyn MailGateway>> {
    match config.mail_provider {
        MailProvider::Gmail => {
            tracing::info!(authentication = "oauth", "mail gateway initialized");
            Ok(Arc::new(
                gmail_client::GmailGateway::from_config(config).await?,
            ))
        }
        MailProvider::Imap => {
            tracing::info!(authentication = "imap", "mail gateway initialized");
            Ok(Arc::new(imap_client::ImapGateway::from_config(config)?))
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory mailbox for orchestrator tests.

    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MemoryGateway {
        pub messages: Mutex<Vec<IncomingMessage>>,
        pub marked: Mutex<HashSet<String>>,
        pub fail_fetch: Mutex<HashSet<String>>,
    }

    impl MemoryGateway {
        pub fn new(messages: Vec<IncomingMessage>) -> Self {
            Self {
                messages: Mutex::new(messages),
                ..Self::default()
            }
        }

        pub fn is_marked(&self, id: &str) -> bool {
            self.marked.lock().unwrap().contains(id)
        }
    }

    #[async_trait]
    impl MailGateway for MemoryGateway {
        async fn list_unprocessed(
            &self,
            _subject_pattern: &str,
        ) -> Result<Vec<MessageRef>, MailError> {
            let marked = self.marked.lock().unwrap();
            Ok(self
                .messages
                .lock()
                .unwrap()
                .iter()
                .filter(|m| !marked.contains(&m.id))
                .map(|m| MessageRef::new(m.id.clone()))
                .collect())
        }

        async fn fetch(&self, message: &MessageRef) -> Result<IncomingMessage, MailError> {
            if self.fail_fetch.lock().unwrap().contains(&message.id) {
                return Err(MailError::Fetch(anyhow::anyhow!("simulated fetch failure")));
            }
            self.messages
                .lock()
                .unwrap()
                .iter()
                .find(|m| m.id == message.id)
                .cloned()
                .ok_or_else(|| MailError::Fetch(anyhow::anyhow!("unknown message")))
        }

        async fn mark_processed(&self, message: &MessageRef) -> Result<(), MailError> {
            self.marked.lock().unwrap().insert(message.id.clone());
            Ok(())
        }

        async fn search(&self, _query: Option<&str>) -> Result<Vec<MessageSummary>, MailError> {
            Ok(self
                .messages
                .lock()
                .unwrap()
                .iter()
                .map(|m| MessageSummary {
                    id: m.id.clone(),
                    subject: m.subject.clone(),
                    sender: m.sender.clone(),
                    date: m.received_at,
                    has_attachments: !m.attachments.is_empty(),
                })
                .collect())
        }
    }
}
