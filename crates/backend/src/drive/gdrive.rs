//! Google Drive implementation of the object-store contract.

use std::io::Cursor;

use anyhow::{Context, Result};
use async_trait::async_trait;
use google_drive3::api::File;
use google_drive3::hyper_rustls::HttpsConnector;
use google_drive3::DriveHub;
use http_body_util::BodyExt;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use shared_types::{FileEntry, StoredFile};

use super::{ObjectStore, StoreError};
use crate::config::AppConfig;

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

pub struct DriveStore {
    hub: DriveHub<HttpsConnector<HttpConnector>>,
}

impl DriveStore {
    /// Build a Drive client from the stored OAuth refresh token.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let client_id = config
            .google_client_id
            .clone()
            .context("GOOGLE_CLIENT_ID must be set for the Drive store")?;
        let client_secret = config
            .google_client_secret
            .clone()
            .context("GOOGLE_CLIENT_SECRET must be set for the Drive store")?;
        let refresh_token = config
            .google_refresh_token
            .clone()
            .context("GOOGLE_REFRESH_TOKEN must be set for the Drive store")?;

        // Use the yup_oauth2 re-exported by google_drive3 to avoid version mismatch
        let secret = google_drive3::yup_oauth2::authorized_user::AuthorizedUserSecret {
            client_id,
            client_secret,
            refresh_token,
            key_type: "authorized_user".to_string(),
        };

        let auth = google_drive3::yup_oauth2::AuthorizedUserAuthenticator::builder(secret)
            .build()
            .await
            .context("Failed to build authenticator from refresh token")?;

        let connector = google_drive3::hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .context("Failed to load native TLS roots")?
            .https_or_http()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(connector);
        let hub = DriveHub::new(client, auth);

        Ok(Self { hub })
    }

    fn escape_query_value(value: &str) -> String {
        value.replace('\'', "\\'")
    }
}

#[async_trait]
impl ObjectStore for DriveStore {
    async fn ensure_folder(&self, parent_id: &str, name: &str) -> Result<String, StoreError> {
        let query = format!(
            "name = '{}' and mimeType = '{FOLDER_MIME}' and '{}' in parents and trashed = false",
            Self::escape_query_value(name),
            Self::escape_query_value(parent_id),
        );

        let (_, listing) = self
            .hub
            .files()
            .list()
            .q(&query)
            .spaces("drive")
            .page_size(1)
            .param("fields", "files(id, name)")
            .doit()
            .await
            .map_err(|e| StoreError::FolderMissing(e.to_string()))?;

        if let Some(found) = listing
            .files
            .unwrap_or_default()
            .into_iter()
            .find_map(|f| f.id)
        {
            tracing::info!(folder_id = %found, name = %name, "reusing generation folder");
            return Ok(found);
        }

        let metadata = File {
            name: Some(name.to_string()),
            mime_type: Some(FOLDER_MIME.to_string()),
            parents: Some(vec![parent_id.to_string()]),
            ..Default::default()
        };

        let (_, created) = self
            .hub
            .files()
            .create(metadata)
            .param("fields", "id, name")
            .doit_without_upload()
            .await
            .map_err(|e| StoreError::FolderMissing(e.to_string()))?;

        let folder_id = created
            .id
            .ok_or_else(|| StoreError::FolderMissing("provider returned no folder id".to_string()))?;
        tracing::info!(folder_id = %folder_id, name = %name, "generation folder created");
        Ok(folder_id)
    }

    async fn upload(
        &self,
        folder_id: &str,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredFile, StoreError> {
        let mime: mime::Mime = content_type
            .parse()
            .unwrap_or(mime::APPLICATION_OCTET_STREAM);

        let metadata = File {
            name: Some(name.to_string()),
            parents: Some(vec![folder_id.to_string()]),
            ..Default::default()
        };

        let (_, uploaded) = self
            .hub
            .files()
            .create(metadata)
            .param("fields", "id, name, webViewLink, webContentLink")
            .upload(Cursor::new(bytes), mime)
            .await
            .map_err(|e| StoreError::UploadFailed(e.to_string()))?;

        let id = uploaded
            .id
            .ok_or_else(|| StoreError::UploadFailed("provider returned no file id".to_string()))?;

        Ok(StoredFile {
            id,
            name: uploaded.name.unwrap_or_else(|| name.to_string()),
            view_link: uploaded.web_view_link,
            download_link: uploaded.web_content_link,
        })
    }

    async fn list_folder_files(
        &self,
        folder_id: &str,
        mime_types: Option<&[&str]>,
    ) -> Result<Vec<FileEntry>, StoreError> {
        let mut query = format!(
            "'{}' in parents and trashed = false",
            Self::escape_query_value(folder_id)
        );
        if let Some(mime_types) = mime_types {
            let filters = mime_types
                .iter()
                .map(|m| format!("mimeType = '{m}'"))
                .collect::<Vec<_>>()
                .join(" or ");
            query.push_str(&format!(" and ({filters})"));
        }

        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut call = self
                .hub
                .files()
                .list()
                .q(&query)
                .spaces("drive")
                .param("fields", "nextPageToken, files(id, name, size)");
            if let Some(token) = &page_token {
                call = call.page_token(token);
            }

            let (_, listing) = call
                .doit()
                .await
                .map_err(|e| StoreError::ListingFailed(e.to_string()))?;

            for file in listing.files.unwrap_or_default() {
                if let (Some(id), Some(name)) = (file.id, file.name) {
                    entries.push(FileEntry {
                        id,
                        name,
                        size: file.size.and_then(|s| u64::try_from(s).ok()),
                    });
                }
            }

            page_token = listing.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok(entries)
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, StoreError> {
        let (response, _) = self
            .hub
            .files()
            .get(file_id)
            .param("alt", "media")
            .doit()
            .await
            .map_err(|e| StoreError::DownloadFailed {
                file_id: file_id.to_string(),
                message: e.to_string(),
            })?;

        let collected = response
            .into_body()
            .collect()
            .await
            .map_err(|e| StoreError::DownloadFailed {
                file_id: file_id.to_string(),
                message: e.to_string(),
            })?;

        Ok(collected.to_bytes().to_vec())
    }
}
