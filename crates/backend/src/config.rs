use std::path::PathBuf;

use anyhow::{Context, Result};
use std::env;

/// Mail gateway variant selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailProvider {
    Imap,
    Gmail,
}

/// Dataset cache variant selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheProvider {
    Memory,
    Remote,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mail_user: String,
    pub mail_subject_pattern: String,
    pub processed_marker: String,
    pub attachments_folder_id: String,
    pub db_dsn: String,
    pub cache_provider: CacheProvider,
    pub cache_ttl_minutes: u64,
    pub branch_id: i32,
    pub allowed_branches: Vec<i32>,
    pub log_file_path: Option<PathBuf>,

    pub mail_provider: MailProvider,
    pub mail_app_password: Option<String>,
    pub imap_server: String,
    pub imap_port: u16,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    pub google_refresh_token: Option<String>,

    pub redis_url: Option<String>,
    pub required_table_columns: Vec<String>,
    pub arrival_days_ahead: i64,
    pub birthday_days_ahead: i64,
    pub sync_state_path: PathBuf,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let cache_provider = match env::var("CACHE_PROVIDER").as_deref() {
            Ok("remote") => CacheProvider::Remote,
            _ => CacheProvider::Memory,
        };
        let mail_provider = match env::var("MAIL_PROVIDER").as_deref() {
            Ok("gmail") => MailProvider::Gmail,
            _ => MailProvider::Imap,
        };

        let branch_id: i32 = env::var("BRANCH_ID")
            .context("BRANCH_ID must be set")?
            .parse()
            .context("BRANCH_ID must be an integer")?;
        let allowed_branches = parse_branches(&env::var("ALLOWED_BRANCHES").unwrap_or_default());

        let config = Self {
            mail_user: env::var("MAIL_USER").context("MAIL_USER must be set")?,
            mail_subject_pattern: env::var("MAIL_SUBJECT_PATTERN")
                .unwrap_or_else(|_| "Misioneros que llegan".to_string()),
            processed_marker: env::var("PROCESSED_MARKER")
                .unwrap_or_else(|_| "misioneros-procesados".to_string()),
            attachments_folder_id: env::var("ATTACHMENTS_FOLDER_ID")
                .context("ATTACHMENTS_FOLDER_ID must be set")?,
            db_dsn: env::var("DB_DSN").context("DB_DSN must be set")?,
            cache_provider,
            cache_ttl_minutes: env::var("CACHE_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            branch_id,
            allowed_branches,
            log_file_path: env::var("LOG_FILE_PATH").ok().map(PathBuf::from),

            mail_provider,
            mail_app_password: env::var("MAIL_APP_PASSWORD").ok(),
            imap_server: env::var("IMAP_SERVER").unwrap_or_else(|_| "imap.gmail.com".to_string()),
            imap_port: env::var("IMAP_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(993),
            google_client_id: env::var("GOOGLE_CLIENT_ID").ok(),
            google_client_secret: env::var("GOOGLE_CLIENT_SECRET").ok(),
            google_refresh_token: env::var("GOOGLE_REFRESH_TOKEN").ok(),

            redis_url: env::var("REDIS_URL").ok(),
            required_table_columns: parse_columns(
                &env::var("REQUIRED_TABLE_COLUMNS").unwrap_or_else(|_| "Distrito,Zona".to_string()),
            ),
            arrival_days_ahead: env::var("ARRIVAL_DAYS_AHEAD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            birthday_days_ahead: env::var("BIRTHDAY_DAYS_AHEAD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(90),
            sync_state_path: env::var("SYNC_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/state/sync_state.json")),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
        };

        if config.cache_provider == CacheProvider::Remote && config.redis_url.is_none() {
            anyhow::bail!("REDIS_URL must be set when CACHE_PROVIDER=remote");
        }
        if !config.allowed_branches.is_empty()
            && !config.allowed_branches.contains(&config.branch_id)
        {
            anyhow::bail!("BRANCH_ID must be listed in ALLOWED_BRANCHES");
        }

        Ok(config)
    }
}

fn parse_branches(value: &str) -> Vec<i32> {
    value
        .split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

fn parse_columns(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_lists_tolerate_spacing_and_junk() {
        assert_eq!(parse_branches("14, 9,x,  11"), vec![14, 9, 11]);
        assert_eq!(parse_branches(""), Vec::<i32>::new());
    }

    #[test]
    fn column_lists_are_trimmed() {
        assert_eq!(
            parse_columns("Distrito, Zona ,"),
            vec!["Distrito".to_string(), "Zona".to_string()]
        );
    }
}
