//! Record persistence for the sync engine.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use scoped_futures::ScopedFutureExt;
use shared_types::MissionaryRecord;
use thiserror::Error;

use crate::db::DbPool;
use crate::error::codes;
use crate::models::NewMissionary;

#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("database connection failed: {0}")]
    Connection(String),
    #[error("batch insert failed: {0}")]
    Insert(String),
}

impl RecordStoreError {
    pub fn code(&self) -> &'static str {
        match self {
            RecordStoreError::Connection(_) => codes::DB_CONNECTION_FAILED,
            RecordStoreError::Insert(_) => codes::DB_INSERT_FAILED,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub skipped: usize,
}

/// One transaction per batch: look up existing ids, insert the remainder,
/// commit. Later occurrences of a known id are skipped, never updated.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_batch(
        &self,
        records: &[MissionaryRecord],
    ) -> Result<BatchOutcome, RecordStoreError>;
}

pub struct PgRecordStore {
    pool: DbPool,
}

impl PgRecordStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn insert_batch(
        &self,
        records: &[MissionaryRecord],
    ) -> Result<BatchOutcome, RecordStoreError> {
        use crate::schema::missionaries::dsl::*;

        if records.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| RecordStoreError::Connection(e.to_string()))?;

        let ids: Vec<i32> = records.iter().map(|r| r.id).collect();
        let total = records.len();

        let inserted = conn
            .transaction::<usize, diesel::result::Error, _>(|conn| {
                async move {
                    let existing: Vec<i32> = missionaries
                        .select(id)
                        .filter(id.eq_any(&ids))
                        .load(conn)
                        .await?;

                    let fresh: Vec<NewMissionary> = records
                        .iter()
                        .filter(|record| !existing.contains(&record.id))
                        .map(NewMissionary::from)
                        .collect();

                    if fresh.is_empty() {
                        return Ok(0);
                    }

                    diesel::insert_into(missionaries)
                        .values(&fresh)
                        .execute(conn)
                        .await
                }
                .scope_boxed()
            })
            .await
            .map_err(|e| RecordStoreError::Insert(e.to_string()))?;

        Ok(BatchOutcome {
            inserted,
            skipped: total - inserted,
        })
    }
}
