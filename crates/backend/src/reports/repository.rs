//! Row sources for the dataset pipelines.

use async_trait::async_trait;
use chrono::NaiveDate;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use shared_types::MissionaryRecord;
use thiserror::Error;

use crate::db::DbPool;
use crate::models::MissionaryRow;

#[derive(Debug, Error)]
#[error("report data unavailable: {0}")]
pub struct RepositoryError(pub String);

/// Contract for repositories feeding the dataset pipelines.
#[async_trait]
pub trait ReportDataRepository: Send + Sync {
    /// Rows of one generation across the given branches.
    async fn generation_rows(
        &self,
        branches: &[i32],
        generation: NaiveDate,
    ) -> Result<Vec<MissionaryRecord>, RepositoryError>;

    /// Rows with an arrival date in `(after, until]` for one branch.
    async fn arrivals_between(
        &self,
        branch_id: i32,
        after: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<MissionaryRecord>, RepositoryError>;

    /// Active rows of one branch that carry a birth date.
    async fn birthday_candidates(
        &self,
        branch_id: i32,
    ) -> Result<Vec<MissionaryRecord>, RepositoryError>;

    /// Most recent generation date known for a branch.
    async fn latest_generation(
        &self,
        branch_id: i32,
    ) -> Result<Option<NaiveDate>, RepositoryError>;
}

pub struct PgReportDataRepository {
    pool: DbPool,
}

impl PgReportDataRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReportDataRepository for PgReportDataRepository {
    async fn generation_rows(
        &self,
        branches: &[i32],
        generation_date: NaiveDate,
    ) -> Result<Vec<MissionaryRecord>, RepositoryError> {
        use crate::schema::missionaries::dsl::*;

        let mut conn = self.pool.get().await.map_err(|e| RepositoryError(e.to_string()))?;
        let rows: Vec<MissionaryRow> = missionaries
            .filter(branch.eq_any(branches.to_vec()))
            .filter(generation.eq(generation_date))
            .order((district.asc(), name.asc()))
            .select(MissionaryRow::as_select())
            .load(&mut conn)
            .await
            .map_err(|e| RepositoryError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn arrivals_between(
        &self,
        branch_id: i32,
        after: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<MissionaryRecord>, RepositoryError> {
        use crate::schema::missionaries::dsl::*;

        let mut conn = self.pool.get().await.map_err(|e| RepositoryError(e.to_string()))?;
        let rows: Vec<MissionaryRow> = missionaries
            .filter(branch.eq(branch_id))
            .filter(arrival.gt(after))
            .filter(arrival.le(until))
            .order((arrival.asc(), district.asc()))
            .select(MissionaryRow::as_select())
            .load(&mut conn)
            .await
            .map_err(|e| RepositoryError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn birthday_candidates(
        &self,
        branch_id: i32,
    ) -> Result<Vec<MissionaryRecord>, RepositoryError> {
        use crate::schema::missionaries::dsl::*;

        let mut conn = self.pool.get().await.map_err(|e| RepositoryError(e.to_string()))?;
        let rows: Vec<MissionaryRow> = missionaries
            .filter(branch.eq(branch_id))
            .filter(active.eq(true))
            .filter(birth_date.is_not_null())
            .select(MissionaryRow::as_select())
            .load(&mut conn)
            .await
            .map_err(|e| RepositoryError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn latest_generation(
        &self,
        branch_id: i32,
    ) -> Result<Option<NaiveDate>, RepositoryError> {
        use crate::schema::missionaries::dsl::*;

        let mut conn = self.pool.get().await.map_err(|e| RepositoryError(e.to_string()))?;
        let latest: Option<Option<NaiveDate>> = missionaries
            .filter(branch.eq(branch_id))
            .filter(generation.is_not_null())
            .select(generation)
            .order(generation.desc())
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| RepositoryError(e.to_string()))?;

        Ok(latest.flatten())
    }
}
