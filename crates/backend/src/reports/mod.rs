//! Dataset preparation: branch-scoped pipelines with a pluggable cache.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use shared_types::{CacheMetrics, DatasetMetadata, DatasetResult};
use thiserror::Error;

pub mod cache;
pub mod pipeline;
pub mod repository;

use cache::DatasetCache;
use pipeline::{DatasetPipeline, PipelineContext, PipelineError};
use repository::ReportDataRepository;

use crate::error::codes;
use crate::events::EventBus;
use crate::normalize;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("branch {0} is not authorized")]
    InvalidBranch(i32),
    #[error("unknown dataset {0}")]
    UnknownDataset(String),
    #[error("generation date {0} is not a valid YYYYMMDD date")]
    InvalidGeneration(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ReportError {
    pub fn code(&self) -> &str {
        match self {
            ReportError::InvalidBranch(_) => codes::INVALID_BRANCH,
            ReportError::UnknownDataset(_) => "unknown_dataset",
            ReportError::InvalidGeneration(_) => "invalid_generation_date",
            ReportError::Pipeline(PipelineError::Validation { code, .. }) => code,
            ReportError::Pipeline(_) => "dataset_load_failed",
        }
    }
}

pub struct ReportService {
    repository: Arc<dyn ReportDataRepository>,
    cache: Arc<dyn DatasetCache>,
    ttl: Duration,
    default_branch: i32,
    allowed_branches: Vec<i32>,
    default_days_ahead: i64,
}

impl ReportService {
    pub fn new(
        repository: Arc<dyn ReportDataRepository>,
        cache: Arc<dyn DatasetCache>,
        ttl: Duration,
        default_branch: i32,
        allowed_branches: Vec<i32>,
        default_days_ahead: i64,
    ) -> Self {
        Self {
            repository,
            cache,
            ttl,
            default_branch,
            allowed_branches,
            default_days_ahead,
        }
    }

    /// Have the cache drop affected datasets whenever a sync completes.
    pub fn subscribe_invalidation(bus: &EventBus, cache: Arc<dyn DatasetCache>) {
        bus.subscribe("dataset-cache", move |event| {
            let cache = Arc::clone(&cache);
            Box::pin(async move {
                let removed = cache
                    .invalidate_generation(event.branch_id, &event.generation_date)
                    .await;
                tracing::info!(
                    branch_id = event.branch_id,
                    generation_date = %event.generation_date,
                    removed,
                    "dataset cache invalidated"
                );
                Ok(())
            })
        });
    }

    /// Branches outside the authorized set never reach a pipeline.
    fn resolve_branch(&self, requested: Option<i32>) -> Result<i32, ReportError> {
        let resolved = requested.unwrap_or(self.default_branch);
        if !self.allowed_branches.is_empty() && !self.allowed_branches.contains(&resolved) {
            return Err(ReportError::InvalidBranch(resolved));
        }
        Ok(resolved)
    }

    async fn resolve_generation(
        &self,
        branch_id: i32,
        requested: Option<&str>,
    ) -> Result<String, ReportError> {
        match requested {
            Some(value) => {
                normalize::coerce_date(value)
                    .ok_or_else(|| ReportError::InvalidGeneration(value.to_string()))?;
                Ok(value.to_string())
            }
            None => {
                let latest = self
                    .repository
                    .latest_generation(branch_id)
                    .await
                    .map_err(PipelineError::from)?;
                Ok(latest
                    .map(|d| d.format("%Y%m%d").to_string())
                    .unwrap_or_else(|| Utc::now().date_naive().format("%Y%m%d").to_string()))
            }
        }
    }

    /// Prepare (or serve from cache) one dataset for a branch and generation.
    pub async fn prepare(
        &self,
        dataset_id: &str,
        branch_id: Option<i32>,
        generation_date: Option<&str>,
        days_ahead: Option<i64>,
    ) -> Result<DatasetResult, ReportError> {
        let pipeline = pipeline::pipeline_for(dataset_id)
            .ok_or_else(|| ReportError::UnknownDataset(dataset_id.to_string()))?;
        let branch_id = self.resolve_branch(branch_id)?;
        let generation_date = self.resolve_generation(branch_id, generation_date).await?;
        let generation = normalize::coerce_date(&generation_date)
            .ok_or_else(|| ReportError::InvalidGeneration(generation_date.clone()))?;

        let key = cache::cache_key(dataset_id, branch_id, &generation_date);

        if !self.ttl.is_zero() {
            if let Some(cached) = self.cache.get(&key).await {
                if let Ok(mut result) = serde_json::from_value::<DatasetResult>(cached) {
                    result.metadata.cache_hit = true;
                    tracing::info!(
                        dataset_id,
                        branch_id,
                        generation_date = %generation_date,
                        cache_key = %key,
                        cache_hit = true,
                        "dataset served from cache"
                    );
                    return Ok(result);
                }
            }
        }

        let started = std::time::Instant::now();
        let ctx = PipelineContext {
            branch_id,
            allowed_branches: self.allowed_branches.clone(),
            generation_date: generation_date.clone(),
            generation,
            today: Utc::now().date_naive(),
            days_ahead: days_ahead.unwrap_or(self.default_days_ahead),
        };

        let rows = pipeline.load(self.repository.as_ref(), &ctx).await
            .map_err(PipelineError::from)?;
        pipeline.validate(&rows, &ctx)?;
        let (data, row_count) = pipeline.transform(rows, &ctx)?;

        let result = DatasetResult {
            metadata: DatasetMetadata {
                dataset_id: dataset_id.to_string(),
                branch_id,
                generation_date: generation_date.clone(),
                built_at: Utc::now(),
                row_count,
                cache_key: key.clone(),
                cache_hit: false,
                duration_ms: started.elapsed().as_millis() as i64,
            },
            data,
        };

        tracing::info!(
            dataset_id,
            branch_id,
            generation_date = %generation_date,
            row_count,
            duration_ms = result.metadata.duration_ms,
            cache_hit = false,
            "dataset built"
        );

        if !self.ttl.is_zero() {
            let payload = serde_json::to_value(&result).expect("serializable");
            self.cache.set(&key, payload, self.ttl).await;
        }

        Ok(result)
    }

    pub fn cache_metrics(&self) -> CacheMetrics {
        self.cache.metrics()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use shared_types::DatasetInvalidated;

    use super::cache::MemoryCache;
    use super::pipeline::testing::{record, MemoryRepository};
    use super::*;

    fn arrivals_rows() -> Vec<shared_types::MissionaryRecord> {
        let mut a = record(1, 14, "District 10A");
        a.arrival = Some(Utc::now().date_naive() + chrono::Duration::days(7));
        a.generation = Some(NaiveDate::from_ymd_opt(2025, 1, 10).unwrap());
        vec![a]
    }

    fn service(cache: Arc<dyn DatasetCache>) -> ReportService {
        ReportService::new(
            Arc::new(MemoryRepository::new(arrivals_rows())),
            cache,
            Duration::from_secs(1800),
            14,
            vec![14, 9],
            60,
        )
    }

    #[tokio::test]
    async fn cache_round_trip_and_invalidation_metrics() {
        let cache: Arc<dyn DatasetCache> = Arc::new(MemoryCache::new());
        let bus = EventBus::new();
        ReportService::subscribe_invalidation(&bus, Arc::clone(&cache));
        let service = service(Arc::clone(&cache));

        // First read builds, second is a hit.
        let first = service
            .prepare("upcoming_arrivals", None, Some("20250110"), None)
            .await
            .unwrap();
        assert!(!first.metadata.cache_hit);
        assert_eq!(first.metadata.row_count, 1);

        let second = service
            .prepare("upcoming_arrivals", None, Some("20250110"), None)
            .await
            .unwrap();
        assert!(second.metadata.cache_hit);

        let metrics = service.cache_metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.writes, 1);
        assert_eq!(metrics.invalidations, 0);

        // A completed sync invalidates; the next read rebuilds.
        bus.publish(DatasetInvalidated {
            generation_date: "20250110".to_string(),
            branch_id: 14,
        })
        .await;

        let third = service
            .prepare("upcoming_arrivals", None, Some("20250110"), None)
            .await
            .unwrap();
        assert!(!third.metadata.cache_hit);

        let metrics = service.cache_metrics();
        assert_eq!(metrics.misses, 2);
        assert_eq!(metrics.writes, 2);
        assert_eq!(metrics.invalidations, 1);
    }

    #[tokio::test]
    async fn unauthorized_branches_are_rejected() {
        let service = service(Arc::new(MemoryCache::new()));
        let err = service
            .prepare("upcoming_arrivals", Some(77), Some("20250110"), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::INVALID_BRANCH);
    }

    #[tokio::test]
    async fn explicit_allowed_branch_overrides_the_default() {
        let service = service(Arc::new(MemoryCache::new()));
        let result = service
            .prepare("upcoming_arrivals", Some(9), Some("20250110"), None)
            .await
            .unwrap();
        assert_eq!(result.metadata.branch_id, 9);
    }

    #[tokio::test]
    async fn unknown_datasets_and_bad_generations_fail_cleanly() {
        let service = service(Arc::new(MemoryCache::new()));
        assert!(matches!(
            service.prepare("nope", None, Some("20250110"), None).await,
            Err(ReportError::UnknownDataset(_))
        ));
        assert!(matches!(
            service
                .prepare("upcoming_arrivals", None, Some("99999999"), None)
                .await,
            Err(ReportError::InvalidGeneration(_))
        ));
    }

    #[tokio::test]
    async fn generation_defaults_to_the_latest_known() {
        let service = service(Arc::new(MemoryCache::new()));
        let result = service
            .prepare("branch_summary", None, None, None)
            .await
            .unwrap();
        assert_eq!(result.metadata.generation_date, "20250110");
    }
}
