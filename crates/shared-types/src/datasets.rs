//! Dataset DTOs produced by the report pipelines.
//!
//! Each DTO is immutable once built; `BranchSummary` goes through a builder
//! that checks its aggregate constraints before handing the value out.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Aggregate-constraint violation raised by a dataset builder.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DatasetBuildError {
    #[error("total_missionaries {total} does not match district sum {district_sum}")]
    InvalidTotalMissionaries { total: i64, district_sum: i64 },
}

impl DatasetBuildError {
    pub fn code(&self) -> &'static str {
        match self {
            DatasetBuildError::InvalidTotalMissionaries { .. } => "invalid_total_missionaries",
        }
    }
}

/// Per-district slice of a branch summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistrictSummary {
    pub district: String,
    pub missionaries_count: i64,
    pub first_arrival: Option<NaiveDate>,
    pub last_departure: Option<NaiveDate>,
}

/// Branch-level summary over the current generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSummary {
    pub branch_id: i32,
    pub generation_date: String,
    pub total_missionaries: i64,
    pub districts: Vec<DistrictSummary>,
}

#[derive(Debug, Default)]
pub struct BranchSummaryBuilder {
    branch_id: i32,
    generation_date: String,
    total_missionaries: i64,
    districts: Vec<DistrictSummary>,
}

impl BranchSummaryBuilder {
    pub fn new(branch_id: i32, generation_date: impl Into<String>) -> Self {
        Self {
            branch_id,
            generation_date: generation_date.into(),
            ..Default::default()
        }
    }

    pub fn total_missionaries(mut self, total: i64) -> Self {
        self.total_missionaries = total;
        self
    }

    pub fn district(mut self, district: DistrictSummary) -> Self {
        self.districts.push(district);
        self
    }

    pub fn build(self) -> Result<BranchSummary, DatasetBuildError> {
        let district_sum: i64 = self.districts.iter().map(|d| d.missionaries_count).sum();
        if district_sum != self.total_missionaries {
            return Err(DatasetBuildError::InvalidTotalMissionaries {
                total: self.total_missionaries,
                district_sum,
            });
        }
        Ok(BranchSummary {
            branch_id: self.branch_id,
            generation_date: self.generation_date,
            total_missionaries: self.total_missionaries,
            districts: self.districts,
        })
    }
}

/// One metric row of the per-district KPI dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistrictKpi {
    pub branch_id: i32,
    pub district: String,
    pub metric: String,
    pub value: f64,
    pub unit: String,
}

/// Consolidated arrival entry: one row per `(arrival_date, district)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpcomingArrival {
    pub district: String,
    pub branch_id: i32,
    pub arrival_date: NaiveDate,
    pub departure_date: Option<NaiveDate>,
    pub missionaries_count: i64,
    pub duration_weeks: i32,
}

/// Birthday entry for the notification window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpcomingBirthday {
    pub missionary_id: i32,
    pub branch_id: i32,
    pub district: Option<String>,
    pub treatment: Option<String>,
    pub name: String,
    pub birthday: NaiveDate,
    pub age_turning: Option<i32>,
    pub mission_email: Option<String>,
    pub personal_email: Option<String>,
    pub three_weeks: bool,
}
