//! Dataset pipelines over the synced records.
//!
//! Every pipeline walks the same template: load rows, validate, transform
//! into its DTOs, serialize. Implementations are tagged variants behind one
//! trait; no hierarchy deeper than that.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde_json::Value;
use shared_types::{
    BranchSummaryBuilder, DatasetBuildError, DistrictKpi, DistrictSummary, MissionaryRecord,
    UpcomingArrival, UpcomingBirthday,
};
use thiserror::Error;

use super::repository::{ReportDataRepository, RepositoryError};

pub const BRANCH_SUMMARY: &str = "branch_summary";
pub const DISTRICT_KPIS: &str = "district_kpis";
pub const UPCOMING_ARRIVALS: &str = "upcoming_arrivals";
pub const UPCOMING_BIRTHDAYS: &str = "upcoming_birthdays";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{message}")]
    Validation { code: String, message: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<DatasetBuildError> for PipelineError {
    fn from(err: DatasetBuildError) -> Self {
        PipelineError::Validation {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Everything a pipeline run needs to know about its scope.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub branch_id: i32,
    pub allowed_branches: Vec<i32>,
    pub generation_date: String,
    pub generation: NaiveDate,
    pub today: NaiveDate,
    pub days_ahead: i64,
}

/// The shared step surface: `load → validate → transform` (serialization is
/// the caller's concern once a JSON value comes back).
#[async_trait]
pub trait DatasetPipeline: Send + Sync {
    fn dataset_id(&self) -> &'static str;

    async fn load(
        &self,
        repository: &dyn ReportDataRepository,
        ctx: &PipelineContext,
    ) -> Result<Vec<MissionaryRecord>, RepositoryError>;

    fn validate(
        &self,
        _rows: &[MissionaryRecord],
        _ctx: &PipelineContext,
    ) -> Result<(), PipelineError> {
        Ok(())
    }

    fn transform(
        &self,
        rows: Vec<MissionaryRecord>,
        ctx: &PipelineContext,
    ) -> Result<(Value, usize), PipelineError>;
}

/// Resolve a dataset id to its pipeline variant.
pub fn pipeline_for(dataset_id: &str) -> Option<Box<dyn DatasetPipeline>> {
    match dataset_id {
        BRANCH_SUMMARY => Some(Box::new(BranchSummaryPipeline)),
        DISTRICT_KPIS => Some(Box::new(DistrictKpiPipeline)),
        UPCOMING_ARRIVALS => Some(Box::new(UpcomingArrivalsPipeline)),
        UPCOMING_BIRTHDAYS => Some(Box::new(UpcomingBirthdaysPipeline)),
        _ => None,
    }
}

fn district_of(record: &MissionaryRecord) -> String {
    record.district.clone().unwrap_or_default()
}

pub struct BranchSummaryPipeline;

#[async_trait]
impl DatasetPipeline for BranchSummaryPipeline {
    fn dataset_id(&self) -> &'static str {
        BRANCH_SUMMARY
    }

    async fn load(
        &self,
        repository: &dyn ReportDataRepository,
        ctx: &PipelineContext,
    ) -> Result<Vec<MissionaryRecord>, RepositoryError> {
        repository
            .generation_rows(&ctx.allowed_branches, ctx.generation)
            .await
    }

    fn transform(
        &self,
        rows: Vec<MissionaryRecord>,
        ctx: &PipelineContext,
    ) -> Result<(Value, usize), PipelineError> {
        struct DistrictAcc {
            count: i64,
            first_arrival: Option<NaiveDate>,
            last_departure: Option<NaiveDate>,
        }

        let mut branches: BTreeMap<i32, BTreeMap<String, DistrictAcc>> = BTreeMap::new();
        for record in &rows {
            let Some(branch) = record.branch else { continue };
            let acc = branches
                .entry(branch)
                .or_default()
                .entry(district_of(record))
                .or_insert(DistrictAcc {
                    count: 0,
                    first_arrival: None,
                    last_departure: None,
                });
            acc.count += 1;
            if let Some(arrival) = record.arrival {
                acc.first_arrival = Some(acc.first_arrival.map_or(arrival, |d| d.min(arrival)));
            }
            if let Some(departure) = record.departure {
                acc.last_departure =
                    Some(acc.last_departure.map_or(departure, |d| d.max(departure)));
            }
        }

        let mut summaries = Vec::new();
        for (branch, districts) in branches {
            let total: i64 = districts.values().map(|d| d.count).sum();
            let mut builder =
                BranchSummaryBuilder::new(branch, ctx.generation_date.clone()).total_missionaries(total);
            for (district, acc) in districts {
                builder = builder.district(DistrictSummary {
                    district,
                    missionaries_count: acc.count,
                    first_arrival: acc.first_arrival,
                    last_departure: acc.last_departure,
                });
            }
            summaries.push(builder.build()?);
        }

        let count = summaries.len();
        Ok((serde_json::to_value(summaries).expect("serializable"), count))
    }
}

pub struct DistrictKpiPipeline;

#[async_trait]
impl DatasetPipeline for DistrictKpiPipeline {
    fn dataset_id(&self) -> &'static str {
        DISTRICT_KPIS
    }

    async fn load(
        &self,
        repository: &dyn ReportDataRepository,
        ctx: &PipelineContext,
    ) -> Result<Vec<MissionaryRecord>, RepositoryError> {
        repository
            .generation_rows(&[ctx.branch_id], ctx.generation)
            .await
    }

    fn transform(
        &self,
        rows: Vec<MissionaryRecord>,
        ctx: &PipelineContext,
    ) -> Result<(Value, usize), PipelineError> {
        #[derive(Default)]
        struct Counts {
            total: i64,
            three_weeks: i64,
            endowed: i64,
            passport: i64,
        }

        let mut districts: BTreeMap<String, Counts> = BTreeMap::new();
        for record in &rows {
            let counts = districts.entry(district_of(record)).or_default();
            counts.total += 1;
            if record.three_weeks {
                counts.three_weeks += 1;
            }
            if record.endowed {
                counts.endowed += 1;
            }
            if record.passport {
                counts.passport += 1;
            }
        }

        let mut kpis = Vec::new();
        for (district, counts) in districts {
            for (metric, value) in [
                ("total_missionaries", counts.total),
                ("three_week_program", counts.three_weeks),
                ("endowed", counts.endowed),
                ("with_passport", counts.passport),
            ] {
                kpis.push(DistrictKpi {
                    branch_id: ctx.branch_id,
                    district: district.clone(),
                    metric: metric.to_string(),
                    value: value as f64,
                    unit: "missionaries".to_string(),
                });
            }
        }

        let count = kpis.len();
        Ok((serde_json::to_value(kpis).expect("serializable"), count))
    }
}

pub struct UpcomingArrivalsPipeline;

#[async_trait]
impl DatasetPipeline for UpcomingArrivalsPipeline {
    fn dataset_id(&self) -> &'static str {
        UPCOMING_ARRIVALS
    }

    async fn load(
        &self,
        repository: &dyn ReportDataRepository,
        ctx: &PipelineContext,
    ) -> Result<Vec<MissionaryRecord>, RepositoryError> {
        let until = ctx.today + chrono::Duration::days(ctx.days_ahead);
        repository
            .arrivals_between(ctx.branch_id, ctx.today, until)
            .await
    }

    fn transform(
        &self,
        rows: Vec<MissionaryRecord>,
        ctx: &PipelineContext,
    ) -> Result<(Value, usize), PipelineError> {
        struct ArrivalAcc {
            count: i64,
            departure: Option<NaiveDate>,
            three_weeks: bool,
        }

        // Rows sharing (date, district) consolidate into one entry; the
        // BTreeMap keeps date-then-district ordering.
        let mut groups: BTreeMap<(NaiveDate, String), ArrivalAcc> = BTreeMap::new();
        for record in &rows {
            let Some(arrival) = record.arrival else { continue };
            let acc = groups
                .entry((arrival, district_of(record)))
                .or_insert(ArrivalAcc {
                    count: 0,
                    departure: None,
                    three_weeks: false,
                });
            acc.count += 1;
            acc.three_weeks |= record.three_weeks;
            if let Some(departure) = record.departure {
                acc.departure = Some(acc.departure.map_or(departure, |d| d.max(departure)));
            }
        }

        let arrivals: Vec<UpcomingArrival> = groups
            .into_iter()
            .map(|((arrival_date, district), acc)| UpcomingArrival {
                district,
                branch_id: ctx.branch_id,
                arrival_date,
                departure_date: acc.departure,
                missionaries_count: acc.count,
                duration_weeks: if acc.three_weeks { 3 } else { 6 },
            })
            .collect();

        let count = arrivals.len();
        Ok((serde_json::to_value(arrivals).expect("serializable"), count))
    }
}

pub struct UpcomingBirthdaysPipeline;

/// Next occurrence of a birth date strictly after `today`; February 29 is
/// observed on the 28th in non-leap years.
fn next_birthday(birth: NaiveDate, today: NaiveDate) -> NaiveDate {
    let observed = |year: i32| {
        NaiveDate::from_ymd_opt(year, birth.month(), birth.day())
            .or_else(|| NaiveDate::from_ymd_opt(year, 2, 28))
            .expect("february 28 always exists")
    };

    let this_year = observed(today.year());
    if this_year > today {
        this_year
    } else {
        observed(today.year() + 1)
    }
}

#[async_trait]
impl DatasetPipeline for UpcomingBirthdaysPipeline {
    fn dataset_id(&self) -> &'static str {
        UPCOMING_BIRTHDAYS
    }

    async fn load(
        &self,
        repository: &dyn ReportDataRepository,
        ctx: &PipelineContext,
    ) -> Result<Vec<MissionaryRecord>, RepositoryError> {
        repository.birthday_candidates(ctx.branch_id).await
    }

    fn transform(
        &self,
        rows: Vec<MissionaryRecord>,
        ctx: &PipelineContext,
    ) -> Result<(Value, usize), PipelineError> {
        let until = ctx.today + chrono::Duration::days(ctx.days_ahead);

        let mut birthdays: Vec<UpcomingBirthday> = rows
            .iter()
            .filter(|record| record.active)
            .filter_map(|record| {
                let birth = record.birth_date?;
                let upcoming = next_birthday(birth, ctx.today);
                if upcoming > until {
                    return None;
                }
                Some(UpcomingBirthday {
                    missionary_id: record.id,
                    branch_id: ctx.branch_id,
                    district: record.district.clone(),
                    treatment: record.treatment.clone(),
                    name: record.name.clone(),
                    birthday: upcoming,
                    age_turning: Some(upcoming.year() - birth.year()),
                    mission_email: record.mission_email.clone(),
                    personal_email: record.personal_email.clone(),
                    three_weeks: record.three_weeks,
                })
            })
            .collect();

        // Month, then day, then a stable within-day order by treatment and
        // name.
        birthdays.sort_by(|a, b| {
            (a.birthday.month(), a.birthday.day(), &a.treatment, &a.name).cmp(&(
                b.birthday.month(),
                b.birthday.day(),
                &b.treatment,
                &b.name,
            ))
        });

        let count = birthdays.len();
        Ok((serde_json::to_value(birthdays).expect("serializable"), count))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{context, record, MemoryRepository};
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn branch_summary_groups_by_district_with_consistent_totals() {
        let ctx = context();
        let mut rows = vec![
            record(1, 14, "District 10A"),
            record(2, 14, "District 10A"),
            record(3, 14, "District 10B"),
        ];
        for (i, row) in rows.iter_mut().enumerate() {
            row.generation = Some(ctx.generation);
            row.arrival = Some(date(2025, 1, 10 + i as u32));
            row.departure = Some(date(2025, 2, 21 + i as u32));
        }
        let repository = MemoryRepository::new(rows);

        let pipeline = BranchSummaryPipeline;
        let loaded = pipeline.load(&repository, &ctx).await.unwrap();
        pipeline.validate(&loaded, &ctx).unwrap();
        let (value, count) = pipeline.transform(loaded, &ctx).unwrap();

        assert_eq!(count, 1);
        let summaries = value.as_array().unwrap();
        let summary = &summaries[0];
        assert_eq!(summary["branch_id"], 14);
        assert_eq!(summary["total_missionaries"], 3);

        let districts = summary["districts"].as_array().unwrap();
        assert_eq!(districts.len(), 2);
        assert_eq!(districts[0]["district"], "District 10A");
        assert_eq!(districts[0]["missionaries_count"], 2);
        assert_eq!(districts[0]["first_arrival"], "2025-01-10");
        assert_eq!(districts[0]["last_departure"], "2025-02-22");
    }

    #[tokio::test]
    async fn arrivals_consolidate_date_district_pairs_in_order() {
        let ctx = context();
        let mut a = record(1, 14, "District 10B");
        a.arrival = Some(date(2025, 1, 10));
        a.departure = Some(date(2025, 2, 21));
        let mut b = record(2, 14, "District 10B");
        b.arrival = Some(date(2025, 1, 10));
        b.departure = Some(date(2025, 2, 28));
        b.three_weeks = true;
        let mut c = record(3, 14, "District 10A");
        c.arrival = Some(date(2025, 1, 8));
        let mut outside = record(4, 14, "District 10C");
        outside.arrival = Some(date(2025, 6, 1));

        let repository = MemoryRepository::new(vec![a, b, c, outside]);
        let pipeline = UpcomingArrivalsPipeline;
        let loaded = pipeline.load(&repository, &ctx).await.unwrap();
        let (value, count) = pipeline.transform(loaded, &ctx).unwrap();

        assert_eq!(count, 2);
        let arrivals = value.as_array().unwrap();
        // Date ascending, then district ascending.
        assert_eq!(arrivals[0]["district"], "District 10A");
        assert_eq!(arrivals[0]["arrival_date"], "2025-01-08");
        assert_eq!(arrivals[1]["district"], "District 10B");
        assert_eq!(arrivals[1]["missionaries_count"], 2);
        assert_eq!(arrivals[1]["departure_date"], "2025-02-28");
        assert_eq!(arrivals[1]["duration_weeks"], 3);
    }

    #[tokio::test]
    async fn birthdays_keep_window_and_stable_order() {
        let ctx = context();
        let mut near = record(1, 14, "District 10A");
        near.birth_date = Some(date(2004, 1, 20));
        near.treatment = Some("Elder".to_string());
        let mut same_day = record(2, 14, "District 10A");
        same_day.birth_date = Some(date(2003, 1, 20));
        same_day.treatment = Some("Hermana".to_string());
        let mut far = record(3, 14, "District 10B");
        far.birth_date = Some(date(2004, 8, 1));
        let mut inactive = record(4, 14, "District 10B");
        inactive.birth_date = Some(date(2004, 1, 25));
        inactive.active = false;

        let repository = MemoryRepository::new(vec![far, same_day, near, inactive]);
        let pipeline = UpcomingBirthdaysPipeline;
        let loaded = pipeline.load(&repository, &ctx).await.unwrap();
        let (value, count) = pipeline.transform(loaded, &ctx).unwrap();

        assert_eq!(count, 2);
        let birthdays = value.as_array().unwrap();
        assert_eq!(birthdays[0]["treatment"], "Elder");
        assert_eq!(birthdays[0]["age_turning"], 21);
        assert_eq!(birthdays[1]["treatment"], "Hermana");
    }

    #[test]
    fn leap_day_birthdays_are_observed_on_the_28th() {
        let birth = date(2004, 2, 29);
        assert_eq!(next_birthday(birth, date(2025, 1, 3)), date(2025, 2, 28));
        assert_eq!(next_birthday(birth, date(2024, 1, 3)), date(2024, 2, 29));
    }

    #[tokio::test]
    async fn kpis_cover_every_district_metric() {
        let ctx = context();
        let mut rows = vec![
            record(1, 14, "District 10A"),
            record(2, 14, "District 10A"),
            record(3, 14, "District 10B"),
        ];
        for row in &mut rows {
            row.generation = Some(ctx.generation);
        }
        rows[0].three_weeks = true;
        rows[2].endowed = true;

        let repository = MemoryRepository::new(rows);
        let pipeline = DistrictKpiPipeline;
        let loaded = pipeline.load(&repository, &ctx).await.unwrap();
        let (value, count) = pipeline.transform(loaded, &ctx).unwrap();

        assert_eq!(count, 8);
        let kpis = value.as_array().unwrap();
        assert_eq!(kpis[0]["district"], "District 10A");
        assert_eq!(kpis[0]["metric"], "total_missionaries");
        assert_eq!(kpis[0]["value"], 2.0);
    }

    #[test]
    fn unknown_dataset_ids_resolve_to_nothing() {
        assert!(pipeline_for("branch_summary").is_some());
        assert!(pipeline_for("nope").is_none());
    }
}
