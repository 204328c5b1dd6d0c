//! Generation sync: spreadsheets in the generation folder → relational store.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use shared_types::{DatasetInvalidated, FileReport, SyncIssue, SyncReport};
use thiserror::Error;

use crate::drive::{ObjectStore, EXCEL_MIME_TYPES};
use crate::error::codes;
use crate::events::EventBus;
use crate::parser::row_mapper::{self, Cell};
use crate::retry::{retry, RetryPolicy};

pub mod excel;
pub mod records;
pub mod state;

use records::RecordStore;
use state::{SyncState, SyncStateStore};

/// Records are committed in transactions of this size.
pub const BATCH_SIZE: usize = 50;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a sync for generation {0} is already running")]
    InProgress(String),
}

type SheetParser = fn(&[u8]) -> Result<Vec<Vec<Cell>>, String>;

pub struct SyncEngine {
    store: Arc<dyn ObjectStore>,
    records: Arc<dyn RecordStore>,
    state: SyncStateStore,
    bus: Arc<EventBus>,
    branch_id: i32,
    retry: RetryPolicy,
    in_flight: Mutex<HashSet<String>>,
    parse_sheet: SheetParser,
}

/// Releases the per-generation exclusivity slot when a run ends.
struct InFlightGuard<'a> {
    engine: &'a SyncEngine,
    generation: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.engine
            .in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .remove(&self.generation);
    }
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        records: Arc<dyn RecordStore>,
        state: SyncStateStore,
        bus: Arc<EventBus>,
        branch_id: i32,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            records,
            state,
            bus,
            branch_id,
            retry,
            in_flight: Mutex::new(HashSet::new()),
            parse_sheet: excel::read_first_worksheet,
        }
    }

    #[cfg(test)]
    fn with_parser(mut self, parser: SheetParser) -> Self {
        self.parse_sheet = parser;
        self
    }

    fn begin(&self, generation_date: &str) -> Result<InFlightGuard<'_>, SyncError> {
        let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
        if !in_flight.insert(generation_date.to_string()) {
            return Err(SyncError::InProgress(generation_date.to_string()));
        }
        Ok(InFlightGuard {
            engine: self,
            generation: generation_date.to_string(),
        })
    }

    /// Sync every spreadsheet of a generation folder into the store.
    ///
    /// At most one run per generation date at a time. Transport and data
    /// failures end the run early with a persisted continuation token; the
    /// next call resumes at the failed file.
    pub async fn sync_generation(
        &self,
        generation_date: &str,
        folder_id: &str,
        force: bool,
    ) -> Result<SyncReport, SyncError> {
        let _guard = self.begin(generation_date)?;

        let started = Instant::now();
        let mut report = SyncReport::new(generation_date, folder_id);

        tracing::info!(
            generation_date,
            folder_id,
            force,
            "generation sync started"
        );

        if force {
            if let Err(error) = self.state.clear(generation_date) {
                tracing::warn!(generation_date, error = %error, "could not discard prior state");
            }
        }
        let prior = if force {
            SyncState::default()
        } else {
            self.state.load(generation_date)
        };

        let listing = retry(&self.retry, "list_generation_folder", || {
            self.store.list_folder_files(folder_id, Some(EXCEL_MIME_TYPES))
        })
        .await;

        let mut files = match listing {
            Ok(files) => files,
            Err(error) => {
                tracing::error!(
                    generation_date,
                    folder_id,
                    error_code = codes::DRIVE_LISTING_FAILED,
                    error = %error,
                    "folder listing failed"
                );
                report.errors.push(SyncIssue {
                    code: codes::DRIVE_LISTING_FAILED.to_string(),
                    message: error.to_string(),
                    file_id: None,
                });
                report.continuation_token = prior
                    .continuation_token
                    .clone()
                    .or(prior.last_processed_file_id.clone());
                report.duration_seconds = started.elapsed().as_secs_f64();
                return Ok(report);
            }
        };

        // Provider order is arbitrary; name order makes resumption
        // deterministic.
        files.sort_by(|a, b| a.name.cmp(&b.name));

        let mut resume_at = prior.continuation_token.clone();
        let mut skip_through = if resume_at.is_none() {
            prior.last_processed_file_id.clone()
        } else {
            None
        };

        let mut last_done = prior.last_processed_file_id.clone();
        let mut interrupted = false;

        for file in &files {
            if let Some(token) = &resume_at {
                if &file.id != token {
                    continue;
                }
                // Reprocess the file the previous run failed on.
                resume_at = None;
            } else if let Some(done) = &skip_through {
                if &file.id == done {
                    skip_through = None;
                }
                continue;
            }

            tracing::info!(
                generation_date,
                file_id = %file.id,
                file_name = %file.name,
                "downloading generation spreadsheet"
            );

            let bytes = match retry(&self.retry, "download_spreadsheet", || {
                self.store.download_file(&file.id)
            })
            .await
            {
                Ok(bytes) => bytes,
                Err(error) => {
                    tracing::error!(
                        generation_date,
                        file_id = %file.id,
                        error_code = codes::DRIVE_DOWNLOAD_FAILED,
                        error = %error,
                        "spreadsheet download failed"
                    );
                    report.errors.push(SyncIssue {
                        code: codes::DRIVE_DOWNLOAD_FAILED.to_string(),
                        message: error.to_string(),
                        file_id: Some(file.id.clone()),
                    });
                    self.persist_interruption(generation_date, last_done.clone(), &file.id);
                    report.continuation_token = Some(file.id.clone());
                    interrupted = true;
                    break;
                }
            };

            let rows = match (self.parse_sheet)(&bytes) {
                Ok(rows) => rows,
                Err(message) => {
                    tracing::error!(
                        generation_date,
                        file_id = %file.id,
                        error_code = codes::EXCEL_READ_FAILED,
                        error = %message,
                        "spreadsheet unreadable, skipping"
                    );
                    report.errors.push(SyncIssue {
                        code: codes::EXCEL_READ_FAILED.to_string(),
                        message,
                        file_id: Some(file.id.clone()),
                    });
                    self.mark_file_done(generation_date, &file.id);
                    last_done = Some(file.id.clone());
                    continue;
                }
            };

            // First worksheet row is the header.
            let data_rows = if rows.len() > 1 { &rows[1..] } else { &[] };
            let (mapped, row_errors) = row_mapper::map_rows(data_rows, Utc::now());
            for row_error in &row_errors {
                tracing::warn!(
                    generation_date,
                    file_id = %file.id,
                    row_index = row_error.row_index,
                    codes = ?row_error.codes,
                    "row dropped or degraded during mapping"
                );
            }

            let mut file_report = FileReport {
                file_id: file.id.clone(),
                file_name: file.name.clone(),
                rows_total: mapped.len(),
                inserted: 0,
                skipped: 0,
            };

            let mut batch_failed = false;
            for batch in mapped.chunks(BATCH_SIZE) {
                match self.records.insert_batch(batch).await {
                    Ok(outcome) => {
                        file_report.inserted += outcome.inserted;
                        file_report.skipped += outcome.skipped;
                    }
                    Err(error) => {
                        tracing::error!(
                            generation_date,
                            file_id = %file.id,
                            error_code = error.code(),
                            error = %error,
                            "batch insert failed, sync interrupted"
                        );
                        report.errors.push(SyncIssue {
                            code: error.code().to_string(),
                            message: error.to_string(),
                            file_id: Some(file.id.clone()),
                        });
                        self.persist_interruption(generation_date, last_done.clone(), &file.id);
                        report.continuation_token = Some(file.id.clone());
                        batch_failed = true;
                        break;
                    }
                }
            }

            report.inserted_count += file_report.inserted;
            report.skipped_count += file_report.skipped;
            report.processed_files.push(file_report);

            if batch_failed {
                interrupted = true;
                break;
            }

            tracing::info!(
                generation_date,
                file_id = %file.id,
                file_name = %file.name,
                inserted = report.processed_files.last().map(|f| f.inserted).unwrap_or(0),
                skipped = report.processed_files.last().map(|f| f.skipped).unwrap_or(0),
                "spreadsheet processed"
            );
            self.mark_file_done(generation_date, &file.id);
            last_done = Some(file.id.clone());
        }

        if !interrupted {
            if let Err(error) = self.state.clear(generation_date) {
                tracing::warn!(generation_date, error = %error, "could not clear sync state");
            }
            self.bus
                .publish(DatasetInvalidated {
                    generation_date: generation_date.to_string(),
                    branch_id: self.branch_id,
                })
                .await;
        }

        report.duration_seconds = started.elapsed().as_secs_f64();

        tracing::info!(
            generation_date,
            inserted = report.inserted_count,
            skipped = report.skipped_count,
            duration_seconds = report.duration_seconds,
            continuation_token = report.continuation_token.as_deref().unwrap_or(""),
            "generation sync finished"
        );

        Ok(report)
    }

    fn mark_file_done(&self, generation_date: &str, file_id: &str) {
        let result = self.state.save(
            generation_date,
            SyncState {
                last_processed_file_id: Some(file_id.to_string()),
                continuation_token: None,
                updated_at: None,
            },
        );
        if let Err(error) = result {
            // Resume degrades to a full re-run; dedup keeps that harmless.
            tracing::warn!(generation_date, file_id, error = %error, "could not persist sync state");
        }
    }

    fn persist_interruption(
        &self,
        generation_date: &str,
        last_done: Option<String>,
        file_id: &str,
    ) {
        let result = self.state.save(
            generation_date,
            SyncState {
                last_processed_file_id: last_done,
                continuation_token: Some(file_id.to_string()),
                updated_at: None,
            },
        );
        if let Err(error) = result {
            tracing::warn!(generation_date, file_id, error = %error, "could not persist continuation token");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::records::testing::MemoryRecordStore;
    use super::*;
    use crate::drive::testing::MemoryStore;

    const GENERATION: &str = "20250110";
    const FOLDER: &str = "folder-1";
    const XLSX_MIME: &str = EXCEL_MIME_TYPES[0];

    /// Test sheets encode ids as a comma-separated list; the parser expands
    /// them into header + positional rows.
    fn parse_id_list(bytes: &[u8]) -> Result<Vec<Vec<Cell>>, String> {
        let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
        if text == "corrupt" {
            return Err("workbook open failed".to_string());
        }
        let mut rows = vec![vec![
            Cell::Text("ID".to_string()),
            Cell::Text("Distrito".to_string()),
        ]];
        for part in text.split(',').filter(|p| !p.is_empty()) {
            let id: i32 = part.trim().parse().map_err(|_| "bad id".to_string())?;
            let mut row = vec![Cell::Number(id as f64)];
            row.extend(vec![Cell::Empty; 8]);
            row.push(Cell::Text(format!("Misionero {id}")));
            rows.push(row);
        }
        Ok(rows)
    }

    fn id_list(range: std::ops::RangeInclusive<i32>) -> Vec<u8> {
        range
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",")
            .into_bytes()
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        records: Arc<MemoryRecordStore>,
        bus: Arc<EventBus>,
        engine: SyncEngine,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        let bus = Arc::new(EventBus::new());
        let engine = SyncEngine::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            Arc::clone(&records) as Arc<dyn RecordStore>,
            SyncStateStore::new(dir.path().join("sync_state.json")),
            Arc::clone(&bus),
            14,
            RetryPolicy::immediate(),
        )
        .with_parser(parse_id_list);

        Fixture {
            store,
            records,
            bus,
            engine,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn inserts_every_unique_id_and_publishes_invalidation() {
        let f = fixture();
        f.store
            .seed_file(FOLDER, "file-1", "a_listado.xlsx", id_list(1..=5), XLSX_MIME);

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            f.bus.subscribe("recorder", move |event| {
                let seen = Arc::clone(&seen);
                Box::pin(async move {
                    seen.lock().unwrap().push(event);
                    Ok(())
                })
            });
        }

        let report = f
            .engine
            .sync_generation(GENERATION, FOLDER, false)
            .await
            .unwrap();

        assert_eq!(report.inserted_count, 5);
        assert_eq!(report.skipped_count, 0);
        assert!(report.errors.is_empty());
        assert!(report.continuation_token.is_none());
        assert_eq!(report.processed_files.len(), 1);
        assert_eq!(f.records.ids(), vec![1, 2, 3, 4, 5]);

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].generation_date, GENERATION);
        assert_eq!(events[0].branch_id, 14);
    }

    #[tokio::test]
    async fn known_ids_are_skipped_not_updated() {
        let f = fixture();
        // Five of the 45 incoming ids already live in the store.
        let (pre_seeded, _) = row_mapper::map_rows(&parse_id_list(&id_list(1..=5)).unwrap()[1..], Utc::now());
        f.records.insert_batch(&pre_seeded).await.unwrap();
        let before: Vec<_> = pre_seeded.iter().map(|r| r.created_at).collect();

        f.store
            .seed_file(FOLDER, "file-1", "b.xlsx", id_list(1..=45), XLSX_MIME);
        let report = f
            .engine
            .sync_generation(GENERATION, FOLDER, false)
            .await
            .unwrap();

        assert_eq!(report.inserted_count, 40);
        assert_eq!(report.skipped_count, 5);
        assert_eq!(f.records.ids().len(), 45);

        // The five pre-existing rows were not touched.
        let rows = f.records.rows.lock().unwrap();
        for (record, created_at) in pre_seeded.iter().zip(before) {
            assert_eq!(rows[&record.id].created_at, created_at);
        }
    }

    #[tokio::test]
    async fn batches_commit_in_chunks_of_fifty() {
        let f = fixture();
        f.store
            .seed_file(FOLDER, "file-1", "a.xlsx", id_list(1..=123), XLSX_MIME);

        f.engine
            .sync_generation(GENERATION, FOLDER, false)
            .await
            .unwrap();

        assert_eq!(*f.records.batch_sizes.lock().unwrap(), vec![50, 50, 23]);
    }

    #[tokio::test]
    async fn interrupted_sync_resumes_at_the_failed_file() {
        let f = fixture();
        f.store
            .seed_file(FOLDER, "file-1", "a.xlsx", id_list(1..=60), XLSX_MIME);
        f.store
            .seed_file(FOLDER, "file-2", "b.xlsx", id_list(61..=120), XLSX_MIME);
        f.store
            .seed_file(FOLDER, "file-3", "c.xlsx", id_list(121..=180), XLSX_MIME);
        // Calls: file-1 commits batches 1-2; file-2's second batch is call 4.
        *f.records.fail_on_call.lock().unwrap() = Some(4);

        let report = f
            .engine
            .sync_generation(GENERATION, FOLDER, false)
            .await
            .unwrap();

        assert_eq!(report.continuation_token.as_deref(), Some("file-2"));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].code, codes::DB_INSERT_FAILED);
        assert_eq!(f.records.ids().len(), 60 + 50);

        // The rerun reprocesses file-2 (dedup absorbs its first batch) and
        // finishes the folder.
        *f.records.fail_on_call.lock().unwrap() = None;
        let report = f
            .engine
            .sync_generation(GENERATION, FOLDER, false)
            .await
            .unwrap();

        assert!(report.continuation_token.is_none());
        assert_eq!(report.inserted_count, 70);
        assert_eq!(report.skipped_count, 50);
        assert_eq!(f.records.ids().len(), 180);

        // Dedup invariant: one row per id across both runs.
        let ids = f.records.ids();
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[tokio::test]
    async fn download_failure_persists_a_continuation_token() {
        let f = fixture();
        f.store
            .seed_file(FOLDER, "file-1", "a.xlsx", id_list(1..=3), XLSX_MIME);
        f.store
            .seed_file(FOLDER, "file-2", "b.xlsx", id_list(4..=6), XLSX_MIME);
        f.store
            .fail_downloads
            .lock()
            .unwrap()
            .insert("file-2".to_string());

        let report = f
            .engine
            .sync_generation(GENERATION, FOLDER, false)
            .await
            .unwrap();

        assert_eq!(report.inserted_count, 3);
        assert_eq!(report.errors[0].code, codes::DRIVE_DOWNLOAD_FAILED);
        assert_eq!(report.continuation_token.as_deref(), Some("file-2"));

        f.store.fail_downloads.lock().unwrap().clear();
        let report = f
            .engine
            .sync_generation(GENERATION, FOLDER, false)
            .await
            .unwrap();
        assert_eq!(report.inserted_count, 3);
        assert_eq!(f.records.ids().len(), 6);
    }

    #[tokio::test]
    async fn listing_failure_is_surfaced_without_losing_state() {
        let f = fixture();
        *f.store.fail_listing.lock().unwrap() = true;

        let report = f
            .engine
            .sync_generation(GENERATION, FOLDER, false)
            .await
            .unwrap();

        assert_eq!(report.errors[0].code, codes::DRIVE_LISTING_FAILED);
        assert_eq!(report.inserted_count, 0);
    }

    #[tokio::test]
    async fn unreadable_spreadsheets_are_reported_and_skipped() {
        let f = fixture();
        f.store
            .seed_file(FOLDER, "file-1", "a.xlsx", b"corrupt".to_vec(), XLSX_MIME);
        f.store
            .seed_file(FOLDER, "file-2", "b.xlsx", id_list(1..=2), XLSX_MIME);

        let report = f
            .engine
            .sync_generation(GENERATION, FOLDER, false)
            .await
            .unwrap();

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].code, codes::EXCEL_READ_FAILED);
        assert_eq!(report.inserted_count, 2);
        assert!(report.continuation_token.is_none());
    }

    #[tokio::test]
    async fn force_discards_prior_progress() {
        let f = fixture();
        f.store
            .seed_file(FOLDER, "file-1", "a.xlsx", id_list(1..=5), XLSX_MIME);
        f.engine
            .sync_generation(GENERATION, FOLDER, false)
            .await
            .unwrap();

        // Without force a completed folder has nothing new to do; with force
        // every file is revisited and dedup does the skipping.
        let report = f
            .engine
            .sync_generation(GENERATION, FOLDER, true)
            .await
            .unwrap();
        assert_eq!(report.inserted_count, 0);
        assert_eq!(report.skipped_count, 5);
    }

    #[tokio::test]
    async fn concurrent_runs_for_one_generation_are_rejected() {
        let f = fixture();
        let _guard = f.engine.begin(GENERATION).unwrap();

        let result = f.engine.sync_generation(GENERATION, FOLDER, false).await;
        assert!(matches!(result, Err(SyncError::InProgress(_))));

        // A different generation is unaffected.
        assert!(f.engine.begin("20250117").is_ok());
    }
}
