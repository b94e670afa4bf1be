//! Batch orchestration
//!
//! This module drives discovery → read → aggregate across every subject of a
//! corpus and assembles the corpus-wide feature table. Subjects are processed
//! independently; a subject whose file is unreadable or malformed is recorded
//! as a failure and never aborts its siblings.

use crate::aggregator::DailyFeatureAggregator;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::reader::{ParquetSeriesReader, SeriesReader};
use crate::scanner::{SubjectCorpusScanner, SubjectPartition};
use crate::types::{DailyAggregate, FailureKind, FeatureCorpus, SubjectFailure, SubjectId};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Execution options for a batch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOptions {
    /// Worker threads. `1` runs sequentially, `0` uses the rayon default.
    pub workers: usize,
}

/// Shared flag used to stop scheduling new subjects.
///
/// Subjects already in flight run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of processing a single subject
#[derive(Debug, Clone, PartialEq)]
pub enum SubjectOutcome {
    Processed {
        subject_id: SubjectId,
        rows: Vec<DailyAggregate>,
    },
    Failed(SubjectFailure),
    Cancelled(SubjectId),
}

/// Summary of a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub base_dir: PathBuf,
    pub subjects_discovered: usize,
    /// Subjects that contributed at least one daily row
    pub subjects_processed: usize,
    /// Subjects read successfully but with no worn sample
    pub subjects_without_wear: Vec<SubjectId>,
    pub failures: Vec<SubjectFailure>,
    pub cancelled: Vec<SubjectId>,
    /// Daily rows in the corpus
    pub rows: usize,
}

impl BatchReport {
    /// Subjects that were skipped because they failed or were never scheduled
    pub fn skipped_subjects(&self) -> Vec<SubjectId> {
        self.failures
            .iter()
            .map(|f| f.subject_id.clone())
            .chain(self.cancelled.iter().cloned())
            .collect()
    }

    pub fn skipped_count(&self) -> usize {
        self.failures.len() + self.cancelled.len()
    }
}

/// Corpus produced by a batch run together with its report
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub corpus: FeatureCorpus,
    pub report: BatchReport,
}

/// Builds the corpus-wide feature table for one run.
///
/// Construct one per run; nothing is cached between calls to [`build`].
///
/// [`build`]: BatchFeatureBuilder::build
pub struct BatchFeatureBuilder<R: SeriesReader = ParquetSeriesReader> {
    scanner: SubjectCorpusScanner,
    reader: R,
    aggregator: DailyFeatureAggregator,
    options: BatchOptions,
    cancellation: CancellationToken,
}

impl BatchFeatureBuilder<ParquetSeriesReader> {
    /// Create a builder reading Parquet series as described by `config`
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            SubjectCorpusScanner::new(&config.base_dir, config.layout.clone()),
            ParquetSeriesReader::new(),
        )
        .with_options(BatchOptions {
            workers: config.workers,
        })
    }
}

impl<R: SeriesReader> BatchFeatureBuilder<R> {
    pub fn new(scanner: SubjectCorpusScanner, reader: R) -> Self {
        Self {
            scanner,
            reader,
            aggregator: DailyFeatureAggregator::new(),
            options: BatchOptions::default(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: BatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Token that stops scheduling of further subjects when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Run the batch.
    ///
    /// Fails with `NotFoundError` if the base directory is missing, with
    /// `ScanError` on duplicate subjects, and with `EmptyCorpusError` if no
    /// subject produced a row. Per-subject failures are reported, not raised.
    pub fn build(&self) -> Result<BatchOutcome, PipelineError> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        let partitions = self.scanner.discover()?;

        tracing::info!(
            run_id = %run_id,
            base_dir = %self.scanner.base_dir().display(),
            subjects = partitions.len(),
            workers = self.options.workers,
            "Starting feature batch"
        );

        let outcomes = self.process_all(&partitions)?;

        let mut corpus = FeatureCorpus::new();
        let mut subjects_processed = 0;
        let mut subjects_without_wear = Vec::new();
        let mut failures = Vec::new();
        let mut cancelled = Vec::new();

        for outcome in outcomes {
            match outcome {
                SubjectOutcome::Processed { subject_id, rows } => {
                    if rows.is_empty() {
                        subjects_without_wear.push(subject_id);
                    } else {
                        subjects_processed += 1;
                        corpus.extend(rows);
                    }
                }
                SubjectOutcome::Failed(failure) => {
                    tracing::warn!(
                        subject = %failure.subject_id,
                        kind = ?failure.kind,
                        reason = %failure.reason,
                        "Skipping subject"
                    );
                    failures.push(failure);
                }
                SubjectOutcome::Cancelled(subject_id) => cancelled.push(subject_id),
            }
        }

        corpus.sort();

        let report = BatchReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            base_dir: self.scanner.base_dir().to_path_buf(),
            subjects_discovered: partitions.len(),
            subjects_processed,
            subjects_without_wear,
            failures,
            cancelled,
            rows: corpus.len(),
        };

        if corpus.is_empty() {
            return Err(PipelineError::EmptyCorpusError {
                report: Box::new(report),
            });
        }

        tracing::info!(
            run_id = %run_id,
            processed = report.subjects_processed,
            skipped = report.skipped_count(),
            without_wear = report.subjects_without_wear.len(),
            rows = report.rows,
            "Feature batch complete"
        );

        Ok(BatchOutcome { corpus, report })
    }

    /// Process every partition, keeping results in discovery order
    fn process_all(
        &self,
        partitions: &[SubjectPartition],
    ) -> Result<Vec<SubjectOutcome>, PipelineError> {
        if self.options.workers == 1 {
            return Ok(partitions
                .iter()
                .map(|p| self.process_subject(p))
                .collect());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers)
            .thread_name(|i| format!("actiflux-worker-{}", i))
            .build()
            .map_err(|e| PipelineError::ConfigError(format!("failed to start workers: {}", e)))?;

        Ok(pool.install(|| {
            partitions
                .par_iter()
                .map(|p| self.process_subject(p))
                .collect()
        }))
    }

    /// Read then aggregate one subject, capturing any subject-scoped error
    pub fn process_subject(&self, partition: &SubjectPartition) -> SubjectOutcome {
        let subject_id = partition.subject_id.clone();

        if self.cancellation.is_cancelled() {
            return SubjectOutcome::Cancelled(subject_id);
        }

        match self.reader.read(partition) {
            Ok(table) => {
                let rows = self.aggregator.aggregate_table(&table);
                tracing::debug!(subject = %subject_id, days = rows.len(), "Aggregated subject");
                SubjectOutcome::Processed { subject_id, rows }
            }
            Err(e) => {
                if !e.is_subject_scoped() {
                    tracing::error!(subject = %subject_id, error = %e, "Unexpected error reading subject");
                }
                SubjectOutcome::Failed(SubjectFailure {
                    subject_id,
                    kind: failure_kind(&e),
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn failure_kind(error: &PipelineError) -> FailureKind {
    match error {
        PipelineError::SchemaError { .. } => FailureKind::Schema,
        _ => FailureKind::Read,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{ScanLayout, DEFAULT_SERIES_FILE};
    use crate::types::{SensorReading, SeriesTable};
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Serves canned tables keyed by subject id
    struct FixtureReader {
        tables: HashMap<SubjectId, Result<Vec<(i64, f64, bool)>, &'static str>>,
        reads: AtomicUsize,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl FixtureReader {
        fn new() -> Self {
            Self {
                tables: HashMap::new(),
                reads: AtomicUsize::new(0),
                cancel_after: None,
            }
        }

        fn with(mut self, id: &str, rows: Vec<(i64, f64, bool)>) -> Self {
            self.tables.insert(SubjectId::new(id), Ok(rows));
            self
        }

        fn failing(mut self, id: &str, reason: &'static str) -> Self {
            self.tables.insert(SubjectId::new(id), Err(reason));
            self
        }
    }

    impl SeriesReader for FixtureReader {
        fn read(&self, partition: &SubjectPartition) -> Result<SeriesTable, PipelineError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((limit, token)) = &self.cancel_after {
                if n >= *limit {
                    token.cancel();
                }
            }

            let subject = partition.subject_id.clone();
            match self.tables.get(&subject) {
                Some(Ok(rows)) => Ok(SeriesTable::new(
                    subject.clone(),
                    rows.iter()
                        .map(|&(day, hour, non_wear)| SensorReading {
                            subject_id: subject.clone(),
                            time_of_day: (hour * 3_600_000_000_000.0) as i64,
                            relative_date: day,
                            enmo: 0.1,
                            light: 5.0,
                            anglez: 0.0,
                            non_wear,
                        })
                        .collect(),
                )),
                Some(Err("schema")) => Err(PipelineError::SchemaError {
                    subject: subject.to_string(),
                    reason: "missing required columns: enmo".to_string(),
                }),
                Some(Err(reason)) => Err(PipelineError::ReadError {
                    subject: subject.to_string(),
                    reason: reason.to_string(),
                }),
                None => Err(PipelineError::ReadError {
                    subject: subject.to_string(),
                    reason: "no fixture".to_string(),
                }),
            }
        }
    }

    fn corpus_dir(ids: &[&str]) -> TempDir {
        let temp = TempDir::new().unwrap();
        for id in ids {
            let dir = temp.path().join(format!("id={}", id));
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(DEFAULT_SERIES_FILE), b"fixture").unwrap();
        }
        temp
    }

    fn builder(base: &Path, reader: FixtureReader, workers: usize) -> BatchFeatureBuilder<FixtureReader> {
        BatchFeatureBuilder::new(SubjectCorpusScanner::new(base, ScanLayout::default()), reader)
            .with_options(BatchOptions { workers })
    }

    #[test]
    fn test_isolates_failing_subject() {
        let temp = corpus_dir(&["a1", "b2", "c3", "d4"]);
        let reader = FixtureReader::new()
            .with("a1", vec![(0, 23.5, false), (0, 12.0, false)])
            .with("b2", vec![(0, 1.0, false), (1, 2.0, false)])
            .failing("c3", "corrupt footer")
            .with("d4", vec![(5, 10.0, false)]);

        let outcome = builder(temp.path(), reader, 2).build().unwrap();

        assert_eq!(outcome.report.subjects_discovered, 4);
        assert_eq!(outcome.report.subjects_processed, 3);
        assert_eq!(outcome.report.failures.len(), 1);
        assert_eq!(outcome.report.failures[0].subject_id.as_str(), "c3");
        assert_eq!(outcome.report.failures[0].kind, FailureKind::Read);
        assert!(outcome.report.failures[0].reason.contains("corrupt footer"));
        assert_eq!(outcome.corpus.len(), 4);
        assert!(!outcome.corpus.subjects().contains(&SubjectId::new("c3")));
        assert_eq!(outcome.report.skipped_subjects(), vec![SubjectId::new("c3")]);
    }

    #[test]
    fn test_schema_failure_kind() {
        let temp = corpus_dir(&["a1", "b2"]);
        let reader = FixtureReader::new()
            .with("a1", vec![(0, 12.0, false)])
            .failing("b2", "schema");

        let outcome = builder(temp.path(), reader, 1).build().unwrap();
        assert_eq!(outcome.report.failures[0].kind, FailureKind::Schema);
    }

    #[test]
    fn test_subject_without_wear_contributes_nothing() {
        let temp = corpus_dir(&["a1", "b2"]);
        let reader = FixtureReader::new()
            .with("a1", vec![(0, 12.0, false)])
            .with("b2", vec![(0, 12.0, true), (1, 3.0, true)]);

        let outcome = builder(temp.path(), reader, 1).build().unwrap();

        assert_eq!(outcome.corpus.len(), 1);
        assert_eq!(
            outcome.report.subjects_without_wear,
            vec![SubjectId::new("b2")]
        );
        assert!(outcome.report.failures.is_empty());
    }

    #[test]
    fn test_empty_corpus_is_fatal() {
        let temp = corpus_dir(&["a1", "b2"]);
        let reader = FixtureReader::new()
            .with("a1", vec![(0, 12.0, true)])
            .failing("b2", "truncated");

        match builder(temp.path(), reader, 1).build() {
            Err(PipelineError::EmptyCorpusError { report }) => {
                assert_eq!(report.failures.len(), 1);
                assert_eq!(report.failures[0].subject_id, SubjectId::new("b2"));
                assert_eq!(report.failures[0].reason, "truncated");
                assert_eq!(report.subjects_without_wear, vec![SubjectId::new("a1")]);
                assert!(report.cancelled.is_empty());
                assert_eq!(report.skipped_subjects(), vec![SubjectId::new("b2")]);
                assert_eq!(report.rows, 0);
            }
            other => panic!("expected EmptyCorpusError, got {:?}", other.map(|o| o.report)),
        }
    }

    #[test]
    fn test_no_partitions_is_empty_corpus() {
        let temp = corpus_dir(&[]);
        assert!(matches!(
            builder(temp.path(), FixtureReader::new(), 1).build(),
            Err(PipelineError::EmptyCorpusError { .. })
        ));
    }

    #[test]
    fn test_missing_base_dir_is_fatal() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            builder(&temp.path().join("nope"), FixtureReader::new(), 1).build(),
            Err(PipelineError::NotFoundError(_))
        ));
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let ids: Vec<String> = (0..24).map(|i| format!("s{:02}", i)).collect();
        let id_refs: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();
        let temp = corpus_dir(&id_refs);

        let make_reader = || {
            ids.iter().enumerate().fold(FixtureReader::new(), |reader, (i, id)| {
                let rows = (0..50)
                    .map(|j| ((j % 4) as i64, ((i + j) as f64 * 0.7) % 24.0, j % 9 == 0))
                    .collect();
                reader.with(id, rows)
            })
        };

        let sequential = builder(temp.path(), make_reader(), 1).build().unwrap();
        let parallel = builder(temp.path(), make_reader(), 4).build().unwrap();

        assert_eq!(sequential.corpus, parallel.corpus);
        assert_eq!(sequential.report.rows, parallel.report.rows);
    }

    #[test]
    fn test_cancellation_stops_scheduling() {
        let temp = corpus_dir(&["a1", "b2", "c3", "d4"]);
        let token = CancellationToken::new();
        let mut reader = FixtureReader::new()
            .with("a1", vec![(0, 12.0, false)])
            .with("b2", vec![(0, 12.0, false)])
            .with("c3", vec![(0, 12.0, false)])
            .with("d4", vec![(0, 12.0, false)]);
        reader.cancel_after = Some((2, token.clone()));

        let outcome = builder(temp.path(), reader, 1)
            .with_cancellation(token)
            .build()
            .unwrap();

        assert_eq!(outcome.report.subjects_processed, 2);
        assert_eq!(
            outcome.report.cancelled,
            vec![SubjectId::new("c3"), SubjectId::new("d4")]
        );
        assert_eq!(outcome.report.skipped_count(), 2);
    }

    #[test]
    fn test_cancelled_before_start() {
        let temp = corpus_dir(&["a1"]);
        let reader = FixtureReader::new().with("a1", vec![(0, 12.0, false)]);
        let builder = builder(temp.path(), reader, 1);
        builder.cancellation_token().cancel();

        match builder.build() {
            Err(PipelineError::EmptyCorpusError { report }) => {
                assert_eq!(report.cancelled, vec![SubjectId::new("a1")]);
            }
            other => panic!("expected EmptyCorpusError, got {:?}", other.map(|o| o.report)),
        }
    }
}
