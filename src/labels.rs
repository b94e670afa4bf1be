//! Clinical labels and the feature/label join
//!
//! The label table itself comes from an external loader; this module only
//! needs its id-keyed contract. A thin CSV reader is provided so that a raw
//! clinical export (one row per subject with a total score) can be used
//! directly.

use crate::error::PipelineError;
use crate::types::{FeatureCorpus, LabelRecord, LabeledDailyRow, SeverityCategory, SubjectId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

/// Upper bounds (inclusive) of the None, Mild and Moderate severity buckets.
///
/// Scores above the last bound are Severe. Recalibration point for the scale.
pub const SEVERITY_THRESHOLDS: [f64; 3] = [30.0, 49.0, 79.0];

/// Default id column of a label CSV
pub const DEFAULT_ID_COLUMN: &str = "id";

/// Default total score column of a label CSV
pub const DEFAULT_SCORE_COLUMN: &str = "PCIAT-PCIAT_Total";

impl SeverityCategory {
    /// Bucket a clinical total score
    pub fn from_total_score(score: f64) -> Self {
        let [none, mild, moderate] = SEVERITY_THRESHOLDS;
        if score <= none {
            SeverityCategory::None
        } else if score <= mild {
            SeverityCategory::Mild
        } else if score <= moderate {
            SeverityCategory::Moderate
        } else {
            SeverityCategory::Severe
        }
    }
}

impl LabelRecord {
    pub fn from_score(subject_id: SubjectId, total_score: f64) -> Self {
        Self {
            subject_id,
            total_score,
            severity: SeverityCategory::from_total_score(total_score),
        }
    }
}

/// Where to find the label CSV and which columns to use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSource {
    pub path: PathBuf,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default = "default_score_column")]
    pub score_column: String,
}

fn default_id_column() -> String {
    DEFAULT_ID_COLUMN.to_string()
}

fn default_score_column() -> String {
    DEFAULT_SCORE_COLUMN.to_string()
}

impl LabelSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            id_column: default_id_column(),
            score_column: default_score_column(),
        }
    }
}

/// Labels keyed by canonical subject id, at most one per subject
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    records: HashMap<SubjectId, LabelRecord>,
    unscored_rows: usize,
}

impl LabelTable {
    /// Build a table, rejecting duplicate subjects
    pub fn from_records(
        records: impl IntoIterator<Item = LabelRecord>,
    ) -> Result<Self, PipelineError> {
        let mut table = Self::default();
        for record in records {
            table.insert(record)?;
        }
        Ok(table)
    }

    /// Read a label CSV from disk
    pub fn from_csv_path(source: &LabelSource) -> Result<Self, PipelineError> {
        let file = File::open(&source.path).map_err(|e| {
            PipelineError::LabelError(format!(
                "failed to open {}: {}",
                source.path.display(),
                e
            ))
        })?;
        Self::from_csv_reader(file, &source.id_column, &source.score_column)
    }

    /// Read a label CSV.
    ///
    /// Rows with an empty score cell are skipped and counted in
    /// [`unscored_rows`](Self::unscored_rows).
    pub fn from_csv_reader<R: Read>(
        input: R,
        id_column: &str,
        score_column: &str,
    ) -> Result<Self, PipelineError> {
        let mut reader = csv::Reader::from_reader(input);

        let headers = reader
            .headers()
            .map_err(|e| PipelineError::LabelError(format!("failed to read header: {}", e)))?;
        let id_idx = column_index(headers, id_column)?;
        let score_idx = column_index(headers, score_column)?;

        let mut table = Self::default();

        for result in reader.records() {
            let record = result.map_err(|e| PipelineError::LabelError(e.to_string()))?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);

            let raw_id = record.get(id_idx).unwrap_or_default();
            let subject_id = SubjectId::new(raw_id);
            if subject_id.is_empty() {
                return Err(PipelineError::LabelError(format!(
                    "empty subject id on line {}",
                    line
                )));
            }

            let raw_score = record.get(score_idx).unwrap_or_default().trim();
            if raw_score.is_empty() {
                table.unscored_rows += 1;
                continue;
            }

            let score: f64 = raw_score.parse().map_err(|_| {
                PipelineError::LabelError(format!(
                    "invalid score '{}' for subject {} on line {}",
                    raw_score, subject_id, line
                ))
            })?;

            table.insert(LabelRecord::from_score(subject_id, score))?;
        }

        tracing::debug!(
            labels = table.len(),
            unscored = table.unscored_rows,
            "Loaded label table"
        );

        Ok(table)
    }

    fn insert(&mut self, record: LabelRecord) -> Result<(), PipelineError> {
        if self.records.contains_key(&record.subject_id) {
            return Err(PipelineError::LabelError(format!(
                "duplicate label for subject {}",
                record.subject_id
            )));
        }
        self.records.insert(record.subject_id.clone(), record);
        Ok(())
    }

    pub fn get(&self, subject_id: &SubjectId) -> Option<&LabelRecord> {
        self.records.get(subject_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows skipped because they carried no score
    pub fn unscored_rows(&self) -> usize {
        self.unscored_rows
    }
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize, PipelineError> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| PipelineError::LabelError(format!("missing column '{}'", name)))
}

/// Labeled rows plus accounting for everything the join dropped
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinedDataset {
    pub rows: Vec<LabeledDailyRow>,
    /// Feature rows whose subject had no label
    pub dropped_feature_rows: usize,
    /// Feature subjects without a label
    pub unlabeled_subjects: BTreeSet<SubjectId>,
    /// Labels whose subject has no feature rows
    pub labels_without_features: usize,
}

/// Inner join of the feature corpus with clinical labels
pub struct LabelJoiner;

impl LabelJoiner {
    /// Join on canonical subject id; unmatched rows on either side are dropped
    pub fn join(corpus: &FeatureCorpus, labels: &LabelTable) -> JoinedDataset {
        let mut rows = Vec::with_capacity(corpus.len());
        let mut dropped_feature_rows = 0;
        let mut unlabeled_subjects = BTreeSet::new();
        let mut matched_subjects = BTreeSet::new();

        for features in corpus.iter() {
            match labels.get(&features.subject_id) {
                Some(label) => {
                    matched_subjects.insert(features.subject_id.clone());
                    rows.push(LabeledDailyRow::new(features, label));
                }
                None => {
                    dropped_feature_rows += 1;
                    unlabeled_subjects.insert(features.subject_id.clone());
                }
            }
        }

        let labels_without_features = labels.len() - matched_subjects.len();

        tracing::info!(
            joined_rows = rows.len(),
            dropped_feature_rows,
            unlabeled_subjects = unlabeled_subjects.len(),
            labels_without_features,
            "Joined features with labels"
        );

        JoinedDataset {
            rows,
            dropped_feature_rows,
            unlabeled_subjects,
            labels_without_features,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DailyAggregate;

    fn row(id: &str, day: i64) -> DailyAggregate {
        DailyAggregate {
            subject_id: SubjectId::new(id),
            day,
            mean_enmo: 0.1,
            total_enmo: 1.0,
            mean_light: 5.0,
            max_light: 50.0,
            mean_anglez: -3.0,
            total_samples: 10,
            night_samples: 4,
            percent_night_activity: 0.4,
        }
    }

    #[test]
    fn test_severity_buckets() {
        assert_eq!(SeverityCategory::from_total_score(0.0), SeverityCategory::None);
        assert_eq!(SeverityCategory::from_total_score(30.0), SeverityCategory::None);
        assert_eq!(SeverityCategory::from_total_score(31.0), SeverityCategory::Mild);
        assert_eq!(SeverityCategory::from_total_score(49.0), SeverityCategory::Mild);
        assert_eq!(SeverityCategory::from_total_score(49.5), SeverityCategory::Moderate);
        assert_eq!(SeverityCategory::from_total_score(79.0), SeverityCategory::Moderate);
        assert_eq!(SeverityCategory::from_total_score(80.0), SeverityCategory::Severe);
    }

    #[test]
    fn test_join_drops_unlabeled_subject() {
        let mut corpus = FeatureCorpus::new();
        corpus.extend(vec![row("a1", 0), row("a1", 1), row("z9", 0)]);

        let labels = LabelTable::from_records(vec![
            LabelRecord::from_score(SubjectId::new("a1"), 55.0),
            LabelRecord::from_score(SubjectId::new("q7"), 10.0),
        ])
        .unwrap();

        let joined = LabelJoiner::join(&corpus, &labels);

        assert_eq!(joined.rows.len(), 2);
        assert!(joined.rows.iter().all(|r| r.id.as_str() == "a1"));
        assert!(joined.rows.iter().all(|r| r.sii == 2));
        assert_eq!(joined.dropped_feature_rows, 1);
        assert_eq!(
            joined.unlabeled_subjects.iter().collect::<Vec<_>>(),
            vec![&SubjectId::new("z9")]
        );
        assert_eq!(joined.labels_without_features, 1);
    }

    #[test]
    fn test_join_matches_padded_ids() {
        let mut corpus = FeatureCorpus::new();
        corpus.extend(vec![row("00ab", 0)]);

        let csv = "id,PCIAT-PCIAT_Total\nAB,20\n";
        let labels = LabelTable::from_csv_reader(csv.as_bytes(), "id", "PCIAT-PCIAT_Total")
            .unwrap();

        let joined = LabelJoiner::join(&corpus, &labels);
        assert_eq!(joined.rows.len(), 1);
        assert_eq!(joined.rows[0].sii, 0);
        assert_eq!(joined.rows[0].total_score, 20.0);
    }

    #[test]
    fn test_csv_skips_unscored_rows() {
        let csv = "id,Basic_Demos-Age,PCIAT-PCIAT_Total\n\
                   00008ff9,5,55\n\
                   000fd460,9,\n\
                   00105258,10,28\n";
        let labels = LabelTable::from_csv_reader(csv.as_bytes(), "id", "PCIAT-PCIAT_Total")
            .unwrap();

        assert_eq!(labels.len(), 2);
        assert_eq!(labels.unscored_rows(), 1);
        assert_eq!(
            labels.get(&SubjectId::new("8ff9")).map(|l| l.severity),
            Some(SeverityCategory::Moderate)
        );
    }

    #[test]
    fn test_csv_rejects_missing_column_and_bad_score() {
        let missing = LabelTable::from_csv_reader("id,score\na,1\n".as_bytes(), "id", "total");
        assert!(matches!(missing, Err(PipelineError::LabelError(_))));

        let bad = LabelTable::from_csv_reader("id,total\na,lots\n".as_bytes(), "id", "total");
        match bad {
            Err(PipelineError::LabelError(msg)) => assert!(msg.contains("lots")),
            other => panic!("expected LabelError, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        let result = LabelTable::from_records(vec![
            LabelRecord::from_score(SubjectId::new("a1"), 1.0),
            LabelRecord::from_score(SubjectId::new("0a1"), 2.0),
        ]);
        assert!(matches!(result, Err(PipelineError::LabelError(_))));
    }
}
