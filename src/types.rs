//! Core types for the Actigraphy Flux pipeline
//!
//! This module defines the records that flow through each stage of the
//! pipeline: raw sensor readings, per-subject series tables, daily aggregates,
//! the corpus-wide feature table, and the clinical label rows it is joined to.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Subject identifier.
///
/// Keeps the identifier as written (trimmed) for output, and compares,
/// orders and hashes on a canonical key: lowercased with leading zeros
/// stripped, so that `"00AB"`, `"ab"` and `" ab "` are the same subject.
/// Clones share the same allocations.
#[derive(Debug, Clone)]
pub struct SubjectId {
    raw: Arc<str>,
    key: Arc<str>,
}

impl SubjectId {
    /// Build a subject id from any raw representation
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim();
        let lowered = trimmed.to_ascii_lowercase();
        let stripped = lowered.trim_start_matches('0');
        let canonical = if stripped.is_empty() && !lowered.is_empty() {
            "0"
        } else {
            stripped
        };

        let raw: Arc<str> = Arc::from(trimmed);
        let key = if canonical == trimmed {
            raw.clone()
        } else {
            Arc::from(canonical)
        };
        SubjectId { raw, key }
    }

    /// Canonical key used for every comparison
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Identifier as it appeared in the source, minus surrounding whitespace
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }
}

impl PartialEq for SubjectId {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for SubjectId {}

impl PartialOrd for SubjectId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SubjectId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl Hash for SubjectId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for SubjectId {
    fn from(raw: &str) -> Self {
        SubjectId::new(raw)
    }
}

impl Serialize for SubjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for SubjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(SubjectId::new(&raw))
    }
}

/// One raw sample from a wrist-worn accelerometer
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// Subject the sample belongs to
    pub subject_id: SubjectId,
    /// Nanoseconds since local midnight
    pub time_of_day: i64,
    /// Day index relative to a subject-specific anchor date
    pub relative_date: i64,
    /// Euclidean norm minus one (movement magnitude, g)
    pub enmo: f64,
    /// Ambient light (lux)
    pub light: f64,
    /// Device angle relative to the horizontal plane (degrees)
    pub anglez: f64,
    /// Device was detected as not being worn
    pub non_wear: bool,
}

/// All readings for one subject, in file order
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesTable {
    pub subject_id: SubjectId,
    pub readings: Vec<SensorReading>,
}

impl SeriesTable {
    pub fn new(subject_id: SubjectId, readings: Vec<SensorReading>) -> Self {
        Self {
            subject_id,
            readings,
        }
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Daily behavioral summary for one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    #[serde(rename = "id")]
    pub subject_id: SubjectId,
    /// Relative day index
    pub day: i64,
    pub mean_enmo: f64,
    pub total_enmo: f64,
    pub mean_light: f64,
    pub max_light: f64,
    pub mean_anglez: f64,
    /// Worn samples in the day
    pub total_samples: u64,
    /// Worn samples that fall inside the night window
    pub night_samples: u64,
    /// `night_samples / total_samples`, always within [0, 1]
    pub percent_night_activity: f64,
}

/// Corpus-wide feature table.
///
/// Rows are only ever appended; consumers get read-only access.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCorpus {
    rows: Vec<DailyAggregate>,
}

impl FeatureCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one subject's daily rows
    pub fn extend(&mut self, rows: impl IntoIterator<Item = DailyAggregate>) {
        self.rows.extend(rows);
    }

    /// Order rows by (subject, day) so output is reproducible
    pub(crate) fn sort(&mut self) {
        self.rows
            .sort_by(|a, b| (&a.subject_id, a.day).cmp(&(&b.subject_id, b.day)));
    }

    pub fn rows(&self) -> &[DailyAggregate] {
        &self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DailyAggregate> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct subjects present in the corpus
    pub fn subjects(&self) -> BTreeSet<SubjectId> {
        self.rows.iter().map(|r| r.subject_id.clone()).collect()
    }

    /// Daily rows belonging to a single subject
    pub fn rows_for<'a>(
        &'a self,
        subject: &'a SubjectId,
    ) -> impl Iterator<Item = &'a DailyAggregate> + 'a {
        self.rows.iter().filter(move |r| &r.subject_id == subject)
    }
}

/// Ordinal severity category derived from the clinical total score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityCategory {
    None,
    Mild,
    Moderate,
    Severe,
}

impl SeverityCategory {
    /// Numeric level (0-3)
    pub fn level(&self) -> u8 {
        match self {
            SeverityCategory::None => 0,
            SeverityCategory::Mild => 1,
            SeverityCategory::Moderate => 2,
            SeverityCategory::Severe => 3,
        }
    }
}

/// One subject's clinical label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRecord {
    #[serde(rename = "id")]
    pub subject_id: SubjectId,
    pub total_score: f64,
    pub severity: SeverityCategory,
}

/// A daily feature row joined with its subject's label
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabeledDailyRow {
    pub id: SubjectId,
    pub day: i64,
    pub mean_enmo: f64,
    pub total_enmo: f64,
    pub mean_light: f64,
    pub max_light: f64,
    pub mean_anglez: f64,
    pub total_samples: u64,
    pub night_samples: u64,
    pub percent_night_activity: f64,
    pub total_score: f64,
    /// Severity level (0-3)
    pub sii: u8,
}

impl LabeledDailyRow {
    pub fn new(features: &DailyAggregate, label: &LabelRecord) -> Self {
        Self {
            id: features.subject_id.clone(),
            day: features.day,
            mean_enmo: features.mean_enmo,
            total_enmo: features.total_enmo,
            mean_light: features.mean_light,
            max_light: features.max_light,
            mean_anglez: features.mean_anglez,
            total_samples: features.total_samples,
            night_samples: features.night_samples,
            percent_night_activity: features.percent_night_activity,
            total_score: label.total_score,
            sii: label.severity.level(),
        }
    }
}

/// Which stage rejected a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Read,
    Schema,
}

/// A subject that was skipped, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectFailure {
    pub subject_id: SubjectId,
    pub kind: FailureKind,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_id_canonical_form() {
        assert_eq!(SubjectId::new("00ab12").as_str(), "ab12");
        assert_eq!(SubjectId::new(" AB12 "), SubjectId::new("ab12"));
        assert_eq!(SubjectId::new("0000").as_str(), "0");
        assert!(SubjectId::new("   ").is_empty());
    }

    #[test]
    fn test_subject_id_serializes_as_string() {
        let json = serde_json::to_string(&SubjectId::new(" 00F1 ")).unwrap();
        assert_eq!(json, "\"00F1\"");

        let back: SubjectId = serde_json::from_str("\"0f1\"").unwrap();
        assert_eq!(back, SubjectId::new("f1"));
        assert_eq!(back.raw(), "0f1");
    }

    #[test]
    fn test_subject_id_keeps_source_form() {
        let padded = SubjectId::new("00008ff9");
        assert_eq!(padded.raw(), "00008ff9");
        assert_eq!(padded.as_str(), "8ff9");
        assert_eq!(padded.to_string(), "00008ff9");

        let mut set = std::collections::HashSet::new();
        set.insert(padded);
        assert!(set.contains(&SubjectId::new("8FF9")));
    }

    #[test]
    fn test_daily_aggregate_output_schema() {
        let row = DailyAggregate {
            subject_id: SubjectId::new("a1"),
            day: 3,
            mean_enmo: 0.5,
            total_enmo: 1.0,
            mean_light: 10.0,
            max_light: 20.0,
            mean_anglez: -5.0,
            total_samples: 2,
            night_samples: 1,
            percent_night_activity: 0.5,
        };

        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["id"], "a1");
        assert_eq!(value["day"], 3);
        assert_eq!(value["total_samples"], 2);
        assert_eq!(value["percent_night_activity"], 0.5);
        assert!(value.get("subject_id").is_none());
    }

    #[test]
    fn test_corpus_sort_and_subjects() {
        let make = |id: &str, day: i64| DailyAggregate {
            subject_id: SubjectId::new(id),
            day,
            mean_enmo: 0.0,
            total_enmo: 0.0,
            mean_light: 0.0,
            max_light: 0.0,
            mean_anglez: 0.0,
            total_samples: 1,
            night_samples: 0,
            percent_night_activity: 0.0,
        };

        let mut corpus = FeatureCorpus::new();
        corpus.extend(vec![make("b", 2), make("a", 5), make("b", 1)]);
        corpus.sort();

        let keys: Vec<(String, i64)> = corpus
            .iter()
            .map(|r| (r.subject_id.to_string(), r.day))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("a".to_string(), 5),
                ("b".to_string(), 1),
                ("b".to_string(), 2)
            ]
        );
        assert_eq!(corpus.subjects().len(), 2);
        assert_eq!(corpus.rows_for(&SubjectId::new("b")).count(), 2);
    }
}
