//! Configuration for a feature batch run.

use crate::error::PipelineError;
use crate::labels::LabelSource;
use crate::scanner::ScanLayout;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding one partition per subject
    pub base_dir: PathBuf,

    /// Partition naming convention
    pub layout: ScanLayout,

    /// Worker threads (`0` = one per core, `1` = sequential)
    pub workers: usize,

    /// Clinical label source, if features should be joined
    pub labels: Option<LabelSource>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("series_train.parquet"),
            layout: ScanLayout::default(),
            workers: 0,
            labels: None,
        }
    }
}

impl PipelineConfig {
    /// Create a configuration for a corpus directory with default settings.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the layout can address partitions.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.layout.partition_prefix.is_empty() {
            return Err(PipelineError::ConfigError(
                "partition_prefix must not be empty".to_string(),
            ));
        }

        let file_name = &self.layout.series_file_name;
        if file_name.is_empty() || file_name.contains('/') || file_name.contains('\\') {
            return Err(PipelineError::ConfigError(format!(
                "series_file_name must be a plain file name, got '{}'",
                file_name
            )));
        }

        if let Some(labels) = &self.labels {
            if labels.id_column.is_empty() || labels.score_column.is_empty() {
                return Err(PipelineError::ConfigError(
                    "label id_column and score_column must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.layout.partition_prefix, "id=");
        assert_eq!(config.layout.series_file_name, "part-0.parquet");
        assert_eq!(config.workers, 0);
        assert!(config.labels.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "base_dir": "/data/series",
                "workers": 4,
                "labels": { "path": "/data/train.csv" }
            }"#,
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/data/series"));
        assert_eq!(config.workers, 4);
        assert_eq!(config.layout, ScanLayout::default());

        let labels = config.labels.unwrap();
        assert_eq!(labels.id_column, "id");
        assert_eq!(labels.score_column, "PCIAT-PCIAT_Total");
    }

    #[test]
    fn test_rejects_nested_series_file() {
        let mut config = PipelineConfig::new("/data");
        config.layout.series_file_name = "nested/part-0.parquet".to_string();
        assert!(matches!(
            config.validate(),
            Err(PipelineError::ConfigError(_))
        ));
    }

    #[test]
    fn test_invalid_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            PipelineConfig::load(&path),
            Err(PipelineError::JsonError(_))
        ));
    }
}
