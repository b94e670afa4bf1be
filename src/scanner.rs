//! Subject corpus discovery
//!
//! A corpus is a base directory holding one hive-style partition per subject
//! (`id=<subject>/part-0.parquet`). The scanner recovers subject identifiers
//! from partition names and yields only partitions whose series file exists.

use crate::error::PipelineError;
use crate::types::SubjectId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, DirEntry, ReadDir};
use std::path::{Path, PathBuf};

/// Default partition directory prefix
pub const DEFAULT_PARTITION_PREFIX: &str = "id=";

/// Default series file name inside each partition
pub const DEFAULT_SERIES_FILE: &str = "part-0.parquet";

/// Naming convention of a corpus directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanLayout {
    pub partition_prefix: String,
    pub series_file_name: String,
}

impl Default for ScanLayout {
    fn default() -> Self {
        Self {
            partition_prefix: DEFAULT_PARTITION_PREFIX.to_string(),
            series_file_name: DEFAULT_SERIES_FILE.to_string(),
        }
    }
}

/// One subject's partition in the corpus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPartition {
    pub subject_id: SubjectId,
    /// Partition directory
    pub directory: PathBuf,
    /// Series file inside the partition
    pub series_path: PathBuf,
}

/// Enumerates subjects present in a base directory
#[derive(Debug, Clone)]
pub struct SubjectCorpusScanner {
    base_dir: PathBuf,
    layout: ScanLayout,
}

impl SubjectCorpusScanner {
    pub fn new(base_dir: impl Into<PathBuf>, layout: ScanLayout) -> Self {
        Self {
            base_dir: base_dir.into(),
            layout,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn layout(&self) -> &ScanLayout {
        &self.layout
    }

    /// Lazily iterate over partitions that hold a series file.
    ///
    /// Fails with `NotFoundError` when the base directory is missing or is
    /// not a directory.
    pub fn partitions(&self) -> Result<Partitions<'_>, PipelineError> {
        if !self.base_dir.is_dir() {
            return Err(PipelineError::NotFoundError(self.base_dir.clone()));
        }

        let entries = fs::read_dir(&self.base_dir).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::NotFoundError(self.base_dir.clone())
            } else {
                PipelineError::IoError(e)
            }
        })?;

        Ok(Partitions {
            entries,
            layout: &self.layout,
        })
    }

    /// Collect all partitions, rejecting subjects discovered more than once.
    ///
    /// The result is sorted by subject id.
    pub fn discover(&self) -> Result<Vec<SubjectPartition>, PipelineError> {
        let mut seen = HashSet::new();
        let mut partitions = Vec::new();

        for partition in self.partitions()? {
            if !seen.insert(partition.subject_id.clone()) {
                return Err(PipelineError::ScanError(partition.subject_id.to_string()));
            }
            partitions.push(partition);
        }

        partitions.sort_by(|a, b| a.subject_id.cmp(&b.subject_id));

        tracing::debug!(
            base_dir = %self.base_dir.display(),
            subjects = partitions.len(),
            "Discovered subject partitions"
        );

        Ok(partitions)
    }
}

/// Iterator returned by [`SubjectCorpusScanner::partitions`]
pub struct Partitions<'a> {
    entries: ReadDir,
    layout: &'a ScanLayout,
}

impl Iterator for Partitions<'_> {
    type Item = SubjectPartition;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };

            if let Some(partition) = partition_from_entry(&entry, self.layout) {
                return Some(partition);
            }
        }
    }
}

fn partition_from_entry(entry: &DirEntry, layout: &ScanLayout) -> Option<SubjectPartition> {
    let directory = entry.path();

    match entry.file_type() {
        Ok(file_type) if file_type.is_dir() => {}
        Ok(_) => return None,
        Err(e) => {
            tracing::warn!(path = %directory.display(), error = %e, "Skipping uninspectable entry");
            return None;
        }
    }

    let name = entry.file_name();
    let name = name.to_string_lossy();
    let raw_id = name.strip_prefix(layout.partition_prefix.as_str())?;

    let subject_id = SubjectId::new(raw_id);
    if subject_id.is_empty() {
        tracing::warn!(partition = %name, "Skipping partition with empty subject id");
        return None;
    }

    let series_path = directory.join(&layout.series_file_name);
    if !series_path.is_file() {
        tracing::warn!(
            subject = %subject_id,
            expected = %series_path.display(),
            "Skipping partition without series file"
        );
        return None;
    }

    Some(SubjectPartition {
        subject_id,
        directory,
        series_path,
    })
}
