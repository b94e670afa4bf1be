//! Per-subject series loading
//!
//! A [`SeriesReader`] turns one subject partition into a [`SeriesTable`].
//! Readers hold no mutable state, so one instance is shared by every worker
//! of a batch.

use crate::error::PipelineError;
use crate::scanner::SubjectPartition;
use crate::schema::SeriesSchema;
use crate::types::{SeriesTable, SubjectId};
use arrow::record_batch::RecordBatchReader;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ProjectionMask;
use parquet::file::metadata::ParquetMetaData;
use std::fs::File;

/// Default number of rows decoded per record batch
pub const DEFAULT_BATCH_SIZE: usize = 65_536;

/// Trait for series loaders
pub trait SeriesReader: Send + Sync {
    /// Load one subject's readings, tagging every row with the subject id.
    ///
    /// Fails with `ReadError` when the file is absent or malformed, and with
    /// `SchemaError` when required columns are missing.
    fn read(&self, partition: &SubjectPartition) -> Result<SeriesTable, PipelineError>;
}

/// Reads `part-0.parquet` style series files
#[derive(Debug, Clone)]
pub struct ParquetSeriesReader {
    batch_size: usize,
}

impl Default for ParquetSeriesReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ParquetSeriesReader {
    pub fn new() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Create a reader decoding `batch_size` rows at a time
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }
}

impl SeriesReader for ParquetSeriesReader {
    fn read(&self, partition: &SubjectPartition) -> Result<SeriesTable, PipelineError> {
        let subject = &partition.subject_id;
        let path = &partition.series_path;

        let file = File::open(path).map_err(|e| {
            read_error(subject, format!("failed to open {}: {}", path.display(), e))
        })?;

        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| read_error(subject, format!("not a readable Parquet file: {}", e)))?;

        // Only decode the columns the aggregation needs
        let file_schema = SeriesSchema::resolve(subject, builder.schema().as_ref())?;
        let mask = ProjectionMask::roots(builder.parquet_schema(), file_schema.column_indices());
        check_row_counts(subject, builder.metadata())?;

        let reader = builder
            .with_projection(mask)
            .with_batch_size(self.batch_size)
            .build()
            .map_err(|e| read_error(subject, format!("failed to build reader: {}", e)))?;

        let schema = SeriesSchema::resolve(subject, reader.schema().as_ref())?;

        // decode_batch reserves per batch; footer row counts are not trusted
        let mut readings = Vec::new();
        for batch in reader {
            let batch =
                batch.map_err(|e| read_error(subject, format!("corrupt record batch: {}", e)))?;
            let offset = readings.len();
            schema.decode_batch(subject, &batch, offset, &mut readings)?;
        }

        tracing::debug!(subject = %subject, rows = readings.len(), "Loaded series");

        Ok(SeriesTable::new(subject.clone(), readings))
    }
}

/// Reject footers whose file row count disagrees with its row groups
fn check_row_counts(
    subject: &SubjectId,
    metadata: &ParquetMetaData,
) -> Result<(), PipelineError> {
    let declared = metadata.file_metadata().num_rows();
    let in_groups: i64 = metadata
        .row_groups()
        .iter()
        .map(|group| group.num_rows())
        .try_fold(0i64, |total, rows| {
            if rows < 0 {
                None
            } else {
                total.checked_add(rows)
            }
        })
        .ok_or_else(|| read_error(subject, "invalid row group sizes in footer".to_string()))?;

    if declared != in_groups {
        return Err(read_error(
            subject,
            format!(
                "footer declares {} rows but row groups hold {}",
                declared, in_groups
            ),
        ));
    }
    Ok(())
}

fn read_error(subject: &SubjectId, reason: String) -> PipelineError {
    PipelineError::ReadError {
        subject: subject.to_string(),
        reason,
    }
}
