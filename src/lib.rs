//! Actigraphy Flux - Batch engine for daily behavioral features from wearable recordings
//!
//! Flux reduces each subject's multi-day accelerometer recording into one row
//! per day through a deterministic pipeline: corpus scan → series load →
//! non-wear filtering → night classification → daily aggregation → batch
//! assembly → label join.
//!
//! ## Modules
//!
//! - **Scanner / Reader**: discover subject partitions and decode their Parquet series
//! - **Aggregator**: per-day movement, light, orientation and night-activity statistics
//! - **Batch**: parallel per-subject processing with failure isolation
//! - **Labels**: clinical label table and the feature/label join

pub mod aggregator;
pub mod batch;
pub mod config;
pub mod error;
pub mod labels;
pub mod reader;
pub mod scanner;
pub mod schema;
pub mod types;

pub use aggregator::DailyFeatureAggregator;
pub use batch::{BatchFeatureBuilder, BatchOptions, BatchOutcome, BatchReport, CancellationToken};
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use labels::{JoinedDataset, LabelJoiner, LabelSource, LabelTable};
pub use reader::{ParquetSeriesReader, SeriesReader};
pub use scanner::{ScanLayout, SubjectCorpusScanner, SubjectPartition};
pub use types::{DailyAggregate, FeatureCorpus, LabelRecord, SensorReading, SubjectId};

/// Flux version embedded in batch reports
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name
pub const PRODUCER_NAME: &str = "actigraphy-flux";

/// Build the feature corpus for a configuration and, if a label source is
/// configured, join it with the labels.
///
/// # Example
/// ```ignore
/// let config = PipelineConfig::new("series_train.parquet");
/// let (outcome, joined) = run_pipeline(&config)?;
/// ```
pub fn run_pipeline(
    config: &PipelineConfig,
) -> Result<(BatchOutcome, Option<JoinedDataset>), PipelineError> {
    config.validate()?;

    let outcome = BatchFeatureBuilder::from_config(config).build()?;

    let joined = match &config.labels {
        Some(source) => {
            let labels = LabelTable::from_csv_path(source)?;
            Some(LabelJoiner::join(&outcome.corpus, &labels))
        }
        None => None,
    };

    Ok((outcome, joined))
}
