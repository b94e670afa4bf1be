//! Raw series column schema
//!
//! Maps the columns of a subject's series file onto [`SensorReading`] fields.
//! Each logical column accepts a short list of source names so that both the
//! canonical names and the names used by the published actigraphy dumps
//! (`relative_date_PCIAT`, `non-wear_flag`) resolve. Source columns are cast
//! to the target type, so narrower encodings (Int16 day index, Float32
//! signals, boolean flags) are accepted.

use crate::error::PipelineError;
use crate::types::{SensorReading, SubjectId};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::{can_cast_types, cast};
use arrow::datatypes::{DataType, Float64Type, Int64Type, Schema};
use arrow::record_batch::RecordBatch;

/// Target type of a logical column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
}

impl ColumnKind {
    fn data_type(&self) -> DataType {
        match self {
            ColumnKind::Integer => DataType::Int64,
            ColumnKind::Float => DataType::Float64,
        }
    }
}

/// A logical column and the source names it may appear under
#[derive(Debug)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub sources: &'static [&'static str],
    pub kind: ColumnKind,
}

pub const TIME_OF_DAY: ColumnSpec = ColumnSpec {
    name: "time_of_day",
    sources: &["time_of_day"],
    kind: ColumnKind::Integer,
};

pub const RELATIVE_DATE: ColumnSpec = ColumnSpec {
    name: "relative_date",
    sources: &["relative_date", "relative_date_PCIAT"],
    kind: ColumnKind::Integer,
};

pub const ENMO: ColumnSpec = ColumnSpec {
    name: "enmo",
    sources: &["enmo"],
    kind: ColumnKind::Float,
};

pub const LIGHT: ColumnSpec = ColumnSpec {
    name: "light",
    sources: &["light"],
    kind: ColumnKind::Float,
};

pub const ANGLEZ: ColumnSpec = ColumnSpec {
    name: "anglez",
    sources: &["anglez"],
    kind: ColumnKind::Float,
};

pub const NON_WEAR_FLAG: ColumnSpec = ColumnSpec {
    name: "non_wear_flag",
    sources: &["non_wear_flag", "non-wear_flag"],
    kind: ColumnKind::Float,
};

/// Every column a series file must carry
pub const REQUIRED_COLUMNS: [&ColumnSpec; 6] = [
    &TIME_OF_DAY,
    &RELATIVE_DATE,
    &ENMO,
    &LIGHT,
    &ANGLEZ,
    &NON_WEAR_FLAG,
];

#[derive(Debug, Clone)]
struct ResolvedColumn {
    index: usize,
    source: String,
    spec: &'static ColumnSpec,
}

/// Required columns resolved against a concrete Arrow schema
#[derive(Debug, Clone)]
pub struct SeriesSchema {
    time_of_day: ResolvedColumn,
    relative_date: ResolvedColumn,
    enmo: ResolvedColumn,
    light: ResolvedColumn,
    anglez: ResolvedColumn,
    non_wear: ResolvedColumn,
}

impl SeriesSchema {
    /// Resolve all required columns.
    ///
    /// Fails with `SchemaError` listing every absent column, or naming a
    /// column whose type cannot be cast to its target type.
    pub fn resolve(subject: &SubjectId, schema: &Schema) -> Result<Self, PipelineError> {
        let mut missing = Vec::new();
        let mut resolved = Vec::with_capacity(REQUIRED_COLUMNS.len());

        for spec in REQUIRED_COLUMNS {
            match find_column(schema, spec) {
                Some(column) => {
                    let field = schema.field(column.index);
                    if !can_cast_types(field.data_type(), &spec.kind.data_type()) {
                        return Err(PipelineError::SchemaError {
                            subject: subject.to_string(),
                            reason: format!(
                                "column '{}' has type {} which cannot be read as {}",
                                column.source,
                                field.data_type(),
                                spec.kind.data_type()
                            ),
                        });
                    }
                    resolved.push(column);
                }
                None => missing.push(spec.name),
            }
        }

        if !missing.is_empty() {
            return Err(PipelineError::SchemaError {
                subject: subject.to_string(),
                reason: format!("missing required columns: {}", missing.join(", ")),
            });
        }

        let [time_of_day, relative_date, enmo, light, anglez, non_wear]: [ResolvedColumn; 6] =
            resolved
                .try_into()
                .map_err(|_| PipelineError::SchemaError {
                    subject: subject.to_string(),
                    reason: "column resolution incomplete".to_string(),
                })?;

        Ok(Self {
            time_of_day,
            relative_date,
            enmo,
            light,
            anglez,
            non_wear,
        })
    }

    /// Indices of the resolved columns in the schema they were resolved against
    pub fn column_indices(&self) -> Vec<usize> {
        let mut indices = vec![
            self.time_of_day.index,
            self.relative_date.index,
            self.enmo.index,
            self.light.index,
            self.anglez.index,
            self.non_wear.index,
        ];
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// Decode one record batch, appending readings to `out`.
    ///
    /// `row_offset` is the number of rows decoded from earlier batches and is
    /// only used for error messages.
    pub fn decode_batch(
        &self,
        subject: &SubjectId,
        batch: &RecordBatch,
        row_offset: usize,
        out: &mut Vec<SensorReading>,
    ) -> Result<(), PipelineError> {
        let time_of_day = cast_column(subject, batch, &self.time_of_day, row_offset)?;
        let relative_date = cast_column(subject, batch, &self.relative_date, row_offset)?;
        let enmo = cast_column(subject, batch, &self.enmo, row_offset)?;
        let light = cast_column(subject, batch, &self.light, row_offset)?;
        let anglez = cast_column(subject, batch, &self.anglez, row_offset)?;
        let non_wear = cast_column(subject, batch, &self.non_wear, row_offset)?;

        let time_of_day = time_of_day.as_primitive::<Int64Type>();
        let relative_date = relative_date.as_primitive::<Int64Type>();
        let enmo = enmo.as_primitive::<Float64Type>();
        let light = light.as_primitive::<Float64Type>();
        let anglez = anglez.as_primitive::<Float64Type>();
        let non_wear = non_wear.as_primitive::<Float64Type>();

        out.reserve(batch.num_rows());
        for i in 0..batch.num_rows() {
            out.push(SensorReading {
                subject_id: subject.clone(),
                time_of_day: time_of_day.value(i),
                relative_date: relative_date.value(i),
                enmo: enmo.value(i),
                light: light.value(i),
                anglez: anglez.value(i),
                non_wear: non_wear.value(i) != 0.0,
            });
        }

        Ok(())
    }
}

fn find_column(schema: &Schema, spec: &'static ColumnSpec) -> Option<ResolvedColumn> {
    spec.sources.iter().find_map(|source| {
        schema
            .column_with_name(source)
            .map(|(index, _)| ResolvedColumn {
                index,
                source: (*source).to_string(),
                spec,
            })
    })
}

fn cast_column(
    subject: &SubjectId,
    batch: &RecordBatch,
    column: &ResolvedColumn,
    row_offset: usize,
) -> Result<ArrayRef, PipelineError> {
    let array = batch.column(column.index);
    let cast = cast(array.as_ref(), &column.spec.kind.data_type()).map_err(|e| {
        PipelineError::ReadError {
            subject: subject.to_string(),
            reason: format!("column '{}' could not be decoded: {}", column.source, e),
        }
    })?;

    if cast.null_count() > 0 {
        let row = (0..cast.len()).find(|&i| cast.is_null(i)).unwrap_or(0);
        return Err(PipelineError::ReadError {
            subject: subject.to_string(),
            reason: format!(
                "null or invalid value in column '{}' at row {}",
                column.source,
                row_offset + row
            ),
        });
    }

    Ok(cast)
}
