//! Daily feature aggregation
//!
//! Collapses one subject's raw readings into one row per (subject, day):
//! - Non-wear samples are dropped before anything is counted
//! - Remaining samples are classified as night or day by clock hour
//! - Movement, light and orientation statistics are reduced per day

use crate::types::{DailyAggregate, SensorReading, SeriesTable, SubjectId};
use std::collections::BTreeMap;

/// Night starts at 22:00 local time. Recalibrate together with [`NIGHT_END_HOUR`].
pub const NIGHT_START_HOUR: f64 = 22.0;

/// Night ends at 07:00 local time
pub const NIGHT_END_HOUR: f64 = 7.0;

const NANOS_PER_SECOND: f64 = 1e9;
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Fractional hour of day for a nanoseconds-since-midnight timestamp
pub fn hour_of_day(time_of_day_ns: i64) -> f64 {
    let seconds = time_of_day_ns as f64 / NANOS_PER_SECOND;
    seconds / SECONDS_PER_HOUR
}

/// Whether an hour falls in the night window (wraps across midnight)
pub fn is_night(hour: f64) -> bool {
    hour >= NIGHT_START_HOUR || hour < NIGHT_END_HOUR
}

/// Aggregator for computing daily aggregates
#[derive(Debug, Clone, Copy, Default)]
pub struct DailyFeatureAggregator;

impl DailyFeatureAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Aggregate a subject's series table
    pub fn aggregate_table(&self, table: &SeriesTable) -> Vec<DailyAggregate> {
        self.aggregate(&table.readings)
    }

    /// Aggregate readings into daily rows ordered by (subject, day).
    ///
    /// Days without any worn sample produce no row. An empty result is valid.
    pub fn aggregate(&self, readings: &[SensorReading]) -> Vec<DailyAggregate> {
        let mut by_day: BTreeMap<(SubjectId, i64), DayAccumulator> = BTreeMap::new();

        for reading in readings.iter().filter(|r| !r.non_wear) {
            let night = is_night(hour_of_day(reading.time_of_day));

            by_day
                .entry((reading.subject_id.clone(), reading.relative_date))
                .or_default()
                .add(reading, night);
        }

        by_day
            .into_iter()
            .filter_map(|((subject_id, day), acc)| acc.finish(subject_id, day))
            .collect()
    }
}

/// Running sums for a single (subject, day) group
struct DayAccumulator {
    enmo_sum: f64,
    light_sum: f64,
    light_max: f64,
    anglez_sum: f64,
    total_samples: u64,
    night_samples: u64,
}

impl Default for DayAccumulator {
    fn default() -> Self {
        Self {
            enmo_sum: 0.0,
            light_sum: 0.0,
            light_max: f64::NEG_INFINITY,
            anglez_sum: 0.0,
            total_samples: 0,
            night_samples: 0,
        }
    }
}

impl DayAccumulator {
    fn add(&mut self, reading: &SensorReading, night: bool) {
        self.enmo_sum += reading.enmo;
        self.light_sum += reading.light;
        self.light_max = self.light_max.max(reading.light);
        self.anglez_sum += reading.anglez;
        self.total_samples += 1;
        if night {
            self.night_samples += 1;
        }
    }

    fn finish(self, subject_id: SubjectId, day: i64) -> Option<DailyAggregate> {
        if self.total_samples == 0 {
            return None;
        }

        let n = self.total_samples as f64;

        Some(DailyAggregate {
            subject_id,
            day,
            mean_enmo: self.enmo_sum / n,
            total_enmo: self.enmo_sum,
            mean_light: self.light_sum / n,
            max_light: self.light_max,
            mean_anglez: self.anglez_sum / n,
            total_samples: self.total_samples,
            night_samples: self.night_samples,
            percent_night_activity: self.night_samples as f64 / n,
        })
    }
}
