//! Aggregation Operator - Bucket consolidation
//!
//! Consolidates primary data into buckets of the query resolution:
//! - Buckets are `[b, b + resolution)` with `b` a multiple of the resolution
//!   counted from the epoch
//! - Each bucket consumes `resolution / step` primary rows
//! - Each datasource label is folded with its own function
//!   (AVERAGE, MIN, MAX, LAST, FIRST)
//!
//! Unknown sample points are skipped. A bucket with no known sample point
//! still produces a row, with an unknown measurement for that label.
//! Averages use Kahan summation.

use crate::query::descriptor::{AggregationFunction, Descriptor};
use crate::query::error::{QueryError, QueryResult};
use crate::query::operators::RowSource;
use crate::results::Row;
use crate::types::{Duration, Measurement, Resource, Timestamp};

// ============================================================================
// Aggregation State
// ============================================================================

/// Compensated running sum
#[derive(Debug, Clone, Copy, Default)]
pub struct KahanSum {
    sum: f64,
    compensation: f64,
}

impl KahanSum {
    /// Create an empty sum
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one value
    #[inline]
    pub fn add(&mut self, value: f64) {
        let y = value - self.compensation;
        let t = self.sum + y;
        self.compensation = (t - self.sum) - y;
        self.sum = t;
    }

    /// Current sum
    pub fn sum(&self) -> f64 {
        self.sum
    }
}

/// State for incremental consolidation of one bucket
#[derive(Debug, Clone)]
pub enum AggregationState {
    /// Sum and count of known values
    Average {
        /// Running sum
        sum: KahanSum,
        /// Known values seen
        count: u64,
    },

    /// Minimum value seen
    Min(Option<f64>),

    /// Maximum value seen
    Max(Option<f64>),

    /// Earliest known value and its timestamp
    First(Option<(Timestamp, f64)>),

    /// Latest known value and its timestamp
    Last(Option<(Timestamp, f64)>),
}

impl AggregationState {
    /// Create initial state for an aggregation function
    pub fn new(function: AggregationFunction) -> Self {
        match function {
            AggregationFunction::Average => AggregationState::Average {
                sum: KahanSum::new(),
                count: 0,
            },
            AggregationFunction::Min => AggregationState::Min(None),
            AggregationFunction::Max => AggregationState::Max(None),
            AggregationFunction::First => AggregationState::First(None),
            AggregationFunction::Last => AggregationState::Last(None),
        }
    }

    /// Update state with one sample point; unknown points are ignored
    pub fn update(&mut self, timestamp: Timestamp, value: Option<f64>) {
        let Some(value) = value else {
            return;
        };
        match self {
            AggregationState::Average { sum, count } => {
                sum.add(value);
                *count += 1;
            },
            AggregationState::Min(min) => {
                *min = Some(min.map_or(value, |m| m.min(value)));
            },
            AggregationState::Max(max) => {
                *max = Some(max.map_or(value, |m| m.max(value)));
            },
            AggregationState::First(first) => {
                if first.is_none_or(|(ts, _)| timestamp < ts) {
                    *first = Some((timestamp, value));
                }
            },
            AggregationState::Last(last) => {
                if last.is_none_or(|(ts, _)| timestamp >= ts) {
                    *last = Some((timestamp, value));
                }
            },
        }
    }

    /// Finalize and return the consolidated value, `None` if nothing was known
    pub fn finalize(&self) -> Option<f64> {
        match self {
            AggregationState::Average { count: 0, .. } => None,
            AggregationState::Average { sum, count } => Some(sum.sum() / *count as f64),
            AggregationState::Min(min) => *min,
            AggregationState::Max(max) => *max,
            AggregationState::First(first) => first.map(|(_, v)| v),
            AggregationState::Last(last) => last.map(|(_, v)| v),
        }
    }
}

// ============================================================================
// Aggregation Operator
// ============================================================================

/// Consolidates step-aligned rows into resolution buckets
pub struct Aggregation {
    input: Box<dyn RowSource<Measurement>>,
    resource: Resource,
    columns: Vec<(String, AggregationFunction)>,
    resolution: Duration,
    points_per_bucket: i64,
    next_bucket: Timestamp,
    last_bucket: Timestamp,
}

impl Aggregation {
    /// Create a consolidation stage for buckets covering `[start, end]`
    ///
    /// The resolution must be a positive multiple of the descriptor step.
    pub fn new(
        input: Box<dyn RowSource<Measurement>>,
        resource: Resource,
        descriptor: &Descriptor,
        start: Timestamp,
        end: Timestamp,
        resolution: Duration,
    ) -> QueryResult<Self> {
        let step = descriptor.step();
        if !resolution.is_positive() || !resolution.is_multiple_of(step) {
            return Err(QueryError::validation(format!(
                "resolution {} must be a positive multiple of step {}",
                resolution, step
            )));
        }

        Ok(Self {
            input,
            resource,
            columns: descriptor
                .datasources()
                .iter()
                .map(|ds| (ds.label.clone(), ds.function))
                .collect(),
            resolution,
            points_per_bucket: resolution.as_millis() / step.as_millis(),
            next_bucket: start.align_down(resolution),
            last_bucket: end.align_down(resolution),
        })
    }
}

impl RowSource<Measurement> for Aggregation {
    fn next_row(&mut self) -> QueryResult<Option<Row<Measurement>>> {
        if self.next_bucket > self.last_bucket {
            return Ok(None);
        }
        let bucket = self.next_bucket;
        let bucket_end = bucket + self.resolution;

        let mut states: Vec<AggregationState> = self
            .columns
            .iter()
            .map(|(_, function)| AggregationState::new(*function))
            .collect();

        for _ in 0..self.points_per_bucket {
            let Some(point) = self.input.next_row()? else {
                break;
            };
            if point.timestamp() < bucket || point.timestamp() >= bucket_end {
                return Err(QueryError::internal(format!(
                    "sample point {} outside bucket [{}, {})",
                    point.timestamp(),
                    bucket,
                    bucket_end
                )));
            }
            for ((label, _), state) in self.columns.iter().zip(states.iter_mut()) {
                state.update(point.timestamp(), point.get(label).and_then(|m| m.value));
            }
        }

        let mut row = Row::new(bucket, self.resource.clone());
        for ((label, _), state) in self.columns.iter().zip(&states) {
            row.add_element(Measurement::new(
                bucket,
                self.resource.clone(),
                label.as_str(),
                state.finalize(),
            ));
        }

        self.next_bucket = bucket_end;
        Ok(Some(row))
    }

    fn name(&self) -> &'static str {
        "Aggregation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::operators::testing::{measurement_row, resource};
    use crate::query::operators::{drain, RowsSource};

    fn descriptor() -> Descriptor {
        Descriptor::new()
            .with_step(Duration::from_secs(10))
            .datasource("avg", "m", AggregationFunction::Average)
            .datasource("min", "m", AggregationFunction::Min)
            .datasource("max", "m", AggregationFunction::Max)
            .datasource("first", "m", AggregationFunction::First)
            .datasource("last", "m", AggregationFunction::Last)
    }

    fn points(values: &[(i64, Option<f64>)]) -> Vec<Row<Measurement>> {
        values
            .iter()
            .map(|&(secs, v)| {
                measurement_row(
                    secs,
                    &[
                        ("avg", v),
                        ("min", v),
                        ("max", v),
                        ("first", v),
                        ("last", v),
                    ],
                )
            })
            .collect()
    }

    fn consolidate(rows: Vec<Row<Measurement>>, start: i64, end: i64) -> Vec<Row<Measurement>> {
        let mut stage = Aggregation::new(
            Box::new(RowsSource::new(rows)),
            resource(),
            &descriptor(),
            Timestamp::from_secs(start),
            Timestamp::from_secs(end),
            Duration::from_secs(30),
        )
        .unwrap();
        drain(&mut stage).unwrap()
    }

    fn value(row: &Row<Measurement>, label: &str) -> Option<f64> {
        row.get(label).and_then(|m| m.value)
    }

    #[test]
    fn test_functions_skip_unknowns() {
        let rows = consolidate(
            points(&[(0, None), (10, Some(4.0)), (20, Some(2.0))]),
            0,
            0,
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(value(&rows[0], "avg"), Some(3.0));
        assert_eq!(value(&rows[0], "min"), Some(2.0));
        assert_eq!(value(&rows[0], "max"), Some(4.0));
        assert_eq!(value(&rows[0], "first"), Some(4.0));
        assert_eq!(value(&rows[0], "last"), Some(2.0));
    }

    #[test]
    fn test_all_unknown_bucket_still_emitted() {
        let rows = consolidate(
            points(&[
                (0, Some(1.0)),
                (10, Some(1.0)),
                (20, Some(1.0)),
                (30, None),
                (40, None),
                (50, None),
            ]),
            0,
            59,
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].timestamp(), Timestamp::from_secs(30));
        assert_eq!(rows[1].len(), 5);
        assert!(rows[1].elements().all(|m| m.value.is_none()));
    }

    #[test]
    fn test_buckets_are_epoch_aligned() {
        let rows = consolidate(
            points(&[(-30, Some(1.0)), (-20, Some(2.0)), (-10, Some(3.0))]),
            -5,
            -1,
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp(), Timestamp::from_secs(-30));
        assert_eq!(value(&rows[0], "avg"), Some(2.0));
    }

    #[test]
    fn test_resolution_must_be_multiple_of_step() {
        let result = Aggregation::new(
            Box::new(RowsSource::new(Vec::new())),
            resource(),
            &descriptor(),
            Timestamp::from_secs(0),
            Timestamp::from_secs(60),
            Duration::from_secs(25),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_kahan_sum_precision() {
        let mut sum = KahanSum::new();
        let mut naive = 0.0;
        for _ in 0..10 {
            sum.add(0.1);
            naive += 0.1;
        }
        assert_ne!(naive, 1.0);
        assert_eq!(sum.sum(), 1.0);
    }
}
