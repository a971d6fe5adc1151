//! Rate Operator - Counter to rate conversion
//!
//! Counter and derive samples are cumulative; this stage turns consecutive
//! observations of the same name into a per-second rate of change. Gauge
//! and absolute samples are passed through unchanged.
//!
//! The first observation of a rate-typed name has no predecessor and
//! produces no measurement. A counter that goes backwards is assumed to have
//! wrapped: at 2^32 if the previous value fits in 32 bits, otherwise at 2^64.

use crate::query::error::QueryResult;
use crate::query::operators::RowSource;
use crate::results::Row;
use crate::types::{Measurement, Sample, Timestamp, ValueType};
use std::collections::{HashMap, HashSet};

/// Last observation of a rate-typed name
#[derive(Debug, Clone, Copy)]
struct RateState {
    value: ValueType,
    timestamp: Timestamp,
}

/// Converts cumulative samples into per-second rates
pub struct Rate {
    input: Box<dyn RowSource<Sample>>,
    names: Option<HashSet<String>>,
    state: HashMap<String, RateState>,
}

impl Rate {
    /// Create a rate stage over `input`
    ///
    /// Only names in `names` are converted; an empty set converts every
    /// counter and derive sample.
    pub fn new<I, S>(input: Box<dyn RowSource<Sample>>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: HashSet<String> = names.into_iter().map(Into::into).collect();
        Self {
            input,
            names: if names.is_empty() { None } else { Some(names) },
            state: HashMap::new(),
        }
    }

    fn converts(&self, sample: &Sample) -> bool {
        sample.value.is_rate_type()
            && self
                .names
                .as_ref()
                .is_none_or(|names| names.contains(&sample.name))
    }
}

/// Difference between two counter readings, allowing for one wrap
fn counter_delta(previous: u64, current: u64) -> f64 {
    if current >= previous {
        return (current - previous) as f64;
    }
    let modulus: u128 = if previous <= u64::from(u32::MAX) {
        1 << 32
    } else {
        1 << 64
    };
    (u128::from(current) + modulus - u128::from(previous)) as f64
}

/// Per-second rate between two observations; `None` if it cannot be known
fn rate_between(previous: RateState, value: ValueType, timestamp: Timestamp) -> Option<f64> {
    let elapsed = timestamp - previous.timestamp;
    if !elapsed.is_positive() {
        return None;
    }

    let delta = match (previous.value, value) {
        (ValueType::Counter(p), ValueType::Counter(c)) => counter_delta(p, c),
        (ValueType::Derive(p), ValueType::Derive(c)) => (i128::from(c) - i128::from(p)) as f64,
        // Type changed between observations; fall back to plain difference
        (p, c) => c.as_f64() - p.as_f64(),
    };

    Some(delta / elapsed.as_secs_f64()).filter(|r| r.is_finite())
}

impl RowSource<Measurement> for Rate {
    fn next_row(&mut self) -> QueryResult<Option<Row<Measurement>>> {
        let Some(row) = self.input.next_row()? else {
            return Ok(None);
        };

        let mut out = Row::new(row.timestamp(), row.resource().clone());
        for sample in row.into_elements() {
            if !self.converts(&sample) {
                let value = Some(sample.value.as_f64());
                out.add_element(
                    Measurement::new(sample.timestamp, sample.resource, sample.name, value)
                        .with_attributes(sample.attributes),
                );
                continue;
            }

            let current = RateState {
                value: sample.value,
                timestamp: sample.timestamp,
            };
            let Some(previous) = self.state.insert(sample.name.clone(), current) else {
                continue;
            };

            let value = rate_between(previous, sample.value, sample.timestamp);
            out.add_element(
                Measurement::new(sample.timestamp, sample.resource, sample.name, value)
                    .with_attributes(sample.attributes),
            );
        }

        Ok(Some(out))
    }

    fn name(&self) -> &'static str {
        "Rate"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::operators::testing::sample_row;
    use crate::query::operators::{drain, RowsSource};

    fn rate(rows: Vec<Row<Sample>>, names: &[&str]) -> Vec<Row<Measurement>> {
        let mut stage = Rate::new(Box::new(RowsSource::new(rows)), names.iter().copied());
        drain(&mut stage).unwrap()
    }

    #[test]
    fn test_counter_rate() {
        let rows = rate(
            vec![
                sample_row(0, &[("octets", ValueType::Counter(10))]),
                sample_row(10, &[("octets", ValueType::Counter(40))]),
            ],
            &[],
        );
        assert_eq!(rows.len(), 2);
        assert!(rows[0].is_empty());
        assert_eq!(rows[1].get("octets").unwrap().value, Some(3.0));
    }

    #[test]
    fn test_gauge_and_absolute_pass_through() {
        let rows = rate(
            vec![sample_row(
                0,
                &[
                    ("temp", ValueType::Gauge(21.5)),
                    ("errors", ValueType::Absolute(4)),
                ],
            )],
            &[],
        );
        assert_eq!(rows[0].get("temp").unwrap().value, Some(21.5));
        assert_eq!(rows[0].get("errors").unwrap().value, Some(4.0));
    }

    #[test]
    fn test_counter_wrap() {
        let rows = rate(
            vec![
                sample_row(0, &[("c32", ValueType::Counter(u64::from(u32::MAX) - 9))]),
                sample_row(10, &[("c32", ValueType::Counter(10))]),
            ],
            &[],
        );
        assert_eq!(rows[1].get("c32").unwrap().value, Some(2.0));

        let rows = rate(
            vec![
                sample_row(0, &[("c64", ValueType::Counter(u64::MAX - 4))]),
                sample_row(5, &[("c64", ValueType::Counter(5))]),
            ],
            &[],
        );
        assert_eq!(rows[1].get("c64").unwrap().value, Some(2.0));
    }

    #[test]
    fn test_derive_may_decrease() {
        let rows = rate(
            vec![
                sample_row(0, &[("queue", ValueType::Derive(100))]),
                sample_row(20, &[("queue", ValueType::Derive(60))]),
            ],
            &[],
        );
        assert_eq!(rows[1].get("queue").unwrap().value, Some(-2.0));
    }

    #[test]
    fn test_names_outside_filter_pass_through() {
        let rows = rate(
            vec![
                sample_row(0, &[("a", ValueType::Counter(1)), ("b", ValueType::Counter(7))]),
                sample_row(1, &[("a", ValueType::Counter(2)), ("b", ValueType::Counter(9))]),
            ],
            &["a"],
        );
        assert!(!rows[0].contains("a"));
        assert_eq!(rows[0].get("b").unwrap().value, Some(7.0));
        assert_eq!(rows[1].get("a").unwrap().value, Some(1.0));
        assert_eq!(rows[1].get("b").unwrap().value, Some(9.0));
    }

    #[test]
    fn test_non_positive_elapsed_is_unknown() {
        let previous = RateState {
            value: ValueType::Counter(1),
            timestamp: Timestamp::from_secs(10),
        };
        assert_eq!(
            rate_between(previous, ValueType::Counter(5), Timestamp::from_secs(10)),
            None
        );
        assert_eq!(
            rate_between(previous, ValueType::Counter(5), Timestamp::from_secs(9)),
            None
        );
    }
}
