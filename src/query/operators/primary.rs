//! Primary Data Operator - Resampling onto the step grid
//!
//! Produces one row per step-aligned timestamp holding a measurement for
//! every datasource label. Values at grid points come from the surrounding
//! rate-converted observations of the datasource's source name:
//!
//! - an observation exactly at the grid point is used as-is
//! - otherwise the enclosing pair `t0 < t < t1` is linearly interpolated,
//!   provided `t1 - t0` does not exceed the datasource heartbeat
//! - a wider gap, a missing neighbour or an unknown neighbour is unknown
//!
//! Upstream rows are pulled lazily. Only the observations needed to bracket
//! the current grid point are retained, plus at most one heartbeat of
//! lookahead.

use crate::query::descriptor::Descriptor;
use crate::query::error::QueryResult;
use crate::query::operators::RowSource;
use crate::results::Row;
use crate::types::{Duration, Measurement, Resource, Timestamp};
use std::collections::{BTreeMap, VecDeque};

type Observation = (Timestamp, Option<f64>);

/// Output column: label bound to a source track
#[derive(Debug, Clone)]
struct Column {
    label: String,
    source: String,
    heartbeat: Duration,
}

/// Resamples measurements onto `start, start + step, ..., end`
pub struct PrimaryData {
    input: Box<dyn RowSource<Measurement>>,
    resource: Resource,
    columns: Vec<Column>,
    tracks: BTreeMap<String, VecDeque<Observation>>,
    step: Duration,
    reach: Duration,
    next: Timestamp,
    end: Timestamp,
    horizon: Option<Timestamp>,
    exhausted: bool,
}

impl PrimaryData {
    /// Create a resampler for the datasources of `descriptor`
    ///
    /// `start` and `end` are the first and last grid points, both inclusive.
    pub fn new(
        input: Box<dyn RowSource<Measurement>>,
        resource: Resource,
        descriptor: &Descriptor,
        start: Timestamp,
        end: Timestamp,
    ) -> Self {
        let columns: Vec<Column> = descriptor
            .datasources()
            .iter()
            .map(|ds| Column {
                label: ds.label.clone(),
                source: ds.source.clone(),
                heartbeat: descriptor.heartbeat_for(ds),
            })
            .collect();
        let tracks = columns
            .iter()
            .map(|c| (c.source.clone(), VecDeque::new()))
            .collect();

        Self {
            input,
            resource,
            columns,
            tracks,
            step: descriptor.step(),
            reach: descriptor.max_heartbeat(),
            next: start,
            end,
            horizon: None,
            exhausted: false,
        }
    }

    /// Whether more upstream rows are required before evaluating `t`
    fn needs_input(&self, t: Timestamp) -> bool {
        match self.horizon {
            None => true,
            Some(horizon) if horizon < t => true,
            Some(horizon) => {
                horizon < t + self.reach
                    && self
                        .tracks
                        .values()
                        .any(|track| !track.back().is_some_and(|(ts, _)| *ts >= t))
            },
        }
    }

    fn fill(&mut self, t: Timestamp) -> QueryResult<()> {
        while !self.exhausted && self.needs_input(t) {
            let Some(row) = self.input.next_row()? else {
                self.exhausted = true;
                break;
            };
            self.horizon = Some(row.timestamp());
            for (source, track) in self.tracks.iter_mut() {
                if let Some(measurement) = row.get(source) {
                    track.push_back((row.timestamp(), measurement.value));
                }
            }
        }
        Ok(())
    }

    /// Drop observations no longer needed to bracket `t`
    fn advance(&mut self, t: Timestamp) {
        for track in self.tracks.values_mut() {
            while track.len() >= 2 && track[1].0 <= t {
                track.pop_front();
            }
        }
    }
}

/// Value of a track at `t`; the track must have been advanced to `t`
fn value_at(track: &VecDeque<Observation>, t: Timestamp, heartbeat: Duration) -> Option<f64> {
    let &(t0, v0) = track.front()?;
    if t0 == t {
        return v0;
    }
    if t0 > t {
        return None;
    }

    let &(t1, v1) = track.get(1)?;
    let span = t1 - t0;
    if span > heartbeat {
        return None;
    }
    let (v0, v1) = (v0?, v1?);
    let fraction = (t - t0).as_millis() as f64 / span.as_millis() as f64;
    Some(v0 + (v1 - v0) * fraction)
}

impl RowSource<Measurement> for PrimaryData {
    fn next_row(&mut self) -> QueryResult<Option<Row<Measurement>>> {
        if self.next > self.end {
            return Ok(None);
        }
        let t = self.next;
        self.fill(t)?;
        self.advance(t);

        let mut row = Row::new(t, self.resource.clone());
        for column in &self.columns {
            let value = self
                .tracks
                .get(&column.source)
                .and_then(|track| value_at(track, t, column.heartbeat));
            row.add_element(Measurement::new(
                t,
                self.resource.clone(),
                column.label.as_str(),
                value,
            ));
        }

        self.next = t + self.step;
        Ok(Some(row))
    }

    fn name(&self) -> &'static str {
        "PrimaryData"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::descriptor::AggregationFunction;
    use crate::query::operators::testing::{measurement_row, resource};
    use crate::query::operators::{drain, RowsSource};

    fn resample(
        descriptor: &Descriptor,
        rows: Vec<Row<Measurement>>,
        start: i64,
        end: i64,
    ) -> Vec<Row<Measurement>> {
        let mut stage = PrimaryData::new(
            Box::new(RowsSource::new(rows)),
            resource(),
            descriptor,
            Timestamp::from_secs(start),
            Timestamp::from_secs(end),
        );
        drain(&mut stage).unwrap()
    }

    fn values(rows: &[Row<Measurement>], label: &str) -> Vec<Option<f64>> {
        rows.iter()
            .map(|row| row.get(label).and_then(|m| m.value))
            .collect()
    }

    fn gauge_descriptor(step: i64, heartbeat: i64) -> Descriptor {
        Descriptor::new()
            .with_step(Duration::from_secs(step))
            .with_heartbeat(Duration::from_secs(heartbeat))
            .datasource("x", "x", AggregationFunction::Average)
    }

    #[test]
    fn test_gap_wider_than_heartbeat_is_unknown() {
        let rows = vec![
            measurement_row(0, &[("x", Some(0.0))]),
            measurement_row(100, &[("x", Some(100.0))]),
        ];
        let out = resample(&gauge_descriptor(25, 50), rows, 0, 100);
        assert_eq!(
            values(&out, "x"),
            vec![Some(0.0), None, None, None, Some(100.0)]
        );
    }

    #[test]
    fn test_gap_within_heartbeat_is_interpolated() {
        let rows = vec![
            measurement_row(0, &[("x", Some(0.0))]),
            measurement_row(100, &[("x", Some(100.0))]),
        ];
        let out = resample(&gauge_descriptor(25, 150), rows, 0, 100);
        assert_eq!(
            values(&out, "x"),
            vec![Some(0.0), Some(25.0), Some(50.0), Some(75.0), Some(100.0)]
        );
    }

    #[test]
    fn test_every_grid_point_is_emitted() {
        let out = resample(&gauge_descriptor(60, 120), Vec::new(), 0, 300);
        assert_eq!(out.len(), 6);
        assert!(out.iter().all(|row| row.get("x").unwrap().value.is_none()));
        assert_eq!(out[5].timestamp(), Timestamp::from_secs(300));
    }

    #[test]
    fn test_unknown_neighbour_is_unknown() {
        let rows = vec![
            measurement_row(0, &[("x", Some(0.0))]),
            measurement_row(20, &[("x", None)]),
            measurement_row(40, &[("x", Some(4.0))]),
        ];
        let out = resample(&gauge_descriptor(10, 100), rows, 0, 40);
        assert_eq!(
            values(&out, "x"),
            vec![Some(0.0), None, None, None, Some(4.0)]
        );
    }

    #[test]
    fn test_datasource_heartbeat_override() {
        let descriptor = Descriptor::new()
            .with_step(Duration::from_secs(10))
            .with_heartbeat(Duration::from_secs(15))
            .datasource("tight", "m", AggregationFunction::Average)
            .datasource_with_heartbeat(
                "loose",
                "m",
                Duration::from_secs(60),
                AggregationFunction::Average,
            );
        let rows = vec![
            measurement_row(0, &[("m", Some(10.0))]),
            measurement_row(40, &[("m", Some(50.0))]),
        ];
        let out = resample(&descriptor, rows, 0, 40);
        assert_eq!(values(&out, "tight"), vec![Some(10.0), None, None, None, Some(50.0)]);
        assert_eq!(
            values(&out, "loose"),
            vec![Some(10.0), Some(20.0), Some(30.0), Some(40.0), Some(50.0)]
        );
    }

    #[test]
    fn test_independent_sources() {
        let descriptor = Descriptor::new()
            .with_step(Duration::from_secs(10))
            .datasource("a", "a", AggregationFunction::Average)
            .datasource("b", "b", AggregationFunction::Average);
        let rows = vec![
            measurement_row(0, &[("a", Some(1.0))]),
            measurement_row(5, &[("b", Some(2.0))]),
            measurement_row(10, &[("a", Some(3.0))]),
            measurement_row(15, &[("b", Some(4.0))]),
        ];
        let out = resample(&descriptor, rows, 0, 10);
        assert_eq!(values(&out, "a"), vec![Some(1.0), Some(3.0)]);
        assert_eq!(values(&out, "b"), vec![None, Some(3.0)]);
    }
}
