//! Query Operators - Row-at-a-time pipeline stages
//!
//! This module provides the stages of a measurement query:
//! - [`RowAssembler`] merges storage cursors into timestamp-grouped rows
//! - [`Rate`] converts counter and derive samples into per-second rates
//! - [`PrimaryData`] resamples observations onto the step grid
//! - [`Aggregation`] consolidates primary data into resolution buckets
//! - [`Compute`] evaluates expressions over resolved labels
//! - [`Export`] narrows rows to the exported labels
//!
//! Stages follow a pull-based model: each one owns its input as a boxed
//! [`RowSource`] and computes nothing until the next row is demanded.

pub mod aggregation;
pub mod assembler;
pub mod compute;
pub mod export;
pub mod primary;
pub mod rate;

// Re-export commonly used types
pub use aggregation::{Aggregation, AggregationState};
pub use assembler::{MergedCursor, RowAssembler};
pub use compute::Compute;
pub use export::Export;
pub use primary::PrimaryData;
pub use rate::Rate;

use crate::query::error::QueryResult;
use crate::results::Row;
use crate::types::Element;
use std::collections::VecDeque;

// ============================================================================
// Row Source Trait
// ============================================================================

/// Common interface for all pipeline stages
///
/// Downstream stages request rows from upstream stages one at a time.
pub trait RowSource<T: Element>: Send {
    /// Pull the next row
    ///
    /// Returns:
    /// - `Ok(Some(row))` - More data available
    /// - `Ok(None)` - No more data (end of stream)
    /// - `Err(e)` - Error occurred; the stage must not be polled again
    fn next_row(&mut self) -> QueryResult<Option<Row<T>>>;

    /// Get stage name for debugging/tracing
    fn name(&self) -> &'static str;
}

impl<T: Element, S: RowSource<T> + ?Sized> RowSource<T> for Box<S> {
    fn next_row(&mut self) -> QueryResult<Option<Row<T>>> {
        (**self).next_row()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

// ============================================================================
// Sources and Sinks
// ============================================================================

/// Source over rows already in memory
#[derive(Debug, Clone)]
pub struct RowsSource<T: Element> {
    rows: VecDeque<Row<T>>,
}

impl<T: Element> RowsSource<T> {
    /// Create a source yielding `rows` in order
    pub fn new(rows: impl IntoIterator<Item = Row<T>>) -> Self {
        Self {
            rows: rows.into_iter().collect(),
        }
    }
}

impl<T: Element> RowSource<T> for RowsSource<T> {
    fn next_row(&mut self) -> QueryResult<Option<Row<T>>> {
        Ok(self.rows.pop_front())
    }

    fn name(&self) -> &'static str {
        "Rows"
    }
}

/// Iterator adapter over a row source
///
/// Yields each row, then the first error (if any), then stops.
pub struct RowIter<T: Element> {
    source: Box<dyn RowSource<T>>,
    finished: bool,
}

impl<T: Element> Iterator for RowIter<T> {
    type Item = QueryResult<Row<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.source.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.finished = true;
                None
            },
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            },
        }
    }
}

/// Wrap a row source as an iterator
pub fn iter_rows<T: Element>(source: Box<dyn RowSource<T>>) -> RowIter<T> {
    RowIter {
        source,
        finished: false,
    }
}

/// Pull every row from a source
pub fn drain<T: Element, S: RowSource<T> + ?Sized>(source: &mut S) -> QueryResult<Vec<Row<T>>> {
    let mut rows = Vec::new();
    while let Some(row) = source.next_row()? {
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Row builders shared by the operator tests

    use crate::results::Row;
    use crate::types::{Measurement, Resource, Sample, Timestamp, ValueType};

    pub fn resource() -> Resource {
        Resource::new("node1:eth0")
    }

    pub fn sample_row(secs: i64, values: &[(&str, ValueType)]) -> Row<Sample> {
        let ts = Timestamp::from_secs(secs);
        let mut row = Row::new(ts, resource());
        for (name, value) in values {
            row.add_element(Sample::new(ts, resource(), *name, *value));
        }
        row
    }

    pub fn measurement_row(secs: i64, values: &[(&str, Option<f64>)]) -> Row<Measurement> {
        let ts = Timestamp::from_secs(secs);
        let mut row = Row::new(ts, resource());
        for (name, value) in values {
            row.add_element(Measurement::new(ts, resource(), *name, *value));
        }
        row
    }
}
