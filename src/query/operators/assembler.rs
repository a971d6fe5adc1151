//! Row Assembler - Merges storage cursors into rows
//!
//! Storage reads return one ascending cursor per time partition, each
//! yielding single elements. The assembler k-way merges those cursors by
//! `(timestamp, cursor index)` and groups consecutive elements sharing a
//! timestamp into one [`Row`]. When two elements with the same name land in
//! the same row, the one from the lower cursor index is kept.

use crate::error::StorageError;
use crate::query::error::QueryResult;
use crate::query::operators::RowSource;
use crate::results::Row;
use crate::storage::Cursor;
use crate::types::{Element, Timestamp};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::debug;

// ============================================================================
// K-way merge
// ============================================================================

/// Heap entry ordered so that `BinaryHeap` pops the smallest key first
struct HeapEntry<T> {
    timestamp: Timestamp,
    index: usize,
    element: T,
}

impl<T> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.index == other.index
    }
}

impl<T> Eq for HeapEntry<T> {}

impl<T> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for HeapEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.timestamp, other.index).cmp(&(self.timestamp, self.index))
    }
}

/// Ascending merge of several ascending cursors
///
/// Each cursor is checked for ordering as it is read; an element older than
/// its cursor's previous element is reported as [`StorageError::OutOfOrder`].
/// After the first error, or once every cursor is exhausted, the merge keeps
/// returning `None`.
pub struct MergedCursor<T: Element> {
    cursors: Vec<Cursor<T>>,
    last_seen: Vec<Option<Timestamp>>,
    heap: BinaryHeap<HeapEntry<T>>,
    primed: bool,
    failed: bool,
}

impl<T: Element> MergedCursor<T> {
    /// Create a merge over `cursors`; nothing is read until the first `next`
    pub fn new(cursors: Vec<Cursor<T>>) -> Self {
        let count = cursors.len();
        Self {
            cursors,
            last_seen: vec![None; count],
            heap: BinaryHeap::with_capacity(count),
            primed: false,
            failed: false,
        }
    }

    /// Read the next element of one cursor into the heap
    fn pull(&mut self, index: usize) -> Result<(), StorageError> {
        match self.cursors[index].next() {
            Some(Ok(element)) => {
                let timestamp = element.timestamp();
                if let Some(previous) = self.last_seen[index] {
                    if timestamp < previous {
                        return Err(StorageError::OutOfOrder {
                            previous: previous.as_millis(),
                            current: timestamp.as_millis(),
                        });
                    }
                }
                self.last_seen[index] = Some(timestamp);
                self.heap.push(HeapEntry {
                    timestamp,
                    index,
                    element,
                });
                Ok(())
            },
            Some(Err(e)) => Err(e),
            None => Ok(()),
        }
    }

    fn fail(&mut self, error: StorageError) -> Option<Result<T, StorageError>> {
        self.failed = true;
        self.heap.clear();
        Some(Err(error))
    }
}

impl<T: Element> Iterator for MergedCursor<T> {
    type Item = Result<T, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        if !self.primed {
            self.primed = true;
            for index in 0..self.cursors.len() {
                if let Err(e) = self.pull(index) {
                    return self.fail(e);
                }
            }
        }

        let entry = self.heap.pop()?;
        if let Err(e) = self.pull(entry.index) {
            return self.fail(e);
        }
        Some(Ok(entry.element))
    }
}

// ============================================================================
// Row grouping
// ============================================================================

/// Groups merged elements into one row per timestamp
///
/// Elements whose name is not in the filter are skipped; an empty filter
/// accepts everything. Every accepted element is counted.
pub struct RowAssembler<T: Element> {
    elements: MergedCursor<T>,
    names: Option<HashSet<String>>,
    pending: Option<T>,
    count: Arc<AtomicUsize>,
    rows: usize,
}

impl<T: Element> RowAssembler<T> {
    /// Create an assembler over storage cursors
    pub fn new(cursors: Vec<Cursor<T>>) -> Self {
        Self {
            elements: MergedCursor::new(cursors),
            names: None,
            pending: None,
            count: Arc::new(AtomicUsize::new(0)),
            rows: 0,
        }
    }

    /// Only keep elements with one of these names
    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: HashSet<String> = names.into_iter().map(Into::into).collect();
        self.names = if names.is_empty() { None } else { Some(names) };
        self
    }

    /// Number of elements consumed so far
    pub fn result_count(&self) -> usize {
        self.count.load(AtomicOrdering::Relaxed)
    }

    /// Shared handle to the element counter, readable after the assembler
    /// has been moved into a pipeline
    pub fn count_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.count)
    }

    fn accepts(&self, element: &T) -> bool {
        self.names
            .as_ref()
            .is_none_or(|names| names.contains(element.name()))
    }

    fn next_element(&mut self) -> QueryResult<Option<T>> {
        loop {
            match self.elements.next() {
                None => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(element)) => {
                    if !self.accepts(&element) {
                        continue;
                    }
                    self.count.fetch_add(1, AtomicOrdering::Relaxed);
                    return Ok(Some(element));
                },
            }
        }
    }
}

impl<T: Element> RowSource<T> for RowAssembler<T> {
    fn next_row(&mut self) -> QueryResult<Option<Row<T>>> {
        let first = match self.pending.take() {
            Some(element) => element,
            None => match self.next_element()? {
                Some(element) => element,
                None => {
                    debug!(
                        rows = self.rows,
                        elements = self.result_count(),
                        "Row assembly finished"
                    );
                    return Ok(None);
                },
            },
        };

        let mut row = Row::new(first.timestamp(), first.resource().clone());
        row.add_element(first);

        while let Some(element) = self.next_element()? {
            if element.timestamp() != row.timestamp() {
                self.pending = Some(element);
                break;
            }
            row.add_element(element);
        }

        self.rows += 1;
        Ok(Some(row))
    }

    fn name(&self) -> &'static str {
        "RowAssembler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::operators::drain;
    use crate::query::operators::testing::resource;
    use crate::query::QueryErrorKind;
    use crate::types::{Sample, ValueType};

    fn gauge(secs: i64, name: &str, value: f64) -> Sample {
        Sample::new(
            Timestamp::from_secs(secs),
            resource(),
            name,
            ValueType::Gauge(value),
        )
    }

    fn cursor(samples: Vec<Sample>) -> Cursor<Sample> {
        Box::new(samples.into_iter().map(Ok))
    }

    #[test]
    fn test_groups_elements_by_timestamp() {
        let mut assembler = RowAssembler::new(vec![cursor(vec![
            gauge(1, "a", 1.0),
            gauge(1, "b", 2.0),
            gauge(2, "a", 3.0),
        ])]);
        let rows = drain(&mut assembler).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 2);
        assert_eq!(rows[1].timestamp(), Timestamp::from_secs(2));
        assert_eq!(assembler.result_count(), 3);
        assert!(assembler.next_row().unwrap().is_none());
    }

    #[test]
    fn test_merges_cursors_sharing_a_timestamp() {
        let mut assembler = RowAssembler::new(vec![
            cursor(vec![gauge(5, "a", 1.0), gauge(9, "a", 2.0)]),
            cursor(vec![gauge(5, "b", 7.0), gauge(7, "b", 8.0)]),
        ]);
        let rows = drain(&mut assembler).unwrap();
        let stamps: Vec<i64> = rows.iter().map(|r| r.timestamp().as_millis() / 1000).collect();
        assert_eq!(stamps, vec![5, 7, 9]);
        assert_eq!(rows[0].names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_names_keep_lowest_cursor() {
        let mut assembler = RowAssembler::new(vec![
            cursor(vec![gauge(5, "a", 1.0)]),
            cursor(vec![gauge(5, "a", 2.0)]),
        ]);
        let rows = drain(&mut assembler).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("a").unwrap().value, ValueType::Gauge(1.0));
    }

    #[test]
    fn test_name_filter() {
        let mut assembler = RowAssembler::new(vec![cursor(vec![
            gauge(1, "a", 1.0),
            gauge(1, "b", 2.0),
            gauge(2, "b", 3.0),
        ])])
        .with_names(["a"]);
        let counter = assembler.count_handle();
        let rows = drain(&mut assembler).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].contains("b"));
        assert_eq!(counter.load(AtomicOrdering::Relaxed), 1);
    }

    #[test]
    fn test_no_cursors_yields_nothing() {
        let mut assembler: RowAssembler<Sample> = RowAssembler::new(Vec::new());
        assert!(assembler.next_row().unwrap().is_none());
    }

    #[test]
    fn test_out_of_order_cursor_is_fatal() {
        let mut assembler =
            RowAssembler::new(vec![cursor(vec![gauge(5, "a", 1.0), gauge(3, "a", 2.0)])]);
        let err = drain(&mut assembler).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::Storage);
        assert!(assembler.next_row().unwrap().is_none());
    }

    #[test]
    fn test_cursor_error_propagates() {
        let failing: Cursor<Sample> = Box::new(
            vec![
                Ok(gauge(1, "a", 1.0)),
                Err(StorageError::ReadFailed("partition offline".into())),
            ]
            .into_iter(),
        );
        let mut assembler = RowAssembler::new(vec![failing]);
        let err = drain(&mut assembler).unwrap_err();
        assert!(err.message.contains("partition offline"));
    }
}
