//! Rows and result sets
//!
//! A [`Row`] groups every element observed or resolved at one timestamp,
//! keyed by element name. A [`ResultSet`] is the ascending, duplicate-free
//! sequence of rows a query materializes.

use crate::query::error::{QueryError, QueryResult};
use crate::types::{Element, Resource, Timestamp};
use serde::Serialize;
use std::collections::BTreeMap;

/// All elements sharing one timestamp and resource
///
/// Elements are keyed by name; a row never holds two elements with the same
/// name. Iteration is in name order so that identical inputs always produce
/// identical output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row<T: Element> {
    timestamp: Timestamp,
    resource: Resource,
    elements: BTreeMap<String, T>,
}

impl<T: Element> Row<T> {
    /// Create an empty row
    pub fn new(timestamp: Timestamp, resource: Resource) -> Self {
        Self {
            timestamp,
            resource,
            elements: BTreeMap::new(),
        }
    }

    /// Row timestamp
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Row resource
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Add an element, keeping the existing one if the name is already present
    ///
    /// Returns `true` if the element was inserted.
    pub fn add_element(&mut self, element: T) -> bool {
        match self.elements.entry(element.name().to_string()) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(element);
                true
            },
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    /// Look up an element by name
    pub fn get(&self, name: &str) -> Option<&T> {
        self.elements.get(name)
    }

    /// Whether an element with this name is present
    pub fn contains(&self, name: &str) -> bool {
        self.elements.contains_key(name)
    }

    /// Elements in name order
    pub fn elements(&self) -> impl Iterator<Item = &T> {
        self.elements.values()
    }

    /// Element names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.elements.keys().map(String::as_str)
    }

    /// Keep only elements whose name satisfies the predicate
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.elements.retain(|name, _| keep(name));
    }

    /// Consume the row, yielding its elements in name order
    pub fn into_elements(self) -> impl Iterator<Item = T> {
        self.elements.into_values()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the row has no elements
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl<T: Element> Row<T> {
    /// Name to numeric value mapping (`None` = unknown), as exposed to callers
    pub fn values(&self) -> BTreeMap<&str, Option<f64>> {
        self.elements
            .iter()
            .map(|(name, element)| (name.as_str(), element.numeric_value()))
            .collect()
    }
}

/// Ordered, append-only sequence of rows
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResultSet<T: Element> {
    rows: Vec<Row<T>>,
}

impl<T: Element> ResultSet<T> {
    /// Create an empty result set
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    /// Append a row; its timestamp must be after the last row's
    pub fn add_row(&mut self, row: Row<T>) -> QueryResult<()> {
        if let Some(last) = self.rows.last() {
            if row.timestamp() <= last.timestamp() {
                return Err(QueryError::internal(format!(
                    "row at {} appended after row at {}",
                    row.timestamp().as_millis(),
                    last.timestamp().as_millis()
                )));
            }
        }
        self.rows.push(row);
        Ok(())
    }

    /// Rows in ascending timestamp order
    pub fn rows(&self) -> &[Row<T>] {
        &self.rows
    }

    /// Iterate over rows
    pub fn iter(&self) -> std::slice::Iter<'_, Row<T>> {
        self.rows.iter()
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl<T: Element> Default for ResultSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> IntoIterator for ResultSet<T> {
    type Item = Row<T>;
    type IntoIter = std::vec::IntoIter<Row<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a, T: Element> IntoIterator for &'a ResultSet<T> {
    type Item = &'a Row<T>;
    type IntoIter = std::slice::Iter<'a, Row<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Measurement, Sample, ValueType};

    fn measurement(ts: i64, name: &str, value: Option<f64>) -> Measurement {
        Measurement::new(Timestamp::from_secs(ts), Resource::new("r"), name, value)
    }

    #[test]
    fn test_row_keeps_first_element_per_name() {
        let mut row = Row::new(Timestamp::from_secs(1), Resource::new("r"));
        assert!(row.add_element(measurement(1, "a", Some(1.0))));
        assert!(!row.add_element(measurement(1, "a", Some(2.0))));
        assert!(row.add_element(measurement(1, "b", None)));
        assert_eq!(row.len(), 2);
        assert_eq!(row.get("a").unwrap().value, Some(1.0));
        assert_eq!(row.names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_row_values_expose_unknowns() {
        let mut row = Row::new(Timestamp::from_secs(1), Resource::new("r"));
        row.add_element(measurement(1, "in", Some(4.0)));
        row.add_element(measurement(1, "out", None));
        let values = row.values();
        assert_eq!(values["in"], Some(4.0));
        assert_eq!(values["out"], None);
    }

    #[test]
    fn test_sample_row_values_are_numeric() {
        let mut row = Row::new(Timestamp::from_secs(1), Resource::new("r"));
        row.add_element(Sample::new(
            Timestamp::from_secs(1),
            Resource::new("r"),
            "ifInOctets",
            ValueType::Counter(4096),
        ));
        assert_eq!(row.values()["ifInOctets"], Some(4096.0));
    }

    #[test]
    fn test_result_set_rejects_non_ascending_rows() {
        let mut results: ResultSet<Measurement> = ResultSet::new();
        results
            .add_row(Row::new(Timestamp::from_secs(2), Resource::new("r")))
            .unwrap();
        assert!(results
            .add_row(Row::new(Timestamp::from_secs(2), Resource::new("r")))
            .is_err());
        assert!(results
            .add_row(Row::new(Timestamp::from_secs(1), Resource::new("r")))
            .is_err());
        assert_eq!(results.len(), 1);
    }
}
