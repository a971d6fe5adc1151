//! Export Operator - Column selection
//!
//! Keeps only the labels in the export set. An empty export set passes rows
//! through untouched. Rows left without elements are still emitted so that
//! the bucket sequence stays complete.

use crate::query::error::QueryResult;
use crate::query::operators::RowSource;
use crate::results::Row;
use crate::types::Measurement;
use std::collections::BTreeSet;

/// Narrows rows to the exported labels
pub struct Export {
    input: Box<dyn RowSource<Measurement>>,
    labels: BTreeSet<String>,
}

impl Export {
    /// Create an export stage keeping `labels`
    pub fn new(input: Box<dyn RowSource<Measurement>>, labels: BTreeSet<String>) -> Self {
        Self { input, labels }
    }
}

impl RowSource<Measurement> for Export {
    fn next_row(&mut self) -> QueryResult<Option<Row<Measurement>>> {
        let Some(mut row) = self.input.next_row()? else {
            return Ok(None);
        };
        if !self.labels.is_empty() {
            row.retain(|name| self.labels.contains(name));
        }
        Ok(Some(row))
    }

    fn name(&self) -> &'static str {
        "Export"
    }
}
