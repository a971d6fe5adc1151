//! Compute Operator - Expression evaluation
//!
//! Appends one measurement per declared expression to every row. Expressions
//! run in declaration order, so later formulas see the results of earlier
//! ones.

use crate::query::descriptor::Descriptor;
use crate::query::error::QueryResult;
use crate::query::expression::{compile_expressions, CompiledExpression};
use crate::query::operators::RowSource;
use crate::results::Row;
use crate::types::Measurement;

/// Evaluates descriptor expressions over consolidated rows
pub struct Compute {
    input: Box<dyn RowSource<Measurement>>,
    expressions: Vec<CompiledExpression>,
}

impl Compute {
    /// Compile the expressions of `descriptor`
    ///
    /// Fails on malformed formulas and on references to labels that are not
    /// resolved before the expression.
    pub fn new(input: Box<dyn RowSource<Measurement>>, descriptor: &Descriptor) -> QueryResult<Self> {
        Ok(Self {
            input,
            expressions: compile_expressions(descriptor)?,
        })
    }
}

impl RowSource<Measurement> for Compute {
    fn next_row(&mut self) -> QueryResult<Option<Row<Measurement>>> {
        let Some(mut row) = self.input.next_row()? else {
            return Ok(None);
        };

        for expression in &self.expressions {
            let value = expression.evaluate(&row);
            let measurement = Measurement::new(
                row.timestamp(),
                row.resource().clone(),
                expression.label(),
                value,
            );
            row.add_element(measurement);
        }

        Ok(Some(row))
    }

    fn name(&self) -> &'static str {
        "Compute"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::descriptor::AggregationFunction;
    use crate::query::operators::testing::measurement_row;
    use crate::query::operators::{drain, RowsSource};

    #[test]
    fn test_expressions_chain_in_order() {
        let descriptor = Descriptor::new()
            .datasource("in", "ifInOctets", AggregationFunction::Average)
            .datasource("out", "ifOutOctets", AggregationFunction::Average)
            .expression("total", "in + out")
            .expression("bits", "total * 8");
        let input = RowsSource::new(vec![
            measurement_row(0, &[("in", Some(1.0)), ("out", Some(2.0))]),
            measurement_row(300, &[("in", Some(1.0)), ("out", None)]),
        ]);

        let mut stage = Compute::new(Box::new(input), &descriptor).unwrap();
        let rows = drain(&mut stage).unwrap();
        assert_eq!(rows[0].get("total").unwrap().value, Some(3.0));
        assert_eq!(rows[0].get("bits").unwrap().value, Some(24.0));
        assert_eq!(rows[1].get("total").unwrap().value, None);
        assert_eq!(rows[1].get("bits").unwrap().value, None);
    }

    #[test]
    fn test_construction_rejects_bad_formula() {
        let descriptor = Descriptor::new()
            .datasource("in", "ifInOctets", AggregationFunction::Average)
            .expression("half", "in /");
        let input = RowsSource::<Measurement>::new(Vec::new());
        assert!(Compute::new(Box::new(input), &descriptor).is_err());
    }
}
