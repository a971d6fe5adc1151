//! Query descriptor
//!
//! A [`Descriptor`] declares everything a measurement query computes: the
//! primary-data step, the default heartbeat, the datasources to resample, the
//! expressions derived from them and the labels to export. It is built once
//! per query and shared read-only by every pipeline stage.
//!
//! # Example
//!
//! ```rust
//! use tsdb_aggregate::query::{AggregationFunction, Descriptor};
//! use tsdb_aggregate::types::Duration;
//!
//! let descriptor = Descriptor::new()
//!     .with_step(Duration::from_secs(300))
//!     .datasource("in", "ifInOctets", AggregationFunction::Average)
//!     .datasource("out", "ifOutOctets", AggregationFunction::Average)
//!     .expression("total", "in + out")
//!     .export(["total"]);
//!
//! assert!(descriptor.validate().is_ok());
//! ```

use crate::config::QueryConfig;
use crate::query::error::{QueryError, QueryResult};
use crate::query::expression::compile_expressions;
use crate::types::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

/// Default primary-data step (5 minutes)
pub const DEFAULT_STEP: Duration = Duration::from_secs(300);

/// Consolidation function applied to the sample points of one bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregationFunction {
    /// Mean of the known values
    Average,
    /// Smallest known value
    Min,
    /// Largest known value
    Max,
    /// Most recent known value
    Last,
    /// Earliest known value
    First,
}

impl fmt::Display for AggregationFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregationFunction::Average => "AVERAGE",
            AggregationFunction::Min => "MIN",
            AggregationFunction::Max => "MAX",
            AggregationFunction::Last => "LAST",
            AggregationFunction::First => "FIRST",
        };
        f.write_str(name)
    }
}

impl FromStr for AggregationFunction {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AVERAGE" | "AVG" => Ok(AggregationFunction::Average),
            "MIN" => Ok(AggregationFunction::Min),
            "MAX" => Ok(AggregationFunction::Max),
            "LAST" => Ok(AggregationFunction::Last),
            "FIRST" => Ok(AggregationFunction::First),
            other => Err(QueryError::validation(format!(
                "unknown aggregation function '{}'",
                other
            ))),
        }
    }
}

/// Binding from an output label to a stored metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datasource {
    /// Output label
    pub label: String,
    /// Sample name read from storage
    pub source: String,
    /// Consolidation function
    pub function: AggregationFunction,
    /// Heartbeat override; the descriptor default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<Duration>,
}

/// Derived metric computed from labels already resolved in the same row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    /// Output label
    pub label: String,
    /// Formula text, e.g. `"(in + out) * 8"`
    pub formula: String,
}

/// Declaration of a measurement query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Primary-data step
    #[serde(default = "default_step")]
    step: Duration,

    /// Default heartbeat; twice the step unless set explicitly
    #[serde(default)]
    heartbeat: Option<Duration>,

    /// Datasources in declaration order
    #[serde(default)]
    datasources: Vec<Datasource>,

    /// Expressions in declaration order
    #[serde(default)]
    expressions: Vec<Expression>,

    /// Labels to export; empty exports everything
    #[serde(default)]
    exports: BTreeSet<String>,
}

fn default_step() -> Duration {
    DEFAULT_STEP
}

impl Default for Descriptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Descriptor {
    /// Create an empty descriptor with the default step
    pub fn new() -> Self {
        Self {
            step: DEFAULT_STEP,
            heartbeat: None,
            datasources: Vec::new(),
            expressions: Vec::new(),
            exports: BTreeSet::new(),
        }
    }

    /// Create an empty descriptor with step and heartbeat from configuration
    pub fn from_config(config: &QueryConfig) -> Self {
        Self {
            step: config.default_step,
            heartbeat: config.default_heartbeat,
            ..Self::new()
        }
    }

    /// Set the primary-data step
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Set the default heartbeat
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    /// Declare a datasource using the default heartbeat
    pub fn datasource(
        mut self,
        label: impl Into<String>,
        source: impl Into<String>,
        function: AggregationFunction,
    ) -> Self {
        self.datasources.push(Datasource {
            label: label.into(),
            source: source.into(),
            function,
            heartbeat: None,
        });
        self
    }

    /// Declare a datasource with its own heartbeat
    pub fn datasource_with_heartbeat(
        mut self,
        label: impl Into<String>,
        source: impl Into<String>,
        heartbeat: Duration,
        function: AggregationFunction,
    ) -> Self {
        self.datasources.push(Datasource {
            label: label.into(),
            source: source.into(),
            function,
            heartbeat: Some(heartbeat),
        });
        self
    }

    /// Declare an expression
    pub fn expression(mut self, label: impl Into<String>, formula: impl Into<String>) -> Self {
        self.expressions.push(Expression {
            label: label.into(),
            formula: formula.into(),
        });
        self
    }

    /// Add labels to the export set
    pub fn export<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exports.extend(labels.into_iter().map(Into::into));
        self
    }

    /// Primary-data step
    pub fn step(&self) -> Duration {
        self.step
    }

    /// Default heartbeat
    pub fn heartbeat(&self) -> Duration {
        self.heartbeat.unwrap_or_else(|| self.step.times(2))
    }

    /// Effective heartbeat of a datasource
    pub fn heartbeat_for(&self, datasource: &Datasource) -> Duration {
        datasource.heartbeat.unwrap_or_else(|| self.heartbeat())
    }

    /// Largest effective heartbeat across datasources
    pub fn max_heartbeat(&self) -> Duration {
        self.datasources
            .iter()
            .map(|ds| self.heartbeat_for(ds))
            .max()
            .unwrap_or_else(|| self.heartbeat())
    }

    /// Datasources in declaration order
    pub fn datasources(&self) -> &[Datasource] {
        &self.datasources
    }

    /// Expressions in declaration order
    pub fn expressions(&self) -> &[Expression] {
        &self.expressions
    }

    /// Export set
    pub fn exports(&self) -> &BTreeSet<String> {
        &self.exports
    }

    /// Distinct sample names the datasources read
    pub fn source_names(&self) -> BTreeSet<String> {
        self.datasources.iter().map(|ds| ds.source.clone()).collect()
    }

    /// Every declared label, datasources first
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.datasources
            .iter()
            .map(|ds| ds.label.as_str())
            .chain(self.expressions.iter().map(|e| e.label.as_str()))
    }

    /// Check the descriptor for configuration errors
    ///
    /// Rejects non-positive step or heartbeats, empty or duplicate labels,
    /// unparsable formulas, formulas referencing undeclared or later labels,
    /// and exports of undeclared labels.
    pub fn validate(&self) -> QueryResult<()> {
        if !self.step.is_positive() {
            return Err(QueryError::validation(format!(
                "step must be positive, got {}",
                self.step
            )));
        }
        if !self.heartbeat().is_positive() {
            return Err(QueryError::validation(format!(
                "heartbeat must be positive, got {}",
                self.heartbeat()
            )));
        }

        let mut seen = HashSet::new();
        for label in self.labels() {
            if label.trim().is_empty() {
                return Err(QueryError::validation("labels must not be empty"));
            }
            if !seen.insert(label) {
                return Err(QueryError::validation(format!(
                    "label '{}' declared more than once",
                    label
                )));
            }
        }

        for ds in &self.datasources {
            if ds.source.trim().is_empty() {
                return Err(QueryError::validation(format!(
                    "datasource '{}' has an empty source name",
                    ds.label
                )));
            }
            if let Some(heartbeat) = ds.heartbeat {
                if !heartbeat.is_positive() {
                    return Err(QueryError::validation(format!(
                        "datasource '{}' heartbeat must be positive, got {}",
                        ds.label, heartbeat
                    )));
                }
            }
        }

        compile_expressions(self)?;

        if let Some(missing) = self.exports.iter().find(|l| !seen.contains(l.as_str())) {
            return Err(QueryError::validation(format!(
                "export of undeclared label '{}'",
                missing
            )));
        }

        Ok(())
    }
}
