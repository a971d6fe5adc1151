//! Query engine
//!
//! Async entry point tying storage to the pipeline. A measurement query
//!
//! 1. validates the request and checks it against the result-size limit
//! 2. reads the processor's storage range, one cursor per partition
//! 3. merges the cursors into rows with a [`RowAssembler`]
//! 4. runs the [`ResultProcessor`] to completion
//!
//! Nothing is read when validation fails.

use crate::config::{Config, MonitoringConfig, QueryConfig};
use crate::metrics;
use crate::query::descriptor::Descriptor;
use crate::query::error::{QueryError, QueryResult};
use crate::query::operators::{RowAssembler, RowSource};
use crate::query::processor::ResultProcessor;
use crate::results::ResultSet;
use crate::storage::SampleRepository;
use crate::types::{Duration, Measurement, Resource, Sample, TimeRange, Timestamp};
use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Span covered by a sample read when no start is given
const DEFAULT_SAMPLE_WINDOW: Duration = Duration::from_days(1);

/// Measurement and sample queries over a [`SampleRepository`]
pub struct QueryEngine {
    samples: Arc<dyn SampleRepository>,
    config: QueryConfig,
    metrics_enabled: bool,
}

impl QueryEngine {
    /// Create an engine with default query configuration
    pub fn new(samples: Arc<dyn SampleRepository>) -> Self {
        Self {
            samples,
            config: QueryConfig::default(),
            metrics_enabled: true,
        }
    }

    /// Create an engine from the query and monitoring sections of `config`
    pub fn from_config(samples: Arc<dyn SampleRepository>, config: &Config) -> Self {
        Self::new(samples)
            .with_config(config.query.clone())
            .with_monitoring(&config.monitoring)
    }

    /// Set query configuration
    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    /// Apply monitoring settings; Prometheus recording is skipped when
    /// metrics are disabled
    pub fn with_monitoring(mut self, monitoring: &MonitoringConfig) -> Self {
        self.metrics_enabled = monitoring.metrics_enabled;
        self
    }

    /// Whether queries are recorded in Prometheus metrics
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_enabled
    }

    /// Query configuration
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Run a measurement query
    ///
    /// Returns one row per bucket of `resolution` covering `[start, end]`,
    /// holding the exported labels of `descriptor`.
    pub async fn select(
        &self,
        resource: &Resource,
        start: Timestamp,
        end: Timestamp,
        resolution: Duration,
        descriptor: &Descriptor,
    ) -> QueryResult<ResultSet<Measurement>> {
        let started = Instant::now();
        let outcome = self
            .run_select(resource, start, end, resolution, descriptor)
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok((results, samples)) => {
                if self.metrics_enabled {
                    metrics::record_query(elapsed, samples, results.len(), true);
                }
                info!(
                    resource = %resource,
                    rows = results.len(),
                    samples,
                    elapsed_ms = elapsed * 1000.0,
                    "Measurement query completed"
                );
                Ok(results)
            },
            Err(e) => {
                if self.metrics_enabled {
                    metrics::record_query(elapsed, 0, 0, false);
                    metrics::record_error(&e.kind.to_string(), "select");
                }
                warn!(resource = %resource, error = %e, "Measurement query failed");
                Err(e)
            },
        }
    }

    async fn run_select(
        &self,
        resource: &Resource,
        start: Timestamp,
        end: Timestamp,
        resolution: Duration,
        descriptor: &Descriptor,
    ) -> QueryResult<(ResultSet<Measurement>, usize)> {
        let processor = ResultProcessor::builder()
            .resource(resource.clone())
            .start(start)
            .end(end)
            .resolution(resolution)
            .descriptor(descriptor.clone())
            .build()?;

        let buckets = processor.bucket_count();
        if buckets > self.config.max_result_rows {
            return Err(QueryError::resource_limit(format!(
                "query spans {} buckets, limit is {}",
                buckets, self.config.max_result_rows
            )));
        }

        let names = descriptor.source_names();
        let range = processor.read_range();
        debug!(
            resource = %resource,
            start = %range.start,
            end = %range.end,
            sources = names.len(),
            "Reading samples"
        );
        let cursors = self.samples.select(resource, range, &names).await?;

        let assembler = RowAssembler::new(cursors).with_names(names);
        let consumed = assembler.count_handle();
        let results = processor.process(assembler)?;
        Ok((results, consumed.load(Ordering::Relaxed)))
    }

    /// Read raw samples grouped into rows
    ///
    /// `end` defaults to now and `start` to one day before `end`.
    pub async fn select_samples(
        &self,
        resource: &Resource,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
    ) -> QueryResult<ResultSet<Sample>> {
        let end = end.unwrap_or_else(Timestamp::now);
        let start = start.unwrap_or(end - DEFAULT_SAMPLE_WINDOW);
        let range = TimeRange::new(start, end)
            .map_err(|e| QueryError::validation(e.to_string()))?;

        let cursors = self
            .samples
            .select(resource, range, &BTreeSet::new())
            .await?;
        let mut assembler = RowAssembler::new(cursors);

        let mut results = ResultSet::new();
        while let Some(row) = assembler.next_row()? {
            results.add_row(row)?;
        }
        debug!(
            resource = %resource,
            rows = results.len(),
            samples = assembler.result_count(),
            "Sample query completed"
        );
        Ok(results)
    }
}
