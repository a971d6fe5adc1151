//! Result processor
//!
//! Validates a measurement query and wires the stage chain
//!
//! ```text
//! rows -> Rate -> PrimaryData -> Aggregation -> Compute -> Export
//! ```
//!
//! over the assembled sample rows. Primary data is generated for every step
//! of the buckets covering `[start, end]`; storage must therefore be read
//! over [`ResultProcessor::read_range`]. Before the first bucket it reaches
//! back far enough for an interpolation anchor (the longer of one
//! resolution and the widest heartbeat) plus one more resolution so that
//! anchor has a rate baseline. After the last bucket it adds one heartbeat
//! of interpolation context.

use crate::query::descriptor::Descriptor;
use crate::query::error::{QueryError, QueryResult};
use crate::query::operators::{
    iter_rows, Aggregation, Compute, Export, PrimaryData, Rate, RowIter, RowSource,
};
use crate::results::ResultSet;
use crate::types::{Duration, Measurement, Resource, Sample, TimeRange, Timestamp};
use tracing::debug;

/// Validated measurement query, ready to process assembled rows
#[derive(Debug, Clone)]
pub struct ResultProcessor {
    resource: Resource,
    start: Timestamp,
    end: Timestamp,
    resolution: Duration,
    descriptor: Descriptor,
}

impl ResultProcessor {
    /// Start building a processor
    pub fn builder() -> ResultProcessorBuilder {
        ResultProcessorBuilder::new()
    }

    /// Queried resource
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Query descriptor
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Consolidation resolution
    pub fn resolution(&self) -> Duration {
        self.resolution
    }

    /// Start of the first bucket
    pub fn first_bucket(&self) -> Timestamp {
        self.start.align_down(self.resolution)
    }

    /// Start of the last bucket
    pub fn last_bucket(&self) -> Timestamp {
        self.end.align_down(self.resolution)
    }

    /// Number of rows the query produces
    pub fn bucket_count(&self) -> usize {
        let span = self.last_bucket() - self.first_bucket();
        (span.as_millis() / self.resolution.as_millis()) as usize + 1
    }

    /// Storage range holding every sample the query can use
    pub fn read_range(&self) -> TimeRange {
        let lead = self.resolution.max(self.descriptor.max_heartbeat());
        TimeRange {
            start: self.first_bucket() - lead - self.resolution,
            end: self.last_bucket() + self.resolution + self.descriptor.max_heartbeat(),
        }
    }

    /// Build the stage chain over assembled sample rows
    pub fn pipeline(
        &self,
        rows: Box<dyn RowSource<Sample>>,
    ) -> QueryResult<Box<dyn RowSource<Measurement>>> {
        let first = self.first_bucket();
        let last_point = self.last_bucket() + self.resolution - self.descriptor.step();

        let rate = Rate::new(rows, self.descriptor.source_names());
        let primary = PrimaryData::new(
            Box::new(rate),
            self.resource.clone(),
            &self.descriptor,
            first,
            last_point,
        );
        let aggregation = Aggregation::new(
            Box::new(primary),
            self.resource.clone(),
            &self.descriptor,
            self.start,
            self.end,
            self.resolution,
        )?;
        let compute = Compute::new(Box::new(aggregation), &self.descriptor)?;
        let export = Export::new(Box::new(compute), self.descriptor.exports().clone());

        debug!(
            resource = %self.resource,
            buckets = self.bucket_count(),
            resolution = %self.resolution,
            step = %self.descriptor.step(),
            "Pipeline assembled"
        );
        Ok(Box::new(export))
    }

    /// Stream result rows lazily
    pub fn stream<S>(&self, rows: S) -> QueryResult<RowIter<Measurement>>
    where
        S: RowSource<Sample> + 'static,
    {
        Ok(iter_rows(self.pipeline(Box::new(rows))?))
    }

    /// Run the pipeline to completion
    pub fn process<S>(&self, rows: S) -> QueryResult<ResultSet<Measurement>>
    where
        S: RowSource<Sample> + 'static,
    {
        let mut pipeline = self.pipeline(Box::new(rows))?;
        let mut results = ResultSet::new();
        while let Some(row) = pipeline.next_row()? {
            results.add_row(row)?;
        }
        Ok(results)
    }
}

/// Builder for [`ResultProcessor`]
#[derive(Debug, Clone, Default)]
pub struct ResultProcessorBuilder {
    resource: Option<Resource>,
    start: Option<Timestamp>,
    end: Option<Timestamp>,
    resolution: Option<Duration>,
    descriptor: Option<Descriptor>,
}

impl ResultProcessorBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queried resource
    pub fn resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Set the query start (inclusive)
    pub fn start(mut self, start: Timestamp) -> Self {
        self.start = Some(start);
        self
    }

    /// Set the query end (inclusive)
    pub fn end(mut self, end: Timestamp) -> Self {
        self.end = Some(end);
        self
    }

    /// Set the consolidation resolution
    pub fn resolution(mut self, resolution: Duration) -> Self {
        self.resolution = Some(resolution);
        self
    }

    /// Set the query descriptor
    pub fn descriptor(mut self, descriptor: Descriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    /// Validate the query and build the processor
    pub fn build(self) -> QueryResult<ResultProcessor> {
        let missing = |field: &str| QueryError::validation(format!("missing required parameter '{}'", field));

        let resource = self.resource.ok_or_else(|| missing("resource"))?;
        let start = self.start.ok_or_else(|| missing("start"))?;
        let end = self.end.ok_or_else(|| missing("end"))?;
        let resolution = self.resolution.ok_or_else(|| missing("resolution"))?;
        let descriptor = self.descriptor.ok_or_else(|| missing("descriptor"))?;

        if start > end {
            return Err(QueryError::validation(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        if !resolution.is_positive() {
            return Err(QueryError::validation(format!(
                "resolution must be positive, got {}",
                resolution
            )));
        }
        descriptor.validate()?;
        if !resolution.is_multiple_of(descriptor.step()) {
            return Err(QueryError::validation(format!(
                "resolution {} is not a multiple of step {}",
                resolution,
                descriptor.step()
            )));
        }

        Ok(ResultProcessor {
            resource,
            start,
            end,
            resolution,
            descriptor,
        })
    }
}
