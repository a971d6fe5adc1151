//! Core data types used throughout the aggregation engine
//!
//! # Key Types
//!
//! - **`Timestamp`**: Millisecond instant since the Unix epoch
//! - **`Duration`**: Millisecond span, parsed from `"300"`, `"5m"`, `"1d"` ...
//! - **`TimeRange`**: Inclusive time window for reads
//! - **`Resource`**: Identifier a series belongs to (equality by id only)
//! - **`Sample`**: Raw observation as stored (gauge, counter, derive, absolute)
//! - **`Measurement`**: Resolved value for a datasource or expression label
//!
//! # Example
//!
//! ```rust
//! use tsdb_aggregate::types::{Duration, Resource, Sample, Timestamp, ValueType};
//!
//! let resource = Resource::new("router1:ifIndex=2");
//! let sample = Sample::new(
//!     Timestamp::from_millis(300_000),
//!     resource,
//!     "ifInOctets",
//!     ValueType::Counter(1024),
//! );
//! assert_eq!(sample.timestamp + Duration::from_secs(60), Timestamp::from_millis(360_000));
//! ```

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Sub};
use std::str::FromStr;

// ============================================================================
// Time
// ============================================================================

/// Instant with millisecond precision, stored as milliseconds since epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The epoch-zero sentinel, returned when nothing is known
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Create a timestamp from milliseconds since epoch
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Create a timestamp from seconds since epoch
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * 1000)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Milliseconds since epoch
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Convert to a chrono UTC datetime, if representable
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }

    /// Largest multiple of `width` (counted from the epoch) not after this instant
    ///
    /// Uses Euclidean division so instants before the epoch align downwards too.
    /// A non-positive width leaves the timestamp unchanged.
    pub fn align_down(&self, width: Duration) -> Self {
        if width.0 <= 0 {
            return *self;
        }
        Self(self.0.div_euclid(width.0) * width.0)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    fn sub(self, rhs: Timestamp) -> Duration {
        Duration(self.0.saturating_sub(rhs.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(rhs.0))
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_sub(rhs.0))
    }
}

/// Span of time in milliseconds
///
/// Spans produced by subtracting timestamps may be negative; callers that
/// need a strictly positive span check [`Duration::is_positive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(i64);

const MILLIS_PER_SECOND: i64 = 1000;
const MILLIS_PER_MINUTE: i64 = 60 * MILLIS_PER_SECOND;
const MILLIS_PER_HOUR: i64 = 60 * MILLIS_PER_MINUTE;
const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;
const MILLIS_PER_WEEK: i64 = 7 * MILLIS_PER_DAY;

impl Duration {
    /// Zero-length span
    pub const ZERO: Duration = Duration(0);

    /// Create a span from milliseconds
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Create a span from seconds
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * MILLIS_PER_SECOND)
    }

    /// Create a span from minutes
    pub const fn from_mins(mins: i64) -> Self {
        Self(mins * MILLIS_PER_MINUTE)
    }

    /// Create a span from hours
    pub const fn from_hours(hours: i64) -> Self {
        Self(hours * MILLIS_PER_HOUR)
    }

    /// Create a span from days
    pub const fn from_days(days: i64) -> Self {
        Self(days * MILLIS_PER_DAY)
    }

    /// Length in milliseconds
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Length in fractional seconds, for rate math
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / MILLIS_PER_SECOND as f64
    }

    /// Whether the span is strictly greater than zero
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Multiply by an integer factor, saturating on overflow
    pub const fn times(&self, factor: i64) -> Self {
        Self(self.0.saturating_mul(factor))
    }

    /// Whether `other` divides this span evenly
    pub const fn is_multiple_of(&self, other: Duration) -> bool {
        other.0 != 0 && self.0 % other.0 == 0
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Duration {
    type Output = Duration;

    fn sub(self, rhs: Duration) -> Duration {
        Duration(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "0s");
        }
        for (suffix, unit) in [
            ("w", MILLIS_PER_WEEK),
            ("d", MILLIS_PER_DAY),
            ("h", MILLIS_PER_HOUR),
            ("m", MILLIS_PER_MINUTE),
            ("s", MILLIS_PER_SECOND),
        ] {
            if self.0 % unit == 0 {
                return write!(f, "{}{}", self.0 / unit, suffix);
            }
        }
        write!(f, "{}ms", self.0)
    }
}

impl FromStr for Duration {
    type Err = ValidationError;

    /// Parse a span such as `"300"` (seconds), `"500ms"`, `"5m"` or `"1d"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let invalid = |message: &str| ValidationError::InvalidFormat {
            field: "duration".to_string(),
            message: format!("'{}': {}", s, message),
        };

        let split = text
            .char_indices()
            .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && *c == '-')))
            .map(|(i, _)| i)
            .unwrap_or(text.len());
        let (number, unit) = text.split_at(split);

        let amount: i64 = number
            .parse()
            .map_err(|_| invalid("expected an integer amount"))?;
        let factor = match unit.trim() {
            "" | "s" => MILLIS_PER_SECOND,
            "ms" => 1,
            "m" => MILLIS_PER_MINUTE,
            "h" => MILLIS_PER_HOUR,
            "d" => MILLIS_PER_DAY,
            "w" => MILLIS_PER_WEEK,
            _ => return Err(invalid("unknown unit (use ms, s, m, h, d or w)")),
        };

        amount
            .checked_mul(factor)
            .map(Duration)
            .ok_or_else(|| invalid("value overflows"))
    }
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Seconds(i64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Seconds(secs) => secs
                .checked_mul(MILLIS_PER_SECOND)
                .map(Duration)
                .ok_or_else(|| serde::de::Error::custom("duration overflows")),
            Repr::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Inclusive time window `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start instant (inclusive)
    pub start: Timestamp,

    /// End instant (inclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range, rejecting `start > end`
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, crate::error::StorageError> {
        if start > end {
            return Err(crate::error::StorageError::InvalidTimeRange {
                start: start.as_millis(),
                end: end.as_millis(),
            });
        }
        Ok(Self { start, end })
    }

    /// Check if a timestamp falls within this range (inclusive)
    pub fn contains(&self, timestamp: Timestamp) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

// ============================================================================
// Resource
// ============================================================================

/// Identifier of the entity a series belongs to
///
/// Two resources are equal iff their ids are equal; attributes are carried
/// along for callers but never take part in comparisons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attributes: Option<HashMap<String, String>>,
}

impl Resource {
    /// Create a resource without attributes
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: None,
        }
    }

    /// Create a resource with an attribute map
    pub fn with_attributes(id: impl Into<String>, attributes: HashMap<String, String>) -> Self {
        Self {
            id: id.into(),
            attributes: Some(attributes),
        }
    }

    /// Resource identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Optional attribute map
    pub fn attributes(&self) -> Option<&HashMap<String, String>> {
        self.attributes.as_ref()
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Resource {}

impl Hash for Resource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

// ============================================================================
// Values
// ============================================================================

/// Raw sample value, tagged with how it must be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "UPPERCASE")]
pub enum ValueType {
    /// Point-in-time reading, used as-is
    Gauge(f64),
    /// Monotonic unsigned counter; converted to a rate at query time
    Counter(u64),
    /// Signed counter that may decrease; converted to a rate at query time
    Derive(i64),
    /// Counter reset on every read; used as-is
    Absolute(u64),
}

impl ValueType {
    /// Numeric value as a float
    pub fn as_f64(&self) -> f64 {
        match *self {
            ValueType::Gauge(v) => v,
            ValueType::Counter(v) => v as f64,
            ValueType::Derive(v) => v as f64,
            ValueType::Absolute(v) => v as f64,
        }
    }

    /// Whether successive values must be turned into a rate of change
    pub fn is_rate_type(&self) -> bool {
        matches!(self, ValueType::Counter(_) | ValueType::Derive(_))
    }
}

// ============================================================================
// Elements
// ============================================================================

/// Anything that can be placed in a [`Row`](crate::results::Row)
pub trait Element: Clone + fmt::Debug + Send + 'static {
    /// Instant this element was observed or resolved at
    fn timestamp(&self) -> Timestamp;

    /// Resource this element belongs to
    fn resource(&self) -> &Resource;

    /// Metric, datasource or expression name; unique within a row
    fn name(&self) -> &str;

    /// Numeric value, `None` when unknown
    fn numeric_value(&self) -> Option<f64>;
}

/// Context a sample was collected in when none is given
pub const DEFAULT_CONTEXT: &str = "G";

/// Raw observation as written to storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Observation instant
    pub timestamp: Timestamp,
    /// Collection context identifier
    pub context: String,
    /// Owning resource
    pub resource: Resource,
    /// Metric name
    pub name: String,
    /// Typed value
    pub value: ValueType,
    /// Free-form attributes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<HashMap<String, String>>,
}

impl Sample {
    /// Create a sample in the default context
    pub fn new(
        timestamp: Timestamp,
        resource: Resource,
        name: impl Into<String>,
        value: ValueType,
    ) -> Self {
        Self {
            timestamp,
            context: DEFAULT_CONTEXT.to_string(),
            resource,
            name: name.into(),
            value,
            attributes: None,
        }
    }

    /// Attach free-form attributes
    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = Some(attributes);
        self
    }
}

impl Element for Sample {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn resource(&self) -> &Resource {
        &self.resource
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn numeric_value(&self) -> Option<f64> {
        Some(self.value.as_f64())
    }
}

/// Resolved value for a datasource or expression label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Instant the value applies to
    pub timestamp: Timestamp,
    /// Owning resource
    pub resource: Resource,
    /// Label
    pub name: String,
    /// Value, `None` when unknown
    pub value: Option<f64>,
    /// Attributes carried over from the source sample
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<HashMap<String, String>>,
}

impl Measurement {
    /// Create a measurement
    pub fn new(
        timestamp: Timestamp,
        resource: Resource,
        name: impl Into<String>,
        value: Option<f64>,
    ) -> Self {
        Self {
            timestamp,
            resource,
            name: name.into(),
            value,
            attributes: None,
        }
    }

    /// Attach attributes
    pub fn with_attributes(mut self, attributes: Option<HashMap<String, String>>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Whether the value is unknown
    pub fn is_unknown(&self) -> bool {
        self.value.is_none()
    }
}

impl Element for Measurement {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn resource(&self) -> &Resource {
        &self.resource
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn numeric_value(&self) -> Option<f64> {
        self.value
    }
}
