// Query surface: resolutions and the labels/values series handed to the presentation layer

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MS_PER_MINUTE: i64 = 60_000;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    Raw,
    Minute,
    Hour,
    SixHour,
    Day,
}

/// How a bucket start is rendered as a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelFormat {
    /// `HH:MM:SS`, used for raw samples.
    Clock,
    /// `HH:MM`
    HourMinute,
    /// `HH:00`
    Hour,
    /// `DD/MM`
    DayMonth,
}

impl LabelFormat {
    pub fn pattern(self) -> &'static str {
        match self {
            LabelFormat::Clock => "%H:%M:%S",
            LabelFormat::HourMinute => "%H:%M",
            LabelFormat::Hour => "%H:00",
            LabelFormat::DayMonth => "%d/%m",
        }
    }
}

/// Fixed bucket geometry of a non-raw resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSpec {
    pub bucket_ms: i64,
    pub window_count: usize,
    pub label: LabelFormat,
}

impl Resolution {
    pub const ALL: [Resolution; 5] = [
        Resolution::Raw,
        Resolution::Minute,
        Resolution::Hour,
        Resolution::SixHour,
        Resolution::Day,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Raw => "raw",
            Resolution::Minute => "minute",
            Resolution::Hour => "hour",
            Resolution::SixHour => "sixHour",
            Resolution::Day => "day",
        }
    }

    /// `None` for raw, which is returned sample by sample.
    pub fn bucket_spec(self) -> Option<BucketSpec> {
        match self {
            Resolution::Raw => None,
            Resolution::Minute => Some(BucketSpec {
                bucket_ms: MS_PER_MINUTE,
                window_count: 60,
                label: LabelFormat::HourMinute,
            }),
            Resolution::Hour => Some(BucketSpec {
                bucket_ms: MS_PER_HOUR,
                window_count: 24,
                label: LabelFormat::Hour,
            }),
            Resolution::SixHour => Some(BucketSpec {
                bucket_ms: 30 * MS_PER_MINUTE,
                window_count: 12,
                label: LabelFormat::HourMinute,
            }),
            Resolution::Day => Some(BucketSpec {
                bucket_ms: MS_PER_DAY,
                window_count: 7,
                label: LabelFormat::DayMonth,
            }),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resolution `{0}`")]
pub struct UnknownResolution(pub String);

impl FromStr for Resolution {
    type Err = UnknownResolution;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resolution::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| UnknownResolution(s.to_string()))
    }
}

/// One entry per bucket (or per raw sample). `None` marks an empty bucket, never zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub labels: Vec<String>,
    pub values: Vec<Option<f64>>,
}

impl Series {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            labels: Vec::with_capacity(n),
            values: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, label: String, value: Option<f64>) {
        self.labels.push(label);
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
