// Clock-aligned bucketing over the ingest buffer.
// Buckets are recomputed on every query; nothing here is persisted.

use chrono::FixedOffset;

use crate::models::{BucketSpec, Field, LabelFormat, Sample, Series};
use crate::scheduler::local_datetime;

/// Averages are reported with 4 decimal places.
pub fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

pub fn format_label(ts_ms: i64, format: LabelFormat, offset: FixedOffset) -> String {
    local_datetime(ts_ms, offset)
        .format(format.pattern())
        .to_string()
}

fn offset_ms(offset: FixedOffset) -> i64 {
    offset.local_minus_utc() as i64 * 1000
}

/// First local-time boundary of `bucket_ms` strictly after `now_ms`.
pub fn aligned_end(now_ms: i64, bucket_ms: i64, offset: FixedOffset) -> i64 {
    let shift = offset_ms(offset);
    ((now_ms + shift).div_euclid(bucket_ms) + 1) * bucket_ms - shift
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    pub start: i64,
    pub end: i64,
    pub sum: f64,
    pub count: u32,
}

impl Bucket {
    /// `None` for an empty bucket; gaps are never reported as zero.
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| round4(self.sum / self.count as f64))
    }
}

/// Groups samples in `[window_start, now_ms]` into `spec.window_count` buckets.
pub fn bucketize<'a>(
    samples: impl IntoIterator<Item = &'a Sample>,
    field: Field,
    spec: BucketSpec,
    now_ms: i64,
    offset: FixedOffset,
) -> Vec<Bucket> {
    let end = aligned_end(now_ms, spec.bucket_ms, offset);
    let window_start = end - spec.window_count as i64 * spec.bucket_ms;

    let mut buckets: Vec<Bucket> = (0..spec.window_count)
        .map(|i| {
            let start = window_start + i as i64 * spec.bucket_ms;
            Bucket {
                start,
                end: start + spec.bucket_ms,
                sum: 0.0,
                count: 0,
            }
        })
        .collect();

    for s in samples {
        if s.timestamp < window_start || s.timestamp > now_ms {
            continue;
        }
        let idx = (s.timestamp - window_start).div_euclid(spec.bucket_ms);
        // clock skew can still push an index out of range
        let Some(bucket) = usize::try_from(idx).ok().and_then(|i| buckets.get_mut(i)) else {
            continue;
        };
        bucket.sum += s.value(field);
        bucket.count += 1;
    }
    buckets
}

/// Buffer contents verbatim, labelled with their local arrival time.
pub fn raw_series<'a>(
    samples: impl ExactSizeIterator<Item = &'a Sample>,
    field: Field,
    offset: FixedOffset,
) -> Series {
    let mut out = Series::with_capacity(samples.len());
    for s in samples {
        out.push(
            format_label(s.timestamp, LabelFormat::Clock, offset),
            Some(s.value(field)),
        );
    }
    out
}

/// Bucketed view labelled by bucket start.
pub fn bucketed_series<'a>(
    samples: impl IntoIterator<Item = &'a Sample>,
    field: Field,
    spec: BucketSpec,
    now_ms: i64,
    offset: FixedOffset,
) -> Series {
    let buckets = bucketize(samples, field, spec, now_ms, offset);
    let mut out = Series::with_capacity(buckets.len());
    for b in &buckets {
        out.push(format_label(b.start, spec.label, offset), b.average());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Readings, Resolution};

    // 2024-01-01T00:00:00Z
    const T0: i64 = 1_704_067_200_000;
    const SEC: i64 = 1_000;
    const MIN: i64 = 60 * SEC;
    const HOUR: i64 = 60 * MIN;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn at(ts: i64, voltage: f64) -> Sample {
        Sample::new(
            ts,
            Readings {
                voltage,
                ..Default::default()
            },
        )
    }

    fn spec(r: Resolution) -> BucketSpec {
        r.bucket_spec().unwrap()
    }

    #[test]
    fn aligned_end_rounds_up_to_next_boundary() {
        let now = T0 + 10 * HOUR + 15 * MIN + 30 * SEC;
        assert_eq!(aligned_end(now, MIN, utc()), T0 + 10 * HOUR + 16 * MIN);
        assert_eq!(aligned_end(now, HOUR, utc()), T0 + 11 * HOUR);
        assert_eq!(aligned_end(now, 30 * MIN, utc()), T0 + 10 * HOUR + 30 * MIN);
        // exactly on a boundary still moves to the next one
        assert_eq!(aligned_end(T0, MIN, utc()), T0 + MIN);
    }

    #[test]
    fn aligned_end_uses_local_boundaries() {
        let india = FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap();
        let now = T0 + 10 * HOUR + 15 * MIN;
        // 15:45 local -> 16:00 local == 10:30Z
        assert_eq!(aligned_end(now, HOUR, india), T0 + 10 * HOUR + 30 * MIN);
        let series = bucketed_series(
            std::iter::empty::<&Sample>(),
            Field::Voltage,
            spec(Resolution::Hour),
            now,
            india,
        );
        assert_eq!(series.labels.last().map(String::as_str), Some("15:00"));
    }

    #[test]
    fn minute_buckets_match_manual_grouping() {
        let now = T0 + 10 * HOUR + 15 * MIN + 30 * SEC;
        let window_start = T0 + 9 * HOUR + 16 * MIN;
        let samples = vec![
            at(window_start - 1, 99.0),
            at(window_start, 7.0),
            at(T0 + 10 * HOUR + 14 * MIN + 10 * SEC, 1.0),
            at(T0 + 10 * HOUR + 14 * MIN + 50 * SEC, 3.0),
            at(T0 + 10 * HOUR + 15 * MIN + 5 * SEC, 10.0),
            at(now + SEC, 99.0),
        ];
        let series = bucketed_series(
            &samples,
            Field::Voltage,
            spec(Resolution::Minute),
            now,
            utc(),
        );
        assert_eq!(series.len(), 60);
        assert_eq!(series.values.len(), series.labels.len());
        assert_eq!(series.labels[0], "09:16");
        assert_eq!(series.labels[58], "10:14");
        assert_eq!(series.labels[59], "10:15");
        assert_eq!(series.values[0], Some(7.0));
        assert_eq!(series.values[58], Some(2.0));
        assert_eq!(series.values[59], Some(10.0));
        let filled = series.values.iter().filter(|v| v.is_some()).count();
        assert_eq!(filled, 3, "empty buckets must be null, never zero");
        assert_eq!(series.values[1], None);
    }

    #[test]
    fn hour_window_spans_previous_day() {
        let now = T0 + 10 * HOUR + 15 * MIN;
        let samples = vec![at(T0 - 12 * HOUR - 30 * MIN, 5.0), at(T0 + 10 * HOUR, 6.0)];
        let buckets = bucketize(
            &samples,
            Field::Voltage,
            spec(Resolution::Hour),
            now,
            utc(),
        );
        assert_eq!(buckets.len(), 24);
        assert_eq!(buckets[0].start, T0 - 13 * HOUR);
        assert_eq!(buckets[0].count, 1);
        assert_eq!(buckets[23].start, T0 + 10 * HOUR);
        assert_eq!(buckets[23].end, T0 + 11 * HOUR);
        assert_eq!(buckets[23].average(), Some(6.0));

        let series = bucketed_series(&samples, Field::Voltage, spec(Resolution::Hour), now, utc());
        assert_eq!(series.labels[0], "11:00");
        assert_eq!(series.labels[23], "10:00");
    }

    #[test]
    fn six_hour_uses_half_hour_buckets() {
        let now = T0 + 10 * HOUR + 15 * MIN;
        let samples = vec![at(T0 + 10 * HOUR + 15 * MIN, 4.0), at(T0 + 4 * HOUR + 29 * MIN, 1.0)];
        let series = bucketed_series(
            &samples,
            Field::Voltage,
            spec(Resolution::SixHour),
            now,
            utc(),
        );
        assert_eq!(series.len(), 12);
        assert_eq!(series.labels[0], "04:30");
        assert_eq!(series.labels[11], "10:00");
        assert_eq!(series.values[11], Some(4.0));
        assert!(series.values[..11].iter().all(Option::is_none));
    }

    #[test]
    fn averages_are_rounded_to_four_places() {
        let now = T0 + 30 * SEC;
        let samples = vec![at(T0, 1.0), at(T0 + SEC, 1.0), at(T0 + 2 * SEC, 2.0)];
        let series = bucketed_series(
            &samples,
            Field::Voltage,
            spec(Resolution::Minute),
            now,
            utc(),
        );
        assert_eq!(series.values[59], Some(1.3333));
    }

    #[test]
    fn raw_series_is_verbatim() {
        let samples = vec![at(T0 + 5 * SEC, 230.1), at(T0 + HOUR + 6 * SEC, 229.9)];
        let series = raw_series(samples.iter(), Field::Voltage, utc());
        assert_eq!(series.labels, vec!["00:00:05", "01:00:06"]);
        assert_eq!(series.values, vec![Some(230.1), Some(229.9)]);
    }

    #[test]
    fn round4_half_up() {
        assert_eq!(round4(1.23456), 1.2346);
        assert_eq!(round4(2.0), 2.0);
    }
}
