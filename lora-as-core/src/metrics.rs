//! Time-bucketed counters kept in the ephemeral store.
//!
//! A record is added to one bucket per [`Aggregation`]. Bucket keys carry the
//! metric name between braces so a clustered Redis keeps every bucket of one
//! resource on the same slot.
use chrono::{DateTime, Datelike, Months, TimeDelta, Timelike, Utc};
use lora_as_error::{ASError, ASResult};
use lora_as_models::{constants::METRICS_KEY_PREFIX, settings::Metrics, EphemeralStore};
use std::{collections::HashMap, fmt, sync::Arc, time::Duration};
use tracing::instrument;

/// Most buckets a single range query may span, a day and a bit of minutes.
pub const MAX_BUCKETS: usize = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregation {
    Minute,
    Hour,
    Day,
    Month,
}

impl Aggregation {
    pub const ALL: [Aggregation; 4] = [
        Aggregation::Minute,
        Aggregation::Hour,
        Aggregation::Day,
        Aggregation::Month,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Minute => "MINUTE",
            Aggregation::Hour => "HOUR",
            Aggregation::Day => "DAY",
            Aggregation::Month => "MONTH",
        }
    }

    /// Start of the bucket `t` falls in.
    pub fn truncate(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let d = t.date_naive();
        let start = match self {
            Aggregation::Minute => d.and_hms_opt(t.hour(), t.minute(), 0),
            Aggregation::Hour => d.and_hms_opt(t.hour(), 0, 0),
            Aggregation::Day => d.and_hms_opt(0, 0, 0),
            Aggregation::Month => d.with_day(1).and_then(|d| d.and_hms_opt(0, 0, 0)),
        };
        start.map(|n| n.and_utc()).unwrap_or(t)
    }

    fn next(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Aggregation::Minute => t.checked_add_signed(TimeDelta::minutes(1)),
            Aggregation::Hour => t.checked_add_signed(TimeDelta::hours(1)),
            Aggregation::Day => t.checked_add_signed(TimeDelta::days(1)),
            Aggregation::Month => t.checked_add_months(Months::new(1)),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRecord {
    pub time: DateTime<Utc>,
    pub metrics: HashMap<String, f64>,
}

pub struct MetricsStore {
    store: Arc<dyn EphemeralStore>,
    ttls: HashMap<Aggregation, Duration>,
}

impl MetricsStore {
    pub fn new(store: Arc<dyn EphemeralStore>, settings: &Metrics) -> Self {
        let ttls = HashMap::from([
            (Aggregation::Minute, Duration::from_secs(settings.minute_ttl)),
            (Aggregation::Hour, Duration::from_secs(settings.hour_ttl)),
            (Aggregation::Day, Duration::from_secs(settings.day_ttl)),
            (Aggregation::Month, Duration::from_secs(settings.month_ttl)),
        ]);
        Self { store, ttls }
    }

    /// Adds every counter of `record` to the bucket of each aggregation.
    #[instrument(name = "metrics-save", skip(self, record), fields(time = %record.time))]
    pub async fn save_metrics(&self, name: &str, record: &MetricsRecord) -> ASResult<()> {
        if record.metrics.is_empty() {
            return Ok(());
        }
        let fields: Vec<(String, f64)> = record
            .metrics
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();

        for agg in Aggregation::ALL {
            let ttl = self.ttls.get(&agg).copied().unwrap_or_default();
            if ttl.is_zero() {
                continue;
            }
            let key = metrics_key(name, agg, agg.truncate(record.time));
            self.store.hincr_by_float(&key, &fields, ttl).await?;
        }
        Ok(())
    }

    /// One record per bucket between `start` and `end`, both inclusive.
    /// Missing buckets yield empty counters.
    pub async fn get_metrics(
        &self,
        agg: Aggregation,
        name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ASResult<Vec<MetricsRecord>> {
        if end < start {
            return Err(ASError::Validation(format!(
                "metrics range end {end} is before start {start}"
            )));
        }

        let end = agg.truncate(end);
        let mut buckets = Vec::new();
        let mut t = agg.truncate(start);
        while t <= end {
            if buckets.len() == MAX_BUCKETS {
                return Err(ASError::Validation(format!(
                    "metrics range {start} - {end} spans more than {MAX_BUCKETS} {agg} buckets"
                )));
            }
            buckets.push(t);
            t = match agg.next(t) {
                Some(n) => n,
                None => break,
            };
        }

        let mut out = Vec::with_capacity(buckets.len());
        for t in buckets {
            let metrics = self.store.hgetall(&metrics_key(name, agg, t)).await?;
            out.push(MetricsRecord { time: t, metrics });
        }
        Ok(out)
    }
}

fn metrics_key(name: &str, agg: Aggregation, t: DateTime<Utc>) -> String {
    format!("{METRICS_KEY_PREFIX}:{{{name}}}:{agg}:{}", t.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn truncation_per_aggregation() {
        let t = Utc.with_ymd_and_hms(2024, 5, 17, 13, 42, 31).unwrap();
        assert_eq!(
            Aggregation::Minute.truncate(t),
            Utc.with_ymd_and_hms(2024, 5, 17, 13, 42, 0).unwrap()
        );
        assert_eq!(
            Aggregation::Hour.truncate(t),
            Utc.with_ymd_and_hms(2024, 5, 17, 13, 0, 0).unwrap()
        );
        assert_eq!(
            Aggregation::Day.truncate(t),
            Utc.with_ymd_and_hms(2024, 5, 17, 0, 0, 0).unwrap()
        );
        assert_eq!(
            Aggregation::Month.truncate(t),
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn key_uses_hash_tag() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            metrics_key("device:0102030405060708", Aggregation::Day, t),
            "lora:as:metrics:{device:0102030405060708}:DAY:1704067200"
        );
    }

    #[test]
    fn month_steps_follow_calendar() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            Aggregation::Month.next(t),
            Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
        );
    }
}
