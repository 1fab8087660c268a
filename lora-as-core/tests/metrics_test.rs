use chrono::{Duration, TimeZone, Utc};
use lora_as_core::metrics::{Aggregation, MetricsRecord, MetricsStore, MAX_BUCKETS};
use lora_as_error::ASError;
use lora_as_models::{settings::Metrics, EphemeralStore};
use lora_as_storage::ASEphemeralStore;
use std::{collections::HashMap, sync::Arc};

fn store() -> MetricsStore {
    let store: Arc<dyn EphemeralStore> = ASEphemeralStore::in_memory(1_000);
    MetricsStore::new(store, &Metrics::default())
}

fn record(t: chrono::DateTime<Utc>, rx: f64) -> MetricsRecord {
    MetricsRecord {
        time: t,
        metrics: HashMap::from([("rx_count".to_string(), rx), ("gw_snr_sum".to_string(), 2.5)]),
    }
}

#[tokio::test]
async fn counters_in_one_bucket_are_summed() {
    let m = store();
    let t = Utc.with_ymd_and_hms(2024, 5, 17, 13, 10, 0).unwrap();

    m.save_metrics("gw:aa", &record(t, 1.0)).await.unwrap();
    m.save_metrics("gw:aa", &record(t + Duration::minutes(20), 2.0))
        .await
        .unwrap();

    let hours = m
        .get_metrics(Aggregation::Hour, "gw:aa", t, t + Duration::minutes(30))
        .await
        .unwrap();
    assert_eq!(hours.len(), 1);
    assert_eq!(hours[0].time, Utc.with_ymd_and_hms(2024, 5, 17, 13, 0, 0).unwrap());
    assert_eq!(hours[0].metrics["rx_count"], 3.0);
    assert_eq!(hours[0].metrics["gw_snr_sum"], 5.0);

    // the minute aggregation keeps the two uplinks apart
    let minutes = m
        .get_metrics(Aggregation::Minute, "gw:aa", t, t + Duration::minutes(20))
        .await
        .unwrap();
    assert_eq!(minutes.len(), 21);
    assert_eq!(minutes[0].metrics["rx_count"], 1.0);
    assert_eq!(minutes[20].metrics["rx_count"], 2.0);
    assert!(minutes[1..20].iter().all(|r| r.metrics.is_empty()));
}

#[tokio::test]
async fn missing_buckets_are_empty() {
    let m = store();
    let t = Utc.with_ymd_and_hms(2024, 1, 30, 0, 0, 0).unwrap();
    m.save_metrics("dev:01", &record(t, 1.0)).await.unwrap();

    let days = m
        .get_metrics(Aggregation::Day, "dev:01", t - Duration::days(2), t)
        .await
        .unwrap();
    assert_eq!(days.len(), 3);
    assert!(days[0].metrics.is_empty());
    assert!(days[1].metrics.is_empty());
    assert_eq!(days[2].metrics["rx_count"], 1.0);

    let other = m
        .get_metrics(Aggregation::Month, "dev:02", t, t)
        .await
        .unwrap();
    assert_eq!(other.len(), 1);
    assert!(other[0].metrics.is_empty());
}

#[tokio::test]
async fn inverted_range_is_rejected() {
    let m = store();
    let t = Utc::now();
    let err = m
        .get_metrics(Aggregation::Hour, "dev:01", t, t - Duration::hours(2))
        .await
        .unwrap_err();
    assert!(matches!(err, ASError::Validation(_)));
}

#[tokio::test]
async fn oversized_range_is_rejected() {
    let m = store();
    let t = Utc.with_ymd_and_hms(2024, 5, 17, 0, 0, 0).unwrap();
    let last = t + Duration::minutes(MAX_BUCKETS as i64 - 1);

    let records = m
        .get_metrics(Aggregation::Minute, "dev:01", t, last)
        .await
        .unwrap();
    assert_eq!(records.len(), MAX_BUCKETS);

    let err = m
        .get_metrics(Aggregation::Minute, "dev:01", t, last + Duration::minutes(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ASError::Validation(_)));

    // a year at minute resolution, but only a dozen months
    assert!(m
        .get_metrics(Aggregation::Minute, "dev:01", t, t + Duration::days(365))
        .await
        .is_err());
    assert_eq!(
        m.get_metrics(Aggregation::Month, "dev:01", t, t + Duration::days(365))
            .await
            .unwrap()
            .len(),
        13
    );
}
