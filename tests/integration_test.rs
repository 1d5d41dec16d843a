//! Integration tests for the telemetry core public API
//!
//! These tests drive the crate the way a dashboard would:
//! - normalizing mixed-encoding store batches into display series
//! - classifying readings with and without the heat-index model
//! - running the orchestrator against the in-memory store
//! - loading the bundled configuration

use std::sync::Arc;

use cabin_telemetry::analysis::pipeline::{humidity_series, temperature_series};
use cabin_telemetry::analysis::{normalize_batch, HeatIndexModel, IntervalAggregator, TimeWindow};
use cabin_telemetry::ports::{InMemoryStore, ManualClock};
use cabin_telemetry::reading::{RawAlertRecord, RawDeviceRecord, RawTimestampValue};
use cabin_telemetry::{
    AppConfig, ErrorCode, FetchStatus, RawTelemetryRecord, RetrievalMode, SafetyClassifier,
    SafetyLabel, StreamOrchestrator, TelemetryError,
};

const T: i64 = 1_700_000_000_000;
const MIN: i64 = 60_000;

fn record(timestamp: RawTimestampValue, temp: f64) -> RawTelemetryRecord {
    RawTelemetryRecord {
        timestamp: Some(timestamp),
        temp_c: Some(temp),
        humidity: Some(55.0),
        motion_detected: Some(false),
        ..Default::default()
    }
}

fn create_orchestrator(store: &InMemoryStore) -> StreamOrchestrator {
    let config = AppConfig::default();
    let classifier = SafetyClassifier::new(config.classification);
    StreamOrchestrator::new(
        config,
        Arc::new(store.clone()),
        classifier,
        Arc::new(ManualClock::new(T)),
    )
    .expect("default config is valid")
}

async fn settle(orchestrator: &mut StreamOrchestrator) {
    for _ in 0..10 {
        tokio::task::yield_now().await;
        orchestrator.drain_ready().await;
    }
}

/// Mixed ISO, absolute and legacy timestamps land on one sorted timeline
#[test]
fn test_mixed_batch_normalizes_to_sorted_timeline() {
    let records = vec![
        record(RawTimestampValue::from(T), 20.0),
        record(RawTimestampValue::from(5_000), 21.0),
        record(RawTimestampValue::from(2_000), 22.0),
        record(RawTimestampValue::from("2023-11-14T22:12:20Z"), 23.0),
        RawTelemetryRecord {
            temp_c: Some(30.0),
            ..Default::default()
        },
        record(RawTimestampValue::from("yesterday-ish"), 24.0),
        RawTelemetryRecord {
            timestamp: Some(RawTimestampValue::from(T)),
            ..Default::default()
        },
    ];

    let batch = normalize_batch(&records, "car_001", TimeWindow::UNBOUNDED, T + 10 * MIN);

    let timeline: Vec<(i64, Option<f64>)> = batch
        .readings
        .iter()
        .map(|r| (r.captured_at, r.temperature_c))
        .collect();
    assert_eq!(
        timeline,
        vec![
            (T - MIN, Some(23.0)),
            (T - 3_000, Some(22.0)),
            (T, Some(20.0)),
            (T, Some(21.0)),
        ]
    );

    let dropped: Vec<(usize, i32)> = batch
        .dropped
        .iter()
        .map(|entry| (entry.index, entry.reason.code()))
        .collect();
    assert_eq!(dropped, vec![(4, 2002), (5, 2001), (6, 2003)]);
}

#[test]
fn test_series_from_normalized_batch() {
    let records: Vec<RawTelemetryRecord> = (0..12)
        .map(|i| record(RawTimestampValue::from(T + i * MIN), 20.0 + i as f64))
        .collect();
    let batch = normalize_batch(&records, "car_001", TimeWindow::UNBOUNDED, T);
    let aggregator = IntervalAggregator::new(5).unwrap();

    let temperature = temperature_series(&batch.readings, &aggregator);
    let counts: usize = temperature.buckets.iter().map(|b| b.sample_count).sum();
    assert_eq!(counts, 12);
    assert!(temperature
        .buckets
        .windows(2)
        .all(|pair| pair[0].bucket_start_ms < pair[1].bucket_start_ms));
    // T sits 200s into its 5-minute bucket: minutes 0-1, 2-6 and 7-11
    let means: Vec<f64> = temperature.buckets.iter().map(|b| b.mean_value).collect();
    assert_eq!(means, vec![20.5, 24.0, 29.0]);
    assert!(temperature.range.min < 20.5);
    assert!(temperature.range.max > 29.0);

    let humidity = humidity_series(&batch.readings, &aggregator);
    assert!(humidity.range.min >= 0.0);
    assert!(humidity.range.max <= 100.0);
}

#[test]
fn test_invalid_window_and_bucket_width() {
    let err = TimeWindow::between(T, T - 1).unwrap_err();
    assert!(matches!(err, TelemetryError::InvalidRange { .. }));
    assert_eq!(err.code(), 2005);

    let err = IntervalAggregator::new(0).unwrap_err();
    assert_eq!(err.code(), 2004);
}

#[tokio::test]
async fn test_heat_index_model_never_overrides_rules() {
    let config = AppConfig::default();
    let classifier =
        SafetyClassifier::new(config.classification).with_model(Arc::new(HeatIndexModel));

    let hot_empty = cabin_telemetry::TelemetryReading {
        device_id: "car_001".to_string(),
        captured_at: T,
        temperature_c: Some(36.0),
        humidity_pct: Some(60.0),
        motion_detected: Some(false),
        motion_source: None,
        safety_trigger: Some(false),
        led_state: None,
    };
    let result = classifier.classify(&hot_empty).await;
    assert_eq!(result.label, SafetyLabel::Danger);
    assert_eq!(result.rule_label, SafetyLabel::Danger);
    assert_eq!(result.model_label, Some(SafetyLabel::Danger));
    assert_eq!(result.confidence_pct, Some(100));

    let mild = cabin_telemetry::TelemetryReading {
        temperature_c: Some(22.0),
        humidity_pct: None,
        ..hot_empty
    };
    let result = classifier.classify(&mild).await;
    assert_eq!(result.label, SafetyLabel::Safe);
    assert_eq!(result.model_label, None);
    assert_eq!(result.confidence_pct, None);
}

#[tokio::test]
async fn test_live_to_filtered_lifecycle() {
    let store = InMemoryStore::new();
    store.append_history(
        "car_001",
        vec![
            record(RawTimestampValue::from(T - 2 * 24 * 60 * MIN), 18.0),
            record(RawTimestampValue::from(T - 30 * MIN), 24.0),
            record(RawTimestampValue::from(T - 10 * MIN), 28.0),
        ],
    );
    store.set_devices(vec![
        RawDeviceRecord {
            device_id: "car_001".to_string(),
            timestamp: Some(RawTimestampValue::from(T - 10_000)),
        },
        RawDeviceRecord {
            device_id: "car_002".to_string(),
            timestamp: Some(RawTimestampValue::from(T - 5 * MIN)),
        },
    ]);
    let mut orchestrator = create_orchestrator(&store);

    orchestrator.enter_live().await.unwrap();
    settle(&mut orchestrator).await;

    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.mode, RetrievalMode::Live);
    assert_eq!(snapshot.status, FetchStatus::Ready);
    assert_eq!(orchestrator.readings().len(), 2);
    assert_eq!(
        snapshot.classification.map(|c| c.label),
        Some(SafetyLabel::Warning)
    );
    assert_eq!(snapshot.health.map(|h| h.score_pct), Some(50));

    // Live push with the physical trigger engaged
    store.push_reading(
        "car_001",
        RawTelemetryRecord {
            safety_trigger: Some(true),
            ..record(RawTimestampValue::from(T - MIN), 25.0)
        },
    );
    store.push_alert(RawAlertRecord {
        kind: Some("SafetyTrigger".to_string()),
        timestamp: Some(RawTimestampValue::from(T - MIN)),
    });
    settle(&mut orchestrator).await;

    let snapshot = orchestrator.snapshot();
    assert_eq!(orchestrator.readings().len(), 3);
    assert_eq!(
        snapshot.classification.map(|c| c.label),
        Some(SafetyLabel::Emergency)
    );
    assert_eq!(snapshot.alert_counts.get("SafetyTrigger"), Some(&1));

    // Filtered view over the older history, live feed released
    orchestrator
        .enter_filtered(T - 3 * 24 * 60 * MIN, T - 24 * 60 * MIN)
        .await
        .unwrap();
    settle(&mut orchestrator).await;

    assert!(matches!(orchestrator.mode(), RetrievalMode::Filtered { .. }));
    assert_eq!(orchestrator.status(), FetchStatus::Ready);
    let temps: Vec<Option<f64>> = orchestrator
        .readings()
        .iter()
        .map(|r| r.temperature_c)
        .collect();
    assert_eq!(temps, vec![Some(18.0)]);

    orchestrator.shutdown();
    assert_eq!(store.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_store_outage_surfaces_error_status() {
    let store = InMemoryStore::new();
    store.fail_reads(Some("permission denied"));
    let mut orchestrator = create_orchestrator(&store);

    orchestrator.enter_live().await.unwrap();
    settle(&mut orchestrator).await;

    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.status, FetchStatus::Error);
    assert!(snapshot.last_error.is_some());
    assert!(orchestrator.readings().is_empty());
}

#[test]
fn test_bundled_config_matches_defaults() {
    let config = AppConfig::load_from_file("assets/telemetry_config.json");
    let defaults = AppConfig::default();

    assert_eq!(config.device.device_id, defaults.device.device_id);
    assert_eq!(config.refresh.period_ms, defaults.refresh.period_ms);
    assert_eq!(
        config.aggregation.bucket_width_minutes,
        defaults.aggregation.bucket_width_minutes
    );
    assert_eq!(config.classification, defaults.classification);
}
