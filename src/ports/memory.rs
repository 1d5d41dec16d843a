//! In-memory [`TelemetryStore`] with failure injection.
//!
//! Keeps each device's history log, the fleet and alert collections and the
//! last control command. Subscribers get every later update; fleet and alert
//! subscribers also receive the current snapshot immediately.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Disposer, Subscription, TelemetryStore};
use crate::error::StoreError;
use crate::reading::{ControlCommand, RawAlertRecord, RawDeviceRecord, RawTelemetryRecord};

type Subscribers<T> = Vec<(u64, mpsc::UnboundedSender<T>)>;

#[derive(Default)]
struct StoreState {
    logs: HashMap<String, Vec<RawTelemetryRecord>>,
    devices: Vec<RawDeviceRecord>,
    alerts: Vec<RawAlertRecord>,
    controls: HashMap<String, ControlCommand>,
    live_subscribers: HashMap<String, Subscribers<RawTelemetryRecord>>,
    fleet_subscribers: Subscribers<Vec<RawDeviceRecord>>,
    alert_subscribers: Subscribers<Vec<RawAlertRecord>>,
    next_subscriber_id: u64,
    read_failure: Option<String>,
    write_failure: Option<String>,
    fetch_count: usize,
}

impl StoreState {
    fn next_id(&mut self) -> u64 {
        self.next_subscriber_id += 1;
        self.next_subscriber_id
    }

    fn active_subscriptions(&self) -> usize {
        self.live_subscribers.values().map(Vec::len).sum::<usize>()
            + self.fleet_subscribers.len()
            + self.alert_subscribers.len()
    }
}

/// Send to every subscriber, forgetting the ones whose receiver is gone.
fn fan_out<T: Clone>(subscribers: &mut Subscribers<T>, value: &T) {
    subscribers.retain(|(_, tx)| tx.send(value.clone()).is_ok());
}

/// Shared in-memory store; clones point at the same data.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed history without notifying live subscribers
    pub fn append_history<I>(&self, device_id: &str, records: I)
    where
        I: IntoIterator<Item = RawTelemetryRecord>,
    {
        self.state()
            .logs
            .entry(device_id.to_string())
            .or_default()
            .extend(records);
    }

    /// Append a record to the device's log and push it to live subscribers
    pub fn push_reading(&self, device_id: &str, record: RawTelemetryRecord) {
        let mut state = self.state();
        state
            .logs
            .entry(device_id.to_string())
            .or_default()
            .push(record.clone());
        if let Some(subscribers) = state.live_subscribers.get_mut(device_id) {
            fan_out(subscribers, &record);
        }
    }

    /// Replace the fleet collection and notify fleet subscribers
    pub fn set_devices(&self, devices: Vec<RawDeviceRecord>) {
        let mut state = self.state();
        state.devices = devices;
        let snapshot = state.devices.clone();
        fan_out(&mut state.fleet_subscribers, &snapshot);
    }

    /// Append an alert and notify alert subscribers with the full set
    pub fn push_alert(&self, alert: RawAlertRecord) {
        let mut state = self.state();
        state.alerts.push(alert);
        let snapshot = state.alerts.clone();
        fan_out(&mut state.alert_subscribers, &snapshot);
    }

    /// Make every following fetch fail (`None` restores normal reads)
    pub fn fail_reads(&self, reason: Option<&str>) {
        self.state().read_failure = reason.map(str::to_string);
    }

    /// Make every following control write fail (`None` restores writes)
    pub fn fail_writes(&self, reason: Option<&str>) {
        self.state().write_failure = reason.map(str::to_string);
    }

    /// Last control state written for a device
    pub fn control(&self, device_id: &str) -> Option<ControlCommand> {
        self.state().controls.get(device_id).copied()
    }

    pub fn fetch_count(&self) -> usize {
        self.state().fetch_count
    }

    /// Number of subscriptions not yet disposed
    pub fn active_subscriptions(&self) -> usize {
        self.state().active_subscriptions()
    }

    fn disposer_for<F>(&self, remove: F) -> Disposer
    where
        F: FnOnce(&mut StoreState) + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        Disposer::new(move || {
            let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
            remove(&mut guard);
        })
    }
}

#[async_trait]
impl TelemetryStore for InMemoryStore {
    async fn fetch_range(
        &self,
        device_id: &str,
        _start_ms: Option<i64>,
        _end_ms: Option<i64>,
    ) -> Result<Vec<RawTelemetryRecord>, StoreError> {
        let mut state = self.state();
        state.fetch_count += 1;
        if let Some(reason) = &state.read_failure {
            return Err(StoreError::ReadFailed {
                reason: reason.clone(),
            });
        }
        Ok(state.logs.get(device_id).cloned().unwrap_or_default())
    }

    async fn subscribe(
        &self,
        device_id: &str,
    ) -> Result<Subscription<RawTelemetryRecord>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.state();
            let id = state.next_id();
            state
                .live_subscribers
                .entry(device_id.to_string())
                .or_default()
                .push((id, tx));
            id
        };
        let device = device_id.to_string();
        let disposer = self.disposer_for(move |state| {
            if let Some(subscribers) = state.live_subscribers.get_mut(&device) {
                subscribers.retain(|(existing, _)| *existing != id);
            }
        });
        Ok(Subscription::new(rx, disposer))
    }

    async fn subscribe_fleet(&self) -> Result<Subscription<Vec<RawDeviceRecord>>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.state();
            let id = state.next_id();
            let _ = tx.send(state.devices.clone());
            state.fleet_subscribers.push((id, tx));
            id
        };
        let disposer = self.disposer_for(move |state| {
            state.fleet_subscribers.retain(|(existing, _)| *existing != id);
        });
        Ok(Subscription::new(rx, disposer))
    }

    async fn subscribe_alerts(&self) -> Result<Subscription<Vec<RawAlertRecord>>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.state();
            let id = state.next_id();
            let _ = tx.send(state.alerts.clone());
            state.alert_subscribers.push((id, tx));
            id
        };
        let disposer = self.disposer_for(move |state| {
            state.alert_subscribers.retain(|(existing, _)| *existing != id);
        });
        Ok(Subscription::new(rx, disposer))
    }

    async fn write_control(
        &self,
        device_id: &str,
        command: ControlCommand,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        if let Some(reason) = &state.write_failure {
            return Err(StoreError::WriteFailed {
                reason: reason.clone(),
            });
        }
        // Partial writes update only the fields they carry
        let current = state.controls.entry(device_id.to_string()).or_default();
        if command.remote_override.is_some() {
            current.remote_override = command.remote_override;
        }
        if command.led_command.is_some() {
            current.led_command = command.led_command;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::RawTimestampValue;

    fn record(temp: f64) -> RawTelemetryRecord {
        RawTelemetryRecord {
            timestamp: Some(RawTimestampValue::from(1_700_000_000_000)),
            temp_c: Some(temp),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_returns_device_history() {
        let store = InMemoryStore::new();
        store.append_history("car_001", vec![record(20.0), record(21.0)]);
        store.append_history("car_002", vec![record(30.0)]);

        let records = store.fetch_range("car_001", None, None).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(store.fetch_range("car_404", None, None).await.unwrap().is_empty());
        assert_eq!(store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_read_failure_injection() {
        let store = InMemoryStore::new();
        store.fail_reads(Some("permission denied"));
        let err = store.fetch_range("car_001", None, None).await.unwrap_err();
        assert!(matches!(err, StoreError::ReadFailed { .. }));

        store.fail_reads(None);
        assert!(store.fetch_range("car_001", None, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_live_subscription_and_dispose() {
        let store = InMemoryStore::new();
        let mut subscription = store.subscribe("car_001").await.unwrap();
        assert_eq!(store.active_subscriptions(), 1);

        store.push_reading("car_001", record(25.0));
        store.push_reading("car_002", record(99.0));
        let received = subscription.recv().await.unwrap();
        assert_eq!(received.temp_c, Some(25.0));

        subscription.dispose();
        assert_eq!(store.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_fleet_subscription_gets_initial_snapshot() {
        let store = InMemoryStore::new();
        store.set_devices(vec![RawDeviceRecord {
            device_id: "car_001".to_string(),
            timestamp: None,
        }]);
        let mut subscription = store.subscribe_fleet().await.unwrap();
        assert_eq!(subscription.recv().await.unwrap().len(), 1);

        store.set_devices(Vec::new());
        assert!(subscription.recv().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_alert_subscription_receives_full_set() {
        let store = InMemoryStore::new();
        let mut subscription = store.subscribe_alerts().await.unwrap();
        assert!(subscription.recv().await.unwrap().is_empty());

        store.push_alert(RawAlertRecord::default());
        store.push_alert(RawAlertRecord::default());
        assert_eq!(subscription.recv().await.unwrap().len(), 1);
        assert_eq!(subscription.recv().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_control_writes_merge() {
        let store = InMemoryStore::new();
        store
            .write_control(
                "car_001",
                ControlCommand {
                    remote_override: Some(true),
                    led_command: None,
                },
            )
            .await
            .unwrap();
        store
            .write_control(
                "car_001",
                ControlCommand {
                    remote_override: None,
                    led_command: Some(true),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            store.control("car_001"),
            Some(ControlCommand {
                remote_override: Some(true),
                led_command: Some(true),
            })
        );

        store.fail_writes(Some("offline"));
        let err = store
            .write_control("car_001", ControlCommand::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::WriteFailed { .. }));
    }
}
