//! StreamOrchestrator: live/filtered retrieval state machine.
//!
//! The orchestrator is an owned value driven by one task through
//! [`StreamOrchestrator::step`] or [`StreamOrchestrator::run_until`]. Store
//! I/O runs in spawned tasks whose results come back as events on a single
//! mpsc channel; subscriptions and the refresh timer feed the same channel.
//! Every fetch carries a generation and only the latest issued generation is
//! applied, whatever order completions arrive in. Live-feed events and timer
//! ticks carry the live session they were started for and are dropped once
//! that session ends.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::analysis::alerts::{alert_frequency, AlertEvent};
use crate::analysis::classifier::{ClassificationResult, SafetyClassifier};
use crate::analysis::fleet::{fleet_health, DeviceHealthSample, FleetHealth};
use crate::analysis::pipeline::{
    humidity_series, merge_reading, normalize_batch, temperature_series, SeriesView, TimeWindow,
};
use crate::analysis::IntervalAggregator;
use crate::config::AppConfig;
use crate::diagnostics::{self, DiagnosticError, Feed, FetchTrigger, SubscriptionPhase};
use crate::error::{
    log_store_error, log_telemetry_error, ErrorCode, OrchestratorError, StoreError, TelemetryError,
};
use crate::managers::BroadcastChannelManager;
use crate::ports::{Clock, Disposer, TelemetryStore};
use crate::reading::{
    ControlCommand, RawAlertRecord, RawControlState, RawDeviceRecord, RawTelemetryRecord,
    TelemetryReading,
};

#[path = "core_subscriptions.rs"]
mod core_subscriptions;

/// Fetch status of the active mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    /// Foreground fetch in flight
    Loading,
    Ready,
    /// Periodic live refresh in flight; displayed data is kept
    BackgroundRefreshing,
    /// Last applied fetch failed; displayed data is kept
    Error,
}

/// Active retrieval mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RetrievalMode {
    Live,
    Filtered { start_ms: i64, end_ms: i64 },
}

/// Visualization payload published after every applied change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplaySnapshot {
    pub device_id: String,
    pub mode: RetrievalMode,
    pub status: FetchStatus,
    pub temperature: SeriesView,
    pub humidity: SeriesView,
    pub latest: Option<TelemetryReading>,
    pub classification: Option<ClassificationResult>,
    pub health: Option<FleetHealth>,
    pub alert_counts: BTreeMap<String, usize>,
    pub control: RawControlState,
    pub last_error: Option<String>,
}

/// Inputs re-entering the orchestrator
#[derive(Debug)]
pub(crate) enum OrchestratorEvent {
    FetchCompleted {
        generation: u64,
        trigger: FetchTrigger,
        window: TimeWindow,
        elapsed_ms: u64,
        result: Result<Vec<RawTelemetryRecord>, StoreError>,
    },
    Tick {
        session: u64,
    },
    LiveRecord {
        session: u64,
        record: RawTelemetryRecord,
    },
    Fleet(Vec<RawDeviceRecord>),
    Alerts(Vec<RawAlertRecord>),
    FeedClosed {
        feed: Feed,
        session: Option<u64>,
    },
}

/// An open store subscription and the task forwarding it
struct FeedHandle {
    feed: Feed,
    disposer: Disposer,
    forwarder: JoinHandle<()>,
}

impl FeedHandle {
    fn close(self) {
        self.disposer.dispose();
        self.forwarder.abort();
        diagnostics::hub().record_subscription(self.feed, SubscriptionPhase::Disposed);
        log::debug!("[Orchestrator] Disposed {:?} subscription", self.feed);
    }
}

/// Resources owned by one live-mode session
struct LiveSession {
    session: u64,
    subscription: Option<FeedHandle>,
    timer: JoinHandle<()>,
}

/// Live/filtered retrieval state machine for one device
pub struct StreamOrchestrator {
    config: AppConfig,
    store: Arc<dyn TelemetryStore>,
    classifier: Arc<SafetyClassifier>,
    clock: Arc<dyn Clock>,
    aggregator: IntervalAggregator,
    pub(crate) broadcasts: BroadcastChannelManager,
    snapshot_tx: broadcast::Sender<DisplaySnapshot>,
    classification_tx: broadcast::Sender<ClassificationResult>,
    events_tx: mpsc::UnboundedSender<OrchestratorEvent>,
    events_rx: mpsc::UnboundedReceiver<OrchestratorEvent>,

    mode: RetrievalMode,
    status: FetchStatus,
    latest_generation: u64,
    session_counter: u64,
    live: Option<LiveSession>,
    feeds: Vec<FeedHandle>,

    readings: Vec<TelemetryReading>,
    classification: Option<ClassificationResult>,
    devices: HashMap<String, DeviceHealthSample>,
    health: Option<FleetHealth>,
    alert_counts: BTreeMap<String, usize>,
    /// Device control block as last seen by a live fetch or push
    control: RawControlState,
    /// LED state the device last reported through live data
    reported_led: Option<bool>,
    last_error: Option<String>,
}

impl StreamOrchestrator {
    /// Create an orchestrator in live mode with no data loaded.
    ///
    /// # Errors
    /// `InvalidBucketWidth` when the configured bucket width is zero,
    /// `InvalidRefreshPeriod` when the live refresh period is zero.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn TelemetryStore>,
        classifier: SafetyClassifier,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TelemetryError> {
        let aggregator = IntervalAggregator::new(config.aggregation.bucket_width_minutes)?;
        if config.refresh.period_ms == 0 {
            return Err(TelemetryError::InvalidRefreshPeriod { period_ms: 0 });
        }
        let broadcasts = BroadcastChannelManager::new();
        let snapshot_tx = broadcasts.init_snapshots();
        let classification_tx = broadcasts.init_classification();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            store,
            classifier: Arc::new(classifier),
            clock,
            aggregator,
            broadcasts,
            snapshot_tx,
            classification_tx,
            events_tx,
            events_rx,
            mode: RetrievalMode::Live,
            status: FetchStatus::Loading,
            latest_generation: 0,
            session_counter: 0,
            live: None,
            feeds: Vec::new(),
            readings: Vec::new(),
            classification: None,
            devices: HashMap::new(),
            health: None,
            alert_counts: BTreeMap::new(),
            control: RawControlState::default(),
            reported_led: None,
            last_error: None,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.config.device.device_id
    }

    pub fn mode(&self) -> RetrievalMode {
        self.mode
    }

    pub fn status(&self) -> FetchStatus {
        self.status
    }

    /// Generation of the most recently issued fetch
    pub fn latest_generation(&self) -> u64 {
        self.latest_generation
    }

    /// Readings of the active mode, sorted by capture time
    pub fn readings(&self) -> &[TelemetryReading] {
        &self.readings
    }

    pub fn classification(&self) -> Option<&ClassificationResult> {
        self.classification.as_ref()
    }

    pub fn control_state(&self) -> RawControlState {
        self.control
    }

    fn require_device_id(&self) -> Result<(), StoreError> {
        if self.device_id().trim().is_empty() {
            let err = StoreError::MissingDeviceId;
            log_store_error(&err, "StreamOrchestrator");
            return Err(err);
        }
        Ok(())
    }

    // ========================================================================
    // MODE TRANSITIONS
    // ========================================================================

    /// Enter live mode.
    ///
    /// Fetches the trailing lookback window as `Loading`, opens the live
    /// subscription and starts the periodic refresh. A subscription failure
    /// is recorded and the session continues on periodic refresh alone.
    pub async fn enter_live(&mut self) -> Result<(), OrchestratorError> {
        self.require_device_id()?;
        self.teardown_live();
        self.ensure_feeds().await;

        self.mode = RetrievalMode::Live;
        self.session_counter += 1;
        let session = self.session_counter;
        log::info!(
            "[Orchestrator] Entering live mode for {} (session {})",
            self.device_id(),
            session
        );

        let window = self.live_window();
        self.start_fetch(FetchTrigger::LiveEntry, window);

        let subscription = match self.store.subscribe(self.device_id()).await {
            Ok(subscription) => {
                let (receiver, disposer) = subscription.into_parts();
                let forwarder = core_subscriptions::forward_feed(
                    receiver,
                    self.events_tx.clone(),
                    move |record| OrchestratorEvent::LiveRecord { session, record },
                    OrchestratorEvent::FeedClosed {
                        feed: Feed::Live,
                        session: Some(session),
                    },
                );
                diagnostics::hub().record_subscription(Feed::Live, SubscriptionPhase::Opened);
                Some(FeedHandle {
                    feed: Feed::Live,
                    disposer,
                    forwarder,
                })
            }
            Err(err) => {
                log_store_error(&err, "StreamOrchestrator::enter_live");
                diagnostics::hub().record_subscription(Feed::Live, SubscriptionPhase::Failed);
                diagnostics::hub().record_error(DiagnosticError::Subscription, err.message());
                self.last_error = Some(err.to_string());
                None
            }
        };

        let timer = core_subscriptions::spawn_refresh_timer(
            self.config.refresh.period(),
            self.events_tx.clone(),
            session,
        );

        self.live = Some(LiveSession {
            session,
            subscription,
            timer,
        });
        self.publish_snapshot();
        Ok(())
    }

    /// Leave live mode and fetch `[start_ms, end_ms]` (inclusive).
    ///
    /// Returns the generation of the issued fetch.
    pub async fn enter_filtered(
        &mut self,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<u64, OrchestratorError> {
        self.require_device_id()?;
        let window = TimeWindow::between(start_ms, end_ms)?;
        self.teardown_live();
        self.ensure_feeds().await;
        log::info!(
            "[Orchestrator] Entering filtered mode [{}, {}]",
            start_ms,
            end_ms
        );
        Ok(self.fetch_filtered(window, start_ms, end_ms))
    }

    /// Explicitly re-fetch with new filter bounds.
    ///
    /// Switches to filtered mode first when called from live mode.
    pub async fn apply_filter(
        &mut self,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<u64, OrchestratorError> {
        if self.mode == RetrievalMode::Live {
            return self.enter_filtered(start_ms, end_ms).await;
        }
        self.require_device_id()?;
        let window = TimeWindow::between(start_ms, end_ms)?;
        Ok(self.fetch_filtered(window, start_ms, end_ms))
    }

    fn fetch_filtered(&mut self, window: TimeWindow, start_ms: i64, end_ms: i64) -> u64 {
        self.mode = RetrievalMode::Filtered { start_ms, end_ms };
        let generation = self.start_fetch(FetchTrigger::Filter, window);
        self.publish_snapshot();
        generation
    }

    /// Dispose every subscription and stop the refresh timer.
    ///
    /// Safe to call more than once; each disposer runs exactly once.
    pub fn shutdown(&mut self) {
        self.teardown_live();
        for feed in self.feeds.drain(..) {
            feed.close();
        }
        log::info!("[Orchestrator] Shut down");
    }

    fn teardown_live(&mut self) {
        if let Some(live) = self.live.take() {
            live.timer.abort();
            if let Some(subscription) = live.subscription {
                subscription.close();
            }
            log::debug!("[Orchestrator] Live session {} ended", live.session);
        }
    }

    /// Open the fleet and alert feeds once per orchestrator lifetime.
    async fn ensure_feeds(&mut self) {
        if !self.feeds.is_empty() {
            return;
        }

        match self.store.subscribe_fleet().await {
            Ok(subscription) => {
                let (receiver, disposer) = subscription.into_parts();
                let forwarder = core_subscriptions::forward_feed(
                    receiver,
                    self.events_tx.clone(),
                    OrchestratorEvent::Fleet,
                    OrchestratorEvent::FeedClosed {
                        feed: Feed::Fleet,
                        session: None,
                    },
                );
                diagnostics::hub().record_subscription(Feed::Fleet, SubscriptionPhase::Opened);
                self.feeds.push(FeedHandle {
                    feed: Feed::Fleet,
                    disposer,
                    forwarder,
                });
            }
            Err(err) => self.record_feed_failure(Feed::Fleet, &err),
        }

        match self.store.subscribe_alerts().await {
            Ok(subscription) => {
                let (receiver, disposer) = subscription.into_parts();
                let forwarder = core_subscriptions::forward_feed(
                    receiver,
                    self.events_tx.clone(),
                    OrchestratorEvent::Alerts,
                    OrchestratorEvent::FeedClosed {
                        feed: Feed::Alerts,
                        session: None,
                    },
                );
                diagnostics::hub().record_subscription(Feed::Alerts, SubscriptionPhase::Opened);
                self.feeds.push(FeedHandle {
                    feed: Feed::Alerts,
                    disposer,
                    forwarder,
                });
            }
            Err(err) => self.record_feed_failure(Feed::Alerts, &err),
        }
    }

    fn record_feed_failure(&mut self, feed: Feed, err: &StoreError) {
        log_store_error(err, "StreamOrchestrator::ensure_feeds");
        diagnostics::hub().record_subscription(feed, SubscriptionPhase::Failed);
        diagnostics::hub().record_error(DiagnosticError::Subscription, err.message());
    }

    fn live_window(&self) -> TimeWindow {
        TimeWindow::trailing(self.config.refresh.live_lookback_ms, self.clock.now_ms())
    }

    fn is_current_session(&self, session: u64) -> bool {
        self.live
            .as_ref()
            .is_some_and(|live| live.session == session)
    }

    // ========================================================================
    // FETCHES
    // ========================================================================

    fn start_fetch(&mut self, trigger: FetchTrigger, window: TimeWindow) -> u64 {
        self.latest_generation += 1;
        let generation = self.latest_generation;
        self.status = match trigger {
            FetchTrigger::Refresh => FetchStatus::BackgroundRefreshing,
            FetchTrigger::LiveEntry | FetchTrigger::Filter => FetchStatus::Loading,
        };
        tracing::debug!(generation, ?trigger, "starting fetch");

        let store = Arc::clone(&self.store);
        let device_id = self.device_id().to_string();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = store
                .fetch_range(&device_id, window.start_ms, window.end_ms)
                .await;
            let _ = events_tx.send(OrchestratorEvent::FetchCompleted {
                generation,
                trigger,
                window,
                elapsed_ms: started.elapsed().as_millis() as u64,
                result,
            });
        });

        generation
    }

    async fn apply_fetch(
        &mut self,
        generation: u64,
        trigger: FetchTrigger,
        window: TimeWindow,
        elapsed_ms: u64,
        result: Result<Vec<RawTelemetryRecord>, StoreError>,
    ) {
        if generation != self.latest_generation {
            tracing::debug!(
                generation,
                latest = self.latest_generation,
                "discarding superseded fetch"
            );
            diagnostics::hub().record_fetch_superseded(generation, self.latest_generation);
            return;
        }

        match result {
            Ok(records) => {
                let batch = normalize_batch(&records, self.device_id(), window, self.clock.now_ms());
                if !batch.dropped.is_empty() {
                    for entry in &batch.dropped {
                        log_telemetry_error(&entry.reason, "StreamOrchestrator::fetch");
                    }
                    log::warn!(
                        "[Orchestrator] Dropped {} of {} records in fetch {}",
                        batch.dropped.len(),
                        records.len(),
                        generation
                    );
                    diagnostics::hub().record_dropped(&batch.dropped);
                }
                // Historical windows never describe the device's current state
                if !matches!(trigger, FetchTrigger::Filter) {
                    let newest_control = batch
                        .source_indices
                        .iter()
                        .rev()
                        .find_map(|&index| records.get(index).and_then(|record| record.control));
                    if let Some(control) = newest_control {
                        self.control = control;
                    }
                    if let Some(led) = batch.readings.iter().rev().find_map(|r| r.led_state) {
                        self.reported_led = Some(led);
                    }
                }
                diagnostics::hub().record_fetch_completed(
                    generation,
                    trigger,
                    batch.readings.len(),
                    elapsed_ms,
                );

                self.readings = batch.readings;
                self.status = FetchStatus::Ready;
                self.last_error = None;

                if self.mode == RetrievalMode::Live {
                    if let Some(latest) = self.readings.last().cloned() {
                        self.classify(&latest).await;
                    }
                }
            }
            Err(err) => {
                log_store_error(&err, "StreamOrchestrator::fetch");
                diagnostics::hub().record_fetch_failed(generation, trigger, &err);
                diagnostics::hub().record_error(DiagnosticError::StoreRead, err.message());
                self.status = FetchStatus::Error;
                self.last_error = Some(err.to_string());
            }
        }

        self.publish_snapshot();
    }

    // ========================================================================
    // EVENT LOOP
    // ========================================================================

    /// Wait for the next event and apply it.
    ///
    /// Returns `false` only if the event channel is closed.
    pub async fn step(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => {
                self.apply(event).await;
                true
            }
            None => false,
        }
    }

    /// Apply every event that is already queued without waiting.
    ///
    /// Returns the number of events applied.
    pub async fn drain_ready(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply(event).await;
            applied += 1;
        }
        applied
    }

    /// Drive the orchestrator until `shutdown` resolves, then dispose
    /// everything.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let event = tokio::select! {
                _ = &mut shutdown => break,
                event = self.events_rx.recv() => event,
            };
            match event {
                Some(event) => self.apply(event).await,
                None => break,
            }
        }
        self.shutdown();
    }

    pub(crate) async fn apply(&mut self, event: OrchestratorEvent) {
        match event {
            OrchestratorEvent::FetchCompleted {
                generation,
                trigger,
                window,
                elapsed_ms,
                result,
            } => {
                self.apply_fetch(generation, trigger, window, elapsed_ms, result)
                    .await
            }
            OrchestratorEvent::Tick { session } => {
                if !self.is_current_session(session) {
                    return;
                }
                self.refresh_health();
                let window = self.live_window();
                self.start_fetch(FetchTrigger::Refresh, window);
                self.publish_snapshot();
            }
            OrchestratorEvent::LiveRecord { session, record } => {
                if !self.is_current_session(session) {
                    tracing::debug!(session, "dropping record from ended live session");
                    return;
                }
                self.apply_live_record(record).await;
            }
            OrchestratorEvent::Fleet(devices) => {
                self.devices = devices
                    .iter()
                    .map(|record| {
                        let sample = DeviceHealthSample::from_record(record);
                        (sample.device_id.clone(), sample)
                    })
                    .collect();
                self.refresh_health();
                self.publish_snapshot();
            }
            OrchestratorEvent::Alerts(alerts) => {
                let events: Vec<AlertEvent> = alerts.iter().map(AlertEvent::from_record).collect();
                self.alert_counts = alert_frequency(&events);
                self.publish_snapshot();
            }
            OrchestratorEvent::FeedClosed { feed, session } => {
                if feed == Feed::Live && !session.is_some_and(|s| self.is_current_session(s)) {
                    return;
                }
                log::warn!("[Orchestrator] {:?} feed closed by the store", feed);
                diagnostics::hub().record_subscription(feed, SubscriptionPhase::Closed);
            }
        }
    }

    async fn apply_live_record(&mut self, record: RawTelemetryRecord) {
        let now_ms = self.clock.now_ms();
        if let Some(control) = record.control {
            self.control = control;
        }

        let batch = normalize_batch(
            std::slice::from_ref(&record),
            self.device_id(),
            TimeWindow::UNBOUNDED,
            now_ms,
        );
        let Some(reading) = batch.readings.into_iter().next() else {
            diagnostics::hub().record_dropped(&batch.dropped);
            log::debug!("[Orchestrator] Ignoring pushed record without a usable reading");
            self.publish_snapshot();
            return;
        };

        if reading.led_state.is_some() {
            self.reported_led = reading.led_state;
        }

        let device_id = reading.device_id.clone();
        let seen = self
            .devices
            .entry(device_id.clone())
            .or_insert_with(|| DeviceHealthSample {
                device_id,
                last_seen_ms: None,
            });
        seen.last_seen_ms = Some(seen.last_seen_ms.map_or(reading.captured_at, |last| {
            last.max(reading.captured_at)
        }));

        let window = self.live_window();
        merge_reading(&mut self.readings, reading.clone(), window);
        self.refresh_health();
        self.classify(&reading).await;
        self.publish_snapshot();
    }

    async fn classify(&mut self, reading: &TelemetryReading) {
        let result = self.classifier.classify(reading).await;
        tracing::debug!(label = ?result.label, captured_at = result.captured_at, "classified reading");
        let _ = self.classification_tx.send(result.clone());
        self.classification = Some(result);
    }

    fn refresh_health(&mut self) {
        if self.devices.is_empty() && self.health.is_none() {
            return;
        }
        let health = fleet_health(
            &self.devices,
            self.config.fleet.staleness_window_ms,
            self.clock.now_ms(),
        );
        diagnostics::hub().record_fleet_health(&health);
        self.health = Some(health);
    }

    // ========================================================================
    // CONTROL
    // ========================================================================

    /// Write a control command to the device. Failures are returned, never
    /// retried.
    pub async fn send_control(&mut self, command: ControlCommand) -> Result<(), StoreError> {
        self.require_device_id()?;
        if let Err(err) = self.store.write_control(self.device_id(), command).await {
            log_store_error(&err, "StreamOrchestrator::send_control");
            diagnostics::hub().record_error(DiagnosticError::StoreWrite, err.message());
            return Err(err);
        }
        if let Some(remote_override) = command.remote_override {
            self.control.remote_override = remote_override;
        }
        if let Some(led_command) = command.led_command {
            self.control.led_command = led_command;
        }
        self.publish_snapshot();
        Ok(())
    }

    /// Toggle manual override. Turning it off hands the LED back to the
    /// device by resetting the command to its reported state.
    pub async fn set_remote_override(&mut self, enabled: bool) -> Result<(), StoreError> {
        let command = if enabled {
            ControlCommand {
                remote_override: Some(true),
                led_command: None,
            }
        } else {
            ControlCommand {
                remote_override: Some(false),
                led_command: Some(self.reported_led.unwrap_or(false)),
            }
        };
        self.send_control(command).await
    }

    /// Command the LED. Requires manual override.
    pub async fn set_led(&mut self, on: bool) -> Result<(), StoreError> {
        if !self.control.remote_override {
            let err = StoreError::OverrideRequired;
            log::warn!("[Orchestrator] {}", err);
            return Err(err);
        }
        self.send_control(ControlCommand {
            remote_override: None,
            led_command: Some(on),
        })
        .await
    }

    // ========================================================================
    // SNAPSHOTS
    // ========================================================================

    /// Build the current display snapshot
    pub fn snapshot(&self) -> DisplaySnapshot {
        DisplaySnapshot {
            device_id: self.device_id().to_string(),
            mode: self.mode,
            status: self.status,
            temperature: temperature_series(&self.readings, &self.aggregator),
            humidity: humidity_series(&self.readings, &self.aggregator),
            latest: self.readings.last().cloned(),
            classification: self.classification.clone(),
            health: self.health,
            alert_counts: self.alert_counts.clone(),
            control: self.control,
            last_error: self.last_error.clone(),
        }
    }

    fn publish_snapshot(&self) {
        // No receivers is fine
        let _ = self.snapshot_tx.send(self.snapshot());
    }
}

impl Drop for StreamOrchestrator {
    fn drop(&mut self) {
        self.teardown_live();
        for feed in self.feeds.drain(..) {
            feed.close();
        }
    }
}
