use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cabin_telemetry::analysis::pipeline::{humidity_series, temperature_series};
use cabin_telemetry::analysis::{normalize_batch, HeatIndexModel, IntervalAggregator, TimeWindow};
use cabin_telemetry::config::AppConfig;
use cabin_telemetry::diagnostics::{self, HubAudit};
use cabin_telemetry::ports::memory::InMemoryStore;
use cabin_telemetry::ports::{Clock, ManualClock, SystemClock};
use cabin_telemetry::{
    ErrorCode, RawTelemetryRecord, SafetyClassifier, StreamOrchestrator, TelemetryReading,
};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.execute() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("cabin_cli error: {err:?}");
            ExitCode::from(1)
        }
    }
}

#[derive(Parser)]
#[command(
    name = "cabin_cli",
    about = "Offline tooling for the cabin telemetry core: classify, normalize and replay"
)]
struct Cli {
    /// Path to a JSON configuration file (defaults are used when absent)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn execute(self) -> Result<()> {
        let config = match &self.config {
            Some(path) => load_config(path)?,
            None => AppConfig::default(),
        };
        match self.command {
            Command::Classify(args) => classify_command(config, args),
            Command::Normalize(args) => normalize_command(config, args),
            Command::Watch(args) => watch_command(config, args),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Classify a single cabin reading and print the result as JSON
    Classify(ClassifyArgs),
    /// Normalize a JSON array of raw records and print readings and series
    Normalize(NormalizeArgs),
    /// Replay records through the orchestrator and print snapshots as JSON lines
    Watch(WatchArgs),
}

#[derive(Args)]
struct ClassifyArgs {
    /// Cabin temperature in °C
    #[arg(long)]
    temp: Option<f64>,
    /// Relative humidity in %
    #[arg(long)]
    humidity: Option<f64>,
    #[arg(long)]
    motion: bool,
    /// Physical safety trigger engaged
    #[arg(long)]
    trigger: bool,
    /// Attach the heat-index model next to the rule engine
    #[arg(long)]
    heat_index: bool,
}

#[derive(Args)]
struct NormalizeArgs {
    /// JSON file holding an array of raw telemetry records
    input: PathBuf,
    /// Device id stamped onto the readings (overrides config)
    #[arg(long)]
    device: Option<String>,
    /// Inclusive window start, epoch milliseconds
    #[arg(long)]
    start: Option<i64>,
    /// Inclusive window end, epoch milliseconds
    #[arg(long)]
    end: Option<i64>,
    /// Reference "now" for legacy counter alignment (defaults to wall clock)
    #[arg(long)]
    now: Option<i64>,
}

#[derive(Args)]
struct WatchArgs {
    /// Records already in the device log before live mode starts
    #[arg(long)]
    history: Option<PathBuf>,
    /// Records pushed one by one to the live feed
    #[arg(long)]
    live: Option<PathBuf>,
    /// Delay between live pushes in milliseconds
    #[arg(long, default_value_t = 1_000)]
    interval_ms: u64,
    /// Stop after this many milliseconds (runs until Ctrl+C when absent)
    #[arg(long)]
    duration_ms: Option<u64>,
    /// Device id to follow (overrides config)
    #[arg(long)]
    device: Option<String>,
    /// Pin the orchestrator clock to this epoch millisecond value
    #[arg(long)]
    now: Option<i64>,
    #[arg(long)]
    heat_index: bool,
    /// Log every diagnostics event (fetches, drops, subscriptions) to stderr
    #[arg(long)]
    trace_diagnostics: bool,
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
}

fn load_records(path: &Path) -> Result<Vec<RawTelemetryRecord>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading records from {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("parsing records in {}", path.display()))
}

fn build_classifier(config: &AppConfig, heat_index: bool) -> SafetyClassifier {
    let classifier = SafetyClassifier::new(config.classification);
    if heat_index {
        classifier.with_model(Arc::new(HeatIndexModel))
    } else {
        classifier
    }
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("building tokio runtime")
}

fn classify_command(config: AppConfig, args: ClassifyArgs) -> Result<()> {
    if args.temp.is_none() && args.humidity.is_none() {
        bail!("at least one of --temp or --humidity is required");
    }
    let reading = TelemetryReading {
        device_id: config.device.device_id.clone(),
        captured_at: SystemClock.now_ms(),
        temperature_c: args.temp,
        humidity_pct: args.humidity,
        motion_detected: Some(args.motion),
        motion_source: Some("cli".to_string()),
        safety_trigger: Some(args.trigger),
        led_state: None,
    };

    let classifier = build_classifier(&config, args.heat_index);
    let runtime = build_runtime()?;
    let result = runtime.block_on(classifier.classify(&reading));

    let json = serde_json::to_string_pretty(&result).context("serializing classification")?;
    println!("{json}");
    Ok(())
}

fn normalize_command(config: AppConfig, args: NormalizeArgs) -> Result<()> {
    let records = load_records(&args.input)?;
    let device_id = args.device.unwrap_or(config.device.device_id);
    let window = match (args.start, args.end) {
        (Some(start), Some(end)) => TimeWindow::between(start, end)
            .map_err(|err| anyhow::anyhow!("invalid window: {}", err.message()))?,
        (start_ms, end_ms) => TimeWindow { start_ms, end_ms },
    };
    let now_ms = args.now.unwrap_or_else(|| SystemClock.now_ms());
    let aggregator = IntervalAggregator::new(config.aggregation.bucket_width_minutes)
        .map_err(|err| anyhow::anyhow!("invalid aggregation config: {}", err.message()))?;

    let batch = normalize_batch(&records, &device_id, window, now_ms);
    let dropped: Vec<_> = batch
        .dropped
        .iter()
        .map(|entry| {
            json!({
                "index": entry.index,
                "code": entry.reason.code(),
                "message": entry.reason.message(),
            })
        })
        .collect();
    let report = json!({
        "device_id": device_id,
        "readings": batch.readings,
        "dropped": dropped,
        "temperature": temperature_series(&batch.readings, &aggregator),
        "humidity": humidity_series(&batch.readings, &aggregator),
    });

    let json = serde_json::to_string_pretty(&report).context("serializing normalized batch")?;
    println!("{json}");
    Ok(())
}

fn watch_command(config: AppConfig, args: WatchArgs) -> Result<()> {
    let config = match args.device {
        Some(device) => config.with_device_id(device),
        None => config,
    };
    let device_id = config.device.device_id.clone();
    let history = args.history.as_deref().map(load_records).transpose()?;
    let live = args.live.as_deref().map(load_records).transpose()?;
    let interval = Duration::from_millis(args.interval_ms);
    let duration = args.duration_ms.map(Duration::from_millis);
    let trace_diagnostics = args.trace_diagnostics;

    let store = InMemoryStore::new();
    if let Some(records) = history {
        store.append_history(&device_id, records);
    }
    let clock: Arc<dyn Clock> = match args.now {
        Some(now_ms) => Arc::new(ManualClock::new(now_ms)),
        None => Arc::new(SystemClock),
    };
    let classifier = build_classifier(&config, args.heat_index).with_audit(Arc::new(HubAudit));

    let runtime = build_runtime()?;
    runtime.block_on(async move {
        if trace_diagnostics {
            let mut events = diagnostics::hub().collector().subscribe_unbounded();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    match serde_json::to_string(&event) {
                        Ok(line) => eprintln!("{line}"),
                        Err(err) => tracing::warn!("failed to serialize diagnostics event: {err}"),
                    }
                }
            });
        }

        let mut orchestrator =
            StreamOrchestrator::new(config, Arc::new(store.clone()), classifier, clock)
                .map_err(|err| anyhow::anyhow!("invalid configuration: {}", err.message()))?;

        let mut snapshots = orchestrator.snapshot_stream();
        let printer = tokio::spawn(async move {
            while let Some(snapshot) = snapshots.next().await {
                match serde_json::to_string(&snapshot) {
                    Ok(line) => println!("{line}"),
                    Err(err) => tracing::warn!("failed to serialize snapshot: {err}"),
                }
            }
        });

        orchestrator
            .enter_live()
            .await
            .map_err(|err| anyhow::anyhow!("entering live mode: {}", err.message()))?;

        let replay = live.map(|records| {
            let store = store.clone();
            let device_id = device_id.clone();
            tokio::spawn(async move {
                for record in records {
                    tokio::time::sleep(interval).await;
                    tracing::debug!(device = %device_id, "pushing live record");
                    store.push_reading(&device_id, record);
                }
            })
        });

        orchestrator
            .run_until(async move {
                match duration {
                    Some(duration) => tokio::time::sleep(duration).await,
                    None => {
                        let _ = tokio::signal::ctrl_c().await;
                    }
                }
            })
            .await;

        if let Some(replay) = replay {
            replay.abort();
        }
        drop(orchestrator);
        let _ = printer.await;

        let stats = diagnostics::hub().snapshot();
        eprintln!(
            "{} diagnostic events recorded ({} dropped)",
            stats.total_events, stats.dropped_events
        );
        Ok(())
    })
}
