// Analysis module - pure telemetry computations
//
// Every component here is a pure function (or a stateless struct) over its
// inputs. The only mutable state in the crate lives in the orchestrator.
//
// Pipeline:
// - timestamp: raw timestamp → absolute epoch millis (legacy alignment)
// - pipeline: raw batch → sorted readings → bucketed display series
// - aggregator / range: bucket means and padded display ranges
// - classifier (+ heat_index model): latest reading → safety label
// - fleet / alerts: fleet feed → health score, alert feed → tallies

pub mod aggregator;
pub mod alerts;
pub mod classifier;
pub mod fleet;
pub mod heat_index;
pub mod pipeline;
pub mod range;
pub mod timestamp;

pub use aggregator::{IntervalAggregator, TimeBucket};
pub use alerts::{alert_frequency, AlertEvent};
pub use classifier::{ClassificationResult, SafetyClassifier, SafetyLabel};
pub use fleet::{fleet_health, DeviceHealthSample, FleetHealth};
pub use heat_index::HeatIndexModel;
pub use pipeline::{normalize_batch, NormalizedBatch, SeriesView, TimeWindow};
pub use range::{display_range, DisplayRange};
pub use timestamp::{RawTimestamp, TimestampNormalizer};
