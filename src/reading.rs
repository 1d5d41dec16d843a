//! Store wire schema and normalized readings.
//!
//! Raw records mirror the store's snake_case payloads 1:1 and tolerate
//! missing, null, or wrongly typed fields. Numeric fields that are absent,
//! null, non-finite or non-numeric deserialize to `None`; boolean flags
//! accept `true/false` as well as `0/1`. Normalization into
//! [`TelemetryReading`] happens in [`crate::analysis::pipeline`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::analysis::timestamp::RawTimestamp;
use crate::error::TelemetryError;

/// Timestamp field as delivered by the store, before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestampValue {
    Number(f64),
    Text(String),
}

impl RawTimestampValue {
    /// Classify into the normalizer's tagged form.
    ///
    /// Digit-only strings are read as numbers so devices that serialize
    /// `millis()` as text still align.
    pub fn classify(&self) -> RawTimestamp {
        match self {
            RawTimestampValue::Number(value) => RawTimestamp::from_number(*value),
            RawTimestampValue::Text(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
                    if let Ok(value) = trimmed.parse::<i64>() {
                        return RawTimestamp::from_number(value as f64);
                    }
                }
                RawTimestamp::Iso(text.clone())
            }
        }
    }
}

impl From<i64> for RawTimestampValue {
    fn from(value: i64) -> Self {
        RawTimestampValue::Number(value as f64)
    }
}

impl From<&str> for RawTimestampValue {
    fn from(value: &str) -> Self {
        RawTimestampValue::Text(value.to_string())
    }
}

/// Device control block stored next to the live payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawControlState {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub remote_override: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub led_command: bool,
}

/// One telemetry record as stored under the device's log or live path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTelemetryRecord {
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<RawTimestampValue>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub temp_c: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub humidity: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub motion_detected: Option<bool>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub motion_source: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub safety_trigger: Option<bool>,
    #[serde(
        default,
        deserialize_with = "lenient_flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub led_state: Option<bool>,
    #[serde(
        default,
        deserialize_with = "lenient_flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub pir_1: Option<bool>,
    #[serde(
        default,
        deserialize_with = "lenient_flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub pir_2: Option<bool>,
    #[serde(
        default,
        deserialize_with = "lenient_flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub pir_3: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<RawControlState>,
}

impl RawTelemetryRecord {
    /// Whether the record carries a temperature or humidity value.
    pub fn has_reading(&self) -> bool {
        self.temp_c.is_some() || self.humidity.is_some()
    }

    /// Motion flag, falling back to the legacy per-sensor PIR fields.
    pub fn motion(&self) -> Option<bool> {
        if self.motion_detected.is_some() {
            return self.motion_detected;
        }
        let pirs = [self.pir_1, self.pir_2, self.pir_3];
        if pirs.iter().all(Option::is_none) {
            None
        } else {
            Some(pirs.iter().any(|pir| *pir == Some(true)))
        }
    }

    /// Build the normalized reading once the timestamp has been resolved.
    pub fn to_reading(
        &self,
        device_id: &str,
        captured_at: i64,
    ) -> Result<TelemetryReading, TelemetryError> {
        if !self.has_reading() {
            return Err(TelemetryError::MissingReading);
        }
        Ok(TelemetryReading {
            device_id: device_id.to_string(),
            captured_at,
            temperature_c: self.temp_c,
            humidity_pct: self.humidity,
            motion_detected: self.motion(),
            motion_source: self.motion_source.clone(),
            safety_trigger: self.safety_trigger,
            led_state: self.led_state,
        })
    }
}

/// Entry of the fleet feed: one device's latest report time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDeviceRecord {
    pub device_id: String,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<RawTimestampValue>,
}

/// Entry of the alert feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAlertRecord {
    #[serde(
        rename = "type",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<RawTimestampValue>,
}

/// Normalized telemetry reading on the absolute wall-clock timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    pub device_id: String,
    /// Absolute epoch milliseconds
    pub captured_at: i64,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub motion_detected: Option<bool>,
    pub motion_source: Option<String>,
    pub safety_trigger: Option<bool>,
    pub led_state: Option<bool>,
}

/// Write payload for the device control path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_override: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led_command: Option<bool>,
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64().and_then(finite),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().and_then(finite),
        _ => None,
    })
}

fn lenient_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::Number(n)) => n.as_f64().map(|v| v == 1.0),
        _ => None,
    })
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_flag(deserializer)?.unwrap_or(false))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<RawTimestampValue>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Some(match n.as_f64() {
            Some(v) => RawTimestampValue::Number(v),
            None => RawTimestampValue::Text(n.to_string()),
        }),
        Some(Value::String(s)) => Some(RawTimestampValue::Text(s)),
        // Anything else still counts as "present but unparsable".
        Some(other) => Some(RawTimestampValue::Text(other.to_string())),
    })
}
