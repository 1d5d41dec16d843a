// Classifier - rule-engine + model fusion for cabin safety classification
//
// This module implements a strict-priority rule engine over the latest
// reading and fuses it with an optional probabilistic model:
//
// Rules (first match wins):
// 1. safety trigger set                               -> Emergency
// 2. motion AND temperature > warning threshold       -> Emergency
// 3. temperature > danger threshold AND no motion     -> Danger
// 4. humidity > humid threshold AND temp > warning    -> Warning
// 5. temperature > warning threshold                  -> Warning
// 6. otherwise                                        -> Safe
//
// Fusion: the final label is always the rule label. The model contributes
// its argmax label and a confidence percentage for display and audit only.
// A rule-derived Emergency can never be weakened, and a model-derived
// Emergency never escalates a lower rule label.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::SafetyThresholds;
use crate::error::{ErrorCode, ModelError};
use crate::ports::{AuditSink, ClassifierModel};
use crate::reading::TelemetryReading;

/// Safety classes in ascending severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SafetyLabel {
    Safe,
    Warning,
    Danger,
    Emergency,
}

impl SafetyLabel {
    /// All labels in model output order
    pub const ALL: [SafetyLabel; 4] = [
        SafetyLabel::Safe,
        SafetyLabel::Warning,
        SafetyLabel::Danger,
        SafetyLabel::Emergency,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Fields of a reading the rule engine looks at
///
/// Missing booleans are treated as `false`; missing numbers make every
/// comparison on them false.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClassificationInput {
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub motion_detected: bool,
    pub safety_trigger: bool,
}

impl From<&TelemetryReading> for ClassificationInput {
    fn from(reading: &TelemetryReading) -> Self {
        Self {
            temperature_c: reading.temperature_c,
            humidity_pct: reading.humidity_pct,
            motion_detected: reading.motion_detected.unwrap_or(false),
            safety_trigger: reading.safety_trigger.unwrap_or(false),
        }
    }
}

/// Validated model probability vector over [`SafetyLabel::ALL`]
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    probabilities: [f64; 4],
}

impl ModelOutput {
    /// Validate a raw model vector.
    ///
    /// # Errors
    /// `InvalidOutput` unless the vector has exactly four finite,
    /// non-negative entries.
    pub fn new(raw: &[f64]) -> Result<Self, ModelError> {
        let probabilities: [f64; 4] = raw.try_into().map_err(|_| ModelError::InvalidOutput {
            reason: format!("expected 4 probabilities, got {}", raw.len()),
        })?;
        if let Some(bad) = probabilities.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(ModelError::InvalidOutput {
                reason: format!("probability {} out of range", bad),
            });
        }
        Ok(Self { probabilities })
    }

    /// Most probable label; ties resolve to the lower severity.
    pub fn argmax(&self) -> (SafetyLabel, f64) {
        let mut best = 0;
        for (index, p) in self.probabilities.iter().enumerate().skip(1) {
            if *p > self.probabilities[best] {
                best = index;
            }
        }
        (SafetyLabel::ALL[best], self.probabilities[best])
    }

    /// `round(100 * max)`, clamped to 0..=100
    pub fn confidence_pct(&self) -> u8 {
        let (_, max) = self.argmax();
        (100.0 * max).round().clamp(0.0, 100.0) as u8
    }
}

/// Classification of one reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub device_id: String,
    /// Capture time of the evaluated reading, epoch milliseconds
    pub captured_at: i64,
    /// Final label (always equal to `rule_label`)
    pub label: SafetyLabel,
    /// Model confidence in percent; `None` when no model output was used
    pub confidence_pct: Option<u8>,
    pub rule_label: SafetyLabel,
    pub model_label: Option<SafetyLabel>,
}

/// Fused rule/model safety classifier
pub struct SafetyClassifier {
    thresholds: SafetyThresholds,
    model: Option<Arc<dyn ClassifierModel>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl SafetyClassifier {
    /// Create a rule-only classifier
    pub fn new(thresholds: SafetyThresholds) -> Self {
        Self {
            thresholds,
            model: None,
            audit: None,
        }
    }

    /// Attach a probabilistic model
    pub fn with_model(mut self, model: Arc<dyn ClassifierModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Attach an audit sink that receives every result
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Apply the rule engine in strict priority order
    pub fn evaluate_rules(&self, input: &ClassificationInput) -> SafetyLabel {
        let t = &self.thresholds;
        let temp_above = |limit: f64| input.temperature_c.is_some_and(|temp| temp > limit);
        let humid = input.humidity_pct.is_some_and(|h| h > t.humid_pct);

        if input.safety_trigger {
            SafetyLabel::Emergency
        } else if input.motion_detected && temp_above(t.warning_temp_c) {
            SafetyLabel::Emergency
        } else if temp_above(t.danger_temp_c) && !input.motion_detected {
            SafetyLabel::Danger
        } else if humid && temp_above(t.warning_temp_c) {
            SafetyLabel::Warning
        } else if temp_above(t.warning_temp_c) {
            SafetyLabel::Warning
        } else {
            SafetyLabel::Safe
        }
    }

    /// Combine a rule label with optional model output.
    ///
    /// The rule label is final; the model only supplies `model_label` and
    /// `confidence_pct`.
    pub fn fuse(
        rule_label: SafetyLabel,
        model: Option<&ModelOutput>,
    ) -> (SafetyLabel, Option<u8>, Option<SafetyLabel>) {
        match model {
            Some(output) => {
                let (model_label, _) = output.argmax();
                if model_label != rule_label {
                    log::debug!(
                        "[Classifier] Model disagrees with rules: rule={:?} model={:?}",
                        rule_label,
                        model_label
                    );
                }
                (rule_label, Some(output.confidence_pct()), Some(model_label))
            }
            None => (rule_label, None, None),
        }
    }

    /// Classify a reading synchronously from an already obtained model output
    pub fn classify_with(
        &self,
        reading: &TelemetryReading,
        model: Option<&ModelOutput>,
    ) -> ClassificationResult {
        let rule_label = self.evaluate_rules(&ClassificationInput::from(reading));
        let (label, confidence_pct, model_label) = Self::fuse(rule_label, model);
        ClassificationResult {
            device_id: reading.device_id.clone(),
            captured_at: reading.captured_at,
            label,
            confidence_pct,
            rule_label,
            model_label,
        }
    }

    /// Classify a reading, consulting the model when one is attached.
    ///
    /// Model absence or failure degrades to rule-only output. The result is
    /// handed to the audit sink without waiting for it.
    pub async fn classify(&self, reading: &TelemetryReading) -> ClassificationResult {
        let model_output = match self.predict(reading).await {
            Ok(output) => Some(output),
            Err(ModelError::Unavailable) => None,
            Err(err) => {
                log::warn!(
                    "[Classifier] Falling back to rules: code={}, message={}",
                    err.code(),
                    err.message()
                );
                None
            }
        };

        let result = self.classify_with(reading, model_output.as_ref());
        self.emit_audit(&result);
        result
    }

    async fn predict(&self, reading: &TelemetryReading) -> Result<ModelOutput, ModelError> {
        let model = self.model.as_ref().ok_or(ModelError::Unavailable)?;
        let (Some(temp), Some(humidity)) = (reading.temperature_c, reading.humidity_pct) else {
            // Both features are required by the model
            return Err(ModelError::Unavailable);
        };
        let raw = model.predict([temp, humidity]).await?;
        ModelOutput::new(&raw)
    }

    fn emit_audit(&self, result: &ClassificationResult) {
        let Some(audit) = self.audit.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::debug!("[Classifier] No runtime available, skipping audit record");
            return;
        };
        let result = result.clone();
        runtime.spawn(async move {
            if let Err(err) = audit.record(&result).await {
                log::warn!("[Classifier] Audit record failed (ignored): {:#}", err);
            }
        });
    }
}

#[cfg(test)]
#[path = "classifier_tests.rs"]
mod tests;
