//! NWS heat index and a deterministic classifier model built on it.

use async_trait::async_trait;

use crate::analysis::classifier::SafetyLabel;
use crate::error::ModelError;
use crate::ports::ClassifierModel;

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Heat index in °F from air temperature (°F) and relative humidity (%).
///
/// Uses the simple Steadman estimate below 80 °F and the plain Rothfusz
/// regression otherwise. The NWS low/high humidity adjustments are not
/// applied, so labels match the categories the classifier model is trained on.
pub fn heat_index_f(temp_f: f64, humidity_pct: f64) -> f64 {
    let t = temp_f;
    let r = humidity_pct;

    let simple = 0.5 * (t + 61.0 + (t - 68.0) * 1.2 + r * 0.094);
    if simple < 80.0 {
        return simple;
    }

    -42.379 + 2.049_015_23 * t + 10.143_331_27 * r
        - 0.224_755_41 * t * r
        - 0.006_837_83 * t * t
        - 0.054_817_17 * r * r
        + 0.001_228_74 * t * t * r
        + 0.000_852_82 * t * r * r
        - 0.000_001_99 * t * t * r * r
}

/// NWS heat-risk category for a heat index in °F
pub fn heat_risk(heat_index: f64) -> SafetyLabel {
    if heat_index >= 125.0 {
        SafetyLabel::Emergency
    } else if heat_index >= 103.0 {
        SafetyLabel::Danger
    } else if heat_index >= 90.0 {
        SafetyLabel::Warning
    } else {
        SafetyLabel::Safe
    }
}

/// Classifier model that puts all probability mass on the heat-risk category.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeatIndexModel;

#[async_trait]
impl ClassifierModel for HeatIndexModel {
    async fn predict(&self, features: [f64; 2]) -> Result<Vec<f64>, ModelError> {
        let [temp_c, humidity] = features;
        if !temp_c.is_finite() || !humidity.is_finite() {
            return Err(ModelError::InvalidOutput {
                reason: "non-finite features".to_string(),
            });
        }
        let index = heat_index_f(celsius_to_fahrenheit(temp_c), humidity);
        let mut probabilities = vec![0.0; SafetyLabel::ALL.len()];
        probabilities[heat_risk(index).index()] = 1.0;
        Ok(probabilities)
    }
}
