use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

/// Helper to build a reading for rule tests
fn reading(
    temperature_c: Option<f64>,
    humidity_pct: Option<f64>,
    motion: Option<bool>,
    trigger: Option<bool>,
) -> TelemetryReading {
    TelemetryReading {
        device_id: "car_001".to_string(),
        captured_at: 1_700_000_000_000,
        temperature_c,
        humidity_pct,
        motion_detected: motion,
        motion_source: None,
        safety_trigger: trigger,
        led_state: None,
    }
}

fn create_classifier() -> SafetyClassifier {
    SafetyClassifier::new(SafetyThresholds::default())
}

struct FixedModel(Vec<f64>);

#[async_trait]
impl ClassifierModel for FixedModel {
    async fn predict(&self, _features: [f64; 2]) -> Result<Vec<f64>, ModelError> {
        Ok(self.0.clone())
    }
}

struct FailingModel;

#[async_trait]
impl ClassifierModel for FailingModel {
    async fn predict(&self, _features: [f64; 2]) -> Result<Vec<f64>, ModelError> {
        Err(ModelError::InvalidOutput {
            reason: "tensor shape mismatch".to_string(),
        })
    }
}

struct CountingModel(AtomicUsize);

#[async_trait]
impl ClassifierModel for CountingModel {
    async fn predict(&self, _features: [f64; 2]) -> Result<Vec<f64>, ModelError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(vec![1.0, 0.0, 0.0, 0.0])
    }
}

struct RejectingAudit;

#[async_trait]
impl AuditSink for RejectingAudit {
    async fn record(&self, _result: &ClassificationResult) -> anyhow::Result<()> {
        anyhow::bail!("audit store offline")
    }
}

#[test]
fn test_safety_trigger_dominates_low_temperature() {
    let classifier = create_classifier();
    let r = reading(Some(10.0), None, Some(false), Some(true));
    assert_eq!(
        classifier.evaluate_rules(&ClassificationInput::from(&r)),
        SafetyLabel::Emergency
    );
}

#[test]
fn test_occupied_hot_cabin_is_emergency() {
    let classifier = create_classifier();
    let r = reading(Some(28.0), Some(40.0), Some(true), Some(false));
    assert_eq!(
        classifier.evaluate_rules(&ClassificationInput::from(&r)),
        SafetyLabel::Emergency
    );
}

#[test]
fn test_empty_very_hot_cabin_is_danger() {
    let classifier = create_classifier();
    let r = reading(Some(36.0), Some(50.0), Some(false), Some(false));
    assert_eq!(
        classifier.evaluate_rules(&ClassificationInput::from(&r)),
        SafetyLabel::Danger
    );
}

#[test]
fn test_warm_cabin_is_warning() {
    let classifier = create_classifier();
    let r = reading(Some(28.0), Some(50.0), Some(false), None);
    assert_eq!(
        classifier.evaluate_rules(&ClassificationInput::from(&r)),
        SafetyLabel::Warning
    );

    let humid = reading(Some(28.0), Some(90.0), Some(false), None);
    assert_eq!(
        classifier.evaluate_rules(&ClassificationInput::from(&humid)),
        SafetyLabel::Warning
    );
}

#[test]
fn test_cool_cabin_is_safe() {
    let classifier = create_classifier();
    let r = reading(Some(20.0), Some(50.0), Some(false), None);
    assert_eq!(
        classifier.evaluate_rules(&ClassificationInput::from(&r)),
        SafetyLabel::Safe
    );
}

#[test]
fn test_threshold_boundaries_are_strict() {
    let classifier = create_classifier();

    // Exactly at the warning threshold is not above it
    let at_warning = reading(Some(27.0), Some(50.0), Some(true), None);
    assert_eq!(
        classifier.evaluate_rules(&ClassificationInput::from(&at_warning)),
        SafetyLabel::Safe
    );

    // Exactly at the danger threshold stays Warning
    let at_danger = reading(Some(35.0), Some(50.0), Some(false), None);
    assert_eq!(
        classifier.evaluate_rules(&ClassificationInput::from(&at_danger)),
        SafetyLabel::Warning
    );
}

#[test]
fn test_missing_temperature_never_exceeds() {
    let classifier = create_classifier();
    let r = reading(None, Some(99.0), Some(true), None);
    assert_eq!(
        classifier.evaluate_rules(&ClassificationInput::from(&r)),
        SafetyLabel::Safe
    );
}

#[test]
fn test_custom_thresholds() {
    let classifier = SafetyClassifier::new(SafetyThresholds {
        warning_temp_c: 20.0,
        danger_temp_c: 25.0,
        humid_pct: 60.0,
    });
    let r = reading(Some(26.0), Some(50.0), Some(false), None);
    assert_eq!(
        classifier.evaluate_rules(&ClassificationInput::from(&r)),
        SafetyLabel::Danger
    );
}

#[test]
fn test_model_output_validation() {
    assert!(ModelOutput::new(&[0.1, 0.2, 0.3]).is_err());
    assert!(ModelOutput::new(&[0.1, 0.2, 0.3, f64::NAN]).is_err());
    assert!(ModelOutput::new(&[0.1, -0.2, 0.3, 0.8]).is_err());
    assert!(ModelOutput::new(&[0.1, 0.2, 0.3, 0.4]).is_ok());
}

#[test]
fn test_argmax_and_confidence() {
    let output = ModelOutput::new(&[0.05, 0.15, 0.726, 0.074]).unwrap();
    assert_eq!(output.argmax().0, SafetyLabel::Danger);
    assert_eq!(output.confidence_pct(), 73);

    // Ties resolve to the lower severity
    let tied = ModelOutput::new(&[0.0, 0.5, 0.0, 0.5]).unwrap();
    assert_eq!(tied.argmax().0, SafetyLabel::Warning);
}

#[test]
fn test_rule_emergency_wins_over_model() {
    let output = ModelOutput::new(&[0.9, 0.1, 0.0, 0.0]).unwrap();
    let (label, confidence, model_label) = SafetyClassifier::fuse(SafetyLabel::Emergency, Some(&output));
    assert_eq!(label, SafetyLabel::Emergency);
    assert_eq!(confidence, Some(90));
    assert_eq!(model_label, Some(SafetyLabel::Safe));
}

#[test]
fn test_model_emergency_never_escalates() {
    let output = ModelOutput::new(&[0.0, 0.0, 0.02, 0.98]).unwrap();
    let (label, confidence, model_label) = SafetyClassifier::fuse(SafetyLabel::Safe, Some(&output));
    assert_eq!(label, SafetyLabel::Safe);
    assert_eq!(confidence, Some(98));
    assert_eq!(model_label, Some(SafetyLabel::Emergency));
}

#[test]
fn test_no_model_omits_confidence() {
    let (label, confidence, model_label) = SafetyClassifier::fuse(SafetyLabel::Warning, None);
    assert_eq!(label, SafetyLabel::Warning);
    assert_eq!(confidence, None);
    assert_eq!(model_label, None);
}

#[tokio::test]
async fn test_classify_rule_only_without_model() {
    let classifier = create_classifier();
    let result = classifier
        .classify(&reading(Some(36.0), Some(50.0), Some(false), Some(false)))
        .await;
    assert_eq!(result.label, SafetyLabel::Danger);
    assert_eq!(result.rule_label, SafetyLabel::Danger);
    assert_eq!(result.confidence_pct, None);
    assert_eq!(result.model_label, None);
    assert_eq!(result.device_id, "car_001");
}

#[tokio::test]
async fn test_classify_reports_model_confidence() {
    let classifier =
        create_classifier().with_model(Arc::new(FixedModel(vec![0.1, 0.6, 0.2, 0.1])));
    let result = classifier
        .classify(&reading(Some(28.0), Some(50.0), Some(false), None))
        .await;
    assert_eq!(result.label, SafetyLabel::Warning);
    assert_eq!(result.model_label, Some(SafetyLabel::Warning));
    assert_eq!(result.confidence_pct, Some(60));
}

#[tokio::test]
async fn test_model_failure_degrades_to_rules() {
    let classifier = create_classifier().with_model(Arc::new(FailingModel));
    let result = classifier
        .classify(&reading(Some(20.0), Some(50.0), Some(false), None))
        .await;
    assert_eq!(result.label, SafetyLabel::Safe);
    assert_eq!(result.confidence_pct, None);
}

#[tokio::test]
async fn test_malformed_model_vector_degrades_to_rules() {
    let classifier = create_classifier().with_model(Arc::new(FixedModel(vec![1.0, 0.0])));
    let result = classifier
        .classify(&reading(Some(20.0), Some(50.0), Some(false), None))
        .await;
    assert_eq!(result.model_label, None);
    assert_eq!(result.confidence_pct, None);
}

#[tokio::test]
async fn test_model_skipped_without_both_features() {
    let model = Arc::new(CountingModel(AtomicUsize::new(0)));
    let classifier = create_classifier().with_model(model.clone());
    let result = classifier
        .classify(&reading(Some(30.0), None, Some(false), None))
        .await;
    assert_eq!(result.label, SafetyLabel::Warning);
    assert_eq!(result.confidence_pct, None);
    assert_eq!(model.0.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_audit_failure_does_not_block() {
    let classifier = create_classifier().with_audit(Arc::new(RejectingAudit));
    let result = classifier
        .classify(&reading(Some(10.0), Some(50.0), Some(false), Some(true)))
        .await;
    assert_eq!(result.label, SafetyLabel::Emergency);
}

#[test]
fn test_classify_without_runtime_skips_audit() {
    let classifier = create_classifier().with_audit(Arc::new(RejectingAudit));
    let result = classifier.classify_with(&reading(Some(20.0), None, None, None), None);
    classifier.emit_audit(&result);
    assert_eq!(result.label, SafetyLabel::Safe);
}
