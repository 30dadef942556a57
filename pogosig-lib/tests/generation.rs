//! Telemetry generator lifecycle in timer and guess mode

mod common;

use common::*;
use pogosig_lib::generation::{EnvelopeLocation, GenerationMode, TrackedPosition};
use pogosig_lib::{Generator, GeneratorOptions};
use std::time::Duration;

fn timer_options(period_ms: u64) -> GeneratorOptions {
    GeneratorOptions {
        mode: GenerationMode::Timer {
            period: Duration::from_millis(period_ms),
        },
        seed: Some(7),
        ..Default::default()
    }
}

fn guess_options() -> GeneratorOptions {
    GeneratorOptions {
        mode: GenerationMode::Guess,
        seed: Some(7),
        ..Default::default()
    }
}

#[test]
fn test_timer_mode_needs_runtime() {
    let result = Generator::register(TrackedPosition::new(48.0, 2.0), timer_options(900));
    assert!(matches!(result, Err(SigError::Configuration(_))));
}

#[test]
fn test_device_identity() {
    let generator = Generator::register(TrackedPosition::new(48.0, 2.0), guess_options()).unwrap();
    let id = generator.device_id();
    assert_eq!(id.len(), 32);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));

    let info = generator.device_info();
    assert_eq!(info.device_brand, "Apple");
    assert_eq!(info.device_model_boot, "iPhone8,1");
    assert_eq!(info.hardware_model, "N71AP");
    assert_eq!(info.firmware_type, "10.3.3");

    let named = Generator::register(
        TrackedPosition::new(48.0, 2.0),
        GeneratorOptions {
            device_id: Some("my-device".to_string()),
            ..guess_options()
        },
    )
    .unwrap();
    assert_eq!(named.device_id(), "my-device");
}

#[tokio::test]
async fn test_timer_accumulates_and_bundle_drains() {
    let generator = Generator::register(TrackedPosition::new(48.8566, 2.3522), timer_options(20)).unwrap();
    assert!(generator.is_running());
    assert_eq!(generator.pending_fix_count(), 1, "first fix is taken at registration");

    let mut envelope = EnvelopeLocation::default();
    let bundle = generator.generate(&mut envelope);
    assert!(!bundle.location_fix.is_empty());
    assert_eq!(bundle.sensor_info.len(), 1);
    assert!(bundle.activity_status.stationary);
    assert!((1000..60000).contains(&bundle.unknown27));
    assert_eq!(generator.pending_fix_count(), 0);

    generator.set_position(TrackedPosition::new(48.8570, 2.3530));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(generator.pending_fix_count() >= 1, "movement produces a fix on the next tick");

    let bundle = generator.generate(&mut envelope);
    let last = bundle.location_fix.last().unwrap();
    assert_eq!(envelope.accuracy, generator.last_fix().unwrap().horizontal_accuracy);
    assert!(envelope.ms_since_last_location_fix >= 0);
    assert!(last.timestamp_snapshot > 0);
}

#[tokio::test]
async fn test_clean_stops_timer_and_forgets_fixes() {
    let mut generator = Generator::register(TrackedPosition::new(10.0, 20.0), timer_options(10)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    generator.clean();
    assert!(!generator.is_running());
    assert!(generator.last_fix().is_none());
    assert_eq!(generator.pending_fix_count(), 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(generator.pending_fix_count(), 0, "no ticks after clean");

    // Bundles are still produced on demand
    let mut envelope = EnvelopeLocation::default();
    let bundle = generator.generate(&mut envelope);
    assert_eq!(bundle.location_fix.len(), 1);
    assert_eq!(envelope.accuracy, bundle.location_fix[0].horizontal_accuracy);
}

#[test]
fn test_guess_mode_interpolates_to_current_position() {
    let generator = Generator::register(TrackedPosition::new(0.0, 0.0), guess_options()).unwrap();
    assert!(!generator.is_running());

    generator.set_position(TrackedPosition::new(0.004, 0.004));
    let mut envelope = EnvelopeLocation::default();
    let now = chrono::Utc::now().timestamp_millis() + 3_000;
    let bundle = generator.generate_at(now, &mut envelope);

    let fixes = bundle.location_fix.len() as i64;
    assert!((4..=6).contains(&fixes), "got {} fixes", fixes);
    let elapsed = envelope.ms_since_last_location_fix;
    assert_eq!(fixes, ((elapsed as f64) / 1000.0).round() as i64);
    for pair in bundle.location_fix.windows(2) {
        assert!(pair[1].timestamp_snapshot > pair[0].timestamp_snapshot);
    }
    assert_eq!(generator.pending_fix_count(), 0);

    // Standing still: a single fix covering the second since the last bundle
    let bundle = generator.generate_at(now + 1_000, &mut envelope);
    assert_eq!(bundle.location_fix.len(), 1);
    assert_eq!(envelope.ms_since_last_location_fix, 1_000);
}

#[test]
fn test_bundle_feeds_signature_fields() {
    let generator = Generator::register(TrackedPosition::new(1.0, 2.0), guess_options()).unwrap();
    let mut envelope = EnvelopeLocation::default();
    let bundle = generator.generate(&mut envelope);
    let device_id = generator.device_id().to_string();
    let unknown27 = bundle.unknown27;

    let fields = bundle.into_fields();
    assert!(fields.location_fix.as_ref().is_some_and(|f| !f.is_empty()));
    assert_eq!(fields.sensor_info.as_ref().map(Vec::len), Some(1));
    assert_eq!(fields.device_info.as_ref().map(|d| d.device_id.as_str()), Some(device_id.as_str()));
    assert_eq!(fields.unknown27, Some(unknown27));
    assert!(fields.timestamp.is_none());
}
