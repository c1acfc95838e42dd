use super::*;
use crate::storage::store::StorageKey;

fn encoded(frames: u64, fps: Fps) -> EncodedAnimation {
    EncodedAnimation {
        key: StorageKey::from_parts("a1b2c3d4e5f6", 1_700_000_000_000, "gif").unwrap(),
        url: "https://media.example.com/a1b2c3d4e5f6-1700000000000.gif".to_string(),
        width: 320,
        height: 180,
        fps,
        frame_count: frames,
        bytes: 1024,
    }
}

#[test]
fn deterministic_metadata_is_flat_and_tagged() {
    let meta = CaptureMetadata::new(
        &encoded(30, Fps::new(30, 1).unwrap()),
        QualityKey::Low,
        CaptureMode::Deterministic {
            fps: 30.0,
            animation_length_ms: 1000.0,
            animation_index: 0,
        },
    );
    assert_eq!(meta.id, "a1b2c3d4e5f6-1700000000000");
    assert_eq!(meta.duration_seconds, 1.0);

    let json = serde_json::to_value(&meta).unwrap();
    assert_eq!(json["mode"], "deterministic");
    assert_eq!(json["quality"], "low");
    assert_eq!(json["fps"], 30.0);
    assert_eq!(json["animation_length_ms"], 1000.0);
    assert_eq!(json["frame_count"], 30);
}

#[test]
fn event_driven_duration_uses_realized_frame_delay() {
    let fps = Fps::from_frame_duration_secs(0.123).unwrap();
    let meta = CaptureMetadata::new(
        &encoded(4, fps),
        QualityKey::Medium,
        CaptureMode::EventDriven {
            frame_duration_seconds: fps.frame_duration_secs(),
            time_compression_factor: 0.5,
        },
    );
    assert!((meta.duration_seconds - 0.48).abs() < 1e-9);

    let json = serde_json::to_value(&meta).unwrap();
    assert_eq!(json["mode"], "event_driven");
    assert_eq!(json["frame_duration_seconds"], 0.12);
    let back: CaptureMetadata = serde_json::from_value(json).unwrap();
    assert_eq!(back, meta);
}

#[test]
fn requests_default_optional_fields() {
    let req: DeterministicRequest = serde_json::from_str(
        r##"{
            "target": {
                "selector": "#app",
                "source": {"url": "https://example.com"},
                "viewport": {"width": 800, "height": 600}
            },
            "fps": 24
        }"##,
    )
    .unwrap();
    assert_eq!(req.animation_index, 0);
    assert_eq!(req.quality, None);
    assert_eq!(
        req.target.source,
        crate::foundation::core::PageSource::Url("https://example.com".to_string())
    );
}
