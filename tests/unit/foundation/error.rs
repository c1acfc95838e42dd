use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        CaptureError::validation("x")
            .to_string()
            .contains("validation error:")
    );
    assert!(
        CaptureError::protocol("x")
            .to_string()
            .contains("protocol error:")
    );
    assert!(
        CaptureError::encoder_not_ready("x")
            .to_string()
            .contains("encoder not ready:")
    );
    assert!(
        CaptureError::encode_failed("x")
            .to_string()
            .contains("encode failed:")
    );
    assert!(
        CaptureError::InvalidQualityPreset("ultra".into())
            .to_string()
            .contains("'ultra'")
    );
}

#[test]
fn index_error_names_both_bounds() {
    let msg = CaptureError::Index {
        index: 4,
        available: 2,
    }
    .to_string();
    assert!(msg.contains('4'));
    assert!(msg.contains('2'));
}

#[test]
fn only_page_closed_is_swallowable() {
    assert!(CaptureError::page_closed("target closed").is_page_closed());
    assert!(!CaptureError::protocol("boom").is_page_closed());
    assert!(!CaptureError::NoFramesCaptured.is_page_closed());
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = CaptureError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
}
