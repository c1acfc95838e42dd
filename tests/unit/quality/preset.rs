use super::*;

#[test]
fn table_is_indexed_by_key() {
    for key in QualityKey::ALL {
        assert_eq!(key.preset().key, key);
    }
}

#[test]
fn every_preset_uses_an_allowed_palette_size() {
    for key in QualityKey::ALL {
        let colors = resolve_preset(Some(key.as_str()))
            .unwrap()
            .palette
            .max_colors;
        assert!([128, 192, 256].contains(&colors), "{key}: {colors}");
    }
}

#[test]
fn every_preset_yields_even_frame_dims() {
    let clips = [
        CaptureClip {
            x: 0,
            y: 0,
            width: 2,
            height: 2,
        },
        CaptureClip {
            x: 3,
            y: 7,
            width: 318,
            height: 94,
        },
        CaptureClip {
            x: 0,
            y: 0,
            width: 1002,
            height: 566,
        },
    ];
    for key in QualityKey::ALL {
        for clip in clips {
            let (w, h) = key.preset().output_dims(clip);
            assert!(w >= 2 && w % 2 == 0, "{key} {clip:?} -> {w}");
            assert!(h >= 2 && h % 2 == 0, "{key} {clip:?} -> {h}");
        }
    }
}

#[test]
fn mixed_case_name_normalizes() {
    assert_eq!(resolve_preset(Some("LOW")).unwrap().key, QualityKey::Low);
    assert_eq!(resolve_preset(Some(" High ")).unwrap().key, QualityKey::High);
}

#[test]
fn absence_defaults_to_medium() {
    assert_eq!(resolve_preset(None).unwrap().key, QualityKey::Medium);
}

#[test]
fn unknown_name_is_rejected() {
    let err = resolve_preset(Some("ultra")).unwrap_err();
    assert!(matches!(err, CaptureError::InvalidQualityPreset(ref n) if n == "ultra"));
    assert!(resolve_preset(Some("")).is_err());
}

#[test]
fn bayer_scale_is_clamped_to_encoder_range() {
    assert_eq!(
        Dither::Bayer { scale: 9 }.filter_value(),
        "bayer:bayer_scale=5"
    );
}
