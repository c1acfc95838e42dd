use super::*;
use crate::quality::preset::QualityKey;
use tokio::io::AsyncReadExt as _;

fn cfg(width: u32, height: u32) -> EncodeConfig {
    EncodeConfig {
        width,
        height,
        fps: Fps::new(10, 1).unwrap(),
        palette: QualityKey::Medium.preset().palette,
    }
}

fn frame(seq: u64) -> FrameBuffer {
    FrameBuffer {
        seq,
        width: 4,
        height: 2,
        data: vec![seq as u8; 3],
    }
}

#[test]
fn config_validation_catches_bad_values() {
    assert!(cfg(4, 2).validate().is_ok());
    assert!(cfg(0, 2).validate().is_err());
    assert!(cfg(5, 2).validate().is_err());
    assert!(cfg(4, 3).validate().is_err());

    let mut c = cfg(4, 2);
    c.palette.max_colors = 300;
    assert!(c.validate().is_err());
}

#[tokio::test]
async fn in_memory_encoder_records_frames_and_streams_output() {
    let mut enc = InMemoryEncoder::new();
    let mut out = enc.start(&cfg(4, 2)).await.unwrap();
    enc.write_frame(&frame(0)).await.unwrap();
    enc.write_frame(&frame(1)).await.unwrap();
    enc.finish().await.unwrap();

    let mut bytes = Vec::new();
    out.read_to_end(&mut bytes).await.unwrap();
    assert!(bytes.starts_with(b"GIF89a"));
    assert_eq!(bytes.last(), Some(&b';'));
    assert_eq!(bytes.len(), 6 + 2 * 8 + 1);

    let rec = enc.recording();
    assert!(rec.finished);
    assert_eq!(rec.config, Some(cfg(4, 2)));
    assert_eq!(
        rec.frames.iter().map(|f| f.seq).collect::<Vec<_>>(),
        vec![0, 1]
    );
}

#[tokio::test]
async fn in_memory_encoder_can_fail_like_a_crashed_process() {
    let mut enc = InMemoryEncoder::new().failing_on_finish();
    let _out = enc.start(&cfg(4, 2)).await.unwrap();
    let err = enc.finish().await.unwrap_err();
    assert!(matches!(err, CaptureError::EncodeFailed(_)));
}

#[tokio::test]
async fn factory_keeps_one_recording_per_encoder() {
    let factory = InMemoryEncoderFactory::new();
    let mut a = factory.create();
    let _b = factory.create();
    let _out = a.start(&cfg(4, 2)).await.unwrap();
    a.write_frame(&frame(0)).await.unwrap();

    let runs = factory.runs();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].frames.len(), 1);
    assert!(runs[1].config.is_none());
}
