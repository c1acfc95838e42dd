use super::*;
use crate::encode::sink::InMemoryEncoder;
use crate::quality::preset::QualityKey;
use crate::storage::store::{LocalDirStore, MemoryStore};

fn palette() -> PaletteParams {
    QualityKey::Low.preset().palette
}

fn frame(seq: u64, width: u32, height: u32) -> FrameBuffer {
    FrameBuffer {
        seq,
        width,
        height,
        data: vec![1, 2, 3],
    }
}

fn fps() -> Fps {
    Fps::new(20, 1).unwrap()
}

#[tokio::test]
async fn write_before_ensure_encoder_is_rejected() {
    let store = Arc::new(MemoryStore::default());
    let mut session = EncodeSession::new(Box::new(InMemoryEncoder::new()), store, palette());
    let err = session.write(&frame(0, 2, 2)).await.unwrap_err();
    assert!(matches!(err, CaptureError::EncoderNotReady(_)));
    assert_eq!(session.state(), EncodeState::Created);
}

#[tokio::test]
async fn ensure_encoder_is_idempotent_and_evens_dimensions() {
    let store = Arc::new(MemoryStore::default());
    let mut session = EncodeSession::new(Box::new(InMemoryEncoder::new()), store, palette());

    let first = session.ensure_encoder(101, 57, fps()).await.unwrap();
    assert_eq!((first.width, first.height), (102, 58));
    let second = session.ensure_encoder(10, 10, fps()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(session.state(), EncodeState::Ready);
}

#[tokio::test]
async fn close_uploads_then_builds_url_from_key() {
    let store = Arc::new(MemoryStore::new("https://cdn.test/{key}"));
    let mut session = EncodeSession::new(
        Box::new(InMemoryEncoder::new()),
        store.clone(),
        palette(),
    );
    session.ensure_encoder(4, 4, fps()).await.unwrap();
    for seq in 0..3 {
        session.write(&frame(seq, 4, 4)).await.unwrap();
    }
    assert_eq!(session.state(), EncodeState::FramesAccepted);

    let done = session.close().await.unwrap();
    assert_eq!(done.frame_count, 3);
    assert_eq!(done.url, format!("https://cdn.test/{}", done.key));
    assert!(done.key.to_string().ends_with(".gif"));

    let stored = store.get(&done.key).unwrap();
    assert_eq!(stored.content_type, GIF_CONTENT_TYPE);
    assert_eq!(stored.bytes.len() as u64, done.bytes);

    let err = session.write(&frame(3, 4, 4)).await.unwrap_err();
    assert!(matches!(err, CaptureError::EncoderNotReady(_)));
    assert!(session.close().await.is_err());
}

#[tokio::test]
async fn failed_encode_publishes_nothing() {
    let store = Arc::new(MemoryStore::default());
    let mut session = EncodeSession::new(
        Box::new(InMemoryEncoder::new().failing_on_finish()),
        store.clone(),
        palette(),
    );
    session.ensure_encoder(4, 4, fps()).await.unwrap();
    session.write(&frame(0, 4, 4)).await.unwrap();

    let err = session.close().await.unwrap_err();
    assert!(matches!(err, CaptureError::EncodeFailed(_)));
    assert!(store.is_empty());
}

#[tokio::test]
async fn abort_discards_the_upload() {
    let store = Arc::new(MemoryStore::default());
    let mut session = EncodeSession::new(
        Box::new(InMemoryEncoder::new()),
        store.clone(),
        palette(),
    );
    session.ensure_encoder(4, 4, fps()).await.unwrap();
    session.write(&frame(0, 4, 4)).await.unwrap();
    session.abort().await;

    assert_eq!(session.state(), EncodeState::Closed);
    assert!(store.is_empty());
    assert!(session.write(&frame(1, 4, 4)).await.is_err());
}

#[tokio::test]
async fn failed_encode_never_exposes_the_object_path() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalDirStore::new(dir.path(), "https://m.test/{key}"));
    let mut session = EncodeSession::new(
        Box::new(InMemoryEncoder::new().failing_on_finish()),
        store.clone(),
        palette(),
    );
    let path = store.object_path(session.key());

    session.ensure_encoder(4, 4, fps()).await.unwrap();
    for seq in 0..3 {
        session.write(&frame(seq, 4, 4)).await.unwrap();
        tokio::task::yield_now().await;
        assert!(!path.exists());
    }

    let err = session.close().await.unwrap_err();
    assert!(matches!(err, CaptureError::EncodeFailed(_)));
    assert!(!path.exists());
    assert_eq!(std::fs::read_dir(store.root()).unwrap().count(), 0);
}
