use super::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::animation::discovery::AnimationGroup;
use crate::browser::driver::{AnimationRecord, NodeHandle};
use crate::browser::scripted::ScriptedPage;
use crate::capture::frames::FRAME_QUEUE_DEPTH;
use crate::encode::sink::{EncoderFactory as _, InMemoryEncoderFactory};
use crate::foundation::core::{PageSource, Viewport};
use crate::quality::preset::QualityKey;
use crate::storage::store::MemoryStore;

fn target() -> CaptureTarget {
    CaptureTarget::new(
        PageSource::Html("<div id=app></div>".to_string()),
        Viewport::new(40, 20).unwrap(),
    )
    .with_selector("#app")
}

fn discovery(lengths: &[f64]) -> Discovery {
    let groups = lengths
        .iter()
        .enumerate()
        .map(|(i, &duration)| AnimationGroup {
            start_time: i as f64 * 10.0,
            animations: vec![AnimationRecord {
                id: format!("anim-{i}"),
                start_time: i as f64 * 10.0,
                delay: 0.0,
                duration,
                backend_node_id: Some(1),
            }],
        })
        .collect();
    Discovery {
        groups,
        container: NodeHandle("#app".to_string()),
        hit_ceiling: false,
        dropped: 0,
    }
}

fn plan(fps: u32, animation_index: usize) -> DeterministicPlan {
    DeterministicPlan {
        fps: Fps::new(fps, 1).unwrap(),
        animation_index,
    }
}

fn page() -> ScriptedPage {
    ScriptedPage::new(Viewport::new(40, 20).unwrap())
        .with_element("#app", Rect::new(0.0, 0.0, 30.0, 16.0))
}

fn session(factory: &InMemoryEncoderFactory, store: &Arc<MemoryStore>) -> EncodeSession {
    EncodeSession::new(
        factory.create(),
        store.clone(),
        QualityKey::High.preset().palette,
    )
}

#[test]
fn sample_grid_includes_both_ends() {
    assert_eq!(sample_times(1000.0, 100.0).len(), 11);
    assert_eq!(sample_times(1000.0, 300.0), vec![0.0, 300.0, 600.0, 900.0]);
    assert_eq!(sample_times(1000.0, 1000.0 / 3.0).len(), 4);
    assert!(sample_times(1000.0, 0.0).is_empty());
}

#[tokio::test]
async fn looping_capture_drops_the_seam_frame() {
    let page = page();
    let factory = InMemoryEncoderFactory::new();
    let store = Arc::new(MemoryStore::default());

    let out = capture_deterministic(
        &page,
        &target(),
        &discovery(&[1000.0]),
        QualityKey::High.preset(),
        &plan(10, 0),
        session(&factory, &store),
    )
    .await
    .unwrap();

    assert_eq!(out.sampled, 11);
    assert!(out.report.dropped_seam);
    assert_eq!(out.encoded.frame_count, 10);
    assert_eq!((out.clip.width, out.clip.height), (30, 16));
    assert_eq!(out.animation_length_ms, 1000.0);

    let seqs: Vec<u64> = factory.runs()[0].frames.iter().map(|f| f.seq).collect();
    assert_eq!(seqs, (0..10).collect::<Vec<u64>>());
    assert!(store.get(&out.encoded.key).is_some());

    let log = page.log();
    // Bounds pass clamps to the length; capture pass wraps the final sample to 0.
    assert_eq!(log.seeks[10], 1000.0);
    assert_eq!(log.seeks.last(), Some(&0.0));
    assert_eq!(log.released, vec!["anim-0"]);
}

#[tokio::test]
async fn out_of_range_index_fails_before_any_work() {
    let page = page();
    let factory = InMemoryEncoderFactory::new();
    let store = Arc::new(MemoryStore::default());

    let err = capture_deterministic(
        &page,
        &target(),
        &discovery(&[1000.0]),
        QualityKey::High.preset(),
        &plan(10, 3),
        session(&factory, &store),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        CaptureError::Index {
            index: 3,
            available: 1
        }
    ));
    let log = page.log();
    assert!(log.seeks.is_empty());
    assert_eq!(log.screenshots, 0);
    assert!(factory.runs()[0].config.is_none());
}

#[tokio::test]
async fn clip_covers_the_element_over_the_whole_timeline() {
    let page = ScriptedPage::new(Viewport::new(40, 20).unwrap()).with_moving_element("#app", |t| {
        let x = t / 100.0;
        Some(Rect::new(x, 0.0, x + 10.0, 10.0))
    });
    let factory = InMemoryEncoderFactory::new();
    let store = Arc::new(MemoryStore::default());

    let out = capture_deterministic(
        &page,
        &target(),
        &discovery(&[1000.0]),
        QualityKey::High.preset(),
        &plan(10, 0),
        session(&factory, &store),
    )
    .await
    .unwrap();

    assert_eq!(
        out.clip,
        CaptureClip {
            x: 0,
            y: 0,
            width: 20,
            height: 10
        }
    );
}

#[tokio::test]
async fn screenshots_on_a_closing_page_are_skipped() {
    let page = page().failing_after_shots(5);
    let factory = InMemoryEncoderFactory::new();
    let store = Arc::new(MemoryStore::default());

    let out = capture_deterministic(
        &page,
        &target(),
        &discovery(&[1000.0]),
        QualityKey::High.preset(),
        &plan(10, 0),
        session(&factory, &store),
    )
    .await
    .unwrap();

    assert_eq!(out.encoded.frame_count, 5);
    assert!(!out.report.dropped_seam);
}

#[tokio::test]
async fn missing_target_during_bounds_pass_is_element_not_found() {
    let page = ScriptedPage::new(Viewport::new(40, 20).unwrap());
    let factory = InMemoryEncoderFactory::new();
    let store = Arc::new(MemoryStore::default());

    let err = capture_deterministic(
        &page,
        &target(),
        &discovery(&[500.0]),
        QualityKey::High.preset(),
        &plan(10, 0),
        session(&factory, &store),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CaptureError::ElementNotFound(_)));
    assert!(store.is_empty());
    assert_eq!(page.log().screenshots, 0);
}

#[tokio::test]
async fn capture_loop_waits_for_a_slow_encoder() {
    let page = Arc::new(page());
    let factory = InMemoryEncoderFactory::new().with_write_delay(Duration::from_millis(5));
    let store = Arc::new(MemoryStore::default());
    let widest = Arc::new(AtomicU64::new(0));
    let encode = session(&factory, &store);

    let watcher = {
        let (page, factory, widest) = (Arc::clone(&page), factory.clone(), Arc::clone(&widest));
        tokio::spawn(async move {
            loop {
                let shots = page.log().screenshots;
                let written = factory.runs()[0].frames.len() as u64;
                widest.fetch_max(shots.saturating_sub(written), Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    };

    let out = capture_deterministic(
        &*page,
        &target(),
        &discovery(&[3000.0]),
        QualityKey::High.preset(),
        &plan(30, 0),
        encode,
    )
    .await
    .unwrap();
    watcher.abort();

    assert_eq!(out.sampled, 91);
    assert_eq!(out.encoded.frame_count, 90);
    // Queued frames, the one being written, the held seam candidate and the one being pushed.
    let bound = FRAME_QUEUE_DEPTH as u64 + 3;
    assert!(widest.load(Ordering::SeqCst) <= bound);
}
