use super::*;

fn record(id: &str, node: i64) -> AnimationRecord {
    AnimationRecord {
        id: id.to_string(),
        start_time: 100.0,
        delay: 0.0,
        duration: 500.0,
        backend_node_id: Some(node),
    }
}

#[tokio::test(start_paused = true)]
async fn replays_animations_after_load_in_order() {
    let page = ScriptedPage::new(Viewport::default())
        .with_animation(record("b", 2), Duration::from_millis(20))
        .with_animation(record("a", 1), Duration::from_millis(10));
    let mut rx = page.animation_events().await.unwrap();
    page.load(&PageSource::Html("<div></div>".into()))
        .await
        .unwrap();

    assert_eq!(rx.recv().await.unwrap().id, "a");
    assert_eq!(rx.recv().await.unwrap().id, "b");
}

#[tokio::test]
async fn screenshots_depend_only_on_seeked_time() {
    let page = ScriptedPage::new(Viewport::default());
    let clip = CaptureClip {
        x: 0,
        y: 0,
        width: 4,
        height: 4,
    };
    let ids = vec!["a".to_string()];

    page.seek_animations(&ids, 0.0).await.unwrap();
    let first = page.screenshot(clip).await.unwrap();
    page.seek_animations(&ids, 40.0).await.unwrap();
    let mid = page.screenshot(clip).await.unwrap();
    page.seek_animations(&ids, 0.0).await.unwrap();
    let again = page.screenshot(clip).await.unwrap();

    assert_eq!(first, again);
    assert_ne!(first, mid);
    assert_eq!(page.log().seeks, vec![0.0, 40.0, 0.0]);
}

#[tokio::test]
async fn records_time_factor_calls_and_script_lifecycle() {
    let page = ScriptedPage::new(Viewport::default());
    let id = page.add_init_script("/* shim */").await.unwrap();
    page.evaluate("window.__animcapTime.setFactor(0.25)")
        .await
        .unwrap();
    page.evaluate("window.__animcapTime && window.__animcapTime.reset()")
        .await
        .unwrap();
    assert_eq!(page.log().init_scripts.len(), 1);
    page.remove_init_script(&id).await.unwrap();

    let log = page.log();
    assert_eq!(log.time_factors, vec![0.25]);
    assert_eq!(log.time_resets, 1);
    assert!(log.init_scripts.is_empty());
}

#[tokio::test]
async fn closed_page_rejects_calls() {
    let page = ScriptedPage::new(Viewport::default());
    page.close().await.unwrap();
    let err = page
        .screenshot(CaptureClip {
            x: 0,
            y: 0,
            width: 2,
            height: 2,
        })
        .await
        .unwrap_err();
    assert!(err.is_page_closed());
}

#[tokio::test]
async fn containment_honors_outside_nodes_and_failures() {
    let page = ScriptedPage::new(Viewport::default())
        .with_element("#box", Rect::new(0.0, 0.0, 10.0, 10.0))
        .with_outside_node(7)
        .with_containment_failures(1);
    let container = page.query_selector("#box").await.unwrap().unwrap();

    assert!(page.node_contains(&container, 3).await.is_err());
    assert!(page.node_contains(&container, 3).await.unwrap());
    assert!(!page.node_contains(&container, 7).await.unwrap());
    assert!(page.query_selector("#missing").await.unwrap().is_none());
}
