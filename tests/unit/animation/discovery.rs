use super::*;
use crate::browser::scripted::ScriptedPage;
use crate::foundation::core::{Rect, Viewport};

fn record(id: &str, start_time: f64, duration: f64, node: Option<i64>) -> AnimationRecord {
    AnimationRecord {
        id: id.to_string(),
        start_time,
        delay: 0.0,
        duration,
        backend_node_id: node,
    }
}

fn source() -> PageSource {
    PageSource::Html("<div id=app></div>".to_string())
}

fn page() -> ScriptedPage {
    ScriptedPage::new(Viewport::default()).with_element("#app", Rect::new(0.0, 0.0, 100.0, 50.0))
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

#[test]
fn records_group_by_start_time_in_first_seen_order() {
    let mut groups = Vec::new();
    assert!(insert_record(&mut groups, record("b", 20.0, 100.0, None)));
    assert!(insert_record(&mut groups, record("a", 10.0, 300.0, None)));
    assert!(insert_record(&mut groups, record("c", 20.0 + 1e-4, 500.0, None)));
    assert!(!insert_record(&mut groups, record("a", 10.0, 300.0, None)));

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].ids(), vec!["b", "c"]);
    assert_eq!(groups[1].ids(), vec!["a"]);
    assert_eq!(groups[0].animation_length(), 500.0);
}

#[test]
fn group_length_includes_delay() {
    let mut r = record("a", 0.0, 400.0, None);
    r.delay = 250.0;
    let group = AnimationGroup {
        start_time: 0.0,
        animations: vec![r],
    };
    assert_eq!(group.animation_length(), 650.0);
}

#[test]
fn missing_group_index_is_an_index_error() {
    let d = Discovery {
        groups: Vec::new(),
        container: NodeHandle(":root".to_string()),
        hit_ceiling: false,
        dropped: 0,
    };
    assert!(matches!(
        d.group(2),
        Err(CaptureError::Index {
            index: 2,
            available: 0
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn collects_contained_animations_until_quiet() {
    let page = page()
        .with_outside_node(99)
        .with_animation(record("fade", 100.0, 1000.0, Some(1)), ms(100))
        .with_animation(record("slide", 100.0, 600.0, Some(2)), ms(150))
        .with_animation(record("later", 400.0, 200.0, Some(3)), ms(400))
        .with_animation(record("elsewhere", 400.0, 900.0, Some(99)), ms(450));
    let cfg = DiscoveryConfig::default();

    let started = Instant::now();
    let found = discover(&page, "#app", &source(), &cfg).await.unwrap();

    assert!(started.elapsed() >= ms(450) + cfg.quiescence());
    assert!(!found.hit_ceiling);
    assert_eq!(found.groups.len(), 2);
    assert_eq!(found.groups[0].ids(), vec!["fade", "slide"]);
    assert_eq!(found.groups[0].animation_length(), 1000.0);
    assert_eq!(found.groups[1].ids(), vec!["later"]);

    let log = page.log();
    assert_eq!(log.playback_rates, vec![1.0]);
    assert_eq!(log.paused, vec!["fade", "slide", "later"]);
    assert_eq!(log.seeks, vec![0.0]);
}

#[tokio::test(start_paused = true)]
async fn waits_for_container_and_retries_failed_checks() {
    let page = page()
        .with_container_ready_after(4)
        .with_containment_failures(2)
        .with_animation(record("early", 0.0, 500.0, Some(1)), ms(0))
        .with_animation(record("second", 0.0, 500.0, Some(2)), ms(10));

    let found = discover(&page, "#app", &source(), &DiscoveryConfig::default())
        .await
        .unwrap();

    assert_eq!(found.container, NodeHandle("#app".to_string()));
    assert_eq!(found.groups.len(), 1);
    assert_eq!(found.groups[0].ids(), vec!["early", "second"]);
    assert_eq!(found.dropped, 0);
}

#[tokio::test(start_paused = true)]
async fn drops_animation_after_exhausting_retries() {
    let page = page()
        .with_containment_failures(100)
        .with_animation(record("flaky", 0.0, 500.0, Some(1)), ms(0));
    let cfg = DiscoveryConfig {
        max_containment_retries: 2,
        ..DiscoveryConfig::default()
    };

    let found = discover(&page, "#app", &source(), &cfg).await.unwrap();
    assert!(found.groups.is_empty());
    assert_eq!(found.dropped, 1);
    assert!(page.log().seeks.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stops_at_ceiling_on_pages_that_never_go_quiet() {
    let mut page = page();
    for i in 0..20u64 {
        page = page.with_animation(
            record(&format!("tick{i}"), (i * 300) as f64, 100.0, Some(1)),
            ms(i * 300),
        );
    }
    let cfg = DiscoveryConfig {
        quiescence_ms: 500,
        ceiling_ms: 1000,
        max_containment_retries: 5,
    };

    let started = Instant::now();
    let found = discover(&page, "#app", &source(), &cfg).await.unwrap();
    assert!(found.hit_ceiling);
    assert!(started.elapsed() < ms(1200));
    // Events at 0, 300, 600 and 900 ms are inside the ceiling.
    assert_eq!(found.groups.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn document_level_animations_only_count_for_the_root() {
    let anim = record("doc", 0.0, 300.0, None);

    let page_a = page().with_animation(anim.clone(), ms(0));
    let found = discover(&page_a, "#app", &source(), &DiscoveryConfig::default())
        .await
        .unwrap();
    assert!(found.groups.is_empty());

    let page_b = page().with_animation(anim, ms(0));
    let found = discover(
        &page_b,
        DOCUMENT_ROOT_SELECTOR,
        &source(),
        &DiscoveryConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(found.groups.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn missing_container_is_element_not_found() {
    let err = discover(&page(), "#nope", &source(), &DiscoveryConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CaptureError::ElementNotFound(ref s) if s == "#nope"));
}
