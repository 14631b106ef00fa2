use anyhow::Result;
use geoflag_core::AnnotationState;
use geoflag_core::MemoryStore;
use geoflag_core::markup::FLAG_MARKER;
use geoflag_core::markup::PLACEHOLDER_MARKER;
use geoflag_core::protocol::BridgeMessage;
use geoflag_core::protocol::PersistedLocation;
use geoflag_core::protocol::storage::LOCATION_CACHE_KEY;
use geoflag_core::protocol::storage::PersistedCache;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use super::harness::Harness;
use super::harness::Peer;
use super::harness::add_post;
use super::harness::empty_page;
use super::harness::marked;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[tokio::test(start_paused = true)]
async fn cached_location_renders_without_bridge_request() -> Result<()> {
    let now = chrono::Utc::now().timestamp_millis();
    let blob: PersistedCache = HashMap::from([(
        "alice".to_string(),
        PersistedLocation {
            location: Some("Paris, France".to_string()),
            expiry: now + DAY_MS,
            cached_at: now,
        },
    )]);
    let store = Arc::new(MemoryStore::with_values([(
        LOCATION_CACHE_KEY.to_string(),
        serde_json::to_value(blob)?,
    )]));
    let page = empty_page();
    let post = add_post(&page, "alice");

    let harness = Harness::start(store, page.clone(), Peer::new(&[], Duration::ZERO)).await?;
    sleep(Duration::from_millis(100)).await;

    let flags = marked(&page, FLAG_MARKER);
    assert_eq!(flags.len(), 1);
    page.read(|doc| {
        assert_eq!(doc.attr(flags[0], "src"), Some("https://flagcdn.com/20x15/fr.png"));
        assert_eq!(doc.attr(flags[0], "data-location"), Some("Paris, France"));
        assert!(doc.contains(post, flags[0]));
    });
    assert_eq!(
        harness.enricher.annotator().state_of(post),
        Some(AnnotationState::Done)
    );
    assert!(harness.requested().is_empty());

    let stats = harness.enricher.stats();
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.lookups, 0);
    assert_eq!(stats.flags_rendered, 1);

    harness.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn concurrent_containers_share_one_resolution() -> Result<()> {
    let page = empty_page();
    let first = add_post(&page, "bob");
    let second = add_post(&page, "bob");
    let harness = Harness::start(
        Arc::new(MemoryStore::new()),
        page.clone(),
        Peer::new(&[("bob", "Germany")], Duration::from_secs(1)),
    )
    .await?;

    sleep(Duration::from_millis(300)).await;
    assert_eq!(marked(&page, PLACEHOLDER_MARKER).len(), 1);
    let states = [first, second].map(|post| harness.enricher.annotator().state_of(post));
    assert!(states.contains(&Some(AnnotationState::Processing)));
    assert!(states.contains(&Some(AnnotationState::Waiting)));

    sleep(Duration::from_secs(3)).await;
    assert_eq!(harness.requested(), vec!["bob".to_string()]);
    for post in [first, second] {
        assert_eq!(
            harness.enricher.annotator().state_of(post),
            Some(AnnotationState::Done)
        );
    }
    assert_eq!(marked(&page, FLAG_MARKER).len(), 2);
    assert!(marked(&page, PLACEHOLDER_MARKER).is_empty());

    harness.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn annotation_state_only_moves_forward() -> Result<()> {
    let page = empty_page();
    let post = add_post(&page, "carol");
    let harness = Harness::start(
        Arc::new(MemoryStore::new()),
        page.clone(),
        Peer::new(&[("carol", "Mexico")], Duration::from_millis(700)),
    )
    .await?;

    let rank = |state: Option<AnnotationState>| match state {
        None => 0,
        Some(AnnotationState::Waiting) | Some(AnnotationState::Processing) => 1,
        Some(AnnotationState::Done) | Some(AnnotationState::Failed) => 2,
    };
    let mut seen = Vec::new();
    for _ in 0..40 {
        seen.push(harness.enricher.annotator().state_of(post));
        sleep(Duration::from_millis(50)).await;
    }

    assert!(seen.windows(2).all(|pair| rank(pair[0]) <= rank(pair[1])));
    assert_eq!(seen.last().copied().flatten(), Some(AnnotationState::Done));
    assert!(seen.contains(&Some(AnnotationState::Processing)));

    harness.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn late_response_is_ignored_and_null_is_retried() -> Result<()> {
    let page = empty_page();
    let post = add_post(&page, "dave");
    // Slower than the 10 s bridge timeout.
    let harness = Harness::start(
        Arc::new(MemoryStore::new()),
        page.clone(),
        Peer::new(&[("dave", "Kenya")], Duration::from_secs(12)),
    )
    .await?;

    sleep(Duration::from_secs(11)).await;
    assert_eq!(
        harness.enricher.annotator().state_of(post),
        Some(AnnotationState::Failed)
    );
    assert_eq!(harness.enricher.bridge().pending_requests(), 0);

    sleep(Duration::from_secs(2)).await;
    assert!(marked(&page, FLAG_MARKER).is_empty());
    assert_eq!(harness.enricher.cache().get("dave"), None);

    // A stray duplicate of the response is dropped as well.
    let correlation_id = harness
        .requests
        .lock()
        .map(|seen| seen[0].1.clone())
        .unwrap_or_default();
    harness
        .inbound
        .send(BridgeMessage::LocationResponse {
            identifier: "dave".to_string(),
            correlation_id,
            location: Some("Kenya".to_string()),
            is_rate_limited: false,
        })
        .await?;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(harness.enricher.cache().get("dave"), None);

    // Failed containers stay failed; a fresh container asks again.
    let again = add_post(&page, "dave");
    sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.requested(), vec!["dave".to_string(), "dave".to_string()]);
    assert_eq!(
        harness.enricher.annotator().state_of(post),
        Some(AnnotationState::Failed)
    );
    assert_eq!(
        harness.enricher.annotator().state_of(again),
        Some(AnnotationState::Processing)
    );

    harness.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn unknown_country_fails_without_flag() -> Result<()> {
    let page = empty_page();
    let post = add_post(&page, "erin");
    let harness = Harness::start(
        Arc::new(MemoryStore::new()),
        page.clone(),
        Peer::new(&[("erin", "Somewhere over the rainbow")], Duration::ZERO),
    )
    .await?;

    sleep(Duration::from_millis(100)).await;
    assert_eq!(
        harness.enricher.annotator().state_of(post),
        Some(AnnotationState::Failed)
    );
    assert!(marked(&page, FLAG_MARKER).is_empty());
    assert!(marked(&page, PLACEHOLDER_MARKER).is_empty());
    assert_eq!(harness.enricher.stats().failures, 1);

    harness.shutdown().await
}
