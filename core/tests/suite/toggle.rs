use anyhow::Result;
use geoflag_core::AnnotationState;
use geoflag_core::MemoryStore;
use geoflag_core::ToggleOutcome;
use geoflag_core::markup::FLAG_MARKER;
use geoflag_core::protocol::ControlMessage;
use geoflag_core::protocol::storage::ENABLED_KEY;
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use super::harness::Harness;
use super::harness::Peer;
use super::harness::add_post;
use super::harness::any_marked;
use super::harness::empty_page;
use super::harness::marked;

const PEOPLE: &[(&str, &str)] = &[("frank", "Sweden"), ("grace", "Norway"), ("heidi", "Japan")];

#[tokio::test(start_paused = true)]
async fn disable_reverts_and_enable_requeues() -> Result<()> {
    let page = empty_page();
    let posts: Vec<_> = PEOPLE.iter().map(|(id, _)| add_post(&page, id)).collect();
    let harness = Harness::start(
        Arc::new(MemoryStore::new()),
        page.clone(),
        Peer::new(PEOPLE, Duration::from_millis(100)),
    )
    .await?;

    sleep(Duration::from_secs(3)).await;
    assert_eq!(marked(&page, FLAG_MARKER).len(), 3);
    assert_eq!(harness.requested().len(), 3);

    let outcome = harness
        .enricher
        .controller()
        .apply(ControlMessage::Toggle { enabled: false })
        .await;
    let ToggleOutcome::Disabled(summary) = outcome else {
        panic!("expected a revert, got {outcome:?}");
    };
    assert_eq!(summary.flags, 3);
    assert_eq!(summary.markers, 3);
    assert_eq!(any_marked(&page), 0);
    for post in &posts {
        assert_eq!(harness.enricher.annotator().state_of(*post), None);
    }
    assert!(harness.enricher.cache().is_empty());
    assert!(!harness.enricher.controller().is_enabled());
    assert_eq!(harness.store.snapshot(ENABLED_KEY), Some(Value::Bool(false)));

    // Nothing is scanned while disabled.
    sleep(Duration::from_secs(5)).await;
    assert_eq!(any_marked(&page), 0);
    assert_eq!(harness.requested().len(), 3);

    harness
        .control
        .send(ControlMessage::Toggle { enabled: true })
        .await?;
    sleep(Duration::from_millis(300)).await;
    assert_eq!(harness.requested().len(), 3);

    sleep(Duration::from_secs(3)).await;
    assert_eq!(harness.requested().len(), 6);
    assert_eq!(marked(&page, FLAG_MARKER).len(), 3);
    for post in &posts {
        assert_eq!(
            harness.enricher.annotator().state_of(*post),
            Some(AnnotationState::Done)
        );
    }
    assert_eq!(harness.store.snapshot(ENABLED_KEY), Some(Value::Bool(true)));

    harness.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn disable_stops_queued_and_running_lookups() -> Result<()> {
    let page = empty_page();
    for (id, _) in PEOPLE {
        add_post(&page, id);
    }
    let harness = Harness::start(
        Arc::new(MemoryStore::new()),
        page.clone(),
        Peer::new(PEOPLE, Duration::from_secs(1)),
    )
    .await?;

    // One lookup is out, the other two wait for the 500ms spacing.
    sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.requested().len(), 1);
    assert_eq!(harness.enricher.scheduler().pending(), 2);

    harness
        .enricher
        .controller()
        .apply(ControlMessage::Toggle { enabled: false })
        .await;
    assert_eq!(harness.enricher.scheduler().pending(), 0);

    sleep(Duration::from_secs(3)).await;
    assert_eq!(harness.requested().len(), 1);
    assert!(harness.enricher.cache().is_empty());
    assert_eq!(any_marked(&page), 0);

    harness.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn persisted_disable_survives_restart() -> Result<()> {
    let store = Arc::new(MemoryStore::with_values([(
        ENABLED_KEY.to_string(),
        Value::Bool(false),
    )]));
    let page = empty_page();
    add_post(&page, "frank");
    let harness = Harness::start(
        store,
        page.clone(),
        Peer::new(PEOPLE, Duration::from_millis(100)),
    )
    .await?;

    sleep(Duration::from_secs(3)).await;
    assert!(!harness.enricher.controller().is_enabled());
    assert!(harness.requested().is_empty());
    assert_eq!(any_marked(&page), 0);

    harness
        .control
        .send(ControlMessage::Toggle { enabled: true })
        .await?;
    sleep(Duration::from_secs(1)).await;
    assert_eq!(marked(&page, FLAG_MARKER).len(), 1);

    harness.shutdown().await
}
