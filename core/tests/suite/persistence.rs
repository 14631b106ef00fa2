use anyhow::Result;
use geoflag_core::MemoryStore;
use geoflag_core::markup::FLAG_MARKER;
use geoflag_core::protocol::storage::LOCATION_CACHE_KEY;
use geoflag_core::protocol::storage::PersistedCache;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use super::harness::Harness;
use super::harness::Peer;
use super::harness::add_post;
use super::harness::empty_page;
use super::harness::marked;

fn persisted(store: &MemoryStore) -> Result<PersistedCache> {
    let blob = store
        .snapshot(LOCATION_CACHE_KEY)
        .ok_or_else(|| anyhow::anyhow!("cache blob was never written"))?;
    Ok(serde_json::from_value(blob)?)
}

#[tokio::test(start_paused = true)]
async fn resolved_locations_survive_restart() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let people = [("ivan", "India"), ("judy", "Atlantis")];

    let page = empty_page();
    add_post(&page, "ivan");
    add_post(&page, "judy");
    add_post(&page, "mallory");
    let first = Harness::start(
        store.clone(),
        page.clone(),
        Peer::new(&people, Duration::from_millis(50)),
    )
    .await?;
    sleep(Duration::from_secs(3)).await;
    assert_eq!(first.requested().len(), 3);
    first.shutdown().await?;

    let blob = persisted(&store)?;
    let mut ids: Vec<_> = blob.keys().cloned().collect();
    ids.sort();
    // Null results never reach storage.
    assert_eq!(ids, vec!["ivan".to_string(), "judy".to_string()]);
    assert_eq!(blob["ivan"].location.as_deref(), Some("India"));

    let page = empty_page();
    add_post(&page, "ivan");
    let second = Harness::start(store, page.clone(), Peer::new(&[], Duration::ZERO)).await?;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(marked(&page, FLAG_MARKER).len(), 1);
    assert!(second.requested().is_empty());
    assert!(second.enricher.cache().contains("ivan"));
    assert!(!second.enricher.cache().contains("mallory"));

    second.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn torn_down_storage_keeps_annotating_in_memory() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    store.invalidate();
    let page = empty_page();
    add_post(&page, "ivan");
    let harness = Harness::start(
        store.clone(),
        page.clone(),
        Peer::new(&[("ivan", "India")], Duration::from_millis(50)),
    )
    .await?;

    sleep(Duration::from_secs(1)).await;
    assert_eq!(marked(&page, FLAG_MARKER).len(), 1);
    assert!(harness.enricher.controller().is_enabled());
    assert!(!harness.enricher.cache().is_durable());

    harness.shutdown().await?;
    assert_eq!(store.snapshot(LOCATION_CACHE_KEY), None);
    Ok(())
}
