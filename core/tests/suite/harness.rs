//! In-process page-context peer and page fixtures.

use anyhow::Result;
use geoflag_core::ChannelTransport;
use geoflag_core::Document;
use geoflag_core::Enricher;
use geoflag_core::EnricherConfig;
use geoflag_core::MemoryStore;
use geoflag_core::NodeId;
use geoflag_core::Page;
use geoflag_core::markup::MARKER_ATTR;
use geoflag_core::protocol::BridgeMessage;
use geoflag_core::protocol::ControlMessage;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Answers `fetch-location` requests from a fixed table after `latency`.
pub struct Peer {
    pub locations: HashMap<String, String>,
    pub latency: Duration,
}

impl Peer {
    pub fn new(locations: &[(&str, &str)], latency: Duration) -> Self {
        Self {
            locations: locations
                .iter()
                .map(|(id, location)| ((*id).to_string(), (*location).to_string()))
                .collect(),
            latency,
        }
    }
}

pub struct Harness {
    pub enricher: Arc<Enricher>,
    pub page: Page,
    pub store: Arc<MemoryStore>,
    pub control: mpsc::Sender<ControlMessage>,
    pub inbound: mpsc::Sender<BridgeMessage>,
    pub requests: Arc<Mutex<Vec<(String, String)>>>,
    cancel: CancellationToken,
    run: JoinHandle<()>,
    peer: JoinHandle<()>,
}

impl Harness {
    pub async fn start(store: Arc<MemoryStore>, page: Page, peer: Peer) -> Result<Self> {
        let (transport, mut outbound) = ChannelTransport::new(64);
        let enricher = Arc::new(
            Enricher::start(
                EnricherConfig::default(),
                page.clone(),
                store.clone(),
                Arc::new(transport),
            )
            .await?,
        );
        let (inbound, inbound_rx) = mpsc::channel(64);
        let (control, control_rx) = mpsc::channel(8);
        let requests = Arc::new(Mutex::new(Vec::new()));

        let peer = tokio::spawn({
            let inbound = inbound.clone();
            let requests = Arc::clone(&requests);
            let peer = Arc::new(peer);
            async move {
                while let Some(message) = outbound.recv().await {
                    let BridgeMessage::FetchLocation {
                        identifier,
                        correlation_id,
                    } = message
                    else {
                        continue;
                    };
                    if let Ok(mut seen) = requests.lock() {
                        seen.push((identifier.clone(), correlation_id.clone()));
                    }
                    let inbound = inbound.clone();
                    let peer = Arc::clone(&peer);
                    tokio::spawn(async move {
                        tokio::time::sleep(peer.latency).await;
                        let location = peer.locations.get(&identifier).cloned();
                        let _ = inbound
                            .send(BridgeMessage::LocationResponse {
                                identifier,
                                correlation_id,
                                location,
                                is_rate_limited: false,
                            })
                            .await;
                    });
                }
            }
        });

        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let enricher = Arc::clone(&enricher);
            let cancel = cancel.clone();
            async move { enricher.run(inbound_rx, control_rx, cancel).await }
        });

        Ok(Self {
            enricher,
            page,
            store,
            control,
            inbound,
            requests,
            cancel,
            run,
            peer,
        })
    }

    pub fn requested(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|seen| seen.iter().map(|(id, _)| id.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        self.run.await?;
        self.peer.abort();
        Ok(())
    }
}

/// Appends a post whose author block links `/<handle>` twice: once from the
/// verified display name and once from the `@handle` line.
pub fn add_post(page: &Page, handle: &str) -> NodeId {
    let href = format!("/{handle}");
    let at_handle = format!("@{handle}");
    page.write(|doc| {
        let body = doc.body();
        let article = doc
            .append_element(body, "article", &[("data-testid", "tweet")])
            .expect("append article");
        let block = doc
            .append_element(article, "div", &[("data-testid", "User-Name")])
            .expect("append name block");
        let display = doc.append_element(block, "div", &[]).expect("append");
        let name_link = doc
            .append_element(display, "a", &[("href", href.as_str())])
            .expect("append");
        doc.append_text(name_link, "Display Name").expect("append");
        doc.append_element(name_link, "svg", &[("data-testid", "icon-verified")])
            .expect("append");
        let handle_link = doc
            .append_element(block, "a", &[("href", href.as_str())])
            .expect("append");
        doc.append_text(handle_link, &at_handle).expect("append");
        let text = doc.append_element(article, "div", &[]).expect("append");
        doc.append_text(text, "just setting up my account").expect("append");
        article
    })
}

pub fn empty_page() -> Page {
    Page::new(Document::new())
}

/// Inserted elements carrying `marker`, anywhere in the document.
pub fn marked(page: &Page, marker: &str) -> Vec<NodeId> {
    page.read(|doc| doc.select(doc.body(), |el| el.attr(MARKER_ATTR) == Some(marker)))
}

pub fn any_marked(page: &Page) -> usize {
    page.read(|doc| doc.select(doc.body(), |el| el.has_attr(MARKER_ATTR)).len())
}
