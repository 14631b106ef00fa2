//! Wires the components together and drives them until cancelled.

use geoflag_protocol::BridgeMessage;
use geoflag_protocol::ControlMessage;
use geoflag_protocol::CountryTable;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use crate::annotator::FlagAnnotator;
use crate::bridge::BridgeChannel;
use crate::bridge::BridgeTransport;
use crate::cache::LocationCache;
use crate::config::EnricherConfig;
use crate::controller::EnableController;
use crate::dom::Page;
use crate::error::Result;
use crate::scanner::DomScanner;
use crate::scheduler::RateLimitState;
use crate::scheduler::RequestScheduler;
use crate::stats::Counters;
use crate::stats::EnricherStats;
use crate::storage::KeyValueStore;

pub struct Enricher {
    page: Page,
    cache: LocationCache,
    bridge: Arc<BridgeChannel>,
    scheduler: RequestScheduler,
    annotator: FlagAnnotator,
    scanner: DomScanner,
    controller: EnableController,
    counters: Arc<Counters>,
}

impl Enricher {
    /// Validate `config`, load persisted state, and build every component.
    pub async fn start(
        config: EnricherConfig,
        page: Page,
        storage: Arc<dyn KeyValueStore>,
        transport: Arc<dyn BridgeTransport>,
    ) -> Result<Self> {
        Self::start_with_countries(config, page, storage, transport, CountryTable::default()).await
    }

    pub async fn start_with_countries(
        config: EnricherConfig,
        page: Page,
        storage: Arc<dyn KeyValueStore>,
        transport: Arc<dyn BridgeTransport>,
        countries: CountryTable,
    ) -> Result<Self> {
        config.validate()?;

        let cache = LocationCache::load(Arc::clone(&storage), &config).await;
        let enabled = EnableController::load_enabled(storage.as_ref()).await;
        let enabled = Arc::new(AtomicBool::new(enabled));
        let counters = Arc::new(Counters::default());

        let rate_limits = RateLimitState::default();
        let bridge = Arc::new(BridgeChannel::new(
            transport,
            rate_limits.clone(),
            config.bridge_timeout(),
        ));
        let scheduler = RequestScheduler::new(bridge.clone(), cache.clone(), rate_limits, &config);
        let annotator = FlagAnnotator::with_counters(
            page.clone(),
            cache.clone(),
            scheduler.clone(),
            countries,
            &config,
            Arc::clone(&counters),
        );
        let scanner = DomScanner::with_counters(
            page.clone(),
            annotator.clone(),
            Arc::clone(&enabled),
            &config,
            Arc::clone(&counters),
        );
        let controller = EnableController::new(
            storage,
            enabled,
            annotator.clone(),
            scheduler.clone(),
            cache.clone(),
            scanner.clone(),
            &config,
        );

        info!(
            "Enricher started with {} cached locations (enabled: {})",
            cache.len(),
            controller.is_enabled()
        );
        Ok(Self {
            page,
            cache,
            bridge,
            scheduler,
            annotator,
            scanner,
            controller,
            counters,
        })
    }

    /// Scan the page, route inbound bridge and control messages, and flush
    /// the cache once `cancel` fires.
    pub async fn run(
        &self,
        mut inbound: mpsc::Receiver<BridgeMessage>,
        mut control: mpsc::Receiver<ControlMessage>,
        cancel: CancellationToken,
    ) {
        let scanner_cancel = cancel.child_token();
        let scanner = self.scanner.clone();
        let scanner_task = tokio::spawn({
            let cancel = scanner_cancel.clone();
            async move { scanner.run(cancel).await }
        });

        let mut inbound_open = true;
        let mut control_open = true;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = inbound.recv(), if inbound_open => match message {
                    Some(message) => self.bridge.handle_message(message),
                    None => {
                        debug!("Bridge inbound channel closed");
                        inbound_open = false;
                    }
                },
                message = control.recv(), if control_open => match message {
                    Some(message) => {
                        self.controller.apply(message).await;
                    }
                    None => {
                        debug!("Control channel closed");
                        control_open = false;
                    }
                },
            }
        }

        scanner_cancel.cancel();
        let _ = scanner_task.await;
        self.cache.flush().await;
        info!("Enricher stopped");
    }

    pub fn stats(&self) -> EnricherStats {
        self.counters.snapshot()
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn cache(&self) -> &LocationCache {
        &self.cache
    }

    pub fn bridge(&self) -> &BridgeChannel {
        &self.bridge
    }

    pub fn scheduler(&self) -> &RequestScheduler {
        &self.scheduler
    }

    pub fn annotator(&self) -> &FlagAnnotator {
        &self.annotator
    }

    pub fn scanner(&self) -> &DomScanner {
        &self.scanner
    }

    pub fn controller(&self) -> &EnableController {
        &self.controller
    }
}
