//! Container discovery. Node-insertion notifications and a periodic tick both
//! feed the same idempotent [`DomScanner::rescan`].

use geoflag_protocol::Identifier;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use crate::annotator::AnnotationState;
use crate::annotator::FlagAnnotator;
use crate::config::EnricherConfig;
use crate::dom::NodeId;
use crate::dom::Page;
use crate::extractor::extract_identifier;
use crate::markup::Markup;
use crate::stats::Counters;

/// Annotation task started by a rescan.
pub struct ScanTask {
    pub container: NodeId,
    pub identifier: Identifier,
    pub handle: JoinHandle<AnnotationState>,
}

#[derive(Clone)]
pub struct DomScanner {
    page: Page,
    annotator: FlagAnnotator,
    markup: Markup,
    enabled: Arc<AtomicBool>,
    counters: Arc<Counters>,
    scan_interval: Duration,
}

impl DomScanner {
    pub fn new(
        page: Page,
        annotator: FlagAnnotator,
        enabled: Arc<AtomicBool>,
        config: &EnricherConfig,
    ) -> Self {
        Self::with_counters(page, annotator, enabled, config, Arc::default())
    }

    pub(crate) fn with_counters(
        page: Page,
        annotator: FlagAnnotator,
        enabled: Arc<AtomicBool>,
        config: &EnricherConfig,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            page,
            annotator,
            markup: config.markup.clone(),
            enabled,
            counters,
            scan_interval: config.scan_interval(),
        }
    }

    /// Find unclaimed containers and start annotating them. Returns the
    /// spawned tasks; nothing is started while disabled.
    pub fn rescan(&self) -> Vec<ScanTask> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Vec::new();
        }
        self.counters.scan();
        self.annotator.prune_detached();

        let found: Vec<(NodeId, Identifier)> = self.page.read(|doc| {
            doc.select(doc.body(), |el| self.markup.is_scan_root(el))
                .into_iter()
                .filter(|container| !self.annotator.is_claimed(*container))
                .filter_map(|container| {
                    let identifier = extract_identifier(doc, container, &self.markup);
                    if identifier.is_none() {
                        trace!("No identifier in container {container:?}");
                    }
                    identifier.map(|identifier| (container, identifier))
                })
                .collect()
        });
        if !found.is_empty() {
            debug!("Rescan found {} new containers", found.len());
        }

        found
            .into_iter()
            .map(|(container, identifier)| {
                let annotator = self.annotator.clone();
                let task_identifier = identifier.clone();
                let handle = tokio::spawn(async move {
                    annotator.annotate(container, &task_identifier).await
                });
                ScanTask {
                    container,
                    identifier,
                    handle,
                }
            })
            .collect()
    }

    /// Rescan on every node insertion and on each interval tick until
    /// `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut insertions = self.page.subscribe();
        let mut ticker = tokio::time::interval(self.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = insertions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {}
            }
            self.rescan();
        }
        debug!("Scanner stopped");
    }
}
