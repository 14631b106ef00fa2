//! Persisted on/off switch.

use geoflag_protocol::ControlMessage;
use geoflag_protocol::storage::ENABLED_KEY;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::info;
use tracing::warn;

use crate::annotator::FlagAnnotator;
use crate::annotator::RevertSummary;
use crate::cache::LocationCache;
use crate::config::EnricherConfig;
use crate::scanner::DomScanner;
use crate::scheduler::RequestScheduler;
use crate::storage::KeyValueStore;

/// What applying a control message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Enabled,
    Disabled(RevertSummary),
}

pub struct EnableController {
    storage: Arc<dyn KeyValueStore>,
    enabled: Arc<AtomicBool>,
    annotator: FlagAnnotator,
    scheduler: RequestScheduler,
    cache: LocationCache,
    scanner: DomScanner,
    settle: Duration,
}

impl EnableController {
    /// Read the persisted flag. Anything other than an explicit `false`
    /// counts as enabled.
    pub async fn load_enabled(storage: &dyn KeyValueStore) -> bool {
        match storage.get(ENABLED_KEY).await {
            Ok(Some(Value::Bool(enabled))) => enabled,
            Ok(_) => true,
            Err(err) => {
                warn!("Failed to read enabled flag, assuming enabled: {err}");
                true
            }
        }
    }

    pub fn new(
        storage: Arc<dyn KeyValueStore>,
        enabled: Arc<AtomicBool>,
        annotator: FlagAnnotator,
        scheduler: RequestScheduler,
        cache: LocationCache,
        scanner: DomScanner,
        config: &EnricherConfig,
    ) -> Self {
        Self {
            storage,
            enabled,
            annotator,
            scheduler,
            cache,
            scanner,
            settle: config.enable_settle(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub async fn apply(&self, message: ControlMessage) -> ToggleOutcome {
        match message {
            ControlMessage::Toggle { enabled } => self.set_enabled(enabled).await,
        }
    }

    async fn set_enabled(&self, enabled: bool) -> ToggleOutcome {
        self.enabled.store(enabled, Ordering::SeqCst);
        if let Err(err) = self.storage.set(ENABLED_KEY, Value::Bool(enabled)).await {
            warn!("Failed to persist enabled flag: {err}");
        }

        if !enabled {
            // Revert first so in-flight annotations see the new generation,
            // then stop queued lookups before the cache forgets everything.
            let summary = self.annotator.revert_all();
            let dropped = self.scheduler.reset();
            self.cache.clear();
            info!(
                "Disabled; removed {} flags and {} placeholders, dropped {dropped} queued lookups",
                summary.flags, summary.placeholders
            );
            return ToggleOutcome::Disabled(summary);
        }

        info!("Enabled; rescanning");
        let scanner = self.scanner.clone();
        let settle = self.settle;
        tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            scanner.rescan();
        });
        ToggleOutcome::Enabled
    }
}
