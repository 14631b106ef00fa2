//! Request/response channel to the page-context peer.
//!
//! Every request carries a correlation id; the pending entry is removed as
//! soon as the matching response arrives, the timeout fires, or the caller
//! goes away, so listeners never accumulate.

use async_trait::async_trait;
use geoflag_protocol::BridgeMessage;
use geoflag_protocol::Identifier;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::warn;

use crate::error::BridgeError;
use crate::scheduler::LocationResolver;
use crate::scheduler::RateLimitState;

/// Outcome of one round trip. The default value means "no location".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub location: Option<String>,
    pub is_rate_limited: bool,
}

/// Outbound half of the window-scoped message channel.
#[async_trait]
pub trait BridgeTransport: Send + Sync {
    async fn post(&self, message: BridgeMessage) -> Result<(), BridgeError>;
}

/// [`BridgeTransport`] over a tokio channel; the receiver goes to the peer.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<BridgeMessage>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<BridgeMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl BridgeTransport for ChannelTransport {
    async fn post(&self, message: BridgeMessage) -> Result<(), BridgeError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| BridgeError::Disconnected)
    }
}

struct PendingLookup {
    identifier: Identifier,
    reply: oneshot::Sender<Resolution>,
}

type PendingMap = Mutex<HashMap<String, PendingLookup>>;

pub struct BridgeChannel {
    transport: Arc<dyn BridgeTransport>,
    pending: Arc<PendingMap>,
    sequence: AtomicU64,
    rate_limits: RateLimitState,
    timeout: Duration,
}

impl BridgeChannel {
    pub fn new(
        transport: Arc<dyn BridgeTransport>,
        rate_limits: RateLimitState,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            pending: Arc::new(Mutex::new(HashMap::new())),
            sequence: AtomicU64::new(u64::from(rand::random::<u32>())),
            rate_limits,
            timeout,
        }
    }

    /// Resolve `identifier` through the page context. Never fails: transport
    /// errors and timeouts resolve to "no location".
    pub async fn request(&self, identifier: &str) -> Resolution {
        let correlation_id = self.next_correlation_id();
        let (reply, response) = oneshot::channel();
        lock(&self.pending).insert(
            correlation_id.clone(),
            PendingLookup {
                identifier: identifier.to_string(),
                reply,
            },
        );
        let _guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            correlation_id: correlation_id.clone(),
        };

        let message = BridgeMessage::FetchLocation {
            identifier: identifier.to_string(),
            correlation_id: correlation_id.clone(),
        };
        if let Err(err) = self.transport.post(message).await {
            warn!("Failed to post lookup for {identifier}: {err}");
            return Resolution::default();
        }

        match tokio::time::timeout(self.timeout, response).await {
            Ok(Ok(resolution)) => resolution,
            Ok(Err(_)) => Resolution::default(),
            Err(_) => {
                debug!("Lookup {correlation_id} for {identifier} timed out");
                Resolution::default()
            }
        }
    }

    /// Route one inbound message from the page context.
    pub fn handle_message(&self, message: BridgeMessage) {
        match message {
            BridgeMessage::LocationResponse {
                identifier,
                correlation_id,
                location,
                is_rate_limited,
            } => {
                let waiter = {
                    let mut pending = lock(&self.pending);
                    let matches = pending
                        .get(&correlation_id)
                        .is_some_and(|entry| entry.identifier == identifier);
                    if matches {
                        pending.remove(&correlation_id)
                    } else {
                        None
                    }
                };
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.reply.send(Resolution {
                            location,
                            is_rate_limited,
                        });
                    }
                    None => debug!("Dropping unmatched response {correlation_id} for {identifier}"),
                }
            }
            BridgeMessage::RateLimitInfo {
                reset_time,
                wait_time,
            } => self.rate_limits.record(reset_time, wait_time),
            // Our own request echoed back by the shared channel.
            BridgeMessage::FetchLocation { .. } => {}
        }
    }

    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }

    fn next_correlation_id(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{seq:x}")
    }
}

#[async_trait]
impl LocationResolver for BridgeChannel {
    async fn resolve(&self, identifier: &str) -> Resolution {
        self.request(identifier).await
    }
}

struct PendingGuard {
    pending: Arc<PendingMap>,
    correlation_id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.correlation_id);
    }
}

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<String, PendingLookup>> {
    match pending.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
