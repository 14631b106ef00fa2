//! Rate-limited, bounded-concurrency FIFO of outbound location lookups.

use async_trait::async_trait;
use geoflag_protocol::Identifier;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio::time::sleep;
use tracing::debug;
use tracing::info;

use crate::bridge::Resolution;
use crate::cache::LocationCache;
use crate::cache::now_ms;
use crate::config::EnricherConfig;

/// Anything that can turn an identifier into a location.
#[async_trait]
pub trait LocationResolver: Send + Sync {
    async fn resolve(&self, identifier: &str) -> Resolution;
}

/// Global pause requested by the host API. Shared by the bridge, which
/// records notifications, and the scheduler, which honours them.
#[derive(Clone, Debug, Default)]
pub struct RateLimitState {
    until: Arc<Mutex<Option<Instant>>>,
}

impl RateLimitState {
    /// Record a notification. `reset_time` is a Unix timestamp in seconds and
    /// `wait_time_ms` a suggested pause; the longer of the two wins, and an
    /// existing later pause is never shortened.
    pub fn record(&self, reset_time: i64, wait_time_ms: u64) {
        let until_reset = reset_time
            .saturating_mul(1_000)
            .saturating_sub(now_ms())
            .max(0)
            .unsigned_abs();
        let pause = Duration::from_millis(until_reset.max(wait_time_ms));
        if pause.is_zero() {
            return;
        }
        let until = Instant::now() + pause;
        let mut current = self.lock();
        if current.is_none_or(|existing| existing < until) {
            info!("Rate limited; pausing lookups for {}s", pause.as_secs());
            *current = Some(until);
        }
    }

    /// End of the current pause, if one is still in effect.
    pub fn paused_until(&self) -> Option<Instant> {
        let mut current = self.lock();
        match *current {
            Some(until) if until > Instant::now() => Some(until),
            Some(_) => {
                *current = None;
                None
            }
            None => None,
        }
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> MutexGuard<'_, Option<Instant>> {
        match self.until.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

struct PendingRequest {
    identifier: Identifier,
    reply: oneshot::Sender<Option<String>>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PendingRequest>,
    active: usize,
    draining: bool,
    last_dispatch: Option<Instant>,
}

enum Step {
    /// Request plus the cache epoch it was dequeued under.
    Dispatch(PendingRequest, u64),
    Wait(Duration),
    Idle,
}

#[derive(Clone)]
pub struct RequestScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    resolver: Arc<dyn LocationResolver>,
    cache: LocationCache,
    rate_limits: RateLimitState,
    queue: Mutex<QueueState>,
    dispatched: AtomicU64,
    min_interval: Duration,
    max_concurrent: usize,
    recheck_cap: Duration,
    retry_delay: Duration,
}

impl RequestScheduler {
    pub fn new(
        resolver: Arc<dyn LocationResolver>,
        cache: LocationCache,
        rate_limits: RateLimitState,
        config: &EnricherConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                resolver,
                cache,
                rate_limits,
                queue: Mutex::new(QueueState::default()),
                dispatched: AtomicU64::new(0),
                min_interval: config.min_request_interval(),
                max_concurrent: config.max_concurrent_requests.max(1),
                recheck_cap: config.rate_limit_recheck_cap(),
                retry_delay: config.drain_retry_delay(),
            }),
        }
    }

    /// Queue a lookup and wait for its result.
    pub async fn schedule(&self, identifier: &str) -> Option<String> {
        let (reply, response) = oneshot::channel();
        self.inner.lock().pending.push_back(PendingRequest {
            identifier: identifier.to_string(),
            reply,
        });
        SchedulerInner::kick(&self.inner);
        response.await.unwrap_or(None)
    }

    pub fn rate_limits(&self) -> &RateLimitState {
        &self.inner.rate_limits
    }

    /// Requests waiting for a dispatch slot.
    pub fn pending(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock().active
    }

    /// Total lookups handed to the resolver.
    pub fn dispatched(&self) -> u64 {
        self.inner.dispatched.load(Ordering::Relaxed)
    }

    /// Drop every queued lookup. Waiting callers receive `None`; lookups
    /// already in flight finish but no longer reach a cache cleared after
    /// they started.
    pub fn reset(&self) -> usize {
        let dropped: Vec<_> = self.inner.lock().pending.drain(..).collect();
        if !dropped.is_empty() {
            debug!("Dropped {} queued lookups", dropped.len());
        }
        dropped.len()
    }
}

impl SchedulerInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start a drain loop unless one is already running.
    fn kick(inner: &Arc<Self>) {
        {
            let mut queue = inner.lock();
            if queue.draining {
                return;
            }
            queue.draining = true;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            inner.lock().draining = false;
            return;
        };
        handle.spawn(Arc::clone(inner).drain());
    }

    async fn drain(self: Arc<Self>) {
        loop {
            if let Some(until) = self.rate_limits.paused_until() {
                let wait = until
                    .saturating_duration_since(Instant::now())
                    .min(self.recheck_cap);
                debug!("Drain paused by rate limit for {}ms", wait.as_millis());
                sleep(wait).await;
                continue;
            }

            match self.next_step() {
                Step::Dispatch(request, epoch) => {
                    self.dispatched.fetch_add(1, Ordering::Relaxed);
                    tokio::spawn(Arc::clone(&self).dispatch(request, epoch));
                }
                Step::Wait(wait) => sleep(wait).await,
                Step::Idle => return,
            }
        }
    }

    fn next_step(&self) -> Step {
        let mut queue = self.lock();

        // Callers that went away no longer need a lookup.
        while queue
            .pending
            .front()
            .is_some_and(|request| request.reply.is_closed())
        {
            queue.pending.pop_front();
        }

        if queue.pending.is_empty() || queue.active >= self.max_concurrent {
            queue.draining = false;
            return Step::Idle;
        }

        let now = Instant::now();
        if let Some(last) = queue.last_dispatch {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.min_interval {
                return Step::Wait(self.min_interval - elapsed);
            }
        }

        match queue.pending.pop_front() {
            Some(request) => {
                queue.active += 1;
                queue.last_dispatch = Some(now);
                Step::Dispatch(request, self.cache.epoch())
            }
            None => {
                queue.draining = false;
                Step::Idle
            }
        }
    }

    async fn dispatch(self: Arc<Self>, request: PendingRequest, epoch: u64) {
        let _slot = ActiveSlot {
            inner: Arc::clone(&self),
        };
        debug!("Resolving location for {}", request.identifier);
        let resolution = self.resolver.resolve(&request.identifier).await;
        if resolution.is_rate_limited {
            debug!("Rate-limited response for {}; not caching", request.identifier);
        } else {
            self.cache.put_if_epoch(epoch, &request.identifier, resolution.location.clone());
        }
        let _ = request.reply.send(resolution.location);
    }
}

/// Releases a concurrency slot and re-arms the drain loop, whatever way the
/// dispatch ends.
struct ActiveSlot {
    inner: Arc<SchedulerInner>,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        {
            let mut queue = self.inner.lock();
            queue.active = queue.active.saturating_sub(1);
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        handle.spawn(async move {
            sleep(inner.retry_delay).await;
            SchedulerInner::kick(&inner);
        });
    }
}
