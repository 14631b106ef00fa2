//! Per-container flag rendering.
//!
//! Each container moves through `unset → Processing → (Done | Failed)`, with a
//! transient `Waiting` while another container holds the in-flight lookup for
//! the same identifier. State lives in an identity-keyed map owned by the
//! annotator; inserted elements carry [`MARKER_ATTR`] so they can be found and
//! reverted.

use geoflag_protocol::CountryTable;
use geoflag_protocol::FlagImage;
use geoflag_protocol::Identifier;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::debug;

use crate::cache::LocationCache;
use crate::config::EnricherConfig;
use crate::dom::Document;
use crate::dom::NodeId;
use crate::dom::Page;
use crate::error::DomError;
use crate::markup::FLAG_MARKER;
use crate::markup::MARKER_ATTR;
use crate::markup::Markup;
use crate::markup::PLACEHOLDER_MARKER;
use crate::markup::TOOLTIP_MARKER;
use crate::markup::first_path_segment;
use crate::scheduler::RequestScheduler;
use crate::stats::Counters;

const FADING_ATTR: &str = "data-fading";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationState {
    Processing,
    Waiting,
    Done,
    Failed,
}

impl AnnotationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AnnotationState::Done | AnnotationState::Failed)
    }
}

/// What a global revert removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevertSummary {
    pub flags: usize,
    pub placeholders: usize,
    pub tooltips: usize,
    pub markers: usize,
}

enum Entry {
    Skip(AnnotationState),
    Wait,
    Cached(String),
    Claimed,
}

#[derive(Clone)]
pub struct FlagAnnotator {
    inner: Arc<AnnotatorInner>,
}

struct AnnotatorInner {
    page: Page,
    cache: LocationCache,
    scheduler: RequestScheduler,
    countries: CountryTable,
    markup: Markup,
    states: Mutex<HashMap<NodeId, AnnotationState>>,
    in_progress: Mutex<HashSet<Identifier>>,
    tooltips: Mutex<HashMap<NodeId, NodeId>>,
    generation: AtomicU64,
    counters: Arc<Counters>,
    waiter_retry: Duration,
    tooltip_fade: Duration,
}

impl FlagAnnotator {
    pub fn new(
        page: Page,
        cache: LocationCache,
        scheduler: RequestScheduler,
        countries: CountryTable,
        config: &EnricherConfig,
    ) -> Self {
        Self::with_counters(page, cache, scheduler, countries, config, Arc::default())
    }

    pub(crate) fn with_counters(
        page: Page,
        cache: LocationCache,
        scheduler: RequestScheduler,
        countries: CountryTable,
        config: &EnricherConfig,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            inner: Arc::new(AnnotatorInner {
                page,
                cache,
                scheduler,
                countries,
                markup: config.markup.clone(),
                states: Mutex::new(HashMap::new()),
                in_progress: Mutex::new(HashSet::new()),
                tooltips: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                counters,
                waiter_retry: config.waiter_retry(),
                tooltip_fade: config.tooltip_fade(),
            }),
        }
    }

    pub fn state_of(&self, node: NodeId) -> Option<AnnotationState> {
        self.inner.states().get(&node).copied()
    }

    /// Whether the scanner should leave `node` alone.
    pub fn is_claimed(&self, node: NodeId) -> bool {
        self.state_of(node).is_some()
    }

    pub fn is_in_progress(&self, identifier: &str) -> bool {
        self.inner.in_progress().contains(identifier)
    }

    /// Annotate `container` with the flag for `identifier`, returning the state
    /// the container is left in by this call.
    pub async fn annotate(&self, container: NodeId, identifier: &str) -> AnnotationState {
        let inner = &self.inner;
        let generation = inner.generation();
        let mut resumed = false;

        let location = loop {
            match inner.enter(container, identifier, resumed) {
                Entry::Skip(state) => return state,
                Entry::Wait => {
                    debug!("Waiting on in-flight lookup for {identifier}");
                    tokio::time::sleep(inner.waiter_retry).await;
                    if inner.generation() != generation {
                        return AnnotationState::Waiting;
                    }
                    resumed = true;
                }
                Entry::Cached(location) => {
                    inner.counters.cache_hit();
                    break Some(location);
                }
                Entry::Claimed => {
                    let _claim = InProgressClaim {
                        inner: Arc::clone(inner),
                        identifier: identifier.to_string(),
                        generation,
                    };
                    inner.counters.lookup();
                    let placeholder = inner.insert_placeholder(container, identifier, generation);
                    let location = inner.scheduler.schedule(identifier).await;
                    if let Some(placeholder) = placeholder {
                        inner.page.write(|doc| {
                            let _ = doc.remove(placeholder);
                        });
                    }
                    if inner.generation() != generation {
                        return AnnotationState::Processing;
                    }
                    break location;
                }
            }
        };

        inner.render(container, identifier, location, generation)
    }

    /// Show the tooltip for `flag`, creating it on first hover.
    pub fn pointer_enter(&self, flag: NodeId) -> Option<NodeId> {
        let inner = &self.inner;
        inner.page.write(|doc| {
            let mut tooltips = inner.tooltips();
            if let Some(tooltip) = tooltips.get(&flag).copied()
                && doc.is_connected(tooltip)
            {
                doc.remove_attr(tooltip, FADING_ATTR);
                return Some(tooltip);
            }
            let location = doc.attr(flag, "data-location")?.to_string();
            if !doc.is_connected(flag) {
                return None;
            }
            let tooltip = doc.create_element("div");
            let attrs = [
                (MARKER_ATTR, TOOLTIP_MARKER),
                ("role", "tooltip"),
                ("class", "geoflag-tooltip"),
                ("style", "position: fixed; transform: translate(-50%, -100%);"),
            ];
            for (name, value) in attrs {
                doc.set_attr(tooltip, name, value).ok()?;
            }
            let anchor = doc.attr(flag, "data-identifier").unwrap_or_default().to_string();
            doc.set_attr(tooltip, "data-anchor", &anchor).ok()?;
            let text = doc.create_text(&location);
            doc.append_child(tooltip, text).ok()?;
            let body = doc.body();
            doc.append_child(body, tooltip).ok()?;
            tooltips.insert(flag, tooltip);
            Some(tooltip)
        })
    }

    /// Fade out and remove the tooltip for `flag`.
    pub fn pointer_leave(&self, flag: NodeId) {
        let inner = &self.inner;
        let Some(tooltip) = inner.tooltips().get(&flag).copied() else {
            return;
        };
        inner.page.write(|doc| {
            let _ = doc.set_attr(tooltip, FADING_ATTR, "true");
        });
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            inner.remove_faded_tooltip(flag, tooltip);
            return;
        };
        let inner = Arc::clone(inner);
        handle.spawn(async move {
            tokio::time::sleep(inner.tooltip_fade).await;
            inner.remove_faded_tooltip(flag, tooltip);
        });
    }

    /// Remove every inserted element and forget all state.
    pub fn revert_all(&self) -> RevertSummary {
        let inner = &self.inner;
        inner.page.write(|doc| {
            inner.generation.fetch_add(1, Ordering::SeqCst);
            let mut summary = RevertSummary::default();
            let inserted = doc.select(doc.body(), |el| el.has_attr(MARKER_ATTR));
            for node in inserted {
                match doc.attr(node, MARKER_ATTR) {
                    Some(FLAG_MARKER) => summary.flags += 1,
                    Some(PLACEHOLDER_MARKER) => summary.placeholders += 1,
                    Some(TOOLTIP_MARKER) => summary.tooltips += 1,
                    _ => {}
                }
                let _ = doc.remove(node);
            }
            let mut states = inner.states();
            summary.markers = states.len();
            states.clear();
            inner.in_progress().clear();
            inner.tooltips().clear();
            debug!("Reverted annotations: {summary:?}");
            summary
        })
    }

    /// Forget terminal state of containers that left the document.
    pub fn prune_detached(&self) -> usize {
        let inner = &self.inner;
        inner.page.read(|doc| {
            let mut states = inner.states();
            let before = states.len();
            states.retain(|node, state| !state.is_terminal() || doc.is_connected(*node));
            inner
                .tooltips()
                .retain(|flag, tooltip| doc.is_connected(*flag) || doc.is_connected(*tooltip));
            before - states.len()
        })
    }
}

impl AnnotatorInner {
    fn states(&self) -> MutexGuard<'_, HashMap<NodeId, AnnotationState>> {
        match self.states.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn in_progress(&self) -> MutexGuard<'_, HashSet<Identifier>> {
        match self.in_progress.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn tooltips(&self) -> MutexGuard<'_, HashMap<NodeId, NodeId>> {
        match self.tooltips.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn enter(&self, container: NodeId, identifier: &str, resumed: bool) -> Entry {
        let mut states = self.states();
        match states.get(&container).copied() {
            Some(state) if state.is_terminal() => return Entry::Skip(state),
            Some(AnnotationState::Processing) => return Entry::Skip(AnnotationState::Processing),
            Some(AnnotationState::Waiting) if !resumed => {
                return Entry::Skip(AnnotationState::Waiting);
            }
            _ => {}
        }

        let mut in_progress = self.in_progress();
        if in_progress.contains(identifier) {
            states.insert(container, AnnotationState::Waiting);
            return Entry::Wait;
        }
        states.insert(container, AnnotationState::Processing);
        match self.cache.get(identifier) {
            Some(location) => Entry::Cached(location),
            None => {
                in_progress.insert(identifier.to_string());
                Entry::Claimed
            }
        }
    }

    /// Move a live container to a terminal state; never downgrades.
    fn finish(&self, container: NodeId, state: AnnotationState) {
        let mut states = self.states();
        if let Some(current) = states.get_mut(&container)
            && !current.is_terminal()
        {
            *current = state;
        }
    }

    fn insert_placeholder(
        &self,
        container: NodeId,
        identifier: &str,
        generation: u64,
    ) -> Option<NodeId> {
        self.page.write(|doc| {
            if self.generation() != generation || !doc.is_connected(container) {
                return None;
            }
            if let Some(existing) = find_marked(doc, container, PLACEHOLDER_MARKER) {
                return Some(existing);
            }
            let placeholder = doc.create_element("span");
            doc.set_attr(placeholder, MARKER_ATTR, PLACEHOLDER_MARKER).ok()?;
            doc.set_attr(placeholder, "class", "geoflag-shimmer").ok()?;
            doc.set_attr(placeholder, "aria-label", "Loading location").ok()?;
            let placed = find_handle(doc, container, identifier, &self.markup)
                .is_some_and(|handle| doc.insert_before(handle, placeholder).is_ok());
            if !placed {
                doc.append_child(container, placeholder).ok()?;
            }
            Some(placeholder)
        })
    }

    fn render(
        &self,
        container: NodeId,
        identifier: &str,
        location: Option<String>,
        generation: u64,
    ) -> AnnotationState {
        let outcome: Result<bool, String> = match location {
            None => Err(format!("no location for {identifier}")),
            Some(location) => match self.countries.code_for(&location) {
                None => Err(format!("no country code for {identifier} ({location})")),
                Some(code) => {
                    let flag = FlagImage::new(code);
                    self.page.write(|doc| {
                        if self.generation() != generation {
                            return Ok(false);
                        }
                        insert_flag(doc, container, identifier, &location, &flag, &self.markup)
                            .map(|_| true)
                            .map_err(|err| format!("cannot place flag for {identifier}: {err}"))
                    })
                }
            },
        };

        match outcome {
            Ok(true) => {
                self.finish(container, AnnotationState::Done);
                self.counters.flag_rendered();
                AnnotationState::Done
            }
            // Reverted while rendering.
            Ok(false) => AnnotationState::Processing,
            Err(reason) => {
                debug!("Annotation failed: {reason}");
                self.finish(container, AnnotationState::Failed);
                self.counters.failure();
                AnnotationState::Failed
            }
        }
    }

    fn remove_faded_tooltip(&self, flag: NodeId, tooltip: NodeId) {
        self.page.write(|doc| {
            let mut tooltips = self.tooltips();
            if tooltips.get(&flag) != Some(&tooltip) || doc.attr(tooltip, FADING_ATTR).is_none() {
                return;
            }
            let _ = doc.remove(tooltip);
            tooltips.remove(&flag);
        });
    }
}

/// Releases the identifier from the in-progress set when the lookup ends,
/// unless a revert already reset the set.
struct InProgressClaim {
    inner: Arc<AnnotatorInner>,
    identifier: Identifier,
    generation: u64,
}

impl Drop for InProgressClaim {
    fn drop(&mut self) {
        if self.inner.generation() == self.generation {
            self.inner.in_progress().remove(&self.identifier);
        }
    }
}

fn find_marked(doc: &Document, container: NodeId, marker: &str) -> Option<NodeId> {
    doc.select(container, |el| el.attr(MARKER_ATTR) == Some(marker))
        .into_iter()
        .next()
}

fn is_handle_text(text: &str, identifier: &str) -> bool {
    text.trim()
        .strip_prefix('@')
        .is_some_and(|handle| handle.eq_ignore_ascii_case(identifier))
}

fn links_to(doc: &Document, anchor: NodeId, identifier: &str) -> bool {
    doc.attr(anchor, "href")
        .and_then(first_path_segment)
        .is_some_and(|segment| segment.eq_ignore_ascii_case(identifier))
}

/// Node immediately preceded by the flag: the `@handle` text, located with
/// progressively looser heuristics.
fn find_handle(
    doc: &Document,
    container: NodeId,
    identifier: &str,
    markup: &Markup,
) -> Option<NodeId> {
    let ours = |node: NodeId| doc.closest(node, |el| el.has_attr(MARKER_ATTR)).is_some();
    let anchors: Vec<NodeId> = doc
        .select(container, |el| el.is("a"))
        .into_iter()
        .filter(|anchor| links_to(doc, *anchor, identifier))
        .collect();

    // 1. A link to the account whose text is exactly `@handle`.
    for anchor in &anchors {
        if is_handle_text(&doc.text_content(*anchor), identifier) {
            let text_node = doc
                .subtree(*anchor)
                .into_iter()
                .find(|node| doc.text(*node).is_some_and(|t| is_handle_text(t, identifier)));
            return Some(text_node.unwrap_or(*anchor));
        }
    }

    // 2. Any `@handle` text node, linked or not.
    let text_node = doc.subtree(container).into_iter().find(|node| {
        !ours(*node) && doc.text(*node).is_some_and(|t| is_handle_text(t, identifier))
    });
    if text_node.is_some() {
        return text_node;
    }

    // 3. A link to the account that is not the display-name link (which
    //    carries the verified badge and no `@`).
    anchors.into_iter().find(|anchor| {
        doc.select(*anchor, |el| markup.verified_badge.matches(el)).is_empty()
            && doc.text_content(*anchor).trim_start().starts_with('@')
    })
}

/// First element of the name block, which renders the display name.
fn display_name_block(doc: &Document, container: NodeId, markup: &Markup) -> Option<NodeId> {
    let block = doc
        .select(container, |el| markup.is_name_container(el))
        .into_iter()
        .next()?;
    doc.children(block)
        .iter()
        .copied()
        .find(|child| doc.element(*child).is_some())
}

fn insert_flag(
    doc: &mut Document,
    container: NodeId,
    identifier: &str,
    location: &str,
    flag: &FlagImage,
    markup: &Markup,
) -> Result<NodeId, DomError> {
    if !doc.is_connected(container) {
        return Err(DomError::Detached(container));
    }
    if let Some(existing) = find_marked(doc, container, FLAG_MARKER) {
        return Ok(existing);
    }

    let img = doc.create_element("img");
    let alt = flag.country_code.to_ascii_uppercase();
    let attrs = [
        (MARKER_ATTR, FLAG_MARKER),
        ("class", "geoflag-flag"),
        ("src", flag.src.as_str()),
        ("srcset", flag.srcset.as_str()),
        ("alt", alt.as_str()),
        ("width", "20"),
        ("height", "15"),
        ("loading", "lazy"),
        ("data-location", location),
        ("data-identifier", identifier),
    ];
    for (name, value) in attrs {
        doc.set_attr(img, name, value)?;
    }

    if let Some(handle) = find_handle(doc, container, identifier, markup)
        && doc.insert_before(handle, img).is_ok()
    {
        return Ok(img);
    }
    if let Some(name) = display_name_block(doc, container, markup)
        && doc.insert_after(name, img).is_ok()
    {
        return Ok(img);
    }
    doc.append_child(container, img)?;
    Ok(img)
}
