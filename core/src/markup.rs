//! Host-site markup assumptions.
//!
//! The extractor and annotator only depend on the heuristic chain; every
//! concrete selector and reserved route lives here so a markup change on the
//! host site is a configuration change.

use serde::Deserialize;
use serde::Serialize;

use crate::dom::Element;

/// Attribute carried by every element this crate inserts.
pub const MARKER_ATTR: &str = "data-geoflag";
pub const FLAG_MARKER: &str = "flag";
pub const PLACEHOLDER_MARKER: &str = "loading";
pub const TOOLTIP_MARKER: &str = "tooltip";

/// Longest handle the host site allows.
pub const MAX_IDENTIFIER_LEN: usize = 19;

/// A single-element matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    Tag(String),
    Class(String),
    Attr { name: String, value: String },
}

impl Selector {
    pub fn test_id(value: &str) -> Self {
        Selector::Attr {
            name: "data-testid".to_string(),
            value: value.to_string(),
        }
    }

    pub fn matches(&self, element: &Element) -> bool {
        match self {
            Selector::Tag(tag) => element.tag.eq_ignore_ascii_case(tag),
            Selector::Class(class) => element.has_class(class),
            Selector::Attr { name, value } => element.attr(name) == Some(value.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Markup {
    /// Author blocks of individual posts.
    #[serde(default = "default_post_containers")]
    pub post_containers: Vec<Selector>,

    /// Header block on a profile page.
    #[serde(default = "default_profile_containers")]
    pub profile_containers: Vec<Selector>,

    /// Nested block holding display name and handle.
    #[serde(default = "default_name_containers")]
    pub name_containers: Vec<Selector>,

    /// Badge rendered next to verified display names.
    #[serde(default = "default_verified_badge")]
    pub verified_badge: Selector,

    /// First path segments that are site routes rather than handles.
    #[serde(default = "default_reserved_routes")]
    pub reserved_routes: Vec<String>,
}

impl Default for Markup {
    fn default() -> Self {
        Self {
            post_containers: default_post_containers(),
            profile_containers: default_profile_containers(),
            name_containers: default_name_containers(),
            verified_badge: default_verified_badge(),
            reserved_routes: default_reserved_routes(),
        }
    }
}

impl Markup {
    pub fn is_name_container(&self, element: &Element) -> bool {
        self.name_containers.iter().any(|s| s.matches(element))
    }

    pub fn is_scan_root(&self, element: &Element) -> bool {
        self.post_containers
            .iter()
            .chain(self.profile_containers.iter())
            .any(|s| s.matches(element))
    }

    pub fn is_reserved(&self, segment: &str) -> bool {
        self.reserved_routes
            .iter()
            .any(|route| route.eq_ignore_ascii_case(segment))
    }
}

fn default_post_containers() -> Vec<Selector> {
    vec![Selector::test_id("tweet")]
}

fn default_profile_containers() -> Vec<Selector> {
    vec![Selector::test_id("UserProfileHeader_Items"), Selector::test_id("UserName")]
}

fn default_name_containers() -> Vec<Selector> {
    vec![Selector::test_id("User-Name"), Selector::test_id("UserName")]
}

fn default_verified_badge() -> Selector {
    Selector::test_id("icon-verified")
}

fn default_reserved_routes() -> Vec<String> {
    [
        "home",
        "explore",
        "search",
        "notifications",
        "messages",
        "i",
        "settings",
        "compose",
        "login",
        "logout",
        "signup",
        "tos",
        "privacy",
        "hashtag",
        "intent",
        "share",
        "bookmarks",
        "lists",
        "communities",
        "premium",
        "jobs",
        "grok",
        "topics",
        "followers",
        "following",
        "verified_followers",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Whether `candidate` is shaped like a handle: 1–19 word characters.
pub fn is_plausible_identifier(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate.len() <= MAX_IDENTIFIER_LEN
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// First segment of a page-relative link, e.g. `/alice/status/1` → `alice`.
pub fn first_path_segment(href: &str) -> Option<&str> {
    let path = href.strip_prefix('/')?;
    if path.starts_with('/') {
        // protocol-relative URL
        return None;
    }
    let end = path.find(['/', '?', '#']).unwrap_or(path.len());
    let segment = &path[..end];
    (!segment.is_empty()).then_some(segment)
}
