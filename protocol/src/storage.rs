//! Durable storage layout.

use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;

use crate::Identifier;

/// Key holding the serialized location cache.
pub const LOCATION_CACHE_KEY: &str = "location-cache-blob";

/// Key holding the persisted enabled flag.
pub const ENABLED_KEY: &str = "extension-enabled";

/// One persisted cache entry. Timestamps are Unix epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedLocation {
    #[serde(default)]
    pub location: Option<String>,
    pub expiry: i64,
    pub cached_at: i64,
}

impl PersistedLocation {
    /// Whether the entry is worth loading back into memory at `now_ms`.
    pub fn is_live(&self, now_ms: i64) -> bool {
        self.location.is_some() && self.expiry > now_ms
    }
}

/// The full blob stored under [`LOCATION_CACHE_KEY`].
pub type PersistedCache = HashMap<Identifier, PersistedLocation>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_and_expired_entries_are_not_live() {
        let live = PersistedLocation {
            location: Some("France".to_string()),
            expiry: 2_000,
            cached_at: 1_000,
        };
        assert!(live.is_live(1_500));
        assert!(!live.is_live(2_000));

        let null = PersistedLocation {
            location: None,
            ..live
        };
        assert!(!null.is_live(1_500));
    }

    #[test]
    fn blob_uses_camel_case_fields() {
        let blob: PersistedCache = serde_json::from_str(
            r#"{"alice":{"location":"Paris, France","expiry":10,"cachedAt":5}}"#,
        )
        .expect("parse");
        assert_eq!(blob["alice"].cached_at, 5);
    }
}
