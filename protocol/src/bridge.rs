use serde::Deserialize;
use serde::Serialize;

use crate::Identifier;

/// Messages exchanged with the page-context peer.
///
/// Both directions share one envelope because the window-scoped channel
/// delivers every post to every listener, including the sender itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BridgeMessage {
    /// Ask the page context to resolve `identifier`.
    #[serde(rename_all = "camelCase")]
    FetchLocation {
        identifier: Identifier,
        correlation_id: String,
    },

    /// Answer to a [`BridgeMessage::FetchLocation`] with the same identifier
    /// and correlation id.
    #[serde(rename_all = "camelCase")]
    LocationResponse {
        identifier: Identifier,
        correlation_id: String,
        #[serde(default)]
        location: Option<String>,
        #[serde(default)]
        is_rate_limited: bool,
    },

    /// Unsolicited rate-limit notification. `reset_time` is a Unix timestamp
    /// in seconds, `wait_time` a suggested pause in milliseconds.
    #[serde(rename_all = "camelCase")]
    RateLimitInfo {
        #[serde(default)]
        reset_time: i64,
        #[serde(default)]
        wait_time: u64,
    },
}

impl BridgeMessage {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
