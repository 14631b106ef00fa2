/*!
# Geoflag core

Annotates account handles on a social-media page with the flag of the
account's self-reported country.

## Pipeline

- **Scanner**: discovers post-author and profile-header containers on node
  insertion and on a periodic tick
- **Extractor**: derives the account handle from a container subtree
- **Annotator**: shows a loading placeholder, then renders the flag and a
  hover tooltip, tracking per-container state
- **Scheduler**: spaces, bounds, and pauses lookups behind a rate limit
- **Bridge**: correlated request/response channel to the page-context peer
- **Cache**: 30-day location cache mirrored to durable storage
- **Controller**: persisted on/off switch that can revert every annotation

## Example

```rust,no_run
use geoflag_core::{ChannelTransport, Document, Enricher, EnricherConfig, MemoryStore, Page};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (transport, _outbound) = ChannelTransport::new(64);
    let enricher = Enricher::start(
        EnricherConfig::default(),
        Page::new(Document::new()),
        Arc::new(MemoryStore::new()),
        Arc::new(transport),
    )
    .await?;

    let (_inbound_tx, inbound) = mpsc::channel(64);
    let (_control_tx, control) = mpsc::channel(8);
    enricher.run(inbound, control, CancellationToken::new()).await;
    Ok(())
}
```
*/

mod annotator;
mod bridge;
mod cache;
mod config;
mod controller;
mod dom;
mod enricher;
mod error;
mod extractor;
pub mod markup;
mod scanner;
mod scheduler;
mod stats;
mod storage;

pub use annotator::AnnotationState;
pub use annotator::FlagAnnotator;
pub use annotator::RevertSummary;
pub use bridge::BridgeChannel;
pub use bridge::BridgeTransport;
pub use bridge::ChannelTransport;
pub use bridge::Resolution;
pub use cache::LocationCache;
pub use cache::LocationRecord;
pub use config::EnricherConfig;
pub use controller::EnableController;
pub use controller::ToggleOutcome;
pub use dom::Document;
pub use dom::Element;
pub use dom::NodeId;
pub use dom::NodeKind;
pub use dom::Page;
pub use enricher::Enricher;
pub use error::BridgeError;
pub use error::ConfigError;
pub use error::DomError;
pub use error::EnricherError;
pub use error::Result;
pub use error::StorageError;
pub use extractor::extract_identifier;
pub use markup::Markup;
pub use markup::Selector;
pub use scanner::DomScanner;
pub use scanner::ScanTask;
pub use scheduler::LocationResolver;
pub use scheduler::RateLimitState;
pub use scheduler::RequestScheduler;
pub use stats::EnricherStats;
pub use storage::FileStore;
pub use storage::KeyValueStore;
pub use storage::MemoryStore;

pub use geoflag_protocol as protocol;
