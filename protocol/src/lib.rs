//! Wire types shared between the enrichment pipeline, the page-context bridge
//! peer, and the control surface.
//!
//! Everything in this crate is plain data: message envelopes exchanged over the
//! window-scoped bridge, the toggle control message, the persisted cache blob
//! layout, and the location → flag mapping used when rendering.

pub mod bridge;
pub mod control;
pub mod country;
pub mod flag;
pub mod storage;

pub use bridge::BridgeMessage;
pub use control::ControlMessage;
pub use country::CountryTable;
pub use flag::FlagImage;
pub use storage::PersistedLocation;

/// Canonical short handle naming an account on the host site.
pub type Identifier = String;
