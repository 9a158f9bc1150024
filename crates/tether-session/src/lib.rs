//! Client-side session state for Tether.
//!
//! Everything the engine remembers about one slot lives here:
//!
//! 1. **Identity**: where to connect and as whom ([`ConnectionInfo`]),
//!    and what the server assigned ([`SlotIdentity`], [`SlotConfig`]).
//! 2. **Sync ledger**: the item cursor, the checked-location set and
//!    the pending outbound checks ([`SyncLedger`]).
//! 3. **Death link**: the opt-in flag and echo suppression
//!    ([`DeathLinkState`]).
//! 4. **Names**: slot and item display names ([`NameRegistry`]).
//!
//! # How it fits in the stack
//!
//! ```text
//! Engine (above)  ← owns exactly one Session, mutates it during dispatch
//!     ↕
//! Session Layer (this crate)  ← plain data, no I/O
//!     ↕
//! Protocol Layer (below)  ← provides LocationId, NetworkPlayer, ...
//! ```

mod death_link;
mod error;
mod ledger;
mod names;
mod session;

pub use death_link::{unix_time, DeathLinkState, DeathNotice, DEATH_LINK_TAG};
pub use error::SessionError;
pub use ledger::{SyncLedger, SyncSnapshot};
pub use names::NameRegistry;
pub use session::{ConnectionInfo, Session, SlotConfig, SlotIdentity};
