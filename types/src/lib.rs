//! Fundamental types for the beacon network.
//!
//! This crate defines the values shared across every other crate in the
//! workspace: spammer records, global-unban events, peer addresses and the clock
//! abstraction used for replay windows and rate limiting.

pub mod gunban;
pub mod peer;
pub mod record;
pub mod time;

pub use gunban::{GunbanEvent, LEGACY_SOURCE};
pub use peer::PeerAddress;
pub use record::{
    deserialize_optional_user_id, deserialize_user_id, empty_object, SpammerRecord,
};
pub use time::{unix_now, Clock, SystemClock};
