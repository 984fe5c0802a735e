//! Peer networking layer for the beacon spammer-database node.
//!
//! Security (admission, authentication, signing, hot-reloadable policy), the
//! peer registry, broadcast fan-out and content-hash deduplication. Nothing
//! in this crate owns a socket; the node crate drives connections through it.

pub mod broadcast;
pub mod dedup;
pub mod error;
pub mod registry;
pub mod security;

pub use broadcast::{broadcast_frame, BroadcastResult};
pub use dedup::{ContentHash, MessageDedup, DEFAULT_DEDUP_CAPACITY};
pub use error::{NetworkError, SecurityError};
pub use registry::{
    ConnectionId, Direction, PeerEntry, PeerInfo, PeerRegistry, UuidClaim, MAX_DISCOVERED_PEERS,
};
pub use security::{
    FilePolicySource, PolicyRevision, PolicySource, Reason, SecurityEvent, SecurityEventKind,
    SecurityManager, SecurityPolicy, SecurityStats, Severity, StaticPolicySource, Verdict,
    SECRET_KEY_ENV,
};
