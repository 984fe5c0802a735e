//! Peer-network security: admission control, handshake authentication,
//! message signing and hot-reloadable policy.

pub mod events;
pub mod manager;
pub mod policy;
pub mod rate;
pub mod source;
pub mod verdict;

pub use events::{EventLog, SecurityEvent, SecurityEventKind, Severity, SECURITY_EVENT_CAPACITY};
pub use manager::{SecurityManager, SecurityStats};
pub use policy::{SecurityPolicy, AUTH_REPLAY_WINDOW_SECS, RATE_WINDOW_SECS};
pub use rate::RateWindow;
pub use source::{FilePolicySource, PolicyRevision, PolicySource, StaticPolicySource, SECRET_KEY_ENV};
pub use verdict::{Reason, Verdict};
