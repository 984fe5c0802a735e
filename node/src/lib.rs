//! Beacon node: the peer protocol state machine, gossip propagation and
//! global unban for the distributed spammer database.
//!
//! The node:
//! - Accepts and dials peer connections and drives each through the handshake
//! - Screens every connection and message through the security manager
//! - Stores and re-broadcasts spammer records it has not seen before
//! - Applies and relays gunban retractions without echoing them back
//! - Answers and issues `check_p2p_data` queries
//! - Reconnects to bootstrap and discovered peers when it loses them all

pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod gossip;
pub mod metrics;
pub mod node;
pub mod peer_connector;
pub mod pending;
pub mod query;
pub mod reconnect;
pub mod session;
pub mod shutdown;
pub mod tracing_spans;

pub use config::NodeConfig;
pub use connection::{ConnState, Connection, Flow};
pub use context::{NodeContext, NodeSettings};
pub use error::{NodeError, RequestError};
pub use gossip::{GunbanOutcome, RecordOutcome};
pub use metrics::NodeMetrics;
pub use node::BeaconNode;
pub use peer_connector::connect_to_peer;
pub use pending::{PendingRequests, PendingResponse};
pub use reconnect::ReconnectPolicy;
pub use shutdown::{ShutdownController, ShutdownSignal};
