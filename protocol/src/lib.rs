//! Wire protocol: stream framing, message normalization, handshake construction.

pub mod codec;
pub mod error;
pub mod handshake;
pub mod nested;
pub mod version;

pub use codec::{encode, JsonStreamDecoder, MAX_MESSAGE_SIZE};
pub use error::ProtocolError;
pub use handshake::{handshake_message, AuthChallenge};
pub use nested::decode_nested_json;
pub use version::NODE_VERSION;
