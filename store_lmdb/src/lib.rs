//! LMDB storage backend for the spammer database.
//!
//! Implements [`beacon_store::SpammerStore`] using the `heed` LMDB bindings.
//! Records live in a single named database inside one environment, keyed by
//! `user_id` and stored as JSON.

pub mod environment;
pub mod error;
pub mod spammer;

pub use environment::LmdbEnvironment;
pub use error::LmdbError;
pub use spammer::LmdbSpammerStore;
