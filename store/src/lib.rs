//! Abstract storage trait for the spammer database.
//!
//! Every storage backend (LMDB, in-memory for testing) implements
//! [`SpammerStore`]. The rest of the codebase depends only on the trait.

pub mod error;
pub mod spammer;

pub use error::StoreError;
pub use spammer::SpammerStore;
