//! Spammer record storage trait.

use std::sync::Arc;

use beacon_types::SpammerRecord;

use crate::StoreError;

/// Key-value storage of [`SpammerRecord`]s keyed by `user_id`.
///
/// Calls are blocking; async callers run them on the blocking pool.
/// Implementations must give read-your-writes within one process.
pub trait SpammerStore: Send + Sync {
    /// Fetch the stored record for `user_id`.
    fn get(&self, user_id: &str) -> Result<Option<SpammerRecord>, StoreError>;

    /// Insert or replace the record for `record.user_id`.
    fn put(&self, record: &SpammerRecord) -> Result<(), StoreError>;

    /// Remove the record for `user_id`. Returns whether one existed.
    fn delete(&self, user_id: &str) -> Result<bool, StoreError>;
}

impl<S: SpammerStore + ?Sized> SpammerStore for Arc<S> {
    fn get(&self, user_id: &str) -> Result<Option<SpammerRecord>, StoreError> {
        (**self).get(user_id)
    }

    fn put(&self, record: &SpammerRecord) -> Result<(), StoreError> {
        (**self).put(record)
    }

    fn delete(&self, user_id: &str) -> Result<bool, StoreError> {
        (**self).delete(user_id)
    }
}
