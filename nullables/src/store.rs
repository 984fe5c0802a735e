//! Nullable store: thread-safe in-memory storage for testing.

use beacon_store::{SpammerStore, StoreError};
use beacon_types::SpammerRecord;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// An in-memory spammer store for testing.
///
/// Counts writes and deletes so tests can assert that duplicate gossip
/// never reaches storage. Can be switched into a failing mode to exercise
/// storage-error handling.
#[derive(Default)]
pub struct NullStore {
    records: Mutex<HashMap<String, SpammerRecord>>,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    failing: AtomicBool,
}

impl NullStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with records without counting them as writes.
    pub fn with_records(records: impl IntoIterator<Item = SpammerRecord>) -> Self {
        let store = Self::new();
        {
            let mut map = store.records.lock().unwrap();
            for record in records {
                map.insert(record.user_id.clone(), record);
            }
        }
        store
    }

    /// Number of successful `put` calls.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of `delete` calls, whether or not a record existed.
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every subsequent call fail with a backend error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Backend("null store set to fail".into()))
        } else {
            Ok(())
        }
    }
}

impl SpammerStore for NullStore {
    fn get(&self, user_id: &str) -> Result<Option<SpammerRecord>, StoreError> {
        self.check()?;
        Ok(self.records.lock().unwrap().get(user_id).cloned())
    }

    fn put(&self, record: &SpammerRecord) -> Result<(), StoreError> {
        self.check()?;
        self.records
            .lock()
            .unwrap()
            .insert(record.user_id.clone(), record.clone());
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, user_id: &str) -> Result<bool, StoreError> {
        self.check()?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.lock().unwrap().remove(user_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_writes_and_deletes() {
        let store = NullStore::with_records([SpammerRecord::new("1")]);
        assert_eq!(store.put_count(), 0);

        store.put(&SpammerRecord::new("2")).unwrap();
        assert!(store.delete("1").unwrap());
        assert!(!store.delete("1").unwrap());

        assert_eq!(store.put_count(), 1);
        assert_eq!(store.delete_count(), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn failing_mode_errors_every_call() {
        let store = NullStore::new();
        store.set_failing(true);
        assert!(store.get("1").is_err());
        assert!(store.put(&SpammerRecord::new("1")).is_err());
        store.set_failing(false);
        assert_eq!(store.get("1").unwrap(), None);
    }
}
