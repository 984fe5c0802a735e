//! LMDB implementation of SpammerStore.

use heed::types::{Bytes, Str};
use heed::{Database, Env};

use beacon_store::{SpammerStore, StoreError};
use beacon_types::SpammerRecord;

use crate::LmdbError;

pub struct LmdbSpammerStore {
    env: Env,
    db: Database<Str, Bytes>,
}

impl LmdbSpammerStore {
    pub(crate) fn new(env: Env, db: Database<Str, Bytes>) -> Self {
        Self { env, db }
    }

    /// Number of stored records.
    pub fn len(&self) -> Result<u64, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        Ok(self.db.len(&rtxn).map_err(LmdbError::from)?)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

impl SpammerStore for LmdbSpammerStore {
    fn get(&self, user_id: &str) -> Result<Option<SpammerRecord>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let Some(bytes) = self.db.get(&rtxn, user_id).map_err(LmdbError::from)? else {
            return Ok(None);
        };
        let record = serde_json::from_slice(bytes)
            .map_err(|e| LmdbError::Serialization(format!("record {user_id}: {e}")))?;
        Ok(Some(record))
    }

    fn put(&self, record: &SpammerRecord) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec(record).map_err(|e| LmdbError::Serialization(e.to_string()))?;
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        self.db
            .put(&mut wtxn, record.user_id.as_str(), bytes.as_slice())
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn delete(&self, user_id: &str) -> Result<bool, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let existed = self.db.delete(&mut wtxn, user_id).map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LmdbEnvironment;
    use serde_json::json;

    /// Helper: open a temporary LMDB environment.
    fn temp_env() -> (tempfile::TempDir, LmdbEnvironment) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let env = LmdbEnvironment::open(dir.path(), 4, 10 * 1024 * 1024).expect("failed to open env");
        (dir, env)
    }

    #[test]
    fn put_then_get_returns_the_record() {
        let (_dir, env) = temp_env();
        let store = env.spammer_store();
        let record = SpammerRecord::flagged("1001", json!({"banned": true}), json!({"offenses": 2}));

        assert_eq!(store.get("1001").unwrap(), None);
        store.put(&record).unwrap();
        assert_eq!(store.get("1001").unwrap(), Some(record));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn put_replaces_existing_record() {
        let (_dir, env) = temp_env();
        let store = env.spammer_store();
        store.put(&SpammerRecord::new("7")).unwrap();

        let updated = SpammerRecord::flagged("7", json!({}), json!({"ok": true}));
        store.put(&updated).unwrap();
        assert_eq!(store.get("7").unwrap(), Some(updated));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, env) = temp_env();
        let store = env.spammer_store();
        store.put(&SpammerRecord::new("7")).unwrap();

        assert!(store.delete("7").unwrap());
        assert!(!store.delete("7").unwrap());
        assert_eq!(store.get("7").unwrap(), None);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let record = SpammerRecord::flagged("42", json!({"n": 1}), json!({}));
        {
            let env = LmdbEnvironment::open(dir.path(), 4, 10 * 1024 * 1024).unwrap();
            env.spammer_store().put(&record).unwrap();
        }
        let env = LmdbEnvironment::open(dir.path(), 4, 10 * 1024 * 1024).unwrap();
        assert_eq!(env.spammer_store().get("42").unwrap(), Some(record));
    }
}
