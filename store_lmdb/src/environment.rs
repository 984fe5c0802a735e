//! LMDB environment setup.

use std::path::{Path, PathBuf};

use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};

use crate::{LmdbError, LmdbSpammerStore};

/// Name of the database holding spammer records.
const SPAMMERS_DB: &str = "spammers";

/// Default map size: 1 GiB.
pub const DEFAULT_MAP_SIZE: usize = 1 << 30;

/// Wraps the LMDB environment and all database handles.
pub struct LmdbEnvironment {
    env: Env,
    spammers: Database<Str, Bytes>,
    path: PathBuf,
}

impl LmdbEnvironment {
    /// Open or create an LMDB environment at the given path.
    pub fn open(path: &Path, max_dbs: u32, map_size: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(path)?;

        // SAFETY: each environment directory is opened once per process; the
        // node owns its data directory exclusively.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(max_dbs)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let spammers: Database<Str, Bytes> = env.create_database(&mut wtxn, Some(SPAMMERS_DB))?;
        wtxn.commit()?;

        tracing::info!(path = %path.display(), map_size, "opened LMDB environment");

        Ok(Self {
            env,
            spammers,
            path: path.to_path_buf(),
        })
    }

    /// Open with the default sizing.
    pub fn open_default(path: &Path) -> Result<Self, LmdbError> {
        Self::open(path, 4, DEFAULT_MAP_SIZE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A store handle sharing this environment.
    pub fn spammer_store(&self) -> LmdbSpammerStore {
        LmdbSpammerStore::new(self.env.clone(), self.spammers)
    }
}
