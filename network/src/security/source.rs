//! Where security policies come from.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use serde::Deserialize;

use super::SecurityPolicy;
use crate::SecurityError;

/// Environment variable consulted when the policy file leaves the secret empty.
pub const SECRET_KEY_ENV: &str = "BEACON_SECRET_KEY";

/// Version stamp of a policy source.
///
/// For files this is the modification time plus the length, so a rewrite
/// landing in the same mtime tick is still noticed when the size changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyRevision {
    pub modified: SystemTime,
    pub len: u64,
}

impl PolicyRevision {
    /// Whether this revision should replace `applied`. An older modification
    /// time never does.
    pub fn supersedes(&self, applied: &PolicyRevision) -> bool {
        self.modified > applied.modified
            || (self.modified == applied.modified && self.len != applied.len)
    }
}

/// A versioned source of [`SecurityPolicy`] snapshots.
///
/// `revision` must be cheap: it is polled before every inbound connection.
/// A reload happens only when the revision supersedes the applied one.
pub trait PolicySource: Send + Sync {
    /// Current revision, or `None` when the source is unavailable.
    fn revision(&self) -> Option<PolicyRevision>;

    /// Read a fresh snapshot.
    fn load(&self) -> Result<SecurityPolicy, SecurityError>;

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}

impl<T: PolicySource + ?Sized> PolicySource for Arc<T> {
    fn revision(&self) -> Option<PolicyRevision> {
        (**self).revision()
    }

    fn load(&self) -> Result<SecurityPolicy, SecurityError> {
        (**self).load()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// The `[security]` table of the node's TOML configuration file, versioned by
/// the file's modification time and length.
///
/// The table is required: a file without it (an empty or half-written file,
/// say) is a parse error rather than an all-defaults policy.
#[derive(Debug, Clone)]
pub struct FilePolicySource {
    path: PathBuf,
}

#[derive(Deserialize)]
struct PolicyFile {
    security: SecurityPolicy,
}

impl FilePolicySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse a policy out of configuration text, applying the
    /// [`SECRET_KEY_ENV`] fallback.
    pub fn parse(text: &str) -> Result<SecurityPolicy, SecurityError> {
        let file: PolicyFile =
            toml::from_str(text).map_err(|e| SecurityError::PolicyParse(e.to_string()))?;
        let mut policy = file.security;
        if policy.secret_key.is_empty() {
            if let Ok(secret) = std::env::var(SECRET_KEY_ENV) {
                policy.secret_key = secret;
            }
        }
        Ok(policy)
    }
}

impl PolicySource for FilePolicySource {
    fn revision(&self) -> Option<PolicyRevision> {
        let meta = std::fs::metadata(&self.path).ok()?;
        Some(PolicyRevision {
            modified: meta.modified().ok()?,
            len: meta.len(),
        })
    }

    fn load(&self) -> Result<SecurityPolicy, SecurityError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| SecurityError::PolicyRead {
            path: self.path.clone(),
            source,
        })?;
        Self::parse(&text)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// An in-memory policy, for nodes configured without a file and for tests.
///
/// Every [`StaticPolicySource::replace`] advances the revision by one
/// second past the Unix epoch.
#[derive(Debug)]
pub struct StaticPolicySource {
    state: Mutex<(SecurityPolicy, u64)>,
}

impl StaticPolicySource {
    pub fn new(policy: SecurityPolicy) -> Self {
        Self {
            state: Mutex::new((policy, 1)),
        }
    }

    /// Swap in a new policy and bump the revision.
    pub fn replace(&self, policy: SecurityPolicy) {
        if let Ok(mut state) = self.state.lock() {
            state.0 = policy;
            state.1 += 1;
        }
    }
}

impl PolicySource for StaticPolicySource {
    fn revision(&self) -> Option<PolicyRevision> {
        let state = self.state.lock().ok()?;
        Some(PolicyRevision {
            modified: SystemTime::UNIX_EPOCH + Duration::from_secs(state.1),
            len: 0,
        })
    }

    fn load(&self) -> Result<SecurityPolicy, SecurityError> {
        self.state
            .lock()
            .map(|state| state.0.clone())
            .map_err(|_| SecurityError::PolicyParse("policy state poisoned".into()))
    }

    fn describe(&self) -> String {
        "in-memory policy".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_source_reads_security_table_and_ignores_the_rest() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
port = 9828
bootstrap_peers = ["10.0.0.1:9828"]

[security]
secret_key = "s3cret"
allowed_node_keys = ["node-a", "node-b"]
"#
        )
        .unwrap();

        let source = FilePolicySource::new(file.path());
        assert!(source.revision().is_some());
        let policy = source.load().unwrap();
        assert_eq!(policy.secret_key, "s3cret");
        assert_eq!(policy.allowed_node_keys.len(), 2);
        assert!(policy.enabled);
    }

    #[test]
    fn missing_file_has_no_revision_and_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let source = FilePolicySource::new(dir.path().join("absent.toml"));
        assert!(source.revision().is_none());
        assert!(matches!(source.load(), Err(SecurityError::PolicyRead { .. })));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        assert!(matches!(
            FilePolicySource::parse("[security]\nenabled = \"maybe\""),
            Err(SecurityError::PolicyParse(_))
        ));
    }

    #[test]
    fn file_without_security_table_is_rejected() {
        assert!(matches!(
            FilePolicySource::parse(""),
            Err(SecurityError::PolicyParse(_))
        ));
        assert!(matches!(
            FilePolicySource::parse("port = 9828\nbootstrap_peers = []\n"),
            Err(SecurityError::PolicyParse(_))
        ));
        assert!(FilePolicySource::parse("[security]\n").unwrap().enabled);
    }

    #[test]
    fn same_mtime_rewrite_of_a_different_size_is_a_new_revision() {
        let at = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let second = Duration::from_secs(1);
        let rev = |modified, len| PolicyRevision { modified, len };
        let applied = rev(at, 120);

        assert!(!applied.supersedes(&applied));
        assert!(rev(at, 64).supersedes(&applied));
        assert!(rev(at + second, 120).supersedes(&applied));
        assert!(!rev(at - second, 64).supersedes(&applied));
    }

    #[test]
    fn file_revision_tracks_length() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[security]\n").unwrap();
        file.flush().unwrap();
        let source = FilePolicySource::new(file.path());
        let short = source.revision().unwrap();

        writeln!(file, "blocked_ips = [\"10.0.0.9\"]").unwrap();
        file.flush().unwrap();
        file.as_file().set_modified(short.modified).unwrap();

        let long = source.revision().unwrap();
        assert_eq!(long.modified, short.modified);
        assert!(long.len > short.len);
        assert!(long.supersedes(&short));
    }

    #[test]
    fn static_source_revision_advances_on_replace() {
        let source = StaticPolicySource::new(SecurityPolicy::default());
        let before = source.revision().unwrap();
        source.replace(SecurityPolicy::disabled());
        assert!(source.revision().unwrap().supersedes(&before));
        assert!(!source.load().unwrap().enabled);
    }
}
