//! The security manager.
//!
//! One instance per node, constructed explicitly and shared through the node
//! context. It owns the current [`SecurityPolicy`] snapshot plus all runtime
//! counters: per-IP connection counts, per-IP connection and message rate
//! windows, the authenticated-node set, manual blocks and the event buffer.
//! Runtime state survives policy reloads.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use beacon_crypto::{auth_token, canonical_json, format_number, hmac_sha256_hex, random_challenge};
use beacon_messages::MessageType;
use beacon_protocol::AuthChallenge;
use beacon_types::Clock;
use serde::Serialize;
use serde_json::{Number, Value};

use super::events::{EventLog, SecurityEvent, SecurityEventKind, Severity};
use super::policy::{SecurityPolicy, AUTH_REPLAY_WINDOW_SECS, RATE_WINDOW_SECS};
use super::rate::RateWindow;
use super::source::{PolicyRevision, PolicySource, StaticPolicySource};
use super::verdict::{Reason, Verdict};
use crate::SecurityError;

/// Read-only summary for status output.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SecurityStats {
    pub security_enabled: bool,
    pub authenticated_nodes: usize,
    pub blocked_nodes: usize,
    pub blocked_ips: usize,
    /// `None` when the whitelist is disabled.
    pub allowed_nodes: Option<usize>,
    pub active_connections: usize,
    pub authentication_required: bool,
    pub message_signing_enabled: bool,
    pub reject_unsigned_messages: bool,
    pub buffered_events: usize,
}

pub struct SecurityManager {
    source: Box<dyn PolicySource>,
    clock: Arc<dyn Clock>,
    policy: Arc<SecurityPolicy>,
    applied_revision: Option<PolicyRevision>,

    connection_counts: HashMap<String, usize>,
    connection_times: HashMap<String, RateWindow>,
    message_times: HashMap<String, RateWindow>,
    /// Authenticated node UUID -> number of live authenticated connections.
    authenticated: HashMap<String, usize>,
    manual_blocked_nodes: BTreeSet<String>,
    manual_blocked_ips: BTreeSet<String>,
    events: EventLog,
}

impl SecurityManager {
    /// Load the initial policy from `source`.
    pub fn new(
        source: Box<dyn PolicySource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SecurityError> {
        let applied_revision = source.revision();
        let policy = source.load()?;
        tracing::info!(
            target: "security",
            source = %source.describe(),
            enabled = policy.enabled,
            allowed_nodes = policy.allowed_node_keys.len(),
            blocked_nodes = policy.blocked_node_keys.len(),
            "security manager initialized"
        );
        Ok(Self::with_state(source, clock, policy, applied_revision))
    }

    /// A manager over a fixed in-memory policy.
    pub fn with_policy(policy: SecurityPolicy, clock: Arc<dyn Clock>) -> Self {
        let source = StaticPolicySource::new(policy.clone());
        let revision = source.revision();
        Self::with_state(Box::new(source), clock, policy, revision)
    }

    fn with_state(
        source: Box<dyn PolicySource>,
        clock: Arc<dyn Clock>,
        policy: SecurityPolicy,
        applied_revision: Option<PolicyRevision>,
    ) -> Self {
        Self {
            source,
            clock,
            policy: Arc::new(policy),
            applied_revision,
            connection_counts: HashMap::new(),
            connection_times: HashMap::new(),
            message_times: HashMap::new(),
            authenticated: HashMap::new(),
            manual_blocked_nodes: BTreeSet::new(),
            manual_blocked_ips: BTreeSet::new(),
            events: EventLog::default(),
        }
    }

    // -- Admission -------------------------------------------------------------

    /// Full admission check for a new or re-identified connection.
    ///
    /// Order: disabled, IP blacklist, node blacklist, node whitelist, per-IP
    /// connection cap, per-IP connection rate.
    pub fn is_connection_allowed(&mut self, ip: &str, node_uuid: Option<&str>) -> Verdict {
        let identity = self.is_identity_allowed(ip, node_uuid);
        if !identity.allowed || identity.reason == Reason::SecurityDisabled {
            return identity;
        }

        let policy = Arc::clone(&self.policy);
        let open = self.connection_counts.get(ip).copied().unwrap_or(0);
        if open >= policy.max_connections_per_ip {
            tracing::warn!(
                target: "security",
                ip,
                open,
                limit = policy.max_connections_per_ip,
                "connection blocked: per-IP connection cap reached"
            );
            return Verdict::deny(Reason::TooManyConnections);
        }

        let now = self.clock.now();
        if let Some(window) = self.connection_times.get_mut(ip) {
            if window.is_full(now, RATE_WINDOW_SECS, policy.connection_rate_limit) {
                tracing::warn!(
                    target: "security",
                    ip,
                    limit = policy.connection_rate_limit,
                    "connection blocked: connection rate limit exceeded"
                );
                return Verdict::deny(Reason::ConnectionRateLimited);
            }
        } else if policy.connection_rate_limit == 0 {
            return Verdict::deny(Reason::ConnectionRateLimited);
        }

        Verdict::allow(Reason::ConnectionAllowed)
    }

    /// The list-based part of [`Self::is_connection_allowed`] only.
    ///
    /// Used after a handshake, when the connection under test is already
    /// counted against its IP's cap and rate window.
    pub fn is_identity_allowed(&self, ip: &str, node_uuid: Option<&str>) -> Verdict {
        let policy = &self.policy;
        if !policy.enabled {
            return Verdict::allow(Reason::SecurityDisabled);
        }

        if self.is_ip_blocked(ip) {
            tracing::warn!(target: "security", ip, "connection blocked: IP is blacklisted");
            return Verdict::deny(Reason::IpBlocked);
        }

        if let Some(uuid) = node_uuid {
            if self.is_node_blocked(uuid) {
                tracing::warn!(target: "security", uuid, "connection blocked: node is blacklisted");
                return Verdict::deny(Reason::NodeBlocked);
            }
            if policy.whitelist_active() && !policy.allowed_node_keys.contains(uuid) {
                tracing::warn!(target: "security", uuid, "connection blocked: node not in whitelist");
                return Verdict::deny(Reason::NotWhitelisted);
            }
        }

        Verdict::allow(Reason::ConnectionAllowed)
    }

    /// Count a connection against its IP.
    pub fn register_connection(&mut self, ip: &str, node_uuid: Option<&str>) {
        let now = self.clock.now();
        let cap = self.policy.connection_rate_limit;
        *self.connection_counts.entry(ip.to_string()).or_insert(0) += 1;
        self.connection_times
            .entry(ip.to_string())
            .or_default()
            .record(now, cap);
        tracing::debug!(target: "security", ip, uuid = ?node_uuid, "connection registered");
    }

    /// Undo [`Self::register_connection`].
    ///
    /// `authenticated_uuid` is the UUID this connection authenticated as, if
    /// it did; that authentication is released.
    pub fn unregister_connection(&mut self, ip: &str, authenticated_uuid: Option<&str>) {
        if let Some(count) = self.connection_counts.get_mut(ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.connection_counts.remove(ip);
            }
        }

        if let Some(uuid) = authenticated_uuid {
            if let Some(refs) = self.authenticated.get_mut(uuid) {
                *refs = refs.saturating_sub(1);
                if *refs == 0 {
                    self.authenticated.remove(uuid);
                }
            }
        }

        let now = self.clock.now();
        for windows in [&mut self.connection_times, &mut self.message_times] {
            let idle = windows.get_mut(ip).is_some_and(|w| {
                w.prune(now, RATE_WINDOW_SECS);
                w.is_empty()
            });
            if idle {
                windows.remove(ip);
            }
        }

        tracing::debug!(target: "security", ip, uuid = ?authenticated_uuid, "connection unregistered");
    }

    /// Per-message check: authentication for non-handshake types, then the
    /// per-IP message rate. An allowed message is counted.
    pub fn is_message_allowed(
        &mut self,
        ip: &str,
        node_uuid: Option<&str>,
        message_type: &MessageType,
    ) -> Verdict {
        let policy = Arc::clone(&self.policy);
        if !policy.enabled {
            return Verdict::allow(Reason::SecurityDisabled);
        }

        if policy.require_authentication && !message_type.is_handshake() {
            let authenticated = node_uuid.is_some_and(|uuid| self.authenticated.contains_key(uuid));
            if !authenticated {
                tracing::warn!(
                    target: "security",
                    uuid = node_uuid.unwrap_or("unknown"),
                    message_type = %message_type,
                    "message blocked: node not authenticated"
                );
                return Verdict::deny(Reason::NotAuthenticated);
            }
        }

        let now = self.clock.now();
        let window = self.message_times.entry(ip.to_string()).or_default();
        if window.is_full(now, RATE_WINDOW_SECS, policy.message_rate_limit) {
            tracing::warn!(
                target: "security",
                ip,
                limit = policy.message_rate_limit,
                "message blocked: message rate limit exceeded"
            );
            return Verdict::deny(Reason::MessageRateLimited);
        }
        window.record(now, policy.message_rate_limit);

        Verdict::allow(Reason::MessageAllowed)
    }

    // -- Authentication --------------------------------------------------------

    /// Verify the `auth_token` of a handshake payload.
    ///
    /// The token is `HMAC-SHA256(secret, "{uuid}:{timestamp}:{challenge}")`
    /// with the timestamp rendered exactly as it appeared on the wire.
    /// `challenge` defaults to the UUID.
    pub fn authenticate_node(&mut self, node_uuid: &str, payload: &Value) -> Verdict {
        let policy = Arc::clone(&self.policy);
        if !policy.enabled || !policy.require_authentication {
            return Verdict::allow(Reason::AuthenticationNotRequired);
        }

        if !policy.has_secret() {
            tracing::error!(
                target: "security",
                "authentication required but no network secret key configured"
            );
            return Verdict::deny(Reason::ServerConfigurationError);
        }

        let token = payload
            .get("auth_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty());
        let timestamp = match payload.get("timestamp") {
            Some(Value::Number(n)) if n.as_f64().is_some_and(|f| f != 0.0) => Some(n),
            _ => None,
        };
        let (Some(token), Some(timestamp)) = (token, timestamp) else {
            return Verdict::deny(Reason::MissingAuthenticationData);
        };
        let challenge = payload
            .get("challenge")
            .and_then(Value::as_str)
            .unwrap_or(node_uuid);

        let sent_at = timestamp.as_f64().unwrap_or_default();
        if (self.clock.now() - sent_at).abs() > AUTH_REPLAY_WINDOW_SECS {
            return Verdict::deny(Reason::TimestampExpired);
        }

        let message = format!("{node_uuid}:{}:{challenge}", format_number(timestamp));
        if !beacon_crypto::verify_hmac_sha256_hex(
            policy.secret_key.as_bytes(),
            message.as_bytes(),
            token,
        ) {
            tracing::warn!(target: "security", uuid = node_uuid, "authentication failed: invalid token");
            return Verdict::deny(Reason::InvalidToken);
        }

        *self.authenticated.entry(node_uuid.to_string()).or_insert(0) += 1;
        tracing::info!(target: "security", uuid = node_uuid, "node authenticated");
        Verdict::allow(Reason::Authenticated)
    }

    /// Authentication material for our own handshake, or `None` when
    /// authentication is not required.
    pub fn generate_auth_challenge(
        &self,
        node_uuid: &str,
    ) -> Result<Option<AuthChallenge>, SecurityError> {
        let policy = &self.policy;
        if !policy.enabled || !policy.require_authentication {
            return Ok(None);
        }
        if !policy.has_secret() {
            return Err(SecurityError::MissingSecretKey);
        }

        let timestamp = self.clock.now();
        let challenge = random_challenge();
        let token = auth_token(
            policy.secret_key.as_bytes(),
            node_uuid,
            &timestamp_text(timestamp),
            &challenge,
        )?;
        Ok(Some(AuthChallenge {
            auth_token: token,
            challenge,
            timestamp,
        }))
    }

    pub fn is_authenticated(&self, node_uuid: &str) -> bool {
        self.authenticated.contains_key(node_uuid)
    }

    // -- Signing ---------------------------------------------------------------

    /// Add a `signature` field when message signing is enabled.
    ///
    /// Any existing signature is replaced, so relayed messages carry the
    /// signature of the last hop.
    pub fn sign_message(&self, message: &mut Value, node_uuid: &str) -> Result<(), SecurityError> {
        if !self.policy.enable_message_signing {
            return Ok(());
        }
        let Some(fields) = message.as_object_mut() else {
            return Ok(());
        };
        fields.remove("signature");
        let signature = self.message_signature(message, node_uuid)?;
        if let Some(fields) = message.as_object_mut() {
            fields.insert("signature".into(), Value::String(signature));
        }
        Ok(())
    }

    /// Check the `signature` field of an inbound message.
    ///
    /// Always passes when signing is disabled. An unsigned message passes
    /// unless `reject_unsigned` is set.
    pub fn verify_message_signature(&self, message: &Value, node_uuid: &str) -> bool {
        let policy = &self.policy;
        if !policy.enable_message_signing {
            return true;
        }

        let signature = message
            .get("signature")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        let Some(signature) = signature else {
            if policy.reject_unsigned {
                tracing::warn!(target: "security", uuid = node_uuid, "unsigned message rejected");
            }
            return !policy.reject_unsigned;
        };
        if !policy.has_secret() {
            return false;
        }

        let mut unsigned = message.clone();
        if let Some(fields) = unsigned.as_object_mut() {
            fields.remove("signature");
        }
        let signed_text = format!("{node_uuid}:{}", canonical_json(&unsigned));
        beacon_crypto::verify_hmac_sha256_hex(
            policy.secret_key.as_bytes(),
            signed_text.as_bytes(),
            signature,
        )
    }

    fn message_signature(&self, message: &Value, node_uuid: &str) -> Result<String, SecurityError> {
        if !self.policy.has_secret() {
            return Err(SecurityError::MissingSecretKey);
        }
        let signed_text = format!("{node_uuid}:{}", canonical_json(message));
        Ok(hmac_sha256_hex(
            self.policy.secret_key.as_bytes(),
            signed_text.as_bytes(),
        )?)
    }

    // -- Reload ----------------------------------------------------------------

    /// Reload the policy if the source revision supersedes the applied one.
    ///
    /// Returns whether a new policy was applied. A policy that fails to load
    /// is logged and skipped; the previous snapshot stays in force.
    pub fn check_config_reload(&mut self) -> bool {
        let Some(current) = self.source.revision() else {
            return false;
        };
        if self
            .applied_revision
            .is_some_and(|applied| !current.supersedes(&applied))
        {
            return false;
        }
        self.applied_revision = Some(current);

        tracing::info!(
            target: "security",
            source = %self.source.describe(),
            "security configuration changed, reloading"
        );
        match self.source.load() {
            Ok(policy) => {
                self.apply_policy(policy);
                true
            }
            Err(e) => {
                tracing::error!(
                    target: "security",
                    error = %e,
                    "failed to reload security configuration, keeping previous policy"
                );
                false
            }
        }
    }

    /// Reload regardless of the last applied revision.
    pub fn reload_configuration(&mut self) -> bool {
        tracing::info!(target: "security", "manual configuration reload requested");
        self.applied_revision = None;
        self.check_config_reload()
    }

    fn apply_policy(&mut self, policy: SecurityPolicy) {
        let old = Arc::clone(&self.policy);
        let added_allowed = difference(&policy.allowed_node_keys, &old.allowed_node_keys);
        let removed_allowed = difference(&old.allowed_node_keys, &policy.allowed_node_keys);
        let added_blocked = difference(&policy.blocked_node_keys, &old.blocked_node_keys);
        let removed_blocked = difference(&old.blocked_node_keys, &policy.blocked_node_keys);

        if !added_allowed.is_empty() {
            tracing::info!(target: "security", nodes = %added_allowed.join(", "), "added to whitelist");
        }
        if !removed_allowed.is_empty() {
            tracing::info!(target: "security", nodes = %removed_allowed.join(", "), "removed from whitelist");
        }
        if !added_blocked.is_empty() {
            tracing::warn!(target: "security", nodes = %added_blocked.join(", "), "added to blacklist");
        }
        if !removed_blocked.is_empty() {
            tracing::info!(target: "security", nodes = %removed_blocked.join(", "), "removed from blacklist");
        }

        tracing::info!(
            target: "security",
            enabled = policy.enabled,
            allowed_nodes = policy.allowed_node_keys.len(),
            blocked_nodes = policy.blocked_node_keys.len(),
            "security configuration reloaded"
        );
        self.policy = Arc::new(policy);

        let details = serde_json::json!({
            "added_allowed": added_allowed,
            "removed_allowed": removed_allowed,
            "added_blocked": added_blocked,
            "removed_blocked": removed_blocked,
        });
        self.record_event(SecurityEventKind::ConfigReload, Severity::Info, details.to_string());
    }

    // -- Manual blocks ---------------------------------------------------------

    /// Block a node UUID until [`Self::remove_blocked_node`]. Survives reloads.
    pub fn add_blocked_node(&mut self, node_uuid: &str, reason: &str) {
        self.manual_blocked_nodes.insert(node_uuid.to_string());
        self.authenticated.remove(node_uuid);
        self.record_event(
            SecurityEventKind::NodeBlocked,
            Severity::Warning,
            format!("node {node_uuid} blocked: {reason}"),
        );
    }

    /// Lift a manual or configured node block. A configured block returns
    /// on the next reload if the source still lists it.
    pub fn remove_blocked_node(&mut self, node_uuid: &str) -> bool {
        let manual = self.manual_blocked_nodes.remove(node_uuid);
        let configured = self.policy.blocked_node_keys.contains(node_uuid);
        if configured {
            let mut policy = (*self.policy).clone();
            policy.blocked_node_keys.remove(node_uuid);
            self.policy = Arc::new(policy);
        }
        let removed = manual || configured;
        if removed {
            self.record_event(
                SecurityEventKind::NodeUnblocked,
                Severity::Info,
                format!("node {node_uuid} unblocked"),
            );
        }
        removed
    }

    /// Block an IP address until [`Self::remove_blocked_ip`]. Survives reloads.
    pub fn add_blocked_ip(&mut self, ip: &str, reason: &str) {
        self.manual_blocked_ips.insert(ip.to_string());
        self.record_event(
            SecurityEventKind::IpBlocked,
            Severity::Warning,
            format!("ip {ip} blocked: {reason}"),
        );
    }

    pub fn remove_blocked_ip(&mut self, ip: &str) -> bool {
        let manual = self.manual_blocked_ips.remove(ip);
        let configured = self.policy.blocked_ips.contains(ip);
        if configured {
            let mut policy = (*self.policy).clone();
            policy.blocked_ips.remove(ip);
            self.policy = Arc::new(policy);
        }
        let removed = manual || configured;
        if removed {
            self.record_event(
                SecurityEventKind::IpUnblocked,
                Severity::Info,
                format!("ip {ip} unblocked"),
            );
        }
        removed
    }

    fn is_ip_blocked(&self, ip: &str) -> bool {
        self.policy.blocked_ips.contains(ip) || self.manual_blocked_ips.contains(ip)
    }

    fn is_node_blocked(&self, node_uuid: &str) -> bool {
        self.policy.blocked_node_keys.contains(node_uuid)
            || self.manual_blocked_nodes.contains(node_uuid)
    }

    // -- Events & queries ------------------------------------------------------

    /// Log a security event and, when `log_events` is set, buffer it.
    pub fn record_event(
        &mut self,
        kind: SecurityEventKind,
        severity: Severity,
        details: impl Into<String>,
    ) {
        let details = details.into();
        match severity {
            Severity::Info => tracing::info!(target: "security", event = %kind, %details, "security event"),
            Severity::Warning => tracing::warn!(target: "security", event = %kind, %details, "security event"),
            Severity::Error => tracing::error!(target: "security", event = %kind, %details, "security event"),
        }
        if self.policy.log_events {
            self.events.push(SecurityEvent {
                timestamp: self.clock.now(),
                kind,
                severity,
                details,
            });
        }
    }

    /// Buffered events, oldest first.
    pub fn security_events(&self) -> Vec<SecurityEvent> {
        self.events.snapshot()
    }

    /// The policy snapshot currently in force.
    pub fn policy(&self) -> Arc<SecurityPolicy> {
        Arc::clone(&self.policy)
    }

    pub fn is_enabled(&self) -> bool {
        self.policy.enabled
    }

    /// Revision of the last applied policy.
    pub fn config_revision(&self) -> Option<PolicyRevision> {
        self.applied_revision
    }

    pub fn source_description(&self) -> String {
        self.source.describe()
    }

    pub fn stats(&self) -> SecurityStats {
        let policy = &self.policy;
        SecurityStats {
            security_enabled: policy.enabled,
            authenticated_nodes: self.authenticated.len(),
            blocked_nodes: policy
                .blocked_node_keys
                .union(&self.manual_blocked_nodes)
                .count(),
            blocked_ips: policy.blocked_ips.union(&self.manual_blocked_ips).count(),
            allowed_nodes: policy
                .whitelist_active()
                .then_some(policy.allowed_node_keys.len()),
            active_connections: self.connection_counts.values().sum(),
            authentication_required: policy.require_authentication,
            message_signing_enabled: policy.enable_message_signing,
            reject_unsigned_messages: policy.reject_unsigned,
            buffered_events: self.events.len(),
        }
    }
}

fn difference(a: &BTreeSet<String>, b: &BTreeSet<String>) -> Vec<String> {
    a.difference(b).cloned().collect()
}

/// Render a timestamp the way it will appear in the JSON message.
fn timestamp_text(timestamp: f64) -> String {
    Number::from_f64(timestamp)
        .map(|n| format_number(&n))
        .unwrap_or_else(|| timestamp.to_string())
}
