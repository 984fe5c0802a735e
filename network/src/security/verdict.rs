//! Outcomes of security checks.

use std::fmt;

/// Why a check passed or failed. The strings are part of the log and
/// event vocabulary operators grep for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reason {
    SecurityDisabled,
    IpBlocked,
    NodeBlocked,
    NotWhitelisted,
    TooManyConnections,
    ConnectionRateLimited,
    ConnectionAllowed,
    NotAuthenticated,
    MessageRateLimited,
    MessageAllowed,
    AuthenticationNotRequired,
    ServerConfigurationError,
    MissingAuthenticationData,
    TimestampExpired,
    InvalidToken,
    Authenticated,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::SecurityDisabled => "Security disabled",
            Reason::IpBlocked => "IP address blocked",
            Reason::NodeBlocked => "Node UUID blocked",
            Reason::NotWhitelisted => "Node UUID not in whitelist",
            Reason::TooManyConnections => "Too many connections from IP",
            Reason::ConnectionRateLimited => "Connection rate limit exceeded",
            Reason::ConnectionAllowed => "Connection allowed",
            Reason::NotAuthenticated => "Node not authenticated",
            Reason::MessageRateLimited => "Message rate limit exceeded",
            Reason::MessageAllowed => "Message allowed",
            Reason::AuthenticationNotRequired => "Authentication not required",
            Reason::ServerConfigurationError => "Server configuration error",
            Reason::MissingAuthenticationData => "Missing authentication data",
            Reason::TimestampExpired => "Authentication timestamp expired",
            Reason::InvalidToken => "Invalid authentication token",
            Reason::Authenticated => "Authentication successful",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(allowed, reason)` pair returned by every admission check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: Reason,
}

impl Verdict {
    pub fn allow(reason: Reason) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    pub fn deny(reason: Reason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason.as_str())
    }
}
