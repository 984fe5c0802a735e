//! Security event ring buffer.

use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;

/// Number of events kept in memory.
pub const SECURITY_EVENT_CAPACITY: usize = 1000;

/// What happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventKind {
    ConnectionRejected,
    ConnectionRejectedAfterAuth,
    AuthenticationFailed,
    HandshakeCompleted,
    MessageRejected,
    InvalidSignature,
    UnknownMessageType,
    JsonDecodeError,
    MessageProcessingError,
    ConfigReload,
    NodeBlocked,
    NodeUnblocked,
    IpBlocked,
    IpUnblocked,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionRejected => "CONNECTION_REJECTED",
            Self::ConnectionRejectedAfterAuth => "CONNECTION_REJECTED_AFTER_AUTH",
            Self::AuthenticationFailed => "AUTHENTICATION_FAILED",
            Self::HandshakeCompleted => "HANDSHAKE_COMPLETED",
            Self::MessageRejected => "MESSAGE_REJECTED",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::UnknownMessageType => "UNKNOWN_MESSAGE_TYPE",
            Self::JsonDecodeError => "JSON_DECODE_ERROR",
            Self::MessageProcessingError => "MESSAGE_PROCESSING_ERROR",
            Self::ConfigReload => "CONFIG_RELOAD",
            Self::NodeBlocked => "NODE_BLOCKED",
            Self::NodeUnblocked => "NODE_UNBLOCKED",
            Self::IpBlocked => "IP_BLOCKED",
            Self::IpUnblocked => "IP_UNBLOCKED",
        }
    }
}

impl fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SecurityEvent {
    pub timestamp: f64,
    pub kind: SecurityEventKind,
    pub severity: Severity,
    pub details: String,
}

/// Bounded FIFO of recent events; the oldest falls off when full.
#[derive(Debug)]
pub struct EventLog {
    events: VecDeque<SecurityEvent>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: SecurityEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Events oldest first.
    pub fn snapshot(&self) -> Vec<SecurityEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(SECURITY_EVENT_CAPACITY)
    }
}
