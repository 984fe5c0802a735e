//! Per-connection protocol state machine.
//!
//! A [`Connection`] owns everything about one socket except the socket
//! itself: the stream decoder, the per-connection seen set and the handshake
//! state. The session task feeds it bytes and closes the socket when it
//! answers [`Flow::Close`]; everything it sends goes through the outbound
//! queue, so it can be driven in tests without any I/O.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::Instrument;

use beacon_messages::{
    CheckP2pDataResponse, Handshake, Message, MessageType, MissingField, SpammerInfoBroadcast,
};
use beacon_network::{
    ConnectionId, Direction, MessageDedup, PeerEntry, Reason, SecurityEventKind, Severity,
    UuidClaim,
};
use beacon_protocol::{handshake_message, JsonStreamDecoder};
use beacon_types::{GunbanEvent, PeerAddress};

use crate::context::NodeContext;
use crate::gossip;
use crate::tracing_spans::message_span;
use crate::{NodeError, RequestError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    AwaitingHandshake,
    HandshakeComplete,
    Closed,
}

/// What the session should do after an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

pub struct Connection {
    ctx: Arc<NodeContext>,
    id: ConnectionId,
    address: PeerAddress,
    direction: Direction,
    state: ConnState,
    /// Set when the handshake completes.
    peer_uuid: Option<String>,
    /// The UUID this connection authenticated as, released on disconnect.
    authenticated_uuid: Option<String>,
    /// Counted in the security state and the peer registry.
    registered: bool,
    decoder: JsonStreamDecoder,
    seen: MessageDedup,
    outbound: mpsc::Sender<Vec<u8>>,
}

impl Connection {
    pub fn new(
        ctx: Arc<NodeContext>,
        id: ConnectionId,
        address: PeerAddress,
        direction: Direction,
        outbound: mpsc::Sender<Vec<u8>>,
    ) -> Self {
        let decoder = JsonStreamDecoder::new(ctx.settings.max_frame_size);
        let seen = MessageDedup::new(ctx.settings.seen_cache_capacity);
        Self {
            ctx,
            id,
            address,
            direction,
            state: ConnState::Connecting,
            peer_uuid: None,
            authenticated_uuid: None,
            registered: false,
            decoder,
            seen,
            outbound,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn peer_uuid(&self) -> Option<&str> {
        self.peer_uuid.as_deref()
    }

    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    fn ip(&self) -> &str {
        &self.address.host
    }

    // -- Lifecycle -------------------------------------------------------------

    /// Admit the connection and open the handshake.
    ///
    /// A rejected connection is closed without sending anything.
    pub async fn on_connect(&mut self) -> Result<Flow, NodeError> {
        let verdict = {
            let mut security = self.ctx.security.lock().await;
            security.check_config_reload();
            let verdict = security.is_connection_allowed(self.ip(), None);
            if verdict.allowed {
                security.register_connection(self.ip(), None);
            } else {
                security.record_event(
                    SecurityEventKind::ConnectionRejected,
                    Severity::Warning,
                    format!("{}: {}", self.address, verdict.reason),
                );
            }
            verdict
        };

        if !verdict.allowed {
            tracing::warn!(peer = %self.address, reason = %verdict.reason, "connection rejected");
            self.ctx.metrics.connections_rejected.inc();
            self.state = ConnState::Closed;
            return Ok(Flow::Close);
        }

        self.registered = true;
        self.ctx.registry.lock().await.register(PeerEntry::new(
            self.id,
            self.address.clone(),
            self.direction,
            self.outbound.clone(),
        ));
        self.ctx.metrics.connections_accepted.inc();
        self.ctx.update_peer_gauges().await;

        self.state = ConnState::AwaitingHandshake;
        tracing::info!(peer = %self.address, direction = ?self.direction, "connection established");
        self.send_handshake(false).await
    }

    /// Release everything the connection holds. Safe to call more than once.
    pub async fn on_disconnect(&mut self) {
        self.state = ConnState::Closed;
        if !self.registered {
            return;
        }
        self.registered = false;

        self.ctx
            .security
            .lock()
            .await
            .unregister_connection(self.ip(), self.authenticated_uuid.as_deref());
        self.ctx.registry.lock().await.unregister(self.id);
        if self.ctx.pending.fail(self.id, RequestError::ConnectionLost).await {
            tracing::debug!(peer = %self.address, "pending request failed by disconnect");
        }
        self.ctx.update_peer_gauges().await;

        tracing::info!(
            peer = %self.address,
            uuid = self.peer_uuid.as_deref().unwrap_or("unknown"),
            "connection closed"
        );
    }

    /// Feed received bytes and handle every complete message in them.
    pub async fn on_data(&mut self, data: &[u8]) -> Flow {
        self.decoder.extend(data);
        while let Some(item) = self.decoder.next_message() {
            match item {
                Ok(raw) => {
                    if self.handle_message(raw).await == Flow::Close {
                        return Flow::Close;
                    }
                }
                Err(e) => {
                    self.ctx.metrics.decode_errors.inc();
                    self.security_event(
                        SecurityEventKind::JsonDecodeError,
                        Severity::Warning,
                        format!("{}: {e}", self.address),
                    )
                    .await;
                }
            }
        }
        Flow::Continue
    }

    // -- Inbound ---------------------------------------------------------------

    async fn handle_message(&mut self, raw: Value) -> Flow {
        let message_type = MessageType::of(&raw);
        let span = message_span(&self.address.to_string(), message_type.as_str());
        self.screen_and_dispatch(raw, message_type)
            .instrument(span)
            .await
    }

    async fn screen_and_dispatch(&mut self, raw: Value, message_type: MessageType) -> Flow {
        self.ctx.metrics.messages_received.inc();

        // A handshake is signed by the UUID it announces.
        let signer = if message_type.is_handshake() {
            raw.get("uuid").and_then(Value::as_str).unwrap_or("unknown").to_string()
        } else {
            self.peer_uuid.clone().unwrap_or_else(|| "unknown".to_string())
        };

        {
            let mut security = self.ctx.security.lock().await;
            let verdict =
                security.is_message_allowed(self.ip(), self.peer_uuid.as_deref(), &message_type);
            if !verdict.allowed {
                security.record_event(
                    SecurityEventKind::MessageRejected,
                    Severity::Warning,
                    format!("{message_type} from {}: {}", self.address, verdict.reason),
                );
                self.ctx.metrics.messages_rejected.inc();
                return Flow::Continue;
            }
            if !security.verify_message_signature(&raw, &signer) {
                security.record_event(
                    SecurityEventKind::InvalidSignature,
                    Severity::Warning,
                    format!("{message_type} from {} claiming {signer}", self.address),
                );
                self.ctx.metrics.messages_rejected.inc();
                return Flow::Continue;
            }
        }

        if let MessageType::Unknown(name) = &message_type {
            self.security_event(
                SecurityEventKind::UnknownMessageType,
                Severity::Warning,
                format!("'{name}' from {}", self.address),
            )
            .await;
            return Flow::Continue;
        }

        let message = match Message::from_value(raw.clone()) {
            Ok(message) => message,
            Err(e) => {
                self.processing_error(&message_type, &e.to_string()).await;
                return Flow::Continue;
            }
        };

        match self.dispatch(message, &raw).await {
            Ok(flow) => flow,
            Err(e) => {
                self.processing_error(&message_type, &e.to_string()).await;
                Flow::Continue
            }
        }
    }

    async fn dispatch(&mut self, message: Message, raw: &Value) -> Result<Flow, NodeError> {
        match message {
            Message::HandshakeInit(body) => self.on_handshake(body, raw, false).await,
            Message::HandshakeResponse(body) => self.on_handshake(body, raw, true).await,
            Message::CheckP2pData(request) => self.answer_check(request.user_id).await,
            Message::CheckP2pDataResponse(response) => {
                if !self.ctx.pending.resolve(self.id, response).await {
                    tracing::debug!(peer = %self.address, "unsolicited check_p2p_data_response");
                }
                Ok(Flow::Continue)
            }
            Message::SpammerInfoBroadcast(_) => {
                gossip::on_spammer_broadcast(&self.ctx, self.id, &mut self.seen, raw).await?;
                Ok(Flow::Continue)
            }
            Message::Gunban(body) => {
                let now = self.ctx.now();
                self.retract(body.into_event(now)).await
            }
            Message::Unban(body) => {
                let now = self.ctx.now();
                self.retract(body.into_event(now)).await
            }
            Message::SpammerInfoRemoval(body) => {
                let now = self.ctx.now();
                self.retract(body.into_event(now)).await
            }
        }
    }

    async fn on_handshake(
        &mut self,
        body: Handshake,
        raw: &Value,
        is_response: bool,
    ) -> Result<Flow, NodeError> {
        if self.state == ConnState::HandshakeComplete {
            tracing::debug!(peer = %self.address, "handshake already complete, ignoring");
            return Ok(Flow::Continue);
        }
        let uuid = body.uuid;

        {
            let mut security = self.ctx.security.lock().await;
            let auth = security.authenticate_node(&uuid, raw);
            if !auth.allowed {
                security.record_event(
                    SecurityEventKind::AuthenticationFailed,
                    Severity::Warning,
                    format!("{uuid} from {}: {}", self.address, auth.reason),
                );
                return Ok(Flow::Close);
            }
            if auth.reason == Reason::Authenticated {
                self.authenticated_uuid = Some(uuid.clone());
            }

            let admitted = security.is_identity_allowed(self.ip(), Some(&uuid));
            if !admitted.allowed {
                security.record_event(
                    SecurityEventKind::ConnectionRejectedAfterAuth,
                    Severity::Warning,
                    format!("{uuid} from {}: {}", self.address, admitted.reason),
                );
                self.ctx.metrics.connections_rejected.inc();
                return Ok(Flow::Close);
            }
        }

        let claim = {
            let mut registry = self.ctx.registry.lock().await;
            let claim = registry.try_claim_uuid(self.id, &uuid);
            if claim == UuidClaim::SelfConnection && self.direction == Direction::Outbound {
                registry.add_local_address(self.address.clone());
            }
            claim
        };
        match claim {
            UuidClaim::Claimed => {}
            UuidClaim::SelfConnection => {
                tracing::info!(peer = %self.address, "connected to self, closing");
                return Ok(Flow::Close);
            }
            UuidClaim::Duplicate => {
                tracing::warn!(peer = %self.address, uuid = %uuid, "duplicate node UUID, closing");
                return Ok(Flow::Close);
            }
            UuidClaim::NotRegistered => {
                tracing::warn!(peer = %self.address, "handshake on an unregistered connection");
                return Ok(Flow::Close);
            }
        }

        self.peer_uuid = Some(uuid.clone());
        self.state = ConnState::HandshakeComplete;

        if !is_response && self.send_handshake(true).await? == Flow::Close {
            return Ok(Flow::Close);
        }

        self.security_event(
            SecurityEventKind::HandshakeCompleted,
            Severity::Info,
            format!("{uuid} at {}", self.address),
        )
        .await;
        self.ctx.metrics.handshakes_completed.inc();
        self.ctx.update_peer_gauges().await;
        tracing::info!(
            peer = %self.address,
            uuid = %uuid,
            version = body.node_version.as_deref().unwrap_or("unknown"),
            "handshake complete"
        );

        self.send_peer_list().await
    }

    async fn answer_check(&mut self, user_id: String) -> Result<Flow, NodeError> {
        let response = match self.ctx.load_record(&user_id).await? {
            Some(record) => CheckP2pDataResponse::found(&record),
            None => CheckP2pDataResponse::not_found(user_id),
        };
        self.send(Message::CheckP2pDataResponse(response).to_value()?).await
    }

    async fn retract(
        &mut self,
        event: Result<GunbanEvent, MissingField>,
    ) -> Result<Flow, NodeError> {
        match event {
            Ok(event) => {
                gossip::on_gunban(&self.ctx, Some(self.id), event).await?;
            }
            Err(field) => {
                tracing::warn!(peer = %self.address, missing = %field, "retraction missing a field, dropping");
            }
        }
        Ok(Flow::Continue)
    }

    // -- Outbound --------------------------------------------------------------

    async fn send_handshake(&mut self, response: bool) -> Result<Flow, NodeError> {
        let auth = {
            let security = self.ctx.security.lock().await;
            match security.generate_auth_challenge(self.ctx.node_uuid()) {
                Ok(auth) => auth,
                Err(e) => {
                    tracing::error!(error = %e, "cannot authenticate handshake, sending without token");
                    None
                }
            }
        };

        let mut message = handshake_message(response, self.ctx.node_uuid(), self.ctx.now(), auth);
        if let Message::HandshakeInit(body) | Message::HandshakeResponse(body) = &mut message {
            body.node_version = Some(self.ctx.settings.node_version.clone());
        }
        self.send(message.to_value()?).await
    }

    async fn send_peer_list(&mut self) -> Result<Flow, NodeError> {
        let peers: Vec<PeerAddress> = {
            let registry = self.ctx.registry.lock().await;
            registry
                .bootstrap_peers()
                .iter()
                .chain(registry.discovered().iter())
                .filter(|address| **address != self.address)
                .cloned()
                .collect()
        };
        if peers.is_empty() {
            return Ok(Flow::Continue);
        }
        let message = Message::SpammerInfoBroadcast(SpammerInfoBroadcast::peer_list(peers));
        self.send(message.to_value()?).await
    }

    /// Sign and queue a message for this connection only.
    async fn send(&mut self, message: Value) -> Result<Flow, NodeError> {
        let frame = self.ctx.seal(message).await?;
        if self.outbound.send(frame).await.is_err() {
            tracing::debug!(peer = %self.address, "outbound queue closed");
            return Ok(Flow::Close);
        }
        Ok(Flow::Continue)
    }

    // -- Helpers ---------------------------------------------------------------

    async fn security_event(&self, kind: SecurityEventKind, severity: Severity, details: String) {
        self.ctx.security.lock().await.record_event(kind, severity, details);
    }

    async fn processing_error(&self, message_type: &MessageType, error: &str) {
        self.security_event(
            SecurityEventKind::MessageProcessingError,
            Severity::Error,
            format!("{message_type} from {}: {error}", self.address),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::{test_node, TestNode};
    use beacon_network::SecurityPolicy;
    use beacon_nullables::NullNetwork;
    use beacon_store::SpammerStore;
    use beacon_types::SpammerRecord;
    use serde_json::json;

    async fn connection(node: &TestNode, host: &str, direction: Direction) -> (Connection, NullNetwork) {
        let (tx, net) = NullNetwork::channel(64);
        let id = node.ctx.registry.lock().await.allocate_id();
        let conn = Connection::new(
            node.ctx.clone(),
            id,
            PeerAddress::new(host, 40000),
            direction,
            tx,
        );
        (conn, net)
    }

    fn frame(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    fn handshake_init(uuid: &str) -> Vec<u8> {
        frame(json!({"type": "handshake_init", "uuid": uuid, "node_version": "1.0.0", "timestamp": 1.0}))
    }

    async fn event_kinds(node: &TestNode) -> Vec<SecurityEventKind> {
        node.ctx
            .security
            .lock()
            .await
            .security_events()
            .into_iter()
            .map(|e| e.kind)
            .collect()
    }

    #[tokio::test]
    async fn accepted_connection_sends_handshake_init() {
        let node = test_node("self", SecurityPolicy::default());
        let (mut conn, mut net) = connection(&node, "10.0.0.1", Direction::Inbound).await;

        assert_eq!(conn.on_connect().await.unwrap(), Flow::Continue);
        assert_eq!(conn.state(), ConnState::AwaitingHandshake);

        let sent = net.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "handshake_init");
        assert_eq!(sent[0]["uuid"], "self");
        assert_eq!(sent[0]["node_version"], "1.0.0");
        assert!(sent[0].get("auth_token").is_none());
        assert_eq!(node.ctx.registry.lock().await.connected_count(), 1);
    }

    #[tokio::test]
    async fn blacklisted_ip_is_closed_silently() {
        let mut policy = SecurityPolicy::default();
        policy.blocked_ips.insert("10.6.6.6".into());
        let node = test_node("self", policy);
        let (mut conn, mut net) = connection(&node, "10.6.6.6", Direction::Inbound).await;

        assert_eq!(conn.on_connect().await.unwrap(), Flow::Close);
        assert!(net.sent().is_empty());
        assert!(node.ctx.registry.lock().await.is_empty());
        assert_eq!(event_kinds(&node).await, vec![SecurityEventKind::ConnectionRejected]);
        assert_eq!(node.ctx.metrics.connections_rejected.get(), 1);
    }

    #[tokio::test]
    async fn handshake_init_completes_and_is_answered() {
        let node = test_node("self", SecurityPolicy::default());
        let (mut conn, mut net) = connection(&node, "10.0.0.1", Direction::Inbound).await;
        conn.on_connect().await.unwrap();
        net.sent();

        assert_eq!(conn.on_data(&handshake_init("peer-1")).await, Flow::Continue);
        assert_eq!(conn.state(), ConnState::HandshakeComplete);
        assert_eq!(conn.peer_uuid(), Some("peer-1"));

        let sent = net.sent_messages();
        assert_eq!(sent[0]["type"], "handshake_response");
        assert!(node.ctx.registry.lock().await.known_uuids().contains("peer-1"));
        assert!(event_kinds(&node).await.contains(&SecurityEventKind::HandshakeCompleted));

        // A second handshake is ignored.
        conn.on_data(&handshake_init("peer-2")).await;
        assert_eq!(conn.peer_uuid(), Some("peer-1"));
        assert!(net.sent().is_empty());
    }

    #[tokio::test]
    async fn handshake_response_is_not_answered() {
        let node = test_node("self", SecurityPolicy::default());
        let (mut conn, mut net) = connection(&node, "10.0.0.1", Direction::Outbound).await;
        conn.on_connect().await.unwrap();
        net.sent();

        let response = frame(json!({"type": "handshake_response", "uuid": "peer-1"}));
        conn.on_data(&response).await;
        assert_eq!(conn.state(), ConnState::HandshakeComplete);
        assert!(net.sent().is_empty());
    }

    #[tokio::test]
    async fn own_uuid_closes_and_remembers_the_address() {
        let node = test_node("self", SecurityPolicy::default());
        let (mut conn, _net) = connection(&node, "127.0.0.1", Direction::Outbound).await;
        conn.on_connect().await.unwrap();

        assert_eq!(conn.on_data(&handshake_init("self")).await, Flow::Close);
        conn.on_disconnect().await;

        let mut registry = node.ctx.registry.lock().await;
        assert!(registry.is_empty());
        let own = PeerAddress::new("127.0.0.1", 40000);
        assert_eq!(registry.update_peer_list(&[own]), 0);
    }

    #[tokio::test]
    async fn second_connection_with_same_uuid_loses() {
        let node = test_node("self", SecurityPolicy::default());
        let (mut first, _n1) = connection(&node, "10.0.0.1", Direction::Inbound).await;
        let (mut second, _n2) = connection(&node, "10.0.0.2", Direction::Inbound).await;
        first.on_connect().await.unwrap();
        second.on_connect().await.unwrap();

        assert_eq!(first.on_data(&handshake_init("peer-1")).await, Flow::Continue);
        assert_eq!(second.on_data(&handshake_init("peer-1")).await, Flow::Close);
        second.on_disconnect().await;

        let registry = node.ctx.registry.lock().await;
        assert_eq!(registry.connection_for_uuid("peer-1"), Some(first.id()));
        assert_eq!(registry.connected_count(), 1);
    }

    #[tokio::test]
    async fn blocked_uuid_is_rejected_after_handshake() {
        let mut policy = SecurityPolicy::default();
        policy.blocked_node_keys.insert("bad".into());
        policy.allowed_node_keys.insert("bad".into());
        let node = test_node("self", policy);
        let (mut conn, _net) = connection(&node, "10.0.0.1", Direction::Inbound).await;
        conn.on_connect().await.unwrap();

        assert_eq!(conn.on_data(&handshake_init("bad")).await, Flow::Close);
        assert!(event_kinds(&node)
            .await
            .contains(&SecurityEventKind::ConnectionRejectedAfterAuth));
    }

    #[tokio::test]
    async fn missing_auth_token_fails_authentication() {
        let policy = SecurityPolicy {
            secret_key: "net".into(),
            require_authentication: true,
            ..SecurityPolicy::default()
        };
        let node = test_node("self", policy);
        let (mut conn, mut net) = connection(&node, "10.0.0.1", Direction::Inbound).await;
        conn.on_connect().await.unwrap();

        let init = net.sent_messages().remove(0);
        assert!(init["auth_token"].is_string());
        assert!(init["challenge"].is_string());

        assert_eq!(conn.on_data(&handshake_init("peer-1")).await, Flow::Close);
        assert!(event_kinds(&node).await.contains(&SecurityEventKind::AuthenticationFailed));
    }

    #[tokio::test]
    async fn malformed_object_is_skipped() {
        let node = test_node("self", SecurityPolicy::default());
        let (mut conn, mut net) = connection(&node, "10.0.0.1", Direction::Inbound).await;
        conn.on_connect().await.unwrap();
        net.sent();

        let mut bytes = b"{\"type\": oops}".to_vec();
        bytes.extend(handshake_init("peer-1"));
        assert_eq!(conn.on_data(&bytes).await, Flow::Continue);
        assert_eq!(conn.state(), ConnState::HandshakeComplete);
        assert!(event_kinds(&node).await.contains(&SecurityEventKind::JsonDecodeError));
    }

    #[tokio::test]
    async fn split_reads_are_reassembled() {
        let node = test_node("self", SecurityPolicy::default());
        let (mut conn, _net) = connection(&node, "10.0.0.1", Direction::Inbound).await;
        conn.on_connect().await.unwrap();

        let bytes = handshake_init("peer-1");
        let (head, tail) = bytes.split_at(bytes.len() / 2);
        conn.on_data(head).await;
        assert_eq!(conn.state(), ConnState::AwaitingHandshake);
        conn.on_data(tail).await;
        assert_eq!(conn.state(), ConnState::HandshakeComplete);
    }

    #[tokio::test]
    async fn unknown_type_is_logged_and_ignored() {
        let node = test_node("self", SecurityPolicy::default());
        let (mut conn, _net) = connection(&node, "10.0.0.1", Direction::Inbound).await;
        conn.on_connect().await.unwrap();

        let flow = conn.on_data(&frame(json!({"type": "mystery"}))).await;
        assert_eq!(flow, Flow::Continue);
        assert!(event_kinds(&node).await.contains(&SecurityEventKind::UnknownMessageType));
    }

    #[tokio::test]
    async fn check_p2p_data_is_answered_from_the_store() {
        let node = test_node("self", SecurityPolicy::default());
        node.store
            .put(&SpammerRecord::flagged("42", json!({"banned": true}), json!({})))
            .unwrap();
        let (mut conn, mut net) = connection(&node, "10.0.0.1", Direction::Inbound).await;
        conn.on_connect().await.unwrap();
        conn.on_data(&handshake_init("peer-1")).await;
        net.sent();

        conn.on_data(&frame(json!({"type": "check_p2p_data", "user_id": 42}))).await;
        conn.on_data(&frame(json!({"type": "check_p2p_data", "user_id": "43"}))).await;
        let sent = net.sent_messages();
        assert_eq!(sent[0]["type"], "check_p2p_data_response");
        assert_eq!(sent[0]["user_id"], "42");
        assert_eq!(sent[0]["is_spammer"], true);
        assert_eq!(sent[0]["p2p_data"]["lols_bot_data"]["banned"], true);
        assert_eq!(sent[1]["error"], "No spammer data found");
    }

    #[tokio::test]
    async fn response_resolves_the_pending_request() {
        let node = test_node("self", SecurityPolicy::default());
        let (mut conn, _net) = connection(&node, "10.0.0.1", Direction::Outbound).await;
        conn.on_connect().await.unwrap();
        let slot = node.ctx.pending.register(conn.id()).await.unwrap();

        conn.on_data(&frame(json!({
            "type": "check_p2p_data_response",
            "user_id": "42",
            "error": "No spammer data found",
        })))
        .await;
        let answer = node
            .ctx
            .pending
            .wait(slot, std::time::Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(answer.error.as_deref(), Some("No spammer data found"));
    }

    #[tokio::test]
    async fn disconnect_fails_pending_request_and_releases_counters() {
        let node = test_node("self", SecurityPolicy::default());
        let (mut conn, _net) = connection(&node, "10.0.0.1", Direction::Outbound).await;
        conn.on_connect().await.unwrap();
        let slot = node.ctx.pending.register(conn.id()).await.unwrap();

        conn.on_disconnect().await;
        conn.on_disconnect().await;

        assert_eq!(
            node.ctx.pending.wait(slot, std::time::Duration::from_secs(1)).await,
            Err(RequestError::ConnectionLost)
        );
        assert_eq!(node.ctx.security.lock().await.stats().active_connections, 0);
        assert!(node.ctx.registry.lock().await.is_empty());
    }

    #[tokio::test]
    async fn gunban_without_source_is_dropped() {
        let node = test_node("self", SecurityPolicy::default());
        node.store.put(&SpammerRecord::new("42")).unwrap();
        let (mut conn, _net) = connection(&node, "10.0.0.1", Direction::Inbound).await;
        conn.on_connect().await.unwrap();

        conn.on_data(&frame(json!({"type": "gunban", "spammer_id": "42"}))).await;
        assert_eq!(node.store.len(), 1);

        conn.on_data(&frame(json!({"type": "spammer_info_removal", "user_id": "42"}))).await;
        assert!(node.store.is_empty());
    }

    #[tokio::test]
    async fn storage_failure_keeps_the_connection() {
        let node = test_node("self", SecurityPolicy::default());
        let (mut conn, _net) = connection(&node, "10.0.0.1", Direction::Inbound).await;
        conn.on_connect().await.unwrap();
        conn.on_data(&handshake_init("peer-1")).await;
        node.store.set_failing(true);

        let flow = conn
            .on_data(&frame(json!({"type": "spammer_info_broadcast", "user_id": "1"})))
            .await;
        assert_eq!(flow, Flow::Continue);
        assert!(event_kinds(&node).await.contains(&SecurityEventKind::MessageProcessingError));
    }

    #[tokio::test]
    async fn unsigned_messages_are_dropped_when_signatures_are_required() {
        let policy = SecurityPolicy {
            secret_key: "net".into(),
            enable_message_signing: true,
            reject_unsigned: true,
            ..SecurityPolicy::default()
        };
        let node = test_node("self", policy);
        let (mut conn, mut net) = connection(&node, "10.0.0.1", Direction::Inbound).await;
        conn.on_connect().await.unwrap();
        net.sent();

        assert_eq!(conn.on_data(&handshake_init("peer-1")).await, Flow::Continue);
        assert_eq!(conn.state(), ConnState::AwaitingHandshake);
        assert!(event_kinds(&node).await.contains(&SecurityEventKind::InvalidSignature));

        let mut signed = json!({"type": "handshake_init", "uuid": "peer-1", "timestamp": 1.0});
        node.ctx
            .security
            .lock()
            .await
            .sign_message(&mut signed, "peer-1")
            .unwrap();
        conn.on_data(&frame(signed)).await;
        assert_eq!(conn.state(), ConnState::HandshakeComplete);
    }
}
