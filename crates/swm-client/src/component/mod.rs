//! The component — the aggregate owning group membership, the pending-query
//! table, and the background dispatcher.
//!
//! [`Component::spawn`] takes a validated config and a transport, walks the
//! startup sequence (headers, optional gossip rendezvous, start, join,
//! discovery settle), then hands the transport to a dispatcher task. Callers
//! talk to the dispatcher over a command channel; resolved replies come back
//! over per-query oneshot channels, so the caller-facing API is an ordinary
//! request/response one on top of a one-to-many broadcast transport.

mod r#loop;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use swm_transport::GroupTransport;

use crate::config::{ComponentConfig, TimeoutPolicy};
use crate::envelope::Envelope;
use crate::error::SwmClientError;
use crate::pending::PendingQueryTable;
use crate::rsg;
use crate::types::{self, PeerId, FIELD_QUERY_ID};

/// Commands the caller side sends to the dispatcher task.
pub(crate) enum Command {
    /// Broadcast wire text to the component's group.
    Shout { text: String },
    /// Send wire text directly to one peer.
    Whisper { to: PeerId, text: String },
    /// Graceful stop. Dropping the component has the same effect — the
    /// dispatcher exits when the command channel closes.
    Shutdown,
}

/// The receive half of a registered query's reply channel, parked until a
/// caller waits on it. `stashed_at` lets the dispatcher sweep slots whose
/// reply nobody ever collects.
pub(crate) struct ReplySlot {
    rx: oneshot::Receiver<String>,
    stashed_at: Instant,
}

impl ReplySlot {
    pub(crate) fn is_stale(&self, max_age: Duration) -> bool {
        self.stashed_at.elapsed() >= max_age
    }
}

/// A live client node on the world-model group network.
pub struct Component {
    name: String,
    local_id: PeerId,
    config: ComponentConfig,
    cmd_tx: mpsc::Sender<Command>,
    pending: Arc<Mutex<PendingQueryTable>>,
    waiters: Arc<Mutex<HashMap<String, ReplySlot>>>,
    alive: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Component {
    /// Validate the config, bring the transport online, and start the
    /// dispatcher. On error nothing is left running — the transport is
    /// dropped and no task was spawned.
    pub async fn spawn<T: GroupTransport>(
        config: ComponentConfig,
        mut transport: T,
    ) -> Result<Self, SwmClientError> {
        config.validate()?;
        let name = config.short_name.clone();

        // Every config key becomes a discoverable capability header.
        for (key, value) in config.headers() {
            transport.set_header(&key, &value);
        }

        match &config.gossip_endpoint {
            Some(endpoint) => {
                tracing::info!("[{name}] using gossip rendezvous {endpoint}");
                transport.gossip_connect(endpoint).await?;
            }
            None => tracing::warn!("[{name}] no gossip rendezvous configured"),
        }

        transport.start().await?;
        let local_id = transport.local_id();
        transport.join(&config.group).await?;

        // Give peers time to discover each other before the first query.
        if config.settle_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.settle_ms)).await;
        }

        let pending = Arc::new(Mutex::new(PendingQueryTable::new()));
        let waiters = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        // A query nobody collected within ten timeouts is abandoned.
        let stale_after = Duration::from_millis(config.timeout_ms().saturating_mul(10));
        let task = tokio::spawn(r#loop::dispatch_loop(
            transport,
            name.clone(),
            config.group.clone(),
            Arc::clone(&pending),
            Arc::clone(&waiters),
            stale_after,
            cmd_rx,
            Arc::clone(&alive),
        ));

        tracing::info!("[{name}] component active, local id {local_id}");
        Ok(Self {
            name,
            local_id,
            config,
            cmd_tx,
            pending,
            waiters,
            alive,
            task: Mutex::new(Some(task)),
        })
    }

    /// This component's identity within the group.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The transport identity backing this component.
    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn config(&self) -> &ComponentConfig {
        &self.config
    }

    /// Whether the dispatcher is still running.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Number of queries currently awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    /// Number of reply slots parked for a future
    /// [`wait_for_reply`](Self::wait_for_reply).
    pub fn waiter_count(&self) -> usize {
        self.lock_waiters().len()
    }

    /// Wrap a payload in the standard request envelope and register it as a
    /// pending query. If the payload has no correlation id, a fresh UUID
    /// `queryId` is attached. Returns the wire text ready to shout.
    ///
    /// Encoding and registration are coupled: every encoded outbound message
    /// is a trackable query.
    pub fn encode_message(&self, payload: Value) -> Result<String, SwmClientError> {
        self.encode_envelope(Envelope::request(payload))
    }

    /// Like [`encode_message`](Self::encode_message), for a caller-built
    /// envelope (e.g. the legacy mediator family).
    pub fn encode_envelope(&self, mut envelope: Envelope) -> Result<String, SwmClientError> {
        if !self.is_alive() {
            return Err(SwmClientError::ComponentDown);
        }

        if envelope.correlation_id().is_none() {
            let Value::Object(map) = &mut envelope.payload else {
                // A scalar payload has nowhere to carry an id.
                return Err(SwmClientError::MissingCorrelationId);
            };
            let id = uuid::Uuid::new_v4().to_string();
            tracing::debug!("[{}] payload has no queryId, adding {id}", self.name);
            map.insert(FIELD_QUERY_ID.to_string(), Value::String(id));
        }
        let id = envelope
            .correlation_id()
            .ok_or(SwmClientError::MissingCorrelationId)?
            .to_string();

        let rx = self
            .lock_pending()
            .register(id.clone(), self.local_id, envelope.clone());
        self.lock_waiters().insert(
            id,
            ReplySlot {
                rx,
                stashed_at: Instant::now(),
            },
        );

        Ok(envelope.to_wire())
    }

    /// Broadcast wire text to the component's group.
    pub async fn shout(&self, text: &str) -> Result<(), SwmClientError> {
        self.cmd_tx
            .send(Command::Shout {
                text: text.to_string(),
            })
            .await
            .map_err(|_| SwmClientError::ComponentDown)
    }

    /// Send wire text directly to one peer.
    pub async fn whisper(&self, to: PeerId, text: &str) -> Result<(), SwmClientError> {
        self.cmd_tx
            .send(Command::Whisper {
                to,
                text: text.to_string(),
            })
            .await
            .map_err(|_| SwmClientError::ComponentDown)
    }

    /// Encode, register, and broadcast a payload. Returns the wire text to
    /// pass to [`wait_for_reply`](Self::wait_for_reply).
    ///
    /// Every submitted query should eventually be waited on; a reply nobody
    /// collects is discarded by the dispatcher's periodic stale sweep.
    pub async fn submit(&self, payload: Value) -> Result<String, SwmClientError> {
        let wire = self.encode_message(payload)?;
        self.shout(&wire).await?;
        Ok(wire)
    }

    /// Encode, register, and broadcast a caller-built envelope.
    pub async fn submit_envelope(&self, envelope: Envelope) -> Result<String, SwmClientError> {
        let wire = self.encode_envelope(envelope)?;
        self.shout(&wire).await?;
        Ok(wire)
    }

    /// Block until the reply matching a just-sent message arrives, or the
    /// timeout expires.
    ///
    /// The correlation id is extracted from the sent wire text (`queryId`,
    /// legacy `UID` fallback); a message without one is a hard error and no
    /// wait is performed. On timeout the configured [`TimeoutPolicy`]
    /// decides whether the whole component is torn down (fail-fast, the
    /// default) or only this call fails.
    pub async fn wait_for_reply(
        &self,
        sent: &str,
        timeout_ms: u64,
    ) -> Result<String, SwmClientError> {
        if timeout_ms == 0 {
            return Err(SwmClientError::InvalidTimeout);
        }

        let sent_json: Value =
            serde_json::from_str(sent).map_err(|e| SwmClientError::Decode {
                reason: format!("sent message is not valid JSON: {e}"),
            })?;
        let id = sent_json
            .get("payload")
            .and_then(types::correlation_id)
            .ok_or(SwmClientError::MissingCorrelationId)?
            .to_string();

        let slot = self
            .lock_waiters()
            .remove(&id)
            .ok_or_else(|| SwmClientError::UnknownQuery { id: id.clone() })?;

        match tokio::time::timeout(Duration::from_millis(timeout_ms), slot.rx).await {
            Ok(Ok(payload_text)) => {
                tracing::debug!("[{}] reply to {id}: {payload_text}", self.name);
                Ok(payload_text)
            }
            // Channel closed without a reply: the table was drained during
            // component teardown.
            Ok(Err(_)) => Err(SwmClientError::ComponentDown),
            Err(_) => {
                // Nobody will consume this entry any more.
                self.lock_pending().resolve(&id);
                match self.config.timeout_policy {
                    TimeoutPolicy::FailFast => {
                        tracing::warn!(
                            "[{}] no reply to {id} within {timeout_ms} ms, stopping component",
                            self.name
                        );
                        self.shutdown().await;
                    }
                    TimeoutPolicy::FailLocal => {
                        tracing::warn!("[{}] no reply to {id} within {timeout_ms} ms", self.name);
                    }
                }
                Err(SwmClientError::Timeout { id, timeout_ms })
            }
        }
    }

    /// Submit a payload and wait for its reply with the configured default
    /// timeout. Returns the raw reply payload text.
    pub async fn request(&self, payload: Value) -> Result<String, SwmClientError> {
        let wire = self.submit(payload).await?;
        self.wait_for_reply(&wire, self.config.timeout_ms()).await
    }

    // ── High-level world-model helpers ─────────────────────────────────

    /// Ask the world model for its root node id.
    pub async fn root_node_id(&self) -> Result<String, SwmClientError> {
        let reply = self.request(rsg::root_node_query()).await?;
        let reply: Value = parse_reply(&reply)?;
        reply
            .get("rootId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SwmClientError::Decode {
                reason: "reply has no rootId".into(),
            })
    }

    /// Find the first node carrying an attribute, e.g.
    /// `("name", "observations")`. `Ok(None)` when no node matches.
    pub async fn node_by_attribute(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<String>, SwmClientError> {
        let reply = self.request(rsg::nodes_by_attribute(key, value)).await?;
        let reply: Value = parse_reply(&reply)?;
        Ok(reply
            .get("ids")
            .and_then(Value::as_array)
            .and_then(|ids| ids.first())
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Query the legacy mediator for its id, using the `UID`-correlated
    /// message family.
    pub async fn mediator_id(&self) -> Result<String, SwmClientError> {
        let envelope = Envelope::mediator_request(rsg::mediator_uid_payload());
        let wire = self.submit_envelope(envelope).await?;
        let reply = self.wait_for_reply(&wire, self.config.timeout_ms()).await?;
        let reply: Value = parse_reply(&reply)?;
        reply
            .get("remote")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SwmClientError::Decode {
                reason: "mediator reply has no remote id".into(),
            })
    }

    /// Stop the dispatcher, leave the group, release the transport, and
    /// discard every in-flight query. Re-entrant: a second call (or a call
    /// on an already-dead component) is a no-op.
    pub async fn shutdown(&self) {
        let task = self.lock_task().take();
        let Some(task) = task else {
            return;
        };

        tracing::info!("[{}] stopping component", self.name);
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.cmd_tx.send(Command::Shutdown).await;
        let _ = task.await;

        let discarded = self.lock_pending().drain_all();
        if discarded > 0 {
            tracing::warn!("[{}] discarded {discarded} in-flight queries", self.name);
        }
        self.lock_waiters().clear();
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, PendingQueryTable> {
        self.pending.lock().expect("pending table lock poisoned")
    }

    fn lock_waiters(&self) -> std::sync::MutexGuard<'_, HashMap<String, ReplySlot>> {
        self.waiters.lock().expect("waiter map lock poisoned")
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().expect("task handle lock poisoned")
    }
}

fn parse_reply(text: &str) -> Result<Value, SwmClientError> {
    serde_json::from_str(text).map_err(|e| SwmClientError::Decode {
        reason: format!("reply is not valid JSON: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use swm_transport::{GroupTransport, LocalBus};

    fn test_config(name: &str) -> ComponentConfig {
        ComponentConfig {
            short_name: name.to_string(),
            timeout: 5000,
            no_of_updates: 10,
            no_of_queries: 10,
            no_of_fcn_block_calls: 10,
            gossip_endpoint: None,
            group: "local".to_string(),
            settle_ms: 0,
            timeout_policy: TimeoutPolicy::FailFast,
        }
    }

    #[tokio::test]
    async fn invalid_config_never_spawns() {
        let bus = LocalBus::new();
        let mut config = test_config("agentA");
        config.timeout = 0;
        let result = Component::spawn(config, bus.endpoint("agentA")).await;
        assert!(matches!(result, Err(SwmClientError::Config { .. })));
        // Nothing was started on the bus.
        assert_eq!(bus.peer_count(), 0);
    }

    #[tokio::test]
    async fn encode_attaches_query_id_and_registers() {
        let bus = LocalBus::new();
        let component = Component::spawn(test_config("agentA"), bus.endpoint("agentA"))
            .await
            .unwrap();

        let wire = component
            .encode_message(json!({ "query": "GET_ROOT_NODE" }))
            .unwrap();
        let envelope = Envelope::decode(&wire).unwrap();
        let id = envelope.correlation_id().expect("queryId attached");
        assert!(!id.is_empty());
        assert_eq!(component.pending_count(), 1);

        component.shutdown().await;
    }

    #[tokio::test]
    async fn encode_keeps_existing_id() {
        let bus = LocalBus::new();
        let component = Component::spawn(test_config("agentA"), bus.endpoint("agentA"))
            .await
            .unwrap();

        let wire = component
            .encode_message(json!({ "queryId": "fixed-id", "query": "GET_NODES" }))
            .unwrap();
        let envelope = Envelope::decode(&wire).unwrap();
        assert_eq!(envelope.correlation_id(), Some("fixed-id"));

        component.shutdown().await;
    }

    #[tokio::test]
    async fn scalar_payload_cannot_be_tracked() {
        let bus = LocalBus::new();
        let component = Component::spawn(test_config("agentA"), bus.endpoint("agentA"))
            .await
            .unwrap();

        let result = component.encode_message(json!("just a string"));
        assert!(matches!(
            result,
            Err(SwmClientError::MissingCorrelationId)
        ));

        component.shutdown().await;
    }

    #[tokio::test]
    async fn zero_timeout_fails_immediately() {
        let bus = LocalBus::new();
        let component = Component::spawn(test_config("agentA"), bus.endpoint("agentA"))
            .await
            .unwrap();

        let wire = component.submit(json!({ "query": "GET_NODES" })).await.unwrap();
        assert!(matches!(
            component.wait_for_reply(&wire, 0).await,
            Err(SwmClientError::InvalidTimeout)
        ));
        // The hard error performed no wait and did not tear anything down.
        assert!(component.is_alive());

        component.shutdown().await;
    }

    #[tokio::test]
    async fn wait_without_correlation_id_is_hard_error() {
        let bus = LocalBus::new();
        let component = Component::spawn(test_config("agentA"), bus.endpoint("agentA"))
            .await
            .unwrap();

        let sent = r#"{"metamodel":"SHERPA","model":"RSGQuery","type":"RSGQuery","payload":{"query":"GET_NODES"}}"#;
        assert!(matches!(
            component.wait_for_reply(sent, 100).await,
            Err(SwmClientError::MissingCorrelationId)
        ));

        component.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn uncollected_replies_are_swept() {
        let bus = LocalBus::new();
        let component = Component::spawn(test_config("agentA"), bus.endpoint("agentA"))
            .await
            .unwrap();
        let mut responder = bus.endpoint("fw0");
        responder.start().await.unwrap();
        responder.join("local").await.unwrap();

        // A reply arrives but nobody ever waits for it.
        let _orphan = component
            .submit(json!({ "queryId": "Q-orphan", "query": "GET_NODES" }))
            .await
            .unwrap();
        let reply = Envelope {
            metamodel: "SHERPA".to_string(),
            model: "RSGQuery".to_string(),
            kind: "RSGQueryResult".to_string(),
            payload: json!({ "queryId": "Q-orphan", "querySuccess": true }),
        };
        responder.shout("local", &reply.to_wire()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(component.pending_count(), 0);
        assert_eq!(component.waiter_count(), 1);

        // A query nobody answers and nobody waits for.
        let silent = component
            .submit(json!({ "queryId": "Q-silent", "query": "GET_NODES" }))
            .await
            .unwrap();
        assert_eq!(component.pending_count(), 1);
        assert_eq!(component.waiter_count(), 2);

        // Stale age is 10 × 5000 ms; the sweep at the 60 s tick clears both.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(component.waiter_count(), 0);
        assert_eq!(component.pending_count(), 0);
        assert!(matches!(
            component.wait_for_reply(&silent, 100).await,
            Err(SwmClientError::UnknownQuery { .. })
        ));
        assert!(component.is_alive());

        component.shutdown().await;
    }

    #[tokio::test]
    async fn double_shutdown_is_noop() {
        let bus = LocalBus::new();
        let component = Component::spawn(test_config("agentA"), bus.endpoint("agentA"))
            .await
            .unwrap();
        component.shutdown().await;
        assert!(!component.is_alive());
        component.shutdown().await;
        assert_eq!(bus.peer_count(), 0);
    }

    #[tokio::test]
    async fn encode_after_shutdown_fails() {
        let bus = LocalBus::new();
        let component = Component::spawn(test_config("agentA"), bus.endpoint("agentA"))
            .await
            .unwrap();
        component.shutdown().await;
        assert!(matches!(
            component.encode_message(json!({})),
            Err(SwmClientError::ComponentDown)
        ));
    }
}
