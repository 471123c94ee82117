//! In-process broadcast bus.
//!
//! A [`LocalBus`] links any number of [`BusEndpoint`]s inside one process and
//! re-creates the observable behavior of a gossip group network: peers see
//! `Enter`/`Exit` for each other, `Join`/`Leave` for group membership, and
//! `Shout` fan-out to every group member except the sender. Discovery is
//! implicit (everyone on the bus sees everyone), so `gossip_connect` only
//! records the endpoint.
//!
//! Used by tests, demos, and single-process deployments. Production wires a
//! real group messaging stack behind the same [`GroupTransport`] trait.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::{GroupEvent, GroupTransport, PeerId, SwmTransportError};

/// Shared hub connecting in-process endpoints. Cheap to clone.
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Arc<Mutex<BusState>>,
}

#[derive(Default)]
struct BusState {
    peers: HashMap<PeerId, PeerSlot>,
    groups: HashMap<String, HashSet<PeerId>>,
}

struct PeerSlot {
    name: String,
    headers: HashMap<String, String>,
    tx: mpsc::UnboundedSender<GroupEvent>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new endpoint on this bus. It stays invisible to peers until
    /// [`GroupTransport::start`] is called.
    pub fn endpoint(&self, name: &str) -> BusEndpoint {
        BusEndpoint {
            bus: self.clone(),
            id: PeerId::random(),
            name: name.to_string(),
            headers: HashMap::new(),
            rx: None,
        }
    }

    /// Number of currently started endpoints.
    pub fn peer_count(&self) -> usize {
        self.inner.lock().expect("bus lock poisoned").peers.len()
    }
}

/// One node on a [`LocalBus`].
pub struct BusEndpoint {
    bus: LocalBus,
    id: PeerId,
    name: String,
    headers: HashMap<String, String>,
    rx: Option<mpsc::UnboundedReceiver<GroupEvent>>,
}

impl BusEndpoint {
    fn address(&self) -> String {
        format!("inproc://{}", self.name)
    }
}

#[async_trait::async_trait]
impl GroupTransport for BusEndpoint {
    fn local_id(&self) -> PeerId {
        self.id
    }

    fn set_header(&mut self, key: &str, value: &str) {
        self.headers.insert(key.to_string(), value.to_string());
    }

    async fn gossip_connect(&mut self, endpoint: &str) -> Result<(), SwmTransportError> {
        // Discovery on the bus is implicit; a rendezvous point is meaningless.
        tracing::debug!(endpoint, "local bus ignores gossip rendezvous");
        Ok(())
    }

    async fn start(&mut self) -> Result<(), SwmTransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.bus.inner.lock().expect("bus lock poisoned");

        // Mutual discovery: existing peers learn about us, we learn about them.
        for (peer, slot) in &state.peers {
            let _ = slot.tx.send(GroupEvent::Enter {
                peer: self.id,
                name: self.name.clone(),
                headers: self.headers.clone(),
                address: self.address(),
            });
            let _ = tx.send(GroupEvent::Enter {
                peer: *peer,
                name: slot.name.clone(),
                headers: slot.headers.clone(),
                address: format!("inproc://{}", slot.name),
            });
        }

        state.peers.insert(
            self.id,
            PeerSlot {
                name: self.name.clone(),
                headers: self.headers.clone(),
                tx,
            },
        );
        self.rx = Some(rx);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SwmTransportError> {
        let mut state = self.bus.inner.lock().expect("bus lock poisoned");
        if state.peers.remove(&self.id).is_none() {
            return Ok(()); // never started, or stopped twice
        }
        for members in state.groups.values_mut() {
            members.remove(&self.id);
        }
        for slot in state.peers.values() {
            let _ = slot.tx.send(GroupEvent::Exit {
                peer: self.id,
                name: self.name.clone(),
            });
        }
        self.rx = None;
        Ok(())
    }

    async fn join(&mut self, group: &str) -> Result<(), SwmTransportError> {
        if self.rx.is_none() {
            return Err(SwmTransportError::NotStarted);
        }
        let mut state = self.bus.inner.lock().expect("bus lock poisoned");
        let members = state.groups.entry(group.to_string()).or_default();
        if !members.insert(self.id) {
            return Ok(()); // already a member
        }
        let members = members.clone();
        for peer in members {
            if peer == self.id {
                continue;
            }
            if let Some(slot) = state.peers.get(&peer) {
                let _ = slot.tx.send(GroupEvent::Join {
                    peer: self.id,
                    name: self.name.clone(),
                    group: group.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn leave(&mut self, group: &str) -> Result<(), SwmTransportError> {
        let mut state = self.bus.inner.lock().expect("bus lock poisoned");
        let Some(members) = state.groups.get_mut(group) else {
            return Ok(());
        };
        if !members.remove(&self.id) {
            return Ok(());
        }
        let members = members.clone();
        for peer in members {
            if let Some(slot) = state.peers.get(&peer) {
                let _ = slot.tx.send(GroupEvent::Leave {
                    peer: self.id,
                    name: self.name.clone(),
                    group: group.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn shout(&self, group: &str, message: &str) -> Result<(), SwmTransportError> {
        let state = self.bus.inner.lock().expect("bus lock poisoned");
        if !state.peers.contains_key(&self.id) {
            return Err(SwmTransportError::NotStarted);
        }
        // Best-effort: a shout to a group with no other members is a no-op.
        let Some(members) = state.groups.get(group) else {
            return Ok(());
        };
        for peer in members {
            if *peer == self.id {
                continue; // the sender does not hear its own shout
            }
            if let Some(slot) = state.peers.get(peer) {
                let _ = slot.tx.send(GroupEvent::Shout {
                    peer: self.id,
                    name: self.name.clone(),
                    group: group.to_string(),
                    message: message.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn whisper(&self, peer: PeerId, message: &str) -> Result<(), SwmTransportError> {
        let state = self.bus.inner.lock().expect("bus lock poisoned");
        let slot = state
            .peers
            .get(&peer)
            .ok_or_else(|| SwmTransportError::UnknownPeer(peer.to_string()))?;
        let _ = slot.tx.send(GroupEvent::Whisper {
            peer: self.id,
            name: self.name.clone(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn recv_event(&mut self) -> Result<GroupEvent, SwmTransportError> {
        let rx = self.rx.as_mut().ok_or(SwmTransportError::NotStarted)?;
        rx.recv().await.ok_or(SwmTransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();
    }

    #[tokio::test]
    async fn start_announces_both_ways() {
        init_tracing();
        let bus = LocalBus::new();
        let mut alice = bus.endpoint("alice");
        let mut bob = bus.endpoint("bob");
        bob.set_header("type", "responder");

        alice.start().await.unwrap();
        bob.start().await.unwrap();

        // Alice sees Bob enter, with his headers.
        let event = alice.recv_event().await.unwrap();
        let GroupEvent::Enter {
            peer,
            name,
            headers,
            address,
        } = event
        else {
            panic!("expected Enter, got {event:?}");
        };
        assert_eq!(peer, bob.local_id());
        assert_eq!(name, "bob");
        assert_eq!(headers.get("type").map(String::as_str), Some("responder"));
        assert_eq!(address, "inproc://bob");

        // Bob sees Alice enter.
        let event = bob.recv_event().await.unwrap();
        assert!(matches!(event, GroupEvent::Enter { name, .. } if name == "alice"));
    }

    #[tokio::test]
    async fn shout_reaches_members_but_not_sender() {
        init_tracing();
        let bus = LocalBus::new();
        let mut alice = bus.endpoint("alice");
        let mut bob = bus.endpoint("bob");
        let mut carol = bus.endpoint("carol");

        alice.start().await.unwrap();
        bob.start().await.unwrap();
        carol.start().await.unwrap();
        alice.join("local").await.unwrap();
        bob.join("local").await.unwrap();
        // carol never joins

        alice.shout("local", "hello group").await.unwrap();

        // Bob gets Alice's Enter, her Join, then the Shout.
        loop {
            match bob.recv_event().await.unwrap() {
                GroupEvent::Shout {
                    peer,
                    group,
                    message,
                    ..
                } => {
                    assert_eq!(peer, alice.local_id());
                    assert_eq!(group, "local");
                    assert_eq!(message, "hello group");
                    break;
                }
                GroupEvent::Enter { .. } | GroupEvent::Join { .. } => continue,
                other => panic!("unexpected event {other:?}"),
            }
        }

        // Alice must not hear her own shout; her queue only holds discovery
        // events from bob and carol.
        while let Ok(event) =
            tokio::time::timeout(std::time::Duration::from_millis(20), alice.recv_event()).await
        {
            assert!(!matches!(event.unwrap(), GroupEvent::Shout { .. }));
        }
    }

    #[tokio::test]
    async fn whisper_is_direct() {
        let bus = LocalBus::new();
        let mut alice = bus.endpoint("alice");
        let mut bob = bus.endpoint("bob");
        alice.start().await.unwrap();
        bob.start().await.unwrap();

        alice.whisper(bob.local_id(), "psst").await.unwrap();

        loop {
            match bob.recv_event().await.unwrap() {
                GroupEvent::Whisper { peer, message, .. } => {
                    assert_eq!(peer, alice.local_id());
                    assert_eq!(message, "psst");
                    break;
                }
                GroupEvent::Enter { .. } => continue,
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn whisper_to_unknown_peer_fails() {
        let bus = LocalBus::new();
        let mut alice = bus.endpoint("alice");
        alice.start().await.unwrap();

        let ghost = PeerId::random();
        assert!(matches!(
            alice.whisper(ghost, "anyone?").await,
            Err(SwmTransportError::UnknownPeer(_))
        ));
    }

    #[tokio::test]
    async fn stop_emits_exit_and_clears_membership() {
        let bus = LocalBus::new();
        let mut alice = bus.endpoint("alice");
        let mut bob = bus.endpoint("bob");
        alice.start().await.unwrap();
        bob.start().await.unwrap();
        alice.join("local").await.unwrap();
        bob.join("local").await.unwrap();

        bob.stop().await.unwrap();
        assert_eq!(bus.peer_count(), 1);

        loop {
            match alice.recv_event().await.unwrap() {
                GroupEvent::Exit { peer, name } => {
                    assert_eq!(peer, bob.local_id());
                    assert_eq!(name, "bob");
                    break;
                }
                GroupEvent::Enter { .. } | GroupEvent::Join { .. } => continue,
                other => panic!("unexpected event {other:?}"),
            }
        }

        // Bob is gone from the group: Alice's shout reaches nobody and the
        // bus does not error.
        alice.shout("local", "still there?").await.unwrap();
    }

    #[tokio::test]
    async fn double_stop_is_noop() {
        let bus = LocalBus::new();
        let mut alice = bus.endpoint("alice");
        alice.start().await.unwrap();
        alice.stop().await.unwrap();
        alice.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unstarted_endpoint_cannot_join_or_recv() {
        let bus = LocalBus::new();
        let mut alice = bus.endpoint("alice");
        assert!(matches!(
            alice.join("local").await,
            Err(SwmTransportError::NotStarted)
        ));
        assert!(matches!(
            alice.recv_event().await,
            Err(SwmTransportError::NotStarted)
        ));
    }
}
