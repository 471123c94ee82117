//! SWM group transport layer.
//!
//! Abstracts a gossip-discovered broadcast group (peers enter and exit, join
//! named groups, SHOUT to every member, WHISPER to one) behind a stable trait
//! so the protocol layer never depends on a concrete network stack.
//!
//! # Quick start
//!
//! ```rust
//! use swm_transport::{GroupTransport, LocalBus};
//!
//! # async fn example() -> Result<(), swm_transport::SwmTransportError> {
//! let bus = LocalBus::new();
//! let mut node = bus.endpoint("fw0");
//! node.start().await?;
//! node.join("local").await?;
//! node.shout("local", r#"{"hello":"world"}"#).await?;
//! node.stop().await?;
//! # Ok(())
//! # }
//! ```

mod bus;
mod error;

pub use bus::{BusEndpoint, LocalBus};
pub use error::SwmTransportError;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// SWM network identity — a UUID assigned when the transport endpoint is
/// created. Displayed and parsed in canonical hyphenated form.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(uuid::Uuid);

impl PeerId {
    /// Generate a fresh random identity.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.0.to_string();
        write!(f, "PeerId({}...)", &hex[..8])
    }
}

impl FromStr for PeerId {
    type Err = SwmTransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s
            .parse()
            .map_err(|_| SwmTransportError::InvalidPeerId(s.to_string()))?;
        Ok(Self(id))
    }
}

impl serde::Serialize for PeerId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for PeerId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An event observed on the group socket.
///
/// `Shout` is the only variant carrying protocol envelopes; the rest are
/// membership and liveness notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupEvent {
    /// A peer appeared on the network, with its capability headers.
    Enter {
        peer: PeerId,
        name: String,
        headers: HashMap<String, String>,
        address: String,
    },
    /// A peer left the network (or was unreachable long enough to be dropped).
    Exit { peer: PeerId, name: String },
    /// A peer joined a named group.
    Join {
        peer: PeerId,
        name: String,
        group: String,
    },
    /// A peer left a named group.
    Leave {
        peer: PeerId,
        name: String,
        group: String,
    },
    /// A broadcast message delivered to every member of a group.
    Shout {
        peer: PeerId,
        name: String,
        group: String,
        message: String,
    },
    /// A direct message from one peer to this one.
    Whisper {
        peer: PeerId,
        name: String,
        message: String,
    },
    /// Liveness warning: a peer stopped answering pings but has not exited.
    Evasive { peer: PeerId, name: String },
}

/// A node on a gossip-discovered broadcast network.
///
/// In production: an impl over a real group messaging stack (e.g. a Zyre
/// binding). In tests and single-process deployments: [`BusEndpoint`] over
/// the in-process [`LocalBus`].
#[async_trait::async_trait]
pub trait GroupTransport: Send + 'static {
    /// This endpoint's network identity.
    fn local_id(&self) -> PeerId;

    /// Set a capability header, visible to peers in their `Enter` event.
    /// Must be called before [`start`](Self::start) to be discoverable.
    fn set_header(&mut self, key: &str, value: &str);

    /// Connect to a discovery rendezvous endpoint. Optional: transports with
    /// implicit discovery (like the in-process bus) record and ignore this.
    async fn gossip_connect(&mut self, endpoint: &str) -> Result<(), SwmTransportError>;

    /// Bring the endpoint online: announce to peers, begin receiving events.
    async fn start(&mut self) -> Result<(), SwmTransportError>;

    /// Go offline: announce exit, stop receiving events.
    async fn stop(&mut self) -> Result<(), SwmTransportError>;

    /// Join a named group.
    async fn join(&mut self, group: &str) -> Result<(), SwmTransportError>;

    /// Leave a named group.
    async fn leave(&mut self, group: &str) -> Result<(), SwmTransportError>;

    /// Broadcast a message to every member of a group (best-effort).
    async fn shout(&self, group: &str, message: &str) -> Result<(), SwmTransportError>;

    /// Send a direct message to one peer.
    async fn whisper(&self, peer: PeerId, message: &str) -> Result<(), SwmTransportError>;

    /// Receive the next group event. Returns [`SwmTransportError::Closed`]
    /// once the endpoint is stopped and its queue is drained.
    async fn recv_event(&mut self) -> Result<GroupEvent, SwmTransportError>;
}
