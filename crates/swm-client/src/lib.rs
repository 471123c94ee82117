//! Request/reply client for a gossip-discovered world-model group.
//!
//! The world model answers queries by broadcasting results back to the same
//! group they were asked on, correlated only by an id embedded in the JSON
//! payload. This crate turns that into a blocking request/response API:
//!
//! - [`Envelope`] — the `{metamodel, model, type, payload}` wire format;
//! - [`PendingQueryTable`] — in-flight queries keyed by correlation id;
//! - [`Component`] — lifecycle, background dispatcher, and
//!   [`wait_for_reply`](Component::wait_for_reply);
//! - [`rsg`] — payload builders for the world-model query dialect;
//! - [`ComponentConfig`] — JSON config mirrored into discovery headers.
//!
//! ```no_run
//! use serde_json::json;
//! use swm_client::{Component, ComponentConfig};
//! use swm_transport::LocalBus;
//!
//! # async fn demo() -> Result<(), swm_client::SwmClientError> {
//! let config = ComponentConfig::from_value(json!({
//!     "short-name": "agentA",
//!     "timeout": 5000,
//!     "no_of_updates": 10,
//!     "no_of_queries": 10,
//!     "no_of_fcn_block_calls": 10,
//! }))?;
//! let bus = LocalBus::new();
//! let component = Component::spawn(config, bus.endpoint("agentA")).await?;
//! let root = component.root_node_id().await?;
//! component.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod component;
pub mod config;
pub mod envelope;
pub mod error;
pub mod pending;
pub mod rsg;
pub mod types;

pub use component::Component;
pub use config::{ComponentConfig, TimeoutPolicy};
pub use envelope::Envelope;
pub use error::SwmClientError;
pub use pending::{PendingQuery, PendingQueryTable};
pub use types::PeerId;
