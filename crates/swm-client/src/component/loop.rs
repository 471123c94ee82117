//! The dispatcher task: the single consumer of the transport's event stream.
//!
//! All group traffic funnels through here. SHOUT messages are decoded and
//! matched against the pending-query table; everything else is logged for
//! observability. Outbound sends arrive over the command channel so the
//! transport stays owned by this task alone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use swm_transport::{GroupEvent, GroupTransport, PeerId};

use super::{Command, ReplySlot};
use crate::envelope::Envelope;
use crate::pending::PendingQueryTable;
use crate::types::{
    FIELD_QUERY_ID, FIELD_UID, KIND_MEDIATOR_RESULT, KIND_RSG_FUNCTION_BLOCK_RESULT,
    KIND_RSG_QUERY_RESULT, KIND_RSG_UPDATE_RESULT,
};

/// How often stale queries and uncollected reply slots are swept.
const EVICT_INTERVAL: Duration = Duration::from_secs(30);

#[allow(clippy::too_many_arguments)]
pub(super) async fn dispatch_loop<T: GroupTransport>(
    mut transport: T,
    name: String,
    group: String,
    pending: Arc<Mutex<PendingQueryTable>>,
    waiters: Arc<Mutex<HashMap<String, ReplySlot>>>,
    stale_after: Duration,
    mut cmd_rx: mpsc::Receiver<Command>,
    alive: Arc<AtomicBool>,
) {
    let mut evict = tokio::time::interval(EVICT_INTERVAL);
    evict.tick().await; // the first tick fires immediately, skip it

    loop {
        if !alive.load(Ordering::SeqCst) {
            break;
        }
        tokio::select! {
            event = transport.recv_event() => match event {
                Ok(event) => handle_event(&name, event, &pending),
                Err(e) => {
                    tracing::warn!("[{name}] event stream ended: {e}");
                    break;
                }
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Shout { text }) => {
                    if let Err(e) = transport.shout(&group, &text).await {
                        tracing::warn!("[{name}] shout failed: {e}");
                    }
                }
                Some(Command::Whisper { to, text }) => {
                    if let Err(e) = transport.whisper(to, &text).await {
                        tracing::warn!("[{name}] whisper to {to} failed: {e}");
                    }
                }
                // Channel closure means the component was dropped.
                Some(Command::Shutdown) | None => break,
            },
            _ = evict.tick() => {
                // Reply slots first: dropping one closes the pending entry's
                // channel, so the table sweep below catches it too.
                let swept = {
                    let mut waiters = waiters.lock().expect("waiter map lock poisoned");
                    let before = waiters.len();
                    waiters.retain(|_, slot| !slot.is_stale(stale_after));
                    before - waiters.len()
                };
                let evicted = pending
                    .lock()
                    .expect("pending table lock poisoned")
                    .evict_stale(stale_after);
                if swept > 0 || evicted > 0 {
                    tracing::debug!(
                        "[{name}] swept {swept} uncollected replies, {evicted} stale queries"
                    );
                }
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    if let Err(e) = transport.leave(&group).await {
        tracing::debug!("[{name}] leave failed: {e}");
    }
    if let Err(e) = transport.stop().await {
        tracing::warn!("[{name}] transport stop failed: {e}");
    }
    tracing::info!("[{name}] dispatcher stopped");
}

fn handle_event(name: &str, event: GroupEvent, pending: &Mutex<PendingQueryTable>) {
    match event {
        GroupEvent::Enter {
            peer,
            name: peer_name,
            headers,
            address,
        } => tracing::debug!(
            "[{name}] ENTER {peer} {peer_name} at {address} ({} headers)",
            headers.len()
        ),
        GroupEvent::Exit {
            peer,
            name: peer_name,
        } => tracing::debug!("[{name}] EXIT {peer} {peer_name}"),
        GroupEvent::Join {
            peer,
            name: peer_name,
            group,
        } => tracing::debug!("[{name}] JOIN {peer} {peer_name} -> {group}"),
        GroupEvent::Leave {
            peer,
            name: peer_name,
            group,
        } => tracing::debug!("[{name}] LEAVE {peer} {peer_name} <- {group}"),
        GroupEvent::Evasive {
            peer,
            name: peer_name,
        } => tracing::debug!("[{name}] EVASIVE {peer} {peer_name}"),
        GroupEvent::Whisper {
            peer,
            name: peer_name,
            message,
        } => tracing::debug!("[{name}] WHISPER {peer} {peer_name}: {message}"),
        GroupEvent::Shout {
            peer,
            name: peer_name,
            group,
            message,
        } => handle_shout(name, peer, &peer_name, &group, &message, pending),
    }
}

/// Only SHOUT traffic can carry a correlatable reply. Anything that does not
/// decode, is not a recognized result kind, or matches no pending query is
/// dropped with a debug log — a broadcast group routinely carries replies
/// meant for other nodes.
fn handle_shout(
    name: &str,
    peer: PeerId,
    peer_name: &str,
    group: &str,
    message: &str,
    pending: &Mutex<PendingQueryTable>,
) {
    tracing::trace!("[{name}] SHOUT {peer} {peer_name} @ {group}: {message}");

    let envelope = match Envelope::decode(message) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!("[{name}] dropping undecodable SHOUT from {peer_name}: {e}");
            return;
        }
    };

    let id_field = match envelope.kind.as_str() {
        KIND_RSG_UPDATE_RESULT | KIND_RSG_QUERY_RESULT | KIND_RSG_FUNCTION_BLOCK_RESULT => {
            FIELD_QUERY_ID
        }
        KIND_MEDIATOR_RESULT => FIELD_UID,
        other => {
            tracing::debug!("[{name}] ignoring message of type {other}");
            return;
        }
    };

    let Some(id) = envelope.payload.get(id_field).and_then(Value::as_str) else {
        tracing::debug!("[{name}] skipping {} without {id_field}", envelope.kind);
        return;
    };
    let id = id.to_string();

    let resolved = pending
        .lock()
        .expect("pending table lock poisoned")
        .resolve(&id);
    match resolved {
        Some(query) => {
            tracing::info!("[{name}] received answer to query {id}");
            if !query.deliver(envelope.payload_text()) {
                tracing::debug!("[{name}] waiter for {id} is gone, dropping reply");
            }
        }
        None => tracing::debug!("[{name}] no pending query for {id}"),
    }
}
