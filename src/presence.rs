//! Presence registry: identifier-to-endpoint bindings for everyone
//! currently connected.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::SignalError;
use crate::protocol::ServerEvent;

/// Transport-level identity of one connection. Minted at upgrade time,
/// meaningless once the socket closes.
pub type ConnId = Uuid;

/// Outbound channel of one endpoint.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

#[derive(Clone)]
struct Endpoint {
    conn: ConnId,
    sender: EventSender,
    /// Monotonic registration sequence, drives snapshot ordering.
    seq: u64,
}

/// Who is online now. Keyed by the client-chosen identifier; at most one
/// live endpoint holds a given identifier at any time.
///
/// Mutations on the same identifier are serialized by the map entry;
/// disjoint identifiers proceed in parallel. Membership-change fan-out is
/// the coordinator's job, not this registry's.
#[derive(Default)]
pub struct PresenceRegistry {
    peers: DashMap<String, Endpoint>,
    next_seq: AtomicU64,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identifier` to the endpoint.
    ///
    /// Rejected when the identifier is held by a different live
    /// connection. Re-registering the same connection under the same
    /// identifier is idempotent success.
    pub fn register(
        &self,
        identifier: &str,
        conn: ConnId,
        sender: EventSender,
    ) -> Result<(), SignalError> {
        match self.peers.entry(identifier.to_string()) {
            Entry::Occupied(held) => {
                if held.get().conn == conn {
                    Ok(())
                } else {
                    Err(SignalError::DuplicateIdentifier(identifier.to_string()))
                }
            }
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                slot.insert(Endpoint { conn, sender, seq });
                Ok(())
            }
        }
    }

    /// Drop the binding, but only while `conn` still owns it. Safe to
    /// call repeatedly; a no-op when the identifier is absent or has been
    /// claimed by a newer connection.
    pub fn unregister(&self, identifier: &str, conn: ConnId) {
        self.peers.remove_if(identifier, |_, endpoint| endpoint.conn == conn);
    }

    /// Where to deliver events for `identifier`.
    pub fn resolve(&self, identifier: &str) -> Result<EventSender, SignalError> {
        self.peers
            .get(identifier)
            .map(|endpoint| endpoint.sender.clone())
            .ok_or_else(|| SignalError::TargetUnreachable(identifier.to_string()))
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.peers.contains_key(identifier)
    }

    /// Point-in-time copy of all registered identifiers except
    /// `excluding`, in registration order. Not a live view: the caller
    /// may iterate it as often as it likes, and pollers observe
    /// eventually consistent results.
    pub fn snapshot(&self, excluding: Option<&str>) -> Vec<String> {
        let mut peers: Vec<(u64, String)> = self
            .peers
            .iter()
            .filter(|entry| Some(entry.key().as_str()) != excluding)
            .map(|entry| (entry.value().seq, entry.key().clone()))
            .collect();
        peers.sort_unstable_by_key(|(seq, _)| *seq);
        peers.into_iter().map(|(_, identifier)| identifier).collect()
    }

    /// Every live endpoint with its identifier, for fan-out.
    pub fn endpoints(&self) -> Vec<(String, EventSender)> {
        self.peers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().sender.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
