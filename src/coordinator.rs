//! Session coordinator: ties the presence registry, the relay and the
//! call state machine together, one handler per external trigger.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::call::{Call, CallEvent, CallKey, CallState};
use crate::error::SignalError;
use crate::presence::{ConnId, EventSender, PresenceRegistry};
use crate::protocol::{EndReason, ServerEvent};
use crate::relay;

/// Exclusive owner of the presence registry and the active-call set.
///
/// Handlers touching the same identifier or the same call pair are
/// serialized by the underlying map entries; unrelated identifiers and
/// pairs proceed fully in parallel. Nothing here blocks on I/O: delivery
/// to a live endpoint is a channel send, and failure is only ever
/// reported as "target unreachable".
#[derive(Clone)]
pub struct Coordinator {
    registry: Arc<PresenceRegistry>,
    calls: Arc<DashMap<CallKey, Call>>,
    /// How long an unanswered invite may stay pending. `None` means
    /// invites never expire.
    invite_ttl: Option<Duration>,
}

impl Coordinator {
    pub fn new(invite_ttl: Option<Duration>) -> Self {
        Self {
            registry: Arc::new(PresenceRegistry::new()),
            calls: Arc::new(DashMap::new()),
            invite_ttl,
        }
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    /// State of the call between `a` and `b`, if one is active.
    pub fn call_state(&self, a: &str, b: &str) -> Option<CallState> {
        self.calls
            .get(&CallKey::new(a, b))
            .map(|call| call.state.clone())
    }

    pub fn active_calls(&self) -> usize {
        self.calls.len()
    }

    /// Endpoint-connected trigger: bind the identifier, confirm to the
    /// endpoint and push refreshed presence to everyone.
    pub fn register(
        &self,
        conn: ConnId,
        identifier: &str,
        sender: EventSender,
    ) -> Result<(), SignalError> {
        self.registry.register(identifier, conn, sender.clone())?;
        info!(identifier, "endpoint registered");
        let _ = sender.send(ServerEvent::Registered {
            identifier: identifier.to_string(),
        });
        self.broadcast_presence();
        Ok(())
    }

    /// Endpoint-disconnected trigger. Terminates every call the
    /// identifier participates in before the binding is removed, so no
    /// call ever references an unregistered identifier.
    pub fn disconnect(&self, conn: ConnId, identifier: Option<&str>) {
        let Some(identifier) = identifier else { return };

        let involved: Vec<CallKey> = self
            .calls
            .iter()
            .filter(|entry| entry.value().involves(identifier))
            .map(|entry| entry.key().clone())
            .collect();
        for key in involved {
            if let Some(call) = self.end_call(&key, CallEvent::PeerDisconnected) {
                let other = call.other_party(identifier).to_string();
                info!(
                    caller = %call.caller,
                    callee = %call.callee,
                    gone = identifier,
                    "call torn down by disconnect"
                );
                let _ = relay::relay(
                    &self.registry,
                    identifier,
                    &other,
                    ServerEvent::CallEnded {
                        peer: identifier.to_string(),
                        reason: EndReason::PeerDisconnected,
                    },
                );
            }
        }

        self.registry.unregister(identifier, conn);
        info!(identifier, "endpoint unregistered");
        self.broadcast_presence();
    }

    /// Invite-requested trigger: create the call and relay the offer.
    ///
    /// The callee must be registered and the pair must not already have an
    /// active call; a second invite is rejected, never silently replaced.
    /// No call is created when the offer cannot be delivered.
    pub fn invite(&self, from: &str, target: &str, offer: Value) -> Result<(), SignalError> {
        if from == target {
            return Err(SignalError::InvalidTransition(
                "cannot invite yourself".into(),
            ));
        }
        // Resolve before creating any state.
        self.registry.resolve(target)?;

        let key = CallKey::new(from, target);
        let call = Call::new(from, target);
        let call_id = call.id;
        match self.calls.entry(key.clone()) {
            Entry::Occupied(mut held) => {
                let existing = held.get();
                if existing.is_terminated() {
                    // Residue of a termination race; the pair is free.
                    held.insert(call);
                } else if !self.registry.contains(&existing.caller)
                    || !self.registry.contains(&existing.callee)
                {
                    // Disconnect handling removes calls before it removes
                    // the binding, so this state is unreachable unless the
                    // coordinator itself broke the invariant.
                    error!(
                        caller = %existing.caller,
                        callee = %existing.callee,
                        "active call references an unregistered identifier; evicting"
                    );
                    held.insert(call);
                } else {
                    return Err(SignalError::InvalidTransition(format!(
                        "a call with \"{target}\" is already in progress"
                    )));
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(call);
            }
        }

        if let Err(err) = relay::relay(
            &self.registry,
            from,
            target,
            ServerEvent::IncomingInvite {
                from: from.to_string(),
                offer,
            },
        ) {
            // Callee vanished between resolve and delivery.
            self.calls.remove_if(&key, |_, call| call.id == call_id);
            return Err(err);
        }
        info!(caller = from, callee = target, "invite relayed");

        if let Some(ttl) = self.invite_ttl {
            let coordinator = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(ttl).await;
                coordinator.expire_invite(&key, call_id);
            });
        }
        Ok(())
    }

    /// Response-received trigger, accepting side. Only the invited callee
    /// may accept, and only while the call is still `Inviting`.
    pub fn accept(&self, from: &str, peer: &str, answer: Value) -> Result<(), SignalError> {
        let key = CallKey::new(from, peer);
        let caller = {
            let mut call = self
                .calls
                .get_mut(&key)
                .ok_or_else(|| SignalError::NoActiveCall(peer.to_string()))?;
            if call.callee != from {
                return Err(SignalError::InvalidTransition(
                    "only the invited callee may accept".into(),
                ));
            }
            call.apply(CallEvent::Accepted)?;
            call.caller.clone()
        };
        info!(caller = %caller, callee = from, "invite accepted");

        if let Err(err) = relay::relay(
            &self.registry,
            from,
            &caller,
            ServerEvent::InviteAccepted {
                from: from.to_string(),
                answer,
            },
        ) {
            self.fail_unreachable(&key, from, &caller);
            return Err(err);
        }
        Ok(())
    }

    /// Response-received trigger, declining side. The callee declining
    /// notifies the caller; the caller declining withdraws the invite and
    /// notifies the callee. Declining an already-ended call is a no-op.
    pub fn decline(&self, from: &str, peer: &str) -> Result<(), SignalError> {
        let key = CallKey::new(from, peer);
        let Some(call) = self.try_end_call(&key, CallEvent::Declined)? else {
            debug!(from, peer, "decline for inactive pair ignored");
            return Ok(());
        };
        info!(caller = %call.caller, callee = %call.callee, by = from, "invite declined");

        let event = if from == call.callee {
            ServerEvent::InviteDeclined {
                from: from.to_string(),
            }
        } else {
            ServerEvent::CallEnded {
                peer: from.to_string(),
                reason: EndReason::Declined,
            }
        };
        let other = call.other_party(from).to_string();
        let _ = relay::relay(&self.registry, from, &other, event);
        Ok(())
    }

    /// Candidate-received trigger: relayed to the other party while the
    /// call is being set up or is connected, state untouched.
    pub fn candidate(&self, from: &str, peer: &str, candidate: Value) -> Result<(), SignalError> {
        let key = CallKey::new(from, peer);
        {
            let call = self
                .calls
                .get(&key)
                .ok_or_else(|| SignalError::NoActiveCall(peer.to_string()))?;
            if !call.permits_candidates() {
                return Err(SignalError::InvalidTransition(
                    "candidate exchange requires a pending or connected call".into(),
                ));
            }
        }

        if let Err(err) = relay::relay(
            &self.registry,
            from,
            peer,
            ServerEvent::Candidate {
                from: from.to_string(),
                candidate,
            },
        ) {
            self.fail_unreachable(&key, from, peer);
            return Err(err);
        }
        Ok(())
    }

    /// Hangup-requested trigger. Either party may hang up at any point
    /// after the invite; a repeated hangup is a no-op.
    pub fn hangup(&self, from: &str, peer: &str) -> Result<(), SignalError> {
        let key = CallKey::new(from, peer);
        match self.end_call(&key, CallEvent::Hangup) {
            Some(call) => {
                info!(caller = %call.caller, callee = %call.callee, by = from, "call hung up");
                let other = call.other_party(from).to_string();
                let _ = relay::relay(
                    &self.registry,
                    from,
                    &other,
                    ServerEvent::CallEnded {
                        peer: from.to_string(),
                        reason: EndReason::Hangup,
                    },
                );
            }
            None => debug!(from, peer, "hangup for inactive pair ignored"),
        }
        Ok(())
    }

    /// Tear down an invite that stayed unanswered past the configured
    /// TTL. Guarded by the call instance id: a recycled pair is never
    /// expired by a stale timer.
    fn expire_invite(&self, key: &CallKey, call_id: Uuid) {
        let ended = {
            let Some(mut call) = self.calls.get_mut(key) else {
                return;
            };
            if call.id != call_id {
                return;
            }
            match call.apply(CallEvent::InviteExpired) {
                Ok(true) => call.clone(),
                // Accepted in the meantime, or already terminated.
                Ok(false) | Err(_) => return,
            }
        };
        self.calls
            .remove_if(key, |_, call| call.id == call_id && call.is_terminated());

        warn!(caller = %ended.caller, callee = %ended.callee, "invite expired unanswered");
        for (to, peer) in [
            (&ended.caller, &ended.callee),
            (&ended.callee, &ended.caller),
        ] {
            if let Ok(sender) = self.registry.resolve(to) {
                let _ = sender.send(ServerEvent::CallEnded {
                    peer: peer.clone(),
                    reason: EndReason::InviteExpired,
                });
            }
        }
    }

    /// Apply a termination event under the pair's entry lock and drop the
    /// call from the active set. Returns the terminated call when this
    /// trigger was the one that ended it; `None` when no active call
    /// exists or it had already terminated (idempotent).
    fn end_call(&self, key: &CallKey, event: CallEvent) -> Option<Call> {
        // Termination events are valid from every live state.
        self.try_end_call(key, event).unwrap_or_default()
    }

    /// Like `end_call`, but propagates events that are invalid in the
    /// call's current state (a decline after acceptance, for instance).
    fn try_end_call(&self, key: &CallKey, event: CallEvent) -> Result<Option<Call>, SignalError> {
        let ended = {
            let Some(mut call) = self.calls.get_mut(key) else {
                return Ok(None);
            };
            if !call.apply(event)? {
                return Ok(None);
            }
            call.clone()
        };
        self.calls
            .remove_if(key, |_, call| call.id == ended.id && call.is_terminated());
        Ok(Some(ended))
    }

    /// The remote endpoint vanished mid-negotiation: tear the call down
    /// and tell the survivor.
    fn fail_unreachable(&self, key: &CallKey, survivor: &str, gone: &str) {
        warn!(survivor, gone, "relay target unreachable; terminating call");
        if self.end_call(key, CallEvent::PeerDisconnected).is_some() {
            if let Ok(sender) = self.registry.resolve(survivor) {
                let _ = sender.send(ServerEvent::CallEnded {
                    peer: gone.to_string(),
                    reason: EndReason::PeerUnreachable,
                });
            }
        }
    }

    /// Push a personalized presence snapshot to every endpoint.
    fn broadcast_presence(&self) {
        for (identifier, sender) in self.registry.endpoints() {
            let peers = self.registry.snapshot(Some(&identifier));
            let _ = sender.send(ServerEvent::Presence { peers });
        }
    }
}
