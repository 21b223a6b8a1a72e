//! Call lifecycle state machine: one invite-to-termination attempt
//! between two registered identifiers.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::protocol::EndReason;

/// Key of the active-call set: the unordered identifier pair. At most one
/// non-terminated call may exist per key at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallKey {
    lo: String,
    hi: String,
}

impl CallKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self {
                lo: a.to_string(),
                hi: b.to_string(),
            }
        } else {
            Self {
                lo: b.to_string(),
                hi: a.to_string(),
            }
        }
    }
}

/// Current state of a call. `Idle` has no representation: a call object
/// only exists once an invite has been relayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    /// Offer relayed to the callee, waiting for a response.
    Inviting,
    /// Callee accepted and the answer was relayed back.
    Connected,
    /// Final. Entering this state removes the call from the active set.
    Terminated { reason: EndReason },
}

/// External triggers the machine reacts to.
///
/// Candidate exchange is deliberately absent: it is permitted while
/// `Inviting` or `Connected` and never changes state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    Accepted,
    Declined,
    Hangup,
    PeerDisconnected,
    InviteExpired,
}

/// One attempted or active session between exactly two identifiers.
#[derive(Debug, Clone)]
pub struct Call {
    /// Distinguishes this instance from later calls on the same pair, so
    /// a stale expiry timer can never tear down a recycled call.
    pub id: Uuid,
    pub caller: String,
    pub callee: String,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
}

impl Call {
    pub fn new(caller: &str, callee: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            caller: caller.to_string(),
            callee: callee.to_string(),
            state: CallState::Inviting,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> CallKey {
        CallKey::new(&self.caller, &self.callee)
    }

    pub fn involves(&self, identifier: &str) -> bool {
        self.caller == identifier || self.callee == identifier
    }

    /// The participant opposite `identifier`. Only meaningful when
    /// `involves(identifier)` holds.
    pub fn other_party(&self, identifier: &str) -> &str {
        if self.caller == identifier {
            &self.callee
        } else {
            &self.caller
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state, CallState::Terminated { .. })
    }

    /// Candidates may flow during setup and after acceptance.
    pub fn permits_candidates(&self) -> bool {
        matches!(self.state, CallState::Inviting | CallState::Connected)
    }

    /// Apply one event.
    ///
    /// `Ok(true)` means the state changed. `Ok(false)` means a termination
    /// trigger arrived after the call had already ended: termination is
    /// idempotent, no notification is due and nothing changed. An invalid
    /// event returns an error and leaves the state untouched.
    pub fn apply(&mut self, event: CallEvent) -> Result<bool, InvalidTransition> {
        let next = match (&self.state, event) {
            (CallState::Inviting, CallEvent::Accepted) => CallState::Connected,
            (CallState::Inviting, CallEvent::Declined) => CallState::Terminated {
                reason: EndReason::Declined,
            },
            (CallState::Inviting, CallEvent::InviteExpired) => CallState::Terminated {
                reason: EndReason::InviteExpired,
            },
            (CallState::Inviting | CallState::Connected, CallEvent::Hangup) => {
                CallState::Terminated {
                    reason: EndReason::Hangup,
                }
            }
            (CallState::Inviting | CallState::Connected, CallEvent::PeerDisconnected) => {
                CallState::Terminated {
                    reason: EndReason::PeerDisconnected,
                }
            }
            (
                CallState::Terminated { .. },
                CallEvent::Declined
                | CallEvent::Hangup
                | CallEvent::PeerDisconnected
                | CallEvent::InviteExpired,
            ) => return Ok(false),
            (state, event) => {
                return Err(InvalidTransition {
                    state: format!("{state:?}"),
                    event: format!("{event:?}"),
                });
            }
        };
        self.state = next;
        Ok(true)
    }
}

/// The event is not permitted in the call's current state.
#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub state: String,
    pub event: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "event {} not permitted in state {}", self.event, self.state)
    }
}

impl std::error::Error for InvalidTransition {}
