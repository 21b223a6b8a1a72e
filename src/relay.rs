//! Stateless forwarding of opaque negotiation events between identified
//! endpoints.

use tracing::trace;

use crate::error::SignalError;
use crate::presence::PresenceRegistry;
use crate::protocol::ServerEvent;

/// Forward `event` to `to`, resolved through the presence registry.
///
/// The event already carries the sender's identifier so the recipient can
/// attribute it; payloads inside are never inspected or reshaped. Delivery
/// goes into the target endpoint's unbounded channel, so events from one
/// sender to one recipient arrive in the order this function was invoked.
/// No state is kept here.
///
/// A missing binding and a closed channel both mean the target is gone:
/// the caller must surface `TargetUnreachable` to the sender and tear down
/// the call the two were negotiating.
pub fn relay(
    registry: &PresenceRegistry,
    from: &str,
    to: &str,
    event: ServerEvent,
) -> Result<(), SignalError> {
    let sender = registry.resolve(to)?;
    sender
        .send(event)
        .map_err(|_| SignalError::TargetUnreachable(to.to_string()))?;
    trace!(from, to, "negotiation event relayed");
    Ok(())
}
