//! Event listeners invoked by the dispatch loop

use crate::{
    event::{EventType, LeaseEvent},
    interface::Interface,
    lease::LeaseState,
};
use std::error::Error as StdError;

/// Error returned by a listener. Logged by the dispatch loop, never propagated.
pub type ListenerError = Box<dyn StdError + Send + Sync>;

/// What a listener gets to see of the supervisor that received the event.
pub struct EventContext<'a> {
    pub interface: &'a Interface,
    /// Pid of the udhcpc process, if it is still known.
    pub pid: Option<u32>,
    pub lease: &'a LeaseState,
}

/// Reacts to classified lease events.
///
/// Listeners run on the dispatch task in registration order, after the
/// built-in [`LeaseUpdater`]. They must not block for long: the next event
/// is not read until every listener has returned.
pub trait EventListener: Send + Sync {
    fn on_event(
        &self,
        ctx: &EventContext<'_>,
        kind: EventType,
        event: &LeaseEvent,
    ) -> Result<(), ListenerError>;
}

impl<F> EventListener for F
where
    F: Fn(&EventContext<'_>, EventType, &LeaseEvent) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_event(
        &self,
        ctx: &EventContext<'_>,
        kind: EventType,
        event: &LeaseEvent,
    ) -> Result<(), ListenerError> {
        self(ctx, kind, event)
    }
}

/// Boxes a closure as a listener, pinning down its signature.
pub fn listener_fn<F>(f: F) -> Box<dyn EventListener>
where
    F: Fn(&EventContext<'_>, EventType, &LeaseEvent) -> Result<(), ListenerError>
        + Send
        + Sync
        + 'static,
{
    Box::new(f)
}

/// Built-in listener keeping [`LeaseState`] in sync with the events.
pub struct LeaseUpdater;

impl EventListener for LeaseUpdater {
    fn on_event(
        &self,
        ctx: &EventContext<'_>,
        _kind: EventType,
        event: &LeaseEvent,
    ) -> Result<(), ListenerError> {
        ctx.lease.apply(event)?;
        Ok(())
    }
}
