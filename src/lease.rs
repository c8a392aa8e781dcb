//! Lease state tracked from udhcpc events

use crate::{
    error::{EventError, SupervisorError},
    event::{EventType, LeaseEvent},
};
use ipnet::IpNet;
use serde::Serialize;
use std::{net::IpAddr, time::Duration};
use tokio::{sync::watch, time};

/// The lease currently held by an interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lease {
    pub ip: IpNet,
    pub gateway: Option<IpAddr>,
    pub domain: Option<String>,
}

impl Lease {
    /// Extracts a lease from a BOUND or RENEW event. `ip` is required;
    /// absent `gateway` and `domain` stay absent.
    pub fn from_event(event: &LeaseEvent) -> Result<Self, EventError> {
        Ok(Self {
            ip: event.ip()?.ok_or(EventError::MissingField("ip"))?,
            gateway: event.gateway()?,
            domain: event.domain()?,
        })
    }
}

/// Shared lease state. `None` is Unbound, `Some` is Bound, so the has-lease
/// flag and the three lease fields can never disagree.
///
/// Only the dispatch loop writes it (through the crate-private `apply`);
/// every update swaps the whole snapshot, so readers never see a torn lease.
#[derive(Debug)]
pub struct LeaseState {
    tx: watch::Sender<Option<Lease>>,
}

impl Default for LeaseState {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn current(&self) -> Option<Lease> {
        self.tx.borrow().clone()
    }

    pub fn has_lease(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn ip(&self) -> Option<IpNet> {
        self.tx.borrow().as_ref().map(|lease| lease.ip)
    }

    /// Receiver notified on every lease change.
    pub fn subscribe(&self) -> watch::Receiver<Option<Lease>> {
        self.tx.subscribe()
    }

    /// Waits until a lease is held and returns its address.
    pub async fn wait_for_ip(&self, timeout: Duration) -> Result<IpNet, SupervisorError> {
        let mut rx = self.subscribe();
        let waited = time::timeout(timeout, async {
            rx.wait_for(Option::is_some)
                .await
                .map(|lease| lease.as_ref().map(|lease| lease.ip))
        })
        .await;

        match waited {
            Ok(Ok(Some(ip))) => Ok(ip),
            Ok(Ok(None)) => Err(SupervisorError::Critical(
                "lease watch resolved without a lease".to_string(),
            )),
            Ok(Err(_closed)) => Err(SupervisorError::Critical(
                "lease state dropped while waiting".to_string(),
            )),
            Err(_elapsed) => Err(SupervisorError::LeaseTimeout(timeout)),
        }
    }

    /// Applies one classified event.
    pub(crate) fn apply(&self, event: &LeaseEvent) -> Result<(), EventError> {
        match event.kind() {
            EventType::Bound | EventType::Renew => {
                let lease = Lease::from_event(event)?;
                tracing::info!("Lease {}: {}", event.kind(), lease.ip);
                self.tx.send_replace(Some(lease));
            }
            EventType::Deconfig => {
                if self.tx.send_replace(None).is_some() {
                    tracing::info!("Lease released");
                }
            }
            EventType::Leasefail => {}
        }
        Ok(())
    }
}
