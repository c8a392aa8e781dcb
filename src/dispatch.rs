//! Background task reading the event channel and fanning events out to listeners.

use crate::{
    channel::EventChannel,
    event::LeaseEvent,
    interface::Interface,
    lease::LeaseState,
    listener::{EventContext, EventListener},
};
use std::sync::Arc;
use tokio::{sync::oneshot, task::JoinHandle};

pub(crate) struct Dispatcher {
    channel: EventChannel,
    listeners: Vec<Box<dyn EventListener>>,
    interface: Arc<Interface>,
    pid: Option<u32>,
    lease: Arc<LeaseState>,
}

impl Dispatcher {
    pub(crate) fn new(
        channel: EventChannel,
        listeners: Vec<Box<dyn EventListener>>,
        interface: Arc<Interface>,
        pid: Option<u32>,
        lease: Arc<LeaseState>,
    ) -> Self {
        Self {
            channel,
            listeners,
            interface,
            pid,
            lease,
        }
    }

    /// Starts the loop. The task hands the channel back when it stops so the
    /// owner can tear it down only after the loop is gone.
    pub(crate) fn spawn(self, shutdown: oneshot::Receiver<()>) -> JoinHandle<EventChannel> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: oneshot::Receiver<()>) -> EventChannel {
        tracing::debug!(
            "udhcpc#{} dispatch loop started on {}",
            self.pid_label(),
            self.channel.name()
        );

        loop {
            tokio::select! {
                biased;

                // A dropped sender also ends the loop.
                _ = &mut shutdown => break,

                received = self.channel.recv() => match received {
                    Ok(payload) => self.dispatch(&payload),
                    Err(e) => {
                        tracing::error!("udhcpc#{} event channel failed: {}", self.pid_label(), e);
                        break;
                    }
                },
            }
        }

        tracing::debug!("udhcpc#{} dispatch loop stopped", self.pid_label());
        self.channel
    }

    fn dispatch(&self, payload: &[u8]) {
        let event = match LeaseEvent::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    "udhcpc#{} discarding event {:?}: {}",
                    self.pid_label(),
                    String::from_utf8_lossy(payload),
                    e
                );
                return;
            }
        };

        tracing::debug!("[udhcpc#{} event] {:?}", self.pid_label(), event.fields());

        let ctx = EventContext {
            interface: &self.interface,
            pid: self.pid,
            lease: &self.lease,
        };
        for (index, listener) in self.listeners.iter().enumerate() {
            if let Err(e) = listener.on_event(&ctx, event.kind(), &event) {
                tracing::error!(
                    "udhcpc#{} listener {} failed on {} event: {}",
                    self.pid_label(),
                    index,
                    event.kind(),
                    e
                );
            }
        }
    }

    fn pid_label(&self) -> String {
        self.pid
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "?".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::ChannelSender,
        event::EventType,
        listener::{listener_fn, LeaseUpdater},
    };
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };
    use tokio::sync::watch;

    struct Harness {
        sender: ChannelSender,
        shutdown: oneshot::Sender<()>,
        handle: JoinHandle<EventChannel>,
        lease: Arc<LeaseState>,
        processed: watch::Receiver<usize>,
    }

    impl Harness {
        fn start(extra: Vec<Box<dyn EventListener>>) -> Self {
            let address = format!("02:ff:{:08x}", rand::random::<u32>());
            let interface = Arc::new(Interface::new("test0", address));
            let channel = EventChannel::create(&interface.channel_name()).unwrap();
            let sender = ChannelSender::open(channel.name()).unwrap();
            let lease = Arc::new(LeaseState::new());

            // Last listener counts fully dispatched events.
            let (count_tx, processed) = watch::channel(0usize);
            let mut listeners: Vec<Box<dyn EventListener>> = vec![Box::new(LeaseUpdater)];
            listeners.extend(extra);
            listeners.push(listener_fn(move |_ctx, _kind, _event| {
                count_tx.send_modify(|n| *n += 1);
                Ok(())
            }));

            let (shutdown, shutdown_rx) = oneshot::channel();
            let handle =
                Dispatcher::new(channel, listeners, interface, Some(4242), lease.clone())
                    .spawn(shutdown_rx);

            Self {
                sender,
                shutdown,
                handle,
                lease,
                processed,
            }
        }

        fn send(&self, payload: &str) {
            self.sender.send(payload.as_bytes()).unwrap();
        }

        /// Waits until `count` classified events went through every listener.
        async fn wait_processed(&mut self, count: usize) {
            tokio::time::timeout(
                Duration::from_secs(2),
                self.processed.wait_for(|n| *n >= count),
            )
            .await
            .unwrap()
            .unwrap();
        }

        async fn stop(self) -> EventChannel {
            self.shutdown.send(()).unwrap();
            tokio::time::timeout(Duration::from_secs(2), self.handle)
                .await
                .unwrap()
                .unwrap()
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<EventType>>>, Box<dyn EventListener>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener = listener_fn(move |_ctx, kind, _event| {
            sink.lock().unwrap().push(kind);
            Ok(())
        });
        (seen, listener)
    }

    #[tokio::test]
    async fn test_bound_event_updates_lease() {
        let harness = Harness::start(Vec::new());
        harness.send(r#"{"type":"bound","ip":"10.0.0.5/24","gateway":"10.0.0.1"}"#);

        let ip = harness.lease.wait_for_ip(Duration::from_secs(2)).await.unwrap();
        assert_eq!(ip, "10.0.0.5/24".parse::<ipnet::IpNet>().unwrap());
        let lease = harness.lease.current().unwrap();
        assert_eq!(lease.gateway, Some("10.0.0.1".parse().unwrap()));
        assert_eq!(lease.domain, None);

        harness.stop().await.close().unwrap();
    }

    #[tokio::test]
    async fn test_listeners_run_in_order_after_lease_update() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = order.clone();
        let second = order.clone();
        let listeners = vec![
            listener_fn(move |ctx, _kind, _event| {
                first.lock().unwrap().push(("first", ctx.lease.has_lease(), ctx.pid));
                Ok(())
            }),
            listener_fn(move |ctx, _kind, _event| {
                second.lock().unwrap().push(("second", ctx.lease.has_lease(), ctx.pid));
                Ok(())
            }),
        ];
        let mut harness = Harness::start(listeners);
        harness.send(r#"{"type":"bound","ip":"10.0.0.5/24"}"#);
        harness.wait_processed(1).await;

        assert_eq!(
            *order.lock().unwrap(),
            vec![("first", true, Some(4242)), ("second", true, Some(4242))]
        );

        harness.stop().await.close().unwrap();
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_stop_others() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let listeners = vec![
            listener_fn(|_ctx, _kind, _event| Err("listener exploded".into())),
            listener_fn(move |_ctx, _kind, _event| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ];
        let mut harness = Harness::start(listeners);
        harness.send(r#"{"type":"leasefail"}"#);
        // Built-in updater rejects this one; later listeners still run.
        harness.send(r#"{"type":"bound"}"#);
        harness.send(r#"{"type":"renew","ip":"10.0.0.6/24"}"#);
        harness.wait_processed(3).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(harness.lease.ip(), Some("10.0.0.6/24".parse().unwrap()));

        harness.stop().await.close().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_events_are_discarded() {
        let (seen, listener) = recorder();
        let mut harness = Harness::start(vec![listener]);
        harness.send(r#"{"type":"nak"}"#);
        harness.send("{not json");
        harness.send(r#"{"ip":"10.0.0.9/24"}"#);
        harness.send(r#"{"type":"leasefail"}"#);
        harness.wait_processed(1).await;

        assert_eq!(*seen.lock().unwrap(), vec![EventType::Leasefail]);
        assert!(!harness.lease.has_lease());

        harness.stop().await.close().unwrap();
    }

    #[tokio::test]
    async fn test_deconfig_after_bound_clears_lease() {
        let (seen, listener) = recorder();
        let mut harness = Harness::start(vec![listener]);
        harness.send(r#"{"type":"bound","ip":"10.0.0.5/24","domain":"lan"}"#);
        harness.send(r#"{"type":"deconfig"}"#);
        harness.wait_processed(2).await;

        assert!(!harness.lease.has_lease());
        assert_eq!(harness.lease.current(), None);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![EventType::Bound, EventType::Deconfig]
        );

        harness.stop().await.close().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_hands_back_channel() {
        let harness = Harness::start(Vec::new());
        let channel = harness.stop().await;
        let name = channel.name().to_string();

        // Still open after the loop stopped; gone once closed.
        assert!(ChannelSender::open(&name).is_ok());
        channel.close().unwrap();
        assert!(ChannelSender::open(&name).is_err());
    }
}
