//! Supervisor lifecycle
//!
//! Startup runs channel → process → dispatch loop; shutdown runs in reverse:
//! the process is confirmed gone before the loop is told to stop, and the
//! channel is only torn down after the loop has been joined.

use crate::{
    channel::{self, EventChannel},
    config::SupervisorConfig,
    dispatch::Dispatcher,
    error::{ExitPhase, SupervisorError},
    interface::Interface,
    lease::{Lease, LeaseState},
    listener::{EventListener, LeaseUpdater},
    process::{exit_code, DhcpProcess},
};
use ipnet::IpNet;
use std::{net::IpAddr, sync::Arc, time::Duration};
use tokio::{sync::oneshot, task::JoinHandle};

/// Supervises one udhcpc process for one interface.
pub struct DhcpSupervisor {
    config: SupervisorConfig,
    interface: Arc<Interface>,
    channel_name: String,
    process: DhcpProcess,
    lease: Arc<LeaseState>,
    shutdown: Option<oneshot::Sender<()>>,
    dispatcher: Option<JoinHandle<EventChannel>>,
    /// Exit code, recorded as soon as the shutdown wait has reaped udhcpc.
    reaped: Option<i32>,
    torn_down: bool,
    teardown_failure: Option<String>,
    outcome: Option<Option<IpNet>>,
}

impl DhcpSupervisor {
    /// Creates the event channel, spawns udhcpc and starts the dispatch loop.
    ///
    /// `listeners` run after the built-in lease updater, in the given order.
    pub async fn start(
        config: SupervisorConfig,
        listeners: Vec<Box<dyn EventListener>>,
    ) -> Result<Self, SupervisorError> {
        let interface = Arc::new(config.interface.clone());
        let channel = EventChannel::create(&interface.channel_name())?;
        let channel_name = channel.name().to_string();

        let process = match DhcpProcess::spawn(&config, &channel_name) {
            Ok(process) => process,
            Err(e) => {
                if let Err(close_err) = channel.close() {
                    tracing::warn!("Failed to remove {}: {}", channel_name, close_err);
                }
                return Err(e);
            }
        };
        tracing::info!(
            "udhcpc#{} started on {} ({}, channel {})",
            process.pid().unwrap_or_default(),
            interface.name,
            if config.once { "one-shot" } else { "persistent" },
            channel_name
        );

        let lease = Arc::new(LeaseState::new());
        let mut all_listeners: Vec<Box<dyn EventListener>> = vec![Box::new(LeaseUpdater)];
        all_listeners.extend(listeners);

        let (shutdown, shutdown_rx) = oneshot::channel();
        let dispatcher = Dispatcher::new(
            channel,
            all_listeners,
            interface.clone(),
            process.pid(),
            lease.clone(),
        )
        .spawn(shutdown_rx);

        Ok(Self {
            config,
            interface,
            channel_name,
            process,
            lease,
            shutdown: Some(shutdown),
            dispatcher: Some(dispatcher),
            reaped: None,
            torn_down: false,
            teardown_failure: None,
            outcome: None,
        })
    }

    /// Waits until a lease is held and returns its address. Returns at once
    /// if one already is.
    pub async fn await_ip(&self, timeout: Duration) -> Result<IpNet, SupervisorError> {
        self.lease.wait_for_ip(timeout).await
    }

    /// Stops supervision and returns the address held at that point.
    ///
    /// One-shot mode waits for the lease and for udhcpc to quit on its own;
    /// persistent mode sends it SIGTERM. Either way udhcpc must exit with
    /// code 0 within `timeout`. A child that already exited before this call
    /// is only accepted in one-shot mode with code 0.
    ///
    /// Once udhcpc has been reaped it is never signalled or waited for again:
    /// a later call only retries the teardown, and repeats the error of a
    /// non-zero exit or a failed teardown. After success, further calls
    /// return the same value without doing anything.
    pub async fn finish(&mut self, timeout: Duration) -> Result<Option<IpNet>, SupervisorError> {
        if let Some(outcome) = self.outcome {
            return Ok(outcome);
        }

        let code = match self.reaped {
            Some(code) => code,
            None => self.stop_process(timeout).await?,
        };

        // udhcpc is gone either way, so nothing can reach the channel anymore.
        self.teardown().await?;

        if code != 0 {
            return Err(SupervisorError::ProcessExit {
                code,
                phase: ExitPhase::Shutdown,
            });
        }

        let ip = self.lease.ip();
        tracing::info!(
            "udhcpc#{} finished on {} with lease {:?}",
            self.pid_label(),
            self.interface.name,
            ip
        );
        self.outcome = Some(ip);
        Ok(ip)
    }

    /// Asks udhcpc to stop and reaps it, returning its exit code.
    async fn stop_process(&mut self, timeout: Duration) -> Result<i32, SupervisorError> {
        // Pre-check only: an exit that happens after this point is judged by
        // the wait below.
        if let Some(status) = self.process.poll()? {
            let code = exit_code(status);
            if !self.config.once || code != 0 {
                return Err(SupervisorError::ProcessExit {
                    code,
                    phase: ExitPhase::Early,
                });
            }
        }

        if self.config.once {
            self.await_ip(self.config.lease_timeout).await?;
        } else {
            self.process.terminate()?;
        }

        let code = exit_code(self.process.wait(timeout).await?);
        self.reaped = Some(code);

        if self.process.uses_namespace() {
            self.process.release_namespace();
        }
        Ok(code)
    }

    /// Stops the dispatch loop, joins it and removes the channel.
    async fn teardown(&mut self) -> Result<(), SupervisorError> {
        if let Some(reason) = &self.teardown_failure {
            return Err(SupervisorError::Critical(reason.clone()));
        }
        if self.torn_down {
            return Ok(());
        }

        if let Some(shutdown) = self.shutdown.take() {
            // The loop may already be gone if the channel failed.
            let _ = shutdown.send(());
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            let closed = match dispatcher.await {
                Ok(channel) => channel.close().map_err(|e| format!("closing channel failed: {e}")),
                Err(e) => {
                    // The channel went down with the task without being unlinked.
                    if let Err(unlink_err) = channel::unlink(&self.channel_name) {
                        tracing::warn!("Failed to unlink {}: {}", self.channel_name, unlink_err);
                    }
                    Err(format!("dispatch loop failed: {e}"))
                }
            };
            if let Err(reason) = closed {
                tracing::error!("udhcpc#{} {}", self.pid_label(), reason);
                self.teardown_failure = Some(reason.clone());
                return Err(SupervisorError::Critical(reason));
            }
        }

        self.torn_down = true;
        Ok(())
    }

    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// Exit code of udhcpc if it has already exited.
    pub fn poll_exit(&mut self) -> Result<Option<i32>, SupervisorError> {
        Ok(self.process.poll()?.map(exit_code))
    }

    pub fn is_once(&self) -> bool {
        self.config.once
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn has_lease(&self) -> bool {
        self.lease.has_lease()
    }

    pub fn lease(&self) -> Option<Lease> {
        self.lease.current()
    }

    pub fn ip(&self) -> Option<IpNet> {
        self.lease.ip()
    }

    pub fn gateway(&self) -> Option<IpAddr> {
        self.lease.current().and_then(|lease| lease.gateway)
    }

    pub fn domain(&self) -> Option<String> {
        self.lease.current().and_then(|lease| lease.domain)
    }

    fn pid_label(&self) -> String {
        self.pid()
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "?".to_string())
    }
}

impl Drop for DhcpSupervisor {
    fn drop(&mut self) {
        // udhcpc itself is killed on drop; the queue would outlive us.
        if let Some(dispatcher) = self.dispatcher.take() {
            tracing::warn!(
                "udhcpc#{} supervisor for {} dropped before finish, removing {}",
                self.pid_label(),
                self.interface.name,
                self.channel_name
            );
            dispatcher.abort();
            if let Err(e) = channel::unlink(&self.channel_name) {
                tracing::debug!("Failed to unlink {}: {}", self.channel_name, e);
            }
        }
    }
}
