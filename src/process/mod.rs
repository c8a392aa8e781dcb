//! udhcpc child process
//!
//! Launches the external DHCP client, optionally inside a network namespace,
//! and owns it until it has been reaped.

pub mod netns;

pub use netns::Netns;

use crate::{config::SupervisorConfig, error::SupervisorError};
use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use std::{
    ffi::OsString,
    os::unix::process::ExitStatusExt,
    path::Path,
    process::{ExitStatus, Stdio},
    time::Duration,
};
use tokio::{
    process::{Child, Command},
    time,
};

/// Environment variable telling the handler which queue to publish to.
pub const EVENT_QUEUE_ENV: &str = "EVENT_QUEUE";

/// udhcpc arguments: handler script, interface, foreground, then `-q` (quit
/// once a lease is obtained) or `-R` (keep renewing, release on exit).
pub fn command_args(handler: &Path, interface: &str, once: bool) -> Vec<OsString> {
    vec![
        "-s".into(),
        handler.as_os_str().to_owned(),
        "-i".into(),
        interface.into(),
        "-f".into(),
        (if once { "-q" } else { "-R" }).into(),
    ]
}

/// Exit code of a finished child; a child killed by a signal reports the
/// negated signal number.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(-1)
}

pub struct DhcpProcess {
    child: Child,
    pid: Option<u32>,
    netns: Option<Netns>,
}

impl DhcpProcess {
    /// Spawns udhcpc with `channel_name` exported in [`EVENT_QUEUE_ENV`].
    pub fn spawn(config: &SupervisorConfig, channel_name: &str) -> Result<Self, SupervisorError> {
        let mut cmd = Command::new(&config.udhcpc);
        cmd.args(command_args(
            &config.handler,
            &config.interface.name,
            config.once,
        ))
        .env(EVENT_QUEUE_ENV, channel_name)
        .stdin(Stdio::null())
        .kill_on_drop(true);

        let netns = match config.interface.netns() {
            Some(name) => {
                let netns = Netns::open(&config.netns_dir, name)?;
                netns.enter_on_exec(&mut cmd);
                Some(netns)
            }
            None => None,
        };

        let child = cmd.spawn().map_err(SupervisorError::Spawn)?;
        let pid = child.id();
        tracing::debug!(
            "Spawned {} for {} (pid {:?})",
            config.udhcpc.display(),
            config.interface.name,
            pid
        );

        Ok(Self { child, pid, netns })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking exit status check.
    pub fn poll(&mut self) -> Result<Option<ExitStatus>, SupervisorError> {
        Ok(self.child.try_wait()?)
    }

    /// Sends SIGTERM. A child that has already been reaped is left alone.
    pub fn terminate(&self) -> Result<(), SupervisorError> {
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        tracing::debug!("Sending SIGTERM to udhcpc#{}", pid);
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM)?;
        Ok(())
    }

    /// Waits for the child to exit, failing once `timeout` has elapsed.
    pub async fn wait(&mut self, timeout: Duration) -> Result<ExitStatus, SupervisorError> {
        match time::timeout(timeout, self.child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_elapsed) => Err(SupervisorError::ShutdownTimeout(timeout)),
        }
    }

    pub fn uses_namespace(&self) -> bool {
        self.netns.is_some()
    }

    /// Drops the namespace handle. Only meaningful once the child has exited.
    pub fn release_namespace(&mut self) {
        if let Some(netns) = self.netns.take() {
            tracing::debug!("Released netns {}", netns.name());
        }
    }
}
