use crate::error::SupervisorError;
use nix::sched::{setns, CloneFlags};
use std::{
    fs::File,
    io,
    os::fd::{AsRawFd, BorrowedFd},
    path::Path,
};
use tokio::process::Command;

/// Handle on a named network namespace (`ip netns` layout), held open for
/// as long as a child launched inside it is supervised.
#[derive(Debug)]
pub struct Netns {
    name: String,
    file: File,
}

impl Netns {
    /// Opens `<dir>/<name>`, e.g. `/var/run/netns/ctr1`.
    pub fn open(dir: &Path, name: &str) -> Result<Self, SupervisorError> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(SupervisorError::Namespace {
                name: name.to_string(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "invalid namespace name"),
            });
        }

        let file = File::open(dir.join(name)).map_err(|source| SupervisorError::Namespace {
            name: name.to_string(),
            source,
        })?;
        tracing::debug!("udhcpc using netns {}", name);

        Ok(Self {
            name: name.to_string(),
            file,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Makes the child switch into this namespace between fork and exec.
    pub(crate) fn enter_on_exec(&self, cmd: &mut Command) {
        let fd = self.file.as_raw_fd();
        // SAFETY: setns is async-signal-safe and the closure allocates nothing.
        // The namespace file outlives the spawn call because `self` is borrowed
        // for it and kept by the process handle afterwards.
        unsafe {
            cmd.pre_exec(move || {
                let ns = BorrowedFd::borrow_raw(fd);
                setns(ns, CloneFlags::CLONE_NEWNET).map_err(io::Error::from)
            });
        }
    }
}
