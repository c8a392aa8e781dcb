//! # Leasewatch - udhcpc Lease Supervisor
//!
//! Leasewatch runs busybox `udhcpc` for a network interface, optionally inside
//! a network namespace, and tracks the lease it obtains. udhcpc invokes the
//! `leasewatch-handler` binary on every lease transition; the handler publishes
//! a JSON event onto a POSIX message queue owned by the supervisor, and a
//! background task decodes those events, updates the lease state and fans them
//! out to listeners.
//!
//! ## Features
//!
//! - One-shot (`-q`) and persistent (`-R`) udhcpc modes
//! - Network namespace support for the child process
//! - Synchronous lease waiting with timeouts
//! - Ordered event listeners with per-listener failure isolation
//! - Strictly ordered shutdown (process, dispatch loop, channel)
//!
//! Linux only: the event channel relies on pollable message queue descriptors.
//!
//! ## Example
//!
//! ```rust,no_run
//! use leasewatch::{DhcpSupervisor, Interface, SupervisorConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let interface = Interface::from_sysfs("eth0", None).await?;
//!     let mut config = SupervisorConfig::new(interface);
//!     config.once = true;
//!     let mut supervisor = DhcpSupervisor::start(config, Vec::new()).await?;
//!     let ip = supervisor.finish(Duration::from_secs(5)).await?;
//!     println!("Obtained lease: {:?}", ip);
//!     Ok(())
//! }
//! ```

#[cfg(not(target_os = "linux"))]
compile_error!("leasewatch requires Linux message queues");

pub mod channel;
pub mod config;
mod dispatch;
pub mod error;
pub mod event;
pub mod interface;
pub mod lease;
pub mod listener;
pub mod process;
pub mod supervisor;

pub use config::{Args, SupervisorConfig};
pub use error::{ExitPhase, SupervisorError};
pub use event::{EventType, LeaseEvent};
pub use interface::Interface;
pub use lease::Lease;
pub use listener::{listener_fn, EventContext, EventListener, ListenerError};
pub use supervisor::DhcpSupervisor;
