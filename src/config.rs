use crate::{error::SupervisorError, interface::Interface};
use clap::Parser;
use std::{path::PathBuf, time::Duration};

pub const DEFAULT_UDHCPC: &str = "/sbin/udhcpc";
pub const DEFAULT_HANDLER: &str = "/usr/libexec/leasewatch/leasewatch-handler";
pub const DEFAULT_NETNS_DIR: &str = "/var/run/netns";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// The network interface to obtain a lease for (e.g., 'eth0')
    #[arg(short, long)]
    pub interface: String,

    /// Hardware address of the interface; read from sysfs when omitted
    #[arg(short, long)]
    pub address: Option<String>,

    /// Network namespace to run udhcpc in ('localhost' for the current one)
    #[arg(short, long)]
    pub netns: Option<String>,

    /// Quit once a lease is obtained instead of renewing it
    #[arg(short, long)]
    pub once: bool,

    /// Path to the udhcpc binary
    #[arg(long, default_value = DEFAULT_UDHCPC)]
    pub udhcpc: PathBuf,

    /// Handler udhcpc runs on every lease transition
    #[arg(long, default_value = DEFAULT_HANDLER)]
    pub handler: PathBuf,

    /// Seconds to wait for a lease
    #[arg(long, default_value_t = 10)]
    pub lease_timeout: u64,

    /// Seconds to wait for udhcpc to exit on shutdown
    #[arg(long, default_value_t = 5)]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub interface: Interface,
    pub once: bool,
    pub udhcpc: PathBuf,
    pub handler: PathBuf,
    pub netns_dir: PathBuf,
    pub lease_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl SupervisorConfig {
    pub fn new(interface: Interface) -> Self {
        Self {
            interface,
            once: false,
            udhcpc: PathBuf::from(DEFAULT_UDHCPC),
            handler: PathBuf::from(DEFAULT_HANDLER),
            netns_dir: PathBuf::from(DEFAULT_NETNS_DIR),
            lease_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    pub async fn from_args(args: Args) -> Result<Self, SupervisorError> {
        let interface = match args.address {
            Some(address) => Interface {
                name: args.interface,
                target: args.netns,
                address,
            },
            None => Interface::from_sysfs(args.interface, args.netns).await?,
        };

        Ok(Self {
            interface,
            once: args.once,
            udhcpc: args.udhcpc,
            handler: args.handler,
            netns_dir: PathBuf::from(DEFAULT_NETNS_DIR),
            lease_timeout: Duration::from_secs(args.lease_timeout),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SupervisorConfig::new(Interface::new("eth0", "02:42:ac:11:00:02"));

        assert!(!config.once);
        assert_eq!(config.udhcpc, PathBuf::from("/sbin/udhcpc"));
        assert_eq!(config.netns_dir, PathBuf::from("/var/run/netns"));
        assert_eq!(config.lease_timeout, Duration::from_secs(10));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_from_args_with_address() {
        let args = Args::parse_from([
            "leasewatch",
            "-i",
            "veth0",
            "-a",
            "02:42:ac:11:00:09",
            "-n",
            "ctr1",
            "--once",
            "--lease-timeout",
            "3",
        ]);
        let config = SupervisorConfig::from_args(args).await.unwrap();

        assert_eq!(config.interface.name, "veth0");
        assert_eq!(config.interface.netns(), Some("ctr1"));
        assert_eq!(config.interface.channel_name(), "/udhcpc_02_42_ac_11_00_09");
        assert!(config.once);
        assert_eq!(config.lease_timeout, Duration::from_secs(3));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.handler, PathBuf::from(DEFAULT_HANDLER));
    }
}
