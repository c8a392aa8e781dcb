//! Network interface descriptor

use crate::error::SupervisorError;
use tokio::fs;

/// Target name meaning "the namespace the supervisor itself runs in".
pub const DEFAULT_TARGET: &str = "localhost";

/// The interface a supervisor obtains a lease for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    /// Kernel interface name (e.g. `eth0`).
    pub name: String,
    /// Execution target; `None` or `localhost` means the default namespace.
    pub target: Option<String>,
    /// Hardware address, used to derive the channel name.
    pub address: String,
}

impl Interface {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: None,
            address: address.into(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Builds a descriptor by reading the hardware address from sysfs.
    pub async fn from_sysfs(
        name: impl Into<String>,
        target: Option<String>,
    ) -> Result<Self, SupervisorError> {
        let name = name.into();
        let mac_path = format!("/sys/class/net/{}/address", name);
        let address = fs::read_to_string(&mac_path)
            .await
            .map_err(|_| SupervisorError::InterfaceInvalid(name.clone()))?;
        let address = address.trim();
        if address.is_empty() {
            return Err(SupervisorError::InterfaceInvalid(name));
        }

        Ok(Self {
            address: address.to_string(),
            name,
            target,
        })
    }

    /// The network namespace udhcpc must run in, if not the default one.
    pub fn netns(&self) -> Option<&str> {
        self.target
            .as_deref()
            .filter(|target| !target.is_empty() && *target != DEFAULT_TARGET)
    }

    /// Message queue name for this interface, e.g. `/udhcpc_02_42_ac_11_00_02`.
    pub fn channel_name(&self) -> String {
        format!("/udhcpc_{}", self.address.replace(':', "_"))
    }
}
