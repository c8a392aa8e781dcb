//! Lease events exchanged over the channel
//!
//! One channel message is one JSON object with a `type` field and
//! type-dependent auxiliary fields (`ip`, `gateway`, `domain`, ...).

use crate::error::EventError;
use ipnet::IpNet;
use serde_json::{Map, Value};
use std::{fmt, net::IpAddr, net::Ipv4Addr, str::FromStr};

/// Raw fields of a decoded event, `type` included.
pub type EventFields = Map<String, Value>;

/// Lease transitions the supervisor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Bound,
    Renew,
    Deconfig,
    Leasefail,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Bound => "bound",
            EventType::Renew => "renew",
            EventType::Deconfig => "deconfig",
            EventType::Leasefail => "leasefail",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bound" => Ok(EventType::Bound),
            "renew" => Ok(EventType::Renew),
            "deconfig" => Ok(EventType::Deconfig),
            "leasefail" => Ok(EventType::Leasefail),
            other => Err(EventError::UnknownType(other.to_string())),
        }
    }
}

/// A classified event decoded from one channel message.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseEvent {
    kind: EventType,
    fields: EventFields,
}

impl LeaseEvent {
    /// Decodes a channel payload and classifies its `type`.
    pub fn decode(payload: &[u8]) -> Result<Self, EventError> {
        let fields: EventFields = serde_json::from_slice(payload)?;
        Self::classify(fields)
    }

    pub fn classify(fields: EventFields) -> Result<Self, EventError> {
        let kind = match fields.get("type") {
            Some(Value::String(s)) => s.parse()?,
            Some(other) => return Err(EventError::UnknownType(other.to_string())),
            None => return Err(EventError::MissingType),
        };
        Ok(Self { kind, fields })
    }

    pub fn kind(&self) -> EventType {
        self.kind
    }

    pub fn fields(&self) -> &EventFields {
        &self.fields
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Interface address in CIDR notation. A bare address is taken as a host route.
    pub fn ip(&self) -> Result<Option<IpNet>, EventError> {
        let Some(raw) = self.field_str("ip")? else {
            return Ok(None);
        };
        if let Ok(net) = raw.parse::<IpNet>() {
            return Ok(Some(net));
        }
        raw.parse::<IpAddr>()
            .map(|addr| Some(IpNet::from(addr)))
            .map_err(|e| EventError::InvalidField {
                field: "ip",
                reason: e.to_string(),
            })
    }

    pub fn gateway(&self) -> Result<Option<IpAddr>, EventError> {
        self.field_str("gateway")?
            .map(|raw| {
                raw.parse().map_err(|e: std::net::AddrParseError| EventError::InvalidField {
                    field: "gateway",
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    pub fn domain(&self) -> Result<Option<String>, EventError> {
        Ok(self.field_str("domain")?.map(str::to_string))
    }

    fn field_str(&self, field: &'static str) -> Result<Option<&str>, EventError> {
        match self.fields.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(EventError::InvalidField {
                field,
                reason: format!("expected a string, got {other}"),
            }),
        }
    }
}

/// Builds the channel message for one udhcpc script invocation.
///
/// `kind` is udhcpc's first script argument and is forwarded verbatim, even
/// when the supervisor does not know it. `lookup` reads udhcpc's environment
/// (`ip`, `mask` or `subnet`, `router`, `domain`, `interface`).
pub fn handler_payload<F>(kind: &str, lookup: F) -> Value
where
    F: Fn(&str) -> Option<String>,
{
    let mut fields = EventFields::new();
    fields.insert("type".into(), Value::String(kind.to_string()));

    if let Some(ip) = lookup("ip").filter(|ip| !ip.is_empty()) {
        let prefix = lookup("mask")
            .and_then(|mask| mask.parse::<u8>().ok())
            .or_else(|| {
                lookup("subnet")
                    .and_then(|subnet| subnet.parse::<Ipv4Addr>().ok())
                    .and_then(|subnet| ipnet::ipv4_mask_to_prefix(subnet).ok())
            });
        let ip = match prefix {
            Some(prefix) => format!("{ip}/{prefix}"),
            None => ip,
        };
        fields.insert("ip".into(), Value::String(ip));
    }

    // udhcpc passes every router, space separated; the first one is the gateway.
    if let Some(gateway) = lookup("router")
        .as_deref()
        .and_then(|routers| routers.split_whitespace().next())
    {
        fields.insert("gateway".into(), Value::String(gateway.to_string()));
    }

    for key in ["domain", "interface"] {
        if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
            fields.insert(key.into(), Value::String(value));
        }
    }

    Value::Object(fields)
}
