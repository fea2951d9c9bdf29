//! Wire format handling for Kea lease-hook notifications.
//!
//! The hook library delivers exactly one JSON envelope per connection:
//!
//! ```text
//! {"callout": <int>, "lease": {...}, "subnet": {...}, "query": {...}}
//! ```
//!
//! Which of the nested objects are present is determined by the callout
//! point. Decoding is deliberately tolerant: a nested object that fails to
//! decode is logged and left at its zero value, so one bad field never
//! discards an otherwise usable notification. Only the dispatch-critical
//! fields (callout, and for add-kinds the circuit-id and lease address) can
//! cause an event to be dropped, and that happens in the reconciler.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Minimum length of a circuit-id token: a two-character encoding prefix
/// ("0x" by convention) followed by at least one hex digit.
pub const MIN_CIRCUIT_ID_LEN: usize = 3;

/// Callout points of the Kea lease4 hook protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callout {
    /// A new lease was selected for a client.
    Lease4Select,
    /// An existing lease was renewed.
    Lease4Renew,
    /// The client released its lease.
    Lease4Release,
    /// The client declined the offered address.
    Lease4Decline,
    /// The lease expired without renewal.
    Lease4Expire,
    /// A previously declined lease was recovered.
    Lease4Recover,
    /// Flex-id query for an incoming packet; answered inline by the listener.
    Pkt4CircuitId,
    /// Unrecognized callout tag.
    Unknown(i64),
}

impl From<i64> for Callout {
    fn from(v: i64) -> Self {
        match v {
            1 => Callout::Lease4Select,
            2 => Callout::Lease4Renew,
            3 => Callout::Lease4Release,
            4 => Callout::Lease4Decline,
            5 => Callout::Lease4Expire,
            6 => Callout::Lease4Recover,
            7 => Callout::Pkt4CircuitId,
            other => Callout::Unknown(other),
        }
    }
}

impl std::fmt::Display for Callout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Callout::Lease4Select => write!(f, "LEASE4_SELECT"),
            Callout::Lease4Renew => write!(f, "LEASE4_RENEW"),
            Callout::Lease4Release => write!(f, "LEASE4_RELEASE"),
            Callout::Lease4Decline => write!(f, "LEASE4_DECLINE"),
            Callout::Lease4Expire => write!(f, "LEASE4_EXPIRE"),
            Callout::Lease4Recover => write!(f, "LEASE4_RECOVER"),
            Callout::Pkt4CircuitId => write!(f, "PKT4_CIRCUIT_ID"),
            Callout::Unknown(v) => write!(f, "UNKNOWN({})", v),
        }
    }
}

/// Raw hook envelope as it arrives on the socket.
///
/// The nested objects are kept as raw JSON values so each can be decoded
/// (or fail to decode) independently during classification.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub callout: i64,
    #[serde(default)]
    pub lease: Option<serde_json::Value>,
    #[serde(default)]
    pub subnet: Option<serde_json::Value>,
    #[serde(default)]
    pub query: Option<serde_json::Value>,
}

/// Lease state as reported by the DHCP server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Lease {
    pub state: String,
    #[serde(rename = "is-expired")]
    pub is_expired: bool,
    pub address: String,
    pub hostname: String,
    /// Client last transaction time (unix seconds).
    pub cltt: i64,
    #[serde(rename = "valid-lft")]
    pub valid_lft: i64,
}

/// The incoming packet that triggered the callout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Query {
    #[serde(rename = "type")]
    pub query_type: String,
    pub interface: String,
    #[serde(rename = "if-index")]
    pub if_index: i64,
    #[serde(rename = "hw-addr")]
    pub hw_addr: String,
    #[serde(rename = "hw-addr-type")]
    pub hw_addr_type: String,
    #[serde(rename = "hw-addr-source")]
    pub hw_addr_source: String,
    pub option60: String,
    pub option82: String,
    #[serde(rename = "option82-circuit-id")]
    pub option82_circuit_id: String,
    #[serde(rename = "option82-remote-id")]
    pub option82_remote_id: String,
}

/// The subnet the lease was allocated from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Subnet {
    pub name: String,
    pub prefix: String,
    pub len: i64,
}

/// A classified lease notification, the unit of work delivered from the
/// listener to the reconciliation loop.
///
/// Substructures that are not relevant to the callout (or failed to decode)
/// are left at their zero values.
#[derive(Debug, Clone)]
pub struct LeaseEvent {
    pub callout: Callout,
    pub lease: Lease,
    pub query: Query,
    pub subnet: Subnet,
}

/// Reply written back on the connection for circuit-id query callouts.
#[derive(Debug, Serialize)]
pub struct FlexIdReply {
    #[serde(rename = "flex-id")]
    pub flex_id: String,
}

impl Envelope {
    /// Classifies the envelope into a [`LeaseEvent`], decoding only the
    /// substructures the protocol populates for this callout.
    pub fn classify(&self) -> LeaseEvent {
        let callout = Callout::from(self.callout);

        let mut event = LeaseEvent {
            callout,
            lease: Lease::default(),
            query: Query::default(),
            subnet: Subnet::default(),
        };

        match callout {
            Callout::Lease4Select | Callout::Lease4Renew => {
                event.lease = decode_section(&self.lease, "lease");
                event.subnet = decode_section(&self.subnet, "subnet");
                event.query = decode_section(&self.query, "query");
            }
            Callout::Lease4Release | Callout::Lease4Decline => {
                event.lease = decode_section(&self.lease, "lease");
                event.query = decode_section(&self.query, "query");
            }
            Callout::Lease4Expire | Callout::Lease4Recover => {
                event.lease = decode_section(&self.lease, "lease");
            }
            Callout::Pkt4CircuitId => {
                event.query = decode_section(&self.query, "query");
            }
            Callout::Unknown(_) => {}
        }

        event
    }
}

/// Decodes one nested envelope section, falling back to the zero value on
/// failure so one bad section never discards the event.
fn decode_section<T>(section: &Option<serde_json::Value>, name: &'static str) -> T
where
    T: serde::de::DeserializeOwned + Default,
{
    let Some(value) = section else {
        return T::default();
    };

    match serde_json::from_value(value.clone()) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!(section = name, error = %e, "malformed envelope section");
            T::default()
        }
    }
}

/// Decodes a circuit-id token into a forwarding-plane interface id.
///
/// The token carries a two-character encoding prefix (conventionally "0x")
/// followed by the hex-encoded interface id.
pub fn parse_circuit_id(cid: &str) -> Result<u32> {
    if cid.len() < MIN_CIRCUIT_ID_LEN {
        return Err(Error::MalformedCircuitId(cid.to_string()));
    }

    let hex = cid
        .get(2..)
        .ok_or_else(|| Error::MalformedCircuitId(cid.to_string()))?;

    u32::from_str_radix(hex, 16).map_err(|_| Error::MalformedCircuitId(cid.to_string()))
}
