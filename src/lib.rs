//! BNG control-plane core: lease-event ingestion and session reconciliation.
//!
//! rustbng keeps a forwarding plane's per-subscriber routing state consistent
//! with the lease lifecycle of a Kea DHCP server. The Kea hook library
//! reports every lease event over a Unix socket; this crate turns those
//! notifications into idempotent session mutations: a subscriber's route
//! exists if and only if its lease is active.
//!
//! # Quick Start
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use rustbng::{Config, ForwardingPlane, Gateway, LoggingPlane};
//! # async fn example() -> rustbng::Result<()> {
//! let config = Config::load_or_create("/etc/rustbng.toml").await?;
//! let plane: Arc<dyn ForwardingPlane> = Arc::new(LoggingPlane::new(&config.ifaces));
//!
//! let gateway = Gateway::start(&config, plane).await?;
//! gateway.run_until(async { tokio::signal::ctrl_c().await.ok(); }).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! Many short-lived per-connection tasks funnel into exactly one sequential
//! consumer that owns all session state:
//!
//! - [`LeaseListener`] — accepts one connection per notification, decodes the
//!   JSON envelope under a read deadline, answers circuit-id queries inline
//! - [`Reconciler`] — the single writer of the [`SessionStore`] and the only
//!   caller of the forwarding plane's session mutations
//! - [`Gateway`] — owns start and shutdown order and blocks exit until all
//!   in-flight work has quiesced
//! - [`ForwardingPlane`] — the narrow contract to the packet-processing
//!   engine; enable the `netlink` feature for a kernel-route implementation
//!
//! ## Netlink Feature
//!
//! Enable the `netlink` feature to program subscriber routes directly into
//! the Linux kernel:
//!
//! ```toml
//! [dependencies]
//! rustbng = { version = "0.1", features = ["netlink"] }
//! ```

mod config;
mod daemon;
mod error;
mod forwarding;
mod listener;
mod message;
mod reconcile;
mod session;

#[cfg(feature = "netlink")]
pub mod netlink;

pub use config::{Config, IfaceConfig, MiscConfig};
pub use daemon::Gateway;
pub use error::Error;
pub use forwarding::{ForwardingPlane, LoggingPlane};
pub use listener::{LeaseListener, READ_DEADLINE};
pub use message::{
    parse_circuit_id, Callout, Envelope, FlexIdReply, Lease, LeaseEvent, Query, Subnet,
    MIN_CIRCUIT_ID_LEN,
};
pub use reconcile::{CalloutPolicy, Reconciler, EVENT_QUEUE_DEPTH};
pub use session::{Session, SessionStore};

/// Result type for BNG control-plane operations.
pub type Result<T> = std::result::Result<T, Error>;
