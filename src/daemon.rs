//! Lifecycle coordination for the BNG control plane.
//!
//! The [`Gateway`] is the single authority for start and shutdown order.
//! Start: forwarding plane (constructed by the caller) → reconciler →
//! listener, so a consumer exists before any event can be enqueued.
//! Shutdown: stop the listener (drains in-flight connections and drops every
//! event sender), await the reconciler (which drains the now-closing
//! channel), then close the forwarding plane.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::forwarding::ForwardingPlane;
use crate::listener::LeaseListener;
use crate::reconcile::{Reconciler, EVENT_QUEUE_DEPTH};
use crate::session::SessionStore;
use crate::Result;

/// A running BNG control-plane core.
pub struct Gateway {
    listener: LeaseListener,
    reconciler: JoinHandle<SessionStore>,
    plane: Arc<dyn ForwardingPlane>,
}

impl Gateway {
    /// Starts the reconciliation loop and the lease event listener.
    ///
    /// The forwarding plane must already be initialized; constructing it is
    /// the caller's `Init` step and fatal on failure.
    pub async fn start(config: &Config, plane: Arc<dyn ForwardingPlane>) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

        let reconciler = Reconciler::new(plane.clone(), config.policy, event_rx);
        let reconciler = tokio::spawn(reconciler.run());

        let listener = LeaseListener::start(&config.misc.kea_socket, plane.clone(), event_tx).await?;

        Ok(Self {
            listener,
            reconciler,
            plane,
        })
    }

    /// Runs until `shutdown` resolves or the listener faults, then performs
    /// an ordered shutdown.
    pub async fn run_until<F: Future>(mut self, shutdown: F) -> Result<()> {
        tokio::select! {
            _ = shutdown => {
                tracing::info!("shutdown requested");
            }
            _ = self.listener.faulted() => {
                tracing::error!("lease event listener failed");
            }
        }
        self.shutdown().await
    }

    /// Stops every component in order and blocks until all tasks have exited.
    pub async fn shutdown(mut self) -> Result<()> {
        let listener_result = self.listener.stop().await;

        // The listener held the last event senders; the reconciler drains
        // whatever was enqueued and exits when the channel closes.
        let store = self.reconciler.await?;
        tracing::info!(sessions = store.len(), "reconciler drained");

        self.plane.close().await?;

        listener_result
    }
}
