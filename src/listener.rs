//! Lease event listener.
//!
//! A connection-oriented Unix-socket server receiving Kea hook notifications,
//! one short-lived connection per notification. Each accepted connection is
//! handled on its own task: decode one JSON envelope under a read deadline,
//! classify it, and either enqueue the event for the reconciler or — for
//! circuit-id query callouts — write a flex-id reply back on the same
//! connection.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::forwarding::ForwardingPlane;
use crate::message::{parse_circuit_id, Callout, Envelope, FlexIdReply, LeaseEvent};
use crate::{Error, Result};

/// How long a connected peer gets to deliver a complete envelope.
///
/// Kea's hook client is fire-and-forget; a peer that stalls past this is
/// abandoned without an error.
pub const READ_DEADLINE: Duration = Duration::from_millis(200);

/// Unix-socket server for lease lifecycle notifications.
pub struct LeaseListener {
    shutdown_tx: mpsc::Sender<()>,
    fault_rx: watch::Receiver<bool>,
    task: Option<tokio::task::JoinHandle<Result<()>>>,
    path: PathBuf,
}

impl LeaseListener {
    /// Binds the rendezvous socket and spawns the accept loop.
    ///
    /// Any stale socket file left by a previous run is removed first. A bind
    /// failure is returned as-is and is fatal to the caller.
    pub async fn start(
        path: impl AsRef<Path>,
        plane: Arc<dyn ForwardingPlane>,
        events: mpsc::Sender<LeaseEvent>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(socket = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(&path)?;
        tracing::info!(socket = %path.display(), "lease event listener bound");

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let (fault_tx, fault_rx) = watch::channel(false);

        let task = tokio::spawn(accept_loop(listener, plane, events, shutdown_rx, fault_tx));

        Ok(Self {
            shutdown_tx,
            fault_rx,
            task: Some(task),
            path,
        })
    }

    /// Resolves when the accept loop has failed unexpectedly.
    pub async fn faulted(&mut self) {
        while !*self.fault_rx.borrow_and_update() {
            if self.fault_rx.changed().await.is_err() {
                // Accept loop gone without a fault (normal shutdown).
                std::future::pending::<()>().await;
            }
        }
    }

    /// Signals the accept loop to stop and waits until it and every
    /// per-connection task have finished. Idempotent.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };

        let _ = self.shutdown_tx.send(()).await;
        let result = task.await?;

        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(socket = %self.path.display(), error = %e, "could not remove socket");
            }
        }

        result
    }
}

async fn accept_loop(
    listener: UnixListener,
    plane: Arc<dyn ForwardingPlane>,
    events: mpsc::Sender<LeaseEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
    fault_tx: watch::Sender<bool>,
) -> Result<()> {
    let mut conns = JoinSet::new();

    let result = loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        conns.spawn(handle_connection(stream, plane.clone(), events.clone()));
                    }
                    Err(e) => {
                        // During shutdown an accept failure is the expected
                        // symptom of the endpoint closing.
                        if shutdown_rx.try_recv().is_ok() {
                            break Ok(());
                        }
                        tracing::error!(error = %e, "accept failed");
                        let _ = fault_tx.send(true);
                        break Err(Error::Io(e));
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("lease event listener shutting down");
                break Ok(());
            }
        }
    };

    // Wait for in-flight connections before reporting the loop as done.
    while conns.join_next().await.is_some() {}

    result
}

/// Handles one notification connection.
async fn handle_connection(
    mut stream: UnixStream,
    plane: Arc<dyn ForwardingPlane>,
    events: mpsc::Sender<LeaseEvent>,
) {
    let envelope = match read_envelope(&mut stream).await {
        Ok(Some(envelope)) => envelope,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(error = %e, "failed to decode lease notification");
            return;
        }
    };

    let event = envelope.classify();

    if event.callout == Callout::Pkt4CircuitId {
        send_flex_id_reply(&mut stream, plane.as_ref(), &event).await;
        return;
    }

    // May block when the reconciler is behind; that backpressure is the
    // load-shedding mechanism.
    if events.send(event).await.is_err() {
        tracing::debug!("reconciler gone, dropping lease event");
    }
}

/// Reads one JSON envelope, tolerating partial reads, under [`READ_DEADLINE`].
///
/// Returns `Ok(None)` when the peer goes silent (deadline) or closes without
/// sending anything; both are abandoned without an error.
async fn read_envelope(stream: &mut UnixStream) -> Result<Option<Envelope>> {
    let deadline = Instant::now() + READ_DEADLINE;
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];

    loop {
        let n = match tokio::time::timeout_at(deadline, stream.read(&mut chunk)).await {
            Err(_) => {
                tracing::debug!("read deadline exceeded before a complete envelope");
                return Ok(None);
            }
            Ok(Ok(0)) => {
                if buf.is_empty() {
                    return Ok(None);
                }
                // EOF with a partial envelope: surface the parse error.
                let mut de = serde_json::Deserializer::from_slice(&buf);
                return Envelope::deserialize(&mut de)
                    .map(Some)
                    .map_err(Error::MalformedEnvelope);
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e.into()),
        };

        buf.extend_from_slice(&chunk[..n]);

        // Parse exactly one JSON value; trailing bytes (e.g. a newline) are
        // fine, an incomplete value means keep reading.
        let mut de = serde_json::Deserializer::from_slice(&buf);
        match Envelope::deserialize(&mut de) {
            Ok(envelope) => return Ok(Some(envelope)),
            Err(e) if e.is_eof() => continue,
            Err(e) => return Err(Error::MalformedEnvelope(e)),
        }
    }
}

/// Answers a circuit-id query callout with the interface's flex-id tag.
async fn send_flex_id_reply(
    stream: &mut UnixStream,
    plane: &dyn ForwardingPlane,
    event: &LeaseEvent,
) {
    let iface = match parse_circuit_id(&event.query.option82_circuit_id) {
        Ok(iface) => iface,
        Err(e) => {
            tracing::warn!(error = %e, "cannot answer circuit-id query");
            return;
        }
    };

    let reply = FlexIdReply {
        flex_id: plane.flex_id(iface).unwrap_or_default(),
    };

    let mut body = match serde_json::to_vec(&reply) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode flex-id reply");
            return;
        }
    };
    body.push(b'\n');

    if let Err(e) = stream.write_all(&body).await {
        tracing::warn!(error = %e, "failed to send flex-id reply");
    }
}
