//! Session reconciliation loop.
//!
//! The reconciler is the single writer of the session store and the only
//! caller of the forwarding plane's session-mutation entry points. It runs
//! as one sequential task consuming classified lease events from a bounded
//! channel, which gives a total order over all session mutations without any
//! locking. Producers block on the channel when the loop is behind; that
//! backpressure is the load-shedding mechanism.
//!
//! The loop exits once every sender has dropped and the channel is drained,
//! so no event enqueued before shutdown is ever discarded.

use std::net::Ipv4Addr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::forwarding::ForwardingPlane;
use crate::message::{parse_circuit_id, Callout, LeaseEvent};
use crate::session::{Session, SessionStore};

/// Capacity of the listener-to-reconciler event channel.
pub const EVENT_QUEUE_DEPTH: usize = 1024;

/// How decline and recover callouts map onto session eviction.
///
/// Kea deployments differ in whether these callouts are hooked at all, so the
/// mapping is explicit configuration rather than a guess. Both default to
/// eviction, which is always safe: evicting a session that was never added is
/// a no-op.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CalloutPolicy {
    /// Treat LEASE4_DECLINE as an eviction.
    pub evict_on_decline: bool,
    /// Treat LEASE4_RECOVER as an eviction.
    pub evict_on_recover: bool,
}

impl Default for CalloutPolicy {
    fn default() -> Self {
        Self {
            evict_on_decline: true,
            evict_on_recover: true,
        }
    }
}

/// Single-writer consumer of lease events.
pub struct Reconciler {
    store: SessionStore,
    plane: Arc<dyn ForwardingPlane>,
    policy: CalloutPolicy,
    events: mpsc::Receiver<LeaseEvent>,
}

impl Reconciler {
    /// Creates a reconciler consuming from `events`.
    pub fn new(
        plane: Arc<dyn ForwardingPlane>,
        policy: CalloutPolicy,
        events: mpsc::Receiver<LeaseEvent>,
    ) -> Self {
        Self {
            store: SessionStore::new(),
            plane,
            policy,
            events,
        }
    }

    /// Runs until the event channel closes, then returns the final store.
    pub async fn run(mut self) -> SessionStore {
        while let Some(event) = self.events.recv().await {
            self.apply(event).await;
        }
        tracing::debug!(sessions = self.store.len(), "reconciler shutting down");
        self.store
    }

    async fn apply(&mut self, event: LeaseEvent) {
        match event.callout {
            Callout::Lease4Select | Callout::Lease4Renew => self.upsert(&event).await,
            Callout::Lease4Release | Callout::Lease4Expire => self.evict(&event).await,
            Callout::Lease4Decline => {
                if self.policy.evict_on_decline {
                    self.evict(&event).await;
                } else {
                    tracing::debug!(callout = %event.callout, "decline eviction disabled by policy");
                }
            }
            Callout::Lease4Recover => {
                if self.policy.evict_on_recover {
                    self.evict(&event).await;
                } else {
                    tracing::debug!(callout = %event.callout, "recover eviction disabled by policy");
                }
            }
            // Answered inline by the listener; never enqueued.
            Callout::Pkt4CircuitId => {}
            Callout::Unknown(tag) => {
                tracing::warn!(callout = tag, "unknown callout, ignoring");
            }
        }
    }

    /// Installs or replaces the session for the event's lease address.
    async fn upsert(&mut self, event: &LeaseEvent) {
        let iface = match parse_circuit_id(&event.query.option82_circuit_id) {
            Ok(iface) => iface,
            Err(e) => {
                tracing::warn!(callout = %event.callout, error = %e, "dropping lease event");
                return;
            }
        };

        let address: Ipv4Addr = match event.lease.address.parse() {
            Ok(address) => address,
            Err(_) => {
                tracing::warn!(
                    callout = %event.callout,
                    address = %event.lease.address,
                    "dropping lease event with malformed address"
                );
                return;
            }
        };

        let previous = self.store.put(Session { iface, address });

        // Withdraw the old route before installing the new one so the
        // forwarding plane never holds two concurrent routes for one address.
        if let Some(previous) = previous {
            if previous.iface != iface {
                tracing::info!(%address, old_iface = previous.iface, new_iface = iface, "session moved");
                if let Err(e) = self.plane.remove_session(address, previous.iface).await {
                    tracing::warn!(%address, iface = previous.iface, error = %e, "forwarding plane remove failed");
                }
            }
        }

        tracing::info!(%address, iface, "add session");
        if let Err(e) = self.plane.add_session(address, iface).await {
            tracing::warn!(%address, iface, error = %e, "forwarding plane add failed");
        }
    }

    /// Removes the session for the event's lease address, if one exists.
    async fn evict(&mut self, event: &LeaseEvent) {
        let address: Ipv4Addr = match event.lease.address.parse() {
            Ok(address) => address,
            Err(_) => {
                tracing::warn!(
                    callout = %event.callout,
                    address = %event.lease.address,
                    "dropping lease event with malformed address"
                );
                return;
            }
        };

        match self.store.remove(address) {
            Some(session) => {
                tracing::info!(%address, iface = session.iface, "remove session");
                if let Err(e) = self.plane.remove_session(address, session.iface).await {
                    tracing::warn!(%address, iface = session.iface, error = %e, "forwarding plane remove failed");
                }
            }
            None => {
                // Normal when the matching add was dropped earlier.
                tracing::debug!(%address, "no session to evict");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Lease, Query, Subnet};
    use crate::{Error, Result};

    use std::sync::Mutex;

    use async_trait::async_trait;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum PlaneCall {
        Add(Ipv4Addr, u32),
        Remove(Ipv4Addr, u32),
    }

    /// Records forwarding-plane calls; optionally fails every mutation.
    struct RecordingPlane {
        calls: Mutex<Vec<PlaneCall>>,
        fail: bool,
    }

    impl RecordingPlane {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn calls(&self) -> Vec<PlaneCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ForwardingPlane for RecordingPlane {
        async fn add_session(&self, address: Ipv4Addr, iface: u32) -> Result<()> {
            self.calls.lock().unwrap().push(PlaneCall::Add(address, iface));
            if self.fail {
                return Err(Error::Forwarding("injected add fault".into()));
            }
            Ok(())
        }

        async fn remove_session(&self, address: Ipv4Addr, iface: u32) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(PlaneCall::Remove(address, iface));
            if self.fail {
                return Err(Error::Forwarding("injected remove fault".into()));
            }
            Ok(())
        }

        fn flex_id(&self, _iface: u32) -> Option<String> {
            None
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn select_event(address: &str, cid: &str) -> LeaseEvent {
        LeaseEvent {
            callout: Callout::Lease4Select,
            lease: Lease {
                address: address.to_string(),
                ..Default::default()
            },
            query: Query {
                option82_circuit_id: cid.to_string(),
                ..Default::default()
            },
            subnet: Subnet::default(),
        }
    }

    fn expire_event(address: &str) -> LeaseEvent {
        LeaseEvent {
            callout: Callout::Lease4Expire,
            lease: Lease {
                address: address.to_string(),
                ..Default::default()
            },
            query: Query::default(),
            subnet: Subnet::default(),
        }
    }

    fn event_with_callout(callout: Callout, address: &str) -> LeaseEvent {
        LeaseEvent {
            callout,
            lease: Lease {
                address: address.to_string(),
                ..Default::default()
            },
            query: Query::default(),
            subnet: Subnet::default(),
        }
    }

    async fn run_events(
        plane: Arc<RecordingPlane>,
        policy: CalloutPolicy,
        events: Vec<LeaseEvent>,
    ) -> SessionStore {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let reconciler = Reconciler::new(plane, policy, rx);
        let task = tokio::spawn(reconciler.run());

        for event in events {
            tx.send(event).await.unwrap();
        }
        drop(tx);

        task.await.unwrap()
    }

    #[tokio::test]
    async fn test_select_installs_session() {
        let plane = Arc::new(RecordingPlane::new());
        let store = run_events(
            plane.clone(),
            CalloutPolicy::default(),
            vec![select_event("203.0.113.5", "0x0A")],
        )
        .await;

        let addr: Ipv4Addr = "203.0.113.5".parse().unwrap();
        assert_eq!(store.get(addr).unwrap().iface, 10);
        assert_eq!(plane.calls(), vec![PlaneCall::Add(addr, 10)]);
    }

    #[tokio::test]
    async fn test_expire_removes_with_stored_iface() {
        let plane = Arc::new(RecordingPlane::new());
        let store = run_events(
            plane.clone(),
            CalloutPolicy::default(),
            vec![select_event("203.0.113.5", "0x0A"), expire_event("203.0.113.5")],
        )
        .await;

        let addr: Ipv4Addr = "203.0.113.5".parse().unwrap();
        assert!(store.is_empty());
        assert_eq!(
            plane.calls(),
            vec![PlaneCall::Add(addr, 10), PlaneCall::Remove(addr, 10)]
        );
    }

    #[tokio::test]
    async fn test_reselect_replaces_interface() {
        let plane = Arc::new(RecordingPlane::new());
        let store = run_events(
            plane.clone(),
            CalloutPolicy::default(),
            vec![
                select_event("203.0.113.5", "0x5"),
                select_event("203.0.113.5", "0x7"),
            ],
        )
        .await;

        let addr: Ipv4Addr = "203.0.113.5".parse().unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(addr).unwrap().iface, 7);
        // Old route withdrawn before the new one is installed.
        assert_eq!(
            plane.calls(),
            vec![
                PlaneCall::Add(addr, 5),
                PlaneCall::Remove(addr, 5),
                PlaneCall::Add(addr, 7),
            ]
        );
    }

    #[tokio::test]
    async fn test_renew_same_interface_skips_remove() {
        let plane = Arc::new(RecordingPlane::new());
        let store = run_events(
            plane.clone(),
            CalloutPolicy::default(),
            vec![
                select_event("203.0.113.5", "0x0A"),
                select_event("203.0.113.5", "0x0A"),
            ],
        )
        .await;

        let addr: Ipv4Addr = "203.0.113.5".parse().unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(
            plane.calls(),
            vec![PlaneCall::Add(addr, 10), PlaneCall::Add(addr, 10)]
        );
    }

    #[tokio::test]
    async fn test_evict_without_session_is_noop() {
        let plane = Arc::new(RecordingPlane::new());
        let store = run_events(
            plane.clone(),
            CalloutPolicy::default(),
            vec![expire_event("203.0.113.5")],
        )
        .await;

        assert!(store.is_empty());
        assert!(plane.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_circuit_id_drops_event() {
        let plane = Arc::new(RecordingPlane::new());
        let store = run_events(
            plane.clone(),
            CalloutPolicy::default(),
            vec![select_event("203.0.113.5", "0x"), select_event("203.0.113.5", "0xzz")],
        )
        .await;

        assert!(store.is_empty());
        assert!(plane.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_address_drops_event() {
        let plane = Arc::new(RecordingPlane::new());
        let store = run_events(
            plane.clone(),
            CalloutPolicy::default(),
            vec![select_event("not-an-ip", "0x0A")],
        )
        .await;

        assert!(store.is_empty());
        assert!(plane.calls().is_empty());
    }

    #[tokio::test]
    async fn test_plane_fault_does_not_roll_back_store() {
        let plane = Arc::new(RecordingPlane::failing());
        let store = run_events(
            plane.clone(),
            CalloutPolicy::default(),
            vec![select_event("203.0.113.5", "0x0A")],
        )
        .await;

        // The table mutation stays committed even though the plane faulted.
        let addr: Ipv4Addr = "203.0.113.5".parse().unwrap();
        assert_eq!(store.get(addr).unwrap().iface, 10);
        assert_eq!(plane.calls(), vec![PlaneCall::Add(addr, 10)]);
    }

    #[tokio::test]
    async fn test_decline_policy() {
        let plane = Arc::new(RecordingPlane::new());
        let store = run_events(
            plane.clone(),
            CalloutPolicy {
                evict_on_decline: false,
                evict_on_recover: true,
            },
            vec![
                select_event("203.0.113.5", "0x0A"),
                event_with_callout(Callout::Lease4Decline, "203.0.113.5"),
            ],
        )
        .await;

        // Decline ignored by policy, session survives.
        assert_eq!(store.len(), 1);

        let plane = Arc::new(RecordingPlane::new());
        let store = run_events(
            plane.clone(),
            CalloutPolicy::default(),
            vec![
                select_event("203.0.113.5", "0x0A"),
                event_with_callout(Callout::Lease4Decline, "203.0.113.5"),
            ],
        )
        .await;

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_callout_is_ignored() {
        let plane = Arc::new(RecordingPlane::new());
        let store = run_events(
            plane.clone(),
            CalloutPolicy::default(),
            vec![event_with_callout(Callout::Unknown(42), "203.0.113.5")],
        )
        .await;

        assert!(store.is_empty());
        assert!(plane.calls().is_empty());
    }

    #[tokio::test]
    async fn test_drains_channel_before_exit() {
        let plane = Arc::new(RecordingPlane::new());
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let reconciler = Reconciler::new(plane.clone(), CalloutPolicy::default(), rx);

        // Enqueue everything before the consumer even starts, then close the
        // channel; every event must still be applied.
        for i in 0..32u32 {
            tx.send(select_event(&format!("10.0.0.{}", i + 1), "0x0A"))
                .await
                .unwrap();
        }
        drop(tx);

        let store = reconciler.run().await;
        assert_eq!(store.len(), 32);
        assert_eq!(plane.calls().len(), 32);
    }

    #[tokio::test]
    async fn test_concurrent_producers_serialize() {
        let plane = Arc::new(RecordingPlane::new());
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let reconciler = Reconciler::new(plane.clone(), CalloutPolicy::default(), rx);
        let task = tokio::spawn(reconciler.run());

        let tx2 = tx.clone();
        let a = tokio::spawn(async move {
            tx.send(select_event("203.0.113.5", "0x1")).await.unwrap();
        });
        let b = tokio::spawn(async move {
            tx2.send(expire_event("203.0.113.5")).await.unwrap();
        });
        a.await.unwrap();
        b.await.unwrap();

        let store = task.await.unwrap();
        let addr: Ipv4Addr = "203.0.113.5".parse().unwrap();
        let calls = plane.calls();

        // Both events applied in some serial order; final state matches
        // whichever was applied last.
        match store.get(addr) {
            Some(session) => {
                assert_eq!(session.iface, 1);
                assert_eq!(calls, vec![PlaneCall::Add(addr, 1)]);
            }
            None => {
                assert_eq!(
                    calls,
                    vec![PlaneCall::Add(addr, 1), PlaneCall::Remove(addr, 1)]
                );
            }
        }
    }
}
