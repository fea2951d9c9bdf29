//! Subscriber session table.
//!
//! A session records that one subscriber address is currently routed via one
//! forwarding-plane interface. The table is exclusively owned and mutated by
//! the reconciliation loop; there is deliberately no interior locking.

use std::collections::HashMap;
use std::net::Ipv4Addr;

/// One subscriber's routable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    /// Forwarding-plane interface id resolved from the circuit-id.
    pub iface: u32,
    /// Subscriber IPv4 address (the table key).
    pub address: Ipv4Addr,
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} via iface {}", self.address, self.iface)
    }
}

/// Mapping from subscriber address to session, at most one per address.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<Ipv4Addr, Session>,
}

impl SessionStore {
    /// Creates an empty session store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the session for `session.address`.
    ///
    /// Returns the previous session if one existed; the caller needs its
    /// interface id to withdraw the old forwarding-plane route before
    /// installing the new one.
    pub fn put(&mut self, session: Session) -> Option<Session> {
        self.sessions.insert(session.address, session)
    }

    /// Deletes and returns the session for `address`, if any.
    pub fn remove(&mut self, address: Ipv4Addr) -> Option<Session> {
        self.sessions.remove(&address)
    }

    /// Read-only lookup, retained for diagnostics; not on the write path.
    pub fn get(&self, address: Ipv4Addr) -> Option<&Session> {
        self.sessions.get(&address)
    }

    /// Returns the number of active sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no sessions are active.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
