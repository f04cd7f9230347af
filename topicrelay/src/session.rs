//! Subscriber session table.
//!
//! One [`Session`] per client identity ever seen. Records are never removed:
//! a client that reconnects under the same identity gets its subscriptions
//! back without subscribing again.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;

use crate::topic;

/// Identifies one accepted transport for as long as it stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Server-side state of one client identity.
#[derive(Debug, Clone)]
pub struct Session {
    client_id: String,
    addr: SocketAddr,
    conn: Option<ConnId>,
    subscriptions: HashSet<String>,
}

impl Session {
    /// Client identity.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Address of the most recent connection.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Transport handle, present only while connected.
    pub fn conn(&self) -> Option<ConnId> {
        self.conn
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Subscribed patterns, in no particular order.
    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.iter().map(String::as_str)
    }

    pub fn is_subscribed(&self, pattern: &str) -> bool {
        self.subscriptions.contains(pattern)
    }

    /// Whether any subscribed pattern matches `topic`.
    pub fn wants(&self, topic: &str) -> bool {
        self.subscriptions.iter().any(|p| topic::matches(p, topic))
    }
}

/// Result of a connect handshake against the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Session is now connected. `returning` is set when the identity had a
    /// record from an earlier connection.
    Accepted { returning: bool },
    /// Identity is connected on another transport; nothing was changed.
    AlreadyConnected,
}

/// Sessions keyed by identity, with a secondary index by transport handle.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<String, Session>,
    by_conn: HashMap<ConnId, String>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identities ever seen.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn find(&self, client_id: &str) -> Option<&Session> {
        self.sessions.get(client_id)
    }

    pub fn find_by_handle(&self, conn: ConnId) -> Option<&Session> {
        self.by_conn.get(&conn).and_then(|id| self.sessions.get(id))
    }

    /// Attach `conn` to `client_id`, creating the session on first sight.
    pub fn connect(&mut self, client_id: &str, addr: SocketAddr, conn: ConnId) -> ConnectOutcome {
        let returning = match self.sessions.get_mut(client_id) {
            Some(session) if session.is_connected() => return ConnectOutcome::AlreadyConnected,
            Some(session) => {
                session.addr = addr;
                session.conn = Some(conn);
                true
            }
            None => {
                self.sessions.insert(
                    client_id.to_string(),
                    Session {
                        client_id: client_id.to_string(),
                        addr,
                        conn: Some(conn),
                        subscriptions: HashSet::new(),
                    },
                );
                false
            }
        };
        self.by_conn.insert(conn, client_id.to_string());
        ConnectOutcome::Accepted { returning }
    }

    /// Mark the session on `conn` disconnected. Subscriptions are kept.
    pub fn disconnect(&mut self, conn: ConnId) -> Option<&Session> {
        let client_id = self.by_conn.remove(&conn)?;
        let session = self.sessions.get_mut(&client_id)?;
        session.conn = None;
        Some(session)
    }

    /// Mark `client_id` disconnected, returning the handle it held.
    pub fn disconnect_identity(&mut self, client_id: &str) -> Option<ConnId> {
        let session = self.sessions.get_mut(client_id)?;
        let conn = session.conn.take()?;
        self.by_conn.remove(&conn);
        Some(conn)
    }

    /// Add a pattern. Returns false if it was already present or the
    /// identity is unknown.
    pub fn subscribe(&mut self, client_id: &str, pattern: &str) -> bool {
        match self.sessions.get_mut(client_id) {
            Some(session) => session.subscriptions.insert(pattern.to_string()),
            None => false,
        }
    }

    /// Remove a pattern. Returns false if it was not present.
    pub fn unsubscribe(&mut self, client_id: &str, pattern: &str) -> bool {
        match self.sessions.get_mut(client_id) {
            Some(session) => session.subscriptions.remove(pattern),
            None => false,
        }
    }

    /// Every connected session, each once.
    pub fn all_connected(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values().filter(|s| s.is_connected())
    }

    /// Handles of the connected sessions with at least one pattern matching
    /// `topic`, each once regardless of how many of its patterns match.
    pub fn matching(&self, topic: &str) -> Vec<ConnId> {
        self.all_connected()
            .filter(|s| s.wants(topic))
            .filter_map(|s| s.conn)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn patterns(session: &Session) -> Vec<&str> {
        let mut v: Vec<&str> = session.subscriptions().collect();
        v.sort();
        v
    }

    #[test]
    fn test_connect_new_identity() {
        let mut table = SessionTable::new();
        let outcome = table.connect("S1", addr(5000), ConnId(1));
        assert_eq!(outcome, ConnectOutcome::Accepted { returning: false });

        let session = table.find("S1").unwrap();
        assert!(session.is_connected());
        assert_eq!(session.addr(), addr(5000));
        assert_eq!(session.conn(), Some(ConnId(1)));
        assert_eq!(table.find_by_handle(ConnId(1)).unwrap().client_id(), "S1");
    }

    #[test]
    fn test_reconnect_keeps_subscriptions() {
        let mut table = SessionTable::new();
        table.connect("I", addr(5000), ConnId(1));
        table.subscribe("I", "A");
        table.subscribe("I", "B");

        let session = table.disconnect(ConnId(1)).unwrap();
        assert!(!session.is_connected());
        assert_eq!(patterns(session), ["A", "B"]);
        assert!(table.find_by_handle(ConnId(1)).is_none());

        let outcome = table.connect("I", addr(6000), ConnId(2));
        assert_eq!(outcome, ConnectOutcome::Accepted { returning: true });

        let session = table.find("I").unwrap();
        assert_eq!(patterns(session), ["A", "B"]);
        assert_eq!(session.addr(), addr(6000));
        assert_eq!(session.conn(), Some(ConnId(2)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_identity_conflict_does_not_mutate() {
        let mut table = SessionTable::new();
        table.connect("X", addr(5000), ConnId(1));
        table.subscribe("X", "a/+");

        let outcome = table.connect("X", addr(7000), ConnId(9));
        assert_eq!(outcome, ConnectOutcome::AlreadyConnected);

        let session = table.find("X").unwrap();
        assert_eq!(session.addr(), addr(5000));
        assert_eq!(session.conn(), Some(ConnId(1)));
        assert_eq!(patterns(session), ["a/+"]);
        assert!(table.find_by_handle(ConnId(9)).is_none());
    }

    #[test]
    fn test_subscribe_idempotent() {
        let mut table = SessionTable::new();
        table.connect("c", addr(1), ConnId(1));
        assert!(table.subscribe("c", "t"));
        assert!(!table.subscribe("c", "t"));
        assert_eq!(patterns(table.find("c").unwrap()), ["t"]);

        assert!(table.unsubscribe("c", "t"));
        assert!(!table.unsubscribe("c", "t"));
        assert!(!table.subscribe("nobody", "t"));
    }

    #[test]
    fn test_disconnect_identity() {
        let mut table = SessionTable::new();
        table.connect("c", addr(1), ConnId(3));
        assert_eq!(table.disconnect_identity("c"), Some(ConnId(3)));
        assert_eq!(table.disconnect_identity("c"), None);
        assert!(table.disconnect(ConnId(3)).is_none());
    }

    #[test]
    fn test_matching_visits_each_session_once() {
        let mut table = SessionTable::new();
        table.connect("X", addr(1), ConnId(1));
        table.connect("Y", addr(2), ConnId(2));
        table.connect("Z", addr(3), ConnId(3));

        // X has two patterns that both match a/b.
        table.subscribe("X", "a/+");
        table.subscribe("X", "a/#");
        table.subscribe("Y", "c/#");
        table.subscribe("Z", "a/b");
        table.disconnect(ConnId(3));

        let mut targets = table.matching("a/b");
        targets.sort();
        assert_eq!(targets, [ConnId(1)]);

        table.connect("Z", addr(4), ConnId(4));
        let mut targets = table.matching("a/b");
        targets.sort();
        assert_eq!(targets, [ConnId(1), ConnId(4)]);

        assert_eq!(table.matching("c"), [ConnId(2)]);
        assert!(table.matching("d").is_empty());
    }

    #[test]
    fn test_all_connected() {
        let mut table = SessionTable::new();
        table.connect("a", addr(1), ConnId(1));
        table.connect("b", addr(2), ConnId(2));
        table.disconnect(ConnId(1));

        let ids: Vec<&str> = table.all_connected().map(Session::client_id).collect();
        assert_eq!(ids, ["b"]);
    }
}
