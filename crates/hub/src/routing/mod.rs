// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscription index: three topic namespaces plus the connection map, all
//! guarded by one readers-writer lock owned by the caller.
//!
//! Stream names classify by dot count: `balance` is private, `ethusdt.depth`
//! is public, `system.ethusdt.depth` is prefixed (RBAC-gated on the prefix).

pub mod session;
pub mod topic;

use std::collections::HashMap;
use std::sync::Arc;

use mio::Token;

use crate::auth::RbacGate;
use crate::outbound::{OutboundQueue, Payload};
use crate::protocol;
use crate::upstream::Event;
use self::session::Session;
use self::topic::Topic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Private,
    Public,
    Prefixed,
    Unknown,
}

pub fn classify(name: &str) -> StreamKind {
    match name.bytes().filter(|b| *b == b'.').count() {
        0 => StreamKind::Private,
        1 => StreamKind::Public,
        2 => StreamKind::Prefixed,
        _ => StreamKind::Unknown,
    }
}

/// Split a prefixed stream name into `(prefix, rest)`.
pub fn split_prefixed(name: &str) -> (&str, &str) {
    match name.split_once('.') {
        Some((prefix, rest)) => (prefix, rest),
        None => (name, ""),
    }
}

/// The subscription index. Callers wrap it in a `parking_lot::RwLock`; every
/// mutation and every broadcast runs under the write half, the reactor's
/// ready-session lookup under the read half.
#[derive(Default)]
pub struct Index {
    connections: HashMap<Token, Arc<Session>>,
    public: HashMap<String, Topic>,
    private: HashMap<String, HashMap<String, Topic>>,
    prefixed: HashMap<String, HashMap<String, Topic>>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Connection map -------------------------------------------------------

    pub fn insert(&mut self, session: Arc<Session>) {
        self.connections.insert(session.token(), session);
    }

    /// Remove the connection entry iff it still maps to this exact session.
    /// Descriptor numbers are reused by the OS, so a stale removal (writer
    /// racing the reactor) must not evict a newer session under the same
    /// token.
    pub fn remove_connection(&mut self, session: &Arc<Session>) -> bool {
        let present = self
            .connections
            .get(&session.token())
            .is_some_and(|existing| Arc::ptr_eq(existing, session));
        if present {
            self.connections.remove(&session.token());
        }
        present
    }

    pub fn session(&self, token: Token) -> Option<Arc<Session>> {
        self.connections.get(&token).cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.connections.values().cloned().collect()
    }

    // -- Subscribe ------------------------------------------------------------

    /// Apply a subscribe request, then enqueue the aggregate acknowledgement.
    /// The ack is enqueued while the write lock is still held, so any
    /// broadcast observed after it is guaranteed to reach the session.
    pub fn subscribe(
        &mut self,
        session: &Arc<Session>,
        streams: &[String],
        rbac: &RbacGate,
        queue: &OutboundQueue,
    ) {
        for name in streams {
            match classify(name) {
                StreamKind::Private => self.subscribe_private(session, name),
                StreamKind::Prefixed => self.subscribe_prefixed(session, name, rbac, queue),
                StreamKind::Public => self.subscribe_public(session, name),
                StreamKind::Unknown => {
                    tracing::debug!(stream = %name, "ignoring stream with unknown shape");
                }
            }
        }
        let ack = protocol::ack("subscribed", session.subscriptions());
        queue.push(session, Payload::Text(ack));
    }

    fn subscribe_public(&mut self, session: &Arc<Session>, name: &str) {
        let topic = self.public.entry(name.to_owned()).or_default();
        if topic.subscribe(session) {
            session.subscribe_public(name);
        }
    }

    fn subscribe_private(&mut self, session: &Arc<Session>, name: &str) {
        let uid = &session.auth().uid;
        if uid.is_empty() {
            tracing::debug!(stream = %name, "anonymous subscription to private stream denied");
            return;
        }
        let topic =
            self.private.entry(uid.clone()).or_default().entry(name.to_owned()).or_default();
        if topic.subscribe(session) {
            session.subscribe_private(name);
        }
    }

    fn subscribe_prefixed(
        &mut self,
        session: &Arc<Session>,
        name: &str,
        rbac: &RbacGate,
        queue: &OutboundQueue,
    ) {
        let (prefix, rest) = split_prefixed(name);
        if !rbac.allows(prefix, &session.auth().role) {
            queue.push(session, Payload::Text(protocol::refusal(name)));
            return;
        }
        let topic =
            self.prefixed.entry(prefix.to_owned()).or_default().entry(rest.to_owned()).or_default();
        if topic.subscribe(session) {
            // The full prefixed name goes into the public list; unsubscribe
            // and the ack round-trip both use it verbatim.
            session.subscribe_public(name);
        }
    }

    // -- Unsubscribe ----------------------------------------------------------

    /// Apply an unsubscribe request, then enqueue the aggregate
    /// acknowledgement. Unknown or never-subscribed names succeed silently.
    pub fn unsubscribe(
        &mut self,
        session: &Arc<Session>,
        streams: &[String],
        queue: &OutboundQueue,
    ) {
        for name in streams {
            match classify(name) {
                StreamKind::Private => self.unsubscribe_private(session, name),
                StreamKind::Prefixed => self.unsubscribe_prefixed(session, name),
                StreamKind::Public => self.unsubscribe_public(session, name),
                StreamKind::Unknown => {
                    tracing::debug!(stream = %name, "ignoring stream with unknown shape");
                }
            }
        }
        let ack = protocol::ack("unsubscribed", session.subscriptions());
        queue.push(session, Payload::Text(ack));
    }

    fn unsubscribe_public(&mut self, session: &Arc<Session>, name: &str) {
        if let Some(topic) = self.public.get_mut(name) {
            if topic.unsubscribe(session) {
                session.unsubscribe_public(name);
            }
            if topic.is_empty() {
                self.public.remove(name);
            }
        }
    }

    fn unsubscribe_private(&mut self, session: &Arc<Session>, name: &str) {
        let uid = session.auth().uid.clone();
        if uid.is_empty() {
            return;
        }
        let Some(topics) = self.private.get_mut(&uid) else {
            return;
        };
        if let Some(topic) = topics.get_mut(name) {
            if topic.unsubscribe(session) {
                session.unsubscribe_private(name);
            }
            if topic.is_empty() {
                topics.remove(name);
            }
        }
        if topics.is_empty() {
            self.private.remove(&uid);
        }
    }

    fn unsubscribe_prefixed(&mut self, session: &Arc<Session>, name: &str) {
        let (prefix, rest) = split_prefixed(name);
        let Some(topics) = self.prefixed.get_mut(prefix) else {
            return;
        };
        if let Some(topic) = topics.get_mut(rest) {
            if topic.unsubscribe(session) {
                session.unsubscribe_public(name);
            }
            if topic.is_empty() {
                topics.remove(rest);
            }
        }
        if topics.is_empty() {
            self.prefixed.remove(prefix);
        }
    }

    /// Withdraw a session from every topic in all three namespaces, applying
    /// the same empty-collapse rules. Part of the removal protocol; runs
    /// before the socket is shut down.
    pub fn unsubscribe_all(&mut self, session: &Arc<Session>) {
        self.public.retain(|_, topic| {
            topic.unsubscribe(session);
            !topic.is_empty()
        });

        self.prefixed.retain(|_, topics| {
            topics.retain(|_, topic| {
                topic.unsubscribe(session);
                !topic.is_empty()
            });
            !topics.is_empty()
        });

        let uid = session.auth().uid.clone();
        if !uid.is_empty() {
            if let Some(topics) = self.private.get_mut(&uid) {
                topics.retain(|_, topic| {
                    topic.unsubscribe(session);
                    !topic.is_empty()
                });
                if topics.is_empty() {
                    self.private.remove(&uid);
                }
            }
        }

        session.clear_subscriptions();
    }

    // -- Event routing --------------------------------------------------------

    /// Locate the target topic for an upstream event and broadcast to it.
    /// Called by the event router while it holds the index write lock.
    pub fn route(&self, event: &Event, queue: &OutboundQueue) {
        match event.scope.as_str() {
            "public" | "global" => match self.public.get(&event.topic) {
                Some(topic) => topic.broadcast(event, queue),
                None => {
                    tracing::debug!(topic = %event.topic, "no subscribers for public topic");
                }
            },
            "private" => {
                let uid = &event.stream;
                match self.private.get(uid).and_then(|topics| topics.get(&event.topic)) {
                    Some(topic) => topic.broadcast(event, queue),
                    None => {
                        tracing::debug!(topic = %event.topic, "no subscriber for private topic");
                    }
                }
            }
            prefix => {
                if let Some(topic) =
                    self.prefixed.get(prefix).and_then(|topics| topics.get(&event.topic))
                {
                    topic.broadcast(event, queue);
                }
            }
        }
    }

    // -- Inspection -----------------------------------------------------------

    pub fn public_topic_len(&self, name: &str) -> Option<usize> {
        self.public.get(name).map(Topic::len)
    }

    pub fn private_topic_len(&self, uid: &str, name: &str) -> Option<usize> {
        self.private.get(uid).and_then(|topics| topics.get(name)).map(Topic::len)
    }

    pub fn prefixed_topic_len(&self, prefix: &str, name: &str) -> Option<usize> {
        self.prefixed.get(prefix).and_then(|topics| topics.get(name)).map(Topic::len)
    }

    /// Number of private topics held for a uid, if any entry exists at all.
    pub fn private_topics_for(&self, uid: &str) -> Option<usize> {
        self.private.get(uid).map(HashMap::len)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;

    use tungstenite::protocol::Role;
    use tungstenite::WebSocket;

    use crate::auth::Auth;
    use crate::routing::session::Session;

    /// Build a session over a real loopback socket pair. The returned client
    /// stream keeps the peer half alive for the duration of the test.
    pub fn session(uid: &str, role: &str) -> std::io::Result<(Arc<Session>, TcpStream)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let client = TcpStream::connect(listener.local_addr()?)?;
        let (server, _) = listener.accept()?;
        let ws = WebSocket::from_raw_socket(server, Role::Server, None);
        let auth = Auth { uid: uid.to_owned(), role: role.to_owned() };
        Ok((Arc::new(Session::new(ws, auth)?), client))
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
