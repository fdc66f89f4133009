// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Readiness-driven connection multiplexer.
//!
//! Every client socket is registered with one `mio::Poll` by raw descriptor.
//! A single thread waits for readiness, reads frames off ready sockets, and
//! dispatches them; no thread is spawned per connection. Removal deregisters
//! the descriptor, withdraws the session from every topic, and shuts the
//! socket down, in that order, so topics never hold a dead session.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token};
use parking_lot::RwLock;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::Message;

use crate::auth::RbacGate;
use crate::outbound::{OutboundQueue, Payload};
use crate::protocol;
use crate::routing::session::{ReadOutcome, Session};
use crate::routing::Index;

/// Upper bound on readiness events drained per wait.
pub const MAX_EVENTS: usize = 100;

/// Token for the shutdown waker. Descriptors are small non-negative numbers,
/// and `Token(usize::MAX)` is reserved by mio, so this never collides.
pub const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// Poll timeout; also paces the ping/deadline sweep.
const TICK: Duration = Duration::from_secs(1);

struct HandleInner {
    registry: Registry,
    index: RwLock<Index>,
    queue: OutboundQueue,
    rbac: RbacGate,
}

/// Shared reactor handle: registration, removal, and access to the
/// subscription index. Clonable across the listener, writer, and router
/// threads.
#[derive(Clone)]
pub struct Handle {
    inner: Arc<HandleInner>,
}

impl Handle {
    pub fn new(registry: Registry, queue: OutboundQueue, rbac: RbacGate) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                registry,
                index: RwLock::new(Index::new()),
                queue,
                rbac,
            }),
        }
    }

    pub fn index(&self) -> &RwLock<Index> {
        &self.inner.index
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.inner.queue
    }

    pub fn rbac(&self) -> &RbacGate {
        &self.inner.rbac
    }

    /// Register a session's descriptor and insert it into the connection map.
    /// A registration failure propagates to the transport layer, which drops
    /// the socket.
    pub fn add(&self, session: Arc<Session>) -> std::io::Result<()> {
        let fd = session.raw_fd();
        self.inner.registry.register(&mut SourceFd(&fd), session.token(), Interest::READABLE)?;
        let mut index = self.inner.index.write();
        index.insert(session);
        let total = index.connection_count();
        if total % 100 == 0 {
            tracing::info!(total, "total connections");
        }
        Ok(())
    }

    /// Remove a session: deregister, drop from the connection map, withdraw
    /// from every topic, shut the socket down. Idempotent: double removal
    /// (reactor racing a writer) is a no-op.
    pub fn remove(&self, session: &Arc<Session>) {
        let mut index = self.inner.index.write();
        if !index.remove_connection(session) {
            return;
        }
        let fd = session.raw_fd();
        if let Err(e) = self.inner.registry.deregister(&mut SourceFd(&fd)) {
            tracing::debug!(err = %e, "deregister failed");
        }
        index.unsubscribe_all(session);
        let total = index.connection_count();
        drop(index);
        session.close();
        if total % 100 == 0 {
            tracing::info!(total, "total connections");
        }
    }
}

/// The reactor loop. Owns the `Poll`; everything shared lives in [`Handle`].
pub struct Reactor {
    poll: Poll,
    events: Events,
    handle: Handle,
    /// Tokens with a consumed readiness edge that may still have buffered
    /// frames. Retried every pass until a read returns `WouldBlock`.
    pending: HashSet<Token>,
    shutdown: Arc<AtomicBool>,
    last_sweep: Instant,
}

impl Reactor {
    pub fn new(poll: Poll, handle: Handle, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            poll,
            events: Events::with_capacity(MAX_EVENTS),
            handle,
            pending: HashSet::new(),
            shutdown,
            last_sweep: Instant::now(),
        }
    }

    pub fn run(mut self) {
        while !self.shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.poll.poll(&mut self.events, Some(TICK)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                tracing::error!(err = %e, "poll wait failed");
                continue;
            }

            for event in self.events.iter() {
                let token = event.token();
                if token != WAKER_TOKEN {
                    self.pending.insert(token);
                }
            }

            for session in self.ready_sessions() {
                self.drain(&session);
            }

            if self.last_sweep.elapsed() >= TICK {
                self.sweep();
                self.last_sweep = Instant::now();
            }
        }
        tracing::debug!("reactor stopped");
    }

    /// Resolve pending tokens to live sessions under the read lock, dropping
    /// tokens whose session is already gone.
    fn ready_sessions(&mut self) -> Vec<Arc<Session>> {
        let index = self.handle.index().read();
        let mut ready = Vec::with_capacity(self.pending.len());
        self.pending.retain(|token| match index.session(*token) {
            Some(session) => {
                ready.push(session);
                true
            }
            None => false,
        });
        ready
    }

    /// Read frames off one ready session until its buffer runs dry. Readiness
    /// is edge-triggered, so stopping early would strand buffered frames.
    fn drain(&mut self, session: &Arc<Session>) {
        loop {
            match session.try_read() {
                // A writer holds the socket; the token stays pending and the
                // next pass retries.
                ReadOutcome::Busy => return,
                ReadOutcome::WouldBlock => {
                    self.pending.remove(&session.token());
                    return;
                }
                ReadOutcome::Failed(e) => {
                    tracing::debug!(err = %e, "read failed, removing session");
                    self.handle.remove(session);
                    self.pending.remove(&session.token());
                    return;
                }
                ReadOutcome::Frame(message) => {
                    if !self.on_message(session, message) {
                        self.pending.remove(&session.token());
                        return;
                    }
                }
            }
        }
    }

    /// Handle one frame. Returns false once the session has been removed.
    fn on_message(&mut self, session: &Arc<Session>, message: Message) -> bool {
        match message {
            Message::Text(text) => {
                self.on_frame(session, text.as_str());
                true
            }
            Message::Binary(data) => {
                match std::str::from_utf8(&data) {
                    Ok(text) => self.on_frame(session, text),
                    Err(_) => {
                        self.handle
                            .queue()
                            .push(session, Payload::Text(protocol::error_response("parse error")));
                    }
                }
                true
            }
            Message::Pong(_) => {
                session.renew_read_deadline();
                true
            }
            // The protocol layer answers pings on the next socket write.
            Message::Ping(_) => true,
            Message::Close(frame) => {
                if let Some(frame) = &frame {
                    if !matches!(frame.code, CloseCode::Away | CloseCode::Abnormal) {
                        tracing::warn!(code = %frame.code, "unexpected close code");
                    }
                }
                self.handle.remove(session);
                false
            }
            // Raw frames never surface from a non-frame read.
            Message::Frame(_) => true,
        }
    }

    fn on_frame(&mut self, session: &Arc<Session>, raw: &str) {
        let frame = protocol::normalize(raw);
        if frame.is_empty() {
            return;
        }
        tracing::debug!(frame = %frame, "received frame");

        if frame == protocol::PING {
            self.handle.queue().push(session, Payload::Text(protocol::PONG.into()));
            return;
        }

        let request = match protocol::parse_request(frame.as_bytes()) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(err = %e, "request parse failed");
                self.handle
                    .queue()
                    .push(session, Payload::Text(protocol::error_response("parse error")));
                return;
            }
        };

        match request.method.as_str() {
            "subscribe" => {
                self.handle.index().write().subscribe(
                    session,
                    &request.streams,
                    self.handle.rbac(),
                    self.handle.queue(),
                );
            }
            "unsubscribe" => {
                self.handle
                    .index()
                    .write()
                    .unsubscribe(session, &request.streams, self.handle.queue());
            }
            _ => {
                self.handle
                    .queue()
                    .push(session, Payload::Text(protocol::error_response("unsupported method")));
            }
        }
    }

    /// Timer duty: remove sessions past their read deadline and enqueue
    /// heartbeat pings for the rest.
    fn sweep(&mut self) {
        let now = Instant::now();
        let sessions = self.handle.index().read().sessions();
        for session in sessions {
            if session.read_deadline_expired(now) {
                tracing::debug!("read deadline expired, removing session");
                self.handle.remove(&session);
                self.pending.remove(&session.token());
            } else if session.take_due_ping(now) {
                self.handle.queue().push(&session, Payload::Ping);
            }
        }
    }
}
