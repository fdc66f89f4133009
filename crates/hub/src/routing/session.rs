// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One accepted client socket plus its identity and subscription lists.

use std::io::ErrorKind;
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::time::{Duration, Instant};

use bytes::Bytes;
use mio::Token;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use parking_lot::Mutex;
use tungstenite::{Message, Utf8Bytes, WebSocket};

/// Maximum inbound frame size.
pub const READ_LIMIT: usize = 512;

/// Time allowed before a missing pong removes the session.
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping period driven by the reactor. Must be less than `PONG_WAIT`.
pub const PING_PERIOD: Duration = Duration::from_secs(PONG_WAIT.as_secs() * 9 / 10);

/// Time allowed to write one frame to the peer.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Outcome of a non-blocking read attempt.
pub enum ReadOutcome {
    /// A writer currently holds the socket; retry on the next reactor pass.
    Busy,
    /// The socket has no complete frame buffered.
    WouldBlock,
    Frame(Message),
    Failed(tungstenite::Error),
}

#[derive(Default)]
struct SubLists {
    public: Vec<String>,
    private: Vec<String>,
}

/// A connected client. Owned by the reactor's connection map; topics hold
/// additional references whose validity is guaranteed by the removal
/// protocol (a session leaves every topic before its socket is shut down).
pub struct Session {
    fd: RawFd,
    auth: crate::auth::Auth,
    ws: Mutex<WebSocket<TcpStream>>,
    /// Duplicate socket handle used to shut the connection down without
    /// waiting on the websocket lock.
    control: TcpStream,
    subs: Mutex<SubLists>,
    read_deadline: Mutex<Instant>,
    next_ping: Mutex<Instant>,
}

impl Session {
    pub fn new(ws: WebSocket<TcpStream>, auth: crate::auth::Auth) -> std::io::Result<Self> {
        let control = ws.get_ref().try_clone()?;
        let fd = ws.get_ref().as_raw_fd();
        let now = Instant::now();
        Ok(Self {
            fd,
            auth,
            ws: Mutex::new(ws),
            control,
            subs: Mutex::new(SubLists::default()),
            read_deadline: Mutex::new(now + PONG_WAIT),
            next_ping: Mutex::new(now + PING_PERIOD),
        })
    }

    pub fn auth(&self) -> &crate::auth::Auth {
        &self.auth
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Reactor token for this session; the raw descriptor doubles as the key.
    pub fn token(&self) -> Token {
        Token(self.fd as usize)
    }

    /// Try to read one frame without blocking the reactor.
    pub fn try_read(&self) -> ReadOutcome {
        let Some(mut ws) = self.ws.try_lock() else {
            return ReadOutcome::Busy;
        };
        match ws.read() {
            Ok(message) => ReadOutcome::Frame(message),
            Err(tungstenite::Error::Io(ref e)) if e.kind() == ErrorKind::WouldBlock => {
                ReadOutcome::WouldBlock
            }
            Err(e) => ReadOutcome::Failed(e),
        }
    }

    /// Write one text frame, bounded by [`WRITE_WAIT`].
    pub fn write_frame(&self, text: Utf8Bytes) -> Result<(), tungstenite::Error> {
        self.write_message(Message::Text(text))
    }

    /// Write a protocol-level ping, bounded by [`WRITE_WAIT`].
    pub fn write_ping(&self) -> Result<(), tungstenite::Error> {
        self.write_message(Message::Ping(Bytes::new()))
    }

    fn write_message(&self, message: Message) -> Result<(), tungstenite::Error> {
        let deadline = Instant::now() + WRITE_WAIT;
        let mut ws = self.ws.lock();
        match ws.send(message) {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::Io(ref e)) if e.kind() == ErrorKind::WouldBlock => {
                flush_until(&mut ws, deadline)
            }
            Err(e) => Err(e),
        }
    }

    /// Shut the connection down. Idempotent; never waits on the socket lock.
    pub fn close(&self) {
        let _ = self.control.shutdown(Shutdown::Both);
    }

    pub fn renew_read_deadline(&self) {
        *self.read_deadline.lock() = Instant::now() + PONG_WAIT;
    }

    pub fn read_deadline_expired(&self, now: Instant) -> bool {
        now >= *self.read_deadline.lock()
    }

    /// True once per [`PING_PERIOD`]; schedules the next ping as a side
    /// effect so a slow sweep never double-pings.
    pub fn take_due_ping(&self, now: Instant) -> bool {
        let mut next = self.next_ping.lock();
        if now >= *next {
            *next = now + PING_PERIOD;
            true
        } else {
            false
        }
    }

    // Subscription lists. Only mutated while the index write lock is held;
    // duplicates are filtered here so list membership mirrors topic
    // membership exactly.

    pub fn subscribe_public(&self, name: &str) {
        let mut subs = self.subs.lock();
        if !subs.public.iter().any(|n| n == name) {
            subs.public.push(name.to_owned());
        }
    }

    pub fn subscribe_private(&self, name: &str) {
        let mut subs = self.subs.lock();
        if !subs.private.iter().any(|n| n == name) {
            subs.private.push(name.to_owned());
        }
    }

    pub fn unsubscribe_public(&self, name: &str) {
        self.subs.lock().public.retain(|n| n != name);
    }

    pub fn unsubscribe_private(&self, name: &str) {
        self.subs.lock().private.retain(|n| n != name);
    }

    /// Public names followed by private names; clients rely on the order.
    pub fn subscriptions(&self) -> Vec<String> {
        let subs = self.subs.lock();
        subs.public.iter().chain(subs.private.iter()).cloned().collect()
    }

    pub fn clear_subscriptions(&self) {
        let mut subs = self.subs.lock();
        subs.public.clear();
        subs.private.clear();
    }
}

/// Retry `flush` until it succeeds or the write deadline passes, sleeping in
/// `poll(2)` for writability in between.
fn flush_until(
    ws: &mut WebSocket<TcpStream>,
    deadline: Instant,
) -> Result<(), tungstenite::Error> {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(tungstenite::Error::Io(std::io::Error::from(ErrorKind::TimedOut)));
        }
        wait_writable(ws.get_ref(), deadline - now)?;
        match ws.flush() {
            Ok(()) => return Ok(()),
            Err(tungstenite::Error::Io(ref e)) if e.kind() == ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
}

fn wait_writable(stream: &TcpStream, remaining: Duration) -> Result<(), tungstenite::Error> {
    let millis = u16::try_from(remaining.as_millis()).unwrap_or(u16::MAX);
    let mut fds = [PollFd::new(stream.as_fd(), PollFlags::POLLOUT)];
    match poll(&mut fds, PollTimeout::from(millis)) {
        Ok(_) => Ok(()),
        Err(errno) => Err(tungstenite::Error::Io(std::io::Error::from(errno))),
    }
}
