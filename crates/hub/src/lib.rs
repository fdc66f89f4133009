// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streamhub: a WebSocket fan-out hub.
//!
//! Clients subscribe to named streams over long-lived sockets; an upstream
//! event log feeds keyed records that fan out to subscribers. The data plane
//! is a fixed set of threads (one readiness-driven reactor, a writer pool,
//! one event router) regardless of connection count.

pub mod auth;
pub mod config;
pub mod error;
pub mod outbound;
pub mod protocol;
pub mod reactor;
pub mod routing;
pub mod transport;
pub mod upstream;

use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::Context;
use crossbeam_channel::Sender;
use mio::{Poll, Waker};
use parking_lot::RwLock;

use crate::auth::{RbacGate, TokenVerifier};
use crate::config::HubConfig;
use crate::error::HubError;
use crate::reactor::{Handle, Reactor, WAKER_TOKEN};
use crate::routing::Index;
use crate::upstream::Record;

/// Capacity of the upstream record channel.
const RECORD_BUFFER: usize = 1024;

/// A running hub: listener, reactor, writer pool, and event router.
pub struct Hub {
    records: Sender<Record>,
    local_addr: SocketAddr,
    handle: Handle,
    shutdown: Arc<AtomicBool>,
    waker: Waker,
    reactor: Option<JoinHandle<()>>,
}

impl Hub {
    /// Bind the listener and start every data-plane thread.
    ///
    /// Failing to create the readiness set is fatal and surfaces here.
    pub fn start(config: &HubConfig) -> Result<Self, HubError> {
        let verifier = Arc::new(TokenVerifier::from_config(config.jwt_public_key.as_deref())?);
        let rbac = RbacGate::new(config.rbac_system.clone(), config.rbac_admin.clone());

        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        let registry = poll.registry().try_clone()?;

        let (queue, outbound_rx) = outbound::bounded(outbound::QUEUE_CAPACITY);
        let handle = Handle::new(registry, queue, rbac);
        let shutdown = Arc::new(AtomicBool::new(false));

        outbound::spawn_writers(config.writers.max(1), outbound_rx, handle.clone());

        let reactor = Reactor::new(poll, handle.clone(), Arc::clone(&shutdown));
        let reactor = std::thread::Builder::new()
            .name("reactor".to_owned())
            .spawn(move || reactor.run())?;

        let (records, record_rx) = crossbeam_channel::bounded(RECORD_BUFFER);
        upstream::router::spawn(record_rx, handle.clone());

        let listener = TcpListener::bind(config.listen_addr())?;
        let local_addr = listener.local_addr()?;
        transport::spawn_listener(listener, handle.clone(), verifier, Arc::clone(&shutdown));

        Ok(Self { records, local_addr, handle, shutdown, waker, reactor: Some(reactor) })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Producer side of the upstream record channel. Embedders and tests can
    /// inject records here directly; the NATS source uses a clone of it.
    pub fn records(&self) -> Sender<Record> {
        self.records.clone()
    }

    /// The subscription index, for inspection.
    pub fn index(&self) -> &RwLock<Index> {
        self.handle.index()
    }

    /// Block on the reactor thread.
    pub fn join(mut self) -> anyhow::Result<()> {
        if let Some(reactor) = self.reactor.take() {
            reactor.join().map_err(|_| anyhow::anyhow!("reactor thread panicked"))?;
        }
        Ok(())
    }

    /// Best-effort teardown: stop the reactor and the accept loop. Sessions
    /// are removed idempotently; no drain protocol is needed.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.waker.wake();
        // Unblock the accept loop.
        let _ = std::net::TcpStream::connect(self.local_addr);
    }
}

/// Run the hub until the process is killed.
pub fn run(config: HubConfig) -> anyhow::Result<()> {
    raise_nofile_limit().context("raise RLIMIT_NOFILE")?;

    let hub = Hub::start(&config)?;
    tracing::info!(addr = %hub.local_addr(), "streamhub listening");

    if let Some(url) = config.upstream_url.clone() {
        let source = upstream::nats::SourceConfig { url, prefix: config.upstream_prefix.clone() };
        upstream::nats::spawn(source, hub.records());
    }

    hub.join()
}

/// Raise the open-file limit to the hard maximum; every connection costs a
/// descriptor. Failure here is fatal.
fn raise_nofile_limit() -> Result<(), HubError> {
    use nix::sys::resource::{getrlimit, setrlimit, Resource};

    let (_soft, hard) = getrlimit(Resource::RLIMIT_NOFILE)?;
    setrlimit(Resource::RLIMIT_NOFILE, hard, hard)?;
    Ok(())
}
