// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end hub tests.
//!
//! Starts a real in-process hub on an ephemeral port and drives it over real
//! sockets with a blocking WebSocket client. Upstream records are injected
//! straight into the hub's record channel.

use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde_json::Value;
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::{Message, WebSocket};

use streamhub::config::HubConfig;
use streamhub::routing::Index;
use streamhub::upstream::Record;
use streamhub::Hub;

/// Per-read client timeout; also bounds index polling.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A running hub plus helpers to connect and inject.
pub struct TestHub {
    hub: Hub,
}

impl TestHub {
    pub fn start() -> anyhow::Result<Self> {
        let config = HubConfig {
            host: "127.0.0.1".to_owned(),
            port: 0,
            jwt_public_key: None,
            rbac_system: owned(&["admin", "superadmin", "operator"]),
            rbac_admin: owned(&["admin", "superadmin"]),
            upstream_url: None,
            upstream_prefix: "events".to_owned(),
            writers: 5,
        };
        Ok(Self { hub: Hub::start(&config)? })
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Connect anonymously.
    pub fn connect(&self, path: &str) -> anyhow::Result<WsClient> {
        self.connect_with(path, &[])
    }

    /// Connect with an identity via the keyless-mode trusted headers.
    pub fn connect_as(&self, path: &str, uid: &str, role: &str) -> anyhow::Result<WsClient> {
        self.connect_with(path, &[("JwtUID", uid), ("JwtRole", role)])
    }

    fn connect_with(
        &self,
        path: &str,
        headers: &[(&'static str, &str)],
    ) -> anyhow::Result<WsClient> {
        let addr = self.hub.local_addr();
        let mut request = format!("ws://{addr}{path}").into_client_request()?;
        for (name, value) in headers {
            request.headers_mut().insert(*name, HeaderValue::from_str(value)?);
        }

        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(TIMEOUT))?;
        stream.set_nodelay(true)?;

        let (ws, _response) = tungstenite::client(request, stream)
            .map_err(|e| anyhow::anyhow!("handshake failed: {e}"))?;
        Ok(WsClient { ws })
    }

    /// Push one upstream record into the hub.
    pub fn inject(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.hub
            .records()
            .send(Record { key: key.to_owned(), value: bytes::Bytes::from(value.to_owned()) })
            .context("record channel closed")
    }

    /// Poll an index predicate until it holds or [`TIMEOUT`] passes.
    pub fn wait_index<F>(&self, what: &str, predicate: F) -> anyhow::Result<()>
    where
        F: Fn(&Index) -> bool,
    {
        let deadline = Instant::now() + TIMEOUT;
        loop {
            if predicate(&self.hub.index().read()) {
                return Ok(());
            }
            if Instant::now() > deadline {
                anyhow::bail!("index never reached expected state: {what}");
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

impl Drop for TestHub {
    fn drop(&mut self) {
        self.hub.shutdown();
    }
}

/// A blocking client connection to the hub.
pub struct WsClient {
    ws: WebSocket<TcpStream>,
}

impl WsClient {
    pub fn send_text(&mut self, text: &str) -> anyhow::Result<()> {
        self.ws.send(Message::Text(text.into()))?;
        Ok(())
    }

    /// Read the next text frame, skipping protocol pings/pongs.
    pub fn recv_text(&mut self) -> anyhow::Result<String> {
        loop {
            match self.ws.read()? {
                Message::Text(text) => return Ok(text.as_str().to_owned()),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => anyhow::bail!("unexpected frame: {other:?}"),
            }
        }
    }

    pub fn recv_json(&mut self) -> anyhow::Result<Value> {
        Ok(serde_json::from_str(&self.recv_text()?)?)
    }

    /// Assert that no frame arrives within `window`.
    pub fn expect_silence(&mut self, window: Duration) -> anyhow::Result<()> {
        self.set_read_timeout(window)?;
        let result = self.ws.read();
        self.set_read_timeout(TIMEOUT)?;
        match result {
            Ok(message) => anyhow::bail!("unexpected frame: {message:?}"),
            Err(tungstenite::Error::Io(ref e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Close the connection politely.
    pub fn close(mut self) {
        let _ = self.ws.close(None);
        let _ = self.ws.flush();
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> anyhow::Result<()> {
        self.ws.get_ref().set_read_timeout(Some(timeout))?;
        Ok(())
    }
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| (*n).to_owned()).collect()
}
