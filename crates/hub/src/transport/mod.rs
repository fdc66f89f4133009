// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP boundary: accept loop and WebSocket upgrade.
//!
//! The endpoints `/`, `/public`, and `/private` upgrade to WebSocket and
//! hand the socket to the reactor. `/private` requires a non-anonymous
//! identity. Identity comes from a verified bearer token when a JWT key is
//! configured, or from the `JwtUID`/`JwtRole` headers in keyless dev mode.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::{HeaderMap, StatusCode};
use tungstenite::protocol::WebSocketConfig;

use crate::auth::{Auth, TokenVerifier};
use crate::error::HubError;
use crate::reactor::Handle;
use crate::routing::session::{Session, READ_LIMIT};

/// Socket timeout covering the whole HTTP upgrade exchange.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Start the accept loop. Handshakes run inline, bounded by
/// [`HANDSHAKE_TIMEOUT`]; no thread is spawned per connection.
pub fn spawn_listener(
    listener: TcpListener,
    handle: Handle,
    verifier: Arc<TokenVerifier>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for conn in listener.incoming() {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            match conn {
                Ok(stream) => {
                    if let Err(e) = accept(stream, &handle, &verifier) {
                        tracing::debug!(err = %e, "connection rejected");
                    }
                }
                Err(e) => {
                    tracing::warn!(err = %e, "accept failed");
                }
            }
        }
        tracing::debug!("listener stopped");
    })
}

fn frame_config() -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(READ_LIMIT))
        .max_frame_size(Some(READ_LIMIT))
}

fn reject(status: StatusCode) -> ErrorResponse {
    let mut response = ErrorResponse::new(None);
    *response.status_mut() = status;
    response
}

/// Upgrade one connection and register it with the reactor.
fn accept(stream: TcpStream, handle: &Handle, verifier: &TokenVerifier) -> Result<(), HubError> {
    let _ = stream.set_nodelay(true);
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    stream.set_write_timeout(Some(HANDSHAKE_TIMEOUT))?;

    let mut auth = Auth::default();
    let ws = tungstenite::accept_hdr_with_config(
        stream,
        |request: &Request, response: Response| {
            let must_auth = match request.uri().path() {
                "/" | "/public" => false,
                "/private" => true,
                _ => return Err(reject(StatusCode::NOT_FOUND)),
            };
            auth = derive_auth(request.headers(), verifier);
            if must_auth && auth.is_anonymous() {
                return Err(reject(StatusCode::UNAUTHORIZED));
            }
            Ok(response)
        },
        Some(frame_config()),
    )
    .map_err(|e| HubError::Handshake(e.to_string()))?;

    {
        let stream = ws.get_ref();
        stream.set_read_timeout(None)?;
        stream.set_write_timeout(None)?;
        stream.set_nonblocking(true)?;
    }

    if auth.is_anonymous() {
        tracing::debug!("new anonymous connection");
    } else {
        tracing::debug!(uid = %auth.uid, "new authenticated connection");
    }

    let session = Arc::new(Session::new(ws, auth)?);
    // On failure the session (and with it the socket) is dropped here.
    handle.add(session)?;
    Ok(())
}

/// Derive the connection identity from the upgrade request headers.
fn derive_auth(headers: &HeaderMap, verifier: &TokenVerifier) -> Auth {
    if verifier.has_key() {
        let token = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        match token {
            Some(token) => verifier.verify(token).unwrap_or_default(),
            None => Auth::default(),
        }
    } else {
        // Keyless dev mode: trust the headers an upstream gateway attached.
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_owned()
        };
        Auth { uid: header("JwtUID"), role: header("JwtRole") }
    }
}
