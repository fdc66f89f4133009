// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

/// Errors surfaced by the hub library.
///
/// Client-level failures (bad frames, slow sockets) never appear here; they
/// unwind the offending session only. This type covers startup and
/// registration failures that a caller has to act on.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket handshake: {0}")]
    Handshake(String),

    #[error("invalid jwt public key: {0}")]
    JwtKey(String),

    #[error("rlimit: {0}")]
    Rlimit(#[from] nix::errno::Errno),
}
