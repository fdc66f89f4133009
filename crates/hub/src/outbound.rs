// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The shared outbound queue and the writer pool draining it.
//!
//! One bounded queue serves every producer (reactor responses, event
//! broadcasts, heartbeats). Producers never block: a full queue sheds the
//! frame and logs. A slow socket degrades its own delivery, not the process.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tungstenite::Utf8Bytes;

use crate::reactor::Handle;
use crate::routing::session::Session;

/// Capacity of the shared outbound queue.
pub const QUEUE_CAPACITY: usize = 256;

/// Default writer pool size.
pub const DEFAULT_WRITERS: usize = 5;

#[derive(Clone)]
pub enum Payload {
    Text(Utf8Bytes),
    Ping,
}

/// One queued frame, consumed exactly once by a writer.
pub struct OutboundItem {
    pub session: Arc<Session>,
    pub payload: Payload,
}

/// Producer handle for the outbound queue.
#[derive(Clone)]
pub struct OutboundQueue {
    tx: Sender<OutboundItem>,
}

pub fn bounded(capacity: usize) -> (OutboundQueue, Receiver<OutboundItem>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (OutboundQueue { tx }, rx)
}

impl OutboundQueue {
    /// Best-effort enqueue. Safe to call while holding the index write lock.
    pub fn push(&self, session: &Arc<Session>, payload: Payload) {
        match self.tx.try_send(OutboundItem { session: Arc::clone(session), payload }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("outbound queue full, dropping frame");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("outbound queue closed, dropping frame");
            }
        }
    }
}

/// Start `count` writer threads. Each drains the queue, writes with the
/// per-frame deadline, and removes the session on any write failure.
pub fn spawn_writers(count: usize, rx: Receiver<OutboundItem>, handle: Handle) {
    for id in 0..count {
        let rx = rx.clone();
        let handle = handle.clone();
        thread::spawn(move || {
            for item in rx.iter() {
                let result = match item.payload {
                    Payload::Text(frame) => item.session.write_frame(frame),
                    Payload::Ping => item.session.write_ping(),
                };
                if let Err(e) = result {
                    tracing::debug!(writer = id, err = %e, "write failed, removing session");
                    handle.remove(&item.session);
                }
            }
            tracing::debug!(writer = id, "writer stopped");
        });
    }
}

#[cfg(test)]
#[path = "outbound_tests.rs"]
mod tests;
