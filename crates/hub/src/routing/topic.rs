// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::Arc;

use mio::Token;
use tungstenite::Utf8Bytes;

use crate::outbound::{OutboundQueue, Payload};
use crate::protocol;
use crate::routing::session::Session;
use crate::upstream::Event;

/// A named set of subscriber sessions, keyed by reactor token.
///
/// Topics never outlive their membership: the index removes a topic from its
/// parent map in the same critical section that drops it to zero.
#[derive(Default)]
pub struct Topic {
    clients: HashMap<Token, Arc<Session>>,
}

impl Topic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true iff the session was newly added.
    pub fn subscribe(&mut self, session: &Arc<Session>) -> bool {
        self.clients.insert(session.token(), Arc::clone(session)).is_none()
    }

    /// Returns true iff the session was present.
    pub fn unsubscribe(&mut self, session: &Arc<Session>) -> bool {
        self.clients.remove(&session.token()).is_some()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Wrap the event body as `{"<topic>": <body>}` and enqueue one frame per
    /// member. A non-JSON body drops the event (logged by the codec).
    pub fn broadcast(&self, event: &Event, queue: &OutboundQueue) {
        let Some(frame) = protocol::pack_event(&event.topic, &event.body) else {
            return;
        };
        self.broadcast_raw(frame, queue);
    }

    /// Enqueue the given frame to every member. Enqueueing never blocks; a
    /// full queue sheds the frame for that member.
    pub fn broadcast_raw(&self, frame: Utf8Bytes, queue: &OutboundQueue) {
        for session in self.clients.values() {
            queue.push(session, Payload::Text(frame.clone()));
        }
    }
}

#[cfg(test)]
#[path = "topic_tests.rs"]
mod tests;
