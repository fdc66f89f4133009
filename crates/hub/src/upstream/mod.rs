// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upstream record model and the consumers feeding the hub.
//!
//! Records arrive keyed `scope.stream.type` with an arbitrary JSON value.
//! The scope picks the namespace (`public`/`global`, `private`, or a custom
//! prefix); the remaining segments form the topic clients subscribed to.

pub mod nats;
pub mod router;

use bytes::Bytes;

/// One keyed record from the upstream log.
#[derive(Debug, Clone)]
pub struct Record {
    pub key: String,
    pub value: Bytes,
}

/// A record resolved into routing terms.
#[derive(Debug, Clone)]
pub struct Event {
    pub scope: String,
    pub stream: String,
    pub kind: String,
    /// `stream.kind` for non-private scopes, bare `kind` for `private`.
    pub topic: String,
    pub body: Bytes,
}

impl Event {
    /// Split a record key into scope/stream/kind. Keys with fewer than three
    /// segments are malformed; dots past the second segment stay in `kind`.
    pub fn from_record(record: &Record) -> Option<Self> {
        let mut parts = record.key.splitn(3, '.');
        let scope = parts.next()?;
        let stream = parts.next()?;
        let kind = parts.next()?;

        let topic = if scope == "private" {
            kind.to_owned()
        } else {
            format!("{stream}.{kind}")
        };

        Some(Self {
            scope: scope.to_owned(),
            stream: stream.to_owned(),
            kind: kind.to_owned(),
            topic,
            body: record.value.clone(),
        })
    }
}
