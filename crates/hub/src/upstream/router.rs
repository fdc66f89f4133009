// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event router: consumes upstream records and fans them out.

use std::thread::JoinHandle;

use crossbeam_channel::Receiver;

use crate::reactor::Handle;
use crate::upstream::{Event, Record};

/// Start the router thread. One record at a time: classify the key, take the
/// index write lock, broadcast to the resolved topic. Exits when every record
/// sender is gone.
pub fn spawn(rx: Receiver<Record>, handle: Handle) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for record in rx.iter() {
            let Some(event) = Event::from_record(&record) else {
                tracing::warn!(key = %record.key, "dropping record with malformed key");
                continue;
            };
            handle.index().write().route(&event, handle.queue());
        }
        tracing::debug!("event router stopped");
    })
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
