// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! NATS record source.
//!
//! Subscribes to `{prefix}.>` and forwards each message as a record: the
//! subject minus the prefix is the key, the payload the value. Runs on one
//! dedicated thread with a current-thread runtime and reconnects with
//! exponential backoff.

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use futures_util::StreamExt;

use crate::upstream::Record;

/// Configuration for the NATS record source.
pub struct SourceConfig {
    pub url: String,
    pub prefix: String,
}

/// Spawn the source thread. Exits when the hub drops the record channel.
pub fn spawn(config: SourceConfig, tx: Sender<Record>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!(err = %e, "failed to build upstream runtime");
                return;
            }
        };
        runtime.block_on(run(config, tx));
    })
}

async fn run(config: SourceConfig, tx: Sender<Record>) {
    let mut backoff = Duration::from_millis(500);
    let max_backoff = Duration::from_secs(15);

    loop {
        match consume(&config, &tx).await {
            Ok(()) => backoff = Duration::from_millis(500),
            Err(ConsumeError::ChannelClosed) => break,
            Err(ConsumeError::Nats(e)) => {
                tracing::debug!(err = %e, "upstream source error");
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
    }

    tracing::debug!("upstream source stopped");
}

enum ConsumeError {
    ChannelClosed,
    Nats(String),
}

async fn consume(config: &SourceConfig, tx: &Sender<Record>) -> Result<(), ConsumeError> {
    let client = async_nats::connect(config.url.as_str())
        .await
        .map_err(|e| ConsumeError::Nats(e.to_string()))?;
    tracing::info!(url = %config.url, prefix = %config.prefix, "upstream source connected");

    let mut subscriber = client
        .subscribe(format!("{}.>", config.prefix))
        .await
        .map_err(|e| ConsumeError::Nats(e.to_string()))?;

    while let Some(message) = subscriber.next().await {
        let subject = message.subject.as_str();
        let Some(key) =
            subject.strip_prefix(config.prefix.as_str()).and_then(|s| s.strip_prefix('.'))
        else {
            continue;
        };
        let record = Record { key: key.to_owned(), value: message.payload };
        if tx.send(record).is_err() {
            return Err(ConsumeError::ChannelClosed);
        }
    }

    Err(ConsumeError::Nats("subscription ended".to_owned()))
}
