// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! `parley sync`: connect, replay the outbox, fetch what was missed.

use std::path::Path;
use std::time::Duration;

use pl_core::{MessageId, StoreEvent};
use tokio::sync::{broadcast, mpsc};

use crate::client::ChatClient;
use crate::display::{format_message_line, format_sync_summary};
use crate::error::{Error, Result};
use crate::sync::{websocket_factory, SyncEngine, SupervisorEvent, TransportFactory};

use super::open_client;

pub fn run(data_dir: &Path, follow: bool, timeout: Option<u64>) -> Result<()> {
    let client = open_client(data_dir)?;
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(run_impl(
        &client,
        websocket_factory(),
        follow,
        timeout.map(Duration::from_secs),
    ))
}

pub(crate) async fn run_impl(
    client: &ChatClient,
    factory: TransportFactory,
    follow: bool,
    timeout: Option<Duration>,
) -> Result<()> {
    let remote = client.config().remote.as_ref().ok_or(Error::NoRemote)?;
    let timeout = timeout.unwrap_or_else(|| remote.sync_timeout());
    let engine = client.start_sync_with(factory)?;

    let result = if follow {
        follow_until_interrupted(client, &engine).await
    } else {
        engine.wait_synced(timeout).await.map(|status| {
            println!("{}", format_sync_summary(engine.supervisor().state(), &status));
        })
    };

    client.shutdown().await;
    result
}

/// Print connection changes and other participants' messages until Ctrl-C
/// or until the supervisor gives up.
async fn follow_until_interrupted(client: &ChatClient, engine: &SyncEngine) -> Result<()> {
    let (tx, mut appended) = mpsc::unbounded_channel::<MessageId>();
    let subscription = client.store().subscribe(move |event| {
        if let StoreEvent::MessageAppended { message_id, .. } = event {
            let _ = tx.send(message_id.clone());
        }
    });
    let mut events = engine.supervisor().subscribe();
    let own_sender = client.config().identity.sender_id.as_str();

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    let result = loop {
        tokio::select! {
            _ = &mut interrupted => break Ok(()),
            Some(id) = appended.recv() => {
                match client.store().get(&id) {
                    Ok(msg) if msg.sender_id != own_sender => {
                        println!("{}  {}", msg.conversation_id, format_message_line(&msg));
                    }
                    Ok(_) => {}
                    Err(e) => break Err(e.into()),
                }
            }
            event = events.recv() => match event {
                Ok(SupervisorEvent::Connected(handle)) => {
                    eprintln!("connected (session {})", handle.session_id());
                }
                Ok(SupervisorEvent::Degraded { .. }) => eprintln!("relay not responding"),
                Ok(SupervisorEvent::Disconnected { reason, retry_in }) => {
                    eprintln!("disconnected: {reason} (retrying in {}ms)", retry_in.as_millis());
                }
                Ok(SupervisorEvent::GaveUp { attempts }) => {
                    break Err(Error::Timeout(format!("gave up after {attempts} attempts")));
                }
                Ok(SupervisorEvent::Stopped) | Err(broadcast::error::RecvError::Closed) => {
                    break Ok(());
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
        }
    };

    client.store().unsubscribe(subscription);
    result
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
