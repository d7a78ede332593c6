// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Slave-side supervisor: lifecycle-managed listeners and store observers

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    io,
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};

use crate::{
    frame::{Address, Coil, Quantity, Word},
    server::{self, StoreService},
    slave::Slave,
    store::DataStore,
};

use super::PollStream;

const OBSERVE_CHANNEL_CAPACITY: usize = 16;

/// Cancellation guard of a started slave listener.
///
/// Dropping the handle (or calling [`stop`](Self::stop)) aborts the
/// listener and disconnects all masters.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The bound endpoint, useful with port 0.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shut the listener down.
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start a TCP slave answering from `store`.
pub fn start_tcp_server(
    socket_addr: SocketAddr,
    slave: Slave,
    store: Arc<DataStore>,
) -> io::Result<ServerHandle> {
    let server = server::tcp::Server::bind(socket_addr, slave)?;
    let local_addr = server.local_addr()?;
    let task = tokio::spawn(async move {
        if let Err(err) = server.serve(StoreService::new(store)).await {
            log::error!("TCP server failed: {err}");
        }
    });
    Ok(ServerHandle { local_addr, task })
}

/// Start a UDP slave answering from `store`.
pub async fn start_udp_server(
    socket_addr: SocketAddr,
    slave: Slave,
    store: Arc<DataStore>,
) -> io::Result<ServerHandle> {
    let server = server::udp::Server::bind(socket_addr, slave).await?;
    let local_addr = server.local_addr()?;
    let task = tokio::spawn(async move {
        if let Err(err) = server.serve(StoreService::new(store)).await {
            log::error!("UDP server failed: {err}");
        }
    });
    Ok(ServerHandle { local_addr, task })
}

/// Periodic, distinct-until-changed snapshots of a data store.
///
/// Each observer polls its window every `poll_interval` and emits only
/// when a cheap fingerprint of the window differs from the previous
/// emission. The first snapshot is always emitted.
#[derive(Debug, Clone)]
pub struct StoreObserver {
    store: Arc<DataStore>,
}

impl StoreObserver {
    #[must_use]
    pub fn new(store: Arc<DataStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn observe_coils(
        &self,
        start: Address,
        count: Quantity,
        poll_interval: Duration,
    ) -> PollStream<Vec<Coil>> {
        let store = Arc::clone(&self.store);
        observe(poll_interval, move || {
            store
                .read_coils(start, count.into())
                .map_err(|err| log::error!("Observed window is invalid: {err}"))
        })
    }

    #[must_use]
    pub fn observe_discrete_inputs(
        &self,
        start: Address,
        count: Quantity,
        poll_interval: Duration,
    ) -> PollStream<Vec<Coil>> {
        let store = Arc::clone(&self.store);
        observe(poll_interval, move || {
            store
                .read_discrete_inputs(start, count.into())
                .map_err(|err| log::error!("Observed window is invalid: {err}"))
        })
    }

    #[must_use]
    pub fn observe_holding_registers(
        &self,
        start: Address,
        count: Quantity,
        poll_interval: Duration,
    ) -> PollStream<Vec<Word>> {
        let store = Arc::clone(&self.store);
        observe(poll_interval, move || {
            store
                .read_holding_registers(start, count.into())
                .map_err(|err| log::error!("Observed window is invalid: {err}"))
        })
    }

    #[must_use]
    pub fn observe_input_registers(
        &self,
        start: Address,
        count: Quantity,
        poll_interval: Duration,
    ) -> PollStream<Vec<Word>> {
        let store = Arc::clone(&self.store);
        observe(poll_interval, move || {
            store
                .read_input_registers(start, count.into())
                .map_err(|err| log::error!("Observed window is invalid: {err}"))
        })
    }
}

fn observe<T, F>(poll_interval: Duration, mut snapshot: F) -> PollStream<T>
where
    T: Hash + Send + 'static,
    F: FnMut() -> Result<T, ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(OBSERVE_CHANNEL_CAPACITY);
    let task = tokio::spawn(async move {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_fingerprint: Option<u64> = None;
        loop {
            ticker.tick().await;
            // An invalid window is a subscription bug, not a runtime
            // condition: stop observing.
            let Ok(values) = snapshot() else {
                return;
            };
            let current = fingerprint(&values);
            if last_fingerprint == Some(current) {
                continue;
            }
            last_fingerprint = Some(current);
            if tx.send(values).await.is_err() {
                return;
            }
        }
    });
    PollStream::new(rx, task)
}

fn fingerprint<T: Hash>(values: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    values.hash(&mut hasher);
    hasher.finish()
}
