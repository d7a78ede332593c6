// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Master-side supervisor: reconnection, periodic polling, write streams

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use futures_core::Stream;
use futures_util::StreamExt as _;
use tokio::{
    sync::mpsc,
    time::{interval, MissedTickBehavior},
};

use crate::{
    client::{Context, Diagnostics as _, Reader as _, Writer as _},
    error::{Error, Result},
    frame::{Address, Coil, Quantity, Word},
};

use super::PollStream;

const POLL_CHANNEL_CAPACITY: usize = 16;

/// Default pace of the connection monitor.
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Trait for (re-)creating sessions on demand.
///
/// The supervisor calls this whenever it has no usable session, e.g.
/// after a poll failed or on first subscription.
pub trait NewSession: Send + Sync {
    /// Create a new session.
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<Context>> + Send>>;
}

impl<F, Fut> NewSession for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Context>> + Send + 'static,
{
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<Context>> + Send>> {
        Box::pin((self)())
    }
}

/// A connection state transition observed by the monitor.
#[derive(Debug)]
pub enum ConnectionEvent {
    Connected,
    Disconnected(Error),
}

/// Owns a connector and hands out restartable poll streams.
///
/// Every stream runs on its own transport: a failed poll tears the
/// session down and the next tick reconnects, so errors are emitted
/// but never terminate a stream.
pub struct Supervisor {
    connector: Arc<dyn NewSession>,
    check_interval: Duration,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("check_interval", &self.check_interval)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    pub fn new(connector: impl NewSession + 'static) -> Self {
        Self {
            connector: Arc::new(connector),
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }

    /// Change the pace of the connection monitor (default ~1 s).
    #[must_use]
    pub fn with_check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    /// Emit a [`ConnectionEvent`] on every state transition.
    ///
    /// Connectivity is verified every check interval by establishing a
    /// probe session, which is closed again immediately.
    #[must_use]
    pub fn connection_events(&self) -> PollStream<ConnectionEvent> {
        let connector = Arc::clone(&self.connector);
        let check_interval = self.check_interval;
        let (tx, rx) = mpsc::channel(POLL_CHANNEL_CAPACITY);
        let task = tokio::spawn(async move {
            let mut ticker = interval(check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut connected: Option<bool> = None;
            loop {
                ticker.tick().await;
                match connector.connect().await {
                    Ok(probe) => {
                        drop(probe);
                        if connected != Some(true)
                            && tx.send(ConnectionEvent::Connected).await.is_err()
                        {
                            return;
                        }
                        connected = Some(true);
                    }
                    Err(err) => {
                        if connected != Some(false)
                            && tx.send(ConnectionEvent::Disconnected(err)).await.is_err()
                        {
                            return;
                        }
                        connected = Some(false);
                    }
                }
            }
        });
        PollStream::new(rx, task)
    }

    /// Poll coils every `poll_interval`.
    #[must_use]
    pub fn read_coils(
        &self,
        addr: Address,
        cnt: Quantity,
        poll_interval: Duration,
    ) -> PollStream<Result<Vec<Coil>>> {
        self.poll(poll_interval, move |mut session| async move {
            let result = session.read_coils(addr, cnt).await;
            (session, result)
        })
    }

    /// Poll discrete inputs every `poll_interval`.
    #[must_use]
    pub fn read_discrete_inputs(
        &self,
        addr: Address,
        cnt: Quantity,
        poll_interval: Duration,
    ) -> PollStream<Result<Vec<Coil>>> {
        self.poll(poll_interval, move |mut session| async move {
            let result = session.read_discrete_inputs(addr, cnt).await;
            (session, result)
        })
    }

    /// Poll holding registers every `poll_interval`.
    #[must_use]
    pub fn read_holding_registers(
        &self,
        addr: Address,
        cnt: Quantity,
        poll_interval: Duration,
    ) -> PollStream<Result<Vec<Word>>> {
        self.poll(poll_interval, move |mut session| async move {
            let result = session.read_holding_registers(addr, cnt).await;
            (session, result)
        })
    }

    /// Poll input registers every `poll_interval`.
    #[must_use]
    pub fn read_input_registers(
        &self,
        addr: Address,
        cnt: Quantity,
        poll_interval: Duration,
    ) -> PollStream<Result<Vec<Word>>> {
        self.poll(poll_interval, move |mut session| async move {
            let result = session.read_input_registers(addr, cnt).await;
            (session, result)
        })
    }

    /// Loop one word through the slave every `poll_interval`.
    #[must_use]
    pub fn return_query_data(
        &self,
        data: Word,
        poll_interval: Duration,
    ) -> PollStream<Result<bool>> {
        self.poll(poll_interval, move |mut session| async move {
            let result = session.return_query_data(data).await;
            (session, result)
        })
    }

    /// Write every payload of `payloads` to the holding registers at
    /// `addr`, emitting one result per write.
    #[must_use]
    pub fn write_registers<S>(&self, addr: Address, payloads: S) -> PollStream<Result<()>>
    where
        S: Stream<Item = Vec<Word>> + Send + Unpin + 'static,
    {
        self.write(payloads, move |mut session, words: Vec<Word>| async move {
            let result = session.write_multiple_registers(addr, &words).await;
            (session, result)
        })
    }

    /// Write every payload of `payloads` to the coils at `addr`,
    /// emitting one result per write.
    #[must_use]
    pub fn write_coils<S>(&self, addr: Address, payloads: S) -> PollStream<Result<()>>
    where
        S: Stream<Item = Vec<Coil>> + Send + Unpin + 'static,
    {
        self.write(payloads, move |mut session, coils: Vec<Coil>| async move {
            let result = session.write_multiple_coils(addr, &coils).await;
            (session, result)
        })
    }

    fn poll<T, F, Fut>(&self, poll_interval: Duration, mut op: F) -> PollStream<Result<T>>
    where
        T: Send + 'static,
        F: FnMut(Context) -> Fut + Send + 'static,
        Fut: Future<Output = (Context, Result<T>)> + Send,
    {
        let connector = Arc::clone(&self.connector);
        let (tx, rx) = mpsc::channel(POLL_CHANNEL_CAPACITY);
        let task = tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut session: Option<Context> = None;
            loop {
                ticker.tick().await;
                let result = match take_or_connect(&connector, session.take()).await {
                    Ok(ctx) => {
                        let (ctx, result) = op(ctx).await;
                        // A transport that just failed may be in an
                        // indeterminate state: discard it instead of
                        // reusing it.
                        if result.is_ok() {
                            session = Some(ctx);
                        }
                        result
                    }
                    Err(err) => Err(err),
                };
                if tx.send(result).await.is_err() {
                    return;
                }
            }
        });
        PollStream::new(rx, task)
    }

    fn write<P, F, Fut>(&self, mut payloads: P, mut op: F) -> PollStream<Result<()>>
    where
        P: Stream + Send + Unpin + 'static,
        P::Item: Send + 'static,
        F: FnMut(Context, P::Item) -> Fut + Send + 'static,
        Fut: Future<Output = (Context, Result<()>)> + Send,
    {
        let connector = Arc::clone(&self.connector);
        let (tx, rx) = mpsc::channel(POLL_CHANNEL_CAPACITY);
        let task = tokio::spawn(async move {
            let mut session: Option<Context> = None;
            while let Some(payload) = payloads.next().await {
                let result = match take_or_connect(&connector, session.take()).await {
                    Ok(ctx) => {
                        let (ctx, result) = op(ctx, payload).await;
                        if result.is_ok() {
                            session = Some(ctx);
                        }
                        result
                    }
                    Err(err) => Err(err),
                };
                if tx.send(result).await.is_err() {
                    return;
                }
            }
        });
        PollStream::new(rx, task)
    }
}

async fn take_or_connect(
    connector: &Arc<dyn NewSession>,
    session: Option<Context>,
) -> Result<Context> {
    match session {
        Some(session) => Ok(session),
        None => {
            let session = connector.connect().await?;
            log::debug!("Session (re-)established");
            Ok(session)
        }
    }
}
