// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reactive layer: restartable poll streams over masters and slaves
//!
//! Streams are fed by background tasks and never terminate on protocol
//! errors; dropping a stream aborts its tasks and closes the owned
//! transports.

pub mod client;
pub mod server;

pub use self::{
    client::{ConnectionEvent, NewSession, Supervisor},
    server::{ServerHandle, StoreObserver},
};

use std::{
    pin::Pin,
    task::{Context as TaskContext, Poll},
};

use futures_core::Stream;
use tokio::{sync::mpsc, task::JoinHandle};

/// A stream of emissions produced by a background task.
///
/// Dropping the stream cancels the task promptly; an in-flight
/// transaction is abandoned together with its transport.
#[derive(Debug)]
pub struct PollStream<T> {
    rx: mpsc::Receiver<T>,
    task: JoinHandle<()>,
}

impl<T> PollStream<T> {
    pub(crate) fn new(rx: mpsc::Receiver<T>, task: JoinHandle<()>) -> Self {
        Self { rx, task }
    }

    /// Receive the next emission.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

impl<T> Stream for PollStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<T> Drop for PollStream<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
