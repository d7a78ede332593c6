// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Timeout and retry parameters of a transport

use std::{future::Future, io, time::Duration};

/// Timeout and retry behavior of a single transport.
///
/// One instance belongs to one master session; slaves only use the
/// response deadline of their listeners implicitly through the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Deadline for receiving a complete response frame.
    ///
    /// `None` waits forever.
    pub response_timeout: Option<Duration>,

    /// How often a failed transaction is re-issued before giving up.
    pub retries: usize,

    /// Pause between two attempts of the same transaction.
    pub wait_to_retry: Duration,

    /// An IP response whose transaction id is *smaller* than the
    /// request's by less than this distance is considered a stale reply
    /// of an earlier request: the read is repeated without re-issuing
    /// the write.
    pub stale_response_threshold: u16,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            response_timeout: Some(Duration::from_secs(5)),
            retries: 3,
            wait_to_retry: Duration::from_millis(250),
            stale_response_threshold: 3,
        }
    }
}

/// Await `task` under the configured response deadline.
///
/// The timeout is disabled by passing `None`.
pub(crate) async fn with_deadline<T>(
    deadline: Option<Duration>,
    task: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    if let Some(duration) = deadline {
        tokio::time::timeout(duration, task)
            .await
            .unwrap_or_else(|elapsed| Err(io::Error::new(io::ErrorKind::TimedOut, elapsed)))
    } else {
        task.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_elapsed() {
        let err = with_deadline(Some(Duration::from_millis(5)), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn no_deadline() {
        let value = with_deadline(None, async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
    }
}
