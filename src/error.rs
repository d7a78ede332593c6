// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Library error type

use std::io;

use thiserror::Error;

use crate::frame::SlaveException;

/// A specialized [`Result`](std::result::Result) type for Modbus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Modbus errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The caller passed an out-of-range count or an incoherent payload.
    ///
    /// Raised synchronously before any byte is written and never retried.
    #[error(transparent)]
    Argument(#[from] ArgumentError),

    /// The received bytes do not form a valid frame (short frame, bad
    /// checksum, unknown function code).
    #[error("invalid frame: {0}")]
    Frame(#[source] io::Error),

    /// Reading or writing the byte stream failed, timed out or the
    /// transport was closed.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The slave answered with a Modbus exception.
    #[error(transparent)]
    Exception(#[from] SlaveException),

    /// An IP response carried a transaction id that neither matches the
    /// request nor qualifies as stale.
    #[error("transaction id mismatch: expected {expected}, actual {actual}")]
    TransactionMismatch { expected: u16, actual: u16 },
}

impl Error {
    /// Whether the master engine may retry the whole transaction.
    ///
    /// Arguments are rejected before the wire is touched and slave
    /// exceptions are authoritative answers; everything else is worth
    /// another attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Argument(_) | Self::Exception(_) => false,
            Self::Frame(_) | Self::Io(_) | Self::TransactionMismatch { .. } => true,
        }
    }

    /// Classify a transport-level failure: decoders signal malformed
    /// frames with [`io::ErrorKind::InvalidData`], everything else is
    /// plain I/O.
    pub(crate) fn from_transport(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::InvalidData {
            Self::Frame(err)
        } else {
            Self::Io(err)
        }
    }
}

/// An invalid request argument, rejected before transmission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid request argument: {message}")]
pub struct ArgumentError {
    pub message: String,
}

impl ArgumentError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
