// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! ASCII client connections

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::transport::TransportOptions;

use super::*;

/// Connect to no particular Modbus slave device for sending
/// broadcast messages.
pub fn attach<T>(transport: T) -> Context
where
    T: AsyncRead + AsyncWrite + fmt::Debug + Unpin + Send + 'static,
{
    attach_slave(transport, Slave::broadcast())
}

/// Connect to any kind of Modbus slave device.
pub fn attach_slave<T>(transport: T, slave: Slave) -> Context
where
    T: AsyncRead + AsyncWrite + fmt::Debug + Unpin + Send + 'static,
{
    attach_slave_with_options(transport, slave, TransportOptions::default())
}

/// Connect with explicit timeout and retry parameters.
pub fn attach_slave_with_options<T>(
    transport: T,
    slave: Slave,
    options: TransportOptions,
) -> Context
where
    T: AsyncRead + AsyncWrite + fmt::Debug + Unpin + Send + 'static,
{
    let client = crate::service::serial::AsciiClient::new(transport, slave, options);
    Context {
        client: Box::new(client),
    }
}
