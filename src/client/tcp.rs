// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TCP client connections

use std::{fmt, net::SocketAddr};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use crate::transport::TransportOptions;

use super::*;

/// Establish a direct connection to a Modbus TCP coupler.
pub async fn connect(socket_addr: SocketAddr) -> Result<Context> {
    connect_slave(socket_addr, Slave::tcp_device()).await
}

/// Connect to a physical, broadcast, or custom Modbus device,
/// probably through a Modbus TCP gateway that is forwarding
/// messages to/from the corresponding slave device.
pub async fn connect_slave(socket_addr: SocketAddr, slave: Slave) -> Result<Context> {
    connect_slave_with_options(socket_addr, slave, TransportOptions::default()).await
}

/// Connect with explicit timeout and retry parameters.
pub async fn connect_slave_with_options(
    socket_addr: SocketAddr,
    slave: Slave,
    options: TransportOptions,
) -> Result<Context> {
    let transport = TcpStream::connect(socket_addr).await?;
    let context = attach_slave_with_options(transport, slave, options);
    Ok(context)
}

/// Attach a new client context to a direct transport connection.
pub fn attach<T>(transport: T) -> Context
where
    T: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug + 'static,
{
    attach_slave(transport, Slave::tcp_device())
}

/// Attach a new client context to a transport connection.
pub fn attach_slave<T>(transport: T, slave: Slave) -> Context
where
    T: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug + 'static,
{
    attach_slave_with_options(transport, slave, TransportOptions::default())
}

/// Attach with explicit timeout and retry parameters.
pub fn attach_slave_with_options<T>(
    transport: T,
    slave: Slave,
    options: TransportOptions,
) -> Context
where
    T: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug + 'static,
{
    let client = crate::service::ip::TcpClient::new(transport, slave, options);
    Context {
        client: Box::new(client),
    }
}
