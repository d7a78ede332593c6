// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! UDP client connections

use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::transport::TransportOptions;

use super::*;

/// Establish a direct connection to a Modbus UDP device.
pub async fn connect(socket_addr: SocketAddr) -> Result<Context> {
    connect_slave(socket_addr, Slave::tcp_device()).await
}

/// Connect to a physical, broadcast, or custom Modbus device.
pub async fn connect_slave(socket_addr: SocketAddr, slave: Slave) -> Result<Context> {
    connect_slave_with_options(socket_addr, slave, TransportOptions::default()).await
}

/// Connect with explicit timeout and retry parameters.
pub async fn connect_slave_with_options(
    socket_addr: SocketAddr,
    slave: Slave,
    options: TransportOptions,
) -> Result<Context> {
    let bind_addr: SocketAddr = if socket_addr.is_ipv4() {
        (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    // Restrict incoming datagrams to the addressed peer.
    socket.connect(socket_addr).await?;
    Ok(attach_slave_with_options(
        socket,
        socket_addr,
        slave,
        options,
    ))
}

/// Attach a new client context to an already bound socket.
pub fn attach_slave_with_options(
    socket: UdpSocket,
    peer: SocketAddr,
    slave: Slave,
    options: TransportOptions,
) -> Context {
    let client = crate::service::ip::UdpClient::new(socket, peer, slave, options);
    Context {
        client: Box::new(client),
    }
}
