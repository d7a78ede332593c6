// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus UDP server

use std::{future::Future, io, net::SocketAddr};

use futures_util::{future::FutureExt as _, sink::SinkExt as _, stream::StreamExt as _};
use tokio::net::UdpSocket;
use tokio_util::udp::UdpFramed;

use crate::{
    codec,
    frame::{ip::ResponseAdu, ExceptionCode, Request, Response},
    slave::Slave,
};

use super::{respond, Service};

/// A UDP slave: answers each datagram on the socket it arrived on.
///
/// Datagrams are dispatched strictly one at a time; peers need no
/// bookkeeping because every datagram carries its own return address.
#[derive(Debug)]
pub struct Server {
    socket: UdpSocket,
    slave: Slave,
}

impl Server {
    #[must_use]
    pub fn new(socket: UdpSocket, slave: Slave) -> Self {
        Self { socket, slave }
    }

    pub async fn bind(socket_addr: SocketAddr, slave: Slave) -> io::Result<Self> {
        let socket = UdpSocket::bind(socket_addr).await?;
        Ok(Self::new(socket, slave))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve datagrams until an I/O error occurs.
    pub async fn serve<S>(self, service: S) -> io::Result<()>
    where
        S: Service<Request = Request, Response = Response, Exception = ExceptionCode>,
    {
        let mut framed = UdpFramed::new(self.socket, codec::ip::ServerCodec::default());
        loop {
            let Some(next) = framed.next().await else {
                return Ok(());
            };
            let ((hdr, pdu_data), peer) = match next {
                Ok(datagram) => datagram,
                Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                    // A malformed datagram must not kill the listener.
                    log::warn!("Discarding malformed datagram: {err}");
                    continue;
                }
                Err(err) => return Err(err),
            };

            let Some(pdu) = respond(&service, self.slave, hdr.unit_id, pdu_data).await else {
                continue;
            };

            framed.send((ResponseAdu { hdr, pdu }, peer)).await?;
        }
    }

    /// Serve until the given shutdown signal resolves.
    pub async fn serve_until<S, Sd>(self, service: S, shutdown_signal: Sd) -> io::Result<()>
    where
        S: Service<Request = Request, Response = Response, Exception = ExceptionCode>,
        Sd: Future<Output = ()> + Send + Unpin,
    {
        let mut shutdown_signal = shutdown_signal.fuse();
        tokio::select! {
            res = self.serve(service) => res,
            () = &mut shutdown_signal => {
                log::debug!("Shutdown signal received");
                Ok(())
            }
        }
    }
}
