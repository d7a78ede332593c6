// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus MBAP master engines for TCP and UDP

use std::{
    fmt,
    io::{Error as IoError, ErrorKind},
    net::SocketAddr,
};

use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::UdpSocket,
};
use tokio_util::{codec::Framed, udp::UdpFramed};

use crate::{
    codec,
    error::{Error, Result},
    frame::{ip::*, Request, Response, SlaveException},
    slave::*,
    transport::{with_deadline, TransportOptions},
};

/// Transaction ids are allocated monotonically per session from
/// `1..=65535`; `0` is never issued, so the counter starts below the
/// first id.
const INITIAL_TRANSACTION_ID: TransactionId = 0;

fn next_transaction_id(last: &mut TransactionId) -> TransactionId {
    *last = if *last == TransactionId::MAX { 1 } else { *last + 1 };
    *last
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderCheck {
    Matching,
    /// A late reply of an earlier request: keep reading, do not
    /// re-issue the write.
    Stale,
    Mismatch,
}

fn check_response_header(req_hdr: Header, rsp_hdr: Header, stale_threshold: u16) -> HeaderCheck {
    if rsp_hdr.transaction_id == req_hdr.transaction_id {
        if rsp_hdr.unit_id == req_hdr.unit_id {
            HeaderCheck::Matching
        } else {
            HeaderCheck::Mismatch
        }
    } else if rsp_hdr.transaction_id < req_hdr.transaction_id
        && req_hdr.transaction_id - rsp_hdr.transaction_id < stale_threshold
    {
        HeaderCheck::Stale
    } else {
        HeaderCheck::Mismatch
    }
}

/// Modbus TCP client
#[derive(Debug)]
pub(crate) struct TcpClient<T> {
    framed: Framed<T, codec::ip::ClientCodec>,
    unit_id: UnitId,
    last_transaction_id: TransactionId,
    options: TransportOptions,
}

impl<T> TcpClient<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(transport: T, slave: Slave, options: TransportOptions) -> Self {
        let framed = Framed::new(transport, codec::ip::ClientCodec::default());
        let unit_id: UnitId = slave.into();
        Self {
            framed,
            unit_id,
            last_transaction_id: INITIAL_TRANSACTION_ID,
            options,
        }
    }

    pub(crate) async fn call(&mut self, req: Request) -> Result<Response> {
        log::debug!("Call {req:?}");
        req.validate()?;

        let mut attempts_left = self.options.retries;
        loop {
            match self.transaction(&req).await {
                Err(err) if err.is_retryable() && attempts_left > 0 => {
                    attempts_left -= 1;
                    log::warn!("Transaction failed: {err} ({attempts_left} attempt(s) left)");
                    tokio::time::sleep(self.options.wait_to_retry).await;
                }
                res => return res,
            }
        }
    }

    async fn transaction(&mut self, req: &Request) -> Result<Response> {
        let req_hdr = Header {
            transaction_id: next_transaction_id(&mut self.last_transaction_id),
            unit_id: self.unit_id,
        };
        let req_adu = RequestAdu {
            hdr: req_hdr,
            pdu: req.clone().into(),
        };

        self.framed.read_buffer_mut().clear();

        self.framed
            .send(req_adu)
            .await
            .map_err(Error::from_transport)?;

        loop {
            let deadline = self.options.response_timeout;
            let res_adu = with_deadline(deadline, async {
                self.framed
                    .next()
                    .await
                    .unwrap_or_else(|| Err(IoError::from(ErrorKind::BrokenPipe)))
            })
            .await
            .map_err(Error::from_transport)?;

            match check_response_header(req_hdr, res_adu.hdr, self.options.stale_response_threshold)
            {
                HeaderCheck::Matching => {
                    return match res_adu.pdu.0 {
                        Ok(rsp) => Ok(rsp),
                        Err(ex) => Err(SlaveException::new(req_hdr.unit_id, ex).into()),
                    };
                }
                HeaderCheck::Stale => {
                    log::debug!(
                        "Ignoring stale response {} while waiting for {}",
                        res_adu.hdr.transaction_id,
                        req_hdr.transaction_id
                    );
                }
                HeaderCheck::Mismatch => {
                    return Err(Error::TransactionMismatch {
                        expected: req_hdr.transaction_id,
                        actual: res_adu.hdr.transaction_id,
                    });
                }
            }
        }
    }
}

impl<T> SlaveContext for TcpClient<T> {
    fn set_slave(&mut self, slave: Slave) {
        self.unit_id = slave.into();
    }
}

#[async_trait::async_trait]
impl<T> crate::client::Client for TcpClient<T>
where
    T: fmt::Debug + AsyncRead + AsyncWrite + Send + Unpin,
{
    async fn call(&mut self, req: Request) -> Result<Response> {
        TcpClient::call(self, req).await
    }
}

/// Modbus UDP client
///
/// Datagrams already frame themselves, so there is no input buffer to
/// discard between attempts.
#[derive(Debug)]
pub(crate) struct UdpClient {
    framed: UdpFramed<codec::ip::ClientCodec>,
    peer: SocketAddr,
    unit_id: UnitId,
    last_transaction_id: TransactionId,
    options: TransportOptions,
}

impl UdpClient {
    pub(crate) fn new(
        socket: UdpSocket,
        peer: SocketAddr,
        slave: Slave,
        options: TransportOptions,
    ) -> Self {
        let framed = UdpFramed::new(socket, codec::ip::ClientCodec::default());
        let unit_id: UnitId = slave.into();
        Self {
            framed,
            peer,
            unit_id,
            last_transaction_id: INITIAL_TRANSACTION_ID,
            options,
        }
    }

    pub(crate) async fn call(&mut self, req: Request) -> Result<Response> {
        log::debug!("Call {req:?}");
        req.validate()?;

        let mut attempts_left = self.options.retries;
        loop {
            match self.transaction(&req).await {
                Err(err) if err.is_retryable() && attempts_left > 0 => {
                    attempts_left -= 1;
                    log::warn!("Transaction failed: {err} ({attempts_left} attempt(s) left)");
                    tokio::time::sleep(self.options.wait_to_retry).await;
                }
                res => return res,
            }
        }
    }

    async fn transaction(&mut self, req: &Request) -> Result<Response> {
        let req_hdr = Header {
            transaction_id: next_transaction_id(&mut self.last_transaction_id),
            unit_id: self.unit_id,
        };
        let req_adu = RequestAdu {
            hdr: req_hdr,
            pdu: req.clone().into(),
        };

        self.framed
            .send((req_adu, self.peer))
            .await
            .map_err(Error::from_transport)?;

        loop {
            let deadline = self.options.response_timeout;
            let peer = self.peer;
            let res_adu = with_deadline(deadline, async {
                loop {
                    let (res_adu, from) = self
                        .framed
                        .next()
                        .await
                        .unwrap_or_else(|| Err(IoError::from(ErrorKind::BrokenPipe)))?;
                    if from == peer {
                        return Ok(res_adu);
                    }
                    log::debug!("Ignoring datagram from unrelated peer {from}");
                }
            })
            .await
            .map_err(Error::from_transport)?;

            match check_response_header(req_hdr, res_adu.hdr, self.options.stale_response_threshold)
            {
                HeaderCheck::Matching => {
                    return match res_adu.pdu.0 {
                        Ok(rsp) => Ok(rsp),
                        Err(ex) => Err(SlaveException::new(req_hdr.unit_id, ex).into()),
                    };
                }
                HeaderCheck::Stale => {
                    log::debug!(
                        "Ignoring stale response {} while waiting for {}",
                        res_adu.hdr.transaction_id,
                        req_hdr.transaction_id
                    );
                }
                HeaderCheck::Mismatch => {
                    return Err(Error::TransactionMismatch {
                        expected: req_hdr.transaction_id,
                        actual: res_adu.hdr.transaction_id,
                    });
                }
            }
        }
    }
}

impl SlaveContext for UdpClient {
    fn set_slave(&mut self, slave: Slave) {
        self.unit_id = slave.into();
    }
}

#[async_trait::async_trait]
impl crate::client::Client for UdpClient {
    async fn call(&mut self, req: Request) -> Result<Response> {
        UdpClient::call(self, req).await
    }
}
