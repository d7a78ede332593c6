// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus serial master engine, generic over the RTU and ASCII framings

use std::{
    fmt,
    io::{Error as IoError, ErrorKind},
};

use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::{
    codec,
    error::{Error, Result},
    frame::{serial::*, Request, RequestPdu, Response, SlaveException},
    slave::*,
    transport::{with_deadline, TransportOptions},
};

/// Modbus RTU client
pub(crate) type RtuClient<T> = Client<T, codec::rtu::ClientCodec>;

/// Modbus ASCII client
pub(crate) type AsciiClient<T> = Client<T, codec::ascii::ClientCodec>;

/// Serial master engine.
///
/// One transaction is in flight at a time; the `&mut` receiver of
/// [`Client::call`] makes interleaving impossible without an external
/// lock.
#[derive(Debug)]
pub(crate) struct Client<T, C> {
    framed: Framed<T, C>,
    slave_id: SlaveId,
    options: TransportOptions,
}

impl<T, C> Client<T, C>
where
    T: AsyncRead + AsyncWrite + Unpin,
    C: Decoder<Item = ResponseAdu, Error = IoError>
        + Encoder<RequestAdu, Error = IoError>
        + Default,
{
    pub(crate) fn new(transport: T, slave: Slave, options: TransportOptions) -> Self {
        let framed = Framed::new(transport, C::default());
        let slave_id = slave.into();
        Self {
            framed,
            slave_id,
            options,
        }
    }

    fn next_request_adu<R>(&self, req: R) -> RequestAdu
    where
        R: Into<RequestPdu>,
    {
        RequestAdu {
            hdr: Header {
                slave_id: self.slave_id,
            },
            pdu: req.into(),
        }
    }

    pub(crate) async fn call(&mut self, req: Request) -> Result<Response> {
        log::debug!("Call {req:?}");
        req.validate()?;
        let req_adu = self.next_request_adu(req);

        let mut attempts_left = self.options.retries;
        loop {
            match self.transaction(req_adu.clone()).await {
                Err(err) if err.is_retryable() && attempts_left > 0 => {
                    attempts_left -= 1;
                    log::warn!("Transaction failed: {err} ({attempts_left} attempt(s) left)");
                    tokio::time::sleep(self.options.wait_to_retry).await;
                }
                res => return res,
            }
        }
    }

    async fn transaction(&mut self, req_adu: RequestAdu) -> Result<Response> {
        let req_hdr = req_adu.hdr;

        // Discard buffered input so a late reply of an earlier attempt
        // cannot desynchronize this transaction.
        self.framed.read_buffer_mut().clear();

        self.framed
            .send(req_adu)
            .await
            .map_err(Error::from_transport)?;

        let deadline = self.options.response_timeout;
        let res_adu = with_deadline(deadline, async {
            self.framed
                .next()
                .await
                .unwrap_or_else(|| Err(IoError::from(ErrorKind::BrokenPipe)))
        })
        .await
        .map_err(Error::from_transport)?;

        verify_response_header(req_hdr, res_adu.hdr)?;

        match res_adu.pdu.0 {
            Ok(rsp) => Ok(rsp),
            Err(ex) => Err(SlaveException::new(req_hdr.slave_id, ex).into()),
        }
    }
}

fn verify_response_header(req_hdr: Header, rsp_hdr: Header) -> Result<()> {
    if req_hdr != rsp_hdr {
        return Err(Error::Frame(IoError::new(
            ErrorKind::InvalidData,
            format!(
                "Invalid response header: expected/request = {req_hdr:?}, actual/response = {rsp_hdr:?}"
            ),
        )));
    }
    Ok(())
}

impl<T, C> SlaveContext for Client<T, C> {
    fn set_slave(&mut self, slave: Slave) {
        self.slave_id = slave.into();
    }
}

#[async_trait::async_trait]
impl<T, C> crate::client::Client for Client<T, C>
where
    T: fmt::Debug + AsyncRead + AsyncWrite + Send + Unpin,
    C: Decoder<Item = ResponseAdu, Error = IoError>
        + Encoder<RequestAdu, Error = IoError>
        + Default
        + fmt::Debug
        + Send,
{
    async fn call(&mut self, req: Request) -> Result<Response> {
        Client::call(self, req).await
    }
}
