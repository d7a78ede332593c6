// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus serial server for the RTU and ASCII framings

use std::{future::Future, io, path::Path};

use bytes::Bytes;
use futures_util::{future::FutureExt as _, sink::SinkExt as _, stream::StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialStream;
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::{
    codec,
    frame::{serial::Header, serial::ResponseAdu, ExceptionCode, Request, Response},
    slave::Slave,
};

use super::{respond, Service};

/// A serial slave on a half-duplex line.
///
/// The listener blocks on full-frame completion as determined by the
/// codec's length rules and answers on the same port. Requests for
/// other stations are ignored, broadcasts are applied silently.
#[derive(Debug)]
pub struct Server<T> {
    transport: T,
    slave: Slave,
}

impl Server<SerialStream> {
    /// Set up a server from an interface path and baud rate.
    pub fn new_from_path<P: AsRef<Path>>(p: P, baud_rate: u32, slave: Slave) -> io::Result<Self> {
        let transport =
            SerialStream::open(&tokio_serial::new(p.as_ref().to_string_lossy(), baud_rate))
                .map_err(io::Error::from)?;
        Ok(Self { transport, slave })
    }
}

impl<T> Server<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Set up a server on a pre-configured transport, e.g. an already
    /// opened serial stream.
    #[must_use]
    pub fn new(transport: T, slave: Slave) -> Self {
        Self { transport, slave }
    }

    /// Serve RTU requests until the transport is exhausted.
    pub async fn serve_rtu<S>(self, service: S) -> io::Result<()>
    where
        S: Service<Request = Request, Response = Response, Exception = ExceptionCode>,
    {
        let framed = Framed::new(self.transport, codec::rtu::ServerCodec::default());
        process(framed, service, self.slave).await
    }

    /// Serve ASCII requests until the transport is exhausted.
    pub async fn serve_ascii<S>(self, service: S) -> io::Result<()>
    where
        S: Service<Request = Request, Response = Response, Exception = ExceptionCode>,
    {
        let framed = Framed::new(self.transport, codec::ascii::ServerCodec::default());
        process(framed, service, self.slave).await
    }

    /// Serve RTU requests until the given shutdown signal resolves.
    pub async fn serve_rtu_until<S, Sd>(self, service: S, shutdown_signal: Sd) -> io::Result<()>
    where
        S: Service<Request = Request, Response = Response, Exception = ExceptionCode>,
        Sd: Future<Output = ()> + Send + Unpin,
    {
        let mut shutdown_signal = shutdown_signal.fuse();
        tokio::select! {
            res = self.serve_rtu(service) => res,
            () = &mut shutdown_signal => {
                log::debug!("Shutdown signal received");
                Ok(())
            }
        }
    }

    /// Serve ASCII requests until the given shutdown signal resolves.
    pub async fn serve_ascii_until<S, Sd>(self, service: S, shutdown_signal: Sd) -> io::Result<()>
    where
        S: Service<Request = Request, Response = Response, Exception = ExceptionCode>,
        Sd: Future<Output = ()> + Send + Unpin,
    {
        let mut shutdown_signal = shutdown_signal.fuse();
        tokio::select! {
            res = self.serve_ascii(service) => res,
            () = &mut shutdown_signal => {
                log::debug!("Shutdown signal received");
                Ok(())
            }
        }
    }
}

async fn process<T, C, S>(mut framed: Framed<T, C>, service: S, slave: Slave) -> io::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    C: Decoder<Item = (Header, Bytes), Error = io::Error>
        + Encoder<ResponseAdu, Error = io::Error>,
    S: Service<Request = Request, Response = Response, Exception = ExceptionCode>,
{
    loop {
        let Some(request) = framed.next().await else {
            return Ok(());
        };
        let (hdr, pdu_data) = match request {
            Ok(frame) => frame,
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                // The codec resynchronizes on the byte stream; a frame
                // that still fails to parse is dropped.
                log::warn!("Discarding unparseable frame: {err}");
                continue;
            }
            Err(err) => return Err(err),
        };

        let Some(pdu) = respond(&service, slave, hdr.slave_id, pdu_data).await else {
            continue;
        };

        framed.send(ResponseAdu { hdr, pdu }).await?;
    }
}
