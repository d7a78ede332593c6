// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus TCP server

use std::{future::Future, io, net::SocketAddr, sync::Arc};

use dashmap::DashMap;
use futures_util::{future::FutureExt as _, sink::SinkExt as _, stream::StreamExt as _};
use socket2::{Domain, Socket, Type};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::broadcast,
    task::AbortHandle,
};
use tokio_util::codec::Framed;

use crate::{
    codec,
    frame::{ip::ResponseAdu, ExceptionCode, Request, Response},
    slave::Slave,
};

use super::{respond, Service};

const LIFECYCLE_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle notifications of a TCP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A master connected; the payload is its remote endpoint.
    Connected(String),
    /// A master disconnected (graceful close, reset or shutdown).
    Disconnected(String),
}

/// A TCP slave: accepts masters and answers their requests.
///
/// Every accepted master gets its own reader task. The peers are kept
/// in a concurrent map keyed by remote endpoint text; an entry is
/// removed when the connection closes and its task is aborted when the
/// server shuts down or is dropped.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    slave: Slave,
    peers: Arc<DashMap<String, AbortHandle>>,
    events: broadcast::Sender<ServerEvent>,
}

impl Server {
    #[must_use]
    pub fn new(listener: TcpListener, slave: Slave) -> Self {
        let (events, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        Self {
            listener,
            slave,
            peers: Arc::new(DashMap::new()),
            events,
        }
    }

    /// Bind a reuse-address listener and create a server on it.
    pub fn bind(socket_addr: SocketAddr, slave: Slave) -> io::Result<Self> {
        let listener = listener(socket_addr)?;
        Ok(Self::new(listener, slave))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Subscribe to connect/disconnect notifications.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Remote endpoints of the currently connected masters.
    #[must_use]
    pub fn connected_masters(&self) -> Vec<String> {
        self.peers.iter().map(|e| e.key().clone()).collect()
    }

    /// Accept and serve masters until an I/O error occurs.
    pub async fn serve<S>(&self, service: S) -> io::Result<()>
    where
        S: Service<Request = Request, Response = Response, Exception = ExceptionCode>
            + Send
            + Sync
            + 'static,
    {
        let service = Arc::new(service);
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            self.accept(stream, peer_addr, Arc::clone(&service));
        }
    }

    /// Serve until the given shutdown signal resolves, then disconnect
    /// all masters.
    pub async fn serve_until<S, Sd>(self, service: S, shutdown_signal: Sd) -> io::Result<()>
    where
        S: Service<Request = Request, Response = Response, Exception = ExceptionCode>
            + Send
            + Sync
            + 'static,
        Sd: Future<Output = ()> + Send + Unpin,
    {
        let mut shutdown_signal = shutdown_signal.fuse();
        let res = tokio::select! {
            res = self.serve(service) => res,
            () = &mut shutdown_signal => {
                log::debug!("Shutdown signal received");
                Ok(())
            }
        };
        self.disconnect_all();
        res
    }

    fn accept<S>(&self, stream: TcpStream, peer_addr: SocketAddr, service: Arc<S>)
    where
        S: Service<Request = Request, Response = Response, Exception = ExceptionCode>
            + Send
            + Sync
            + 'static,
    {
        let peer = peer_addr.to_string();
        log::debug!("Accepted connection from {peer}");
        let _ = self.events.send(ServerEvent::Connected(peer.clone()));

        let framed = Framed::new(stream, codec::ip::ServerCodec::default());
        let slave = self.slave;
        let peers = Arc::clone(&self.peers);
        let events = self.events.clone();

        // The task waits until it is registered in the peer map, so it
        // cannot miss its own deregistration.
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<()>();
        let task_peer = peer.clone();
        let handle = tokio::spawn(async move {
            let _ = ready_rx.await;
            if let Err(err) = process(framed, service, slave).await {
                log::error!("Connection {task_peer} failed: {err}");
            } else {
                log::debug!("Connection {task_peer} closed by peer");
            }
            peers.remove(&task_peer);
            let _ = events.send(ServerEvent::Disconnected(task_peer));
        });
        self.peers.insert(peer, handle.abort_handle());
        let _ = ready_tx.send(());
    }

    fn disconnect_all(&self) {
        for entry in self.peers.iter() {
            entry.value().abort();
        }
        for entry in self.peers.iter() {
            let _ = self
                .events
                .send(ServerEvent::Disconnected(entry.key().clone()));
        }
        self.peers.clear();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}

/// The per-connection request/response loop.
async fn process<S>(
    mut framed: Framed<TcpStream, codec::ip::ServerCodec>,
    service: Arc<S>,
    slave: Slave,
) -> io::Result<()>
where
    S: Service<Request = Request, Response = Response, Exception = ExceptionCode>,
{
    loop {
        // A zero-byte read ends the stream.
        let Some(request) = framed.next().await else {
            return Ok(());
        };
        let (hdr, pdu_data) = request?;

        let Some(pdu) = respond(service.as_ref(), slave, hdr.unit_id, pdu_data).await else {
            continue;
        };

        // The response preserves the request's transaction id.
        framed.send(ResponseAdu { hdr, pdu }).await?;
    }
}

/// Configure and open the TCP listener socket.
fn listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => Socket::new(Domain::IPV4, Type::STREAM, None)?,
        SocketAddr::V6(_) => Socket::new(Domain::IPV6, Type::STREAM, None)?,
    };
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}
