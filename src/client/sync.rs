// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synchronous Modbus client
//!
//! A thin blocking facade that drives the asynchronous API on a private
//! current-thread runtime.

use std::{future::Future, io, time::Duration};

use crate::{
    error::{Error, Result},
    frame::*,
    slave::*,
};

use super::{
    Context as AsyncContext, Diagnostics as AsyncDiagnostics, Reader as AsyncReader,
    Writer as AsyncWriter,
};

fn block_on_with_timeout<T>(
    runtime: &tokio::runtime::Runtime,
    timeout: Option<Duration>,
    task: impl Future<Output = Result<T>>,
) -> Result<T> {
    runtime.block_on(async move {
        if let Some(duration) = timeout {
            tokio::time::timeout(duration, task)
                .await
                .unwrap_or_else(|elapsed| {
                    Err(Error::Io(io::Error::new(io::ErrorKind::TimedOut, elapsed)))
                })
        } else {
            task.await
        }
    })
}

fn new_runtime() -> io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

/// A transport independent synchronous client trait.
pub trait Client: SlaveContext {
    fn call(&mut self, req: Request) -> Result<Response>;
}

/// The synchronous counterpart of the asynchronous
/// [`Reader`](`crate::client::Reader`) trait.
pub trait Reader: Client {
    fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;
    fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;
    fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;
    fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;
    fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_count: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>>;
}

/// The synchronous counterpart of the asynchronous
/// [`Writer`](`crate::client::Writer`) trait.
pub trait Writer: Client {
    fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()>;
    fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<()>;
    fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()>;
    fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()>;
}

/// A synchronous Modbus client context.
#[derive(Debug)]
pub struct Context {
    runtime: tokio::runtime::Runtime,
    async_ctx: AsyncContext,
    timeout: Option<Duration>,
}

impl Context {
    /// Returns the current timeout.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Sets a timeout duration for all subsequent operations.
    ///
    /// The timeout is disabled by passing `None`.
    pub fn set_timeout(&mut self, duration: impl Into<Option<Duration>>) {
        self.timeout = duration.into();
    }

    /// Disables the timeout for all subsequent operations.
    pub fn reset_timeout(&mut self) {
        self.timeout = None;
    }

    /// Sub-function 0 of the diagnostics function: loop one word
    /// through the slave.
    pub fn return_query_data(&mut self, data: Word) -> Result<bool> {
        block_on_with_timeout(
            &self.runtime,
            self.timeout,
            self.async_ctx.return_query_data(data),
        )
    }
}

impl Client for Context {
    fn call(&mut self, req: Request) -> Result<Response> {
        block_on_with_timeout(
            &self.runtime,
            self.timeout,
            crate::client::Client::call(&mut self.async_ctx, req),
        )
    }
}

impl SlaveContext for Context {
    fn set_slave(&mut self, slave: Slave) {
        self.async_ctx.set_slave(slave);
    }
}

impl Reader for Context {
    fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        block_on_with_timeout(
            &self.runtime,
            self.timeout,
            self.async_ctx.read_coils(addr, cnt),
        )
    }

    fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        block_on_with_timeout(
            &self.runtime,
            self.timeout,
            self.async_ctx.read_discrete_inputs(addr, cnt),
        )
    }

    fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        block_on_with_timeout(
            &self.runtime,
            self.timeout,
            self.async_ctx.read_input_registers(addr, cnt),
        )
    }

    fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        block_on_with_timeout(
            &self.runtime,
            self.timeout,
            self.async_ctx.read_holding_registers(addr, cnt),
        )
    }

    fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_count: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>> {
        block_on_with_timeout(
            &self.runtime,
            self.timeout,
            self.async_ctx
                .read_write_multiple_registers(read_addr, read_count, write_addr, write_data),
        )
    }
}

impl Writer for Context {
    fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()> {
        block_on_with_timeout(
            &self.runtime,
            self.timeout,
            self.async_ctx.write_single_coil(addr, coil),
        )
    }

    fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<()> {
        block_on_with_timeout(
            &self.runtime,
            self.timeout,
            self.async_ctx.write_multiple_coils(addr, coils),
        )
    }

    fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()> {
        block_on_with_timeout(
            &self.runtime,
            self.timeout,
            self.async_ctx.write_single_register(addr, word),
        )
    }

    fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()> {
        block_on_with_timeout(
            &self.runtime,
            self.timeout,
            self.async_ctx.write_multiple_registers(addr, words),
        )
    }
}

/// Synchronous TCP connections
pub mod tcp {
    use std::net::SocketAddr;

    use crate::transport::TransportOptions;

    use super::*;

    pub fn connect(socket_addr: SocketAddr) -> Result<Context> {
        connect_slave(socket_addr, Slave::tcp_device())
    }

    pub fn connect_slave(socket_addr: SocketAddr, slave: Slave) -> Result<Context> {
        connect_slave_with_options(socket_addr, slave, TransportOptions::default())
    }

    pub fn connect_slave_with_options(
        socket_addr: SocketAddr,
        slave: Slave,
        options: TransportOptions,
    ) -> Result<Context> {
        let runtime = new_runtime()?;
        let async_ctx = runtime.block_on(crate::client::tcp::connect_slave_with_options(
            socket_addr,
            slave,
            options,
        ))?;
        Ok(Context {
            runtime,
            async_ctx,
            timeout: None,
        })
    }
}

/// Synchronous UDP connections
pub mod udp {
    use std::net::SocketAddr;

    use crate::transport::TransportOptions;

    use super::*;

    pub fn connect(socket_addr: SocketAddr) -> Result<Context> {
        connect_slave(socket_addr, Slave::tcp_device())
    }

    pub fn connect_slave(socket_addr: SocketAddr, slave: Slave) -> Result<Context> {
        connect_slave_with_options(socket_addr, slave, TransportOptions::default())
    }

    pub fn connect_slave_with_options(
        socket_addr: SocketAddr,
        slave: Slave,
        options: TransportOptions,
    ) -> Result<Context> {
        let runtime = new_runtime()?;
        let async_ctx = runtime.block_on(crate::client::udp::connect_slave_with_options(
            socket_addr,
            slave,
            options,
        ))?;
        Ok(Context {
            runtime,
            async_ctx,
            timeout: None,
        })
    }
}

/// Synchronous RTU connections
pub mod rtu {
    use tokio_serial::SerialStream;

    use crate::transport::TransportOptions;

    use super::*;

    pub fn connect_path(path: &str, baud_rate: u32, slave: Slave) -> Result<Context> {
        connect_path_with_options(path, baud_rate, slave, TransportOptions::default())
    }

    pub fn connect_path_with_options(
        path: &str,
        baud_rate: u32,
        slave: Slave,
        options: TransportOptions,
    ) -> Result<Context> {
        let runtime = new_runtime()?;
        // The serial stream registers with the runtime's reactor.
        let async_ctx = runtime.block_on(async {
            let serial = SerialStream::open(&tokio_serial::new(path, baud_rate))
                .map_err(|err| Error::Io(err.into()))?;
            Ok::<_, Error>(crate::client::rtu::attach_slave_with_options(
                serial, slave, options,
            ))
        })?;
        Ok(Context {
            runtime,
            async_ctx,
            timeout: None,
        })
    }
}

/// Synchronous ASCII connections
pub mod ascii {
    use tokio_serial::SerialStream;

    use crate::transport::TransportOptions;

    use super::*;

    pub fn connect_path(path: &str, baud_rate: u32, slave: Slave) -> Result<Context> {
        connect_path_with_options(path, baud_rate, slave, TransportOptions::default())
    }

    pub fn connect_path_with_options(
        path: &str,
        baud_rate: u32,
        slave: Slave,
        options: TransportOptions,
    ) -> Result<Context> {
        let runtime = new_runtime()?;
        let async_ctx = runtime.block_on(async {
            let serial = SerialStream::open(&tokio_serial::new(path, baud_rate))
                .map_err(|err| Error::Io(err.into()))?;
            Ok::<_, Error>(crate::client::ascii::attach_slave_with_options(
                serial, slave, options,
            ))
        })?;
        Ok(Context {
            runtime,
            async_ctx,
            timeout: None,
        })
    }
}
