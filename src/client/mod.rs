// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Asynchronous Modbus master API

pub mod ascii;
pub mod rtu;
pub mod sync;
pub mod tcp;
pub mod udp;

use std::{fmt, io};

use crate::{
    error::{Error, Result},
    frame::*,
    slave::*,
};

fn unexpected_response() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::InvalidData,
        "unexpected response",
    ))
}

/// A transport independent asynchronous client trait.
#[async_trait::async_trait]
pub trait Client: SlaveContext + fmt::Debug + Send {
    /// Invoke a raw Modbus transaction.
    async fn call(&mut self, req: Request) -> Result<Response>;
}

/// An asynchronous Modbus reader.
#[async_trait::async_trait]
pub trait Reader: Client {
    async fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;

    async fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;

    async fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;

    async fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;

    async fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_count: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>>;
}

/// An asynchronous Modbus writer.
#[async_trait::async_trait]
pub trait Writer: Client {
    async fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()>;

    async fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<()>;

    async fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()>;

    async fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()>;
}

/// Diagnostics (function code 8) helpers.
#[async_trait::async_trait]
pub trait Diagnostics: Client {
    /// Sub-function 0: loop one word through the slave.
    ///
    /// Returns `true` iff the echo matches the query byte for byte.
    async fn return_query_data(&mut self, data: Word) -> Result<bool>;
}

/// An asynchronous Modbus client context.
///
/// Count arguments are checked here, before any byte is written;
/// response payloads are checked against the request's validation laws
/// after the transaction engine returns. Dropping the context closes
/// the owned transport.
#[derive(Debug)]
pub struct Context {
    client: Box<dyn Client>,
}

impl Context {
    /// Issue a request after validating it and validate the response.
    async fn call_checked(&mut self, req: Request) -> Result<Response> {
        req.validate()?;
        let rsp = self.client.call(req.clone()).await?;
        req.validate_response(&rsp).map_err(Error::Io)?;
        Ok(rsp)
    }
}

impl From<Box<dyn Client>> for Context {
    fn from(client: Box<dyn Client>) -> Self {
        Self { client }
    }
}

impl From<Context> for Box<dyn Client> {
    fn from(from: Context) -> Self {
        from.client
    }
}

#[async_trait::async_trait]
impl Client for Context {
    async fn call(&mut self, req: Request) -> Result<Response> {
        self.client.call(req).await
    }
}

impl SlaveContext for Context {
    fn set_slave(&mut self, slave: Slave) {
        self.client.set_slave(slave);
    }
}

#[async_trait::async_trait]
impl Reader for Context {
    async fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        let rsp = self.call_checked(Request::ReadCoils(addr, cnt)).await?;
        if let Response::ReadCoils(mut coils) = rsp {
            // The wire transports whole bytes.
            coils.truncate(cnt.into());
            Ok(coils)
        } else {
            Err(unexpected_response())
        }
    }

    async fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        let rsp = self
            .call_checked(Request::ReadDiscreteInputs(addr, cnt))
            .await?;
        if let Response::ReadDiscreteInputs(mut coils) = rsp {
            coils.truncate(cnt.into());
            Ok(coils)
        } else {
            Err(unexpected_response())
        }
    }

    async fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        let rsp = self
            .call_checked(Request::ReadInputRegisters(addr, cnt))
            .await?;
        if let Response::ReadInputRegisters(words) = rsp {
            Ok(words)
        } else {
            Err(unexpected_response())
        }
    }

    async fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        let rsp = self
            .call_checked(Request::ReadHoldingRegisters(addr, cnt))
            .await?;
        if let Response::ReadHoldingRegisters(words) = rsp {
            Ok(words)
        } else {
            Err(unexpected_response())
        }
    }

    async fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_count: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>> {
        let rsp = self
            .call_checked(Request::ReadWriteMultipleRegisters(
                read_addr,
                read_count,
                write_addr,
                write_data.to_vec(),
            ))
            .await?;
        if let Response::ReadWriteMultipleRegisters(words) = rsp {
            Ok(words)
        } else {
            Err(unexpected_response())
        }
    }
}

#[async_trait::async_trait]
impl Writer for Context {
    async fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()> {
        self.call_checked(Request::WriteSingleCoil(addr, coil))
            .await?;
        Ok(())
    }

    async fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<()> {
        self.call_checked(Request::WriteMultipleCoils(addr, coils.to_vec()))
            .await?;
        Ok(())
    }

    async fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()> {
        self.call_checked(Request::WriteSingleRegister(addr, word))
            .await?;
        Ok(())
    }

    async fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()> {
        self.call_checked(Request::WriteMultipleRegisters(addr, words.to_vec()))
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Diagnostics for Context {
    async fn return_query_data(&mut self, data: Word) -> Result<bool> {
        let rsp = self
            .call_checked(Request::Diagnostics(RETURN_QUERY_DATA, data))
            .await?;
        if let Response::Diagnostics(_, echoed) = rsp {
            Ok(echoed == data)
        } else {
            Err(unexpected_response())
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::sync::Mutex;

    #[derive(Default, Debug)]
    pub(crate) struct ClientMock {
        slave: Option<Slave>,
        last_request: Mutex<Option<Request>>,
        next_response: Option<Result<Response>>,
    }

    #[allow(dead_code)]
    impl ClientMock {
        pub(crate) fn slave(&self) -> Option<Slave> {
            self.slave
        }

        pub(crate) fn last_request(&self) -> Option<Request> {
            self.last_request.lock().unwrap().clone()
        }

        pub(crate) fn set_next_response(&mut self, next_response: Result<Response>) {
            self.next_response = Some(next_response);
        }
    }

    #[async_trait::async_trait]
    impl Client for ClientMock {
        async fn call(&mut self, request: Request) -> Result<Response> {
            *self.last_request.lock().unwrap() = Some(request);
            match self.next_response.take().unwrap() {
                Ok(response) => Ok(response),
                Err(err) => Err(err),
            }
        }
    }

    impl SlaveContext for ClientMock {
        fn set_slave(&mut self, slave: Slave) {
            self.slave = Some(slave);
        }
    }

    fn context_with_response(rsp: Response) -> Context {
        let mut client = Box::new(ClientMock::default());
        client.set_next_response(Ok(rsp));
        Context::from(client as Box<dyn Client>)
    }

    #[tokio::test]
    async fn read_some_coils() {
        // The protocol always returns entire bytes, i.e. a multiple of
        // 8 coils.
        let response_coils = [true, false, false, true, false, true, false, true].to_vec();
        for num_coils in 1..8 {
            let mut context =
                context_with_response(Response::ReadCoils(response_coils.clone()));
            context.set_slave(Slave(1));
            let coils = context.read_coils(1, num_coils as u16).await.unwrap();
            assert_eq!(&response_coils[0..num_coils], &coils[..]);
        }
    }

    #[tokio::test]
    async fn read_some_discrete_inputs() {
        let response_inputs = [true, false, false, true, false, true, false, true].to_vec();
        for num_inputs in 1..8 {
            let mut context =
                context_with_response(Response::ReadDiscreteInputs(response_inputs.clone()));
            context.set_slave(Slave(1));
            let inputs = context
                .read_discrete_inputs(1, num_inputs as u16)
                .await
                .unwrap();
            assert_eq!(&response_inputs[0..num_inputs], &inputs[..]);
        }
    }

    #[tokio::test]
    async fn validate_read_quantities_before_calling() {
        // No response is configured: reaching the mock would panic.
        let mut context = Context::from(Box::<ClientMock>::default() as Box<dyn Client>);
        assert!(matches!(
            context.read_coils(0, 0).await,
            Err(Error::Argument(_))
        ));
        assert!(matches!(
            context.read_coils(0, 2001).await,
            Err(Error::Argument(_))
        ));
        assert!(matches!(
            context.read_discrete_inputs(0, 2001).await,
            Err(Error::Argument(_))
        ));
        assert!(matches!(
            context.read_holding_registers(0, 126).await,
            Err(Error::Argument(_))
        ));
        assert!(matches!(
            context.read_input_registers(0, 126).await,
            Err(Error::Argument(_))
        ));
    }

    #[tokio::test]
    async fn validate_write_quantities_before_calling() {
        let mut context = Context::from(Box::<ClientMock>::default() as Box<dyn Client>);
        assert!(matches!(
            context.write_multiple_coils(0, &[]).await,
            Err(Error::Argument(_))
        ));
        assert!(matches!(
            context.write_multiple_coils(0, &[true; 1969]).await,
            Err(Error::Argument(_))
        ));
        assert!(matches!(
            context.write_multiple_registers(0, &[]).await,
            Err(Error::Argument(_))
        ));
        assert!(matches!(
            context.write_multiple_registers(0, &[0; 124]).await,
            Err(Error::Argument(_))
        ));
        assert!(matches!(
            context
                .read_write_multiple_registers(0, 1, 0, &[0; 122])
                .await,
            Err(Error::Argument(_))
        ));
    }

    #[tokio::test]
    async fn reject_unexpected_write_echo() {
        let mut context = context_with_response(Response::WriteMultipleRegisters(6, 1));
        let err = context
            .write_multiple_registers(5, &[42])
            .await
            .unwrap_err();
        match err {
            Error::Io(err) => assert_eq!(err.to_string(), "unexpected start address"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn reject_wrong_register_count() {
        let mut context = context_with_response(Response::ReadHoldingRegisters(vec![1, 2]));
        assert!(context.read_holding_registers(0, 3).await.is_err());
    }

    #[tokio::test]
    async fn diagnostics_echo() {
        let mut context = context_with_response(Response::Diagnostics(RETURN_QUERY_DATA, 0x0032));
        assert!(context.return_query_data(0x0032).await.unwrap());

        let mut context = context_with_response(Response::Diagnostics(RETURN_QUERY_DATA, 0x0033));
        assert!(!context.return_query_data(0x0032).await.unwrap());
    }
}
