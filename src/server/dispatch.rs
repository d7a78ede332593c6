// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Function-code dispatch against a shared data store

use std::{future, sync::Arc};

use crate::{
    codec::u16_len,
    frame::{
        ExceptionCode, Quantity, Request, Response, MAX_READ_DISCRETE_QUANTITY,
        MAX_READ_REGISTER_QUANTITY, MAX_READ_WRITE_REGISTER_QUANTITY, MAX_WRITE_COIL_QUANTITY,
        MAX_WRITE_REGISTER_QUANTITY, RETURN_QUERY_DATA,
    },
    store::DataStore,
};

use super::Service;

/// The standard slave behavior: every function code is answered from
/// the four banks of a [`DataStore`].
///
/// Violations map onto the protocol's exception codes: counts outside
/// the per-function bounds are answered with exception 3, ranges beyond
/// the bank extent with exception 2.
#[derive(Debug, Clone)]
pub struct StoreService {
    store: Arc<DataStore>,
}

impl StoreService {
    #[must_use]
    pub fn new(store: Arc<DataStore>) -> Self {
        Self { store }
    }

    /// The store answered by this service.
    #[must_use]
    pub fn store(&self) -> &Arc<DataStore> {
        &self.store
    }

    fn handle(&self, req: Request) -> Result<Response, ExceptionCode> {
        use Request::*;
        match req {
            ReadCoils(start, quantity) => {
                check_quantity(quantity, MAX_READ_DISCRETE_QUANTITY)?;
                let coils = self
                    .store
                    .read_coils(start, quantity.into())
                    .map_err(illegal_data_address)?;
                Ok(Response::ReadCoils(coils))
            }
            ReadDiscreteInputs(start, quantity) => {
                check_quantity(quantity, MAX_READ_DISCRETE_QUANTITY)?;
                let inputs = self
                    .store
                    .read_discrete_inputs(start, quantity.into())
                    .map_err(illegal_data_address)?;
                Ok(Response::ReadDiscreteInputs(inputs))
            }
            ReadHoldingRegisters(start, quantity) => {
                check_quantity(quantity, MAX_READ_REGISTER_QUANTITY)?;
                let words = self
                    .store
                    .read_holding_registers(start, quantity.into())
                    .map_err(illegal_data_address)?;
                Ok(Response::ReadHoldingRegisters(words))
            }
            ReadInputRegisters(start, quantity) => {
                check_quantity(quantity, MAX_READ_REGISTER_QUANTITY)?;
                let words = self
                    .store
                    .read_input_registers(start, quantity.into())
                    .map_err(illegal_data_address)?;
                Ok(Response::ReadInputRegisters(words))
            }
            WriteSingleCoil(address, value) => {
                self.store
                    .write_coil(address, value)
                    .map_err(illegal_data_address)?;
                Ok(Response::WriteSingleCoil(address, value))
            }
            WriteSingleRegister(address, value) => {
                self.store
                    .write_register(address, value)
                    .map_err(illegal_data_address)?;
                Ok(Response::WriteSingleRegister(address, value))
            }
            WriteMultipleCoils(start, coils) => {
                check_len(coils.len(), MAX_WRITE_COIL_QUANTITY)?;
                // Exactly the requested number of coils is written;
                // padding bits of the trailing byte never arrive here.
                self.store
                    .write_coils(start, &coils)
                    .map_err(illegal_data_address)?;
                Ok(Response::WriteMultipleCoils(start, u16_len(coils.len())))
            }
            WriteMultipleRegisters(start, words) => {
                check_len(words.len(), MAX_WRITE_REGISTER_QUANTITY)?;
                self.store
                    .write_registers(start, &words)
                    .map_err(illegal_data_address)?;
                Ok(Response::WriteMultipleRegisters(start, u16_len(words.len())))
            }
            ReadWriteMultipleRegisters(read_start, read_quantity, write_start, words) => {
                check_quantity(read_quantity, MAX_READ_REGISTER_QUANTITY)?;
                check_len(words.len(), MAX_READ_WRITE_REGISTER_QUANTITY)?;
                let read = self
                    .store
                    .read_write_registers(read_start, read_quantity.into(), write_start, &words)
                    .map_err(illegal_data_address)?;
                Ok(Response::ReadWriteMultipleRegisters(read))
            }
            Diagnostics(sub_function, data) => {
                if sub_function != RETURN_QUERY_DATA {
                    return Err(ExceptionCode::IllegalFunction);
                }
                Ok(Response::Diagnostics(sub_function, data))
            }
        }
    }
}

impl Service for StoreService {
    type Request = Request;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        future::ready(self.handle(req))
    }
}

fn check_quantity(quantity: Quantity, max: Quantity) -> Result<(), ExceptionCode> {
    if quantity < 1 || quantity > max {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(())
}

fn check_len(len: usize, max: Quantity) -> Result<(), ExceptionCode> {
    if len < 1 || len > usize::from(max) {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(())
}

fn illegal_data_address(err: crate::store::OutOfRange) -> ExceptionCode {
    log::debug!("Rejecting request: {err}");
    ExceptionCode::IllegalDataAddress
}
