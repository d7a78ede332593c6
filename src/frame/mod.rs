// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request/response message model, shared by all transports

pub(crate) mod ip;
pub(crate) mod serial;

use std::{error, fmt, io};

use crate::{error::ArgumentError, slave::SlaveId};

/// A Modbus function code is represented by an unsigned 8 bit integer.
pub type FunctionCode = u8;

/// A Modbus protocol address is represented by 16 bit from `0` to `65535`.
///
/// This *protocol address* uses 0-based indexing; the data store exposes
/// the same item under the 1-based index `address + 1`.
pub type Address = u16;

/// A Coil represents a single bit.
///
/// - `true` is equivalent to `ON`, `1` and `0xFF00`.
/// - `false` is equivalent to `OFF`, `0` and `0x0000`.
pub type Coil = bool;

/// Modbus uses 16 bit for its data items (big-endian representation).
pub type Word = u16;

/// Number of items to process (`0` - `65535`).
pub type Quantity = u16;

/// Diagnostics (function code 8) sub-function.
pub type SubFunction = u16;

/// Diagnostics sub-function 0: the slave echoes the query data verbatim.
pub const RETURN_QUERY_DATA: SubFunction = 0x0000;

/// Most discrete items that can be read with a single request.
pub(crate) const MAX_READ_DISCRETE_QUANTITY: Quantity = 2000;

/// Most registers that can be read with a single request.
pub(crate) const MAX_READ_REGISTER_QUANTITY: Quantity = 125;

/// Most coils that can be written with a single request.
pub(crate) const MAX_WRITE_COIL_QUANTITY: Quantity = 1968;

/// Most registers that can be written with a single request.
pub(crate) const MAX_WRITE_REGISTER_QUANTITY: Quantity = 123;

/// Most registers the write part of a read/write request may carry.
pub(crate) const MAX_READ_WRITE_REGISTER_QUANTITY: Quantity = 121;

/// A request represents a message from the client (master) to the server (slave).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils(Address, Quantity),
    ReadDiscreteInputs(Address, Quantity),
    WriteSingleCoil(Address, Coil),
    WriteMultipleCoils(Address, Vec<Coil>),
    ReadInputRegisters(Address, Quantity),
    ReadHoldingRegisters(Address, Quantity),
    WriteSingleRegister(Address, Word),
    WriteMultipleRegisters(Address, Vec<Word>),
    ReadWriteMultipleRegisters(Address, Quantity, Address, Vec<Word>),
    Diagnostics(SubFunction, Word),
}

/// The data of a successful request.
///
/// `ReadCoils`/`ReadDiscreteInputs`: the length of the result `Vec` is
/// always a multiple of 8. Only the values of the first bits/coils that
/// have actually been requested are defined; the remaining bits should
/// be ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Vec<Coil>),
    ReadDiscreteInputs(Vec<Coil>),
    WriteSingleCoil(Address, Coil),
    WriteMultipleCoils(Address, Quantity),
    ReadInputRegisters(Vec<Word>),
    ReadHoldingRegisters(Vec<Word>),
    WriteSingleRegister(Address, Word),
    WriteMultipleRegisters(Address, Quantity),
    ReadWriteMultipleRegisters(Vec<Word>),
    Diagnostics(SubFunction, Word),
}

impl Request {
    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        use Request::*;
        match self {
            ReadCoils(_, _) => 0x01,
            ReadDiscreteInputs(_, _) => 0x02,
            ReadHoldingRegisters(_, _) => 0x03,
            ReadInputRegisters(_, _) => 0x04,
            WriteSingleCoil(_, _) => 0x05,
            WriteSingleRegister(_, _) => 0x06,
            Diagnostics(_, _) => 0x08,
            WriteMultipleCoils(_, _) => 0x0F,
            WriteMultipleRegisters(_, _) => 0x10,
            ReadWriteMultipleRegisters(_, _, _, _) => 0x17,
        }
    }

    /// Check the argument-level invariants before anything is encoded.
    pub fn validate(&self) -> Result<(), ArgumentError> {
        use Request::*;
        match self {
            ReadCoils(_, quantity) | ReadDiscreteInputs(_, quantity) => {
                check_quantity(*quantity, MAX_READ_DISCRETE_QUANTITY, "discrete inputs to read")
            }
            ReadHoldingRegisters(_, quantity) | ReadInputRegisters(_, quantity) => {
                check_quantity(*quantity, MAX_READ_REGISTER_QUANTITY, "registers to read")
            }
            WriteSingleCoil(_, _) | WriteSingleRegister(_, _) => Ok(()),
            WriteMultipleCoils(_, coils) => {
                check_payload_len(coils.len(), MAX_WRITE_COIL_QUANTITY, "coils to write")
            }
            WriteMultipleRegisters(_, words) => {
                check_payload_len(words.len(), MAX_WRITE_REGISTER_QUANTITY, "registers to write")
            }
            ReadWriteMultipleRegisters(_, read_quantity, _, words) => {
                check_quantity(*read_quantity, MAX_READ_REGISTER_QUANTITY, "registers to read")?;
                check_payload_len(
                    words.len(),
                    MAX_READ_WRITE_REGISTER_QUANTITY,
                    "registers to write",
                )
            }
            Diagnostics(sub_function, _) => {
                if *sub_function == RETURN_QUERY_DATA {
                    Ok(())
                } else {
                    Err(ArgumentError::new(format!(
                        "unsupported diagnostics sub-function: {sub_function}"
                    )))
                }
            }
        }
    }

    /// Check a well-formed response against this request.
    ///
    /// The variant must correspond and echoed fields must match; read
    /// responses must carry the requested quantity (discrete reads may
    /// carry more, because the wire always transports whole bytes).
    pub fn validate_response(&self, rsp: &Response) -> io::Result<()> {
        match (self, rsp) {
            (Request::ReadCoils(_, quantity), Response::ReadCoils(coils))
            | (Request::ReadDiscreteInputs(_, quantity), Response::ReadDiscreteInputs(coils)) => {
                if coils.len() < usize::from(*quantity) {
                    return Err(invalid_response("too few discrete values"));
                }
                Ok(())
            }
            (Request::ReadHoldingRegisters(_, quantity), Response::ReadHoldingRegisters(words))
            | (Request::ReadInputRegisters(_, quantity), Response::ReadInputRegisters(words)) => {
                if words.len() != usize::from(*quantity) {
                    return Err(invalid_response("unexpected register count"));
                }
                Ok(())
            }
            (
                Request::WriteSingleCoil(address, coil),
                Response::WriteSingleCoil(rsp_address, rsp_coil),
            ) => {
                if rsp_address != address {
                    return Err(invalid_response("unexpected address"));
                }
                if rsp_coil != coil {
                    return Err(invalid_response("unexpected value"));
                }
                Ok(())
            }
            (
                Request::WriteSingleRegister(address, word),
                Response::WriteSingleRegister(rsp_address, rsp_word),
            ) => {
                if rsp_address != address {
                    return Err(invalid_response("unexpected address"));
                }
                if rsp_word != word {
                    return Err(invalid_response("unexpected value"));
                }
                Ok(())
            }
            (
                Request::WriteMultipleCoils(address, coils),
                Response::WriteMultipleCoils(rsp_address, rsp_quantity),
            ) => {
                if rsp_address != address {
                    return Err(invalid_response("unexpected start address"));
                }
                if usize::from(*rsp_quantity) != coils.len() {
                    return Err(invalid_response("unexpected quantity"));
                }
                Ok(())
            }
            (
                Request::WriteMultipleRegisters(address, words),
                Response::WriteMultipleRegisters(rsp_address, rsp_quantity),
            ) => {
                if rsp_address != address {
                    return Err(invalid_response("unexpected start address"));
                }
                if usize::from(*rsp_quantity) != words.len() {
                    return Err(invalid_response("unexpected quantity"));
                }
                Ok(())
            }
            (
                Request::ReadWriteMultipleRegisters(_, read_quantity, _, _),
                Response::ReadWriteMultipleRegisters(words),
            ) => {
                if words.len() != usize::from(*read_quantity) {
                    return Err(invalid_response("unexpected register count"));
                }
                Ok(())
            }
            (Request::Diagnostics(sub_function, _), Response::Diagnostics(rsp_sub, _)) => {
                if rsp_sub != sub_function {
                    return Err(invalid_response("unexpected diagnostics sub-function"));
                }
                Ok(())
            }
            _ => Err(invalid_response("unexpected response")),
        }
    }
}

impl Response {
    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        use Response::*;
        match self {
            ReadCoils(_) => 0x01,
            ReadDiscreteInputs(_) => 0x02,
            ReadHoldingRegisters(_) => 0x03,
            ReadInputRegisters(_) => 0x04,
            WriteSingleCoil(_, _) => 0x05,
            WriteSingleRegister(_, _) => 0x06,
            Diagnostics(_, _) => 0x08,
            WriteMultipleCoils(_, _) => 0x0F,
            WriteMultipleRegisters(_, _) => 0x10,
            ReadWriteMultipleRegisters(_) => 0x17,
        }
    }
}

fn check_quantity(quantity: Quantity, max: Quantity, what: &str) -> Result<(), ArgumentError> {
    if quantity < 1 || quantity > max {
        return Err(ArgumentError::new(format!(
            "number of {what} must be between 1 and {max}, got {quantity}"
        )));
    }
    Ok(())
}

fn check_payload_len(len: usize, max: Quantity, what: &str) -> Result<(), ArgumentError> {
    if len < 1 || len > usize::from(max) {
        return Err(ArgumentError::new(format!(
            "number of {what} must be between 1 and {max}, got {len}"
        )));
    }
    Ok(())
}

fn invalid_response(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

/// A server (slave) exception code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDevice = 0x0B,
}

impl ExceptionCode {
    pub(crate) fn description(&self) -> &'static str {
        use ExceptionCode::*;

        match *self {
            IllegalFunction => "Illegal function",
            IllegalDataAddress => "Illegal data address",
            IllegalDataValue => "Illegal data value",
            ServerDeviceFailure => "Server device failure",
            Acknowledge => "Acknowledge",
            ServerDeviceBusy => "Server device busy",
            MemoryParityError => "Memory parity error",
            GatewayPathUnavailable => "Gateway path unavailable",
            GatewayTargetDevice => "Gateway target device failed to respond",
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl error::Error for ExceptionCode {}

/// A server (slave) exception response as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub function: FunctionCode,
    pub exception: ExceptionCode,
}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus function {}: {}", self.function, self.exception)
    }
}

impl error::Error for ExceptionResponse {}

/// A slave exception surfaced to the caller, together with the address
/// of the responding device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveException {
    pub slave: SlaveId,
    pub function: FunctionCode,
    pub exception: ExceptionCode,
}

impl SlaveException {
    pub(crate) fn new(slave: SlaveId, rsp: ExceptionResponse) -> Self {
        Self {
            slave,
            function: rsp.function,
            exception: rsp.exception,
        }
    }
}

impl fmt::Display for SlaveException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slave {}: Modbus function {}: {}",
            self.slave, self.function, self.exception
        )
    }
}

impl error::Error for SlaveException {}

/// Represents a message from the client (master) to the server (slave).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestPdu(pub(crate) Request);

impl From<Request> for RequestPdu {
    fn from(from: Request) -> Self {
        RequestPdu(from)
    }
}

impl From<RequestPdu> for Request {
    fn from(from: RequestPdu) -> Self {
        from.0
    }
}

/// Represents a message from the server (slave) to the client (master).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponsePdu(pub(crate) Result<Response, ExceptionResponse>);

impl From<Response> for ResponsePdu {
    fn from(from: Response) -> Self {
        ResponsePdu(Ok(from))
    }
}

impl From<ExceptionResponse> for ResponsePdu {
    fn from(from: ExceptionResponse) -> Self {
        ResponsePdu(Err(from))
    }
}

impl From<Result<Response, ExceptionResponse>> for ResponsePdu {
    fn from(from: Result<Response, ExceptionResponse>) -> Self {
        ResponsePdu(from)
    }
}

impl From<ResponsePdu> for Result<Response, ExceptionResponse> {
    fn from(from: ResponsePdu) -> Self {
        from.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_codes() {
        assert_eq!(Request::ReadCoils(0, 1).function_code(), 0x01);
        assert_eq!(Request::ReadDiscreteInputs(0, 1).function_code(), 0x02);
        assert_eq!(Request::ReadHoldingRegisters(0, 1).function_code(), 0x03);
        assert_eq!(Request::ReadInputRegisters(0, 1).function_code(), 0x04);
        assert_eq!(Request::WriteSingleCoil(0, true).function_code(), 0x05);
        assert_eq!(Request::WriteSingleRegister(0, 0).function_code(), 0x06);
        assert_eq!(
            Request::Diagnostics(RETURN_QUERY_DATA, 0).function_code(),
            0x08
        );
        assert_eq!(
            Request::WriteMultipleCoils(0, vec![true]).function_code(),
            0x0F
        );
        assert_eq!(
            Request::WriteMultipleRegisters(0, vec![0]).function_code(),
            0x10
        );
        assert_eq!(
            Request::ReadWriteMultipleRegisters(0, 1, 0, vec![0]).function_code(),
            0x17
        );
        assert_eq!(Response::Diagnostics(RETURN_QUERY_DATA, 0).function_code(), 0x08);
    }

    mod validate {
        use super::*;

        #[test]
        fn read_register_quantity_bounds() {
            assert!(Request::ReadHoldingRegisters(0, 0).validate().is_err());
            assert!(Request::ReadHoldingRegisters(0, 1).validate().is_ok());
            assert!(Request::ReadHoldingRegisters(0, 125).validate().is_ok());
            assert!(Request::ReadHoldingRegisters(0, 126).validate().is_err());
            assert!(Request::ReadInputRegisters(0, 126).validate().is_err());
        }

        #[test]
        fn read_discrete_quantity_bounds() {
            assert!(Request::ReadCoils(0, 0).validate().is_err());
            assert!(Request::ReadCoils(0, 2000).validate().is_ok());
            assert!(Request::ReadCoils(0, 2001).validate().is_err());
            assert!(Request::ReadDiscreteInputs(0, 2001).validate().is_err());
        }

        #[test]
        fn write_multiple_bounds() {
            assert!(Request::WriteMultipleCoils(0, vec![]).validate().is_err());
            assert!(Request::WriteMultipleCoils(0, vec![true; 1968])
                .validate()
                .is_ok());
            assert!(Request::WriteMultipleCoils(0, vec![true; 1969])
                .validate()
                .is_err());

            assert!(Request::WriteMultipleRegisters(0, vec![]).validate().is_err());
            assert!(Request::WriteMultipleRegisters(0, vec![0; 123])
                .validate()
                .is_ok());
            assert!(Request::WriteMultipleRegisters(0, vec![0; 124])
                .validate()
                .is_err());
        }

        #[test]
        fn read_write_multiple_bounds() {
            assert!(Request::ReadWriteMultipleRegisters(0, 1, 0, vec![0; 121])
                .validate()
                .is_ok());
            assert!(Request::ReadWriteMultipleRegisters(0, 1, 0, vec![0; 122])
                .validate()
                .is_err());
            assert!(Request::ReadWriteMultipleRegisters(0, 126, 0, vec![0; 1])
                .validate()
                .is_err());
        }

        #[test]
        fn diagnostics_sub_function() {
            assert!(Request::Diagnostics(RETURN_QUERY_DATA, 0x0032)
                .validate()
                .is_ok());
            assert!(Request::Diagnostics(0x0001, 0).validate().is_err());
        }
    }

    mod validate_response {
        use super::*;

        #[test]
        fn read_register_count_must_match() {
            let req = Request::ReadHoldingRegisters(0, 3);
            assert!(req
                .validate_response(&Response::ReadHoldingRegisters(vec![1, 2, 3]))
                .is_ok());
            assert!(req
                .validate_response(&Response::ReadHoldingRegisters(vec![1, 2]))
                .is_err());
        }

        #[test]
        fn read_coils_may_carry_padding() {
            let req = Request::ReadCoils(0, 5);
            assert!(req
                .validate_response(&Response::ReadCoils(vec![false; 8]))
                .is_ok());
            assert!(req
                .validate_response(&Response::ReadCoils(vec![false; 4]))
                .is_err());
        }

        #[test]
        fn write_single_echo() {
            let req = Request::WriteSingleRegister(7, 0xABCD);
            assert!(req
                .validate_response(&Response::WriteSingleRegister(7, 0xABCD))
                .is_ok());
            assert!(req
                .validate_response(&Response::WriteSingleRegister(7, 0xABCE))
                .is_err());
            assert!(req
                .validate_response(&Response::WriteSingleRegister(8, 0xABCD))
                .is_err());
        }

        #[test]
        fn write_multiple_echo() {
            let req = Request::WriteMultipleRegisters(5, vec![1]);
            assert!(req
                .validate_response(&Response::WriteMultipleRegisters(5, 1))
                .is_ok());

            let err = req
                .validate_response(&Response::WriteMultipleRegisters(6, 1))
                .unwrap_err();
            assert_eq!(err.to_string(), "unexpected start address");

            assert!(req
                .validate_response(&Response::WriteMultipleRegisters(5, 2))
                .is_err());
        }

        #[test]
        fn mismatched_variant() {
            let req = Request::ReadCoils(0, 1);
            assert!(req
                .validate_response(&Response::ReadHoldingRegisters(vec![0]))
                .is_err());
        }
    }
}
