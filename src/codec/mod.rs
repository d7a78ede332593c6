// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport-independent PDU encoding and decoding
//!
//! The protocol data unit (function code plus function-specific payload)
//! is shared by all framings; the per-transport modules only add their
//! envelope (station byte + CRC, ASCII hex + LRC, or the MBAP header).
//! All numeric fields are big-endian, discrete payloads travel packed
//! LSB-first within each byte.

pub(crate) mod ascii;
pub(crate) mod ip;
pub(crate) mod rtu;

use std::io::{self, Error, ErrorKind};

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

use crate::frame::*;

/// Marks a response PDU as an exception answer.
pub(crate) const EXCEPTION_FLAG: u8 = 0x80;

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

pub(crate) fn frame_err(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidData, message.into())
}

pub(crate) fn unknown_function(function: u8) -> Error {
    frame_err(format!("unknown function code: 0x{function:0>2X}"))
}

/// Bytes needed to transport `count` discrete values.
pub(crate) fn bits_len(count: usize) -> usize {
    count / 8 + usize::from(count % 8 != 0)
}

/// Append `bits` to `dst`, packed LSB-first and padded with zeros.
fn put_bits(bits: &[Coil], dst: &mut BytesMut) {
    let mut byte = 0u8;
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            byte |= 1 << (i % 8);
        }
        if i % 8 == 7 {
            dst.put_u8(byte);
            byte = 0;
        }
    }
    if bits.len() % 8 != 0 {
        dst.put_u8(byte);
    }
}

/// Unpack the first `count` bits of `src`.
///
/// The caller has verified that `src` carries at least `count` bits.
fn take_bits(src: &[u8], count: usize) -> Vec<Coil> {
    (0..count)
        .map(|i| (src[i / 8] & (1 << (i % 8))) != 0)
        .collect()
}

fn coil_word(state: Coil) -> u16 {
    if state {
        COIL_ON
    } else {
        COIL_OFF
    }
}

fn word_coil(word: u16) -> io::Result<Coil> {
    match word {
        COIL_ON => Ok(true),
        COIL_OFF => Ok(false),
        _ => Err(frame_err(format!("invalid coil word: 0x{word:0>4X}"))),
    }
}

/// Narrow a payload length to the 16 bit wire field.
pub(crate) fn u16_len(len: usize) -> u16 {
    // Lengths are already bounded by the request validation.
    debug_assert!(len <= usize::from(u16::MAX));
    len as u16
}

/// Narrow a payload length to the 8 bit wire field.
pub(crate) fn u8_len(len: usize) -> u8 {
    // Lengths are already bounded by the request validation.
    debug_assert!(len <= usize::from(u8::MAX));
    len as u8
}

/// Bounds-checked field access into a PDU.
#[derive(Clone, Copy)]
struct Fields<'a>(&'a [u8]);

impl<'a> Fields<'a> {
    fn u8_at(self, at: usize) -> io::Result<u8> {
        self.0.get(at).copied().ok_or_else(|| frame_err("short PDU"))
    }

    fn u16_at(self, at: usize) -> io::Result<u16> {
        match self.0.get(at..at + 2) {
            Some(raw) => Ok(BigEndian::read_u16(raw)),
            None => Err(frame_err("short PDU")),
        }
    }

    fn bytes_at(self, at: usize, len: usize) -> io::Result<&'a [u8]> {
        self.0.get(at..at + len).ok_or_else(|| frame_err("short PDU"))
    }

    fn words_at(self, at: usize, count: usize) -> io::Result<Vec<Word>> {
        let raw = self.bytes_at(at, 2 * count)?;
        Ok(raw.chunks_exact(2).map(BigEndian::read_u16).collect())
    }
}

impl Request {
    /// Encoded PDU size in bytes.
    pub(crate) fn pdu_len(&self) -> usize {
        use Request::*;
        1 + match self {
            ReadCoils(..)
            | ReadDiscreteInputs(..)
            | ReadHoldingRegisters(..)
            | ReadInputRegisters(..)
            | WriteSingleCoil(..)
            | WriteSingleRegister(..)
            | Diagnostics(..) => 4,
            WriteMultipleCoils(_, coils) => 5 + bits_len(coils.len()),
            WriteMultipleRegisters(_, words) => 5 + 2 * words.len(),
            ReadWriteMultipleRegisters(_, _, _, words) => 9 + 2 * words.len(),
        }
    }
}

impl Response {
    /// Encoded PDU size in bytes.
    pub(crate) fn pdu_len(&self) -> usize {
        use Response::*;
        1 + match self {
            ReadCoils(bits) | ReadDiscreteInputs(bits) => 1 + bits_len(bits.len()),
            ReadHoldingRegisters(words)
            | ReadInputRegisters(words)
            | ReadWriteMultipleRegisters(words) => 1 + 2 * words.len(),
            WriteSingleCoil(..)
            | WriteSingleRegister(..)
            | WriteMultipleCoils(..)
            | WriteMultipleRegisters(..)
            | Diagnostics(..) => 4,
        }
    }
}

impl From<Request> for Bytes {
    fn from(req: Request) -> Self {
        let mut dst = BytesMut::with_capacity(req.pdu_len());
        dst.put_u8(req.function_code());
        use Request::*;
        match req {
            ReadCoils(start, count)
            | ReadDiscreteInputs(start, count)
            | ReadHoldingRegisters(start, count)
            | ReadInputRegisters(start, count) => {
                dst.put_u16(start);
                dst.put_u16(count);
            }
            WriteSingleCoil(address, state) => {
                dst.put_u16(address);
                dst.put_u16(coil_word(state));
            }
            WriteSingleRegister(address, word) => {
                dst.put_u16(address);
                dst.put_u16(word);
            }
            Diagnostics(sub_function, data) => {
                dst.put_u16(sub_function);
                dst.put_u16(data);
            }
            WriteMultipleCoils(start, coils) => {
                dst.put_u16(start);
                dst.put_u16(u16_len(coils.len()));
                dst.put_u8(u8_len(bits_len(coils.len())));
                put_bits(&coils, &mut dst);
            }
            WriteMultipleRegisters(start, words) => {
                dst.put_u16(start);
                dst.put_u16(u16_len(words.len()));
                dst.put_u8(u8_len(2 * words.len()));
                for word in words {
                    dst.put_u16(word);
                }
            }
            ReadWriteMultipleRegisters(read_start, read_count, write_start, words) => {
                dst.put_u16(read_start);
                dst.put_u16(read_count);
                dst.put_u16(write_start);
                dst.put_u16(u16_len(words.len()));
                dst.put_u8(u8_len(2 * words.len()));
                for word in words {
                    dst.put_u16(word);
                }
            }
        }
        dst.freeze()
    }
}

impl From<Response> for Bytes {
    fn from(rsp: Response) -> Self {
        let mut dst = BytesMut::with_capacity(rsp.pdu_len());
        dst.put_u8(rsp.function_code());
        use Response::*;
        match rsp {
            ReadCoils(bits) | ReadDiscreteInputs(bits) => {
                dst.put_u8(u8_len(bits_len(bits.len())));
                put_bits(&bits, &mut dst);
            }
            ReadHoldingRegisters(words)
            | ReadInputRegisters(words)
            | ReadWriteMultipleRegisters(words) => {
                dst.put_u8(u8_len(2 * words.len()));
                for word in words {
                    dst.put_u16(word);
                }
            }
            WriteSingleCoil(address, state) => {
                dst.put_u16(address);
                dst.put_u16(coil_word(state));
            }
            WriteSingleRegister(address, word) => {
                dst.put_u16(address);
                dst.put_u16(word);
            }
            WriteMultipleCoils(start, count) | WriteMultipleRegisters(start, count) => {
                dst.put_u16(start);
                dst.put_u16(count);
            }
            Diagnostics(sub_function, data) => {
                dst.put_u16(sub_function);
                dst.put_u16(data);
            }
        }
        dst.freeze()
    }
}

impl From<ExceptionResponse> for Bytes {
    fn from(rsp: ExceptionResponse) -> Self {
        debug_assert!(rsp.function & EXCEPTION_FLAG == 0);
        let mut dst = BytesMut::with_capacity(2);
        dst.put_u8(rsp.function | EXCEPTION_FLAG);
        dst.put_u8(rsp.exception as u8);
        dst.freeze()
    }
}

impl From<RequestPdu> for Bytes {
    fn from(pdu: RequestPdu) -> Self {
        pdu.0.into()
    }
}

impl From<ResponsePdu> for Bytes {
    fn from(pdu: ResponsePdu) -> Self {
        match pdu.0 {
            Ok(rsp) => rsp.into(),
            Err(rsp) => rsp.into(),
        }
    }
}

impl TryFrom<Bytes> for Request {
    type Error = Error;

    fn try_from(bytes: Bytes) -> io::Result<Self> {
        let f = Fields(&bytes);
        let function = f.u8_at(0)?;
        let req = match function {
            0x01 => Request::ReadCoils(f.u16_at(1)?, f.u16_at(3)?),
            0x02 => Request::ReadDiscreteInputs(f.u16_at(1)?, f.u16_at(3)?),
            0x03 => Request::ReadHoldingRegisters(f.u16_at(1)?, f.u16_at(3)?),
            0x04 => Request::ReadInputRegisters(f.u16_at(1)?, f.u16_at(3)?),
            0x05 => Request::WriteSingleCoil(f.u16_at(1)?, word_coil(f.u16_at(3)?)?),
            0x06 => Request::WriteSingleRegister(f.u16_at(1)?, f.u16_at(3)?),
            0x08 => Request::Diagnostics(f.u16_at(1)?, f.u16_at(3)?),
            0x0F => {
                let count = usize::from(f.u16_at(3)?);
                if usize::from(f.u8_at(5)?) != bits_len(count) {
                    return Err(frame_err("coil byte count contradicts the quantity"));
                }
                let packed = f.bytes_at(6, bits_len(count))?;
                Request::WriteMultipleCoils(f.u16_at(1)?, take_bits(packed, count))
            }
            0x10 => {
                let count = usize::from(f.u16_at(3)?);
                if usize::from(f.u8_at(5)?) != 2 * count {
                    return Err(frame_err("register byte count contradicts the quantity"));
                }
                Request::WriteMultipleRegisters(f.u16_at(1)?, f.words_at(6, count)?)
            }
            0x17 => {
                let write_count = usize::from(f.u16_at(7)?);
                if usize::from(f.u8_at(9)?) != 2 * write_count {
                    return Err(frame_err("register byte count contradicts the quantity"));
                }
                Request::ReadWriteMultipleRegisters(
                    f.u16_at(1)?,
                    f.u16_at(3)?,
                    f.u16_at(5)?,
                    f.words_at(10, write_count)?,
                )
            }
            _ => return Err(unknown_function(function)),
        };
        Ok(req)
    }
}

impl TryFrom<Bytes> for RequestPdu {
    type Error = Error;

    fn try_from(bytes: Bytes) -> io::Result<Self> {
        Ok(Request::try_from(bytes)?.into())
    }
}

impl TryFrom<Bytes> for Response {
    type Error = Error;

    fn try_from(bytes: Bytes) -> io::Result<Self> {
        let f = Fields(&bytes);
        let function = f.u8_at(0)?;
        let rsp = match function {
            0x01 | 0x02 => {
                let byte_count = usize::from(f.u8_at(1)?);
                let packed = f.bytes_at(2, byte_count)?;
                // The exact requested quantity is unknown here: hand
                // over every transported bit.
                let bits = take_bits(packed, 8 * byte_count);
                if function == 0x01 {
                    Response::ReadCoils(bits)
                } else {
                    Response::ReadDiscreteInputs(bits)
                }
            }
            0x03 | 0x04 | 0x17 => {
                let byte_count = usize::from(f.u8_at(1)?);
                if byte_count % 2 != 0 {
                    return Err(frame_err("odd register byte count"));
                }
                let words = f.words_at(2, byte_count / 2)?;
                match function {
                    0x03 => Response::ReadHoldingRegisters(words),
                    0x04 => Response::ReadInputRegisters(words),
                    _ => Response::ReadWriteMultipleRegisters(words),
                }
            }
            0x05 => Response::WriteSingleCoil(f.u16_at(1)?, word_coil(f.u16_at(3)?)?),
            0x06 => Response::WriteSingleRegister(f.u16_at(1)?, f.u16_at(3)?),
            0x08 => Response::Diagnostics(f.u16_at(1)?, f.u16_at(3)?),
            0x0F => Response::WriteMultipleCoils(f.u16_at(1)?, f.u16_at(3)?),
            0x10 => Response::WriteMultipleRegisters(f.u16_at(1)?, f.u16_at(3)?),
            _ => return Err(unknown_function(function)),
        };
        Ok(rsp)
    }
}

impl TryFrom<Bytes> for ExceptionResponse {
    type Error = Error;

    fn try_from(bytes: Bytes) -> io::Result<Self> {
        let f = Fields(&bytes);
        let function = f.u8_at(0)?;
        if function & EXCEPTION_FLAG == 0 {
            return Err(frame_err("exception flag not set"));
        }
        Ok(ExceptionResponse {
            function: function & !EXCEPTION_FLAG,
            exception: ExceptionCode::try_from(f.u8_at(1)?)?,
        })
    }
}

impl TryFrom<u8> for ExceptionCode {
    type Error = Error;

    fn try_from(code: u8) -> io::Result<Self> {
        use ExceptionCode::*;
        let code = match code {
            1 => IllegalFunction,
            2 => IllegalDataAddress,
            3 => IllegalDataValue,
            4 => ServerDeviceFailure,
            5 => Acknowledge,
            6 => ServerDeviceBusy,
            8 => MemoryParityError,
            10 => GatewayPathUnavailable,
            11 => GatewayTargetDevice,
            _ => return Err(frame_err(format!("unknown exception code: {code}"))),
        };
        Ok(code)
    }
}

impl TryFrom<Bytes> for ResponsePdu {
    type Error = Error;

    fn try_from(bytes: Bytes) -> io::Result<Self> {
        let function = Fields(&bytes).u8_at(0)?;
        if function & EXCEPTION_FLAG == 0 {
            Ok(Response::try_from(bytes)?.into())
        } else {
            Ok(ExceptionResponse::try_from(bytes)?.into())
        }
    }
}
