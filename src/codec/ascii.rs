// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! ASCII framing: `':'` + uppercase hex + LRC + CR LF

use std::io::{Error, ErrorKind, Result};

use tokio_util::codec::{Decoder, Encoder};

use bytes::{BufMut, Bytes, BytesMut};

use crate::{frame::serial::*, slave::SlaveId};

use super::*;

const FRAME_START: u8 = b':';
const FRAME_END: &[u8] = b"\r\n";

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// A frame must at least carry slave id, function code and LRC.
const MIN_FRAME_LEN: usize = 3;

/// Longitudinal redundancy check: two's complement of the byte sum.
pub(crate) fn calc_lrc(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
        .wrapping_neg()
}

fn check_lrc(data: &[u8], expected_lrc: u8) -> Result<()> {
    let actual_lrc = calc_lrc(data);
    if expected_lrc != actual_lrc {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("Invalid LRC: expected = 0x{expected_lrc:0>2X}, actual = 0x{actual_lrc:0>2X}"),
        ));
    }
    Ok(())
}

/// Decode a hex character sequence into raw bytes.
///
/// Sequences of odd length cannot encode whole bytes and are rejected.
pub(crate) fn bytes_from_hex(hex: &[u8]) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(Error::new(
            ErrorKind::InvalidData,
            "Odd number of hex characters",
        ));
    }
    hex.chunks_exact(2)
        .map(|pair| {
            let digits = std::str::from_utf8(pair)
                .map_err(|_| Error::new(ErrorKind::InvalidData, "Invalid hex character"))?;
            u8::from_str_radix(digits, 16)
                .map_err(|_| Error::new(ErrorKind::InvalidData, "Invalid hex character"))
        })
        .collect()
}

fn put_hex(buf: &mut BytesMut, bytes: &[u8]) {
    for b in bytes {
        buf.put_u8(HEX_DIGITS[usize::from(b >> 4)]);
        buf.put_u8(HEX_DIGITS[usize::from(b & 0x0F)]);
    }
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct FrameDecoder;

impl FrameDecoder {
    pub(crate) fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<(SlaveId, Bytes)>> {
        // Accumulate characters until the CR LF terminator arrives.
        let Some(end) = buf.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let frame = buf.split_to(end + 1);

        let Some(start) = frame.iter().position(|&b| b == FRAME_START) else {
            return Err(Error::new(ErrorKind::InvalidData, "Missing frame start"));
        };
        if start > 0 {
            log::warn!("Dropped {start} byte(s) before frame start");
        }
        if frame.len() < start + FRAME_END.len() + 1
            || frame[frame.len() - 2] != FRAME_END[0]
        {
            return Err(Error::new(ErrorKind::InvalidData, "Missing CR LF"));
        }

        let raw = bytes_from_hex(&frame[start + 1..frame.len() - FRAME_END.len()])?;
        if raw.len() < MIN_FRAME_LEN {
            return Err(Error::new(ErrorKind::InvalidData, "Truncated frame"));
        }

        let (data, lrc) = raw.split_at(raw.len() - 1);
        check_lrc(data, lrc[0])?;

        let slave_id = data[0];
        let pdu_data = Bytes::copy_from_slice(&data[1..]);

        Ok(Some((slave_id, pdu_data)))
    }
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ClientCodec {
    decoder: FrameDecoder,
}

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct ServerCodec {
    decoder: FrameDecoder,
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>> {
        let Some((slave_id, pdu_data)) = self.decoder.decode(buf)? else {
            return Ok(None);
        };
        let hdr = Header { slave_id };
        let pdu = ResponsePdu::try_from(pdu_data)?;
        Ok(Some(ResponseAdu { hdr, pdu }))
    }
}

impl Decoder for ServerCodec {
    type Item = (Header, Bytes);
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<(Header, Bytes)>> {
        let Some((slave_id, pdu_data)) = self.decoder.decode(buf)? else {
            return Ok(None);
        };
        Ok(Some((Header { slave_id }, pdu_data)))
    }
}

fn encode_frame(slave_id: SlaveId, pdu_data: &Bytes, buf: &mut BytesMut) {
    buf.reserve((pdu_data.len() + 2) * 2 + 3);
    buf.put_u8(FRAME_START);
    put_hex(buf, &[slave_id]);
    put_hex(buf, pdu_data);
    // The LRC covers the slave id together with the PDU.
    let lrc = calc_lrc(pdu_data).wrapping_sub(slave_id);
    put_hex(buf, &[lrc]);
    buf.put_slice(FRAME_END);
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu, buf: &mut BytesMut) -> Result<()> {
        let RequestAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = pdu.into();
        encode_frame(hdr.slave_id, &pdu_data, buf);
        Ok(())
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> Result<()> {
        let ResponseAdu { hdr, pdu } = adu;
        let pdu_data: Bytes = pdu.into();
        encode_frame(hdr.slave_id, &pdu_data, buf);
        Ok(())
    }
}
