// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP framing, shared by the TCP and UDP bindings
//!
//! Frame = `{transaction id, protocol id 0, length, unit id, PDU}`,
//! where the length field counts the unit id plus the PDU. There is no
//! application-level checksum; the transport provides one.

use std::io;

use byteorder::{BigEndian, ByteOrder};
use tokio_util::codec::{Decoder, Encoder};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::frame::ip::*;

use super::*;

/// Six header bytes plus the unit id.
const HEADER_LEN: usize = 7;

const PROTOCOL_ID: u16 = 0x0000;

/// Split one ADU off `buf`, or wait for more bytes.
fn take_adu(buf: &mut BytesMut) -> io::Result<Option<(Header, Bytes)>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let protocol_id = BigEndian::read_u16(&buf[2..4]);
    if protocol_id != PROTOCOL_ID {
        return Err(frame_err(format!(
            "unsupported protocol id: {protocol_id}"
        )));
    }

    // The length field counts the unit id plus the PDU.
    let length = usize::from(BigEndian::read_u16(&buf[4..6]));
    if length == 0 {
        return Err(frame_err("empty MBAP payload"));
    }
    let pdu_len = length - 1;
    if buf.len() < HEADER_LEN + pdu_len {
        return Ok(None);
    }

    let hdr = Header {
        transaction_id: BigEndian::read_u16(&buf[0..2]),
        unit_id: buf[6],
    };
    buf.advance(HEADER_LEN);
    Ok(Some((hdr, buf.split_to(pdu_len).freeze())))
}

fn put_adu(hdr: Header, pdu_data: &Bytes, dst: &mut BytesMut) {
    dst.reserve(HEADER_LEN + pdu_data.len());
    dst.put_u16(hdr.transaction_id);
    dst.put_u16(PROTOCOL_ID);
    dst.put_u16(u16_len(pdu_data.len() + 1));
    dst.put_u8(hdr.unit_id);
    dst.put_slice(pdu_data);
}

/// Master-side codec: sends requests, receives responses.
#[derive(Debug, Default)]
pub(crate) struct ClientCodec;

/// Slave-side codec: receives requests, sends responses.
///
/// The PDU stays raw: requests with an unsupported function code must
/// still be answered with an exception response.
#[derive(Debug, Default)]
pub(crate) struct ServerCodec;

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<ResponseAdu>> {
        let Some((hdr, pdu_data)) = take_adu(buf)? else {
            return Ok(None);
        };
        let pdu = ResponsePdu::try_from(pdu_data)?;
        Ok(Some(ResponseAdu { hdr, pdu }))
    }
}

impl Decoder for ServerCodec {
    type Item = (Header, Bytes);
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<(Header, Bytes)>> {
        take_adu(buf)
    }
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = io::Error;

    fn encode(&mut self, adu: RequestAdu, dst: &mut BytesMut) -> io::Result<()> {
        let RequestAdu { hdr, pdu } = adu;
        put_adu(hdr, &pdu.into(), dst);
        Ok(())
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = io::Error;

    fn encode(&mut self, adu: ResponseAdu, dst: &mut BytesMut) -> io::Result<()> {
        let ResponseAdu { hdr, pdu } = adu;
        put_adu(hdr, &pdu.into(), dst);
        Ok(())
    }
}
