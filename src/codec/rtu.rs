// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU framing: `{station, PDU, CRC-16}` with length inference per
//! function code
//!
//! Serial bytes arrive without any delimiter, so the decoder first
//! derives the frame length from the function code (and, for the
//! variable-size messages, the embedded byte count), then verifies the
//! trailing checksum. Anything that fails either step is treated as
//! line noise and skipped one byte at a time.

use std::io;

use smallvec::SmallVec;
use tokio_util::codec::{Decoder, Encoder};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{frame::serial::*, slave::SlaveId};

use super::*;

/// "The maximum size of a Modbus RTU frame is 256 bytes."
/// (Modbus over Serial Line Specification and Implementation Guide V1.02)
const MAX_FRAME_LEN: usize = 256;

const CRC_LEN: usize = 2;

/// Station byte plus checksum.
const FRAME_OVERHEAD: usize = 1 + CRC_LEN;

/// CRC-16 of the RTU line discipline: polynomial 0xA001 (reflected),
/// seeded with 0xFFFF, returned in wire order (low byte first).
pub(crate) fn crc16(data: &[u8]) -> [u8; 2] {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= u16::from(*byte);
        for _ in 0..8 {
            crc = if crc & 1 == 0 {
                crc >> 1
            } else {
                (crc >> 1) ^ 0xA001
            };
        }
    }
    crc.to_le_bytes()
}

type FrameLen = fn(&[u8]) -> io::Result<Option<usize>>;

/// Total length of the request frame at the head of `buf`, if it can
/// be derived yet.
fn request_frame_len(buf: &[u8]) -> io::Result<Option<usize>> {
    let Some(&function) = buf.get(1) else {
        return Ok(None);
    };
    let pdu_len = match function {
        0x01..=0x06 | 0x08 => Some(5),
        0x0F | 0x10 => buf.get(6).map(|&count| 6 + usize::from(count)),
        0x17 => buf.get(10).map(|&count| 10 + usize::from(count)),
        _ => return Err(unknown_function(function)),
    };
    Ok(pdu_len.map(|len| len + FRAME_OVERHEAD))
}

/// Total length of the response frame at the head of `buf`, if it can
/// be derived yet.
fn response_frame_len(buf: &[u8]) -> io::Result<Option<usize>> {
    let Some(&function) = buf.get(1) else {
        return Ok(None);
    };
    let pdu_len = match function {
        0x01..=0x04 | 0x17 => buf.get(2).map(|&count| 2 + usize::from(count)),
        0x05 | 0x06 | 0x08 | 0x0F | 0x10 => Some(5),
        f if f & EXCEPTION_FLAG != 0 => Some(2),
        _ => return Err(unknown_function(function)),
    };
    Ok(pdu_len.map(|len| len + FRAME_OVERHEAD))
}

/// Split one checksummed frame off `buf`.
///
/// Leaves the buffer untouched unless a complete, valid frame is
/// consumed, so the caller can resynchronize byte by byte.
fn try_frame(frame_len: FrameLen, buf: &mut BytesMut) -> io::Result<Option<(SlaveId, Bytes)>> {
    let Some(len) = frame_len(buf)? else {
        return Ok(None);
    };
    if buf.len() < len {
        // Wait for the rest of the frame
        return Ok(None);
    }

    let (body, checksum) = buf[..len].split_at(len - CRC_LEN);
    let expected = crc16(body);
    if checksum != &expected[..] {
        return Err(frame_err(format!(
            "checksum mismatch: received {checksum:02X?}, computed {expected:02X?}"
        )));
    }

    let frame = buf.split_to(len).freeze();
    let station = frame[0];
    let pdu_data = frame.slice(1..len - CRC_LEN);
    Ok(Some((station, pdu_data)))
}

/// Skips line noise until a valid frame emerges.
#[derive(Debug, Default)]
struct Resync {
    skipped: SmallVec<[u8; MAX_FRAME_LEN]>,
}

impl Resync {
    fn take_frame(
        &mut self,
        frame_len: FrameLen,
        buf: &mut BytesMut,
    ) -> io::Result<Option<(SlaveId, Bytes)>> {
        loop {
            let err = match try_frame(frame_len, buf) {
                Ok(None) => return Ok(None),
                Ok(Some(frame)) => {
                    if !self.skipped.is_empty() {
                        log::warn!(
                            "Frame decoded after skipping {} byte(s) of noise: {:02X?}",
                            self.skipped.len(),
                            self.skipped
                        );
                        self.skipped.clear();
                    }
                    return Ok(Some(frame));
                }
                Err(err) => err,
            };

            if self.skipped.len() >= MAX_FRAME_LEN {
                // A whole frame's worth of bytes without a single
                // decodable frame among them.
                self.skipped.clear();
                return Err(err);
            }
            log::debug!("Skipping unframed byte: {err}");
            self.skipped.push(buf[0]);
            buf.advance(1);
        }
    }
}

/// Master-side codec: sends requests, receives responses.
#[derive(Debug, Default)]
pub(crate) struct ClientCodec {
    resync: Resync,
}

/// Slave-side codec: receives requests, sends responses.
///
/// The PDU stays raw so the dispatcher decides how to answer it.
#[derive(Debug, Default)]
pub(crate) struct ServerCodec {
    resync: Resync,
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<ResponseAdu>> {
        let Some((slave_id, pdu_data)) = self.resync.take_frame(response_frame_len, buf)? else {
            return Ok(None);
        };
        // The checksum already vouched for these bytes.
        let pdu = ResponsePdu::try_from(pdu_data)?;
        Ok(Some(ResponseAdu {
            hdr: Header { slave_id },
            pdu,
        }))
    }
}

impl Decoder for ServerCodec {
    type Item = (Header, Bytes);
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<(Header, Bytes)>> {
        let Some((slave_id, pdu_data)) = self.resync.take_frame(request_frame_len, buf)? else {
            return Ok(None);
        };
        Ok(Some((Header { slave_id }, pdu_data)))
    }
}

fn put_frame(station: SlaveId, pdu_data: &Bytes, dst: &mut BytesMut) {
    dst.reserve(pdu_data.len() + FRAME_OVERHEAD);
    // The checksum covers this frame only, not earlier buffer contents.
    let frame_start = dst.len();
    dst.put_u8(station);
    dst.put_slice(pdu_data);
    let crc = crc16(&dst[frame_start..]);
    dst.put_slice(&crc);
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = io::Error;

    fn encode(&mut self, adu: RequestAdu, dst: &mut BytesMut) -> io::Result<()> {
        let RequestAdu { hdr, pdu } = adu;
        put_frame(hdr.slave_id, &pdu.into(), dst);
        Ok(())
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = io::Error;

    fn encode(&mut self, adu: ResponseAdu, dst: &mut BytesMut) -> io::Result<()> {
        let ResponseAdu { hdr, pdu } = adu;
        put_frame(hdr.slave_id, &pdu.into(), dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Request, Response};

    /// A checksummed frame around `body`.
    fn framed(body: &[u8]) -> BytesMut {
        let mut buf = BytesMut::from(body);
        buf.extend_from_slice(&crc16(body));
        buf
    }

    #[test]
    fn crc_of_nothing_is_the_seed() {
        assert_eq!(crc16(&[]), [0xFF, 0xFF]);
    }

    #[test]
    fn crc_known_vector() {
        assert_eq!(crc16(&[0x01, 0x01]), [0xC1, 0xE0]);
    }

    #[test]
    fn request_length_inference() {
        for function in [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x08] {
            let buf = [0x01, function, 0, 0, 0, 0];
            assert_eq!(request_frame_len(&buf).unwrap(), Some(8));
        }

        // Variable-size writes need their byte-count field first
        assert_eq!(request_frame_len(&[0x01, 0x0F, 0, 0, 0, 0]).unwrap(), None);
        assert_eq!(
            request_frame_len(&[0x01, 0x0F, 0, 0, 0, 2, 1]).unwrap(),
            Some(10)
        );
        assert_eq!(
            request_frame_len(&[0x01, 0x10, 0, 0, 0, 1, 2]).unwrap(),
            Some(11)
        );
        assert_eq!(
            request_frame_len(&[0x01, 0x17, 0, 0, 0, 0, 0, 0, 0, 1, 2]).unwrap(),
            Some(15)
        );

        // Nothing decidable without the function code
        assert_eq!(request_frame_len(&[0x01]).unwrap(), None);

        // A request with an unsupported function cannot be delimited
        assert!(request_frame_len(&[0x01, 0x2B, 0, 0]).is_err());
    }

    #[test]
    fn response_length_inference() {
        // Reads announce their payload size
        assert_eq!(response_frame_len(&[0x01, 0x03]).unwrap(), None);
        assert_eq!(response_frame_len(&[0x01, 0x03, 6]).unwrap(), Some(11));
        assert_eq!(response_frame_len(&[0x01, 0x01, 2]).unwrap(), Some(7));
        assert_eq!(response_frame_len(&[0x01, 0x17, 4]).unwrap(), Some(9));

        // Echoes are fixed-size
        for function in [0x05, 0x06, 0x08, 0x0F, 0x10] {
            let buf = [0x01, function];
            assert_eq!(response_frame_len(&buf).unwrap(), Some(8));
        }

        // Exception responses carry a single code byte
        assert_eq!(response_frame_len(&[0x01, 0x83]).unwrap(), Some(5));

        assert!(response_frame_len(&[0x01, 0x2B]).is_err());
    }

    #[test]
    fn master_frames_carry_station_and_checksum() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(
                RequestAdu {
                    hdr: Header { slave_id: 0x01 },
                    pdu: Request::ReadHoldingRegisters(0x0000, 3).into(),
                },
                &mut buf,
            )
            .unwrap();

        assert_eq!(&buf[..6], [0x01, 0x03, 0x00, 0x00, 0x00, 0x03]);
        assert_eq!(&buf[6..], &crc16(&buf[..6])[..]);
    }

    #[test]
    fn master_decodes_a_register_response() {
        let mut codec = ClientCodec::default();
        let mut buf = framed(&[0x01, 0x03, 0x06, 0x00, 0x01, 0x00, 0x02, 0x00, 0x03]);

        let ResponseAdu { hdr, pdu } = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(hdr.slave_id, 0x01);
        assert_eq!(
            pdu.0.unwrap(),
            Response::ReadHoldingRegisters(vec![1, 2, 3])
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let mut codec = ClientCodec::default();
        let full = framed(&[0x01, 0x03, 0x06, 0x00, 0x01, 0x00, 0x02, 0x00, 0x03]);

        let mut buf = BytesMut::new();
        for byte in &full[..full.len() - 1] {
            buf.put_u8(*byte);
            assert!(codec.decode(&mut buf).unwrap().is_none());
        }

        buf.put_u8(full[full.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn noise_before_a_frame_is_skipped() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(&[0x42, 0x43][..]);
        buf.extend_from_slice(&framed(&[0x01, 0x03, 0x02, 0x12, 0x34]));

        let ResponseAdu { hdr, pdu } = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(hdr.slave_id, 0x01);
        assert_eq!(pdu.0.unwrap(), Response::ReadHoldingRegisters(vec![0x1234]));
    }

    #[test]
    fn corrupted_checksum_never_yields_a_frame() {
        let mut codec = ClientCodec::default();
        let mut buf = framed(&[0x01, 0x05, 0x00, 0x0A, 0xFF, 0x00]);
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;

        // The damaged frame drains away byte by byte without ever
        // being accepted.
        let decoded = codec.decode(&mut buf);
        assert!(matches!(decoded, Ok(None) | Err(_)));
    }

    #[test]
    fn exception_frames_decode_to_the_error_arm() {
        let mut codec = ClientCodec::default();
        let mut buf = framed(&[0x11, 0x83, 0x02]);

        let ResponseAdu { hdr, pdu } = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(hdr.slave_id, 0x11);
        let rsp = pdu.0.unwrap_err();
        assert_eq!(rsp.function, 0x03);
        assert_eq!(rsp.exception, ExceptionCode::IllegalDataAddress);
    }

    #[test]
    fn slave_round_trip() {
        let mut master = ClientCodec::default();
        let mut slave = ServerCodec::default();

        let mut line = BytesMut::new();
        master
            .encode(
                RequestAdu {
                    hdr: Header { slave_id: 0x11 },
                    pdu: Request::WriteSingleRegister(0x0001, 0x0003).into(),
                },
                &mut line,
            )
            .unwrap();

        let (hdr, pdu_data) = slave.decode(&mut line).unwrap().unwrap();
        assert_eq!(hdr.slave_id, 0x11);
        let req = Request::try_from(pdu_data).unwrap();
        assert_eq!(req, Request::WriteSingleRegister(0x0001, 0x0003));

        let mut answer = BytesMut::new();
        slave
            .encode(
                ResponseAdu {
                    hdr,
                    pdu: Response::WriteSingleRegister(0x0001, 0x0003).into(),
                },
                &mut answer,
            )
            .unwrap();

        let ResponseAdu { pdu, .. } = master.decode(&mut answer).unwrap().unwrap();
        assert_eq!(
            pdu.0.unwrap(),
            Response::WriteSingleRegister(0x0001, 0x0003)
        );
    }

    #[test]
    fn slave_ignores_partial_write_requests() {
        let mut codec = ServerCodec::default();
        // Write-multiple-registers without its byte-count field yet
        let mut buf = BytesMut::from(&[0x11, 0x10, 0x00, 0x01][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 4);
    }
}
