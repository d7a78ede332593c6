// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus slave (server) engines

pub mod dispatch;
pub mod serial;
pub mod service;
pub mod tcp;
pub mod udp;

pub use self::{dispatch::StoreService, service::Service};

use std::panic::AssertUnwindSafe;

use bytes::Bytes;
use futures_util::future::FutureExt as _;

use crate::{
    frame::{ExceptionCode, ExceptionResponse, Request, RequestPdu, Response, ResponsePdu},
    slave::Slave,
};

/// Decode and dispatch one raw request PDU.
///
/// Returns `None` when no response must be written: the request was
/// addressed to another unit, or it was a broadcast (which is applied
/// but never answered). Undecodable PDUs with a known function code are
/// answered with exception 3, unknown function codes with exception 1,
/// and a panicking handler with exception 4.
pub(crate) async fn respond<S>(service: &S, slave: Slave, unit_id: u8, pdu_data: Bytes) -> Option<ResponsePdu>
where
    S: Service<Request = Request, Response = Response, Exception = ExceptionCode>,
{
    if !slave.accepts(unit_id) {
        log::debug!("Ignoring request for unit {unit_id}");
        return None;
    }
    let broadcast = Slave(unit_id).is_broadcast();

    let function = pdu_data.first().copied()?;
    if function >= 0x80 {
        // The exception bit can never be part of a request.
        log::warn!("Ignoring request with invalid function code: 0x{function:0>2X}");
        return None;
    }
    let rsp_pdu = match RequestPdu::try_from(pdu_data) {
        Ok(RequestPdu(req)) => {
            let call = AssertUnwindSafe(async { service.call(req).await });
            match call.catch_unwind().await {
                Ok(Ok(rsp)) => ResponsePdu(Ok(rsp)),
                Ok(Err(exception)) => ExceptionResponse {
                    function,
                    exception,
                }
                .into(),
                Err(_) => {
                    log::error!("Request handler panicked");
                    ExceptionResponse {
                        function,
                        exception: ExceptionCode::ServerDeviceFailure,
                    }
                    .into()
                }
            }
        }
        Err(err) => {
            log::warn!("Failed to decode request PDU: {err}");
            let exception = if is_supported_function(function) {
                ExceptionCode::IllegalDataValue
            } else {
                ExceptionCode::IllegalFunction
            };
            ExceptionResponse {
                function,
                exception,
            }
            .into()
        }
    };

    if broadcast {
        // One-way: every slave applies the request, nobody answers.
        return None;
    }
    Some(rsp_pdu)
}

const fn is_supported_function(function: u8) -> bool {
    matches!(function, 0x01..=0x06 | 0x08 | 0x0F | 0x10 | 0x17)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::future;

    #[derive(Clone)]
    struct EchoService;

    impl Service for EchoService {
        type Request = Request;
        type Response = Response;
        type Exception = ExceptionCode;
        type Future = future::Ready<Result<Self::Response, Self::Exception>>;

        fn call(&self, req: Self::Request) -> Self::Future {
            let rsp = match req {
                Request::ReadInputRegisters(_, cnt) => {
                    Ok(Response::ReadInputRegisters(vec![0; cnt as usize]))
                }
                _ => Err(ExceptionCode::IllegalFunction),
            };
            future::ready(rsp)
        }
    }

    #[tokio::test]
    async fn ignores_foreign_units() {
        let pdu: Bytes = Request::ReadInputRegisters(0, 1).into();
        let rsp = respond(&EchoService, Slave(5), 6, pdu).await;
        assert!(rsp.is_none());
    }

    #[tokio::test]
    async fn applies_broadcasts_without_answering() {
        let pdu: Bytes = Request::ReadInputRegisters(0, 1).into();
        let rsp = respond(&EchoService, Slave(5), 0, pdu).await;
        assert!(rsp.is_none());
    }

    #[tokio::test]
    async fn answers_matching_unit() {
        let pdu: Bytes = Request::ReadInputRegisters(0, 3).into();
        let rsp = respond(&EchoService, Slave(5), 5, pdu).await.unwrap();
        assert_eq!(rsp.0.unwrap(), Response::ReadInputRegisters(vec![0; 3]));
    }

    #[tokio::test]
    async fn unknown_function_yields_exception_1() {
        let pdu = Bytes::from_static(&[0x65, 0x00]);
        let rsp = respond(&EchoService, Slave(5), 5, pdu).await.unwrap();
        let err = rsp.0.unwrap_err();
        assert_eq!(err.function, 0x65);
        assert_eq!(err.exception, ExceptionCode::IllegalFunction);
    }

    #[tokio::test]
    async fn panicking_handler_yields_exception_4() {
        #[derive(Clone)]
        struct PanickyService;

        impl Service for PanickyService {
            type Request = Request;
            type Response = Response;
            type Exception = ExceptionCode;
            type Future = future::Ready<Result<Self::Response, Self::Exception>>;

            fn call(&self, _: Self::Request) -> Self::Future {
                panic!("boom");
            }
        }

        let pdu: Bytes = Request::ReadInputRegisters(0, 1).into();
        let rsp = respond(&PanickyService, Slave(5), 5, pdu).await.unwrap();
        let err = rsp.0.unwrap_err();
        assert_eq!(err.function, 0x04);
        assert_eq!(err.exception, ExceptionCode::ServerDeviceFailure);
    }

    #[tokio::test]
    async fn malformed_known_function_yields_exception_3() {
        // Write-multiple-registers whose byte count contradicts the
        // quantity.
        let pdu = Bytes::from_static(&[0x10, 0x00, 0x06, 0x00, 0x02, 0x05, 0xAB, 0xCD, 0xEF, 0x12]);
        let rsp = respond(&EchoService, Slave(5), 5, pdu).await.unwrap();
        let err = rsp.0.unwrap_err();
        assert_eq!(err.function, 0x10);
        assert_eq!(err.exception, ExceptionCode::IllegalDataValue);
    }
}
