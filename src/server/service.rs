// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{future::Future, rc::Rc, sync::Arc};

/// A Modbus server service.
pub trait Service {
    /// Requests handled by the service.
    type Request;

    /// Responses given by the service.
    type Response;

    /// Exception codes answered for rejected requests.
    ///
    /// Unexpected internal failures should be reported as
    /// [`ExceptionCode::ServerDeviceFailure`](crate::ExceptionCode::ServerDeviceFailure).
    type Exception;

    /// The future response value.
    type Future: Future<Output = Result<Self::Response, Self::Exception>> + Send;

    /// Process the request and return the response asynchronously.
    fn call(&self, req: Self::Request) -> Self::Future;
}

impl<S: Service + ?Sized + 'static> Service for Box<S> {
    type Request = S::Request;
    type Response = S::Response;
    type Exception = S::Exception;
    type Future = S::Future;

    fn call(&self, request: S::Request) -> Self::Future {
        (**self).call(request)
    }
}

impl<S: Service + ?Sized + 'static> Service for Rc<S> {
    type Request = S::Request;
    type Response = S::Response;
    type Exception = S::Exception;
    type Future = S::Future;

    fn call(&self, request: S::Request) -> Self::Future {
        (**self).call(request)
    }
}

impl<S: Service + ?Sized + 'static> Service for Arc<S> {
    type Request = S::Request;
    type Response = S::Response;
    type Exception = S::Exception;
    type Future = S::Future;

    fn call(&self, request: S::Request) -> Self::Future {
        (**self).call(request)
    }
}
