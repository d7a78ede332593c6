// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types

///////////////////////////////////////////////////////////////////
/// Modules
///////////////////////////////////////////////////////////////////
pub use crate::{client, observe, server, store};

#[allow(missing_docs)]
pub mod sync {
    pub use crate::client::sync::*;
}

#[allow(missing_docs)]
pub mod rtu {
    pub use crate::client::rtu::*;

    pub use crate::server::serial::Server;
}

#[allow(missing_docs)]
pub mod ascii {
    pub use crate::client::ascii::*;
}

#[allow(missing_docs)]
pub mod tcp {
    pub use crate::client::tcp::*;

    pub use crate::server::tcp::{Server, ServerEvent};
}

#[allow(missing_docs)]
pub mod udp {
    pub use crate::client::udp::*;

    pub use crate::server::udp::Server;
}

///////////////////////////////////////////////////////////////////
/// Structs
///////////////////////////////////////////////////////////////////
pub use crate::error::{Error, Result};
pub use crate::frame::{ExceptionCode, Request, Response, SlaveException};
pub use crate::observe::{ServerHandle, StoreObserver, Supervisor};
pub use crate::server::StoreService;
pub use crate::slave::{Slave, SlaveId};
pub use crate::store::DataStore;
pub use crate::transport::TransportOptions;

///////////////////////////////////////////////////////////////////
/// Traits
///////////////////////////////////////////////////////////////////
pub use crate::client::{Client, Diagnostics, Reader, Writer};

pub use crate::client::sync::Client as SyncClient;

pub use crate::client::sync::Reader as SyncReader;

pub use crate::client::sync::Writer as SyncWriter;

pub use crate::server::Service;

pub use crate::slave::SlaveContext;
