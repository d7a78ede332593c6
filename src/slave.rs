// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Station addressing

/// Raw station address as it travels on the wire.
pub type SlaveId = u8;

/// Address of a Modbus station.
///
/// Serial buses carry it as the leading frame byte, the IP bindings as
/// the MBAP unit id; this crate uses the term *slave* for both. Address
/// 0 broadcasts to every station, 1 to 247 name a single device, and
/// TCP devices reached without a gateway conventionally answer under
/// 255.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slave(pub SlaveId);

impl Slave {
    /// The one-way address every station listens to.
    ///
    /// Broadcast requests are applied by all slaves and answered by
    /// none.
    #[must_use]
    pub const fn broadcast() -> Self {
        Slave(0)
    }

    /// The lowest address naming a single device.
    #[must_use]
    pub const fn min_device() -> Self {
        Slave(1)
    }

    /// The highest address naming a single device.
    #[must_use]
    pub const fn max_device() -> Self {
        Slave(247)
    }

    /// The conventional unit id of a directly connected TCP device,
    /// i.e. one not sitting behind a TCP/RTU gateway.
    #[must_use]
    pub const fn tcp_device() -> Self {
        Slave(255)
    }

    #[must_use]
    pub fn is_broadcast(self) -> bool {
        self.0 == Self::broadcast().0
    }

    /// Whether a station listening under this address must handle a
    /// request sent to `unit_id`.
    ///
    /// Its own address and the broadcast address qualify; everything
    /// else belongs to another station and is ignored.
    #[must_use]
    pub fn accepts(self, unit_id: SlaveId) -> bool {
        unit_id == self.0 || unit_id == Self::broadcast().0
    }
}

impl From<SlaveId> for Slave {
    fn from(slave_id: SlaveId) -> Self {
        Slave(slave_id)
    }
}

impl From<Slave> for SlaveId {
    fn from(slave: Slave) -> Self {
        slave.0
    }
}

/// Stateful selection of the currently addressed station.
///
/// Implemented by every master session so one transport can talk to
/// several stations in turn.
pub trait SlaveContext {
    /// Select the station for all subsequent outgoing requests.
    fn set_slave(&mut self, slave: Slave);
}
