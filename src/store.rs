// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared register and coil banks with change notification

use std::sync::{Mutex, MutexGuard, RwLock};

use thiserror::Error;
use tokio::sync::broadcast;

use crate::frame::{Address, Coil, Word};

/// Default bank length: 65536 addressable items plus the reserved,
/// unused slot at index 0.
pub const DEFAULT_BANK_LEN: usize = 65537;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The four addressable banks of a data store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BankKind {
    /// Read/write discretes.
    Coils,
    /// Discretes that are read-only from the network.
    DiscreteInputs,
    /// Read/write registers.
    HoldingRegisters,
    /// Registers that are read-only from the network.
    InputRegisters,
}

/// Snapshot payload of a change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BankValues {
    Discretes(Vec<Coil>),
    Registers(Vec<Word>),
}

/// An immutable snapshot describing one read or write access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: BankKind,
    /// Wire address of the first affected item.
    pub start: Address,
    pub values: BankValues,
}

/// The requested range does not fit into the bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("data address out of range: start = {start}, count = {count}, bank length = {len}")]
pub struct OutOfRange {
    pub start: Address,
    pub count: usize,
    pub len: usize,
}

/// Wave shapes external simulation generators may load into a bank.
///
/// The generators themselves live outside this crate; the store only
/// receives their output through the ordinary write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationPattern {
    Constant,
    Ramp,
    Sine,
    Square,
    Triangle,
    Random,
}

#[derive(Debug)]
struct Banks {
    coils: Vec<Coil>,
    discrete_inputs: Vec<Coil>,
    holding_registers: Vec<Word>,
    input_registers: Vec<Word>,
}

/// Thread-safe aggregate of the four banks.
///
/// All access is mediated by one reader/writer lock, so writes appear
/// atomic to readers of the same store. Every operation broadcasts an
/// immutable snapshot on the read-from or written-to channel; consumers
/// never observe the banks directly and cannot block the lock.
#[derive(Debug)]
pub struct DataStore {
    banks: RwLock<Banks>,
    /// Serializes compound operations spanning multiple accesses,
    /// e.g. read/write-multiple-registers.
    compound: Mutex<()>,
    read_from: broadcast::Sender<ChangeEvent>,
    written_to: broadcast::Sender<ChangeEvent>,
}

impl DataStore {
    /// Create a store with the default bank lengths.
    #[must_use]
    pub fn new() -> Self {
        Self::with_bank_lens(
            DEFAULT_BANK_LEN,
            DEFAULT_BANK_LEN,
            DEFAULT_BANK_LEN,
            DEFAULT_BANK_LEN,
        )
    }

    /// Create a store with explicit bank lengths.
    ///
    /// Lengths include the reserved slot at index 0; a bank of length
    /// `n` exposes the wire addresses `0..n - 1`.
    #[must_use]
    pub fn with_bank_lens(
        coils: usize,
        discrete_inputs: usize,
        holding_registers: usize,
        input_registers: usize,
    ) -> Self {
        let (read_from, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (written_to, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            banks: RwLock::new(Banks {
                coils: vec![false; coils],
                discrete_inputs: vec![false; discrete_inputs],
                holding_registers: vec![0; holding_registers],
                input_registers: vec![0; input_registers],
            }),
            compound: Mutex::new(()),
            read_from,
            written_to,
        }
    }

    /// Length of a bank, including the reserved slot at index 0.
    #[must_use]
    pub fn bank_len(&self, kind: BankKind) -> usize {
        let banks = read_lock(&self.banks);
        match kind {
            BankKind::Coils => banks.coils.len(),
            BankKind::DiscreteInputs => banks.discrete_inputs.len(),
            BankKind::HoldingRegisters => banks.holding_registers.len(),
            BankKind::InputRegisters => banks.input_registers.len(),
        }
    }

    /// Subscribe to read-from events.
    #[must_use]
    pub fn on_read(&self) -> broadcast::Receiver<ChangeEvent> {
        self.read_from.subscribe()
    }

    /// Subscribe to written-to events.
    #[must_use]
    pub fn on_write(&self) -> broadcast::Receiver<ChangeEvent> {
        self.written_to.subscribe()
    }

    /// Take the compound-operation lock for multi-step access that must
    /// appear atomic beyond a single read or write.
    #[must_use]
    pub fn compound_lock(&self) -> MutexGuard<'_, ()> {
        lock(&self.compound)
    }

    pub fn read_coils(&self, start: Address, count: usize) -> Result<Vec<Coil>, OutOfRange> {
        let values = {
            let banks = read_lock(&self.banks);
            let range = bank_range(start, count, banks.coils.len())?;
            banks.coils[range].to_vec()
        };
        self.notify_read(BankKind::Coils, start, BankValues::Discretes(values.clone()));
        Ok(values)
    }

    pub fn read_discrete_inputs(
        &self,
        start: Address,
        count: usize,
    ) -> Result<Vec<Coil>, OutOfRange> {
        let values = {
            let banks = read_lock(&self.banks);
            let range = bank_range(start, count, banks.discrete_inputs.len())?;
            banks.discrete_inputs[range].to_vec()
        };
        self.notify_read(
            BankKind::DiscreteInputs,
            start,
            BankValues::Discretes(values.clone()),
        );
        Ok(values)
    }

    pub fn read_holding_registers(
        &self,
        start: Address,
        count: usize,
    ) -> Result<Vec<Word>, OutOfRange> {
        let values = {
            let banks = read_lock(&self.banks);
            let range = bank_range(start, count, banks.holding_registers.len())?;
            banks.holding_registers[range].to_vec()
        };
        self.notify_read(
            BankKind::HoldingRegisters,
            start,
            BankValues::Registers(values.clone()),
        );
        Ok(values)
    }

    pub fn read_input_registers(
        &self,
        start: Address,
        count: usize,
    ) -> Result<Vec<Word>, OutOfRange> {
        let values = {
            let banks = read_lock(&self.banks);
            let range = bank_range(start, count, banks.input_registers.len())?;
            banks.input_registers[range].to_vec()
        };
        self.notify_read(
            BankKind::InputRegisters,
            start,
            BankValues::Registers(values.clone()),
        );
        Ok(values)
    }

    pub fn write_coil(&self, address: Address, value: Coil) -> Result<(), OutOfRange> {
        self.write_coils(address, &[value])
    }

    pub fn write_coils(&self, start: Address, values: &[Coil]) -> Result<(), OutOfRange> {
        {
            let mut banks = write_lock(&self.banks);
            let range = bank_range(start, values.len(), banks.coils.len())?;
            banks.coils[range].copy_from_slice(values);
        }
        self.notify_write(
            BankKind::Coils,
            start,
            BankValues::Discretes(values.to_vec()),
        );
        Ok(())
    }

    /// Load discrete-input values, e.g. from a simulation generator.
    ///
    /// This bank is read-only from the network.
    pub fn write_discrete_inputs(&self, start: Address, values: &[Coil]) -> Result<(), OutOfRange> {
        {
            let mut banks = write_lock(&self.banks);
            let range = bank_range(start, values.len(), banks.discrete_inputs.len())?;
            banks.discrete_inputs[range].copy_from_slice(values);
        }
        self.notify_write(
            BankKind::DiscreteInputs,
            start,
            BankValues::Discretes(values.to_vec()),
        );
        Ok(())
    }

    pub fn write_register(&self, address: Address, value: Word) -> Result<(), OutOfRange> {
        self.write_registers(address, &[value])
    }

    pub fn write_registers(&self, start: Address, values: &[Word]) -> Result<(), OutOfRange> {
        {
            let mut banks = write_lock(&self.banks);
            let range = bank_range(start, values.len(), banks.holding_registers.len())?;
            banks.holding_registers[range].copy_from_slice(values);
        }
        self.notify_write(
            BankKind::HoldingRegisters,
            start,
            BankValues::Registers(values.to_vec()),
        );
        Ok(())
    }

    /// Load input-register values, e.g. from a simulation generator.
    ///
    /// This bank is read-only from the network.
    pub fn write_input_registers(&self, start: Address, values: &[Word]) -> Result<(), OutOfRange> {
        {
            let mut banks = write_lock(&self.banks);
            let range = bank_range(start, values.len(), banks.input_registers.len())?;
            banks.input_registers[range].copy_from_slice(values);
        }
        self.notify_write(
            BankKind::InputRegisters,
            start,
            BankValues::Registers(values.to_vec()),
        );
        Ok(())
    }

    /// Write then read the holding registers as one compound operation.
    pub fn read_write_registers(
        &self,
        read_start: Address,
        read_count: usize,
        write_start: Address,
        values: &[Word],
    ) -> Result<Vec<Word>, OutOfRange> {
        let _guard = self.compound_lock();
        self.write_registers(write_start, values)?;
        self.read_holding_registers(read_start, read_count)
    }

    fn notify_read(&self, kind: BankKind, start: Address, values: BankValues) {
        // Nobody listening is fine.
        let _ = self.read_from.send(ChangeEvent {
            kind,
            start,
            values,
        });
    }

    fn notify_write(&self, kind: BankKind, start: Address, values: BankValues) {
        let _ = self.written_to.send(ChangeEvent {
            kind,
            start,
            values,
        });
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a zero-based wire range onto one-based bank indices.
fn bank_range(
    start: Address,
    count: usize,
    len: usize,
) -> Result<std::ops::Range<usize>, OutOfRange> {
    let begin = usize::from(start) + 1;
    let end = begin + count;
    if end > len {
        return Err(OutOfRange { start, count, len });
    }
    Ok(begin..end)
}

fn read_lock(banks: &RwLock<Banks>) -> std::sync::RwLockReadGuard<'_, Banks> {
    banks.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock(banks: &RwLock<Banks>) -> std::sync::RwLockWriteGuard<'_, Banks> {
    banks.write().unwrap_or_else(|e| e.into_inner())
}

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
