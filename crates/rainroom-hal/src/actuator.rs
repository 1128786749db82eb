//! [`Shower`] – a single relay-driven shower head.
//!
//! The on/off flag mirrors the last write the relay network confirmed.  A
//! failed write leaves the flag untouched, so after an error the flag is the
//! last *known* state rather than the actual one.

use rainroom_types::RainError;

use crate::relay::{RelayAddress, RelayBus};

/// Register value that opens a shower fully.
pub const FULL_SCALE: u16 = 255;

/// One shower head wired to a relay output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shower {
    address: RelayAddress,
    is_on: bool,
}

impl Shower {
    /// A shower on `address`.  It starts as off: nothing has been written yet.
    pub fn new(address: RelayAddress) -> Self {
        Self {
            address,
            is_on: false,
        }
    }

    pub fn address(&self) -> RelayAddress {
        self.address
    }

    /// `true` when the last confirmed write switched the shower on.
    pub fn is_on(&self) -> bool {
        self.is_on
    }

    /// Write full scale to the shower's register.
    ///
    /// # Errors
    ///
    /// Propagates the bus error; the on/off flag is left unchanged.
    pub fn on(&mut self, bus: &mut dyn RelayBus) -> Result<(), RainError> {
        self.set(bus, true)
    }

    /// Write zero to the shower's register.
    ///
    /// # Errors
    ///
    /// Propagates the bus error; the on/off flag is left unchanged.
    pub fn off(&mut self, bus: &mut dyn RelayBus) -> Result<(), RainError> {
        self.set(bus, false)
    }

    /// Drive the shower to `on`.
    pub fn set(&mut self, bus: &mut dyn RelayBus, on: bool) -> Result<(), RainError> {
        let value = if on { FULL_SCALE } else { 0 };
        bus.write_register(self.address.unit, self.address.register(), value)?;
        self.is_on = on;
        Ok(())
    }

    /// Flip the shower relative to its last confirmed state.
    pub fn toggle(&mut self, bus: &mut dyn RelayBus) -> Result<(), RainError> {
        let target = !self.is_on;
        self.set(bus, target)
    }
}
