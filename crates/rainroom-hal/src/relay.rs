//! Generic `RelayBus` trait for the network that carries shower relay
//! commands.

use rainroom_types::RainError;

/// Identifies one physical relay output: the controller's bus address plus
/// the output index on that controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelayAddress {
    /// Bus address (Modbus unit id) of the relay controller.
    pub unit: u8,
    /// Zero-based output index on the controller.
    pub output: u16,
}

impl RelayAddress {
    pub fn new(unit: u8, output: u16) -> Self {
        Self { unit, output }
    }

    /// Holding register that drives this output.  Controllers number their
    /// output registers from 1.
    pub fn register(&self) -> u16 {
        self.output + 1
    }
}

impl std::fmt::Display for RelayAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.unit, self.output)
    }
}

/// A synchronous request/response channel to the relay controllers.
///
/// Implementations must not retry on their own; callers decide what a
/// failed write means for the rest of the cycle.
pub trait RelayBus: Send {
    /// Write `value` into holding `register` of relay controller `unit`.
    ///
    /// # Errors
    ///
    /// Returns [`RainError::TransportTimeout`] when the controller does not
    /// answer in time, [`RainError::RelayException`] when it answers with a
    /// protocol exception, and [`RainError::Transport`] for any other I/O
    /// failure.
    fn write_register(&mut self, unit: u8, register: u16, value: u16) -> Result<(), RainError>;
}

impl<B: RelayBus + ?Sized> RelayBus for Box<B> {
    fn write_register(&mut self, unit: u8, register: u16, value: u16) -> Result<(), RainError> {
        (**self).write_register(unit, register, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockBus {
        writes: Vec<(u8, u16, u16)>,
    }

    impl RelayBus for MockBus {
        fn write_register(&mut self, unit: u8, register: u16, value: u16) -> Result<(), RainError> {
            self.writes.push((unit, register, value));
            Ok(())
        }
    }

    #[test]
    fn register_is_one_based() {
        assert_eq!(RelayAddress::new(1, 0).register(), 1);
        assert_eq!(RelayAddress::new(2, 5).register(), 6);
    }

    #[test]
    fn boxed_bus_forwards_writes() {
        let mut bus: Box<MockBus> = Box::new(MockBus { writes: Vec::new() });
        bus.write_register(3, 4, 255).unwrap();
        assert_eq!(bus.writes, vec![(3, 4, 255)]);
    }

    #[test]
    fn address_display_is_unit_then_output() {
        assert_eq!(RelayAddress::new(2, 3).to_string(), "2 3");
    }
}
