//! `rainroom-hal` – Hardware Abstraction Layer
//!
//! Everything that touches a wire lives here; the rest of the workspace only
//! talks to the traits.
//!
//! # Modules
//!
//! - [`relay`] – [`RelayBus`][relay::RelayBus]: request/response adapter
//!   that writes a single register on an addressed relay unit.
//! - [`modbus`] – [`RtuOverTcpClient`][modbus::RtuOverTcpClient]: Modbus RTU
//!   frames carried over a TCP socket, the protocol spoken by the shower
//!   relay controllers.
//! - [`actuator`] – [`Shower`][actuator::Shower]: one relay output plus the
//!   last state confirmed by the network.
//! - [`scanner`] – [`RangeScanner`][scanner::RangeScanner]: a rotating
//!   distance sensor producing a stream of [`ScanSample`][scanner::ScanSample]s.
//! - [`rplidar`] – [`RpLidar`][rplidar::RpLidar]: serial driver for
//!   Slamtec RPLidar A-series scanners.
//! - [`sim`] – in-process doubles ([`SimRelayBus`][sim::SimRelayBus],
//!   [`SimScanner`][sim::SimScanner]) for tests and hardware-free runs.

pub mod actuator;
pub mod modbus;
pub mod relay;
pub mod rplidar;
pub mod scanner;
pub mod sim;

pub use actuator::Shower;
pub use modbus::RtuOverTcpClient;
pub use relay::{RelayAddress, RelayBus};
pub use rplidar::RpLidar;
pub use scanner::{DeviceInfo, RangeScanner, ScanSample};
