//! `rainroom-runtime` – Control loop
//!
//! Ties sensors, grid and relays together at a fixed tick rate and exposes
//! the whole installation to an operator.
//!
//! # Modules
//!
//! - [`control_loop`] – [`ControlLoop`][control_loop::ControlLoop]: owns the
//!   [`Grid`][rainroom_kernel::Grid] and the relay bus, pulls sensor
//!   snapshots, applies operator events and handles interactive and special
//!   modes.
//! - [`console`] – [`OperatorConsole`][console::OperatorConsole]: the
//!   display/input seam, with [`Frame`][console::Frame],
//!   [`OperatorEvent`][console::OperatorEvent] and
//!   [`DriveStatus`][console::DriveStatus].
//! - [`config`] – [`ConfigStore`][config::ConfigStore]: TOML persistence of
//!   grid placement, sensitivity and per-sensor settings.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: log output
//!   and optional OTLP span export.

pub mod config;
pub mod console;
pub mod control_loop;
pub mod telemetry;

pub use config::{ConfigStore, InstallationConfig, RelaySettings, SensorSettings};
pub use console::{CellView, DriveStatus, Frame, OperatorConsole, OperatorEvent, SensorView};
pub use control_loop::{ControlLoop, Mode};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
