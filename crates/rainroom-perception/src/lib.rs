//! `rainroom-perception` – Presence sensing.
//!
//! Turns raw range-scanner samples into per-cell hit counts that the
//! occupancy engine can reason about.
//!
//! # Modules
//!
//! - [`transform`] – [`Calibration`][transform::Calibration]: converts a
//!   device-relative polar sample into installation-plane coordinates.
//! - [`geometry`] – [`GridGeometry`][geometry::GridGeometry] and
//!   [`CountGrid`][geometry::CountGrid]: the grid rectangle, point-to-cell
//!   binning, and the per-rotation count matrix.
//! - [`worker`] – [`SensorWorker`][worker::SensorWorker]: one acquisition
//!   thread per scanner, publishing a complete
//!   [`RotationSnapshot`][worker::RotationSnapshot] at every rotation
//!   boundary.

pub mod geometry;
pub mod transform;
pub mod worker;

pub use geometry::{CountGrid, GridGeometry, SharedGeometry};
pub use transform::Calibration;
pub use worker::{RotationSnapshot, SensorWorker, WorkerConfig};
