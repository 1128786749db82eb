//! `rainroom-kernel` – Occupancy engine
//!
//! Decides, every control cycle, which showers must run.  It owns the cell
//! topology and the showers; sensors only hand it count grids.
//!
//! # Modules
//!
//! - [`layout`] – [`GridLayout`][layout::GridLayout]: per-cell metadata
//!   (relay wiring, entry and inert cells) for the installed room or any
//!   uniform grid.
//! - [`cell`] – [`Cell`][cell::Cell]: occupancy count, evaluated state and
//!   optional shower of one square.
//! - [`grid`] – [`Grid`][grid::Grid]: threshold promotion, yellow bleed,
//!   shower driving, manual all-on/all-off and the auto-drive flag.
//! - [`watchdog`] – [`Watchdog`][watchdog::Watchdog]: flags running sensors
//!   whose rotation counter stops moving.

pub mod cell;
pub mod grid;
pub mod layout;
pub mod watchdog;

pub use cell::Cell;
pub use grid::{Grid, StaticDirective};
pub use layout::{CellProfile, GridLayout, Trigger};
pub use watchdog::{SensorHealth, Watchdog};
