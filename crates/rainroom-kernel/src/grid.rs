//! [`Grid`] – the occupancy engine.
//!
//! Each control cycle runs three steps:
//!
//! 1. [`Grid::reset_state`] clears every cell.
//! 2. [`Grid::update_states`] sums the sensors' count grids, promotes cells
//!    whose count exceeds their threshold to green and bleeds yellow onto the
//!    eight neighbours of every green cell.
//! 3. [`Grid::update_showers`] drives each shower so that it runs on clear
//!    cells only.  Nothing is written while auto-drive is off.
//!
//! The grid's placement lives in a [`SharedGeometry`] that the sensor workers
//! read from their own threads; everything else is owned by the control loop.

use std::time::{Duration, Instant};

use rainroom_hal::relay::RelayBus;
use rainroom_perception::{CountGrid, GridGeometry, SharedGeometry};
use rainroom_types::{CellState, Point2, RainError};
use tracing::{debug, warn};

use crate::cell::Cell;
use crate::layout::{GridLayout, INSTALLATION_CELL_SIZE};

/// The whole-grid directive applied most recently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaticDirective {
    OnAll,
    #[default]
    OffAll,
}

pub struct Grid {
    height: usize,
    width: usize,
    cells: Vec<Cell>,
    geometry: SharedGeometry,
    sensitivity: u32,
    active: bool,
    active_prev: bool,
    last_static: StaticDirective,
}

impl Grid {
    /// Build a grid from `layout`, placed at `origin` with square cells of
    /// `cell_size` millimetres.
    pub fn new(layout: &GridLayout, origin: (i32, i32), cell_size: i32, sensitivity: u32) -> Self {
        let (height, width) = layout.dimensions();
        let cells = (0..height)
            .flat_map(|row| (0..width).map(move |col| (row, col)))
            .map(|(row, col)| Cell::new(row, col, layout.profile(row, col)))
            .collect();
        let geometry = GridGeometry::new(origin.0, origin.1, cell_size, height, width);
        Self {
            height,
            width,
            cells,
            geometry: SharedGeometry::new(geometry),
            sensitivity,
            active: false,
            active_prev: false,
            last_static: StaticDirective::default(),
        }
    }

    /// The installed room at `origin`.
    pub fn installation(origin: (i32, i32), sensitivity: u32) -> Self {
        Self::new(
            &GridLayout::installation(),
            origin,
            INSTALLATION_CELL_SIZE,
            sensitivity,
        )
    }

    // ── Geometry & settings ─────────────────────────────────────────────────

    /// Handle to the live geometry, for sensor workers.
    pub fn geometry(&self) -> SharedGeometry {
        self.geometry.clone()
    }

    /// `(height, width)`.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn origin(&self) -> (i32, i32) {
        self.geometry.load().origin()
    }

    /// Move the grid.  The corner is re-derived and every worker sees the
    /// new placement from its next sample.
    ///
    /// # Errors
    ///
    /// Returns [`RainError::Placement`] if the grid would extend past the
    /// coordinate range; the grid stays where it was.
    pub fn set_origin(&mut self, x0: i32, y0: i32) -> Result<(), RainError> {
        self.geometry.set_origin(x0, y0)?;
        debug!(x0, y0, "grid origin moved");
        Ok(())
    }

    pub fn sensitivity(&self) -> u32 {
        self.sensitivity
    }

    pub fn set_sensitivity(&mut self, sensitivity: u32) {
        self.sensitivity = sensitivity;
    }

    // ── Cells ───────────────────────────────────────────────────────────────

    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        &self.cells[row * self.width + col]
    }

    /// All cells, row-major.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    fn showers_mut(&mut self) -> impl Iterator<Item = &mut Cell> {
        self.cells.iter_mut().filter(|c| c.shower().is_some())
    }

    // ── Evaluation ──────────────────────────────────────────────────────────

    pub fn reset_state(&mut self) {
        for cell in &mut self.cells {
            cell.reset();
        }
    }

    /// Add each snapshot's counts to the cells, then promote and bleed.
    /// Count grids of the wrong shape are skipped with a warning.
    pub fn update_states<'a>(&mut self, snapshots: impl IntoIterator<Item = &'a CountGrid>) {
        for counts in snapshots {
            if counts.dimensions() != self.dimensions() {
                warn!(
                    expected = ?self.dimensions(),
                    actual = ?counts.dimensions(),
                    "count grid rejected"
                );
                continue;
            }
            for cell in &mut self.cells {
                let (row, col) = cell.position();
                cell.add_occupancy(counts.get(row, col));
            }
        }
        self.promote();
        self.bleed();
    }

    /// Every cell is evaluated, shower or not; only `Trigger::Never` cells
    /// are skipped.
    fn promote(&mut self) {
        let sensitivity = self.sensitivity;
        for cell in &mut self.cells {
            if let Some(threshold) = cell.threshold(sensitivity)
                && cell.occupancy() > threshold
            {
                cell.set_state(CellState::Green);
            }
        }
    }

    fn bleed(&mut self) {
        let green: Vec<(usize, usize)> = self
            .cells
            .iter()
            .filter(|c| c.state() == CellState::Green)
            .map(Cell::position)
            .collect();
        for (row, col) in green {
            for dr in -1isize..=1 {
                for dc in -1isize..=1 {
                    if dr == 0 && dc == 0 {
                        continue;
                    }
                    let (Some(r), Some(c)) =
                        (row.checked_add_signed(dr), col.checked_add_signed(dc))
                    else {
                        continue;
                    };
                    if r < self.height && c < self.width {
                        self.cells[r * self.width + c].warn();
                    }
                }
            }
        }
    }

    // ── Driving ─────────────────────────────────────────────────────────────

    /// Bring every shower in line with its cell: off on green or yellow, on
    /// when clear.  Only showers whose confirmed state disagrees are written.
    ///
    /// # Errors
    ///
    /// Stops at the first failed write and returns its error.  Showers that
    /// were not written keep their previous flags.
    pub fn update_showers(&mut self, bus: &mut dyn RelayBus) -> Result<Duration, RainError> {
        let start = Instant::now();
        if !self.active {
            return Ok(start.elapsed());
        }
        for cell in &mut self.cells {
            let state = cell.state();
            let Some(shower) = cell.shower_mut() else {
                continue;
            };
            if state.is_occupied_or_warned() && shower.is_on() {
                shower.off(bus)?;
            } else if state == CellState::Clear && !shower.is_on() {
                shower.on(bus)?;
            }
        }
        Ok(start.elapsed())
    }

    /// Mark every shower cell green and switch every shower on.
    pub fn on_all(&mut self, bus: &mut dyn RelayBus) -> Result<(), RainError> {
        for cell in self.showers_mut() {
            cell.set_state(CellState::Green);
            if let Some(shower) = cell.shower_mut() {
                shower.on(bus)?;
            }
        }
        self.last_static = StaticDirective::OnAll;
        Ok(())
    }

    /// Mark every shower cell clear and switch every shower off.
    pub fn off_all(&mut self, bus: &mut dyn RelayBus) -> Result<(), RainError> {
        for cell in self.showers_mut() {
            cell.set_state(CellState::Clear);
            if let Some(shower) = cell.shower_mut() {
                shower.off(bus)?;
            }
        }
        self.last_static = StaticDirective::OffAll;
        Ok(())
    }

    /// Apply the opposite of the last static directive.
    pub fn toggle_static(&mut self, bus: &mut dyn RelayBus) -> Result<(), RainError> {
        match self.last_static {
            StaticDirective::OnAll => self.off_all(bus),
            StaticDirective::OffAll => self.on_all(bus),
        }
    }

    pub fn last_static(&self) -> StaticDirective {
        self.last_static
    }

    /// Flip the shower under `point`.  Points on the grid's border select
    /// nothing.  Returns the toggled cell, if any.
    pub fn switch(
        &mut self,
        bus: &mut dyn RelayBus,
        point: Point2,
    ) -> Result<Option<(usize, usize)>, RainError> {
        let Some((row, col)) = self.geometry.load().bin_strict(point) else {
            return Ok(None);
        };
        let cell = &mut self.cells[row * self.width + col];
        match cell.shower_mut() {
            Some(shower) => {
                shower.toggle(bus)?;
                Ok(Some((row, col)))
            }
            None => Ok(None),
        }
    }

    // ── Auto-drive ──────────────────────────────────────────────────────────

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn activate(&mut self) {
        self.active_prev = self.active;
        self.active = true;
    }

    pub fn deactivate(&mut self) {
        self.active_prev = self.active;
        self.active = false;
    }

    /// Restore auto-drive to its value before the last activate/deactivate.
    pub fn set_prev_state(&mut self) {
        self.active = self.active_prev;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
