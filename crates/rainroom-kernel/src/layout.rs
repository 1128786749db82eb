//! [`GridLayout`] – declarative description of what sits in each cell.
//!
//! Evaluation code never tests coordinates: special cells are described here
//! once, as a [`CellProfile`] per position, and the [`Grid`][crate::grid::Grid]
//! reads the metadata.

use rainroom_hal::relay::RelayAddress;

// ────────────────────────────────────────────────────────────────────────────
// Installation constants
// ────────────────────────────────────────────────────────────────────────────

pub const INSTALLATION_HEIGHT: usize = 4;
pub const INSTALLATION_WIDTH: usize = 5;
/// Cell edge in millimetres.
pub const INSTALLATION_CELL_SIZE: i32 = 600;
/// Cell by the door; people pass through it, so it needs more evidence.
pub const ENTRY_CELL: (usize, usize) = (3, 2);
pub const ENTRY_THRESHOLD: u32 = 5;
/// Cell that is never evaluated.
pub const INERT_CELL: (usize, usize) = (3, 0);
/// Outputs wired to each relay unit.
pub const OUTPUTS_PER_UNIT: u16 = 6;

// ────────────────────────────────────────────────────────────────────────────
// Per-cell metadata
// ────────────────────────────────────────────────────────────────────────────

/// How a cell decides it is occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Trigger {
    /// Occupied when the count exceeds the grid-wide sensitivity.
    #[default]
    Sensitivity,
    /// Occupied when the count exceeds this fixed threshold.
    Fixed(u32),
    /// Never evaluated.
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CellProfile {
    pub actuator: Option<RelayAddress>,
    pub trigger: Trigger,
}

// ────────────────────────────────────────────────────────────────────────────
// GridLayout
// ────────────────────────────────────────────────────────────────────────────

/// Row-major table of [`CellProfile`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridLayout {
    height: usize,
    width: usize,
    cells: Vec<CellProfile>,
}

impl GridLayout {
    /// `height × width` cells without actuators, all on the sensitivity
    /// trigger.
    pub fn uniform(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            cells: vec![CellProfile::default(); height * width],
        }
    }

    /// The room as built: 4 × 5 cells, showers on columns 1..=4, the entry
    /// cell and the inert cell.
    pub fn installation() -> Self {
        Self::uniform(INSTALLATION_HEIGHT, INSTALLATION_WIDTH)
            .wire_relays(1, OUTPUTS_PER_UNIT)
            .with_trigger(ENTRY_CELL.0, ENTRY_CELL.1, Trigger::Fixed(ENTRY_THRESHOLD))
            .with_trigger(INERT_CELL.0, INERT_CELL.1, Trigger::Never)
    }

    /// Assign relay outputs in wiring order: rows from the bottom (last row)
    /// up, columns left to right, skipping column 0.  Each unit takes
    /// `outputs_per_unit` outputs before the next unit number is used.
    pub fn wire_relays(mut self, first_unit: u8, outputs_per_unit: u16) -> Self {
        let mut unit = first_unit;
        let mut output = 0;
        for row in (0..self.height).rev() {
            for col in 1..self.width {
                if output >= outputs_per_unit {
                    unit += 1;
                    output = 0;
                }
                self.cells[row * self.width + col].actuator = Some(RelayAddress::new(unit, output));
                output += 1;
            }
        }
        self
    }

    pub fn with_actuator(mut self, row: usize, col: usize, address: RelayAddress) -> Self {
        self.cells[row * self.width + col].actuator = Some(address);
        self
    }

    pub fn with_trigger(mut self, row: usize, col: usize, trigger: Trigger) -> Self {
        self.cells[row * self.width + col].trigger = trigger;
        self
    }

    /// `(height, width)`.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn profile(&self, row: usize, col: usize) -> CellProfile {
        self.cells[row * self.width + col]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn installation_wiring_matches_the_room() {
        let layout = GridLayout::installation();
        assert_eq!(layout.dimensions(), (4, 5));

        // Bottom row first.
        assert_eq!(layout.profile(3, 1).actuator, Some(RelayAddress::new(1, 0)));
        assert_eq!(layout.profile(3, 4).actuator, Some(RelayAddress::new(1, 3)));
        assert_eq!(layout.profile(2, 1).actuator, Some(RelayAddress::new(1, 4)));
        assert_eq!(layout.profile(2, 2).actuator, Some(RelayAddress::new(1, 5)));
        assert_eq!(layout.profile(2, 3).actuator, Some(RelayAddress::new(2, 0)));
        assert_eq!(layout.profile(0, 4).actuator, Some(RelayAddress::new(3, 3)));

        for row in 0..4 {
            assert_eq!(layout.profile(row, 0).actuator, None);
        }
    }

    #[test]
    fn installation_has_sixteen_showers_on_three_units() {
        let layout = GridLayout::installation();
        let mut per_unit = [0; 4];
        for row in 0..4 {
            for col in 0..5 {
                if let Some(addr) = layout.profile(row, col).actuator {
                    per_unit[addr.unit as usize] += 1;
                }
            }
        }
        assert_eq!(per_unit, [0, 6, 6, 4]);
    }

    #[test]
    fn installation_special_cells() {
        let layout = GridLayout::installation();
        assert_eq!(layout.profile(3, 2).trigger, Trigger::Fixed(5));
        assert_eq!(layout.profile(3, 0).trigger, Trigger::Never);
        assert_eq!(layout.profile(1, 1).trigger, Trigger::Sensitivity);
    }

    #[test]
    fn builder_overrides_single_cells() {
        let layout = GridLayout::uniform(2, 2)
            .with_actuator(0, 0, RelayAddress::new(9, 2))
            .with_trigger(1, 1, Trigger::Fixed(3));
        assert_eq!(layout.profile(0, 0).actuator, Some(RelayAddress::new(9, 2)));
        assert_eq!(layout.profile(0, 1), CellProfile::default());
        assert_eq!(layout.profile(1, 1).trigger, Trigger::Fixed(3));
    }
}
