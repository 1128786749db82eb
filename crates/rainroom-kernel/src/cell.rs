//! [`Cell`] – one square of the floor grid.

use rainroom_hal::actuator::Shower;
use rainroom_types::CellState;

use crate::layout::{CellProfile, Trigger};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    row: usize,
    col: usize,
    trigger: Trigger,
    shower: Option<Shower>,
    occupancy: u32,
    state: CellState,
}

impl Cell {
    pub fn new(row: usize, col: usize, profile: CellProfile) -> Self {
        Self {
            row,
            col,
            trigger: profile.trigger,
            shower: profile.actuator.map(Shower::new),
            occupancy: 0,
            state: CellState::Clear,
        }
    }

    /// `(row, col)`.
    pub fn position(&self) -> (usize, usize) {
        (self.row, self.col)
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    pub fn state(&self) -> CellState {
        self.state
    }

    pub fn occupancy(&self) -> u32 {
        self.occupancy
    }

    pub fn shower(&self) -> Option<&Shower> {
        self.shower.as_ref()
    }

    pub fn shower_mut(&mut self) -> Option<&mut Shower> {
        self.shower.as_mut()
    }

    /// Count above which the cell turns green, or `None` when it is never
    /// evaluated.
    pub fn threshold(&self, sensitivity: u32) -> Option<u32> {
        match self.trigger {
            Trigger::Sensitivity => Some(sensitivity),
            Trigger::Fixed(threshold) => Some(threshold),
            Trigger::Never => None,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = CellState::Clear;
        self.occupancy = 0;
    }

    pub(crate) fn add_occupancy(&mut self, count: u32) {
        self.occupancy += count;
    }

    pub(crate) fn set_state(&mut self, state: CellState) {
        self.state = state;
    }

    /// Bleed step: clear and yellow cells become yellow, green stays green.
    pub(crate) fn warn(&mut self) {
        if self.state != CellState::Green {
            self.state = CellState::Yellow;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rainroom_hal::relay::RelayAddress;

    #[test]
    fn threshold_follows_trigger() {
        let mut profile = CellProfile::default();
        assert_eq!(Cell::new(0, 0, profile).threshold(3), Some(3));
        profile.trigger = Trigger::Fixed(5);
        assert_eq!(Cell::new(0, 0, profile).threshold(3), Some(5));
        profile.trigger = Trigger::Never;
        assert_eq!(Cell::new(0, 0, profile).threshold(3), None);
    }

    #[test]
    fn shower_starts_off() {
        let profile = CellProfile {
            actuator: Some(RelayAddress::new(1, 2)),
            trigger: Trigger::Sensitivity,
        };
        let cell = Cell::new(1, 1, profile);
        let shower = cell.shower().unwrap();
        assert!(!shower.is_on());
        assert_eq!(shower.address(), RelayAddress::new(1, 2));
    }

    #[test]
    fn warn_never_demotes_green() {
        let mut cell = Cell::new(0, 0, CellProfile::default());
        cell.warn();
        assert_eq!(cell.state(), CellState::Yellow);
        cell.set_state(CellState::Green);
        cell.warn();
        assert_eq!(cell.state(), CellState::Green);
        cell.reset();
        assert_eq!(cell.state(), CellState::Clear);
    }
}
