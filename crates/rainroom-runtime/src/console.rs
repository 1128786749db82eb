//! Operator console: what the control loop shows and what it listens to.
//!
//! The loop pushes one [`Frame`] per tick plus status changes and alerts, and
//! drains pending [`OperatorEvent`]s without blocking.  Rendering technology
//! is the implementor's business.

use std::sync::Arc;
use std::time::Duration;

use rainroom_hal::relay::RelayAddress;
use rainroom_perception::RotationSnapshot;
use rainroom_types::{Alert, CellState};

/// What the showers are currently doing, as shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriveStatus {
    /// Auto-drive never engaged.
    #[default]
    Idle,
    /// Showers follow occupancy.
    Active,
    OnAll,
    OffAll,
    /// Operator toggles showers by hand.
    Interactive,
    /// Alternating all-on / all-off.
    Special,
    /// A relay write failed; the real shower states are unknown.
    Undefined,
}

impl std::fmt::Display for DriveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriveStatus::Idle => "IDLE",
            DriveStatus::Active => "ACTIVE",
            DriveStatus::OnAll => "ON ALL",
            DriveStatus::OffAll => "OFF ALL",
            DriveStatus::Interactive => "INTERACTIVE",
            DriveStatus::Special => "SPECIAL",
            DriveStatus::Undefined => "UNDEFINED",
        };
        f.write_str(label)
    }
}

/// Input from the operator.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorEvent {
    SetOrigin { x: i32, y: i32 },
    SetSensitivity(u32),
    /// Engage auto-drive.
    Activate,
    OnAll,
    OffAll,
    EnterInteractive,
    ExitInteractive,
    EnterSpecial,
    ExitSpecial,
    /// A click in installation coordinates (interactive mode only).
    Pointer { x: f64, y: f64 },
    SetSensorActive { sensor: String, active: bool },
    SetSensorShift { sensor: String, x: i32, y: i32 },
    /// Show every sensor return rather than only those inside the grid.
    SetAllPoints(bool),
    Quit,
}

/// One cell as displayed.
#[derive(Debug, Clone, PartialEq)]
pub struct CellView {
    pub row: usize,
    pub col: usize,
    pub state: CellState,
    pub occupancy: u32,
    /// Relay address and last confirmed on/off flag.
    pub shower: Option<(RelayAddress, bool)>,
}

/// One sensor as displayed.
#[derive(Debug, Clone)]
pub struct SensorView {
    pub id: String,
    pub running: bool,
    pub snapshot: Arc<RotationSnapshot>,
    pub backlog: usize,
    pub last_rotation: Duration,
}

/// Everything the operator sees for one tick.
#[derive(Debug, Clone)]
pub struct Frame {
    pub status: DriveStatus,
    pub origin: (i32, i32),
    pub corner: (i32, i32),
    pub cell_size: i32,
    pub cells: Vec<CellView>,
    pub sensors: Vec<SensorView>,
    /// Duration of the previous full tick.
    pub loop_time: Duration,
    /// Time spent on relay writes in the previous tick.
    pub relay_time: Duration,
}

/// A display plus input surface.
pub trait OperatorConsole {
    fn render(&mut self, frame: &Frame);

    /// Next pending event, without blocking.
    fn poll_event(&mut self) -> Option<OperatorEvent>;

    fn set_status(&mut self, status: DriveStatus);

    fn alert(&mut self, alert: &Alert);
}

impl<C: OperatorConsole + ?Sized> OperatorConsole for Box<C> {
    fn render(&mut self, frame: &Frame) {
        (**self).render(frame)
    }

    fn poll_event(&mut self) -> Option<OperatorEvent> {
        (**self).poll_event()
    }

    fn set_status(&mut self, status: DriveStatus) {
        (**self).set_status(status)
    }

    fn alert(&mut self, alert: &Alert) {
        (**self).alert(alert)
    }
}
