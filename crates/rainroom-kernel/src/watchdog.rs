//! [`Watchdog`] – sensor stall detector.
//!
//! Every running sensor worker publishes a rotation counter.  The control loop
//! feeds those counters to [`Watchdog::observe`] once per tick; a sensor whose
//! counter has not moved within its deadline is *stalled*.
//!
//! [`Watchdog::newly_stalled`] reports each stall exactly once, so the caller
//! can log it without flooding the output at the loop rate.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Stall deadline used by the control loop.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(2);

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Health state reported for a single sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorHealth {
    /// A rotation was published within the deadline.
    Healthy,
    /// No rotation within the deadline.
    Stalled,
    /// The sensor is not being watched (stopped or unknown).
    Unwatched,
}

// ────────────────────────────────────────────────────────────────────────────
// Internal entry
// ────────────────────────────────────────────────────────────────────────────

struct SensorEntry {
    last_progress: Instant,
    rotations: u64,
    reported: bool,
}

impl SensorEntry {
    fn stalled(&self, timeout: Duration) -> bool {
        self.last_progress.elapsed() > timeout
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Watchdog
// ────────────────────────────────────────────────────────────────────────────

/// Tracks rotation counters of running sensors.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use rainroom_kernel::watchdog::{SensorHealth, Watchdog};
///
/// let mut wd = Watchdog::new(Duration::from_secs(2));
/// wd.watch("lidar-a", 0);
/// wd.observe("lidar-a", 1);
///
/// assert_eq!(wd.health("lidar-a"), SensorHealth::Healthy);
/// assert_eq!(wd.health("lidar-b"), SensorHealth::Unwatched);
/// ```
pub struct Watchdog {
    timeout: Duration,
    sensors: HashMap<String, SensorEntry>,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new(DEFAULT_STALL_TIMEOUT)
    }
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            sensors: HashMap::new(),
        }
    }

    /// Start watching `sensor_id` whose counter currently reads `rotations`.
    /// Re-watching resets the deadline.
    pub fn watch(&mut self, sensor_id: &str, rotations: u64) {
        self.sensors.insert(
            sensor_id.to_string(),
            SensorEntry {
                last_progress: Instant::now(),
                rotations,
                reported: false,
            },
        );
    }

    pub fn unwatch(&mut self, sensor_id: &str) {
        self.sensors.remove(sensor_id);
    }

    /// Feed the sensor's current rotation counter.  Any change counts as
    /// progress.  Unknown sensors are ignored.
    pub fn observe(&mut self, sensor_id: &str, rotations: u64) {
        if let Some(entry) = self.sensors.get_mut(sensor_id) {
            if entry.rotations != rotations {
                entry.rotations = rotations;
                entry.last_progress = Instant::now();
                entry.reported = false;
            }
        }
    }

    pub fn health(&self, sensor_id: &str) -> SensorHealth {
        match self.sensors.get(sensor_id) {
            Some(entry) if entry.stalled(self.timeout) => SensorHealth::Stalled,
            Some(_) => SensorHealth::Healthy,
            None => SensorHealth::Unwatched,
        }
    }

    /// IDs of sensors that stalled since the last call.  A sensor is reported
    /// again only after it has made progress in between.
    pub fn newly_stalled(&mut self) -> Vec<String> {
        let timeout = self.timeout;
        let mut stalled: Vec<String> = self
            .sensors
            .iter_mut()
            .filter(|(_, entry)| !entry.reported && entry.stalled(timeout))
            .map(|(id, entry)| {
                entry.reported = true;
                id.clone()
            })
            .collect();
        stalled.sort();
        stalled
    }
}
