//! Sensor-to-installation coordinate transform.
//!
//! Scanners report clockwise bearings; the installation plane uses the usual
//! counter-clockwise convention, so the bearing is negated before the polar
//! conversion.  Each scanner is then translated by its calibration shift.
//!
//! ```text
//! x = d · cos(−θ) + shift_x
//! y = d · sin(−θ) + shift_y
//! ```
//!
//! # Example
//!
//! ```rust
//! use rainroom_perception::transform::Calibration;
//!
//! let cal = Calibration::new(1000, -500);
//! let p = cal.to_plane(2000.0, 0.0);
//! assert!((p.x - 3000.0).abs() < 1e-9);
//! assert!((p.y + 500.0).abs() < 1e-9);
//! ```

use rainroom_types::Point2;

/// Translation that places a scanner in the installation plane (millimetres).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Calibration {
    pub shift_x: i32,
    pub shift_y: i32,
}

impl Calibration {
    pub fn new(shift_x: i32, shift_y: i32) -> Self {
        Self { shift_x, shift_y }
    }

    /// Convert a `(distance, bearing)` sample to plane coordinates.
    pub fn to_plane(&self, distance_mm: f64, angle_deg: f64) -> Point2 {
        let theta = (-angle_deg).to_radians();
        Point2::new(
            distance_mm * theta.cos() + f64::from(self.shift_x),
            distance_mm * theta.sin() + f64::from(self.shift_y),
        )
    }
}
