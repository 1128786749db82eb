//! Generic `RangeScanner` trait for rotating distance sensors.
//!
//! A scanner delivers an endless stream of [`ScanSample`]s.  The first sample
//! of every rotation carries `new_rotation = true`.

use rainroom_types::RainError;

/// One raw measurement as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanSample {
    /// `true` on the first sample of a new rotation.
    pub new_rotation: bool,
    /// Device-reported signal quality (0 = no return).
    pub quality: u8,
    /// Bearing in degrees, clockwise as reported by the device.
    pub angle_deg: f64,
    /// Range in millimetres; `0.0` marks an invalid measurement.
    pub distance_mm: f64,
}

/// Identity and firmware details reported by a scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub model: u8,
    pub firmware: (u8, u8),
    pub hardware: u8,
    /// Factory serial number; used as the sensor's stable identity.
    pub serial_number: String,
}

/// A rotating range sensor.
///
/// The device is owned by exactly one worker thread at a time, hence the
/// `Send` bound.
pub trait RangeScanner: Send {
    /// Stable identifier (port name or serial number) used in logs.
    fn id(&self) -> &str;

    /// (Re)initialise the sample stream: connect if needed, spin the head up
    /// and start scanning.  Calling it while already scanning restarts the
    /// stream.
    ///
    /// # Errors
    ///
    /// Returns [`RainError::SensorUnavailable`] if the device cannot be
    /// reached, or [`RainError::SensorProtocol`] if it answers with garbage.
    fn start_scan(&mut self) -> Result<(), RainError>;

    /// Block until the next sample is available.
    ///
    /// # Errors
    ///
    /// Returns [`RainError::SensorProtocol`] on a framing fault; the caller
    /// recovers with [`start_scan`][Self::start_scan].
    fn next_sample(&mut self) -> Result<ScanSample, RainError>;

    /// Bytes waiting in the device's input buffer.
    fn backlog(&mut self) -> usize;

    /// Stop scanning, stop the motor and release the connection.
    fn shutdown(&mut self) -> Result<(), RainError>;
}

impl<S: RangeScanner + ?Sized> RangeScanner for Box<S> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn start_scan(&mut self) -> Result<(), RainError> {
        (**self).start_scan()
    }

    fn next_sample(&mut self) -> Result<ScanSample, RainError> {
        (**self).next_sample()
    }

    fn backlog(&mut self) -> usize {
        (**self).backlog()
    }

    fn shutdown(&mut self) -> Result<(), RainError> {
        (**self).shutdown()
    }
}
