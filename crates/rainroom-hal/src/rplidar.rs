//! RPLidar A-series serial driver.
//!
//! Implements the subset of the Slamtec serial protocol the installation
//! uses: device info (for the serial number), health, standard scan, stop and
//! motor PWM.  Every request is `0xA5 <cmd>` optionally followed by a sized,
//! XOR-checksummed payload; every response starts with a 7-byte descriptor.
//!
//! A standard scan streams 5-byte measurement nodes:
//!
//! ```text
//! byte 0: quality[7:2] | !start[1] | start[0]
//! byte 1: angle_q6[6:0] | check[0]      (check bit must be 1)
//! byte 2: angle_q6[14:7]
//! byte 3..4: distance_q2, little endian
//! ```

use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use rainroom_types::RainError;
use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, info, warn};

use crate::scanner::{DeviceInfo, RangeScanner, ScanSample};

const BAUD_RATE: u32 = 115_200;
const READ_TIMEOUT: Duration = Duration::from_secs(1);

const SYNC_BYTE: u8 = 0xA5;
const SYNC_BYTE2: u8 = 0x5A;

const CMD_GET_INFO: u8 = 0x50;
const CMD_GET_HEALTH: u8 = 0x52;
const CMD_STOP: u8 = 0x25;
const CMD_SCAN: u8 = 0x20;
const CMD_SET_PWM: u8 = 0xF0;

const DESCRIPTOR_LEN: usize = 7;
const INFO_LEN: usize = 20;
const INFO_TYPE: u8 = 0x04;
const HEALTH_LEN: usize = 3;
const HEALTH_TYPE: u8 = 0x06;
const SCAN_TYPE: u8 = 0x81;

/// Size of one standard-scan measurement node.
pub const MEASUREMENT_LEN: usize = 5;

const DEFAULT_MOTOR_PWM: u16 = 660;
const DEFAULT_MAX_BUF_MEAS: usize = 2000;

/// Health status reported by `GET_HEALTH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Good,
    Warning,
    Error,
}

/// Parsed response descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub size: usize,
    pub single: bool,
    pub data_type: u8,
}

/// Encode a request, appending the sized payload and checksum when present.
pub fn encode_command(cmd: u8, payload: &[u8]) -> Vec<u8> {
    let mut req = vec![SYNC_BYTE, cmd];
    if !payload.is_empty() {
        req.push(payload.len() as u8);
        req.extend_from_slice(payload);
        let checksum = req.iter().fold(0u8, |acc, b| acc ^ b);
        req.push(checksum);
    }
    req
}

pub fn parse_descriptor(raw: &[u8; DESCRIPTOR_LEN]) -> Result<Descriptor, String> {
    if raw[0] != SYNC_BYTE || raw[1] != SYNC_BYTE2 {
        return Err("incorrect descriptor starting bytes".to_string());
    }
    Ok(Descriptor {
        size: usize::from(raw[2]),
        single: raw[5] == 0,
        data_type: raw[6],
    })
}

/// Decode one standard-scan measurement node.
pub fn parse_measurement(raw: &[u8; MEASUREMENT_LEN]) -> Result<ScanSample, String> {
    let new_rotation = raw[0] & 0x01 != 0;
    let inverted = (raw[0] >> 1) & 0x01 != 0;
    if new_rotation == inverted {
        return Err("new scan flags mismatch".to_string());
    }
    if raw[1] & 0x01 != 1 {
        return Err("check bit not equal to 1".to_string());
    }
    let angle_q6 = (u16::from(raw[1]) >> 1) | (u16::from(raw[2]) << 7);
    let distance_q2 = u16::from_le_bytes([raw[3], raw[4]]);
    Ok(ScanSample {
        new_rotation,
        quality: raw[0] >> 2,
        angle_deg: f64::from(angle_q6) / 64.0,
        distance_mm: f64::from(distance_q2) / 4.0,
    })
}

pub fn parse_info(raw: &[u8; INFO_LEN]) -> DeviceInfo {
    let serial_number = raw[4..].iter().map(|b| format!("{b:02X}")).collect();
    DeviceInfo {
        model: raw[0],
        firmware: (raw[2], raw[1]),
        hardware: raw[3],
        serial_number,
    }
}

pub fn parse_health(raw: &[u8; HEALTH_LEN]) -> (HealthStatus, u16) {
    let status = match raw[0] {
        0 => HealthStatus::Good,
        1 => HealthStatus::Warning,
        _ => HealthStatus::Error,
    };
    (status, u16::from_be_bytes([raw[1], raw[2]]))
}

/// Serial RPLidar driver.
pub struct RpLidar {
    port_name: String,
    /// Serial number once identified, the port name until then.
    id: String,
    port: Option<Box<dyn SerialPort>>,
    scanning: bool,
    max_buf_meas: usize,
    motor_pwm: u16,
}

impl RpLidar {
    /// A driver for the scanner on `port_name`.  Nothing is opened until the
    /// first request.
    pub fn new(port_name: impl Into<String>) -> Self {
        let port_name = port_name.into();
        Self {
            id: port_name.clone(),
            port_name,
            port: None,
            scanning: false,
            max_buf_meas: DEFAULT_MAX_BUF_MEAS,
            motor_pwm: DEFAULT_MOTOR_PWM,
        }
    }

    /// Flush the input buffer whenever more than `max_buf_meas` measurements
    /// are waiting, trading stale samples for latency.
    pub fn with_max_buf_meas(mut self, max_buf_meas: usize) -> Self {
        self.max_buf_meas = max_buf_meas;
        self
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn unavailable(&self, details: impl std::fmt::Display) -> RainError {
        RainError::SensorUnavailable {
            sensor: self.port_name.clone(),
            details: details.to_string(),
        }
    }

    fn protocol(&self, details: impl std::fmt::Display) -> RainError {
        RainError::SensorProtocol {
            sensor: self.port_name.clone(),
            details: details.to_string(),
        }
    }

    fn connect(&mut self) -> Result<&mut Box<dyn SerialPort>, RainError> {
        if self.port.is_none() {
            let port = serialport::new(&self.port_name, BAUD_RATE)
                .timeout(READ_TIMEOUT)
                .open()
                .map_err(|e| self.unavailable(e))?;
            debug!(port = %self.port_name, "opened scanner port");
            self.port = Some(port);
        }
        let name = self.port_name.clone();
        self.port.as_mut().ok_or(RainError::SensorUnavailable {
            sensor: name,
            details: "port not open".to_string(),
        })
    }

    fn send(&mut self, cmd: u8, payload: &[u8]) -> Result<(), RainError> {
        let req = encode_command(cmd, payload);
        let port = self.connect()?;
        let result = port.write_all(&req).and_then(|_| port.flush());
        result.map_err(|e| self.unavailable(e))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), RainError> {
        let port = self.connect()?;
        let result = port.read_exact(buf);
        result.map_err(|e| self.protocol(format!("short read: {e}")))
    }

    fn read_descriptor(&mut self) -> Result<Descriptor, RainError> {
        let mut raw = [0u8; DESCRIPTOR_LEN];
        self.read_exact(&mut raw)?;
        parse_descriptor(&raw).map_err(|e| self.protocol(e))
    }

    fn expect_descriptor(&mut self, size: usize, single: bool, data_type: u8) -> Result<(), RainError> {
        let d = self.read_descriptor()?;
        if d.size != size || d.single != single || d.data_type != data_type {
            return Err(self.protocol(format!("unexpected descriptor {d:?}")));
        }
        Ok(())
    }

    /// Query model, firmware and serial number.
    pub fn info(&mut self) -> Result<DeviceInfo, RainError> {
        self.send(CMD_GET_INFO, &[])?;
        self.expect_descriptor(INFO_LEN, true, INFO_TYPE)?;
        let mut raw = [0u8; INFO_LEN];
        self.read_exact(&mut raw)?;
        Ok(parse_info(&raw))
    }

    /// Query the device's self-diagnosis.
    pub fn health(&mut self) -> Result<(HealthStatus, u16), RainError> {
        self.send(CMD_GET_HEALTH, &[])?;
        self.expect_descriptor(HEALTH_LEN, true, HEALTH_TYPE)?;
        let mut raw = [0u8; HEALTH_LEN];
        self.read_exact(&mut raw)?;
        Ok(parse_health(&raw))
    }

    fn set_pwm(&mut self, pwm: u16) -> Result<(), RainError> {
        self.send(CMD_SET_PWM, &pwm.to_le_bytes())
    }

    fn start_motor(&mut self) -> Result<(), RainError> {
        let port = self.connect()?;
        let result = port.write_data_terminal_ready(false);
        result.map_err(|e| self.unavailable(e))?;
        self.set_pwm(self.motor_pwm)
    }

    fn stop_motor(&mut self) -> Result<(), RainError> {
        self.set_pwm(0)?;
        thread::sleep(Duration::from_millis(1));
        let port = self.connect()?;
        let result = port.write_data_terminal_ready(true);
        result.map_err(|e| self.unavailable(e))
    }

    fn stop_scan(&mut self) -> Result<(), RainError> {
        self.send(CMD_STOP, &[])?;
        thread::sleep(Duration::from_millis(1));
        self.scanning = false;
        self.clear_input()
    }

    fn clear_input(&mut self) -> Result<(), RainError> {
        let port = self.connect()?;
        let result = port.clear(ClearBuffer::Input);
        result.map_err(|e| self.unavailable(e))
    }

    /// Identify the device, then leave it stopped and disconnected.  On
    /// success the serial number becomes the scanner's [`RangeScanner::id`].
    pub fn identify(&mut self) -> Result<DeviceInfo, RainError> {
        self.stop_scan()?;
        self.stop_motor()?;
        let info = self.info();
        self.port = None;
        if let Ok(info) = &info {
            self.id = info.serial_number.clone();
        }
        info
    }
}

impl RangeScanner for RpLidar {
    fn id(&self) -> &str {
        &self.id
    }

    fn start_scan(&mut self) -> Result<(), RainError> {
        if self.scanning {
            self.stop_scan()?;
        }
        self.start_motor()?;
        match self.health()? {
            (HealthStatus::Error, code) => {
                return Err(self.protocol(format!("device reports error state, code {code}")));
            }
            (HealthStatus::Warning, code) => {
                warn!(port = %self.port_name, code, "scanner reports warning state");
            }
            (HealthStatus::Good, _) => {}
        }
        self.send(CMD_SCAN, &[])?;
        self.expect_descriptor(MEASUREMENT_LEN, false, SCAN_TYPE)?;
        self.scanning = true;
        info!(port = %self.port_name, "scan started");
        Ok(())
    }

    fn next_sample(&mut self) -> Result<ScanSample, RainError> {
        if self.max_buf_meas > 0 && self.backlog() > self.max_buf_meas * MEASUREMENT_LEN {
            warn!(port = %self.port_name, "too many bytes in the input buffer, cleaning buffer");
            self.clear_input()?;
        }
        let mut raw = [0u8; MEASUREMENT_LEN];
        self.read_exact(&mut raw)?;
        parse_measurement(&raw).map_err(|e| self.protocol(e))
    }

    fn backlog(&mut self) -> usize {
        match self.port.as_ref().map(|p| p.bytes_to_read()) {
            Some(Ok(n)) => n as usize,
            _ => 0,
        }
    }

    fn shutdown(&mut self) -> Result<(), RainError> {
        if self.port.is_none() {
            return Ok(());
        }
        let stopped = self.stop_scan().and_then(|_| self.stop_motor());
        self.port = None;
        self.scanning = false;
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_without_payload_is_two_bytes() {
        assert_eq!(encode_command(CMD_SCAN, &[]), vec![0xA5, 0x20]);
    }

    #[test]
    fn command_with_payload_carries_size_and_checksum() {
        let req = encode_command(CMD_SET_PWM, &660u16.to_le_bytes());
        assert_eq!(&req[..5], &[0xA5, 0xF0, 0x02, 0x94, 0x02]);
        let checksum = req[..5].iter().fold(0u8, |acc, b| acc ^ b);
        assert_eq!(req[5], checksum);
    }

    #[test]
    fn measurement_decodes_angle_and_distance() {
        // start flag set, quality 15, angle 90° (q6 = 5760), distance 1000 mm (q2 = 4000)
        let angle_q6: u16 = 90 * 64;
        let raw = [
            (15 << 2) | 0b01,
            (((angle_q6 & 0x7F) << 1) as u8) | 1,
            (angle_q6 >> 7) as u8,
            (4000u16 & 0xFF) as u8,
            (4000u16 >> 8) as u8,
        ];
        let sample = parse_measurement(&raw).unwrap();
        assert!(sample.new_rotation);
        assert_eq!(sample.quality, 15);
        assert!((sample.angle_deg - 90.0).abs() < 1e-9);
        assert!((sample.distance_mm - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn measurement_rejects_mismatched_start_flags() {
        let raw = [0b11, 1, 0, 0, 0];
        assert!(parse_measurement(&raw).is_err());
        let raw = [0b00, 1, 0, 0, 0];
        assert!(parse_measurement(&raw).is_err());
    }

    #[test]
    fn measurement_rejects_missing_check_bit() {
        let raw = [0b10, 0, 0, 0, 0];
        assert!(parse_measurement(&raw).is_err());
    }

    #[test]
    fn descriptor_parsing() {
        let raw = [0xA5, 0x5A, 0x05, 0x00, 0x00, 0x40, 0x81];
        let d = parse_descriptor(&raw).unwrap();
        assert_eq!(d.size, 5);
        assert!(!d.single);
        assert_eq!(d.data_type, SCAN_TYPE);

        let bad = [0xA5, 0x00, 0x05, 0x00, 0x00, 0x40, 0x81];
        assert!(parse_descriptor(&bad).is_err());
    }

    #[test]
    fn info_serial_number_is_uppercase_hex() {
        let mut raw = [0u8; INFO_LEN];
        raw[0] = 0x18;
        raw[1] = 29;
        raw[2] = 1;
        raw[3] = 7;
        for (i, b) in raw[4..].iter_mut().enumerate() {
            *b = 0xA0 + i as u8;
        }
        let info = parse_info(&raw);
        assert_eq!(info.model, 0x18);
        assert_eq!(info.firmware, (1, 29));
        assert_eq!(info.hardware, 7);
        assert_eq!(info.serial_number, "A0A1A2A3A4A5A6A7A8A9AAABACADAEAF");
    }

    #[test]
    fn health_status_decoding() {
        assert_eq!(parse_health(&[0, 0, 0]), (HealthStatus::Good, 0));
        assert_eq!(parse_health(&[1, 0, 3]), (HealthStatus::Warning, 3));
        assert_eq!(parse_health(&[2, 1, 0]), (HealthStatus::Error, 256));
    }

    #[test]
    fn unopened_driver_reports_no_backlog() {
        let mut lidar = RpLidar::new("/dev/null-scanner");
        assert_eq!(lidar.backlog(), 0);
        assert_eq!(lidar.id(), "/dev/null-scanner");
        assert!(lidar.shutdown().is_ok());
    }
}
