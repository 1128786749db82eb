//! In-process simulation doubles for running without physical hardware.
//!
//! [`SimRelayBus`] records every register write and can be told to fail, so
//! tests can assert on exactly what would have gone out on the wire.
//! [`SimScanner`] replays a scripted sequence of samples and faults.
//!
//! # Example
//!
//! ```rust
//! use rainroom_hal::relay::RelayBus;
//! use rainroom_hal::sim::SimRelayBus;
//!
//! let bus = SimRelayBus::new();
//! let mut handle = bus.clone();
//! handle.write_register(1, 1, 255).unwrap();
//! assert_eq!(bus.value(1, 1), Some(255));
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use rainroom_types::RainError;

use crate::relay::RelayBus;
use crate::scanner::{RangeScanner, ScanSample};

// ────────────────────────────────────────────────────────────────────────────
// Relay bus
// ────────────────────────────────────────────────────────────────────────────

/// One recorded register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayWrite {
    pub unit: u8,
    pub register: u16,
    pub value: u16,
}

#[derive(Default)]
struct RelayState {
    writes: Vec<RelayWrite>,
    registers: HashMap<(u8, u16), u16>,
    failure: Option<RainError>,
}

/// A relay network that always answers instantly.  Clones share state, so a
/// test can keep one handle and move another into the code under test.
#[derive(Clone, Default)]
pub struct SimRelayBus {
    state: Arc<Mutex<RelayState>>,
}

impl SimRelayBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every subsequent write fail with `error` until cleared with
    /// `None`.
    pub fn set_failure(&self, error: Option<RainError>) {
        self.lock().failure = error;
    }

    /// All successful writes, oldest first.
    pub fn writes(&self) -> Vec<RelayWrite> {
        self.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Last value written to `register` on `unit`.
    pub fn value(&self, unit: u8, register: u16) -> Option<u16> {
        self.lock().registers.get(&(unit, register)).copied()
    }
}

impl RelayBus for SimRelayBus {
    fn write_register(&mut self, unit: u8, register: u16, value: u16) -> Result<(), RainError> {
        let mut state = self.lock();
        if let Some(err) = state.failure.clone() {
            return Err(err);
        }
        state.writes.push(RelayWrite {
            unit,
            register,
            value,
        });
        state.registers.insert((unit, register), value);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scanner
// ────────────────────────────────────────────────────────────────────────────

/// One step of a scripted scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScanStep {
    Sample(ScanSample),
    /// Report a protocol fault instead of a sample.
    Fault,
}

/// Counters a test can read while the scanner is owned by a worker thread.
#[derive(Debug, Default)]
pub struct ScannerProbe {
    pub starts: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub faults: AtomicUsize,
}

impl ScannerProbe {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn faults(&self) -> usize {
        self.faults.load(Ordering::SeqCst)
    }
}

/// A scanner that replays a script.  Once the script runs out it either
/// starts over (`repeating`) or idles, yielding invalid zero-range samples.
pub struct SimScanner {
    id: String,
    script: Vec<ScanStep>,
    cursor: usize,
    repeating: bool,
    sample_delay: Duration,
    backlog: usize,
    probe: Arc<ScannerProbe>,
}

impl SimScanner {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            script: Vec::new(),
            cursor: 0,
            repeating: false,
            sample_delay: Duration::from_micros(200),
            backlog: 0,
            probe: Arc::new(ScannerProbe::default()),
        }
    }

    /// Append one rotation of `(angle_deg, distance_mm)` samples.  The first
    /// sample carries the new-rotation marker.
    pub fn rotation(mut self, samples: &[(f64, f64)]) -> Self {
        for (i, &(angle_deg, distance_mm)) in samples.iter().enumerate() {
            self.script.push(ScanStep::Sample(ScanSample {
                new_rotation: i == 0,
                quality: 15,
                angle_deg,
                distance_mm,
            }));
        }
        self
    }

    /// Append a bare rotation marker, closing the preceding rotation.
    pub fn boundary(mut self) -> Self {
        self.script.push(ScanStep::Sample(ScanSample {
            new_rotation: true,
            quality: 0,
            angle_deg: 0.0,
            distance_mm: 0.0,
        }));
        self
    }

    pub fn fault(mut self) -> Self {
        self.script.push(ScanStep::Fault);
        self
    }

    pub fn repeating(mut self, repeating: bool) -> Self {
        self.repeating = repeating;
        self
    }

    pub fn sample_delay(mut self, delay: Duration) -> Self {
        self.sample_delay = delay;
        self
    }

    /// Fixed value reported by [`RangeScanner::backlog`].
    pub fn with_backlog(mut self, backlog: usize) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn probe(&self) -> Arc<ScannerProbe> {
        Arc::clone(&self.probe)
    }

    fn idle_sample() -> ScanSample {
        ScanSample {
            new_rotation: false,
            quality: 0,
            angle_deg: 0.0,
            distance_mm: 0.0,
        }
    }
}

impl RangeScanner for SimScanner {
    fn id(&self) -> &str {
        &self.id
    }

    fn start_scan(&mut self) -> Result<(), RainError> {
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn next_sample(&mut self) -> Result<ScanSample, RainError> {
        if !self.sample_delay.is_zero() {
            thread::sleep(self.sample_delay);
        }
        if self.cursor >= self.script.len() {
            if self.repeating && !self.script.is_empty() {
                self.cursor = 0;
            } else {
                return Ok(Self::idle_sample());
            }
        }
        let step = self.script[self.cursor];
        self.cursor += 1;
        match step {
            ScanStep::Sample(sample) => Ok(sample),
            ScanStep::Fault => {
                self.probe.faults.fetch_add(1, Ordering::SeqCst);
                Err(RainError::SensorProtocol {
                    sensor: self.id.clone(),
                    details: "scripted fault".to_string(),
                })
            }
        }
    }

    fn backlog(&mut self) -> usize {
        self.backlog
    }

    fn shutdown(&mut self) -> Result<(), RainError> {
        self.probe.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
