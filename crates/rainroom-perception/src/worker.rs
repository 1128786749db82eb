//! [`SensorWorker`] – one acquisition thread per range scanner.
//!
//! The worker owns its device while running.  Every valid sample is moved into
//! the installation plane, binned against the shared [`GridGeometry`] and
//! accumulated until the scanner reports the start of a new rotation.  At that
//! boundary the finished rotation is published as a single
//! [`RotationSnapshot`] through an [`ArcSwap`], so readers see either the
//! previous rotation or the new one, never a mix.
//!
//! Everything the control loop may touch while the thread runs lives in
//! [`WorkerShared`] as atomics; each field is consistent on its own.
//!
//! [`GridGeometry`]: crate::geometry::GridGeometry

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use rainroom_hal::scanner::RangeScanner;
use rainroom_types::{Point2, RainError};
use tracing::{debug, info, warn};

use crate::geometry::{CountGrid, SharedGeometry};
use crate::transform::Calibration;

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Tuning knobs for the acquisition loop.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Rotations with fewer valid samples than this are dropped as noise.
    pub min_rotation_samples: usize,
    /// Pause between failed attempts to (re)start the sample stream.
    pub restart_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            min_rotation_samples: 6,
            restart_backoff: Duration::from_millis(250),
        }
    }
}

/// Points and per-cell counts from one complete rotation.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationSnapshot {
    pub points: Vec<Point2>,
    pub counts: CountGrid,
}

impl RotationSnapshot {
    pub fn empty(height: usize, width: usize) -> Self {
        Self {
            points: Vec::new(),
            counts: CountGrid::new(height, width),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Shared state
// ────────────────────────────────────────────────────────────────────────────

struct WorkerShared {
    active: AtomicBool,
    all_points: AtomicBool,
    shift_x: AtomicI32,
    shift_y: AtomicI32,
    snapshot: ArcSwap<RotationSnapshot>,
    backlog: AtomicUsize,
    rotation_nanos: AtomicU64,
    rotations: AtomicU64,
}

impl WorkerShared {
    fn calibration(&self) -> Calibration {
        Calibration::new(
            self.shift_x.load(Ordering::Relaxed),
            self.shift_y.load(Ordering::Relaxed),
        )
    }

    fn publish(&self, snapshot: RotationSnapshot, elapsed: Duration) {
        self.snapshot.store(Arc::new(snapshot));
        self.rotation_nanos
            .store(elapsed.as_nanos() as u64, Ordering::Relaxed);
        self.rotations.fetch_add(1, Ordering::Release);
    }

    fn clear(&self, height: usize, width: usize) {
        self.snapshot
            .store(Arc::new(RotationSnapshot::empty(height, width)));
        self.backlog.store(0, Ordering::Relaxed);
        self.rotation_nanos.store(0, Ordering::Relaxed);
    }
}

/// Samples gathered since the last rotation boundary.
struct Accumulator {
    points: Vec<Point2>,
    counts: CountGrid,
    valid: usize,
    /// `false` until a rotation marker has been seen, so a rotation joined
    /// half-way is never published.
    aligned: bool,
}

impl Accumulator {
    fn new(height: usize, width: usize) -> Self {
        Self {
            points: Vec::new(),
            counts: CountGrid::new(height, width),
            valid: 0,
            aligned: false,
        }
    }

    fn restart(&mut self, aligned: bool) {
        self.points.clear();
        self.counts.clear();
        self.valid = 0;
        self.aligned = aligned;
    }

    fn take(&mut self) -> RotationSnapshot {
        let (height, width) = self.counts.dimensions();
        RotationSnapshot {
            points: std::mem::take(&mut self.points),
            counts: std::mem::replace(&mut self.counts, CountGrid::new(height, width)),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SensorWorker
// ────────────────────────────────────────────────────────────────────────────

/// Restartable acquisition loop around one [`RangeScanner`].
///
/// ```rust
/// use rainroom_hal::sim::SimScanner;
/// use rainroom_perception::{Calibration, GridGeometry, SensorWorker, SharedGeometry};
///
/// let geometry = SharedGeometry::new(GridGeometry::new(0, 0, 600, 4, 5));
/// let scanner = SimScanner::new("sim0");
/// let worker = SensorWorker::new(Box::new(scanner), geometry, Calibration::default());
/// assert!(!worker.is_running());
/// assert!(worker.snapshot().points.is_empty());
/// ```
pub struct SensorWorker {
    id: String,
    dimensions: (usize, usize),
    config: WorkerConfig,
    geometry: SharedGeometry,
    shared: Arc<WorkerShared>,
    device: Option<Box<dyn RangeScanner>>,
    handle: Option<JoinHandle<Box<dyn RangeScanner>>>,
}

impl SensorWorker {
    pub fn new(
        device: Box<dyn RangeScanner>,
        geometry: SharedGeometry,
        calibration: Calibration,
    ) -> Self {
        let (height, width) = geometry.load().dimensions();
        let shared = WorkerShared {
            active: AtomicBool::new(false),
            all_points: AtomicBool::new(false),
            shift_x: AtomicI32::new(calibration.shift_x),
            shift_y: AtomicI32::new(calibration.shift_y),
            snapshot: ArcSwap::from_pointee(RotationSnapshot::empty(height, width)),
            backlog: AtomicUsize::new(0),
            rotation_nanos: AtomicU64::new(0),
            rotations: AtomicU64::new(0),
        };
        Self {
            id: device.id().to_string(),
            dimensions: (height, width),
            config: WorkerConfig::default(),
            geometry,
            shared: Arc::new(shared),
            device: Some(device),
            handle: None,
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// `(height, width)` of every count grid this worker publishes.
    pub fn dimensions(&self) -> (usize, usize) {
        self.dimensions
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn calibration(&self) -> Calibration {
        self.shared.calibration()
    }

    /// Takes effect from the next sample on.
    pub fn set_calibration(&self, calibration: Calibration) {
        self.shared
            .shift_x
            .store(calibration.shift_x, Ordering::Relaxed);
        self.shared
            .shift_y
            .store(calibration.shift_y, Ordering::Relaxed);
    }

    pub fn all_points(&self) -> bool {
        self.shared.all_points.load(Ordering::Relaxed)
    }

    /// Keep every valid point in the snapshot, not only those inside the grid.
    pub fn set_all_points(&self, all_points: bool) {
        self.shared.all_points.store(all_points, Ordering::Relaxed);
    }

    /// Latest complete rotation (empty while stopped).
    pub fn snapshot(&self) -> Arc<RotationSnapshot> {
        self.shared.snapshot.load_full()
    }

    /// Bytes waiting in the device input buffer at the last sample.
    pub fn backlog(&self) -> usize {
        self.shared.backlog.load(Ordering::Relaxed)
    }

    /// Time between the last two publications.
    pub fn last_rotation(&self) -> Duration {
        Duration::from_nanos(self.shared.rotation_nanos.load(Ordering::Relaxed))
    }

    /// Rotations published since construction.  Never reset, so a supervisor
    /// can detect progress across restarts.
    pub fn rotations(&self) -> u64 {
        self.shared.rotations.load(Ordering::Acquire)
    }

    /// Spawn the acquisition thread.  Starting a running worker is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RainError::Worker`] if the device was lost by an earlier
    /// panic or the OS refused to spawn the thread.
    pub fn start(&mut self) -> Result<(), RainError> {
        if self.handle.is_some() {
            return Ok(());
        }
        let mut device = self
            .device
            .take()
            .ok_or_else(|| RainError::Worker(format!("{}: device lost", self.id)))?;

        self.shared.active.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let geometry = self.geometry.clone();
        let config = self.config;

        let handle = thread::Builder::new()
            .name(format!("scan-{}", self.id))
            .spawn(move || {
                acquire(device.as_mut(), &shared, &geometry, &config);
                device
            })
            .map_err(|e| {
                self.shared.active.store(false, Ordering::Release);
                RainError::Worker(format!("{}: spawn failed: {e}", self.id))
            })?;

        info!(sensor = %self.id, "sensor worker started");
        self.handle = Some(handle);
        Ok(())
    }

    /// Signal the thread to finish and wait for it.  The published snapshot is
    /// empty once this returns.  Stopping a stopped worker is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RainError::Worker`] if the thread panicked; the device is
    /// then gone and the worker cannot be restarted.
    pub fn stop(&mut self) -> Result<(), RainError> {
        self.shared.active.store(false, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let joined = handle.join();
        let (height, width) = self.dimensions;
        self.shared.clear(height, width);
        match joined {
            Ok(device) => {
                self.device = Some(device);
                info!(sensor = %self.id, "sensor worker stopped");
                Ok(())
            }
            Err(_) => Err(RainError::Worker(format!("{}: thread panicked", self.id))),
        }
    }
}

impl Drop for SensorWorker {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(sensor = %self.id, error = %e, "sensor worker ended badly");
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Acquisition loop
// ────────────────────────────────────────────────────────────────────────────

fn acquire(
    device: &mut dyn RangeScanner,
    shared: &WorkerShared,
    geometry: &SharedGeometry,
    config: &WorkerConfig,
) {
    let id = device.id().to_string();
    let (height, width) = geometry.load().dimensions();
    let mut acc = Accumulator::new(height, width);
    let mut last_publish = Instant::now();
    let mut streaming = false;

    while shared.active.load(Ordering::Acquire) {
        if !streaming {
            match device.start_scan() {
                Ok(()) => {
                    streaming = true;
                    acc.restart(false);
                    debug!(sensor = %id, "scan stream started");
                }
                Err(e) => {
                    warn!(sensor = %id, error = %e, "cannot start scan, retrying");
                    thread::sleep(config.restart_backoff);
                }
            }
            continue;
        }

        let sample = match device.next_sample() {
            Ok(sample) => sample,
            Err(e) => {
                warn!(sensor = %id, error = %e, "scan stream fault, reinitialising");
                streaming = false;
                continue;
            }
        };
        shared.backlog.store(device.backlog(), Ordering::Relaxed);

        if sample.new_rotation {
            if acc.aligned && acc.valid >= config.min_rotation_samples {
                let now = Instant::now();
                shared.publish(acc.take(), now - last_publish);
                last_publish = now;
            } else if acc.aligned {
                debug!(sensor = %id, samples = acc.valid, "short rotation discarded");
            }
            acc.restart(true);
        }

        if sample.distance_mm <= 0.0 {
            continue;
        }
        acc.valid += 1;
        let point = shared
            .calibration()
            .to_plane(sample.distance_mm, sample.angle_deg);
        match geometry.load().bin_inclusive(point) {
            Some((row, col)) => {
                acc.counts.increment(row, col);
                acc.points.push(point);
            }
            None if shared.all_points.load(Ordering::Relaxed) => acc.points.push(point),
            None => {}
        }
    }

    if let Err(e) = device.shutdown() {
        warn!(sensor = %id, error = %e, "scanner shutdown failed");
    }
    shared.clear(height, width);
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
