//! [`ControlLoop`] – the single thread that owns the grid and the relays.
//!
//! Every tick:
//!
//! 1. **Evaluate** – reset the grid, add the latest snapshot of every running
//!    sensor and run the occupancy state machine (auto mode only).
//! 2. **Supervise** – feed rotation counters to the [`Watchdog`].
//! 3. **Render** – hand a [`Frame`] to the [`OperatorConsole`].
//! 4. **Listen** – drain pending [`OperatorEvent`]s.
//! 5. **Drive** – alternate all-on/all-off when the special-mode ticker fires,
//!    then let the grid drive the showers.
//!
//! Sensors publish from their own threads; the loop never waits on them.  The
//! only blocking calls are relay writes, bounded by the bus timeout.
//!
//! # Relay faults
//!
//! A failed write leaves the affected shower's flag untouched, disengages
//! auto-drive, sets [`DriveStatus::Undefined`] and raises an [`Alert`].
//!
//! # Modes
//!
//! Interactive and special mode both suspend auto-drive and stop every
//! running sensor on entry.  On exit all showers are switched off, auto-drive
//! returns to its value before entry and the sensors the operator still wants
//! are restarted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver};
use rainroom_hal::relay::RelayBus;
use rainroom_kernel::{Grid, Watchdog};
use rainroom_perception::{Calibration, RotationSnapshot, SensorWorker};
use rainroom_types::{Alert, Point2, RainError};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigStore, InstallationConfig};
use crate::console::{CellView, DriveStatus, Frame, OperatorConsole, OperatorEvent, SensorView};

const ALERT_SOURCE: &str = "rainroom-runtime::control_loop";

/// Which policy currently owns the showers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Showers follow occupancy (while auto-drive is engaged).
    Auto,
    /// Operator toggles single showers.
    Interactive,
    /// All-on / all-off alternation.
    Special,
}

// ────────────────────────────────────────────────────────────────────────────
// ControlLoop
// ────────────────────────────────────────────────────────────────────────────

pub struct ControlLoop<B, C> {
    grid: Grid,
    bus: B,
    console: C,
    workers: Vec<SensorWorker>,
    /// Operator's wish per worker, kept while a mode has them stopped.
    wanted: Vec<bool>,
    config: InstallationConfig,
    store: Option<ConfigStore>,
    mode: Mode,
    special_ticker: Option<Receiver<Instant>>,
    watchdog: Watchdog,
    status: DriveStatus,
    shutdown: Arc<AtomicBool>,
    loop_time: Duration,
    relay_time: Duration,
}

impl<B: RelayBus, C: OperatorConsole> ControlLoop<B, C> {
    pub fn new(grid: Grid, bus: B, console: C, config: InstallationConfig) -> Self {
        Self {
            grid,
            bus,
            console,
            workers: Vec::new(),
            wanted: Vec::new(),
            config,
            store: None,
            mode: Mode::Auto,
            special_ticker: None,
            watchdog: Watchdog::default(),
            status: DriveStatus::Idle,
            shutdown: Arc::new(AtomicBool::new(false)),
            loop_time: Duration::ZERO,
            relay_time: Duration::ZERO,
        }
    }

    /// Persist settings to `store` after every change.
    pub fn with_store(mut self, store: ConfigStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_watchdog(mut self, watchdog: Watchdog) -> Self {
        self.watchdog = watchdog;
        self
    }

    /// Flag that ends [`run`][Self::run] after the current tick when set.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    pub fn console_mut(&mut self) -> &mut C {
        &mut self.console
    }

    pub fn config(&self) -> &InstallationConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn status(&self) -> DriveStatus {
        self.status
    }

    pub fn workers(&self) -> &[SensorWorker] {
        &self.workers
    }

    /// Adopt a sensor worker.  Its calibration and activation come from the
    /// stored settings; an active sensor is started right away.
    ///
    /// # Errors
    ///
    /// Returns [`RainError::DimensionMismatch`] when the worker publishes
    /// count grids of a different shape than the grid.
    pub fn register_worker(&mut self, worker: SensorWorker) -> Result<(), RainError> {
        if worker.dimensions() != self.grid.dimensions() {
            return Err(RainError::DimensionMismatch {
                expected: self.grid.dimensions(),
                actual: worker.dimensions(),
            });
        }
        let settings = self.config.sensor(worker.id());
        worker.set_calibration(Calibration::new(settings.x_shift, settings.y_shift));
        info!(sensor = %worker.id(), active = settings.active, "sensor registered");

        self.workers.push(worker);
        self.wanted.push(settings.active);
        if settings.active && self.mode == Mode::Auto {
            self.start_worker(self.workers.len() - 1);
        }
        Ok(())
    }

    /// Tick until shut down, then stop every sensor and leave auto-drive off.
    pub fn run(&mut self) {
        info!(period = ?self.config.tick(), "control loop running");
        self.console.set_status(self.status);
        while self.tick() {
            if let Some(rest) = self.config.tick().checked_sub(self.loop_time) {
                thread::sleep(rest);
            }
        }
        self.finish();
    }

    /// Run one cycle.  Returns `false` once shutdown was requested.
    pub fn tick(&mut self) -> bool {
        let started = Instant::now();

        if self.mode == Mode::Auto {
            self.grid.reset_state();
            let snapshots: Vec<Arc<RotationSnapshot>> = self
                .workers
                .iter()
                .filter(|w| w.is_running())
                .map(SensorWorker::snapshot)
                .collect();
            self.grid.update_states(snapshots.iter().map(|s| &s.counts));
        }

        self.supervise_sensors();
        let frame = self.frame();
        self.console.render(&frame);

        while let Some(event) = self.console.poll_event() {
            self.handle_event(event);
            if self.shutdown.load(Ordering::Acquire) {
                return false;
            }
        }

        let alternate = self
            .special_ticker
            .as_ref()
            .is_some_and(|ticker| ticker.try_recv().is_ok());
        if alternate && let Err(e) = self.grid.toggle_static(&mut self.bus) {
            self.relay_fault("special mode alternation", e);
        }

        match self.grid.update_showers(&mut self.bus) {
            Ok(elapsed) => self.relay_time = elapsed,
            Err(e) => {
                self.relay_time = started.elapsed();
                self.relay_fault("shower update", e);
            }
        }

        self.loop_time = started.elapsed();
        !self.shutdown.load(Ordering::Acquire)
    }

    /// Leave the room dry: sensors stopped, auto-drive off, every shower off.
    fn finish(&mut self) {
        self.special_ticker = None;
        self.stop_all_workers();
        self.grid.deactivate();
        match self.grid.off_all(&mut self.bus) {
            Ok(()) => self.set_status(DriveStatus::OffAll),
            Err(e) => self.relay_fault("shutdown all off", e),
        }
        info!("control loop stopped");
    }

    // ── Events ──────────────────────────────────────────────────────────────

    fn handle_event(&mut self, event: OperatorEvent) {
        debug!(?event, mode = ?self.mode, "operator event");
        match event {
            OperatorEvent::SetOrigin { x, y } => match self.grid.set_origin(x, y) {
                Ok(()) => {
                    self.config.x_origin = x;
                    self.config.y_origin = y;
                    self.persist();
                }
                Err(e) => {
                    warn!(error = %e, "origin change refused");
                    self.console.alert(&Alert::new(ALERT_SOURCE, e.to_string()));
                }
            },
            OperatorEvent::SetSensitivity(sensitivity) => {
                self.grid.set_sensitivity(sensitivity);
                self.config.sensitivity = sensitivity;
                self.persist();
            }
            OperatorEvent::Activate if self.mode == Mode::Auto => {
                self.grid.activate();
                self.set_status(DriveStatus::Active);
            }
            OperatorEvent::OnAll if self.mode == Mode::Auto => {
                self.grid.deactivate();
                match self.grid.on_all(&mut self.bus) {
                    Ok(()) => self.set_status(DriveStatus::OnAll),
                    Err(e) => self.relay_fault("all on", e),
                }
            }
            OperatorEvent::OffAll if self.mode == Mode::Auto => {
                self.grid.deactivate();
                match self.grid.off_all(&mut self.bus) {
                    Ok(()) => self.set_status(DriveStatus::OffAll),
                    Err(e) => self.relay_fault("all off", e),
                }
            }
            OperatorEvent::EnterInteractive if self.mode == Mode::Auto => {
                self.enter_mode(Mode::Interactive);
            }
            OperatorEvent::EnterSpecial if self.mode == Mode::Auto => {
                self.enter_mode(Mode::Special);
            }
            OperatorEvent::ExitInteractive if self.mode == Mode::Interactive => self.exit_mode(),
            OperatorEvent::ExitSpecial if self.mode == Mode::Special => self.exit_mode(),
            OperatorEvent::Pointer { x, y } if self.mode == Mode::Interactive => {
                match self.grid.switch(&mut self.bus, Point2::new(x, y)) {
                    Ok(Some((row, col))) => debug!(row, col, "shower toggled"),
                    Ok(None) => {}
                    Err(e) => self.relay_fault("shower toggle", e),
                }
            }
            OperatorEvent::SetSensorActive { sensor, active } => {
                let Some(idx) = self.find_worker(&sensor) else {
                    warn!(sensor = %sensor, "unknown sensor");
                    return;
                };
                self.wanted[idx] = active;
                if self.mode == Mode::Auto {
                    if active {
                        self.start_worker(idx);
                    } else {
                        self.stop_worker(idx);
                    }
                }
                self.config.sensor_mut(&sensor).active = active;
                self.persist();
            }
            OperatorEvent::SetSensorShift { sensor, x, y } => {
                let Some(idx) = self.find_worker(&sensor) else {
                    warn!(sensor = %sensor, "unknown sensor");
                    return;
                };
                self.workers[idx].set_calibration(Calibration::new(x, y));
                let settings = self.config.sensor_mut(&sensor);
                settings.x_shift = x;
                settings.y_shift = y;
                self.persist();
            }
            OperatorEvent::SetAllPoints(all_points) => {
                for worker in &self.workers {
                    worker.set_all_points(all_points);
                }
            }
            OperatorEvent::Quit => {
                info!("shutdown requested");
                self.shutdown.store(true, Ordering::Release);
            }
            other => debug!(event = ?other, mode = ?self.mode, "event ignored in this mode"),
        }
    }

    fn enter_mode(&mut self, mode: Mode) {
        self.grid.deactivate();
        self.grid.reset_state();
        self.stop_all_workers();
        self.mode = mode;

        let (result, status) = match mode {
            Mode::Special => {
                self.special_ticker = Some(channel::tick(self.config.special_interval()));
                (self.grid.on_all(&mut self.bus), DriveStatus::Special)
            }
            _ => (self.grid.off_all(&mut self.bus), DriveStatus::Interactive),
        };
        info!(?mode, "mode entered");
        match result {
            Ok(()) => self.set_status(status),
            Err(e) => self.relay_fault("mode entry", e),
        }
    }

    fn exit_mode(&mut self) {
        info!(mode = ?self.mode, "mode left");
        self.special_ticker = None;
        self.mode = Mode::Auto;
        match self.grid.off_all(&mut self.bus) {
            Ok(()) => {
                self.grid.set_prev_state();
                let status = if self.grid.is_active() {
                    DriveStatus::Active
                } else {
                    DriveStatus::OffAll
                };
                self.set_status(status);
            }
            // Showers are in an unknown state: keep auto-drive off.
            Err(e) => self.relay_fault("mode exit", e),
        }
        for idx in 0..self.workers.len() {
            if self.wanted[idx] {
                self.start_worker(idx);
            }
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────────────

    fn relay_fault(&mut self, action: &str, err: RainError) {
        error!(error = %err, action, "relay write failed");
        if self.grid.is_active() {
            self.grid.deactivate();
        }
        self.set_status(DriveStatus::Undefined);
        let alert = Alert::new(ALERT_SOURCE, format!("{action} failed: {err}"));
        self.console.alert(&alert);
    }

    fn set_status(&mut self, status: DriveStatus) {
        self.status = status;
        self.console.set_status(status);
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(&self.config) {
            warn!(error = %e, "settings not saved");
        }
    }

    fn find_worker(&self, sensor: &str) -> Option<usize> {
        self.workers.iter().position(|w| w.id() == sensor)
    }

    fn start_worker(&mut self, idx: usize) {
        let worker = &mut self.workers[idx];
        match worker.start() {
            Ok(()) => self.watchdog.watch(worker.id(), worker.rotations()),
            Err(e) => warn!(sensor = %worker.id(), error = %e, "sensor not started"),
        }
    }

    fn stop_worker(&mut self, idx: usize) {
        let worker = &mut self.workers[idx];
        if let Err(e) = worker.stop() {
            warn!(sensor = %worker.id(), error = %e, "sensor stopped abnormally");
        }
        self.watchdog.unwatch(worker.id());
    }

    fn stop_all_workers(&mut self) {
        for idx in 0..self.workers.len() {
            if self.workers[idx].is_running() {
                self.stop_worker(idx);
            }
        }
    }

    fn supervise_sensors(&mut self) {
        for worker in self.workers.iter().filter(|w| w.is_running()) {
            self.watchdog.observe(worker.id(), worker.rotations());
        }
        for sensor in self.watchdog.newly_stalled() {
            warn!(sensor = %sensor, "no rotation published, sensor stalled");
        }
    }

    fn frame(&self) -> Frame {
        let geometry = self.grid.geometry().load();
        let cells = self
            .grid
            .cells()
            .iter()
            .map(|cell| {
                let (row, col) = cell.position();
                CellView {
                    row,
                    col,
                    state: cell.state(),
                    occupancy: cell.occupancy(),
                    shower: cell.shower().map(|s| (s.address(), s.is_on())),
                }
            })
            .collect();
        let sensors = self
            .workers
            .iter()
            .map(|w| SensorView {
                id: w.id().to_string(),
                running: w.is_running(),
                snapshot: w.snapshot(),
                backlog: w.backlog(),
                last_rotation: w.last_rotation(),
            })
            .collect();
        Frame {
            status: self.status,
            origin: geometry.origin(),
            corner: geometry.corner(),
            cell_size: geometry.cell_size(),
            cells,
            sensors,
            loop_time: self.loop_time,
            relay_time: self.relay_time,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::config::SensorSettings;
    use rainroom_hal::actuator::FULL_SCALE;
    use rainroom_hal::sim::{SimRelayBus, SimScanner};
    use rainroom_perception::{GridGeometry, SharedGeometry};
    use rainroom_types::CellState;

    #[derive(Default)]
    struct ScriptedConsole {
        events: VecDeque<OperatorEvent>,
        statuses: Vec<DriveStatus>,
        alerts: Vec<Alert>,
        last_frame: Option<Frame>,
    }

    impl ScriptedConsole {
        fn push(&mut self, event: OperatorEvent) {
            self.events.push_back(event);
        }
    }

    impl OperatorConsole for ScriptedConsole {
        fn render(&mut self, frame: &Frame) {
            self.last_frame = Some(frame.clone());
        }

        fn poll_event(&mut self) -> Option<OperatorEvent> {
            self.events.pop_front()
        }

        fn set_status(&mut self, status: DriveStatus) {
            self.statuses.push(status);
        }

        fn alert(&mut self, alert: &Alert) {
            self.alerts.push(alert.clone());
        }
    }

    type TestLoop = ControlLoop<SimRelayBus, ScriptedConsole>;

    fn control(bus: &SimRelayBus, config: InstallationConfig) -> TestLoop {
        let grid = Grid::installation((config.x_origin, config.y_origin), config.sensitivity);
        ControlLoop::new(grid, bus.clone(), ScriptedConsole::default(), config)
    }

    /// A sensor called "sim" shifted so that its returns land in cell (1, 2).
    fn with_sensor(bus: &SimRelayBus, active: bool) -> TestLoop {
        let mut config = InstallationConfig::default();
        config.sensors.insert(
            "sim".to_string(),
            SensorSettings {
                active,
                x_shift: 1500,
                y_shift: 1200,
            },
        );
        let mut cl = control(bus, config);
        let scanner = SimScanner::new("sim")
            .rotation(&[(0.0, 100.0); 8])
            .repeating(true);
        let worker = SensorWorker::new(
            Box::new(scanner),
            cl.grid().geometry(),
            Calibration::default(),
        );
        cl.register_worker(worker).unwrap();
        cl
    }

    fn send(cl: &mut TestLoop, event: OperatorEvent) -> bool {
        cl.console_mut().push(event);
        cl.tick()
    }

    fn showers_on(cl: &TestLoop) -> usize {
        cl.grid()
            .cells()
            .iter()
            .filter_map(|c| c.shower())
            .filter(|s| s.is_on())
            .count()
    }

    #[test]
    fn relay_timeout_disengages_auto_drive_and_alerts() {
        let bus = SimRelayBus::new();
        let mut cl = control(&bus, InstallationConfig::default());
        bus.set_failure(Some(RainError::TransportTimeout {
            unit: 1,
            register: 1,
        }));

        send(&mut cl, OperatorEvent::Activate);

        assert!(!cl.grid().is_active());
        assert_eq!(cl.status(), DriveStatus::Undefined);
        assert_eq!(cl.console().alerts.len(), 1);
        assert!(cl.console().alerts[0].message.contains("timed out"));
        assert_eq!(showers_on(&cl), 0);

        // No further writes are attempted while disengaged.
        bus.set_failure(None);
        cl.tick();
        assert!(bus.writes().is_empty());
        assert_eq!(cl.console().alerts.len(), 1);
    }

    #[test]
    fn occupancy_switches_showers_off_around_a_person() {
        let bus = SimRelayBus::new();
        let mut cl = with_sensor(&bus, true);
        assert!(cl.workers()[0].is_running());
        send(&mut cl, OperatorEvent::Activate);
        assert_eq!(cl.status(), DriveStatus::Active);

        let mut seen = false;
        for _ in 0..2_000 {
            cl.tick();
            if cl.grid().cell(1, 2).state() == CellState::Green {
                seen = true;
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert!(seen, "sensor hits never reached the grid");

        let grid = cl.grid();
        assert!(!grid.cell(1, 2).shower().unwrap().is_on());
        assert!(!grid.cell(0, 1).shower().unwrap().is_on());
        assert!(grid.cell(3, 4).shower().unwrap().is_on());
        let addr = grid.cell(1, 2).shower().unwrap().address();
        assert_ne!(bus.value(addr.unit, addr.register()), Some(FULL_SCALE));

        let frame = cl.console().last_frame.as_ref().unwrap();
        assert_eq!(frame.cells.len(), 20);
        assert_eq!(frame.sensors.len(), 1);
        assert!(frame.sensors[0].running);
    }

    #[test]
    fn interactive_mode_round_trip() {
        let bus = SimRelayBus::new();
        let mut cl = with_sensor(&bus, true);
        send(&mut cl, OperatorEvent::Activate);

        send(&mut cl, OperatorEvent::EnterInteractive);
        assert_eq!(cl.mode(), Mode::Interactive);
        assert_eq!(cl.status(), DriveStatus::Interactive);
        assert!(!cl.grid().is_active());
        assert!(!cl.workers()[0].is_running());
        assert_eq!(showers_on(&cl), 0);

        // Activation is not available while interactive.
        send(&mut cl, OperatorEvent::Activate);
        assert!(!cl.grid().is_active());

        send(&mut cl, OperatorEvent::Pointer { x: 900.0, y: 900.0 });
        assert!(cl.grid().cell(1, 1).shower().unwrap().is_on());
        assert_eq!(showers_on(&cl), 1);

        send(&mut cl, OperatorEvent::ExitInteractive);
        assert_eq!(cl.mode(), Mode::Auto);
        assert!(cl.grid().is_active());
        assert_eq!(cl.status(), DriveStatus::Active);
        assert!(cl.workers()[0].is_running());
    }

    #[test]
    fn pointer_is_ignored_outside_interactive_mode() {
        let bus = SimRelayBus::new();
        let mut cl = control(&bus, InstallationConfig::default());
        send(&mut cl, OperatorEvent::Pointer { x: 900.0, y: 900.0 });
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn special_mode_alternates_and_restores() {
        let bus = SimRelayBus::new();
        let config = InstallationConfig {
            special_interval_ms: 20,
            ..InstallationConfig::default()
        };
        let mut cl = control(&bus, config);

        send(&mut cl, OperatorEvent::EnterSpecial);
        assert_eq!(cl.mode(), Mode::Special);
        assert_eq!(cl.status(), DriveStatus::Special);
        assert_eq!(showers_on(&cl), 16);

        thread::sleep(Duration::from_millis(40));
        cl.tick();
        assert_eq!(showers_on(&cl), 0);

        thread::sleep(Duration::from_millis(40));
        cl.tick();
        assert_eq!(showers_on(&cl), 16);

        send(&mut cl, OperatorEvent::ExitSpecial);
        assert_eq!(cl.mode(), Mode::Auto);
        assert_eq!(cl.status(), DriveStatus::OffAll);
        assert!(!cl.grid().is_active());
        assert_eq!(showers_on(&cl), 0);

        // The ticker is gone: nothing changes any more.
        thread::sleep(Duration::from_millis(40));
        bus.clear_writes();
        cl.tick();
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn special_mode_stops_and_restores_wanted_sensors() {
        let bus = SimRelayBus::new();
        let mut cl = with_sensor(&bus, true);
        send(&mut cl, OperatorEvent::Activate);
        assert!(cl.workers()[0].is_running());

        send(&mut cl, OperatorEvent::EnterSpecial);
        assert_eq!(cl.mode(), Mode::Special);
        assert!(!cl.workers()[0].is_running());
        assert!(cl.workers()[0].snapshot().points.is_empty());

        send(&mut cl, OperatorEvent::ExitSpecial);
        assert_eq!(cl.mode(), Mode::Auto);
        assert!(cl.workers()[0].is_running());
        assert_eq!(cl.workers()[0].calibration(), Calibration::new(1500, 1200));
    }

    #[test]
    fn special_mode_leaves_unwanted_sensor_stopped() {
        let bus = SimRelayBus::new();
        let mut cl = with_sensor(&bus, false);
        send(&mut cl, OperatorEvent::EnterSpecial);
        send(&mut cl, OperatorEvent::ExitSpecial);
        assert!(!cl.workers()[0].is_running());
    }

    #[test]
    fn manual_all_on_and_off_disengage_auto_drive() {
        let bus = SimRelayBus::new();
        let mut cl = control(&bus, InstallationConfig::default());
        send(&mut cl, OperatorEvent::Activate);

        send(&mut cl, OperatorEvent::OnAll);
        assert!(!cl.grid().is_active());
        assert_eq!(cl.status(), DriveStatus::OnAll);
        assert_eq!(showers_on(&cl), 16);

        send(&mut cl, OperatorEvent::OffAll);
        assert_eq!(cl.status(), DriveStatus::OffAll);
        assert_eq!(showers_on(&cl), 0);
    }

    #[test]
    fn settings_changes_are_saved() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let store = ConfigStore::new(dir.path().join("rainroom.toml"));
        let bus = SimRelayBus::new();
        let mut cl = with_sensor(&bus, false).with_store(store.clone());

        send(&mut cl, OperatorEvent::SetOrigin { x: -600, y: 120 });
        send(&mut cl, OperatorEvent::SetSensitivity(2));
        send(
            &mut cl,
            OperatorEvent::SetSensorShift {
                sensor: "sim".to_string(),
                x: 10,
                y: 20,
            },
        );
        send(
            &mut cl,
            OperatorEvent::SetSensorActive {
                sensor: "sim".to_string(),
                active: true,
            },
        );

        assert_eq!(cl.grid().origin(), (-600, 120));
        assert_eq!(cl.grid().sensitivity(), 2);
        assert_eq!(cl.workers()[0].calibration(), Calibration::new(10, 20));
        assert!(cl.workers()[0].is_running());

        let saved = store.load();
        assert_eq!((saved.x_origin, saved.y_origin), (-600, 120));
        assert_eq!(saved.sensitivity, 2);
        assert_eq!(
            saved.sensor("sim"),
            SensorSettings {
                active: true,
                x_shift: 10,
                y_shift: 20
            }
        );
    }

    #[test]
    fn deactivated_sensor_stays_off_after_mode_exit() {
        let bus = SimRelayBus::new();
        let mut cl = with_sensor(&bus, true);
        send(
            &mut cl,
            OperatorEvent::SetSensorActive {
                sensor: "sim".to_string(),
                active: false,
            },
        );
        assert!(!cl.workers()[0].is_running());

        send(&mut cl, OperatorEvent::EnterInteractive);
        send(&mut cl, OperatorEvent::ExitInteractive);
        assert!(!cl.workers()[0].is_running());
    }

    #[test]
    fn all_points_mode_reaches_every_worker() {
        let bus = SimRelayBus::new();
        let mut cl = with_sensor(&bus, false);
        send(&mut cl, OperatorEvent::SetAllPoints(true));
        assert!(cl.workers()[0].all_points());
    }

    #[test]
    fn unconfigured_sensor_starts_on_registration() {
        let bus = SimRelayBus::new();
        let mut cl = control(&bus, InstallationConfig::default());
        let worker = SensorWorker::new(
            Box::new(SimScanner::new("NEW-LIDAR")),
            cl.grid().geometry(),
            Calibration::default(),
        );
        cl.register_worker(worker).unwrap();
        assert!(cl.workers()[0].is_running());
    }

    #[test]
    fn out_of_range_origin_is_refused() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let store = ConfigStore::new(dir.path().join("rainroom.toml"));
        let bus = SimRelayBus::new();
        let mut cl = control(&bus, InstallationConfig::default()).with_store(store.clone());

        assert!(send(&mut cl, OperatorEvent::SetOrigin { x: 2_147_483_000, y: 0 }));
        assert_eq!(cl.grid().origin(), (0, 0));
        assert_eq!(cl.config().x_origin, 0);
        assert_eq!(cl.console().alerts.len(), 1);
        assert!(store.try_load().unwrap().is_none());
    }

    #[test]
    fn worker_with_wrong_dimensions_is_rejected() {
        let bus = SimRelayBus::new();
        let mut cl = control(&bus, InstallationConfig::default());
        let geometry = SharedGeometry::new(GridGeometry::new(0, 0, 600, 3, 3));
        let worker = SensorWorker::new(
            Box::new(SimScanner::new("odd")),
            geometry,
            Calibration::default(),
        );
        let err = cl.register_worker(worker).unwrap_err();
        assert_eq!(
            err,
            RainError::DimensionMismatch {
                expected: (4, 5),
                actual: (3, 3)
            }
        );
        assert!(cl.workers().is_empty());
    }

    #[test]
    fn quit_ends_run_and_stops_sensors() {
        let bus = SimRelayBus::new();
        let mut cl = with_sensor(&bus, true);
        send(&mut cl, OperatorEvent::Activate);
        cl.console_mut().push(OperatorEvent::Quit);

        cl.run();

        assert!(!cl.workers()[0].is_running());
        assert!(!cl.grid().is_active());
    }

    #[test]
    fn shutdown_switches_every_shower_off() {
        let bus = SimRelayBus::new();
        let mut cl = control(&bus, InstallationConfig::default());
        send(&mut cl, OperatorEvent::OnAll);
        assert_eq!(showers_on(&cl), 16);

        cl.shutdown_handle().store(true, Ordering::Release);
        cl.run();

        assert_eq!(showers_on(&cl), 0);
        assert_eq!(cl.status(), DriveStatus::OffAll);
        let last = bus.writes();
        assert!(last[last.len() - 16..].iter().all(|w| w.value == 0));
    }

    #[test]
    fn failed_shutdown_write_is_reported() {
        let bus = SimRelayBus::new();
        let mut cl = control(&bus, InstallationConfig::default());
        send(&mut cl, OperatorEvent::OnAll);
        bus.set_failure(Some(RainError::TransportTimeout {
            unit: 1,
            register: 1,
        }));

        cl.shutdown_handle().store(true, Ordering::Release);
        cl.run();

        assert_eq!(cl.status(), DriveStatus::Undefined);
        assert_eq!(cl.console().alerts.len(), 1);
    }

    #[test]
    fn shutdown_handle_stops_the_loop() {
        let bus = SimRelayBus::new();
        let mut cl = control(&bus, InstallationConfig::default());
        let handle = cl.shutdown_handle();
        handle.store(true, Ordering::Release);
        assert!(!cl.tick());
        cl.run();
    }
}
