//! `rainroom-cli` – Rainroom installation binary
//!
//! Boots the whole installation from a terminal:
//!
//! 1. Loads `rainroom.toml` (or `$RAINROOM_CONFIG`), falling back to defaults.
//! 2. Builds the installed 4×5 grid at the stored origin and sensitivity.
//! 3. Enumerates serial ports and identifies every RPLidar found, or uses a
//!    simulated scanner and relay bus with `--simulate`.
//! 4. Connects to the relay gateway (`RAINROOM_RELAY_HOST`/`_PORT` override
//!    the stored address).
//! 5. Runs the control loop with a terminal console until `quit` or Ctrl-C.

mod terminal;

use std::process::ExitCode;
use std::sync::atomic::Ordering;

use colored::Colorize;
use tracing::{debug, error, info, warn};

use rainroom_hal::sim::{SimRelayBus, SimScanner};
use rainroom_hal::{RangeScanner, RelayBus, RpLidar, RtuOverTcpClient};
use rainroom_kernel::Grid;
use rainroom_perception::{Calibration, SensorWorker};
use rainroom_runtime::{ConfigStore, ControlLoop};

use terminal::TerminalConsole;

fn main() -> ExitCode {
    let _guard = rainroom_runtime::init_tracing("rainroom");

    print_banner();

    let simulate = std::env::args()
        .skip(1)
        .any(|arg| arg == "--simulate" || arg == "-s");

    // ── Settings ──────────────────────────────────────────────────────────
    let store = ConfigStore::from_env();
    let config = store.load();
    println!(
        "  Settings from {}",
        store.path().display().to_string().bold()
    );

    let grid = Grid::installation((config.x_origin, config.y_origin), config.sensitivity);

    // ── Devices ───────────────────────────────────────────────────────────
    let scanners = if simulate {
        println!("  {}", "Simulation mode: no hardware is touched.".yellow());
        simulated_scanners()
    } else {
        discover_scanners()
    };
    if scanners.is_empty() {
        println!("  {}", "No range scanner found.".yellow());
    }

    let bus: Box<dyn RelayBus> = if simulate {
        Box::new(SimRelayBus::new())
    } else {
        let relay = config.relay.clone().with_env_overrides();
        println!(
            "  Relay gateway at {}",
            format!("{}:{}", relay.host, relay.port).bold()
        );
        Box::new(RtuOverTcpClient::new(relay.host.clone(), relay.port, relay.timeout()))
    };

    // ── Control loop ──────────────────────────────────────────────────────
    let geometry = grid.geometry();
    let mut control =
        ControlLoop::new(grid, bus, TerminalConsole::spawn(), config).with_store(store);

    for scanner in scanners {
        let worker = SensorWorker::new(scanner, geometry.clone(), Calibration::default());
        let id = worker.id().to_string();
        if let Err(e) = control.register_worker(worker) {
            error!(sensor = %id, error = %e, "sensor rejected");
            println!("  {} {} ({e})", "✗".red().bold(), id);
        }
    }

    let shutdown = control.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – switching off and stopping sensors …".yellow().bold());
        shutdown.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use 'quit' to stop");
    }

    control.run();

    info!("rainroom stopped");
    println!("{}", "  ✓ Sensors stopped, exiting Rainroom.".green());
    ExitCode::SUCCESS
}

// ─────────────────────────────────────────────────────────────────────────────
// Device discovery
// ─────────────────────────────────────────────────────────────────────────────

/// Every serial port that answers as an RPLidar, keyed by serial number.
fn discover_scanners() -> Vec<Box<dyn RangeScanner>> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            warn!(error = %e, "serial port enumeration failed");
            return Vec::new();
        }
    };

    let mut found: Vec<Box<dyn RangeScanner>> = Vec::new();
    for port in ports {
        let mut lidar = RpLidar::new(port.port_name.clone());
        match lidar.identify() {
            Ok(info) => {
                println!(
                    "  {} RPLidar {} on {}",
                    "✓".green().bold(),
                    info.serial_number.bold(),
                    port.port_name
                );
                found.push(Box::new(lidar));
            }
            Err(e) => debug!(port = %port.port_name, error = %e, "not a range scanner"),
        }
    }
    found
}

/// One scanner seeing a person-sized cluster about 1.2 m away at 40–48°.
fn simulated_scanners() -> Vec<Box<dyn RangeScanner>> {
    let rotation: Vec<(f64, f64)> = (0..360)
        .map(|deg| {
            let distance = if (40..48).contains(&deg) { 1200.0 } else { 4000.0 };
            (f64::from(deg), distance)
        })
        .collect();
    let scanner = SimScanner::new("SIM-0001")
        .rotation(&rotation)
        .repeating(true);
    vec![Box::new(scanner)]
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ___       _                              "#.bold().cyan());
    println!("{}", r#"  / _ \ __ _(_)_ __  _ __ ___   ___  _ __ ___  "#.bold().cyan());
    println!("{}", r#" | |_) / _` | | '_ \| '__/ _ \ / _ \| '_ ` _ \ "#.bold().cyan());
    println!("{}", r#" |  _ < (_| | | | | | | | (_) | (_) | | | | | |"#.bold().cyan());
    println!("{}", r#" |_| \_\__,_|_|_| |_|_|  \___/ \___/|_| |_| |_|"#.bold().cyan());
    println!();
    println!("  {} {}",
        "Rainroom".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Showers that stop where people stand");
    println!();
}
