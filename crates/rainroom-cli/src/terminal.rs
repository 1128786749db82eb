//! Terminal operator console.
//!
//! Commands are read line by line on a background thread and handed to the
//! control loop through a channel, so polling never blocks a tick.
//!
//! Supported commands:
//!   activate                 – engage auto-drive
//!   on | off                 – switch every shower on / off
//!   origin <x> <y>           – move the grid (mm)
//!   sens <n>                 – set the sensitivity threshold
//!   interactive start|stop   – manual shower toggling
//!   click <x> <y>            – toggle the shower under a point (interactive)
//!   special start|stop       – all-on / all-off alternation
//!   sensor <id> on|off       – start / stop a scanner
//!   shift <id> <x> <y>       – calibrate a scanner (mm)
//!   points all|grid          – capture every return or only in-grid ones
//!   help                     – show this list
//!   quit                     – stop everything and exit

use std::io::{self, BufRead};
use std::thread;

use colored::{ColoredString, Colorize};
use crossbeam::channel::{self, Receiver};
use rainroom_runtime::{CellView, DriveStatus, Frame, OperatorConsole, OperatorEvent};
use rainroom_types::{Alert, CellState};
use tracing::warn;

/// What one input line asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Event(OperatorEvent),
    Help,
    Nothing,
}

pub struct TerminalConsole {
    lines: Receiver<String>,
    last_grid: Vec<String>,
}

impl TerminalConsole {
    /// Start reading stdin in the background.
    pub fn spawn() -> Self {
        let (tx, rx) = channel::unbounded();
        let reader = thread::Builder::new()
            .name("operator-input".to_string())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        if let Err(e) = reader {
            warn!(error = %e, "operator input unavailable");
        }
        print_help();
        Self {
            lines: rx,
            last_grid: Vec::new(),
        }
    }
}

impl OperatorConsole for TerminalConsole {
    fn render(&mut self, frame: &Frame) {
        let grid = grid_lines(frame);
        if grid == self.last_grid {
            return;
        }
        println!();
        for line in &grid {
            println!("  {line}");
        }
        println!("  {}", instrumentation_line(frame).dimmed());
        self.last_grid = grid;
    }

    fn poll_event(&mut self) -> Option<OperatorEvent> {
        while let Ok(line) = self.lines.try_recv() {
            match parse_command(&line) {
                Ok(Command::Event(event)) => return Some(event),
                Ok(Command::Help) => print_help(),
                Ok(Command::Nothing) => {}
                Err(usage) => println!("{} {}", "✗".red(), usage),
            }
        }
        None
    }

    fn set_status(&mut self, status: DriveStatus) {
        println!("  Showers: {}", status_label(status));
    }

    fn alert(&mut self, alert: &Alert) {
        eprintln!("{} {}", "⚠".red().bold(), alert.message.red());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

fn num<T: std::str::FromStr>(word: Option<&str>, usage: &str) -> Result<T, String> {
    word.and_then(|w| w.parse().ok())
        .ok_or_else(|| format!("usage: {usage}"))
}

fn start_stop(word: Option<&str>, start: OperatorEvent, stop: OperatorEvent, usage: &str) -> Result<Command, String> {
    match word {
        Some("start") => Ok(Command::Event(start)),
        Some("stop") => Ok(Command::Event(stop)),
        _ => Err(format!("usage: {usage}")),
    }
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(Command::Nothing);
    };
    let event = match verb.to_ascii_lowercase().as_str() {
        "help" | "?" => return Ok(Command::Help),
        "quit" | "exit" | "q" => OperatorEvent::Quit,
        "activate" | "a" => OperatorEvent::Activate,
        "on" => OperatorEvent::OnAll,
        "off" => OperatorEvent::OffAll,
        "origin" => OperatorEvent::SetOrigin {
            x: num(words.next(), "origin <x> <y>")?,
            y: num(words.next(), "origin <x> <y>")?,
        },
        "sens" | "sensitivity" => OperatorEvent::SetSensitivity(num(words.next(), "sens <n>")?),
        "interactive" => {
            return start_stop(
                words.next(),
                OperatorEvent::EnterInteractive,
                OperatorEvent::ExitInteractive,
                "interactive start|stop",
            );
        }
        "special" => {
            return start_stop(
                words.next(),
                OperatorEvent::EnterSpecial,
                OperatorEvent::ExitSpecial,
                "special start|stop",
            );
        }
        "click" => OperatorEvent::Pointer {
            x: num(words.next(), "click <x> <y>")?,
            y: num(words.next(), "click <x> <y>")?,
        },
        "sensor" => {
            let usage = "sensor <id> on|off";
            let sensor = words.next().ok_or_else(|| format!("usage: {usage}"))?.to_string();
            let active = match words.next() {
                Some("on") => true,
                Some("off") => false,
                _ => return Err(format!("usage: {usage}")),
            };
            OperatorEvent::SetSensorActive { sensor, active }
        }
        "shift" => {
            let usage = "shift <id> <x> <y>";
            let sensor = words.next().ok_or_else(|| format!("usage: {usage}"))?.to_string();
            OperatorEvent::SetSensorShift {
                sensor,
                x: num(words.next(), usage)?,
                y: num(words.next(), usage)?,
            }
        }
        "points" => match words.next() {
            Some("all") => OperatorEvent::SetAllPoints(true),
            Some("grid") => OperatorEvent::SetAllPoints(false),
            _ => return Err("usage: points all|grid".to_string()),
        },
        other => return Err(format!("unknown command '{other}', try 'help'")),
    };
    Ok(Command::Event(event))
}

// ─────────────────────────────────────────────────────────────────────────────
// Rendering
// ─────────────────────────────────────────────────────────────────────────────

fn cell_glyph(cell: &CellView) -> String {
    let state: ColoredString = match cell.state {
        CellState::Clear => "·".normal(),
        CellState::Yellow => "▲".yellow(),
        CellState::Green => "●".green(),
    };
    let shower: ColoredString = match cell.shower {
        Some((_, true)) => "≈".blue(),
        Some((_, false)) => "_".normal(),
        None => " ".normal(),
    };
    format!("[{state}{shower}]")
}

/// One string per grid row, the highest row first.
pub fn grid_lines(frame: &Frame) -> Vec<String> {
    let height = frame.cells.iter().map(|c| c.row + 1).max().unwrap_or(0);
    (0..height)
        .rev()
        .map(|row| {
            frame
                .cells
                .iter()
                .filter(|c| c.row == row)
                .map(cell_glyph)
                .collect::<String>()
        })
        .collect()
}

fn instrumentation_line(frame: &Frame) -> String {
    let mut line = format!(
        "loop {:.1} ms, relays {:.1} ms",
        frame.loop_time.as_secs_f64() * 1e3,
        frame.relay_time.as_secs_f64() * 1e3,
    );
    for sensor in frame.sensors.iter().filter(|s| s.running) {
        line.push_str(&format!(
            " | {}: {} pts, backlog {}, rotation {:.0} ms",
            sensor.id,
            sensor.snapshot.points.len(),
            sensor.backlog,
            sensor.last_rotation.as_secs_f64() * 1e3,
        ));
    }
    line
}

fn status_label(status: DriveStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        DriveStatus::Active | DriveStatus::OnAll => label.green().bold(),
        DriveStatus::OffAll => label.red().bold(),
        DriveStatus::Undefined => label.yellow().bold(),
        DriveStatus::Idle | DriveStatus::Interactive | DriveStatus::Special => label.cyan().bold(),
    }
}

fn print_help() {
    println!("{}", "Rainroom Commands".bold().underline());
    println!("  {}                – engage auto-drive", "activate".bold().cyan());
    println!("  {}                  – all showers on / off", "on | off".bold().cyan());
    println!("  {}          – move the grid (mm)", "origin <x> <y>".bold().cyan());
    println!("  {}                – sensitivity threshold", "sens <n>".bold().cyan());
    println!("  {}  – manual toggling", "interactive start|stop".bold().cyan());
    println!("  {}           – toggle a shower (interactive)", "click <x> <y>".bold().cyan());
    println!("  {}      – all-on / all-off alternation", "special start|stop".bold().cyan());
    println!("  {}      – start / stop a scanner", "sensor <id> on|off".bold().cyan());
    println!("  {}      – calibrate a scanner (mm)", "shift <id> <x> <y>".bold().cyan());
    println!("  {}         – capture every return or only in-grid", "points all|grid".bold().cyan());
    println!("  {}                    – stop and exit", "quit".bold().cyan());
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use rainroom_hal::relay::RelayAddress;

    fn event(line: &str) -> OperatorEvent {
        match parse_command(line) {
            Ok(Command::Event(e)) => e,
            other => panic!("{line:?} parsed as {other:?}"),
        }
    }

    #[test]
    fn parses_simple_commands() {
        assert_eq!(event("activate"), OperatorEvent::Activate);
        assert_eq!(event("  ON "), OperatorEvent::OnAll);
        assert_eq!(event("off"), OperatorEvent::OffAll);
        assert_eq!(event("quit"), OperatorEvent::Quit);
        assert_eq!(parse_command("help"), Ok(Command::Help));
        assert_eq!(parse_command("   "), Ok(Command::Nothing));
    }

    #[test]
    fn parses_numeric_arguments() {
        assert_eq!(event("origin -1200 340"), OperatorEvent::SetOrigin { x: -1200, y: 340 });
        assert_eq!(event("sens 3"), OperatorEvent::SetSensitivity(3));
        assert_eq!(event("click 900.5 12"), OperatorEvent::Pointer { x: 900.5, y: 12.0 });
    }

    #[test]
    fn parses_mode_switches() {
        assert_eq!(event("interactive start"), OperatorEvent::EnterInteractive);
        assert_eq!(event("interactive stop"), OperatorEvent::ExitInteractive);
        assert_eq!(event("special start"), OperatorEvent::EnterSpecial);
        assert_eq!(event("special stop"), OperatorEvent::ExitSpecial);
        assert!(parse_command("special").is_err());
    }

    #[test]
    fn parses_sensor_commands() {
        assert_eq!(
            event("sensor A1B2 on"),
            OperatorEvent::SetSensorActive {
                sensor: "A1B2".to_string(),
                active: true
            }
        );
        assert_eq!(
            event("shift A1B2 150 -40"),
            OperatorEvent::SetSensorShift {
                sensor: "A1B2".to_string(),
                x: 150,
                y: -40
            }
        );
        assert_eq!(event("points all"), OperatorEvent::SetAllPoints(true));
        assert_eq!(event("points grid"), OperatorEvent::SetAllPoints(false));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(
            parse_command("origin 10"),
            Err("usage: origin <x> <y>".to_string())
        );
        assert!(parse_command("sens -1").is_err());
        assert!(parse_command("sensor A1B2 maybe").is_err());
        assert!(parse_command("dance").unwrap_err().contains("unknown command"));
    }

    #[test]
    fn grid_is_drawn_top_row_first() {
        colored::control::set_override(false);
        let cell = |row, col, state, shower| CellView {
            row,
            col,
            state,
            occupancy: 0,
            shower,
        };
        let frame = Frame {
            status: DriveStatus::Active,
            origin: (0, 0),
            corner: (1202, 1202),
            cell_size: 600,
            cells: vec![
                cell(0, 0, CellState::Clear, None),
                cell(0, 1, CellState::Green, Some((RelayAddress::new(1, 0), false))),
                cell(1, 0, CellState::Yellow, None),
                cell(1, 1, CellState::Clear, Some((RelayAddress::new(1, 1), true))),
            ],
            sensors: Vec::new(),
            loop_time: Duration::from_millis(2),
            relay_time: Duration::ZERO,
        };
        assert_eq!(grid_lines(&frame), vec!["[▲ ][·≈]", "[· ][●_]"]);
        assert_eq!(instrumentation_line(&frame), "loop 2.0 ms, relays 0.0 ms");
    }
}
