//! Operator console – line commands read from stdin while the controller runs.
//!
//! Supported slash-commands:
//!   /status       – print the latest snapshot
//!   /ack          – acknowledge a critical halt and resume cycling
//!   /stop         – emergency-stop the robot and shut down
//!   /quit | /exit – finish the current cycle, then shut down
//!   /help         – show this list

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use colored::Colorize;
use lockstep_hal::RobotGateway;
use lockstep_middleware::SnapshotReader;
use lockstep_runtime::ControllerHandle;
use lockstep_runtime::ledger::format_hms;
use lockstep_types::{Outcome, Snapshot};
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Status,
    Ack,
    Stop,
    Quit,
    Help,
    Empty,
    Unknown(String),
}

pub fn parse_command(line: &str) -> Command {
    match line.trim() {
        "" => Command::Empty,
        "/status" => Command::Status,
        "/ack" => Command::Ack,
        "/stop" => Command::Stop,
        "/quit" | "/exit" => Command::Quit,
        "/help" | "/?" => Command::Help,
        other => Command::Unknown(other.to_string()),
    }
}

/// What the console can touch.
pub struct Console {
    pub handle: ControllerHandle,
    pub reader: SnapshotReader,
    pub robot: Arc<dyn RobotGateway>,
}

impl Console {
    /// Read commands until EOF, `/quit`, `/stop`, or a shutdown requested
    /// elsewhere.
    pub fn run(self) {
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            if self.handle.is_shutdown_requested() {
                break;
            }
            print!("{} ", "lockstep>".bold().cyan());
            stdout.flush().ok();

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    eprintln!("{}: {}", "Read error".red(), e);
                    break;
                }
            }

            if !self.execute(parse_command(&line)) {
                break;
            }
        }
    }

    /// Returns `false` once the console should stop reading.
    fn execute(&self, command: Command) -> bool {
        match command {
            Command::Empty => {}
            Command::Help => cmd_help(),
            Command::Status => print!("{}", status_report(&self.reader.latest())),
            Command::Ack => {
                if self.handle.acknowledge_critical() {
                    println!("{}", "Critical halt acknowledged – resuming cycles.".green());
                } else {
                    println!("{}", "No critical halt to acknowledge.".dimmed());
                }
            }
            Command::Stop => {
                println!("{}", "Emergency stop – halting robot motion.".red().bold());
                if let Err(e) = self.robot.stop() {
                    warn!(error = %e, "robot stop failed");
                    println!("{}: {}", "Robot stop failed".red(), e);
                }
                self.handle.request_shutdown();
                return false;
            }
            Command::Quit => {
                println!("{}", "Shutting down after the current cycle …".yellow());
                self.handle.request_shutdown();
                return false;
            }
            Command::Unknown(other) => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
        }
        true
    }
}

fn cmd_help() {
    println!();
    println!("{}", "Lockstep Commands".bold().underline());
    println!("  {}   – show the controller status", "/status".bold().cyan());
    println!("  {}      – acknowledge a critical halt", "/ack".bold().cyan());
    println!("  {}     – emergency-stop the robot and exit", "/stop".bold().cyan());
    println!("  {} – finish the current cycle and exit", "/quit  /exit".bold().cyan());
    println!();
}

/// Plain-text rendering of `snapshot` for the console.
pub fn status_report(snapshot: &Snapshot) -> String {
    let stats = &snapshot.statistics;
    let mut out = String::new();
    let state = if snapshot.halted {
        "HALTED"
    } else if snapshot.running {
        "running"
    } else {
        "stopped"
    };
    out.push_str(&format!(
        "  Controller: {state}  (locker {}, robot {})\n",
        link(snapshot.locker_connected),
        link(snapshot.robot_connected)
    ));
    out.push_str(&format!(
        "  Cycles: {}  ok {}  failed {}  critical {}  ({:.1}%)  uptime {}\n",
        stats.total_cycles,
        stats.success_count,
        stats.failed_count,
        stats.critical_count,
        stats.success_rate(),
        format_hms(stats.uptime(chrono::Utc::now())),
    ));
    if let Some(cycle) = &snapshot.current {
        out.push_str(&format!(
            "  Cycle {}: {} – door {}, robot {:?}",
            cycle.cycle_number, cycle.phase, cycle.locker_state, cycle.robot_state
        ));
        if cycle.outcome != Outcome::Pending {
            out.push_str(&format!(" – {:?}", cycle.outcome));
        }
        out.push('\n');
        if let Some(err) = &cycle.error {
            out.push_str(&format!("    {} error: {}\n", err.class, err.message));
        }
    }
    if let Some(alert) = &snapshot.critical {
        out.push_str(&format!(
            "  CRITICAL (cycle {}): {}\n  Type /ack once the locker has been inspected.\n",
            alert.cycle_number, alert.message
        ));
    }
    out
}

fn link(connected: bool) -> &'static str {
    if connected { "connected" } else { "disconnected" }
}
