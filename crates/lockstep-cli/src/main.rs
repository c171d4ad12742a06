//! `lockstep-cli` – Lockstep station binary
//!
//! This binary runs one locker ⇄ robot hand-off station.  It:
//!
//! 1. Loads `~/.lockstep/config.toml` (or `$LOCKSTEP_CONFIG`); a missing file
//!    means simulated drivers with factory timings.  `lockstep init` writes
//!    the defaults to that path.
//! 2. Wires the locker and robot gateways into a
//!    [`CycleController`][lockstep_runtime::CycleController] running on a
//!    blocking thread.
//! 3. Serves the read-only monitor on port `9091`.
//! 4. Reads operator commands (`/status`, `/ack`, `/stop`, `/quit`) from stdin.
//! 5. Intercepts **Ctrl-C**: the first press finishes the current cycle and
//!    shuts down; a second press stops the robot and exits immediately.
//! 6. Prints the final statistics on exit.

mod config;
mod console;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use colored::Colorize;
use tracing::{error, info, warn};

use lockstep_cockpit::MonitorServer;
use lockstep_hal::sim::{SimLocker, SimRobot, Trigger};
use lockstep_hal::{HttpLocker, LockerGateway, RobotGateway};
use lockstep_middleware::StatusBroadcaster;
use lockstep_runtime::{CycleController, FinalSummary, init_tracing};
use lockstep_types::LockerId;

use crate::config::{Config, LockerDriver, RobotDriver};
use crate::console::Console;

fn main() {
    print_banner();

    if std::env::args().nth(1).as_deref() == Some("init") {
        write_default_config();
        return;
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            std::process::exit(2);
        }
    };
    println!(
        "  Config: {}",
        config::config_path().display().to_string().bold()
    );

    // ── Structured logging ────────────────────────────────────────────────
    let _tracing_guard = init_tracing("lockstep", cfg.log.file.as_deref());
    info!(config = ?cfg, "configuration loaded");

    // ── Gateways + controller ─────────────────────────────────────────────
    let locker = match build_locker(&cfg) {
        Ok(locker) => locker,
        Err(e) => {
            error!(error = %e, "cannot create locker gateway");
            println!("{}: {}", "Locker gateway error".red(), e);
            std::process::exit(1);
        }
    };
    let robot = build_robot(&cfg);

    let broadcaster = StatusBroadcaster::new();
    let reader = broadcaster.reader();
    let mut controller = match CycleController::new(
        cfg.controller_config(),
        locker,
        Arc::clone(&robot),
        broadcaster,
    ) {
        Ok(controller) => controller,
        Err(e) => {
            error!(error = %e, "invalid controller configuration");
            println!("{}: {}", "Configuration rejected".red(), e);
            std::process::exit(2);
        }
    };
    let handle = controller.handle();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let presses = Arc::new(AtomicU32::new(0));
    let ctrlc_handle = handle.clone();
    let ctrlc_robot = Arc::clone(&robot);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        if presses.fetch_add(1, Ordering::SeqCst) == 0 {
            println!(
                "{}",
                "⚠  Ctrl-C received – finishing the current cycle (press again to stop now) …"
                    .yellow()
                    .bold()
            );
            ctrlc_handle.request_shutdown();
        } else {
            println!("{}", "⚠  Second Ctrl-C – stopping robot and exiting.".red().bold());
            if let Err(e) = ctrlc_robot.stop() {
                eprintln!("  robot stop failed: {e}");
            }
            std::process::exit(130);
        }
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Operator console ──────────────────────────────────────────────────
    let console = Console {
        handle: handle.clone(),
        reader: reader.clone(),
        robot: Arc::clone(&robot),
    };
    std::thread::spawn(move || console.run());

    // ── Run ───────────────────────────────────────────────────────────────
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "cannot start async runtime");
            std::process::exit(1);
        }
    };

    let monitor = cfg.monitor.clone();
    let summary = runtime.block_on(async move {
        if monitor.enabled {
            let server = MonitorServer::new(reader).with_port(monitor.port);
            println!(
                "  Monitor: {}",
                format!("http://localhost:{}", server.port()).bold()
            );
            tokio::spawn(async move {
                if let Err(e) = server.run().await {
                    error!(error = %e, "monitor server stopped");
                }
            });
        }
        println!(
            "  Type {} for a list of commands.\n",
            "/help".bold().cyan()
        );
        tokio::task::spawn_blocking(move || controller.run_forever()).await
    });
    runtime.shutdown_timeout(Duration::from_secs(1));

    match summary {
        Ok(summary) => {
            info!("final statistics\n{summary}");
            print_summary(&summary);
        }
        Err(e) => {
            error!(error = %e, "cycle controller thread panicked");
            std::process::exit(1);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wiring
// ─────────────────────────────────────────────────────────────────────────────

fn build_locker(cfg: &Config) -> Result<Arc<dyn LockerGateway>, String> {
    let section = &cfg.locker;
    match section.driver {
        LockerDriver::Http => {
            if section.password.is_empty() {
                warn!("locker password is empty; login will likely be refused");
            }
            let locker = HttpLocker::new(
                section.url.clone(),
                section.password.clone(),
                Duration::from_millis(section.request_timeout_ms),
            )
            .map_err(|e| e.to_string())?;
            Ok(Arc::new(locker))
        }
        LockerDriver::Sim => Ok(Arc::new(
            SimLocker::new(LockerId(section.locker_id))
                .opens_after(Trigger::After(Duration::from_millis(section.sim_open_delay_ms)))
                .closes_after(Trigger::After(Duration::from_millis(section.sim_close_delay_ms))),
        )),
    }
}

fn build_robot(cfg: &Config) -> Arc<dyn RobotGateway> {
    let section = &cfg.robot;
    match section.driver {
        RobotDriver::Sim => Arc::new(
            SimRobot::new(cfg.positions.clone())
                .with_move_time(Duration::from_millis(section.sim_move_time_ms))
                .with_connect_policy(
                    section.connect_attempts,
                    Duration::from_millis(section.connect_delay_ms),
                ),
        ),
    }
}

fn write_default_config() {
    let path = config::config_path();
    if path.exists() {
        println!(
            "  {} already exists; leaving it untouched.",
            path.display().to_string().bold()
        );
        return;
    }
    match config::save_to(&Config::default(), &path) {
        Ok(()) => println!(
            "  {} Config written to {}",
            "✓".green().bold(),
            path.display().to_string().bold()
        ),
        Err(e) => {
            println!("{}: {}", "Error saving config".red(), e);
            std::process::exit(1);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner + summary
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"  _            _        _             "#.bold().cyan());
    println!("{}", r#" | | ___   ___| | _____| |_ ___ _ __  "#.bold().cyan());
    println!("{}", r#" | |/ _ \ / __| |/ / __| __/ _ \ '_ \ "#.bold().cyan());
    println!("{}", r#" | | (_) | (__|   <\__ \ ||  __/ |_) |"#.bold().cyan());
    println!("{}", r#" |_|\___/ \___|_|\_\___/\__\___| .__/ "#.bold().cyan());
    println!("{}", r#"                               |_|    "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Lockstep".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Locker ⇄ robot hand-off controller");
    println!();
}

fn print_summary(summary: &FinalSummary) {
    println!();
    println!("{}", "Final statistics".bold().underline());
    for line in summary.to_string().lines() {
        println!("  {line}");
    }
    if summary.critical_count > 0 {
        println!(
            "  {}",
            format!("{} critical cycle(s) – inspect the locker.", summary.critical_count)
                .red()
                .bold()
        );
    }
    println!();
}
