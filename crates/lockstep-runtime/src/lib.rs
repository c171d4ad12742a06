//! `lockstep-runtime` – the cycle engine
//!
//! Drives the locker ⇄ robot hand-off, one strictly sequential cycle at a
//! time, and publishes every state change to a
//! [`StatusBroadcaster`][lockstep_middleware::StatusBroadcaster].
//!
//! # Modules
//!
//! - [`controller`] – [`CycleController`][controller::CycleController]:
//!   the phase state machine.  Runs on its own thread via
//!   [`run_forever`][controller::CycleController::run_forever].
//! - [`config`] – [`ControllerConfig`][config::ControllerConfig]: retry
//!   budget, timeouts, poll cadence and the motion routine.
//! - [`signals`] – [`ControllerHandle`][signals::ControllerHandle]: shutdown
//!   and critical-acknowledge requests from other threads.
//! - [`ledger`] – [`CycleLedger`][ledger::CycleLedger]: statistics, bounded
//!   history and the [`FinalSummary`][ledger::FinalSummary].
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console,
//!   audit-file and optional OTLP layers.

pub mod config;
pub mod controller;
pub mod ledger;
pub mod signals;
pub mod telemetry;

pub use config::{ControllerConfig, ControllerError};
pub use controller::CycleController;
pub use ledger::{CycleLedger, FinalSummary};
pub use signals::ControllerHandle;
pub use telemetry::{TracerProviderGuard, init_tracing};
