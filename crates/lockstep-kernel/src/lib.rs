//! `lockstep-kernel` – safety checks
//!
//! Pure decision logic the cycle controller consults before and after it
//! touches hardware.  Nothing here performs I/O.
//!
//! # Modules
//!
//! - [`interlock`] – [`DoorRequirement`][interlock::DoorRequirement] and
//!   [`MotionInterlock`][interlock::MotionInterlock]: door-state preconditions.
//!   Motion can only be commanded with a [`MotionPermit`][interlock::MotionPermit],
//!   which is only issued for a door read of `Open`.
//! - [`tolerance`] – [`ToleranceVerifier`][tolerance::ToleranceVerifier]:
//!   compares measured joint angles with the commanded target.

pub mod interlock;
pub mod tolerance;

pub use interlock::{DoorRequirement, MotionInterlock, MotionPermit};
pub use tolerance::{Deviation, ToleranceVerifier};
