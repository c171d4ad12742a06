//! Hardware gateways for the locker bank and the manipulator.
//!
//! The cycle controller only ever talks to the [`LockerGateway`] and
//! [`RobotGateway`] traits.  Concrete drivers live next to them:
//!
//! - [`http_locker::HttpLocker`] speaks the locker server's session-authenticated
//!   JSON API.
//! - [`sim::SimLocker`] and [`sim::SimRobot`] are scripted in-process stand-ins
//!   so the whole stack runs in tests and demos without hardware.

pub mod gateway;
pub mod http_locker;
pub mod positions;
pub mod sim;

pub use gateway::{LockerGateway, RobotGateway};
pub use http_locker::HttpLocker;
pub use positions::{JointAngles, PositionTable};
