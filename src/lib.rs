//! # Cut-to-Length Station Library
//!
//! This library contains the core logic of a shop-floor station that checks a cut
//! against its order. A barcode gives the ordered length (and, for Line128 codes, the
//! work order), a laser rangefinder gives the length actually on the table, and the
//! station classifies the difference against configured tolerance bands. A production
//! label may only be printed when the cut is within tolerance.
//!
//! Module overview, leaves first:
//!
//! - [`units`]: meters to inches, feet-and-inches display strings.
//! - [`barcode`]: scanner payload decoding.
//! - [`laser_errors`]: rangefinder status token descriptions.
//! - [`laser`]: the serial link driver and its connection state.
//! - [`sim`]: a simulated rangefinder speaking the same protocol.
//! - [`tolerance`]: deviation and tolerance band classification.
//! - [`scheduler`]: fixed-period, non-overlapping measurement polling.
//! - [`label`]: ZPL label building and raw printer output.
//! - [`config`]: station configuration file.
//! - [`station`]: the controller tying all of the above together.

pub mod barcode;
pub mod config;
pub mod label;
pub mod laser;
pub mod laser_errors;
pub mod scheduler;
pub mod sim;
pub mod station;
pub mod tolerance;
pub mod units;

pub use barcode::{ParseError, ScanResult};
pub use config::StationConfig;
pub use laser::{LaserLinkDriver, LinkState, Measurement};
pub use station::{StationController, StationView};
pub use tolerance::{classify, Band, Direction, ToleranceVerdict};
