//! navcard-garmin - Garmin aviation card programmer support
//!
//! The Garmin programmer is a Cypress EZ-USB FX2. Out of the box it
//! enumerates as `091E:0500` (or `091E:0300` for the early model) and has
//! to be staged with firmware before it shows up as the operational
//! `091E:1300`; see [`navcard_core::firmware`]. This crate drives the
//! operational firmware only.
//!
//! The firmware addresses cards by logical sector, so sessions use the
//! linear form of the card geometry.

mod device;
pub mod protocol;

pub use device::Garmin;
