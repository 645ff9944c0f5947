//! Device sessions for navcard
//!
//! This crate is the only thing the CLI talks to. It finds a programmer,
//! stages its firmware if needed, picks the driver for its family and
//! hands out a [`DeviceSession`] that runs the transfer engine against the
//! inserted card.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        CLI (bin/navcard)                     │
//! │  - Only imports navcard-session, navcard-core and the bus    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   navcard-session (this crate)               │
//! │  - open_session: staging, driver selection                   │
//! │  - DeviceSession: owns the handle, tracks the phase          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              ┌───────────────┴───────────────┐
//!              ▼                               ▼
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │    navcard-core          │   │  Programmer crates       │
//! │  - firmware stager       │   │  - skybound, garmin      │
//! │  - card geometry         │   │  - implement             │
//! │  - transfer engine       │   │    CardProgrammer        │
//! └──────────────────────────┘   └──────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use navcard_session::{find_programmer, open_session, SessionContext};
//!
//! let identity = find_programmer(&mut bus)?;
//! let mut session = open_session(
//!     SessionContext { bus: &mut bus, firmware: &mut firmware, clock: &mut clock, policy },
//!     identity,
//! )?;
//! let geometry = session.detect()?;
//! let mut image = Vec::new();
//! let len = session.read(&mut image, &mut NoProgress)?;
//! image.truncate(len);
//! ```

mod error;
mod open;
mod session;

pub use error::{Result, SessionError};
pub use open::{find_programmer, find_programmers, open_session, SessionContext};
pub use session::DeviceSession;
