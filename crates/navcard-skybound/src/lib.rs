//! navcard-skybound - Skybound G2 data card programmer support
//!
//! The G2 is operational as soon as it is plugged in; it needs no firmware
//! staging. It addresses the card by physical sector: each chip of the card
//! answers at its own slot base, and 4 MiB chips are split into two banks.
//! The banked layout lives in [`navcard_core::geometry`]; this crate only
//! speaks the command set.
//!
//! Two firmware revisions exist. Only the orange-label one (`20140530`) can
//! program orange-label WAAS cards.
//!
//! # Example
//!
//! ```no_run
//! use navcard_core::engine;
//! use navcard_skybound::Skybound;
//! # fn run<T: navcard_core::transport::Transport>(transport: T) -> navcard_core::Result<()> {
//! let mut skybound = Skybound::new(transport)?;
//! let geometry = engine::detect(&mut skybound)?;
//! println!("{}", geometry);
//! # Ok(())
//! # }
//! ```

mod device;
pub mod protocol;

pub use device::Skybound;
