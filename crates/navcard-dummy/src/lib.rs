//! navcard-dummy - In-memory card programmer emulators for testing
//!
//! This crate emulates both programmer families at the transport level, so
//! the real drivers, the firmware stager and the transfer engine can be
//! exercised without hardware:
//!
//! - [`SkyboundEmulator`] speaks the Skybound G2 bulk command set
//! - [`GarminEmulator`] models the Garmin FX2 programmer, including the
//!   uninitialized ROM, the stage-1 loader and re-enumeration on reset
//! - [`DummyBus`] puts emulators on a bus with exclusive opens
//!
//! Emulators are cheap handles on shared state; clone one before handing it
//! over to inspect [`Counters`] and card contents afterwards.

mod bus;
mod card;
mod garmin;
mod skybound;

pub use bus::{DummyBus, DummyDevice, DummyFirmware, DummyTransport, InstantClock};
pub use card::DummyCard;
pub use garmin::GarminEmulator;
pub use skybound::SkyboundEmulator;

/// Operation counters of an emulated programmer
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    /// Vendor control OUT transfers
    pub control_writes: usize,
    /// CPU reset assertions
    pub resets: usize,
    /// Sectors erased
    pub erases: usize,
    /// Blocks programmed
    pub block_writes: usize,
    /// Blocks read
    pub block_reads: usize,
}

/// Planned failures
#[derive(Debug, Default, Clone, Copy)]
struct Faults {
    /// Fail the block write with this index
    write_at: Option<usize>,
    /// Pull the card once this many blocks have been read
    remove_after_reads: Option<usize>,
}
