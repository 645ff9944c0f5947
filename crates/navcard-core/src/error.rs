//! Error types for navcard-core
//!
//! This module provides a no_std compatible error type that can be used
//! throughout the crate. Phase failures carry the logical card offset of
//! the chunk that failed so callers can report exactly where a transfer
//! stopped.

use core::fmt;

use crate::engine::Phase;
use crate::geometry::CardId;
use crate::identity::UsbId;

/// Status of a failed USB transfer, as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    /// The transfer did not complete within the transport timeout
    Timeout,
    /// The device stalled the endpoint
    Stall,
    /// The device went away mid-transfer
    Disconnected,
    /// Host controller or driver fault
    Fault,
    /// Any other transport failure
    Other,
}

/// Underlying reason a chunk operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    /// USB transfer failure
    Transport(TransportStatus),
    /// The programmer answered with something we did not expect
    UnexpectedResponse,
    /// The card was pulled out
    CardMissing,
    /// Anything else
    Other,
}

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Device errors
    /// No supported programmer is attached
    DeviceNotFound,
    /// Another process holds the programmer
    DeviceBusy,
    /// A USB transfer failed
    Device(TransportStatus),
    /// The programmer did not come back after a firmware stage
    ReenumerationTimeout {
        /// Id we were waiting for
        expected: UsbId,
    },

    // Firmware errors
    /// A firmware image required for staging is not available
    FirmwareMissing,
    /// A firmware image is truncated or malformed
    FirmwareFormat {
        /// Byte offset of the bad record
        offset: usize,
    },

    // Card errors
    /// No data card is inserted, or it was removed during the operation
    CardMissing,
    /// The identifier pattern matches no known card
    UnknownCard(CardId),
    /// The card is recognised but cannot be programmed by this tool
    UnsupportedCard(CardId),
    /// The programmer firmware cannot write this card
    UnsupportedWrite,
    /// The programmer answered a command unexpectedly
    UnexpectedResponse,

    // Transfer errors
    /// Blank check found programmed data
    NotBlank {
        /// Logical offset of the first non-erased chunk
        offset: u32,
    },
    /// An erase command failed
    EraseFailed {
        /// Logical offset of the sector being erased
        offset: u32,
        /// What went wrong
        cause: Cause,
    },
    /// A block write failed
    WriteFailed {
        /// Logical offset of the chunk being written
        offset: u32,
        /// What went wrong
        cause: Cause,
    },
    /// Read-back data did not match the source
    VerifyFailed {
        /// Logical offset of the first mismatching chunk
        offset: u32,
    },
    /// A block read failed
    ReadFailed {
        /// Logical offset of the chunk being read
        offset: u32,
        /// What went wrong
        cause: Cause,
    },
    /// The progress observer asked to stop
    Cancelled {
        /// Phase that was interrupted
        phase: Phase,
        /// Logical offset reached when the stop was honoured
        offset: u32,
    },
    /// The image does not fit on the card
    ImageTooLarge {
        /// Image size in bytes
        size: usize,
        /// Card capacity in bytes
        capacity: u32,
    },
    /// Access does not start on a chunk boundary
    InvalidAlignment,
    /// A logical offset lies beyond the end of the card
    OutOfRange {
        /// The offending offset
        offset: u32,
    },

    // Metadata errors
    /// The metadata record is not of the form `{cycle~serviceId}`
    MetadataFormat,
    /// Metadata only exists on 16 MB class cards
    MetadataUnsupported,
}

impl Error {
    /// Transfer phase this error was raised in, if any
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::NotBlank { .. } => Some(Phase::BlankChecking),
            Self::EraseFailed { .. } => Some(Phase::Erasing),
            Self::WriteFailed { .. } => Some(Phase::Writing),
            Self::VerifyFailed { .. } => Some(Phase::Verifying),
            Self::ReadFailed { .. } => Some(Phase::Reading),
            Self::Cancelled { phase, .. } => Some(*phase),
            Self::UnknownCard(_) | Self::UnsupportedCard(_) => Some(Phase::Detecting),
            _ => None,
        }
    }

    /// Logical card offset this error was raised at, if any
    pub fn offset(&self) -> Option<u32> {
        match *self {
            Self::NotBlank { offset }
            | Self::EraseFailed { offset, .. }
            | Self::WriteFailed { offset, .. }
            | Self::VerifyFailed { offset }
            | Self::ReadFailed { offset, .. }
            | Self::Cancelled { offset, .. } => Some(offset),
            _ => None,
        }
    }
}

impl From<Error> for Cause {
    fn from(e: Error) -> Self {
        match e {
            Error::Device(status) => Cause::Transport(status),
            Error::CardMissing => Cause::CardMissing,
            Error::UnexpectedResponse => Cause::UnexpectedResponse,
            _ => Cause::Other,
        }
    }
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::Stall => write!(f, "endpoint stalled"),
            Self::Disconnected => write!(f, "device disconnected"),
            Self::Fault => write!(f, "host controller fault"),
            Self::Other => write!(f, "transfer failed"),
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(status) => write!(f, "USB {}", status),
            Self::UnexpectedResponse => write!(f, "unexpected response from programmer"),
            Self::CardMissing => write!(f, "data card has disappeared"),
            Self::Other => write!(f, "programmer error"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceNotFound => write!(f, "no card programmer found"),
            Self::DeviceBusy => write!(f, "card programmer is in use by another process"),
            Self::Device(status) => write!(f, "USB transfer failed: {}", status),
            Self::ReenumerationTimeout { expected } => write!(
                f,
                "programmer did not re-appear as {} after loading firmware",
                expected
            ),
            Self::FirmwareMissing => write!(f, "firmware image not available"),
            Self::FirmwareFormat { offset } => {
                write!(f, "malformed firmware image at byte {}", offset)
            }
            Self::CardMissing => write!(f, "data card is missing"),
            Self::UnknownCard(id) => write!(
                f,
                "unknown data card (manufacturer 0x{:02X}, chip 0x{:02X}, {} chip(s))",
                id.manufacturer, id.chip, id.chips
            ),
            Self::UnsupportedCard(id) => write!(
                f,
                "unsupported data card (manufacturer 0x{:02X}, chip 0x{:02X})",
                id.manufacturer, id.chip
            ),
            Self::UnsupportedWrite => write!(
                f,
                "writing to orange-label cards requires an orange-label programmer"
            ),
            Self::UnexpectedResponse => write!(f, "unexpected response from programmer"),
            Self::NotBlank { offset } => {
                write!(f, "blank check failed: data at offset 0x{:08X}", offset)
            }
            Self::EraseFailed { offset, cause } => {
                write!(f, "erase failed at offset 0x{:08X}: {}", offset, cause)
            }
            Self::WriteFailed { offset, cause } => {
                write!(f, "write failed at offset 0x{:08X}: {}", offset, cause)
            }
            Self::VerifyFailed { offset } => {
                write!(f, "verify failed: mismatch at offset 0x{:08X}", offset)
            }
            Self::ReadFailed { offset, cause } => {
                write!(f, "read failed at offset 0x{:08X}: {}", offset, cause)
            }
            Self::Cancelled { phase, offset } => {
                write!(f, "cancelled while {} at offset 0x{:08X}", phase, offset)
            }
            Self::ImageTooLarge { size, capacity } => write!(
                f,
                "image is {} bytes but the card only holds {} bytes",
                size, capacity
            ),
            Self::InvalidAlignment => write!(f, "access is not aligned to a block boundary"),
            Self::OutOfRange { offset } => {
                write!(f, "offset 0x{:08X} lies beyond the end of the card", offset)
            }
            Self::MetadataFormat => write!(f, "metadata must look like {{cycle~serviceId}}"),
            Self::MetadataUnsupported => {
                write!(f, "database metadata is only stored on 16 MB cards")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
