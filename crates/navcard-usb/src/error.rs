//! Error types for the nusb backend

use log::debug;
use navcard_core::error::{Error, TransportStatus};
use nusb::transfer::TransferError;
use thiserror::Error;

/// Failures of the USB stack, before they are folded into [`Error`]
#[derive(Debug, Error)]
pub enum UsbError {
    /// Device enumeration failed
    #[error("Failed to list USB devices: {0}")]
    Enumerate(#[source] nusb::Error),

    /// Opening the device or claiming its interface failed
    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: nusb::Error,
    },

    /// An endpoint could not be claimed
    #[error("Failed to claim endpoint 0x{endpoint:02X}: {source}")]
    Endpoint {
        endpoint: u8,
        #[source]
        source: nusb::Error,
    },

    /// A control or bulk transfer failed
    #[error("USB transfer failed: {0}")]
    Transfer(#[source] TransferError),

    /// Control transfer longer than the protocol allows
    #[error("Control transfer of {0} bytes is too long")]
    TooLong(usize),
}

impl UsbError {
    /// Transport status reported upwards
    pub fn status(&self) -> TransportStatus {
        match self {
            UsbError::Transfer(TransferError::Cancelled) => TransportStatus::Timeout,
            UsbError::Transfer(TransferError::Stall) => TransportStatus::Stall,
            UsbError::Transfer(TransferError::Disconnected) => TransportStatus::Disconnected,
            UsbError::Transfer(TransferError::Fault) => TransportStatus::Fault,
            _ => TransportStatus::Other,
        }
    }
}

impl From<UsbError> for Error {
    fn from(e: UsbError) -> Self {
        debug!("{}", e);
        match &e {
            UsbError::Open { source, .. } => match source.kind() {
                nusb::ErrorKind::Busy => Error::DeviceBusy,
                nusb::ErrorKind::NotFound | nusb::ErrorKind::Disconnected => Error::DeviceNotFound,
                _ => Error::Device(e.status()),
            },
            UsbError::TooLong(_) => Error::InvalidAlignment,
            _ => Error::Device(e.status()),
        }
    }
}
