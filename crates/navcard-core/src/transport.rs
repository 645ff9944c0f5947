//! Endpoint transport abstraction
//!
//! Programmer drivers and the firmware stager never talk to a USB stack
//! directly. They go through [`Transport`] (one open peripheral) and
//! [`UsbBus`] (enumeration and opening). `navcard-usb` implements these on
//! top of nusb; `navcard-dummy` implements them in memory.
//!
//! All calls block. Nothing in this layer retries: a failed transfer is
//! reported as [`Error::Device`](crate::Error::Device) and propagates.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::time::Duration;

use crate::error::Result;
use crate::identity::PeripheralIdentity;

/// An open programmer handle
///
/// Control transfers are vendor requests addressed to the device. Dropping
/// the transport releases the handle.
pub trait Transport {
    /// Vendor control OUT transfer
    fn control_write(&mut self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<()>;

    /// Vendor control IN transfer, returns the number of bytes received
    fn control_read(&mut self, request: u8, value: u16, index: u16, buf: &mut [u8])
        -> Result<usize>;

    /// Bulk IN transfer, returns the number of bytes received
    fn bulk_read(&mut self, endpoint: u8, buf: &mut [u8]) -> Result<usize>;

    /// Bulk OUT transfer
    fn bulk_write(&mut self, endpoint: u8, data: &[u8]) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn control_write(&mut self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<()> {
        (**self).control_write(request, value, index, data)
    }

    fn control_read(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> Result<usize> {
        (**self).control_read(request, value, index, buf)
    }

    fn bulk_read(&mut self, endpoint: u8, buf: &mut [u8]) -> Result<usize> {
        (**self).bulk_read(endpoint, buf)
    }

    fn bulk_write(&mut self, endpoint: u8, data: &[u8]) -> Result<()> {
        (**self).bulk_write(endpoint, data)
    }
}

/// Access to the USB bus: enumeration and opening of peripherals
pub trait UsbBus {
    /// Transport type produced by [`UsbBus::open`]
    type Transport: Transport;

    /// List all attached peripherals
    fn rescan(&mut self) -> Result<Vec<PeripheralIdentity>>;

    /// Open and claim a peripheral
    ///
    /// # Errors
    /// * `DeviceNotFound` - the peripheral is no longer attached
    /// * `DeviceBusy` - another process holds it
    fn open(&mut self, identity: &PeripheralIdentity) -> Result<Self::Transport>;
}

/// Source of delays
///
/// Only the re-enumeration wait sleeps; injecting the clock keeps that wait
/// deterministic under test.
pub trait Clock {
    /// Block for `duration`
    fn sleep(&mut self, duration: Duration);
}

/// Bounded wait used while a peripheral re-enumerates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RescanPolicy {
    /// Number of rescans before giving up
    pub attempts: u32,
    /// Delay before each rescan
    pub delay: Duration,
}

impl Default for RescanPolicy {
    fn default() -> Self {
        Self {
            attempts: 20,
            delay: Duration::from_millis(200),
        }
    }
}
