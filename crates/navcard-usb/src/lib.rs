//! navcard-usb - USB backend for navcard
//!
//! Implements [`UsbBus`] and [`Transport`] on top of nusb. Every transfer
//! blocks for at most the configured timeout; failures are mapped onto
//! [`TransportStatus`](navcard_core::error::TransportStatus) through
//! [`UsbError`], whose detail is logged at debug level.

mod error;

use std::time::Duration;

use log::{debug, trace};
use navcard_core::error::Result;
use navcard_core::identity::PeripheralIdentity;
use navcard_core::transport::{Clock, Transport, UsbBus};
use nusb::transfer::{Buffer, Bulk, ControlIn, ControlOut, ControlType, In, Out, Recipient};
use nusb::{Endpoint, Interface, MaybeFuture};

pub use error::UsbError;

/// Default timeout of a single transfer
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Port based location, e.g. `1-2.4`
///
/// Unlike the device address it stays the same when a programmer
/// re-enumerates after a firmware stage.
fn bus_path(info: &nusb::DeviceInfo) -> String {
    let ports: Vec<String> = info.port_chain().iter().map(u8::to_string).collect();
    format!("{}-{}", info.busnum(), ports.join("."))
}

/// The host's USB bus
#[derive(Debug, Clone)]
pub struct NusbBus {
    timeout: Duration,
}

impl NusbBus {
    /// Bus with the default transfer timeout
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Bus whose transports time out after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for NusbBus {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbBus for NusbBus {
    type Transport = NusbTransport;

    fn rescan(&mut self) -> Result<Vec<PeripheralIdentity>> {
        let devices = nusb::list_devices().wait().map_err(UsbError::Enumerate)?;
        Ok(devices
            .map(|d| PeripheralIdentity {
                vendor_id: d.vendor_id(),
                product_id: d.product_id(),
                bus_path: bus_path(&d),
            })
            .collect())
    }

    fn open(&mut self, identity: &PeripheralIdentity) -> Result<NusbTransport> {
        let info = nusb::list_devices()
            .wait()
            .map_err(UsbError::Enumerate)?
            .find(|d| {
                d.vendor_id() == identity.vendor_id
                    && d.product_id() == identity.product_id
                    && bus_path(d) == identity.bus_path
            })
            .ok_or(navcard_core::Error::DeviceNotFound)?;

        debug!(
            "Opening {} at bus {} address {}",
            identity,
            info.busnum(),
            info.device_address()
        );
        let open_failed = |source| UsbError::Open {
            path: identity.bus_path.clone(),
            source,
        };
        let device = info.open().wait().map_err(open_failed)?;
        let interface = device.claim_interface(0).wait().map_err(open_failed)?;
        Ok(NusbTransport {
            interface,
            timeout: self.timeout,
        })
    }
}

/// Claimed interface 0 of an open programmer
pub struct NusbTransport {
    interface: Interface,
    timeout: Duration,
}

impl Transport for NusbTransport {
    fn control_write(&mut self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<()> {
        trace!("control out 0x{:02X} value 0x{:04X} len {}", request, value, data.len());
        self.interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index,
                    data,
                },
                self.timeout,
            )
            .wait()
            .map_err(UsbError::Transfer)?;
        Ok(())
    }

    fn control_read(&mut self, request: u8, value: u16, index: u16, buf: &mut [u8]) -> Result<usize> {
        let length = u16::try_from(buf.len()).map_err(|_| UsbError::TooLong(buf.len()))?;
        let data = self
            .interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index,
                    length,
                },
                self.timeout,
            )
            .wait()
            .map_err(UsbError::Transfer)?;

        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        trace!("control in 0x{:02X}: {} bytes", request, len);
        Ok(len)
    }

    fn bulk_read(&mut self, endpoint: u8, buf: &mut [u8]) -> Result<usize> {
        let mut ep: Endpoint<Bulk, In> = self
            .interface
            .endpoint(endpoint)
            .map_err(|source| UsbError::Endpoint { endpoint, source })?;

        let max_packet_size = ep.max_packet_size();
        let request_len = buf.len().div_ceil(max_packet_size) * max_packet_size;
        let mut in_buf = Buffer::new(request_len);
        in_buf.set_requested_len(request_len);

        let data = ep
            .transfer_blocking(in_buf, self.timeout)
            .into_result()
            .map_err(UsbError::Transfer)?;

        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn bulk_write(&mut self, endpoint: u8, data: &[u8]) -> Result<()> {
        let mut ep: Endpoint<Bulk, Out> = self
            .interface
            .endpoint(endpoint)
            .map_err(|source| UsbError::Endpoint { endpoint, source })?;

        let mut out_buf = Buffer::new(data.len());
        out_buf.extend_from_slice(data);

        ep.transfer_blocking(out_buf, self.timeout)
            .into_result()
            .map_err(UsbError::Transfer)?;
        Ok(())
    }
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct StdClock;

impl Clock for StdClock {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
