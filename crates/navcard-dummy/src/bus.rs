//! Emulated USB bus

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use navcard_core::error::{Error, Result};
use navcard_core::firmware::{FirmwareImage, FirmwareSource};
use navcard_core::identity::{PeripheralIdentity, UsbId, SKYBOUND};
use navcard_core::transport::{Clock, Transport, UsbBus};

use crate::{GarminEmulator, SkyboundEmulator};

/// Any emulated programmer
#[derive(Clone)]
pub enum DummyDevice {
    /// Skybound G2
    Skybound(SkyboundEmulator),
    /// Garmin, in any firmware state
    Garmin(GarminEmulator),
}

impl DummyDevice {
    fn usb_id(&self) -> Option<UsbId> {
        match self {
            Self::Skybound(_) => Some(SKYBOUND),
            Self::Garmin(g) => g.visible().then(|| g.usb_id()),
        }
    }

    fn handle(&self) -> Self {
        match self {
            Self::Skybound(s) => Self::Skybound(s.clone()),
            Self::Garmin(g) => Self::Garmin(g.reopen()),
        }
    }
}

impl Transport for DummyDevice {
    fn control_write(&mut self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<()> {
        match self {
            Self::Skybound(d) => d.control_write(request, value, index, data),
            Self::Garmin(d) => d.control_write(request, value, index, data),
        }
    }

    fn control_read(&mut self, request: u8, value: u16, index: u16, buf: &mut [u8]) -> Result<usize> {
        match self {
            Self::Skybound(d) => d.control_read(request, value, index, buf),
            Self::Garmin(d) => d.control_read(request, value, index, buf),
        }
    }

    fn bulk_read(&mut self, endpoint: u8, buf: &mut [u8]) -> Result<usize> {
        match self {
            Self::Skybound(d) => d.bulk_read(endpoint, buf),
            Self::Garmin(d) => d.bulk_read(endpoint, buf),
        }
    }

    fn bulk_write(&mut self, endpoint: u8, data: &[u8]) -> Result<()> {
        match self {
            Self::Skybound(d) => d.bulk_write(endpoint, data),
            Self::Garmin(d) => d.bulk_write(endpoint, data),
        }
    }
}

type Claims = Rc<RefCell<Vec<bool>>>;

/// Bus with a fixed set of emulated devices
///
/// Opening a device claims it until the returned transport is dropped.
pub struct DummyBus {
    devices: Vec<DummyDevice>,
    claims: Claims,
}

impl DummyBus {
    /// Bus with the given devices attached at ports 1, 2, ...
    pub fn new(devices: Vec<DummyDevice>) -> Self {
        let claims = Rc::new(RefCell::new(vec![false; devices.len()]));
        Self { devices, claims }
    }

    /// Bus with a single device
    pub fn single(device: DummyDevice) -> Self {
        Self::new(vec![device])
    }

    /// Mark the device at `slot` as held by another process
    pub fn hold(&self, slot: usize) {
        if let Some(claim) = self.claims.borrow_mut().get_mut(slot) {
            *claim = true;
        }
    }

    /// Number of currently open handles
    pub fn open_handles(&self) -> usize {
        self.claims.borrow().iter().filter(|&&c| c).count()
    }

    fn bus_path(slot: usize) -> String {
        format!("1-{}", slot + 1)
    }
}

impl UsbBus for DummyBus {
    type Transport = DummyTransport;

    fn rescan(&mut self) -> Result<Vec<PeripheralIdentity>> {
        Ok(self
            .devices
            .iter()
            .enumerate()
            .filter_map(|(slot, device)| {
                let id = device.usb_id()?;
                Some(PeripheralIdentity {
                    vendor_id: id.vendor_id,
                    product_id: id.product_id,
                    bus_path: Self::bus_path(slot),
                })
            })
            .collect())
    }

    fn open(&mut self, identity: &PeripheralIdentity) -> Result<DummyTransport> {
        let slot = self
            .devices
            .iter()
            .enumerate()
            .position(|(slot, device)| {
                Self::bus_path(slot) == identity.bus_path && device.usb_id() == Some(identity.usb_id())
            })
            .ok_or(Error::DeviceNotFound)?;

        let mut claims = self.claims.borrow_mut();
        if claims[slot] {
            return Err(Error::DeviceBusy);
        }
        claims[slot] = true;
        Ok(DummyTransport {
            device: self.devices[slot].handle(),
            slot,
            claims: self.claims.clone(),
        })
    }
}

/// Open handle on an emulated device, released on drop
pub struct DummyTransport {
    device: DummyDevice,
    slot: usize,
    claims: Claims,
}

impl Drop for DummyTransport {
    fn drop(&mut self) {
        if let Some(claim) = self.claims.borrow_mut().get_mut(self.slot) {
            *claim = false;
        }
    }
}

impl Transport for DummyTransport {
    fn control_write(&mut self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<()> {
        self.device.control_write(request, value, index, data)
    }

    fn control_read(&mut self, request: u8, value: u16, index: u16, buf: &mut [u8]) -> Result<usize> {
        self.device.control_read(request, value, index, buf)
    }

    fn bulk_read(&mut self, endpoint: u8, buf: &mut [u8]) -> Result<usize> {
        self.device.bulk_read(endpoint, buf)
    }

    fn bulk_write(&mut self, endpoint: u8, data: &[u8]) -> Result<()> {
        self.device.bulk_write(endpoint, data)
    }
}

/// Clock that only adds up the requested delays
#[derive(Debug, Default)]
pub struct InstantClock {
    /// Total time slept
    pub slept: Duration,
    /// Number of sleeps
    pub sleeps: usize,
}

impl Clock for InstantClock {
    fn sleep(&mut self, duration: Duration) {
        self.slept += duration;
        self.sleeps += 1;
    }
}

/// In-memory firmware images
#[derive(Debug, Default)]
pub struct DummyFirmware {
    images: BTreeMap<String, FirmwareImage>,
    /// Names of the images handed out, in order
    pub loaded: Vec<String>,
}

impl DummyFirmware {
    /// No images at all
    pub fn empty() -> Self {
        Self::default()
    }

    /// A small image for every Garmin stage
    pub fn garmin() -> Self {
        let mut firmware = Self::default();
        for name in ["grmn0300.dat", "grmn0500.dat", "grmn1300.dat"] {
            // ljmp 0x0000 at the reset vector
            let image = [0x00, 0x00, 0x03, 0x00, 0x02, 0x00, 0x00];
            if let Ok(image) = FirmwareImage::parse(&image) {
                firmware.images.insert(name.to_string(), image);
            }
        }
        firmware
    }
}

impl FirmwareSource for DummyFirmware {
    fn load(&mut self, name: &str) -> Result<FirmwareImage> {
        let image = self.images.get(name).cloned().ok_or(Error::FirmwareMissing)?;
        self.loaded.push(name.to_string());
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DummyCard;

    fn skybound_bus() -> DummyBus {
        DummyBus::single(DummyDevice::Skybound(SkyboundEmulator::new(
            Some(DummyCard::new(0x01, 0x41, 4)),
            "20071203",
        )))
    }

    #[test]
    fn test_rescan_lists_devices() {
        let mut bus = skybound_bus();
        let found = bus.rescan().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].usb_id(), SKYBOUND);
        assert_eq!(found[0].bus_path, "1-1");
    }

    #[test]
    fn test_open_is_exclusive() {
        let mut bus = skybound_bus();
        let identity = bus.rescan().unwrap().remove(0);
        let handle = bus.open(&identity).unwrap();
        assert!(matches!(bus.open(&identity), Err(Error::DeviceBusy)));
        drop(handle);
        assert_eq!(bus.open_handles(), 0);
        assert!(bus.open(&identity).is_ok());
    }

    #[test]
    fn test_open_unknown_path() {
        let mut bus = skybound_bus();
        let identity = PeripheralIdentity {
            vendor_id: SKYBOUND.vendor_id,
            product_id: SKYBOUND.product_id,
            bus_path: "3-2".to_string(),
        };
        assert!(matches!(bus.open(&identity), Err(Error::DeviceNotFound)));
    }

    #[test]
    fn test_garmin_firmware_images_parse() {
        let mut firmware = DummyFirmware::garmin();
        assert_eq!(firmware.load("grmn0500.dat").unwrap().len(), 3);
        assert_eq!(firmware.load("grmn9999.dat"), Err(Error::FirmwareMissing));
    }
}
