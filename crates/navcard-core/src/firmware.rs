//! Firmware staging for uninitialized programmers
//!
//! An uninitialized programmer is a bare EZ-USB style controller. Firmware
//! is pushed into its internal RAM with anchor-download control transfers
//! while the CPU is held in reset; once the reset is released the device
//! drops off the bus and re-enumerates under a new product id.
//!
//! Images are stored as repeated `<u16 LE address><u16 LE length><payload>`
//! records.

use alloc::vec::Vec;

use log::{debug, info};
use zerocopy::little_endian::U16;
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

use crate::error::{Error, Result};
use crate::identity::{PeripheralIdentity, UsbId};
use crate::transport::{Clock, RescanPolicy, Transport, UsbBus};

/// Vendor request used to write to the controller's internal memory
pub const ANCHOR_DOWNLOAD: u8 = 0xA0;
/// CPU control and status register of the controller
pub const CPUCS: u16 = 0xE600;
/// Vendor request answering with the loader version banner
pub const VERSION_REQUEST: u8 = 0x8A;
/// Size of the version banner buffer
pub const VERSION_LEN: usize = 512;

#[derive(FromBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
struct RecordHeader {
    address: U16,
    length: U16,
}

/// One contiguous piece of firmware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Load address in controller RAM
    pub address: u16,
    /// Bytes to place at `address`
    pub payload: Vec<u8>,
}

/// A parsed firmware image, segments in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirmwareImage {
    segments: Vec<Segment>,
}

impl FirmwareImage {
    /// Parse an image file
    ///
    /// Writes to `CPUCS` are dropped: the stager brackets every upload with
    /// its own reset assert and release.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut segments = Vec::new();
        let mut offset = 0;

        while offset < bytes.len() {
            let (header, rest) = RecordHeader::read_from_prefix(&bytes[offset..])
                .map_err(|_| Error::FirmwareFormat { offset })?;
            let address = header.address.get();
            let length = header.length.get() as usize;
            let payload = rest
                .get(..length)
                .ok_or(Error::FirmwareFormat { offset })?;

            if address == CPUCS {
                debug!("Dropping CPUCS record at byte {}", offset);
            } else {
                segments.push(Segment {
                    address,
                    payload: payload.to_vec(),
                });
            }
            offset += core::mem::size_of::<RecordHeader>() + length;
        }

        if segments.is_empty() {
            return Err(Error::FirmwareFormat { offset: 0 });
        }
        Ok(Self { segments })
    }

    /// Segments in upload order
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Total payload size
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.payload.len()).sum()
    }

    /// True if the image carries no payload
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// When a stage needs to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageCondition {
    /// Unconditionally
    Always,
    /// Only while the device reports this loader banner
    LoaderBanner(&'static [u8]),
}

/// One firmware upload step
#[derive(Debug)]
pub struct Stage {
    /// File name of the image
    pub image: &'static str,
    /// Id the device re-enumerates as once the stage has run
    pub expected: UsbId,
    /// Precondition checked on the freshly opened device
    pub condition: StageCondition,
}

/// Provider of firmware images by file name
pub trait FirmwareSource {
    /// Load and parse an image
    ///
    /// # Errors
    /// * `FirmwareMissing` - no image of that name
    /// * `FirmwareFormat` - the image is malformed
    fn load(&mut self, name: &str) -> Result<FirmwareImage>;
}

/// Upload an image into a device held in reset, then release the reset
pub fn upload<T: Transport + ?Sized>(transport: &mut T, image: &FirmwareImage) -> Result<()> {
    transport.control_write(ANCHOR_DOWNLOAD, CPUCS, 0, &[0x01])?;
    for segment in image.segments() {
        debug!(
            "Loading {} bytes at 0x{:04X}",
            segment.payload.len(),
            segment.address
        );
        transport.control_write(ANCHOR_DOWNLOAD, segment.address, 0, &segment.payload)?;
    }
    transport.control_write(ANCHOR_DOWNLOAD, CPUCS, 0, &[0x00])
}

fn stage_needed<T: Transport + ?Sized>(transport: &mut T, condition: StageCondition) -> Result<bool> {
    match condition {
        StageCondition::Always => Ok(true),
        StageCondition::LoaderBanner(banner) => {
            let mut buf = [0u8; VERSION_LEN];
            let n = transport.control_read(VERSION_REQUEST, 0, 0, &mut buf)?;
            let reported = &buf[..n];
            let end = reported.iter().position(|&b| b == 0).unwrap_or(n);
            Ok(&reported[..end] == banner)
        }
    }
}

/// Wait for a device with id `expected` to show up at `bus_path`
///
/// Devices with the same id on other ports are ignored.
pub fn wait_for<B: UsbBus + ?Sized, C: Clock + ?Sized>(
    bus: &mut B,
    clock: &mut C,
    policy: RescanPolicy,
    expected: UsbId,
    bus_path: &str,
) -> Result<PeripheralIdentity> {
    for attempt in 1..=policy.attempts {
        clock.sleep(policy.delay);
        if let Some(found) = bus
            .rescan()?
            .into_iter()
            .find(|p| p.usb_id() == expected && p.bus_path == bus_path)
        {
            debug!("{} appeared after {} rescan(s)", expected, attempt);
            return Ok(found);
        }
    }
    Err(Error::ReenumerationTimeout { expected })
}

/// Bring a programmer to its operational firmware
///
/// Returns the identity of the operational device. An identity that is
/// already operational is returned untouched without opening the device.
///
/// # Errors
/// * `DeviceNotFound` - the id is not a known programmer
/// * `ReenumerationTimeout` - the device did not come back after a stage
pub fn ensure_staged<B, F, C>(
    bus: &mut B,
    firmware: &mut F,
    clock: &mut C,
    policy: RescanPolicy,
    identity: PeripheralIdentity,
) -> Result<PeripheralIdentity>
where
    B: UsbBus + ?Sized,
    F: FirmwareSource + ?Sized,
    C: Clock + ?Sized,
{
    let known = identity.known().ok_or(Error::DeviceNotFound)?;
    if known.is_operational() {
        debug!("{} needs no firmware", identity);
        return Ok(identity);
    }

    let mut current = identity;
    for stage in known.stages {
        {
            let mut transport = bus.open(&current)?;
            if !stage_needed(&mut transport, stage.condition)? {
                info!("{} already present, skipping", stage.image);
                continue;
            }
            let image = firmware.load(stage.image)?;
            info!(
                "Loading {} ({} bytes) into {}",
                stage.image,
                image.len(),
                current
            );
            upload(&mut transport, &image)?;
        }
        current = wait_for(bus, clock, policy, stage.expected, &current.bus_path)?;
        info!("Programmer re-enumerated as {}", current);
    }
    Ok(current)
}
