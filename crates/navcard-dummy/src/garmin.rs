//! Garmin card programmer emulator
//!
//! Models the whole life of the FX2 based programmer: the ROM that only
//! accepts anchor downloads, the stage-1 loader that reports a fixed
//! version banner, and the operational firmware. Releasing the CPU reset
//! after a download makes the device re-enumerate; handles opened before
//! that point report `Disconnected` from then on.

use std::cell::RefCell;
use std::rc::Rc;

use log::debug;
use navcard_core::error::{Error, Result, TransportStatus};
use navcard_core::firmware::{ANCHOR_DOWNLOAD, CPUCS, VERSION_LEN, VERSION_REQUEST};
use navcard_core::geometry::BLOCK_SIZE;
use navcard_core::identity::{UsbId, GARMIN, GARMIN_LOADER_BANNER, GARMIN_UNINIT_EARLY};
use navcard_core::transport::Transport;

use crate::{Counters, DummyCard, Faults};

const OUT_EP: u8 = 0x02;
const IN_EP: u8 = 0x86;
const NO_CARD: u32 = 0x0069_7641;

/// Banner of the emulated operational firmware
pub const OPERATIONAL_BANNER: &str = "Aviation Card Programmer Ver 3.10 Jan 05 2016 10:12:40";

/// Firmware currently running on the emulated device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Firmware {
    /// Bare ROM waiting for an anchor download
    Rom,
    /// Stage-1 loader
    Loader,
    /// Fully staged
    Operational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Idle,
    Read { offset: usize },
    Write { offset: usize },
    Erase { sector: u16, remaining: u16, index: u16 },
}

struct State {
    id: UsbId,
    firmware: Firmware,
    visible: bool,
    reenumerates: bool,
    generation: u32,
    in_reset: bool,
    loaded_bytes: usize,
    card: Option<DummyCard>,
    stream: Stream,
    counters: Counters,
    faults: Faults,
}

fn stall<T>() -> Result<T> {
    Err(Error::Device(TransportStatus::Stall))
}

impl State {
    fn release_reset(&mut self) {
        self.in_reset = false;
        if self.loaded_bytes == 0 {
            return;
        }
        self.loaded_bytes = 0;
        self.firmware = match (self.firmware, self.id) {
            (Firmware::Rom, GARMIN_UNINIT_EARLY) => Firmware::Operational,
            (Firmware::Rom, _) => Firmware::Loader,
            (_, _) => Firmware::Operational,
        };
        self.id = GARMIN;
        self.generation += 1;
        self.stream = Stream::Idle;
        if !self.reenumerates {
            self.visible = false;
        }
        debug!("Emulated programmer re-enumerates ({:?})", self.firmware);
    }

    fn card_id(&self) -> u32 {
        self.card.as_ref().map_or(NO_CARD, |c| c.garmin_id())
    }

    fn sector_offset(&self, sector: u16) -> Option<usize> {
        self.card.as_ref()?.linear_sector_offset(sector)
    }

    fn control_write(&mut self, request: u8, value: u16, data: &[u8]) -> Result<()> {
        self.counters.control_writes += 1;
        if request == ANCHOR_DOWNLOAD {
            if self.firmware == Firmware::Operational {
                return stall();
            }
            match (value, data) {
                (CPUCS, [0x01]) => {
                    self.in_reset = true;
                    self.counters.resets += 1;
                }
                (CPUCS, [0x00]) => self.release_reset(),
                (CPUCS, _) => return stall(),
                _ if self.in_reset => self.loaded_bytes += data.len(),
                _ => return stall(),
            }
            return Ok(());
        }

        if self.firmware != Firmware::Operational {
            return stall();
        }
        let sector = |d: &[u8], at: usize| d.get(at..at + 2).map(|b| u16::from_be_bytes([b[0], b[1]]));
        self.stream = match request {
            0x81 | 0x86 => {
                let Some(offset) = sector(data, 2).and_then(|s| self.sector_offset(s)) else {
                    return stall();
                };
                if request == 0x81 {
                    Stream::Read { offset }
                } else {
                    Stream::Write { offset }
                }
            }
            0x85 => match (sector(data, 2), sector(data, 8)) {
                (Some(start), Some(count)) if data.len() == 14 => Stream::Erase {
                    sector: start,
                    remaining: count,
                    index: 0,
                },
                _ => return stall(),
            },
            0x83 | 0x87 => Stream::Idle,
            _ => return stall(),
        };
        Ok(())
    }

    fn control_read(&mut self, request: u8, buf: &mut [u8]) -> Result<usize> {
        match (request, self.firmware) {
            (VERSION_REQUEST, Firmware::Loader | Firmware::Operational) => {
                let banner: &[u8] = if self.firmware == Firmware::Loader {
                    GARMIN_LOADER_BANNER
                } else {
                    OPERATIONAL_BANNER.as_bytes()
                };
                let n = buf.len().min(VERSION_LEN);
                buf[..n].fill(0);
                let len = banner.len().min(n);
                buf[..len].copy_from_slice(&banner[..len]);
                Ok(n)
            }
            (0x82, Firmware::Operational) => {
                let id = self.card_id().to_le_bytes();
                let n = buf.len().min(id.len());
                buf[..n].copy_from_slice(&id[..n]);
                Ok(n)
            }
            _ => stall(),
        }
    }

    fn bulk_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.stream {
            Stream::Read { offset } => {
                let len = buf.len().min(BLOCK_SIZE as usize);
                if !self.card.as_ref().is_some_and(|c| c.read(offset, &mut buf[..len])) {
                    return stall();
                }
                self.stream = Stream::Read {
                    offset: offset + len,
                };
                self.counters.block_reads += 1;
                Ok(len)
            }
            Stream::Erase {
                sector,
                remaining,
                index,
            } if remaining > 0 => {
                let Some(offset) = self.sector_offset(sector) else {
                    return stall();
                };
                if let Some(card) = self.card.as_mut() {
                    card.erase(offset);
                }
                self.counters.erases += 1;
                self.stream = Stream::Erase {
                    sector: sector + 1,
                    remaining: remaining - 1,
                    index: index + 1,
                };
                let mut status = [0u8; 12];
                status[..4].copy_from_slice(b"BlKe");
                status[10..].copy_from_slice(&index.to_be_bytes());
                let n = buf.len().min(status.len());
                buf[..n].copy_from_slice(&status[..n]);
                Ok(n)
            }
            _ => Err(Error::Device(TransportStatus::Timeout)),
        }
    }

    fn bulk_write(&mut self, data: &[u8]) -> Result<()> {
        let Stream::Write { offset } = self.stream else {
            return stall();
        };
        if self.faults.write_at == Some(self.counters.block_writes) {
            return stall();
        }
        if !self.card.as_mut().is_some_and(|c| c.program(offset, data)) {
            return stall();
        }
        self.stream = Stream::Write {
            offset: offset + data.len(),
        };
        self.counters.block_writes += 1;
        Ok(())
    }
}

/// Handle on an emulated Garmin programmer
///
/// Clones share the device. A handle is bound to the enumeration it was
/// created in.
#[derive(Clone)]
pub struct GarminEmulator {
    state: Rc<RefCell<State>>,
    generation: u32,
}

impl GarminEmulator {
    fn with_state(id: UsbId, firmware: Firmware, card: Option<DummyCard>) -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                id,
                firmware,
                visible: true,
                reenumerates: true,
                generation: 0,
                in_reset: false,
                loaded_bytes: 0,
                card,
                stream: Stream::Idle,
                counters: Counters::default(),
                faults: Faults::default(),
            })),
            generation: 0,
        }
    }

    /// Fully staged programmer
    pub fn operational(card: Option<DummyCard>) -> Self {
        Self::with_state(GARMIN, Firmware::Operational, card)
    }

    /// Programmer fresh out of the box, enumerating as `id`
    ///
    /// `091E:0300` takes one stage; `091E:0500` and a bare `04B4:8613` go
    /// through the stage-1 loader.
    pub fn uninitialized(id: UsbId, card: Option<DummyCard>) -> Self {
        Self::with_state(id, Firmware::Rom, card)
    }

    /// Programmer whose stage-1 loader is running but stage 2 is missing
    pub fn loader(card: Option<DummyCard>) -> Self {
        Self::with_state(GARMIN, Firmware::Loader, card)
    }

    /// Make the device vanish instead of re-enumerating after a download
    pub fn never_reenumerate(&self) {
        self.state.borrow_mut().reenumerates = false;
    }

    /// Fresh handle on the current enumeration
    pub fn reopen(&self) -> Self {
        Self {
            state: self.state.clone(),
            generation: self.state.borrow().generation,
        }
    }

    /// Id the device currently enumerates as
    pub fn usb_id(&self) -> UsbId {
        self.state.borrow().id
    }

    /// True if the device is on the bus
    pub fn visible(&self) -> bool {
        self.state.borrow().visible
    }

    /// True once the operational firmware runs
    pub fn is_operational(&self) -> bool {
        self.state.borrow().firmware == Firmware::Operational
    }

    /// Operation counters so far
    pub fn counters(&self) -> Counters {
        self.state.borrow().counters
    }

    /// Card contents in logical order, empty without a card
    pub fn card_data(&self) -> Vec<u8> {
        self.state
            .borrow()
            .card
            .as_ref()
            .map(|c| c.data().to_vec())
            .unwrap_or_default()
    }

    /// Fail the `index`th block write with a stall
    pub fn fail_write_at(&self, index: usize) {
        self.state.borrow_mut().faults.write_at = Some(index);
    }

    fn check_generation(&self) -> Result<()> {
        if self.generation != self.state.borrow().generation {
            return Err(Error::Device(TransportStatus::Disconnected));
        }
        Ok(())
    }
}

impl Transport for GarminEmulator {
    fn control_write(&mut self, request: u8, value: u16, _index: u16, data: &[u8]) -> Result<()> {
        self.check_generation()?;
        self.state.borrow_mut().control_write(request, value, data)
    }

    fn control_read(&mut self, request: u8, _value: u16, _index: u16, buf: &mut [u8]) -> Result<usize> {
        self.check_generation()?;
        self.state.borrow_mut().control_read(request, buf)
    }

    fn bulk_read(&mut self, endpoint: u8, buf: &mut [u8]) -> Result<usize> {
        self.check_generation()?;
        if endpoint != IN_EP {
            return stall();
        }
        self.state.borrow_mut().bulk_read(buf)
    }

    fn bulk_write(&mut self, endpoint: u8, data: &[u8]) -> Result<()> {
        self.check_generation()?;
        if endpoint != OUT_EP {
            return stall();
        }
        self.state.borrow_mut().bulk_write(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navcard_core::identity::GARMIN_UNINIT;

    #[test]
    fn test_reset_release_reenumerates() {
        let mut emu = GarminEmulator::uninitialized(GARMIN_UNINIT, None);
        emu.control_write(ANCHOR_DOWNLOAD, CPUCS, 0, &[1]).unwrap();
        emu.control_write(ANCHOR_DOWNLOAD, 0x0000, 0, &[0x02, 0x00]).unwrap();
        emu.control_write(ANCHOR_DOWNLOAD, CPUCS, 0, &[0]).unwrap();
        assert_eq!(emu.usb_id(), GARMIN);
        assert!(!emu.is_operational());
        assert_eq!(
            emu.control_write(0x83, 0, 0, &[]),
            Err(Error::Device(TransportStatus::Disconnected))
        );

        let mut handle = emu.reopen();
        let mut buf = [0u8; VERSION_LEN];
        handle.control_read(VERSION_REQUEST, 0, 0, &mut buf).unwrap();
        assert_eq!(&buf[..GARMIN_LOADER_BANNER.len()], GARMIN_LOADER_BANNER);
        assert_eq!(buf[GARMIN_LOADER_BANNER.len()], 0);
    }

    #[test]
    fn test_download_requires_reset() {
        let mut emu = GarminEmulator::uninitialized(GARMIN_UNINIT, None);
        assert!(emu.control_write(ANCHOR_DOWNLOAD, 0x0100, 0, &[0]).is_err());
    }

    #[test]
    fn test_no_card_id() {
        let mut emu = GarminEmulator::operational(None);
        let mut buf = [0u8; 4];
        emu.control_read(0x82, 0, 0, &mut buf).unwrap();
        assert_eq!(u32::from_le_bytes(buf), NO_CARD);
    }
}
