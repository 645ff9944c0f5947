//! Skybound G2 device implementation

use log::{debug, trace};
use navcard_core::error::{Error, Result};
use navcard_core::geometry::{CardGeometry, CardId, CardKind, PhysicalTarget, BLOCK_SIZE, CHIP_SLOT_BASES};
use navcard_core::identity::ProgrammerFamily;
use navcard_core::programmer::{CardProgrammer, Operation};
use navcard_core::transport::Transport;

use crate::protocol::*;

/// Skybound G2 programmer on an open transport
pub struct Skybound<T: Transport> {
    transport: T,
    chip_iids: Vec<u32>,
    firmware_version: Option<String>,
    /// Erase/write key of the card being transferred
    key: u8,
    /// Physical sector currently selected
    selected: Option<u16>,
    /// Units handled since `begin`, drives the activity LED
    tick: u32,
}

impl<T: Transport> Skybound<T> {
    /// Take over an open transport and light the LED
    pub fn new(transport: T) -> Result<Self> {
        let mut skybound = Self {
            transport,
            chip_iids: Vec::new(),
            firmware_version: None,
            key: KEY_LARGE,
            selected: None,
            tick: 0,
        };
        skybound.set_led(true)?;
        Ok(skybound)
    }

    fn command(&mut self, bytes: &[u8]) -> Result<()> {
        self.transport.bulk_write(BULK_OUT_EP, bytes)
    }

    fn reply(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.transport.bulk_read(BULK_IN_EP, buf)
    }

    /// Query a short reply
    fn query(&mut self, bytes: &[u8]) -> Result<([u8; REPLY_LEN], usize)> {
        self.command(bytes)?;
        let mut buf = [0u8; REPLY_LEN];
        let n = self.reply(&mut buf)?;
        Ok((buf, n))
    }

    /// Switch the activity LED
    pub fn set_led(&mut self, on: bool) -> Result<()> {
        self.command(&[if on { CMD_LED_ON } else { CMD_LED_OFF }])
    }

    /// Firmware version string, e.g. `20140530`
    pub fn firmware_version(&mut self) -> Result<String> {
        if let Some(version) = &self.firmware_version {
            return Ok(version.clone());
        }
        let (buf, n) = self.query(&[CMD_FIRMWARE_VERSION])?;
        let version = String::from_utf8_lossy(&buf[..n])
            .trim_end_matches('\0')
            .to_string();
        debug!("Skybound firmware {}", version);
        self.firmware_version = Some(version.clone());
        Ok(version)
    }

    fn select(&mut self, sector: u16) -> Result<()> {
        trace!("Selecting physical sector 0x{:04X}", sector);
        self.command(&select_sector(sector))?;
        self.selected = Some(sector);
        Ok(())
    }

    /// Select `target`'s sector when a new sector starts
    fn select_for(&mut self, target: PhysicalTarget) -> Result<()> {
        if target.offset == 0 {
            self.select(target.sector)
        } else if self.selected == Some(target.sector) {
            Ok(())
        } else {
            Err(Error::InvalidAlignment)
        }
    }

    fn read_iid(&mut self) -> Result<u32> {
        let (buf, n) = self.query(&[CMD_CHIP_INFO, CHIP_INFO_IID])?;
        if n < 4 {
            return Err(Error::UnexpectedResponse);
        }
        Ok(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))
    }

    /// IIDs of the chips answering in each slot
    fn scan_chips(&mut self) -> Result<Vec<u32>> {
        let mut iids = Vec::new();
        for base in CHIP_SLOT_BASES {
            self.select(base)?;
            self.command(&[CMD_BEFORE_READ])?;
            let iid = self.read_iid()?;
            if EMPTY_SLOT_IIDS.contains(&iid) {
                break;
            }
            debug!("Slot 0x{:04X}: IID 0x{:08X}", base, iid);
            iids.push(iid);
        }
        Ok(iids)
    }

    /// Blink and make sure the card is still there
    fn heartbeat(&mut self) -> Result<()> {
        let on = self.tick % 2 == 0;
        self.tick += 1;
        self.set_led(on)?;
        if !self.has_card()? {
            return Err(Error::CardMissing);
        }
        Ok(())
    }

    fn expect_status(&mut self, expected: &[u8]) -> Result<()> {
        let mut buf = [0u8; REPLY_LEN];
        let n = self.reply(&mut buf)?;
        if &buf[..n] != expected {
            debug!("Unexpected status {:02X?}, wanted {:02X?}", &buf[..n], expected);
            return Err(Error::UnexpectedResponse);
        }
        Ok(())
    }
}

impl<T: Transport> CardProgrammer for Skybound<T> {
    fn family(&self) -> ProgrammerFamily {
        ProgrammerFamily::Skybound
    }

    fn firmware_description(&mut self) -> Result<String> {
        let version = self.firmware_version()?;
        let name = firmware_name(&version);
        Ok(format!("{} ({})", version, name))
    }

    fn has_card(&mut self) -> Result<bool> {
        let (buf, n) = self.query(&[CMD_CARD_PRESENT])?;
        match &buf[..n] {
            [CARD_PRESENT] => Ok(true),
            [CARD_ABSENT] => Ok(false),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    fn read_card_id(&mut self) -> Result<CardId> {
        if !self.has_card()? {
            return Err(Error::CardMissing);
        }
        let iids = self.scan_chips()?;
        self.chip_iids = iids.clone();

        let Some(&first) = iids.first() else {
            return Ok(CardId {
                manufacturer: 0,
                chip: 0,
                chips: 0,
            });
        };
        let (manufacturer, chip) = split_iid(first);
        let id = CardId {
            manufacturer,
            chip,
            chips: iids.len() as u8,
        };
        if iids.iter().any(|&iid| iid != first) {
            return Err(Error::UnknownCard(id));
        }
        Ok(id)
    }

    fn chip_iids(&self) -> &[u32] {
        &self.chip_iids
    }

    fn check_write_supported(&mut self, geometry: &CardGeometry) -> Result<()> {
        if geometry.kind == CardKind::Orange && self.firmware_version()? != FIRMWARE_ORANGE {
            return Err(Error::UnsupportedWrite);
        }
        Ok(())
    }

    fn begin(
        &mut self,
        op: Operation,
        geometry: &CardGeometry,
        _start: PhysicalTarget,
        _sectors: u32,
    ) -> Result<()> {
        self.key = if geometry.sectors_per_chip() == 0x10 {
            KEY_1M
        } else {
            KEY_LARGE
        };
        self.tick = 0;
        self.selected = None;
        match op {
            Operation::Read => self.command(&[CMD_BEFORE_READ]),
            Operation::Erase | Operation::Write => self.command(&[CMD_BEFORE_WRITE]),
        }
    }

    fn erase_sector(&mut self, target: PhysicalTarget) -> Result<()> {
        self.heartbeat()?;
        self.select(target.sector)?;
        if self.key == KEY_1M {
            self.command(&[CMD_PRE_ERASE_1M])?;
        }
        self.command(&[CMD_ERASE_SECTOR, self.key])?;
        let key = self.key;
        self.expect_status(&[key])
    }

    fn read_block(&mut self, target: PhysicalTarget, buf: &mut [u8]) -> Result<()> {
        if buf.len() != BLOCK_SIZE as usize {
            return Err(Error::InvalidAlignment);
        }
        self.select_for(target)?;
        self.heartbeat()?;
        self.command(&[CMD_READ_BLOCK])?;
        let n = self.reply(buf)?;
        if n != buf.len() {
            debug!("Short block read: {} bytes", n);
            return Err(Error::UnexpectedResponse);
        }
        Ok(())
    }

    fn write_block(&mut self, target: PhysicalTarget, data: &[u8]) -> Result<()> {
        if data.len() != BLOCK_SIZE as usize {
            return Err(Error::InvalidAlignment);
        }
        self.select_for(target)?;
        self.heartbeat()?;
        self.command(&[CMD_WRITE_BLOCK, self.key])?;
        self.command(data)?;
        let first = if self.key == KEY_1M {
            WRITE_OK_1M
        } else {
            data[data.len() - 1]
        };
        self.expect_status(&[first, 0x00, 0x00, 0x00])
    }

    fn end(&mut self, _op: Operation) -> Result<()> {
        self.selected = None;
        self.set_led(true)
    }

    fn close(&mut self) -> Result<()> {
        self.set_led(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navcard_core::engine::{self, NoProgress, WriteOptions};
    use navcard_dummy::{DummyCard, SkyboundEmulator};

    fn open(card: Option<DummyCard>, firmware: &'static str) -> (Skybound<SkyboundEmulator>, SkyboundEmulator) {
        let emulator = SkyboundEmulator::new(card, firmware);
        let skybound = Skybound::new(emulator.clone()).unwrap();
        (skybound, emulator)
    }

    #[test]
    fn test_detect_16mb_waas() {
        let (mut skybound, _) = open(Some(DummyCard::new(0x01, 0x41, 4)), FIRMWARE_BLACK);
        let geometry = engine::detect(&mut skybound).unwrap();
        assert_eq!(geometry.total_capacity, 16 * 1024 * 1024);
        assert_eq!(skybound.chip_iids().len(), 4);
        assert_eq!(
            skybound.firmware_description().unwrap(),
            "20071203 (G2 Black)"
        );
    }

    #[test]
    fn test_no_card() {
        let (mut skybound, _) = open(None, FIRMWARE_BLACK);
        assert_eq!(engine::detect(&mut skybound), Err(Error::CardMissing));
    }

    #[test]
    fn test_single_chip_is_unknown() {
        let (mut skybound, _) = open(Some(DummyCard::new(0x89, 0xA2, 1)), FIRMWARE_BLACK);
        assert!(matches!(
            engine::detect(&mut skybound),
            Err(Error::UnknownCard(_))
        ));
    }

    #[test]
    fn test_orange_card_needs_orange_firmware() {
        let (mut skybound, emulator) = open(Some(DummyCard::new(0x89, 0x7E, 4)), FIRMWARE_BLACK);
        let geometry = engine::detect(&mut skybound).unwrap();
        let err = engine::write(
            &mut skybound,
            &geometry,
            &[0u8; 16],
            &WriteOptions::default(),
            &mut NoProgress,
        )
        .unwrap_err();
        assert_eq!(err, Error::UnsupportedWrite);
        assert_eq!(emulator.counters().erases, 0);

        let (mut skybound, _) = open(Some(DummyCard::new(0x89, 0x7E, 4)), FIRMWARE_ORANGE);
        let geometry = engine::detect(&mut skybound).unwrap();
        engine::write(
            &mut skybound,
            &geometry,
            &[0u8; 16],
            &WriteOptions::default(),
            &mut NoProgress,
        )
        .unwrap();
    }

    #[test]
    fn test_write_lands_in_banked_sectors() {
        let (mut skybound, emulator) = open(Some(DummyCard::new(0x01, 0x41, 4)), FIRMWARE_BLACK);
        let geometry = engine::detect(&mut skybound).unwrap();
        let image: Vec<u8> = (0..0x2_1000u32).map(|i| (i % 251) as u8).collect();
        engine::write(
            &mut skybound,
            &geometry,
            &image,
            &WriteOptions::default(),
            &mut NoProgress,
        )
        .unwrap();
        assert_eq!(&emulator.card_data()[..image.len()], &image[..]);
        assert_eq!(emulator.counters().erases, geometry.sector_count() as usize);
    }

    #[test]
    fn test_1mb_chips_use_their_key() {
        let (mut skybound, emulator) = open(Some(DummyCard::new(0x89, 0xA6, 2)), FIRMWARE_BLACK);
        let geometry = engine::detect(&mut skybound).unwrap();
        engine::write(
            &mut skybound,
            &geometry,
            b"white card",
            &WriteOptions::default(),
            &mut NoProgress,
        )
        .unwrap();
        assert_eq!(&emulator.card_data()[..10], b"white card");
    }

    #[test]
    fn test_card_pulled_mid_read() {
        let (mut skybound, emulator) = open(Some(DummyCard::new(0x01, 0x41, 2)), FIRMWARE_BLACK);
        let geometry = engine::detect(&mut skybound).unwrap();
        emulator.remove_card_after_blocks(3);
        let mut out = Vec::new();
        let err = engine::read(&mut skybound, &geometry, &mut out, &mut NoProgress).unwrap_err();
        assert_eq!(
            err,
            Error::ReadFailed {
                offset: 3 * BLOCK_SIZE,
                cause: navcard_core::error::Cause::CardMissing
            }
        );
    }
}
