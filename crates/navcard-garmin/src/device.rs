//! Garmin programmer device implementation

use log::{debug, trace};
use navcard_core::error::{Error, Result};
use navcard_core::firmware::VERSION_LEN;
use navcard_core::geometry::{CardGeometry, CardId, PhysicalTarget, BLOCK_SIZE};
use navcard_core::identity::ProgrammerFamily;
use navcard_core::programmer::{CardProgrammer, Operation};
use navcard_core::transport::Transport;
use zerocopy::{FromBytes, IntoBytes};

use crate::protocol::*;

/// Garmin programmer running operational firmware
pub struct Garmin<T: Transport> {
    transport: T,
    firmware: String,
    last_card_id: Option<u32>,
    /// Next expected erase status index
    erase_index: u16,
    /// Sectors announced by the running erase
    erase_count: u16,
}

impl<T: Transport> Garmin<T> {
    /// Take over an open transport and read the firmware banner
    pub fn new(mut transport: T) -> Result<Self> {
        let mut buf = [0u8; VERSION_LEN];
        let n = transport.control_read(REQ_VERSION, 0, 0, &mut buf)?;
        let firmware = String::from_utf8_lossy(&buf[..n])
            .trim_end_matches('\0')
            .to_string();
        debug!("Garmin firmware: {}", firmware);
        Ok(Self {
            transport,
            firmware,
            last_card_id: None,
            erase_index: 0,
            erase_count: 0,
        })
    }

    /// Raw card id word
    pub fn card_id(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        let n = self.transport.control_read(REQ_CARD_ID, 0, 0, &mut buf)?;
        if n != buf.len() {
            return Err(Error::UnexpectedResponse);
        }
        Ok(u32::from_le_bytes(buf))
    }

    fn request(&mut self, request: u8, data: &[u8]) -> Result<()> {
        self.transport.control_write(request, 0, 0, data)
    }

    fn end_read(&mut self) -> Result<()> {
        self.request(REQ_END_READ, &[])
    }

    fn end_write(&mut self) -> Result<()> {
        self.request(REQ_END_WRITE, &[])
    }

    fn check_card(&mut self) -> Result<()> {
        if !self.has_card()? {
            return Err(Error::CardMissing);
        }
        Ok(())
    }
}

impl<T: Transport> CardProgrammer for Garmin<T> {
    fn family(&self) -> ProgrammerFamily {
        ProgrammerFamily::Garmin
    }

    fn firmware_description(&mut self) -> Result<String> {
        Ok(self.firmware.clone())
    }

    fn has_card(&mut self) -> Result<bool> {
        Ok(self.card_id()? != NO_CARD)
    }

    fn read_card_id(&mut self) -> Result<CardId> {
        let raw = self.card_id()?;
        if raw == NO_CARD {
            return Err(Error::CardMissing);
        }
        self.last_card_id = Some(raw);

        let (manufacturer, chip, chips) = split_card_id(raw);
        let id = CardId {
            manufacturer,
            chip,
            chips,
        };
        if TERRAIN_CARD_IDS.contains(&raw) {
            return Err(Error::UnsupportedCard(id));
        }
        debug!("Card id 0x{:08X}", raw);

        // Leave any stream a previous session may have left open
        self.end_read()?;
        self.end_write()?;
        Ok(id)
    }

    fn chip_iids(&self) -> &[u32] {
        self.last_card_id.as_slice()
    }

    fn linear_addressing(&self) -> bool {
        true
    }

    fn begin(
        &mut self,
        op: Operation,
        _geometry: &CardGeometry,
        start: PhysicalTarget,
        sectors: u32,
    ) -> Result<()> {
        if start.offset != 0 {
            return Err(Error::InvalidAlignment);
        }
        self.check_card()?;
        match op {
            Operation::Read => {
                self.request(REQ_BEGIN_READ, StreamCommand::new(start.sector).as_bytes())
            }
            Operation::Write => {
                self.request(REQ_BEGIN_WRITE, StreamCommand::new(start.sector).as_bytes())
            }
            Operation::Erase => {
                let count = u16::try_from(sectors).map_err(|_| Error::InvalidAlignment)?;
                self.erase_index = 0;
                self.erase_count = count;
                self.request(
                    REQ_BEGIN_ERASE,
                    EraseCommand::new(start.sector, count).as_bytes(),
                )
            }
        }
    }

    fn erase_sector(&mut self, target: PhysicalTarget) -> Result<()> {
        if self.erase_index >= self.erase_count {
            return Err(Error::InvalidAlignment);
        }
        let mut buf = [0u8; core::mem::size_of::<EraseStatus>()];
        let n = self.transport.bulk_read(BULK_IN_EP, &mut buf)?;
        let status = EraseStatus::read_from_bytes(&buf[..n]).map_err(|_| Error::UnexpectedResponse)?;
        if status.index() != Some(self.erase_index) {
            debug!(
                "Erase status {:02X?} for sector {}, wanted index {}",
                buf, target.sector, self.erase_index
            );
            return Err(Error::UnexpectedResponse);
        }
        trace!("Sector {} erased", target.sector);
        self.erase_index += 1;
        Ok(())
    }

    fn read_block(&mut self, _target: PhysicalTarget, buf: &mut [u8]) -> Result<()> {
        if buf.len() != BLOCK_SIZE as usize {
            return Err(Error::InvalidAlignment);
        }
        let n = self.transport.bulk_read(BULK_IN_EP, buf)?;
        if n != buf.len() {
            debug!("Short block read: {} bytes", n);
            return Err(Error::UnexpectedResponse);
        }
        Ok(())
    }

    fn write_block(&mut self, _target: PhysicalTarget, data: &[u8]) -> Result<()> {
        if data.len() != BLOCK_SIZE as usize {
            return Err(Error::InvalidAlignment);
        }
        self.transport.bulk_write(BULK_OUT_EP, data)
    }

    fn end(&mut self, op: Operation) -> Result<()> {
        match op {
            Operation::Read => self.end_read(),
            Operation::Erase | Operation::Write => self.end_write(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navcard_core::engine::{self, NoProgress, WriteOptions};
    use navcard_core::geometry::AddressingMode;
    use navcard_dummy::{DummyCard, GarminEmulator};

    fn open(card: Option<DummyCard>) -> (Garmin<GarminEmulator>, GarminEmulator) {
        let emulator = GarminEmulator::operational(card);
        let garmin = Garmin::new(emulator.clone()).unwrap();
        (garmin, emulator)
    }

    #[test]
    fn test_detect_is_linear() {
        let (mut garmin, _) = open(Some(DummyCard::new(0x01, 0x41, 4)));
        let geometry = engine::detect(&mut garmin).unwrap();
        assert_eq!(geometry.addressing, AddressingMode::Linear);
        assert_eq!(geometry.to_string(), "16MB WAAS (silver)");
        assert_eq!(garmin.chip_iids(), &[0x0004_4101]);
    }

    #[test]
    fn test_terrain_card() {
        let (mut garmin, _) = open(Some(DummyCard::new(0xEC, 0xDA, 1)));
        assert!(matches!(
            engine::detect(&mut garmin),
            Err(Error::UnsupportedCard(_))
        ));
    }

    #[test]
    fn test_missing_card() {
        let (mut garmin, _) = open(None);
        assert_eq!(engine::detect(&mut garmin), Err(Error::CardMissing));
    }

    #[test]
    fn test_write_and_read_back() {
        let (mut garmin, emulator) = open(Some(DummyCard::new(0x01, 0xAD, 2)));
        let geometry = engine::detect(&mut garmin).unwrap();
        let image: Vec<u8> = (0..0x1_2345u32).map(|i| (i * 7) as u8).collect();
        engine::write(
            &mut garmin,
            &geometry,
            &image,
            &WriteOptions::default(),
            &mut NoProgress,
        )
        .unwrap();
        assert_eq!(emulator.counters().erases, geometry.sector_count() as usize);

        let mut out = Vec::new();
        engine::read(&mut garmin, &geometry, &mut out, &mut NoProgress).unwrap();
        assert_eq!(&out[..image.len()], &image[..]);
        assert!(out[image.len()..].iter().all(|&b| b == 0xFF));
    }
}
