//! Emulated data card

use navcard_core::geometry::{identify, CardGeometry, CardId, PhysicalTarget, SECTOR_SIZE};

/// A data card with flash semantics: erase sets a sector to `0xFF`,
/// programming can only clear bits.
#[derive(Debug, Clone)]
pub struct DummyCard {
    id: CardId,
    geometry: Option<CardGeometry>,
    data: Vec<u8>,
}

impl DummyCard {
    /// Blank card of `chips` chips with the given chip identifier
    ///
    /// Identifiers with no known geometry give a card without storage.
    pub fn new(manufacturer: u8, chip: u8, chips: u8) -> Self {
        let id = CardId {
            manufacturer,
            chip,
            chips,
        };
        let geometry = identify(id).ok();
        let size = geometry.map_or(0, |g| g.total_capacity as usize);
        Self {
            id,
            geometry,
            data: vec![0xFF; size],
        }
    }

    /// Card pre-filled with `contents` from offset 0
    pub fn with_data(manufacturer: u8, chip: u8, chips: u8, contents: &[u8]) -> Self {
        let mut card = Self::new(manufacturer, chip, chips);
        let len = contents.len().min(card.data.len());
        card.data[..len].copy_from_slice(&contents[..len]);
        card
    }

    /// Card identifier
    pub fn id(&self) -> CardId {
        self.id
    }

    /// Contents in logical order
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// IID as reported per chip by the Skybound firmware
    pub fn skybound_iid(&self) -> u32 {
        (u32::from(self.id.manufacturer) << 24) | (u32::from(self.id.chip) << 8)
    }

    /// Card id word as reported by the Garmin firmware
    pub fn garmin_id(&self) -> u32 {
        (u32::from(self.id.chips) << 16)
            | (u32::from(self.id.chip) << 8)
            | u32::from(self.id.manufacturer)
    }

    /// Logical offset of a physical (banked) sector
    pub fn banked_sector_offset(&self, sector: u16) -> Option<usize> {
        let geometry = self.geometry?;
        (0..self.id.chips).find_map(|chip| {
            geometry
                .logical_offset(PhysicalTarget {
                    chip,
                    sector,
                    offset: 0,
                })
                .map(|o| o as usize)
        })
    }

    /// Logical offset of a logical sector
    pub fn linear_sector_offset(&self, sector: u16) -> Option<usize> {
        let offset = usize::from(sector) * SECTOR_SIZE as usize;
        (offset < self.data.len()).then_some(offset)
    }

    /// Set the sector at `offset` to the erased state
    pub fn erase(&mut self, offset: usize) {
        let end = (offset + SECTOR_SIZE as usize).min(self.data.len());
        self.data[offset..end].fill(0xFF);
    }

    /// Program `bytes` at `offset`, clearing bits only
    pub fn program(&mut self, offset: usize, bytes: &[u8]) -> bool {
        let Some(dst) = self.data.get_mut(offset..offset + bytes.len()) else {
            return false;
        };
        for (d, s) in dst.iter_mut().zip(bytes) {
            *d &= *s;
        }
        true
    }

    /// Read `buf.len()` bytes at `offset`
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> bool {
        match self.data.get(offset..offset + buf.len()) {
            Some(src) => {
                buf.copy_from_slice(src);
                true
            }
            None => false,
        }
    }
}
