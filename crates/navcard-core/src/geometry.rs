//! Card geometry model
//!
//! Navigation data cards are built from two to four identical NOR flash
//! chips. The chip identifier read off the card selects a [`CardKind`] from
//! a fixed table; the kind fixes the chip size and label, the chip count
//! fixes the capacity. Unknown identifiers never produce a geometry.
//!
//! Logical offsets run contiguously over the whole card. Programmers that
//! address chips directly see a banked layout where every chip starts at
//! its own slot base and is split into banks of at most 32 sectors.

use core::fmt;

use crate::error::{Error, Result};

/// Erase unit of every navigation card
pub const SECTOR_SIZE: u32 = 0x10000;
/// Program and read unit of every navigation card
pub const BLOCK_SIZE: u32 = 0x1000;
/// Blocks per erase sector
pub const BLOCKS_PER_SECTOR: u32 = SECTOR_SIZE / BLOCK_SIZE;

/// Physical sector of the first sector of each chip slot
pub const CHIP_SLOT_BASES: [u16; 4] = [0x00E0, 0x0160, 0x01A0, 0x01C0];

const MIB: u32 = 1024 * 1024;

/// Identifier read from an inserted card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardId {
    /// JEDEC manufacturer code
    pub manufacturer: u8,
    /// Device code
    pub chip: u8,
    /// Number of chips found on the card
    pub chips: u8,
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} x {:02X}:{:02X}",
            self.chips, self.manufacturer, self.chip
        )
    }
}

/// Card families recognised by chip identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardKind {
    /// 1 MiB Intel chips
    White,
    /// 2 MiB AMD or Intel chips
    Green,
    /// 4 MiB AMD chips
    Silver,
    /// 4 MiB Intel chips
    Orange,
    /// Terrain and obstacle cards; a different card format altogether
    Terrain,
}

impl CardKind {
    /// Look up a `(manufacturer, chip)` pair
    pub fn from_chip(manufacturer: u8, chip: u8) -> Option<Self> {
        match (manufacturer, chip) {
            (0x89, 0xA2) | (0x89, 0xA6) => Some(Self::White),
            (0x01, 0xAD) | (0x89, 0xAA) => Some(Self::Green),
            (0x01, 0x41) => Some(Self::Silver),
            (0x89, 0x7E) => Some(Self::Orange),
            (0xEC, 0x79) | (0xEC, 0xDA) => Some(Self::Terrain),
            _ => None,
        }
    }

    /// Size of one chip in bytes
    pub fn chip_size(self) -> u32 {
        match self {
            Self::White => MIB,
            Self::Green => 2 * MIB,
            Self::Silver | Self::Orange => 4 * MIB,
            Self::Terrain => 128 * MIB,
        }
    }

    /// Label printed on the card
    pub fn label(self) -> &'static str {
        match self {
            Self::White => "non-WAAS (white)",
            Self::Green => "non-WAAS (green)",
            Self::Silver => "WAAS (silver)",
            Self::Orange => "WAAS (orange)",
            Self::Terrain => "Terrain/Obstacles",
        }
    }

    /// True for WAAS capable databases
    pub fn is_waas(self) -> bool {
        matches!(self, Self::Silver | Self::Orange)
    }
}

/// Per-chip banked layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankLayout {
    /// Physical sector of each chip's first bank
    pub chip_bases: [u16; 4],
    /// Sectors per bank
    pub bank_sectors: u16,
    /// Physical distance between consecutive banks of one chip
    pub bank_stride: u16,
}

/// How logical sectors map to physical sectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    /// Physical sector equals logical sector
    Linear,
    /// Chips sit at separate slot bases, each split into banks
    Banked(BankLayout),
}

/// Physical location of a logical offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalTarget {
    /// Chip index
    pub chip: u8,
    /// Physical sector number as understood by the programmer
    pub sector: u16,
    /// Byte offset inside the sector
    pub offset: u32,
}

/// Geometry of the inserted card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardGeometry {
    /// Card family
    pub kind: CardKind,
    /// Number of chips
    pub chip_count: u8,
    /// Bytes per chip
    pub chip_size: u32,
    /// Bytes on the whole card
    pub total_capacity: u32,
    /// Logical to physical mapping
    pub addressing: AddressingMode,
    /// WAAS capable card
    pub is_waas: bool,
}

/// Resolve a card identifier to its geometry
///
/// # Errors
/// * `UnsupportedCard` - a terrain card, or no chips answered
/// * `UnknownCard` - the identifier or chip count is not in the table
pub fn identify(id: CardId) -> Result<CardGeometry> {
    if id.chips == 0 {
        return Err(Error::UnsupportedCard(id));
    }
    let kind = CardKind::from_chip(id.manufacturer, id.chip).ok_or(Error::UnknownCard(id))?;
    if kind == CardKind::Terrain {
        return Err(Error::UnsupportedCard(id));
    }
    if !(2..=4).contains(&id.chips) {
        return Err(Error::UnknownCard(id));
    }

    let chip_size = kind.chip_size();
    let sectors_per_chip = (chip_size / SECTOR_SIZE) as u16;
    Ok(CardGeometry {
        kind,
        chip_count: id.chips,
        chip_size,
        total_capacity: chip_size * u32::from(id.chips),
        addressing: AddressingMode::Banked(BankLayout {
            chip_bases: CHIP_SLOT_BASES,
            bank_sectors: sectors_per_chip.min(0x20),
            bank_stride: 0x200,
        }),
        is_waas: kind.is_waas(),
    })
}

impl CardGeometry {
    /// Same card, addressed by logical sector
    pub fn linearized(self) -> Self {
        Self {
            addressing: AddressingMode::Linear,
            ..self
        }
    }

    /// Program/verify granularity
    pub fn chunk_size(&self) -> u32 {
        BLOCK_SIZE
    }

    /// Erase granularity
    pub fn sector_size(&self) -> u32 {
        SECTOR_SIZE
    }

    /// Sectors on the card
    pub fn sector_count(&self) -> u32 {
        self.total_capacity / SECTOR_SIZE
    }

    /// Sectors per chip
    pub fn sectors_per_chip(&self) -> u32 {
        self.chip_size / SECTOR_SIZE
    }

    /// Chip size in whole megabytes
    pub fn chip_megabytes(&self) -> u32 {
        self.chip_size / MIB
    }

    /// Map a logical byte offset to its physical location
    ///
    /// # Errors
    /// * `OutOfRange` - the offset lies beyond the card
    pub fn translate(&self, offset: u32) -> Result<PhysicalTarget> {
        if offset >= self.total_capacity {
            return Err(Error::OutOfRange { offset });
        }
        let sector = offset / SECTOR_SIZE;
        let spc = self.sectors_per_chip();
        let chip = sector / spc;
        let physical = match self.addressing {
            AddressingMode::Linear => sector,
            AddressingMode::Banked(layout) => {
                let within = sector % spc;
                let bank_sectors = u32::from(layout.bank_sectors);
                u32::from(layout.chip_bases[chip as usize])
                    + within % bank_sectors
                    + u32::from(layout.bank_stride) * (within / bank_sectors)
            }
        };
        Ok(PhysicalTarget {
            chip: chip as u8,
            sector: physical as u16,
            offset: offset % SECTOR_SIZE,
        })
    }

    /// Inverse of [`translate`](Self::translate)
    pub fn logical_offset(&self, target: PhysicalTarget) -> Option<u32> {
        if target.offset >= SECTOR_SIZE || target.chip >= self.chip_count {
            return None;
        }
        let spc = self.sectors_per_chip();
        let chip = u32::from(target.chip);
        let sector = match self.addressing {
            AddressingMode::Linear => {
                let sector = u32::from(target.sector);
                (sector / spc == chip).then_some(sector)?
            }
            AddressingMode::Banked(layout) => {
                let rel = u32::from(target.sector)
                    .checked_sub(u32::from(layout.chip_bases[chip as usize]))?;
                let stride = u32::from(layout.bank_stride);
                let bank_sectors = u32::from(layout.bank_sectors);
                let (bank, within) = (rel / stride, rel % stride);
                if within >= bank_sectors || bank * bank_sectors >= spc {
                    return None;
                }
                chip * spc + bank * bank_sectors + within
            }
        };
        Some(sector * SECTOR_SIZE + target.offset)
    }
}

impl fmt::Display for CardGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}MB {}",
            self.total_capacity / MIB,
            self.kind.label()
        )
    }
}
