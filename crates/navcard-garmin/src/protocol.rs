//! Garmin card programmer protocol
//!
//! Commands are vendor control requests; block data moves over the bulk
//! endpoints. Sector numbers in command payloads are big-endian logical
//! sectors, the firmware resolves chips and banks itself.

use zerocopy::big_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

// USB endpoints
pub const BULK_OUT_EP: u8 = 0x02;
pub const BULK_IN_EP: u8 = 0x86;

// Vendor requests
pub const REQ_BEGIN_READ: u8 = 0x81;
pub const REQ_CARD_ID: u8 = 0x82;
pub const REQ_END_READ: u8 = 0x83;
pub const REQ_BEGIN_ERASE: u8 = 0x85;
pub const REQ_BEGIN_WRITE: u8 = 0x86;
pub const REQ_END_WRITE: u8 = 0x87;
pub const REQ_VERSION: u8 = navcard_core::firmware::VERSION_REQUEST;

/// Card id reported with no card inserted ("Avi" in ASCII)
pub const NO_CARD: u32 = 0x0069_7641;

/// Terrain/obstacle cards, not navigation data
pub const TERRAIN_CARD_IDS: [u32; 2] = [0x0101_DAEC, 0x0101_79EC];

/// Magic of the per-sector erase status
pub const ERASE_STATUS_MAGIC: [u8; 4] = *b"BlKe";

/// Mode word of block streams
const STREAM_MODE: u16 = 0x0004;

/// Payload of `REQ_BEGIN_READ` and `REQ_BEGIN_WRITE`
#[derive(Debug, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct StreamCommand {
    mode: U16,
    start_sector: U16,
    reserved: [u8; 6],
}

impl StreamCommand {
    /// Stream starting at a logical sector
    pub fn new(start_sector: u16) -> Self {
        Self {
            mode: U16::new(STREAM_MODE),
            start_sector: U16::new(start_sector),
            reserved: [0; 6],
        }
    }
}

/// Payload of `REQ_BEGIN_ERASE`
#[derive(Debug, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct EraseCommand {
    reserved0: [u8; 2],
    start_sector: U16,
    reserved1: [u8; 4],
    sector_count: U16,
    flags: U16,
    reserved2: [u8; 2],
}

impl EraseCommand {
    /// Erase `sector_count` sectors from `start_sector`
    pub fn new(start_sector: u16, sector_count: u16) -> Self {
        Self {
            reserved0: [0; 2],
            start_sector: U16::new(start_sector),
            reserved1: [0; 4],
            sector_count: U16::new(sector_count),
            flags: U16::new(0x0001),
            reserved2: [0; 2],
        }
    }

    /// First sector
    pub fn start_sector(&self) -> u16 {
        self.start_sector.get()
    }

    /// Number of sectors
    pub fn sector_count(&self) -> u16 {
        self.sector_count.get()
    }
}

/// Status the programmer sends after erasing each sector
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct EraseStatus {
    magic: [u8; 4],
    reserved: [u8; 6],
    index: U16,
}

impl EraseStatus {
    /// Status for the `index`th sector of an erase
    pub fn new(index: u16) -> Self {
        Self {
            magic: ERASE_STATUS_MAGIC,
            reserved: [0; 6],
            index: U16::new(index),
        }
    }

    /// Sector index within the erase, if the magic is right
    pub fn index(&self) -> Option<u16> {
        (self.magic == ERASE_STATUS_MAGIC && self.reserved == [0; 6]).then(|| self.index.get())
    }
}

/// Fields packed into a card id
pub fn split_card_id(id: u32) -> (u8, u8, u8) {
    let manufacturer = (id & 0xFF) as u8;
    let chip = ((id >> 8) & 0xFF) as u8;
    let chips = ((id >> 16) & 0xFF) as u8;
    (manufacturer, chip, chips)
}
