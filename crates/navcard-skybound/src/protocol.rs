//! Skybound G2 protocol constants
//!
//! Every command is a short bulk OUT message; answers come back on the
//! bulk IN endpoint.

// USB endpoints
pub const BULK_OUT_EP: u8 = 0x02;
pub const BULK_IN_EP: u8 = 0x81;

/// Maximum length of a command reply
pub const REPLY_LEN: usize = 0x40;

// Opcodes
pub const CMD_LED_ON: u8 = 0x12;
pub const CMD_LED_OFF: u8 = 0x13;
pub const CMD_PRE_ERASE_1M: u8 = 0x16;
pub const CMD_CARD_PRESENT: u8 = 0x18;
pub const CMD_READ_BLOCK: u8 = 0x28;
pub const CMD_WRITE_BLOCK: u8 = 0x2A;
pub const CMD_SELECT_SECTOR: u8 = 0x30;
pub const CMD_BEFORE_READ: u8 = 0x40;
pub const CMD_BEFORE_WRITE: u8 = 0x42;
pub const CMD_CHIP_INFO: u8 = 0x50;
pub const CMD_ERASE_SECTOR: u8 = 0x52;
pub const CMD_FIRMWARE_VERSION: u8 = 0x60;

/// Argument of `CMD_CHIP_INFO` returning the chip IID
pub const CHIP_INFO_IID: u8 = 0x04;

/// Write and erase key for 1 MiB chips
pub const KEY_1M: u8 = 0x03;
/// Write and erase key for larger chips
pub const KEY_LARGE: u8 = 0x04;

/// Status byte of a successful block write on 1 MiB chips
pub const WRITE_OK_1M: u8 = 0x80;

/// Card presence replies
pub const CARD_PRESENT: u8 = 0x00;
pub const CARD_ABSENT: u8 = 0x01;

/// IIDs reported for an empty chip slot, depending on firmware
pub const EMPTY_SLOT_IIDS: [u32; 2] = [0x9000_9000, 0xFF00_FF00];

/// Firmware of the black label programmer
pub const FIRMWARE_BLACK: &str = "20071203";
/// Firmware of the orange label programmer
pub const FIRMWARE_ORANGE: &str = "20140530";

/// Marketing name of a firmware version
pub fn firmware_name(version: &str) -> &'static str {
    match version {
        FIRMWARE_BLACK => "G2 Black",
        FIRMWARE_ORANGE => "G2 Orange",
        _ => "unknown",
    }
}

/// Select command for a physical sector
pub fn select_sector(sector: u16) -> [u8; 5] {
    let [lo, hi] = sector.to_le_bytes();
    [CMD_SELECT_SECTOR, 0x00, 0x00, lo, hi]
}

/// Manufacturer and chip id packed into an IID
pub fn split_iid(iid: u32) -> (u8, u8) {
    ((iid >> 24) as u8, ((iid >> 8) & 0xFF) as u8)
}
