//! USB identities of the supported programmers
//!
//! Whether a programmer still needs firmware, is half-way through staging,
//! or is ready for use is decided purely by its product id. The table here
//! maps every known id to the programmer family it belongs to and to the
//! firmware stages that must run before it becomes operational.

use alloc::string::String;
use core::fmt;

use crate::firmware::{Stage, StageCondition};

/// Vendor/product id pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsbId {
    /// USB vendor id
    pub vendor_id: u16,
    /// USB product id
    pub product_id: u16,
}

impl UsbId {
    /// Create a new id pair
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl fmt::Display for UsbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}:{:04X}", self.vendor_id, self.product_id)
    }
}

/// A peripheral seen on the bus
///
/// `bus_path` names the physical port; it survives re-enumeration while the
/// device address does not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralIdentity {
    /// USB vendor id
    pub vendor_id: u16,
    /// USB product id
    pub product_id: u16,
    /// Bus location, e.g. `1-4`
    pub bus_path: String,
}

impl PeripheralIdentity {
    /// Vendor/product pair of this peripheral
    pub fn usb_id(&self) -> UsbId {
        UsbId::new(self.vendor_id, self.product_id)
    }

    /// Look the peripheral up in the table of known programmers
    pub fn known(&self) -> Option<&'static KnownPeripheral> {
        lookup(self.usb_id())
    }
}

impl fmt::Display for PeripheralIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.usb_id(), self.bus_path)
    }
}

/// Programmer families with distinct command sets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgrammerFamily {
    /// Skybound G2 (black or orange label)
    Skybound,
    /// Garmin aviation card programmer (Cypress FX2 based)
    Garmin,
}

impl fmt::Display for ProgrammerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skybound => write!(f, "Skybound G2"),
            Self::Garmin => write!(f, "Garmin card programmer"),
        }
    }
}

/// Entry in the table of known programmer ids
#[derive(Debug)]
pub struct KnownPeripheral {
    /// USB id
    pub id: UsbId,
    /// Family the programmer belongs to
    pub family: ProgrammerFamily,
    /// Human readable description
    pub description: &'static str,
    /// Firmware stages to run, in order; empty if already operational
    pub stages: &'static [Stage],
}

impl KnownPeripheral {
    /// True if the programmer needs no firmware staging
    pub fn is_operational(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Skybound G2 programmer
pub const SKYBOUND: UsbId = UsbId::new(0x0E39, 0x1250);
/// Garmin programmer running operational firmware
pub const GARMIN: UsbId = UsbId::new(0x091E, 0x1300);
/// Garmin programmer, current model, before staging
pub const GARMIN_UNINIT: UsbId = UsbId::new(0x091E, 0x0500);
/// Garmin programmer, early model, before staging
pub const GARMIN_UNINIT_EARLY: UsbId = UsbId::new(0x091E, 0x0300);
/// Bare Cypress EZ-USB FX2 (Garmin programmer with a wiped EEPROM)
pub const CYPRESS_FX2: UsbId = UsbId::new(0x04B4, 0x8613);

/// Banner reported by the stage-1 loader while stage 2 is still missing
pub const GARMIN_LOADER_BANNER: &[u8] = b"Aviation Card Programmer Ver 3.02 Aug 10 2015 13:21:51";

const GARMIN_STAGES: &[Stage] = &[
    Stage {
        image: "grmn0500.dat",
        expected: GARMIN,
        condition: StageCondition::Always,
    },
    Stage {
        image: "grmn1300.dat",
        expected: GARMIN,
        condition: StageCondition::LoaderBanner(GARMIN_LOADER_BANNER),
    },
];

const GARMIN_EARLY_STAGES: &[Stage] = &[Stage {
    image: "grmn0300.dat",
    expected: GARMIN,
    condition: StageCondition::Always,
}];

/// Every programmer id this tool knows about
pub static KNOWN_PERIPHERALS: &[KnownPeripheral] = &[
    KnownPeripheral {
        id: SKYBOUND,
        family: ProgrammerFamily::Skybound,
        description: "Skybound G2",
        stages: &[],
    },
    KnownPeripheral {
        id: GARMIN,
        family: ProgrammerFamily::Garmin,
        description: "Garmin card programmer",
        stages: &[],
    },
    KnownPeripheral {
        id: GARMIN_UNINIT,
        family: ProgrammerFamily::Garmin,
        description: "Garmin card programmer 010-10579-20 (uninitialized)",
        stages: GARMIN_STAGES,
    },
    KnownPeripheral {
        id: GARMIN_UNINIT_EARLY,
        family: ProgrammerFamily::Garmin,
        description: "Garmin card programmer 011-01277-00 (uninitialized)",
        stages: GARMIN_EARLY_STAGES,
    },
    KnownPeripheral {
        id: CYPRESS_FX2,
        family: ProgrammerFamily::Garmin,
        description: "Cypress EZ-USB FX2 (uninitialized Garmin programmer)",
        stages: GARMIN_STAGES,
    },
];

/// Find the table entry for a USB id
pub fn lookup(id: UsbId) -> Option<&'static KnownPeripheral> {
    KNOWN_PERIPHERALS.iter().find(|p| p.id == id)
}
