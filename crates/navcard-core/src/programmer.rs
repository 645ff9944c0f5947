//! Card programmer trait
//!
//! A [`CardProgrammer`] is an operational programmer with an open handle.
//! The transfer engine drives it one sector or one block at a time inside
//! a `begin`/`end` bracket. Targets always arrive in ascending logical
//! order within a bracket, and sector by sector starting at block 0.

use alloc::string::String;

use crate::error::Result;
use crate::geometry::{CardGeometry, CardId, PhysicalTarget};
use crate::identity::ProgrammerFamily;

/// Kind of transfer opened by [`CardProgrammer::begin`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Block reads
    Read,
    /// Sector erases
    Erase,
    /// Block writes
    Write,
}

/// An operational card programmer
pub trait CardProgrammer {
    /// Programmer family
    fn family(&self) -> ProgrammerFamily;

    /// Human readable firmware version
    fn firmware_description(&mut self) -> Result<String>;

    /// Check whether a card is inserted
    fn has_card(&mut self) -> Result<bool>;

    /// Read the identifier of the inserted card
    ///
    /// # Errors
    /// * `CardMissing` - no card inserted
    /// * `UnknownCard` / `UnsupportedCard` - the programmer can already tell
    fn read_card_id(&mut self) -> Result<CardId>;

    /// Raw chip identifiers seen by the last [`read_card_id`](Self::read_card_id)
    fn chip_iids(&self) -> &[u32];

    /// True if the firmware maps logical sectors to chips itself
    fn linear_addressing(&self) -> bool {
        false
    }

    /// Reject cards this programmer cannot write
    fn check_write_supported(&mut self, _geometry: &CardGeometry) -> Result<()> {
        Ok(())
    }

    /// Open a transfer of `sectors` sectors starting at `start`
    fn begin(
        &mut self,
        op: Operation,
        geometry: &CardGeometry,
        start: PhysicalTarget,
        sectors: u32,
    ) -> Result<()>;

    /// Erase one sector
    fn erase_sector(&mut self, target: PhysicalTarget) -> Result<()>;

    /// Read one block into `buf`
    fn read_block(&mut self, target: PhysicalTarget, buf: &mut [u8]) -> Result<()>;

    /// Write one full block
    fn write_block(&mut self, target: PhysicalTarget, data: &[u8]) -> Result<()>;

    /// Close the transfer opened by [`begin`](Self::begin)
    fn end(&mut self, op: Operation) -> Result<()>;

    /// Put the programmer back to idle before the handle is released
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<P: CardProgrammer + ?Sized> CardProgrammer for alloc::boxed::Box<P> {
    fn family(&self) -> ProgrammerFamily {
        (**self).family()
    }

    fn firmware_description(&mut self) -> Result<String> {
        (**self).firmware_description()
    }

    fn has_card(&mut self) -> Result<bool> {
        (**self).has_card()
    }

    fn read_card_id(&mut self) -> Result<CardId> {
        (**self).read_card_id()
    }

    fn chip_iids(&self) -> &[u32] {
        (**self).chip_iids()
    }

    fn linear_addressing(&self) -> bool {
        (**self).linear_addressing()
    }

    fn check_write_supported(&mut self, geometry: &CardGeometry) -> Result<()> {
        (**self).check_write_supported(geometry)
    }

    fn begin(
        &mut self,
        op: Operation,
        geometry: &CardGeometry,
        start: PhysicalTarget,
        sectors: u32,
    ) -> Result<()> {
        (**self).begin(op, geometry, start, sectors)
    }

    fn erase_sector(&mut self, target: PhysicalTarget) -> Result<()> {
        (**self).erase_sector(target)
    }

    fn read_block(&mut self, target: PhysicalTarget, buf: &mut [u8]) -> Result<()> {
        (**self).read_block(target, buf)
    }

    fn write_block(&mut self, target: PhysicalTarget, data: &[u8]) -> Result<()> {
        (**self).write_block(target, data)
    }

    fn end(&mut self, op: Operation) -> Result<()> {
        (**self).end(op)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
