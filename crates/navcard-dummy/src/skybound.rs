//! Skybound G2 emulator

use std::cell::RefCell;
use std::rc::Rc;

use log::trace;
use navcard_core::error::{Error, Result, TransportStatus};
use navcard_core::geometry::{BLOCK_SIZE, BLOCKS_PER_SECTOR, CHIP_SLOT_BASES};
use navcard_core::transport::Transport;

use crate::{Counters, DummyCard, Faults};

const OUT_EP: u8 = 0x02;
const IN_EP: u8 = 0x81;
const EMPTY_SLOT_IID: u32 = 0x9000_9000;

struct State {
    card: Option<DummyCard>,
    firmware: &'static str,
    led: bool,
    selected: Option<u16>,
    /// Block within the selected sector
    cursor: u32,
    /// Key of a write waiting for its data block
    pending_write: Option<u8>,
    reply: Vec<u8>,
    counters: Counters,
    faults: Faults,
}

fn stall<T>() -> Result<T> {
    Err(Error::Device(TransportStatus::Stall))
}

impl State {
    fn present(&mut self) -> bool {
        if let Some(limit) = self.faults.remove_after_reads {
            if self.counters.block_reads >= limit {
                self.card = None;
            }
        }
        self.card.is_some()
    }

    fn one_mb_chips(&self) -> bool {
        self.card
            .as_ref()
            .and_then(|c| navcard_core::geometry::identify(c.id()).ok())
            .is_some_and(|g| g.sectors_per_chip() == 0x10)
    }

    /// Logical offset of the current block
    fn block_offset(&self) -> Option<usize> {
        let card = self.card.as_ref()?;
        let sector = self.selected?;
        if self.cursor >= BLOCKS_PER_SECTOR {
            return None;
        }
        Some(card.banked_sector_offset(sector)? + (self.cursor * BLOCK_SIZE) as usize)
    }

    fn command(&mut self, data: &[u8]) -> Result<()> {
        if let Some(key) = self.pending_write.take() {
            return self.write_data(key, data);
        }
        match *data {
            [0x12] => self.led = true,
            [0x13] => self.led = false,
            [0x18] => {
                let present = self.present();
                self.reply = vec![if present { 0x00 } else { 0x01 }];
            }
            [0x60] => self.reply = self.firmware.as_bytes().to_vec(),
            [0x30, 0x00, 0x00, lo, hi] => {
                self.selected = Some(u16::from_le_bytes([lo, hi]));
                self.cursor = 0;
            }
            [0x40] | [0x42] | [0x16] => {}
            [0x50, 0x04] => {
                let slot = self
                    .selected
                    .and_then(|s| CHIP_SLOT_BASES.iter().position(|&b| b == s));
                let iid = match (&self.card, slot) {
                    (Some(card), Some(slot)) if slot < usize::from(card.id().chips) => {
                        card.skybound_iid()
                    }
                    _ => EMPTY_SLOT_IID,
                };
                self.reply = iid.to_le_bytes().to_vec();
            }
            [0x28] => {
                let Some(offset) = self.block_offset() else {
                    return stall();
                };
                let mut block = vec![0u8; BLOCK_SIZE as usize];
                if !self.card.as_ref().is_some_and(|c| c.read(offset, &mut block)) {
                    return stall();
                }
                self.cursor += 1;
                self.counters.block_reads += 1;
                self.reply = block;
            }
            [0x2A, key @ (0x03 | 0x04)] => {
                if (key == 0x03) != self.one_mb_chips() {
                    return stall();
                }
                self.pending_write = Some(key);
            }
            [0x52, key @ (0x03 | 0x04)] => {
                if (key == 0x03) != self.one_mb_chips() {
                    return stall();
                }
                let Some(offset) = self.block_offset() else {
                    return stall();
                };
                if let Some(card) = self.card.as_mut() {
                    card.erase(offset);
                }
                self.counters.erases += 1;
                self.reply = vec![key];
            }
            _ => return stall(),
        }
        Ok(())
    }

    fn write_data(&mut self, key: u8, data: &[u8]) -> Result<()> {
        if data.len() != BLOCK_SIZE as usize {
            return stall();
        }
        if self.faults.write_at == Some(self.counters.block_writes) {
            trace!("Injected write failure at block {}", self.counters.block_writes);
            return stall();
        }
        let Some(offset) = self.block_offset() else {
            return stall();
        };
        if !self.card.as_mut().is_some_and(|c| c.program(offset, data)) {
            return stall();
        }
        self.cursor += 1;
        self.counters.block_writes += 1;
        let status = if key == 0x03 { 0x80 } else { data[data.len() - 1] };
        self.reply = vec![status, 0x00, 0x00, 0x00];
        Ok(())
    }
}

/// Emulated Skybound G2 programmer
#[derive(Clone)]
pub struct SkyboundEmulator {
    state: Rc<RefCell<State>>,
}

impl SkyboundEmulator {
    /// Programmer with firmware `firmware` and an optional inserted card
    pub fn new(card: Option<DummyCard>, firmware: &'static str) -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                card,
                firmware,
                led: false,
                selected: None,
                cursor: 0,
                pending_write: None,
                reply: Vec::new(),
                counters: Counters::default(),
                faults: Faults::default(),
            })),
        }
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

    /// State of the activity LED
    pub fn led(&self) -> bool {
        self.state.borrow().led
    }

    /// Fail the `index`th block write with a stall
    pub fn fail_write_at(&self, index: usize) {
        self.state.borrow_mut().faults.write_at = Some(index);
    }

    /// Pull the card after `blocks` more block reads
    pub fn remove_card_after_blocks(&self, blocks: usize) {
        let mut state = self.state.borrow_mut();
        state.faults.remove_after_reads = Some(state.counters.block_reads + blocks);
    }
}

impl Transport for SkyboundEmulator {
    fn control_write(&mut self, _request: u8, _value: u16, _index: u16, _data: &[u8]) -> Result<()> {
        stall()
    }

    fn control_read(&mut self, _request: u8, _value: u16, _index: u16, _buf: &mut [u8]) -> Result<usize> {
        stall()
    }

    fn bulk_read(&mut self, endpoint: u8, buf: &mut [u8]) -> Result<usize> {
        if endpoint != IN_EP {
            return stall();
        }
        let reply = std::mem::take(&mut self.state.borrow_mut().reply);
        if reply.is_empty() {
            return Err(Error::Device(TransportStatus::Timeout));
        }
        let n = reply.len().min(buf.len());
        buf[..n].copy_from_slice(&reply[..n]);
        Ok(n)
    }

    fn bulk_write(&mut self, endpoint: u8, data: &[u8]) -> Result<()> {
        if endpoint != OUT_EP {
            return stall();
        }
        self.state.borrow_mut().command(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_present() {
        let mut emu = SkyboundEmulator::new(None, "20071203");
        emu.bulk_write(OUT_EP, &[0x18]).unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(emu.bulk_read(IN_EP, &mut buf).unwrap(), 1);
        assert_eq!(buf[0], 0x01);
    }

    #[test]
    fn test_slot_scan() {
        let mut emu = SkyboundEmulator::new(Some(DummyCard::new(0x01, 0x41, 2)), "20071203");
        let mut buf = [0u8; 64];
        for (slot, expected) in [(0x00E0u16, 0x0100_4100u32), (0x0160, 0x0100_4100), (0x01A0, EMPTY_SLOT_IID)] {
            let [lo, hi] = slot.to_le_bytes();
            emu.bulk_write(OUT_EP, &[0x30, 0, 0, lo, hi]).unwrap();
            emu.bulk_write(OUT_EP, &[0x50, 0x04]).unwrap();
            let n = emu.bulk_read(IN_EP, &mut buf).unwrap();
            assert_eq!(n, 4);
            assert_eq!(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]), expected);
        }
    }

    #[test]
    fn test_wrong_write_key_stalls() {
        let mut emu = SkyboundEmulator::new(Some(DummyCard::new(0x01, 0x41, 4)), "20071203");
        assert!(emu.bulk_write(OUT_EP, &[0x2A, 0x03]).is_err());
    }
}
