//! Transfer engine
//!
//! Every operation on the card is a sequence of phases. Each phase walks a
//! logical range in fixed units (sectors for erase, blocks for everything
//! else), translates each unit through the card geometry and hands it to
//! the programmer. The first failure ends the phase; nothing is retried.
//!
//! ```text
//! Idle -> Detecting -> (BlankChecking) -> Erasing -> Writing -> (Verifying) -> Done
//!                                 any phase -> Failed
//! ```

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use core::ops::ControlFlow;

use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::geometry::{identify, CardGeometry, PhysicalTarget, BLOCK_SIZE, SECTOR_SIZE};
use crate::metadata::{metadata_offset, DatabaseMetadata};
use crate::programmer::{CardProgrammer, Operation};

/// Granularity used when trimming erased fill off a card dump
pub const TRIM_GRANULE: usize = 1024;

/// Value of an erased flash byte
pub const ERASED: u8 = 0xFF;

/// State of a transfer session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing started yet
    Idle,
    /// Reading the card identifier
    Detecting,
    /// Making sure the card is erased
    BlankChecking,
    /// Erasing sectors
    Erasing,
    /// Programming blocks
    Writing,
    /// Reading back and comparing
    Verifying,
    /// Dumping the card
    Reading,
    /// Finished successfully
    Done,
    /// Finished with an error
    Failed,
}

impl Phase {
    fn operation(self) -> Operation {
        match self {
            Self::Erasing => Operation::Erase,
            Self::Writing => Operation::Write,
            _ => Operation::Read,
        }
    }

    fn unit(self) -> u32 {
        match self {
            Self::Erasing => SECTOR_SIZE,
            _ => BLOCK_SIZE,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Detecting => "detecting",
            Self::BlankChecking => "blank checking",
            Self::Erasing => "erasing",
            Self::Writing => "writing",
            Self::Verifying => "verifying",
            Self::Reading => "reading",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Observer of transfer progress
///
/// Called synchronously from the engine after every unit. Returning
/// `ControlFlow::Break` stops the phase at the next unit boundary with
/// [`Error::Cancelled`].
pub trait TransferProgress {
    /// A phase over `total` bytes begins
    fn phase_started(&mut self, _phase: Phase, _total: u32) {}

    /// `done` of `total` bytes are complete
    fn progress(&mut self, done: u32, total: u32) -> ControlFlow<()>;

    /// The current phase completed
    fn phase_finished(&mut self, _phase: Phase) {}
}

/// Progress observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl TransferProgress for NoProgress {
    fn progress(&mut self, _done: u32, _total: u32) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

/// Options for [`write`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Refuse to touch a card that is not fully erased
    pub blank_check: bool,
    /// Read back and compare after writing
    pub verify: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            blank_check: false,
            verify: true,
        }
    }
}

/// Tag an error with the phase and offset it happened at
fn fail(phase: Phase, offset: u32, e: Error) -> Error {
    match e {
        Error::NotBlank { .. }
        | Error::VerifyFailed { .. }
        | Error::Cancelled { .. }
        | Error::EraseFailed { .. }
        | Error::WriteFailed { .. }
        | Error::ReadFailed { .. } => e,
        _ => match phase {
            Phase::Erasing => Error::EraseFailed {
                offset,
                cause: e.into(),
            },
            Phase::Writing => Error::WriteFailed {
                offset,
                cause: e.into(),
            },
            _ => Error::ReadFailed {
                offset,
                cause: e.into(),
            },
        },
    }
}

/// Walk `len` bytes from logical `start` in units of the phase
///
/// `start` must be sector aligned.
fn run_phase<P, R, F>(
    programmer: &mut P,
    geometry: &CardGeometry,
    phase: Phase,
    start: u32,
    len: u32,
    progress: &mut R,
    mut step: F,
) -> Result<()>
where
    P: CardProgrammer + ?Sized,
    R: TransferProgress + ?Sized,
    F: FnMut(&mut P, u32, PhysicalTarget) -> Result<()>,
{
    if start % SECTOR_SIZE != 0 {
        return Err(Error::InvalidAlignment);
    }
    if len == 0 {
        return Ok(());
    }

    let op = phase.operation();
    let unit = phase.unit();
    let first = geometry.translate(start)?;
    debug!(
        "{} 0x{:X} bytes from logical 0x{:08X} (chip {}, sector 0x{:04X})",
        phase, len, start, first.chip, first.sector
    );

    progress.phase_started(phase, len);
    programmer
        .begin(op, geometry, first, len.div_ceil(SECTOR_SIZE))
        .map_err(|e| fail(phase, start, e))?;

    let mut result = Ok(());
    let mut done = 0;
    while done < len {
        let offset = start + done;
        let target = match geometry.translate(offset) {
            Ok(t) => t,
            Err(e) => {
                result = Err(fail(phase, offset, e));
                break;
            }
        };
        trace!(
            "{} 0x{:08X} -> chip {} sector 0x{:04X} +0x{:05X}",
            phase,
            offset,
            target.chip,
            target.sector,
            target.offset
        );
        if let Err(e) = step(&mut *programmer, offset, target) {
            result = Err(fail(phase, offset, e));
            break;
        }
        done += unit;
        if progress.progress(done, len).is_break() {
            info!("{} cancelled at 0x{:08X}", phase, start + done);
            result = Err(Error::Cancelled {
                phase,
                offset: start + done,
            });
            break;
        }
    }

    let closed = programmer.end(op);
    match result {
        Ok(()) => {
            closed.map_err(|e| fail(phase, start + len, e))?;
            progress.phase_finished(phase);
            Ok(())
        }
        Err(e) => {
            if let Err(end_err) = closed {
                warn!("Closing {} after failure also failed: {}", phase, end_err);
            }
            Err(e)
        }
    }
}

/// Identify the inserted card
///
/// # Errors
/// * `CardMissing` - no card inserted
/// * `UnknownCard` / `UnsupportedCard` - the identifier has no geometry
pub fn detect<P: CardProgrammer + ?Sized>(programmer: &mut P) -> Result<CardGeometry> {
    if !programmer.has_card()? {
        return Err(Error::CardMissing);
    }
    let id = programmer.read_card_id()?;
    let geometry = identify(id)?;
    info!("Detected {} card ({})", geometry, id);
    if programmer.linear_addressing() {
        Ok(geometry.linearized())
    } else {
        Ok(geometry)
    }
}

/// Fail with `NotBlank` if any byte of the card is not erased
pub fn blank_check<P, R>(programmer: &mut P, geometry: &CardGeometry, progress: &mut R) -> Result<()>
where
    P: CardProgrammer + ?Sized,
    R: TransferProgress + ?Sized,
{
    let mut buf = vec![0u8; BLOCK_SIZE as usize];
    run_phase(
        programmer,
        geometry,
        Phase::BlankChecking,
        0,
        geometry.total_capacity,
        progress,
        |p, offset, target| {
            p.read_block(target, &mut buf)?;
            if buf.iter().any(|&b| b != ERASED) {
                return Err(Error::NotBlank { offset });
            }
            Ok(())
        },
    )
}

/// Erase the first `sectors` sectors of the card
pub fn erase_sectors<P, R>(
    programmer: &mut P,
    geometry: &CardGeometry,
    sectors: u32,
    progress: &mut R,
) -> Result<()>
where
    P: CardProgrammer + ?Sized,
    R: TransferProgress + ?Sized,
{
    let sectors = sectors.min(geometry.sector_count());
    run_phase(
        programmer,
        geometry,
        Phase::Erasing,
        0,
        sectors * SECTOR_SIZE,
        progress,
        |p, _, target| p.erase_sector(target),
    )
}

/// Erase the whole card
pub fn erase<P, R>(programmer: &mut P, geometry: &CardGeometry, progress: &mut R) -> Result<()>
where
    P: CardProgrammer + ?Sized,
    R: TransferProgress + ?Sized,
{
    erase_sectors(programmer, geometry, geometry.sector_count(), progress)
}

/// Copy of block `offset` of `image`, padded with erased bytes
fn image_block(image: &[u8], offset: u32, buf: &mut [u8]) {
    let start = (offset as usize).min(image.len());
    let end = (start + buf.len()).min(image.len());
    let n = end - start;
    buf[..n].copy_from_slice(&image[start..end]);
    buf[n..].fill(ERASED);
}

fn padded_len(len: usize) -> u32 {
    (len as u32).div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

fn check_size(geometry: &CardGeometry, image: &[u8]) -> Result<()> {
    if image.len() > geometry.total_capacity as usize {
        return Err(Error::ImageTooLarge {
            size: image.len(),
            capacity: geometry.total_capacity,
        });
    }
    Ok(())
}

/// Program `image` from offset 0 onto already erased sectors
///
/// The final block is padded with `0xFF`.
pub fn program<P, R>(
    programmer: &mut P,
    geometry: &CardGeometry,
    image: &[u8],
    progress: &mut R,
) -> Result<()>
where
    P: CardProgrammer + ?Sized,
    R: TransferProgress + ?Sized,
{
    check_size(geometry, image)?;
    let mut buf = vec![0u8; BLOCK_SIZE as usize];
    run_phase(
        programmer,
        geometry,
        Phase::Writing,
        0,
        padded_len(image.len()),
        progress,
        |p, offset, target| {
            image_block(image, offset, &mut buf);
            p.write_block(target, &buf)
        },
    )
}

/// Compare the card against `image`
///
/// The padding of the final block must read back as `0xFF`.
pub fn verify<P, R>(
    programmer: &mut P,
    geometry: &CardGeometry,
    image: &[u8],
    progress: &mut R,
) -> Result<()>
where
    P: CardProgrammer + ?Sized,
    R: TransferProgress + ?Sized,
{
    check_size(geometry, image)?;
    let mut expected = vec![0u8; BLOCK_SIZE as usize];
    let mut actual = vec![0u8; BLOCK_SIZE as usize];
    run_phase(
        programmer,
        geometry,
        Phase::Verifying,
        0,
        padded_len(image.len()),
        progress,
        |p, offset, target| {
            image_block(image, offset, &mut expected);
            p.read_block(target, &mut actual)?;
            if expected != actual {
                return Err(Error::VerifyFailed { offset });
            }
            Ok(())
        },
    )
}

/// Full write sequence
///
/// Size check, optional blank check, erase of the whole card, programming
/// and optional verification. Nothing destructive happens before the size,
/// capability and blank checks pass.
pub fn write<P, R>(
    programmer: &mut P,
    geometry: &CardGeometry,
    image: &[u8],
    options: &WriteOptions,
    progress: &mut R,
) -> Result<()>
where
    P: CardProgrammer + ?Sized,
    R: TransferProgress + ?Sized,
{
    check_size(geometry, image)?;
    programmer.check_write_supported(geometry)?;
    if image.is_empty() {
        warn!("Nothing to write");
        return Ok(());
    }

    if options.blank_check {
        blank_check(programmer, geometry, progress)?;
    }
    erase(programmer, geometry, progress)?;
    program(programmer, geometry, image, progress)?;
    if options.verify {
        verify(programmer, geometry, image, progress)?;
    }
    Ok(())
}

/// Read the whole card into `out`
///
/// Returns the length of the meaningful content, see [`content_len`].
pub fn read<P, R>(
    programmer: &mut P,
    geometry: &CardGeometry,
    out: &mut Vec<u8>,
    progress: &mut R,
) -> Result<usize>
where
    P: CardProgrammer + ?Sized,
    R: TransferProgress + ?Sized,
{
    out.clear();
    out.reserve(geometry.total_capacity as usize);
    let mut buf = vec![0u8; BLOCK_SIZE as usize];
    run_phase(
        programmer,
        geometry,
        Phase::Reading,
        0,
        geometry.total_capacity,
        progress,
        |p, _, target| {
            p.read_block(target, &mut buf)?;
            out.extend_from_slice(&buf);
            Ok(())
        },
    )?;
    Ok(content_len(out))
}

/// Length of `data` without trailing erased fill
///
/// Cards store no length, so trailing `0xFF` is dropped in
/// [`TRIM_GRANULE`] steps; a database ending in `0xFF` bytes inside its last
/// granule keeps them.
pub fn content_len(data: &[u8]) -> usize {
    let mut end = data.len();
    while end > 0 {
        let start = end.saturating_sub(TRIM_GRANULE);
        if data[start..end].iter().any(|&b| b != ERASED) {
            break;
        }
        end = start;
    }
    end
}

fn read_sector<P>(programmer: &mut P, geometry: &CardGeometry, offset: u32) -> Result<Vec<u8>>
where
    P: CardProgrammer + ?Sized,
{
    let mut sector = Vec::with_capacity(SECTOR_SIZE as usize);
    let mut buf = vec![0u8; BLOCK_SIZE as usize];
    run_phase(
        programmer,
        geometry,
        Phase::Reading,
        offset,
        SECTOR_SIZE,
        &mut NoProgress,
        |p, _, target| {
            p.read_block(target, &mut buf)?;
            sector.extend_from_slice(&buf);
            Ok(())
        },
    )?;
    Ok(sector)
}

fn erase_sector_at<P>(programmer: &mut P, geometry: &CardGeometry, offset: u32) -> Result<()>
where
    P: CardProgrammer + ?Sized,
{
    run_phase(
        programmer,
        geometry,
        Phase::Erasing,
        offset,
        SECTOR_SIZE,
        &mut NoProgress,
        |p, _, target| p.erase_sector(target),
    )
}

/// Read the legacy metadata record
///
/// Returns `None` if the metadata sector is erased.
pub fn read_metadata<P>(programmer: &mut P, geometry: &CardGeometry) -> Result<Option<DatabaseMetadata>>
where
    P: CardProgrammer + ?Sized,
{
    let offset = metadata_offset(geometry)?;
    let sector = read_sector(programmer, geometry, offset)?;
    DatabaseMetadata::decode(&sector)
}

/// Erase the legacy metadata sector
pub fn clear_metadata<P>(programmer: &mut P, geometry: &CardGeometry) -> Result<()>
where
    P: CardProgrammer + ?Sized,
{
    let offset = metadata_offset(geometry)?;
    erase_sector_at(programmer, geometry, offset)
}

/// Replace the legacy metadata record
pub fn write_metadata<P>(
    programmer: &mut P,
    geometry: &CardGeometry,
    metadata: &DatabaseMetadata,
) -> Result<()>
where
    P: CardProgrammer + ?Sized,
{
    let offset = metadata_offset(geometry)?;
    programmer.check_write_supported(geometry)?;
    let mut sector = vec![ERASED; SECTOR_SIZE as usize];
    metadata.encode_into(&mut sector)?;

    erase_sector_at(programmer, geometry, offset)?;
    run_phase(
        programmer,
        geometry,
        Phase::Writing,
        offset,
        SECTOR_SIZE,
        &mut NoProgress,
        |p, block_offset, target| {
            let start = (block_offset - offset) as usize;
            p.write_block(target, &sector[start..start + BLOCK_SIZE as usize])
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{CardId, CardKind};
    use crate::identity::ProgrammerFamily;
    use alloc::string::String;
    use alloc::vec::Vec;

    /// Minimal in-memory card addressed by physical sector
    struct MemCard {
        id: CardId,
        present: bool,
        data: alloc::collections::BTreeMap<u16, Vec<u8>>,
        erases: usize,
        writes: usize,
        fail_write_at: Option<usize>,
        log: Vec<&'static str>,
    }

    impl MemCard {
        fn new(manufacturer: u8, chip: u8, chips: u8) -> Self {
            Self {
                id: CardId {
                    manufacturer,
                    chip,
                    chips,
                },
                present: true,
                data: Default::default(),
                erases: 0,
                writes: 0,
                fail_write_at: None,
                log: Vec::new(),
            }
        }

        fn sector(&mut self, sector: u16) -> &mut Vec<u8> {
            self.data
                .entry(sector)
                .or_insert_with(|| vec![ERASED; SECTOR_SIZE as usize])
        }
    }

    impl CardProgrammer for MemCard {
        fn family(&self) -> ProgrammerFamily {
            ProgrammerFamily::Skybound
        }

        fn firmware_description(&mut self) -> Result<String> {
            Ok(String::from("test"))
        }

        fn has_card(&mut self) -> Result<bool> {
            Ok(self.present)
        }

        fn read_card_id(&mut self) -> Result<CardId> {
            Ok(self.id)
        }

        fn chip_iids(&self) -> &[u32] {
            &[]
        }

        fn begin(&mut self, _op: Operation, _g: &CardGeometry, _s: PhysicalTarget, _n: u32) -> Result<()> {
            self.log.push("begin");
            Ok(())
        }

        fn erase_sector(&mut self, target: PhysicalTarget) -> Result<()> {
            self.erases += 1;
            self.sector(target.sector).fill(ERASED);
            Ok(())
        }

        fn read_block(&mut self, target: PhysicalTarget, buf: &mut [u8]) -> Result<()> {
            let start = target.offset as usize;
            let len = buf.len();
            buf.copy_from_slice(&self.sector(target.sector)[start..start + len]);
            Ok(())
        }

        fn write_block(&mut self, target: PhysicalTarget, data: &[u8]) -> Result<()> {
            if self.fail_write_at == Some(self.writes) {
                return Err(Error::Device(crate::error::TransportStatus::Stall));
            }
            self.writes += 1;
            let start = target.offset as usize;
            let sector = self.sector(target.sector);
            for (d, s) in sector[start..start + data.len()].iter_mut().zip(data) {
                *d &= *s;
            }
            Ok(())
        }

        fn end(&mut self, _op: Operation) -> Result<()> {
            self.log.push("end");
            Ok(())
        }
    }

    fn waas() -> (MemCard, CardGeometry) {
        let mut card = MemCard::new(0x01, 0x41, 4);
        let g = detect(&mut card).unwrap();
        (card, g)
    }

    struct StopAfter(u32);

    impl TransferProgress for StopAfter {
        fn progress(&mut self, done: u32, _total: u32) -> ControlFlow<()> {
            if done >= self.0 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }
    }

    #[test]
    fn test_detect() {
        let (_, g) = waas();
        assert_eq!(g.kind, CardKind::Silver);

        let mut card = MemCard::new(0x01, 0x41, 4);
        card.present = false;
        assert_eq!(detect(&mut card), Err(Error::CardMissing));
    }

    #[test]
    fn test_write_read_100_bytes() {
        let (mut card, g) = waas();
        let image: Vec<u8> = (0..100u8).collect();
        write(&mut card, &g, &image, &WriteOptions::default(), &mut NoProgress).unwrap();

        let mut out = Vec::new();
        let len = read(&mut card, &g, &mut out, &mut NoProgress).unwrap();
        assert_eq!(&out[..100], &image[..]);
        assert_eq!(len, TRIM_GRANULE);
        assert_eq!(card.erases, g.sector_count() as usize);
        assert_eq!(card.writes, 1);
    }

    #[test]
    fn test_image_too_large() {
        let (mut card, g) = waas();
        let image = vec![0u8; g.total_capacity as usize + 1];
        let err = write(&mut card, &g, &image, &WriteOptions::default(), &mut NoProgress);
        assert!(matches!(err, Err(Error::ImageTooLarge { .. })));
        assert_eq!(card.erases, 0);
    }

    #[test]
    fn test_blank_check_blocks_erase() {
        let (mut card, g) = waas();
        let target = g.translate(0x20_0000).unwrap();
        card.sector(target.sector)[0x10] = 0x00;

        let options = WriteOptions {
            blank_check: true,
            verify: true,
        };
        let err = write(&mut card, &g, &[1, 2, 3], &options, &mut NoProgress).unwrap_err();
        assert_eq!(err, Error::NotBlank { offset: 0x20_0000 });
        assert_eq!(card.erases, 0);
        assert_eq!(card.writes, 0);
    }

    #[test]
    fn test_write_failure_is_contained() {
        let (mut card, g) = waas();
        card.fail_write_at = Some(5);
        let image = vec![0x55u8; 0x20000];
        let err = write(&mut card, &g, &image, &WriteOptions::default(), &mut NoProgress).unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Writing));
        assert_eq!(err.offset(), Some(5 * BLOCK_SIZE));
        assert_eq!(card.writes, 5);
        assert_eq!(card.log.last(), Some(&"end"));
    }

    #[test]
    fn test_verify_mismatch() {
        let (mut card, g) = waas();
        let image = vec![0x00u8; 0x3000];
        write(&mut card, &g, &image, &WriteOptions::default(), &mut NoProgress).unwrap();

        let mut other = image.clone();
        other[0x2001] = 0x01;
        assert_eq!(
            verify(&mut card, &g, &other, &mut NoProgress),
            Err(Error::VerifyFailed { offset: 0x2000 })
        );
    }

    #[test]
    fn test_cancel() {
        let (mut card, g) = waas();
        let err = erase(&mut card, &g, &mut StopAfter(3 * SECTOR_SIZE)).unwrap_err();
        assert_eq!(
            err,
            Error::Cancelled {
                phase: Phase::Erasing,
                offset: 3 * SECTOR_SIZE
            }
        );
        assert_eq!(card.erases, 3);
    }

    #[test]
    fn test_content_len() {
        let mut data = vec![ERASED; 8 * TRIM_GRANULE];
        assert_eq!(content_len(&data), 0);
        data[TRIM_GRANULE + 7] = 0;
        assert_eq!(content_len(&data), 2 * TRIM_GRANULE);
        data[8 * TRIM_GRANULE - 1] = 0xFE;
        assert_eq!(content_len(&data), data.len());
    }

    #[test]
    fn test_metadata() {
        let (mut card, g) = waas();
        assert_eq!(read_metadata(&mut card, &g), Ok(None));

        let m = DatabaseMetadata::parse("{2303~12345678}").unwrap();
        write_metadata(&mut card, &g, &m).unwrap();
        assert_eq!(read_metadata(&mut card, &g), Ok(Some(m)));
        assert!(card.data.contains_key(&0x3DF));

        clear_metadata(&mut card, &g).unwrap();
        assert_eq!(read_metadata(&mut card, &g), Ok(None));

        let mut small = MemCard::new(0x89, 0xA2, 2);
        let small_g = detect(&mut small).unwrap();
        assert_eq!(
            read_metadata(&mut small, &small_g),
            Err(Error::MetadataUnsupported)
        );
    }
}
