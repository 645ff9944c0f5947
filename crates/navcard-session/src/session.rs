//! DeviceSession - one open programmer plus the detected card
//!
//! The session is the only owner of the programmer handle. Every command
//! runs against it and the handle is released when it drops, whatever way
//! the command ended.

use std::ops::ControlFlow;

use log::{info, warn};
use navcard_core::engine::{self, Phase, TransferProgress, WriteOptions};
use navcard_core::geometry::CardGeometry;
use navcard_core::identity::{PeripheralIdentity, ProgrammerFamily};
use navcard_core::metadata::DatabaseMetadata;
use navcard_core::programmer::CardProgrammer;

use crate::error::Result;

/// Forwards progress and records the running phase
struct PhaseTracker<'a> {
    phase: &'a mut Phase,
    inner: &'a mut dyn TransferProgress,
}

impl TransferProgress for PhaseTracker<'_> {
    fn phase_started(&mut self, phase: Phase, total: u32) {
        *self.phase = phase;
        self.inner.phase_started(phase, total);
    }

    fn progress(&mut self, done: u32, total: u32) -> ControlFlow<()> {
        self.inner.progress(done, total)
    }

    fn phase_finished(&mut self, phase: Phase) {
        self.inner.phase_finished(phase);
    }
}

/// An open programmer session
pub struct DeviceSession {
    programmer: Box<dyn CardProgrammer>,
    identity: PeripheralIdentity,
    geometry: Option<CardGeometry>,
    phase: Phase,
    closed: bool,
}

impl DeviceSession {
    pub(crate) fn new(programmer: Box<dyn CardProgrammer>, identity: PeripheralIdentity) -> Self {
        Self {
            programmer,
            identity,
            geometry: None,
            phase: Phase::Idle,
            closed: false,
        }
    }

    /// Identity of the operational programmer
    pub fn identity(&self) -> &PeripheralIdentity {
        &self.identity
    }

    /// Programmer family
    pub fn family(&self) -> ProgrammerFamily {
        self.programmer.family()
    }

    /// Firmware version reported by the programmer
    pub fn firmware_description(&mut self) -> Result<String> {
        Ok(self.programmer.firmware_description()?)
    }

    /// Raw chip identifiers read during detection
    pub fn chip_iids(&self) -> &[u32] {
        self.programmer.chip_iids()
    }

    /// Phase the last operation reached
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Geometry from the last successful detection
    pub fn geometry(&self) -> Option<&CardGeometry> {
        self.geometry.as_ref()
    }

    /// Identify the inserted card
    ///
    /// Always talks to the card; the result replaces any earlier geometry.
    pub fn detect(&mut self) -> Result<CardGeometry> {
        self.phase = Phase::Detecting;
        self.geometry = None;
        match engine::detect(self.programmer.as_mut()) {
            Ok(geometry) => {
                info!("Detected {} card", geometry);
                self.geometry = Some(geometry);
                self.phase = Phase::Idle;
                Ok(geometry)
            }
            Err(e) => {
                self.phase = Phase::Failed;
                Err(e.into())
            }
        }
    }

    /// Run one engine operation against the detected card
    fn run<T>(
        &mut self,
        first: Phase,
        progress: &mut dyn TransferProgress,
        op: impl FnOnce(&mut dyn CardProgrammer, &CardGeometry, &mut dyn TransferProgress) -> navcard_core::Result<T>,
    ) -> Result<T> {
        let geometry = match self.geometry {
            Some(geometry) => geometry,
            None => self.detect()?,
        };

        self.phase = first;
        let mut tracker = PhaseTracker {
            phase: &mut self.phase,
            inner: progress,
        };
        let result = op(self.programmer.as_mut(), &geometry, &mut tracker);
        match result {
            Ok(value) => {
                self.phase = Phase::Done;
                Ok(value)
            }
            Err(e) => {
                self.phase = Phase::Failed;
                Err(e.into())
            }
        }
    }

    /// Read the whole card into `sink`
    ///
    /// Returns the length of the content without trailing erased fill;
    /// `sink` holds the full capacity.
    pub fn read(&mut self, sink: &mut Vec<u8>, progress: &mut dyn TransferProgress) -> Result<usize> {
        self.run(Phase::Reading, progress, |p, g, r| engine::read(p, g, sink, r))
    }

    /// Write `image` from offset 0
    pub fn write(
        &mut self,
        image: &[u8],
        options: &WriteOptions,
        progress: &mut dyn TransferProgress,
    ) -> Result<()> {
        let first = if options.blank_check {
            Phase::BlankChecking
        } else {
            Phase::Erasing
        };
        self.run(first, progress, |p, g, r| engine::write(p, g, image, options, r))
    }

    /// Erase the whole card
    pub fn erase(&mut self, progress: &mut dyn TransferProgress) -> Result<()> {
        self.run(Phase::Erasing, progress, |p, g, r| engine::erase(p, g, r))
    }

    /// Compare the card against `image`
    pub fn verify(&mut self, image: &[u8], progress: &mut dyn TransferProgress) -> Result<()> {
        self.run(Phase::Verifying, progress, |p, g, r| engine::verify(p, g, image, r))
    }

    /// Read the legacy metadata record, `None` if there is none
    pub fn read_metadata(&mut self) -> Result<Option<DatabaseMetadata>> {
        self.run(Phase::Reading, &mut engine::NoProgress, |p, g, _| {
            engine::read_metadata(p, g)
        })
    }

    /// Replace the legacy metadata record
    pub fn write_metadata(&mut self, record: &DatabaseMetadata) -> Result<()> {
        self.run(Phase::Erasing, &mut engine::NoProgress, |p, g, _| {
            engine::write_metadata(p, g, record)
        })
    }

    /// Erase the legacy metadata record
    pub fn clear_metadata(&mut self) -> Result<()> {
        self.run(Phase::Erasing, &mut engine::NoProgress, |p, g, _| {
            engine::clear_metadata(p, g)
        })
    }

    /// Put the programmer to idle and release it
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        Ok(self.programmer.close()?)
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.programmer.close() {
                warn!("Failed to close {}: {}", self.identity, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::open::{find_programmer, open_session, SessionContext};
    use navcard_core::error::{Cause, Error, TransportStatus};
    use navcard_core::geometry::{AddressingMode, BLOCK_SIZE};
    use navcard_core::transport::RescanPolicy;
    use navcard_dummy::{
        DummyBus, DummyCard, DummyDevice, DummyFirmware, GarminEmulator, InstantClock,
        SkyboundEmulator,
    };

    /// Records which phases ran
    #[derive(Default)]
    struct Recorder {
        phases: Vec<Phase>,
        stop_after: Option<u32>,
    }

    impl TransferProgress for Recorder {
        fn phase_started(&mut self, phase: Phase, _total: u32) {
            self.phases.push(phase);
        }

        fn progress(&mut self, done: u32, _total: u32) -> ControlFlow<()> {
            match self.stop_after {
                Some(limit) if done >= limit => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            }
        }
    }

    fn session_on(device: DummyDevice) -> (DeviceSession, DummyBus) {
        let mut bus = DummyBus::single(device);
        let mut firmware = DummyFirmware::garmin();
        let mut clock = InstantClock::default();
        let identity = find_programmer(&mut bus).unwrap();
        let session = open_session(
            SessionContext {
                bus: &mut bus,
                firmware: &mut firmware,
                clock: &mut clock,
                policy: RescanPolicy::default(),
            },
            identity,
        )
        .unwrap();
        (session, bus)
    }

    fn skybound(card: DummyCard) -> (DeviceSession, SkyboundEmulator, DummyBus) {
        let emulator = SkyboundEmulator::new(Some(card), "20140530");
        let (session, bus) = session_on(DummyDevice::Skybound(emulator.clone()));
        (session, emulator, bus)
    }

    #[test]
    fn test_waas_round_trip() {
        let (mut session, emulator, _bus) = skybound(DummyCard::new(0x01, 0x41, 4));
        let geometry = session.detect().unwrap();
        assert_eq!(geometry.total_capacity, 16_777_216);
        assert_eq!(geometry.chip_count, 4);
        assert_eq!(geometry.chip_size, 4_194_304);
        assert!(matches!(geometry.addressing, AddressingMode::Banked(_)));
        assert!(geometry.is_waas);

        let image: Vec<u8> = (0..100u8).collect();
        session
            .write(&image, &WriteOptions::default(), &mut engine::NoProgress)
            .unwrap();
        assert_eq!(session.phase(), Phase::Done);
        assert_eq!(&emulator.card_data()[..100], &image[..]);

        let mut out = Vec::new();
        let len = session.read(&mut out, &mut engine::NoProgress).unwrap();
        assert_eq!(&out[..100], &image[..]);
        assert_eq!(len, 1024);
    }

    #[test]
    fn test_phases_in_order() {
        let (mut session, _, _bus) = skybound(DummyCard::new(0x89, 0xA2, 2));
        let mut recorder = Recorder::default();
        let options = WriteOptions {
            blank_check: true,
            verify: true,
        };
        session.write(&[0x00; 10], &options, &mut recorder).unwrap();
        assert_eq!(
            recorder.phases,
            [
                Phase::BlankChecking,
                Phase::Erasing,
                Phase::Writing,
                Phase::Verifying
            ]
        );
    }

    #[test]
    fn test_write_erases_whole_card() {
        let (mut session, emulator, _bus) = skybound(DummyCard::new(0x01, 0x41, 4));
        let geometry = session.detect().unwrap();
        session
            .write(&[0x42; 100], &WriteOptions::default(), &mut engine::NoProgress)
            .unwrap();
        assert_eq!(emulator.counters().erases, geometry.sector_count() as usize);
        assert_eq!(emulator.counters().erases, 256);
    }

    #[test]
    fn test_smaller_rewrite_leaves_no_stale_data() {
        let (mut session, emulator, _bus) = skybound(DummyCard::new(0x01, 0x41, 4));
        let old = vec![0x00; 3 * 0x1_0000];
        session
            .write(&old, &WriteOptions::default(), &mut engine::NoProgress)
            .unwrap();

        let before = emulator.counters().erases;
        let image: Vec<u8> = (0..100u8).collect();
        session
            .write(&image, &WriteOptions::default(), &mut engine::NoProgress)
            .unwrap();
        assert_eq!(emulator.counters().erases - before, 256);

        let mut out = Vec::new();
        let len = session.read(&mut out, &mut engine::NoProgress).unwrap();
        assert_eq!(len, 1024);
        assert_eq!(&out[..100], &image[..]);
        assert!(out[100..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_blank_check_stops_before_erase() {
        let mut contents = vec![0xFF; 0x3_0000];
        contents[0x2_1234] = 0x00;
        let card = DummyCard::with_data(0x01, 0xAD, 2, &contents);
        let (mut session, emulator, _bus) = skybound(card);
        let options = WriteOptions {
            blank_check: true,
            verify: true,
        };
        let err = session
            .write(&[0x55; 100], &options, &mut engine::NoProgress)
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Card(Error::NotBlank { offset: 0x2_1000 })
        ));
        assert_eq!(session.phase(), Phase::Failed);
        assert_eq!(emulator.counters().erases, 0);
        assert_eq!(emulator.counters().block_writes, 0);
    }

    #[test]
    fn test_write_failure_is_contained() {
        let (mut session, emulator, _bus) = skybound(DummyCard::new(0x01, 0x41, 4));
        emulator.fail_write_at(3);
        let image = vec![0x11; 10 * BLOCK_SIZE as usize];
        let err = session
            .write(&image, &WriteOptions::default(), &mut engine::NoProgress)
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Card(Error::WriteFailed {
                offset: 0x3000,
                cause: Cause::Transport(TransportStatus::Stall),
            })
        ));
        assert_eq!(emulator.counters().block_writes, 3);
    }

    #[test]
    fn test_cancel_reports_phase_and_offset() {
        let (mut session, _, _bus) = skybound(DummyCard::new(0x89, 0xA2, 2));
        let mut recorder = Recorder {
            stop_after: Some(2 * BLOCK_SIZE),
            ..Recorder::default()
        };
        let mut out = Vec::new();
        let err = session.read(&mut out, &mut recorder).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Card(Error::Cancelled {
                phase: Phase::Reading,
                offset: 0x2000
            })
        ));
    }

    #[test]
    fn test_drop_turns_led_off_and_releases() {
        let (session, emulator, bus) = skybound(DummyCard::new(0x89, 0xA2, 2));
        assert!(emulator.led());
        assert_eq!(bus.open_handles(), 1);
        drop(session);
        assert!(!emulator.led());
        assert_eq!(bus.open_handles(), 0);
    }

    #[test]
    fn test_garmin_erase_and_metadata() {
        let emulator = GarminEmulator::operational(Some(DummyCard::with_data(
            0x01,
            0x41,
            4,
            &[0x00; 0x100],
        )));
        let (mut session, _bus) = session_on(DummyDevice::Garmin(emulator.clone()));

        session.erase(&mut engine::NoProgress).unwrap();
        assert_eq!(emulator.counters().erases, 256);
        assert_eq!(session.read_metadata().unwrap(), None);

        let record = DatabaseMetadata::parse("{1801~12345678}").unwrap();
        session.write_metadata(&record).unwrap();
        assert_eq!(session.read_metadata().unwrap(), Some(record));

        session.clear_metadata().unwrap();
        assert_eq!(session.read_metadata().unwrap(), None);
    }

    #[test]
    fn test_metadata_needs_16mb_card() {
        let (mut session, _, _bus) = skybound(DummyCard::new(0x01, 0xAD, 4));
        assert!(matches!(
            session.read_metadata(),
            Err(SessionError::Card(Error::MetadataUnsupported))
        ));
    }

    #[test]
    fn test_missing_card() {
        let emulator = SkyboundEmulator::new(None, "20071203");
        let (mut session, _) = session_on(DummyDevice::Skybound(emulator));
        assert!(matches!(
            session.detect(),
            Err(SessionError::Card(Error::CardMissing))
        ));
        assert_eq!(session.phase(), Phase::Failed);
    }
}
