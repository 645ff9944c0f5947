//! Programmer discovery and session setup

use log::{debug, info};
use navcard_core::firmware::{ensure_staged, FirmwareSource};
use navcard_core::identity::{PeripheralIdentity, ProgrammerFamily};
use navcard_core::programmer::CardProgrammer;
use navcard_core::transport::{Clock, RescanPolicy, Transport, UsbBus};
use navcard_garmin::Garmin;
use navcard_skybound::Skybound;

use crate::error::{Result, SessionError};
use crate::session::DeviceSession;

/// Environment a session is opened in
///
/// The bus is shared for the lifetime of the process and handed in
/// explicitly, never looked up globally.
pub struct SessionContext<'a, B: UsbBus> {
    /// USB bus the programmer sits on
    pub bus: &'a mut B,
    /// Firmware images for staging
    pub firmware: &'a mut dyn FirmwareSource,
    /// Delay source for the re-enumeration wait
    pub clock: &'a mut dyn Clock,
    /// Bounds of the re-enumeration wait
    pub policy: RescanPolicy,
}

/// All attached peripherals with a known programmer id
pub fn find_programmers<B: UsbBus + ?Sized>(bus: &mut B) -> Result<Vec<PeripheralIdentity>> {
    let found: Vec<_> = bus
        .rescan()?
        .into_iter()
        .filter(|p| p.known().is_some())
        .collect();
    for p in &found {
        if let Some(known) = p.known() {
            debug!("Found {} ({})", p, known.description);
        }
    }
    Ok(found)
}

/// First attached programmer
///
/// Uninitialized programmers count; they are staged when the session opens.
pub fn find_programmer<B: UsbBus + ?Sized>(bus: &mut B) -> Result<PeripheralIdentity> {
    find_programmers(bus)?
        .into_iter()
        .next()
        .ok_or(SessionError::NoProgrammer)
}

fn attach<T: Transport + 'static>(
    family: ProgrammerFamily,
    transport: T,
) -> navcard_core::Result<Box<dyn CardProgrammer>> {
    Ok(match family {
        ProgrammerFamily::Skybound => Box::new(Skybound::new(transport)?),
        ProgrammerFamily::Garmin => Box::new(Garmin::new(transport)?),
    })
}

/// Open a session on `identity`
///
/// Stages firmware first if the programmer is not operational yet. The
/// returned session owns the only handle on the device.
pub fn open_session<B>(
    ctx: SessionContext<'_, B>,
    identity: PeripheralIdentity,
) -> Result<DeviceSession>
where
    B: UsbBus,
    B::Transport: 'static,
{
    let known = identity.known().ok_or(SessionError::NoProgrammer)?;
    info!("Using {} ({})", known.description, identity);

    let operational = ensure_staged(
        &mut *ctx.bus,
        &mut *ctx.firmware,
        &mut *ctx.clock,
        ctx.policy,
        identity.clone(),
    )
    .map_err(|source| SessionError::Staging {
        identity: identity.clone(),
        source,
    })?;

    let programmer = ctx
        .bus
        .open(&operational)
        .and_then(|transport| attach(known.family, transport))
        .map_err(|source| SessionError::Open {
            identity: operational.clone(),
            source,
        })?;
    Ok(DeviceSession::new(programmer, operational))
}

#[cfg(test)]
mod tests {
    use super::*;
    use navcard_core::error::Error;
    use navcard_core::identity::{CYPRESS_FX2, GARMIN, GARMIN_UNINIT, GARMIN_UNINIT_EARLY, SKYBOUND};
    use navcard_dummy::{
        DummyBus, DummyCard, DummyDevice, DummyFirmware, GarminEmulator, InstantClock,
        SkyboundEmulator,
    };

    fn waas_card() -> Option<DummyCard> {
        Some(DummyCard::new(0x01, 0x41, 4))
    }

    fn open(
        bus: &mut DummyBus,
        firmware: &mut DummyFirmware,
        clock: &mut InstantClock,
    ) -> Result<DeviceSession> {
        let identity = find_programmer(bus)?;
        open_session(
            SessionContext {
                bus,
                firmware,
                clock,
                policy: RescanPolicy::default(),
            },
            identity,
        )
    }

    #[test]
    fn test_no_programmer() {
        let mut bus = DummyBus::new(Vec::new());
        assert!(matches!(
            find_programmer(&mut bus),
            Err(SessionError::NoProgrammer)
        ));
    }

    #[test]
    fn test_operational_garmin_is_not_staged() {
        let emulator = GarminEmulator::operational(waas_card());
        let mut bus = DummyBus::single(DummyDevice::Garmin(emulator.clone()));
        let mut firmware = DummyFirmware::garmin();
        let mut clock = InstantClock::default();

        let session = open(&mut bus, &mut firmware, &mut clock).unwrap();
        assert_eq!(session.identity().usb_id(), GARMIN);
        assert_eq!(emulator.counters().resets, 0);
        assert_eq!(emulator.counters().control_writes, 0);
        assert!(firmware.loaded.is_empty());
        assert_eq!(clock.sleeps, 0);
    }

    #[test]
    fn test_two_stage_garmin() {
        let emulator = GarminEmulator::uninitialized(GARMIN_UNINIT, waas_card());
        let mut bus = DummyBus::single(DummyDevice::Garmin(emulator.clone()));
        let mut firmware = DummyFirmware::garmin();
        let mut clock = InstantClock::default();

        let mut session = open(&mut bus, &mut firmware, &mut clock).unwrap();
        assert!(emulator.is_operational());
        assert_eq!(emulator.counters().resets, 2);
        assert_eq!(firmware.loaded, ["grmn0500.dat", "grmn1300.dat"]);
        assert_eq!(session.detect().unwrap().total_capacity, 16 * 1024 * 1024);
    }

    #[test]
    fn test_bare_fx2_uses_current_model_firmware() {
        let emulator = GarminEmulator::uninitialized(CYPRESS_FX2, waas_card());
        let mut bus = DummyBus::single(DummyDevice::Garmin(emulator.clone()));
        let mut firmware = DummyFirmware::garmin();
        let mut clock = InstantClock::default();

        open(&mut bus, &mut firmware, &mut clock).unwrap();
        assert_eq!(emulator.usb_id(), GARMIN);
        assert_eq!(firmware.loaded, ["grmn0500.dat", "grmn1300.dat"]);
    }

    #[test]
    fn test_early_model_single_stage() {
        let emulator = GarminEmulator::uninitialized(GARMIN_UNINIT_EARLY, waas_card());
        let mut bus = DummyBus::single(DummyDevice::Garmin(emulator.clone()));
        let mut firmware = DummyFirmware::garmin();
        let mut clock = InstantClock::default();

        open(&mut bus, &mut firmware, &mut clock).unwrap();
        assert!(emulator.is_operational());
        assert_eq!(firmware.loaded, ["grmn0300.dat"]);
    }

    #[test]
    fn test_reenumeration_timeout_releases_handle() {
        let emulator = GarminEmulator::uninitialized(GARMIN_UNINIT, waas_card());
        emulator.never_reenumerate();
        let mut bus = DummyBus::single(DummyDevice::Garmin(emulator.clone()));
        let mut firmware = DummyFirmware::garmin();
        let mut clock = InstantClock::default();

        let err = open(&mut bus, &mut firmware, &mut clock).err();
        assert!(matches!(
            err,
            Some(SessionError::Staging {
                source: Error::ReenumerationTimeout { expected: GARMIN },
                ..
            })
        ));
        assert_eq!(clock.sleeps, RescanPolicy::default().attempts as usize);
        assert_eq!(bus.open_handles(), 0);
    }

    fn two_garmins(second: &GarminEmulator) -> (DummyBus, GarminEmulator, PeripheralIdentity) {
        let first = GarminEmulator::operational(waas_card());
        let mut bus = DummyBus::new(vec![
            DummyDevice::Garmin(first.clone()),
            DummyDevice::Garmin(second.clone()),
        ]);
        let uninitialized = find_programmers(&mut bus)
            .unwrap()
            .into_iter()
            .find(|p| p.usb_id() == GARMIN_UNINIT)
            .unwrap();
        (bus, first, uninitialized)
    }

    #[test]
    fn test_staging_follows_its_own_port() {
        let second = GarminEmulator::uninitialized(GARMIN_UNINIT, waas_card());
        let (mut bus, first, identity) = two_garmins(&second);
        assert_eq!(identity.bus_path, "1-2");
        let mut firmware = DummyFirmware::garmin();
        let mut clock = InstantClock::default();

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
        assert_eq!(session.identity().usb_id(), GARMIN);
        assert_eq!(session.identity().bus_path, "1-2");
        assert!(second.is_operational());
        assert_eq!(first.counters().control_writes, 0);
    }

    #[test]
    fn test_staging_ignores_other_programmer() {
        let second = GarminEmulator::uninitialized(GARMIN_UNINIT, waas_card());
        second.never_reenumerate();
        let (mut bus, first, identity) = two_garmins(&second);
        let mut firmware = DummyFirmware::garmin();
        let mut clock = InstantClock::default();

        let err = open_session(
            SessionContext {
                bus: &mut bus,
                firmware: &mut firmware,
                clock: &mut clock,
                policy: RescanPolicy::default(),
            },
            identity,
        )
        .err();
        assert!(matches!(
            err,
            Some(SessionError::Staging {
                source: Error::ReenumerationTimeout { expected: GARMIN },
                ..
            })
        ));
        assert_eq!(first.counters().control_writes, 0);
        assert_eq!(bus.open_handles(), 0);
    }

    #[test]
    fn test_programmer_held_elsewhere_is_busy() {
        let emulator = SkyboundEmulator::new(waas_card(), "20071203");
        let mut bus = DummyBus::single(DummyDevice::Skybound(emulator.clone()));
        bus.hold(0);
        let mut firmware = DummyFirmware::empty();
        let mut clock = InstantClock::default();

        let err = open(&mut bus, &mut firmware, &mut clock).err();
        assert!(matches!(
            err,
            Some(SessionError::Open {
                source: Error::DeviceBusy,
                ..
            })
        ));
        assert!(!emulator.led());
    }

    #[test]
    fn test_missing_firmware() {
        let emulator = GarminEmulator::uninitialized(GARMIN_UNINIT, waas_card());
        let mut bus = DummyBus::single(DummyDevice::Garmin(emulator.clone()));
        let mut firmware = DummyFirmware::empty();
        let mut clock = InstantClock::default();

        let err = open(&mut bus, &mut firmware, &mut clock).err();
        assert_eq!(err.as_ref().and_then(|e| e.core()), Some(&Error::FirmwareMissing));
        assert_eq!(emulator.counters().control_writes, 0);
        assert_eq!(bus.open_handles(), 0);
    }

    #[test]
    fn test_second_open_is_busy() {
        let emulator = SkyboundEmulator::new(waas_card(), "20071203");
        let mut bus = DummyBus::single(DummyDevice::Skybound(emulator));
        let mut firmware = DummyFirmware::empty();
        let mut clock = InstantClock::default();

        let _session = open(&mut bus, &mut firmware, &mut clock).unwrap();
        let identity = find_programmer(&mut bus).unwrap();
        assert_eq!(identity.usb_id(), SKYBOUND);
        let err = open_session(
            SessionContext {
                bus: &mut bus,
                firmware: &mut firmware,
                clock: &mut clock,
                policy: RescanPolicy::default(),
            },
            identity,
        )
        .err();
        assert!(matches!(
            err,
            Some(SessionError::Open {
                source: Error::DeviceBusy,
                ..
            })
        ));
    }
}
