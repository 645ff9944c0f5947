//! CLI command implementations
//!
//! Every command opens one [`DeviceSession`] through [`Env::open`] and drops
//! it before returning, which releases the programmer on every path.

pub mod database;
pub mod detect;
pub mod metadata;
mod progress;

use std::io::{self, BufRead, Write};
use std::path::Path;

use navcard_session::{find_programmer, open_session, DeviceSession, SessionContext, SessionError};
use navcard_usb::{NusbBus, StdClock};

use crate::config::Config;
use crate::firmware::FirmwareDir;

pub use progress::{IndicatifProgress, Interrupt};

/// Process wide resources shared by the commands
pub struct Env {
    bus: NusbBus,
    firmware: FirmwareDir,
    clock: StdClock,
    config: Config,
    interrupt: Interrupt,
}

impl Env {
    pub fn new(config: Config, firmware_dir: Option<&Path>, interrupt: Interrupt) -> Self {
        let firmware = FirmwareDir::new(firmware_dir.or(config.firmware_dir.as_deref()));
        Self {
            bus: NusbBus::with_timeout(config.usb_timeout()),
            firmware,
            clock: StdClock,
            config,
            interrupt,
        }
    }

    /// Find the programmer and open a session on it
    pub fn open(&mut self) -> Result<DeviceSession, SessionError> {
        let identity = find_programmer(&mut self.bus)?;
        open_session(
            SessionContext {
                bus: &mut self.bus,
                firmware: &mut self.firmware,
                clock: &mut self.clock,
                policy: self.config.rescan_policy(),
            },
            identity,
        )
    }

    /// Progress bars that honour Ctrl-C
    pub fn progress(&self) -> IndicatifProgress {
        IndicatifProgress::new(self.interrupt.clone())
    }

    /// Ask before a destructive operation
    ///
    /// Returns true right away with `--yes` or `confirm = false`.
    pub fn confirm(&self, prompt: &str, yes: bool) -> io::Result<bool> {
        if yes || !self.config.confirm {
            return Ok(true);
        }
        print!("{} [y/N] ", prompt);
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
    }
}
