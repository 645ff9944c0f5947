//! Progress bars and interrupt handling

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use navcard_core::engine::{Phase, TransferProgress};

/// Create a progress bar with custom phase message
fn create_progress_bar_with_phase(
    total: u64,
    phase: &str,
) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{bytes_per_sec}}, {{eta}}) {} {{msg}}",
                phase
            ))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Set once the user pressed Ctrl-C
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    /// Install the Ctrl-C handler
    ///
    /// The first Ctrl-C stops the transfer at the next block boundary.
    pub fn install() -> Result<Self, ctrlc::Error> {
        let interrupt = Self::default();
        let flag = interrupt.0.clone();
        ctrlc::set_handler(move || {
            if flag.swap(true, Ordering::SeqCst) {
                eprintln!("Interrupted again, aborting");
                std::process::exit(130);
            }
            eprintln!("Interrupted, stopping at the next block");
        })?;
        Ok(interrupt)
    }

    /// True once interrupted
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress reporter using indicatif progress bars, one per phase
pub struct IndicatifProgress {
    multi: MultiProgress,
    current_bar: Option<ProgressBar>,
    interrupt: Interrupt,
}

impl IndicatifProgress {
    pub fn new(interrupt: Interrupt) -> Self {
        Self {
            multi: MultiProgress::new(),
            current_bar: None,
            interrupt,
        }
    }

    fn phase_label(phase: Phase) -> &'static str {
        match phase {
            Phase::BlankChecking => "Blank check",
            Phase::Erasing => "Erasing",
            Phase::Writing => "Writing",
            Phase::Verifying => "Verifying",
            Phase::Reading => "Reading",
            _ => "",
        }
    }
}

impl TransferProgress for IndicatifProgress {
    fn phase_started(&mut self, phase: Phase, total: u32) {
        let label = Self::phase_label(phase);
        let pb = self.multi.add(
            create_progress_bar_with_phase(u64::from(total), label)
                .unwrap_or_else(|_| ProgressBar::new(u64::from(total))),
        );
        self.current_bar = Some(pb);
    }

    fn progress(&mut self, done: u32, _total: u32) -> ControlFlow<()> {
        if let Some(pb) = &self.current_bar {
            pb.set_position(u64::from(done));
        }
        if self.interrupt.is_set() {
            if let Some(pb) = self.current_bar.take() {
                pb.abandon_with_message("interrupted");
            }
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    fn phase_finished(&mut self, phase: Phase) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish_with_message(format!("{} complete", Self::phase_label(phase)));
        }
    }
}

impl Drop for IndicatifProgress {
    fn drop(&mut self) {
        if let Some(pb) = self.current_bar.take() {
            pb.abandon();
        }
    }
}
