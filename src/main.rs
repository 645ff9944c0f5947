//! navcard - aviation navigation database card programmer
//!
//! Reads, writes, erases and verifies the data cards used by panel mounted
//! avionics, through either a Skybound G2 or a Garmin USB card programmer.
//!
//! # Architecture
//!
//! Commands go through a single [`navcard_session::DeviceSession`]: opening
//! one stages the programmer firmware if needed, the session detects the
//! inserted card and drives the transfer engine against it. The programmer
//! is released when the session is dropped, whichever way the command ends.

mod cli;
mod commands;
mod config;
mod firmware;

use clap::Parser;
use cli::{Cli, Commands};
use commands::database::WriteArgs;
use commands::{Env, Interrupt};
use config::Config;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let interrupt = Interrupt::install()?;
    let mut env = Env::new(config, cli.firmware_dir.as_deref(), interrupt);

    match cli.command {
        Commands::Detect => commands::detect::run(&mut env),
        Commands::ReadDatabase { output, full } => {
            commands::database::read(&mut env, &output, full)
        }
        Commands::WriteDatabase {
            input,
            require_blank,
            no_verify,
            metadata,
            yes,
        } => commands::database::write(
            &mut env,
            WriteArgs {
                input: &input,
                require_blank,
                no_verify,
                metadata: metadata.as_deref(),
                yes,
            },
        ),
        Commands::Erase { yes } => commands::database::erase(&mut env, yes),
        Commands::Verify { input } => commands::database::verify(&mut env, &input),
        Commands::ReadMetadata => commands::metadata::read(&mut env),
        Commands::WriteMetadata { record, yes } => {
            commands::metadata::write(&mut env, &record, yes)
        }
    }
}
