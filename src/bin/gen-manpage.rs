//! Man page generator for navcard
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]

use clap::CommandFactory;
use std::fs;
use std::path::PathBuf;

#[path = "../cli.rs"]
mod cli;

fn main() -> std::io::Result<()> {
    let output_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("man"));

    fs::create_dir_all(&output_dir)?;

    let cmd = cli::Cli::command();
    let mut buffer = Vec::new();
    clap_mangen::Man::new(cmd).render(&mut buffer)?;

    // One page per subcommand so `man navcard-write-database` works too
    let output_path = output_dir.join("navcard.1");
    fs::write(&output_path, buffer)?;
    let mut pages = vec![output_path.clone()];
    for sub in cli::Cli::command().get_subcommands() {
        let mut buffer = Vec::new();
        clap_mangen::Man::new(sub.clone()).render(&mut buffer)?;
        let path = output_dir.join(format!("navcard-{}.1", sub.get_name()));
        fs::write(&path, buffer)?;
        pages.push(path);
    }

    for page in &pages {
        println!("Man page generated at: {}", page.display());
    }
    println!("\nTo view the man page:");
    println!("  man -l {}", output_path.display());
    println!("\nTo install system-wide (requires sudo):");
    println!("  sudo cp {}/*.1 /usr/local/share/man/man1/", output_dir.display());
    println!("  sudo mandb");

    Ok(())
}
