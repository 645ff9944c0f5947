//! Database image transfer commands

use std::fs;
use std::path::Path;

use navcard_core::engine::WriteOptions;
use navcard_core::metadata::DatabaseMetadata;
use navcard_session::SessionError;

use super::Env;

/// Boot sector every Garmin database image starts with
const DB_MAGIC: &[u8] = b"\xeb<\x90GARMIN10\x00\x02\x08\x01\x00\x01\x00\x02\x00\x80\xf0\x10\x00?\x00\xff\x00?\x00\x00\x00\x00\x00\x00\x00\x00\x00)\x02\x11\x00\x00GARMIN AT  FAT16   \x00\x00";

/// Log where a transfer stopped
fn report_failure(e: &SessionError) {
    if let Some(err) = e.core() {
        match (err.phase(), err.offset()) {
            (Some(phase), Some(offset)) => {
                log::error!("Failed while {} at offset 0x{:08X}", phase, offset)
            }
            (Some(phase), None) => log::error!("Failed while {}", phase),
            _ => {}
        }
    }
}

fn check_magic(image: &[u8]) {
    if !image.starts_with(DB_MAGIC) {
        log::warn!("Image does not start with a Garmin database header");
    }
}

fn load_image(path: &Path) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let image = fs::read(path)?;
    println!("Loaded {} bytes from {:?}", image.len(), path);
    check_magic(&image);
    Ok(image)
}

pub fn read(env: &mut Env, output: &Path, full: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = env.open()?;
    let geometry = session.detect()?;
    println!("Reading {} ({} bytes)...", geometry, geometry.total_capacity);

    let mut data = Vec::new();
    let mut progress = env.progress();
    let content = session.read(&mut data, &mut progress).map_err(|e| {
        report_failure(&e);
        e
    })?;
    drop(progress);
    session.close()?;

    if !full {
        data.truncate(content);
    }
    fs::write(output, &data)?;
    println!("Wrote {} bytes to {:?}", data.len(), output);
    Ok(())
}

pub struct WriteArgs<'a> {
    pub input: &'a Path,
    pub require_blank: bool,
    pub no_verify: bool,
    pub metadata: Option<&'a str>,
    pub yes: bool,
}

pub fn write(env: &mut Env, args: WriteArgs<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let image = load_image(args.input)?;
    let record = args
        .metadata
        .map(DatabaseMetadata::parse)
        .transpose()?;

    let mut session = env.open()?;
    let geometry = session.detect()?;
    println!("Card: {}", geometry);

    if !env.confirm(
        &format!("Overwrite the database on the {} card?", geometry),
        args.yes,
    )? {
        println!("Aborted");
        return Ok(());
    }

    let options = WriteOptions {
        blank_check: args.require_blank,
        verify: !args.no_verify,
    };
    let mut progress = env.progress();
    session.write(&image, &options, &mut progress).map_err(|e| {
        report_failure(&e);
        e
    })?;
    drop(progress);

    if let Some(record) = &record {
        session.write_metadata(record)?;
        println!("Stored metadata {}", record);
    }
    session.close()?;

    if options.verify {
        println!("Write complete and verified");
    } else {
        println!("Write complete");
    }
    Ok(())
}

pub fn erase(env: &mut Env, yes: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = env.open()?;
    let geometry = session.detect()?;

    if !env.confirm(&format!("Erase the whole {} card?", geometry), yes)? {
        println!("Aborted");
        return Ok(());
    }

    let mut progress = env.progress();
    session.erase(&mut progress).map_err(|e| {
        report_failure(&e);
        e
    })?;
    drop(progress);
    session.close()?;

    println!("Erase complete");
    Ok(())
}

pub fn verify(env: &mut Env, input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let image = load_image(input)?;

    let mut session = env.open()?;
    session.detect()?;

    let mut progress = env.progress();
    session.verify(&image, &mut progress).map_err(|e| {
        report_failure(&e);
        e
    })?;
    drop(progress);
    session.close()?;

    println!("Verification passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use navcard_core::engine::Phase;
    use navcard_core::error::Error;

    #[test]
    fn test_magic_length() {
        assert_eq!(DB_MAGIC.len(), 64);
        assert!(DB_MAGIC.ends_with(b"FAT16   \x00\x00"));
    }

    #[test]
    fn test_failure_location() {
        let e = SessionError::from(Error::Cancelled {
            phase: Phase::Writing,
            offset: 0x4000,
        });
        let core = e.core().unwrap();
        assert_eq!(core.phase(), Some(Phase::Writing));
        assert_eq!(core.offset(), Some(0x4000));
    }
}
