//! Metadata record commands

use navcard_core::metadata::DatabaseMetadata;

use super::Env;

pub fn read(env: &mut Env) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = env.open()?;
    match session.read_metadata()? {
        Some(record) => println!("{}", record),
        None => println!("No metadata"),
    }
    session.close()?;
    Ok(())
}

pub fn write(env: &mut Env, record: &str, yes: bool) -> Result<(), Box<dyn std::error::Error>> {
    let record = DatabaseMetadata::parse(record)?;

    let mut session = env.open()?;
    let geometry = session.detect()?;
    if !env.confirm(
        &format!("Replace the metadata on the {} card with {}?", geometry, record),
        yes,
    )? {
        println!("Aborted");
        return Ok(());
    }

    session.write_metadata(&record)?;
    session.close()?;
    println!("Stored metadata {}", record);
    Ok(())
}
