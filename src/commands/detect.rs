//! Programmer and card information

use navcard_core::geometry::AddressingMode;

use super::Env;

pub fn run(env: &mut Env) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = env.open()?;
    let firmware = session.firmware_description()?;

    println!("Programmer Information");
    println!("======================");
    println!();
    println!("Programmer:      {}", session.family());
    println!("USB device:      {}", session.identity());
    println!("Firmware:        {}", firmware);
    println!();

    let geometry = session.detect()?;
    println!("Card Information");
    println!("================");
    println!();
    println!("Card:            {}", geometry);
    println!(
        "Size:            {} bytes ({} MiB)",
        geometry.total_capacity,
        geometry.total_capacity / (1024 * 1024)
    );
    println!(
        "Chips:           {} x {} MiB",
        geometry.chip_count,
        geometry.chip_megabytes()
    );
    let iids: Vec<String> = session
        .chip_iids()
        .iter()
        .map(|iid| format!("0x{:08X}", iid))
        .collect();
    println!("Chip IDs:        {}", iids.join(" "));
    match geometry.addressing {
        AddressingMode::Linear => println!("Addressing:      linear"),
        AddressingMode::Banked(layout) => println!(
            "Addressing:      banked, {} sectors per bank",
            layout.bank_sectors
        ),
    }
    println!("WAAS:            {}", if geometry.is_waas { "yes" } else { "no" });

    session.close()?;
    Ok(())
}
