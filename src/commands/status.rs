//! Status Command Handler
//!
//! Handles the `status` subcommand: exchanger occupancy plus the catalog view
//! of each drive.

use super::Context;
use tape_library::catalog::TapeLocation;
use tape_library::{Result, TapeLibraryError};
use tracing::info;

pub async fn execute(ctx: &Context, library: String) -> Result<()> {
    info!("Querying library status: {}", library);
    let pool = ctx.registry.pool(&library)?;

    let response = pool.robot().status().await;
    let spec = match response.entity() {
        Some(spec) if response.is_ok() => spec,
        _ => return Err(TapeLibraryError::robot(response.diagnostic())),
    };

    println!(
        "Library {} ({}): {} drives, {} slots, {} import/export",
        library, spec.device, spec.drive_count, spec.slot_count, spec.mailbox_count
    );

    println!("\nDrives:");
    for drive in &spec.drives {
        let catalogued = ctx
            .catalog
            .find_by_location(&library, TapeLocation::Drive(drive.index))?
            .map(|t| format!("{} ({})", t.code, t.status))
            .unwrap_or_else(|| "-".to_string());
        let device = pool
            .drive(drive.index)
            .map(|d| d.conf().device.clone())
            .unwrap_or_else(|| "not configured".to_string());
        println!(
            "  {:>3}  {:<16} {:<10} catalog: {}",
            drive.index,
            device,
            drive.volume_tag.as_deref().unwrap_or("empty"),
            catalogued
        );
    }

    println!("\nSlots:");
    for slot in &spec.slots {
        println!(
            "  {:>3}{} {}",
            slot.index,
            if slot.import_export { " (I/E)" } else { "      " },
            slot.volume_tag.as_deref().unwrap_or(if slot.full { "full" } else { "empty" })
        );
    }

    Ok(())
}
