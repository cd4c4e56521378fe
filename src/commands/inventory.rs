//! Inventory Command Handler

use super::Context;
use tape_library::{Result, TapeLibraryError};
use tracing::info;

pub async fn execute(ctx: &Context, library: String) -> Result<()> {
    info!("Running inventory of library {}", library);
    let pool = ctx.registry.pool(&library)?;

    let response = pool.robot().status().await;
    let spec = match response.entity() {
        Some(spec) if response.is_ok() => spec,
        _ => return Err(TapeLibraryError::robot(response.diagnostic())),
    };

    let report = ctx.catalog.inventory(&library, spec)?;

    println!("Inventory of {}:", library);
    println!("  Added:     {}", report.added.len());
    for code in &report.added {
        println!("    + {}", code);
    }
    println!("  Relocated: {}", report.relocated.len());
    for code in &report.relocated {
        println!("    ~ {}", code);
    }
    println!("  Missing:   {}", report.missing.len());
    for code in &report.missing {
        println!("    - {}", code);
    }
    println!("  Unchanged: {}", report.unchanged);

    Ok(())
}
