//! Catalog Command Handler

use super::Context;
use tape_library::utils::format_bytes;
use tape_library::Result;

pub async fn execute(ctx: &Context, library: Option<String>) -> Result<()> {
    let tapes = ctx.catalog.list(library.as_deref())?;
    if tapes.is_empty() {
        println!("No cartridge catalogued");
        return Ok(());
    }

    println!(
        "{:<10} {:<8} {:<8} {:<10} {:<12} {:<10} {:>5} {:>12}",
        "CODE", "LIBRARY", "TYPE", "STATUS", "LOCATION", "BUCKET", "FILES", "WRITTEN"
    );
    for tape in tapes {
        println!(
            "{:<10} {:<8} {:<8} {:<10} {:<12} {:<10} {:>5} {:>12}{}",
            tape.code,
            tape.library,
            tape.cartridge_type,
            tape.status.to_string(),
            tape.current_location.to_string(),
            tape.bucket.as_deref().unwrap_or("-"),
            tape.file_count,
            format_bytes(tape.written_bytes),
            if tape.full { "  FULL" } else { "" }
        );
    }

    Ok(())
}
