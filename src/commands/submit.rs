//! Submit Command Handlers
//!
//! Handles `submit-write` and `submit-read`: resolve the bucket's library and
//! queue the order for the workers.

use super::Context;
use tape_library::error::check_relative_path;
use tape_library::queue::{OrderQueue, ReadOrder, ReadWriteOrder, WriteOrder};
use tape_library::{Result, TapeLibraryError};
use tracing::info;

fn enqueue(ctx: &Context, order: ReadWriteOrder) -> Result<()> {
    if !ctx.queue.add(&order)? {
        return Err(TapeLibraryError::queue(format!("Order {} was not queued", order.id())));
    }
    println!("{}", order.id());
    Ok(())
}

pub async fn write(
    ctx: &Context,
    bucket: String,
    source: String,
    object: String,
    tape: Option<String>,
) -> Result<()> {
    let library = ctx.config.library_for_bucket(&bucket)?;
    check_relative_path("source path", &source)?;
    check_relative_path("object name", &object)?;

    let source_path = ctx.config.input_directory.join(&source);
    if !source_path.is_file() {
        return Err(TapeLibraryError::parameter_validation(format!(
            "{:?} is not a file of the input directory",
            source_path
        )));
    }

    let mut order = WriteOrder::new(library, &bucket, &source, &object);
    if let Some(code) = tape {
        order = order.on_tape(&code);
    }
    info!("Submitting write of {} to library {}", object, library);
    enqueue(ctx, order.into())
}

pub async fn read(ctx: &Context, bucket: String, objects: Vec<String>) -> Result<()> {
    let library = ctx.config.library_for_bucket(&bucket)?;
    for object in &objects {
        check_relative_path("object name", object)?;
    }
    info!("Submitting read of {} object(s) from library {}", objects.len(), library);
    enqueue(ctx, ReadOrder::new(library, &bucket, objects).into())
}
