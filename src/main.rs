mod cli;
mod commands;

use crate::cli::{Cli, Commands};
use crate::commands::Context;
use tape_library::{logger, Result};
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse_args();

    // Initialize logging system
    logger::init(args.verbose, args.log_json)?;

    debug!("tapelib starting");

    match run(args).await {
        Ok(_) => {
            info!("Operation completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Operation failed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    let ctx = Context::load(args.config)?;

    match args.command {
        Commands::Status { library } => commands::status::execute(&ctx, library).await,

        Commands::Inventory { library } => commands::inventory::execute(&ctx, library).await,

        Commands::SubmitWrite {
            bucket,
            source,
            object,
            tape,
        } => commands::submit::write(&ctx, bucket, source, object, tape).await,

        Commands::SubmitRead { bucket, objects } => {
            commands::submit::read(&ctx, bucket, objects).await
        }

        Commands::Catalog { library } => commands::catalog::execute(&ctx, library).await,

        Commands::Run { shutdown_timeout } => commands::run::execute(&ctx, shutdown_timeout).await,
    }
}
