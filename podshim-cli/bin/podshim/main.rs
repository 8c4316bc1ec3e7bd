mod handlers;

use clap::{CommandFactory, Parser};
use podshim_cli::{AnsiStyles, PodshimArgs, PodshimCliResult, PodshimSubcommand};
use tracing_subscriber::EnvFilter;

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> PodshimCliResult<()> {
    let args = PodshimArgs::parse();

    handlers::log_level(&args);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if args.version {
        println!("{}", format!("v{}", env!("CARGO_PKG_VERSION")).literal());
        return Ok(());
    }

    match args.subcommand {
        Some(PodshimSubcommand::Stop { id }) => {
            handlers::stop_subcommand(args.config, id).await?;
        }
        Some(PodshimSubcommand::Status) => {
            handlers::status_subcommand(args.config).await?;
        }
        None => {
            PodshimArgs::command().print_help()?;
        }
    }

    Ok(())
}
