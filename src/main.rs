// ============================================================================
// SECTION 13: MAIN ENTRY POINT
// ============================================================================

use anyhow::Result as AnyhowResult;
use clap::Parser;
use tracing::debug;

use cerebro_indom::cli::{self, Cli, Commands};
use cerebro_indom::constants::{INDOM_FULL_NAME, INDOM_VERSION};
use cerebro_indom::init_logging;

fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();

    // Handle subcommands that don't need configuration or logging
    match &cli.command {
        Commands::Version => {
            cli::handle_version();
            return Ok(());
        }
        Commands::GenerateConfig { output } => {
            return cli::handle_generate_config(output.as_deref());
        }
        Commands::Validate { verbose } => {
            return cli::handle_validate(&cli.config, *verbose);
        }
        _ => {}
    }

    let config = cli::resolve_config(&cli)?;
    init_logging(&config.logging)?;
    cli::note_missing_config(&cli);
    debug!(
        target: "cerebro_indom::init",
        dir = %config.cache.dir.display(),
        "{} v{}",
        INDOM_FULL_NAME,
        INDOM_VERSION
    );

    match &cli.command {
        Commands::Dump { indom, hash } => cli::handle_dump(&config, indom, *hash),
        Commands::List => cli::handle_list(&config),
        Commands::Purge {
            indom,
            max_age,
            dry_run,
        } => cli::handle_purge(&config, indom, *max_age, *dry_run),
        Commands::Version | Commands::GenerateConfig { .. } | Commands::Validate { .. } => Ok(()),
    }
}
