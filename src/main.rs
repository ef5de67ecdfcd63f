mod cli_logger;

use clap::Parser;
use jfrlens::{Config, ProfileCommand, SessionStore, profile_command};
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;
use std::process::ExitCode;

use cli_logger::CliLogger;

#[derive(Debug, Parser)]
#[command(name = "jfrlens", version, about = "Aggregate JVM profiling recordings into flame graphs and method tables")]
struct Cli {
    /// Print one JSON document per result.
    #[arg(long, global = true)]
    json: bool,
    #[arg(long = "no-color", global = true)]
    no_color: bool,
    #[arg(long, global = true, default_value = "jfrlens.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: ProfileCommand,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_ansi(!cli.no_color)
        .init();

    let logger = CliLogger::new(cli.json, cli.no_color);
    match run(&cli, &logger) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            logger.print_error(&err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, logger: &CliLogger) -> anyhow::Result<()> {
    let config = Config::load_optional(&cli.config);
    if let Some(threads) = config.worker_threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }
    let store = SessionStore::new();
    let value = profile_command(&config, &store, &cli.command)?;
    logger.print_result(command_name(&cli.command), &value)
}

fn command_name(command: &ProfileCommand) -> &'static str {
    match command {
        ProfileCommand::Collapse { .. } => "collapse",
        ProfileCommand::Methods { .. } => "methods",
        ProfileCommand::Ecid { .. } => "ecid",
        ProfileCommand::Trim { .. } => "trim",
        ProfileCommand::Compare { .. } => "compare",
        ProfileCommand::Cpu { .. } => "cpu",
        ProfileCommand::Info { .. } => "info",
    }
}
