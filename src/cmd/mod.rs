mod clone;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use clone::CloneArgs;
use mysql_clone::error::{CloneError, EXIT_GENERAL_FAILURE};
use std::io;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mysql-clone")]
#[command(author = "Helge Sverre <helge.sverre@gmail.com>")]
#[command(version)]
#[command(about = "Clone a MySQL database from one server to another", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Dump the source database and restore it into the target database
    Clone(CloneArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Clone(args) => clone::run(args),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "mysql-clone", &mut io::stdout());
            Ok(())
        }
    }
}

/// Exit code for a failed run: a tool's own code, or one of the reserved ones.
pub fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CloneError>())
        .map(CloneError::exit_code)
        .unwrap_or(EXIT_GENERAL_FAILURE)
}

/// Log to stderr; `RUST_LOG` wins over the verbosity flags.
fn init_logging(verbose: bool, debug: bool) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}
