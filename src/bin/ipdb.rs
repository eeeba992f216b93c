mod cli_utils;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ipdb::OpenMode;
use std::net::IpAddr;
use std::path::PathBuf;

use commands::{cmd_dump, cmd_inspect, cmd_lookup};

#[derive(Parser)]
#[command(name = "ipdb")]
#[command(
    about = "Query AWDB/MMDB style IP databases",
    long_about = "ipdb - Longest-prefix-match lookups against AWDB format IP databases\n\n\
    Looks up IPv4 and IPv6 addresses in a binary search tree and prints the\n\
    associated record as JSON.\n\n\
    Examples:\n\
      ipdb lookup GeoLite2-City.mmdb 8.8.8.8 2001:4860:4860::8888\n\
      ipdb lookup --mode file --prefix areacode.mmdb 1.2.3.4\n\
      ipdb inspect GeoLite2-City.mmdb --json\n\
      ipdb dump areacode.mmdb --limit 10"
)]
#[command(version)]
struct Cli {
    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up one or more IP addresses
    Lookup {
        /// Path to the database file
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// Addresses to look up
        #[arg(value_name = "IP", required = true)]
        ips: Vec<IpAddr>,

        /// Storage backend: auto, mmap, memory, or file
        #[arg(short, long, default_value = "auto")]
        mode: OpenMode,

        /// Include the matched network in the output
        #[arg(short, long)]
        prefix: bool,
    },

    /// Show database metadata
    Inspect {
        /// Path to the database file
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// Output metadata as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Print every network and its record as NDJSON
    Dump {
        /// Path to the database file
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// Stop after this many networks
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Lookup {
            database,
            ips,
            mode,
            prefix,
        } => {
            let found = cmd_lookup(database, ips, mode, prefix)?;
            // Exit code 1 when no address matched
            if !found {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Inspect { database, json } => cmd_inspect(database, json),
        Commands::Dump { database, limit } => cmd_dump(database, limit),
    }
}
