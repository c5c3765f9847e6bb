mod cli_utils;
mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use geoscope::{EngineConfig, GeoEngine, Grouping};
use std::path::PathBuf;
use tracing::Level;

use commands::{
    cmd_build, cmd_export, cmd_health, cmd_inspect, cmd_lookup, cmd_network, cmd_watch,
};

#[derive(Parser)]
#[command(name = "geoscope")]
#[command(
    about = "GeoIP resolution over hot-reloadable MaxMind DB editions",
    long_about = "geoscope - Resolve IP addresses to country, city, coordinates and ASN\n\n\
    Reads the GeoLite2 Country, City and ASN editions from a data directory,\n\
    merges their answers per address, and picks up new files without a restart.\n\n\
    Configuration is read from an optional TOML file (--config) and from\n\
    GEOSCOPE_* environment variables (e.g. GEOSCOPE_DATA_DIR).\n\n\
    Examples:\n\
      geoscope lookup 8.8.8.8 1.1.1.1\n\
      geoscope --data-dir ./geoip network 8.8.8.8\n\
      geoscope health\n\
      geoscope inspect GeoLite2-City.mmdb\n\
      geoscope build networks.json -o Test-City.mmdb -t GeoLite2-City\n\
      geoscope export --by continent -o ./ranges\n\
      tail -f access.log | geoscope watch"
)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding the database files (overrides configuration)
    #[arg(short, long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Geolocate IP addresses
    Lookup {
        /// Addresses to resolve, or "-" to read one per line from stdin
        #[arg(value_name = "IP", required = true)]
        addresses: Vec<String>,
    },

    /// Show the most specific network containing an address
    Network {
        /// Address to resolve
        #[arg(value_name = "IP")]
        address: String,
    },

    /// Report which databases are loaded
    Health,

    /// Inspect a database file
    Inspect {
        /// Path to the .mmdb file
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// Output metadata as JSON
        #[arg(short, long)]
        json: bool,

        /// Also print the raw record stored for this address
        #[arg(long, value_name = "IP")]
        ip: Option<String>,
    },

    /// Build a database from a JSON array of {"network": ..., "data": {...}}
    Build {
        /// JSON input file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output database file
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Database type recorded in the metadata (e.g. "GeoLite2-City")
        #[arg(short = 't', long, value_name = "NAME", default_value = "GeoScope-Custom")]
        database_type: String,

        /// Description text
        #[arg(short = 'D', long)]
        description: Option<String>,

        /// Language code for the description
        #[arg(long, default_value = "en")]
        desc_lang: String,
    },

    /// Write IP range lists per country or continent from the Country database
    Export {
        /// Database to read (defaults to the configured Country file)
        #[arg(value_name = "DATABASE")]
        database: Option<PathBuf>,

        /// Split the lists by country or by continent
        #[arg(long, value_enum, default_value_t = ExportBy::Country)]
        by: ExportBy,

        /// Output directory
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,
    },

    /// Keep the databases loaded and resolve addresses read from stdin as NDJSON
    Watch,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportBy {
    Country,
    Continent,
}

impl From<ExportBy> for Grouping {
    fn from(by: ExportBy) -> Self {
        match by {
            ExportBy::Country => Grouping::Country,
            ExportBy::Continent => Grouping::Continent,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }
    init_logging(&config, cli.verbose)?;

    let ok = match cli.command {
        Commands::Lookup { addresses } => cmd_lookup(&one_shot_engine(config)?, addresses)?,
        Commands::Network { address } => cmd_network(&one_shot_engine(config)?, &address)?,
        Commands::Health => cmd_health(&one_shot_engine(config)?)?,
        Commands::Inspect { database, json, ip } => {
            cmd_inspect(database, json, ip)?;
            true
        }
        Commands::Build {
            input,
            output,
            database_type,
            description,
            desc_lang,
        } => {
            cmd_build(input, output, database_type, description, desc_lang)?;
            true
        }
        Commands::Export {
            database,
            by,
            output,
        } => {
            cmd_export(&config, database, by.into(), output)?;
            true
        }
        Commands::Watch => {
            let engine = GeoEngine::new(config).context("Failed to start engine")?;
            cmd_watch(&engine)?;
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Engine without a reload scheduler, for commands that exit right away
fn one_shot_engine(mut config: EngineConfig) -> Result<GeoEngine> {
    config.reload_interval_secs = 0;
    config.watch = false;
    GeoEngine::new(config).context("Failed to start engine")
}

fn init_logging(config: &EngineConfig, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config
            .log_level
            .parse::<Level>()
            .with_context(|| format!("Invalid log level: {}", config.log_level))?
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    Ok(())
}
