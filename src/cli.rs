use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "appdepot",
    version,
    about = "Software-center plugin loader: query and act on app backends"
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Show per-state statistics after output
    #[arg(long)]
    pub stats: bool,

    /// Settings file (INI), defaults to the per-user config directory
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List installed applications from all backends
    Installed,

    /// List pending updates
    Updates,

    /// List configured software sources
    Sources,

    /// List curated popular applications
    Popular,

    /// Search all backends for applications
    Search {
        /// Search terms
        #[arg(required = true)]
        terms: Vec<String>,
    },

    /// Resolve a URL (e.g. dummy://chiron) to an application
    Url {
        /// URL to resolve
        url: String,
    },

    /// Show detailed info about an application by id
    Info {
        /// Application id, e.g. dummy::chiron
        id: String,
    },

    /// Install an application by id
    Install {
        /// Application id, e.g. dummy::chiron
        id: String,
    },

    /// Remove an installed application by id
    Remove {
        /// Application id, e.g. dummy::zeus
        id: String,
    },

    /// Refresh backend metadata
    Refresh {
        /// Acceptable cache age in seconds (default from settings)
        #[arg(long)]
        cache_age: Option<u64>,
    },

    /// Show plugin status: priority, enabled, setup result
    Doctor,

    /// Generate shell completion script
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

impl ValueEnum for OutputFormat {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            OutputFormat::Table,
            OutputFormat::Json,
            OutputFormat::Tsv,
            OutputFormat::Names,
        ]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            OutputFormat::Table => Some(clap::builder::PossibleValue::new("table")),
            OutputFormat::Json => Some(clap::builder::PossibleValue::new("json")),
            OutputFormat::Tsv => Some(clap::builder::PossibleValue::new("tsv")),
            OutputFormat::Names => Some(clap::builder::PossibleValue::new("names")),
        }
    }
}
