use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "eddblink-sync")]
#[command(version, about = "Keep a TradeDangerous database in sync with the EDDB dumps")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only print the run summary and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Update the database from the latest dumps
    Sync {
        /// Options (comma-separated), see `options`. Defaults to listings.
        #[arg(short = 'O', long = "opt", value_delimiter = ',')]
        options: Vec<String>,

        /// Database path (default: <data-dir>/TradeDangerous.db)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Data directory for the database and kept dumps
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Do not write CSV and .prices copies beside the database
        #[arg(long)]
        no_export: bool,
    },

    /// Show which dump version each feed was last updated from
    Status {
        /// Database path (default: <data-dir>/TradeDangerous.db)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Data directory for the database and kept dumps
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },

    /// List every sync option
    Options,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_options_split_on_commas() {
        let cli = Cli::parse_from(["eddblink-sync", "sync", "-O", "station,force", "-O", "solo"]);
        match cli.command {
            Commands::Sync { options, .. } => assert_eq!(options, vec!["station", "force", "solo"]),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_verbosity_counts() {
        let cli = Cli::parse_from(["eddblink-sync", "-vv", "options"]);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_export_is_on_unless_disabled() {
        let cli = Cli::parse_from(["eddblink-sync", "sync"]);
        assert!(matches!(cli.command, Commands::Sync { no_export: false, .. }));
        let cli = Cli::parse_from(["eddblink-sync", "sync", "--no-export"]);
        assert!(matches!(cli.command, Commands::Sync { no_export: true, .. }));
    }
}
