//! CLI command definitions (spec §6). Grounded on the teacher's
//! `clap::Parser`/`Subcommand` shape.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "trendd",
    about = "Trend intelligence ingestion and processing daemon",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run every registered plugin once and exit (spec §4.5 `run_now` semantics).
    Run {
        /// Only run this plugin (default: all registered plugins)
        plugin: Option<String>,

        /// Skip health/rate-limit PreCheck steps
        #[arg(long)]
        override_checks: bool,
    },

    /// Start the scheduler loops and HTTP control surface (spec §4.5, §6).
    Serve,

    /// List registered plugins and their health/rate-limit state.
    Plugins,

    /// Show recent PipelineRuns.
    Status {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_plugin() {
        let cli = Cli::parse_from(["trendd", "run", "demo-tech"]);
        match cli.command {
            Command::Run { plugin, override_checks } => {
                assert_eq!(plugin.as_deref(), Some("demo-tech"));
                assert!(!override_checks);
            }
            _ => panic!("expected Run"),
        }
    }

    #[test]
    fn parses_serve() {
        let cli = Cli::parse_from(["trendd", "serve"]);
        assert!(matches!(cli.command, Command::Serve));
    }

    #[test]
    fn parses_config_flag() {
        let cli = Cli::parse_from(["trendd", "-c", "/tmp/trend.yaml", "plugins"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/trend.yaml")));
    }
}
