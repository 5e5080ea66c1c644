//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface for comm-check.

use clap::{Parser, Subcommand};

/// comm-check - Two-node collective communication smoke tester
///
/// Verifies that two machines can talk to each other over the configured
/// network interface by exercising point-to-point and collective
/// communication primitives between rank 0 (master) and rank 1.
#[derive(Parser, Debug)]
#[command(name = "comm-check")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check the local environment (IP address, interface, GPU) without touching the network peer
    Check {
        /// Path to configuration file
        #[arg(short, long, env = "COMMCHECK_CONFIG")]
        config: Option<String>,

        /// Emit the report as JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },

    /// Run the full test suite, deriving this node's rank from its IP address
    ///
    /// Re-initializes the process group between tests, the way a fresh
    /// run of each test would.
    Run {
        /// Path to configuration file
        #[arg(short, long, env = "COMMCHECK_CONFIG")]
        config: Option<String>,

        /// Override the rank derived from the local IP address
        #[arg(long, value_parser = clap::value_parser!(u32).range(0..=1))]
        rank: Option<u32>,
    },

    /// Run a single pass of the test patterns with an explicit rank
    Test {
        /// This node's rank: 0 on the master node, 1 on the peer
        #[arg(value_parser = clap::value_parser!(u32).range(0..=1))]
        rank: u32,

        /// Path to configuration file
        #[arg(short, long, env = "COMMCHECK_CONFIG")]
        config: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Display version and build information
    Version,
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        // Verifies that the CLI definition is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_check_command() {
        let cli = Cli::parse_from(["comm-check", "check"]);
        match cli.command {
            Commands::Check { config, json } => {
                assert!(config.is_none());
                assert!(!json);
            }
            _ => panic!("Expected Check command"),
        }
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::parse_from(["comm-check", "run"]);
        match cli.command {
            Commands::Run { config, rank } => {
                assert!(config.is_none());
                assert!(rank.is_none());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_with_rank_override() {
        let cli = Cli::parse_from(["comm-check", "run", "--rank", "1"]);
        match cli.command {
            Commands::Run { rank, .. } => assert_eq!(rank, Some(1)),
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_test_command_rank() {
        let cli = Cli::parse_from(["comm-check", "test", "0"]);
        match cli.command {
            Commands::Test { rank, config } => {
                assert_eq!(rank, 0);
                assert!(config.is_none());
            }
            _ => panic!("Expected Test command"),
        }
    }

    #[test]
    fn test_test_command_rejects_bad_rank() {
        assert!(Cli::try_parse_from(["comm-check", "test", "2"]).is_err());
        assert!(Cli::try_parse_from(["comm-check", "test", "-1"]).is_err());
        assert!(Cli::try_parse_from(["comm-check", "test", "zero"]).is_err());
    }

    #[test]
    fn test_test_command_requires_rank() {
        assert!(Cli::try_parse_from(["comm-check", "test"]).is_err());
    }

    #[test]
    fn test_test_with_config() {
        let cli = Cli::parse_from(["comm-check", "test", "1", "--config", "/path/to/config.toml"]);
        match cli.command {
            Commands::Test { rank, config } => {
                assert_eq!(rank, 1);
                assert_eq!(config, Some("/path/to/config.toml".to_string()));
            }
            _ => panic!("Expected Test command"),
        }
    }

    #[test]
    fn test_verbose_flags() {
        let cli = Cli::parse_from(["comm-check", "-vv", "version"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_quiet_flag() {
        let cli = Cli::parse_from(["comm-check", "--quiet", "version"]);
        assert!(cli.quiet);
    }

    #[test]
    fn test_config_show() {
        let cli = Cli::parse_from(["comm-check", "config", "show"]);
        match cli.command {
            Commands::Config { subcommand: ConfigSubcommand::Show { config } } => {
                assert!(config.is_none());
            }
            _ => panic!("Expected Config Show command"),
        }
    }

    #[test]
    fn test_config_init() {
        let cli = Cli::parse_from(["comm-check", "config", "init", "--force"]);
        match cli.command {
            Commands::Config { subcommand: ConfigSubcommand::Init { path, force } } => {
                assert!(path.is_none());
                assert!(force);
            }
            _ => panic!("Expected Config Init command"),
        }
    }
}
