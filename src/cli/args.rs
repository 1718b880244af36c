//! Command line argument parsing
//!
//! Subcommands:
//! - `platforms`: list supported platforms with their defaults
//! - `resolve`: validate a task request and print the resolved configuration
//! - `simulate`: run a task end to end against the in-process collector
//! - `login`: walk through a login handshake against the in-process collector
//! - `cookies`: inspect or clear the cookie cache
//! - `config`: create or inspect service settings

use crate::config::Platform;
use crate::login::LoginType;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "harvester")]
#[command(author = "Media Harvester Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operator tool for the multi-platform content harvesting core")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Settings file, instead of the discovery hierarchy
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List supported platforms and their specific defaults
    Platforms {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a task request (JSON) and print the resolved parameters
    Resolve {
        /// Request file, or `-` for stdin
        file: PathBuf,
    },
    /// Run a task against the in-process collector
    Simulate {
        #[arg(short, long, default_value = "xhs")]
        platform: String,
        #[arg(short = 't', long = "type", value_enum, default_value_t = SimulatedTaskType::Search)]
        task_type: SimulatedTaskType,
        /// Keywords, content ids or creator ids depending on the task type
        #[arg(short, long = "id", value_name = "ID", required = true)]
        ids: Vec<String>,
        #[arg(short = 'n', long)]
        max_count: Option<i64>,
        /// Records the collector offers per keyword or creator
        #[arg(long, default_value_t = 60)]
        items: u32,
        /// Comments attached to every record
        #[arg(long, default_value_t = 0)]
        comments: u32,
        /// Simulated latency of each collector call, in milliseconds
        #[arg(long, default_value_t = 50)]
        latency_ms: u64,
        /// Keep the configured pause between batches
        #[arg(long)]
        with_delay: bool,
    },
    /// Walk through a login handshake against the in-process collector
    Login {
        #[arg(short, long, default_value = "xhs")]
        platform: Platform,
        #[arg(short = 't', long = "login-type", default_value = "qrcode")]
        login_type: LoginType,
        /// Phone number for phone logins
        #[arg(long)]
        phone: Option<String>,
        /// Verification code for phone logins
        #[arg(long)]
        code: Option<String>,
        /// Cookie string for cookie logins
        #[arg(long)]
        cookie: Option<String>,
    },
    /// Inspect or clear the cookie cache
    Cookies {
        #[command(subcommand)]
        action: CookieAction,
    },
    /// Create or inspect service settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum CookieAction {
    /// Show cached cookies per platform
    List,
    /// Remove cached cookies of one platform, or of all
    Clear { platform: Option<Platform> },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Write a default settings file
    Init {
        /// Target file; defaults to ./.harvester/config.toml
        path: Option<PathBuf>,
    },
    /// Show the discovery hierarchy and the effective settings
    Show,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SimulatedTaskType {
    Search,
    Detail,
    Creator,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_simulate() {
        let args = Args::try_parse_from([
            "harvester", "simulate", "-p", "douyin", "-t", "detail", "-i", "v1", "-i", "v2", "-n", "5",
        ])
        .unwrap();

        match args.command {
            Commands::Simulate {
                platform,
                task_type,
                ids,
                max_count,
                ..
            } => {
                assert_eq!(platform, "douyin");
                assert_eq!(task_type, SimulatedTaskType::Detail);
                assert_eq!(ids, vec!["v1", "v2"]);
                assert_eq!(max_count, Some(5));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_login_and_cookies() {
        let args = Args::try_parse_from([
            "harvester", "login", "-p", "bili", "-t", "phone", "--phone", "13800000000",
        ])
        .unwrap();
        assert!(matches!(
            args.command,
            Commands::Login {
                platform: Platform::Bilibili,
                login_type: LoginType::Phone,
                ..
            }
        ));

        let args = Args::try_parse_from(["harvester", "cookies", "clear", "weibo"]).unwrap();
        assert!(matches!(
            args.command,
            Commands::Cookies {
                action: CookieAction::Clear {
                    platform: Some(Platform::Weibo)
                }
            }
        ));

        assert!(Args::try_parse_from(["harvester", "login", "-p", "myspace"]).is_err());
    }
}
