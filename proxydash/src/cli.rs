use clap::{CommandFactory, Parser, Subcommand};

use crate::commands::{self, profiles};

/// proxydash - terminal dashboard for a proxy's HTTP management API
#[derive(Parser)]
#[command(name = "proxydash")]
#[command(version, disable_version_flag = true)]
#[command(about = "proxydash - terminal dashboard for a proxy's HTTP management API")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Show version
    #[arg(long, global = true)]
    pub version: bool,

    /// Show verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage saved proxy connections
    #[command(subcommand)]
    Profiles(profiles::ProfileCommands),

    /// Show per-interface and per-policy traffic
    Traffic {
        /// Profile name or id (defaults to the last used profile)
        #[arg(short = 'p', long, env = "PROXYDASH_PROFILE")]
        profile: Option<String>,

        /// Keep refreshing until interrupted
        #[arg(short = 'w', long)]
        watch: bool,
    },

    /// Show recent requests, live
    Requests {
        /// Profile name or id (defaults to the last used profile)
        #[arg(short = 'p', long, env = "PROXYDASH_PROFILE")]
        profile: Option<String>,

        /// Print rows as they change instead of opening the dashboard
        #[arg(long)]
        no_tui: bool,

        /// Fetch once, print the table and exit
        #[arg(long, conflicts_with = "no_tui")]
        once: bool,
    },
}

impl Cli {
    pub fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        if self.version {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }

        let Some(command) = self.command else {
            Cli::command().print_help()?;
            println!();
            return Ok(());
        };

        match command {
            Commands::Profiles(cmd) => profiles::run(cmd),
            Commands::Traffic { profile, watch } => {
                commands::traffic::run(profile.as_deref(), watch)
            }
            Commands::Requests {
                profile,
                no_tui,
                once,
            } => commands::requests::run(profile.as_deref(), no_tui, once),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_API_PORT;

    #[test]
    fn profiles_add_defaults_port() {
        let cli = Cli::try_parse_from([
            "proxydash", "profiles", "add", "192.168.1.2", "--name", "Mac", "--key", "k",
        ])
        .unwrap();
        let Commands::Profiles(profiles::ProfileCommands::Add {
            host, port, no_test, ..
        }) = cli.command.expect("command")
        else {
            panic!("expected Profiles::Add");
        };
        assert_eq!(host, "192.168.1.2");
        assert_eq!(port, DEFAULT_API_PORT);
        assert!(!no_test);
    }

    #[test]
    fn profiles_add_requires_name() {
        let res = Cli::try_parse_from(["proxydash", "profiles", "add", "host", "--key", "k"]);
        assert!(res.is_err());
    }

    #[test]
    fn profiles_rm_accepts_aliases() {
        for alias in ["rm", "remove", "delete"] {
            let cli = Cli::try_parse_from(["proxydash", "profiles", alias, "Mac", "-y"]).unwrap();
            let Commands::Profiles(profiles::ProfileCommands::Rm { profile, yes }) =
                cli.command.expect("command")
            else {
                panic!("expected Profiles::Rm");
            };
            assert_eq!(profile, "Mac");
            assert!(yes);
        }
    }

    #[test]
    fn traffic_parses_profile_and_watch() {
        let cli = Cli::try_parse_from(["proxydash", "traffic", "-p", "Mac", "--watch"]).unwrap();
        let Commands::Traffic { profile, watch } = cli.command.expect("command") else {
            panic!("expected Traffic");
        };
        assert_eq!(profile.as_deref(), Some("Mac"));
        assert!(watch);
    }

    #[test]
    fn requests_once_conflicts_with_no_tui() {
        let res = Cli::try_parse_from(["proxydash", "requests", "--once", "--no-tui"]);
        assert!(res.is_err());

        let cli = Cli::try_parse_from(["proxydash", "requests", "--once"]).unwrap();
        let Commands::Requests { once, no_tui, .. } = cli.command.expect("command") else {
            panic!("expected Requests");
        };
        assert!(once);
        assert!(!no_tui);
    }

    #[test]
    fn verbose_is_global() {
        let cli = Cli::try_parse_from(["proxydash", "requests", "-v"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn no_subcommand_parses() {
        let cli = Cli::try_parse_from(["proxydash"]).unwrap();
        assert!(cli.command.is_none());
    }
}
