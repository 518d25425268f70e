//! # ziapi CLI
//!
//! Command-line access to a Data Server.
//!
//! ```bash
//! # Defaults for later calls
//! ziapi-cli config set --host localhost --port 8004 --device dev1234
//!
//! # Node access
//! ziapi-cli set /dev1234/oscs/0/freq 100e3 --sync
//! ziapi-cli get /dev1234/oscs/0/freq
//! ziapi-cli ls /dev1234/demods --recursive --leaves
//! ziapi-cli poll --path /dev1234/demods/0/sample --duration 2
//!
//! # Simulated server for experiments
//! ziapi-cli serve --port 8004 --device dev1234:mf
//! ```
//!
//! Logging goes to stderr; `-v` raises the level, `RUST_LOG` overrides it.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

mod commands;
mod session;

use commands::config::CliConfig;
use commands::{
    ConfigCommand, DiscoverCommand, GetCommand, LsCommand, PidCommand, PollCommand, ServeCommand, SetCommand,
    SweepCommand,
};
use session::ServerArgs;

#[derive(Parser, Debug)]
#[command(name = "ziapi-cli")]
#[command(about = "Command-line interface for Data Server sessions", long_about = None)]
#[command(version)]
struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    server: ServerArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage defaults
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Read a node
    Get {
        #[command(flatten)]
        args: GetCommand,
    },

    /// Write a node
    Set {
        #[command(flatten)]
        args: SetCommand,
    },

    /// List nodes
    Ls {
        #[command(flatten)]
        args: LsCommand,
    },

    /// Subscribe and print events
    Poll {
        #[command(flatten)]
        args: PollCommand,
    },

    /// Change a PID setpoint and enable the controller
    Pid {
        #[command(flatten)]
        args: PidCommand,
    },

    /// Frequency sweep with the sweeper module
    Sweep {
        #[command(flatten)]
        args: SweepCommand,
    },

    /// Look up a device in the discovery table
    Discover {
        #[command(flatten)]
        args: DiscoverCommand,
    },

    /// Run a simulated Data Server
    Serve {
        #[command(flatten)]
        args: ServeCommand,
    },
}

fn log_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut filter = EnvFilter::builder()
        .with_default_directive(log_level(cli.verbose).into())
        .from_env_lossy();
    if cli.verbose == 0 {
        filter = filter.add_directive("ziapi_cli=info".parse()?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match cli.command {
        Commands::Config(cmd) => cmd.execute(),
        Commands::Get { args } => args.execute(&cli.server, &CliConfig::load()?),
        Commands::Set { args } => args.execute(&cli.server, &CliConfig::load()?),
        Commands::Ls { args } => args.execute(&cli.server, &CliConfig::load()?),
        Commands::Poll { args } => args.execute(&cli.server, &CliConfig::load()?),
        Commands::Pid { args } => args.execute(&cli.server, &CliConfig::load()?),
        Commands::Sweep { args } => args.execute(&cli.server, &CliConfig::load()?),
        Commands::Discover { args } => args.execute(&CliConfig::load()?),
        Commands::Serve { args } => args.execute(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_set_sync() {
        let cli = Cli::try_parse_from(["ziapi-cli", "--port", "8005", "set", "/dev1/oscs/0/freq", "1e5", "--sync"]).unwrap();
        assert_eq!(cli.server.port, Some(8005));
        let Commands::Set { args } = cli.command else {
            panic!("expected set");
        };
        assert!(args.sync);
        assert_eq!(args.value, "1e5");
    }

    #[test]
    fn test_parse_poll_paths() {
        let cli = Cli::try_parse_from([
            "ziapi-cli", "-v", "poll", "-p", "/dev1/demods/0/sample", "-p", "/dev1/demods/1/sample", "-d", "0.5",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        let Commands::Poll { args } = cli.command else {
            panic!("expected poll");
        };
        assert_eq!(args.paths.len(), 2);
        assert_eq!(args.duration, 0.5);
    }

    #[test]
    fn test_log_level() {
        assert_eq!(log_level(0), LevelFilter::WARN);
        assert_eq!(log_level(5), LevelFilter::TRACE);
    }
}
