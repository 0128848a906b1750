//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use zigtree::NodeKind;

/// vendfleet - hierarchical vending fleet
#[derive(Parser)]
#[command(
    name = "vf",
    about = "Manager, gateways, devices and admin console of a vending fleet",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the manager at the root of the tree
    Manager {
        /// Devices under every gateway
        devices: u32,

        /// Child gateways under every gateway
        gateways: u32,

        /// Depth of the tree
        depth: u32,

        /// Do not open the admin console in this process
        #[arg(long)]
        no_console: bool,
    },

    /// Open an admin console on a running manager
    Admin {
        /// Registry address (HOST:PORT)
        #[arg(short, long)]
        registry: Option<String>,
    },

    /// Start a ring gateway directly under the manager
    Gateway {
        /// Registry address (HOST:PORT)
        #[arg(short, long)]
        registry: Option<String>,

        /// Run without the vending prompt
        #[arg(long)]
        headless: bool,
    },

    /// Start a gateway or device under a gateway
    Node {
        /// Host of the parent gateway
        parent_host: String,

        /// Port of the parent gateway
        parent_port: u16,

        /// Kind of node (gateway or device)
        #[arg(short, long, default_value = "device")]
        kind: NodeKind,

        /// Run without the vending prompt
        #[arg(long)]
        headless: bool,
    },
}

impl Command {
    /// Role name used for the log file
    pub fn role(&self) -> &'static str {
        match self {
            Command::Manager { .. } => "manager",
            Command::Admin { .. } => "admin",
            Command::Gateway { .. } => "gateway",
            Command::Node { .. } => "node",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manager() {
        let cli = Cli::try_parse_from(["vf", "manager", "4", "2", "3", "--no-console"]).unwrap();
        match cli.command {
            Command::Manager {
                devices,
                gateways,
                depth,
                no_console,
            } => {
                assert_eq!((devices, gateways, depth), (4, 2, 3));
                assert!(no_console);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_node_kind() {
        let cli = Cli::try_parse_from(["vf", "node", "127.0.0.1", "6001", "--kind", "gateway"]).unwrap();
        match &cli.command {
            Command::Node {
                parent_port, kind, ..
            } => {
                assert_eq!(*parent_port, 6001);
                assert_eq!(*kind, NodeKind::Gateway);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.command.role(), "node");
    }

    #[test]
    fn test_parse_rejects_negative_counts() {
        assert!(Cli::try_parse_from(["vf", "manager", "-1", "2", "3"]).is_err());
    }

    #[test]
    fn test_global_options() {
        let cli = Cli::try_parse_from(["vf", "admin", "--log-level", "debug", "-r", "10.0.0.1:1099"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Command::Admin { registry: Some(_) }));
    }
}
