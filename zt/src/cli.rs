//! CLI argument parsing for zigtree

use clap::{Args, Parser, Subcommand};

use crate::{Address, TopologyError, TopologyParams};

#[derive(Parser, Debug)]
#[command(name = "zt")]
#[command(author, version, about = "Cluster-tree address algebra", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Shape of the tree
#[derive(Args, Debug, Clone, Copy)]
pub struct Shape {
    /// Devices under every interior node
    pub devices: u32,

    /// Child gateways under every interior node
    pub gateways: u32,

    /// Depth of the tree
    pub depth: u32,
}

impl Shape {
    pub fn params(&self) -> Result<TopologyParams, TopologyError> {
        TopologyParams::new(self.devices, self.gateways, self.depth)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the number of addresses
    Count {
        #[command(flatten)]
        shape: Shape,
    },

    /// Print the children interval of an address
    Interval {
        #[command(flatten)]
        shape: Shape,

        /// Address to inspect
        address: Address,
    },

    /// Print parent, depth and kind of an address
    Info {
        #[command(flatten)]
        shape: Shape,

        /// Address to inspect
        address: Address,
    },

    /// Draw the tree
    Draw {
        #[command(flatten)]
        shape: Shape,
    },

    /// Verify the layout of one tree
    Check {
        #[command(flatten)]
        shape: Shape,
    },

    /// Verify the layout of every tree up to a bound
    Sweep {
        /// Largest devices, gateways and depth value to try
        #[arg(default_value_t = 5)]
        max: u32,
    },
}
