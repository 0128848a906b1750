use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::{debug, info};

use zigtree::cli::{Cli, Command};
use zigtree::{TopologyError, TopologyParams, render_tree, verify_layout};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

fn sweep(max: u32) -> Result<()> {
    let mut checked = 0;
    let mut failures = 0;

    for devices in 0..=max {
        for gateways in 1..=max {
            for depth in 1..=max {
                let params = match TopologyParams::new(devices, gateways, depth) {
                    Ok(params) => params,
                    Err(TopologyError::Overflow { .. }) => {
                        debug!("sweep: skipping d={} g={} D={}: too large", devices, gateways, depth);
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                checked += 1;
                if let Err(e) = verify_layout(&params) {
                    failures += 1;
                    println!("{} {}: {}", "✗".red(), params, e);
                }
            }
        }
    }

    if failures > 0 {
        return Err(eyre!("{} of {} layouts failed", failures, checked));
    }
    println!("{} {} layouts verified", "✓".green(), checked);
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    info!("zt starting");

    match cli.command {
        Command::Count { shape } => {
            println!("{}", shape.params()?.address_count());
        }
        Command::Interval { shape, address } => {
            let interval = shape.params()?.next_interval(address)?;
            let gateways: Vec<String> = interval.gateways().map(|g| g.to_string()).collect();
            println!(
                "{} depth={} low={} upper={} step={}",
                address.to_string().cyan(),
                interval.depth,
                interval.low,
                interval.upper,
                interval.step
            );
            println!("  gateways: [{}]", gateways.join(", "));
            println!("  devices:  {}..{}", interval.devices().start, interval.devices().end);
        }
        Command::Info { shape, address } => {
            let info = shape.params()?.node_info(address)?;
            println!(
                "{} parent={} depth={} kind={}",
                address.to_string().cyan(),
                info.parent,
                info.depth,
                info.kind.to_string().yellow()
            );
        }
        Command::Draw { shape } => {
            print!("{}", render_tree(&shape.params()?)?);
        }
        Command::Check { shape } => {
            let params = shape.params()?;
            let count = verify_layout(&params).context("Layout verification failed")?;
            println!("{} {} addresses verified for {}", "✓".green(), count, params);
        }
        Command::Sweep { max } => sweep(max)?,
    }

    Ok(())
}
