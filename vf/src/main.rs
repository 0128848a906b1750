use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use vendfleet::admin::{AdminConsole, ConsoleSink};
use vendfleet::cli::{Cli, Command};
use vendfleet::config::Config;
use vendfleet::manager::{self, ManagerApi, ManagerConfig};
use vendfleet::node::{Node, NodeOptions, Product, Upstream, catalog, vending};
use vendfleet::registry::{RegistryClient, RegistryServer};
use vendfleet::transport::{Endpoint, Inbox, Network, UdpNet};
use vendfleet::{Address, NodeKind};

fn setup_logging(role: &str, cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vendfleet")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join(format!("vf-{}.log", role))).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

/// Product names for the manager's stock table columns
fn catalogue_names(config: &Config) -> BTreeMap<u32, String> {
    let path = config.catalog.default_path();
    if !path.exists() {
        debug!(path = %path.display(), "catalogue_names: no default catalogue");
        return BTreeMap::new();
    }
    match catalog::load(&path) {
        Ok(products) => products.into_iter().map(|p| (p.id, p.name)).collect(),
        Err(e) => {
            warn!(error = %e, "Failed to load default catalogue");
            BTreeMap::new()
        }
    }
}

fn products_for(config: &Config, id: Address, headless: bool) -> Result<Vec<Product>> {
    if let Some(products) = catalog::load_for(&config.catalog, id)? {
        return Ok(products);
    }
    if headless {
        warn!(%id, "No product list found, starting empty");
        return Ok(Vec::new());
    }
    vending::ask_catalogue(id)
}

async fn cmd_manager(config: &Config, devices: u32, gateways: u32, depth: u32, no_console: bool) -> Result<()> {
    let net: Arc<dyn Network> = Arc::new(UdpNet::new(config.network.max_frame_size).await?);
    let handle = manager::initialize(
        devices,
        gateways,
        depth,
        ManagerConfig::from_config(config),
        net,
        catalogue_names(config),
    )
    .context("Failed to start manager")?;

    let server = RegistryServer::bind(&config.network.registry_address(), handle.clone()).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let address = server.local_addr()?;
    let registry = tokio::spawn(server.serve(shutdown_rx));

    let count = handle.address_count().await?;
    println!(
        "{} Manager running: {} addresses, registry on {}",
        "✓".green(),
        count,
        address
    );

    if no_console {
        tokio::signal::ctrl_c().await.context("Failed to wait for Ctrl+C")?;
    } else {
        handle.attach_admin(Arc::new(ConsoleSink)).await?;
        let console = AdminConsole::new(Arc::new(handle.clone())).await?;
        tokio::select! {
            result = console.run() => result?,
            _ = tokio::signal::ctrl_c() => println!(),
        }
    }

    info!("Shutting down manager");
    let _ = shutdown_tx.send(true);
    let _ = registry.await;
    handle.shutdown().await?;
    Ok(())
}

async fn cmd_admin(config: &Config, registry: Option<String>) -> Result<()> {
    let address = registry.unwrap_or_else(|| config.network.registry_address());
    let client = RegistryClient::new(&address).with_query_timeout(config.query.timeout());
    client.ping().await.with_context(|| format!("No manager at {}", address))?;

    let mut output = client.attach_admin().await?;
    tokio::spawn(async move {
        while let Some(text) = output.recv().await {
            println!("{}", text);
        }
    });

    let console = AdminConsole::new(Arc::new(client)).await?;
    tokio::select! {
        result = console.run() => result?,
        _ = tokio::signal::ctrl_c() => println!(),
    }
    Ok(())
}

/// Serve an attached node until Ctrl+C or the vending prompt exits
async fn serve_node(config: &Config, node: Arc<Node>, inbox: Inbox, headless: bool) -> Result<()> {
    node.load_products(products_for(config, node.id(), headless)?).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(node.clone().run(inbox, shutdown_rx));
    println!(
        "{} Attached as {} #{} on {}",
        "✓".green(),
        node.kind(),
        node.id(),
        node.endpoint()
    );

    if headless {
        tokio::signal::ctrl_c().await.context("Failed to wait for Ctrl+C")?;
    } else {
        tokio::select! {
            result = vending::run_prompt(node.clone()) => result?,
            _ = tokio::signal::ctrl_c() => println!(),
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = runner.await;
    Ok(())
}

async fn cmd_gateway(config: &Config, registry: Option<String>, headless: bool) -> Result<()> {
    let address = registry.unwrap_or_else(|| config.network.registry_address());
    let manager: Arc<dyn ManagerApi> = Arc::new(RegistryClient::new(&address));
    let net: Arc<dyn Network> = Arc::new(UdpNet::new(config.network.max_frame_size).await?);

    let options = NodeOptions::from_config(config, NodeKind::Gateway);
    let (node, inbox) = Node::attach(options, Upstream::Manager(manager.clone()), net)
        .await
        .with_context(|| format!("Failed to attach under the manager at {}", address))?;
    serve_node(config, node, inbox, headless).await
}

async fn cmd_node(config: &Config, parent: Endpoint, kind: NodeKind, headless: bool) -> Result<()> {
    let net: Arc<dyn Network> = Arc::new(UdpNet::new(config.network.max_frame_size).await?);
    let options = NodeOptions::from_config(config, kind);
    let (node, inbox) = Node::attach(options, Upstream::Gateway(parent.clone()), net)
        .await
        .with_context(|| format!("Failed to attach under {}", parent))?;
    serve_node(config, node, inbox, headless).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(
        cli.command.role(),
        cli.log_level.as_deref(),
        config_log_level.as_deref(),
    )
    .context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Manager {
            devices,
            gateways,
            depth,
            no_console,
        } => cmd_manager(&config, devices, gateways, depth, no_console).await,
        Command::Admin { registry } => cmd_admin(&config, registry).await,
        Command::Gateway { registry, headless } => cmd_gateway(&config, registry, headless).await,
        Command::Node {
            parent_host,
            parent_port,
            kind,
            headless,
        } => cmd_node(&config, Endpoint::new(parent_host, parent_port), kind, headless).await,
    }
}
