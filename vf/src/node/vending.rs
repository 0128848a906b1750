//! Interactive vending prompt of a distributor

use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use eyre::{Result, eyre};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::{debug, warn};

use super::catalog;
use super::distributor::{Product, format_euros};
use super::runtime::{Node, NodeError};

/// A line typed at the vending prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VendingCommand {
    List,
    Buy(u32),
    Money,
    Help,
    Quit,
}

impl VendingCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut tokens = line.split_whitespace();
        let command = tokens.next().unwrap_or("");
        match command {
            "list" | "ls" => Ok(VendingCommand::List),
            "money" => Ok(VendingCommand::Money),
            "help" => Ok(VendingCommand::Help),
            "quit" | "exit" => Ok(VendingCommand::Quit),
            "buy" => {
                let id = tokens.next().ok_or_else(|| "Usage: buy <product id>".to_string())?;
                id.parse()
                    .map(VendingCommand::Buy)
                    .map_err(|_| format!("{} is not a number", id))
            }
            // A bare number buys that product
            other => other
                .parse()
                .map(VendingCommand::Buy)
                .map_err(|_| "Command not found !".to_string()),
        }
    }
}

fn print_products(products: &[Product]) {
    if products.is_empty() {
        println!("{}", "No products loaded".dimmed());
        return;
    }
    for product in products {
        let quantity = match product.quantity {
            0 => "sold out".red().to_string(),
            q => format!("{} left", q),
        };
        println!(
            "  {:>4}  {:<20} {:>8}€  {}",
            product.id.to_string().yellow(),
            product.name,
            format_euros(product.price_cents),
            quantity
        );
    }
}

fn print_help() {
    println!();
    println!("{}", "Available Commands:".bright_cyan());
    println!("  {:14} List the products", "list".yellow());
    println!("  {:14} Buy one unit of a product", "buy <id>".yellow());
    println!("  {:14} Show the money collected", "money".yellow());
    println!("  {:14} Print the command helper", "help".yellow());
    println!("  {:14} Leave the prompt", "quit".yellow());
    println!();
}

fn read_line(rl: &mut DefaultEditor, prompt: &str) -> rustyline::Result<String> {
    tokio::task::block_in_place(|| rl.readline(prompt))
}

/// Run the vending prompt until `quit` or end of input
pub async fn run_prompt(node: Arc<Node>) -> Result<()> {
    let mut rl = DefaultEditor::new().map_err(|e| eyre!("Failed to initialize readline: {}", e))?;
    println!();
    println!("{}", format!("Distributor #{}", node.id()).bright_cyan().bold());
    print_products(&node.products().await);
    println!("Type {} for help, {} to leave", "help".yellow(), "quit".yellow());

    loop {
        let line = match read_line(&mut rl, &format!("{} ", "$".bright_green())) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(eyre!("Readline error: {}", err)),
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(input);

        match VendingCommand::parse(input) {
            Ok(VendingCommand::List) => print_products(&node.products().await),
            Ok(VendingCommand::Money) => println!("{}€", format_euros(node.money_cents().await)),
            Ok(VendingCommand::Help) => print_help(),
            Ok(VendingCommand::Quit) => break,
            Ok(VendingCommand::Buy(id)) => match node.purchase(id).await {
                Ok(receipt) => {
                    println!(
                        "{} {} for {}€",
                        "✓".green(),
                        receipt.product,
                        format_euros(receipt.price_cents)
                    );
                    for alert in &receipt.alerts {
                        println!("{} {}", "!".yellow(), alert.message());
                    }
                }
                Err(NodeError::Vending(e)) => println!("{} {}", "✗".red(), e),
                Err(e) => {
                    warn!(error = %e, "Purchase failed");
                    println!("{} {}", "✗".red(), e);
                }
            },
            Err(message) => println!("{}", message.red()),
        }
    }
    Ok(())
}

/// Ask for a catalogue path until one loads
pub fn ask_catalogue(id: zigtree::Address) -> Result<Vec<Product>> {
    let mut rl = DefaultEditor::new().map_err(|e| eyre!("Failed to initialize readline: {}", e))?;
    println!("No product list found for distributor #{}", id);
    loop {
        let line = match tokio::task::block_in_place(|| rl.readline("Products file path: ")) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => {
                return Err(eyre!("No product list for distributor #{}", id));
            }
            Err(err) => return Err(eyre!("Readline error: {}", err)),
        };
        let path = PathBuf::from(line.trim());
        match catalog::load(&path) {
            Ok(products) => return Ok(products),
            Err(e) => {
                debug!(error = %e, "ask_catalogue: load failed");
                println!("{}", e.to_string().red());
            }
        }
    }
}
