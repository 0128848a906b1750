//! Interactive admin console

use std::sync::Arc;

use colored::Colorize;
use eyre::{Result, eyre};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::{debug, info};
use zigtree::Address;

use super::commands::{AdminCommand, HELP, Targets, resolve};
use crate::manager::{ManagerApi, ManagerError, QueryOutcome};
use crate::protocol::QueryKind;

/// What the console prints for one command
///
/// Query tables and logs reach the administrator through the manager's
/// admin sink; `lines` only holds the console's own messages.
#[derive(Debug, Default)]
pub struct Response {
    pub lines: Vec<String>,
    pub outcome: Option<QueryOutcome>,
    pub quit: bool,
}

/// Admin console over any manager implementation
pub struct AdminConsole {
    manager: Arc<dyn ManagerApi>,
    count: Address,
}

impl AdminConsole {
    pub async fn new(manager: Arc<dyn ManagerApi>) -> Result<Self, ManagerError> {
        let count = manager.address_count().await?;
        debug!(%count, "AdminConsole::new: called");
        Ok(Self { manager, count })
    }

    async fn resolve(&self, targets: &Targets) -> Result<(Vec<Address>, Vec<String>), ManagerError> {
        let connected = match targets {
            Targets::All => self.manager.connected_distributors().await?,
            Targets::Ids(_) => Vec::new(),
        };
        Ok(resolve(targets, self.count, &connected))
    }

    async fn query(&self, kind: QueryKind, targets: &Targets) -> Result<Response, ManagerError> {
        let (ids, lines) = self.resolve(targets).await?;
        if ids.is_empty() {
            return Ok(Response {
                lines,
                ..Default::default()
            });
        }
        let query_id = self.manager.send_query(kind, ids).await?;
        let outcome = self.manager.wait_for_query(&query_id).await?;
        Ok(Response {
            lines,
            outcome,
            quit: false,
        })
    }

    /// Execute one parsed command
    pub async fn execute(&self, command: AdminCommand) -> Result<Response, ManagerError> {
        debug!(?command, "AdminConsole::execute: called");
        match command {
            AdminCommand::Help => Ok(Response {
                lines: help_lines(),
                ..Default::default()
            }),
            AdminCommand::Logs => {
                self.manager.display_logs().await?;
                Ok(Response::default())
            }
            AdminCommand::Free(targets) => {
                let (ids, mut lines) = self.resolve(&targets).await?;
                for id in ids {
                    if self.manager.free_address(id).await? {
                        info!(%id, "Address freed by administrator");
                        lines.push(format!("NodeID {} is released", id));
                    } else {
                        lines.push(format!("Unknown NodeID to free: {}", id));
                    }
                }
                Ok(Response {
                    lines,
                    ..Default::default()
                })
            }
            AdminCommand::GetStock(targets) => self.query(QueryKind::GetStock, &targets).await,
            AdminCommand::GetMoney(targets) => self.query(QueryKind::GetMoney, &targets).await,
            AdminCommand::Quit => Ok(Response {
                quit: true,
                ..Default::default()
            }),
        }
    }

    /// Parse and execute a raw line
    pub async fn execute_line(&self, line: &str) -> Result<Response, ManagerError> {
        match AdminCommand::parse(line) {
            Ok(command) => self.execute(command).await,
            Err(e) => Ok(Response {
                lines: vec![e.to_string()],
                ..Default::default()
            }),
        }
    }

    /// Run the prompt loop until `quit` or end of input
    pub async fn run(&self) -> Result<()> {
        let mut rl = DefaultEditor::new().map_err(|e| eyre!("Failed to initialize readline: {}", e))?;
        println!();
        println!("{}", "vendfleet admin console".bright_cyan().bold());
        println!("{} addresses in the tree", self.count);
        println!("Type {} for help, {} to quit", "help".yellow(), "quit".yellow());

        loop {
            let line = match tokio::task::block_in_place(|| rl.readline(&format!("{} ", ">".bright_green()))) {
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

            match self.execute_line(input).await {
                Ok(response) => {
                    for line in &response.lines {
                        println!("{}", line);
                    }
                    if response.quit {
                        break;
                    }
                }
                Err(e) => println!("{} {}", "✗".red(), e),
            }
        }
        Ok(())
    }
}

fn help_lines() -> Vec<String> {
    let mut lines = vec![format!("{}", "Available Commands:".bright_cyan())];
    for (command, description) in HELP {
        lines.push(format!("  {:26} {}", command.yellow(), description));
    }
    lines
}
