//! Admin command parsing and target validation

use thiserror::Error;
use zigtree::Address;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Command not found !")]
    NotFound(String),

    #[error("Usage: {0} all | nodesID")]
    MissingTargets(&'static str),
}

/// Node selection of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    /// Every connected node
    All,

    /// Raw tokens, validated against the tree when resolved
    Ids(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Help,
    Logs,
    Free(Targets),
    GetStock(Targets),
    GetMoney(Targets),
    Quit,
}

/// Command names and descriptions shown by `help`
pub const HELP: [(&str, &str); 5] = [
    ("free all | nodesID", "Release the addresses of the given nodes, or of all of them"),
    ("get_money all | nodesID", "Get the money of the given distributors"),
    ("get_stock all | nodesID", "Get the stock of the given distributors"),
    ("help", "Print the command helper"),
    ("logs", "Display the logs history"),
];

fn targets(command: &'static str, args: &[&str]) -> Result<Targets, CommandError> {
    match args {
        [] => Err(CommandError::MissingTargets(command)),
        ["all", ..] => Ok(Targets::All),
        ids => Ok(Targets::Ids(ids.iter().map(|s| s.to_string()).collect())),
    }
}

impl AdminCommand {
    /// Parse one whitespace-separated command line
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((command, args)) = tokens.split_first() else {
            return Err(CommandError::NotFound(String::new()));
        };
        match *command {
            "help" => Ok(AdminCommand::Help),
            "logs" => Ok(AdminCommand::Logs),
            "quit" | "exit" => Ok(AdminCommand::Quit),
            "free" => targets("free", args).map(AdminCommand::Free),
            "get_stock" => targets("get_stock", args).map(AdminCommand::GetStock),
            "get_money" => targets("get_money", args).map(AdminCommand::GetMoney),
            other => Err(CommandError::NotFound(other.to_string())),
        }
    }
}

/// Valid addresses of `targets` plus one message per rejected token
///
/// `All` resolves to `connected`; ids must be integers in `[1, count)`.
pub fn resolve(targets: &Targets, count: Address, connected: &[Address]) -> (Vec<Address>, Vec<String>) {
    match targets {
        Targets::All if connected.is_empty() => (Vec::new(), vec!["No node connected!".to_string()]),
        Targets::All => (connected.to_vec(), Vec::new()),
        Targets::Ids(tokens) => {
            let mut ids = Vec::new();
            let mut errors = Vec::new();
            for token in tokens {
                match token.parse::<i64>() {
                    Err(_) => errors.push(format!("{} is not a number", token)),
                    Ok(id) if id < 1 || id >= i64::from(count) => errors.push(format!("Node {} doesn't exist!", id)),
                    Ok(id) => {
                        if let Ok(id) = Address::try_from(id)
                            && !ids.contains(&id)
                        {
                            ids.push(id);
                        }
                    }
                }
            }
            (ids, errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(AdminCommand::parse("help"), Ok(AdminCommand::Help));
        assert_eq!(AdminCommand::parse("  logs "), Ok(AdminCommand::Logs));
        assert_eq!(AdminCommand::parse("get_stock all"), Ok(AdminCommand::GetStock(Targets::All)));
        assert_eq!(
            AdminCommand::parse("get_money 1 20"),
            Ok(AdminCommand::GetMoney(Targets::Ids(vec!["1".to_string(), "20".to_string()])))
        );
        assert_eq!(
            AdminCommand::parse("free 3"),
            Ok(AdminCommand::Free(Targets::Ids(vec!["3".to_string()])))
        );
        assert_eq!(AdminCommand::parse("exit"), Ok(AdminCommand::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            AdminCommand::parse("dance"),
            Err(CommandError::NotFound("dance".to_string()))
        );
        assert_eq!(AdminCommand::parse("dance").unwrap_err().to_string(), "Command not found !");
        assert_eq!(
            AdminCommand::parse("get_stock"),
            Err(CommandError::MissingTargets("get_stock"))
        );
    }

    #[test]
    fn test_resolve_ids() {
        let targets = Targets::Ids(["1", "x", "43", "0", "-2", "20", "1"].iter().map(|s| s.to_string()).collect());
        let (ids, errors) = resolve(&targets, 43, &[]);
        assert_eq!(ids, vec![1, 20]);
        assert_eq!(
            errors,
            vec![
                "x is not a number",
                "Node 43 doesn't exist!",
                "Node 0 doesn't exist!",
                "Node -2 doesn't exist!",
            ]
        );
    }

    #[test]
    fn test_resolve_all() {
        assert_eq!(resolve(&Targets::All, 43, &[1, 16]), (vec![1, 16], vec![]));
        assert_eq!(
            resolve(&Targets::All, 43, &[]),
            (vec![], vec!["No node connected!".to_string()])
        );
    }
}
