//! Text tables shown to the administrator when a query completes

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;
use zigtree::Address;

use crate::protocol::{Frame, QueryKind, Status, StockLevels};

pub const NO_LOGS: &str = "No logs history available to display";

const LABEL_WIDTH: usize = 18;

/// Replies of one query, sorted by responding node
#[derive(Debug, Default)]
struct Collected {
    stock: BTreeMap<Address, StockLevels>,
    money: BTreeMap<Address, f64>,
    not_connected: BTreeSet<Address>,
}

fn collect(kind: QueryKind, replies: &[String]) -> Collected {
    let mut collected = Collected::default();
    for raw in replies {
        let frame = match Frame::decode(raw) {
            Ok(frame) if frame.reply_kind() == Some(kind) => frame,
            Ok(frame) => {
                debug!(kind = frame.name(), "render: skipping reply of another kind");
                continue;
            }
            Err(e) => {
                debug!(error = %e, "render: skipping undecodable reply");
                continue;
            }
        };
        match frame {
            Frame::ReplyGetStock {
                status: Status::Connected,
                distributor_id: Some(id),
                distributor_stock: Some(stock),
                ..
            } => {
                collected.stock.insert(id, stock);
            }
            Frame::ReplyGetMoney {
                status: Status::Connected,
                distributor_id: Some(id),
                distributor_money: Some(money),
                ..
            } => {
                collected.money.insert(id, money);
            }
            other => {
                if let Some((Status::NotConnected, Some(id))) = other.reply_source() {
                    collected.not_connected.insert(id);
                }
            }
        }
    }
    collected
}

fn label(id: Address) -> String {
    format!("{:<width$}|", format!(" Distributor #{}", id), width = LABEL_WIDTH)
}

fn render_stock(stock: &BTreeMap<Address, StockLevels>, products: &BTreeMap<u32, String>) -> String {
    if stock.is_empty() {
        return "Unable to get the distributors stocks".to_string();
    }

    let mut columns: BTreeMap<u32, String> = products.clone();
    for levels in stock.values() {
        for (id, _) in levels.iter() {
            columns.entry(id).or_insert_with(|| format!("#{}", id));
        }
    }

    let mut out = String::from("\nResult of querying to get the Distributors stocks:\n\n");
    out.push_str(&format!("{:<width$}|", "", width = LABEL_WIDTH));
    for name in columns.values() {
        out.push_str(&format!(" {} |", name));
    }
    out.push('\n');

    for (id, levels) in stock {
        out.push_str(&label(*id));
        for (product, name) in &columns {
            let cell = levels.get(*product).map_or("-".to_string(), |q| q.to_string());
            out.push_str(&format!(" {:>width$} |", cell, width = name.chars().count()));
        }
        out.push('\n');
    }
    out
}

fn render_money(money: &BTreeMap<Address, f64>) -> String {
    if money.is_empty() {
        return "Unable to get the distributors money".to_string();
    }

    let mut out = String::from("\nResult of querying to get the Distributors money:\n\n");
    out.push_str(&format!("{:<width$}| Money\n", "", width = LABEL_WIDTH));
    for (id, amount) in money {
        out.push_str(&format!("{}  {:.2}€\n", label(*id), amount));
    }
    out
}

fn join(ids: impl IntoIterator<Item = Address>) -> String {
    ids.into_iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}

/// Render the outcome of a query
///
/// `products` names the stock columns; products only seen in replies show as
/// `#id`. Nodes that never answered are listed only when the query timed out.
pub fn render(
    kind: QueryKind,
    replies: &[String],
    products: &BTreeMap<u32, String>,
    missing: &[Address],
    timed_out: bool,
) -> String {
    let collected = collect(kind, replies);
    let mut out = match kind {
        QueryKind::GetStock => render_stock(&collected.stock, products),
        QueryKind::GetMoney => render_money(&collected.money),
    };

    if !collected.not_connected.is_empty() {
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&format!("Not connected: {}\n", join(collected.not_connected.iter().copied())));
    }
    if timed_out && !missing.is_empty() {
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&format!("No reply before timeout from node(s): {}\n", join(missing.iter().copied())));
    }
    out
}
