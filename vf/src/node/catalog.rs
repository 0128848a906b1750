//! Product catalogue files
//!
//! Semicolon separated, one product per line: `id;name;price;quantity`.
//! Prices are decimal euros. Blank lines and `#` comments are skipped.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use zigtree::Address;

use super::distributor::Product;
use crate::config::CatalogConfig;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {reason}")]
    Malformed { path: PathBuf, line: usize, reason: String },
}

/// Parse `12`, `1.5` or `1,50` into cents
pub fn parse_price(text: &str) -> Option<u64> {
    let text = text.trim().replace(',', ".");
    let (whole, frac) = match text.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (text.as_str(), ""),
    };
    if frac.len() > 2 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let cents = match frac.len() {
        0 => 0,
        1 => frac.parse::<u64>().ok()? * 10,
        _ => frac.parse::<u64>().ok()?,
    };
    whole.checked_mul(100)?.checked_add(cents)
}

/// Parse catalogue text; `path` only labels errors
pub fn parse(content: &str, path: &Path) -> Result<Vec<Product>, CatalogError> {
    let malformed = |line: usize, reason: String| CatalogError::Malformed {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let mut products = Vec::new();
    for (i, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(';').map(str::trim).collect();
        if fields.len() != 4 {
            return Err(malformed(i + 1, format!("expected 4 fields, found {}", fields.len())));
        }
        let id = fields[0]
            .parse()
            .map_err(|_| malformed(i + 1, format!("bad id '{}'", fields[0])))?;
        let price_cents = parse_price(fields[2]).ok_or_else(|| malformed(i + 1, format!("bad price '{}'", fields[2])))?;
        let quantity = fields[3]
            .parse()
            .map_err(|_| malformed(i + 1, format!("bad quantity '{}'", fields[3])))?;
        products.push(Product {
            id,
            name: fields[1].to_string(),
            price_cents,
            quantity,
        });
    }
    Ok(products)
}

pub fn load(path: &Path) -> Result<Vec<Product>, CatalogError> {
    let content = fs::read_to_string(path).map_err(|source| CatalogError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let products = parse(&content, path)?;
    info!(path = %path.display(), count = products.len(), "Loaded product catalogue");
    Ok(products)
}

/// Catalogue of distributor `id`
///
/// Tries `distributor_<id>.csv`, then the default file. `None` when neither
/// exists, leaving the caller to ask for a path.
pub fn load_for(config: &CatalogConfig, id: Address) -> Result<Option<Vec<Product>>, CatalogError> {
    let own = config.dir.join(format!("distributor_{}.csv", id));
    for path in [own, config.default_path()] {
        debug!(path = %path.display(), "catalog::load_for: trying");
        if path.exists() {
            return load(&path).map(Some);
        }
    }
    Ok(None)
}
