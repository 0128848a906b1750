//! Vending role carried by every node
//!
//! Money is kept in integer cents and only converted to euros on the wire.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use zigtree::Address;

use crate::config::AlertConfig;
use crate::protocol::{Frame, QueryKind, StockLevels};

/// A product slot of a distributor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: u32,
    pub name: String,
    pub price_cents: u64,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VendingError {
    #[error("Product #{0} not found")]
    ProductNotFound(u32),

    #[error("Product {name} is not available")]
    ProductNotAvailable { id: u32, name: String },
}

/// Observable condition raised by a purchase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    StockLow { product: String },
    TooMuchMoney,
}

impl Alert {
    pub fn message(&self) -> String {
        match self {
            Alert::StockLow { product } => format!("The stock is low for {}", product),
            Alert::TooMuchMoney => "Too much money in the Distributor".to_string(),
        }
    }
}

/// Outcome of a successful purchase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub product: String,
    pub price_cents: u64,
    pub quantity_left: u32,
    pub money_cents: u64,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone)]
pub struct PurchaseRecord {
    pub at: DateTime<Local>,
    pub product_id: u32,
    pub price_cents: u64,
}

#[derive(Debug, Clone)]
pub struct Distributor {
    id: Address,
    products: BTreeMap<u32, Product>,
    money_cents: u64,
    purchases: Vec<PurchaseRecord>,
    alerts: AlertConfig,
}

impl Distributor {
    pub fn new(id: Address, products: Vec<Product>, alerts: AlertConfig) -> Self {
        debug!(%id, count = products.len(), "Distributor::new: called");
        Self {
            id,
            products: products.into_iter().map(|p| (p.id, p)).collect(),
            money_cents: 0,
            purchases: Vec::new(),
            alerts,
        }
    }

    /// Replace the product slots, keeping money and purchase history
    pub fn restock(&mut self, products: Vec<Product>) {
        debug!(id = %self.id, count = products.len(), "Distributor::restock: called");
        self.products = products.into_iter().map(|p| (p.id, p)).collect();
    }

    pub fn id(&self) -> Address {
        self.id
    }

    pub fn products(&self) -> impl Iterator<Item = &Product> {
        self.products.values()
    }

    pub fn product(&self, id: u32) -> Option<&Product> {
        self.products.get(&id)
    }

    pub fn money_cents(&self) -> u64 {
        self.money_cents
    }

    pub fn purchases(&self) -> &[PurchaseRecord] {
        &self.purchases
    }

    /// Sell one unit of `product_id`
    ///
    /// Stock and money are untouched on error. Both alerts may fire on the
    /// same purchase.
    pub fn purchase(&mut self, product_id: u32) -> Result<Receipt, VendingError> {
        debug!(id = %self.id, %product_id, "Distributor::purchase: called");
        let product = self
            .products
            .get_mut(&product_id)
            .ok_or(VendingError::ProductNotFound(product_id))?;
        if product.quantity == 0 {
            return Err(VendingError::ProductNotAvailable {
                id: product_id,
                name: product.name.clone(),
            });
        }

        product.quantity -= 1;
        self.money_cents += product.price_cents;
        self.purchases.push(PurchaseRecord {
            at: Local::now(),
            product_id,
            price_cents: product.price_cents,
        });

        let mut alerts = Vec::new();
        if product.quantity < self.alerts.stock_min {
            alerts.push(Alert::StockLow {
                product: product.name.clone(),
            });
        }
        if self.money_cents > self.alerts.money_max_cents {
            alerts.push(Alert::TooMuchMoney);
        }

        Ok(Receipt {
            product: product.name.clone(),
            price_cents: product.price_cents,
            quantity_left: product.quantity,
            money_cents: self.money_cents,
            alerts,
        })
    }

    pub fn stock(&self) -> StockLevels {
        self.products.values().map(|p| (p.id, p.quantity)).collect()
    }

    /// Answer a stock or money query addressed to this node
    pub fn execute(&self, kind: QueryKind) -> Frame {
        match kind {
            QueryKind::GetStock => Frame::stock_reply(self.id, self.stock()),
            QueryKind::GetMoney => Frame::money_reply(self.id, self.money_cents),
        }
    }

    /// Timestamped ledger line for an alert of this distributor
    pub fn log_line(&self, alert: &Alert) -> String {
        format!(
            "{} Distributor #{} : {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            self.id,
            alert.message()
        )
    }
}

/// Render cents as `12.50`
pub fn format_euros(cents: u64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}
