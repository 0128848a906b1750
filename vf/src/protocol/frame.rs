//! Frame types and JSON codec

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use zigtree::{Address, NodeKind, TopologyError, TopologyParams};

use super::{
    KNOWN_QUERIES, MAX_FRAME_SIZE, QUERY_GET_MONEY, QUERY_GET_STOCK, REPLY_GET_MONEY, REPLY_GET_STOCK,
};

/// Errors raised while encoding or decoding a frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Unknown query kind: {0}")]
    UnknownQuery(String),

    #[error("Frame too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },
}

/// Reply status carried by every `reply_*` frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum Status {
    Connected,
    BadRequest,
    NotConnected,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Connected => 200,
            Status::BadRequest => 400,
            Status::NotConnected => 404,
        }
    }
}

impl From<Status> for u16 {
    fn from(status: Status) -> Self {
        status.code()
    }
}

impl TryFrom<u16> for Status {
    type Error = String;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            200 => Ok(Status::Connected),
            400 => Ok(Status::BadRequest),
            404 => Ok(Status::NotConnected),
            other => Err(format!("Unknown status code: {}", other)),
        }
    }
}

/// Product quantities of one distributor, as parallel arrays
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevels {
    pub id: Vec<u32>,
    pub quantity: Vec<u32>,
}

impl StockLevels {
    pub fn get(&self, product_id: u32) -> Option<u32> {
        self.id
            .iter()
            .position(|id| *id == product_id)
            .and_then(|i| self.quantity.get(i).copied())
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.id.iter().copied().zip(self.quantity.iter().copied())
    }
}

impl FromIterator<(u32, u32)> for StockLevels {
    fn from_iter<I: IntoIterator<Item = (u32, u32)>>(iter: I) -> Self {
        let (id, quantity) = iter.into_iter().unzip();
        Self { id, quantity }
    }
}

/// Convert integer cents to the euro amount carried on the wire
pub fn cents_to_euros(cents: u64) -> f64 {
    cents as f64 / 100.0
}

/// The two queries an administrator can fan out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    GetStock,
    GetMoney,
}

impl QueryKind {
    pub fn query_name(self) -> &'static str {
        match self {
            QueryKind::GetStock => QUERY_GET_STOCK,
            QueryKind::GetMoney => QUERY_GET_MONEY,
        }
    }

    /// The reply kind the manager expects while this query is in flight
    pub fn reply_name(self) -> &'static str {
        match self {
            QueryKind::GetStock => REPLY_GET_STOCK,
            QueryKind::GetMoney => REPLY_GET_MONEY,
        }
    }

    pub fn request(self, targets: Vec<Address>) -> Frame {
        match self {
            QueryKind::GetStock => Frame::QueryGetStock {
                querying_nodes_id: targets,
            },
            QueryKind::GetMoney => Frame::QueryGetMoney {
                querying_nodes_id: targets,
            },
        }
    }

    pub fn not_connected(self, node_id: Address) -> Frame {
        self.status_reply(Status::NotConnected, node_id)
    }

    pub fn bad_request(self, node_id: Address) -> Frame {
        self.status_reply(Status::BadRequest, node_id)
    }

    fn status_reply(self, status: Status, node_id: Address) -> Frame {
        match self {
            QueryKind::GetStock => Frame::ReplyGetStock {
                status,
                distributor_id: None,
                node_id: Some(node_id),
                distributor_stock: None,
            },
            QueryKind::GetMoney => Frame::ReplyGetMoney {
                status,
                distributor_id: None,
                node_id: Some(node_id),
                distributor_money: None,
            },
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKind::GetStock => write!(f, "get_stock"),
            QueryKind::GetMoney => write!(f, "get_money"),
        }
    }
}

/// A decoded datagram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum Frame {
    /// Child asks its parent for an address
    QueryGetNodeId {
        reply_address: String,
        reply_port: u16,
        device_type: NodeKind,
    },

    /// Parent hands out an address, -1 when none is left
    ReplyGetNodeId { node_id: i64 },

    /// A node finished attaching; bubbles up to the manager
    NewNodeConnexion { node_id: Address },

    QueryNetworkParameters { node_id: Address },

    ReplyNetworkParameters { devices: u32, gateways: u32, depth: u32 },

    QueryGetStock { querying_nodes_id: Vec<Address> },

    QueryGetMoney { querying_nodes_id: Vec<Address> },

    ReplyGetStock {
        status: Status,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        distributor_id: Option<Address>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_id: Option<Address>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        distributor_stock: Option<StockLevels>,
    },

    ReplyGetMoney {
        status: Status,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        distributor_id: Option<Address>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_id: Option<Address>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        distributor_money: Option<f64>,
    },

    AddToLogsHistory { status: Status, node_id: Address, log: String },
}

impl Frame {
    /// Parse a raw datagram
    ///
    /// An unknown `query` value is reported separately from a frame that is
    /// not valid JSON or lacks fields for its kind.
    pub fn decode(raw: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(raw).map_err(|e| FrameError::Malformed(e.to_string()))?;
        let query = value
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| FrameError::Malformed("missing query field".to_string()))?;
        if !KNOWN_QUERIES.contains(&query) {
            return Err(FrameError::UnknownQuery(query.to_string()));
        }
        let query = query.to_string();
        serde_json::from_value(value).map_err(|e| FrameError::Malformed(format!("{}: {}", query, e)))
    }

    /// Serialize, refusing frames over the datagram limit
    pub fn encode(&self) -> Result<String, FrameError> {
        let raw = serde_json::to_string(self).map_err(|e| FrameError::Malformed(e.to_string()))?;
        check_size(&raw)?;
        Ok(raw)
    }

    /// The `query` tag of this frame
    pub fn name(&self) -> &'static str {
        match self {
            Frame::QueryGetNodeId { .. } => super::QUERY_GET_NODE_ID,
            Frame::ReplyGetNodeId { .. } => super::REPLY_GET_NODE_ID,
            Frame::NewNodeConnexion { .. } => super::NEW_NODE_CONNEXION,
            Frame::QueryNetworkParameters { .. } => super::QUERY_NETWORK_PARAMETERS,
            Frame::ReplyNetworkParameters { .. } => super::REPLY_NETWORK_PARAMETERS,
            Frame::QueryGetStock { .. } => QUERY_GET_STOCK,
            Frame::QueryGetMoney { .. } => QUERY_GET_MONEY,
            Frame::ReplyGetStock { .. } => REPLY_GET_STOCK,
            Frame::ReplyGetMoney { .. } => REPLY_GET_MONEY,
            Frame::AddToLogsHistory { .. } => super::ADD_TO_LOGS_HISTORY,
        }
    }

    /// Kind and targets of a stock or money query
    pub fn as_query(&self) -> Option<(QueryKind, &[Address])> {
        match self {
            Frame::QueryGetStock { querying_nodes_id } => Some((QueryKind::GetStock, querying_nodes_id.as_slice())),
            Frame::QueryGetMoney { querying_nodes_id } => Some((QueryKind::GetMoney, querying_nodes_id.as_slice())),
            _ => None,
        }
    }

    /// Kind of a stock or money reply
    pub fn reply_kind(&self) -> Option<QueryKind> {
        match self {
            Frame::ReplyGetStock { .. } => Some(QueryKind::GetStock),
            Frame::ReplyGetMoney { .. } => Some(QueryKind::GetMoney),
            _ => None,
        }
    }

    /// Status and responding node of a stock or money reply
    pub fn reply_source(&self) -> Option<(Status, Option<Address>)> {
        match self {
            Frame::ReplyGetStock {
                status,
                distributor_id,
                node_id,
                ..
            }
            | Frame::ReplyGetMoney {
                status,
                distributor_id,
                node_id,
                ..
            } => Some((*status, distributor_id.or(*node_id))),
            _ => None,
        }
    }

    pub fn stock_reply(distributor_id: Address, stock: StockLevels) -> Self {
        Frame::ReplyGetStock {
            status: Status::Connected,
            distributor_id: Some(distributor_id),
            node_id: None,
            distributor_stock: Some(stock),
        }
    }

    pub fn money_reply(distributor_id: Address, cents: u64) -> Self {
        Frame::ReplyGetMoney {
            status: Status::Connected,
            distributor_id: Some(distributor_id),
            node_id: None,
            distributor_money: Some(cents_to_euros(cents)),
        }
    }

    pub fn network_parameters(params: &TopologyParams) -> Self {
        Frame::ReplyNetworkParameters {
            devices: params.devices(),
            gateways: params.gateways(),
            depth: params.depth(),
        }
    }

    /// Topology carried by a `reply_network_parameters` frame
    pub fn to_params(&self) -> Option<Result<TopologyParams, TopologyError>> {
        match self {
            Frame::ReplyNetworkParameters {
                devices,
                gateways,
                depth,
            } => Some(TopologyParams::new(*devices, *gateways, *depth)),
            _ => None,
        }
    }
}

/// Fail when `raw` does not fit in one datagram
pub fn check_size(raw: &str) -> Result<(), FrameError> {
    if raw.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: raw.len(),
            limit: MAX_FRAME_SIZE,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_get_node_id_shape() {
        let frame = Frame::QueryGetNodeId {
            reply_address: "127.0.0.1".to_string(),
            reply_port: 40123,
            device_type: NodeKind::Device,
        };
        let json = frame.encode().unwrap();
        assert_eq!(
            json,
            r#"{"query":"query_get_node_id","reply_address":"127.0.0.1","reply_port":40123,"device_type":3}"#
        );
        assert_eq!(Frame::decode(&json).unwrap(), frame);
    }

    #[test]
    fn test_stock_reply_shape() {
        let stock: StockLevels = vec![(1, 4), (2, 0)].into_iter().collect();
        let json = Frame::stock_reply(7, stock).encode().unwrap();
        assert_eq!(
            json,
            r#"{"query":"reply_get_stock","status":200,"distributor_id":7,"distributor_stock":{"id":[1,2],"quantity":[4,0]}}"#
        );
    }

    #[test]
    fn test_money_reply_in_euros() {
        let json = Frame::money_reply(3, 1250).encode().unwrap();
        assert_eq!(
            json,
            r#"{"query":"reply_get_money","status":200,"distributor_id":3,"distributor_money":12.5}"#
        );
    }

    #[test]
    fn test_not_connected_reply_matches_kind() {
        let frame = QueryKind::GetMoney.not_connected(20);
        assert_eq!(frame.name(), REPLY_GET_MONEY);
        assert_eq!(frame.reply_source(), Some((Status::NotConnected, Some(20))));
        assert_eq!(
            frame.encode().unwrap(),
            r#"{"query":"reply_get_money","status":404,"node_id":20}"#
        );
    }

    #[test]
    fn test_decode_external_stock_query() {
        let frame = Frame::decode(r#"{"query":"query_get_stock","querying_nodes_id":[1,20]}"#).unwrap();
        assert_eq!(frame.as_query(), Some((QueryKind::GetStock, &[1, 20][..])));
    }

    #[test]
    fn test_decode_unknown_query() {
        let err = Frame::decode(r#"{"query":"query_reboot"}"#).unwrap_err();
        assert_eq!(err, FrameError::UnknownQuery("query_reboot".to_string()));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(Frame::decode("not json"), Err(FrameError::Malformed(_))));
        assert!(matches!(Frame::decode(r#"{"node_id":3}"#), Err(FrameError::Malformed(_))));
        assert!(matches!(
            Frame::decode(r#"{"query":"new_node_connexion"}"#),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            Frame::decode(r#"{"query":"reply_get_stock","status":201}"#),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn test_encode_refuses_oversized_frames() {
        let frame = Frame::AddToLogsHistory {
            status: Status::Connected,
            node_id: 1,
            log: "x".repeat(MAX_FRAME_SIZE),
        };
        assert!(matches!(frame.encode(), Err(FrameError::TooLarge { .. })));
    }

    #[test]
    fn test_network_parameters_round_trip_to_params() {
        let params = TopologyParams::new(4, 2, 3).unwrap();
        let frame = Frame::network_parameters(&params);
        assert_eq!(frame.to_params(), Some(Ok(params)));
        assert_eq!(Frame::NewNodeConnexion { node_id: 1 }.to_params(), None);
    }

    #[test]
    fn test_stock_levels_lookup() {
        let stock: StockLevels = vec![(1, 4), (5, 2)].into_iter().collect();
        assert_eq!(stock.get(5), Some(2));
        assert_eq!(stock.get(2), None);
        assert_eq!(stock.iter().count(), 2);
    }
}
