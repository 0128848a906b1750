//! Wire protocol shared by the manager and every node
//!
//! One JSON object per datagram, tagged by its `query` field.

mod frame;

pub use frame::{Frame, FrameError, QueryKind, Status, StockLevels, check_size, cents_to_euros};

/// Largest frame a node sends or accepts
pub const MAX_FRAME_SIZE: usize = 8 * 1024;

pub const QUERY_GET_NODE_ID: &str = "query_get_node_id";
pub const REPLY_GET_NODE_ID: &str = "reply_get_node_id";
pub const NEW_NODE_CONNEXION: &str = "new_node_connexion";
pub const QUERY_NETWORK_PARAMETERS: &str = "query_network_parameters";
pub const REPLY_NETWORK_PARAMETERS: &str = "reply_network_parameters";
pub const QUERY_GET_STOCK: &str = "query_get_stock";
pub const QUERY_GET_MONEY: &str = "query_get_money";
pub const REPLY_GET_STOCK: &str = "reply_get_stock";
pub const REPLY_GET_MONEY: &str = "reply_get_money";
pub const ADD_TO_LOGS_HISTORY: &str = "add_to_logs_history";

/// Every `query` value the protocol understands
pub const KNOWN_QUERIES: [&str; 10] = [
    QUERY_GET_NODE_ID,
    REPLY_GET_NODE_ID,
    NEW_NODE_CONNEXION,
    QUERY_NETWORK_PARAMETERS,
    REPLY_NETWORK_PARAMETERS,
    QUERY_GET_STOCK,
    QUERY_GET_MONEY,
    REPLY_GET_STOCK,
    REPLY_GET_MONEY,
    ADD_TO_LOGS_HISTORY,
];
