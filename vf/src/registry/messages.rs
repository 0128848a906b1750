//! Registry message types
//!
//! JSON over newline: each request and response is one line.

use serde::{Deserialize, Serialize};
use zigtree::Address;

use crate::manager::QueryOutcome;
use crate::protocol::QueryKind;

/// Requests from gateways and admin consoles to the manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum RegistryRequest {
    Ping,
    AllocateGatewayAddress,
    Topology,
    AddressCount,
    ConnectedDistributors,
    FreeAddress { address: Address },
    ReceiveReply { raw: String },
    DisplayLogs,
    SendQuery { kind: QueryKind, targets: Vec<Address> },

    /// `None` waits for the current query
    WaitForEndQuery { query_id: Option<String> },

    Bind { name: String, host: String, port: u16 },
    Unbind { name: String },

    /// Keep the connection open and stream admin output
    AttachAdmin,
}

/// Responses from the manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum RegistryResponse {
    Ok,
    Pong { version: String },
    Address { address: Address },
    Topology { devices: u32, gateways: u32, depth: u32 },
    Count { count: Address },
    Addresses { addresses: Vec<Address> },
    Freed { freed: bool },
    Lines { lines: Vec<String> },
    QueryStarted { query_id: String },
    Outcome { outcome: Option<QueryOutcome> },
    Attached,

    /// One piece of admin output on an attached connection
    Print { text: String },

    NoAddressAvailable,
    AdminAlreadyAttached,
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_serialize() {
        let json = serde_json::to_string(&RegistryRequest::Ping).unwrap();
        assert_eq!(json, r#"{"type":"Ping"}"#);
    }

    #[test]
    fn test_send_query_serialize() {
        let request = RegistryRequest::SendQuery {
            kind: QueryKind::GetStock,
            targets: vec![1, 20],
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"type":"SendQuery","kind":"get_stock","targets":[1,20]}"#);
    }

    #[test]
    fn test_bind_deserialize() {
        let json = r#"{"type":"Bind","name":"gateway_1","host":"127.0.0.1","port":6001}"#;
        let request: RegistryRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            request,
            RegistryRequest::Bind {
                name: "gateway_1".to_string(),
                host: "127.0.0.1".to_string(),
                port: 6001,
            }
        );
    }

    #[test]
    fn test_print_response() {
        let json = serde_json::to_string(&RegistryResponse::Print {
            text: "hello".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"Print","text":"hello"}"#);
    }

    #[test]
    fn test_error_response_deserialize() {
        let json = r#"{"type":"Error","message":"boom"}"#;
        let response: RegistryResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            response,
            RegistryResponse::Error {
                message: "boom".to_string()
            }
        );
    }
}
