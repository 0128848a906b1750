//! End-to-end fleet tests over the in-process network
//!
//! Each test spawns its own manager and nodes on a private `LocalNet`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{BASE_PORT, Fleet, HOST, endpoint, eventually, options};
use tokio::sync::watch;
use vendfleet::admin::{AdminConsole, MemorySink};
use vendfleet::manager::{ManagerConfig, ManagerError, NO_LOGS, gateway_binding};
use vendfleet::node::{Node, NodeError, NodeState, Upstream};
use vendfleet::protocol::{Frame, QueryKind, Status};
use vendfleet::transport::{Endpoint, Inbox};
use vendfleet::{ManagerApi, NodeKind};

// =============================================================================
// Attachment
// =============================================================================

#[tokio::test]
async fn test_ring_addresses_until_exhausted() {
    let fleet = Fleet::new(4, 2, 3);

    assert_eq!(fleet.manager.allocate_gateway_address().await.unwrap(), 1);
    assert_eq!(fleet.manager.allocate_gateway_address().await.unwrap(), 20);
    assert_eq!(
        fleet.manager.allocate_gateway_address().await,
        Err(ManagerError::NoAddressAvailable)
    );

    assert!(fleet.manager.free_address(20).await.unwrap());
    assert!(!fleet.manager.free_address(20).await.unwrap());
    assert_eq!(fleet.manager.allocate_gateway_address().await.unwrap(), 20);
    assert_eq!(fleet.manager.connected_distributors().await.unwrap(), vec![1, 20]);
}

#[tokio::test]
async fn test_direct_attach_notice_and_log() {
    let fleet = Fleet::new(4, 2, 3);
    fleet.handle.notify_attach(7).await.unwrap();
    fleet.handle.notify_attach(43).await.unwrap();
    fleet.handle.append_log(7, "manual entry").await.unwrap();

    assert_eq!(fleet.manager.connected_distributors().await.unwrap(), vec![7]);
    assert_eq!(fleet.manager.display_logs().await.unwrap(), vec!["manual entry"]);
    assert_eq!(fleet.handle.metrics().await.unwrap().logs_recorded, 1);

    fleet.handle.shutdown().await.unwrap();
    let handle = fleet.handle.clone();
    assert!(eventually(|| std::future::ready(handle.is_closed())).await);
}

#[tokio::test]
async fn test_third_ring_gateway_is_refused() {
    let mut fleet = Fleet::new(4, 2, 3);
    fleet.ring_gateway().await;
    fleet.ring_gateway().await;

    let result = Node::attach(
        options(NodeKind::Gateway),
        Upstream::Manager(fleet.manager.clone()),
        fleet.net.clone(),
    )
    .await;
    assert!(matches!(result, Err(NodeError::NoAddressAvailable(_))));
}

#[tokio::test]
async fn test_attach_builds_the_tree() {
    let mut fleet = Fleet::new(4, 2, 3);

    let ring = fleet.ring_gateway().await;
    assert_eq!(ring.id(), 1);
    assert_eq!(ring.state().await, NodeState::Ready);
    let interval = ring.interval().await.unwrap();
    assert_eq!(interval.devices().collect::<Vec<_>>(), vec![16, 17, 18, 19]);

    let device = fleet.child(&ring, NodeKind::Device).await;
    assert_eq!(device.id(), 16);
    assert_eq!(device.state().await, NodeState::Attached);
    assert_eq!(device.endpoint(), &Endpoint::new(HOST, BASE_PORT + 16));

    let gateway = fleet.child(&ring, NodeKind::Gateway).await;
    assert_eq!(gateway.id(), 2);
    assert_eq!(gateway.state().await, NodeState::Ready);

    let leaf_device = fleet.child(&gateway, NodeKind::Device).await;
    assert_eq!(leaf_device.id(), 5);

    assert_eq!(ring.children().await, (vec![16], vec![2]));
    assert_eq!(gateway.children().await, (vec![5], vec![]));

    let manager = fleet.manager.clone();
    assert!(
        eventually(|| {
            let manager = manager.clone();
            async move { manager.connected_distributors().await.unwrap() == vec![1, 2, 5, 16] }
        })
        .await
    );
}

#[tokio::test]
async fn test_child_slots_run_out() {
    // One device slot under gateway 1
    let mut fleet = Fleet::new(1, 1, 2);
    let ring = fleet.ring_gateway().await;
    let device = fleet.child(&ring, NodeKind::Device).await;
    assert_eq!(device.id(), 3);

    let result = Node::attach(
        options(NodeKind::Device),
        Upstream::Gateway(ring.endpoint().clone()),
        fleet.net.clone(),
    )
    .await;
    assert!(matches!(result, Err(NodeError::NoAddressAvailable(_))));
}

#[tokio::test]
async fn test_gateway_at_full_depth_is_a_leaf() {
    let mut fleet = Fleet::new(1, 1, 2);
    let ring = fleet.ring_gateway().await;
    assert_eq!(ring.state().await, NodeState::Ready);

    let gateway = fleet.child(&ring, NodeKind::Gateway).await;
    assert_eq!(gateway.id(), 2);
    assert_eq!(gateway.state().await, NodeState::Attached);
    assert_eq!(gateway.interval().await, None);
    assert_eq!(gateway.children().await, (vec![], vec![]));
}

#[tokio::test]
async fn test_attach_times_out_without_parent_reply() {
    let fleet = Fleet::new(4, 2, 3);
    let _silent_parent = fleet.net.bind(&endpoint(1)).await.unwrap();

    let mut options = options(NodeKind::Device);
    options.attach_timeout = Duration::from_millis(100);
    let result = Node::attach(options, Upstream::Gateway(endpoint(1)), fleet.net.clone()).await;
    assert!(matches!(result, Err(NodeError::AttachTimeout(_))));
}

// =============================================================================
// Queries
// =============================================================================

#[tokio::test]
async fn test_query_bucketing_reports_missing_ring_gateway() {
    let mut fleet = Fleet::new(4, 2, 3);
    fleet.ring_gateway().await;

    let query_id = fleet.manager.send_query(QueryKind::GetStock, vec![1, 20]).await.unwrap();
    let outcome = fleet.manager.wait_for_query(&query_id).await.unwrap().unwrap();

    assert_eq!(outcome.query_id, query_id);
    assert_eq!(outcome.targets, vec![1, 20]);
    assert_eq!(outcome.replies.len(), 2);
    assert!(!outcome.timed_out);
    assert!(outcome.missing.is_empty());
    assert!(outcome.rendered.contains(" Soda |"));
    assert!(outcome.rendered.contains(" Distributor #1   |    2 |"));
    assert!(outcome.rendered.contains("Not connected: 20"));
}

#[tokio::test]
async fn test_root_device_slots_are_not_connected() {
    let mut fleet = Fleet::new(4, 2, 3);
    fleet.ring_gateway().await;

    let query_id = fleet.manager.send_query(QueryKind::GetMoney, vec![40, 99]).await.unwrap();
    let outcome = fleet.manager.wait_for_query(&query_id).await.unwrap().unwrap();

    assert_eq!(outcome.targets, vec![40]);
    assert_eq!(outcome.replies.len(), 1);
    let frame = Frame::decode(&outcome.replies[0]).unwrap();
    assert_eq!(frame.reply_source(), Some((Status::NotConnected, Some(40))));
    assert!(outcome.rendered.starts_with("Unable to get the distributors money"));
}

#[tokio::test]
async fn test_query_fans_out_and_alerts_reach_the_ledger() {
    let mut fleet = Fleet::new(4, 2, 3);
    let ring = fleet.ring_gateway().await;
    let device = fleet.child(&ring, NodeKind::Device).await;
    let gateway = fleet.child(&ring, NodeKind::Gateway).await;
    let leaf = fleet.child(&gateway, NodeKind::Device).await;
    assert_eq!((device.id(), gateway.id(), leaf.id()), (16, 2, 5));

    device.purchase(1).await.unwrap();
    let receipt = device.purchase(1).await.unwrap();
    assert_eq!(receipt.money_cents, 6_000);
    assert!(matches!(device.purchase(1).await, Err(NodeError::Vending(_))));

    let manager = fleet.manager.clone();
    assert!(
        eventually(|| {
            let manager = manager.clone();
            async move { manager.display_logs().await.unwrap().len() == 3 }
        })
        .await
    );
    let logs = fleet.manager.display_logs().await.unwrap();
    assert!(logs[0].ends_with("Distributor #16 : The stock is low for Soda"));
    assert!(logs[1].ends_with("Distributor #16 : The stock is low for Soda"));
    assert!(logs[2].ends_with("Distributor #16 : Too much money in the Distributor"));

    let query_id = fleet
        .manager
        .send_query(QueryKind::GetMoney, vec![16, 9, 5, 2, 1, 16])
        .await
        .unwrap();
    let outcome = fleet.manager.wait_for_query(&query_id).await.unwrap().unwrap();

    assert_eq!(outcome.targets, vec![1, 2, 5, 9, 16]);
    assert_eq!(outcome.replies.len(), 5);
    assert!(!outcome.timed_out);
    assert!(outcome.rendered.contains(" Distributor #16  |  60.00€"));
    assert!(outcome.rendered.contains(" Distributor #5   |  0.00€"));
    assert!(outcome.rendered.contains("Not connected: 9"));
}

#[tokio::test]
async fn test_silent_node_times_the_query_out() {
    let config = ManagerConfig {
        query_timeout_ms: 300,
        ..Default::default()
    };
    let mut fleet = Fleet::with_config(4, 2, 3, config);
    let ring = fleet.ring_gateway().await;

    // Claim slot 16 by hand and never answer on it
    let mut handshake = fleet.net.bind(&Endpoint::ephemeral(HOST)).await.unwrap();
    let request = Frame::QueryGetNodeId {
        reply_address: HOST.to_string(),
        reply_port: handshake.endpoint().port,
        device_type: NodeKind::Device,
    };
    fleet
        .net
        .send_to(&request.encode().unwrap(), ring.endpoint())
        .await
        .unwrap();
    let reply = Frame::decode(&handshake.recv().await.unwrap()).unwrap();
    assert_eq!(reply, Frame::ReplyGetNodeId { node_id: 16 });
    let _silent = fleet.net.bind(&endpoint(16)).await.unwrap();

    let device = fleet.child(&ring, NodeKind::Device).await;
    assert_eq!(device.id(), 17);

    let query_id = fleet.manager.send_query(QueryKind::GetMoney, vec![1, 16, 17]).await.unwrap();
    let outcome = fleet.manager.wait_for_query(&query_id).await.unwrap().unwrap();

    assert!(outcome.timed_out);
    assert_eq!(outcome.replies.len(), 2);
    assert_eq!(outcome.missing, vec![16]);
    assert!(outcome.rendered.contains("No reply before timeout from node(s): 16"));
    assert!(!outcome.rendered.contains("Distributor #16"));

    let metrics = fleet.handle.metrics().await.unwrap();
    assert_eq!(metrics.queries_timed_out, 1);
    assert_eq!(metrics.queries_completed, 0);
}

#[tokio::test]
async fn test_concurrent_queries_run_one_at_a_time() {
    let mut fleet = Fleet::new(4, 2, 3);
    let ring = fleet.ring_gateway().await;
    fleet.child(&ring, NodeKind::Device).await;

    let mut tasks = Vec::new();
    for kind in [QueryKind::GetStock, QueryKind::GetMoney, QueryKind::GetStock] {
        let manager = fleet.manager.clone();
        tasks.push(tokio::spawn(async move {
            let query_id = manager.send_query(kind, vec![1, 16]).await.unwrap();
            let outcome = manager.wait_for_query(&query_id).await.unwrap().unwrap();
            (kind, outcome)
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        let (kind, outcome) = task.await.unwrap();
        assert_eq!(outcome.kind, kind);
        assert_eq!(outcome.replies.len(), 2);
        for raw in &outcome.replies {
            assert_eq!(Frame::decode(raw).unwrap().reply_kind(), Some(kind));
        }
        ids.push(outcome.query_id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);

    let metrics = fleet.handle.metrics().await.unwrap();
    assert_eq!(metrics.queries_started, 3);
    assert_eq!(metrics.queries_completed, 3);
}

#[tokio::test]
async fn test_late_reply_does_not_leak_into_next_query() {
    let config = ManagerConfig {
        query_timeout_ms: 300,
        ..Default::default()
    };
    let fleet = Fleet::with_config(4, 2, 3, config);
    let manager = fleet.manager.clone();

    // A ring gateway that takes queries and never forwards them
    assert_eq!(manager.allocate_gateway_address().await.unwrap(), 1);
    let mut gateway = fleet.net.bind(&endpoint(1)).await.unwrap();
    manager.bind(&gateway_binding(1), endpoint(1)).await.unwrap();

    let first = manager.send_query(QueryKind::GetMoney, vec![2]).await.unwrap();
    let outcome = manager.wait_for_query(&first).await.unwrap().unwrap();
    assert!(outcome.timed_out);
    assert_eq!(outcome.missing, vec![2]);
    let forwarded = Frame::decode(&gateway.recv().await.unwrap()).unwrap();
    assert_eq!(forwarded, QueryKind::GetMoney.request(vec![2]));

    let second = manager.send_query(QueryKind::GetMoney, vec![1, 3]).await.unwrap();
    let forwarded = Frame::decode(&gateway.recv().await.unwrap()).unwrap();
    assert_eq!(forwarded, QueryKind::GetMoney.request(vec![1, 3]));

    // Late reply to the first query, a node outside the targets, then a duplicate
    for frame in [
        Frame::money_reply(2, 999),
        Frame::money_reply(20, 500),
        Frame::money_reply(1, 120),
        Frame::money_reply(1, 120),
    ] {
        manager.receive_reply(frame.encode().unwrap()).await.unwrap();
    }

    let metrics = fleet.handle.metrics().await.unwrap();
    assert_eq!(metrics.frames_dropped, 3);
    assert_eq!(metrics.replies_received, 1);
    assert_eq!(metrics.queries_completed, 0);

    manager
        .receive_reply(Frame::money_reply(3, 0).encode().unwrap())
        .await
        .unwrap();
    let outcome = manager.wait_for_query(&second).await.unwrap().unwrap();

    assert!(!outcome.timed_out);
    assert!(outcome.missing.is_empty());
    assert_eq!(outcome.replies.len(), 2);
    let sources: Vec<_> = outcome
        .replies
        .iter()
        .filter_map(|raw| Frame::decode(raw).unwrap().reply_source()?.1)
        .collect();
    assert_eq!(sources, vec![1, 3]);
    assert!(!outcome.rendered.contains("Distributor #2 "));
    assert!(!outcome.rendered.contains("Distributor #20"));
    assert!(outcome.rendered.contains(" Distributor #1   |  1.20€"));
}

#[tokio::test]
async fn test_wait_when_idle_returns_last_outcome() {
    let mut fleet = Fleet::new(4, 2, 3);
    fleet.ring_gateway().await;
    assert_eq!(fleet.manager.wait_for_end_query().await.unwrap(), None);

    let query_id = fleet.manager.send_query(QueryKind::GetStock, vec![1]).await.unwrap();
    let first = fleet.manager.wait_for_query(&query_id).await.unwrap().unwrap();
    let last = fleet.manager.wait_for_end_query().await.unwrap().unwrap();
    assert_eq!(first, last);
    assert_eq!(fleet.manager.wait_for_query("unknown").await.unwrap(), None);
}

#[tokio::test]
async fn test_stopped_ring_gateway_is_not_connected() {
    let mut fleet = Fleet::new(4, 2, 3);
    let ring = fleet.ring_gateway().await;
    ring.shutdown().await;
    fleet.stop(1);
    assert_eq!(ring.state().await, NodeState::Dead);

    let query_id = fleet.manager.send_query(QueryKind::GetStock, vec![1]).await.unwrap();
    let outcome = fleet.manager.wait_for_query(&query_id).await.unwrap().unwrap();
    assert!(!outcome.timed_out);
    assert!(outcome.rendered.contains("Not connected: 1"));
}

// =============================================================================
// Node wire behaviour
// =============================================================================

/// Attach device 16 under a hand-driven parent at gateway 1's endpoint
async fn device_under_fake_parent(fleet: &Fleet) -> (Arc<Node>, Inbox, watch::Sender<bool>) {
    let mut parent = fleet.net.bind(&endpoint(1)).await.unwrap();
    let attach = tokio::spawn(Node::attach(
        options(NodeKind::Device),
        Upstream::Gateway(endpoint(1)),
        fleet.net.clone(),
    ));

    match Frame::decode(&parent.recv().await.unwrap()).unwrap() {
        Frame::QueryGetNodeId {
            reply_address,
            reply_port,
            device_type,
        } => {
            assert_eq!(device_type, NodeKind::Device);
            let reply = Frame::ReplyGetNodeId { node_id: 16 }.encode().unwrap();
            fleet
                .net
                .send_to(&reply, &Endpoint::new(reply_address, reply_port))
                .await
                .unwrap();
        }
        other => panic!("unexpected frame {:?}", other),
    }

    let (node, inbox) = attach.await.unwrap().unwrap();
    assert_eq!(
        Frame::decode(&parent.recv().await.unwrap()).unwrap(),
        Frame::NewNodeConnexion { node_id: 16 }
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(node.clone().run(inbox, stop_rx));
    (node, parent, stop_tx)
}

#[tokio::test]
async fn test_untargeted_device_replies_bad_request() {
    let fleet = Fleet::new(4, 2, 3);
    let (node, mut parent, _stop) = device_under_fake_parent(&fleet).await;
    assert_eq!(node.id(), 16);

    let query = QueryKind::GetMoney.request(vec![3]).encode().unwrap();
    fleet.net.send_to(&query, &endpoint(16)).await.unwrap();

    let reply = Frame::decode(&parent.recv().await.unwrap()).unwrap();
    assert_eq!(reply.reply_source(), Some((Status::BadRequest, Some(16))));
    assert_eq!(reply.reply_kind(), Some(QueryKind::GetMoney));
}

#[tokio::test]
async fn test_unknown_query_is_dropped() {
    let fleet = Fleet::new(4, 2, 3);
    let (_node, mut parent, _stop) = device_under_fake_parent(&fleet).await;

    fleet
        .net
        .send_to(r#"{"query":"query_reboot","node_id":16}"#, &endpoint(16))
        .await
        .unwrap();
    fleet.net.send_to("not json", &endpoint(16)).await.unwrap();
    let query = QueryKind::GetStock.request(vec![16]).encode().unwrap();
    fleet.net.send_to(&query, &endpoint(16)).await.unwrap();

    let reply = Frame::decode(&parent.recv().await.unwrap()).unwrap();
    assert_eq!(reply.reply_source(), Some((Status::Connected, Some(16))));
    assert_eq!(reply.reply_kind(), Some(QueryKind::GetStock));
}

#[tokio::test]
async fn test_refused_address_fails_attach() {
    let fleet = Fleet::new(4, 2, 3);
    let mut parent = fleet.net.bind(&endpoint(1)).await.unwrap();
    let attach = tokio::spawn(Node::attach(
        options(NodeKind::Gateway),
        Upstream::Gateway(endpoint(1)),
        fleet.net.clone(),
    ));

    if let Frame::QueryGetNodeId {
        reply_address,
        reply_port,
        ..
    } = Frame::decode(&parent.recv().await.unwrap()).unwrap()
    {
        let reply = Frame::ReplyGetNodeId { node_id: -1 }.encode().unwrap();
        fleet
            .net
            .send_to(&reply, &Endpoint::new(reply_address, reply_port))
            .await
            .unwrap();
    }

    assert!(matches!(attach.await.unwrap(), Err(NodeError::NoAddressAvailable(_))));
}

// =============================================================================
// Admin console
// =============================================================================

#[tokio::test]
async fn test_admin_console_commands() {
    let mut fleet = Fleet::new(4, 2, 3);
    let ring = fleet.ring_gateway().await;
    fleet.child(&ring, NodeKind::Device).await;

    let sink = Arc::new(MemorySink::new());
    fleet.handle.attach_admin(sink.clone()).await.unwrap();
    assert_eq!(
        fleet.handle.attach_admin(Arc::new(MemorySink::new())).await,
        Err(ManagerError::AdminAlreadyAttached)
    );

    let manager = fleet.manager.clone();
    assert!(
        eventually(|| {
            let manager = manager.clone();
            async move { manager.connected_distributors().await.unwrap() == vec![1, 16] }
        })
        .await
    );

    let console = AdminConsole::new(fleet.manager.clone()).await.unwrap();

    let response = console.execute_line("logs").await.unwrap();
    assert!(response.lines.is_empty());
    assert_eq!(sink.lines().await, vec![NO_LOGS.to_string()]);

    let response = console.execute_line("get_stock all").await.unwrap();
    let outcome = response.outcome.unwrap();
    assert_eq!(outcome.targets, vec![1, 16]);
    assert_eq!(sink.lines().await.last(), Some(&outcome.rendered));

    let response = console.execute_line("get_money x 99").await.unwrap();
    assert!(response.outcome.is_none());
    assert_eq!(response.lines, vec!["x is not a number", "Node 99 doesn't exist!"]);

    let response = console.execute_line("free 16").await.unwrap();
    assert_eq!(response.lines, vec!["NodeID 16 is released"]);
    let response = console.execute_line("free 16").await.unwrap();
    assert_eq!(response.lines, vec!["Unknown NodeID to free: 16"]);

    let response = console.execute_line("dance").await.unwrap();
    assert_eq!(response.lines, vec!["Command not found !"]);
    assert!(console.execute_line("quit").await.unwrap().quit);
}
