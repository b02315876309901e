// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! `NodeStore`-level invariants driven through the public API (spec §8:
//! "NodeStore contains at most one Node per address; after AddNodes, the
//! previous Node for any replaced address is in Stopped state" plus the
//! stop-is-idempotent round-trip property).

mod common;

use std::sync::Arc;

use common::MockUpstream;
use filecoin_chain_proxy::cache::BlockHeaderCache;
use filecoin_chain_proxy::node::{Node, NodeOption, NodeState};
use filecoin_chain_proxy::node_store::NodeStore;
use filecoin_chain_proxy::types::NodeInfo;
use filecoin_chain_proxy::upstream::UpstreamClient;

fn make_node(addr: &str) -> Arc<Node> {
    let info = NodeInfo::parse(&format!("tok:{addr}")).unwrap();
    let (head_tx, _head_rx) = flume::bounded(8);
    let (err_tx, _err_rx) = flume::bounded(8);
    let mock: Arc<dyn UpstreamClient> = MockUpstream::new();
    Node::new(
        info,
        NodeOption::default(),
        mock,
        Arc::new(BlockHeaderCache::default()),
        head_tx,
        err_tx,
    )
}

#[tokio::test]
async fn at_most_one_node_per_address_and_previous_is_stopped() {
    let store = NodeStore::new();
    let addr = "/ip4/1.1.1.1/tcp/1";
    let a = make_node(addr);
    let a_prime = make_node(addr);

    let replaced = store.add_nodes(vec![Arc::clone(&a)]);
    assert!(replaced.is_empty(), "first insert at a fresh address replaces nothing");

    let replaced = store.add_nodes(vec![Arc::clone(&a_prime)]);
    assert_eq!(replaced, vec![addr.to_owned()]);

    assert_eq!(store.len(), 1);
    assert_eq!(a.state(), NodeState::Stopped);
    assert!(Arc::ptr_eq(&store.get_node(addr).unwrap(), &a_prime));
}

#[tokio::test]
async fn stopping_an_already_stopped_node_is_a_noop() {
    let node = make_node("/ip4/1.1.1.1/tcp/1");
    node.stop();
    node.stop();
    assert_eq!(node.state(), NodeState::Stopped);
}

#[tokio::test]
async fn stop_all_stops_every_registered_node_and_returns_their_addresses() {
    let store = NodeStore::new();
    let a = make_node("/ip4/1.1.1.1/tcp/1");
    let b = make_node("/ip4/2.2.2.2/tcp/1");
    store.add_nodes(vec![Arc::clone(&a), Arc::clone(&b)]);

    let mut stopped = store.stop_all();
    stopped.sort();
    let mut expected = vec!["/ip4/1.1.1.1/tcp/1".to_owned(), "/ip4/2.2.2.2/tcp/1".to_owned()];
    expected.sort();
    assert_eq!(stopped, expected);

    assert_eq!(a.state(), NodeState::Stopped);
    assert_eq!(b.state(), NodeState::Stopped);
}
