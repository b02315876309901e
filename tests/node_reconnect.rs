// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Drives a [`Node`] directly (bypassing `Context`) to exercise its
//! reconnect/backoff lifecycle against a mock upstream that fails
//! `ChainNotify` a fixed number of times before succeeding (spec §8
//! scenario 4 and the `Backoff` -> `Subscribing` -> `Running` transitions
//! of spec §4.2's state table).

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::MockUpstream;
use filecoin_chain_proxy::cache::BlockHeaderCache;
use filecoin_chain_proxy::node::{Node, NodeOption, NodeState};
use filecoin_chain_proxy::types::NodeInfo;
use filecoin_chain_proxy::upstream::UpstreamClient;

#[tokio::test(start_paused = true)]
async fn node_recovers_from_repeated_subscribe_failures() {
    let mock = MockUpstream::new();
    mock.fail_notify_times(3);

    let info = NodeInfo::parse("tok:/ip4/1.1.1.1/tcp/1").unwrap();
    let opt = NodeOption {
        relisten_min_interval: Duration::from_millis(10),
        relisten_max_interval: Duration::from_millis(80),
        api_timeout: Duration::from_secs(1),
    };
    let (head_tx, _head_rx) = flume::bounded(8);
    let (err_tx, err_rx) = flume::bounded(8);
    let mock_dyn: Arc<dyn UpstreamClient> = mock;
    let node = Node::new(
        info,
        opt,
        mock_dyn,
        Arc::new(BlockHeaderCache::default()),
        head_tx,
        err_tx,
    );

    node.start();

    // Give the failing attempts time to run through backoff; each failure
    // is published on the error channel before the next retry.
    for _ in 0..3 {
        let address = tokio::time::timeout(Duration::from_secs(1), err_rx.recv_async())
            .await
            .expect("subscription failure must be reported")
            .unwrap();
        assert_eq!(address, node.key());
    }

    // Eventually the mock stops failing and the node settles into Running
    // (momentarily — with an empty batch stream it immediately loops back
    // to Subscribing, but it never returns to Backoff again).
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_ne!(node.state(), NodeState::Backoff);

    node.stop();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(node.state(), NodeState::Stopped);
}
