// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Concurrent registry of live [`Node`] instances, keyed by upstream address
//! (spec §4.3).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::node::Node;

#[derive(Default)]
pub struct NodeStore {
    nodes: RwLock<HashMap<String, Arc<Node>>>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concurrent read of a single entry.
    pub fn get_node(&self, address: &str) -> Option<Arc<Node>> {
        self.nodes.read().get(address).cloned()
    }

    /// Snapshot of currently registered addresses.
    pub fn get_hosts(&self) -> Vec<String> {
        self.nodes.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Any live node, for callers that don't care which one (the `UnSupport`
    /// façade, and `Select`'s unknown-key fallback — spec §4.4/§4.5). Skips
    /// nodes that have been individually `Stop`ped but not yet replaced or
    /// removed, so "any live node" means what it says.
    pub fn any(&self) -> Option<Arc<Node>> {
        self.nodes
            .read()
            .values()
            .find(|n| n.state() != crate::node::NodeState::Stopped)
            .cloned()
    }

    /// For each new node: if an entry already exists at that address, stop
    /// the previous instance and substitute; otherwise insert. In all cases
    /// start the new node's ingestion routine. Atomic under a single
    /// exclusive lock for the whole call (spec §4.3).
    ///
    /// Returns the addresses that were replaced, so a caller holding a
    /// [`crate::selector::Selector`] can prune their `headIndex` entries
    /// (spec §9's preferred resolution of the stopped-node pruning question
    /// — `NodeStore` itself stays decoupled from `Selector`, matching the
    /// component dependency order in spec §2).
    pub fn add_nodes(&self, nodes: Vec<Arc<Node>>) -> Vec<String> {
        let mut guard = self.nodes.write();
        let mut replaced = Vec::new();
        for node in nodes {
            let key = node.key().to_owned();
            if let Some(previous) = guard.insert(key.clone(), Arc::clone(&node)) {
                info!(address = %key, "replacing upstream node");
                previous.stop();
                replaced.push(key);
            }
            node.start();
        }
        replaced
    }

    /// Stops every registered node. Complete when every ingestion routine
    /// has returned its cancellation token's cancel (the routines themselves
    /// may still be unwinding on their own tasks, per spec §5's shutdown
    /// description).
    pub fn stop_all(&self) -> Vec<String> {
        let guard = self.nodes.read();
        for node in guard.values() {
            node.stop();
        }
        guard.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::cache::BlockHeaderCache;
    use crate::node::NodeOption;
    use crate::types::NodeInfo;
    use crate::upstream::mock::MockUpstream;

    use super::*;

    fn make_node(addr: &str) -> Arc<Node> {
        let info = NodeInfo::parse(&format!("tok:{addr}")).unwrap();
        let (head_tx, _head_rx) = flume::bounded(8);
        let (err_tx, _err_rx) = flume::bounded(8);
        Node::new(
            info,
            NodeOption::default(),
            Arc::new(MockUpstream::new()),
            Arc::new(BlockHeaderCache::default()),
            head_tx,
            err_tx,
        )
    }

    #[tokio::test]
    async fn at_most_one_node_per_address() {
        let store = NodeStore::new();
        let a = make_node("/ip4/127.0.0.1/tcp/1");
        store.add_nodes(vec![Arc::clone(&a)]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_node(a.key()).unwrap().key(), a.key());
    }

    #[tokio::test]
    async fn replacement_stops_the_previous_node() {
        let store = NodeStore::new();
        let addr = "/ip4/127.0.0.1/tcp/1";
        let a = make_node(addr);
        let a_prime = make_node(addr);

        store.add_nodes(vec![Arc::clone(&a)]);
        store.add_nodes(vec![Arc::clone(&a_prime)]);

        assert_eq!(store.len(), 1);
        assert_eq!(a.state(), crate::node::NodeState::Stopped);
        assert!(Arc::ptr_eq(&store.get_node(addr).unwrap(), &a_prime));
    }

    #[tokio::test]
    async fn stopping_an_already_stopped_node_is_a_noop() {
        let a = make_node("/ip4/127.0.0.1/tcp/1");
        a.stop();
        a.stop();
        assert_eq!(a.state(), crate::node::NodeState::Stopped);
    }
}
