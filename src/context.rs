// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Process-wide coordination object: owns the head-candidate and error
//! channels, the [`BlockHeaderCache`], the [`NodeStore`], and the
//! [`Selector`], and wires new upstreams into all of them (spec §2 "shared
//! bus").

use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::BlockHeaderCache;
use crate::config::ProxyConfig;
use crate::node::{Node, NodeOption};
use crate::node_store::NodeStore;
use crate::selector::Selector;
use crate::types::{HeadCandidate, NodeInfo};
use crate::upstream::UpstreamClient;

/// Bound on the shared head-candidate/error channels. The spec models these
/// as unbounded Go channels but also specifies a slow-consumer warning
/// (§4.2) that only makes sense for a bounded channel — see `SPEC_FULL.md`
/// §2.
const CHANNEL_CAPACITY: usize = 256;

pub struct Context {
    pub cache: Arc<BlockHeaderCache>,
    pub node_store: Arc<NodeStore>,
    pub selector: Arc<Selector>,
    node_opt: NodeOption,
    head_tx: flume::Sender<HeadCandidate>,
    err_tx: flume::Sender<String>,
    err_rx: flume::Receiver<String>,
}

impl Context {
    pub fn new(node_opt: NodeOption) -> Arc<Self> {
        let (head_tx, head_rx) = flume::bounded(CHANNEL_CAPACITY);
        let (err_tx, err_rx) = flume::bounded(CHANNEL_CAPACITY);
        let node_store = Arc::new(NodeStore::new());
        let selector = Arc::new(Selector::new(Arc::clone(&node_store)));

        let ctx = Arc::new(Self {
            cache: Arc::new(BlockHeaderCache::default()),
            node_store,
            selector,
            node_opt,
            head_tx,
            err_tx,
            err_rx,
        });

        ctx.spawn_selector_drain(head_rx);
        ctx.spawn_error_observer();
        ctx
    }

    /// The single consumer of the shared head-candidate channel (spec §4.4
    /// "single writer"). Updates are applied strictly in arrival order.
    fn spawn_selector_drain(self: &Arc<Self>, head_rx: flume::Receiver<HeadCandidate>) {
        let selector = Arc::clone(&self.selector);
        tokio::spawn(async move {
            while let Ok(candidate) = head_rx.recv_async().await {
                selector.observe(candidate);
            }
        });
    }

    /// Forwards failing-subscription notices onto `tracing`, standing in for
    /// the external observability/monitoring sink spec §6 describes as out
    /// of scope for this core.
    fn spawn_error_observer(self: &Arc<Self>) {
        let err_rx = self.err_rx.clone();
        tokio::spawn(async move {
            while let Ok(address) = err_rx.recv_async().await {
                warn!(%address, "upstream subscription failing");
            }
        });
    }

    /// Connects to each configured upstream and registers it, stopping and
    /// replacing any previous node at the same address (spec §4.1's
    /// `NodeStore.AddNodes`).
    pub async fn connect_all(
        self: &Arc<Self>,
        infos: Vec<NodeInfo>,
        connect: impl Fn(&NodeInfo) -> Arc<dyn UpstreamClient>,
    ) {
        let mut nodes = Vec::with_capacity(infos.len());
        for info in infos {
            let upstream = connect(&info);
            info!(address = %info.key(), "connecting upstream");
            nodes.push(Node::new(
                info,
                self.node_opt,
                upstream,
                Arc::clone(&self.cache),
                self.head_tx.clone(),
                self.err_tx.clone(),
            ));
        }
        let replaced = self.node_store.add_nodes(nodes);
        for address in replaced {
            self.selector.forget_node(&address);
        }
    }

    /// Builds a `Context` from a loaded [`ProxyConfig`] and a constructor for
    /// turning each `NodeInfo` into a live upstream client (kept generic so
    /// tests can substitute `MockUpstream`).
    pub async fn from_config(
        config: &ProxyConfig,
        connect: impl Fn(&NodeInfo) -> Arc<dyn UpstreamClient>,
    ) -> Arc<Self> {
        let ctx = Self::new(config.node_option());
        ctx.connect_all(config.upstreams.clone(), connect).await;
        ctx
    }

    pub fn shutdown(&self) {
        for address in self.node_store.stop_all() {
            self.selector.forget_node(&address);
        }
    }

    /// Builds a `Context` around a pre-populated `NodeStore`/`Selector`
    /// pair, skipping the channel-drain plumbing — for proxy-façade tests
    /// that only need a `node_store`/`selector` to route through.
    #[cfg(test)]
    pub fn for_test(node_store: Arc<NodeStore>, selector: Arc<Selector>) -> Arc<Self> {
        let (head_tx, _head_rx) = flume::bounded(CHANNEL_CAPACITY);
        let (err_tx, err_rx) = flume::bounded(CHANNEL_CAPACITY);
        Arc::new(Self {
            cache: Arc::new(BlockHeaderCache::default()),
            node_store,
            selector,
            node_opt: NodeOption::default(),
            head_tx,
            err_tx,
            err_rx,
        })
    }
}
