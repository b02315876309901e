// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The method-shim layer: for each exposed RPC method, resolve a
//! `TipSetKey` (or the empty key, meaning "latest") to a live upstream via
//! the [`Selector`], forward the call, and surface failures wrapped with the
//! method name (spec §4.5). Only a representative slice of the pass-through
//! surface is implemented here; the remaining hundreds of mechanical shims
//! share the same `select_and_forward` plumbing and are omitted as
//! boilerplate, matching spec §1's framing of the dispatch layer as a
//! non-goal of this core.

use std::sync::Arc;

use cid::Cid;
use jsonrpsee::core::params::ArrayParams;
use serde::de::DeserializeOwned;

use crate::context::Context;
use crate::error::ProxyError;
use crate::node::Node;
use crate::types::{BlockHeader, TipSet, TipSetKey};

/// The mechanical shim layer sitting in front of a [`Context`]. Cheap to
/// clone: it is just a handle.
#[derive(Clone)]
pub struct Proxy {
    ctx: Arc<Context>,
}

impl Proxy {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Resolves `key` to a live [`Node`] via the selector. Shared by every
    /// concrete shim below.
    async fn select(&self, method: &'static str, key: &TipSetKey) -> Result<Arc<Node>, ProxyError> {
        let address = self
            .ctx
            .selector
            .select(key)
            .map_err(|e| ProxyError::selection(method, e))?;
        self.ctx
            .node_store
            .get_node(&address)
            .ok_or_else(|| ProxyError::forward(method, "selected node no longer registered"))
    }

    /// Selects an upstream for `key`, forwards `method(params)` to it
    /// verbatim, and deserializes the result. The pattern every mechanical
    /// pass-through shim follows (spec §4.5 steps 1-4).
    async fn select_and_forward<T: DeserializeOwned>(
        &self,
        method: &'static str,
        key: &TipSetKey,
        params: ArrayParams,
    ) -> Result<T, ProxyError> {
        let node = self.select(method, key).await?;
        let value = node
            .upstream()
            .call_raw(method, params)
            .await
            .map_err(|e| ProxyError::forward(method, e))?;
        serde_json::from_value(value).map_err(|e| ProxyError::forward(method, e))
    }

    /// `Filecoin.ChainHead` — no TipSetKey argument, always routes by the
    /// empty key (spec §6).
    pub async fn chain_head(&self) -> Result<serde_json::Value, ProxyError> {
        self.select_and_forward("Filecoin.ChainHead", &TipSetKey::empty(), ArrayParams::new())
            .await
    }

    /// `Filecoin.ChainGetBlock` — routed by the empty key (the call takes a
    /// CID, not a TipSetKey), but served through the selected [`Node`]'s
    /// cache-aware lookup rather than a raw forward, so a header already
    /// seen via `ChainNotify` never costs a second round-trip (spec §4.1).
    pub async fn chain_get_block(&self, cid: Cid) -> Result<BlockHeader, ProxyError> {
        let node = self.select("Filecoin.ChainGetBlock", &TipSetKey::empty()).await?;
        node.load_block_header(cid)
            .await
            .map_err(|e| ProxyError::forward("Filecoin.ChainGetBlock", e))
    }

    /// `Filecoin.ChainGetTipSet` — routed by the caller-supplied key, served
    /// through the selected `Node`'s tipset reconstruction.
    pub async fn chain_get_tipset(&self, key: TipSetKey) -> Result<TipSet, ProxyError> {
        let node = self.select("Filecoin.ChainGetTipSet", &key).await?;
        node.load_tipset(&key)
            .await
            .map_err(|e| ProxyError::forward("Filecoin.ChainGetTipSet", e))
    }

    /// `Filecoin.StateGetActor` — a representative key-aware pass-through:
    /// extracts the caller's TipSetKey, forwards verbatim, no semantic
    /// awareness beyond routing (spec §4.5's "pick an upstream, forward,
    /// return").
    pub async fn state_get_actor(
        &self,
        actor_address: &str,
        key: TipSetKey,
    ) -> Result<serde_json::Value, ProxyError> {
        let mut params = ArrayParams::new();
        params
            .insert(actor_address)
            .map_err(|e| ProxyError::forward("Filecoin.StateGetActor", e))?;
        params
            .insert(key.cids())
            .map_err(|e| ProxyError::forward("Filecoin.StateGetActor", e))?;
        self.select_and_forward("Filecoin.StateGetActor", &key, params)
            .await
    }
}

/// Fallback façade for methods the proxy has no semantic route for: always
/// picks any live node and forwards, preserving API-surface completeness
/// without pretending to a load-balancing policy it doesn't have (spec
/// §4.5, `original_source/proxy/unsupport.go`).
#[derive(Clone)]
pub struct UnSupport {
    ctx: Arc<Context>,
}

impl UnSupport {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    async fn any_node(&self, method: &'static str) -> Result<Arc<Node>, ProxyError> {
        self.ctx
            .node_store
            .any()
            .ok_or_else(|| ProxyError::forward(method, "no live upstream"))
    }

    async fn forward(
        &self,
        method: &'static str,
        params: ArrayParams,
    ) -> Result<serde_json::Value, ProxyError> {
        let node = self.any_node(method).await?;
        node.upstream()
            .call_raw(method, params)
            .await
            .map_err(|e| ProxyError::forward(method, e))
    }

    pub async fn auth_new(&self, perms: &[&str]) -> Result<serde_json::Value, ProxyError> {
        let mut params = ArrayParams::new();
        params
            .insert(perms)
            .map_err(|e| ProxyError::forward("Filecoin.AuthNew", e))?;
        self.forward("Filecoin.AuthNew", params).await
    }

    pub async fn net_peers(&self) -> Result<serde_json::Value, ProxyError> {
        self.forward("Filecoin.NetPeers", ArrayParams::new()).await
    }

    pub async fn wallet_new(&self, key_type: &str) -> Result<serde_json::Value, ProxyError> {
        let mut params = ArrayParams::new();
        params
            .insert(key_type)
            .map_err(|e| ProxyError::forward("Filecoin.WalletNew", e))?;
        self.forward("Filecoin.WalletNew", params).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::node::NodeOption;
    use crate::node_store::NodeStore;
    use crate::selector::Selector;
    use crate::types::NodeInfo;
    use crate::upstream::mock::MockUpstream;

    fn ctx_with_node(addr: &str, mock: Arc<MockUpstream>) -> (Arc<Context>, Arc<Node>) {
        let node_store = Arc::new(NodeStore::new());
        let selector = Arc::new(Selector::new(Arc::clone(&node_store)));
        let info = NodeInfo::parse(&format!("tok:{addr}")).unwrap();
        let (head_tx, _head_rx) = flume::bounded(8);
        let (err_tx, _err_rx) = flume::bounded(8);
        let node = Node::new(
            info,
            NodeOption::default(),
            mock,
            Arc::new(crate::cache::BlockHeaderCache::default()),
            head_tx,
            err_tx,
        );
        node_store.add_nodes(vec![Arc::clone(&node)]);
        let ctx = Context::for_test(node_store, selector);
        (ctx, node)
    }

    #[tokio::test]
    async fn unsupport_forwards_to_any_live_node() {
        let mock = Arc::new(MockUpstream::new());
        mock.set_raw_response("Filecoin.NetPeers", json!([{"ID": "peer-1"}]));
        let (ctx, _node) = ctx_with_node("/ip4/1.1.1.1/tcp/1", mock);

        let unsupport = UnSupport::new(ctx);
        let result = unsupport.net_peers().await.unwrap();
        assert_eq!(result, json!([{"ID": "peer-1"}]));
    }

    #[tokio::test]
    async fn selection_failure_is_wrapped_with_method_name() {
        let node_store = Arc::new(NodeStore::new());
        let selector = Arc::new(Selector::new(Arc::clone(&node_store)));
        let ctx = Context::for_test(node_store, selector);

        let proxy = Proxy::new(ctx);
        let err = proxy.chain_head().await.unwrap_err();
        assert!(err.to_string().contains("Filecoin.ChainHead"));
    }
}
