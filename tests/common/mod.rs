// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! A deterministic, network-free [`UpstreamClient`] for the crate-level
//! integration tests in this directory. Distinct from the crate's own
//! `#[cfg(test)]`-only mock (`src/upstream.rs`), which isn't visible from
//! here: integration tests link against the compiled library, not its test
//! configuration.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cid::Cid;
use filecoin_chain_proxy::types::{BlockHeader, Weight};
use filecoin_chain_proxy::upstream::{ChangeBatch, UpstreamClient};
use futures::stream::BoxStream;
use jsonrpsee::core::params::ArrayParams;
use parking_lot::Mutex;

#[derive(Default)]
pub struct MockUpstream {
    notify_failures: Mutex<usize>,
    batches: Mutex<Vec<ChangeBatch>>,
    weight: Mutex<Weight>,
    blocks: Mutex<HashMap<Cid, BlockHeader>>,
}

impl MockUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_notify_times(&self, n: usize) {
        *self.notify_failures.lock() = n;
    }

    pub fn push_batch(&self, batch: ChangeBatch) {
        self.batches.lock().push(batch);
    }

    pub fn set_weight(&self, w: Weight) {
        *self.weight.lock() = w;
    }

    pub fn insert_block(&self, header: BlockHeader) {
        self.blocks.lock().insert(header.cid, header);
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn chain_notify(&self) -> anyhow::Result<BoxStream<'static, ChangeBatch>> {
        use futures::StreamExt;
        let mut remaining = self.notify_failures.lock();
        if *remaining > 0 {
            *remaining -= 1;
            anyhow::bail!("mock chain_notify failure injected");
        }
        let batches = std::mem::take(&mut *self.batches.lock());
        Ok(futures::stream::iter(batches).boxed())
    }

    async fn chain_tipset_weight(&self, _cids: &[Cid]) -> anyhow::Result<Weight> {
        Ok(self.weight.lock().clone())
    }

    async fn chain_get_block(&self, cid: Cid) -> anyhow::Result<BlockHeader> {
        self.blocks
            .lock()
            .get(&cid)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such block in mock upstream"))
    }

    async fn call_raw(
        &self,
        _method: &str,
        _params: ArrayParams,
    ) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }
}
