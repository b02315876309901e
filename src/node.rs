// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! A live handle to one upstream full node: owns its streaming `ChainNotify`
//! subscription, reconnects with capped exponential backoff on failure, and
//! turns each batch's last `Apply`/`Current` entry into a [`HeadCandidate`]
//! fed to the pool-wide selector (spec §4.2).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use cid::Cid;
use futures::StreamExt;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::BlockHeaderCache;
use crate::error::{NodeError, TipSetError};
use crate::types::{BlockHeader, HeadCandidate, HeadChangeKind, NodeInfo, TipSet, TipSetKey};
use crate::upstream::UpstreamClient;

/// Tunables from spec §6's configuration table.
#[derive(Debug, Clone, Copy)]
pub struct NodeOption {
    pub relisten_min_interval: Duration,
    pub relisten_max_interval: Duration,
    pub api_timeout: Duration,
}

impl Default for NodeOption {
    fn default() -> Self {
        Self {
            relisten_min_interval: Duration::from_secs(4),
            relisten_max_interval: Duration::from_secs(32),
            api_timeout: Duration::from_secs(10),
        }
    }
}

/// Observable lifecycle state (spec §4.2's state table). Tests assert on
/// this to verify transitions without racing the real network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeState {
    Connecting = 0,
    Subscribing = 1,
    Running = 2,
    Backoff = 3,
    Stopped = 4,
}

impl From<u8> for NodeState {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Subscribing,
            2 => Self::Running,
            3 => Self::Backoff,
            _ => Self::Stopped,
        }
    }
}

/// One upstream full node. Uniquely owned by a [`crate::node_store::NodeStore`]
/// under its address key; replacement stops the previous instance first.
pub struct Node {
    pub info: NodeInfo,
    key: String,
    opt: NodeOption,
    upstream: Arc<dyn UpstreamClient>,
    cache: Arc<BlockHeaderCache>,
    head_tx: flume::Sender<HeadCandidate>,
    err_tx: flume::Sender<String>,
    cancel: CancellationToken,
    state: AtomicU8,
    // Guards against two ingestion loops running for the same Node (Start
    // called twice); the original Go code never needs this because a Node
    // is only ever `go`-started once by `NodeStore.AddNodes`.
    started: AsyncMutex<bool>,
}

impl Node {
    pub fn new(
        info: NodeInfo,
        opt: NodeOption,
        upstream: Arc<dyn UpstreamClient>,
        cache: Arc<BlockHeaderCache>,
        head_tx: flume::Sender<HeadCandidate>,
        err_tx: flume::Sender<String>,
    ) -> Arc<Self> {
        let key = info.key();
        Arc::new(Self {
            info,
            key,
            opt,
            upstream,
            cache,
            head_tx,
            err_tx,
            cancel: CancellationToken::new(),
            state: AtomicU8::new(NodeState::Connecting as u8),
            started: AsyncMutex::new(false),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The raw upstream handle, for the proxy façade's mechanical
    /// pass-through shims (spec §4.5).
    pub fn upstream(&self) -> &Arc<dyn UpstreamClient> {
        &self.upstream
    }

    pub fn state(&self) -> NodeState {
        NodeState::from(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, s: NodeState) {
        self.state.store(s as u8, Ordering::Release);
    }

    /// Spawns the ingestion routine. A no-op if already started, matching
    /// `NodeStore.AddNodes`'s "every input Node is started exactly once"
    /// invariant (spec §4.3).
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut started = this.started.lock().await;
            if *started {
                return;
            }
            *started = true;
            drop(started);
            this.run().await;
        });
    }

    /// Cancels the ingestion routine and marks the node `Stopped`. A no-op
    /// (not a deadlock) if already stopped (spec §8 round-trip property).
    pub fn stop(&self) {
        self.cancel.cancel();
        self.set_state(NodeState::Stopped);
    }

    #[instrument(skip(self), fields(node = %self.key))]
    async fn run(self: Arc<Self>) {
        info!("starting head-change ingestion");
        let mut backoff = self.fresh_backoff();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            // Guarantees a yield point even when `chain_notify` resolves
            // synchronously (e.g. a mock upstream with an already-closed
            // stream), so a tight resubscribe loop never starves siblings
            // on a single-threaded runtime.
            tokio::task::yield_now().await;

            self.set_state(NodeState::Connecting);
            self.set_state(NodeState::Subscribing);

            let stream = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = self.upstream.chain_notify() => res,
            };

            let mut stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "ChainNotify failed, will re-call after backoff");
                    let _ = self.err_tx.try_send(self.key.clone());
                    self.set_state(NodeState::Backoff);
                    let delay = backoff.next().unwrap_or(self.opt.relisten_max_interval);
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };

            // A successful (re)subscription resets the backoff schedule.
            backoff = self.fresh_backoff();
            self.set_state(NodeState::Running);

            loop {
                let batch = tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    item = stream.next() => item,
                };
                match batch {
                    Some(batch) => {
                        let this = Arc::clone(&self);
                        tokio::spawn(async move { this.apply_changes(batch).await });
                    }
                    None => {
                        debug!("ChainNotify stream closed, re-subscribing");
                        break;
                    }
                }
            }
        }
        self.set_state(NodeState::Stopped);
        info!("stopped head-change ingestion");
    }

    fn fresh_backoff(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        Box::new(
            ExponentialBuilder::default()
                .with_min_delay(self.opt.relisten_min_interval)
                .with_max_delay(self.opt.relisten_max_interval)
                .with_factor(2.0)
                // The reconnect loop retries forever (spec §4.2's Backoff
                // state has no terminal failure); `ExponentialBuilder`
                // defaults to `max_times = Some(3)`, which would silently
                // exhaust the schedule after three failures.
                .without_max_times()
                .build(),
        )
    }

    /// Feeds the batch into the shared [`BlockHeaderCache`], then — if the
    /// batch contains any `Apply`/`Current` entry — fetches that entry's
    /// weight and enqueues a [`HeadCandidate`] (spec §4.2 `Running` state).
    #[instrument(skip(self, batch), fields(node = %self.key))]
    async fn apply_changes(self: Arc<Self>, batch: Vec<crate::types::HeadChange>) {
        self.cache.add(&batch);

        let last_head = batch
            .iter()
            .filter(|c| matches!(c.kind, HeadChangeKind::Apply | HeadChangeKind::Current))
            .next_back();

        let Some(change) = last_head else {
            return;
        };
        let ts = change.tipset.clone();

        let weight = {
            let cids: Vec<Cid> = ts.blocks().iter().map(|b| b.cid).collect();
            match tokio::time::timeout(self.opt.api_timeout, self.upstream.chain_tipset_weight(&cids))
                .await
            {
                Ok(Ok(w)) => w,
                Ok(Err(e)) => {
                    error!(error = %e, "ChainTipSetWeight failed, dropping candidate");
                    return;
                }
                Err(_) => {
                    error!("ChainTipSetWeight timed out, dropping candidate");
                    return;
                }
            }
        };

        let candidate = HeadCandidate {
            node_key: self.key.clone(),
            tipset: ts.clone(),
            weight,
        };

        self.offer(candidate, ts.key(), ts.height()).await;
    }

    /// Enqueue discipline from spec §4.2: deliver, or warn every 5s while
    /// still trying, or exit via cancellation. Never silently drop —
    /// `candidate` is cloned into each send attempt so a slow-consumer
    /// warning never loses the value being offered.
    async fn offer(&self, candidate: HeadCandidate, key: &TipSetKey, height: i64) {
        let start = tokio::time::Instant::now();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                res = self.head_tx.send_async(candidate.clone()) => {
                    // Ok: delivered. Err: selector side is gone, drop it.
                    let _ = res;
                    return;
                }
                _ = tokio::time::sleep(Duration::from_secs(5)) => {
                    warn!(
                        key = %key,
                        height,
                        elapsed = ?start.elapsed(),
                        "it took too long before we could send the new head change"
                    );
                }
            }
        }
    }

    /// Reconstructs a tipset from a key: looks up each CID in the cache,
    /// falling back to `ChainGetBlock` under the API timeout, in parallel,
    /// joined before returning (spec §4.2 `loadTipSet`).
    pub async fn load_tipset(&self, key: &TipSetKey) -> Result<TipSet, NodeError> {
        if key.is_empty() {
            return Err(TipSetError::Empty.into());
        }
        let futs = key.cids().iter().map(|cid| self.load_block_header(*cid));
        let results = futures::future::join_all(futs).await;

        let mut blocks = Vec::with_capacity(results.len());
        let mut failed = 0usize;
        let mut last_err = String::new();
        for r in results {
            match r {
                Ok(b) => blocks.push(b),
                Err(e) => {
                    failed += 1;
                    last_err = e.to_string();
                }
            }
        }
        if failed > 0 {
            return Err(TipSetError::BlockFetch(failed, last_err).into());
        }
        Ok(TipSet::new(blocks)?)
    }

    /// Cache-first block-header lookup (spec §4.2 `loadBlockHeader`):
    /// bypasses the upstream call entirely on a cache hit.
    pub async fn load_block_header(&self, cid: Cid) -> Result<BlockHeader, NodeError> {
        if let Some(h) = self.cache.load(&cid) {
            return Ok(h);
        }
        tokio::time::timeout(self.opt.api_timeout, self.upstream.chain_get_block(cid))
            .await
            .map_err(|_| NodeError::Call("ChainGetBlock", "timed out".into()))?
            .map_err(|e| NodeError::Call("ChainGetBlock", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_sequence_doubles_and_caps() {
        let opt = NodeOption {
            relisten_min_interval: Duration::from_secs(1),
            relisten_max_interval: Duration::from_secs(8),
            api_timeout: Duration::from_secs(10),
        };
        let mut backoff = ExponentialBuilder::default()
            .with_min_delay(opt.relisten_min_interval)
            .with_max_delay(opt.relisten_max_interval)
            .with_factor(2.0)
            .without_max_times()
            .build();

        let got: Vec<Duration> = (0..5).map(|_| backoff.next().unwrap()).collect();
        assert_eq!(
            got,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(8),
            ]
        );
    }

    /// Spec §8 scenario 5: a cache hit bypasses the upstream entirely.
    #[tokio::test]
    async fn load_block_header_cache_hit_skips_upstream_call() {
        use multihash_codetable::{Code, MultihashDigest};

        use crate::types::HeadChange;
        use crate::upstream::mock::MockUpstream;

        let cid = Cid::new_v1(0x55, Code::Blake2b256.digest(&[7]));
        let header = BlockHeader {
            cid,
            parents: TipSetKey::empty(),
            height: 1,
            data: Arc::from(vec![7u8]),
        };
        let cache = Arc::new(BlockHeaderCache::default());
        cache.add(&[HeadChange {
            kind: HeadChangeKind::Apply,
            tipset: TipSet::new(vec![header.clone()]).unwrap(),
        }]);

        let mock = Arc::new(MockUpstream::new());
        let info = NodeInfo::parse("tok:/ip4/1.1.1.1/tcp/1").unwrap();
        let (head_tx, _head_rx) = flume::bounded(8);
        let (err_tx, _err_rx) = flume::bounded(8);
        let node = Node::new(
            info,
            NodeOption::default(),
            mock.clone(),
            cache,
            head_tx,
            err_tx,
        );

        let loaded = node.load_block_header(cid).await.unwrap();
        assert_eq!(loaded, header);
        assert_eq!(
            *mock.get_block_calls.lock(),
            0,
            "a cache hit must never issue a ChainGetBlock call"
        );
    }
}
