// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Maintains the pool-wide view of chain heads and resolves selection
//! queries: which upstream should answer a call for a given `TipSetKey`, or
//! for "latest" when none is given (spec §4.4).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, instrument};

use crate::error::SelectorError;
use crate::node_store::NodeStore;
use crate::types::{HeadCandidate, Rank, TipSet, TipSetKey};

/// An ordered set of nodes known to have reported a given key, plus a
/// round-robin cursor so repeated `Select` calls spread load instead of
/// always returning the same node (spec §4.4 "Tie-breaking").
#[derive(Debug, Default, Clone)]
struct NodeSet {
    members: Vec<String>,
    next: usize,
}

impl NodeSet {
    fn insert(&mut self, key: &str) {
        if !self.members.iter().any(|m| m == key) {
            self.members.push(key.to_owned());
        }
    }

    fn remove(&mut self, key: &str) {
        self.members.retain(|m| m != key);
        if self.next >= self.members.len() {
            self.next = 0;
        }
    }

    /// Round-robin pick, advancing the cursor under the same access.
    fn pick(&mut self) -> Option<String> {
        if self.members.is_empty() {
            return None;
        }
        let idx = self.next % self.members.len();
        self.next = (self.next + 1) % self.members.len();
        Some(self.members[idx].clone())
    }
}

#[derive(Default)]
struct SelectorState {
    best_head: Option<TipSet>,
    best_rank: Option<Rank>,
    /// `TipSetKey -> nodes known to have reported it`. Pruned on `Node::stop`
    /// (spec §9's preferred resolution of the pruning open question).
    head_index: HashMap<TipSetKey, NodeSet>,
    best_nodes: NodeSet,
}

/// Consumes head candidates and answers `Select` queries. The drain loop is
/// the single writer to [`SelectorState`]; `select` takes a read lock, so
/// readers never observe a torn `(best_head, best_nodes)` pair (spec §5).
pub struct Selector {
    state: RwLock<SelectorState>,
    node_store: Arc<NodeStore>,
}

impl Selector {
    pub fn new(node_store: Arc<NodeStore>) -> Self {
        Self {
            state: RwLock::new(SelectorState::default()),
            node_store,
        }
    }

    /// Applies one `HeadCandidate` update (spec §4.4 "Update rule"). Called
    /// by the single drain routine that owns the shared head-candidate
    /// channel; updates are processed strictly in arrival order.
    #[instrument(skip(self, candidate), fields(node = %candidate.node_key))]
    pub fn observe(&self, candidate: HeadCandidate) {
        let mut state = self.state.write();
        let key = candidate.tipset.key().clone();
        let rank = candidate.rank();

        state
            .head_index
            .entry(key.clone())
            .or_default()
            .insert(&candidate.node_key);

        match &state.best_rank {
            None => {
                state.best_rank = Some(rank);
                state.best_head = Some(candidate.tipset);
                state.best_nodes = state.head_index[&key].clone();
            }
            Some(current) if rank > *current => {
                debug!(height = candidate.tipset.height(), "promoting new best head");
                state.best_rank = Some(rank);
                state.best_head = Some(candidate.tipset);
                state.best_nodes = state.head_index[&key].clone();
            }
            Some(current) if rank == *current => {
                state.best_nodes.insert(&candidate.node_key);
            }
            _ => {
                // Lower rank: no promotion, but membership above was still
                // recorded so a later query for this exact key succeeds.
            }
        }
    }

    /// Drops every trace of a stopped node from the head index and the
    /// best-nodes set (spec §9's pruning resolution).
    pub fn forget_node(&self, node_key: &str) {
        let mut state = self.state.write();
        for set in state.head_index.values_mut() {
            set.remove(node_key);
        }
        state.best_nodes.remove(node_key);
    }

    /// Resolves a selection query to a live upstream address (spec §4.4
    /// `Select`). Empty key means "latest"; a known key returns one of its
    /// reporting nodes; an unknown key falls back to any live node.
    pub fn select(&self, key: &TipSetKey) -> Result<String, SelectorError> {
        let mut state = self.state.write();

        if key.is_empty() {
            if let Some(addr) = Self::pick_live(&mut state.best_nodes, &self.node_store) {
                return Ok(addr);
            }
        } else if let Some(set) = state.head_index.get_mut(key) {
            if let Some(addr) = Self::pick_live(set, &self.node_store) {
                return Ok(addr);
            }
        }

        // Unknown key, or a known key/best-set whose members have all since
        // been pruned: fall back to any live node (spec §4.4 "Unknown key").
        self.node_store
            .any()
            .map(|n| n.key().to_owned())
            .ok_or(SelectorError::NoUpstreamAvailable)
    }

    /// Picks round-robin from `set`, skipping (and permanently removing)
    /// entries the `NodeStore` no longer has — the second line of defense
    /// from spec §9 against a stale `headIndex` entry pointing at a dead
    /// node, in case `forget_node` lost a race with `observe`.
    fn pick_live(set: &mut NodeSet, node_store: &NodeStore) -> Option<String> {
        let attempts = set.members.len();
        for _ in 0..attempts {
            let candidate = set.pick()?;
            if node_store.get_node(&candidate).is_some() {
                return Some(candidate);
            }
            set.remove(&candidate);
        }
        None
    }

    pub fn best_head(&self) -> Option<TipSet> {
        self.state.read().best_head.clone()
    }
}
