// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Bounded CID -> block-header cache, populated from chain-notification
//! payloads and consulted by tipset reconstruction, so a head-change
//! broadcast short-circuits the extra upstream round-trip a lookup-by-CID
//! would otherwise cost (spec §4.1).

use std::num::NonZeroUsize;

use cid::Cid;
use lru::LruCache;
use nonzero_ext::nonzero;
use parking_lot::Mutex;

use crate::types::{BlockHeader, HeadChange};

/// Default capacity, picked the same way `BadBlockCache` picks one: a round
/// power of two comfortably larger than one epoch's worth of blocks.
const DEFAULT_CACHE_SIZE: NonZeroUsize = nonzero!(1usize << 13);

/// Thread-safe, bounded cache of block headers keyed by CID.
///
/// Writers are `Node` ingestion routines (concurrent, one per upstream);
/// readers are tipset-reconstruction call sites. Eviction is LRU, never
/// blocks a writer, and a miss is a normal result rather than an error.
#[derive(Debug)]
pub struct BlockHeaderCache {
    inner: Mutex<LruCache<Cid, BlockHeader>>,
}

impl Default for BlockHeaderCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }
}

impl BlockHeaderCache {
    pub fn new(cap: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Extracts every block header transported by a batch of head-change
    /// records and inserts it, keyed by CID. Idempotent: re-adding the same
    /// CID with the same bytes is a no-op in effect (the entry is simply
    /// refreshed to most-recently-used).
    pub fn add(&self, changes: &[HeadChange]) {
        let mut inner = self.inner.lock();
        for change in changes {
            for block in change.tipset.blocks() {
                inner.put(block.cid, block.clone());
            }
        }
    }

    /// Constant-expected-time lookup. A miss is `None`, not an error.
    pub fn load(&self, cid: &Cid) -> Option<BlockHeader> {
        self.inner.lock().get(cid).cloned()
    }

    /// Number of headers currently retained. Exposed for tests.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
