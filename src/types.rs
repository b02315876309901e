// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Data model shared across the head-tracking core: connection descriptors,
//! tipsets, and the head-change notifications a [`crate::node::Node`] turns
//! into [`HeadCandidate`]s.

use std::fmt;
use std::sync::Arc;

use cid::Cid;
use multiaddr::Multiaddr;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, TipSetError};

/// Connection descriptor for one upstream full node. Immutable once parsed.
///
/// Parsed from a `"<token>:<multiaddr>"` connection string, mirroring the
/// original `apiinfo.ParseApiInfo` helper: the substring up to the first `:`
/// is the bearer token, the remainder is the dial multiaddr.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Bearer token sent as the `Authorization` header on every call.
    pub auth_token: String,
    /// Dial address of the upstream.
    #[serde(with = "multiaddr_as_string")]
    pub addr: Multiaddr,
}

mod multiaddr_as_string {
    use multiaddr::Multiaddr;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(addr: &Multiaddr, s: S) -> Result<S::Ok, S::Error> {
        addr.to_string().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Multiaddr, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl NodeInfo {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        // A multiaddr always starts with `/` and never itself contains a
        // `:`, so the first colon is always the token/address boundary.
        let (token, addr) = s
            .split_once(':')
            .ok_or_else(|| ConfigError::BadConnectionString(s.to_owned()))?;
        let addr: Multiaddr = addr
            .parse()
            .map_err(|_: multiaddr::Error| ConfigError::BadConnectionString(s.to_owned()))?;
        Ok(Self {
            auth_token: token.to_owned(),
            addr,
        })
    }

    /// The address this node is keyed by in the [`crate::node_store::NodeStore`].
    pub fn key(&self) -> String {
        self.addr.to_string()
    }
}

/// Canonical identifier of a [`TipSet`]: the sorted CIDs of its blocks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TipSetKey(Vec<Cid>);

impl TipSetKey {
    /// The key meaning "no specific tipset" / "latest", used by façade
    /// methods that implicitly mean "latest" (spec §6).
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn new(mut cids: Vec<Cid>) -> Self {
        cids.sort_unstable();
        cids.dedup();
        Self(cids)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn cids(&self) -> &[Cid] {
        &self.0
    }
}

impl fmt::Display for TipSetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, "}}")
    }
}

/// An opaque block header blob addressed by its CID. The proxy never
/// interprets the bytes — validation and consensus are an upstream concern
/// (spec §1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub cid: Cid,
    pub parents: TipSetKey,
    pub height: i64,
    pub data: Arc<[u8]>,
}

/// An ordered set of block headers sharing a height and parent set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipSet {
    blocks: Vec<BlockHeader>,
    key: TipSetKey,
    height: i64,
}

impl TipSet {
    /// Assembles a tipset from its blocks, verifying internal consistency:
    /// every block must share the same height and the same parent set
    /// (spec §4.2 `loadTipSet` step 3).
    pub fn new(blocks: Vec<BlockHeader>) -> Result<Self, TipSetError> {
        let first = blocks.first().ok_or(TipSetError::Empty)?;
        let height = first.height;
        let parents = first.parents.clone();
        if blocks
            .iter()
            .any(|b| b.height != height || b.parents != parents)
        {
            return Err(TipSetError::Inconsistent);
        }
        let key = TipSetKey::new(blocks.iter().map(|b| b.cid).collect());
        Ok(Self {
            blocks,
            key,
            height,
        })
    }

    pub fn key(&self) -> &TipSetKey {
        &self.key
    }

    pub fn height(&self) -> i64 {
        self.height
    }

    pub fn blocks(&self) -> &[BlockHeader] {
        &self.blocks
    }
}

/// Chain weight: an unbounded integer, higher-is-better (spec GLOSSARY).
/// Filecoin tipset weights routinely exceed 64 bits, hence `BigInt` rather
/// than a machine integer.
pub type Weight = BigInt;

/// `(weight, height)` compared lexicographically, weight dominant, height a
/// tiebreaker only when weights are exactly equal (spec §4.4, §9).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Rank {
    pub weight: Weight,
    pub height: i64,
}

/// The kind of entry in a `ChainNotify` batch (spec §6). `Revert` is part of
/// the wire contract but never produces a [`HeadCandidate`] (spec §4.2/§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadChangeKind {
    Current,
    Apply,
    Revert,
}

/// One entry of a `ChainNotify` batch.
#[derive(Debug, Clone)]
pub struct HeadChange {
    pub kind: HeadChangeKind,
    pub tipset: TipSet,
}

/// `(Node, TipSet, Weight)` reported into the [`crate::selector::Selector`]
/// whenever a [`crate::node::Node`] observes an `Apply`/`Current`
/// notification (spec §3). Ephemeral: lives only until the selector drains
/// it.
#[derive(Debug, Clone)]
pub struct HeadCandidate {
    pub node_key: String,
    pub tipset: TipSet,
    pub weight: Weight,
}

impl HeadCandidate {
    pub fn rank(&self) -> Rank {
        Rank {
            weight: self.weight.clone(),
            height: self.tipset.height(),
        }
    }
}
