// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Head-tracking and upstream-selection core for a chain-aware JSON-RPC
//! aggregating proxy sitting in front of a pool of Filecoin full-node
//! endpoints.
//!
//! Downstream clients see a single node's API; internally, each call is
//! routed to whichever live upstream can best answer it — the pool's
//! current best head for "latest" queries, or a specific upstream known to
//! have seen a given [`types::TipSetKey`] for historical ones. See
//! [`selector::Selector`] for the routing policy and [`node::Node`] for how
//! a single upstream's chain-notification stream is ingested.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod node;
pub mod node_store;
pub mod proxy;
pub mod selector;
pub mod types;
pub mod upstream;

pub use context::Context;
pub use proxy::{Proxy, UnSupport};
