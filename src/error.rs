// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

/// Errors produced while reconstructing a `TipSet` from cached or upstream
/// block headers.
#[derive(Debug, Error)]
pub enum TipSetError {
    #[error("failed to load {0} block(s) while reconstructing tipset: {1}")]
    BlockFetch(usize, String),
    #[error("tipset blocks do not share a common height/parent set")]
    Inconsistent,
    #[error("tipset key has no blocks")]
    Empty,
}

/// Errors raised while driving a single upstream `Node`.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("connect to upstream {0}: {1}")]
    Connect(String, String),
    #[error("call {0}: {1}")]
    Call(&'static str, String),
    #[error(transparent)]
    TipSet(#[from] TipSetError),
}

/// Errors the [`crate::selector::Selector`] can surface to a caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("no upstream available")]
    NoUpstreamAvailable,
}

/// Errors surfaced by the proxy façade, always wrapped with the method name
/// per spec: "Error responses are JSON-RPC errors whose message includes the
/// method name and the underlying cause."
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("api {method}: {source}")]
    Selection {
        method: &'static str,
        #[source]
        source: SelectorError,
    },
    #[error("api {method}: {cause}")]
    Forward { method: &'static str, cause: String },
}

impl ProxyError {
    pub fn selection(method: &'static str, source: SelectorError) -> Self {
        Self::Selection { method, source }
    }

    pub fn forward(method: &'static str, cause: impl ToString) -> Self {
        Self::Forward {
            method,
            cause: cause.to_string(),
        }
    }
}

/// Errors raised while loading the proxy configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {0}: {1}")]
    Read(String, std::io::Error),
    #[error("parse config file {0}: {1}")]
    Parse(String, toml::de::Error),
    #[error("invalid upstream connection string {0:?}, expected <token>:<multiaddr>")]
    BadConnectionString(String),
}
