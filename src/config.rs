// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Proxy configuration: the knobs from spec §6's configuration table, plus
//! the upstream list, loadable from TOML the way forest's own daemon config
//! loads.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::node::NodeOption;
use crate::types::NodeInfo;

fn default_relisten_min() -> u64 {
    4
}

fn default_relisten_max() -> u64 {
    32
}

fn default_api_timeout() -> u64 {
    10
}

/// Durations are expressed in whole seconds on the wire, matching the
/// defaults spec §6 documents (4s / 32s / 10s).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_relisten_min")]
    pub relisten_min_interval_secs: u64,
    #[serde(default = "default_relisten_max")]
    pub relisten_max_interval_secs: u64,
    #[serde(default = "default_api_timeout")]
    pub api_timeout_secs: u64,
    /// `"<token>:<multiaddr>"` connection strings, parsed at load time.
    #[serde(default)]
    pub upstream_connections: Vec<String>,
    #[serde(skip)]
    pub upstreams: Vec<NodeInfo>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            relisten_min_interval_secs: default_relisten_min(),
            relisten_max_interval_secs: default_relisten_max(),
            api_timeout_secs: default_api_timeout(),
            upstream_connections: Vec::new(),
            upstreams: Vec::new(),
        }
    }
}

impl ProxyConfig {
    pub fn node_option(&self) -> NodeOption {
        NodeOption {
            relisten_min_interval: Duration::from_secs(self.relisten_min_interval_secs),
            relisten_max_interval: Duration::from_secs(self.relisten_max_interval_secs),
            api_timeout: Duration::from_secs(self.api_timeout_secs),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e))?;
        Self::parse(&raw, path)
    }

    fn parse(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(raw)
            .map_err(|e| ConfigError::Parse(path.display().to_string(), e))?;
        config.resolve_upstreams()?;
        Ok(config)
    }

    fn resolve_upstreams(&mut self) -> Result<(), ConfigError> {
        self.upstreams = self
            .upstream_connections
            .iter()
            .map(|s| NodeInfo::parse(s))
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    /// Adds an upstream parsed from a `"<token>:<multiaddr>"` string, as the
    /// CLI's repeatable `--upstream` flag does.
    pub fn add_upstream(&mut self, connection: &str) -> Result<(), ConfigError> {
        let info = NodeInfo::parse(connection)?;
        self.upstream_connections.push(connection.to_owned());
        self.upstreams.push(info);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = ProxyConfig::default();
        assert_eq!(cfg.relisten_min_interval_secs, 4);
        assert_eq!(cfg.relisten_max_interval_secs, 32);
        assert_eq!(cfg.api_timeout_secs, 10);
    }

    #[test]
    fn parses_toml_with_upstreams() {
        let raw = r#"
            relisten_min_interval_secs = 1
            relisten_max_interval_secs = 8
            api_timeout_secs = 5
            upstream_connections = ["tok-a:/ip4/127.0.0.1/tcp/1234", "tok-b:/ip4/127.0.0.1/tcp/1235"]
        "#;
        let cfg = ProxyConfig::parse(raw, Path::new("test.toml")).unwrap();
        assert_eq!(cfg.upstreams.len(), 2);
        assert_eq!(cfg.upstreams[0].auth_token, "tok-a");
    }
}
