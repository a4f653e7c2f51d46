// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Client configuration. Loading it from files or the command line is left to the embedding
//! application; every type here is (de)serializable.

use crate::cql::{
    connection::PasswordAuth,
    frame::{
        Consistency,
        ProtocolVersion,
    },
};
use derive_builder::Builder;
use serde::{
    Deserialize,
    Serialize,
};
use std::time::Duration;

/// Process wide client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(pattern = "owned", default)]
#[serde(default)]
pub struct ClientConfig {
    pub protocol_version: ProtocolVersion,
    pub consistency: Consistency,
    /// Idempotence of statements which neither set it nor inherit it.
    pub default_idempotence: bool,
    pub request_timeout: Duration,
    /// Retries allowed per execution, not counting transport failures.
    pub max_retries: u32,
    /// Prepare statements on every UP host once one host prepared them.
    pub prepare_on_all_hosts: bool,
    #[builder(setter(strip_option))]
    pub page_size: Option<i32>,
    pub pool: PoolConfig,
    pub reconnection: ReconnectionConfig,
    pub speculative: SpeculativeConfig,
    #[builder(setter(strip_option))]
    pub authenticator: Option<PasswordAuth>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocol_version: ProtocolVersion::V4,
            consistency: Consistency::LocalOne,
            default_idempotence: false,
            request_timeout: Duration::from_secs(12),
            max_retries: 3,
            prepare_on_all_hosts: true,
            page_size: None,
            pool: PoolConfig::default(),
            reconnection: ReconnectionConfig::default(),
            speculative: SpeculativeConfig::default(),
            authenticator: None,
        }
    }
}

/// Per host connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(pattern = "owned", default)]
#[serde(default)]
pub struct PoolConfig {
    pub min_connections: usize,
    pub max_connections: usize,
    /// In-flight requests past which a connection counts as busy.
    pub max_requests_per_connection: usize,
    pub connect_timeout: Duration,
    /// How long a borrower waits for a new connection or free capacity.
    pub borrow_timeout: Duration,
    #[builder(setter(strip_option))]
    pub heartbeat_interval: Option<Duration>,
    /// Connections above the minimum idle for this long are closed.
    pub idle_timeout: Duration,
    /// Consecutive connection failures which mark the host DOWN.
    pub failure_threshold: u32,
    pub orphan_limit: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 8,
            max_requests_per_connection: 1024,
            connect_timeout: Duration::from_secs(5),
            borrow_timeout: Duration::from_secs(5),
            heartbeat_interval: Some(Duration::from_secs(30)),
            idle_timeout: Duration::from_secs(120),
            failure_threshold: 3,
            orphan_limit: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(pattern = "owned", default)]
#[serde(default)]
pub struct ReconnectionConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

/// Speculative executions only ever apply to idempotent statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(pattern = "owned", default)]
#[serde(default)]
pub struct SpeculativeConfig {
    /// Delay before each extra execution. `None` disables speculation.
    #[builder(setter(strip_option))]
    pub delay: Option<Duration>,
    /// Executions in total, the first one included.
    pub max_executions: usize,
}

impl Default for SpeculativeConfig {
    fn default() -> Self {
        Self {
            delay: None,
            max_executions: 2,
        }
    }
}
