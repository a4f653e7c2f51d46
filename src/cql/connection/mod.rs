// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Multiplexed connections to a single node.

mod connector;
mod multiplex;
mod pending;
mod stream;

pub use connector::{
    handshake,
    AllowAllAuth,
    Authenticator,
    Connector,
    PasswordAuth,
    TcpConnector,
};
pub use multiplex::{
    Connection,
    EVENT_STREAM,
};
pub use pending::{
    PendingResponse,
    ResponseState,
};

use crate::cql::frame::{
    EventFrame,
    FrameError,
    ProtocolVersion,
};
use std::{
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::sync::{
    mpsc,
    Notify,
};

#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    #[error("Connection closed")]
    Closed,
    #[error("Connection defunct: {0}")]
    Defunct(String),
    #[error("No stream id available")]
    StreamsExhausted,
    #[error("Request timed out")]
    TimedOut,
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
    #[error("Invalid frame: {0}")]
    Frame(Arc<FrameError>),
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Heartbeat failed")]
    HeartbeatFailed,
    #[error("Too many orphaned streams ({0})")]
    TooManyOrphans(usize),
}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        ConnectionError::Io(Arc::new(e))
    }
}

impl From<FrameError> for ConnectionError {
    fn from(e: FrameError) -> Self {
        ConnectionError::Frame(Arc::new(e))
    }
}

/// Everything a connection needs besides its transport.
#[derive(Clone, Debug)]
pub struct ConnectionOptions {
    pub version: ProtocolVersion,
    pub connect_timeout: Duration,
    /// Send OPTIONS after this long without reading anything. `None` disables heartbeats.
    pub heartbeat_interval: Option<Duration>,
    pub heartbeat_timeout: Duration,
    /// Orphaned streams tolerated before the connection is considered defunct.
    pub orphan_limit: usize,
    pub authenticator: Option<Arc<dyn Authenticator>>,
    /// Receives server pushed events.
    pub events: Option<mpsc::UnboundedSender<EventFrame>>,
    /// Notified whenever a stream id is released.
    pub released: Option<Arc<Notify>>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::default(),
            connect_timeout: Duration::from_secs(5),
            heartbeat_interval: Some(Duration::from_secs(30)),
            heartbeat_timeout: Duration::from_secs(12),
            orphan_limit: 256,
            authenticator: None,
            events: None,
            released: None,
        }
    }
}
