// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use super::pool::HostConnectionPool;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt::Display,
    net::SocketAddr,
};

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostState {
    Up = 0,
    Down = 1,
    /// Down, with a reconnection attempt in progress.
    Reconnecting = 2,
}

impl From<u8> for HostState {
    fn from(state: u8) -> Self {
        match state {
            0 => HostState::Up,
            1 => HostState::Down,
            _ => HostState::Reconnecting,
        }
    }
}

impl Display for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostState::Up => write!(f, "UP"),
            HostState::Down => write!(f, "DOWN"),
            HostState::Reconnecting => write!(f, "RECONNECTING"),
        }
    }
}

/// A node and its connection pool.
#[derive(Debug)]
pub struct Host {
    address: SocketAddr,
    pool: HostConnectionPool,
}

impl Host {
    pub fn new(pool: HostConnectionPool) -> Self {
        Self {
            address: pool.address(),
            pool,
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn state(&self) -> HostState {
        self.pool.state()
    }

    pub fn is_up(&self) -> bool {
        self.state() == HostState::Up
    }

    pub fn pool(&self) -> &HostConnectionPool {
        &self.pool
    }
}

impl Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.address, self.state())
    }
}
