// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use super::PoolInner;
use crate::app::host::HostState;
use log::*;
use std::{
    sync::{
        atomic::Ordering,
        Weak,
    },
    time::Duration,
};

/// Periodically shrink idle pools and top them back up to their minimum size.
pub(super) async fn run(pool: Weak<PoolInner>) {
    let period = match pool.upgrade() {
        Some(pool) => (pool.config.idle_timeout / 2).clamp(Duration::from_millis(10), Duration::from_secs(10)),
        None => return,
    };
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let pool = match pool.upgrade() {
            Some(pool) if !pool.shutdown.load(Ordering::Acquire) => pool,
            _ => return,
        };
        if pool.state() != HostState::Up {
            continue;
        }
        shrink(&pool);
        let size = pool.connections.load().len();
        if size < pool.config.min_connections {
            debug!(
                "Pool for {} below its minimum ({} < {}), opening a connection",
                pool.address, size, pool.config.min_connections
            );
            // Errors are counted by the pool itself
            pool.clone().open_connection().await.ok();
        }
    }
}

fn shrink(pool: &PoolInner) {
    let connections = pool.connections.load_full();
    let mut excess = connections.len().saturating_sub(pool.config.min_connections);
    for connection in connections.iter() {
        if excess == 0 {
            break;
        }
        if connection.in_flight() == 0 && connection.idle_for() >= pool.config.idle_timeout {
            if let Some(connection) = pool.remove(connection.id()) {
                debug!(
                    "Closing connection {} to {} after {:?} idle",
                    connection.id(),
                    pool.address,
                    connection.idle_for()
                );
                connection.close();
                excess -= 1;
            }
        }
    }
}
