// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Per host connection pools.
//!
//! Borrowers get the least loaded healthy connection. When every connection is past the high
//! water mark the pool grows, one connection at a time, and the borrower takes whichever comes
//! first: the new connection or a released stream. A saturated pool at its maximum size fails
//! fast with [`PoolError::Busy`].

mod maintenance;

use super::{
    config::PoolConfig,
    host::HostState,
    policy::ReconnectionPolicy,
};
use crate::cql::connection::{
    Connection,
    ConnectionError,
    ConnectionOptions,
    Connector,
};
use arc_swap::ArcSwap;
use futures::{
    future::{
        BoxFuture,
        Shared,
    },
    FutureExt,
};
use log::*;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{
            AtomicBool,
            AtomicU32,
            AtomicU8,
            Ordering,
        },
        Arc,
        Mutex,
    },
};
use thiserror::Error;
use tokio::{
    sync::Notify,
    task::JoinHandle,
    time::Instant,
};

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Host {0} is {1}")]
    HostUnavailable(SocketAddr, HostState),
    #[error("Every connection to {0} is busy")]
    Busy(SocketAddr),
    #[error("Cannot connect to {0}: {1}")]
    Connect(SocketAddr, ConnectionError),
    #[error("Pool for {0} is shut down")]
    Shutdown(SocketAddr),
}

type Opening = Shared<BoxFuture<'static, Result<Arc<Connection>, ConnectionError>>>;

pub(crate) struct PoolInner {
    address: SocketAddr,
    config: PoolConfig,
    options: ConnectionOptions,
    connector: Arc<dyn Connector>,
    reconnection: Arc<dyn ReconnectionPolicy>,
    connections: ArcSwap<Vec<Arc<Connection>>>,
    opening: Mutex<Option<Opening>>,
    capacity: Arc<Notify>,
    state: AtomicU8,
    failures: AtomicU32,
    shutdown: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// The connections to one host.
#[derive(Clone)]
pub struct HostConnectionPool {
    inner: Arc<PoolInner>,
}

impl HostConnectionPool {
    pub fn new(
        address: SocketAddr,
        config: PoolConfig,
        mut options: ConnectionOptions,
        connector: Arc<dyn Connector>,
        reconnection: Arc<dyn ReconnectionPolicy>,
    ) -> Self {
        let capacity = Arc::new(Notify::new());
        options.released = Some(capacity.clone());
        options.connect_timeout = config.connect_timeout;
        options.heartbeat_interval = config.heartbeat_interval;
        options.orphan_limit = config.orphan_limit;
        Self {
            inner: Arc::new(PoolInner {
                address,
                config,
                options,
                connector,
                reconnection,
                connections: ArcSwap::from_pointee(Vec::new()),
                opening: Mutex::new(None),
                capacity,
                state: AtomicU8::new(HostState::Up as u8),
                failures: AtomicU32::new(0),
                shutdown: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Open the minimum number of connections and start the maintenance task.
    /// Fails if not a single connection could be opened; the host is then left to reconnect.
    pub async fn init(&self) -> Result<(), PoolError> {
        let opened = futures::future::join_all(
            (0..self.inner.config.min_connections.max(1)).map(|_| self.inner.clone().connect_one()),
        )
        .await;
        self.inner
            .track(tokio::spawn(maintenance::run(Arc::downgrade(&self.inner))));
        if opened.iter().any(Result::is_ok) {
            info!("Host {} is UP with {} connections", self.inner.address, self.size());
            return Ok(());
        }
        let error = opened
            .into_iter()
            .find_map(Result::err)
            .unwrap_or(ConnectionError::Closed);
        self.inner.mark_down();
        Err(PoolError::Connect(self.inner.address, error))
    }

    pub fn address(&self) -> SocketAddr {
        self.inner.address
    }

    pub fn state(&self) -> HostState {
        self.inner.state()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Open connections.
    pub fn size(&self) -> usize {
        self.inner.connections.load().len()
    }

    /// Streams in use across the pool.
    pub fn in_flight(&self) -> usize {
        self.inner.connections.load().iter().map(|c| c.in_flight()).sum()
    }

    /// Borrow the least loaded healthy connection.
    pub async fn borrow(&self) -> Result<Arc<Connection>, PoolError> {
        let inner = &self.inner;
        let deadline = Instant::now() + inner.config.borrow_timeout;
        loop {
            // Registered before looking, so a release in between is not missed
            let released = inner.capacity.notified();
            tokio::pin!(released);
            inner.check_available()?;
            let connections = inner.connections.load_full();
            let best = connections
                .iter()
                .filter(|c| !c.is_defunct())
                .min_by_key(|c| c.in_flight());
            let size = connections.len();
            if let Some(c) = best {
                if c.in_flight() < inner.config.max_requests_per_connection && c.available_streams() > 0 {
                    return Ok(c.clone());
                }
                if size >= inner.config.max_connections {
                    return Err(PoolError::Busy(inner.address));
                }
            }
            let opening = inner.clone().open_connection();
            tokio::select! {
                res = opening => match res {
                    Ok(c) if !c.is_defunct() => return Ok(c),
                    Ok(_) => continue,
                    Err(e) => {
                        inner.check_available()?;
                        if best.is_none() {
                            return Err(PoolError::Connect(inner.address, e));
                        }
                    }
                },
                _ = &mut released => continue,
                _ = tokio::time::sleep_until(deadline) => return Err(PoolError::Busy(inner.address)),
            }
            // Opening failed but other connections exist: wait for capacity or give up
            tokio::select! {
                _ = &mut released => continue,
                _ = tokio::time::sleep_until(deadline) => return Err(PoolError::Busy(inner.address)),
            }
        }
    }

    /// Close every connection and stop reconnecting.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        for task in self.inner.lock_tasks().drain(..) {
            task.abort();
        }
        self.inner.close_all();
        self.inner.capacity.notify_waiters();
        debug!("Pool for {} shut down", self.inner.address);
    }
}

impl std::fmt::Debug for HostConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostConnectionPool")
            .field("address", &self.inner.address)
            .field("state", &self.inner.state())
            .field("size", &self.size())
            .finish()
    }
}

impl PoolInner {
    fn state(&self) -> HostState {
        self.state.load(Ordering::Acquire).into()
    }

    fn set_state(&self, state: HostState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.lock_tasks();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    fn check_available(&self) -> Result<(), PoolError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::Shutdown(self.address));
        }
        match self.state() {
            HostState::Up => Ok(()),
            state => Err(PoolError::HostUnavailable(self.address, state)),
        }
    }

    /// Open a connection, sharing the attempt with every concurrent caller.
    fn open_connection(self: Arc<Self>) -> Opening {
        let mut opening = self.opening.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(fut) = opening.as_ref() {
            return fut.clone();
        }
        let inner = self.clone();
        let fut = async move {
            let res = inner.clone().connect_one().await;
            *inner.opening.lock().unwrap_or_else(|e| e.into_inner()) = None;
            res
        }
        .boxed()
        .shared();
        *opening = Some(fut.clone());
        // Finish the attempt even if every borrower gives up on it
        tokio::spawn(fut.clone().map(|_| ()));
        fut
    }

    async fn connect_one(self: Arc<Self>) -> Result<Arc<Connection>, ConnectionError> {
        match self.connector.connect(self.address, &self.options).await {
            Ok(connection) => {
                let connection = Arc::new(connection);
                // The host may have gone down while this connection was opening
                if self.shutdown.load(Ordering::Acquire) || self.state() != HostState::Up {
                    debug!(
                        "Discarding connection {} to {}, the pool is {}",
                        connection.id(),
                        self.address,
                        self.state()
                    );
                    connection.close();
                    return Err(ConnectionError::Closed);
                }
                self.failures.store(0, Ordering::Release);
                self.add(connection.clone());
                Ok(connection)
            }
            Err(e) => {
                warn!("Failed to open connection to {}: {}", self.address, e);
                self.record_failure();
                Err(e)
            }
        }
    }

    fn add(self: &Arc<Self>, connection: Arc<Connection>) {
        self.connections.rcu(|connections| {
            let mut connections = Vec::clone(connections);
            connections.push(connection.clone());
            connections
        });
        let pool = Arc::downgrade(self);
        let watched = connection.clone();
        let watcher = tokio::spawn(async move {
            let reason = watched.closed().await;
            if let Some(pool) = pool.upgrade() {
                pool.remove(watched.id());
                if !matches!(reason, ConnectionError::Closed) {
                    pool.record_failure();
                }
                pool.capacity.notify_waiters();
            }
        });
        self.track(watcher);
        debug!(
            "Pool for {} opened connection {} ({} total)",
            self.address,
            connection.id(),
            self.connections.load().len()
        );
        self.capacity.notify_waiters();
    }

    fn remove(&self, id: u64) -> Option<Arc<Connection>> {
        let mut removed = None;
        self.connections.rcu(|connections| {
            let (gone, kept): (Vec<_>, Vec<_>) = connections.iter().cloned().partition(|c| c.id() == id);
            removed = gone.into_iter().next();
            kept
        });
        removed
    }

    fn close_all(&self) {
        for connection in self.connections.swap(Arc::new(Vec::new())).iter() {
            connection.close();
        }
    }

    fn record_failure(self: &Arc<Self>) {
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.config.failure_threshold && self.state() == HostState::Up {
            self.mark_down();
        }
    }

    /// Tear the pool down and reconnect in the background.
    fn mark_down(self: &Arc<Self>) {
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }
        let previous = self.state.swap(HostState::Down as u8, Ordering::AcqRel);
        if previous != HostState::Up as u8 {
            return;
        }
        warn!("Host {} is DOWN", self.address);
        self.close_all();
        self.capacity.notify_waiters();
        self.track(tokio::spawn(reconnect(Arc::downgrade(self))));
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
        self.close_all();
    }
}

async fn reconnect(pool: std::sync::Weak<PoolInner>) {
    let mut schedule = match pool.upgrade() {
        Some(pool) => pool.reconnection.new_schedule(),
        None => return,
    };
    loop {
        let delay = schedule.next_delay();
        tokio::time::sleep(delay).await;
        let pool = match pool.upgrade() {
            Some(pool) if !pool.shutdown.load(Ordering::Acquire) => pool,
            _ => return,
        };
        pool.set_state(HostState::Reconnecting);
        match pool.connector.connect(pool.address, &pool.options).await {
            Ok(connection) => {
                pool.failures.store(0, Ordering::Release);
                pool.add(Arc::new(connection));
                pool.set_state(HostState::Up);
                info!("Host {} is UP again", pool.address);
                pool.capacity.notify_waiters();
                return;
            }
            Err(e) => {
                pool.set_state(HostState::Down);
                warn!("Reconnection to {} failed: {}", pool.address, e);
            }
        }
    }
}
