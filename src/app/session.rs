// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The entry point: a set of host pools, a dispatcher and the prepared statement registry.

use super::{
    config::ClientConfig,
    dispatcher::{
        Dispatcher,
        ExecutionError,
        RequestError,
    },
    host::Host,
    policy::{
        ExponentialReconnectionPolicy,
        LoadBalancingPolicy,
        ReconnectionPolicy,
        RetryPolicy,
        SpeculativeExecutionPolicy,
    },
    pool::HostConnectionPool,
    registry::PreparedStatementRegistry,
    result::QueryResult,
    statement::{
        PreparedStatement,
        Statement,
    },
};
use crate::cql::{
    connection::{
        Authenticator,
        Connection,
        ConnectionOptions,
        Connector,
        TcpConnector,
    },
    frame::{
        opcode,
        EventFrame,
        EventType,
        RegisterEventType,
        RegisterFrame,
        ResponseBody,
        SchemaChangeTarget,
        SchemaChangeType,
    },
    types::CodecRegistry,
};
use futures::FutureExt;
use log::*;
use std::{
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{
        Context,
        Poll,
    },
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
};

pub struct SessionBuilder {
    config: ClientConfig,
    contact_points: Vec<SocketAddr>,
    connector: Arc<dyn Connector>,
    load_balancing: Option<Arc<dyn LoadBalancingPolicy>>,
    retry: Option<Arc<dyn RetryPolicy>>,
    speculative: Option<Arc<dyn SpeculativeExecutionPolicy>>,
    reconnection: Option<Arc<dyn ReconnectionPolicy>>,
    codecs: CodecRegistry,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            config: ClientConfig::default(),
            contact_points: Vec::new(),
            connector: Arc::new(TcpConnector),
            load_balancing: None,
            retry: None,
            speculative: None,
            reconnection: None,
            codecs: CodecRegistry::default(),
        }
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn contact_point(mut self, address: SocketAddr) -> Self {
        self.contact_points.push(address);
        self
    }

    pub fn contact_points(mut self, addresses: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.contact_points.extend(addresses);
        self
    }

    /// How connections are opened. Defaults to TCP.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn load_balancing(mut self, policy: Arc<dyn LoadBalancingPolicy>) -> Self {
        self.load_balancing = Some(policy);
        self
    }

    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Overrides the speculative executions derived from the configuration.
    pub fn speculative_policy(mut self, policy: Arc<dyn SpeculativeExecutionPolicy>) -> Self {
        self.speculative = Some(policy);
        self
    }

    pub fn reconnection_policy(mut self, policy: Arc<dyn ReconnectionPolicy>) -> Self {
        self.reconnection = Some(policy);
        self
    }

    /// The codecs used to encode bound values and decode rows.
    pub fn codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    /// Connect to every contact point. Succeeds as long as one of them is reachable; the
    /// others are left to their reconnection schedule.
    pub async fn build(self) -> Result<Session, ExecutionError> {
        let config = Arc::new(self.config);
        let reconnection = self
            .reconnection
            .unwrap_or_else(|| Arc::new(ExponentialReconnectionPolicy::from(&config.reconnection)));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let options = ConnectionOptions {
            version: config.protocol_version,
            authenticator: config
                .authenticator
                .clone()
                .map(|auth| Arc::new(auth) as Arc<dyn Authenticator>),
            events: Some(events_tx),
            ..Default::default()
        };
        let mut hosts = Vec::with_capacity(self.contact_points.len());
        for address in self.contact_points {
            if hosts.iter().any(|h: &Arc<Host>| h.address() == address) {
                continue;
            }
            let pool = HostConnectionPool::new(
                address,
                config.pool.clone(),
                options.clone(),
                self.connector.clone(),
                reconnection.clone(),
            );
            hosts.push(Arc::new(Host::new(pool)));
        }
        let results = futures::future::join_all(hosts.iter().map(|host| host.pool().init())).await;
        let mut last_error = None;
        for (host, res) in hosts.iter().zip(results) {
            if let Err(e) = res {
                warn!("Host {} is unreachable: {}", host.address(), e);
                last_error = Some(e);
            }
        }
        if !hosts.iter().any(|host| host.is_up()) {
            for host in hosts.iter() {
                host.pool().shutdown();
            }
            let error = last_error.map(RequestError::from).unwrap_or(RequestError::NoHostAvailable);
            let tried = hosts.iter().map(|h| h.address()).collect();
            return Err(ExecutionError::new(error, 0, tried));
        }

        let registry = Arc::new(PreparedStatementRegistry::new());
        let mut dispatcher = Dispatcher::new(config.clone(), registry.clone(), Arc::new(self.codecs));
        if let Some(policy) = self.load_balancing {
            dispatcher = dispatcher.with_load_balancing(policy);
        }
        if let Some(policy) = self.retry {
            dispatcher = dispatcher.with_retry_policy(policy);
        }
        if let Some(policy) = self.speculative {
            dispatcher = dispatcher.with_speculative_policy(policy);
        }
        dispatcher.set_hosts(hosts);

        let session = Session {
            inner: Arc::new(SessionInner {
                dispatcher,
                registry,
                tasks: std::sync::Mutex::new(Vec::new()),
            }),
        };
        let listener = tokio::spawn(listen(Arc::downgrade(&session.inner), events_rx));
        let registered = session.register_events().await;
        let watcher = tokio::spawn(keep_registered(Arc::downgrade(&session.inner), registered));
        session.inner.lock_tasks().extend(vec![listener, watcher]);
        Ok(session)
    }
}

struct SessionInner {
    dispatcher: Dispatcher,
    registry: Arc<PreparedStatementRegistry>,
    /// The event listener and the task keeping an event connection registered.
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl SessionInner {
    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle_schema_change(&self, change_type: SchemaChangeType, target: &SchemaChangeTarget) -> usize {
        debug!("Schema change: {:?} {:?}", change_type, target);
        self.registry.on_schema_change(change_type, target)
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
        for host in self.dispatcher.hosts().iter() {
            host.pool().shutdown();
        }
    }
}

/// Register again whenever the event connection goes away, so schema changes keep
/// invalidating prepared statements.
async fn keep_registered(session: std::sync::Weak<SessionInner>, mut registered: Option<Arc<Connection>>) {
    loop {
        match registered.take() {
            Some(connection) => {
                let reason = connection.closed().await;
                debug!(
                    "Event connection to {} closed ({}), registering again",
                    connection.address(),
                    reason
                );
            }
            None => {
                let delay = match session.upgrade() {
                    Some(session) => session.dispatcher.config().reconnection.base_delay,
                    None => return,
                };
                tokio::time::sleep(delay).await;
            }
        }
        registered = match session.upgrade() {
            Some(session) => Session { inner: session }.register_events().await,
            None => return,
        };
    }
}

async fn listen(session: std::sync::Weak<SessionInner>, mut events: mpsc::UnboundedReceiver<EventFrame>) {
    while let Some(event) = events.recv().await {
        let session = match session.upgrade() {
            Some(session) => session,
            None => break,
        };
        match event.event_type {
            EventType::SchemaChange { change_type, target } => {
                session.handle_schema_change(change_type, &target);
            }
            other => trace!("Ignoring event {:?}", other),
        }
    }
}

/// A connected client. Cheap to clone; the last clone dropped shuts every pool down.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn registry(&self) -> &Arc<PreparedStatementRegistry> {
        &self.inner.registry
    }

    pub fn hosts(&self) -> Arc<Vec<Arc<Host>>> {
        self.inner.dispatcher.hosts()
    }

    pub async fn execute(&self, statement: impl Into<Statement>) -> Result<QueryResult, ExecutionError> {
        self.inner.dispatcher.execute(&statement.into()).await
    }

    /// Execute in a background task. The returned handle resolves to the outcome and can cancel
    /// the execution, along with every attempt in flight.
    pub fn spawn_execute(&self, statement: impl Into<Statement>) -> ExecutionHandle {
        let session = self.clone();
        let statement = statement.into();
        ExecutionHandle {
            task: tokio::spawn(async move { session.inner.dispatcher.execute(&statement).await }),
        }
    }

    /// Prepare a statement, or return the one prepared earlier for the same query text.
    ///
    /// Once a host prepared it, the other UP hosts prepare it in the background when
    /// `prepare_on_all_hosts` is set.
    pub async fn prepare(&self, query: &str) -> Result<PreparedStatement, ExecutionError> {
        if let Some(prepared) = self.inner.registry.get(query) {
            return Ok(prepared);
        }
        let prepared = self.inner.dispatcher.prepare(query).await?;
        let prepared = self.inner.registry.insert(prepared);
        info!("Prepared '{}'", query);
        if self.inner.dispatcher.config().prepare_on_all_hosts {
            self.prepare_on_other_hosts(query);
        }
        Ok(prepared)
    }

    fn prepare_on_other_hosts(&self, query: &str) {
        for host in self.hosts().iter().filter(|h| h.is_up()) {
            let session = self.clone();
            let host = host.clone();
            let query = query.to_string();
            tokio::spawn(async move {
                if let Err(e) = session.inner.dispatcher.prepare_on(&host, &query).await {
                    debug!("Could not prepare '{}' on {}: {}", query, host.address(), e);
                }
            });
        }
    }

    /// Apply a schema change notification to the prepared statement registry.
    pub fn handle_schema_change(&self, change_type: SchemaChangeType, target: &SchemaChangeTarget) -> usize {
        self.inner.handle_schema_change(change_type, target)
    }

    /// Ask one host to push schema change events, returning the connection they arrive on.
    /// Without it statements are only invalidated by schema changes made through this session.
    async fn register_events(&self) -> Option<Arc<Connection>> {
        for host in self.hosts().iter().filter(|h| h.is_up()) {
            match self.register_on(host).await {
                Ok(connection) => {
                    debug!("Listening to schema changes through {}", host.address());
                    return Some(connection);
                }
                Err(e) => warn!("Cannot register for events on {}: {}", host.address(), e),
            }
        }
        warn!("No host to listen to schema changes through");
        None
    }

    async fn register_on(&self, host: &Host) -> Result<Arc<Connection>, RequestError> {
        let connection = host.pool().borrow().await?;
        let frame = connection
            .request(
                RegisterFrame::new(vec![RegisterEventType::SchemaChange]),
                Some(self.inner.dispatcher.config().request_timeout),
            )?
            .wait()
            .await?;
        match frame.into_body() {
            ResponseBody::Ready => Ok(connection),
            ResponseBody::Error(error) => Err(error.into()),
            other => Err(RequestError::UnexpectedResponse(format!(
                "{} in response to a REGISTER",
                opcode::name(other.opcode())
            ))),
        }
    }

    /// Close every pool. Executions still running fail.
    pub fn shutdown(&self) {
        for task in self.inner.lock_tasks().drain(..) {
            task.abort();
        }
        for host in self.hosts().iter() {
            host.pool().shutdown();
        }
        info!("Session shut down");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("dispatcher", &self.inner.dispatcher)
            .field("prepared", &self.inner.registry.len())
            .finish()
    }
}

/// A running execution.
#[derive(Debug)]
pub struct ExecutionHandle {
    task: JoinHandle<Result<QueryResult, ExecutionError>>,
}

impl ExecutionHandle {
    /// Stop the execution. Responses still in flight are discarded when they arrive.
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Future for ExecutionHandle {
    type Output = Result<QueryResult, ExecutionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.task.poll_unpin(cx).map(|res| match res {
            Ok(res) => res,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(ExecutionError::local(RequestError::Cancelled)),
        })
    }
}
