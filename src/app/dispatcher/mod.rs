// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Executes statements against the cluster.
//!
//! Every execution gets its own query plan from the load balancing policy. The plan is shared
//! by the execution and its speculative siblings, so no two of them ever pick the same host.
//! The first execution to succeed wins and the others are cancelled, which orphans their
//! streams on their connections.

mod error;
mod execution;

pub use error::*;

use self::execution::{
    ExecutionContext,
    Stats,
};
use super::{
    config::ClientConfig,
    host::Host,
    policy::{
        DefaultRetryPolicy,
        LoadBalancingPolicy,
        RetryPolicy,
        RoundRobinPolicy,
        SpeculativeExecutionPolicy,
    },
    registry::PreparedStatementRegistry,
    result::QueryResult,
    statement::{
        PreparedStatement,
        Statement,
    },
};
use crate::cql::types::CodecRegistry;
use arc_swap::ArcSwap;
use futures::stream::{
    FuturesUnordered,
    StreamExt,
};
use log::*;
use std::{
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};
use tokio::time::Instant;

pub struct Dispatcher {
    hosts: ArcSwap<Vec<Arc<Host>>>,
    load_balancing: Arc<dyn LoadBalancingPolicy>,
    retry: Arc<dyn RetryPolicy>,
    speculative: Arc<dyn SpeculativeExecutionPolicy>,
    registry: Arc<PreparedStatementRegistry>,
    codecs: Arc<CodecRegistry>,
    config: Arc<ClientConfig>,
}

impl Dispatcher {
    /// A dispatcher with round robin load balancing, the default retry table and the
    /// speculative executions of `config`. It has no host until [`Dispatcher::set_hosts`].
    pub fn new(config: Arc<ClientConfig>, registry: Arc<PreparedStatementRegistry>, codecs: Arc<CodecRegistry>) -> Self {
        Self {
            hosts: ArcSwap::from_pointee(Vec::new()),
            load_balancing: Arc::new(RoundRobinPolicy::new()),
            retry: Arc::new(DefaultRetryPolicy),
            speculative: (&config.speculative).into(),
            registry,
            codecs,
            config,
        }
    }

    pub fn with_load_balancing(mut self, policy: Arc<dyn LoadBalancingPolicy>) -> Self {
        self.load_balancing = policy;
        self
    }

    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_speculative_policy(mut self, policy: Arc<dyn SpeculativeExecutionPolicy>) -> Self {
        self.speculative = policy;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn codecs(&self) -> &Arc<CodecRegistry> {
        &self.codecs
    }

    pub fn registry(&self) -> &Arc<PreparedStatementRegistry> {
        &self.registry
    }

    /// Replace the known hosts. Executions already running keep their plans.
    pub fn set_hosts(&self, hosts: Vec<Arc<Host>>) {
        self.hosts.store(Arc::new(hosts));
    }

    pub fn add_host(&self, host: Arc<Host>) {
        self.hosts.rcu(|hosts| {
            let mut hosts = Vec::clone(hosts);
            hosts.retain(|h| h.address() != host.address());
            hosts.push(host.clone());
            hosts
        });
    }

    pub fn hosts(&self) -> Arc<Vec<Arc<Host>>> {
        self.hosts.load_full()
    }

    /// Execute a statement.
    ///
    /// Values are encoded before anything is sent, so a codec or binding failure never reaches
    /// the network. Idempotence is resolved once and holds for every attempt.
    pub async fn execute(&self, statement: &Statement) -> Result<QueryResult, ExecutionError> {
        let idempotent = statement.is_idempotent(self.config.default_idempotence);
        let values = statement
            .encode_values(&self.codecs, self.config.protocol_version)
            .map_err(ExecutionError::local)?;
        let ctx = ExecutionContext {
            statement,
            values,
            idempotent,
            plan: Mutex::new(self.load_balancing.new_query_plan(statement, self.hosts())),
            stats: Mutex::new(Stats::default()),
        };
        let res = match self.speculative.next_execution(1) {
            Some(delay) if idempotent => self.run_speculative(&ctx, delay).await,
            _ => self.run(&ctx).await,
        };
        res.map_err(|error| {
            let stats = ctx.stats.into_inner().unwrap_or_else(|e| e.into_inner());
            debug!(
                "'{}' failed after {} attempt(s): {}",
                statement.query(),
                stats.attempts,
                error
            );
            ExecutionError::new(error, stats.attempts, stats.hosts_tried)
        })
    }

    async fn run_speculative(&self, ctx: &ExecutionContext<'_>, delay: Duration) -> Result<QueryResult, RequestError> {
        let mut running = FuturesUnordered::new();
        running.push(self.run(ctx));
        let mut started = 1;
        let mut speculating = true;
        let mut last_error = None;
        let timer = tokio::time::sleep(delay);
        tokio::pin!(timer);
        loop {
            tokio::select! {
                Some(res) = running.next() => match res {
                    Ok(result) => return Ok(result),
                    Err(error) => {
                        // A late sibling finding the plan empty says less than the first failure
                        if last_error.is_none() || !matches!(error, RequestError::NoHostAvailable) {
                            last_error = Some(error);
                        }
                        if running.is_empty() {
                            break;
                        }
                    }
                },
                _ = &mut timer, if speculating => {
                    started += 1;
                    debug!("Starting speculative execution {} of '{}'", started, ctx.statement.query());
                    running.push(self.run(ctx));
                    match self.speculative.next_execution(started) {
                        Some(delay) => timer.as_mut().reset(Instant::now() + delay),
                        None => speculating = false,
                    }
                }
                else => break,
            }
        }
        Err(last_error.unwrap_or(RequestError::NoHostAvailable))
    }

    /// Prepare `query` on the first host of a plan that accepts it. Errors which another host
    /// would report just the same are not retried.
    pub async fn prepare(&self, query: &str) -> Result<PreparedStatement, ExecutionError> {
        let statement = Statement::from(query);
        let plan = self.load_balancing.new_query_plan(&statement, self.hosts());
        let mut attempts = 0;
        let mut hosts_tried = Vec::new();
        let mut last_error = None;
        for host in plan {
            hosts_tried.push(host.address());
            match self.prepare_on(&host, query).await {
                Ok(prepared) => return Ok(prepared),
                Err(error) => {
                    if !error.is_pre_send() {
                        attempts += 1;
                    }
                    if error.is_local() || error.kind().is_semantic() {
                        return Err(ExecutionError::new(error, attempts, hosts_tried));
                    }
                    warn!("Preparing '{}' on {} failed: {}", query, host.address(), error);
                    last_error = Some(error);
                }
            }
        }
        Err(ExecutionError::new(
            last_error.unwrap_or(RequestError::NoHostAvailable),
            attempts,
            hosts_tried,
        ))
    }

    /// Prepare `query` on one host, bypassing the registry.
    pub async fn prepare_on(&self, host: &Host, query: &str) -> Result<PreparedStatement, RequestError> {
        let connection = host.pool().borrow().await?;
        self.prepare_with(&connection, query).await
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("hosts", &self.hosts.load())
            .field("load_balancing", &self.load_balancing)
            .field("retry", &self.retry)
            .field("speculative", &self.speculative)
            .finish()
    }
}
