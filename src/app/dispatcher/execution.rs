// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! One execution fiber: walk the query plan, send, and apply the retry decisions.

use super::{
    Dispatcher,
    RequestError,
};
use crate::{
    app::{
        host::Host,
        policy::{
            QueryPlan,
            RetryDecision,
            RetryInfo,
        },
        result::{
            QueryResult,
            Rows,
        },
        statement::{
            PreparedStatement,
            Statement,
        },
    },
    cql::{
        connection::Connection,
        frame::{
            opcode,
            Additional,
            ColumnSpec,
            Consistency,
            ExecuteFrame,
            PrepareFrame,
            QueryFrame,
            QueryParameters,
            RequestBody,
            ResponseBody,
            ResponseFrame,
            ResultBodyKind,
            Values,
        },
    },
};
use log::*;
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        Mutex,
    },
};

#[derive(Debug, Default)]
pub(super) struct Stats {
    pub(super) attempts: u32,
    pub(super) hosts_tried: Vec<SocketAddr>,
}

/// State shared by every fiber of one execution.
pub(super) struct ExecutionContext<'a> {
    pub(super) statement: &'a Statement,
    pub(super) values: Values,
    /// Resolved once, before the first attempt.
    pub(super) idempotent: bool,
    pub(super) plan: Mutex<QueryPlan>,
    pub(super) stats: Mutex<Stats>,
}

impl<'a> ExecutionContext<'a> {
    fn next_host(&self) -> Option<Arc<Host>> {
        self.plan.lock().unwrap_or_else(|e| e.into_inner()).next()
    }

    fn tried(&self, address: SocketAddr) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        if !stats.hosts_tried.contains(&address) {
            stats.hosts_tried.push(address);
        }
    }

    fn attempted(&self) {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).attempts += 1;
    }
}

impl Dispatcher {
    /// Run attempts until one succeeds, the plan is exhausted, or the retry policy gives up.
    pub(super) async fn run(&self, ctx: &ExecutionContext<'_>) -> Result<QueryResult, RequestError> {
        let statement = ctx.statement;
        let mut consistency = statement.options().consistency.unwrap_or(self.config.consistency);
        let mut prepared = match statement {
            Statement::Bound(bound) => Some(bound.prepared().clone()),
            Statement::Simple(_) => None,
        };
        let mut retry_count = 0;
        let mut last_error = None;
        'hosts: while let Some(host) = ctx.next_host() {
            ctx.tried(host.address());
            let mut reprepared = false;
            loop {
                let connection = match host.pool().borrow().await {
                    Ok(connection) => connection,
                    Err(e) => {
                        debug!("Skipping host {}: {}", host.address(), e);
                        last_error = Some(e.into());
                        continue 'hosts;
                    }
                };
                let body = self.request_body(ctx, consistency, prepared.as_ref());
                let pending = match connection.request(body, Some(self.config.request_timeout)) {
                    Ok(pending) => pending,
                    Err(e) => {
                        // Never written, safe to move on whatever the idempotence
                        debug!("Could not send to {}: {}", host.address(), e);
                        last_error = Some(e.into());
                        continue 'hosts;
                    }
                };
                ctx.attempted();
                let error = match pending.wait().await {
                    Ok(frame) => match self.into_result(frame, prepared.as_ref()) {
                        Ok(result) => return Ok(result),
                        Err(e) => e,
                    },
                    Err(e) => e.into(),
                };
                if let RequestError::Server(frame) = &error {
                    if frame.is_unprepared() {
                        match (&prepared, reprepared) {
                            (Some(statement), false) => {
                                reprepared = true;
                                match self.reprepare(&connection, statement).await {
                                    Ok(statement) => {
                                        prepared = Some(statement);
                                        continue;
                                    }
                                    Err(e) => {
                                        warn!("Re-preparing on {} failed: {}", host.address(), e);
                                        last_error = Some(e);
                                        continue 'hosts;
                                    }
                                }
                            }
                            _ => return Err(error),
                        }
                    }
                }
                if error.is_local() || error.kind().is_semantic() {
                    return Err(error);
                }
                let info = RetryInfo {
                    consistency,
                    retry_count,
                    max_retries: self.config.max_retries,
                    idempotent: ctx.idempotent,
                };
                let decision = self.decide(&info, &error);
                trace!("{} on {}: {:?}", error, host.address(), decision);
                // Only conditions reported by the server spend the retry budget
                let spends_budget = matches!(error, RequestError::Server(_));
                match decision {
                    RetryDecision::RetrySameHost(cl) | RetryDecision::RetryNextHost(cl) => {
                        if spends_budget {
                            retry_count += 1;
                        }
                        consistency = cl.unwrap_or(consistency);
                        last_error = Some(error);
                        if let RetryDecision::RetryNextHost(_) = decision {
                            continue 'hosts;
                        }
                    }
                    RetryDecision::Rethrow => return Err(error),
                    RetryDecision::Ignore => return Ok(QueryResult::Void),
                }
            }
        }
        Err(last_error.unwrap_or(RequestError::NoHostAvailable))
    }

    fn decide(&self, info: &RetryInfo, error: &RequestError) -> RetryDecision {
        let additional = match error {
            RequestError::Server(frame) => frame.additional(),
            _ => None,
        };
        match additional {
            Some(Additional::ReadTimeout(timeout)) => self.retry.on_read_timeout(info, timeout),
            Some(Additional::WriteTimeout(timeout)) => self.retry.on_write_timeout(info, timeout),
            Some(Additional::UnavailableException(unavailable)) => self.retry.on_unavailable(info, unavailable),
            _ => self.retry.on_request_error(info, error),
        }
    }

    fn request_body(
        &self,
        ctx: &ExecutionContext<'_>,
        consistency: Consistency,
        prepared: Option<&PreparedStatement>,
    ) -> RequestBody {
        let options = ctx.statement.options();
        let parameters = QueryParameters {
            consistency,
            values: ctx.values.clone(),
            skip_metadata: false,
            page_size: options.page_size.or(self.config.page_size),
            paging_state: options.paging_state.clone(),
            serial_consistency: options.serial_consistency,
            timestamp: options.timestamp,
        };
        match prepared {
            Some(prepared) => ExecuteFrame {
                id: prepared.id().to_vec(),
                parameters,
            }
            .into(),
            None => QueryFrame {
                statement: ctx.statement.query().to_string(),
                parameters,
            }
            .into(),
        }
    }

    fn into_result(&self, frame: ResponseFrame, prepared: Option<&PreparedStatement>) -> Result<QueryResult, RequestError> {
        for warning in frame.warnings() {
            warn!("Server warning: {}", warning);
        }
        let version = frame.header().version().unwrap_or(self.config.protocol_version);
        match frame.into_body() {
            ResponseBody::Result(result) => Ok(match result.into_kind() {
                ResultBodyKind::Void => QueryResult::Void,
                ResultBodyKind::Rows(rows) => {
                    let fallback: &[ColumnSpec] = prepared.map(|p| p.result_columns()).unwrap_or_default();
                    QueryResult::Rows(Rows::decode(&rows, fallback, &self.codecs, version)?)
                }
                ResultBodyKind::SetKeyspace(keyspace) => QueryResult::SetKeyspace(keyspace),
                ResultBodyKind::SchemaChange(change) => {
                    self.registry.on_schema_change(change.change_type, &change.target);
                    QueryResult::SchemaChange(change)
                }
                ResultBodyKind::Prepared(_) => {
                    return Err(RequestError::UnexpectedResponse("PREPARED result to an execution".into()))
                }
            }),
            ResponseBody::Error(error) => Err(error.into()),
            other => Err(RequestError::UnexpectedResponse(format!(
                "{} in response to an execution",
                opcode::name(other.opcode())
            ))),
        }
    }

    /// PREPARE `query` on one connection.
    pub(super) async fn prepare_with(&self, connection: &Connection, query: &str) -> Result<PreparedStatement, RequestError> {
        let pending = connection.request(PrepareFrame::new(query.to_string()), Some(self.config.request_timeout))?;
        let frame = pending.wait().await?;
        match frame.into_body() {
            ResponseBody::Result(result) => match result.kind() {
                ResultBodyKind::Prepared(prepared) => Ok(PreparedStatement::from_result(query, prepared)),
                other => Err(RequestError::UnexpectedResponse(format!(
                    "{:?} result to a PREPARE",
                    other
                ))),
            },
            ResponseBody::Error(error) => Err(error.into()),
            other => Err(RequestError::UnexpectedResponse(format!(
                "{} in response to a PREPARE",
                opcode::name(other.opcode())
            ))),
        }
    }

    /// The host forgot a statement: prepare it again there and keep the registry in sync.
    async fn reprepare(&self, connection: &Connection, statement: &PreparedStatement) -> Result<PreparedStatement, RequestError> {
        info!(
            "Re-preparing statement on {}: '{}'",
            connection.address(),
            statement.query()
        );
        let fresh = self.prepare_with(connection, statement.query()).await?;
        if fresh.id() == statement.id() {
            return Ok(statement.clone());
        }
        // The caller's handle keeps its own flags, the registry gets the server's view
        let statement = statement.with_id(fresh.id().to_vec());
        self.registry.insert(fresh);
        Ok(statement)
    }
}
