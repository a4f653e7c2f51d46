// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Execution core of an async Scylla/Cassandra driver.
//!
//! `cql` holds the wire level: frames, the value codec and multiplexed connections.
//! `app` holds everything above a single connection: host pools, policies,
//! statements, the prepared statement registry and the request dispatcher.

pub mod app;
pub mod cql;

pub mod prelude {
    pub use super::{
        app::{
            config::*,
            dispatcher::{
                Dispatcher,
                ErrorKind,
                ExecutionError,
                RequestError,
            },
            host::{
                Host,
                HostState,
            },
            policy::*,
            pool::{
                HostConnectionPool,
                PoolError,
            },
            registry::PreparedStatementRegistry,
            result::*,
            session::{
                ExecutionHandle,
                Session,
                SessionBuilder,
            },
            statement::*,
        },
        cql::{
            connection::{
                Authenticator,
                Connection,
                ConnectionError,
                ConnectionOptions,
                Connector,
                PasswordAuth,
                PendingResponse,
                ResponseState,
                TcpConnector,
            },
            frame::{
                Consistency,
                ProtocolVersion,
            },
            types::*,
        },
    };
}
