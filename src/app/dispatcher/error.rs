// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crate::{
    app::{
        pool::PoolError,
        statement::BindError,
    },
    cql::{
        connection::ConnectionError,
        frame::{
            ErrorCode,
            ErrorFrame,
        },
        types::CodecError,
    },
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt::Display,
    net::SocketAddr,
};
use thiserror::Error;

/// The condition which ended one attempt of an execution.
#[derive(Error, Debug, Clone)]
pub enum RequestError {
    #[error("Server error: {0}")]
    Server(ErrorFrame),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error("No host available")]
    NoHostAvailable,
    #[error("Execution cancelled")]
    Cancelled,
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl From<ErrorFrame> for RequestError {
    fn from(frame: ErrorFrame) -> Self {
        RequestError::Server(frame)
    }
}

impl RequestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RequestError::Server(frame) => frame.code().into(),
            RequestError::Connection(ConnectionError::StreamsExhausted) => ErrorKind::StreamsExhausted,
            RequestError::Connection(ConnectionError::TimedOut) => ErrorKind::TimedOut,
            RequestError::Connection(_) => ErrorKind::ConnectionClosed,
            RequestError::Pool(PoolError::Busy(_)) => ErrorKind::StreamsExhausted,
            RequestError::Pool(_) => ErrorKind::NoHostAvailable,
            RequestError::Codec(CodecError::CodecNotFound { .. }) => ErrorKind::CodecNotFound,
            RequestError::Codec(_) => ErrorKind::Codec,
            RequestError::Bind(_) => ErrorKind::InvalidBinding,
            RequestError::NoHostAvailable => ErrorKind::NoHostAvailable,
            RequestError::Cancelled => ErrorKind::Cancelled,
            RequestError::UnexpectedResponse(_) => ErrorKind::ProtocolError,
        }
    }

    /// Failures which happened before the request was written to any connection.
    /// Moving on to the next host is always safe for those.
    pub fn is_pre_send(&self) -> bool {
        matches!(
            self,
            RequestError::Pool(_) | RequestError::Connection(ConnectionError::StreamsExhausted)
        )
    }

    /// The connection carrying the request broke, or the request got no answer in time.
    pub fn is_transport(&self) -> bool {
        matches!(self, RequestError::Connection(_)) && !self.is_pre_send()
    }

    /// Codec and binding problems are detected before any I/O and never retried.
    pub fn is_local(&self) -> bool {
        matches!(self, RequestError::Codec(_) | RequestError::Bind(_))
    }

    pub fn server_code(&self) -> Option<ErrorCode> {
        match self {
            RequestError::Server(frame) => Some(frame.code()),
            _ => None,
        }
    }
}

/// The kind of condition a failed execution ended with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    // Reported by the server
    ReadTimeout,
    WriteTimeout,
    Unavailable,
    Overloaded,
    Bootstrapping,
    Unprepared,
    SyntaxError,
    Invalid,
    AlreadyExists,
    ConfigError,
    AuthenticationError,
    Unauthorized,
    ReadFailure,
    WriteFailure,
    FunctionFailure,
    TruncateError,
    ServerError,
    ProtocolError,
    // Raised by the client
    NoHostAvailable,
    ConnectionClosed,
    StreamsExhausted,
    CodecNotFound,
    Codec,
    InvalidBinding,
    Cancelled,
    TimedOut,
}

impl ErrorKind {
    /// Conditions which are a property of the statement itself; retrying can not help.
    pub fn is_semantic(&self) -> bool {
        matches!(
            self,
            ErrorKind::SyntaxError
                | ErrorKind::Invalid
                | ErrorKind::AlreadyExists
                | ErrorKind::ConfigError
                | ErrorKind::AuthenticationError
                | ErrorKind::Unauthorized
                | ErrorKind::FunctionFailure
                | ErrorKind::ProtocolError
        )
    }
}

impl From<ErrorCode> for ErrorKind {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::ServerError => ErrorKind::ServerError,
            ErrorCode::ProtocolError => ErrorKind::ProtocolError,
            ErrorCode::AuthenticationError => ErrorKind::AuthenticationError,
            ErrorCode::UnavailableException => ErrorKind::Unavailable,
            ErrorCode::Overloaded => ErrorKind::Overloaded,
            ErrorCode::IsBootstrapping => ErrorKind::Bootstrapping,
            ErrorCode::TruncateError => ErrorKind::TruncateError,
            ErrorCode::WriteTimeout => ErrorKind::WriteTimeout,
            ErrorCode::ReadTimeout => ErrorKind::ReadTimeout,
            ErrorCode::ReadFailure => ErrorKind::ReadFailure,
            ErrorCode::FunctionFailure => ErrorKind::FunctionFailure,
            ErrorCode::WriteFailure => ErrorKind::WriteFailure,
            ErrorCode::SyntaxError => ErrorKind::SyntaxError,
            ErrorCode::Unauthorized => ErrorKind::Unauthorized,
            ErrorCode::Invalid => ErrorKind::Invalid,
            ErrorCode::ConfigError => ErrorKind::ConfigError,
            ErrorCode::AlreadyExists => ErrorKind::AlreadyExists,
            ErrorCode::Unprepared => ErrorKind::Unprepared,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A failed execution, as seen by the caller.
#[derive(Error, Debug, Clone)]
#[error("{kind} after {attempts} attempt(s) on {hosts_tried:?}: {source}")]
pub struct ExecutionError {
    pub kind: ErrorKind,
    #[source]
    pub source: RequestError,
    /// Requests written to a connection, retries and speculative executions included.
    pub attempts: u32,
    /// Hosts tried, in order, without duplicates.
    pub hosts_tried: Vec<SocketAddr>,
}

impl ExecutionError {
    pub fn new(source: RequestError, attempts: u32, hosts_tried: Vec<SocketAddr>) -> Self {
        Self {
            kind: source.kind(),
            source,
            attempts,
            hosts_tried,
        }
    }

    /// A failure detected before any host was contacted.
    pub fn local(source: impl Into<RequestError>) -> Self {
        Self::new(source.into(), 0, Vec::new())
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn server_error(&self) -> Option<&ErrorFrame> {
        match &self.source {
            RequestError::Server(frame) => Some(frame),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_of_client_side_conditions() {
        let address: SocketAddr = "127.0.0.1:9042".parse().unwrap();
        assert_eq!(
            RequestError::from(ConnectionError::StreamsExhausted).kind(),
            ErrorKind::StreamsExhausted
        );
        assert_eq!(RequestError::from(PoolError::Busy(address)).kind(), ErrorKind::StreamsExhausted);
        assert_eq!(RequestError::from(ConnectionError::Closed).kind(), ErrorKind::ConnectionClosed);
        assert_eq!(RequestError::from(ConnectionError::TimedOut).kind(), ErrorKind::TimedOut);
        assert!(RequestError::from(PoolError::Shutdown(address)).is_pre_send());
        assert!(RequestError::from(ConnectionError::HeartbeatFailed).is_transport());
        assert!(!RequestError::from(ConnectionError::StreamsExhausted).is_transport());
    }

    #[test]
    fn server_codes_map_to_kinds() {
        let error = RequestError::from(ErrorFrame::new(ErrorCode::SyntaxError, "line 1:0", None));
        assert_eq!(error.kind(), ErrorKind::SyntaxError);
        assert!(error.kind().is_semantic());
        assert!(!ErrorKind::from(ErrorCode::WriteTimeout).is_semantic());
        let failed = ExecutionError::new(error, 1, vec!["127.0.0.1:9042".parse().unwrap()]);
        assert_eq!(failed.kind(), ErrorKind::SyntaxError);
        assert_eq!(failed.server_error().unwrap().message(), "line 1:0");
    }
}
