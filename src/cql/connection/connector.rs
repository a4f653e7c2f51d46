// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use super::{
    Connection,
    ConnectionError,
    ConnectionOptions,
};
use crate::cql::frame::{
    opcode,
    AuthResponseFrame,
    OptionsFrame,
    ResponseBody,
    StartupFrame,
    DEFAULT_CQL_VERSION,
};
use async_trait::async_trait;
use log::*;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    collections::HashMap,
    fmt::Debug,
    net::SocketAddr,
};
use tokio::net::TcpStream;

/// SASL style authentication, driven by the server's AUTHENTICATE and AUTH_CHALLENGE frames.
pub trait Authenticator: Send + Sync + Debug {
    /// The first token sent, given the server side authenticator class.
    fn initial_response(&self, authenticator: &str) -> Vec<u8>;

    /// Answer a challenge. The default gives up.
    fn evaluate_challenge(&self, _challenge: Option<&[u8]>) -> Result<Vec<u8>, ConnectionError> {
        Err(ConnectionError::Handshake("Unsupported authentication challenge".to_owned()))
    }
}

/// Sends an empty token, for servers which let everyone in.
#[derive(Debug, Clone, Default)]
pub struct AllowAllAuth;

impl Authenticator for AllowAllAuth {
    fn initial_response(&self, _authenticator: &str) -> Vec<u8> {
        vec![0]
    }
}

/// Username and password, sent as a SASL PLAIN token.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct PasswordAuth {
    user: String,
    pass: String,
}

impl Default for PasswordAuth {
    fn default() -> Self {
        PasswordAuth::new("cassandra".to_owned(), "cassandra".to_owned())
    }
}

impl PasswordAuth {
    pub fn new(user: String, pass: String) -> Self {
        Self { user, pass }
    }
}

impl Authenticator for PasswordAuth {
    fn initial_response(&self, _authenticator: &str) -> Vec<u8> {
        let mut token = Vec::with_capacity(self.user.len() + self.pass.len() + 2);
        token.push(0);
        token.extend_from_slice(self.user.as_bytes());
        token.push(0);
        token.extend_from_slice(self.pass.as_bytes());
        token
    }
}

/// Opens ready-to-use connections. The pool only ever talks to this trait.
#[async_trait]
pub trait Connector: Send + Sync + Debug {
    async fn connect(&self, address: SocketAddr, options: &ConnectionOptions) -> Result<Connection, ConnectionError>;
}

/// Connects over TCP and runs the startup handshake.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: SocketAddr, options: &ConnectionOptions) -> Result<Connection, ConnectionError> {
        let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ConnectionError::TimedOut)??;
        stream.set_nodelay(true)?;
        let connection = Connection::new(address, stream, options);
        tokio::time::timeout(options.connect_timeout, handshake(&connection, options))
            .await
            .map_err(|_| ConnectionError::TimedOut)??;
        info!("Connected to {} using protocol {}", address, options.version);
        Ok(connection)
    }
}

fn unexpected(step: &str, body: ResponseBody) -> ConnectionError {
    match body {
        ResponseBody::Error(error) => ConnectionError::Handshake(format!("{} failed: {}", step, error)),
        other => ConnectionError::Handshake(format!("Unexpected {} after {}", opcode::name(other.opcode()), step)),
    }
}

/// OPTIONS, then STARTUP, then authentication if the server asks for it.
pub async fn handshake(connection: &Connection, options: &ConnectionOptions) -> Result<(), ConnectionError> {
    let timeout = Some(options.connect_timeout);
    let supported = match connection.request(OptionsFrame, timeout)?.wait().await?.into_body() {
        ResponseBody::Supported(supported) => supported,
        other => return Err(unexpected("OPTIONS", other)),
    };
    let cql_version = supported
        .get("CQL_VERSION")
        .and_then(|versions| versions.first())
        .map(String::as_str)
        .unwrap_or(DEFAULT_CQL_VERSION);
    let mut startup = HashMap::new();
    startup.insert("CQL_VERSION".to_owned(), cql_version.to_owned());
    let authenticator = match connection
        .request(StartupFrame::new(startup), timeout)?
        .wait()
        .await?
        .into_body()
    {
        ResponseBody::Ready => return Ok(()),
        ResponseBody::Authenticate(authenticate) => authenticate.authenticator().to_owned(),
        other => return Err(unexpected("STARTUP", other)),
    };
    let auth = options.authenticator.as_ref().ok_or_else(|| {
        ConnectionError::Handshake(format!("{} requires authentication", authenticator))
    })?;
    debug!("Authenticating to {} with {}", connection.address(), authenticator);
    let mut token = auth.initial_response(&authenticator);
    loop {
        let res = connection
            .request(AuthResponseFrame::new(token), timeout)?
            .wait()
            .await?;
        token = match res.into_body() {
            ResponseBody::AuthSuccess(_) => return Ok(()),
            ResponseBody::AuthChallenge(challenge) => auth.evaluate_challenge(challenge.token())?,
            other => return Err(unexpected("AUTH_RESPONSE", other)),
        };
    }
}
