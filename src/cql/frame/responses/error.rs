// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The ERROR response.
//!
//! `<code><message>[additional]`, where the additional part depends on the code.

use super::*;
use anyhow::anyhow;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::{
    convert::TryFrom,
    fmt::Display,
    str::FromStr,
};

/// An error reported by the server.
#[derive(Error, Debug, Clone)]
pub struct ErrorFrame {
    pub(crate) code: ErrorCode,
    pub(crate) message: String,
    pub(crate) additional: Option<Additional>,
}

impl Display for ErrorFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)?;
        match &self.additional {
            Some(additional) => write!(f, " ({})", additional),
            None => Ok(()),
        }
    }
}

impl ErrorFrame {
    pub fn new(code: ErrorCode, message: impl Into<String>, additional: Option<Additional>) -> Self {
        Self {
            code,
            message: message.into(),
            additional,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn additional(&self) -> Option<&Additional> {
        self.additional.as_ref()
    }

    pub fn is_unprepared(&self) -> bool {
        self.code == ErrorCode::Unprepared
    }

    /// The statement id the server no longer knows.
    pub fn unprepared_id(&self) -> Option<&[u8]> {
        match &self.additional {
            Some(Additional::Unprepared(id)) => Some(id),
            _ => None,
        }
    }
}

impl FromPayload for ErrorFrame {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        let code = ErrorCode::try_from(read_int(start, payload)?)?;
        let message = read_string(start, payload)?;
        let additional = Additional::decode(code, start, payload)?;
        Ok(Self {
            code,
            message,
            additional,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(i32)]
pub enum ErrorCode {
    ServerError = 0x0000,
    ProtocolError = 0x000A,
    AuthenticationError = 0x0100,
    /// Too few replicas alive for the requested consistency; nothing was attempted.
    UnavailableException = 0x1000,
    Overloaded = 0x1001,
    IsBootstrapping = 0x1002,
    TruncateError = 0x1003,
    WriteTimeout = 0x1100,
    ReadTimeout = 0x1200,
    ReadFailure = 0x1300,
    FunctionFailure = 0x1400,
    WriteFailure = 0x1500,
    SyntaxError = 0x2000,
    Unauthorized = 0x2100,
    Invalid = 0x2200,
    ConfigError = 0x2300,
    AlreadyExists = 0x2400,
    /// The coordinator does not know the prepared id it was asked to execute.
    Unprepared = 0x2500,
}

impl TryFrom<i32> for ErrorCode {
    type Error = anyhow::Error;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        ErrorCode::from_i32(value).ok_or_else(|| anyhow!("Unknown error code {:#06x}", value))
    }
}

/// Typed details some error codes carry.
#[derive(Clone, Error, Debug)]
pub enum Additional {
    #[error("{0}")]
    UnavailableException(UnavailableException),
    #[error("{0}")]
    WriteTimeout(WriteTimeout),
    #[error("{0}")]
    ReadTimeout(ReadTimeout),
    #[error("{0}")]
    ReadFailure(ReadFailure),
    #[error("{0}")]
    FunctionFailure(FunctionFailure),
    #[error("{0}")]
    WriteFailure(WriteFailure),
    #[error("{0}")]
    AlreadyExists(AlreadyExists),
    #[error("unknown id {0:02x?}")]
    Unprepared(Vec<u8>),
}

impl Additional {
    fn decode(code: ErrorCode, start: &mut usize, payload: &[u8]) -> anyhow::Result<Option<Self>> {
        Ok(Some(match code {
            ErrorCode::UnavailableException => {
                Additional::UnavailableException(UnavailableException::from_payload(start, payload)?)
            }
            ErrorCode::WriteTimeout => Additional::WriteTimeout(WriteTimeout::from_payload(start, payload)?),
            ErrorCode::ReadTimeout => Additional::ReadTimeout(ReadTimeout::from_payload(start, payload)?),
            ErrorCode::ReadFailure => Additional::ReadFailure(ReadFailure::from_payload(start, payload)?),
            ErrorCode::FunctionFailure => Additional::FunctionFailure(FunctionFailure::from_payload(start, payload)?),
            ErrorCode::WriteFailure => Additional::WriteFailure(WriteFailure::from_payload(start, payload)?),
            ErrorCode::AlreadyExists => Additional::AlreadyExists(AlreadyExists::from_payload(start, payload)?),
            ErrorCode::Unprepared => Additional::Unprepared(read_short_bytes(start, payload)?.to_vec()),
            _ => return Ok(None),
        }))
    }
}

fn read_consistency(start: &mut usize, payload: &[u8]) -> anyhow::Result<Consistency> {
    Consistency::try_from(read_short(start, payload)?)
}

#[derive(Clone, Error, Debug)]
#[error("{alive} of {required} replicas alive at {consistency}")]
pub struct UnavailableException {
    pub consistency: Consistency,
    pub required: i32,
    pub alive: i32,
}

impl FromPayload for UnavailableException {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            consistency: read_consistency(start, payload)?,
            required: read_int(start, payload)?,
            alive: read_int(start, payload)?,
        })
    }
}

/// `received` acknowledgements out of the `block_for` needed.
#[derive(Clone, Error, Debug)]
#[error("{write_type} write acknowledged by {received} of {block_for} replicas at {consistency}")]
pub struct WriteTimeout {
    pub consistency: Consistency,
    pub received: i32,
    pub block_for: i32,
    pub write_type: WriteType,
}

impl FromPayload for WriteTimeout {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            consistency: read_consistency(start, payload)?,
            received: read_int(start, payload)?,
            block_for: read_int(start, payload)?,
            write_type: read_str(start, payload)?.parse()?,
        })
    }
}

#[derive(Clone, Error, Debug)]
#[error("read answered by {received} of {block_for} replicas at {consistency} (data present: {data_present})")]
pub struct ReadTimeout {
    pub consistency: Consistency,
    pub received: i32,
    pub block_for: i32,
    /// Whether the replica asked for the actual data answered.
    pub data_present: bool,
}

impl ReadTimeout {
    pub fn replica_had_not_responded(&self) -> bool {
        !self.data_present
    }
}

impl FromPayload for ReadTimeout {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            consistency: read_consistency(start, payload)?,
            received: read_int(start, payload)?,
            block_for: read_int(start, payload)?,
            data_present: read_byte(start, payload)? != 0,
        })
    }
}

#[derive(Clone, Error, Debug)]
#[error("read failed on {failures} replica(s), {received} of {block_for} answered at {consistency}")]
pub struct ReadFailure {
    pub consistency: Consistency,
    pub received: i32,
    pub block_for: i32,
    pub failures: i32,
    pub data_present: bool,
}

impl FromPayload for ReadFailure {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            consistency: read_consistency(start, payload)?,
            received: read_int(start, payload)?,
            block_for: read_int(start, payload)?,
            failures: read_int(start, payload)?,
            data_present: read_byte(start, payload)? != 0,
        })
    }
}

#[derive(Clone, Error, Debug)]
#[error("{keyspace}.{function}({})", .arg_types.join(", "))]
pub struct FunctionFailure {
    pub keyspace: String,
    pub function: String,
    pub arg_types: Vec<String>,
}

impl FromPayload for FunctionFailure {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            keyspace: read_string(start, payload)?,
            function: read_string(start, payload)?,
            arg_types: read_string_list(start, payload)?,
        })
    }
}

#[derive(Clone, Error, Debug)]
#[error("{write_type} write failed on {failures} replica(s), {received} of {block_for} acknowledged at {consistency}")]
pub struct WriteFailure {
    pub consistency: Consistency,
    pub received: i32,
    pub block_for: i32,
    pub failures: i32,
    pub write_type: WriteType,
}

impl FromPayload for WriteFailure {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            consistency: read_consistency(start, payload)?,
            received: read_int(start, payload)?,
            block_for: read_int(start, payload)?,
            failures: read_int(start, payload)?,
            write_type: read_str(start, payload)?.parse()?,
        })
    }
}

/// `table` is empty when the keyspace itself exists.
#[derive(Clone, Error, Debug)]
#[error("{keyspace}.{table} already exists")]
pub struct AlreadyExists {
    pub keyspace: String,
    pub table: String,
}

impl FromPayload for AlreadyExists {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            keyspace: read_string(start, payload)?,
            table: read_string(start, payload)?,
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WriteType {
    Simple,
    Batch,
    UnloggedBatch,
    Counter,
    BatchLog,
    Cas,
    View,
    Cdc,
}

const WRITE_TYPES: [(WriteType, &str); 8] = [
    (WriteType::Simple, "SIMPLE"),
    (WriteType::Batch, "BATCH"),
    (WriteType::UnloggedBatch, "UNLOGGED_BATCH"),
    (WriteType::Counter, "COUNTER"),
    (WriteType::BatchLog, "BATCH_LOG"),
    (WriteType::Cas, "CAS"),
    (WriteType::View, "VIEW"),
    (WriteType::Cdc, "CDC"),
];

impl WriteType {
    pub fn as_str(&self) -> &'static str {
        WRITE_TYPES
            .iter()
            .find(|(t, _)| t == self)
            .map(|(_, name)| *name)
            .unwrap_or("SIMPLE")
    }
}

impl FromStr for WriteType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WRITE_TYPES
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(t, _)| *t)
            .ok_or_else(|| anyhow!("Unknown write type {:?}", s))
    }
}

impl Display for WriteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
