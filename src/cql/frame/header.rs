// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module defines the frame header and the negotiated protocol version.

use super::{
    FromPayload,
    ToPayload,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    convert::TryFrom,
    fmt::Display,
};

/// The compression flag.
pub const COMPRESSION: u8 = 0x01;
/// The tracing flag.
pub const TRACING: u8 = 0x02;
/// The custom payload flag.
pub const CUSTOM_PAYLOAD: u8 = 0x04;
/// The warning flag.
pub const WARNING: u8 = 0x08;

/// Response frames carry this bit in their version byte.
const RESPONSE_BIT: u8 = 0x80;

/// The native protocol versions this driver speaks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProtocolVersion {
    V2 = 0x02,
    V3 = 0x03,
    V4 = 0x04,
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        ProtocolVersion::V4
    }
}

impl Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", *self as u8)
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = super::FrameError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte & !RESPONSE_BIT {
            0x02 => Ok(ProtocolVersion::V2),
            0x03 => Ok(ProtocolVersion::V3),
            0x04 => Ok(ProtocolVersion::V4),
            v => Err(super::FrameError::UnsupportedVersion(v)),
        }
    }
}

impl ProtocolVersion {
    /// Length of the frame header in bytes.
    pub fn header_len(self) -> usize {
        match self {
            ProtocolVersion::V2 => 8,
            _ => 9,
        }
    }

    /// Number of stream ids a single connection can have in flight.
    pub fn max_streams(self) -> usize {
        match self {
            ProtocolVersion::V2 => 128,
            _ => 32768,
        }
    }

    /// Width in bytes of collection element counts and element lengths.
    pub fn collection_len_width(self) -> usize {
        match self {
            ProtocolVersion::V2 => 2,
            _ => 4,
        }
    }

    /// Whether `[value]`s may be sent as unset (length -2).
    pub fn supports_unset(self) -> bool {
        self >= ProtocolVersion::V4
    }

    /// Whether PREPARED metadata carries the partition key indexes.
    pub fn has_pk_indexes(self) -> bool {
        self >= ProtocolVersion::V4
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    Request = 0,
    Response = 1,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Flags(pub u8);

impl Flags {
    pub fn compression(&self) -> bool {
        self.0 & COMPRESSION != 0
    }

    pub fn tracing(&self) -> bool {
        self.0 & TRACING != 0
    }

    pub fn custom_payload(&self) -> bool {
        self.0 & CUSTOM_PAYLOAD != 0
    }

    pub fn warning(&self) -> bool {
        self.0 & WARNING != 0
    }
}

/// A frame header.
///
/// v2 headers are 8 bytes with a one byte signed stream id, v3 and later headers are 9 bytes
/// with a two byte signed stream id.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Header {
    version: u8,
    flags: Flags,
    stream: i16,
    opcode: u8,
    body_len: u32,
}

impl Header {
    /// Create a request header for the given version.
    pub fn new(version: ProtocolVersion, opcode: u8) -> Self {
        Self {
            version: version as u8,
            flags: Flags::default(),
            stream: 0,
            opcode,
            body_len: 0,
        }
    }

    /// Create a response header for the given version.
    pub fn response(version: ProtocolVersion, opcode: u8) -> Self {
        Self {
            version: version as u8 | RESPONSE_BIT,
            ..Self::new(version, opcode)
        }
    }

    pub fn direction(&self) -> Direction {
        match self.version & RESPONSE_BIT {
            0 => Direction::Request,
            _ => Direction::Response,
        }
    }

    pub fn version(&self) -> Result<ProtocolVersion, super::FrameError> {
        ProtocolVersion::try_from(self.version)
    }

    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    pub fn flags_mut(&mut self) -> &mut Flags {
        &mut self.flags
    }

    pub fn stream(&self) -> i16 {
        self.stream
    }

    pub fn set_stream(&mut self, stream: i16) {
        self.stream = stream;
    }

    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    pub fn body_len(&self) -> u32 {
        self.body_len
    }

    pub fn set_body_len(&mut self, body_len: u32) {
        self.body_len = body_len;
    }

    /// Length of this header on the wire.
    pub fn len(&self) -> usize {
        self.version().map(ProtocolVersion::header_len).unwrap_or(9)
    }
}

impl FromPayload for Header {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        anyhow::ensure!(payload.len() > *start, "Payload is too small");
        let version = ProtocolVersion::try_from(payload[*start])?;
        let len = version.header_len();
        anyhow::ensure!(payload.len() >= *start + len, "Payload is too small");
        let bytes = &payload[*start..][..len];
        let (stream, rest) = match version {
            ProtocolVersion::V2 => (bytes[2] as i8 as i16, &bytes[3..]),
            _ => (i16::from_be_bytes([bytes[2], bytes[3]]), &bytes[4..]),
        };
        *start += len;
        Ok(Header {
            version: bytes[0],
            flags: Flags(bytes[1]),
            stream,
            opcode: rest[0],
            body_len: u32::from_be_bytes([rest[1], rest[2], rest[3], rest[4]]),
        })
    }
}

impl ToPayload for Header {
    fn to_payload(self, payload: &mut Vec<u8>) {
        payload.reserve(self.len() + self.body_len as usize);
        payload.push(self.version);
        payload.push(self.flags.0);
        match self.version() {
            Ok(ProtocolVersion::V2) => payload.push(self.stream as i8 as u8),
            _ => payload.extend_from_slice(&self.stream.to_be_bytes()),
        }
        payload.push(self.opcode);
        payload.extend_from_slice(&self.body_len.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_header_is_nine_bytes() {
        let mut header = Header::new(ProtocolVersion::V4, 0x07);
        header.set_stream(300);
        header.set_body_len(17);
        let mut payload = Vec::new();
        header.to_payload(&mut payload);
        assert_eq!(payload, vec![0x04, 0, 0x01, 0x2C, 0x07, 0, 0, 0, 17]);
        let decoded = Header::from_payload(&mut 0, &payload).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.direction(), Direction::Request);
    }

    #[test]
    fn v2_header_has_single_byte_stream() {
        let mut header = Header::response(ProtocolVersion::V2, 0x08);
        header.set_stream(-1);
        let mut payload = Vec::new();
        header.to_payload(&mut payload);
        assert_eq!(payload.len(), 8);
        assert_eq!(payload[0], 0x82);
        assert_eq!(payload[2], 0xFF);
        let decoded = Header::from_payload(&mut 0, &payload).unwrap();
        assert_eq!(decoded.stream(), -1);
        assert_eq!(decoded.direction(), Direction::Response);
        assert_eq!(decoded.version().unwrap(), ProtocolVersion::V2);
    }

    #[test]
    fn unknown_versions_are_rejected() {
        let payload = [0x85, 0, 0, 0, 0x08, 0, 0, 0, 0];
        assert!(Header::from_payload(&mut 0, &payload).is_err());
    }

    #[test]
    fn stream_capacity_by_version() {
        assert_eq!(ProtocolVersion::V2.max_streams(), 128);
        assert_eq!(ProtocolVersion::V3.max_streams(), 32768);
        assert!(!ProtocolVersion::V3.supports_unset());
        assert!(ProtocolVersion::V4.supports_unset());
    }
}
