// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module implements decoder/encoder for a Cassandra frame and the associated protocol.
//! See `https://github.com/apache/cassandra/blob/trunk/doc/native_protocol_v4.spec` for more details.
//!
//! Versions 2 to 4 of the native protocol are supported. The version drives the header length,
//! the stream id width and the width of collection length prefixes.

pub mod consistency;
pub mod header;
pub mod opcode;
pub mod requests;
pub mod responses;

pub use consistency::Consistency;
pub use header::{
    Direction,
    Flags,
    Header,
    ProtocolVersion,
};
pub use requests::{
    auth_response::AuthResponseFrame,
    execute::{
        ExecuteFrame,
        ExecuteFrameBuilder,
    },
    options::OptionsFrame,
    prepare::PrepareFrame,
    query::{
        QueryFrame,
        QueryFrameBuilder,
    },
    query_flags::QueryFlags,
    register::{
        RegisterEventType,
        RegisterFrame,
    },
    startup::{
        StartupFrame,
        StartupFrameBuilder,
        DEFAULT_CQL_VERSION,
    },
    QueryParameters,
    QueryParametersBuilder,
    RequestBody,
    RequestFrame,
    Value,
    Values,
};
pub use responses::{
    auth_challenge::AuthChallengeFrame,
    auth_success::AuthSuccessFrame,
    authenticate::AuthenticateFrame,
    error::*,
    event::*,
    result::*,
    supported::SupportedFrame,
    ResponseBody,
    ResponseFrame,
};

use std::{
    collections::HashMap,
    convert::TryInto,
    net::{
        IpAddr,
        Ipv4Addr,
        Ipv6Addr,
        SocketAddr,
    },
};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while decoding a frame.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(anyhow::Error),
    #[error("Invalid frame body: {0}")]
    InvalidBody(anyhow::Error),
    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("Compressed frames are not supported")]
    Compressed,
}

/// Decode a value from a payload, advancing `start` past the consumed bytes.
pub trait FromPayload: Sized {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self>;
}

/// Encode a value by appending it to a payload.
pub trait ToPayload {
    fn to_payload(self, payload: &mut Vec<u8>);
}

fn take<'a>(start: &mut usize, payload: &'a [u8], len: usize) -> anyhow::Result<&'a [u8]> {
    anyhow::ensure!(
        payload.len() >= *start + len,
        "Not enough bytes: need {} at offset {}, have {}",
        len,
        start,
        payload.len()
    );
    let res = &payload[*start..][..len];
    *start += len;
    Ok(res)
}

pub fn read_byte(start: &mut usize, payload: &[u8]) -> anyhow::Result<u8> {
    Ok(take(start, payload, 1)?[0])
}

pub fn read_short(start: &mut usize, payload: &[u8]) -> anyhow::Result<u16> {
    Ok(u16::from_be_bytes(take(start, payload, 2)?.try_into()?))
}

pub fn read_int(start: &mut usize, payload: &[u8]) -> anyhow::Result<i32> {
    Ok(i32::from_be_bytes(take(start, payload, 4)?.try_into()?))
}

pub fn read_long(start: &mut usize, payload: &[u8]) -> anyhow::Result<i64> {
    Ok(i64::from_be_bytes(take(start, payload, 8)?.try_into()?))
}

/// Read a `[string]` without copying it.
pub fn read_str<'a>(start: &mut usize, payload: &'a [u8]) -> anyhow::Result<&'a str> {
    let len = read_short(start, payload)? as usize;
    Ok(std::str::from_utf8(take(start, payload, len)?)?)
}

pub fn read_string(start: &mut usize, payload: &[u8]) -> anyhow::Result<String> {
    read_str(start, payload).map(ToOwned::to_owned)
}

pub fn read_long_string(start: &mut usize, payload: &[u8]) -> anyhow::Result<String> {
    let len = read_int(start, payload)?;
    anyhow::ensure!(len >= 0, "Negative long string length {}", len);
    Ok(std::str::from_utf8(take(start, payload, len as usize)?)?.to_owned())
}

/// Read `[bytes]`, where a negative length denotes null.
pub fn read_nullable_bytes<'a>(start: &mut usize, payload: &'a [u8]) -> anyhow::Result<Option<&'a [u8]>> {
    let len = read_int(start, payload)?;
    if len < 0 {
        return Ok(None);
    }
    take(start, payload, len as usize).map(Some)
}

/// Read `[bytes]`, treating null as empty.
pub fn read_bytes<'a>(start: &mut usize, payload: &'a [u8]) -> anyhow::Result<&'a [u8]> {
    Ok(read_nullable_bytes(start, payload)?.unwrap_or_default())
}

pub fn read_short_bytes<'a>(start: &mut usize, payload: &'a [u8]) -> anyhow::Result<&'a [u8]> {
    let len = read_short(start, payload)? as usize;
    take(start, payload, len)
}

pub fn read_string_list(start: &mut usize, payload: &[u8]) -> anyhow::Result<Vec<String>> {
    let n = read_short(start, payload)? as usize;
    let mut list = Vec::with_capacity(n);
    for _ in 0..n {
        list.push(read_string(start, payload)?);
    }
    Ok(list)
}

pub fn read_string_map(start: &mut usize, payload: &[u8]) -> anyhow::Result<HashMap<String, String>> {
    let n = read_short(start, payload)? as usize;
    let mut map = HashMap::with_capacity(n);
    for _ in 0..n {
        let k = read_string(start, payload)?;
        let v = read_string(start, payload)?;
        map.insert(k, v);
    }
    Ok(map)
}

pub fn read_string_multimap(start: &mut usize, payload: &[u8]) -> anyhow::Result<HashMap<String, Vec<String>>> {
    let n = read_short(start, payload)? as usize;
    let mut map = HashMap::with_capacity(n);
    for _ in 0..n {
        let k = read_string(start, payload)?;
        let v = read_string_list(start, payload)?;
        map.insert(k, v);
    }
    Ok(map)
}

pub fn read_bytes_map(start: &mut usize, payload: &[u8]) -> anyhow::Result<HashMap<String, Vec<u8>>> {
    let n = read_short(start, payload)? as usize;
    let mut map = HashMap::with_capacity(n);
    for _ in 0..n {
        let k = read_string(start, payload)?;
        let v = read_bytes(start, payload)?.to_vec();
        map.insert(k, v);
    }
    Ok(map)
}

pub fn read_inet(start: &mut usize, payload: &[u8]) -> anyhow::Result<SocketAddr> {
    let len = read_byte(start, payload)?;
    let ip = match len {
        4 => {
            let octets: [u8; 4] = take(start, payload, 4)?.try_into()?;
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        16 => {
            let octets: [u8; 16] = take(start, payload, 16)?.try_into()?;
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        n => anyhow::bail!("Invalid inet address length {}", n),
    };
    let port = read_int(start, payload)?;
    Ok(SocketAddr::new(ip, port as u16))
}

pub fn read_uuid(start: &mut usize, payload: &[u8]) -> anyhow::Result<Uuid> {
    let bytes: [u8; 16] = take(start, payload, 16)?.try_into()?;
    Ok(Uuid::from_bytes(bytes))
}

pub fn write_byte(b: u8, payload: &mut Vec<u8>) {
    payload.push(b);
}

pub fn write_short(v: u16, payload: &mut Vec<u8>) {
    payload.extend_from_slice(&v.to_be_bytes());
}

pub fn write_int(v: i32, payload: &mut Vec<u8>) {
    payload.extend_from_slice(&v.to_be_bytes());
}

pub fn write_long(v: i64, payload: &mut Vec<u8>) {
    payload.extend_from_slice(&v.to_be_bytes());
}

pub fn write_string(s: &str, payload: &mut Vec<u8>) {
    write_short(s.len() as u16, payload);
    payload.extend_from_slice(s.as_bytes());
}

pub fn write_long_string(s: &str, payload: &mut Vec<u8>) {
    write_int(s.len() as i32, payload);
    payload.extend_from_slice(s.as_bytes());
}

pub fn write_bytes(b: &[u8], payload: &mut Vec<u8>) {
    write_int(b.len() as i32, payload);
    payload.extend_from_slice(b);
}

pub fn write_short_bytes(b: &[u8], payload: &mut Vec<u8>) {
    write_short(b.len() as u16, payload);
    payload.extend_from_slice(b);
}

pub fn write_string_list<S: AsRef<str>>(list: &[S], payload: &mut Vec<u8>) {
    write_short(list.len() as u16, payload);
    for s in list {
        write_string(s.as_ref(), payload);
    }
}

pub fn write_string_map(map: &HashMap<String, String>, payload: &mut Vec<u8>) {
    write_short(map.len() as u16, payload);
    for (k, v) in map {
        write_string(k, payload);
        write_string(v, payload);
    }
}

pub fn write_string_multimap(map: &HashMap<String, Vec<String>>, payload: &mut Vec<u8>) {
    write_short(map.len() as u16, payload);
    for (k, v) in map {
        write_string(k, payload);
        write_string_list(v, payload);
    }
}

pub fn write_inet(addr: &SocketAddr, payload: &mut Vec<u8>) {
    match addr.ip() {
        IpAddr::V4(ip) => {
            write_byte(4, payload);
            payload.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            write_byte(16, payload);
            payload.extend_from_slice(&ip.octets());
        }
    }
    write_int(addr.port() as i32, payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_read_back() {
        let mut payload = Vec::new();
        write_short(0xBEEF, &mut payload);
        write_string("keyspace", &mut payload);
        write_long_string("SELECT * FROM t", &mut payload);
        write_int(-1, &mut payload);
        write_short_bytes(&[1, 2, 3], &mut payload);
        write_string_list(&["a", "b"], &mut payload);

        let mut start = 0;
        assert_eq!(read_short(&mut start, &payload).unwrap(), 0xBEEF);
        assert_eq!(read_str(&mut start, &payload).unwrap(), "keyspace");
        assert_eq!(read_long_string(&mut start, &payload).unwrap(), "SELECT * FROM t");
        assert_eq!(read_nullable_bytes(&mut start, &payload).unwrap(), None);
        assert_eq!(read_short_bytes(&mut start, &payload).unwrap(), &[1, 2, 3]);
        assert_eq!(read_string_list(&mut start, &payload).unwrap(), vec!["a", "b"]);
        assert_eq!(start, payload.len());
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut payload = Vec::new();
        write_string("truncated", &mut payload);
        payload.truncate(5);
        assert!(read_string(&mut 0, &payload).is_err());
    }

    #[test]
    fn inet_layout() {
        let addr: SocketAddr = "10.0.0.7:9042".parse().unwrap();
        let mut payload = Vec::new();
        write_inet(&addr, &mut payload);
        assert_eq!(payload, vec![4, 10, 0, 0, 7, 0, 0, 0x23, 0x52]);
        assert_eq!(read_inet(&mut 0, &payload).unwrap(), addr);
    }
}
