// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The value codec.
//!
//! Encoding is keyed on the pair (runtime value kind, declared type). Registered codecs are
//! consulted first, most recently registered first, then the built-in codecs which statically
//! dispatch over the closed set of native, collection, tuple and UDT types.

use super::{
    composite::{
        CompositeCodec,
        DynamicCompositeCodec,
    },
    value::Decimal,
    CqlValue,
    DataType,
    ValueKind,
};
use crate::cql::frame::ProtocolVersion;
use chrono::{
    Datelike,
    NaiveDate,
    NaiveTime,
    Timelike,
};
use std::{
    convert::TryInto,
    fmt::Debug,
    net::{
        IpAddr,
        Ipv4Addr,
        Ipv6Addr,
    },
    sync::Arc,
};
use thiserror::Error;
use uuid::Uuid;

/// Days between 0001-01-01 and the unix epoch.
const UNIX_EPOCH_FROM_CE: i64 = 719_163;
/// CQL `date` values are unsigned with the unix epoch at 2^31.
const DATE_EPOCH_OFFSET: i64 = 1 << 31;
const NANOS_PER_DAY: i64 = 86_400_000_000_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("No codec found for {kind:?} values declared as {data_type}")]
    CodecNotFound {
        /// The runtime kind, absent when decoding.
        kind: Option<ValueKind>,
        data_type: DataType,
    },
    #[error("Malformed {data_type} value: {reason}")]
    Malformed { data_type: DataType, reason: String },
    #[error("Value out of range for {data_type}: {reason}")]
    Overflow { data_type: DataType, reason: String },
    #[error("Invalid marshal class name {0:?}")]
    InvalidMarshalClass(String),
}

impl CodecError {
    pub(crate) fn malformed(data_type: &DataType, reason: impl Into<String>) -> Self {
        CodecError::Malformed {
            data_type: data_type.clone(),
            reason: reason.into(),
        }
    }

    pub(crate) fn overflow(data_type: &DataType, reason: impl Into<String>) -> Self {
        CodecError::Overflow {
            data_type: data_type.clone(),
            reason: reason.into(),
        }
    }

    fn not_found(kind: Option<ValueKind>, data_type: &DataType) -> Self {
        CodecError::CodecNotFound {
            kind,
            data_type: data_type.clone(),
        }
    }
}

/// What a codec sees of the pass it participates in.
#[derive(Copy, Clone, Debug)]
pub struct CodecContext<'a> {
    pub registry: &'a CodecRegistry,
    /// Selects the collection length prefix width for the whole pass.
    pub version: ProtocolVersion,
}

impl<'a> CodecContext<'a> {
    pub fn encode(&self, value: &CqlValue, data_type: &DataType) -> Result<Vec<u8>, CodecError> {
        self.registry.encode(value, data_type, self.version)
    }

    pub fn decode(&self, bytes: &[u8], data_type: &DataType) -> Result<CqlValue, CodecError> {
        self.registry.decode(bytes, data_type, self.version)
    }

    pub fn decode_cell(&self, bytes: &[u8], data_type: &DataType) -> Result<Option<CqlValue>, CodecError> {
        self.registry.decode_cell(bytes, data_type, self.version)
    }
}

/// An extension codec.
pub trait TypeCodec: Send + Sync + Debug {
    /// Whether this codec encodes values of `kind` declared as `data_type`.
    fn accepts(&self, data_type: &DataType, kind: ValueKind) -> bool;
    /// Whether this codec decodes values declared as `data_type`.
    fn decodes(&self, data_type: &DataType) -> bool;
    fn encode(&self, value: &CqlValue, data_type: &DataType, ctx: &CodecContext<'_>) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8], data_type: &DataType, ctx: &CodecContext<'_>) -> Result<CqlValue, CodecError>;
}

/// Opaque pass-through for custom types: bytes in, the same bytes out.
#[derive(Copy, Clone, Debug, Default)]
pub struct PassThroughCodec;

impl TypeCodec for PassThroughCodec {
    fn accepts(&self, data_type: &DataType, kind: ValueKind) -> bool {
        matches!(data_type, DataType::Custom(_)) && matches!(kind, ValueKind::Custom | ValueKind::Blob)
    }

    fn decodes(&self, data_type: &DataType) -> bool {
        matches!(data_type, DataType::Custom(_))
    }

    fn encode(&self, value: &CqlValue, data_type: &DataType, _ctx: &CodecContext<'_>) -> Result<Vec<u8>, CodecError> {
        match value {
            CqlValue::Custom(bytes) | CqlValue::Blob(bytes) => Ok(bytes.clone()),
            v => Err(CodecError::not_found(Some(v.kind()), data_type)),
        }
    }

    fn decode(&self, bytes: &[u8], _data_type: &DataType, _ctx: &CodecContext<'_>) -> Result<CqlValue, CodecError> {
        Ok(CqlValue::Custom(bytes.to_vec()))
    }
}

/// The codec registry.
#[derive(Clone, Debug)]
pub struct CodecRegistry {
    codecs: Vec<Arc<dyn TypeCodec>>,
}

impl Default for CodecRegistry {
    /// Built-in codecs plus pass-through custom types and the composite codecs.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register(PassThroughCodec)
            .register(CompositeCodec)
            .register(DynamicCompositeCodec);
        registry
    }
}

impl CodecRegistry {
    /// Only the built-in native codecs; custom types are not handled.
    pub fn empty() -> Self {
        Self { codecs: Vec::new() }
    }

    /// Register a codec. It takes precedence over every codec registered before it, and over
    /// the built-in ones.
    pub fn register<C: TypeCodec + 'static>(&mut self, codec: C) -> &mut Self {
        self.codecs.push(Arc::new(codec));
        self
    }

    pub fn encode(&self, value: &CqlValue, data_type: &DataType, version: ProtocolVersion) -> Result<Vec<u8>, CodecError> {
        let ctx = CodecContext { registry: self, version };
        let kind = value.kind();
        match self.codecs.iter().rev().find(|c| c.accepts(data_type, kind)) {
            Some(codec) => codec.encode(value, data_type, &ctx),
            None => encode_native(value, data_type, &ctx),
        }
    }

    pub fn decode(&self, bytes: &[u8], data_type: &DataType, version: ProtocolVersion) -> Result<CqlValue, CodecError> {
        let ctx = CodecContext { registry: self, version };
        match self.codecs.iter().rev().find(|c| c.decodes(data_type)) {
            Some(codec) => codec.decode(bytes, data_type, &ctx),
            None => decode_native(bytes, data_type, &ctx),
        }
    }

    /// Decode a nullable cell, a row column or a tuple or UDT field. A zero length value is
    /// the protocol's "empty" value: text and blob like types read it as an empty value, every
    /// other type reads it as absent.
    pub fn decode_cell(
        &self,
        bytes: &[u8],
        data_type: &DataType,
        version: ProtocolVersion,
    ) -> Result<Option<CqlValue>, CodecError> {
        if bytes.is_empty() && !holds_empty(data_type) {
            return Ok(None);
        }
        self.decode(bytes, data_type, version).map(Some)
    }
}

fn holds_empty(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Ascii | DataType::Text | DataType::Blob | DataType::Custom(_)
    )
}

fn write_len(len: usize, data_type: &DataType, version: ProtocolVersion, buf: &mut Vec<u8>) -> Result<(), CodecError> {
    match version.collection_len_width() {
        2 => {
            let len: u16 = len
                .try_into()
                .map_err(|_| CodecError::overflow(data_type, format!("{} does not fit a [short]", len)))?;
            buf.extend_from_slice(&len.to_be_bytes());
        }
        _ => {
            let len: i32 = len
                .try_into()
                .map_err(|_| CodecError::overflow(data_type, format!("{} does not fit an [int]", len)))?;
            buf.extend_from_slice(&len.to_be_bytes());
        }
    }
    Ok(())
}

fn encode_element(
    value: &CqlValue,
    data_type: &DataType,
    collection: &DataType,
    ctx: &CodecContext<'_>,
    buf: &mut Vec<u8>,
) -> Result<(), CodecError> {
    let bytes = ctx.encode(value, data_type)?;
    write_len(bytes.len(), collection, ctx.version, buf)?;
    buf.extend(bytes);
    Ok(())
}

fn encode_native(value: &CqlValue, data_type: &DataType, ctx: &CodecContext<'_>) -> Result<Vec<u8>, CodecError> {
    use CqlValue as V;
    use DataType as T;
    Ok(match (data_type, value) {
        (T::Ascii, V::Ascii(s)) | (T::Ascii, V::Text(s)) => {
            if !s.is_ascii() {
                return Err(CodecError::malformed(data_type, "non-ascii characters"));
            }
            s.as_bytes().to_vec()
        }
        (T::Text, V::Text(s)) | (T::Text, V::Ascii(s)) => s.as_bytes().to_vec(),
        (T::Bigint, V::Bigint(v)) | (T::Counter, V::Counter(v)) | (T::Counter, V::Bigint(v)) => v.to_be_bytes().to_vec(),
        (T::Timestamp, V::Timestamp(v)) => v.to_be_bytes().to_vec(),
        (T::Blob, V::Blob(b)) => b.clone(),
        (T::Boolean, V::Boolean(b)) => vec![*b as u8],
        (T::Decimal, V::Decimal(Decimal { scale, unscaled })) => {
            let mut buf = Vec::with_capacity(4 + unscaled.len());
            buf.extend_from_slice(&scale.to_be_bytes());
            buf.extend_from_slice(unscaled);
            buf
        }
        (T::Double, V::Double(v)) => v.to_be_bytes().to_vec(),
        (T::Float, V::Float(v)) => v.to_be_bytes().to_vec(),
        (T::Int, V::Int(v)) => v.to_be_bytes().to_vec(),
        (T::Uuid, V::Uuid(u)) | (T::Uuid, V::Timeuuid(u)) => u.as_bytes().to_vec(),
        (T::Timeuuid, V::Timeuuid(u)) | (T::Timeuuid, V::Uuid(u)) => {
            if u.get_version_num() != 1 {
                return Err(CodecError::malformed(data_type, format!("{} is not a time based uuid", u)));
            }
            u.as_bytes().to_vec()
        }
        (T::Varint, V::Varint(b)) => {
            if b.is_empty() {
                return Err(CodecError::malformed(data_type, "empty varint"));
            }
            b.clone()
        }
        (T::Inet, V::Inet(IpAddr::V4(ip))) => ip.octets().to_vec(),
        (T::Inet, V::Inet(IpAddr::V6(ip))) => ip.octets().to_vec(),
        (T::Date, V::Date(date)) => {
            let days = date.num_days_from_ce() as i64 - UNIX_EPOCH_FROM_CE + DATE_EPOCH_OFFSET;
            let days: u32 = days
                .try_into()
                .map_err(|_| CodecError::overflow(data_type, format!("{} is out of range", date)))?;
            days.to_be_bytes().to_vec()
        }
        (T::Time, V::Time(time)) => {
            let nanos = time.num_seconds_from_midnight() as i64 * 1_000_000_000 + time.nanosecond() as i64;
            if nanos >= NANOS_PER_DAY {
                return Err(CodecError::overflow(data_type, "leap second"));
            }
            nanos.to_be_bytes().to_vec()
        }
        (T::Smallint, V::Smallint(v)) => v.to_be_bytes().to_vec(),
        (T::Tinyint, V::Tinyint(v)) => v.to_be_bytes().to_vec(),
        (T::List(element), V::List(values))
        | (T::List(element), V::Set(values))
        | (T::Set(element), V::Set(values))
        | (T::Set(element), V::List(values)) => {
            let mut buf = Vec::new();
            write_len(values.len(), data_type, ctx.version, &mut buf)?;
            for v in values {
                encode_element(v, element, data_type, ctx, &mut buf)?;
            }
            buf
        }
        (T::Map(key_type, value_type), V::Map(entries)) => {
            let mut buf = Vec::new();
            write_len(entries.len(), data_type, ctx.version, &mut buf)?;
            for (k, v) in entries {
                encode_element(k, key_type, data_type, ctx, &mut buf)?;
                encode_element(v, value_type, data_type, ctx, &mut buf)?;
            }
            buf
        }
        (T::Tuple(types), V::Tuple(values)) => {
            if values.len() != types.len() {
                return Err(CodecError::malformed(
                    data_type,
                    format!("expected {} components, got {}", types.len(), values.len()),
                ));
            }
            let mut buf = Vec::new();
            for (v, t) in values.iter().zip(types) {
                write_nullable(v.as_ref(), t, ctx, &mut buf)?;
            }
            buf
        }
        (T::Udt { fields: declared, .. }, V::Udt { fields, .. }) => {
            if let Some((unknown, _)) = fields.iter().find(|(name, _)| !declared.iter().any(|(d, _)| d == name)) {
                return Err(CodecError::malformed(data_type, format!("unknown field {}", unknown)));
            }
            let mut buf = Vec::new();
            for (name, t) in declared {
                let v = fields.iter().find(|(n, _)| n == name).and_then(|(_, v)| v.as_ref());
                write_nullable(v, t, ctx, &mut buf)?;
            }
            buf
        }
        (t, v) => return Err(CodecError::not_found(Some(v.kind()), t)),
    })
}

/// Tuple and UDT components always use `[int]` lengths, with -1 for null.
fn write_nullable(
    value: Option<&CqlValue>,
    data_type: &DataType,
    ctx: &CodecContext<'_>,
    buf: &mut Vec<u8>,
) -> Result<(), CodecError> {
    match value {
        Some(v) => {
            let bytes = ctx.encode(v, data_type)?;
            buf.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
            buf.extend(bytes);
        }
        None => buf.extend_from_slice(&(-1i32).to_be_bytes()),
    }
    Ok(())
}

struct Reader<'a, 'b> {
    bytes: &'a [u8],
    pos: usize,
    data_type: &'b DataType,
}

impl<'a, 'b> Reader<'a, 'b> {
    fn new(bytes: &'a [u8], data_type: &'b DataType) -> Self {
        Self { bytes, pos: 0, data_type }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::malformed(
                self.data_type,
                format!("needs {} more bytes, {} left", n, self.remaining()),
            ));
        }
        let res = &self.bytes[self.pos..][..n];
        self.pos += n;
        Ok(res)
    }

    fn int(&mut self) -> Result<i32, CodecError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// A collection count or element length, sized by the protocol version.
    fn len(&mut self, version: ProtocolVersion) -> Result<i32, CodecError> {
        match version.collection_len_width() {
            2 => {
                let b = self.take(2)?;
                Ok(u16::from_be_bytes([b[0], b[1]]) as i32)
            }
            _ => self.int(),
        }
    }

    fn element(&mut self, version: ProtocolVersion) -> Result<&'a [u8], CodecError> {
        let len = self.len(version)?;
        if len < 0 {
            return Err(CodecError::malformed(self.data_type, "null collection element"));
        }
        self.take(len as usize)
    }

    fn nullable(&mut self) -> Result<Option<&'a [u8]>, CodecError> {
        let len = self.int()?;
        if len < 0 {
            Ok(None)
        } else {
            self.take(len as usize).map(Some)
        }
    }

    fn finish(&self) -> Result<(), CodecError> {
        if self.remaining() != 0 {
            return Err(CodecError::malformed(
                self.data_type,
                format!("{} trailing bytes", self.remaining()),
            ));
        }
        Ok(())
    }
}

fn fixed<const N: usize>(bytes: &[u8], data_type: &DataType) -> Result<[u8; N], CodecError> {
    bytes
        .try_into()
        .map_err(|_| CodecError::malformed(data_type, format!("expected {} bytes, got {}", N, bytes.len())))
}

fn decode_native(bytes: &[u8], data_type: &DataType, ctx: &CodecContext<'_>) -> Result<CqlValue, CodecError> {
    use CqlValue as V;
    use DataType as T;
    Ok(match data_type {
        T::Ascii => {
            if !bytes.is_ascii() {
                return Err(CodecError::malformed(data_type, "non-ascii characters"));
            }
            V::Ascii(String::from_utf8_lossy(bytes).into_owned())
        }
        T::Text => V::Text(
            String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::malformed(data_type, e.to_string()))?,
        ),
        T::Bigint => V::Bigint(i64::from_be_bytes(fixed(bytes, data_type)?)),
        T::Counter => V::Counter(i64::from_be_bytes(fixed(bytes, data_type)?)),
        T::Timestamp => V::Timestamp(i64::from_be_bytes(fixed(bytes, data_type)?)),
        T::Blob => V::Blob(bytes.to_vec()),
        T::Boolean => V::Boolean(fixed::<1>(bytes, data_type)?[0] != 0),
        T::Decimal => {
            let mut reader = Reader::new(bytes, data_type);
            let scale = reader.int()?;
            let unscaled = reader.take(reader.remaining())?.to_vec();
            if unscaled.is_empty() {
                return Err(CodecError::malformed(data_type, "empty unscaled value"));
            }
            V::Decimal(Decimal { scale, unscaled })
        }
        T::Double => V::Double(f64::from_be_bytes(fixed(bytes, data_type)?)),
        T::Float => V::Float(f32::from_be_bytes(fixed(bytes, data_type)?)),
        T::Int => V::Int(i32::from_be_bytes(fixed(bytes, data_type)?)),
        T::Uuid => V::Uuid(Uuid::from_bytes(fixed(bytes, data_type)?)),
        T::Timeuuid => V::Timeuuid(Uuid::from_bytes(fixed(bytes, data_type)?)),
        T::Varint => {
            if bytes.is_empty() {
                return Err(CodecError::malformed(data_type, "empty varint"));
            }
            V::Varint(bytes.to_vec())
        }
        T::Inet => match bytes.len() {
            4 => V::Inet(IpAddr::V4(Ipv4Addr::from(fixed::<4>(bytes, data_type)?))),
            16 => V::Inet(IpAddr::V6(Ipv6Addr::from(fixed::<16>(bytes, data_type)?))),
            n => return Err(CodecError::malformed(data_type, format!("invalid address length {}", n))),
        },
        T::Date => {
            let raw = u32::from_be_bytes(fixed(bytes, data_type)?) as i64;
            let days_from_ce = raw - DATE_EPOCH_OFFSET + UNIX_EPOCH_FROM_CE;
            let date = days_from_ce
                .try_into()
                .ok()
                .and_then(NaiveDate::from_num_days_from_ce_opt)
                .ok_or_else(|| CodecError::overflow(data_type, format!("{} days is out of range", raw)))?;
            V::Date(date)
        }
        T::Time => {
            let nanos = i64::from_be_bytes(fixed(bytes, data_type)?);
            if !(0..NANOS_PER_DAY).contains(&nanos) {
                return Err(CodecError::overflow(data_type, format!("{} nanoseconds", nanos)));
            }
            let time = NaiveTime::from_num_seconds_from_midnight_opt(
                (nanos / 1_000_000_000) as u32,
                (nanos % 1_000_000_000) as u32,
            )
            .ok_or_else(|| CodecError::overflow(data_type, format!("{} nanoseconds", nanos)))?;
            V::Time(time)
        }
        T::Smallint => V::Smallint(i16::from_be_bytes(fixed(bytes, data_type)?)),
        T::Tinyint => V::Tinyint(i8::from_be_bytes(fixed(bytes, data_type)?)),
        T::List(element) | T::Set(element) => {
            let mut reader = Reader::new(bytes, data_type);
            let count = reader.len(ctx.version)?.max(0) as usize;
            let mut values = Vec::with_capacity(count.min(bytes.len()));
            for _ in 0..count {
                values.push(ctx.decode(reader.element(ctx.version)?, element)?);
            }
            reader.finish()?;
            match data_type {
                T::Set(_) => V::Set(values),
                _ => V::List(values),
            }
        }
        T::Map(key_type, value_type) => {
            let mut reader = Reader::new(bytes, data_type);
            let count = reader.len(ctx.version)?.max(0) as usize;
            let mut entries = Vec::with_capacity(count.min(bytes.len()));
            for _ in 0..count {
                let k = ctx.decode(reader.element(ctx.version)?, key_type)?;
                let v = ctx.decode(reader.element(ctx.version)?, value_type)?;
                entries.push((k, v));
            }
            reader.finish()?;
            V::Map(entries)
        }
        T::Tuple(types) => {
            let mut reader = Reader::new(bytes, data_type);
            let mut values = Vec::with_capacity(types.len());
            for t in types {
                // Trailing components may be omitted
                let v = if reader.remaining() == 0 { None } else { reader.nullable()? };
                values.push(match v {
                    Some(b) => ctx.decode_cell(b, t)?,
                    None => None,
                });
            }
            reader.finish()?;
            V::Tuple(values)
        }
        T::Udt { keyspace, name, fields } => {
            let mut reader = Reader::new(bytes, data_type);
            let mut values = Vec::with_capacity(fields.len());
            for (field, t) in fields {
                let v = if reader.remaining() == 0 { None } else { reader.nullable()? };
                let v = match v {
                    Some(b) => ctx.decode_cell(b, t)?,
                    None => None,
                };
                values.push((field.clone(), v));
            }
            reader.finish()?;
            V::Udt {
                keyspace: keyspace.clone(),
                name: name.clone(),
                fields: values,
            }
        }
        T::Custom(_) => return Err(CodecError::not_found(None, data_type)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const VERSIONS: [ProtocolVersion; 3] = [ProtocolVersion::V2, ProtocolVersion::V3, ProtocolVersion::V4];

    fn round_trip(value: CqlValue, data_type: DataType) {
        let registry = CodecRegistry::default();
        for version in VERSIONS.iter().copied() {
            let bytes = registry.encode(&value, &data_type, version).unwrap();
            let decoded = registry.decode(&bytes, &data_type, version).unwrap();
            assert_eq!(decoded, value, "{} under {}", data_type, version);
        }
    }

    #[test]
    fn scalars_round_trip() {
        round_trip(CqlValue::Ascii("plain".into()), DataType::Ascii);
        round_trip(CqlValue::Text("żółw".into()), DataType::Text);
        round_trip(CqlValue::Bigint(i64::MIN), DataType::Bigint);
        round_trip(CqlValue::Counter(42), DataType::Counter);
        round_trip(CqlValue::Boolean(true), DataType::Boolean);
        round_trip(CqlValue::Double(-0.5), DataType::Double);
        round_trip(CqlValue::Float(3.25), DataType::Float);
        round_trip(CqlValue::Int(-7), DataType::Int);
        round_trip(CqlValue::Smallint(-300), DataType::Smallint);
        round_trip(CqlValue::Tinyint(-3), DataType::Tinyint);
        round_trip(CqlValue::Timestamp(1_600_000_000_000), DataType::Timestamp);
        round_trip(CqlValue::varint(-129), DataType::Varint);
        round_trip(
            CqlValue::Decimal(Decimal {
                scale: 2,
                unscaled: vec![0x30, 0x39],
            }),
            DataType::Decimal,
        );
        round_trip(CqlValue::Inet("::1".parse().unwrap()), DataType::Inet);
        round_trip(CqlValue::Uuid(Uuid::from_bytes([9; 16])), DataType::Uuid);
        round_trip(
            CqlValue::Date(NaiveDate::from_ymd_opt(1969, 7, 20).unwrap()),
            DataType::Date,
        );
        round_trip(
            CqlValue::Time(NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap()),
            DataType::Time,
        );
    }

    #[test]
    fn collections_round_trip_for_every_prefix_width() {
        round_trip(CqlValue::list(vec![1, 2, 3]), DataType::list(DataType::Int));
        round_trip(CqlValue::set(vec!["a", "b"]), DataType::set(DataType::Text));
        round_trip(
            CqlValue::Map(vec![(CqlValue::from("k"), CqlValue::list(vec![true]))]),
            DataType::map(DataType::Text, DataType::list(DataType::Boolean)),
        );
        round_trip(
            CqlValue::Tuple(vec![Some(CqlValue::Int(1)), None]),
            DataType::Tuple(vec![DataType::Int, DataType::Text]),
        );
        round_trip(
            CqlValue::Udt {
                keyspace: "ks".into(),
                name: "address".into(),
                fields: vec![("street".into(), Some(CqlValue::from("Main"))), ("zip".into(), None)],
            },
            DataType::Udt {
                keyspace: "ks".into(),
                name: "address".into(),
                fields: vec![("street".into(), DataType::Text), ("zip".into(), DataType::Int)],
            },
        );
    }

    #[test]
    fn collection_prefix_width_follows_the_version() {
        let registry = CodecRegistry::default();
        let value = CqlValue::list(vec![7]);
        let data_type = DataType::list(DataType::Int);
        let v2 = registry.encode(&value, &data_type, ProtocolVersion::V2).unwrap();
        assert_eq!(v2, vec![0, 1, 0, 4, 0, 0, 0, 7]);
        let v4 = registry.encode(&value, &data_type, ProtocolVersion::V4).unwrap();
        assert_eq!(v4, vec![0, 0, 0, 1, 0, 0, 0, 4, 0, 0, 0, 7]);
    }

    #[test]
    fn date_epoch_is_two_to_the_31() {
        let registry = CodecRegistry::default();
        let epoch = CqlValue::Date(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap());
        let bytes = registry.encode(&epoch, &DataType::Date, ProtocolVersion::V4).unwrap();
        assert_eq!(bytes, vec![0x80, 0, 0, 0]);
    }

    #[test]
    fn mismatched_kind_is_codec_not_found() {
        let registry = CodecRegistry::default();
        let err = registry
            .encode(&CqlValue::Int(1), &DataType::Text, ProtocolVersion::V4)
            .unwrap_err();
        assert_eq!(
            err,
            CodecError::CodecNotFound {
                kind: Some(ValueKind::Int),
                data_type: DataType::Text
            }
        );
    }

    #[test]
    fn custom_types_pass_through_unchanged() {
        let registry = CodecRegistry::default();
        let data_type = DataType::custom("com.example.OpaqueType");
        let bytes = registry
            .encode(&CqlValue::Custom(vec![0xDE, 0xAD]), &data_type, ProtocolVersion::V4)
            .unwrap();
        assert_eq!(bytes, vec![0xDE, 0xAD]);
        assert_eq!(
            registry.decode(&bytes, &data_type, ProtocolVersion::V4).unwrap(),
            CqlValue::Custom(vec![0xDE, 0xAD])
        );
    }

    #[test]
    fn empty_registry_does_not_know_custom_types() {
        let registry = CodecRegistry::empty();
        let data_type = DataType::custom("com.example.OpaqueType");
        assert!(matches!(
            registry.decode(&[1], &data_type, ProtocolVersion::V4),
            Err(CodecError::CodecNotFound { kind: None, .. })
        ));
    }

    #[derive(Debug)]
    struct UpperCaseText;

    impl TypeCodec for UpperCaseText {
        fn accepts(&self, data_type: &DataType, kind: ValueKind) -> bool {
            *data_type == DataType::Text && kind == ValueKind::Text
        }

        fn decodes(&self, data_type: &DataType) -> bool {
            *data_type == DataType::Text
        }

        fn encode(&self, value: &CqlValue, _: &DataType, _: &CodecContext<'_>) -> Result<Vec<u8>, CodecError> {
            match value {
                CqlValue::Text(s) => Ok(s.to_uppercase().into_bytes()),
                _ => unreachable!(),
            }
        }

        fn decode(&self, bytes: &[u8], _: &DataType, _: &CodecContext<'_>) -> Result<CqlValue, CodecError> {
            Ok(CqlValue::Text(String::from_utf8_lossy(bytes).to_lowercase()))
        }
    }

    #[test]
    fn registered_codecs_override_builtins_inside_collections() {
        let mut registry = CodecRegistry::default();
        registry.register(UpperCaseText);
        let bytes = registry
            .encode(&CqlValue::list(vec!["ab"]), &DataType::list(DataType::Text), ProtocolVersion::V4)
            .unwrap();
        assert_eq!(&bytes[8..], b"AB");
    }

    #[test]
    fn empty_cells_of_fixed_width_types_are_absent() {
        let registry = CodecRegistry::default();
        let cell = |data_type: DataType| registry.decode_cell(&[], &data_type, ProtocolVersion::V4).unwrap();
        assert_eq!(cell(DataType::Int), None);
        assert_eq!(cell(DataType::Uuid), None);
        assert_eq!(cell(DataType::Boolean), None);
        assert_eq!(cell(DataType::list(DataType::Int)), None);
        assert_eq!(cell(DataType::Text), Some(CqlValue::Text(String::new())));
        assert_eq!(cell(DataType::Blob), Some(CqlValue::Blob(Vec::new())));
        assert_eq!(
            registry.decode_cell(&[0, 0, 0, 9], &DataType::Int, ProtocolVersion::V4).unwrap(),
            Some(CqlValue::Int(9))
        );

        // An empty component inside a tuple
        let tuple = DataType::Tuple(vec![DataType::Int, DataType::Text]);
        let bytes = [0, 0, 0, 0, 0, 0, 0, 1, b'a'];
        assert_eq!(
            registry.decode(&bytes, &tuple, ProtocolVersion::V4).unwrap(),
            CqlValue::Tuple(vec![None, Some(CqlValue::Text("a".to_string()))])
        );
    }

    #[test]
    fn truncated_values_are_malformed() {
        let registry = CodecRegistry::default();
        assert!(matches!(
            registry.decode(&[0, 0, 1], &DataType::Int, ProtocolVersion::V4),
            Err(CodecError::Malformed { .. })
        ));
        assert!(matches!(
            registry.decode(&[0, 0, 0, 2, 0, 0, 0, 4, 0, 0, 0, 1], &DataType::list(DataType::Int), ProtocolVersion::V4),
            Err(CodecError::Malformed { .. })
        ));
    }
}
