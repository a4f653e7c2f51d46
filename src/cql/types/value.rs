// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Runtime CQL values.

use super::DataType;
use chrono::{
    NaiveDate,
    NaiveTime,
};
use std::{
    fmt::Display,
    net::IpAddr,
};
use uuid::Uuid;

/// A CQL decimal: an unscaled two's complement big-endian integer and a scale.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Decimal {
    pub scale: i32,
    pub unscaled: Vec<u8>,
}

/// A value as seen by the codec.
///
/// `Varint` and `Decimal` keep their big-endian two's complement bytes untouched.
/// `Custom` bytes are opaque and pass through the codec unchanged, while `Composite`
/// components are laid out according to the declared composite marshal class.
#[derive(Clone, Debug, PartialEq)]
pub enum CqlValue {
    Ascii(String),
    Text(String),
    Bigint(i64),
    Counter(i64),
    Blob(Vec<u8>),
    Boolean(bool),
    Decimal(Decimal),
    Double(f64),
    Float(f32),
    Int(i32),
    /// Milliseconds since the unix epoch.
    Timestamp(i64),
    Uuid(Uuid),
    Timeuuid(Uuid),
    Varint(Vec<u8>),
    Inet(IpAddr),
    Date(NaiveDate),
    Time(NaiveTime),
    Smallint(i16),
    Tinyint(i8),
    List(Vec<CqlValue>),
    Set(Vec<CqlValue>),
    Map(Vec<(CqlValue, CqlValue)>),
    Tuple(Vec<Option<CqlValue>>),
    Udt {
        keyspace: String,
        name: String,
        fields: Vec<(String, Option<CqlValue>)>,
    },
    Custom(Vec<u8>),
    Composite(Vec<CqlValue>),
}

/// The runtime kind of a [`CqlValue`], one half of the codec lookup key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Ascii,
    Text,
    Bigint,
    Counter,
    Blob,
    Boolean,
    Decimal,
    Double,
    Float,
    Int,
    Timestamp,
    Uuid,
    Timeuuid,
    Varint,
    Inet,
    Date,
    Time,
    Smallint,
    Tinyint,
    List,
    Set,
    Map,
    Tuple,
    Udt,
    Custom,
    Composite,
}

impl Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl CqlValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            CqlValue::Ascii(_) => ValueKind::Ascii,
            CqlValue::Text(_) => ValueKind::Text,
            CqlValue::Bigint(_) => ValueKind::Bigint,
            CqlValue::Counter(_) => ValueKind::Counter,
            CqlValue::Blob(_) => ValueKind::Blob,
            CqlValue::Boolean(_) => ValueKind::Boolean,
            CqlValue::Decimal(_) => ValueKind::Decimal,
            CqlValue::Double(_) => ValueKind::Double,
            CqlValue::Float(_) => ValueKind::Float,
            CqlValue::Int(_) => ValueKind::Int,
            CqlValue::Timestamp(_) => ValueKind::Timestamp,
            CqlValue::Uuid(_) => ValueKind::Uuid,
            CqlValue::Timeuuid(_) => ValueKind::Timeuuid,
            CqlValue::Varint(_) => ValueKind::Varint,
            CqlValue::Inet(_) => ValueKind::Inet,
            CqlValue::Date(_) => ValueKind::Date,
            CqlValue::Time(_) => ValueKind::Time,
            CqlValue::Smallint(_) => ValueKind::Smallint,
            CqlValue::Tinyint(_) => ValueKind::Tinyint,
            CqlValue::List(_) => ValueKind::List,
            CqlValue::Set(_) => ValueKind::Set,
            CqlValue::Map(_) => ValueKind::Map,
            CqlValue::Tuple(_) => ValueKind::Tuple,
            CqlValue::Udt { .. } => ValueKind::Udt,
            CqlValue::Custom(_) => ValueKind::Custom,
            CqlValue::Composite(_) => ValueKind::Composite,
        }
    }

    /// The type a value maps to when no type was declared for it, as for the values of an
    /// unprepared statement. Empty collections fall back to blob elements; composites have
    /// no natural type.
    pub fn natural_type(&self) -> Option<DataType> {
        fn element_type<'a>(mut values: impl Iterator<Item = &'a CqlValue>) -> Option<DataType> {
            match values.next() {
                Some(v) => v.natural_type(),
                None => Some(DataType::Blob),
            }
        }
        Some(match self {
            CqlValue::Ascii(_) => DataType::Ascii,
            CqlValue::Text(_) => DataType::Text,
            CqlValue::Bigint(_) => DataType::Bigint,
            CqlValue::Counter(_) => DataType::Counter,
            CqlValue::Blob(_) => DataType::Blob,
            CqlValue::Boolean(_) => DataType::Boolean,
            CqlValue::Decimal(_) => DataType::Decimal,
            CqlValue::Double(_) => DataType::Double,
            CqlValue::Float(_) => DataType::Float,
            CqlValue::Int(_) => DataType::Int,
            CqlValue::Timestamp(_) => DataType::Timestamp,
            CqlValue::Uuid(_) => DataType::Uuid,
            CqlValue::Timeuuid(_) => DataType::Timeuuid,
            CqlValue::Varint(_) => DataType::Varint,
            CqlValue::Inet(_) => DataType::Inet,
            CqlValue::Date(_) => DataType::Date,
            CqlValue::Time(_) => DataType::Time,
            CqlValue::Smallint(_) => DataType::Smallint,
            CqlValue::Tinyint(_) => DataType::Tinyint,
            CqlValue::List(values) => DataType::list(element_type(values.iter())?),
            CqlValue::Set(values) => DataType::set(element_type(values.iter())?),
            CqlValue::Map(entries) => DataType::map(
                element_type(entries.iter().map(|(k, _)| k))?,
                element_type(entries.iter().map(|(_, v)| v))?,
            ),
            CqlValue::Tuple(values) => DataType::Tuple(
                values
                    .iter()
                    .map(|v| match v {
                        Some(v) => v.natural_type(),
                        None => Some(DataType::Blob),
                    })
                    .collect::<Option<Vec<_>>>()?,
            ),
            CqlValue::Udt { keyspace, name, fields } => DataType::Udt {
                keyspace: keyspace.clone(),
                name: name.clone(),
                fields: fields
                    .iter()
                    .map(|(field, v)| {
                        let data_type = match v {
                            Some(v) => v.natural_type(),
                            None => Some(DataType::Blob),
                        };
                        data_type.map(|t| (field.clone(), t))
                    })
                    .collect::<Option<Vec<_>>>()?,
            },
            CqlValue::Custom(_) => DataType::custom(super::marshal::BYTES_TYPE),
            CqlValue::Composite(_) => return None,
        })
    }

    pub fn list<T: Into<CqlValue>>(values: impl IntoIterator<Item = T>) -> Self {
        CqlValue::List(values.into_iter().map(Into::into).collect())
    }

    pub fn set<T: Into<CqlValue>>(values: impl IntoIterator<Item = T>) -> Self {
        CqlValue::Set(values.into_iter().map(Into::into).collect())
    }

    /// Build a varint from a machine integer using the minimal two's complement encoding.
    pub fn varint(value: i64) -> Self {
        CqlValue::Varint(minimal_twos_complement(value))
    }
}

fn minimal_twos_complement(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut skip = 0;
    while skip < 7 {
        let (b, next) = (bytes[skip], bytes[skip + 1]);
        if (b == 0x00 && next & 0x80 == 0) || (b == 0xFF && next & 0x80 != 0) {
            skip += 1;
        } else {
            break;
        }
    }
    bytes[skip..].to_vec()
}

macro_rules! impl_from {
    ($t:ty, $variant:ident) => {
        impl From<$t> for CqlValue {
            fn from(v: $t) -> Self {
                CqlValue::$variant(v)
            }
        }
    };
}

impl_from!(String, Text);
impl_from!(i64, Bigint);
impl_from!(Vec<u8>, Blob);
impl_from!(bool, Boolean);
impl_from!(f64, Double);
impl_from!(f32, Float);
impl_from!(i32, Int);
impl_from!(Uuid, Uuid);
impl_from!(IpAddr, Inet);
impl_from!(NaiveDate, Date);
impl_from!(NaiveTime, Time);
impl_from!(i16, Smallint);
impl_from!(i8, Tinyint);
impl_from!(Decimal, Decimal);

impl From<&str> for CqlValue {
    fn from(v: &str) -> Self {
        CqlValue::Text(v.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_is_minimal() {
        assert_eq!(CqlValue::varint(0), CqlValue::Varint(vec![0]));
        assert_eq!(CqlValue::varint(127), CqlValue::Varint(vec![0x7F]));
        assert_eq!(CqlValue::varint(128), CqlValue::Varint(vec![0x00, 0x80]));
        assert_eq!(CqlValue::varint(-1), CqlValue::Varint(vec![0xFF]));
        assert_eq!(CqlValue::varint(-129), CqlValue::Varint(vec![0xFF, 0x7F]));
    }

    #[test]
    fn natural_types() {
        let value = CqlValue::list(vec!["a", "b"]);
        assert_eq!(value.natural_type(), Some(DataType::list(DataType::Text)));
        assert_eq!(CqlValue::List(vec![]).natural_type(), Some(DataType::list(DataType::Blob)));
        assert_eq!(CqlValue::Composite(vec![]).natural_type(), None);
        assert_eq!(CqlValue::from(vec![1u8, 2]), CqlValue::Blob(vec![1, 2]));
    }
}
