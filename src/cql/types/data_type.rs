// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Declared column and bind-variable types, as carried by `[option]`s in result metadata.

use crate::cql::frame::{
    read_short,
    read_string,
    write_short,
    write_string,
    FromPayload,
    ToPayload,
};
use std::fmt::Display;

pub const CUSTOM: u16 = 0x0000;
pub const ASCII: u16 = 0x0001;
pub const BIGINT: u16 = 0x0002;
pub const BLOB: u16 = 0x0003;
pub const BOOLEAN: u16 = 0x0004;
pub const COUNTER: u16 = 0x0005;
pub const DECIMAL: u16 = 0x0006;
pub const DOUBLE: u16 = 0x0007;
pub const FLOAT: u16 = 0x0008;
pub const INT: u16 = 0x0009;
/// Only sent by v2 servers, an alias of `VARCHAR`.
pub const TEXT: u16 = 0x000A;
pub const TIMESTAMP: u16 = 0x000B;
pub const UUID: u16 = 0x000C;
pub const VARCHAR: u16 = 0x000D;
pub const VARINT: u16 = 0x000E;
pub const TIMEUUID: u16 = 0x000F;
pub const INET: u16 = 0x0010;
pub const DATE: u16 = 0x0011;
pub const TIME: u16 = 0x0012;
pub const SMALLINT: u16 = 0x0013;
pub const TINYINT: u16 = 0x0014;
pub const LIST: u16 = 0x0020;
pub const MAP: u16 = 0x0021;
pub const SET: u16 = 0x0022;
pub const UDT: u16 = 0x0030;
pub const TUPLE: u16 = 0x0031;

/// A declared CQL type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    /// A server side type known only by its fully qualified marshal class name.
    Custom(String),
    Ascii,
    Bigint,
    Blob,
    Boolean,
    Counter,
    Decimal,
    Double,
    Float,
    Int,
    Timestamp,
    Uuid,
    Text,
    Varint,
    Timeuuid,
    Inet,
    Date,
    Time,
    Smallint,
    Tinyint,
    List(Box<DataType>),
    Set(Box<DataType>),
    Map(Box<DataType>, Box<DataType>),
    Udt {
        keyspace: String,
        name: String,
        fields: Vec<(String, DataType)>,
    },
    Tuple(Vec<DataType>),
}

impl DataType {
    pub fn list(element: DataType) -> Self {
        DataType::List(Box::new(element))
    }

    pub fn set(element: DataType) -> Self {
        DataType::Set(Box::new(element))
    }

    pub fn map(key: DataType, value: DataType) -> Self {
        DataType::Map(Box::new(key), Box::new(value))
    }

    pub fn custom(class_name: impl Into<String>) -> Self {
        DataType::Custom(class_name.into())
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, DataType::List(_) | DataType::Set(_) | DataType::Map(..))
    }

    /// The `[option]` id of this type.
    pub fn id(&self) -> u16 {
        match self {
            DataType::Custom(_) => CUSTOM,
            DataType::Ascii => ASCII,
            DataType::Bigint => BIGINT,
            DataType::Blob => BLOB,
            DataType::Boolean => BOOLEAN,
            DataType::Counter => COUNTER,
            DataType::Decimal => DECIMAL,
            DataType::Double => DOUBLE,
            DataType::Float => FLOAT,
            DataType::Int => INT,
            DataType::Timestamp => TIMESTAMP,
            DataType::Uuid => UUID,
            DataType::Text => VARCHAR,
            DataType::Varint => VARINT,
            DataType::Timeuuid => TIMEUUID,
            DataType::Inet => INET,
            DataType::Date => DATE,
            DataType::Time => TIME,
            DataType::Smallint => SMALLINT,
            DataType::Tinyint => TINYINT,
            DataType::List(_) => LIST,
            DataType::Map(..) => MAP,
            DataType::Set(_) => SET,
            DataType::Udt { .. } => UDT,
            DataType::Tuple(_) => TUPLE,
        }
    }
}

impl FromPayload for DataType {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        let id = read_short(start, payload)?;
        Ok(match id {
            CUSTOM => DataType::Custom(read_string(start, payload)?),
            ASCII => DataType::Ascii,
            BIGINT => DataType::Bigint,
            BLOB => DataType::Blob,
            BOOLEAN => DataType::Boolean,
            COUNTER => DataType::Counter,
            DECIMAL => DataType::Decimal,
            DOUBLE => DataType::Double,
            FLOAT => DataType::Float,
            INT => DataType::Int,
            TEXT | VARCHAR => DataType::Text,
            TIMESTAMP => DataType::Timestamp,
            UUID => DataType::Uuid,
            VARINT => DataType::Varint,
            TIMEUUID => DataType::Timeuuid,
            INET => DataType::Inet,
            DATE => DataType::Date,
            TIME => DataType::Time,
            SMALLINT => DataType::Smallint,
            TINYINT => DataType::Tinyint,
            LIST => DataType::list(DataType::from_payload(start, payload)?),
            MAP => DataType::map(
                DataType::from_payload(start, payload)?,
                DataType::from_payload(start, payload)?,
            ),
            SET => DataType::set(DataType::from_payload(start, payload)?),
            UDT => {
                let keyspace = read_string(start, payload)?;
                let name = read_string(start, payload)?;
                let n = read_short(start, payload)? as usize;
                let mut fields = Vec::with_capacity(n);
                for _ in 0..n {
                    fields.push((read_string(start, payload)?, DataType::from_payload(start, payload)?));
                }
                DataType::Udt { keyspace, name, fields }
            }
            TUPLE => {
                let n = read_short(start, payload)? as usize;
                let mut types = Vec::with_capacity(n);
                for _ in 0..n {
                    types.push(DataType::from_payload(start, payload)?);
                }
                DataType::Tuple(types)
            }
            _ => anyhow::bail!("Unknown CQL type {:#06x}", id),
        })
    }
}

impl ToPayload for &DataType {
    fn to_payload(self, payload: &mut Vec<u8>) {
        write_short(self.id(), payload);
        match self {
            DataType::Custom(class) => write_string(class, payload),
            DataType::List(e) | DataType::Set(e) => e.as_ref().to_payload(payload),
            DataType::Map(k, v) => {
                k.as_ref().to_payload(payload);
                v.as_ref().to_payload(payload);
            }
            DataType::Udt { keyspace, name, fields } => {
                write_string(keyspace, payload);
                write_string(name, payload);
                write_short(fields.len() as u16, payload);
                for (field, data_type) in fields {
                    write_string(field, payload);
                    data_type.to_payload(payload);
                }
            }
            DataType::Tuple(types) => {
                write_short(types.len() as u16, payload);
                for data_type in types {
                    data_type.to_payload(payload);
                }
            }
            _ => (),
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Custom(class) => write!(f, "'{}'", class),
            DataType::Ascii => write!(f, "ascii"),
            DataType::Bigint => write!(f, "bigint"),
            DataType::Blob => write!(f, "blob"),
            DataType::Boolean => write!(f, "boolean"),
            DataType::Counter => write!(f, "counter"),
            DataType::Decimal => write!(f, "decimal"),
            DataType::Double => write!(f, "double"),
            DataType::Float => write!(f, "float"),
            DataType::Int => write!(f, "int"),
            DataType::Timestamp => write!(f, "timestamp"),
            DataType::Uuid => write!(f, "uuid"),
            DataType::Text => write!(f, "text"),
            DataType::Varint => write!(f, "varint"),
            DataType::Timeuuid => write!(f, "timeuuid"),
            DataType::Inet => write!(f, "inet"),
            DataType::Date => write!(f, "date"),
            DataType::Time => write!(f, "time"),
            DataType::Smallint => write!(f, "smallint"),
            DataType::Tinyint => write!(f, "tinyint"),
            DataType::List(e) => write!(f, "list<{}>", e),
            DataType::Set(e) => write!(f, "set<{}>", e),
            DataType::Map(k, v) => write!(f, "map<{}, {}>", k, v),
            DataType::Udt { keyspace, name, .. } => write!(f, "{}.{}", keyspace, name),
            DataType::Tuple(types) => {
                write!(f, "tuple<")?;
                for (i, t) in types.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, ">")
            }
        }
    }
}
