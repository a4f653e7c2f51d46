// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Server side marshal class names, as carried by custom types.

use super::{
    codec::CodecError,
    DataType,
};
use std::fmt::Display;

pub const MARSHAL_PREFIX: &str = "org.apache.cassandra.db.marshal.";
pub const BYTES_TYPE: &str = "org.apache.cassandra.db.marshal.BytesType";
pub const COMPOSITE_TYPE: &str = "CompositeType";
pub const DYNAMIC_COMPOSITE_TYPE: &str = "DynamicCompositeType";

/// A parsed marshal class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarshalType {
    /// A class with a CQL counterpart.
    Native(DataType),
    Composite(Vec<MarshalType>),
    /// Components keyed by their one byte alias.
    DynamicComposite(Vec<(u8, MarshalType)>),
    /// Any other class, kept by its full name.
    Other(String),
}

impl MarshalType {
    /// Parse a marshal class name such as
    /// `org.apache.cassandra.db.marshal.CompositeType(org.apache.cassandra.db.marshal.UTF8Type)`.
    pub fn parse(class_name: &str) -> Result<Self, CodecError> {
        let mut parser = Parser {
            input: class_name,
            pos: 0,
        };
        let res = parser.parse_type()?;
        parser.skip_whitespace();
        if parser.pos != class_name.len() {
            return Err(CodecError::InvalidMarshalClass(class_name.to_owned()));
        }
        Ok(res)
    }

    /// The declared type the codec uses for a component of this class.
    pub fn data_type(&self) -> DataType {
        match self {
            MarshalType::Native(data_type) => data_type.clone(),
            other => DataType::Custom(other.to_string()),
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, MarshalType::Composite(_))
    }

    pub fn is_dynamic_composite(&self) -> bool {
        matches!(self, MarshalType::DynamicComposite(_))
    }
}

impl Display for MarshalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarshalType::Native(data_type) => write!(f, "{}", native_class(data_type)),
            MarshalType::Composite(components) => {
                write!(f, "{}{}(", MARSHAL_PREFIX, COMPOSITE_TYPE)?;
                for (i, c) in components.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", c)?;
                }
                write!(f, ")")
            }
            MarshalType::DynamicComposite(components) => {
                write!(f, "{}{}(", MARSHAL_PREFIX, DYNAMIC_COMPOSITE_TYPE)?;
                for (i, (alias, c)) in components.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}=>{}", *alias as char, c)?;
                }
                write!(f, ")")
            }
            MarshalType::Other(class) => write!(f, "{}", class),
        }
    }
}

fn native_class(data_type: &DataType) -> String {
    let simple = |name: &str| format!("{}{}", MARSHAL_PREFIX, name);
    match data_type {
        DataType::Ascii => simple("AsciiType"),
        DataType::Bigint => simple("LongType"),
        DataType::Blob => simple("BytesType"),
        DataType::Boolean => simple("BooleanType"),
        DataType::Counter => simple("CounterColumnType"),
        DataType::Decimal => simple("DecimalType"),
        DataType::Double => simple("DoubleType"),
        DataType::Float => simple("FloatType"),
        DataType::Int => simple("Int32Type"),
        DataType::Timestamp => simple("TimestampType"),
        DataType::Uuid => simple("UUIDType"),
        DataType::Text => simple("UTF8Type"),
        DataType::Varint => simple("IntegerType"),
        DataType::Timeuuid => simple("TimeUUIDType"),
        DataType::Inet => simple("InetAddressType"),
        DataType::Date => simple("SimpleDateType"),
        DataType::Time => simple("TimeType"),
        DataType::Smallint => simple("ShortType"),
        DataType::Tinyint => simple("ByteType"),
        DataType::List(e) => format!("{}({})", simple("ListType"), native_class(e)),
        DataType::Set(e) => format!("{}({})", simple("SetType"), native_class(e)),
        DataType::Map(k, v) => format!("{}({},{})", simple("MapType"), native_class(k), native_class(v)),
        DataType::Tuple(types) => format!(
            "{}({})",
            simple("TupleType"),
            types.iter().map(native_class).collect::<Vec<_>>().join(",")
        ),
        // UDT class names embed hex encoded names the codec never needs to produce
        DataType::Udt { .. } => simple("BytesType"),
        DataType::Custom(class) => class.clone(),
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn err(&self) -> CodecError {
        CodecError::InvalidMarshalClass(self.input.to_owned())
    }

    fn skip_whitespace(&mut self) {
        while self.peek().map(|c| c.is_whitespace()).unwrap_or(false) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_whitespace();
        if self.input[self.pos..].starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn identifier(&mut self) -> Result<&'a str, CodecError> {
        self.skip_whitespace();
        let rest = &self.input[self.pos..];
        let len = rest
            .find(|c: char| c == '(' || c == ')' || c == ',' || c == '=' || c.is_whitespace())
            .unwrap_or_else(|| rest.len());
        if len == 0 {
            return Err(self.err());
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn arguments(&mut self) -> Result<Vec<MarshalType>, CodecError> {
        let mut args = Vec::new();
        if !self.eat("(") {
            return Ok(args);
        }
        loop {
            args.push(self.parse_type()?);
            if self.eat(")") {
                return Ok(args);
            }
            if !self.eat(",") {
                return Err(self.err());
            }
        }
    }

    fn aliased_arguments(&mut self) -> Result<Vec<(u8, MarshalType)>, CodecError> {
        let mut args = Vec::new();
        if !self.eat("(") {
            return Ok(args);
        }
        loop {
            let alias = match self.identifier()?.as_bytes() {
                [alias] => *alias,
                _ => return Err(self.err()),
            };
            if !self.eat("=>") {
                return Err(self.err());
            }
            args.push((alias, self.parse_type()?));
            if self.eat(")") {
                return Ok(args);
            }
            if !self.eat(",") {
                return Err(self.err());
            }
        }
    }

    fn parse_type(&mut self) -> Result<MarshalType, CodecError> {
        let start = self.pos;
        let class = self.identifier()?;
        let name = class.strip_prefix(MARSHAL_PREFIX).unwrap_or(class);
        if name == DYNAMIC_COMPOSITE_TYPE {
            return Ok(MarshalType::DynamicComposite(self.aliased_arguments()?));
        }
        let mut args = self.arguments()?;
        let native = |data_type: DataType| MarshalType::Native(data_type);
        Ok(match (name, args.len()) {
            ("ReversedType", 1) | ("FrozenType", 1) => args.remove(0),
            (COMPOSITE_TYPE, _) => MarshalType::Composite(args),
            ("AsciiType", 0) => native(DataType::Ascii),
            ("LongType", 0) => native(DataType::Bigint),
            ("BytesType", 0) => native(DataType::Blob),
            ("BooleanType", 0) => native(DataType::Boolean),
            ("CounterColumnType", 0) => native(DataType::Counter),
            ("DecimalType", 0) => native(DataType::Decimal),
            ("DoubleType", 0) => native(DataType::Double),
            ("FloatType", 0) => native(DataType::Float),
            ("Int32Type", 0) => native(DataType::Int),
            ("DateType", 0) | ("TimestampType", 0) => native(DataType::Timestamp),
            ("UUIDType", 0) | ("LexicalUUIDType", 0) => native(DataType::Uuid),
            ("UTF8Type", 0) => native(DataType::Text),
            ("IntegerType", 0) => native(DataType::Varint),
            ("TimeUUIDType", 0) => native(DataType::Timeuuid),
            ("InetAddressType", 0) => native(DataType::Inet),
            ("SimpleDateType", 0) => native(DataType::Date),
            ("TimeType", 0) => native(DataType::Time),
            ("ShortType", 0) => native(DataType::Smallint),
            ("ByteType", 0) => native(DataType::Tinyint),
            ("ListType", 1) => native(DataType::list(args.remove(0).data_type())),
            ("SetType", 1) => native(DataType::set(args.remove(0).data_type())),
            ("MapType", 2) => {
                let value = args.remove(1).data_type();
                native(DataType::map(args.remove(0).data_type(), value))
            }
            ("TupleType", _) => native(DataType::Tuple(args.iter().map(MarshalType::data_type).collect())),
            _ => MarshalType::Other(self.input[start..self.pos].trim().to_owned()),
        })
    }
}
