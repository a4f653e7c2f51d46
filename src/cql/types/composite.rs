// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Composite and dynamic composite custom types.
//!
//! A composite value is a concatenation of components, each laid out as
//! `[short length][payload][end-of-component byte]`. Dynamic composites prefix every component
//! with its type: either `0x80` followed by a one byte alias, or a `[short]` class name length
//! (high bit clear) followed by the class name.
//!
//! Composite bytes decode opaquely to [`CqlValue::Custom`]; use [`split_composite`] or
//! [`decode_components`] to look inside them.

use super::{
    codec::{
        CodecContext,
        CodecError,
        CodecRegistry,
        TypeCodec,
    },
    marshal::{
        MarshalType,
        COMPOSITE_TYPE,
        DYNAMIC_COMPOSITE_TYPE,
        MARSHAL_PREFIX,
    },
    CqlValue,
    DataType,
    ValueKind,
};
use crate::cql::frame::ProtocolVersion;
use std::convert::TryFrom;

/// The only end-of-component byte emitted.
pub const EOC_EQUAL: u8 = 0x00;
const ALIAS_FLAG: u16 = 0x8000;

/// One component of a composite value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Component<'a> {
    pub value: &'a [u8],
    pub end_of_component: u8,
}

/// How a dynamic composite component names its type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ComponentType<'a> {
    Alias(u8),
    Class(&'a str),
}

fn marshal_of(data_type: &DataType) -> Option<MarshalType> {
    match data_type {
        DataType::Custom(class) => MarshalType::parse(class).ok(),
        _ => None,
    }
}

fn composite_type() -> DataType {
    DataType::custom(format!("{}{}", MARSHAL_PREFIX, COMPOSITE_TYPE))
}

fn dynamic_composite_type() -> DataType {
    DataType::custom(format!("{}{}", MARSHAL_PREFIX, DYNAMIC_COMPOSITE_TYPE))
}

fn write_component(payload: &[u8], data_type: &DataType, buf: &mut Vec<u8>) -> Result<(), CodecError> {
    let len = u16::try_from(payload.len()).map_err(|_| {
        CodecError::overflow(data_type, format!("component of {} bytes exceeds a [short]", payload.len()))
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);
    buf.push(EOC_EQUAL);
    Ok(())
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    data_type: DataType,
}

impl<'a> Cursor<'a> {
    fn done(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.bytes.len() - self.pos < n {
            return Err(CodecError::malformed(&self.data_type, "truncated component"));
        }
        let res = &self.bytes[self.pos..][..n];
        self.pos += n;
        Ok(res)
    }

    fn short(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn component(&mut self) -> Result<Component<'a>, CodecError> {
        let len = self.short()? as usize;
        let value = self.take(len)?;
        let end_of_component = self.take(1)?[0];
        Ok(Component { value, end_of_component })
    }
}

/// Locate the components of a composite value.
pub fn split_composite(bytes: &[u8]) -> Result<Vec<Component<'_>>, CodecError> {
    let mut cursor = Cursor {
        bytes,
        pos: 0,
        data_type: composite_type(),
    };
    let mut components = Vec::new();
    while !cursor.done() {
        components.push(cursor.component()?);
    }
    Ok(components)
}

/// Locate the components of a dynamic composite value, along with their type headers.
pub fn split_dynamic_composite(bytes: &[u8]) -> Result<Vec<(ComponentType<'_>, Component<'_>)>, CodecError> {
    let mut cursor = Cursor {
        bytes,
        pos: 0,
        data_type: dynamic_composite_type(),
    };
    let mut components = Vec::new();
    while !cursor.done() {
        let header = cursor.short()?;
        let component_type = if header & ALIAS_FLAG != 0 {
            ComponentType::Alias((header & 0xFF) as u8)
        } else {
            let name = cursor.take(header as usize)?;
            ComponentType::Class(
                std::str::from_utf8(name)
                    .map_err(|_| CodecError::malformed(&cursor.data_type, "class name is not utf8"))?,
            )
        };
        components.push((component_type, cursor.component()?));
    }
    Ok(components)
}

/// Decode the components of a composite or dynamic composite value using their declared types.
pub fn decode_components(
    bytes: &[u8],
    class_name: &str,
    registry: &CodecRegistry,
    version: ProtocolVersion,
) -> Result<Vec<CqlValue>, CodecError> {
    match MarshalType::parse(class_name)? {
        MarshalType::Composite(types) => {
            let components = split_composite(bytes)?;
            if components.len() > types.len() {
                return Err(CodecError::malformed(
                    &composite_type(),
                    format!("{} components for {} types", components.len(), types.len()),
                ));
            }
            components
                .iter()
                .zip(types)
                .map(|(c, t)| registry.decode(c.value, &t.data_type(), version))
                .collect()
        }
        MarshalType::DynamicComposite(aliases) => split_dynamic_composite(bytes)?
            .into_iter()
            .map(|(component_type, c)| {
                let data_type = match component_type {
                    ComponentType::Alias(alias) => aliases
                        .iter()
                        .find(|(a, _)| *a == alias)
                        .map(|(_, t)| t.data_type())
                        .ok_or_else(|| {
                            CodecError::malformed(
                                &dynamic_composite_type(),
                                format!("undeclared alias {:?}", alias as char),
                            )
                        })?,
                    ComponentType::Class(class) => MarshalType::parse(class)?.data_type(),
                };
                registry.decode(c.value, &data_type, version)
            })
            .collect(),
        _ => Err(CodecError::InvalidMarshalClass(class_name.to_owned())),
    }
}

/// Encodes [`CqlValue::Composite`] values declared as a `CompositeType`.
#[derive(Copy, Clone, Debug, Default)]
pub struct CompositeCodec;

impl TypeCodec for CompositeCodec {
    fn accepts(&self, data_type: &DataType, kind: ValueKind) -> bool {
        kind == ValueKind::Composite && self.decodes(data_type)
    }

    fn decodes(&self, data_type: &DataType) -> bool {
        marshal_of(data_type).map(|m| m.is_composite()).unwrap_or(false)
    }

    fn encode(&self, value: &CqlValue, data_type: &DataType, ctx: &CodecContext<'_>) -> Result<Vec<u8>, CodecError> {
        let types = match marshal_of(data_type) {
            Some(MarshalType::Composite(types)) => types,
            _ => return Err(CodecError::InvalidMarshalClass(data_type.to_string())),
        };
        let components = match value {
            CqlValue::Composite(components) => components,
            v => {
                return Err(CodecError::CodecNotFound {
                    kind: Some(v.kind()),
                    data_type: data_type.clone(),
                })
            }
        };
        // A prefix of the declared components is a valid slice bound
        if components.len() > types.len() {
            return Err(CodecError::malformed(
                data_type,
                format!("{} components for {} types", components.len(), types.len()),
            ));
        }
        let mut buf = Vec::new();
        for (component, t) in components.iter().zip(types.iter()) {
            let payload = ctx.encode(component, &t.data_type())?;
            write_component(&payload, data_type, &mut buf)?;
        }
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8], _data_type: &DataType, _ctx: &CodecContext<'_>) -> Result<CqlValue, CodecError> {
        split_composite(bytes)?;
        Ok(CqlValue::Custom(bytes.to_vec()))
    }
}

/// Encodes [`CqlValue::Composite`] values declared as a `DynamicCompositeType`.
///
/// Each component is tagged with the first declared alias whose type encodes it.
#[derive(Copy, Clone, Debug, Default)]
pub struct DynamicCompositeCodec;

impl TypeCodec for DynamicCompositeCodec {
    fn accepts(&self, data_type: &DataType, kind: ValueKind) -> bool {
        kind == ValueKind::Composite && self.decodes(data_type)
    }

    fn decodes(&self, data_type: &DataType) -> bool {
        marshal_of(data_type)
            .map(|m| m.is_dynamic_composite())
            .unwrap_or(false)
    }

    fn encode(&self, value: &CqlValue, data_type: &DataType, ctx: &CodecContext<'_>) -> Result<Vec<u8>, CodecError> {
        let aliases = match marshal_of(data_type) {
            Some(MarshalType::DynamicComposite(aliases)) => aliases,
            _ => return Err(CodecError::InvalidMarshalClass(data_type.to_string())),
        };
        let components = match value {
            CqlValue::Composite(components) => components,
            v => {
                return Err(CodecError::CodecNotFound {
                    kind: Some(v.kind()),
                    data_type: data_type.clone(),
                })
            }
        };
        let mut buf = Vec::new();
        for component in components {
            let (alias, payload) = aliases
                .iter()
                .find_map(|(alias, t)| ctx.encode(component, &t.data_type()).ok().map(|p| (*alias, p)))
                .ok_or_else(|| CodecError::CodecNotFound {
                    kind: Some(component.kind()),
                    data_type: data_type.clone(),
                })?;
            buf.extend_from_slice(&(ALIAS_FLAG | alias as u16).to_be_bytes());
            write_component(&payload, data_type, &mut buf)?;
        }
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8], _data_type: &DataType, _ctx: &CodecContext<'_>) -> Result<CqlValue, CodecError> {
        split_dynamic_composite(bytes)?;
        Ok(CqlValue::Custom(bytes.to_vec()))
    }
}
