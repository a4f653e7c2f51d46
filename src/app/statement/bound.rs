// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use super::{
    PreparedStatement,
    StatementOptions,
};
use crate::{
    app::dispatcher::RequestError,
    cql::{
        frame::{
            Consistency,
            ProtocolVersion,
            Value,
            Values,
        },
        types::{
            marshal::BYTES_TYPE,
            CodecError,
            CodecRegistry,
            CqlValue,
            DataType,
        },
    },
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("Expected {expected} values, got {actual}")]
    CountMismatch { expected: usize, actual: usize },
    #[error("No bind marker named {0:?}")]
    UnknownName(String),
    #[error("Values must be bound either all by index or all by name")]
    MixedAccess,
    #[error("No value bound for marker {0}")]
    MissingValue(usize),
    #[error("Index {index} out of range for {len} bind markers")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Unset values require protocol v4, negotiated {0}")]
    UnsetNotSupported(ProtocolVersion),
}

/// The value of one bind marker.
#[derive(Clone, Debug, PartialEq)]
pub enum BoundValue {
    Value(CqlValue),
    Null,
    /// Leave the column untouched. Protocol v4 only.
    Unset,
}

impl From<CqlValue> for BoundValue {
    fn from(value: CqlValue) -> Self {
        BoundValue::Value(value)
    }
}

impl<T: Into<CqlValue>> From<Option<T>> for BoundValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => BoundValue::Value(v.into()),
            None => BoundValue::Null,
        }
    }
}

impl BoundValue {
    /// Encode as a `[value]`. Values without a declared type are encoded as their natural type.
    pub(crate) fn encode(
        &self,
        data_type: Option<&DataType>,
        registry: &CodecRegistry,
        version: ProtocolVersion,
    ) -> Result<Value, RequestError> {
        match self {
            BoundValue::Value(value) => {
                let natural;
                let data_type = match data_type {
                    Some(data_type) => data_type,
                    None => {
                        natural = value.natural_type().ok_or_else(|| CodecError::CodecNotFound {
                            kind: Some(value.kind()),
                            data_type: DataType::custom(BYTES_TYPE),
                        })?;
                        &natural
                    }
                };
                Ok(Value::Set(registry.encode(value, data_type, version)?))
            }
            BoundValue::Null => Ok(Value::Null),
            BoundValue::Unset if version.supports_unset() => Ok(Value::Unset),
            BoundValue::Unset => Err(BindError::UnsetNotSupported(version).into()),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Access {
    Index,
    Name,
}

/// A prepared statement with a value for each of its markers.
#[derive(Clone, Debug)]
pub struct BoundStatement {
    prepared: PreparedStatement,
    values: Vec<Option<BoundValue>>,
    access: Option<Access>,
    idempotent: Option<bool>,
    options: StatementOptions,
}

impl BoundStatement {
    pub(crate) fn new(prepared: PreparedStatement) -> Self {
        Self {
            values: vec![None; prepared.definitions().len()],
            idempotent: prepared.idempotence(),
            access: None,
            options: StatementOptions::default(),
            prepared,
        }
    }

    pub fn prepared(&self) -> &PreparedStatement {
        &self.prepared
    }

    /// The effective flag of this statement: its own, which starts as the prepared default.
    pub fn explicit_idempotence(&self) -> Option<bool> {
        self.idempotent
    }

    statement_options!();

    fn access(&mut self, access: Access) -> Result<(), BindError> {
        match self.access {
            Some(current) if current != access => Err(BindError::MixedAccess),
            _ => {
                self.access = Some(access);
                Ok(())
            }
        }
    }

    pub fn set(&mut self, index: usize, value: impl Into<BoundValue>) -> Result<&mut Self, BindError> {
        self.access(Access::Index)?;
        let len = self.values.len();
        let slot = self
            .values
            .get_mut(index)
            .ok_or(BindError::IndexOutOfRange { index, len })?;
        *slot = Some(value.into());
        Ok(self)
    }

    pub fn set_by_name(&mut self, name: &str, value: impl Into<BoundValue>) -> Result<&mut Self, BindError> {
        self.access(Access::Name)?;
        let index = self
            .prepared
            .definitions()
            .index_of(name)
            .ok_or_else(|| BindError::UnknownName(name.to_string()))?;
        self.values[index] = Some(value.into());
        Ok(self)
    }

    pub fn value(&self, index: usize) -> Option<&BoundValue> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Fails on the first marker without a value.
    pub fn check_complete(&self) -> Result<(), BindError> {
        match self.values.iter().position(Option::is_none) {
            Some(index) => Err(BindError::MissingValue(index)),
            None => Ok(()),
        }
    }

    pub(crate) fn encode(&self, registry: &CodecRegistry, version: ProtocolVersion) -> Result<Values, RequestError> {
        self.check_complete()?;
        let mut values = Values::default();
        for (definition, value) in self.prepared.definitions().iter().zip(self.values.iter()) {
            let value = value.as_ref().ok_or(BindError::MissingValue(definition.index))?;
            values.push(None, value.encode(Some(&definition.data_type), registry, version)?);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::statement::ValueDefinitions;

    fn prepared() -> PreparedStatement {
        PreparedStatement::new(
            "INSERT INTO ks.t (k, v) VALUES (:k, :v)",
            vec![9; 16],
            ValueDefinitions::new(vec![(Some("k"), DataType::Text), (Some("v"), DataType::Int)]),
            vec![0],
            Vec::new(),
        )
    }

    #[test]
    fn bound_statements_inherit_without_mutating_the_prepared_flag() {
        let prepared = prepared().with_idempotence(true);
        let mut bound = prepared.bind(vec![CqlValue::from("a"), CqlValue::Int(1)]).unwrap();
        assert_eq!(bound.explicit_idempotence(), Some(true));
        bound.set_idempotence(Some(false));
        assert_eq!(bound.explicit_idempotence(), Some(false));
        assert_eq!(prepared.idempotence(), Some(true));
        assert_eq!(prepared.bound().explicit_idempotence(), Some(true));
    }

    #[test]
    fn positional_count_must_match() {
        assert_eq!(
            prepared().bind(vec![CqlValue::from("a")]).unwrap_err(),
            BindError::CountMismatch { expected: 2, actual: 1 }
        );
        assert!(prepared()
            .bind(vec![CqlValue::from("a"), CqlValue::Int(1), CqlValue::Int(2)])
            .is_err());
    }

    #[test]
    fn unknown_names_are_rejected() {
        let res = prepared().bind_named(vec![("k", CqlValue::from("a")), ("nope", CqlValue::Int(1))]);
        assert_eq!(res.unwrap_err(), BindError::UnknownName("nope".to_string()));
    }

    #[test]
    fn named_binding_must_cover_every_marker() {
        let res = prepared().bind_named(vec![("K", CqlValue::from("a"))]);
        assert_eq!(res.unwrap_err(), BindError::MissingValue(1));
        let bound = prepared()
            .bind_named(vec![("v", CqlValue::Int(1)), ("k", CqlValue::from("a"))])
            .unwrap();
        assert_eq!(bound.value(0), Some(&BoundValue::Value(CqlValue::from("a"))));
    }

    #[test]
    fn mixing_access_modes_fails() {
        let mut bound = prepared().bound();
        bound.set(0, CqlValue::from("a")).unwrap();
        assert_eq!(
            bound.set_by_name("v", CqlValue::Int(1)).unwrap_err(),
            BindError::MixedAccess
        );
        assert_eq!(
            bound.set(5, BoundValue::Null).unwrap_err(),
            BindError::IndexOutOfRange { index: 5, len: 2 }
        );
    }

    #[test]
    fn encoding_uses_the_declared_types() {
        let bound = prepared()
            .bind(vec![BoundValue::from(Some("a")), BoundValue::Unset])
            .unwrap();
        let values = bound.encode(&CodecRegistry::default(), ProtocolVersion::V4).unwrap();
        assert_eq!(values.get(0), Some(&Value::Set(b"a".to_vec())));
        assert_eq!(values.get(1), Some(&Value::Unset));
        assert!(matches!(
            bound.encode(&CodecRegistry::default(), ProtocolVersion::V3),
            Err(RequestError::Bind(BindError::UnsetNotSupported(ProtocolVersion::V3)))
        ));
        let wrong = prepared()
            .bind(vec![CqlValue::Int(1), CqlValue::Int(2)])
            .unwrap();
        assert!(matches!(
            wrong.encode(&CodecRegistry::default(), ProtocolVersion::V4),
            Err(RequestError::Codec(CodecError::CodecNotFound { .. }))
        ));
    }
}
