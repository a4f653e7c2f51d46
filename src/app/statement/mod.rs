// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Statements: plain query strings and statements bound from prepared ones.

macro_rules! statement_options {
    () => {
        pub fn options(&self) -> &StatementOptions {
            &self.options
        }

        pub fn with_consistency(mut self, consistency: Consistency) -> Self {
            self.options.consistency = Some(consistency);
            self
        }

        pub fn with_serial_consistency(mut self, consistency: Consistency) -> Self {
            self.options.serial_consistency = Some(consistency);
            self
        }

        pub fn with_page_size(mut self, page_size: i32) -> Self {
            self.options.page_size = Some(page_size);
            self
        }

        /// Resume from the paging state of a previous page.
        pub fn with_paging_state(mut self, paging_state: Option<Vec<u8>>) -> Self {
            self.options.paging_state = paging_state;
            self
        }

        pub fn with_timestamp(mut self, timestamp: i64) -> Self {
            self.options.timestamp = Some(timestamp);
            self
        }

        pub fn with_idempotence(mut self, idempotent: bool) -> Self {
            self.idempotent = Some(idempotent);
            self
        }

        /// Set or clear the idempotence flag. Only effective before execution.
        pub fn set_idempotence(&mut self, idempotent: Option<bool>) {
            self.idempotent = idempotent;
        }
    };
}

mod bound;
mod prepared;

pub use bound::*;
pub use prepared::*;

use crate::{
    app::dispatcher::RequestError,
    cql::{
        frame::{
            Consistency,
            ProtocolVersion,
            Values,
        },
        types::{
            CodecRegistry,
            DataType,
        },
    },
};

/// Resolve the idempotence of one execution: the statement's own flag, else the flag inherited
/// from its prepared statement, else the process wide default.
pub fn resolve_idempotence(explicit: Option<bool>, inherited: Option<bool>, global: bool) -> bool {
    explicit.or(inherited).unwrap_or(global)
}

/// Per statement overrides of the query parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatementOptions {
    pub consistency: Option<Consistency>,
    pub serial_consistency: Option<Consistency>,
    pub page_size: Option<i32>,
    pub paging_state: Option<Vec<u8>>,
    pub timestamp: Option<i64>,
}

/// A query string with positional values.
#[derive(Clone, Debug)]
pub struct SimpleStatement {
    query: String,
    values: Vec<(BoundValue, Option<DataType>)>,
    idempotent: Option<bool>,
    options: StatementOptions,
}

impl SimpleStatement {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            values: Vec::new(),
            idempotent: None,
            options: StatementOptions::default(),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Append a value, encoded according to its natural type.
    pub fn value(mut self, value: impl Into<BoundValue>) -> Self {
        self.values.push((value.into(), None));
        self
    }

    /// Append a value with an explicit type, for values without a natural type such as
    /// composites.
    pub fn typed_value(mut self, value: impl Into<BoundValue>, data_type: DataType) -> Self {
        self.values.push((value.into(), Some(data_type)));
        self
    }

    pub fn values(&self) -> impl Iterator<Item = &BoundValue> {
        self.values.iter().map(|(v, _)| v)
    }

    pub fn idempotence(&self) -> Option<bool> {
        self.idempotent
    }

    statement_options!();

    fn encode(&self, registry: &CodecRegistry, version: ProtocolVersion) -> Result<Values, RequestError> {
        let mut values = Values::default();
        for (value, data_type) in self.values.iter() {
            values.push(None, value.encode(data_type.as_ref(), registry, version)?);
        }
        Ok(values)
    }
}

impl From<&str> for SimpleStatement {
    fn from(query: &str) -> Self {
        Self::new(query)
    }
}

impl From<String> for SimpleStatement {
    fn from(query: String) -> Self {
        Self::new(query)
    }
}

/// Anything the dispatcher can execute.
#[derive(Clone, Debug)]
pub enum Statement {
    Simple(SimpleStatement),
    Bound(BoundStatement),
}

impl Statement {
    pub fn query(&self) -> &str {
        match self {
            Statement::Simple(s) => s.query(),
            Statement::Bound(b) => b.prepared().query(),
        }
    }

    pub fn options(&self) -> &StatementOptions {
        match self {
            Statement::Simple(s) => s.options(),
            Statement::Bound(b) => b.options(),
        }
    }

    /// The flag set on the statement itself.
    pub fn explicit_idempotence(&self) -> Option<bool> {
        match self {
            Statement::Simple(s) => s.idempotence(),
            Statement::Bound(b) => b.explicit_idempotence(),
        }
    }

    /// The flag of the prepared statement a bound statement comes from.
    pub fn inherited_idempotence(&self) -> Option<bool> {
        match self {
            Statement::Simple(_) => None,
            Statement::Bound(b) => b.prepared().idempotence(),
        }
    }

    pub fn is_idempotent(&self, default_idempotence: bool) -> bool {
        resolve_idempotence(
            self.explicit_idempotence(),
            self.inherited_idempotence(),
            default_idempotence,
        )
    }

    /// Encode the values for the negotiated protocol version. Runs before any I/O.
    pub(crate) fn encode_values(&self, registry: &CodecRegistry, version: ProtocolVersion) -> Result<Values, RequestError> {
        match self {
            Statement::Simple(s) => s.encode(registry, version),
            Statement::Bound(b) => b.encode(registry, version),
        }
    }
}

impl From<SimpleStatement> for Statement {
    fn from(statement: SimpleStatement) -> Self {
        Statement::Simple(statement)
    }
}

impl From<BoundStatement> for Statement {
    fn from(statement: BoundStatement) -> Self {
        Statement::Bound(statement)
    }
}

impl From<&str> for Statement {
    fn from(query: &str) -> Self {
        Statement::Simple(query.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cql::{
        frame::Value,
        types::{
            CodecError,
            CqlValue,
            ValueKind,
        },
    };

    #[test]
    fn idempotence_resolution_order() {
        assert!(resolve_idempotence(Some(true), Some(false), false));
        assert!(!resolve_idempotence(Some(false), Some(true), true));
        assert!(resolve_idempotence(None, Some(true), false));
        assert!(!resolve_idempotence(None, None, false));
        assert!(resolve_idempotence(None, None, true));
    }

    #[test]
    fn simple_statement_values_use_natural_types() {
        let statement = SimpleStatement::new("INSERT INTO ks.t (k, v) VALUES (?, ?)")
            .value(CqlValue::from("key"))
            .value(BoundValue::Null)
            .with_consistency(Consistency::Quorum)
            .with_idempotence(true);
        let values = Statement::from(statement.clone())
            .encode_values(&CodecRegistry::default(), ProtocolVersion::V4)
            .unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values.get(0), Some(&Value::Set(b"key".to_vec())));
        assert_eq!(values.get(1), Some(&Value::Null));
        assert_eq!(statement.options().consistency, Some(Consistency::Quorum));
        assert!(Statement::from(statement).is_idempotent(false));
    }

    #[test]
    fn values_without_a_natural_type_need_one() {
        let statement: Statement = SimpleStatement::new("SELECT * FROM ks.t WHERE c = ?")
            .value(CqlValue::Composite(vec![CqlValue::Int(1)]))
            .into();
        match statement.encode_values(&CodecRegistry::default(), ProtocolVersion::V4) {
            Err(RequestError::Codec(CodecError::CodecNotFound { kind, .. })) => {
                assert_eq!(kind, Some(ValueKind::Composite))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unset_requires_v4() {
        let statement: Statement = SimpleStatement::new("UPDATE ks.t SET v = ? WHERE k = 1")
            .value(BoundValue::Unset)
            .into();
        assert!(statement
            .encode_values(&CodecRegistry::default(), ProtocolVersion::V4)
            .is_ok());
        assert!(matches!(
            statement.encode_values(&CodecRegistry::default(), ProtocolVersion::V3),
            Err(RequestError::Bind(BindError::UnsetNotSupported(ProtocolVersion::V3)))
        ));
    }
}
