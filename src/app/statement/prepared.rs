// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use super::{
    BindError,
    BoundStatement,
    BoundValue,
};
use crate::cql::{
    frame::{
        ColumnSpec,
        PreparedResult,
    },
    types::DataType,
};
use std::{
    borrow::Cow,
    collections::HashMap,
    sync::Arc,
};

/// Normalize an identifier the way the server does: double quoted names are taken verbatim
/// (with `""` standing for a quote), anything else is case insensitive.
pub fn normalize_identifier(name: &str) -> Cow<'_, str> {
    if name.len() >= 2 && name.starts_with('"') && name.ends_with('"') {
        let inner = &name[1..name.len() - 1];
        if inner.contains("\"\"") {
            Cow::Owned(inner.replace("\"\"", "\""))
        } else {
            Cow::Borrowed(inner)
        }
    } else if name.chars().any(|c| c.is_uppercase()) {
        Cow::Owned(name.to_lowercase())
    } else {
        Cow::Borrowed(name)
    }
}

/// One bind marker of a prepared statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueDefinition {
    pub index: usize,
    /// The name as stored by the server, case sensitive.
    pub name: Option<String>,
    pub data_type: DataType,
    pub keyspace: String,
    pub table: String,
}

/// The bind markers of a prepared statement, indexed from 0.
///
/// Names are unique: when the server reports the same name twice, only the first marker is
/// reachable by name and the others must be bound by index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValueDefinitions {
    definitions: Vec<ValueDefinition>,
    names: HashMap<String, usize>,
}

impl ValueDefinitions {
    /// Build definitions from `(name, type)` pairs, keyspace and table left empty.
    pub fn new<N: Into<String>>(definitions: impl IntoIterator<Item = (Option<N>, DataType)>) -> Self {
        Self::build(
            definitions
                .into_iter()
                .map(|(name, data_type)| (name.map(Into::into), data_type, String::new(), String::new())),
        )
    }

    /// Map the bind variable metadata of a PREPARED result.
    pub fn from_column_specs(specs: &[ColumnSpec]) -> Self {
        Self::build(specs.iter().map(|spec| {
            (
                Some(spec.name.clone()).filter(|n| !n.is_empty()),
                spec.data_type.clone(),
                spec.keyspace.clone(),
                spec.table.clone(),
            )
        }))
    }

    fn build(definitions: impl Iterator<Item = (Option<String>, DataType, String, String)>) -> Self {
        let mut res = Self::default();
        for (index, (name, data_type, keyspace, table)) in definitions.enumerate() {
            let name = match name {
                Some(name) if !res.names.contains_key(&name) => {
                    res.names.insert(name.clone(), index);
                    Some(name)
                }
                _ => None,
            };
            res.definitions.push(ValueDefinition {
                index,
                name,
                data_type,
                keyspace,
                table,
            });
        }
        res
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ValueDefinition> {
        self.definitions.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValueDefinition> {
        self.definitions.iter()
    }

    /// Look a marker up by name, following the quoting rules of [`normalize_identifier`].
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.get(normalize_identifier(name).as_ref()).copied()
    }
}

#[derive(Debug)]
struct PreparedInner {
    query: String,
    id: Vec<u8>,
    definitions: ValueDefinitions,
    pk_indexes: Vec<u16>,
    result_columns: Vec<ColumnSpec>,
}

/// A statement prepared by the server. Cheap to clone; clones share everything but the
/// idempotence flag.
#[derive(Clone, Debug)]
pub struct PreparedStatement {
    inner: Arc<PreparedInner>,
    idempotent: Option<bool>,
}

impl PreparedStatement {
    pub fn new(
        query: impl Into<String>,
        id: Vec<u8>,
        definitions: ValueDefinitions,
        pk_indexes: Vec<u16>,
        result_columns: Vec<ColumnSpec>,
    ) -> Self {
        Self {
            inner: Arc::new(PreparedInner {
                query: query.into(),
                id,
                definitions,
                pk_indexes,
                result_columns,
            }),
            idempotent: None,
        }
    }

    pub fn from_result(query: impl Into<String>, result: &PreparedResult) -> Self {
        Self::new(
            query,
            result.id().to_vec(),
            ValueDefinitions::from_column_specs(result.metadata().column_specs()),
            result.metadata().pk_indexes().to_vec(),
            result.result_metadata().column_specs().to_vec(),
        )
    }

    pub fn query(&self) -> &str {
        &self.inner.query
    }

    pub fn id(&self) -> &[u8] {
        &self.inner.id
    }

    pub fn definitions(&self) -> &ValueDefinitions {
        &self.inner.definitions
    }

    /// Indexes of the partition key markers, only reported by protocol v4.
    pub fn pk_indexes(&self) -> &[u16] {
        &self.inner.pk_indexes
    }

    /// Columns of the rows this statement returns; empty if the server did not report them.
    pub fn result_columns(&self) -> &[ColumnSpec] {
        &self.inner.result_columns
    }

    /// The idempotence inherited by statements bound from this one. Fixed once the handle
    /// is built.
    pub fn idempotence(&self) -> Option<bool> {
        self.idempotent
    }

    pub fn with_idempotence(mut self, idempotent: bool) -> Self {
        self.idempotent = Some(idempotent);
        self
    }

    /// Whether this statement reads or writes `keyspace.table`.
    pub fn references_table(&self, keyspace: &str, table: &str) -> bool {
        self.columns()
            .any(|(ks, t)| ks == keyspace && t == table)
    }

    pub fn references_keyspace(&self, keyspace: &str) -> bool {
        self.columns().any(|(ks, _)| ks == keyspace)
    }

    fn columns(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner
            .definitions
            .iter()
            .map(|d| (d.keyspace.as_str(), d.table.as_str()))
            .chain(
                self.inner
                    .result_columns
                    .iter()
                    .map(|c| (c.keyspace.as_str(), c.table.as_str())),
            )
    }

    /// Same statement with the id the server handed out when re-preparing it.
    pub(crate) fn with_id(&self, id: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(PreparedInner {
                query: self.inner.query.clone(),
                id,
                definitions: self.inner.definitions.clone(),
                pk_indexes: self.inner.pk_indexes.clone(),
                result_columns: self.inner.result_columns.clone(),
            }),
            idempotent: self.idempotent,
        }
    }

    /// A statement with no value bound yet.
    pub fn bound(&self) -> BoundStatement {
        BoundStatement::new(self.clone())
    }

    /// Bind every marker by position.
    pub fn bind<V: Into<BoundValue>>(&self, values: impl IntoIterator<Item = V>) -> Result<BoundStatement, BindError> {
        let values = values.into_iter().map(Into::into).collect::<Vec<BoundValue>>();
        let expected = self.definitions().len();
        if values.len() != expected {
            return Err(BindError::CountMismatch {
                expected,
                actual: values.len(),
            });
        }
        let mut statement = self.bound();
        for (index, value) in values.into_iter().enumerate() {
            statement.set(index, value)?;
        }
        Ok(statement)
    }

    /// Bind every marker by name.
    pub fn bind_named<N, V>(&self, values: impl IntoIterator<Item = (N, V)>) -> Result<BoundStatement, BindError>
    where
        N: AsRef<str>,
        V: Into<BoundValue>,
    {
        let mut statement = self.bound();
        for (name, value) in values {
            statement.set_by_name(name.as_ref(), value)?;
        }
        statement.check_complete()?;
        Ok(statement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepared() -> PreparedStatement {
        let definitions = ValueDefinitions::new(vec![
            (Some("id"), DataType::Int),
            (Some("Name"), DataType::Text),
            (Some("id"), DataType::Int),
        ]);
        PreparedStatement::new(
            "SELECT * FROM ks.t WHERE id = :id AND \"Name\" = ? LIMIT :id",
            vec![1; 16],
            definitions,
            vec![0],
            Vec::new(),
        )
    }

    #[test]
    fn identifiers_follow_the_quoting_rules() {
        assert_eq!(normalize_identifier("Name"), "name");
        assert_eq!(normalize_identifier("\"Name\""), "Name");
        assert_eq!(normalize_identifier("\"a\"\"b\""), "a\"b");
        assert_eq!(normalize_identifier("plain"), "plain");
    }

    #[test]
    fn definitions_are_indexed_and_names_unique() {
        let prepared = prepared();
        let definitions = prepared.definitions();
        assert_eq!(definitions.len(), 3);
        assert_eq!(
            definitions.iter().map(|d| d.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(definitions.index_of("id"), Some(0));
        assert_eq!(definitions.index_of("ID"), Some(0));
        assert_eq!(definitions.get(2).unwrap().name, None);
        assert_eq!(definitions.index_of("Name"), None);
        assert_eq!(definitions.index_of("\"Name\""), Some(1));
    }

    #[test]
    fn idempotence_is_per_handle() {
        let prepared = prepared();
        let idempotent = prepared.clone().with_idempotence(true);
        assert_eq!(prepared.idempotence(), None);
        assert_eq!(idempotent.idempotence(), Some(true));
        assert_eq!(idempotent.id(), prepared.id());
    }

    #[test]
    fn new_id_keeps_the_handle_settings() {
        let idempotent = prepared().with_idempotence(true);
        let reprepared = idempotent.with_id(vec![9; 16]);
        assert_eq!(reprepared.id(), &[9; 16]);
        assert_eq!(reprepared.idempotence(), Some(true));
        assert_eq!(reprepared.query(), idempotent.query());
        assert_eq!(reprepared.definitions(), idempotent.definitions());
        assert_eq!(prepared().with_id(vec![9; 16]).idempotence(), None);
    }

    #[test]
    fn mapping_column_specs() {
        let specs = vec![
            ColumnSpec {
                keyspace: "ks".to_string(),
                table: "users".to_string(),
                name: "user_id".to_string(),
                data_type: DataType::Uuid,
            },
            ColumnSpec {
                keyspace: "ks".to_string(),
                table: "users".to_string(),
                name: "age".to_string(),
                data_type: DataType::Int,
            },
        ];
        let prepared = PreparedStatement::new(
            "UPDATE ks.users SET age = ? WHERE user_id = ?",
            vec![2; 16],
            ValueDefinitions::from_column_specs(&specs),
            Vec::new(),
            Vec::new(),
        );
        let age = prepared.definitions().get(1).unwrap();
        assert_eq!(age.name.as_deref(), Some("age"));
        assert_eq!(age.data_type, DataType::Int);
        assert!(prepared.references_table("ks", "users"));
        assert!(!prepared.references_table("ks", "orders"));
        assert!(prepared.references_keyspace("ks"));
    }
}
