// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Prepared statements known to this process, keyed by query text.
//!
//! Preparing goes through [`Session::prepare`](crate::app::session::Session::prepare), which
//! consults this registry first. Entries live until a schema change invalidates them.

use super::statement::PreparedStatement;
use crate::cql::frame::{
    SchemaChangeTarget,
    SchemaChangeType,
};
use log::*;
use std::{
    collections::HashMap,
    sync::{
        RwLock,
        RwLockReadGuard,
        RwLockWriteGuard,
    },
};

#[derive(Debug, Default)]
struct Entries {
    by_query: HashMap<String, PreparedStatement>,
    by_id: HashMap<Vec<u8>, String>,
}

#[derive(Debug, Default)]
pub struct PreparedStatementRegistry {
    entries: RwLock<Entries>,
}

impl PreparedStatementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, query: &str) -> Option<PreparedStatement> {
        self.read().by_query.get(query).cloned()
    }

    pub fn by_id(&self, id: &[u8]) -> Option<PreparedStatement> {
        let entries = self.read();
        entries.by_id.get(id).and_then(|query| entries.by_query.get(query)).cloned()
    }

    /// Cache a statement. A statement already cached for the same query text wins, unless the
    /// server handed out a new id for it.
    pub fn insert(&self, statement: PreparedStatement) -> PreparedStatement {
        let mut entries = self.write();
        if let Some(existing) = entries.by_query.get(statement.query()) {
            if existing.id() == statement.id() {
                return existing.clone();
            }
            let stale = existing.id().to_vec();
            entries.by_id.remove(&stale);
        }
        entries
            .by_id
            .insert(statement.id().to_vec(), statement.query().to_string());
        entries
            .by_query
            .insert(statement.query().to_string(), statement.clone());
        statement
    }

    pub fn remove(&self, query: &str) -> Option<PreparedStatement> {
        let mut entries = self.write();
        let removed = entries.by_query.remove(query)?;
        entries.by_id.remove(removed.id());
        Some(removed)
    }

    fn retain(&self, keep: impl Fn(&PreparedStatement) -> bool) -> usize {
        let mut entries = self.write();
        let before = entries.by_query.len();
        entries.by_query.retain(|_, statement| keep(statement));
        let Entries { by_query, by_id } = &mut *entries;
        by_id.retain(|_, query| by_query.contains_key(query));
        before - by_query.len()
    }

    /// Drop every statement touching `keyspace.table`. Returns how many were dropped.
    pub fn invalidate_table(&self, keyspace: &str, table: &str) -> usize {
        self.retain(|statement| !statement.references_table(keyspace, table))
    }

    pub fn invalidate_keyspace(&self, keyspace: &str) -> usize {
        self.retain(|statement| !statement.references_keyspace(keyspace))
    }

    /// Apply a schema change notification.
    pub fn on_schema_change(&self, change_type: SchemaChangeType, target: &SchemaChangeTarget) -> usize {
        let invalidated = match (change_type, target) {
            (SchemaChangeType::Created, _) => 0,
            (_, SchemaChangeTarget::Table { keyspace, table }) => self.invalidate_table(keyspace, table),
            (SchemaChangeType::Dropped, SchemaChangeTarget::Keyspace(keyspace)) => self.invalidate_keyspace(keyspace),
            // Columns of an altered user type may be bound by any statement of the keyspace
            (_, SchemaChangeTarget::Type { keyspace, .. }) => self.invalidate_keyspace(keyspace),
            _ => 0,
        };
        if invalidated > 0 {
            info!(
                "Invalidated {} prepared statement(s) after {:?} {:?}",
                invalidated, change_type, target
            );
        }
        invalidated
    }

    pub fn len(&self) -> usize {
        self.read().by_query.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut entries = self.write();
        entries.by_query.clear();
        entries.by_id.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        app::statement::ValueDefinitions,
        cql::{
            frame::ColumnSpec,
            types::DataType,
        },
    };

    fn statement(query: &str, id: u8, keyspace: &str, table: &str) -> PreparedStatement {
        let spec = ColumnSpec {
            keyspace: keyspace.to_string(),
            table: table.to_string(),
            name: "k".to_string(),
            data_type: DataType::Int,
        };
        PreparedStatement::new(
            query,
            vec![id; 16],
            ValueDefinitions::from_column_specs(&[spec]),
            Vec::new(),
            Vec::new(),
        )
    }

    #[test]
    fn cached_by_query_and_id() {
        let registry = PreparedStatementRegistry::new();
        let first = registry.insert(statement("SELECT * FROM ks.a WHERE k = ?", 1, "ks", "a"));
        assert_eq!(first.id(), &[1; 16]);
        assert_eq!(registry.get("SELECT * FROM ks.a WHERE k = ?").unwrap().id(), &[1; 16]);
        assert_eq!(registry.by_id(&[1; 16]).unwrap().query(), "SELECT * FROM ks.a WHERE k = ?");
        assert!(registry.get("SELECT * FROM ks.b WHERE k = ?").is_none());

        // Re-prepared under a new id
        registry.insert(statement("SELECT * FROM ks.a WHERE k = ?", 2, "ks", "a"));
        assert_eq!(registry.len(), 1);
        assert!(registry.by_id(&[1; 16]).is_none());
        assert!(registry.by_id(&[2; 16]).is_some());
    }

    #[test]
    fn schema_changes_invalidate_the_affected_entries() {
        let registry = PreparedStatementRegistry::new();
        registry.insert(statement("SELECT * FROM ks.a WHERE k = ?", 1, "ks", "a"));
        registry.insert(statement("SELECT * FROM ks.b WHERE k = ?", 2, "ks", "b"));
        registry.insert(statement("SELECT * FROM other.a WHERE k = ?", 3, "other", "a"));

        let table = SchemaChangeTarget::Table {
            keyspace: "ks".to_string(),
            table: "a".to_string(),
        };
        assert_eq!(registry.on_schema_change(SchemaChangeType::Created, &table), 0);
        assert_eq!(registry.on_schema_change(SchemaChangeType::Updated, &table), 1);
        assert!(registry.get("SELECT * FROM ks.a WHERE k = ?").is_none());
        assert!(registry.by_id(&[1; 16]).is_none());

        let keyspace = SchemaChangeTarget::Keyspace("ks".to_string());
        assert_eq!(registry.on_schema_change(SchemaChangeType::Updated, &keyspace), 0);
        assert_eq!(registry.on_schema_change(SchemaChangeType::Dropped, &keyspace), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("SELECT * FROM other.a WHERE k = ?").is_some());
    }
}
