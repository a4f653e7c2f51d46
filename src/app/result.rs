// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use super::{
    dispatcher::RequestError,
    statement::normalize_identifier,
};
use crate::cql::{
    frame::{
        ColumnSpec,
        ProtocolVersion,
        RowsResult,
        SchemaChangeResult,
    },
    types::{
        CodecRegistry,
        CqlValue,
    },
};
use std::sync::Arc;

/// The outcome of a successful execution.
#[derive(Clone, Debug)]
pub enum QueryResult {
    Void,
    Rows(Rows),
    SetKeyspace(String),
    SchemaChange(SchemaChangeResult),
}

impl QueryResult {
    pub fn rows(&self) -> Option<&Rows> {
        match self {
            QueryResult::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn into_rows(self) -> Option<Rows> {
        match self {
            QueryResult::Rows(rows) => Some(rows),
            _ => None,
        }
    }
}

/// Decoded rows of one page.
#[derive(Clone, Debug)]
pub struct Rows {
    columns: Arc<Vec<ColumnSpec>>,
    rows: Vec<Row>,
    paging_state: Option<Vec<u8>>,
}

impl Rows {
    /// Decode a rows result. `fallback` describes the columns when the server skipped the
    /// metadata, as it may for prepared statements.
    pub fn decode(
        result: &RowsResult,
        fallback: &[ColumnSpec],
        registry: &CodecRegistry,
        version: ProtocolVersion,
    ) -> Result<Self, RequestError> {
        let metadata = result.metadata();
        let columns = if metadata.column_specs().is_empty() {
            fallback
        } else {
            metadata.column_specs()
        };
        let columns = Arc::new(columns.to_vec());
        let raw = result
            .raw_rows()
            .map_err(|e| RequestError::UnexpectedResponse(e.to_string()))?;
        let mut rows = Vec::with_capacity(raw.len());
        for cells in raw {
            if cells.len() != columns.len() {
                return Err(RequestError::UnexpectedResponse(format!(
                    "Row has {} cells for {} columns",
                    cells.len(),
                    columns.len()
                )));
            }
            let values = cells
                .into_iter()
                .zip(columns.iter())
                .map(|(cell, column)| match cell {
                    Some(bytes) => registry.decode_cell(bytes, &column.data_type, version),
                    None => Ok(None),
                })
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(Row {
                columns: columns.clone(),
                values,
            });
        }
        Ok(Self {
            columns,
            rows,
            paging_state: metadata.paging_state().map(ToOwned::to_owned),
        })
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// Pass to the statement of the next page; `None` on the last page.
    pub fn paging_state(&self) -> Option<&[u8]> {
        self.paging_state.as_deref()
    }

    pub fn has_more_pages(&self) -> bool {
        self.paging_state.is_some()
    }
}

impl IntoIterator for Rows {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// One row. `None` cells are nulls.
#[derive(Clone, Debug)]
pub struct Row {
    columns: Arc<Vec<ColumnSpec>>,
    values: Vec<Option<CqlValue>>,
}

impl Row {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CqlValue> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Look a column up by name, with the same quoting rules as bind markers.
    pub fn get_by_name(&self, name: &str) -> Option<&CqlValue> {
        let name = normalize_identifier(name);
        let index = self.columns.iter().position(|c| c.name == name.as_ref())?;
        self.get(index)
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn into_values(self) -> Vec<Option<CqlValue>> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cql::{
        frame::{
            write_bytes,
            write_int,
            write_short,
            write_string,
            FromPayload,
            GLOBAL_TABLES_SPEC,
        },
        types::DataType,
    };

    fn rows_result() -> RowsResult {
        let mut payload = Vec::new();
        write_int(GLOBAL_TABLES_SPEC, &mut payload);
        write_int(2, &mut payload);
        write_string("ks", &mut payload);
        write_string("t", &mut payload);
        write_string("id", &mut payload);
        write_short(0x09, &mut payload);
        write_string("Name", &mut payload);
        write_short(0x0D, &mut payload);
        write_int(2, &mut payload);
        write_bytes(&7i32.to_be_bytes(), &mut payload);
        write_bytes(b"seven", &mut payload);
        write_bytes(&8i32.to_be_bytes(), &mut payload);
        write_int(-1, &mut payload);
        RowsResult::from_payload(&mut 0, &payload).unwrap()
    }

    #[test]
    fn rows_decode_with_their_metadata() {
        let rows = Rows::decode(&rows_result(), &[], &CodecRegistry::default(), ProtocolVersion::V4).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(!rows.has_more_pages());
        let first = rows.first().unwrap();
        assert_eq!(first.get(0), Some(&CqlValue::Int(7)));
        assert_eq!(first.get_by_name("ID"), Some(&CqlValue::Int(7)));
        assert_eq!(first.get_by_name("\"Name\""), Some(&CqlValue::Text("seven".to_string())));
        assert_eq!(first.get_by_name("Name"), None);
        let second = rows.iter().nth(1).unwrap();
        assert_eq!(second.get(1), None);
        assert_eq!(rows.columns()[1].data_type, DataType::Text);
    }
}
