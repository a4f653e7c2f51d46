// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! RESULT: `<kind><body>`, the body layout depending on the kind.

use super::*;
use crate::cql::types::DataType;

/// Result kind codes.
mod kind {
    pub const VOID: i32 = 0x0001;
    pub const ROWS: i32 = 0x0002;
    pub const SET_KEYSPACE: i32 = 0x0003;
    pub const PREPARED: i32 = 0x0004;
    pub const SCHEMA_CHANGE: i32 = 0x0005;
}

#[derive(Clone, Debug)]
pub struct ResultFrame {
    pub(crate) kind: ResultBodyKind,
}

impl ResultFrame {
    pub fn kind(&self) -> &ResultBodyKind {
        &self.kind
    }

    pub fn into_kind(self) -> ResultBodyKind {
        self.kind
    }

    pub(crate) fn decode(version: ProtocolVersion, start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        let code = read_int(start, payload)?;
        let kind = match code {
            kind::VOID => ResultBodyKind::Void,
            kind::ROWS => ResultBodyKind::Rows(RowsResult::from_payload(start, payload)?),
            kind::SET_KEYSPACE => ResultBodyKind::SetKeyspace(read_string(start, payload)?),
            kind::PREPARED => ResultBodyKind::Prepared(PreparedResult::decode(version, start, payload)?),
            kind::SCHEMA_CHANGE => ResultBodyKind::SchemaChange(SchemaChangeResult::decode(version, start, payload)?),
            _ => anyhow::bail!("Unknown result kind: {:#06x}", code),
        };
        Ok(Self { kind })
    }
}

#[derive(Clone, Debug)]
pub enum ResultBodyKind {
    Void,
    Rows(RowsResult),
    SetKeyspace(String),
    Prepared(PreparedResult),
    SchemaChange(SchemaChangeResult),
}

pub const GLOBAL_TABLES_SPEC: i32 = 0x0001;
pub const HAS_MORE_PAGES: i32 = 0x0002;
pub const NO_METADATA: i32 = 0x0004;

#[derive(Copy, Clone, Debug, Default)]
pub struct ResultFlags(pub i32);

impl ResultFlags {
    pub fn global_tables_spec(&self) -> bool {
        self.0 & GLOBAL_TABLES_SPEC != 0
    }

    pub fn has_more_pages(&self) -> bool {
        self.0 & HAS_MORE_PAGES != 0
    }

    pub fn no_metadata(&self) -> bool {
        self.0 & NO_METADATA != 0
    }
}

/// Keyspace, table, name and type of a bound variable or result column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnSpec {
    pub keyspace: String,
    pub table: String,
    pub name: String,
    pub data_type: DataType,
}

fn read_column_specs(
    start: &mut usize,
    payload: &[u8],
    flags: ResultFlags,
    columns_count: i32,
) -> anyhow::Result<Vec<ColumnSpec>> {
    anyhow::ensure!(columns_count >= 0, "Negative column count {}", columns_count);
    let global = if flags.global_tables_spec() {
        Some((read_string(start, payload)?, read_string(start, payload)?))
    } else {
        None
    };
    let mut column_specs = Vec::with_capacity(columns_count as usize);
    for _ in 0..columns_count {
        let (keyspace, table) = match &global {
            Some((keyspace, table)) => (keyspace.clone(), table.clone()),
            None => (read_string(start, payload)?, read_string(start, payload)?),
        };
        let name = read_string(start, payload)?;
        let data_type = DataType::from_payload(start, payload)?;
        column_specs.push(ColumnSpec {
            keyspace,
            table,
            name,
            data_type,
        });
    }
    Ok(column_specs)
}

/// The `<metadata>` of a rows result or the result metadata of a prepared statement.
#[derive(Clone, Debug, Default)]
pub struct RowsResultMetadata {
    flags: ResultFlags,
    columns_count: i32,
    paging_state: Option<Vec<u8>>,
    column_specs: Vec<ColumnSpec>,
}

impl RowsResultMetadata {
    pub fn flags(&self) -> ResultFlags {
        self.flags
    }

    pub fn columns_count(&self) -> i32 {
        self.columns_count
    }

    pub fn paging_state(&self) -> Option<&[u8]> {
        self.paging_state.as_deref()
    }

    /// Empty when the server was asked to skip the metadata.
    pub fn column_specs(&self) -> &[ColumnSpec] {
        &self.column_specs
    }
}

impl FromPayload for RowsResultMetadata {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        let flags = ResultFlags(read_int(start, payload)?);
        let columns_count = read_int(start, payload)?;
        let paging_state = if flags.has_more_pages() {
            read_nullable_bytes(start, payload)?.map(ToOwned::to_owned)
        } else {
            None
        };
        let column_specs = if flags.no_metadata() {
            Vec::new()
        } else {
            read_column_specs(start, payload, flags, columns_count)?
        };
        Ok(Self {
            flags,
            columns_count,
            paging_state,
            column_specs,
        })
    }
}

/// Rows are kept as the undecoded cells that followed the metadata.
#[derive(Clone)]
pub struct RowsResult {
    metadata: RowsResultMetadata,
    rows_count: i32,
    content: Vec<u8>,
}

impl std::fmt::Debug for RowsResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RowsResult {{ columns: {:?}, rows: {}, bytes: {} }}",
            self.metadata.column_specs(),
            self.rows_count,
            self.content.len()
        )
    }
}

impl RowsResult {
    pub fn metadata(&self) -> &RowsResultMetadata {
        &self.metadata
    }

    pub fn rows_count(&self) -> i32 {
        self.rows_count
    }

    /// Split the row content into per-column cells; `None` is a null cell.
    pub fn raw_rows(&self) -> anyhow::Result<Vec<Vec<Option<&[u8]>>>> {
        let columns = self.metadata.columns_count.max(0) as usize;
        let mut offset = 0;
        (0..self.rows_count.max(0))
            .map(|_| {
                (0..columns)
                    .map(|_| read_nullable_bytes(&mut offset, &self.content))
                    .collect::<anyhow::Result<Vec<_>>>()
            })
            .collect()
    }
}

impl FromPayload for RowsResult {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        let metadata = RowsResultMetadata::from_payload(start, payload)?;
        let rows_count = read_int(start, payload)?;
        anyhow::ensure!(rows_count >= 0, "Negative row count {}", rows_count);
        let content = payload.get(*start..).unwrap_or_default().to_vec();
        *start = payload.len();
        Ok(Self {
            metadata,
            rows_count,
            content,
        })
    }
}

/// The bound variables metadata of a PREPARED result.
#[derive(Clone, Debug, Default)]
pub struct PreparedResultMetadata {
    flags: ResultFlags,
    pk_indexes: Vec<u16>,
    column_specs: Vec<ColumnSpec>,
}

impl PreparedResultMetadata {
    pub fn pk_indexes(&self) -> &[u16] {
        &self.pk_indexes
    }

    pub fn column_specs(&self) -> &[ColumnSpec] {
        &self.column_specs
    }

    fn decode(version: ProtocolVersion, start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        let flags = ResultFlags(read_int(start, payload)?);
        let columns_count = read_int(start, payload)?;
        let pk_indexes = if version.has_pk_indexes() {
            let pk_count = read_int(start, payload)?;
            anyhow::ensure!(pk_count >= 0, "Negative partition key count {}", pk_count);
            (0..pk_count)
                .map(|_| read_short(start, payload))
                .collect::<anyhow::Result<Vec<_>>>()?
        } else {
            Vec::new()
        };
        let column_specs = read_column_specs(start, payload, flags, columns_count)?;
        Ok(Self {
            flags,
            pk_indexes,
            column_specs,
        })
    }
}

#[derive(Clone, Debug)]
pub struct PreparedResult {
    id: Vec<u8>,
    metadata: PreparedResultMetadata,
    result_metadata: RowsResultMetadata,
}

impl PreparedResult {
    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn metadata(&self) -> &PreparedResultMetadata {
        &self.metadata
    }

    pub fn result_metadata(&self) -> &RowsResultMetadata {
        &self.result_metadata
    }

    fn decode(version: ProtocolVersion, start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        let id = read_short_bytes(start, payload)?.to_vec();
        let metadata = PreparedResultMetadata::decode(version, start, payload)?;
        let result_metadata = RowsResultMetadata::from_payload(start, payload)?;
        Ok(Self {
            id,
            metadata,
            result_metadata,
        })
    }
}

#[derive(Clone, Debug)]
pub struct SchemaChangeResult {
    pub change_type: SchemaChangeType,
    pub target: SchemaChangeTarget,
}

impl SchemaChangeResult {
    pub(crate) fn decode(version: ProtocolVersion, start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        let change_type = SchemaChangeType::from_payload(start, payload)?;
        let target = match version {
            // v2 only knows keyspaces and tables, with an empty table name for keyspace changes
            ProtocolVersion::V2 => {
                let keyspace = read_string(start, payload)?;
                let table = read_string(start, payload)?;
                if table.is_empty() {
                    SchemaChangeTarget::Keyspace(keyspace)
                } else {
                    SchemaChangeTarget::Table { keyspace, table }
                }
            }
            _ => SchemaChangeTarget::from_payload(start, payload)?,
        };
        Ok(Self { change_type, target })
    }
}
