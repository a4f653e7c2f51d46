// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! PREPARE: `<query>` as a long string.

use super::*;

/// Asks a node to parse a statement once so it can later be run by id.
/// The node answers with a `Prepared` result.
#[derive(Clone, Debug, PartialEq)]
pub struct PrepareFrame {
    pub(crate) statement: String,
}

impl PrepareFrame {
    pub fn new(statement: String) -> Self {
        Self { statement }
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }
}

impl FromPayload for PrepareFrame {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            statement: read_long_string(start, payload)?,
        })
    }
}

impl ToPayload for PrepareFrame {
    fn to_payload(self, payload: &mut Vec<u8>) {
        write_long_string(&self.statement, payload);
    }
}
