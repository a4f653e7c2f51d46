// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! QUERY: `<query><query_parameters>`.

use super::*;

/// An unprepared statement sent as text along with its parameters.
///
/// Schema statements and `USE` accept a consistency but do not act on it.
#[derive(Clone, Debug, PartialEq, Builder)]
#[builder(derive(Clone, Debug))]
#[builder(pattern = "owned")]
pub struct QueryFrame {
    pub(crate) statement: String,
    pub(crate) parameters: QueryParameters,
}

impl QueryFrame {
    /// The CQL text.
    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn parameters(&self) -> &QueryParameters {
        &self.parameters
    }
}

impl FromPayload for QueryFrame {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            statement: read_long_string(start, payload)?,
            parameters: QueryParameters::from_payload(start, payload)?,
        })
    }
}

impl ToPayload for QueryFrame {
    fn to_payload(self, payload: &mut Vec<u8>) {
        payload.reserve(self.statement.len() + 16);
        write_long_string(&self.statement, payload);
        (&self.parameters).to_payload(payload);
    }
}
