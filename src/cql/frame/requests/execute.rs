// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! EXECUTE: `<id><query_parameters>`.

use super::*;

/// Runs a previously prepared statement, addressed by the short bytes id the node
/// handed out for it, with the same [`QueryParameters`] a QUERY carries.
#[derive(Clone, Debug, PartialEq, Builder)]
#[builder(derive(Clone, Debug))]
#[builder(pattern = "owned")]
pub struct ExecuteFrame {
    pub(crate) id: Vec<u8>,
    pub(crate) parameters: QueryParameters,
}

impl ExecuteFrame {
    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn parameters(&self) -> &QueryParameters {
        &self.parameters
    }
}

impl FromPayload for ExecuteFrame {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            id: read_short_bytes(start, payload)?.to_vec(),
            parameters: QueryParameters::from_payload(start, payload)?,
        })
    }
}

impl ToPayload for ExecuteFrame {
    fn to_payload(self, payload: &mut Vec<u8>) {
        write_short_bytes(&self.id, payload);
        (&self.parameters).to_payload(payload);
    }
}
