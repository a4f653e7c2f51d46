// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! AUTH_RESPONSE: a single `[bytes]` token.

use super::*;

/// One SASL token sent in answer to AUTHENTICATE or AUTH_CHALLENGE.
/// The exchange ends when the node sends AUTH_SUCCESS.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthResponseFrame {
    pub(crate) auth_token: Vec<u8>,
}

impl AuthResponseFrame {
    pub fn new(auth_token: Vec<u8>) -> Self {
        Self { auth_token }
    }

    pub fn auth_token(&self) -> &[u8] {
        &self.auth_token
    }
}

impl FromPayload for AuthResponseFrame {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            auth_token: read_bytes(start, payload)?.to_vec(),
        })
    }
}

impl ToPayload for AuthResponseFrame {
    fn to_payload(self, payload: &mut Vec<u8>) {
        write_bytes(&self.auth_token, payload);
    }
}
