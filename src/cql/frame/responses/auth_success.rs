// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module implements the AUTH_SUCCESS frame.

use super::*;

/// Indicates the success of the authentication phase. Carries a final, possibly null, token.
#[derive(Clone, Debug)]
pub struct AuthSuccessFrame {
    pub(crate) token: Option<Vec<u8>>,
}

impl AuthSuccessFrame {
    pub fn token(&self) -> Option<&[u8]> {
        self.token.as_deref()
    }
}

impl FromPayload for AuthSuccessFrame {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            token: read_nullable_bytes(start, payload)?.map(ToOwned::to_owned),
        })
    }
}
