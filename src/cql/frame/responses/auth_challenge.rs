// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module implements the AUTH_CHALLENGE frame.

use super::*;

/// A server authentication challenge. The body is a single `[bytes]` token whose
/// meaning depends on the authenticator in use.
#[derive(Clone, Debug)]
pub struct AuthChallengeFrame {
    pub(crate) token: Option<Vec<u8>>,
}

impl AuthChallengeFrame {
    pub fn token(&self) -> Option<&[u8]> {
        self.token.as_deref()
    }
}

impl FromPayload for AuthChallengeFrame {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            token: read_nullable_bytes(start, payload)?.map(ToOwned::to_owned),
        })
    }
}
