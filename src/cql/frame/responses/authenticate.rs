// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module implements the AUTHENTICATE frame.

use super::*;

/// Indicates that the server requires authentication. The body is the full class name
/// of the server side authenticator.
#[derive(Clone, Debug)]
pub struct AuthenticateFrame {
    pub(crate) authenticator: String,
}

impl AuthenticateFrame {
    pub fn authenticator(&self) -> &str {
        &self.authenticator
    }
}

impl FromPayload for AuthenticateFrame {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            authenticator: read_string(start, payload)?,
        })
    }
}
