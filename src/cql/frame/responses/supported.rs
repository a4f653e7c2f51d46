// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module implements the SUPPORTED frame.

use super::*;

/// The STARTUP options the server supports, as a `[string multimap]`.
#[derive(Clone, Debug, Default)]
pub struct SupportedFrame {
    pub(crate) options: HashMap<String, Vec<String>>,
}

impl SupportedFrame {
    pub fn options(&self) -> &HashMap<String, Vec<String>> {
        &self.options
    }

    pub fn get(&self, option: &str) -> Option<&[String]> {
        self.options.get(option).map(Vec::as_slice)
    }
}

impl FromPayload for SupportedFrame {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            options: read_string_multimap(start, payload)?,
        })
    }
}
