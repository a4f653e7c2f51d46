// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module implements the Startup frame.

use super::*;
use std::collections::HashMap;

/// The CQL version announced when the server does not list one.
pub const DEFAULT_CQL_VERSION: &str = "3.0.0";

/// The Startup frame.
#[derive(Clone, Debug, PartialEq, Builder)]
#[builder(derive(Clone, Debug))]
#[builder(pattern = "owned")]
pub struct StartupFrame {
    pub(crate) options: HashMap<String, String>,
}

impl FromPayload for StartupFrame {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            options: read_string_map(start, payload)?,
        })
    }
}

impl ToPayload for StartupFrame {
    fn to_payload(self, payload: &mut Vec<u8>) {
        write_string_map(&self.options, payload);
    }
}

impl StartupFrame {
    pub fn new(options: HashMap<String, String>) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &HashMap<String, String> {
        &self.options
    }
}

impl StartupFrameBuilder {
    pub fn with_option(mut self, key: String, value: String) -> Self {
        self.options.get_or_insert_with(HashMap::new).insert(key, value);
        self
    }
}
