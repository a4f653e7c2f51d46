// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Consistency levels, sent as a `[short]`.

use anyhow::anyhow;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    convert::TryFrom,
    fmt::Display,
};

/// How many replicas must acknowledge a read or write. In configuration files the levels are
/// spelled the way CQL spells them, e.g. `"LOCAL_QUORUM"`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, FromPrimitive, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u16)]
pub enum Consistency {
    Any = 0x0,
    One = 0x1,
    Two = 0x2,
    Three = 0x3,
    Quorum = 0x4,
    All = 0x5,
    LocalQuorum = 0x6,
    EachQuorum = 0x7,
    /// Only valid as the serial consistency of a conditional update.
    Serial = 0x8,
    LocalSerial = 0x9,
    LocalOne = 0xA,
}

impl Default for Consistency {
    fn default() -> Self {
        Consistency::LocalOne
    }
}

impl Consistency {
    pub fn is_serial(&self) -> bool {
        matches!(self, Consistency::Serial | Consistency::LocalSerial)
    }

    /// Whether the level is satisfied within the coordinator's datacenter.
    pub fn is_dc_local(&self) -> bool {
        matches!(
            self,
            Consistency::LocalOne | Consistency::LocalQuorum | Consistency::LocalSerial
        )
    }

    pub fn as_str(&self) -> &'static str {
        use Consistency::*;
        match self {
            Any => "ANY",
            One => "ONE",
            Two => "TWO",
            Three => "THREE",
            Quorum => "QUORUM",
            All => "ALL",
            LocalQuorum => "LOCAL_QUORUM",
            EachQuorum => "EACH_QUORUM",
            Serial => "SERIAL",
            LocalSerial => "LOCAL_SERIAL",
            LocalOne => "LOCAL_ONE",
        }
    }
}

impl TryFrom<u16> for Consistency {
    type Error = anyhow::Error;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Consistency::from_u16(code).ok_or_else(|| anyhow!("Unknown consistency code {:#06x}", code))
    }
}

impl Display for Consistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
