// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! REGISTER: the event names as a `[string list]`.

use super::*;
use std::fmt::Display;

/// Subscribes the connection to pushed events. Acknowledged with READY.
#[derive(Clone, Debug, PartialEq)]
pub struct RegisterFrame {
    pub(crate) event_types: Vec<RegisterEventType>,
}

impl RegisterFrame {
    pub fn new(event_types: Vec<RegisterEventType>) -> Self {
        Self { event_types }
    }

    pub fn event_types(&self) -> &[RegisterEventType] {
        &self.event_types
    }
}

impl FromPayload for RegisterFrame {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        let count = read_short(start, payload)?;
        let event_types = (0..count)
            .map(|_| RegisterEventType::from_payload(start, payload))
            .collect::<anyhow::Result<_>>()?;
        Ok(Self { event_types })
    }
}

impl ToPayload for RegisterFrame {
    fn to_payload(self, payload: &mut Vec<u8>) {
        let names = self.event_types.iter().map(|ty| ty.as_str()).collect::<Vec<_>>();
        write_string_list(&names, payload);
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegisterEventType {
    TopologyChange,
    StatusChange,
    SchemaChange,
}

const EVENT_NAMES: [(RegisterEventType, &str); 3] = [
    (RegisterEventType::TopologyChange, "TOPOLOGY_CHANGE"),
    (RegisterEventType::StatusChange, "STATUS_CHANGE"),
    (RegisterEventType::SchemaChange, "SCHEMA_CHANGE"),
];

impl RegisterEventType {
    pub fn as_str(&self) -> &'static str {
        EVENT_NAMES
            .iter()
            .find(|(ty, _)| ty == self)
            .map(|(_, name)| *name)
            .unwrap_or_default()
    }
}

impl Display for RegisterEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromPayload for RegisterEventType {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        let name = read_str(start, payload)?;
        EVENT_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(ty, _)| *ty)
            .ok_or_else(|| anyhow::anyhow!("Unknown event type: {}", name))
    }
}
