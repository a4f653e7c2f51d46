// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! EVENT: `<event_type><details>`, pushed on stream -1.

use super::*;
use std::str::FromStr;

/// Defines an enum whose variants travel as fixed `[string]` keywords.
macro_rules! keywords {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $keyword:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $keyword),+
                }
            }
        }

        impl FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($keyword => Ok(Self::$variant),)+
                    other => Err(anyhow::anyhow!("Invalid {}: {}", stringify!($name), other)),
                }
            }
        }

        impl FromPayload for $name {
            fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
                read_str(start, payload)?.parse()
            }
        }
    };
}

keywords!(
    /// A node joined or left the ring.
    TopologyChangeType {
        NewNode => "NEW_NODE",
        RemovedNode => "REMOVED_NODE",
    }
);

keywords!(
    /// A node was seen up or down by the coordinator.
    StatusChangeType {
        Up => "UP",
        Down => "DOWN",
    }
);

keywords!(SchemaChangeType {
    Created => "CREATED",
    Updated => "UPDATED",
    Dropped => "DROPPED",
});

/// A server push. Only the kinds registered for with a [`RegisterFrame`] arrive.
#[derive(Clone, Debug)]
pub struct EventFrame {
    pub event_type: EventType,
}

impl EventFrame {
    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    pub(crate) fn decode(version: ProtocolVersion, start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        let kind = read_str(start, payload)?;
        let event_type = match kind {
            "SCHEMA_CHANGE" => {
                let change = SchemaChangeResult::decode(version, start, payload)?;
                EventType::SchemaChange {
                    change_type: change.change_type,
                    target: change.target,
                }
            }
            "STATUS_CHANGE" => {
                let change_type = StatusChangeType::from_payload(start, payload)?;
                EventType::StatusChange {
                    change_type,
                    address: read_inet(start, payload)?,
                }
            }
            "TOPOLOGY_CHANGE" => {
                let change_type = TopologyChangeType::from_payload(start, payload)?;
                EventType::TopologyChange {
                    change_type,
                    address: read_inet(start, payload)?,
                }
            }
            other => anyhow::bail!("Unknown event kind: {}", other),
        };
        Ok(Self { event_type })
    }
}

#[derive(Clone, Debug)]
pub enum EventType {
    TopologyChange {
        change_type: TopologyChangeType,
        address: SocketAddr,
    },
    StatusChange {
        change_type: StatusChangeType,
        address: SocketAddr,
    },
    SchemaChange {
        change_type: SchemaChangeType,
        target: SchemaChangeTarget,
    },
}

/// The schema element a change applies to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchemaChangeTarget {
    Keyspace(String),
    Table { keyspace: String, table: String },
    Type { keyspace: String, name: String },
    Function { keyspace: String, name: String, args: Vec<String> },
    Aggregate { keyspace: String, name: String, args: Vec<String> },
}

impl SchemaChangeTarget {
    pub fn keyspace(&self) -> &str {
        match self {
            Self::Keyspace(keyspace)
            | Self::Table { keyspace, .. }
            | Self::Type { keyspace, .. }
            | Self::Function { keyspace, .. }
            | Self::Aggregate { keyspace, .. } => keyspace,
        }
    }
}

impl FromPayload for SchemaChangeTarget {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        let target = read_string(start, payload)?;
        let keyspace = read_string(start, payload)?;
        Ok(match target.as_str() {
            "KEYSPACE" => Self::Keyspace(keyspace),
            "TABLE" => Self::Table {
                keyspace,
                table: read_string(start, payload)?,
            },
            "TYPE" => Self::Type {
                keyspace,
                name: read_string(start, payload)?,
            },
            "FUNCTION" | "AGGREGATE" => {
                let name = read_string(start, payload)?;
                let args = read_string_list(start, payload)?;
                if target == "FUNCTION" {
                    Self::Function { keyspace, name, args }
                } else {
                    Self::Aggregate { keyspace, name, args }
                }
            }
            other => anyhow::bail!("Unknown schema change target {}", other),
        })
    }
}
