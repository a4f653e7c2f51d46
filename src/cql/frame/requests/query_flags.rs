// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module defines the query flags.

/// The query flag indicating that values are provided.
pub const VALUES: u8 = 0x01;
/// The query flag indicating that there is no metadata
pub const SKIP_METADATA: u8 = 0x02;
/// The query flag indicating whether to set a page size.
pub const PAGE_SIZE: u8 = 0x04;
/// The query flag indicating the paging state is present or not.
pub const PAGING_STATE: u8 = 0x08;
/// The query flag indicating whether the serial consistency is present or not.
pub const SERIAL_CONSISTENCY: u8 = 0x10;
/// The query flag indicating whether to use the default timestamp or not.
pub const DEFAULT_TIMESTAMP: u8 = 0x20;
/// The query flag indicating whether bound values are named
pub const NAMED_VALUES: u8 = 0x40;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryFlags(pub u8);

macro_rules! flag {
    ($get:ident, $set:ident, $bit:ident) => {
        pub fn $get(&self) -> bool {
            self.0 & $bit != 0
        }

        pub fn $set(&mut self, value: bool) {
            if value {
                self.0 |= $bit;
            } else {
                self.0 &= !$bit;
            }
        }
    };
}

impl QueryFlags {
    flag!(values, set_values, VALUES);
    flag!(skip_metadata, set_skip_metadata, SKIP_METADATA);
    flag!(page_size, set_page_size, PAGE_SIZE);
    flag!(paging_state, set_paging_state, PAGING_STATE);
    flag!(serial_consistency, set_serial_consistency, SERIAL_CONSISTENCY);
    flag!(default_timestamp, set_default_timestamp, DEFAULT_TIMESTAMP);
    flag!(named_values, set_named_values, NAMED_VALUES);
}
