// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Wire level of the driver: CQL frames, the value codec and multiplexed connections.

pub mod connection;
pub mod frame;
pub mod types;
