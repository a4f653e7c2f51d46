// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Everything above a single connection.

pub mod config;
pub mod dispatcher;
pub mod host;
pub mod policy;
pub mod pool;
pub mod registry;
pub mod result;
pub mod session;
pub mod statement;
