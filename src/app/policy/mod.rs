// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Pluggable decisions of the dispatcher and the pools: which hosts to try, whether to retry,
//! when to speculate and how fast to reconnect.

mod load_balancing;
mod reconnection;
mod retry;
mod speculative;

pub use load_balancing::*;
pub use reconnection::*;
pub use retry::*;
pub use speculative::*;
