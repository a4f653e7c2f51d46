// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Frame opcodes.

pub const ERROR: u8 = 0x00;
pub const STARTUP: u8 = 0x01;
pub const READY: u8 = 0x02;
pub const AUTHENTICATE: u8 = 0x03;
pub const OPTIONS: u8 = 0x05;
pub const SUPPORTED: u8 = 0x06;
pub const QUERY: u8 = 0x07;
pub const RESULT: u8 = 0x08;
pub const PREPARE: u8 = 0x09;
pub const EXECUTE: u8 = 0x0A;
pub const REGISTER: u8 = 0x0B;
pub const EVENT: u8 = 0x0C;
pub const BATCH: u8 = 0x0D;
pub const AUTH_CHALLENGE: u8 = 0x0E;
pub const AUTH_RESPONSE: u8 = 0x0F;
pub const AUTH_SUCCESS: u8 = 0x10;

/// The protocol name of an opcode, for diagnostics.
pub fn name(opcode: u8) -> &'static str {
    match opcode {
        ERROR => "ERROR",
        STARTUP => "STARTUP",
        READY => "READY",
        AUTHENTICATE => "AUTHENTICATE",
        OPTIONS => "OPTIONS",
        SUPPORTED => "SUPPORTED",
        QUERY => "QUERY",
        RESULT => "RESULT",
        PREPARE => "PREPARE",
        EXECUTE => "EXECUTE",
        REGISTER => "REGISTER",
        EVENT => "EVENT",
        BATCH => "BATCH",
        AUTH_CHALLENGE => "AUTH_CHALLENGE",
        AUTH_RESPONSE => "AUTH_RESPONSE",
        AUTH_SUCCESS => "AUTH_SUCCESS",
        _ => "UNKNOWN",
    }
}
