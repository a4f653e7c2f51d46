// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Declared types, runtime values and the codec that maps between them and bytes.

pub mod codec;
pub mod composite;
mod data_type;
pub mod marshal;
mod value;

pub use codec::{
    CodecContext,
    CodecError,
    CodecRegistry,
    PassThroughCodec,
    TypeCodec,
};
pub use composite::{
    decode_components,
    split_composite,
    split_dynamic_composite,
    Component,
    ComponentType,
    CompositeCodec,
    DynamicCompositeCodec,
};
pub use data_type::*;
pub use marshal::MarshalType;
pub use value::{
    CqlValue,
    Decimal,
    ValueKind,
};
