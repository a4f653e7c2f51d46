// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Frames sent by the client. Each body type knows its own layout, the
//! [`RequestFrame`] adds the header and fills in the body length.

pub mod auth_response;
pub mod execute;
pub mod options;
pub mod prepare;
pub mod query;
pub mod query_flags;
pub mod register;
pub mod startup;

use super::*;
use derive_builder::Builder;
use derive_more::From;
use std::convert::TryFrom;

#[derive(Clone, Debug, PartialEq, From)]
pub enum RequestBody {
    Startup(StartupFrame),
    Options(OptionsFrame),
    Query(QueryFrame),
    Prepare(PrepareFrame),
    Execute(ExecuteFrame),
    Register(RegisterFrame),
    AuthResponse(AuthResponseFrame),
}

impl RequestBody {
    pub fn opcode(&self) -> u8 {
        use opcode::*;
        match self {
            Self::Startup(_) => STARTUP,
            Self::Options(_) => OPTIONS,
            Self::Query(_) => QUERY,
            Self::Prepare(_) => PREPARE,
            Self::Execute(_) => EXECUTE,
            Self::Register(_) => REGISTER,
            Self::AuthResponse(_) => AUTH_RESPONSE,
        }
    }

    fn decode(opcode: u8, start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        fn body<B: FromPayload + Into<RequestBody>>(start: &mut usize, payload: &[u8]) -> anyhow::Result<RequestBody> {
            B::from_payload(start, payload)
                .map(Into::into)
                .map_err(|e| FrameError::InvalidBody(e).into())
        }
        match opcode {
            opcode::STARTUP => body::<StartupFrame>(start, payload),
            opcode::OPTIONS => Ok(OptionsFrame.into()),
            opcode::QUERY => body::<QueryFrame>(start, payload),
            opcode::PREPARE => body::<PrepareFrame>(start, payload),
            opcode::EXECUTE => body::<ExecuteFrame>(start, payload),
            opcode::REGISTER => body::<RegisterFrame>(start, payload),
            opcode::AUTH_RESPONSE => body::<AuthResponseFrame>(start, payload),
            other => anyhow::bail!("Unknown request opcode: {:#04x}", other),
        }
    }
}

impl ToPayload for RequestBody {
    fn to_payload(self, buf: &mut Vec<u8>) {
        match self {
            Self::Options(_) => (),
            Self::Startup(startup) => startup.to_payload(buf),
            Self::Query(query) => query.to_payload(buf),
            Self::Prepare(prepare) => prepare.to_payload(buf),
            Self::Execute(execute) => execute.to_payload(buf),
            Self::Register(register) => register.to_payload(buf),
            Self::AuthResponse(token) => token.to_payload(buf),
        }
    }
}

/// A request frame: a header and one of the request bodies.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestFrame {
    pub(crate) header: Header,
    pub(crate) body: RequestBody,
}

impl RequestFrame {
    pub fn new<T: Into<RequestBody>>(version: ProtocolVersion, body: T) -> Self {
        let body = body.into();
        let header = Header::new(version, body.opcode());
        Self { header, body }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn stream(&self) -> i16 {
        self.header.stream()
    }

    pub fn set_stream(&mut self, stream: i16) {
        self.header.set_stream(stream);
    }

    pub fn opcode(&self) -> u8 {
        self.body.opcode()
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn into_body(self) -> RequestBody {
        self.body
    }

    /// Encode the frame, including its header, into a new buffer.
    pub fn encode(self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.to_payload(&mut buf);
        buf
    }

    /// Decode a complete request frame.
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        Self::from_payload(&mut 0, payload).map_err(FrameError::InvalidFrame)
    }
}

impl FromPayload for RequestFrame {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        let header = Header::from_payload(start, payload)?;
        let body = RequestBody::decode(header.opcode(), start, payload)?;
        Ok(Self { header, body })
    }
}

impl ToPayload for RequestFrame {
    fn to_payload(mut self, buf: &mut Vec<u8>) {
        // Reserve room for the header, then patch it once the body length is known
        let header_at = buf.len();
        let header_len = self.header.len();
        buf.resize(header_at + header_len, 0);
        self.body.to_payload(buf);
        self.header.set_body_len((buf.len() - header_at - header_len) as u32);
        let mut header = Vec::with_capacity(header_len);
        self.header.to_payload(&mut header);
        buf[header_at..header_at + header_len].copy_from_slice(&header);
    }
}

/// A single `[value]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Set(Vec<u8>),
    Null,
    Unset,
}

impl FromPayload for Value {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        let length = read_int(start, payload)?;
        match length {
            -1 => Ok(Value::Null),
            -2 => Ok(Value::Unset),
            l if l < 0 => anyhow::bail!("Invalid value length {}", l),
            l => {
                anyhow::ensure!(payload.len() >= *start + l as usize, "Not enough bytes for value");
                let res = Value::Set(payload[*start..][..l as usize].to_vec());
                *start += l as usize;
                Ok(res)
            }
        }
    }
}

impl ToPayload for &Value {
    fn to_payload(self, payload: &mut Vec<u8>) {
        match self {
            Value::Set(value) => write_bytes(value, payload),
            Value::Null => write_int(-1, payload),
            Value::Unset => write_int(-2, payload),
        }
    }
}

/// The bound values of a QUERY or EXECUTE, either all positional or all named.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Values {
    values: Vec<(Option<String>, Value)>,
}

impl Values {
    pub fn push(&mut self, name: Option<&str>, value: Value) {
        self.values.push((name.map(ToOwned::to_owned), value));
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether the values are sent with their names.
    pub fn named(&self) -> bool {
        !self.values.is_empty() && self.values.iter().all(|(name, _)| name.is_some())
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Option<&str>, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_deref(), v))
    }

    fn write(&self, payload: &mut Vec<u8>) {
        let named = self.named();
        write_short(self.values.len() as u16, payload);
        for (name, value) in self.values.iter() {
            if let (true, Some(name)) = (named, name) {
                write_string(name, payload);
            }
            value.to_payload(payload);
        }
    }

    fn read(start: &mut usize, payload: &[u8], named: bool) -> anyhow::Result<Self> {
        let n = read_short(start, payload)? as usize;
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            let name = if named { Some(read_string(start, payload)?) } else { None };
            values.push((name, Value::from_payload(start, payload)?));
        }
        Ok(Self { values })
    }
}

/// The `<query_parameters>` shared by QUERY and EXECUTE.
///
/// `<consistency><flags>[<n>[name_1]<value_1>...[name_n]<value_n>][<result_page_size>][<paging_state>][<serial_consistency>][<timestamp>]`
///
/// The flags byte is derived from which parameters are present.
#[derive(Clone, Debug, PartialEq, Builder)]
#[builder(derive(Clone, Debug))]
#[builder(pattern = "owned", setter(strip_option))]
pub struct QueryParameters {
    /// The consistency level
    pub(crate) consistency: Consistency,
    #[builder(default)]
    /// The bound values
    pub(crate) values: Values,
    #[builder(default)]
    /// Ask the server not to resend the result metadata
    pub(crate) skip_metadata: bool,
    #[builder(default)]
    /// The page size
    pub(crate) page_size: Option<i32>,
    #[builder(default)]
    /// The paging state
    pub(crate) paging_state: Option<Vec<u8>>,
    #[builder(default)]
    /// The serial consistency level
    pub(crate) serial_consistency: Option<Consistency>,
    #[builder(default)]
    /// The timestamp
    pub(crate) timestamp: Option<i64>,
}

impl QueryParameters {
    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    pub fn set_consistency(&mut self, consistency: Consistency) {
        self.consistency = consistency;
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn page_size(&self) -> Option<i32> {
        self.page_size
    }

    pub fn paging_state(&self) -> Option<&[u8]> {
        self.paging_state.as_deref()
    }

    pub fn serial_consistency(&self) -> Option<Consistency> {
        self.serial_consistency
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    /// Compute the flags byte for these parameters.
    pub fn flags(&self) -> QueryFlags {
        let mut flags = QueryFlags::default();
        flags.set_values(!self.values.is_empty());
        flags.set_named_values(self.values.named());
        flags.set_skip_metadata(self.skip_metadata);
        flags.set_page_size(self.page_size.is_some());
        flags.set_paging_state(self.paging_state.is_some());
        flags.set_serial_consistency(self.serial_consistency.is_some());
        flags.set_default_timestamp(self.timestamp.is_some());
        flags
    }
}

impl FromPayload for QueryParameters {
    fn from_payload(start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        let consistency = Consistency::try_from(read_short(start, payload)?)?;
        let flags = QueryFlags(read_byte(start, payload)?);
        let values = if flags.values() {
            Values::read(start, payload, flags.named_values())?
        } else {
            Values::default()
        };
        let page_size = if flags.page_size() {
            Some(read_int(start, payload)?)
        } else {
            None
        };
        let paging_state = if flags.paging_state() {
            Some(read_bytes(start, payload)?.to_vec())
        } else {
            None
        };
        let serial_consistency = if flags.serial_consistency() {
            Some(Consistency::try_from(read_short(start, payload)?)?)
        } else {
            None
        };
        let timestamp = if flags.default_timestamp() {
            Some(read_long(start, payload)?)
        } else {
            None
        };
        Ok(Self {
            consistency,
            values,
            skip_metadata: flags.skip_metadata(),
            page_size,
            paging_state,
            serial_consistency,
            timestamp,
        })
    }
}

impl ToPayload for &QueryParameters {
    fn to_payload(self, payload: &mut Vec<u8>) {
        let flags = self.flags();
        write_short(self.consistency as u16, payload);
        write_byte(flags.0, payload);
        if flags.values() {
            self.values.write(payload);
        }
        if let Some(page_size) = self.page_size {
            write_int(page_size, payload);
        }
        if let Some(paging_state) = &self.paging_state {
            write_bytes(paging_state, payload);
        }
        if let Some(serial_consistency) = self.serial_consistency {
            write_short(serial_consistency as u16, payload);
        }
        if let Some(timestamp) = self.timestamp {
            write_long(timestamp, payload);
        }
    }
}
