// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! This module implements the response frames of the native protocol.
//! See `https://github.com/apache/cassandra/blob/3233c823116343cd95381790d736e239d800035a/doc/native_protocol_v4.spec#L492` for more details.

pub mod auth_challenge;
pub mod auth_success;
pub mod authenticate;
pub mod error;
pub mod event;
pub mod result;
pub mod supported;

use super::*;

#[derive(Clone, Debug)]
pub enum ResponseBody {
    Error(ErrorFrame),
    Ready,
    Authenticate(AuthenticateFrame),
    Supported(SupportedFrame),
    Result(ResultFrame),
    Event(EventFrame),
    AuthChallenge(AuthChallengeFrame),
    AuthSuccess(AuthSuccessFrame),
}

impl ResponseBody {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Error(_) => opcode::ERROR,
            Self::Ready => opcode::READY,
            Self::Authenticate(_) => opcode::AUTHENTICATE,
            Self::Supported(_) => opcode::SUPPORTED,
            Self::Result(_) => opcode::RESULT,
            Self::Event(_) => opcode::EVENT,
            Self::AuthChallenge(_) => opcode::AUTH_CHALLENGE,
            Self::AuthSuccess(_) => opcode::AUTH_SUCCESS,
        }
    }

    fn decode(version: ProtocolVersion, opcode: u8, start: &mut usize, payload: &[u8]) -> anyhow::Result<Self> {
        Ok(match opcode {
            opcode::ERROR => ResponseBody::Error(ErrorFrame::from_payload(start, payload)?),
            opcode::READY => ResponseBody::Ready,
            opcode::AUTHENTICATE => ResponseBody::Authenticate(AuthenticateFrame::from_payload(start, payload)?),
            opcode::SUPPORTED => ResponseBody::Supported(SupportedFrame::from_payload(start, payload)?),
            opcode::RESULT => ResponseBody::Result(ResultFrame::decode(version, start, payload)?),
            opcode::EVENT => ResponseBody::Event(EventFrame::decode(version, start, payload)?),
            opcode::AUTH_CHALLENGE => ResponseBody::AuthChallenge(AuthChallengeFrame::from_payload(start, payload)?),
            opcode::AUTH_SUCCESS => ResponseBody::AuthSuccess(AuthSuccessFrame::from_payload(start, payload)?),
            c => anyhow::bail!("Unknown response opcode: {}", c),
        })
    }
}

/// A decoded response frame.
#[derive(Clone, Debug)]
pub struct ResponseFrame {
    pub(crate) header: Header,
    pub(crate) tracing_id: Option<Uuid>,
    pub(crate) warnings: Vec<String>,
    pub(crate) body: ResponseBody,
}

impl ResponseFrame {
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn stream(&self) -> i16 {
        self.header.stream()
    }

    pub fn tracing_id(&self) -> Option<Uuid> {
        self.tracing_id
    }

    /// Server side warnings attached to this response.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    pub fn is_error_frame(&self) -> bool {
        self.header.opcode() == opcode::ERROR
    }

    pub fn is_event_frame(&self) -> bool {
        self.header.opcode() == opcode::EVENT
    }

    /// Decode a complete frame, header included.
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        let mut start = 0;
        let header = Header::from_payload(&mut start, payload).map_err(FrameError::InvalidFrame)?;
        Self::decode_body(header, &payload[start..])
    }

    /// Decode the body of a frame whose header was already read off the wire.
    pub fn decode_body(header: Header, body: &[u8]) -> Result<Self, FrameError> {
        let version = header.version()?;
        if header.flags().compression() {
            return Err(FrameError::Compressed);
        }
        let start = &mut 0;
        let tracing_id = if header.flags().tracing() {
            Some(read_uuid(start, body).map_err(FrameError::InvalidBody)?)
        } else {
            None
        };
        let warnings = if header.flags().warning() {
            read_string_list(start, body).map_err(FrameError::InvalidBody)?
        } else {
            Vec::new()
        };
        if header.flags().custom_payload() {
            read_bytes_map(start, body).map_err(FrameError::InvalidBody)?;
        }
        let body = ResponseBody::decode(version, header.opcode(), start, body).map_err(FrameError::InvalidBody)?;
        Ok(Self {
            header,
            tracing_id,
            warnings,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(opcode: u8, flags: u8, body: Vec<u8>) -> Vec<u8> {
        let mut header = Header::response(ProtocolVersion::V4, opcode);
        header.flags_mut().0 = flags;
        header.set_stream(7);
        header.set_body_len(body.len() as u32);
        let mut payload = Vec::new();
        header.to_payload(&mut payload);
        payload.extend(body);
        payload
    }

    #[test]
    fn void_result_with_warnings() {
        let mut body = Vec::new();
        write_string_list(&["Batch too large"], &mut body);
        write_int(1, &mut body);
        let frame = ResponseFrame::decode(&frame(opcode::RESULT, 0x08, body)).unwrap();
        assert_eq!(frame.stream(), 7);
        assert_eq!(frame.warnings(), &["Batch too large".to_string()]);
        assert!(matches!(frame.body(), ResponseBody::Result(r) if matches!(r.kind(), ResultBodyKind::Void)));
    }

    #[test]
    fn ready_frame() {
        let frame = ResponseFrame::decode(&frame(opcode::READY, 0, Vec::new())).unwrap();
        assert!(matches!(frame.body(), ResponseBody::Ready));
    }

    #[test]
    fn compressed_frames_are_rejected() {
        assert!(matches!(
            ResponseFrame::decode(&frame(opcode::READY, 0x01, Vec::new())),
            Err(FrameError::Compressed)
        ));
    }
}
