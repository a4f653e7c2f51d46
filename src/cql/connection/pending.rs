// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use super::{
    multiplex::Inner,
    ConnectionError,
};
use crate::cql::frame::ResponseFrame;
use std::sync::{
    atomic::{
        AtomicU8,
        Ordering,
    },
    Arc,
    Weak,
};
use tokio::{
    sync::oneshot,
    time::Instant,
};

pub(crate) const STATE_PENDING: u8 = ResponseState::Pending as u8;

/// Completion state of a [`PendingResponse`]. Every request leaves `Pending` exactly once.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResponseState {
    Pending = 0,
    Completed = 1,
    Failed = 2,
    Cancelled = 3,
}

impl From<u8> for ResponseState {
    fn from(state: u8) -> Self {
        match state {
            0 => ResponseState::Pending,
            1 => ResponseState::Completed,
            2 => ResponseState::Failed,
            _ => ResponseState::Cancelled,
        }
    }
}

/// The caller side of one in-flight request.
///
/// Dropping it before completion cancels the request.
pub struct PendingResponse {
    pub(crate) stream: i16,
    pub(crate) request_id: u64,
    pub(crate) rx: oneshot::Receiver<Result<ResponseFrame, ConnectionError>>,
    pub(crate) state: Arc<AtomicU8>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) connection: Weak<Inner>,
}

impl PendingResponse {
    pub fn stream(&self) -> i16 {
        self.stream
    }

    pub fn state(&self) -> ResponseState {
        self.state.load(Ordering::Acquire).into()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Wait for the response, up to the deadline if there is one.
    pub async fn wait(mut self) -> Result<ResponseFrame, ConnectionError> {
        let res = match self.deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, &mut self.rx).await {
                Ok(res) => res,
                Err(_) => {
                    self.cancel();
                    return Err(ConnectionError::TimedOut);
                }
            },
            None => (&mut self.rx).await,
        };
        // A dropped sender means the connection went away without answering
        res.unwrap_or(Err(ConnectionError::Closed))
    }

    /// Cancel the request. A frame arriving later for its stream is dropped.
    /// Returns false if the request already reached another terminal state.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(
                STATE_PENDING,
                ResponseState::Cancelled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if cancelled {
            if let Some(inner) = self.connection.upgrade() {
                inner.orphan(self.stream, self.request_id);
            }
        }
        cancelled
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("stream", &self.stream)
            .field("state", &self.state())
            .field("deadline", &self.deadline)
            .finish()
    }
}
