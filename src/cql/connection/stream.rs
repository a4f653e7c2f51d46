// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use super::{
    pending::{
        ResponseState,
        STATE_PENDING,
    },
    ConnectionError,
};
use crate::cql::frame::ResponseFrame;
use std::sync::{
    atomic::{
        AtomicU8,
        Ordering,
    },
    Arc,
};
use tokio::sync::oneshot;

pub(crate) type ResponseSender = oneshot::Sender<Result<ResponseFrame, ConnectionError>>;

/// The receiving half of one in-flight request.
pub(crate) struct Handler {
    pub(crate) request_id: u64,
    pub(crate) state: Arc<AtomicU8>,
    pub(crate) tx: ResponseSender,
}

impl Handler {
    /// Move the request to a terminal state and deliver `res`, unless it already left `Pending`.
    pub(crate) fn finish(self, res: Result<ResponseFrame, ConnectionError>) -> bool {
        let target = match res {
            Ok(_) => ResponseState::Completed,
            Err(_) => ResponseState::Failed,
        };
        if self
            .state
            .compare_exchange(STATE_PENDING, target as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // The waiter may have been dropped in the meantime
            self.tx.send(res).ok();
            true
        } else {
            false
        }
    }
}

enum Slot {
    Free,
    Active(Handler),
    /// Abandoned by its caller; reserved until the server answers.
    Orphaned,
}

/// What a frame received on a stream resolves to.
pub(crate) enum Completion {
    Handler(Handler),
    /// A late answer to an abandoned request.
    Orphan,
    Unknown,
}

/// Fixed size arena of stream ids with an explicit free list.
pub(crate) struct StreamTable {
    slots: Vec<Slot>,
    free: Vec<i16>,
    orphans: usize,
    closed: bool,
}

impl StreamTable {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.min(i16::MAX as usize + 1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot::Free);
        Self {
            slots,
            // Popped from the back, so low ids go out first
            free: (0..capacity).rev().map(|id| id as i16).collect(),
            orphans: 0,
            closed: false,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Streams not available for new requests, orphans included.
    pub(crate) fn in_flight(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub(crate) fn orphans(&self) -> usize {
        self.orphans
    }

    pub(crate) fn allocate(&mut self, handler: Handler) -> Result<i16, ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        let stream = self.free.pop().ok_or(ConnectionError::StreamsExhausted)?;
        self.slots[stream as usize] = Slot::Active(handler);
        Ok(stream)
    }

    /// Resolve a received frame's stream, releasing the id.
    pub(crate) fn complete(&mut self, stream: i16) -> Completion {
        if self.closed {
            return Completion::Unknown;
        }
        let slot = match self.slots.get_mut(stream as usize) {
            Some(slot) if stream >= 0 => slot,
            _ => return Completion::Unknown,
        };
        match std::mem::replace(slot, Slot::Free) {
            Slot::Active(handler) => {
                self.release(stream);
                Completion::Handler(handler)
            }
            Slot::Orphaned => {
                self.orphans -= 1;
                self.release(stream);
                Completion::Orphan
            }
            Slot::Free => Completion::Unknown,
        }
    }

    /// Abandon the request `request_id` on `stream`. The id stays reserved so that a late answer
    /// is never attributed to a newer request. Returns the orphan count if the slot changed.
    pub(crate) fn orphan(&mut self, stream: i16, request_id: u64) -> Option<usize> {
        let slot = self.slots.get_mut(stream as usize)?;
        match slot {
            Slot::Active(handler) if handler.request_id == request_id => {
                *slot = Slot::Orphaned;
                self.orphans += 1;
                Some(self.orphans)
            }
            _ => None,
        }
    }

    /// Close the table for good, handing back every active request. No id is reused afterwards.
    pub(crate) fn close(&mut self) -> Vec<Handler> {
        self.closed = true;
        self.free.clear();
        self.orphans = 0;
        self.slots
            .iter_mut()
            .filter_map(|slot| match std::mem::replace(slot, Slot::Orphaned) {
                Slot::Active(handler) => Some(handler),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    fn release(&mut self, stream: i16) {
        if !self.closed {
            self.free.push(stream);
        }
    }
}
