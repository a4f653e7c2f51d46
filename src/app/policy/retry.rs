// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Retry decisions. Policies are pure functions of the condition and the execution state;
//! the dispatcher carries the decisions out.

use crate::{
    app::dispatcher::{
        ErrorKind,
        RequestError,
    },
    cql::frame::{
        Consistency,
        ErrorCode,
        ReadTimeout,
        UnavailableException,
        WriteTimeout,
        WriteType,
    },
};
use log::*;
use std::fmt::Debug;

/// What to do after an attempt failed. A consistency override applies to every later attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    RetrySameHost(Option<Consistency>),
    RetryNextHost(Option<Consistency>),
    Rethrow,
    /// Report success with an empty result.
    Ignore,
}

/// The state of an execution when a retry decision is taken.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryInfo {
    /// Consistency of the failed attempt.
    pub consistency: Consistency,
    /// Retries already spent on server reported conditions.
    pub retry_count: u32,
    pub max_retries: u32,
    /// Effective idempotence, resolved once per execution.
    pub idempotent: bool,
}

impl RetryInfo {
    fn has_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

pub trait RetryPolicy: Send + Sync + Debug {
    fn on_read_timeout(&self, info: &RetryInfo, timeout: &ReadTimeout) -> RetryDecision;

    fn on_write_timeout(&self, info: &RetryInfo, timeout: &WriteTimeout) -> RetryDecision;

    fn on_unavailable(&self, info: &RetryInfo, unavailable: &UnavailableException) -> RetryDecision;

    /// Every other recoverable condition: broken connections, client side timeouts, overloaded
    /// or bootstrapping coordinators and generic server errors.
    fn on_request_error(&self, info: &RetryInfo, error: &RequestError) -> RetryDecision;
}

/// The default retry table.
///
/// | condition | idempotence | decision |
/// |---|---|---|
/// | read timeout | any | same host once, then rethrow |
/// | write timeout | idempotent | next host while the budget lasts |
/// | write timeout | not idempotent | rethrow |
/// | unavailable | any | next host while the budget lasts |
/// | broken connection | any | next host, budget untouched |
/// | no answer in time | idempotent | next host, budget untouched |
/// | bootstrapping | any | next host |
/// | overloaded, server error | idempotent | next host |
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRetryPolicy;

impl RetryPolicy for DefaultRetryPolicy {
    fn on_read_timeout(&self, info: &RetryInfo, _timeout: &ReadTimeout) -> RetryDecision {
        if info.retry_count == 0 && info.max_retries > 0 {
            RetryDecision::RetrySameHost(None)
        } else {
            RetryDecision::Rethrow
        }
    }

    fn on_write_timeout(&self, info: &RetryInfo, _timeout: &WriteTimeout) -> RetryDecision {
        if info.idempotent && info.has_budget() {
            RetryDecision::RetryNextHost(None)
        } else {
            RetryDecision::Rethrow
        }
    }

    fn on_unavailable(&self, info: &RetryInfo, _unavailable: &UnavailableException) -> RetryDecision {
        if info.has_budget() {
            RetryDecision::RetryNextHost(None)
        } else {
            RetryDecision::Rethrow
        }
    }

    fn on_request_error(&self, info: &RetryInfo, error: &RequestError) -> RetryDecision {
        if error.is_pre_send() {
            return RetryDecision::RetryNextHost(None);
        }
        match error.server_code() {
            // Nothing was executed by a bootstrapping coordinator
            Some(ErrorCode::IsBootstrapping) => RetryDecision::RetryNextHost(None),
            Some(ErrorCode::Overloaded) | Some(ErrorCode::ServerError) | Some(ErrorCode::TruncateError)
                if info.idempotent =>
            {
                RetryDecision::RetryNextHost(None)
            }
            // The coordinator may still apply a request it did not answer in time
            None if matches!(error.kind(), ErrorKind::TimedOut) && !info.idempotent => RetryDecision::Rethrow,
            None if error.is_transport() => RetryDecision::RetryNextHost(None),
            _ => RetryDecision::Rethrow,
        }
    }
}

/// Never retries.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallthroughRetryPolicy;

impl RetryPolicy for FallthroughRetryPolicy {
    fn on_read_timeout(&self, _info: &RetryInfo, _timeout: &ReadTimeout) -> RetryDecision {
        RetryDecision::Rethrow
    }

    fn on_write_timeout(&self, _info: &RetryInfo, _timeout: &WriteTimeout) -> RetryDecision {
        RetryDecision::Rethrow
    }

    fn on_unavailable(&self, _info: &RetryInfo, _unavailable: &UnavailableException) -> RetryDecision {
        RetryDecision::Rethrow
    }

    fn on_request_error(&self, _info: &RetryInfo, _error: &RequestError) -> RetryDecision {
        RetryDecision::Rethrow
    }
}

/// Retries once at a lower consistency when enough replicas answered for that level to
/// succeed, and ignores write timeouts of writes which are known to eventually apply.
///
/// Reads at the lowered level may observe stale data.
#[derive(Debug, Default, Clone, Copy)]
pub struct DowngradingConsistencyRetryPolicy;

impl DowngradingConsistencyRetryPolicy {
    fn max_likely_to_work(replicas: i32) -> Option<Consistency> {
        match replicas {
            n if n >= 3 => Some(Consistency::Three),
            2 => Some(Consistency::Two),
            1 => Some(Consistency::One),
            _ => None,
        }
    }

    fn downgrade(replicas: i32) -> RetryDecision {
        match Self::max_likely_to_work(replicas) {
            Some(consistency) => RetryDecision::RetrySameHost(Some(consistency)),
            None => RetryDecision::Rethrow,
        }
    }
}

impl RetryPolicy for DowngradingConsistencyRetryPolicy {
    fn on_read_timeout(&self, info: &RetryInfo, timeout: &ReadTimeout) -> RetryDecision {
        if info.retry_count != 0 || info.consistency.is_serial() {
            return RetryDecision::Rethrow;
        }
        if timeout.received < timeout.block_for {
            Self::downgrade(timeout.received)
        } else if timeout.replica_had_not_responded() {
            RetryDecision::RetrySameHost(None)
        } else {
            RetryDecision::Rethrow
        }
    }

    fn on_write_timeout(&self, info: &RetryInfo, timeout: &WriteTimeout) -> RetryDecision {
        if info.retry_count != 0 || !info.idempotent {
            return RetryDecision::Rethrow;
        }
        match timeout.write_type {
            // At least one replica has the write; hinted handoff finishes the job
            WriteType::Simple | WriteType::Batch if timeout.received > 0 => RetryDecision::Ignore,
            WriteType::UnloggedBatch => Self::downgrade(timeout.received),
            WriteType::BatchLog => RetryDecision::RetrySameHost(None),
            _ => RetryDecision::Rethrow,
        }
    }

    fn on_unavailable(&self, info: &RetryInfo, unavailable: &UnavailableException) -> RetryDecision {
        if info.retry_count != 0 || info.consistency.is_serial() {
            return RetryDecision::Rethrow;
        }
        Self::downgrade(unavailable.alive)
    }

    fn on_request_error(&self, info: &RetryInfo, error: &RequestError) -> RetryDecision {
        DefaultRetryPolicy.on_request_error(info, error)
    }
}

/// Logs every decision of the wrapped policy which is not a rethrow.
#[derive(Debug)]
pub struct LoggingRetryPolicy<P> {
    inner: P,
}

impl<P: RetryPolicy> LoggingRetryPolicy<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    fn log(&self, condition: &dyn Debug, info: &RetryInfo, decision: RetryDecision) -> RetryDecision {
        match decision {
            RetryDecision::Rethrow => (),
            RetryDecision::Ignore => warn!(
                "Ignoring {:?} at {} (retry {} of {})",
                condition, info.consistency, info.retry_count, info.max_retries
            ),
            RetryDecision::RetrySameHost(cl) | RetryDecision::RetryNextHost(cl) => warn!(
                "Retrying ({:?}) on {:?} at {}, retry {} of {}",
                decision,
                condition,
                cl.unwrap_or(info.consistency),
                info.retry_count,
                info.max_retries
            ),
        }
        decision
    }
}

impl<P: RetryPolicy> RetryPolicy for LoggingRetryPolicy<P> {
    fn on_read_timeout(&self, info: &RetryInfo, timeout: &ReadTimeout) -> RetryDecision {
        self.log(timeout, info, self.inner.on_read_timeout(info, timeout))
    }

    fn on_write_timeout(&self, info: &RetryInfo, timeout: &WriteTimeout) -> RetryDecision {
        self.log(timeout, info, self.inner.on_write_timeout(info, timeout))
    }

    fn on_unavailable(&self, info: &RetryInfo, unavailable: &UnavailableException) -> RetryDecision {
        self.log(unavailable, info, self.inner.on_unavailable(info, unavailable))
    }

    fn on_request_error(&self, info: &RetryInfo, error: &RequestError) -> RetryDecision {
        self.log(error, info, self.inner.on_request_error(info, error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        app::pool::PoolError,
        cql::{
            connection::ConnectionError,
            frame::ErrorFrame,
        },
    };

    fn info(retry_count: u32, idempotent: bool) -> RetryInfo {
        RetryInfo {
            consistency: Consistency::Quorum,
            retry_count,
            max_retries: 3,
            idempotent,
        }
    }

    fn write_timeout(write_type: WriteType, received: i32) -> WriteTimeout {
        WriteTimeout {
            consistency: Consistency::Quorum,
            received,
            block_for: 2,
            write_type,
        }
    }

    fn read_timeout(received: i32, data_present: bool) -> ReadTimeout {
        ReadTimeout {
            consistency: Consistency::Quorum,
            received,
            block_for: 2,
            data_present,
        }
    }

    #[test]
    fn non_idempotent_write_timeouts_are_always_rethrown() {
        let policies: Vec<Box<dyn RetryPolicy>> = vec![
            Box::new(DefaultRetryPolicy),
            Box::new(DowngradingConsistencyRetryPolicy),
            Box::new(LoggingRetryPolicy::new(DefaultRetryPolicy)),
        ];
        for policy in policies.iter() {
            for retry_count in 0..10 {
                for max_retries in 0..5 {
                    let info = RetryInfo {
                        max_retries,
                        ..info(retry_count, false)
                    };
                    for write_type in [WriteType::Simple, WriteType::Batch, WriteType::UnloggedBatch] {
                        assert_eq!(
                            policy.on_write_timeout(&info, &write_timeout(write_type, 1)),
                            RetryDecision::Rethrow
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn idempotent_write_timeouts_use_the_budget() {
        let policy = DefaultRetryPolicy;
        let timeout = write_timeout(WriteType::Simple, 1);
        assert_eq!(
            policy.on_write_timeout(&info(0, true), &timeout),
            RetryDecision::RetryNextHost(None)
        );
        assert_eq!(
            policy.on_write_timeout(&info(2, true), &timeout),
            RetryDecision::RetryNextHost(None)
        );
        assert_eq!(policy.on_write_timeout(&info(3, true), &timeout), RetryDecision::Rethrow);
    }

    #[test]
    fn read_timeouts_retry_the_same_host_once() {
        let policy = DefaultRetryPolicy;
        let timeout = read_timeout(1, false);
        assert_eq!(
            policy.on_read_timeout(&info(0, false), &timeout),
            RetryDecision::RetrySameHost(None)
        );
        assert_eq!(policy.on_read_timeout(&info(1, false), &timeout), RetryDecision::Rethrow);
    }

    #[test]
    fn unavailable_moves_on_whatever_the_idempotence() {
        let policy = DefaultRetryPolicy;
        let unavailable = UnavailableException {
            consistency: Consistency::Quorum,
            required: 2,
            alive: 1,
        };
        assert_eq!(
            policy.on_unavailable(&info(0, false), &unavailable),
            RetryDecision::RetryNextHost(None)
        );
        assert_eq!(policy.on_unavailable(&info(3, true), &unavailable), RetryDecision::Rethrow);
    }

    #[test]
    fn transport_errors_move_to_the_next_host() {
        let policy = DefaultRetryPolicy;
        let address = "127.0.0.1:9042".parse().unwrap();
        let busy = RequestError::from(PoolError::Busy(address));
        let closed = RequestError::from(ConnectionError::Closed);
        assert_eq!(
            policy.on_request_error(&info(0, false), &busy),
            RetryDecision::RetryNextHost(None)
        );
        assert_eq!(
            policy.on_request_error(&info(0, true), &closed),
            RetryDecision::RetryNextHost(None)
        );
        assert_eq!(
            policy.on_request_error(&info(3, false), &closed),
            RetryDecision::RetryNextHost(None)
        );
        let timed_out = RequestError::from(ConnectionError::TimedOut);
        assert_eq!(
            policy.on_request_error(&info(0, true), &timed_out),
            RetryDecision::RetryNextHost(None)
        );
        assert_eq!(policy.on_request_error(&info(0, false), &timed_out), RetryDecision::Rethrow);
    }

    #[test]
    fn server_side_request_errors() {
        let policy = DefaultRetryPolicy;
        let bootstrapping = RequestError::from(ErrorFrame::new(ErrorCode::IsBootstrapping, "", None));
        let overloaded = RequestError::from(ErrorFrame::new(ErrorCode::Overloaded, "", None));
        let invalid = RequestError::from(ErrorFrame::new(ErrorCode::Invalid, "", None));
        assert_eq!(
            policy.on_request_error(&info(0, false), &bootstrapping),
            RetryDecision::RetryNextHost(None)
        );
        assert_eq!(policy.on_request_error(&info(0, false), &overloaded), RetryDecision::Rethrow);
        assert_eq!(
            policy.on_request_error(&info(0, true), &overloaded),
            RetryDecision::RetryNextHost(None)
        );
        assert_eq!(policy.on_request_error(&info(0, true), &invalid), RetryDecision::Rethrow);
    }

    #[test]
    fn fallthrough_never_retries() {
        let policy = FallthroughRetryPolicy;
        assert_eq!(policy.on_read_timeout(&info(0, true), &read_timeout(1, false)), RetryDecision::Rethrow);
        assert_eq!(
            policy.on_request_error(&info(0, true), &RequestError::from(ConnectionError::Closed)),
            RetryDecision::Rethrow
        );
    }

    #[test]
    fn downgrading_lowers_the_consistency() {
        let policy = DowngradingConsistencyRetryPolicy;
        assert_eq!(
            policy.on_read_timeout(&info(0, false), &read_timeout(1, false)),
            RetryDecision::RetrySameHost(Some(Consistency::One))
        );
        assert_eq!(
            policy.on_read_timeout(&info(0, false), &read_timeout(2, false)),
            RetryDecision::RetrySameHost(None)
        );
        assert_eq!(policy.on_read_timeout(&info(0, false), &read_timeout(2, true)), RetryDecision::Rethrow);
        assert_eq!(policy.on_read_timeout(&info(1, false), &read_timeout(1, false)), RetryDecision::Rethrow);
        assert_eq!(
            policy.on_write_timeout(&info(0, true), &write_timeout(WriteType::Simple, 1)),
            RetryDecision::Ignore
        );
        assert_eq!(
            policy.on_write_timeout(&info(0, true), &write_timeout(WriteType::UnloggedBatch, 2)),
            RetryDecision::RetrySameHost(Some(Consistency::Two))
        );
        let unavailable = UnavailableException {
            consistency: Consistency::All,
            required: 3,
            alive: 0,
        };
        assert_eq!(policy.on_unavailable(&info(0, true), &unavailable), RetryDecision::Rethrow);
    }
}
