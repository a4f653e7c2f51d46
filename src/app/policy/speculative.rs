// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crate::app::config::SpeculativeConfig;
use std::{
    fmt::Debug,
    sync::Arc,
    time::Duration,
};

/// Schedules extra executions of idempotent statements which are slow to answer.
pub trait SpeculativeExecutionPolicy: Send + Sync + Debug {
    /// How long to wait, with `running` executions started so far, before starting one more.
    /// `None` stops speculating.
    fn next_execution(&self, running: usize) -> Option<Duration>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoSpeculativeExecutionPolicy;

impl SpeculativeExecutionPolicy for NoSpeculativeExecutionPolicy {
    fn next_execution(&self, _running: usize) -> Option<Duration> {
        None
    }
}

/// Starts a new execution every `delay` until `max_executions` are running.
#[derive(Debug, Clone, Copy)]
pub struct ConstantSpeculativeExecutionPolicy {
    delay: Duration,
    max_executions: usize,
}

impl ConstantSpeculativeExecutionPolicy {
    pub fn new(delay: Duration, max_executions: usize) -> Self {
        Self { delay, max_executions }
    }
}

impl SpeculativeExecutionPolicy for ConstantSpeculativeExecutionPolicy {
    fn next_execution(&self, running: usize) -> Option<Duration> {
        if running < self.max_executions {
            Some(self.delay)
        } else {
            None
        }
    }
}

impl From<&SpeculativeConfig> for Arc<dyn SpeculativeExecutionPolicy> {
    fn from(config: &SpeculativeConfig) -> Self {
        match config.delay {
            Some(delay) if config.max_executions > 1 => {
                Arc::new(ConstantSpeculativeExecutionPolicy::new(delay, config.max_executions))
            }
            _ => Arc::new(NoSpeculativeExecutionPolicy),
        }
    }
}
