// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crate::app::config::ReconnectionConfig;
use rand::Rng;
use std::{
    fmt::Debug,
    time::Duration,
};

/// Decides how long to wait between attempts to bring a DOWN host back.
pub trait ReconnectionPolicy: Send + Sync + Debug {
    /// A fresh schedule, started every time a host goes down.
    fn new_schedule(&self) -> Box<dyn ReconnectionSchedule>;
}

pub trait ReconnectionSchedule: Send {
    fn next_delay(&mut self) -> Duration;
}

/// `base * 2^attempt`, capped at `max`, with up to 15% jitter either way.
#[derive(Debug, Clone)]
pub struct ExponentialReconnectionPolicy {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl ExponentialReconnectionPolicy {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter,
        }
    }
}

impl From<&ReconnectionConfig> for ExponentialReconnectionPolicy {
    fn from(config: &ReconnectionConfig) -> Self {
        Self::new(config.base_delay, config.max_delay, config.jitter)
    }
}

impl ReconnectionPolicy for ExponentialReconnectionPolicy {
    fn new_schedule(&self) -> Box<dyn ReconnectionSchedule> {
        Box::new(ExponentialSchedule {
            policy: self.clone(),
            attempt: 0,
        })
    }
}

struct ExponentialSchedule {
    policy: ExponentialReconnectionPolicy,
    attempt: u32,
}

impl ReconnectionSchedule for ExponentialSchedule {
    fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(30));
        self.attempt = self.attempt.saturating_add(1);
        let delay = self
            .policy
            .base
            .checked_mul(factor)
            .unwrap_or(self.policy.max)
            .min(self.policy.max);
        if self.policy.jitter {
            delay.mul_f64(rand::thread_rng().gen_range(0.85..=1.15)).min(self.policy.max)
        } else {
            delay
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConstantReconnectionPolicy {
    delay: Duration,
}

impl ConstantReconnectionPolicy {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl ReconnectionPolicy for ConstantReconnectionPolicy {
    fn new_schedule(&self) -> Box<dyn ReconnectionSchedule> {
        Box::new(ConstantSchedule(self.delay))
    }
}

struct ConstantSchedule(Duration);

impl ReconnectionSchedule for ConstantSchedule {
    fn next_delay(&mut self) -> Duration {
        self.0
    }
}
