// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crate::app::{
    host::Host,
    statement::Statement,
};
use rand::Rng;
use std::{
    fmt::Debug,
    sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Arc,
    },
};

/// Candidate hosts for one execution, in order. Produced lazily, finite and consumed once.
pub type QueryPlan = Box<dyn Iterator<Item = Arc<Host>> + Send>;

pub trait LoadBalancingPolicy: Send + Sync + Debug {
    fn new_query_plan(&self, statement: &Statement, hosts: Arc<Vec<Arc<Host>>>) -> QueryPlan;
}

/// Rotates the first candidate across executions and skips hosts which are not UP at the
/// time the plan reaches them.
#[derive(Debug)]
pub struct RoundRobinPolicy {
    index: AtomicUsize,
}

impl RoundRobinPolicy {
    /// Start the rotation at a random host, so that clients started together spread out.
    pub fn new() -> Self {
        Self::starting_at(rand::thread_rng().gen())
    }

    pub fn starting_at(index: usize) -> Self {
        Self {
            index: AtomicUsize::new(index),
        }
    }
}

impl Default for RoundRobinPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancingPolicy for RoundRobinPolicy {
    fn new_query_plan(&self, _statement: &Statement, hosts: Arc<Vec<Arc<Host>>>) -> QueryPlan {
        let len = hosts.len();
        if len == 0 {
            return Box::new(std::iter::empty());
        }
        let start = self.index.fetch_add(1, Ordering::Relaxed) % len;
        Box::new(
            (0..len)
                .map(move |i| hosts[(start + i) % len].clone())
                .filter(|host| host.is_up()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        app::{
            config::PoolConfig,
            policy::ConstantReconnectionPolicy,
            pool::HostConnectionPool,
            statement::SimpleStatement,
        },
        cql::connection::{
            ConnectionOptions,
            TcpConnector,
        },
    };
    use std::{
        net::SocketAddr,
        time::Duration,
    };

    fn hosts(n: u8) -> Arc<Vec<Arc<Host>>> {
        let hosts = (1..=n)
            .map(|i| {
                let address: SocketAddr = format!("127.0.0.{}:9042", i).parse().unwrap();
                let pool = HostConnectionPool::new(
                    address,
                    PoolConfig::default(),
                    ConnectionOptions::default(),
                    Arc::new(TcpConnector),
                    Arc::new(ConstantReconnectionPolicy::new(Duration::from_secs(1))),
                );
                Arc::new(Host::new(pool))
            })
            .collect::<Vec<_>>();
        Arc::new(hosts)
    }

    fn last_octets(plan: QueryPlan) -> Vec<u8> {
        plan.map(|host| match host.address() {
            SocketAddr::V4(address) => address.ip().octets()[3],
            SocketAddr::V6(_) => unreachable!(),
        })
        .collect()
    }

    #[test]
    fn plans_rotate_and_visit_every_host_once() {
        let policy = RoundRobinPolicy::starting_at(0);
        let statement: Statement = SimpleStatement::new("SELECT now() FROM system.local").into();
        let hosts = hosts(3);
        assert_eq!(last_octets(policy.new_query_plan(&statement, hosts.clone())), vec![1, 2, 3]);
        assert_eq!(last_octets(policy.new_query_plan(&statement, hosts.clone())), vec![2, 3, 1]);
        assert_eq!(last_octets(policy.new_query_plan(&statement, hosts)), vec![3, 1, 2]);
    }

    #[test]
    fn empty_cluster_gives_an_empty_plan() {
        let policy = RoundRobinPolicy::new();
        let statement: Statement = SimpleStatement::new("SELECT now() FROM system.local").into();
        assert_eq!(policy.new_query_plan(&statement, hosts(0)).count(), 0);
    }
}
