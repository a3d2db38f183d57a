//! Periodic workload schedulers

use super::actions::{Action, ActionRunner};
use crate::{config::SimConfig, fleet::Fleet, shutdown::Shutdown};
use futures::future::join_all;
use netsim_core::Role;
use rand::Rng;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// Drives the fleet with churn, mining and market actions.
///
/// Three independent sleep-then-act loops share one shutdown scope; each
/// tick's work runs on its own task so a slow operation never stalls its
/// scheduler. The mining loop is the exception by design: an epoch joins all
/// of its rolls before the next tick so forks stay within one epoch.
pub struct Randomizer {
    fleet: Arc<Fleet>,
    runner: Arc<ActionRunner>,
    start_nodes: usize,
    max_nodes: usize,
    join_time: Duration,
    block_time: Duration,
    action_time: Duration,
    auto_mining: bool,
    fork_branching: usize,
    fork_probability: f64,
    actions: Vec<Action>,
}

// === impl Randomizer ===

impl Randomizer {
    pub fn new(fleet: Arc<Fleet>, runner: Arc<ActionRunner>, config: &SimConfig) -> Self {
        Self {
            fleet,
            runner,
            start_nodes: config.start_nodes,
            max_nodes: config.max_nodes,
            join_time: config.join_time,
            block_time: config.block_time,
            action_time: config.action_time,
            auto_mining: config.auto_mining,
            fork_branching: config.fork_branching.max(1),
            fork_probability: config.fork_probability,
            actions: config.enabled_actions(),
        }
    }

    /// Spawns the scheduler loops under the given scope.
    pub fn run(self: Arc<Self>, on_shutdown: Shutdown) {
        tokio::spawn(self.clone().churn(on_shutdown.clone()));
        if self.auto_mining {
            tokio::spawn(self.clone().mine(on_shutdown.clone()));
        }
        if !self.actions.is_empty() {
            tokio::spawn(self.drive_actions(on_shutdown));
        }
    }

    /// Grows the fleet: a parallel startup batch, then one node per tick
    /// while below the ceiling.
    async fn churn(self: Arc<Self>, shutdown: Shutdown) {
        info!(target: "sim", count = self.start_nodes, "launching the starting fleet");
        if let Err(err) = self.fleet.add_nodes(self.start_nodes).await {
            warn!(target: "sim", %err, "startup batch incomplete");
        }

        loop {
            if !tick(&shutdown, self.join_time).await {
                return;
            }
            if self.fleet.size() >= self.max_nodes {
                continue;
            }
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(err) = this.fleet.add_connected(Role::Any).await {
                    warn!(target: "sim", %err, "churn add failed");
                }
            });
        }
    }

    /// Mines one epoch per block time tick.
    async fn mine(self: Arc<Self>, shutdown: Shutdown) {
        loop {
            if !tick(&shutdown, self.block_time).await {
                return;
            }
            self.mine_epoch().await;
        }
    }

    /// Samples the epoch's candidate miners, rolls the fork dice for each and
    /// waits for every winner's block.
    async fn mine_epoch(&self) {
        let candidates = self.fleet.random_sample(Role::Miner, self.fork_branching);
        if candidates.is_empty() {
            return;
        }

        let winners: Vec<_> = {
            let mut rng = rand::thread_rng();
            candidates
                .into_iter()
                .filter(|_| roll(self.fork_probability, &mut rng))
                .collect()
        };
        debug!(target: "sim", winners = winners.len(), "mining epoch");

        let mining = winners.into_iter().map(|node| async move {
            if let Err(err) = node.daemon().mine_once().await {
                debug!(target: "sim", id = %node.peer_id(), %err, "mining failed");
            }
        });
        join_all(mining).await;
    }

    /// Fires one random enabled action per tick, each on its own task.
    async fn drive_actions(self: Arc<Self>, shutdown: Shutdown) {
        loop {
            if !tick(&shutdown, self.action_time).await {
                return;
            }
            let action = {
                let mut rng = rand::thread_rng();
                self.actions[rng.gen_range(0..self.actions.len())]
            };
            let runner = self.runner.clone();
            let scope = shutdown.clone();
            tokio::spawn(async move { runner.run(action, scope).await });
        }
    }
}

/// Sleeps one scheduler period; `false` once shutdown fires.
async fn tick(shutdown: &Shutdown, period: Duration) -> bool {
    tokio::select! {
        _ = shutdown.clone() => false,
        _ = tokio::time::sleep(period) => !shutdown.fired(),
    }
}

/// One candidate's fork roll.
///
/// Probabilities outside (0.001, 0.999) short circuit to all-or-none.
fn roll<R: Rng>(probability: f64, rng: &mut R) -> bool {
    if probability >= 0.999 {
        return true;
    }
    if probability <= 0.001 {
        return false;
    }
    rng.gen_bool(probability)
}
