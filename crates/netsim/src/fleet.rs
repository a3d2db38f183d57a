//! Concurrent registry of the simulated nodes

use crate::{
    daemon::{Daemon, DaemonError},
    logs::{LineAggregator, NodeLogger},
    shutdown::Shutdown,
};
use futures::future::join_all;
use netsim_core::{Role, VizEvent};
use parking_lot::RwLock;
use rand::{seq::SliceRandom, Rng};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use thiserror::Error;
use tracing::{info, warn};

/// Errors surfaced by fleet membership operations.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error(transparent)]
    Daemon(#[from] DaemonError),
    #[error("failed to connect {failed}/{total} peers")]
    Connect { failed: usize, total: usize },
    #[error("adding {failed}/{requested} nodes failed")]
    Add { failed: usize, requested: usize },
}

/// A live fleet member: one daemon plus its cached identity and market role.
///
/// Identity, wallet and role are fixed at creation; the miner actor address
/// is created lazily and never changes once set.
pub struct Node {
    daemon: Arc<Daemon>,
    peer_id: String,
    wallet: String,
    role: Role,
    miner_addr: tokio::sync::Mutex<Option<String>>,
    logger: NodeLogger,
}

// === impl Node ===

impl Node {
    pub fn daemon(&self) -> &Arc<Daemon> {
        &self.daemon
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn wallet(&self) -> &str {
        &self.wallet
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn logger(&self) -> &NodeLogger {
        &self.logger
    }

    /// The node's miner actor address, created on first use.
    pub async fn miner_addr(&self, scope: Shutdown) -> Result<String, DaemonError> {
        let mut slot = self.miner_addr.lock().await;
        if let Some(addr) = slot.as_ref() {
            return Ok(addr.clone());
        }
        let addr = self.daemon.create_miner(scope).await?;
        *slot = Some(addr.clone());
        Ok(addr)
    }
}

/// The fleet of simulated nodes.
///
/// Enumeration and sampling take a read snapshot; mutation holds the write
/// guard only for the actual list change, never across a spawn. Working
/// directory names come from a monotonic counter, so concurrent adds cannot
/// collide.
pub struct Fleet {
    nodes: RwLock<Vec<Arc<Node>>>,
    repo_count: AtomicUsize,
    repo_root: PathBuf,
    logs: LineAggregator,
}

// === impl Fleet ===

impl Fleet {
    pub fn new(repo_root: PathBuf, logs: LineAggregator) -> Self {
        Self { nodes: RwLock::new(Vec::new()), repo_count: AtomicUsize::new(0), repo_root, logs }
    }

    pub fn size(&self) -> usize {
        self.nodes.read().len()
    }

    /// Spawns, readies and registers one node.
    ///
    /// `Role::Any` resolves against the current population so clients keep
    /// outnumbering miners by at least 3:2. A node that fails anywhere
    /// between spawn and registration is torn down before the error returns.
    /// An add in flight when the simulator stops runs to completion or fails
    /// naturally; teardown happens in [`shutdown_all`](Self::shutdown_all).
    pub async fn add(&self, role: Role) -> Result<Arc<Node>, FleetError> {
        let role = self.resolve_role(role);
        let repo_dir = self.next_repo_dir();

        let daemon = Arc::new(Daemon::start(repo_dir).await?);
        if let Err(err) = daemon.wait_for_api().await {
            daemon.shutdown().await;
            return Err(err.into());
        }

        let node = match self.register(daemon.clone(), role).await {
            Ok(node) => node,
            Err(err) => {
                daemon.shutdown().await;
                return Err(err);
            }
        };

        // membership changes are part of the visualization stream
        let _ = node.logger().write_event(&VizEvent::churn(node.wallet(), role, true)).await;

        info!(target: "fleet", id = %node.peer_id(), %role, "node joined");
        Ok(node)
    }

    async fn register(&self, daemon: Arc<Daemon>, role: Role) -> Result<Arc<Node>, FleetError> {
        let peer_id = daemon.id().await?;
        let wallet = daemon.main_wallet_addr().await?;

        let tail = daemon.log_tail().await?;
        let (logger, translated) = NodeLogger::new(peer_id.clone(), tail);
        self.logs.mix_reader(translated);

        let node = Arc::new(Node {
            daemon,
            peer_id,
            wallet,
            role,
            miner_addr: Default::default(),
            logger,
        });
        self.nodes.write().push(node.clone());
        Ok(node)
    }

    /// Adds one node and wires it into the mesh, best effort on the wiring.
    pub async fn add_connected(&self, role: Role) -> Result<Arc<Node>, FleetError> {
        let node = self.add(role).await?;
        if let Err(err) = self.connect_to_all(&node).await {
            warn!(target: "fleet", id = %node.peer_id(), %err, "node only partially connected");
        }
        Ok(node)
    }

    /// Requests `count` additions in parallel; reports how many failed.
    pub async fn add_nodes(&self, count: usize) -> Result<(), FleetError> {
        let adds = (0..count).map(|_| self.add_connected(Role::Any));
        let failed = join_all(adds).await.iter().filter(|res| res.is_err()).count();
        if failed > 0 {
            return Err(FleetError::Add { failed, requested: count });
        }
        Ok(())
    }

    /// Connects `node` to every other fleet member.
    ///
    /// Failures are counted and reported in aggregate; connecting is
    /// idempotent at the protocol layer, so repeats and races are harmless.
    pub async fn connect_to_all(&self, node: &Node) -> Result<(), FleetError> {
        let others: Vec<_> = self
            .nodes
            .read()
            .iter()
            .filter(|other| other.peer_id() != node.peer_id())
            .cloned()
            .collect();

        let total = others.len();
        let mut failed = 0;
        for other in others {
            if let Err(err) = node.daemon().connect(other.daemon()).await {
                warn!(target: "fleet", peer = %other.peer_id(), %err, "connect failed");
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(FleetError::Connect { failed, total });
        }
        Ok(())
    }

    pub fn by_index(&self, index: usize) -> Option<Arc<Node>> {
        self.nodes.read().get(index).cloned()
    }

    pub fn by_identity(&self, id: &str) -> Option<Arc<Node>> {
        self.nodes.read().iter().find(|node| node.peer_id() == id).cloned()
    }

    /// All nodes matching `role`, in insertion order.
    pub fn of_role(&self, role: Role) -> Vec<Arc<Node>> {
        self.nodes.read().iter().filter(|node| role.matches(node.role())).cloned().collect()
    }

    /// Numbers of (miners, clients) currently registered.
    pub fn role_counts(&self) -> (usize, usize) {
        let nodes = self.nodes.read();
        let miners = nodes.iter().filter(|node| node.role() == Role::Miner).count();
        (miners, nodes.len() - miners)
    }

    /// A uniformly random node matching `role`.
    pub fn random(&self, role: Role) -> Option<Arc<Node>> {
        self.nodes
            .read()
            .iter()
            .filter(|node| role.matches(node.role()))
            .cloned()
            .collect::<Vec<_>>()
            .choose(&mut rand::thread_rng())
            .cloned()
    }

    /// Up to `count` distinct nodes matching `role`, sampled without
    /// replacement; fewer when the population is smaller.
    pub fn random_sample(&self, role: Role, count: usize) -> Vec<Arc<Node>> {
        let mut pool = self.of_role(role);
        let take = count.min(pool.len());
        let (sample, _) = pool.partial_shuffle(&mut rand::thread_rng(), take);
        sample.to_vec()
    }

    /// Concurrently shuts every node down; returns how many needed the hard
    /// kill. Does not block on individual stragglers beyond their grace
    /// period.
    pub async fn shutdown_all(&self) -> usize {
        let nodes: Vec<_> = self.nodes.write().drain(..).collect();
        let total = nodes.len();

        let results = join_all(nodes.iter().map(|node| node.daemon().shutdown())).await;
        let forced = results.into_iter().filter(|clean| !clean).count();
        if forced > 0 {
            warn!(target: "fleet", forced, total, "nodes needed a hard kill");
        }
        forced
    }

    fn next_repo_dir(&self) -> PathBuf {
        let n = self.repo_count.fetch_add(1, Ordering::SeqCst);
        self.repo_root.join(format!("node{n}"))
    }

    /// Resolves `Any` with the client bias rule; concrete roles pass through.
    fn resolve_role(&self, role: Role) -> Role {
        if role != Role::Any {
            return role;
        }
        let (miners, clients) = self.role_counts();
        resolve_any(miners, clients, &mut rand::thread_rng())
    }
}

/// Clients must stay ahead of miners by 3:2; beyond that a fair coin decides.
fn resolve_any<R: Rng>(miners: usize, clients: usize, rng: &mut R) -> Role {
    if (clients as f64) < 1.5 * miners as f64 {
        Role::Client
    } else if rng.gen_bool(0.5) {
        Role::Miner
    } else {
        Role::Client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    fn test_fleet() -> Fleet {
        let (logs, _stream) = LineAggregator::new();
        Fleet::new(PathBuf::from("/tmp/netsim-test"), logs)
    }

    fn test_node(id: &str, role: Role) -> Arc<Node> {
        let (logger, _stream) = NodeLogger::new(id.to_string(), tokio::io::empty());
        Arc::new(Node {
            daemon: Arc::new(daemon::dangling()),
            peer_id: id.to_string(),
            wallet: format!("w-{id}"),
            role,
            miner_addr: Default::default(),
            logger,
        })
    }

    fn populate(fleet: &Fleet, miners: usize, clients: usize) {
        for i in 0..miners {
            let node = test_node(&format!("m{i}"), Role::Miner);
            fleet.nodes.write().push(node);
        }
        for i in 0..clients {
            let node = test_node(&format!("c{i}"), Role::Client);
            fleet.nodes.write().push(node);
        }
    }

    #[tokio::test]
    async fn queries_see_a_consistent_population() {
        let fleet = test_fleet();
        populate(&fleet, 3, 5);

        assert_eq!(fleet.size(), 8);
        assert_eq!(fleet.role_counts(), (3, 5));
        assert_eq!(fleet.by_index(0).unwrap().peer_id(), "m0");
        assert_eq!(fleet.by_identity("c4").unwrap().role(), Role::Client);
        assert!(fleet.by_identity("nope").is_none());
        assert_eq!(fleet.of_role(Role::Any).len(), 8);
    }

    #[tokio::test]
    async fn sampling_is_distinct_and_bounded_by_the_population() {
        let fleet = test_fleet();
        populate(&fleet, 3, 5);

        // more than available: all three distinct miners
        let miners = fleet.random_sample(Role::Miner, 4);
        assert_eq!(miners.len(), 3);
        let ids: HashSet<_> = miners.iter().map(|n| n.peer_id().to_string()).collect();
        assert_eq!(ids.len(), 3);
        assert!(miners.iter().all(|n| n.role() == Role::Miner));

        // exactly the population: all five distinct clients
        let clients = fleet.random_sample(Role::Client, 5);
        assert_eq!(clients.len(), 5);
        let ids: HashSet<_> = clients.iter().map(|n| n.peer_id().to_string()).collect();
        assert_eq!(ids.len(), 5);
    }

    #[tokio::test]
    async fn random_respects_the_role_filter() {
        let fleet = test_fleet();
        populate(&fleet, 1, 1);

        for _ in 0..16 {
            assert_eq!(fleet.random(Role::Miner).unwrap().role(), Role::Miner);
        }
        assert!(test_fleet().random(Role::Any).is_none());
    }

    #[test]
    fn repo_dirs_are_unique_under_concurrent_allocation() {
        let fleet = Arc::new(test_fleet());
        let dirs: HashSet<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let fleet = fleet.clone();
                    scope.spawn(move || {
                        (0..50).map(|_| fleet.next_repo_dir()).collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(dirs.len(), 8 * 50);
    }

    #[test]
    fn any_resolution_keeps_clients_ahead() {
        let mut rng = rand::thread_rng();
        // below the 3:2 line the outcome is deterministic
        assert_eq!(resolve_any(2, 2, &mut rng), Role::Client);
        assert_eq!(resolve_any(4, 5, &mut rng), Role::Client);
        // at or above the line both outcomes occur
        let rolls: HashSet<_> = (0..256).map(|_| resolve_any(2, 3, &mut rng)).collect();
        assert_eq!(rolls.len(), 2);
    }

    #[test]
    fn long_churn_keeps_the_client_share_in_band() {
        let mut rng = rand::thread_rng();
        let (mut miners, mut clients) = (0usize, 0usize);
        for _ in 0..1_000 {
            match resolve_any(miners, clients, &mut rng) {
                Role::Miner => miners += 1,
                _ => clients += 1,
            }
        }
        let share = clients as f64 / (miners + clients) as f64;
        assert!((0.4..=0.7).contains(&share), "client share {share} out of band");
    }
}
