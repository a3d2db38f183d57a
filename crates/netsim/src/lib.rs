//! A simulated p2p storage network.
//!
//! netsim launches a fleet of external daemon nodes, wires them into a mesh
//! and drives them with a randomized workload of payments, storage offers,
//! storage requests, deal proposals and block mining. Every node's
//! structured event log is translated into visualization events, merged
//! line-safely into one stream and fanned out to browsers over HTTP.

use crate::{
    fleet::Fleet,
    logs::{LineAggregator, LogBroadcaster},
    shutdown::Signal,
    sim::{ActionRunner, Randomizer},
};
use futures::FutureExt;
use std::{
    future::Future,
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tempfile::TempDir;
use tokio::task::JoinError;
use tracing::warn;

/// cli arguments
pub mod cmd;
/// simulator configuration
pub mod config;
/// controller for one daemon process
pub mod daemon;
/// the node registry
pub mod fleet;
/// the event log pipeline
pub mod logs;
/// axum servers for the visualization surface
pub mod server;
/// cancellation scopes
pub mod shutdown;
/// the randomized workload
pub mod sim;

pub use config::SimConfig;

/// Creates the simulator and runs its servers and schedulers.
///
/// Returns a [`SimHandle`] for interacting with the running instance.
///
/// # Example
///
/// ```rust,no_run
/// # use netsim::SimConfig;
/// # async fn run() -> eyre::Result<()> {
/// let handle = netsim::spawn(SimConfig::default()).await?;
///
/// // wait for a server to exit
/// handle.await??;
/// # Ok(())
/// # }
/// ```
pub async fn spawn(config: SimConfig) -> eyre::Result<SimHandle> {
    if config.debug {
        init_tracing();
    }

    // per-node repos live under a temp root for the lifetime of the handle
    let repo_root = tempfile::Builder::new().prefix("netsim").tempdir()?;

    let (signal, on_shutdown) = shutdown::signal();

    let (aggregator, merged) = LineAggregator::new();
    let fleet = Arc::new(Fleet::new(repo_root.path().to_path_buf(), aggregator));

    let (broadcaster, logs_handle) =
        LogBroadcaster::new(merged, config.history, on_shutdown.clone());
    tokio::spawn(broadcaster.run());

    let runner =
        Arc::new(ActionRunner::new(fleet.clone(), config.test_files.clone(), config.block_time));
    Arc::new(Randomizer::new(fleet.clone(), runner, &config)).run(on_shutdown.clone());

    if !config.viz_dir.is_dir() {
        warn!(
            target: "server",
            dir = %config.viz_dir.display(),
            "viz assets not found, static routes will 404"
        );
    }

    let viz = tokio::task::spawn(server::serve(
        config.viz_addr(),
        config.viz_dir.clone(),
        logs_handle,
        on_shutdown.clone(),
    ));
    let explorer = tokio::task::spawn(server::serve_explorer(
        config.explorer_addr(),
        config.explorer_dir.clone(),
        on_shutdown,
    ));

    // either server going down takes the instance with it
    let inner = futures::future::select(viz, explorer);

    config.print();

    Ok(SimHandle {
        config,
        fleet,
        signal: Some(signal),
        inner: Box::pin(async move { inner.await.into_inner().0 }),
        _repo_root: repo_root,
    })
}

type ServeFuture = Pin<Box<dyn Future<Output = Result<io::Result<()>, JoinError>> + Send>>;

/// A handle to a running simulator instance.
pub struct SimHandle {
    config: SimConfig,
    fleet: Arc<Fleet>,
    signal: Option<Signal>,
    /// the future that drives both http servers
    inner: ServeFuture,
    _repo_root: TempDir,
}

// === impl SimHandle ===

impl SimHandle {
    /// The [SimConfig] the instance was launched with
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The node registry of this instance
    pub fn fleet(&self) -> &Arc<Fleet> {
        &self.fleet
    }

    /// Returns the visualization endpoint
    pub fn viz_endpoint(&self) -> String {
        format!("http://{}", self.config.viz_addr())
    }

    /// Returns the event stream endpoint
    pub fn logs_endpoint(&self) -> String {
        format!("http://{}/logs", self.config.viz_addr())
    }

    /// Stops schedulers, viewers and servers, then tears the fleet down.
    pub async fn shutdown(mut self) {
        if let Some(signal) = self.signal.take() {
            let _ = signal.fire();
        }
        self.fleet.shutdown_all().await;
    }
}

impl Future for SimHandle {
    type Output = Result<io::Result<()>, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let pin = self.get_mut();
        pin.inner.poll_unpin(cx)
    }
}

/// Installs the tracing subscriber.
///
/// Without `--debug` nothing is installed and diagnostics go nowhere.
fn init_tracing() {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("netsim=debug,info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
