//! Simulator configuration

use crate::sim::Action;
use std::{
    fmt::Write as _,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};
use yansi::Paint;

/// Default port of the visualization server; the explorer binds the next one.
pub const DEFAULT_PORT: u16 = 7002;
/// Where the browser bundle is expected, relative to the working directory.
pub const DEFAULT_VIZ_DIR: &str = "./network-viz/viz-circle";
/// Where the explorer bundle is expected.
pub const DEFAULT_EXPLORER_DIR: &str = "./network-explorer";
/// Chunks of stream history replayed to late-joining viewers.
pub const DEFAULT_HISTORY: usize = 5_000;

/// `netsim 0.1.0`
pub const VERSION_MESSAGE: &str = concat!("netsim ", env!("CARGO_PKG_VERSION"));

const BANNER: &str = r"
                 __
   ____   _____/  |_  ______ |__| _____
  /    \ / __ \   __\/  ___/ |  |/     \
 |   |  \  ___/|  |  \___ \  |  |  Y Y  \
 |___|  /\___  >__| /____  > |__|__|_|  /
      \/     \/          \/           \/
";

/// Configuration of one simulator instance.
#[derive(Clone, Debug)]
pub struct SimConfig {
    /// Log diagnostics to stderr instead of discarding them
    pub debug: bool,
    /// Port of the visualization server; the explorer takes `port + 1`
    pub port: u16,
    /// The host the servers will listen on
    pub host: Option<IpAddr>,
    /// Fleet size ceiling enforced by the churn scheduler
    pub max_nodes: usize,
    /// Nodes launched in parallel at startup
    pub start_nodes: usize,
    /// Pause between churn ticks
    pub join_time: Duration,
    /// Pause between action ticks
    pub action_time: Duration,
    /// Pause between mining epochs
    pub block_time: Duration,
    /// Drive random storage offers
    pub auto_asks: bool,
    /// Drive random storage requests
    pub auto_bids: bool,
    /// Drive random deal proposals
    pub auto_deals: bool,
    /// Drive the mining scheduler
    pub auto_mining: bool,
    /// Drive random payments
    pub auto_payments: bool,
    /// Candidate miners sampled per epoch
    pub fork_branching: usize,
    /// Chance each candidate actually mines
    pub fork_probability: f64,
    /// Directory for generated deal descriptor files
    pub test_files: PathBuf,
    /// Visualization asset bundle served at `/`
    pub viz_dir: PathBuf,
    /// Explorer asset bundle served on the secondary port
    pub explorer_dir: PathBuf,
    /// Replay history capacity, in chunks
    pub history: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            debug: false,
            port: DEFAULT_PORT,
            host: None,
            max_nodes: 15,
            start_nodes: 3,
            join_time: Duration::from_secs(12),
            action_time: Duration::from_millis(300),
            block_time: Duration::from_secs(3),
            auto_asks: true,
            auto_bids: true,
            auto_deals: true,
            auto_mining: true,
            auto_payments: true,
            fork_branching: 1,
            fork_probability: 1.0,
            test_files: PathBuf::from("testfiles"),
            viz_dir: PathBuf::from(DEFAULT_VIZ_DIR),
            explorer_dir: PathBuf::from(DEFAULT_EXPLORER_DIR),
            history: DEFAULT_HISTORY,
        }
    }
}

// === impl SimConfig ===

impl SimConfig {
    /// Sets the port of the visualization server
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the host the servers will listen on
    #[must_use]
    pub fn with_host(mut self, host: Option<IpAddr>) -> Self {
        self.host = host;
        self
    }

    /// Sets the fleet size ceiling
    #[must_use]
    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    /// Sets the startup batch size
    #[must_use]
    pub fn with_start_nodes(mut self, start_nodes: usize) -> Self {
        self.start_nodes = start_nodes;
        self
    }

    /// Sets the pause between churn ticks
    #[must_use]
    pub fn with_join_time(mut self, join_time: Duration) -> Self {
        self.join_time = join_time;
        self
    }

    /// Sets the pause between action ticks
    #[must_use]
    pub fn with_action_time(mut self, action_time: Duration) -> Self {
        self.action_time = action_time;
        self
    }

    /// Sets the pause between mining epochs
    #[must_use]
    pub fn with_block_time(mut self, block_time: Duration) -> Self {
        self.block_time = block_time;
        self
    }

    /// Sets the per-epoch fork policy
    #[must_use]
    pub fn with_fork(mut self, branching: usize, probability: f64) -> Self {
        self.fork_branching = branching;
        self.fork_probability = probability;
        self
    }

    /// Sets the directory for generated deal descriptor files
    #[must_use]
    pub fn with_test_files(mut self, test_files: PathBuf) -> Self {
        self.test_files = test_files;
        self
    }

    /// Sets the replay history capacity
    #[must_use]
    pub fn with_history(mut self, history: usize) -> Self {
        self.history = history;
        self
    }

    /// Turns debug logging on or off
    #[must_use]
    pub fn set_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// The actions enabled by the `auto-*` switches.
    pub fn enabled_actions(&self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.auto_payments {
            actions.push(Action::Payment);
        }
        if self.auto_asks {
            actions.push(Action::Ask);
        }
        if self.auto_bids {
            actions.push(Action::Bid);
        }
        if self.auto_deals {
            actions.push(Action::Deal);
        }
        actions
    }

    fn listen_host(&self) -> IpAddr {
        self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    /// Address of the visualization server.
    pub fn viz_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_host(), self.port)
    }

    /// Address of the explorer asset server.
    pub fn explorer_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_host(), self.port.saturating_add(1))
    }

    fn as_string(&self) -> String {
        let mut s = String::new();
        let _ = write!(s, "\n{}", BANNER.green());
        let _ = write!(s, "\n    {VERSION_MESSAGE}");
        let _ = write!(
            s,
            r#"

Fleet
==================
Start nodes:      {}
Max nodes:        {}
Join time:        {:?}

Workload
==================
Block time:       {:?}
Action time:      {:?}
Fork branching:   {}
Fork probability: {}
Actions:          {:?}
Mining:           {}
"#,
            self.start_nodes,
            self.max_nodes,
            self.join_time,
            self.block_time,
            self.action_time,
            self.fork_branching,
            self.fork_probability,
            self.enabled_actions(),
            if self.auto_mining { "auto" } else { "off" },
        );
        let _ = write!(
            s,
            r#"
Listening
==================
Visualization:    http://{}/
Event stream:     http://{}/logs
Explorer:         http://{}/
"#,
            self.viz_addr(),
            self.viz_addr(),
            self.explorer_addr(),
        );
        s
    }

    /// Prints the startup summary.
    pub(crate) fn print(&self) {
        println!("{}", self.as_string());
    }
}
