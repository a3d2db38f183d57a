//! Command line surface of the simulator

use crate::config::SimConfig;
use clap::Parser;
use std::{net::IpAddr, path::PathBuf, time::Duration};
use tracing::info;

#[derive(Clone, Debug, Parser)]
pub struct SimArgs {
    #[clap(long, help = "Log diagnostics to stderr instead of discarding them")]
    pub debug: bool,

    #[clap(
        long,
        short,
        help = "Port of the visualization server; the explorer takes the next port",
        default_value = "7002"
    )]
    pub port: u16,

    #[clap(long, help = "The host the servers will listen on")]
    pub host: Option<IpAddr>,

    #[clap(long = "max-nodes", help = "Fleet size ceiling", default_value = "15")]
    pub max_nodes: usize,

    #[clap(
        long = "start-nodes",
        help = "Nodes launched in parallel at startup",
        default_value = "3"
    )]
    pub start_nodes: usize,

    #[clap(
        long = "t-join",
        help = "Pause between node joins",
        value_parser = parse_duration,
        default_value = "12s"
    )]
    pub t_join: Duration,

    #[clap(
        long = "t-action",
        help = "Pause between random actions",
        value_parser = parse_duration,
        default_value = "300ms"
    )]
    pub t_action: Duration,

    #[clap(
        long = "t-block",
        help = "Pause between mining epochs",
        value_parser = parse_duration,
        default_value = "3s"
    )]
    pub t_block: Duration,

    #[clap(
        long = "auto-asks",
        help = "Drive random storage offers",
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    pub auto_asks: bool,

    #[clap(
        long = "auto-bids",
        help = "Drive random storage requests",
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    pub auto_bids: bool,

    #[clap(
        long = "auto-deals",
        help = "Drive random deal proposals",
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    pub auto_deals: bool,

    #[clap(
        long = "auto-mining",
        help = "Drive the mining scheduler",
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    pub auto_mining: bool,

    #[clap(
        long = "auto-payments",
        help = "Drive random payments",
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    pub auto_payments: bool,

    #[clap(
        long = "fork-branching",
        help = "Candidate miners sampled per epoch",
        default_value = "1"
    )]
    pub fork_branching: usize,

    #[clap(
        long = "fork-probability",
        help = "Chance each candidate actually mines",
        default_value = "1.0"
    )]
    pub fork_probability: f64,

    #[clap(
        long = "test-files",
        help = "Directory for generated deal descriptor files",
        default_value = "testfiles"
    )]
    pub test_files: PathBuf,
}

fn parse_duration(arg: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(arg)
}

// === impl SimArgs ===

impl SimArgs {
    pub fn into_config(self) -> SimConfig {
        let mut config = SimConfig::default()
            .set_debug(self.debug)
            .with_port(self.port)
            .with_host(self.host)
            .with_max_nodes(self.max_nodes)
            .with_start_nodes(self.start_nodes)
            .with_join_time(self.t_join)
            .with_action_time(self.t_action)
            .with_block_time(self.t_block)
            .with_fork(self.fork_branching, self.fork_probability)
            .with_test_files(self.test_files);
        config.auto_asks = self.auto_asks;
        config.auto_bids = self.auto_bids;
        config.auto_deals = self.auto_deals;
        config.auto_mining = self.auto_mining;
        config.auto_payments = self.auto_payments;
        config
    }

    /// Starts the simulator and runs it until Ctrl-C or a server failure.
    ///
    /// See also [`crate::spawn()`]
    pub async fn run(self) -> eyre::Result<()> {
        let mut handle = crate::spawn(self.into_config()).await?;

        tokio::select! {
            res = &mut handle => res??,
            _ = tokio::signal::ctrl_c() => {
                info!(target: "netsim", "received shutdown signal, tearing the fleet down");
                handle.shutdown().await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn args_parse_into_the_documented_defaults() {
        let args = SimArgs::parse_from(["netsim"]);
        let config = args.into_config();
        let defaults = SimConfig::default();
        assert_eq!(config.port, defaults.port);
        assert_eq!(config.max_nodes, defaults.max_nodes);
        assert_eq!(config.start_nodes, defaults.start_nodes);
        assert_eq!(config.join_time, defaults.join_time);
        assert_eq!(config.action_time, defaults.action_time);
        assert_eq!(config.block_time, defaults.block_time);
        assert!(config.auto_asks && config.auto_bids && config.auto_deals);
        assert!(config.auto_mining && config.auto_payments);
    }

    #[test]
    fn durations_and_switches_parse() {
        let args = SimArgs::parse_from([
            "netsim",
            "--t-block",
            "250ms",
            "--t-join",
            "1m",
            "--auto-deals",
            "false",
            "--fork-branching",
            "3",
            "--fork-probability",
            "0.5",
        ]);
        assert_eq!(args.t_block, Duration::from_millis(250));
        assert_eq!(args.t_join, Duration::from_secs(60));
        assert!(!args.auto_deals);
        assert_eq!(args.fork_branching, 3);
        assert_eq!(args.fork_probability, 0.5);
    }
}
