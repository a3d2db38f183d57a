//! Typed domain operations over the daemon CLI

use super::{Daemon, DaemonError, Output};
use crate::shutdown::Shutdown;
use netsim_core::{Ask, Bid, Deal};
use serde::Deserialize;
use serde_json::Value;
use std::{path::Path, sync::Arc, time::Duration};
use tokio::time::sleep;

/// How often and how long peer lists are polled when verifying a connection.
const CONNECT_ATTEMPTS: usize = 10;
const CONNECT_POLL: Duration = Duration::from_millis(200);

impl Daemon {
    /// The node's stable peer identity.
    pub async fn id(&self) -> Result<String, DaemonError> {
        let doc = self.identity().await?;
        match doc.get("ID").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => Err(DaemonError::Parse("identity document has no ID".to_string())),
        }
    }

    /// The first announced swarm address, used by peers to dial this node.
    pub async fn announced_addr(&self) -> Result<String, DaemonError> {
        let doc = self.identity().await?;
        doc.get("Addresses")
            .and_then(Value::as_array)
            .and_then(|addrs| addrs.first())
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DaemonError::Parse("identity document has no addresses".to_string()))
    }

    async fn identity(&self) -> Result<Value, DaemonError> {
        let out = self.run(&["id"]).await?;
        serde_json::from_str(out.trimmed()).map_err(|err| DaemonError::Parse(err.to_string()))
    }

    /// Connects to `remote` and verifies both sides list each other as peers.
    pub async fn connect(&self, remote: &Daemon) -> Result<(), DaemonError> {
        let addr = remote.announced_addr().await?;
        self.run(&["swarm", "connect", &addr]).await?;

        let local_id = self.id().await?;
        let remote_id = remote.id().await?;

        for attempt in 0..CONNECT_ATTEMPTS {
            if attempt > 0 {
                sleep(CONNECT_POLL).await;
            }
            let here = self.run(&["swarm", "peers"]).await?;
            let there = remote.run(&["swarm", "peers"]).await?;
            if here.stdout.contains(&remote_id) && there.stdout.contains(&local_id) {
                return Ok(());
            }
        }
        Err(DaemonError::Connectivity(format!("{local_id} <-> {remote_id} not mutually visible")))
    }

    /// Advances this node's chain by one epoch.
    pub async fn mine_once(&self) -> Result<(), DaemonError> {
        self.run(&["mining", "once"]).await.map(drop)
    }

    /// Blocks until `msg` is included in a block, or `scope` is cancelled.
    pub async fn wait_for_message(&self, msg: &str, scope: Shutdown) -> Result<Output, DaemonError> {
        let args = ["message", "wait", "--return", "--message=false", "--receipt=false", msg];
        tokio::select! {
            out = self.run(&args) => out,
            _ = scope => Err(DaemonError::Cancelled),
        }
    }

    /// Couples a message wait with one round of mining.
    ///
    /// The daemon only includes a message once a block is produced, so the
    /// wait has to be standing before the block is mined; the wait is forked
    /// off first and joined after the mine returns.
    pub async fn mine_for_message(
        self: &Arc<Self>,
        msg: &str,
        scope: Shutdown,
    ) -> Result<Output, DaemonError> {
        let waiter = {
            let daemon = self.clone();
            let msg = msg.to_string();
            tokio::spawn(async move { daemon.wait_for_message(&msg, scope).await })
        };

        let mined = self.mine_once().await;
        let waited = waiter.await.map_err(|_| DaemonError::Cancelled)?;
        mined?;
        waited
    }

    /// Creates this node's miner actor and returns its address.
    ///
    /// Mines once for collateral first, then mines the creation message in.
    pub async fn create_miner(self: &Arc<Self>, scope: Shutdown) -> Result<String, DaemonError> {
        self.mine_once().await?;

        let out = self.run(&["miner", "create", "1000000", "1000"]).await?;
        let msg = out.trimmed().to_string();
        if msg.is_empty() {
            return Err(DaemonError::Parse("miner create returned no message id".to_string()));
        }

        let wait = self.mine_for_message(&msg, scope).await?;
        let addr = wait.trimmed().to_string();
        if addr.is_empty() {
            return Err(DaemonError::EmptyAddress);
        }
        Ok(addr)
    }

    /// Adds a fresh address to the node's wallet and returns it.
    pub async fn create_wallet_addr(&self) -> Result<String, DaemonError> {
        let out = self.run(&["wallet", "addrs", "new"]).await?;
        let addr = out.trimmed().to_string();
        if addr.is_empty() {
            return Err(DaemonError::EmptyAddress);
        }
        Ok(addr)
    }

    /// The node's primary wallet address.
    pub async fn main_wallet_addr(&self) -> Result<String, DaemonError> {
        #[derive(Deserialize)]
        struct Doc {
            #[serde(rename = "Address")]
            address: String,
        }

        let out = self.run(&["address", "ls"]).await?;
        let doc: Doc = serde_json::from_str(out.trimmed())
            .map_err(|err| DaemonError::Parse(err.to_string()))?;
        if doc.address.is_empty() {
            return Err(DaemonError::EmptyAddress);
        }
        Ok(doc.address)
    }

    /// The current balance of `addr`.
    pub async fn wallet_balance(&self, addr: &str) -> Result<u64, DaemonError> {
        let out = self.run(&["wallet", "balance", addr]).await?;
        out.trimmed()
            .parse()
            .map_err(|_| DaemonError::Parse(format!("bad balance: {}", out.trimmed())))
    }

    /// Sends `amount` from one wallet to another and mines the message in.
    pub async fn send_payment(
        self: &Arc<Self>,
        from: &str,
        to: &str,
        amount: u64,
        scope: Shutdown,
    ) -> Result<(), DaemonError> {
        let out = self
            .run(&["message", "send", &format!("--value={amount}"), &format!("--from={from}"), to])
            .await?;
        let msg = out.trimmed().to_string();
        if msg.is_empty() {
            return Err(DaemonError::Parse("message send returned no id".to_string()));
        }
        self.mine_for_message(&msg, scope).await.map(drop)
    }

    /// Posts a storage offer from the given miner actor.
    pub async fn add_ask(&self, miner: &str, size: u64, price: u64) -> Result<(), DaemonError> {
        self.run(&["miner", "add-ask", miner, &size.to_string(), &price.to_string()])
            .await
            .map(drop)
    }

    /// Posts a storage request from `from`.
    pub async fn add_bid(&self, from: &str, size: u64, price: u64) -> Result<(), DaemonError> {
        self.run(&[
            "client",
            "add-bid",
            &format!("--from={from}"),
            &size.to_string(),
            &price.to_string(),
        ])
        .await
        .map(drop)
    }

    /// All open offers on the market.
    pub async fn asks(&self) -> Result<Vec<Ask>, DaemonError> {
        self.run(&["orderbook", "asks"]).await?.records()
    }

    /// All storage requests on the market, matched ones included.
    pub async fn bids(&self) -> Result<Vec<Bid>, DaemonError> {
        self.run(&["orderbook", "bids"]).await?.records()
    }

    /// Imports a file into the node and returns its data reference.
    pub async fn import_file(&self, path: &Path) -> Result<String, DaemonError> {
        let path = path
            .to_str()
            .ok_or_else(|| DaemonError::Parse("non-utf8 import path".to_string()))?;
        let out = self.run(&["client", "import", path]).await?;
        let data = out.trimmed().to_string();
        if data.is_empty() {
            return Err(DaemonError::Parse("import returned no data ref".to_string()));
        }
        Ok(data)
    }

    /// Proposes a deal binding an offer and a request to imported data.
    pub async fn propose_deal(
        &self,
        ask: u64,
        bid: u64,
        data: &str,
    ) -> Result<Deal, DaemonError> {
        let out = self
            .run(&["client", "propose-deal", &format!("--ask={ask}"), &format!("--bid={bid}"), data])
            .await?;
        serde_json::from_str(out.trimmed()).map_err(|err| DaemonError::Parse(err.to_string()))
    }
}
