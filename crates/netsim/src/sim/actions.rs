//! Randomized market actions over the fleet

use crate::{daemon::DaemonError, fleet::Fleet, shutdown::Shutdown};
use netsim_core::{best_pair, Role};
use rand::Rng;
use std::{ops::Range, path::PathBuf, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::debug;

/// Fixed amount moved by a payment action.
pub const PAYMENT_AMOUNT: u64 = 5;
/// Offer size and price ranges, half open.
pub const ASK_SIZE: Range<u64> = 32..48;
pub const ASK_PRICE: Range<u64> = 15..28;
/// Request size and price ranges, half open.
pub const BID_SIZE: Range<u64> = 32..48;
pub const BID_PRICE: Range<u64> = 1..18;

/// The domain actions the randomizer can trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Payment,
    Ask,
    Bid,
    Deal,
}

/// Why an action tick went nowhere.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("not enough nodes for {0:?}")]
    NotEnoughNodes(Action),
    #[error("source balance {balance} does not cover {amount}")]
    NotEnoughBalance { balance: u64, amount: u64 },
    #[error("no offers on the market")]
    MissingOffers,
    #[error("no open requests on the market")]
    MissingRequests,
    #[error("none of our requests matches any offer")]
    NoMatchingPair,
    #[error(transparent)]
    Daemon(#[from] DaemonError),
}

/// Executes market actions against randomly chosen fleet members.
///
/// Failures are per tick: they are logged at debug level and the next tick
/// starts from a clean slate.
pub struct ActionRunner {
    fleet: Arc<Fleet>,
    /// scratch space for generated deal descriptor files
    test_files: PathBuf,
    /// bound for one whole action
    timeout: Duration,
}

// === impl ActionRunner ===

impl ActionRunner {
    /// Creates a runner whose actions are bounded by three block times.
    pub fn new(fleet: Arc<Fleet>, test_files: PathBuf, block_time: Duration) -> Self {
        Self { fleet, test_files, timeout: block_time * 3 }
    }

    /// Runs one action, logging and swallowing whatever goes wrong.
    ///
    /// The action gets a child scope bounded by its budget, so tasks forked
    /// under it (the message wait behind a payment, for one) end with the
    /// action instead of lingering until teardown.
    pub async fn run(&self, action: Action, scope: Shutdown) {
        let (_guard, scope) = scope.child(Some(self.timeout));
        match tokio::time::timeout(self.timeout, self.dispatch(action, scope)).await {
            Ok(Ok(())) => {}
            Ok(Err(ActionError::Daemon(DaemonError::Cancelled))) => {}
            Ok(Err(err)) => debug!(target: "sim", ?action, %err, "action skipped"),
            Err(_) => debug!(target: "sim", ?action, "action timed out"),
        }
    }

    async fn dispatch(&self, action: Action, scope: Shutdown) -> Result<(), ActionError> {
        match action {
            Action::Payment => self.payment(scope).await,
            Action::Ask => self.offer(scope).await,
            Action::Bid => self.request().await,
            Action::Deal => self.deal().await,
        }
    }

    /// Moves the fixed amount between two distinct clients.
    ///
    /// Skipped when the source balance does not cover the amount; the send
    /// operation is never invoked in that case.
    async fn payment(&self, scope: Shutdown) -> Result<(), ActionError> {
        let pair = self.fleet.random_sample(Role::Client, 2);
        let (src, dst) = match &pair[..] {
            [src, dst] => (src.clone(), dst.clone()),
            _ => return Err(ActionError::NotEnoughNodes(Action::Payment)),
        };

        let balance = src.daemon().wallet_balance(src.wallet()).await?;
        check_balance(balance, PAYMENT_AMOUNT)?;

        src.daemon().send_payment(src.wallet(), dst.wallet(), PAYMENT_AMOUNT, scope).await?;
        Ok(())
    }

    /// Posts an offer from a random miner, creating its miner actor on
    /// demand.
    async fn offer(&self, scope: Shutdown) -> Result<(), ActionError> {
        let node =
            self.fleet.random(Role::Miner).ok_or(ActionError::NotEnoughNodes(Action::Ask))?;
        let miner = node.miner_addr(scope).await?;

        let (size, price) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(ASK_SIZE), rng.gen_range(ASK_PRICE))
        };
        node.daemon().add_ask(&miner, size, price).await?;
        Ok(())
    }

    /// Posts a request from a random client.
    async fn request(&self) -> Result<(), ActionError> {
        let node =
            self.fleet.random(Role::Client).ok_or(ActionError::NotEnoughNodes(Action::Bid))?;

        let (size, price) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(BID_SIZE), rng.gen_range(BID_PRICE))
        };
        node.daemon().add_bid(node.wallet(), size, price).await?;
        Ok(())
    }

    /// Matches one of a random client's open requests against the cheapest
    /// fitting offer and proposes the deal.
    async fn deal(&self) -> Result<(), ActionError> {
        let node =
            self.fleet.random(Role::Client).ok_or(ActionError::NotEnoughNodes(Action::Deal))?;

        let asks = node.daemon().asks().await?;
        if asks.is_empty() {
            return Err(ActionError::MissingOffers);
        }
        let bids: Vec<_> =
            node.daemon().bids().await?.into_iter().filter(|bid| !bid.used).collect();
        if bids.is_empty() {
            return Err(ActionError::MissingRequests);
        }

        let (ask, bid) =
            best_pair(&asks, &bids, node.wallet()).ok_or(ActionError::NoMatchingPair)?;

        let descriptor = self.write_descriptor(ask.id, bid.id).await?;
        let data_ref = node.daemon().import_file(&descriptor).await?;
        node.daemon().propose_deal(ask.id, bid.id, &data_ref).await?;
        Ok(())
    }

    /// Writes the small file whose import backs the deal's data reference.
    async fn write_descriptor(&self, ask: u64, bid: u64) -> Result<PathBuf, ActionError> {
        tokio::fs::create_dir_all(&self.test_files).await.map_err(DaemonError::from)?;
        let path = self.test_files.join(format!("deal-{ask}-{bid}.txt"));
        tokio::fs::write(&path, format!("deal binding ask {ask} to bid {bid}\n"))
            .await
            .map_err(DaemonError::from)?;
        Ok(path)
    }
}

/// The payment precondition: the source balance must cover the amount.
fn check_balance(balance: u64, amount: u64) -> Result<(), ActionError> {
    if balance < amount {
        return Err(ActionError::NotEnoughBalance { balance, amount });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_ranges_overlap_so_deals_can_happen() {
        // a request can only match an offer if the price ranges overlap and
        // the size ranges are compatible
        assert!(BID_PRICE.end > ASK_PRICE.start);
        assert_eq!(BID_SIZE, ASK_SIZE);
    }

    #[test]
    fn short_balances_skip_the_payment() {
        // the guard sits in front of the send call, so failing it means the
        // node's send operation is never invoked
        assert!(matches!(
            check_balance(3, PAYMENT_AMOUNT),
            Err(ActionError::NotEnoughBalance { balance: 3, amount: 5 })
        ));
        assert!(check_balance(100, PAYMENT_AMOUNT).is_ok());
        assert!(check_balance(PAYMENT_AMOUNT, PAYMENT_AMOUNT).is_ok());
    }
}
