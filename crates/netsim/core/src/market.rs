//! Storage market primitives

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role a node plays in the simulated storage market.
///
/// `Any` is a placeholder accepted by fleet queries and node creation; a
/// created node always ends up as a concrete `Miner` or `Client`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Produces blocks and posts storage offers
    Miner,
    /// Posts storage requests and pays
    Client,
    /// Either of the two
    Any,
}

// === impl Role ===

impl Role {
    /// Whether a node of role `other` satisfies a query for `self`.
    pub fn matches(&self, other: Role) -> bool {
        matches!(self, Role::Any) || *self == other
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Miner => f.write_str("miner"),
            Role::Client => f.write_str("client"),
            Role::Any => f.write_str("any"),
        }
    }
}

/// A storage offer as reported by the daemon's orderbook listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ask {
    /// Submission order, ascending
    #[serde(rename = "ID")]
    pub id: u64,
    /// Miner actor that owns the offer
    pub owner: String,
    pub price: u64,
    pub size: u64,
}

/// A storage request as reported by the daemon's orderbook listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Bid {
    /// Submission order, ascending
    #[serde(rename = "ID")]
    pub id: u64,
    /// Wallet that posted the request
    pub owner: String,
    pub price: u64,
    pub size: u64,
    /// Set once the request has been matched into a deal
    #[serde(default)]
    pub used: bool,
}

/// Outcome of a deal proposal, as reported by the daemon.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Deal {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(default)]
    pub state: String,
}

/// Selects the pair to turn into a deal on behalf of `wallet`.
///
/// Requests are considered in submission order, offers cheapest first; the
/// winner is the first pair where the request fits the offer's capacity and
/// meets its price. Only requests owned by `wallet` are considered. Returns
/// `None` when nothing matches.
pub fn best_pair<'a>(asks: &'a [Ask], bids: &'a [Bid], wallet: &str) -> Option<(&'a Ask, &'a Bid)> {
    let mut asks: Vec<&Ask> = asks.iter().collect();
    asks.sort_by_key(|ask| ask.price);

    let mut bids: Vec<&Bid> = bids.iter().filter(|bid| bid.owner == wallet).collect();
    bids.sort_by_key(|bid| bid.id);

    for bid in bids {
        for ask in &asks {
            if bid.size <= ask.size && bid.price >= ask.price {
                return Some((ask, bid));
            }
        }
    }
    None
}
