//! Raw daemon event records and their visualization counterparts

use crate::market::Role;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reward credited for a mined block, as shown to viewers.
const BLOCK_REWARD: &str = "1000";

/// One structured record from a daemon's event log.
///
/// Everything beyond the operation name lives in the free-form `Tags` tree.
#[derive(Clone, Debug, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "Operation")]
    pub operation: String,
    #[serde(rename = "Tags", default)]
    pub tags: Value,
}

/// The closed set of events the visualization front-end understands.
///
/// Serialized as single `{"type": "...", "from": "...", ...}` objects, one
/// per line on the `/logs` stream.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum VizEvent {
    NewBlockMined { from: String, to: String, block: String, reward: String },
    BroadcastBlock { from: String, to: String, block: String },
    SawBlock { from: String, block: String },
    PickedChain { from: String, block: String },
    AddAsk { from: String, to: String, txid: String, price: Value, size: Value },
    AddBid { from: String, to: String, txid: String, price: Value, size: Value },
    MakeDeal { from: String, to: String, ask: Value, bid: Value, deal: Value, price: Value, size: Value, data: String },
    SendFile { from: String, to: String, data: String },
    FinishDeal { from: String, deal: String },
    SendPieces { from: String, to: String, data: String },
    CreateMiner { from: String, miner: String },
    Connected { from: String, to: String },
    AddDeal { from: String, ask: Value, bid: Value, sig: Value, data: String },
    SendPayment { from: String, to: String, value: Value },
    HeartBeat {
        from: String,
        peers: Value,
        asks: Value,
        bids: Value,
        deals: Value,
        #[serde(rename = "bestBlock")]
        best_block: Value,
        pending: Value,
        #[serde(rename = "walletAddrs")]
        wallet_addrs: Value,
    },
    MinerJoins { from: String },
    MinerLeaves { from: String },
    ClientJoins { from: String },
    ClientLeaves { from: String },
}

// === impl VizEvent ===

impl VizEvent {
    /// Membership-change event for a node joining or leaving the network.
    pub fn churn(id: &str, role: Role, joins: bool) -> Self {
        let from = id.to_string();
        match (role, joins) {
            (Role::Miner, true) => VizEvent::MinerJoins { from },
            (Role::Miner, false) => VizEvent::MinerLeaves { from },
            (_, true) => VizEvent::ClientJoins { from },
            (_, false) => VizEvent::ClientLeaves { from },
        }
    }
}

/// Translates one raw record into zero or more visualization events.
///
/// `id` identifies the node whose log produced the record and is the default
/// `from`. Records with unknown operations, records without a tag tree, and
/// records carrying an `error` tag anywhere translate to nothing; translation
/// itself never fails.
pub fn translate(id: &str, record: &EventRecord) -> Vec<VizEvent> {
    let Some(tags) = record.tags.as_object() else { return Vec::new() };
    if has_error_tag(&record.tags) {
        return Vec::new();
    }

    match record.operation.as_str() {
        "AddNewBlock" => {
            let (miner, block) = block_tag(tags);
            let from = if miner.is_empty() { id.to_string() } else { miner };
            vec![
                VizEvent::NewBlockMined {
                    from: from.clone(),
                    to: "all".to_string(),
                    block: block.clone(),
                    reward: BLOCK_REWARD.to_string(),
                },
                VizEvent::BroadcastBlock { from, to: "all".to_string(), block },
            ]
        }

        "ProcessNewBlock" => {
            let (_, block) = block_tag(tags);
            vec![VizEvent::SawBlock { from: id.to_string(), block }]
        }

        "acceptNewBestBlock" => {
            let (_, block) = block_tag(tags);
            vec![VizEvent::PickedChain { from: id.to_string(), block }]
        }

        "sm.AddAsk" | "minerAddAskCmd" => vec![VizEvent::AddAsk {
            from: id.to_string(),
            to: "all".to_string(),
            txid: str_tag(tags, "msg"),
            price: val_tag(tags, "price"),
            size: val_tag(tags, "size"),
        }],

        "sm.AddBid" | "clientAddBidCmd" => vec![VizEvent::AddBid {
            from: id.to_string(),
            to: "all".to_string(),
            txid: str_tag(tags, "msg"),
            price: val_tag(tags, "price"),
            size: val_tag(tags, "size"),
        }],

        "ProposeDeal" => {
            let (Some(ask), Some(bid), Some(deal)) = (
                tags.get("ask").and_then(Value::as_object),
                tags.get("bid").and_then(Value::as_object),
                tags.get("deal").and_then(Value::as_object),
            ) else {
                return Vec::new();
            };

            let miner = str_tag(ask, "owner");
            let client = str_tag(bid, "owner");
            let data = deal
                .get("dataRef")
                .and_then(Value::as_object)
                .map(|data_ref| str_tag(data_ref, "/"))
                .unwrap_or_default();

            vec![
                VizEvent::MakeDeal {
                    from: client.clone(),
                    to: miner.clone(),
                    ask: Value::Object(ask.clone()),
                    bid: Value::Object(bid.clone()),
                    deal: Value::Object(deal.clone()),
                    price: val_tag(ask, "price"),
                    size: val_tag(bid, "size"),
                    data: data.clone(),
                },
                VizEvent::SendFile { from: client, to: miner, data },
            ]
        }

        "finishDeal" => {
            vec![VizEvent::FinishDeal { from: id.to_string(), deal: str_tag(tags, "deal") }]
        }

        "fetchData" => vec![VizEvent::SendPieces {
            from: id.to_string(),
            to: str_tag(tags, "peer"),
            data: str_tag(tags, "cid"),
        }],

        "minerCreateCmd" => {
            vec![VizEvent::CreateMiner { from: id.to_string(), miner: str_tag(tags, "miner") }]
        }

        "swarmConnectCmdTo" => {
            vec![VizEvent::Connected { from: id.to_string(), to: str_tag(tags, "peer") }]
        }

        "AddNewMessage" => match str_tag(tags, "method").as_str() {
            "addDeal" => {
                let (ask, bid, sig, data) = deal_params(tags.get("params"));
                vec![VizEvent::AddDeal { from: id.to_string(), ask, bid, sig, data }]
            }
            "sendMessage" => vec![VizEvent::SendPayment {
                from: str_tag(tags, "from"),
                to: str_tag(tags, "to"),
                value: val_tag(tags, "value"),
            }],
            _ => Vec::new(),
        },

        "HeartBeat" => vec![VizEvent::HeartBeat {
            from: id.to_string(),
            peers: val_tag(tags, "peers"),
            asks: val_tag(tags, "asks"),
            bids: val_tag(tags, "bids"),
            deals: val_tag(tags, "deals"),
            best_block: val_tag(tags, "bestBlock"),
            pending: val_tag(tags, "pending"),
            wallet_addrs: val_tag(tags, "walletAddrs"),
        }],

        _ => Vec::new(),
    }
}

/// Whether any tag subtree carries an `error` key.
fn has_error_tag(tags: &Value) -> bool {
    match tags {
        Value::Object(map) => map.contains_key("error") || map.values().any(has_error_tag),
        Value::Array(items) => items.iter().any(has_error_tag),
        _ => false,
    }
}

/// The `block` tag as `(miner, cid)`; daemons emit either a bare cid string
/// or a `{Miner, Cid}` object.
fn block_tag(tags: &Map<String, Value>) -> (String, String) {
    match tags.get("block") {
        Some(Value::Object(block)) => (str_tag(block, "Miner"), str_tag(block, "Cid")),
        Some(Value::String(cid)) => (String::new(), cid.clone()),
        _ => (String::new(), String::new()),
    }
}

/// The `addDeal` message parameters, either named or positional.
fn deal_params(params: Option<&Value>) -> (Value, Value, Value, String) {
    match params {
        Some(Value::Object(map)) => (
            val_tag(map, "ask"),
            val_tag(map, "bid"),
            val_tag(map, "sig"),
            str_tag(map, "data"),
        ),
        Some(Value::Array(items)) => (
            items.first().cloned().unwrap_or(Value::Null),
            items.get(1).cloned().unwrap_or(Value::Null),
            items.get(2).cloned().unwrap_or(Value::Null),
            items.get(3).and_then(Value::as_str).unwrap_or_default().to_string(),
        ),
        _ => (Value::Null, Value::Null, Value::Null, String::new()),
    }
}

fn str_tag(map: &Map<String, Value>, key: &str) -> String {
    map.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn val_tag(map: &Map<String, Value>, key: &str) -> Value {
    map.get(key).cloned().unwrap_or(Value::Null)
}
