//! tests for the per-node log translation pipeline

use netsim::logs::NodeLogger;
use netsim_core::{Role, VizEvent};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

fn pipeline() -> (DuplexStream, tokio::io::Lines<BufReader<DuplexStream>>, NodeLogger) {
    let (tail_writer, tail) = tokio::io::duplex(8 * 1024);
    let (logger, translated) = NodeLogger::new("node0".to_string(), tail);
    (tail_writer, BufReader::new(translated).lines(), logger)
}

async fn next_event(lines: &mut tokio::io::Lines<BufReader<DuplexStream>>) -> Value {
    let line = lines.next_line().await.unwrap().expect("stream ended");
    serde_json::from_str(&line).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn records_fan_out_in_order() {
    let (mut tail, mut events, _logger) = pipeline();

    let record = json!({
        "Operation": "AddNewBlock",
        "Tags": {"block": {"Miner": "m1", "Cid": "c1"}}
    });
    tail.write_all(format!("{record}\n").as_bytes()).await.unwrap();

    let mined = next_event(&mut events).await;
    assert_eq!(mined["type"], "NewBlockMined");
    assert_eq!(mined["from"], "m1");
    assert_eq!(mined["to"], "all");
    assert_eq!(mined["block"], "c1");
    assert!(mined["reward"].is_string());

    let broadcast = next_event(&mut events).await;
    assert_eq!(broadcast["type"], "BroadcastBlock");
    assert_eq!(broadcast["block"], "c1");
}

#[tokio::test(flavor = "multi_thread")]
async fn bad_lines_and_dropped_records_do_not_stall_the_stream() {
    let (mut tail, mut events, _logger) = pipeline();

    // not json, unknown operation, an errored record, then a good one
    tail.write_all(b"not json at all\n").await.unwrap();
    tail.write_all(b"{\"Operation\":\"whoKnows\",\"Tags\":{}}\n").await.unwrap();
    tail.write_all(
        b"{\"Operation\":\"AddNewBlock\",\"Tags\":{\"block\":\"c0\",\"error\":\"nope\"}}\n",
    )
    .await
    .unwrap();
    tail.write_all(b"{\"Operation\":\"swarmConnectCmdTo\",\"Tags\":{\"peer\":\"p9\"}}\n")
        .await
        .unwrap();

    let event = next_event(&mut events).await;
    assert_eq!(event["type"], "Connected");
    assert_eq!(event["from"], "node0");
    assert_eq!(event["to"], "p9");
}

#[tokio::test(flavor = "multi_thread")]
async fn injected_events_share_the_stream() {
    let (mut tail, mut events, logger) = pipeline();

    logger.write_event(&VizEvent::churn("w0", Role::Client, true)).await.unwrap();
    let event = next_event(&mut events).await;
    assert_eq!(event["type"], "ClientJoins");
    assert_eq!(event["from"], "w0");

    let record = json!({"Operation": "ProcessNewBlock", "Tags": {"block": "c7"}});
    tail.write_all(format!("{record}\n").as_bytes()).await.unwrap();
    let event = next_event(&mut events).await;
    assert_eq!(event["type"], "SawBlock");
    assert_eq!(event["block"], "c7");
}

#[tokio::test(flavor = "multi_thread")]
async fn the_stream_ends_once_daemon_and_logger_are_gone() {
    let (tail, mut events, logger) = pipeline();

    // the write side stays open while either the daemon tail or the logger
    // could still produce lines
    drop(tail);
    drop(logger);

    let line = events.next_line().await.unwrap();
    assert_eq!(line, None);
}
