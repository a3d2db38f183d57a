//! tests for the line-safe aggregator

use netsim::logs::LineAggregator;
use rand::Rng;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Writes `rounds` lines of `c`s, in erratic partial writes with tiny pauses
/// in between, then closes its end.
async fn write_erratically(mut writer: tokio::io::DuplexStream, c: u8, rounds: usize) {
    for _ in 0..rounds {
        let len = { rand::thread_rng().gen_range(3..24) };
        let line = vec![c; len];

        let mut written = 0;
        while written < len {
            let take = { rand::thread_rng().gen_range(1..=len - written) };
            writer.write_all(&line[written..written + take]).await.unwrap();
            written += take;
            let pause = { rand::thread_rng().gen_range(0..50) };
            tokio::time::sleep(Duration::from_micros(pause)).await;
        }
        writer.write_all(b"\n").await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn single_reader_passes_through() {
    let (aggregator, mut merged) = LineAggregator::new();

    let (mut writer, reader) = tokio::io::duplex(1024);
    aggregator.mix_reader(reader);
    writer.write_all(b"hello there!\n").await.unwrap();

    let line = merged.recv().await.unwrap();
    assert_eq!(&line[..], b"hello there!\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn merged_lines_are_never_interleaved() {
    const ROUNDS: usize = 50;

    let (aggregator, mut merged) = LineAggregator::new();

    for c in [b'a', b'b'] {
        let (writer, reader) = tokio::io::duplex(64);
        aggregator.mix_reader(reader);
        tokio::spawn(write_erratically(writer, c, ROUNDS));
    }

    let mut lines = Vec::with_capacity(2 * ROUNDS);
    while lines.len() < 2 * ROUNDS {
        lines.push(merged.recv().await.expect("stream ended early"));
    }

    let mut counts = [0usize; 2];
    for line in &lines {
        let (body, terminator) = line.split_at(line.len() - 1);
        assert_eq!(terminator, b"\n");
        assert!(!body.is_empty());

        let c = body[0];
        assert!(body.iter().all(|b| *b == c), "mixed line: {line:?}");
        counts[(c == b'b') as usize] += 1;
    }
    assert_eq!(counts, [ROUNDS, ROUNDS]);
}

#[tokio::test(flavor = "multi_thread")]
async fn merged_stream_ends_after_sources_and_aggregator_are_gone() {
    let (aggregator, mut merged) = LineAggregator::new();

    let (mut writer, reader) = tokio::io::duplex(64);
    aggregator.mix_reader(reader);
    writer.write_all(b"last words\n").await.unwrap();

    drop(writer);
    drop(aggregator);

    assert_eq!(&merged.recv().await.unwrap()[..], b"last words\n");
    assert!(merged.recv().await.is_none());
}
