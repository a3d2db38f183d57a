//! tests for the event stream fan-out

use bytes::Bytes;
use netsim::{logs::LogBroadcaster, shutdown};
use tokio::sync::mpsc;

#[tokio::test(flavor = "multi_thread")]
async fn viewers_of_an_empty_stream_observe_nothing() {
    let (_source_tx, source) = mpsc::channel::<Bytes>(8);
    let (signal, on_shutdown) = shutdown::signal();
    let (broadcaster, handle) = LogBroadcaster::new(source, 8, on_shutdown);
    let driver = tokio::spawn(broadcaster.run());

    let mut v1 = handle.subscribe();
    let mut v2 = handle.subscribe();

    signal.fire().unwrap();
    driver.await.unwrap();

    // both viewers observe zero bytes and a clean end of stream
    assert!(v1.recv().await.is_none());
    assert!(v2.recv().await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn late_joiners_get_the_history_replayed() {
    let (source_tx, source) = mpsc::channel::<Bytes>(8);
    let (_signal, on_shutdown) = shutdown::signal();
    let (broadcaster, handle) = LogBroadcaster::new(source, 2, on_shutdown);
    let driver = tokio::spawn(broadcaster.run());

    // v1 joins before any input
    let mut v1 = handle.subscribe();

    source_tx.send(Bytes::from_static(b"A\n")).await.unwrap();
    source_tx.send(Bytes::from_static(b"B\n")).await.unwrap();

    assert_eq!(&v1.recv().await.unwrap()[..], b"A\n");
    assert_eq!(&v1.recv().await.unwrap()[..], b"B\n");

    // v2 joins after both chunks went out and sees the same bytes, replayed
    let mut v2 = handle.subscribe();
    assert_eq!(&v2.recv().await.unwrap()[..], b"A\n");
    assert_eq!(&v2.recv().await.unwrap()[..], b"B\n");

    // input drying up ends every viewer's stream
    drop(source_tx);
    driver.await.unwrap();
    assert!(v1.recv().await.is_none());
    assert!(v2.recv().await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn the_history_is_bounded_by_its_capacity() {
    let (source_tx, source) = mpsc::channel::<Bytes>(8);
    let (_signal, on_shutdown) = shutdown::signal();
    let (broadcaster, handle) = LogBroadcaster::new(source, 2, on_shutdown);
    let driver = tokio::spawn(broadcaster.run());

    // an early viewer forces each chunk through the loop before the next
    let mut witness = handle.subscribe();
    for chunk in [b"1\n", b"2\n", b"3\n"] {
        source_tx.send(Bytes::from_static(chunk)).await.unwrap();
        witness.recv().await.unwrap();
    }

    // only the last two chunks survive for a late joiner
    let mut late = handle.subscribe();
    assert_eq!(&late.recv().await.unwrap()[..], b"2\n");
    assert_eq!(&late.recv().await.unwrap()[..], b"3\n");

    drop(source_tx);
    driver.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn a_dead_viewer_does_not_disturb_the_others() {
    let (source_tx, source) = mpsc::channel::<Bytes>(8);
    let (_signal, on_shutdown) = shutdown::signal();
    let (broadcaster, handle) = LogBroadcaster::new(source, 8, on_shutdown);
    let driver = tokio::spawn(broadcaster.run());

    // this one dies right away
    drop(handle.subscribe());
    let mut survivor = handle.subscribe();

    for chunk in [b"x\n", b"y\n"] {
        source_tx.send(Bytes::from_static(chunk)).await.unwrap();
    }

    assert_eq!(&survivor.recv().await.unwrap()[..], b"x\n");
    assert_eq!(&survivor.recv().await.unwrap()[..], b"y\n");

    drop(source_tx);
    driver.await.unwrap();
    assert!(survivor.recv().await.is_none());
}
