// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Supervisor streams: reconnection, non-terminal errors, distinctness

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{sync::oneshot, time::timeout};

use modbus_link::{client, observe, prelude::*};

const UNIT: Slave = Slave(0x01);

fn test_options() -> TransportOptions {
    TransportOptions {
        response_timeout: Some(Duration::from_millis(200)),
        retries: 0,
        wait_to_retry: Duration::from_millis(10),
        ..TransportOptions::default()
    }
}

fn start_server(addr: SocketAddr, store: Arc<DataStore>) -> (SocketAddr, oneshot::Sender<()>) {
    let server = tcp::Server::bind(addr, UNIT).unwrap();
    let bound = server.local_addr().unwrap();
    let (shutdown, rx) = oneshot::channel::<()>();
    tokio::spawn(server.serve_until(
        StoreService::new(store),
        Box::pin(async move {
            rx.await.ok();
        }),
    ));
    (bound, shutdown)
}

fn supervisor(addr: SocketAddr) -> Supervisor {
    Supervisor::new(move || async move {
        client::tcp::connect_slave_with_options(addr, UNIT, test_options()).await
    })
    .with_check_interval(Duration::from_millis(50))
}

async fn next_emission<T>(stream: &mut observe::PollStream<T>) -> T {
    timeout(Duration::from_secs(5), stream.recv())
        .await
        .expect("stream emission")
        .expect("stream never terminates")
}

#[tokio::test]
async fn polling_survives_a_slave_restart() {
    let store = Arc::new(DataStore::with_bank_lens(100, 100, 100, 100));
    store.write_registers(0, &[42]).unwrap();

    let (addr, shutdown) = start_server("127.0.0.1:0".parse().unwrap(), Arc::clone(&store));

    let supervisor = supervisor(addr);
    let mut stream = supervisor.read_holding_registers(0, 1, Duration::from_millis(100));

    // Phase 1: the slave answers.
    let mut successes = 0;
    while successes < 3 {
        let emission = next_emission(&mut stream).await;
        assert_eq!(emission.unwrap(), vec![42]);
        successes += 1;
    }

    // Phase 2: the slave goes away; the stream emits errors but keeps
    // running.
    shutdown.send(()).ok();
    let mut saw_error = false;
    for _ in 0..50 {
        if next_emission(&mut stream).await.is_err() {
            saw_error = true;
            break;
        }
    }
    assert!(saw_error);

    // Phase 3: the slave returns on the same endpoint and the very
    // same stream recovers.
    store.write_registers(0, &[43]).unwrap();
    let (_, shutdown) = start_server(addr, Arc::clone(&store));

    let mut recovered = false;
    for _ in 0..50 {
        if let Ok(data) = next_emission(&mut stream).await {
            assert_eq!(data, vec![43]);
            recovered = true;
            break;
        }
    }
    assert!(recovered);

    shutdown.send(()).ok();
}

#[tokio::test]
async fn connection_events_track_transitions() {
    let store = Arc::new(DataStore::new());
    let (addr, shutdown) = start_server("127.0.0.1:0".parse().unwrap(), Arc::clone(&store));

    let supervisor = supervisor(addr);
    let mut events = supervisor.connection_events();

    let event = next_emission(&mut events).await;
    assert!(matches!(event, observe::ConnectionEvent::Connected));

    shutdown.send(()).ok();
    let event = next_emission(&mut events).await;
    assert!(matches!(event, observe::ConnectionEvent::Disconnected(_)));

    let (_, shutdown) = start_server(addr, store);
    let event = next_emission(&mut events).await;
    assert!(matches!(event, observe::ConnectionEvent::Connected));

    shutdown.send(()).ok();
}

#[tokio::test]
async fn write_stream_applies_every_payload() {
    let store = Arc::new(DataStore::with_bank_lens(100, 100, 100, 100));
    let (addr, _shutdown) = start_server("127.0.0.1:0".parse().unwrap(), Arc::clone(&store));

    let supervisor = supervisor(addr);
    let payloads = futures::stream::iter(vec![vec![1u16, 2], vec![3, 4]]);
    let mut stream = supervisor.write_registers(10, payloads);

    assert!(next_emission(&mut stream).await.is_ok());
    assert!(next_emission(&mut stream).await.is_ok());

    assert_eq!(store.read_holding_registers(10, 2).unwrap(), vec![3, 4]);
}

#[tokio::test]
async fn observers_emit_only_on_change() {
    let store = Arc::new(DataStore::with_bank_lens(100, 100, 100, 100));
    store.write_coils(0, &[false, false]).unwrap();

    let observer = StoreObserver::new(Arc::clone(&store));
    let mut stream = observer.observe_coils(0, 2, Duration::from_millis(10));

    assert_eq!(
        next_emission(&mut stream).await,
        vec![false, false]
    );

    // Unchanged content stays silent.
    assert!(
        timeout(Duration::from_millis(60), stream.recv())
            .await
            .is_err()
    );

    store.write_coils(1, &[true]).unwrap();
    assert_eq!(next_emission(&mut stream).await, vec![false, true]);

    // Writing identical values does not re-emit.
    store.write_coils(1, &[true]).unwrap();
    assert!(
        timeout(Duration::from_millis(60), stream.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn dropping_the_stream_cancels_polling() {
    let store = Arc::new(DataStore::with_bank_lens(100, 100, 100, 100));
    let (addr, _shutdown) = start_server("127.0.0.1:0".parse().unwrap(), Arc::clone(&store));

    let supervisor = supervisor(addr);
    let mut read_events = store.on_read();
    let stream = supervisor.read_holding_registers(0, 1, Duration::from_millis(20));

    // Polling is active.
    assert!(
        timeout(Duration::from_secs(2), read_events.recv())
            .await
            .is_ok()
    );

    drop(stream);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Drain anything that was in flight, then expect silence.
    while read_events.try_recv().is_ok() {}
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(read_events.try_recv().is_err());
}
