// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TCP master/slave round trips over a loopback socket

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{sync::oneshot, time::timeout};

use modbus_link::{prelude::*, ExceptionCode};

const UNIT: Slave = Slave(0x01);

fn test_options() -> TransportOptions {
    TransportOptions {
        response_timeout: Some(Duration::from_millis(500)),
        retries: 0,
        wait_to_retry: Duration::from_millis(10),
        ..TransportOptions::default()
    }
}

struct TestServer {
    addr: SocketAddr,
    store: Arc<DataStore>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn start() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        // A deliberately small holding bank so out-of-extent reads can
        // be provoked.
        let store = Arc::new(DataStore::with_bank_lens(100, 100, 10, 100));
        let server = tcp::Server::bind("127.0.0.1:0".parse().unwrap(), UNIT).unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown, rx) = oneshot::channel::<()>();
        let service = StoreService::new(Arc::clone(&store));
        tokio::spawn(server.serve_until(
            service,
            Box::pin(async move {
                rx.await.ok();
            }),
        ));
        Self {
            addr,
            store,
            shutdown: Some(shutdown),
        }
    }

    fn shut_down(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
    }
}

async fn connect(server: &TestServer) -> modbus_link::client::Context {
    tcp::connect_slave_with_options(server.addr, UNIT, test_options())
        .await
        .unwrap()
}

#[tokio::test]
async fn read_holding_registers_round_trip() {
    let server = TestServer::start().await;
    server.store.write_registers(0, &[1, 2, 3, 4, 5, 6]).unwrap();

    let mut ctx = connect(&server).await;
    let data = ctx.read_holding_registers(0, 3).await.unwrap();
    assert_eq!(data, vec![1, 2, 3]);

    let data = ctx.read_holding_registers(3, 3).await.unwrap();
    assert_eq!(data, vec![4, 5, 6]);
}

#[tokio::test]
async fn out_of_extent_read_yields_slave_exception() {
    let server = TestServer::start().await;

    let mut ctx = connect(&server).await;
    let err = ctx.read_holding_registers(100, 1).await.unwrap_err();
    match err {
        Error::Exception(ex) => {
            assert_eq!(ex.slave, UNIT.0);
            assert_eq!(ex.function, 0x03);
            assert_eq!(ex.exception, ExceptionCode::IllegalDataAddress);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn write_and_read_back() {
    let server = TestServer::start().await;
    let mut ctx = connect(&server).await;

    ctx.write_single_register(2, 0xABCD).await.unwrap();
    ctx.write_multiple_registers(3, &[7, 8]).await.unwrap();
    assert_eq!(
        ctx.read_holding_registers(2, 3).await.unwrap(),
        vec![0xABCD, 7, 8]
    );

    ctx.write_single_coil(5, true).await.unwrap();
    ctx.write_multiple_coils(6, &[true, false, true]).await.unwrap();
    assert_eq!(
        ctx.read_coils(5, 4).await.unwrap(),
        vec![true, true, false, true]
    );
}

#[tokio::test]
async fn read_write_multiple_registers() {
    let server = TestServer::start().await;
    server.store.write_registers(0, &[1, 2, 3]).unwrap();

    let mut ctx = connect(&server).await;
    let read = ctx
        .read_write_multiple_registers(0, 3, 1, &[9])
        .await
        .unwrap();
    assert_eq!(read, vec![1, 9, 3]);
}

#[tokio::test]
async fn diagnostics_echo() {
    let server = TestServer::start().await;
    let mut ctx = connect(&server).await;
    assert!(ctx.return_query_data(0x0032).await.unwrap());
}

#[tokio::test]
async fn input_banks_are_read_only_snapshots_of_the_store() {
    let server = TestServer::start().await;
    server.store.write_input_registers(0, &[11, 22]).unwrap();
    server.store.write_discrete_inputs(0, &[true, false, true]).unwrap();

    let mut ctx = connect(&server).await;
    assert_eq!(ctx.read_input_registers(0, 2).await.unwrap(), vec![11, 22]);
    assert_eq!(
        ctx.read_discrete_inputs(0, 3).await.unwrap(),
        vec![true, false, true]
    );
}

#[tokio::test]
async fn server_emits_connection_lifecycle_events() {
    let store = Arc::new(DataStore::new());
    let server = tcp::Server::bind("127.0.0.1:0".parse().unwrap(), UNIT).unwrap();
    let addr = server.local_addr().unwrap();
    let mut events = server.events();
    let (shutdown, rx) = oneshot::channel::<()>();
    tokio::spawn(server.serve_until(
        StoreService::new(store),
        Box::pin(async move {
            rx.await.ok();
        }),
    ));

    let ctx = tcp::connect_slave_with_options(addr, UNIT, test_options())
        .await
        .unwrap();

    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    let tcp::ServerEvent::Connected(peer) = event else {
        panic!("expected a connect event");
    };

    drop(ctx);

    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, tcp::ServerEvent::Disconnected(peer));

    shutdown.send(()).ok();
}

#[tokio::test]
async fn shutdown_disconnects_masters() {
    let mut server = TestServer::start().await;
    let mut ctx = connect(&server).await;

    assert!(ctx.read_coils(0, 1).await.is_ok());

    server.shut_down();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let result = ctx.read_coils(0, 1).await;
    assert!(result.is_err());
}

#[test]
fn sync_client_round_trip() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = runtime.block_on(TestServer::start());
    server.store.write_registers(0, &[10, 20, 30]).unwrap();

    let mut ctx = sync::tcp::connect_slave_with_options(server.addr, UNIT, test_options()).unwrap();
    ctx.set_timeout(Duration::from_secs(2));
    assert_eq!(ctx.read_holding_registers(0, 3).unwrap(), vec![10, 20, 30]);
    ctx.write_single_register(1, 99).unwrap();
    assert_eq!(ctx.read_holding_registers(0, 3).unwrap(), vec![10, 99, 30]);
    assert!(ctx.return_query_data(0x1234).unwrap());
}
