//! UDP server, clients and broadcast over loopback

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use leafnet::core::merge_bytes;
use leafnet::error::ProtocolError;
use leafnet::protocol::{MsgProcessor, Processor};
use leafnet::transport::udp::{
    AsyncClientOptions, BroadcastClient, UdpAsyncClient, UdpClient, UdpContext, UdpServer,
};
use leafnet::utils::metrics::global_metrics;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ping {
    seq: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Pong {
    seq: u32,
}

fn base_processor() -> MsgProcessor {
    let mut processor = MsgProcessor::new();
    processor.register::<Ping>(1).unwrap();
    processor.register::<Pong>(2).unwrap();
    processor
}

/// Server that answers every `Ping` with a `Pong` of the same sequence
async fn pong_server() -> UdpServer {
    let mut processor = base_processor();
    processor
        .set_handler::<Ping, _>(|ping, ctx| {
            if let Some(ctx) = ctx.downcast_ref::<UdpContext>() {
                ctx.reply(&Pong { seq: ping.seq }).unwrap();
            }
        })
        .unwrap();

    let mut server = UdpServer::new("127.0.0.1:0", Arc::new(processor));
    server.start().await.unwrap();
    server
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn dropped_packets() -> u64 {
    global_metrics().packets_dropped.load(Ordering::SeqCst)
}

/// Handler body that counts a call, then blocks until `release` is dropped
fn stall(handled: &AtomicUsize, release: &Mutex<std::sync::mpsc::Receiver<()>>) {
    handled.fetch_add(1, Ordering::SeqCst);
    let _ = release.lock().unwrap().recv_timeout(Duration::from_secs(5));
}

#[tokio::test]
async fn test_request_reply() {
    let mut server = pong_server().await;
    let addr = server.local_addr().unwrap();

    let client = UdpClient::connect(&addr.to_string()).await.unwrap();
    let processor = base_processor();
    let reply = client
        .request_msg(&processor, &Ping { seq: 42 }, Some(Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(reply.id(), 2);
    assert_eq!(reply.downcast_ref::<Pong>(), Some(&Pong { seq: 42 }));

    server.close().await;
}

#[tokio::test]
async fn test_request_times_out_without_reply() {
    // a bound socket that never answers
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client = UdpClient::connect(&silent.local_addr().unwrap().to_string())
        .await
        .unwrap();

    let result = client.request(b"anyone?", Some(Duration::from_millis(100))).await;
    assert!(matches!(result, Err(ProtocolError::Timeout)));
}

#[tokio::test]
async fn test_async_client_exchange() {
    let mut server = pong_server().await;
    let addr = server.local_addr().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut processor = base_processor();
    processor
        .set_handler::<Pong, _>(move |pong, ctx| {
            assert!(ctx.downcast_ref::<UdpAsyncClient>().is_some());
            let _ = tx.send(pong.seq);
        })
        .unwrap();

    let client = UdpAsyncClient::new(addr.to_string(), Arc::new(processor), AsyncClientOptions::default());
    assert!(matches!(client.write_msg(&Ping { seq: 0 }), Err(ProtocolError::ClientClosed)));

    client.start().await.unwrap();
    assert!(matches!(client.start().await, Err(ProtocolError::AlreadyStarted)));
    assert!(client.local_addr().is_some());

    for seq in 1..=3 {
        client.write_msg(&Ping { seq }).unwrap();
    }
    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap());
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 2, 3]);

    client.close_and_wait().await;
    assert!(client.is_closed());
    assert!(matches!(client.write_msg(&Ping { seq: 9 }), Err(ProtocolError::ClientClosed)));
    server.close().await;
}

#[tokio::test]
async fn test_async_client_unresolvable_addr() {
    let client = UdpAsyncClient::new(
        "no-such-host.invalid:1",
        Arc::new(base_processor()),
        AsyncClientOptions::default(),
    );
    assert!(matches!(client.start().await, Err(ProtocolError::InitError(_))));
}

#[tokio::test]
async fn test_broadcast_collects_replies() {
    let mut server = pong_server().await;
    let port = server.local_addr().unwrap().port();

    let processor = base_processor();
    let request = merge_bytes(&processor.marshal(&Ping { seq: 7 }).unwrap());

    let broadcaster = BroadcastClient::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    let mut replies = Vec::new();
    let count = broadcaster
        .broad(&request, Duration::from_millis(300), |data, from| {
            replies.push((data.to_vec(), from));
        })
        .await
        .unwrap();

    assert_eq!(count, 1);
    let reply = processor.unmarshal(replies[0].0.clone().into()).unwrap();
    assert_eq!(reply.downcast_ref::<Pong>(), Some(&Pong { seq: 7 }));
    assert_eq!(replies[0].1.port(), port);

    server.close().await;
}

#[tokio::test]
async fn test_server_write_after_close() {
    let mut server = pong_server().await;
    let handle = server.handle().unwrap();
    let target = handle.local_addr();
    server.close().await;

    assert!(handle.write_msg(&Pong { seq: 1 }, target).is_err());
}

#[tokio::test]
async fn test_close_and_wait_unstarted_client() {
    let client = UdpAsyncClient::new("127.0.0.1:1", Arc::new(base_processor()), AsyncClientOptions::default());

    timeout(Duration::from_secs(2), client.close_and_wait())
        .await
        .expect("close_and_wait on an unstarted client");
    assert!(!client.is_closed());
}

#[tokio::test]
async fn test_close_and_wait_after_failed_start() {
    let client = UdpAsyncClient::new(
        "no-such-host.invalid:1",
        Arc::new(base_processor()),
        AsyncClientOptions::default(),
    );
    assert!(matches!(client.start().await, Err(ProtocolError::InitError(_))));

    timeout(Duration::from_secs(2), client.close_and_wait())
        .await
        .expect("close_and_wait after a failed dial");
}

#[tokio::test]
async fn test_server_write_queue_full() {
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target = peer.local_addr().unwrap();

    let mut server = UdpServer::new("127.0.0.1:0", Arc::new(base_processor())).with_buffer_size(1);
    let handle = server.start().await.unwrap();

    // the write task has not run yet, so the single slot stays taken
    handle.write_msg(&Pong { seq: 1 }, target).unwrap();
    assert!(matches!(
        handle.write_msg(&Pong { seq: 2 }, target),
        Err(ProtocolError::ChannelFull)
    ));

    let mut buf = [0u8; 64];
    let (n, from) = timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from, handle.local_addr());
    let reply = base_processor().unmarshal(Bytes::copy_from_slice(&buf[..n])).unwrap();
    assert_eq!(reply.downcast_ref::<Pong>(), Some(&Pong { seq: 1 }));

    // drained, so the queue accepts again
    handle.write_msg(&Pong { seq: 3 }, target).unwrap();
    server.close().await;
}

#[tokio::test]
async fn test_async_client_write_queue_full() {
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let opts = AsyncClientOptions {
        buffer_size: 1,
        ..AsyncClientOptions::default()
    };
    let client = UdpAsyncClient::new(peer.local_addr().unwrap().to_string(), Arc::new(base_processor()), opts);
    client.start().await.unwrap();

    client.write_msg(&Ping { seq: 1 }).unwrap();
    assert!(matches!(client.write_msg(&Ping { seq: 2 }), Err(ProtocolError::ChannelFull)));

    let mut buf = [0u8; 64];
    let (n, _) = timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let sent = base_processor().unmarshal(Bytes::copy_from_slice(&buf[..n])).unwrap();
    assert_eq!(sent.downcast_ref::<Ping>(), Some(&Ping { seq: 1 }));

    client.close_and_wait().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial_test::serial]
async fn test_server_drops_packets_when_read_queue_full() {
    let handled = Arc::new(AtomicUsize::new(0));
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let release_rx = Arc::new(Mutex::new(release_rx));

    let mut processor = base_processor();
    let counter = handled.clone();
    processor
        .set_handler::<Ping, _>(move |_ping, _ctx| stall(&counter, &release_rx))
        .unwrap();
    let mut server = UdpServer::new("127.0.0.1:0", Arc::new(processor)).with_buffer_size(1);
    let addr = server.start().await.unwrap().local_addr();

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let ping = merge_bytes(&base_processor().marshal(&Ping { seq: 1 }).unwrap());
    let dropped_before = dropped_packets();

    sender.send_to(&ping, addr).await.unwrap();
    wait_for(|| handled.load(Ordering::SeqCst) == 1).await;

    // dispatch is stuck: one packet fits the queue, the rest are dropped
    for _ in 0..8 {
        sender.send_to(&ping, addr).await.unwrap();
    }
    wait_for(|| dropped_packets() >= dropped_before + 7).await;

    drop(release_tx);
    wait_for(|| handled.load(Ordering::SeqCst) == 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handled.load(Ordering::SeqCst), 2);

    server.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial_test::serial]
async fn test_async_client_drops_packets_when_read_queue_full() {
    let handled = Arc::new(AtomicUsize::new(0));
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let release_rx = Arc::new(Mutex::new(release_rx));

    let mut processor = base_processor();
    let counter = handled.clone();
    processor
        .set_handler::<Pong, _>(move |_pong, _ctx| stall(&counter, &release_rx))
        .unwrap();

    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let opts = AsyncClientOptions {
        buffer_size: 1,
        ..AsyncClientOptions::default()
    };
    let client = UdpAsyncClient::new(peer.local_addr().unwrap().to_string(), Arc::new(processor), opts);
    client.start().await.unwrap();
    let client_addr = client.local_addr().unwrap();

    let pong = merge_bytes(&base_processor().marshal(&Pong { seq: 1 }).unwrap());
    let dropped_before = dropped_packets();

    peer.send_to(&pong, client_addr).await.unwrap();
    wait_for(|| handled.load(Ordering::SeqCst) == 1).await;

    for _ in 0..8 {
        peer.send_to(&pong, client_addr).await.unwrap();
    }
    wait_for(|| dropped_packets() >= dropped_before + 7).await;

    drop(release_tx);
    wait_for(|| handled.load(Ordering::SeqCst) == 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handled.load(Ordering::SeqCst), 2);

    client.close_and_wait().await;
}

#[tokio::test]
async fn test_server_skips_undecodable_packets() {
    let mut server = pong_server().await;
    let addr = server.local_addr().unwrap();
    let errors_before = global_metrics().protocol_errors.load(Ordering::SeqCst);

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(addr).await.unwrap();
    // shorter than an id, an unregistered id, then a Ping id with a truncated body
    socket.send(&[0x01]).await.unwrap();
    socket.send(&[0xff, 0xff, 0x00]).await.unwrap();
    let mut truncated = merge_bytes(&base_processor().marshal(&Ping { seq: 9 }).unwrap()).to_vec();
    truncated.truncate(3);
    socket.send(&truncated).await.unwrap();

    let ping = merge_bytes(&base_processor().marshal(&Ping { seq: 5 }).unwrap());
    socket.send(&ping).await.unwrap();

    let mut buf = [0u8; 64];
    let n = timeout(Duration::from_secs(2), socket.recv(&mut buf)).await.unwrap().unwrap();
    let reply = base_processor().unmarshal(Bytes::copy_from_slice(&buf[..n])).unwrap();
    assert_eq!(reply.downcast_ref::<Pong>(), Some(&Pong { seq: 5 }));
    assert!(global_metrics().protocol_errors.load(Ordering::SeqCst) >= errors_before + 3);

    server.close().await;
}
