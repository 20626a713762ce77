//! WebSocket server and client behaviour

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use leafnet::error::ProtocolError;
use leafnet::Payload;
use leafnet::transport::ws::{UpgradeRequest, WsAuth, WsClient, WsConn, WsServer};
use leafnet::transport::{Agent, Conn};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

struct Echo(Arc<WsConn>);

#[async_trait::async_trait]
impl Agent for Echo {
    async fn run(&self) {
        while let Ok(msg) = self.0.read_msg().await {
            if self.0.write_msg(&[msg]).is_err() {
                break;
            }
        }
    }

    async fn on_close(&self) {}
}

/// Greets with the auth user data and the resolved peer address
struct Describe(Arc<WsConn>);

#[async_trait::async_trait]
impl Agent for Describe {
    async fn run(&self) {
        let user = self
            .0
            .user_data()
            .and_then(|data| data.downcast_ref::<String>().cloned())
            .unwrap_or_default();
        let line = format!("{user}@{}", self.0.remote_addr().ip());
        let _ = self.0.write_msg(&[Bytes::from(line)]);
        while self.0.read_msg().await.is_ok() {}
    }

    async fn on_close(&self) {}
}

async fn start(server: WsServer) -> (WsServer, SocketAddr) {
    let mut server = server;
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();
    (server, addr)
}

async fn next_message<S>(ws: &mut S) -> Message
where
    S: futures::Stream<Item = Result<Message, WsError>> + Unpin,
{
    timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("message in time")
        .expect("stream open")
        .expect("valid frame")
}

#[tokio::test]
async fn test_binary_echo() {
    let (mut server, addr) =
        start(WsServer::new("127.0.0.1:0", |conn| Arc::new(Echo(conn)) as Arc<dyn Agent>)).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
    ws.send(Message::Binary(b"ping".to_vec())).await.unwrap();
    assert_eq!(next_message(&mut ws).await, Message::Binary(b"ping".to_vec()));

    // text frames are accepted inbound too
    ws.send(Message::Text("hi".into())).await.unwrap();
    assert_eq!(next_message(&mut ws).await, Message::Binary(b"hi".to_vec()));

    server.close().await;
}

#[tokio::test]
async fn test_text_format_outbound() {
    let server = WsServer::new("127.0.0.1:0", |conn| Arc::new(Echo(conn)) as Arc<dyn Agent>)
        .with_text_format(true);
    let (mut server, addr) = start(server).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
    ws.send(Message::Binary(b"{\"a\":1}".to_vec())).await.unwrap();
    assert_eq!(next_message(&mut ws).await, Message::Text("{\"a\":1}".into()));

    server.close().await;
}

#[tokio::test]
async fn test_auth_rejection_is_forbidden() {
    let auth: WsAuth = Arc::new(|req: &UpgradeRequest| -> Result<Option<Payload>, String> {
        match req.headers().get("x-token").and_then(|v| v.to_str().ok()) {
            Some("secret") => Ok(Some(Arc::new(String::from("alice")) as Payload)),
            _ => Err("bad token".to_string()),
        }
    });
    let server = WsServer::new("127.0.0.1:0", |conn| Arc::new(Describe(conn)) as Arc<dyn Agent>)
        .with_auth(auth);
    let (mut server, addr) = start(server).await;

    match tokio_tungstenite::connect_async(format!("ws://{addr}")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 403),
        other => panic!("expected 403, got {:?}", other.map(|(_, resp)| resp.status())),
    }
    assert_eq!(server.conn_count(), 0);

    let mut req = format!("ws://{addr}").into_client_request().unwrap();
    req.headers_mut().insert("x-token", "secret".parse().unwrap());
    req.headers_mut()
        .insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
    let (mut ws, _) = tokio_tungstenite::connect_async(req).await.unwrap();
    assert_eq!(
        next_message(&mut ws).await,
        Message::Binary(b"alice@203.0.113.9".to_vec())
    );

    server.close().await;
}

#[tokio::test]
async fn test_write_outside_length_window() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let server = WsServer::new("127.0.0.1:0", move |conn: Arc<WsConn>| {
        let too_long = conn.write_msg(&[Bytes::from(vec![0u8; 9])]);
        let too_short = conn.write_msg(&[]);
        let _ = tx.send((too_long, too_short));
        Arc::new(Echo(conn)) as Arc<dyn Agent>
    })
    .with_max_msg_len(8);
    let (mut server, addr) = start(server).await;

    let (_ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
    let (too_long, too_short) = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert!(matches!(too_long, Err(ProtocolError::MessageTooLong(9))));
    assert!(matches!(too_short, Err(ProtocolError::MessageTooShort(0))));

    server.close().await;
}

#[tokio::test]
async fn test_client_against_server() {
    let (mut server, addr) =
        start(WsServer::new("127.0.0.1:0", |conn| Arc::new(Echo(conn)) as Arc<dyn Agent>)).await;

    struct Probe {
        conn: Arc<WsConn>,
        tx: mpsc::UnboundedSender<Bytes>,
    }

    #[async_trait::async_trait]
    impl Agent for Probe {
        async fn run(&self) {
            let _ = self.conn.write_msg(&[Bytes::from_static(b"marco")]);
            if let Ok(msg) = self.conn.read_msg().await {
                let _ = self.tx.send(msg);
            }
        }

        async fn on_close(&self) {}
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut client = WsClient::new(format!("ws://{addr}"), move |conn| {
        Arc::new(Probe { conn, tx: tx.clone() }) as Arc<dyn Agent>
    });
    client.start().unwrap();

    let reply = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(reply, Bytes::from_static(b"marco"));

    client.close().await;
    server.close().await;
}
