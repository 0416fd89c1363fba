//! Shared helpers for the end-to-end tests: a server on an ephemeral
//! port, dialing clients, and event expectations.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use bounce_core::{Config, Event, Intent, Registry};

pub type ClientWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A grace window short enough to watch expire in a test.
pub fn test_config() -> Config {
    Config {
        reconnection_grace: Duration::from_millis(400),
        ..Config::default()
    }
}

/// Start a server on an ephemeral port; returns its address and the
/// registry for observing counts.
pub async fn start_server(config: Config) -> (SocketAddr, Registry) {
    let registry = Registry::new(config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = registry.clone();
    tokio::spawn(async move {
        let _ = bounce_server::serve(listener, serving).await;
    });
    (addr, registry)
}

/// Attach to a room, declaring an id and (when non-negative) a
/// resume-point.
pub async fn dial(addr: SocketAddr, room: &str, id: &str, lastnum: i64) -> ClientWs {
    let mut url = format!("ws://{addr}/g/{room}?id={id}");
    if lastnum >= 0 {
        url.push_str(&format!("&lastnum={lastnum}"));
    }
    let (ws, _) = connect_async(url).await.expect("dial failed");
    ws
}

pub async fn send_bytes(ws: &mut ClientWs, bytes: &[u8]) {
    ws.send(Message::binary(bytes.to_vec()))
        .await
        .expect("send failed");
}

/// Next event frame, skipping transport control frames.
pub async fn recv_event(ws: &mut ClientWs) -> Event {
    loop {
        let frame = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for an event")
            .expect("stream ended")
            .expect("read error");
        match frame {
            Message::Binary(data) => return Event::decode(&data).expect("bad envelope"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected an event frame, got {other:?}"),
        }
    }
}

/// Next event, asserting its intent.
pub async fn expect_intent(ws: &mut ClientWs, intent: Intent) -> Event {
    let event = recv_event(ws).await;
    assert_eq!(event.intent, intent, "unexpected event: {event:?}");
    event
}

/// Wait for the close frame, skipping anything benign on the way.
pub async fn expect_close(ws: &mut ClientWs) -> Option<CloseFrame> {
    loop {
        match timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for close")
        {
            Some(Ok(Message::Close(frame))) => return frame,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("expected close, got {other:?}"),
            Some(Err(_)) | None => return None,
        }
    }
}

/// Assert no event frame arrives within `window`.
pub async fn assert_quiet(ws: &mut ClientWs, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let Some(remaining) = deadline.checked_duration_since(tokio::time::Instant::now()) else {
            return;
        };
        match timeout(remaining, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            Ok(Some(Ok(Message::Binary(data)))) => {
                panic!("expected quiet, got {:?}", Event::decode(&data));
            }
            Ok(other) => panic!("expected quiet, got {other:?}"),
        }
    }
}
