//! The acceptor: TCP in, attached session out.
//!
//! Each connection is routed on its request path: `/` answers the
//! liveness page, `/g/<room>` upgrades to a WebSocket and attaches a
//! session to the named room, anything else is a 404. Attachment
//! parameters ride the query string: `id` (assigned fresh when absent)
//! and `lastnum` (absent or garbage means no resume-point).

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use uuid::Uuid;

use bounce_core::{ClientRef, Registry, Session, NO_LASTNUM};

use crate::http::{self, RequestHead};

/// Routing prefix for room attachments; the room name is the full path.
const ROOM_PREFIX: &str = "/g/";

type ConnectionError = Box<dyn std::error::Error + Send + Sync>;

/// Accept connections forever, one spawned handler per connection.
pub async fn serve(listener: TcpListener, registry: Registry) -> std::io::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, registry).await {
                log::debug!("connection from {addr} ended: {e}");
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    registry: Registry,
) -> Result<(), ConnectionError> {
    let (head, consumed) = http::read_head(&mut stream).await?;
    log::debug!("{} {} from {addr}", head.method, head.path);

    if !head.path.starts_with(ROOM_PREFIX) {
        return Ok(http::respond_plain(stream, &head).await?);
    }

    let client = attachment(&head);
    let rewound = http::Rewind::new(consumed, stream);
    let mut ws = tokio_tungstenite::accept_async(rewound).await?;

    let room = match registry.acquire(&head.path).await {
        Ok(room) => room,
        Err(e) => {
            // The peer gets the diagnostic in the close frame and never
            // attaches.
            log::warn!("rejected client on {}: {e}", head.path);
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: e.to_string().into(),
            };
            let _ = ws.close(Some(frame)).await;
            return Ok(());
        }
    };

    log::info!(
        "client {} ({}) attached to {} with lastnum {}",
        client.id,
        client.tag,
        head.path,
        client.last_num
    );
    let config = registry.config().clone();
    Session::start(client, ws, room, registry, config);
    Ok(())
}

/// Build the client ref from the query string: `id` or a fresh UUID,
/// `lastnum` or the no-history sentinel.
fn attachment(head: &RequestHead) -> ClientRef {
    let mut id: Option<String> = None;
    let mut last_num = NO_LASTNUM;

    if let Some(query) = head.query.as_deref() {
        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "id" if !value.is_empty() => id = Some(value.to_string()),
                "lastnum" => {
                    last_num = value.parse().unwrap_or_else(|_| {
                        log::warn!("lastnum not an integer: {value:?}");
                        NO_LASTNUM
                    });
                }
                _ => {}
            }
        }
    }

    ClientRef::new(
        id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        last_num,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(query: Option<&str>) -> RequestHead {
        RequestHead {
            method: "GET".into(),
            path: "/g/demo".into(),
            query: query.map(String::from),
        }
    }

    #[test]
    fn test_attachment_with_id_and_lastnum() {
        let client = attachment(&head(Some("id=CL1&lastnum=7")));
        assert_eq!(client.id, "CL1");
        assert_eq!(client.last_num, 7);
    }

    #[test]
    fn test_attachment_assigns_missing_id() {
        let client = attachment(&head(None));
        assert!(!client.id.is_empty());
        assert_eq!(client.last_num, NO_LASTNUM);
    }

    #[test]
    fn test_attachment_garbage_lastnum_means_no_history() {
        let client = attachment(&head(Some("id=CL1&lastnum=banana")));
        assert_eq!(client.last_num, NO_LASTNUM);
    }

    #[test]
    fn test_attachment_empty_id_is_replaced() {
        let client = attachment(&head(Some("id=&lastnum=3")));
        assert!(!client.id.is_empty());
        assert_ne!(client.id, "");
        assert_eq!(client.last_num, 3);
    }

    #[test]
    fn test_attachment_ignores_unknown_params() {
        let client = attachment(&head(Some("foo=bar&id=CL2")));
        assert_eq!(client.id, "CL2");
    }
}
