//! Session: the bridge between one untrusted transport and its room.
//!
//! A session runs two tasks, mirroring the two directions of the
//! transport:
//!
//! - the **reader** turns inbound frames into `Peer` requests, enforces
//!   the inbound size cap, and converts any read failure (including the
//!   idle deadline) into a `LostConnection` notice;
//! - the **writer/driver** announces the join, awaits admission, drains
//!   the replay queue (live deliveries are appended to its tail so the
//!   peer sees one ordered stream), then multiplexes room ingress and
//!   the ping ticker, every write under a deadline.
//!
//! Transient transport errors are never retried: the session closes and
//! the peer may reconnect with `lastnum` to resume. Whatever the exit
//! path, the driver releases the room through the registry, which arms
//! the reconnection-grace timer.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::protocol::{ClientRef, Event};
use crate::queue::ReplayQueue;
use crate::registry::Registry;
use crate::room::{Admission, MemberHandle, RoomHandle};

/// How many room deliveries may queue ahead of the writer before the
/// room starts skipping direct pushes (retention still covers them).
/// Sized so only a session that has stopped draining hits the skip.
const INGRESS_CAPACITY: usize = 256;

/// Where a session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingAdmission,
    DrainingReplay,
    Live,
    ShuttingDown,
    Done,
    /// Terminal state reached from `AwaitingAdmission` on a BadLastnum
    /// reply; the session never joins the membership set.
    Rejected,
}

/// Control handle for a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tag: Uuid,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn tag(&self) -> Uuid {
        self.tag
    }

    /// Request orderly shutdown: the transport closes and the room is
    /// told the connection is gone.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Why the writer stopped.
enum WriteOutcome {
    /// The room closed our ingress (superseded, or timed out).
    RoomClosedUs,
    /// A write failed or overran its deadline.
    TransportFailed,
    /// `SessionHandle::cancel` was called.
    Cancelled,
}

/// One connected client, owning its transport.
pub struct Session<S> {
    client: ClientRef,
    stream: WebSocketStream<S>,
    room: RoomHandle,
    registry: Registry,
    config: Config,
    cancel: CancellationToken,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Announce the join, await admission, and begin I/O. The returned
    /// handle can cancel the session; dropping it detaches.
    pub fn start(
        client: ClientRef,
        stream: WebSocketStream<S>,
        room: RoomHandle,
        registry: Registry,
        config: Config,
    ) -> SessionHandle {
        let cancel = CancellationToken::new();
        let handle = SessionHandle {
            tag: client.tag,
            cancel: cancel.clone(),
        };
        let session = Session {
            client,
            stream,
            room,
            registry,
            config,
            cancel,
        };
        tokio::spawn(session.run());
        handle
    }

    async fn run(mut self) {
        let tag = self.client.tag;
        let id = self.client.id.clone();
        log::debug!("session {tag} ({id}): {:?}", SessionState::AwaitingAdmission);

        let (ingress_tx, mut ingress) = mpsc::channel(INGRESS_CAPACITY);
        let member = MemberHandle {
            tag,
            id: id.clone(),
            ingress: ingress_tx,
        };

        let admission = match self.room.join(member, self.client.last_num).await {
            Ok(admission) => admission,
            Err(_) => {
                log::warn!("session {tag} ({id}): room closed before admission");
                let _ = self.stream.close(None).await;
                self.registry.release(&self.room, tag).await;
                return;
            }
        };

        let replay = match admission {
            Admission::Granted(queue) => queue,
            Admission::Denied(event) => {
                log::debug!("session {tag} ({id}): {:?}", SessionState::Rejected);
                self.reject(event).await;
                self.registry.release(&self.room, tag).await;
                return;
            }
        };

        log::debug!(
            "session {tag} ({id}): {:?}, {} queued",
            SessionState::DrainingReplay,
            replay.len()
        );

        let (ws_tx, ws_rx) = self.stream.split();
        let reader = tokio::spawn(read_loop(
            ws_rx,
            self.room.clone(),
            tag,
            self.config.clone(),
            self.cancel.clone(),
        ));

        let outcome = write_loop(ws_tx, &mut ingress, replay, &self.config, &self.cancel, tag).await;

        log::debug!("session {tag} ({id}): {:?}", SessionState::ShuttingDown);
        self.cancel.cancel();
        match outcome {
            WriteOutcome::RoomClosedUs => {}
            WriteOutcome::TransportFailed | WriteOutcome::Cancelled => {
                let _ = self.room.lost_connection(tag).await;
            }
        }

        // The room closes our ingress once it has seen the loss; swallow
        // whatever it pushed in the meantime.
        while ingress.recv().await.is_some() {}
        let _ = reader.await;

        self.registry.release(&self.room, tag).await;
        log::debug!("session {tag} ({id}): {:?}", SessionState::Done);
    }

    /// BadLastnum path: one event to the peer, then a policy-violation
    /// close. The session never joined, so there is nothing to unwind.
    async fn reject(&mut self, event: Event) {
        if let Ok(bytes) = event.encode() {
            let _ = timeout(
                self.config.write_deadline,
                self.stream.send(Message::binary(bytes)),
            )
            .await;
        }
        let frame = CloseFrame {
            code: CloseCode::Policy,
            reason: "lastnum not available".into(),
        };
        let _ = timeout(self.config.write_deadline, self.stream.close(Some(frame))).await;
    }
}

/// Outbound half: replay queue first, then room ingress + pings.
async fn write_loop<S>(
    mut ws_tx: SplitSink<WebSocketStream<S>, Message>,
    ingress: &mut mpsc::Receiver<Event>,
    mut replay: ReplayQueue,
    config: &Config,
    cancel: &CancellationToken,
    tag: Uuid,
) -> WriteOutcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Drain the handoff. Deliveries that race the drain are moved to the
    // tail so replay order is preserved.
    loop {
        while let Ok(event) = ingress.try_recv() {
            replay.push(event);
        }
        let Some(event) = replay.pop() else { break };
        if write_event(&mut ws_tx, &event, config).await.is_err() {
            let _ = ws_tx.close().await;
            return WriteOutcome::TransportFailed;
        }
    }

    log::debug!("session {tag}: {:?}", SessionState::Live);
    let mut pinger = interval_at(
        Instant::now() + config.ping_interval,
        config.ping_interval,
    );
    pinger.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        tokio::select! {
            delivery = ingress.recv() => match delivery {
                Some(event) => {
                    if write_event(&mut ws_tx, &event, config).await.is_err() {
                        break WriteOutcome::TransportFailed;
                    }
                }
                None => break WriteOutcome::RoomClosedUs,
            },
            _ = pinger.tick() => {
                let ping = Message::Ping(Vec::new().into());
                match timeout(config.write_deadline, ws_tx.send(ping)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        log::warn!("session {tag}: ping write error: {e}");
                        break WriteOutcome::TransportFailed;
                    }
                    Err(_) => {
                        log::warn!("session {tag}: ping write deadline exceeded");
                        break WriteOutcome::TransportFailed;
                    }
                }
            },
            _ = cancel.cancelled() => break WriteOutcome::Cancelled,
        }
    };

    let _ = timeout(config.write_deadline, ws_tx.close()).await;
    outcome
}

async fn write_event<S>(
    ws_tx: &mut SplitSink<WebSocketStream<S>, Message>,
    event: &Event,
    config: &Config,
) -> Result<(), ()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let bytes = match event.encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            // An internal coding mistake, not a transport problem.
            log::error!("envelope encoding error: {e}");
            return Ok(());
        }
    };
    match timeout(config.write_deadline, ws_tx.send(Message::binary(bytes))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            log::warn!("write error: {e}");
            Err(())
        }
        Err(_) => {
            log::warn!("write deadline exceeded");
            Err(())
        }
    }
}

/// Inbound half: frames become `Peer` requests; any failure, idle
/// deadline, or oversize frame ends the connection.
async fn read_loop<S>(
    mut ws_rx: SplitStream<WebSocketStream<S>>,
    room: RoomHandle,
    tag: Uuid,
    config: Config,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let deadline = config.read_deadline();

    'read: loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break 'read,
            next = timeout(deadline, ws_rx.next()) => next,
        };

        // Any frame arrival, pongs included, resets the deadline simply
        // by reaching the next iteration.
        let frame = match next {
            Err(_) => {
                log::warn!("session {tag}: read deadline exceeded");
                break 'read;
            }
            Ok(None) => break 'read,
            Ok(Some(Err(e))) => {
                log::warn!("session {tag}: read error: {e}");
                break 'read;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let body: Vec<u8> = match frame {
            Message::Binary(data) => data.to_vec(),
            Message::Text(text) => text.as_bytes().to_vec(),
            Message::Close(_) => break 'read,
            // Control frames carry no payload for the room.
            _ => continue 'read,
        };

        if body.len() > config.max_message_bytes {
            log::warn!(
                "session {tag}: inbound message of {} bytes exceeds cap, closing",
                body.len()
            );
            break 'read;
        }

        if room.peer(tag, body).await.is_err() {
            break 'read;
        }
    }

    let _ = room.lost_connection(tag).await;
    cancel.cancel();
}
