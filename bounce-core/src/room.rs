//! Room: the single-writer event loop behind one broadcast domain.
//!
//! Architecture:
//! ```text
//! Session A ──┐  Pending (Joiner/Peer/LostConnection)
//! Session B ──┼──────────────────────────────┐
//! Session C ──┘                              ▼
//!                                      ┌──────────┐    per-member ingress
//! Registry ── Timeout(session) ──────► │ room task │ ──► try_send ──► Session
//!                                      │  members  │
//! clean tick (grace/4) ──────────────► │  seq ctr  │ ──► retention Buffer
//!                                      └──────────┘
//! ```
//!
//! The loop task is the only mutator of membership, the seq counter, and
//! the retention buffer, so the room needs no locks: every join, peer
//! broadcast, disconnect, and grace expiry is serialized here, and that
//! serialization is what makes each member's event stream gap-free and
//! strictly ascending.
//!
//! Fan-out never blocks: a member whose ingress is full simply misses the
//! direct push, and the event stays in retention for its next attachment.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::buffer::Buffer;
use crate::config::Config;
use crate::error::RoomClosed;
use crate::protocol::{now_ms, Event};
use crate::queue::ReplayQueue;

/// Slack on the request channel; producers suspend only under
/// pathological load, the room task itself never waits on it.
const PENDING_CAPACITY: usize = 64;
const TIMEOUT_CAPACITY: usize = 16;

// ─── Membership ─────────────────────────────────────────────────────

/// Where a known session stands with the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Live member: events are retained and pushed.
    Connected,
    /// Transport lost, grace timer armed: retained but not pushed;
    /// other members still see this identity as present.
    MayReconnect,
    /// Superseded or quietly expiring: invisible to other members,
    /// nothing retained or pushed.
    TrackedOnly,
}

/// What a session hands the room when announcing itself.
#[derive(Debug, Clone)]
pub struct MemberHandle {
    /// Process-unique session tag. Two sessions sharing a client id are
    /// distinguished by this, never by the id.
    pub tag: Uuid,
    /// Stable client identity.
    pub id: String,
    /// Where the room pushes this session's events.
    pub ingress: mpsc::Sender<Event>,
}

struct Member {
    id: String,
    status: Status,
    /// Dropped to close the session's ingress.
    ingress: Option<mpsc::Sender<Event>>,
}

// ─── Requests ───────────────────────────────────────────────────────

/// The room's reply to a join announcement.
#[derive(Debug)]
pub enum Admission {
    /// Admitted; drain this queue before going live.
    Granted(ReplayQueue),
    /// The resume-point cannot be fulfilled. The session forwards this
    /// event to the peer and closes with a policy violation.
    Denied(Event),
}

enum Request {
    Joiner {
        member: MemberHandle,
        last_num: i64,
        reply: oneshot::Sender<Admission>,
    },
    Peer {
        from: Uuid,
        body: Vec<u8>,
    },
    LostConnection {
        from: Uuid,
    },
}

/// Cloneable posting side of a room. Sessions and the registry hold
/// these; the loop task owns everything else.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    name: String,
    /// Distinguishes this room instance from a later one reusing the
    /// same name after teardown.
    room_id: Uuid,
    pending: mpsc::Sender<Request>,
    timeouts: mpsc::Sender<Uuid>,
}

impl RoomHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Uuid {
        self.room_id
    }

    /// Announce a joining session and await the room's decision.
    pub async fn join(&self, member: MemberHandle, last_num: i64) -> Result<Admission, RoomClosed> {
        let (reply, admission) = oneshot::channel();
        self.pending
            .send(Request::Joiner {
                member,
                last_num,
                reply,
            })
            .await
            .map_err(|_| RoomClosed)?;
        admission.await.map_err(|_| RoomClosed)
    }

    /// Post a peer payload for fan-out.
    pub async fn peer(&self, from: Uuid, body: Vec<u8>) -> Result<(), RoomClosed> {
        self.pending
            .send(Request::Peer { from, body })
            .await
            .map_err(|_| RoomClosed)
    }

    /// Report that a session's transport is gone. Idempotent.
    pub async fn lost_connection(&self, from: Uuid) -> Result<(), RoomClosed> {
        self.pending
            .send(Request::LostConnection { from })
            .await
            .map_err(|_| RoomClosed)
    }

    /// The registry's grace timer for `tag` has fired.
    pub(crate) async fn post_timeout(&self, tag: Uuid) -> Result<(), RoomClosed> {
        self.timeouts.send(tag).await.map_err(|_| RoomClosed)
    }
}

// ─── The loop ───────────────────────────────────────────────────────

/// One room's state, owned by its loop task.
pub struct Room {
    name: String,
    members: HashMap<Uuid, Member>,
    next_num: i64,
    buffer: Buffer,
    pending: mpsc::Receiver<Request>,
    timeouts: mpsc::Receiver<Uuid>,
    clean_cadence: Duration,
}

impl Room {
    /// Create a room and start its loop task.
    pub fn spawn(name: impl Into<String>, config: &Config) -> RoomHandle {
        let name = name.into();
        let (pending_tx, pending_rx) = mpsc::channel(PENDING_CAPACITY);
        let (timeout_tx, timeout_rx) = mpsc::channel(TIMEOUT_CAPACITY);
        let handle = RoomHandle {
            name: name.clone(),
            room_id: Uuid::new_v4(),
            pending: pending_tx,
            timeouts: timeout_tx,
        };
        let room = Room {
            name,
            members: HashMap::new(),
            next_num: 0,
            buffer: Buffer::new(config.keep_window()),
            pending: pending_rx,
            timeouts: timeout_rx,
            clean_cadence: config.clean_cadence(),
        };
        tokio::spawn(room.run());
        handle
    }

    async fn run(mut self) {
        log::info!("room {} open", self.name);
        let mut clean_tick = tokio::time::interval(self.clean_cadence);
        clean_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            // Cheap under a small buffer; also keyed to the tick below
            // so an idle room still prunes.
            self.buffer.clean(now_ms());

            tokio::select! {
                Some(req) = self.pending.recv() => match req {
                    Request::Joiner { member, last_num, reply } => {
                        self.on_joiner(member, last_num, reply);
                    }
                    Request::Peer { from, body } => self.on_peer(from, body),
                    Request::LostConnection { from } => self.on_lost_connection(from),
                },
                Some(tag) = self.timeouts.recv() => {
                    if self.on_timeout(tag) {
                        break;
                    }
                },
                _ = clean_tick.tick() => {}
            }
        }

        log::info!("room {} closed", self.name);
    }

    // ─── Decisions ──────────────────────────────────────────────────

    /// The join decision table. Exactly one branch runs, inside the loop,
    /// so no two admissions ever interleave.
    fn on_joiner(&mut self, member: MemberHandle, last_num: i64, reply: oneshot::Sender<Admission>) {
        let MemberHandle { tag, id, ingress } = member;

        let fulfillable =
            last_num < 0 || last_num == self.next_num || self.buffer.available(&id, last_num);

        if last_num >= 0 && !fulfillable {
            // Track the session so the registry's count stays truthful
            // until its grace timer fires, but never admit it.
            log::warn!(
                "room {}: lastnum {last_num} not available for {id}, rejecting",
                self.name
            );
            self.members.insert(
                tag,
                Member {
                    id: id.clone(),
                    status: Status::TrackedOnly,
                    ingress: None,
                },
            );
            let event = Event::bad_lastnum(&id, self.next_num, now_ms());
            let _ = reply.send(Admission::Denied(event));
            return;
        }

        match self.other_joined(&id, tag) {
            Some(old_tag) if last_num >= 0 => {
                // Takeover: the identity never left as far as the rest of
                // the room is concerned, so no membership broadcast.
                log::debug!("room {}: takeover for {id}, resuming at {last_num}", self.name);
                self.supersede(old_tag);
                self.members.insert(
                    tag,
                    Member {
                        id: id.clone(),
                        status: Status::Connected,
                        ingress: Some(ingress),
                    },
                );
                let queue = self.buffer.queue_from(&id, last_num);
                let _ = reply.send(Admission::Granted(queue));
            }
            Some(old_tag) => {
                // A fresh session with no history displaces the old one:
                // the old identity leaves, then the new one joins.
                log::debug!("room {}: {id} displaced by a fresh session", self.name);
                self.supersede(old_tag);
                self.broadcast_leaver(&id);
                self.admit_fresh(tag, id, ingress, reply);
            }
            None => {
                log::debug!("room {}: fresh join for {id}", self.name);
                self.admit_fresh(tag, id, ingress, reply);
            }
        }
    }

    /// Admit as CONNECTED with no history and announce the membership
    /// change: Welcome to the joiner, Joiner to everyone else, both on
    /// one fresh seq.
    fn admit_fresh(
        &mut self,
        tag: Uuid,
        id: String,
        ingress: mpsc::Sender<Event>,
        reply: oneshot::Sender<Admission>,
    ) {
        let others = self.joined_except(tag);
        self.members.insert(
            tag,
            Member {
                id: id.clone(),
                status: Status::Connected,
                ingress: Some(ingress),
            },
        );

        let num = self.take_num();
        let time = now_ms();
        let other_ids: Vec<String> = others.iter().map(|(_, oid)| oid.clone()).collect();

        self.send(tag, Event::welcome(other_ids.clone(), &id, num, time));
        let joiner = Event::joiner(&id, other_ids, num, time);
        for (other_tag, _) in others {
            self.send(other_tag, joiner.clone());
        }

        let _ = reply.send(Admission::Granted(ReplayQueue::new()));
    }

    /// Fan a member's payload out to the other joined sessions and hand
    /// the sender its receipt, all on one seq and timestamp.
    fn on_peer(&mut self, from: Uuid, body: Vec<u8>) {
        let Some(sender) = self.members.get(&from) else {
            log::debug!("room {}: peer from unknown session, dropping", self.name);
            return;
        };
        if sender.status == Status::TrackedOnly {
            // Displaced while its last frames were in flight.
            log::debug!("room {}: peer from superseded {}, dropping", self.name, sender.id);
            return;
        }
        let sender_id = sender.id.clone();

        let recipients = self.joined_except(from);
        let to: Vec<String> = recipients.iter().map(|(_, id)| id.clone()).collect();
        let num = self.take_num();
        let time = now_ms();

        let peer = Event::peer(&sender_id, to.clone(), num, time, body.clone());
        for (tag, _) in recipients {
            self.send(tag, peer.clone());
        }
        self.send(from, Event::receipt(&sender_id, to, num, time, body));
    }

    /// A transport died. The leaver announcement waits for the grace
    /// timer; for now the session just stops receiving pushes.
    fn on_lost_connection(&mut self, from: Uuid) {
        match self.members.get_mut(&from) {
            Some(m) if m.status == Status::Connected => {
                log::debug!("room {}: lost connection for {}", self.name, m.id);
                m.ingress = None;
                m.status = Status::MayReconnect;
            }
            // Already lost, superseded, or unknown.
            _ => {}
        }
    }

    /// The grace timer fired. A still-joined session becomes a leaver; a
    /// superseded or unknown one is dropped silently. Returns true when
    /// the room is empty and the loop should exit.
    fn on_timeout(&mut self, tag: Uuid) -> bool {
        let Some(member) = self.members.remove(&tag) else {
            return false;
        };
        match member.status {
            Status::Connected | Status::MayReconnect => {
                log::debug!("room {}: {} timed out, leaving", self.name, member.id);
                self.buffer.remove(&member.id);
                self.broadcast_leaver(&member.id);
            }
            Status::TrackedOnly => {
                log::debug!("room {}: dropping superseded {}", self.name, member.id);
            }
        }
        self.members.is_empty()
    }

    /// Announce that `id` has left to everyone still joined, on a fresh
    /// seq.
    fn broadcast_leaver(&mut self, id: &str) {
        let remaining: Vec<(Uuid, String)> = self
            .members
            .iter()
            .filter(|(_, m)| m.status != Status::TrackedOnly)
            .map(|(tag, m)| (*tag, m.id.clone()))
            .collect();

        let num = self.take_num();
        let time = now_ms();
        let to: Vec<String> = remaining.iter().map(|(_, rid)| rid.clone()).collect();
        let leaver = Event::leaver(id, to, num, time);
        for (tag, _) in remaining {
            self.send(tag, leaver.clone());
        }
    }

    // ─── Plumbing ───────────────────────────────────────────────────

    /// Retain the event for the recipient's id, and push it if the
    /// recipient is live. Never blocks: a full ingress skips the push
    /// and the event waits in retention.
    fn send(&mut self, tag: Uuid, event: Event) {
        let Some(member) = self.members.get(&tag) else {
            return;
        };
        if member.status == Status::TrackedOnly {
            return;
        }
        self.buffer.add(&member.id, event.clone());
        if member.status != Status::Connected {
            return;
        }
        if let Some(ingress) = &member.ingress {
            match ingress.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::debug!(
                        "room {}: ingress full for {}, skipping push",
                        self.name,
                        member.id
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    log::debug!(
                        "room {}: ingress closed for {}, skipping push",
                        self.name,
                        member.id
                    );
                }
            }
        }
    }

    /// Close a session's ingress and stop counting it as present.
    fn supersede(&mut self, tag: Uuid) {
        if let Some(m) = self.members.get_mut(&tag) {
            m.ingress = None;
            m.status = Status::TrackedOnly;
        }
    }

    /// Joined (CONNECTED or MAYRECONNECT) members other than `tag`.
    fn joined_except(&self, tag: Uuid) -> Vec<(Uuid, String)> {
        self.members
            .iter()
            .filter(|(t, m)| **t != tag && m.status != Status::TrackedOnly)
            .map(|(t, m)| (*t, m.id.clone()))
            .collect()
    }

    /// The still-joined session carrying `id`, if any. The transitions
    /// make a second match impossible; if one ever shows up, warn and
    /// use the first rather than panic.
    fn other_joined(&self, id: &str, excluding: Uuid) -> Option<Uuid> {
        let mut matches = self.members.iter().filter(|(tag, m)| {
            **tag != excluding && m.id == id && m.status != Status::TrackedOnly
        });
        let first = matches.next().map(|(tag, _)| *tag);
        if matches.next().is_some() {
            log::warn!("room {}: duplicate joined id {id}, using first", self.name);
        }
        first
    }

    fn take_num(&mut self) -> i64 {
        let num = self.next_num;
        self.next_num += 1;
        num
    }
}
