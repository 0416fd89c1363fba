//! Registry: admission and lifetime control for rooms.
//!
//! Acceptors call [`acquire`](Registry::acquire) to look up or create a
//! room (subject to the per-room session cap); sessions call
//! [`release`](Registry::release) on the way out, which arms the
//! reconnection-grace timer. When a timer fires the active count drops
//! and the room is told `Timeout(session)` — the room then decides
//! whether that is a leaver or a stale no-op. At count zero the registry
//! forgets the room; its loop exits on its own once the last timeout is
//! processed.
//!
//! Everything here is bookkeeping over small maps behind one mutex; the
//! rooms themselves never touch it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::Config;
use crate::error::RegistryError;
use crate::room::{Room, RoomHandle};

/// Shared, cloneable handle to the room map.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Mutex<Inner>>,
    config: Config,
}

struct Inner {
    /// Room name → live room.
    rooms: HashMap<String, RoomHandle>,
    /// Room instance → active-session count. Keyed by instance, not
    /// name, so a dying room and its same-name successor never share a
    /// count.
    counts: HashMap<Uuid, usize>,
    /// Room instance → name, for removal.
    names: HashMap<Uuid, String>,
    /// Room instance → sessions whose grace timer is running.
    timing_out: HashMap<Uuid, Vec<Uuid>>,
}

impl Registry {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                rooms: HashMap::new(),
                counts: HashMap::new(),
                names: HashMap::new(),
                timing_out: HashMap::new(),
            })),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Look up or create the room for `name`, counting the caller as an
    /// active session. Errors when the room is at its cap.
    pub async fn acquire(&self, name: &str) -> Result<RoomHandle, RegistryError> {
        let mut inner = self.inner.lock().await;

        if let Some(room) = inner.rooms.get(name).cloned() {
            let count = inner.counts.entry(room.id()).or_insert(0);
            if *count >= self.config.max_clients_per_room {
                return Err(RegistryError::RoomFull(name.to_string()));
            }
            *count += 1;
            log::debug!("registry: {} active in {name}", *count);
            return Ok(room);
        }

        let room = Room::spawn(name, &self.config);
        inner.rooms.insert(name.to_string(), room.clone());
        inner.counts.insert(room.id(), 1);
        inner.names.insert(room.id(), name.to_string());
        inner.timing_out.insert(room.id(), Vec::new());
        log::info!("registry: created room {name}");
        Ok(room)
    }

    /// A session is done with its room. The reconnection grace starts
    /// now; when it expires the count drops and the room hears
    /// `Timeout(session)`. A replacement that attaches meanwhile simply
    /// acquires its own slot — the timeout for the old session then
    /// finds it superseded and stays silent.
    pub async fn release(&self, room: &RoomHandle, tag: Uuid) {
        {
            let mut inner = self.inner.lock().await;
            inner.timing_out.entry(room.id()).or_default().push(tag);
        }
        log::debug!("registry: grace timer armed for {tag} in {}", room.name());

        let registry = self.clone();
        let room = room.clone();
        let grace = self.config.reconnection_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            {
                let mut inner = registry.inner.lock().await;
                if let Some(list) = inner.timing_out.get_mut(&room.id()) {
                    list.retain(|t| *t != tag);
                }
                inner.decrement(&room);
            }
            // Post outside the lock so a slow room can't wedge the
            // registry.
            let _ = room.post_timeout(tag).await;
        });
    }

    /// Number of rooms currently known.
    pub async fn room_count(&self) -> usize {
        self.inner.lock().await.rooms.len()
    }

    /// Active sessions counted against `name`'s cap; 0 if unknown.
    pub async fn active_sessions(&self, name: &str) -> usize {
        let inner = self.inner.lock().await;
        inner
            .rooms
            .get(name)
            .and_then(|room| inner.counts.get(&room.id()))
            .copied()
            .unwrap_or(0)
    }
}

impl Inner {
    fn decrement(&mut self, room: &RoomHandle) {
        let Some(count) = self.counts.get_mut(&room.id()) else {
            return;
        };
        *count = count.saturating_sub(1);
        if *count > 0 {
            return;
        }

        self.counts.remove(&room.id());
        self.timing_out.remove(&room.id());
        if let Some(name) = self.names.remove(&room.id()) {
            // Only unbind the name if it still points at this instance.
            if self.rooms.get(&name).is_some_and(|r| r.id() == room.id()) {
                self.rooms.remove(&name);
            }
            log::info!("registry: forgot room {name}");
        }
    }
}
