//! # bounce-core — the in-memory engine of the bounce broadcast server
//!
//! Clients attach to a named room over a persistent bidirectional
//! connection; every payload fans out to the other members, and every
//! member sees one gap-free, numbered stream of room events — joins,
//! leaves, peer payloads, self-receipts, welcomes — even across brief
//! network interruptions.
//!
//! ## Architecture
//!
//! ```text
//! acceptor ── acquire ──► Registry ── grace timers ──┐
//!    │                        │                      │ Timeout
//!    ▼                        ▼                      ▼
//! Session ◄── replay ─── RoomHandle ───────────► Room loop
//!  reader ─── Peer/LostConnection ─────────────► (single writer:
//!  writer ◄── ingress ◄─────────────────────────  members, seq,
//!                                                 retention Buffer)
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — event model and JSON wire codec
//! - [`buffer`] — per-recipient retention for reconnection replay
//! - [`queue`] — the one-shot replay FIFO handed out at admission
//! - [`room`] — the single-writer event loop per room
//! - [`session`] — per-connection reader/writer state machine
//! - [`registry`] — room lookup, session caps, grace timers
//! - [`config`] — tunables and their derived windows
//!
//! ## Guarantees
//!
//! Within a room, every admitted session observes strictly ascending
//! event numbers; a `Peer` and its `Receipt` share one number, time,
//! and body; a replacement session resuming at a retained seq gets the
//! exact suffix it missed; and no member — however slow — can block the
//! room loop or any other member.

pub mod buffer;
pub mod config;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod room;
pub mod session;

pub use buffer::Buffer;
pub use config::Config;
pub use error::{ProtocolError, RegistryError, RoomClosed};
pub use protocol::{now_ms, ClientRef, Event, Intent, NO_LASTNUM};
pub use queue::ReplayQueue;
pub use registry::Registry;
pub use room::{Admission, MemberHandle, Room, RoomHandle, Status};
pub use session::{Session, SessionHandle, SessionState};
