//! # bounce-server — acceptor and HTTP glue for the bounce server
//!
//! The engine lives in `bounce-core`; this crate owns the listener:
//! routing the liveness page, upgrading `/g/<room>` connections to
//! WebSockets, parsing attachment parameters, and starting sessions.

pub mod acceptor;
pub mod http;

pub use acceptor::serve;
