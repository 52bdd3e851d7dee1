//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (lifecycle tracking, counters)
//!     → hyper auto (HTTP/1.1, h2c) on a per-connection task
//!     → axum Router
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection is tracked so tests can count upstream connections
//! - One task per connection; nothing in the accept loop awaits a request

pub mod connection;
pub mod listener;

pub use connection::ConnectionTracker;
pub use listener::{Listener, ListenerError};
