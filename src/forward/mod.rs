//! Forwarding subsystem.
//!
//! # Data Flow
//! ```text
//! InboundRequest (after delay)
//!     → dispatcher.rs (rebuild request for the fixed target)
//!     → client.rs (UpstreamClient: pooled hyper client)
//!     → upstream response head (bounded by response timeout)
//!     → http::response::relay (hop-by-hop stripped, body streamed)
//!     → original caller
//! ```
//!
//! # Design Decisions
//! - Single attempt per request; errors map to 502/504
//! - Bodies are streamed both ways
//! - The client is a trait so the relay is testable with fakes

pub mod client;
pub mod dispatcher;
pub mod error;

pub use client::{HyperUpstream, UpstreamClient};
pub use dispatcher::{Forwarder, UpstreamTarget};
pub use error::ForwardError;
