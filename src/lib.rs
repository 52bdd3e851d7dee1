//! Delaying HTTP forward proxy with an echoing upstream.
//!
//! Every inbound request is held for a fixed delay, then relayed to a single
//! fixed upstream target; the response is streamed back unchanged. The
//! bundled upstream service answers with the path it received and the
//! received headers.

pub mod config;
pub mod delay;
pub mod forward;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::ProxyConfig;
pub use delay::DelayScheduler;
pub use http::{EchoServer, ProxyServer};
pub use lifecycle::Shutdown;
