//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (net::Listener)
//!     → server.rs (proxy Router, one handler call per request)
//!     → request.rs (InboundRequest: id, path, headers, streamed body)
//!     → [delay scheduler holds the request]
//!     → [forwarding dispatcher sends it upstream]
//!     → response.rs (relay upstream response, hop-by-hop stripped)
//!     → Send to client
//!
//! Upstream side:
//!     → echo.rs (path line + pretty JSON headers)
//! ```

pub mod echo;
pub mod headers;
pub mod request;
pub mod response;
pub mod server;

pub use echo::{render_echo, EchoServer, ECHO_PREFIX};
pub use headers::HeaderMultiMap;
pub use request::{InboundRequest, RequestError, RequestId};
pub use server::ProxyServer;
