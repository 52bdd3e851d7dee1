//! Delay scheduling subsystem.
//!
//! # Data Flow
//! ```text
//! proxy handler
//!     → pending.rs (PendingForward owns the request, holds a Ticket)
//!     → scheduler.rs (min-heap registry, one driver task)
//!     → Ticket resolves after the delay
//!     → request released to the forwarding dispatcher
//!
//! Client disconnect:
//!     handler future dropped → PendingForward dropped → Ticket dropped
//!     → registry entry removed, no upstream connection is made
//!
//! Request body while waiting:
//!     frames read ahead (bounded) so a closed connection surfaces
//!     → body error abandons the forward
//!     → on dispatch, read frames are replayed before the rest of the stream
//! ```
//!
//! # Design Decisions
//! - One generic scheduler for any duration, not a hard-coded timeout
//! - Equal durations fire FIFO; the registry is the only shared state
//! - Cancellation is drop-driven

pub mod pending;
pub mod scheduler;

pub use pending::{NotDispatched, PendingForward};
pub use scheduler::{DelayScheduler, Fired, Scheduled, SchedulerClosed, Ticket};
