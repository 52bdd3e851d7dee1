//! Pending forwards.
//!
//! A `PendingForward` owns an inbound request from the moment its delay is
//! registered until the delay fires. If the connection goes away first the
//! handler future is dropped, which drops the pending forward and its ticket:
//! the timer entry is cancelled and the request never reaches the dispatcher.
//!
//! The connection can only be seen going away while its request body is being
//! read, so the body is read ahead into memory (up to a limit) while the delay
//! runs. A body that fails mid-read means the client is gone and the forward
//! is abandoned. Frames read ahead are replayed in front of the rest of the
//! stream when the request is dispatched.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, Bytes};
use http_body_util::BodyExt;
use hyper::body::{Body as HttpBody, Frame, SizeHint};

use crate::delay::scheduler::{DelayScheduler, SchedulerClosed, Ticket};
use crate::forward::UpstreamTarget;
use crate::http::request::InboundRequest;
use crate::observability::metrics::{self, PendingOutcome};

/// Default number of body bytes read ahead while waiting.
pub const DEFAULT_READ_AHEAD: usize = 8 * 1024 * 1024;

/// Why a pending forward was not released for dispatch.
#[derive(Debug, thiserror::Error)]
pub enum NotDispatched {
    #[error(transparent)]
    SchedulerClosed(#[from] SchedulerClosed),
    #[error("request body failed before delay elapsed: {0}")]
    BodyAborted(axum::Error),
}

/// An inbound request waiting for its delay to elapse.
pub struct PendingForward {
    request: Option<InboundRequest>,
    ticket: Option<Ticket>,
    target: UpstreamTarget,
    delay: Duration,
    read_ahead: usize,
}

impl PendingForward {
    /// Register `request` with the scheduler.
    pub fn new(
        scheduler: &DelayScheduler,
        request: InboundRequest,
        delay: Duration,
        target: UpstreamTarget,
    ) -> Self {
        metrics::pending_forward_started();
        Self {
            ticket: Some(scheduler.delay(delay)),
            request: Some(request),
            target,
            delay,
            read_ahead: DEFAULT_READ_AHEAD,
        }
    }

    /// Limit the body bytes held in memory while waiting. Zero disables read-ahead.
    pub fn with_read_ahead(mut self, bytes: usize) -> Self {
        self.read_ahead = bytes;
        self
    }

    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }

    /// Wait for the delay, then release the request for dispatch.
    pub async fn ready(mut self) -> Result<InboundRequest, NotDispatched> {
        let Some(mut ticket) = self.ticket.take() else {
            return Err(self.closed());
        };

        let mut body = self.request.as_mut().map(|r| std::mem::take(&mut r.body));
        let mut buffer = ReadAhead::new(self.read_ahead);

        let outcome = loop {
            let reading = body.is_some() && buffer.has_room();
            tokio::select! {
                biased;
                fired = &mut ticket => break fired,
                frame = next_frame(&mut body), if reading => match frame {
                    Some(Ok(frame)) => buffer.push(frame),
                    // Dropping `self` logs and counts the abandonment.
                    Some(Err(e)) => return Err(NotDispatched::BodyAborted(e)),
                    None => body = None,
                },
            }
        };

        let fired = match outcome {
            Ok(fired) => fired,
            Err(_) => return Err(self.closed()),
        };
        let Some(mut request) = self.request.take() else {
            return Err(SchedulerClosed.into());
        };
        metrics::pending_forward_finished(PendingOutcome::Dispatched);

        tracing::trace!(
            request_id = %request.id,
            order = fired.order,
            read_ahead_bytes = buffer.bytes,
            "Delay elapsed"
        );
        request.body = buffer.into_body(body);
        Ok(request)
    }

    fn closed(&mut self) -> NotDispatched {
        if self.request.take().is_some() {
            metrics::pending_forward_finished(PendingOutcome::SchedulerClosed);
        }
        SchedulerClosed.into()
    }
}

impl Drop for PendingForward {
    fn drop(&mut self) {
        if let Some(request) = self.request.take() {
            metrics::pending_forward_finished(PendingOutcome::Abandoned);
            tracing::info!(
                request_id = %request.id,
                path = %request.path,
                delay_ms = self.delay.as_millis() as u64,
                waited_ms = request.received_at.elapsed().as_millis() as u64,
                "Client went away before delay elapsed, forward abandoned"
            );
        }
    }
}

async fn next_frame(body: &mut Option<Body>) -> Option<Result<Frame<Bytes>, axum::Error>> {
    match body {
        Some(body) => body.frame().await,
        None => None,
    }
}

/// Body frames read before dispatch.
struct ReadAhead {
    frames: VecDeque<Frame<Bytes>>,
    bytes: usize,
    limit: usize,
}

impl ReadAhead {
    fn new(limit: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            bytes: 0,
            limit,
        }
    }

    fn has_room(&self) -> bool {
        self.bytes < self.limit
    }

    fn push(&mut self, frame: Frame<Bytes>) {
        if let Some(data) = frame.data_ref() {
            self.bytes += data.len();
        }
        self.frames.push_back(frame);
    }

    /// Frames read so far, followed by whatever is left of `rest`.
    fn into_body(self, rest: Option<Body>) -> Body {
        if self.frames.is_empty() {
            return rest.unwrap_or_else(Body::empty);
        }
        Body::new(Replay {
            frames: self.frames,
            buffered: self.bytes as u64,
            rest,
        })
    }
}

struct Replay {
    frames: VecDeque<Frame<Bytes>>,
    buffered: u64,
    rest: Option<Body>,
}

impl HttpBody for Replay {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Self::Error>>> {
        if let Some(frame) = self.frames.pop_front() {
            if let Some(data) = frame.data_ref() {
                self.buffered -= data.len() as u64;
            }
            return Poll::Ready(Some(Ok(frame)));
        }
        match self.rest.as_mut() {
            Some(rest) => Pin::new(rest).poll_frame(cx),
            None => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.frames.is_empty() && self.rest.as_ref().map_or(true, |rest| rest.is_end_stream())
    }

    fn size_hint(&self) -> SizeHint {
        let mut hint = match &self.rest {
            Some(rest) => rest.size_hint(),
            None => SizeHint::with_exact(0),
        };
        if let Some(upper) = hint.upper() {
            hint.set_upper(upper + self.buffered);
        }
        hint.set_lower(hint.lower() + self.buffered);
        hint
    }
}
