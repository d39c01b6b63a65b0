use std::time::Duration;

/// Consecutive transport failures before a visible notice is shown.
const TRANSPORT_NOTICE_AFTER: u32 = 3;
/// Consecutive capture failures before the session enters `Error`.
const MAX_CAPTURE_FAILURES: u32 = 5;
/// Upper bound on the backoff multiplier applied to the frame interval.
const MAX_BACKOFF_FACTOR: u32 = 4;

/// What the capture loop should do after a failed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Retry silently on the next cycle.
    Retry,
    /// Retry, and tell the user something is wrong.
    Notify,
    /// Give up on this session.
    Fail,
}

/// Tracks consecutive per-frame failures for the capture loop.
///
/// Transport failures never fail the session: they only slow the loop down
/// and, once persistent, surface a generic message. Capture failures are
/// expected hiccups until they repeat `MAX_CAPTURE_FAILURES` times in a row.
/// Any success of the same kind clears its counter.
#[derive(Debug, Default)]
pub struct FailureTracker {
    transport: u32,
    capture: u32,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_transport_failure(&mut self) -> FailureAction {
        self.transport = self.transport.saturating_add(1);
        if self.transport >= TRANSPORT_NOTICE_AFTER {
            tracing::warn!(
                failures = self.transport,
                "transport failing repeatedly, notifying user"
            );
            FailureAction::Notify
        } else {
            tracing::debug!(
                failures = self.transport,
                notice_after = TRANSPORT_NOTICE_AFTER,
                "transport failure, retrying"
            );
            FailureAction::Retry
        }
    }

    pub fn record_transport_success(&mut self) {
        self.transport = 0;
    }

    pub fn record_capture_failure(&mut self) -> FailureAction {
        self.capture = self.capture.saturating_add(1);
        if self.capture >= MAX_CAPTURE_FAILURES {
            tracing::warn!(failures = self.capture, "capture failing repeatedly");
            FailureAction::Fail
        } else {
            FailureAction::Retry
        }
    }

    pub fn record_capture_success(&mut self) {
        self.capture = 0;
    }

    /// Delay before the next cycle: the frame interval, stretched while the
    /// transport keeps failing.
    pub fn next_delay(&self, interval: Duration) -> Duration {
        interval * (1 + self.transport).min(MAX_BACKOFF_FACTOR)
    }

    pub fn reset(&mut self) {
        self.transport = 0;
        self.capture = 0;
    }
}
