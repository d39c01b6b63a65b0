//! Capture session state machine.
//!
//! ```text
//! Idle -> Monitoring <-> Analyzing -> Authenticated
//!             \             /
//!              -> TimedOut <-        (session deadline)
//! any non-terminal -> Error -> Monitoring (explicit retry)
//! ```
//!
//! The machine owns all mutable session state. Callers feed it frame
//! assessments and lifecycle requests, and read [`SessionSnapshot`]s back.
//! Time comes from an injected [`Clock`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Clock;
use crate::detection::DetectionResult;
use crate::evaluator::{evaluate, Direction, EvaluatorConfig, Verdict};
use crate::geometry::CaptureRegion;
use crate::status::{DebounceConfig, StatusBoard, StatusUpdate, Tone};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Monitoring,
    Analyzing,
    Authenticated,
    TimedOut,
    Error,
}

impl Phase {
    /// No frame-driven transition leaves a terminal phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Authenticated | Self::TimedOut)
    }

    pub fn accepts_frames(self) -> bool {
        matches!(self, Self::Monitoring | Self::Analyzing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Monitoring => "monitoring",
            Self::Analyzing => "analyzing",
            Self::Authenticated => "authenticated",
            Self::TimedOut => "timed_out",
            Self::Error => "error",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("retry is only possible after an error or timeout (phase: {0:?})")]
    NotRetryable(Phase),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Consecutive live frames needed to authenticate.
    pub required_live_frames: u32,
    pub session_timeout_ms: u64,
    pub debounce: DebounceConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            required_live_frames: 3,
            session_timeout_ms: 20_000,
            debounce: DebounceConfig::default(),
        }
    }
}

/// Evaluator output for one frame, with the service extras worth surfacing.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAssessment {
    pub verdict: Verdict,
    pub identity: Option<String>,
    pub hint: Option<String>,
}

impl FrameAssessment {
    pub fn assess(region: &CaptureRegion, result: &DetectionResult, config: &EvaluatorConfig) -> Self {
        Self {
            verdict: evaluate(region, result, config),
            identity: result.recognized_name.clone(),
            hint: result.liveness_message.clone().filter(|m| !m.is_empty()),
        }
    }
}

impl From<Verdict> for FrameAssessment {
    fn from(verdict: Verdict) -> Self {
        Self {
            verdict,
            identity: None,
            hint: None,
        }
    }
}

/// What a state machine operation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Nothing changed: the phase does not accept this input.
    Ignored,
    /// The session is still running.
    Continue,
    Authenticated { identity: Option<String> },
    TimedOut,
    Failed { message: String },
}

#[derive(Debug, Clone)]
struct SessionState {
    phase: Phase,
    consecutive_live_frames: u32,
    session_id: String,
    started_at: u64,
    identity: Option<String>,
}

/// Read-only view of the session, handed to presenters and transports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub consecutive_live_frames: u32,
    pub required_live_frames: u32,
    pub session_id: String,
    pub session_started_at: u64,
    pub last_status_change_at: Option<u64>,
    pub deadline_ms: Option<u64>,
    pub identity: Option<String>,
    pub status: Option<StatusUpdate>,
}

pub struct SessionMachine<C: Clock> {
    config: SessionConfig,
    clock: C,
    state: SessionState,
    status: StatusBoard,
}

impl<C: Clock> SessionMachine<C> {
    pub fn new(config: SessionConfig, clock: C) -> Self {
        let status = StatusBoard::new(config.debounce);
        let started_at = clock.now_ms();
        Self {
            config,
            clock,
            state: SessionState {
                phase: Phase::Idle,
                consecutive_live_frames: 0,
                session_id: String::new(),
                started_at,
                identity: None,
            },
            status,
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn consecutive_live_frames(&self) -> u32 {
        self.state.consecutive_live_frames
    }

    pub fn session_id(&self) -> &str {
        &self.state.session_id
    }

    pub fn status(&self) -> Option<&StatusUpdate> {
        self.status.current()
    }

    /// When the running session times out, if one is running.
    pub fn deadline(&self) -> Option<u64> {
        self.state
            .phase
            .accepts_frames()
            .then(|| self.state.started_at + self.config.session_timeout_ms)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.state.phase,
            consecutive_live_frames: self.state.consecutive_live_frames,
            required_live_frames: self.config.required_live_frames,
            session_id: self.state.session_id.clone(),
            session_started_at: self.state.started_at,
            last_status_change_at: self.status.changed_at(),
            deadline_ms: self.deadline(),
            identity: self.state.identity.clone(),
            status: self.status.current().cloned(),
        }
    }

    /// Begin the first session once the camera stream is ready.
    pub fn start(&mut self) -> Step {
        if self.state.phase != Phase::Idle {
            return Step::Ignored;
        }
        self.begin_session();
        Step::Continue
    }

    /// Discard the current session and start a fresh one from any phase.
    pub fn reset(&mut self) -> Step {
        self.begin_session();
        Step::Continue
    }

    /// Recover from `Error` or `TimedOut` with a fresh session.
    pub fn retry(&mut self) -> Result<Step, SessionError> {
        match self.state.phase {
            Phase::Error | Phase::TimedOut => {
                self.begin_session();
                Ok(Step::Continue)
            }
            phase => Err(SessionError::NotRetryable(phase)),
        }
    }

    /// Discard the session without starting another (method switch, teardown).
    pub fn abandon(&mut self, text: &str) -> Step {
        if self.state.phase == Phase::Authenticated {
            return Step::Ignored;
        }
        let now = self.clock.now_ms();
        self.state.phase = Phase::Idle;
        self.state.consecutive_live_frames = 0;
        self.status
            .force(StatusUpdate::new(Phase::Idle, Tone::Negative, text), now);
        tracing::info!(session_id = %self.state.session_id, "session abandoned");
        Step::Continue
    }

    /// Time the session out if its deadline has passed. Fires at most once
    /// per session.
    pub fn expire(&mut self) -> Step {
        let now = self.clock.now_ms();
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.state.phase = Phase::TimedOut;
                self.state.consecutive_live_frames = 0;
                self.status.force(
                    StatusUpdate::new(
                        Phase::TimedOut,
                        Tone::Negative,
                        "Session timed out. Try again or use another sign-in method",
                    ),
                    now,
                );
                tracing::info!(session_id = %self.state.session_id, "session timed out");
                Step::TimedOut
            }
            _ => Step::Ignored,
        }
    }

    /// Apply one frame's assessment.
    pub fn on_frame(&mut self, assessment: FrameAssessment) -> Step {
        // A reply that lands after the deadline must not count.
        if let Step::TimedOut = self.expire() {
            return Step::TimedOut;
        }
        if !self.state.phase.accepts_frames() {
            tracing::debug!(phase = ?self.state.phase, "frame ignored");
            return Step::Ignored;
        }

        let now = self.clock.now_ms();
        let required = self.config.required_live_frames.max(1);
        let FrameAssessment {
            verdict,
            identity,
            hint,
        } = assessment;

        if !verdict.is_live() {
            self.state.consecutive_live_frames = 0;
            self.state.phase = Phase::Monitoring;
            let update = StatusUpdate::new(Phase::Monitoring, Tone::Negative, verdict_text(&verdict))
                .with_hint(hint);
            self.status.request(update, now);
            tracing::debug!(?verdict, "frame rejected");
            return Step::Continue;
        }

        self.state.consecutive_live_frames += 1;
        let done = self.state.consecutive_live_frames;
        if identity.is_some() {
            self.state.identity = identity;
        }

        if done >= required {
            self.state.phase = Phase::Authenticated;
            let identity = self.state.identity.clone();
            let text = match &identity {
                Some(name) => format!("Welcome, {name}"),
                None => "Authenticated".to_string(),
            };
            self.status.force(
                StatusUpdate::new(Phase::Authenticated, Tone::Positive, text)
                    .with_progress(done, required),
                now,
            );
            tracing::info!(
                session_id = %self.state.session_id,
                live_frames = done,
                identity = ?identity,
                "session authenticated"
            );
            return Step::Authenticated { identity };
        }

        self.state.phase = Phase::Analyzing;
        let update = StatusUpdate::new(
            Phase::Analyzing,
            Tone::Positive,
            format!("Hold still, verifying ({done}/{required})"),
        )
        .with_progress(done, required)
        .with_hint(hint);
        self.status.request(update, now);
        tracing::debug!(live_frames = done, required, "live frame accepted");
        Step::Continue
    }

    /// The service reported a structured error for this frame.
    pub fn on_rejected(&mut self, message: &str, fatal: bool) -> Step {
        if let Step::TimedOut = self.expire() {
            return Step::TimedOut;
        }
        if !self.state.phase.accepts_frames() {
            return Step::Ignored;
        }
        if fatal {
            return self.fail(message);
        }
        let now = self.clock.now_ms();
        self.state.consecutive_live_frames = 0;
        self.state.phase = Phase::Monitoring;
        self.status
            .request(StatusUpdate::new(Phase::Monitoring, Tone::Negative, message), now);
        Step::Continue
    }

    /// Show a transient problem without touching phase or counters.
    pub fn notice(&mut self, text: &str) -> bool {
        if !self.state.phase.accepts_frames() {
            return false;
        }
        let now = self.clock.now_ms();
        let phase = self.state.phase;
        self.status
            .request(StatusUpdate::new(phase, Tone::Negative, text), now)
    }

    /// Move to `Error`. Terminal phases are left untouched.
    pub fn fail(&mut self, message: &str) -> Step {
        if self.state.phase.is_terminal() {
            return Step::Ignored;
        }
        let now = self.clock.now_ms();
        self.state.phase = Phase::Error;
        self.state.consecutive_live_frames = 0;
        self.status
            .force(StatusUpdate::new(Phase::Error, Tone::Negative, message), now);
        tracing::warn!(session_id = %self.state.session_id, reason = message, "session failed");
        Step::Failed {
            message: message.to_string(),
        }
    }

    fn begin_session(&mut self) {
        let now = self.clock.now_ms();
        self.state = SessionState {
            phase: Phase::Monitoring,
            consecutive_live_frames: 0,
            session_id: uuid::Uuid::new_v4().to_string(),
            started_at: now,
            identity: None,
        };
        self.status.force(
            StatusUpdate::new(
                Phase::Monitoring,
                Tone::Positive,
                "Position your face inside the oval",
            ),
            now,
        );
        tracing::info!(
            session_id = %self.state.session_id,
            timeout_ms = self.config.session_timeout_ms,
            "session started"
        );
    }
}

fn verdict_text(verdict: &Verdict) -> String {
    match verdict {
        Verdict::NoFace => "No face detected. Position your face inside the oval".into(),
        Verdict::MultipleFaces => "Multiple faces detected. Only one person should be in view".into(),
        Verdict::Reposition { direction } => match direction {
            Direction::Left => "Move your face to the left".into(),
            Direction::Right => "Move your face to the right".into(),
            Direction::Up => "Move your face up".into(),
            Direction::Down => "Move your face down".into(),
        },
        Verdict::TooFar => "Move closer to the camera".into(),
        Verdict::TooClose => "Move back from the camera".into(),
        Verdict::NotLive { .. } => "Look directly at the camera".into(),
        Verdict::Live { .. } => "Hold still".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use proptest::prelude::*;

    fn machine(clock: &ManualClock) -> SessionMachine<&ManualClock> {
        SessionMachine::new(SessionConfig::default(), clock)
    }

    fn live(confidence: f64) -> FrameAssessment {
        Verdict::Live { confidence }.into()
    }

    #[test]
    fn test_starts_idle_until_stream_ready() {
        let clock = ManualClock::new(0);
        let mut m = machine(&clock);
        assert_eq!(m.phase(), Phase::Idle);
        assert_eq!(m.on_frame(live(0.9)), Step::Ignored);
        assert_eq!(m.start(), Step::Continue);
        assert_eq!(m.phase(), Phase::Monitoring);
        assert!(!m.session_id().is_empty());
        assert_eq!(m.start(), Step::Ignored);
    }

    #[test]
    fn test_three_live_frames_authenticate() {
        let clock = ManualClock::new(0);
        let mut m = machine(&clock);
        m.start();
        let mut phases = vec![m.phase()];
        for confidence in [0.8, 0.7, 0.9] {
            clock.advance(500);
            m.on_frame(live(confidence));
            phases.push(m.phase());
        }
        assert_eq!(
            phases,
            vec![
                Phase::Monitoring,
                Phase::Analyzing,
                Phase::Analyzing,
                Phase::Authenticated
            ]
        );
        assert_eq!(m.consecutive_live_frames(), 3);
    }

    #[test]
    fn test_non_live_frame_resets_counter() {
        let clock = ManualClock::new(0);
        let mut m = machine(&clock);
        m.start();
        let frames = [
            live(0.8),
            Verdict::NoFace.into(),
            live(0.9),
            live(0.95),
        ];
        let mut counts = Vec::new();
        for frame in frames {
            clock.advance(500);
            m.on_frame(frame);
            counts.push(m.consecutive_live_frames());
        }
        assert_eq!(counts, vec![1, 0, 1, 2]);
        assert_ne!(m.phase(), Phase::Authenticated);
    }

    #[test]
    fn test_authenticated_is_frozen() {
        let clock = ManualClock::new(0);
        let mut m = machine(&clock);
        m.start();
        for _ in 0..3 {
            m.on_frame(live(0.9));
        }
        assert_eq!(m.phase(), Phase::Authenticated);
        assert_eq!(m.on_frame(Verdict::NoFace.into()), Step::Ignored);
        assert_eq!(m.on_rejected("boom", true), Step::Ignored);
        assert_eq!(m.fail("boom"), Step::Ignored);
        clock.advance(60_000);
        assert_eq!(m.expire(), Step::Ignored);
        assert_eq!(m.phase(), Phase::Authenticated);
        assert_eq!(m.consecutive_live_frames(), 3);
        assert!(m.retry().is_err());
    }

    #[test]
    fn test_identity_carried_to_outcome() {
        let clock = ManualClock::new(0);
        let mut m = machine(&clock);
        m.start();
        m.on_frame(live(0.9));
        m.on_frame(FrameAssessment {
            verdict: Verdict::Live { confidence: 0.9 },
            identity: Some("Dana".into()),
            hint: None,
        });
        assert_eq!(
            m.on_frame(live(0.9)),
            Step::Authenticated {
                identity: Some("Dana".into())
            }
        );
        assert_eq!(m.status().unwrap().text, "Welcome, Dana");
    }

    #[test]
    fn test_timeout_fires_once_and_blocks_in_flight_frame() {
        let clock = ManualClock::new(0);
        let mut m = machine(&clock);
        m.start();
        clock.advance(19_999);
        assert_eq!(m.expire(), Step::Ignored);
        m.on_frame(Verdict::TooFar.into());

        clock.advance(1);
        // Reply for a frame sent before the deadline arrives after it.
        assert_eq!(m.on_frame(live(0.99)), Step::TimedOut);
        assert_eq!(m.phase(), Phase::TimedOut);
        assert_eq!(m.expire(), Step::Ignored);
        assert_eq!(m.on_frame(live(0.99)), Step::Ignored);
        assert_eq!(m.consecutive_live_frames(), 0);
        assert_eq!(m.deadline(), None);
    }

    #[test]
    fn test_retry_rearms_deadline() {
        let clock = ManualClock::new(0);
        let mut m = machine(&clock);
        m.start();
        let first_session = m.session_id().to_string();
        clock.advance(20_000);
        assert_eq!(m.expire(), Step::TimedOut);

        clock.advance(5_000);
        assert_eq!(m.retry(), Ok(Step::Continue));
        assert_eq!(m.phase(), Phase::Monitoring);
        assert_ne!(m.session_id(), first_session);
        assert_eq!(m.deadline(), Some(45_000));
    }

    #[test]
    fn test_retry_rejected_while_running() {
        let clock = ManualClock::new(0);
        let mut m = machine(&clock);
        m.start();
        assert_eq!(m.retry(), Err(SessionError::NotRetryable(Phase::Monitoring)));
    }

    #[test]
    fn test_reset_starts_fresh_session() {
        let clock = ManualClock::new(0);
        let mut m = machine(&clock);
        m.start();
        m.on_frame(live(0.9));
        clock.advance(15_000);
        m.reset();
        assert_eq!(m.consecutive_live_frames(), 0);
        assert_eq!(m.deadline(), Some(35_000));
    }

    #[test]
    fn test_rejection_resets_counter_and_fatal_fails() {
        let clock = ManualClock::new(0);
        let mut m = machine(&clock);
        m.start();
        m.on_frame(live(0.9));
        assert_eq!(m.on_rejected("image too dark", false), Step::Continue);
        assert_eq!(m.consecutive_live_frames(), 0);
        assert_eq!(m.phase(), Phase::Monitoring);

        assert!(matches!(m.on_rejected("service disabled", true), Step::Failed { .. }));
        assert_eq!(m.phase(), Phase::Error);
        assert_eq!(m.on_frame(live(0.9)), Step::Ignored);
        assert_eq!(m.retry(), Ok(Step::Continue));
    }

    #[test]
    fn test_debounced_message_keeps_first() {
        let clock = ManualClock::new(0);
        let mut m = machine(&clock);
        m.start();
        clock.advance(1_500);
        m.on_frame(Verdict::NoFace.into());
        clock.advance(200);
        m.on_frame(Verdict::TooFar.into());
        let status = m.status().unwrap();
        assert_eq!(status.phase, Phase::Monitoring);
        assert_eq!(status.text, verdict_text(&Verdict::NoFace));
    }

    #[test]
    fn test_notice_keeps_counter() {
        let clock = ManualClock::new(0);
        let mut m = machine(&clock);
        m.start();
        m.on_frame(live(0.9));
        clock.advance(2_000);
        assert!(m.notice("Connection problem, retrying"));
        assert_eq!(m.consecutive_live_frames(), 1);
        assert_eq!(m.phase(), Phase::Analyzing);
    }

    #[test]
    fn test_abandon_discards_session() {
        let clock = ManualClock::new(0);
        let mut m = machine(&clock);
        m.start();
        m.abandon("Switched to another sign-in method");
        assert_eq!(m.phase(), Phase::Idle);
        assert_eq!(m.deadline(), None);
    }

    fn arb_verdict() -> impl Strategy<Value = Verdict> {
        prop_oneof![
            Just(Verdict::NoFace),
            Just(Verdict::MultipleFaces),
            Just(Verdict::TooFar),
            Just(Verdict::TooClose),
            Just(Verdict::Reposition {
                direction: Direction::Left
            }),
            (0.0f64..0.6).prop_map(|confidence| Verdict::NotLive { confidence }),
            (0.6f64..=1.0).prop_map(|confidence| Verdict::Live { confidence }),
        ]
    }

    proptest! {
        #[test]
        fn test_live_counter_only_grows_or_resets(verdicts in prop::collection::vec(arb_verdict(), 1..40)) {
            let clock = ManualClock::new(0);
            let config = SessionConfig {
                required_live_frames: 5,
                ..SessionConfig::default()
            };
            let mut m = SessionMachine::new(config, &clock);
            m.start();
            let mut previous = 0;
            for verdict in verdicts {
                clock.advance(100);
                let was_authenticated = m.phase() == Phase::Authenticated;
                m.on_frame(verdict.into());
                let count = m.consecutive_live_frames();
                if was_authenticated {
                    prop_assert_eq!(count, previous);
                    prop_assert_eq!(m.phase(), Phase::Authenticated);
                } else if verdict.is_live() {
                    prop_assert_eq!(count, previous + 1);
                } else {
                    prop_assert_eq!(count, 0);
                }
                previous = count;
            }
        }
    }
}
