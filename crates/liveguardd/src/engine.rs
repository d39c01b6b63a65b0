use std::time::Duration;

use liveguard_capture::{CaptureError, FrameCapturer, VideoSource};
use liveguard_core::evaluator::reports_multiple_faces;
use liveguard_core::{
    Clock, DisplaySize, EvaluatorConfig, FrameAssessment, GuideConfig, MonotonicClock, Phase,
    Presenter, Projector, RegionTracker, ServiceReply, SessionConfig, SessionError,
    SessionMachine, SessionSnapshot, Step, Verdict, ViewModel,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::backoff::{FailureAction, FailureTracker};
use crate::bridge::{Bridge, BridgeEvent};
use crate::transport::{AuthRequest, AuthTransport};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("camera has been released")]
    CameraReleased,
    #[error("session already authenticated")]
    AlreadyAuthenticated,
    #[error("engine task exited")]
    ChannelClosed,
}

/// Capture loop settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub session: SessionConfig,
    pub evaluator: EvaluatorConfig,
    pub guide: GuideConfig,
    pub display: Option<DisplaySize>,
    pub frame_interval: Duration,
    pub region_refresh_ms: u64,
}

/// Session snapshot plus what the user currently sees.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub session: SessionSnapshot,
    pub view: Option<ViewModel>,
    pub running: bool,
    pub camera_released: bool,
}

/// Messages sent from D-Bus handlers to the engine task.
enum EngineRequest {
    Status {
        reply: oneshot::Sender<StatusReport>,
    },
    Retry {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Reset {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    SwitchMethod {
        method: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Resize {
        display: DisplaySize,
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn status(&self) -> Result<StatusReport, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    /// Start a fresh session after an error or timeout.
    pub async fn retry(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Retry { reply }).await?
    }

    /// Discard the current session and start a fresh one.
    pub async fn reset(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Reset { reply }).await?
    }

    /// Abandon face capture in favour of another authentication method.
    pub async fn switch_method(&self, method: String) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::SwitchMethod { method, reply })
            .await?
    }

    pub async fn resize(&self, display: DisplaySize) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Resize { display, reply })
            .await
    }

    /// Stop the loop and release the camera. Resolves once both are done.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Shutdown { reply }).await
    }
}

/// Spawn the capture loop on the current tokio runtime.
///
/// The engine exclusively owns the capturer (and so the camera), the
/// session state machine and the presenter. Everything else reaches it
/// through the returned handle.
pub fn spawn_engine<S, T>(
    config: EngineConfig,
    capturer: FrameCapturer<S>,
    transport: T,
    bridge: Bridge,
    presenter: Box<dyn Presenter + Send>,
) -> EngineHandle
where
    S: VideoSource + 'static,
    T: AuthTransport + 'static,
{
    let (tx, rx) = mpsc::channel::<EngineRequest>(8);
    let clock = MonotonicClock::new();
    let mut regions = RegionTracker::new(config.guide.clone(), config.region_refresh_ms);
    if let Some(display) = config.display {
        regions.on_resize(display);
    }

    let engine = Engine {
        machine: SessionMachine::new(config.session.clone(), clock),
        clock,
        capturer,
        transport,
        bridge,
        regions,
        evaluator: config.evaluator,
        failures: FailureTracker::new(),
        projector: Projector::new(presenter),
        frame_interval: config.frame_interval,
        running: true,
        next_cycle: Instant::now(),
    };

    tokio::spawn(engine.run(rx));
    EngineHandle { tx }
}

enum Flow {
    Continue,
    Exit,
}

struct Engine<S: VideoSource, T: AuthTransport> {
    machine: SessionMachine<MonotonicClock>,
    clock: MonotonicClock,
    capturer: FrameCapturer<S>,
    transport: T,
    bridge: Bridge,
    regions: RegionTracker,
    evaluator: EvaluatorConfig,
    failures: FailureTracker,
    projector: Projector<Box<dyn Presenter + Send>>,
    frame_interval: Duration,
    /// Checked at the top of every cycle; a cleared flag turns an already
    /// scheduled cycle into a no-op.
    running: bool,
    next_cycle: Instant,
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

impl<S: VideoSource, T: AuthTransport> Engine<S, T> {
    async fn run(mut self, mut rx: mpsc::Receiver<EngineRequest>) {
        tracing::info!("engine started");
        loop {
            // Derived from the machine on every pass, so a reset or retry
            // rearms the timer in the same step that starts the session.
            let deadline = self.session_deadline();
            let next_cycle = self.next_cycle;

            tokio::select! {
                request = rx.recv() => {
                    let Some(request) = request else { break };
                    if let Flow::Exit = self.handle(request).await {
                        return;
                    }
                }
                _ = sleep_until_opt(deadline) => {
                    self.expire().await;
                }
                _ = tokio::time::sleep_until(next_cycle), if self.running => {
                    let delay = self.cycle().await;
                    self.next_cycle = Instant::now() + delay;
                }
            }
        }
        self.teardown();
        tracing::info!("engine exiting");
    }

    fn session_deadline(&self) -> Option<Instant> {
        self.machine
            .deadline()
            .map(|ms| Instant::from_std(self.clock.instant_at(ms)))
    }

    async fn handle(&mut self, request: EngineRequest) -> Flow {
        match request {
            EngineRequest::Status { reply } => {
                let _ = reply.send(self.report());
            }
            EngineRequest::Retry { reply } => {
                let result = self.restart(|machine| machine.retry().map(|_| ()));
                let _ = reply.send(result);
            }
            EngineRequest::Reset { reply } => {
                let result = self.restart(|machine| {
                    machine.reset();
                    Ok(())
                });
                let _ = reply.send(result);
            }
            EngineRequest::SwitchMethod { method, reply } => {
                let result = self.switch_method(method).await;
                let _ = reply.send(result);
            }
            EngineRequest::Resize {
                display: size,
                reply,
            } => {
                tracing::debug!(width = size.width, height = size.height, "display resized");
                self.regions.on_resize(size);
                let _ = reply.send(());
            }
            EngineRequest::Shutdown { reply } => {
                self.teardown();
                let _ = reply.send(());
                tracing::info!("engine exiting");
                return Flow::Exit;
            }
        }
        Flow::Continue
    }

    /// Hand the user over to another sign-in method. An authenticated
    /// session has already been reported and is left alone.
    async fn switch_method(&mut self, method: String) -> Result<(), EngineError> {
        if let Step::Ignored = self
            .machine
            .abandon(&format!("Switching to {method} sign-in"))
        {
            tracing::info!(method, "switch ignored, session already authenticated");
            return Err(EngineError::AlreadyAuthenticated);
        }
        tracing::info!(method, "switching authentication method");
        self.running = false;
        self.capturer.release();
        self.present();
        self.bridge.relay(BridgeEvent::switch_auth(method)).await;
        Ok(())
    }

    fn restart(
        &mut self,
        start: impl FnOnce(&mut SessionMachine<MonotonicClock>) -> Result<(), SessionError>,
    ) -> Result<(), EngineError> {
        if self.capturer.is_released() {
            return Err(EngineError::CameraReleased);
        }
        start(&mut self.machine)?;
        self.failures.reset();
        self.running = true;
        self.next_cycle = Instant::now();
        self.present();
        Ok(())
    }

    fn report(&self) -> StatusReport {
        StatusReport {
            session: self.machine.snapshot(),
            view: self.projector.last().cloned(),
            running: self.running,
            camera_released: self.capturer.is_released(),
        }
    }

    /// One capture/process cycle. Returns the delay before the next one.
    async fn cycle(&mut self) -> Duration {
        if !self.running {
            return self.frame_interval;
        }

        let now = self.clock.now_ms();
        if self.machine.phase() == Phase::Idle {
            let size = self.capturer.video_size();
            if size.width == 0 || size.height == 0 {
                tracing::debug!("waiting for video stream");
                return self.frame_interval;
            }
            self.regions.on_metadata(size);
            self.machine.start();
            self.present();
        }
        if !self.machine.phase().accepts_frames() {
            return self.frame_interval;
        }

        let region = match self.regions.region(now) {
            Ok(region) => region,
            Err(e) => {
                tracing::debug!(error = %e, "capture region not ready");
                return self.frame_interval;
            }
        };

        let sample = match self.capturer.capture(region, now) {
            Ok(sample) => {
                self.failures.record_capture_success();
                sample
            }
            Err(e) => {
                self.on_capture_error(e).await;
                return self.frame_interval;
            }
        };

        let session_id = self.machine.session_id().to_string();
        let request = AuthRequest::new(&sample, &session_id, chrono::Utc::now().timestamp_millis());
        let deadline = self.session_deadline();
        let reply = tokio::select! {
            reply = self.transport.authenticate(&request) => Some(reply),
            _ = sleep_until_opt(deadline) => None,
        };
        let Some(reply) = reply else {
            tracing::debug!("session deadline passed while awaiting the service");
            self.expire().await;
            return self.frame_interval;
        };

        let step = match reply {
            Ok(ServiceReply::Detection(result)) => {
                self.failures.record_transport_success();
                let assessment = FrameAssessment::assess(&region, &result, &self.evaluator);
                tracing::debug!(verdict = ?assessment.verdict, confidence = result.confidence, "frame assessed");
                self.machine.on_frame(assessment)
            }
            Ok(ServiceReply::Rejected { message, fatal }) => {
                self.failures.record_transport_success();
                tracing::debug!(reason = %message, fatal, "service rejected frame");
                if !fatal && reports_multiple_faces(&message) {
                    self.machine.on_frame(Verdict::MultipleFaces.into())
                } else {
                    self.machine.on_rejected(&message, fatal)
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "authentication request failed");
                if let FailureAction::Notify = self.failures.record_transport_failure() {
                    self.machine.notice("Connection problem, retrying");
                }
                Step::Continue
            }
        };

        self.settle(step).await;
        self.failures.next_delay(self.frame_interval)
    }

    async fn on_capture_error(&mut self, error: CaptureError) {
        tracing::warn!(error = %error, "frame capture failed");
        if let FailureAction::Fail = self.failures.record_capture_failure() {
            let step = self
                .machine
                .fail("Camera unavailable. Check the camera and try again");
            self.settle(step).await;
        }
    }

    async fn expire(&mut self) {
        let step = self.machine.expire();
        self.settle(step).await;
    }

    /// Render the outcome of a state machine step and act on terminal ones.
    async fn settle(&mut self, step: Step) {
        self.present();
        match step {
            Step::Authenticated { identity } => {
                self.running = false;
                self.capturer.release();
                self.bridge.relay(BridgeEvent::success(identity)).await;
            }
            Step::TimedOut => {
                self.running = false;
                self.bridge.relay(BridgeEvent::timeout()).await;
            }
            Step::Failed { message } => {
                self.running = false;
                self.bridge.relay(BridgeEvent::error(message)).await;
            }
            Step::Continue | Step::Ignored => {}
        }
    }

    fn present(&mut self) {
        let snapshot = self.machine.snapshot();
        self.projector.apply(&snapshot);
    }

    fn teardown(&mut self) {
        self.running = false;
        self.capturer.release();
    }
}
