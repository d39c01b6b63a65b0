//! liveguard-core: capture geometry, verdict evaluation and the capture
//! session state machine.
//!
//! Nothing in this crate touches a camera, the network or wall-clock time.

pub mod clock;
pub mod detection;
pub mod evaluator;
pub mod geometry;
pub mod presenter;
pub mod session;
pub mod status;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use detection::{DetectionResult, FaceRect, ServiceReply};
pub use evaluator::{evaluate, Direction, EvaluatorConfig, Verdict};
pub use geometry::{
    compute_region, CaptureRegion, DisplaySize, FitMode, GeometryError, GuideConfig,
    RegionTracker, VideoSize,
};
pub use presenter::{Presenter, Projector, ViewModel};
pub use session::{
    FrameAssessment, Phase, SessionConfig, SessionError, SessionMachine, SessionSnapshot, Step,
};
pub use status::{DebounceConfig, StatusUpdate, Tone};
