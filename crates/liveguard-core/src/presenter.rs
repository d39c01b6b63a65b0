//! Projection of session state onto visible elements.

use serde::Serialize;

use crate::session::{Phase, SessionSnapshot};
use crate::status::Tone;

/// Everything the UI shows. Derived solely from a [`SessionSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewModel {
    pub phase: Phase,
    pub text: String,
    pub hint: Option<String>,
    /// Style class for the oval guide border.
    pub oval_class: &'static str,
    pub progress: Option<(u32, u32)>,
    /// Whether the retry / alternate-method prompt is shown.
    pub recovery_prompt: bool,
}

impl ViewModel {
    pub fn project(snapshot: &SessionSnapshot) -> Self {
        // The displayed phase is the debounced one, not the live phase.
        let Some(status) = snapshot.status.as_ref() else {
            return Self {
                phase: snapshot.phase,
                text: "Starting camera".to_string(),
                hint: None,
                oval_class: "oval-idle",
                progress: None,
                recovery_prompt: false,
            };
        };

        let oval_class = match (status.phase, status.tone) {
            (Phase::Idle, _) => "oval-idle",
            (Phase::Authenticated, _) => "oval-success",
            (Phase::Analyzing, _) => "oval-analyzing",
            (Phase::TimedOut | Phase::Error, _) => "oval-error",
            (Phase::Monitoring, Tone::Positive) => "oval-waiting",
            (Phase::Monitoring, Tone::Negative) => "oval-warning",
        };

        Self {
            phase: status.phase,
            text: status.text.clone(),
            hint: status.hint.clone(),
            oval_class,
            progress: status.progress,
            recovery_prompt: matches!(status.phase, Phase::TimedOut | Phase::Error),
        }
    }
}

/// Renders a view. Implementations only draw; they make no decisions.
pub trait Presenter {
    fn render(&mut self, view: &ViewModel);
}

impl<P: Presenter + ?Sized> Presenter for Box<P> {
    fn render(&mut self, view: &ViewModel) {
        (**self).render(view);
    }
}

/// Wraps a presenter so re-applying the same state draws nothing.
pub struct Projector<P> {
    inner: P,
    last: Option<ViewModel>,
}

impl<P: Presenter> Projector<P> {
    pub fn new(inner: P) -> Self {
        Self { inner, last: None }
    }

    /// Project and render the snapshot. Returns whether anything was drawn.
    pub fn apply(&mut self, snapshot: &SessionSnapshot) -> bool {
        let view = ViewModel::project(snapshot);
        if self.last.as_ref() == Some(&view) {
            return false;
        }
        self.inner.render(&view);
        self.last = Some(view);
        true
    }

    pub fn last(&self) -> Option<&ViewModel> {
        self.last.as_ref()
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

/// Presenter that keeps every rendered view, for tests and replay.
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    pub views: Vec<ViewModel>,
}

impl Presenter for RecordingPresenter {
    fn render(&mut self, view: &ViewModel) {
        self.views.push(view.clone());
    }
}
