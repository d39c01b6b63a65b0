use liveguard_core::{Presenter, ViewModel};

/// Headless presenter: each visible change becomes one structured log line.
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn render(&mut self, view: &ViewModel) {
        tracing::info!(
            phase = view.phase.as_str(),
            oval = view.oval_class,
            text = %view.text,
            hint = ?view.hint,
            progress = ?view.progress,
            recovery_prompt = view.recovery_prompt,
            "view updated"
        );
    }
}
