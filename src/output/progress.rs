use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::styling::{failure, muted, notice, strong, success};

/// Spinner for one pipeline stage, drawn on stderr.
pub struct StageSpinner {
    pb: ProgressBar,
    label: String,
}

impl StageSpinner {
    /// Prints the stage section header once per run.
    pub fn header(visible: bool) {
        if visible {
            eprintln!("{}  {}", strong("⚙️"), strong("Stages").underlined());
        }
    }

    pub fn start(label: impl Into<String>, visible: bool) -> Self {
        let label = label.into();
        let pb = if visible {
            create_spinner(notice(&label).to_string())
        } else {
            ProgressBar::hidden()
        };
        Self { pb, label }
    }

    pub fn finish(self, detail: &str) {
        self.pb.finish_with_message(format!(
            "{} {}",
            success(format!("{} ✓", self.label)),
            muted(detail)
        ));
    }

    pub fn fail(self, reason: &str) {
        self.pb.abandon_with_message(format!(
            "{} {}",
            failure(format!("{} ✗", self.label)),
            muted(reason)
        ));
    }
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::default_spinner().template("  {msg} {spinner}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
