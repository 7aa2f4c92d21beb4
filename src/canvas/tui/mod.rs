use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Template used when a caller-supplied one fails to parse.
const FALLBACK_TEMPLATE: &str = "{spinner} [{elapsed_precise}] {bar} {bytes}/{total_bytes}";

/// A builder that helps in making a new [ProgressStyle] for use.
pub(crate) struct ProgressStyleBuilder {
    /// The [ProgressStyle] being built.
    progress_style: ProgressStyle,
}

impl ProgressStyleBuilder {
    /// Sets the template of the progress style.
    ///
    /// A template that fails to parse degrades to [FALLBACK_TEMPLATE] and
    /// finally to the default bar, so a bad template never loses the bar.
    pub(crate) fn template(mut self, msg_template: &str) -> Result<Self> {
        match self.progress_style.clone().template(msg_template) {
            Ok(style) => self.progress_style = style,
            Err(err) => {
                warn!(
                    "Template error with '{}': {}. Using fallback template.",
                    msg_template, err
                );
                self.progress_style = self
                    .progress_style
                    .clone()
                    .template(FALLBACK_TEMPLATE)
                    .unwrap_or_else(|fallback_err| {
                        error!(
                            "Fallback template also failed: {}. Using default bar.",
                            fallback_err
                        );
                        ProgressStyle::default_bar()
                    });
            }
        }
        Ok(self)
    }

    /// Sets the progress style chars.
    pub(crate) fn progress_chars(mut self, chars: &str) -> Result<Self> {
        self.progress_style = self.progress_style.progress_chars(chars);
        Ok(self)
    }

    pub(crate) fn build(self) -> ProgressStyle {
        self.progress_style
    }
}

impl Default for ProgressStyleBuilder {
    fn default() -> Self {
        Self {
            progress_style: ProgressStyle::default_bar(),
        }
    }
}

/// A builder that initializes and configures a new [ProgressBar] for one
/// byte transfer.
pub(crate) struct ProgressBarBuilder {
    /// The [ProgressBar] to build.
    progress_bar: ProgressBar,
}

impl ProgressBarBuilder {
    /// Creates a new builder for a bar spanning `len` bytes.
    pub(crate) fn new(len: u64) -> Self {
        Self {
            progress_bar: ProgressBar::new(len),
        }
    }

    /// Sets the style of the progress bar to the style given.
    pub(crate) fn style(self, progress_style: ProgressStyle) -> Self {
        self.progress_bar.set_style(progress_style);
        self
    }

    /// Sets the draw target (output) of the progress bar.
    pub(crate) fn draw_target(self, target: ProgressDrawTarget) -> Self {
        self.progress_bar.set_draw_target(target);
        self
    }

    /// Sets the steady tick's duration to the given duration.
    pub(crate) fn steady_tick(self, duration: Duration) -> Self {
        self.progress_bar.enable_steady_tick(duration);
        self
    }

    /// Returns the newly built progress bar.
    pub(crate) fn build(self) -> ProgressBar {
        self.progress_bar
    }
}

/// Builds the byte-denominated bar shown while a single file streams to
/// disk. The bar is advisory only; an unknown length falls back to a plain
/// spinner tracking bytes written.
pub(crate) fn byte_progress_bar(len: Option<u64>, message: &str) -> ProgressBar {
    let bar = match len {
        Some(len) => {
            let style = ProgressStyleBuilder::default()
                .template("{spinner} {msg} [{bar:40}] {bytes}/{total_bytes}")
                .and_then(|builder| builder.progress_chars("=>-"))
                .map(ProgressStyleBuilder::build)
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            ProgressBarBuilder::new(len)
                .style(style)
                .draw_target(ProgressDrawTarget::stderr_with_hz(5))
                .steady_tick(Duration::from_millis(200))
                .build()
        }
        None => {
            let bar = ProgressBar::new_spinner();
            bar.enable_steady_tick(Duration::from_millis(200));
            bar
        }
    };

    bar.set_message(message.to_string());
    bar
}
