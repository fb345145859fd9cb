use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub struct Progress {
    spinner: Option<ProgressBar>,
}

impl Progress {
    pub fn new() -> Self {
        Self { spinner: None }
    }

    pub fn spinner(&mut self, message: &str) {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        self.spinner = Some(spinner);
    }

    pub fn stop_and_clear(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte progress for a single file transfer.
pub struct Bar {
    progress: ProgressBar,
}

impl Bar {
    pub fn new(message: &str, total: u64) -> Self {
        let progress = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg:<32} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec}")
        {
            progress.set_style(style.progress_chars("=> "));
        }
        progress.set_message(message.to_string());

        Self { progress }
    }

    pub fn hidden() -> Self {
        Self {
            progress: ProgressBar::hidden(),
        }
    }

    pub fn finish(&self) {
        self.progress.finish_and_clear();
    }

    /// A callback suitable for [`crate::downloader::Downloader::download`].
    pub fn callback(&self) -> impl FnMut(u64, u64) + Send + 'static {
        let progress = self.progress.clone();
        move |current, total| {
            if progress.length() != Some(total) {
                progress.set_length(total);
            }
            progress.set_position(current);
        }
    }
}
