use std::io::IsTerminal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{Level, event, instrument};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressType {
    /// progress bar when attached to a terminal, text updates otherwise
    #[default]
    Auto,
    ProgressBar,
    TextUpdates,
}

#[derive(Debug, Clone, Default)]
pub struct ProgressSettings {
    pub progress_type: ProgressType,
    /// delay between updates; defaults to 200ms for the bar and 10s for text updates
    pub progress_delay: Option<Duration>,
}

#[derive(Debug, Clone)]
enum Mode {
    Silent,
    Bar { delay: Duration },
    Text { delay: Duration },
}

/// Where transfer progress and countdowns go, fixed for the whole run
#[derive(Debug, Clone)]
pub struct Reporter {
    mode: Mode,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::silent()
    }
}

impl Reporter {
    pub fn new(settings: Option<&ProgressSettings>) -> Self {
        let Some(settings) = settings else {
            return Self::silent();
        };
        let progress_type = match settings.progress_type {
            ProgressType::Auto if std::io::stderr().is_terminal() => ProgressType::ProgressBar,
            ProgressType::Auto => ProgressType::TextUpdates,
            other => other,
        };
        let mode = match progress_type {
            ProgressType::TextUpdates => Mode::Text {
                delay: settings
                    .progress_delay
                    .unwrap_or(Duration::from_secs(10)),
            },
            _ => Mode::Bar {
                delay: settings
                    .progress_delay
                    .unwrap_or(Duration::from_millis(200)),
            },
        };
        Self { mode }
    }

    /// Only emits trace-level events
    pub fn silent() -> Self {
        Self { mode: Mode::Silent }
    }

    fn bar(&self, length: Option<u64>) -> Option<indicatif::ProgressBar> {
        let Mode::Bar { delay } = self.mode else {
            return None;
        };
        let hz = (1000 / delay.as_millis().max(1)).clamp(1, 20) as u8;
        let bar = indicatif::ProgressBar::with_draw_target(
            length,
            indicatif::ProgressDrawTarget::stderr_with_hz(hz),
        );
        bar.set_style(
            indicatif::ProgressStyle::with_template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner()),
        );
        Some(bar)
    }

    pub fn transfer(&self, operation: &'static str, name: &str, size: Option<u64>) -> TransferTracker {
        let sink = match &self.mode {
            Mode::Silent => Sink::Silent,
            Mode::Text { delay } => Sink::Text {
                delay: *delay,
                last: None,
            },
            Mode::Bar { .. } => self.bar(size).map_or(Sink::Silent, Sink::Bar),
        };
        TransferTracker {
            operation,
            name: name.strip_suffix(crate::url::TMP_SUFFIX).unwrap_or(name).to_string(),
            size,
            processed: 0,
            reported_kb: 0,
            started: Instant::now(),
            sink,
        }
    }

    /// Waits `duration`, reporting the time left every second
    #[instrument(skip(self))]
    pub async fn countdown(&self, message: &str, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let started = tokio::time::Instant::now();
        let bar = self.bar(Some(duration.as_secs().max(1)));
        let mut last_text: Option<tokio::time::Instant> = None;
        loop {
            let elapsed = started.elapsed();
            if elapsed >= duration {
                break;
            }
            let left = round_secs(duration - elapsed);
            let line = format!("{message} (time left: {})", humantime::format_duration(left));
            match (&self.mode, &bar) {
                (_, Some(bar)) => {
                    bar.set_position(elapsed.as_secs());
                    bar.set_message(line);
                }
                (Mode::Text { delay }, None) => {
                    if last_text.is_none_or(|last| last.elapsed() >= *delay) {
                        event!(Level::INFO, "{}", line);
                        last_text = Some(tokio::time::Instant::now());
                    }
                }
                _ => event!(Level::TRACE, "{}", line),
            }
            tokio::time::sleep((duration - elapsed).min(Duration::from_secs(1))).await;
        }
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
    }
}

#[derive(Debug)]
enum Sink {
    Silent,
    Bar(indicatif::ProgressBar),
    Text { delay: Duration, last: Option<Instant> },
}

/// Byte progress of a single download or upload
#[derive(Debug)]
pub struct TransferTracker {
    operation: &'static str,
    name: String,
    size: Option<u64>,
    processed: u64,
    reported_kb: u64,
    started: Instant,
    sink: Sink,
}

impl TransferTracker {
    pub fn add(&mut self, bytes: u64) {
        self.processed += bytes;
        let processed_kb = self.processed / 1024;
        if processed_kb <= self.reported_kb {
            return;
        }
        self.reported_kb = processed_kb;
        self.report();
    }

    fn report(&mut self) {
        let message = self.message();
        match &mut self.sink {
            Sink::Silent => event!(Level::TRACE, "{}", message),
            Sink::Bar(bar) => {
                bar.set_position(self.processed);
                bar.set_message(message);
            }
            Sink::Text { delay, last } => {
                if last.is_none_or(|last| last.elapsed() >= *delay) {
                    event!(Level::INFO, "{}", message);
                    *last = Some(Instant::now());
                }
            }
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn remaining(&self) -> Duration {
        match self.size {
            Some(total) => estimate_remaining(self.started.elapsed(), self.processed, total),
            None => Duration::ZERO,
        }
    }

    pub fn message(&self) -> String {
        match self.size {
            Some(total) => format!(
                "{}: {} | {}/{} ({}, time left: {})",
                self.operation,
                self.name,
                bytesize::ByteSize(self.processed),
                bytesize::ByteSize(total),
                percent(self.processed, total),
                humantime::format_duration(round_secs(self.remaining()))
            ),
            None => format!(
                "{}: {} | {}",
                self.operation,
                self.name,
                bytesize::ByteSize(self.processed)
            ),
        }
    }

    pub fn finish(self) {
        event!(
            Level::DEBUG,
            "{}: {} | {} in {}",
            self.operation,
            self.name,
            bytesize::ByteSize(self.processed),
            humantime::format_duration(round_secs(self.started.elapsed()))
        );
        if let Sink::Bar(bar) = self.sink {
            bar.finish_and_clear();
        }
    }
}

/// Linear extrapolation of the time left, never negative
pub fn estimate_remaining(elapsed: Duration, processed: u64, total: u64) -> Duration {
    if processed == 0 {
        return Duration::ZERO;
    }
    let elapsed_ms = elapsed.as_millis();
    let expected_ms = elapsed_ms * total as u128 / processed as u128;
    let remaining_ms = expected_ms.saturating_sub(elapsed_ms);
    Duration::from_millis(remaining_ms.min(u64::MAX as u128) as u64)
}

pub fn percent(value: u64, total: u64) -> String {
    if total == 0 {
        return "100.00%".to_string();
    }
    format!("{:.2}%", value as f64 * 100.0 / total as f64)
}

fn round_secs(duration: Duration) -> Duration {
    Duration::from_secs(duration.as_secs())
}

/// Started/finished counter for units of work such as groups or health rounds
#[derive(Debug, Default)]
pub struct ProgressCounter {
    started: AtomicU64,
    finished: AtomicU64,
}

pub struct ProgressGuard<'a> {
    progress: &'a ProgressCounter,
}

impl<'a> ProgressGuard<'a> {
    pub fn new(progress: &'a ProgressCounter) -> Self {
        progress.started.fetch_add(1, Ordering::Relaxed);
        Self { progress }
    }
}

impl Drop for ProgressGuard<'_> {
    fn drop(&mut self) {
        self.progress.finished.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub started: u64,
    pub finished: u64,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard(&self) -> ProgressGuard<'_> {
        ProgressGuard::new(self)
    }

    pub fn get(&self) -> Status {
        let mut status = Status {
            started: self.started.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Relaxed),
        };
        if status.finished > status.started {
            event!(
                Level::DEBUG,
                "Progress inversion - started: {}, finished {}",
                status.started,
                status.finished
            );
            status.started = status.finished;
        }
        status
    }
}
