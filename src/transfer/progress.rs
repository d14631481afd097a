//! Text progress bar for the interactive terminal.
//!
//! [`render_progress_line`] is a pure function of the numbers it is given.
//! [`TextProgressBar`] keeps per-file state, throttles redraws and writes
//! the rendered lines to the terminal sink.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{FormattedDuration, HumanBytes};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::transfer::channel::TerminalWriter;

/// Narrowest bar worth drawing before fields start being dropped.
const BAR_MIN_WIDTH: usize = 24;

/// Minimum time between two intermediate redraws.
pub const REFRESH_INTERVAL: Duration = Duration::from_millis(200);

/// Everything needed to draw one progress line.
#[derive(Debug, Clone, Copy)]
pub struct ProgressSnapshot<'a> {
    pub file_name: &'a str,
    /// 1-based position of the file in the session.
    pub file_index: usize,
    pub file_count: usize,
    pub file_size: u64,
    pub step: u64,
    pub elapsed: Duration,
}

fn ellipsize(text: &str, max_width: usize) -> String {
    if text.width() <= max_width {
        return text.to_string();
    }
    let budget = max_width.saturating_sub(3);
    let mut out = String::new();
    let mut width = 0;
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if width + w > budget {
            break;
        }
        width += w;
        out.push(c);
    }
    out.push_str("...");
    out
}

/// Render `name [████░░░░] pct | size | speed | eta` within `columns`.
///
/// Fields are dropped from the right, and then the name is shortened, when
/// the bar would otherwise be narrower than its minimum.
pub fn render_progress_line(snapshot: &ProgressSnapshot<'_>, columns: usize) -> String {
    let size = snapshot.file_size;
    let step = snapshot.step.min(size);
    let fraction = if size == 0 {
        1.0
    } else {
        step as f64 / size as f64
    };
    let percentage = (fraction * 100.0).floor() as u64;

    let secs = snapshot.elapsed.as_secs_f64();
    let speed = if secs > 0.0 { step as f64 / secs } else { 0.0 };
    let eta = if speed > 0.0 {
        Duration::from_secs(((size - step) as f64 / speed).round() as u64)
    } else {
        Duration::ZERO
    };

    let mut left = if snapshot.file_count > 1 {
        format!(
            "({}/{}) {}",
            snapshot.file_index, snapshot.file_count, snapshot.file_name
        )
    } else {
        snapshot.file_name.to_string()
    };

    let fields = [
        format!("{}%", percentage),
        HumanBytes(step).to_string(),
        format!("{}/s", HumanBytes(speed as u64)),
        format!("{} ETA", FormattedDuration(eta)),
    ];
    let mut keep = fields.len();
    let right = loop {
        let right = format!(" {}", fields[..keep].join(" | "));
        let used = left.width() + right.width() + 3;
        if columns >= used + BAR_MIN_WIDTH || keep == 1 {
            break right;
        }
        keep -= 1;
    };

    let fixed = right.width() + 3;
    if columns < left.width() + fixed + BAR_MIN_WIDTH {
        left = ellipsize(&left, columns.saturating_sub(fixed + BAR_MIN_WIDTH).max(4));
    }
    let bar_width = columns.saturating_sub(left.width() + fixed);
    let done = ((bar_width as f64) * fraction).round() as usize;

    format!(
        "{} [{}{}]{}",
        left,
        "\u{2588}".repeat(done),
        "\u{2591}".repeat(bar_width - done),
        right
    )
}

/// Per-file progress events raised by the transfer engine.
pub trait FileProgress: Send {
    fn on_num(&mut self, count: usize);
    fn on_name(&mut self, name: &str);
    fn on_size(&mut self, size: u64);
    /// Bytes of the current file transferred so far.
    fn on_step(&mut self, step: u64);
}

/// Stateful progress display for one session.
pub struct TextProgressBar {
    writer: Arc<dyn TerminalWriter>,
    columns: Arc<AtomicUsize>,
    tmux_pane_columns: Option<usize>,
    file_count: usize,
    file_index: usize,
    file_name: String,
    file_size: u64,
    file_step: Option<u64>,
    started: Instant,
    last_update: Option<Instant>,
    first_write: bool,
}

impl TextProgressBar {
    /// `columns` is shared with the filter so resizes apply mid-transfer.
    pub fn new(
        writer: Arc<dyn TerminalWriter>,
        columns: Arc<AtomicUsize>,
        tmux_pane_width: Option<u16>,
    ) -> Self {
        Self {
            writer,
            columns,
            tmux_pane_columns: tmux_pane_width.filter(|w| *w > 0).map(usize::from),
            file_count: 0,
            file_index: 0,
            file_name: String::new(),
            file_size: 0,
            file_step: None,
            started: Instant::now(),
            last_update: None,
            first_write: true,
        }
    }

    fn show(&mut self, force: bool) {
        let now = Instant::now();
        if !force
            && self
                .last_update
                .is_some_and(|last| now.duration_since(last) < REFRESH_INTERVAL)
        {
            return;
        }
        self.last_update = Some(now);

        let columns = self
            .tmux_pane_columns
            .unwrap_or_else(|| self.columns.load(Ordering::Relaxed));
        let line = render_progress_line(
            &ProgressSnapshot {
                file_name: &self.file_name,
                file_index: self.file_index,
                file_count: self.file_count,
                file_size: self.file_size,
                step: self.file_step.unwrap_or(0),
                elapsed: now.duration_since(self.started),
            },
            columns,
        );

        let out = if self.first_write {
            self.first_write = false;
            if self.file_index > 1 {
                format!("\r\n{}", line)
            } else {
                line
            }
        } else if self.tmux_pane_columns.is_some() {
            format!("\x1b[{}D{}", columns, line)
        } else {
            format!("\r{}", line)
        };
        self.writer.write_to_terminal(out.as_bytes());
    }
}

impl FileProgress for TextProgressBar {
    fn on_num(&mut self, count: usize) {
        self.file_count = count;
    }

    fn on_name(&mut self, name: &str) {
        self.file_index += 1;
        self.file_name = name.to_string();
        self.file_size = 0;
        self.file_step = None;
        self.started = Instant::now();
        self.last_update = None;
        self.first_write = true;
    }

    fn on_size(&mut self, size: u64) {
        self.file_size = size;
    }

    fn on_step(&mut self, step: u64) {
        if self.file_step.is_some_and(|prev| step <= prev) {
            return;
        }
        self.file_step = Some(step);
        self.show(step >= self.file_size);
    }
}
