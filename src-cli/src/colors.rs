//! Console styling.
//!
//! Styles apply only when the target stream is a terminal, so piped output
//! and log captures from the field laptop stay plain text.

use owo_colors::OwoColorize;
use plotcam_common::WorkerStatus;
use std::io::IsTerminal;

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn is_terminal(self) -> bool {
        match self {
            Stream::Stdout => std::io::stdout().is_terminal(),
            Stream::Stderr => std::io::stderr().is_terminal(),
        }
    }
}

fn paint<F>(stream: Stream, msg: &str, style: F) -> String
where
    F: FnOnce(&str) -> String,
{
    if stream.is_terminal() {
        style(msg)
    } else {
        msg.to_string()
    }
}

/// Left-align `msg` in `width` columns before styling, so escape codes do
/// not count towards the width.
pub fn pad_left<F>(msg: &str, width: usize, style: F) -> String
where
    F: FnOnce(&str) -> String,
{
    style(&format!("{:<width$}", msg))
}

fn labelled(label: &str, msg: &str, style: fn(&str) -> String) -> String {
    format!("{} {}", paint(Stream::Stderr, label, style), msg)
}

pub fn error(msg: &str) -> String {
    labelled("error:", msg, |s| s.red().bold().to_string())
}

pub fn warning(msg: &str) -> String {
    labelled("warning:", msg, |s| s.yellow().bold().to_string())
}

pub fn success(msg: &str) -> String {
    paint(Stream::Stdout, msg, |s| s.green().to_string())
}

pub fn info(msg: &str) -> String {
    paint(Stream::Stdout, msg, |s| s.cyan().to_string())
}

/// Secondary text such as hints and empty-table notes.
pub fn dim(msg: &str) -> String {
    paint(Stream::Stdout, msg, |s| s.dimmed().to_string())
}

pub fn bold(msg: &str) -> String {
    paint(Stream::Stdout, msg, |s| s.bold().to_string())
}

pub fn header(msg: &str) -> String {
    paint(Stream::Stdout, msg, |s| s.bold().blue().to_string())
}

pub fn path(msg: &str) -> String {
    paint(Stream::Stdout, msg, |s| s.underline().to_string())
}

/// Plot numbers and counts.
pub fn number(msg: &str) -> String {
    paint(Stream::Stdout, msg, |s| s.cyan().to_string())
}

pub fn yes() -> String {
    paint(Stream::Stdout, "yes", |s| s.green().to_string())
}

pub fn no() -> String {
    paint(Stream::Stdout, "no", |s| s.dimmed().to_string())
}

/// Level indicator printed when the rig levels or tilts.
pub fn level(is_level: bool) -> String {
    if is_level {
        paint(Stream::Stdout, "Camera is level", |s| s.green().to_string())
    } else {
        paint(Stream::Stdout, "Camera is not level", |s| s.red().to_string())
    }
}

pub fn worker_status(status: WorkerStatus) -> String {
    let text = status.to_string();
    paint(Stream::Stdout, &text, |s| match status {
        WorkerStatus::Streaming => s.green().to_string(),
        WorkerStatus::Starting | WorkerStatus::Stopped => s.dimmed().to_string(),
        WorkerStatus::NoDevice => s.yellow().to_string(),
        WorkerStatus::DeviceError | WorkerStatus::ChannelError => s.red().bold().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_left_pads_before_styling() {
        let padded = pad_left("NAME", 8, |s| format!("[{}]", s));
        assert_eq!(padded, "[NAME    ]");
    }

    #[test]
    fn labels_keep_message_text() {
        assert!(error("disk full").ends_with("disk full"));
        assert!(warning("no sensor").contains("warning:"));
    }
}
