//! Call-stack capture for failure reports.

use std::backtrace::Backtrace;

/// Captures the calling thread's stack, one entry per frame, dropping the
/// innermost `skip` frames.
pub fn backtrace(skip: usize) -> Vec<String> {
    // this function's own frame is never interesting
    frames(&Backtrace::force_capture())
        .into_iter()
        .skip(skip + 1)
        .collect()
}

/// Captures the calling thread's stack as text, one frame per line, each
/// line prefixed with `prefix`.
pub fn backtrace_string(skip: usize, prefix: &str) -> String {
    render(&backtrace(skip + 1), prefix)
}

/// Splits a captured backtrace into frames, a frame being its symbol line
/// joined with any `at file:line` line that follows it.
pub fn frames(trace: &Backtrace) -> Vec<String> {
    let text = trace.to_string();
    let mut frames: Vec<String> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if starts_frame(trimmed) || frames.is_empty() {
            frames.push(trimmed.to_string());
        } else if let Some(last) = frames.last_mut() {
            last.push(' ');
            last.push_str(trimmed);
        }
    }

    frames
}

/// Joins frames into a multi-line string.
pub fn render(frames: &[String], prefix: &str) -> String {
    let mut out = String::new();
    for frame in frames {
        out.push_str(prefix);
        out.push_str(frame);
        out.push('\n');
    }
    out
}

fn starts_frame(line: &str) -> bool {
    match line.split_once(':') {
        Some((index, _)) => !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}
