// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Terminal color utilities
//!
//! Provides consistent glyphs and colors for task and run states.

use colored::{ColoredString, Colorize};
use std::time::Duration;

use crate::ledger::{RunStatus, SkipReason, TaskRecord, TaskState};
use crate::quality::GateOutcome;

/// Glyph for a task, taking gate verdicts into account
pub fn task_glyph(task: &TaskRecord) -> ColoredString {
    let degraded = task
        .outcome
        .as_ref()
        .and_then(|o| o.gate_outcome())
        .is_some_and(|o| o != GateOutcome::Pass);

    match task.state {
        TaskState::Succeeded if degraded => "⚠".yellow(),
        TaskState::Succeeded => "✓".green(),
        TaskState::Failed => "✗".red(),
        TaskState::Skipped => "○".dimmed(),
        TaskState::Running => "→".blue(),
        TaskState::Pending => "·".dimmed(),
    }
}

/// Colored run status label
pub fn status_label(status: RunStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        RunStatus::Succeeded => label.green().bold(),
        RunStatus::Warn => label.yellow().bold(),
        RunStatus::Failed => label.red().bold(),
        RunStatus::Cancelled => label.magenta().bold(),
        RunStatus::Running => label.blue().bold(),
    }
}

/// One-line explanation of a task's state
pub fn task_detail(task: &TaskRecord) -> String {
    let attempts = match task.attempts {
        0 => String::new(),
        1 => "1 attempt".to_string(),
        n => format!("{} attempts", n),
    };

    let reason = match (&task.skip_reason, &task.last_error) {
        (Some(SkipReason::UpstreamFailed { origin }), _) => format!("upstream '{}' failed", origin),
        (Some(SkipReason::Cancelled), _) => "run cancelled".to_string(),
        (None, Some(error)) if task.state == TaskState::Failed => error.clone(),
        _ => match task.outcome.as_ref().and_then(|o| o.gate_outcome()) {
            Some(gate) => format!("gate {}", gate),
            None => String::new(),
        },
    };

    [attempts, reason]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Print a styled header
pub fn print_header(title: &str) {
    println!("{}", title.bold());
    println!("{}", "═".repeat(title.chars().count().max(40)));
}

/// Print a success check
pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green(), msg);
}

/// Print an error cross
pub fn print_error(msg: &str) {
    println!("  {} {}", "✗".red(), msg);
}

/// Print a warning
pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠".yellow(), msg);
}

/// Print an info item
pub fn print_info(msg: &str) {
    println!("  {} {}", "→".blue(), msg);
}

/// Compact human duration, e.g. `42s`, `3m`, `5d`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}
