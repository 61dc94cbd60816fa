// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Progress indicators for running pipelines

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress bar counting tasks that reached a terminal state.
///
/// Hidden when `quiet` is set; indicatif also hides it on its own when
/// stderr is not a terminal.
pub fn run_progress(total: u64, run_id: &str, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.blue} {msg} [{bar:40.cyan/blue}] {pos}/{len} tasks ({elapsed})")
            .expect("Invalid progress bar template")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
            .progress_chars("█▓░"),
    );
    pb.set_message(run_id.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_progress_is_hidden() {
        let pb = run_progress(6, "2024-01-01", true);
        assert!(pb.is_hidden());

        pb.set_length(6);
        pb.inc(2);
        assert_eq!(pb.position(), 2);
    }
}
