//! Terminal output: step summaries, failure-list status and a wait spinner.
//!
//! Uses `indicatif` for the spinner shown while the CLI waits on MySQL or
//! Docker, and `console` for colored status lines. Child sync utilities
//! inherit the terminal, so nothing here animates while a step runs.

use std::path::Path;
use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::pipeline::{FailureList, RunReport, StepReport, StepStatus};

/// Failure-list entries shown by `status` before eliding the rest.
pub const STATUS_PREVIEW: usize = 10;

/// Spinner for a blocking operation (container bring-up, table swap).
///
/// Successes print in green with a checkmark, failures in red.
pub struct Spinner {
    // indicatif spinner, cleared before the final line is printed.
    pb: ProgressBar,
    // Style for the success checkmark.
    green: Style,
    // Style for the failure cross.
    red: Style,
}

impl Spinner {
    pub fn start(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    pub fn success(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", self.green.apply_to("✓"));
    }

    pub fn failure(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", self.red.apply_to("✗"));
    }
}

fn status_style(status: StepStatus) -> Style {
    match status {
        StepStatus::Succeeded => Style::new().green().bold(),
        StepStatus::Partial => Style::new().yellow().bold(),
        StepStatus::Failed => Style::new().red().bold(),
        StepStatus::Skipped => Style::new().dim(),
    }
}

fn status_mark(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Succeeded => "✓",
        StepStatus::Partial => "!",
        StepStatus::Failed => "✗",
        StepStatus::Skipped => "-",
    }
}

/// One summary line per step, e.g. `✓ daily  SUCCEEDED (1 attempt)`.
pub fn step_line(report: &StepReport) -> String {
    let attempts = match report.attempts {
        1 => "1 attempt".to_string(),
        n => format!("{n} attempts"),
    };
    let mut line = format!("{} ({attempts})", report.status);
    if !report.remaining.is_empty() {
        line.push_str(&format!(", {} still failing", report.remaining.len()));
    }
    if let Some(message) = &report.message {
        line.push_str(&format!(": {message}"));
    }
    line
}

pub fn print_step(report: &StepReport) {
    let style = status_style(report.status);
    println!(
        "  {} {}  {}",
        style.apply_to(status_mark(report.status)),
        report.name,
        style.apply_to(step_line(report))
    );
}

pub fn print_report(report: &RunReport) {
    let header = if report.halted {
        Style::new().red().bold()
    } else {
        Style::new().cyan().bold()
    };
    println!();
    println!("{}", header.apply_to("─── Sync Report ───"));
    for step in &report.steps {
        print_step(step);
    }
    println!(
        "  {} succeeded, {} partial, {} failed, {} skipped in {:.1}s",
        report.count(StepStatus::Succeeded),
        report.count(StepStatus::Partial),
        report.count(StepStatus::Failed),
        report.count(StepStatus::Skipped),
        report.duration_ms as f64 / 1000.0
    );
    for step in report.with_remaining() {
        if let Some(file) = &step.failure_file {
            println!(
                "  {} {} entities left in {}",
                Style::new().yellow().apply_to("↻"),
                step.remaining.len(),
                file.display()
            );
        }
    }
    if report.halted {
        println!("  {}", header.apply_to("Pipeline halted by a guarded step"));
    }
}

/// Lines printed by `status` for one retryable step.
pub fn failure_status_lines(step: &str, path: &Path, list: Option<&FailureList>) -> Vec<String> {
    let mut lines = Vec::new();
    match list {
        None => lines.push(format!("{step}: no failure list ({})", path.display())),
        Some(list) if list.is_empty() => {
            lines.push(format!("{step}: 0 failed ({})", path.display()));
        }
        Some(list) => {
            lines.push(format!("{step}: {} failed ({})", list.len(), path.display()));
            for entry in list.entries().iter().take(STATUS_PREVIEW) {
                match &entry.detail {
                    Some(detail) => lines.push(format!("    {}  {detail}", entry.id)),
                    None => lines.push(format!("    {}", entry.id)),
                }
            }
            if list.len() > STATUS_PREVIEW {
                lines.push(format!("    ... and {} more", list.len() - STATUS_PREVIEW));
            }
        }
    }
    lines
}

pub fn print_failure_status(step: &str, path: &Path, list: Option<&FailureList>) {
    let pending = list.is_some_and(|l| !l.is_empty());
    let style = if pending {
        Style::new().yellow()
    } else {
        Style::new().green()
    };
    let mut lines = failure_status_lines(step, path, list).into_iter();
    if let Some(first) = lines.next() {
        println!("{}", style.apply_to(first));
    }
    for line in lines {
        println!("{line}");
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
