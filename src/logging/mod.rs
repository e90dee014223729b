//! Logging and output control
//!
//! This module provides the [`Logger`] for controlling output verbosity, formatting logs,
//! and rendering the live transfer line. It supports quiet and verbose output.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Logger responsible for all user-visible output
#[derive(Debug, Clone)]
pub struct Logger {
    pub verbose: bool,
    pub quiet: bool,
    pub start_time: Option<Instant>,
    /// When set, lines are collected here instead of written to the terminal
    record: Option<Arc<Mutex<Vec<String>>>>,
}

impl Logger {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            quiet: false,
            start_time: Some(Instant::now()),
            record: None,
        }
    }

    pub fn new_quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
            start_time: Some(Instant::now()),
            record: None,
        }
    }

    /// Logger that keeps every line it would print, readable via [`Logger::lines`]
    pub fn recording(verbose: bool) -> Self {
        Self {
            record: Some(Arc::new(Mutex::new(Vec::new()))),
            ..Self::new(verbose)
        }
    }

    /// Lines captured by a [`Logger::recording`] logger
    pub fn lines(&self) -> Vec<String> {
        match &self.record {
            Some(record) => record.lock().map(|lines| lines.clone()).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    fn emit(&self, line: String, stderr: bool) {
        match &self.record {
            Some(record) => {
                if let Ok(mut lines) = record.lock() {
                    lines.push(line);
                }
            }
            None if stderr => eprintln!("{}", line),
            None => println!("{}", line),
        }
    }

    /// Main section heading
    pub fn section(&self, title: &str) {
        if !self.quiet {
            self.emit(format!("\n=== {} ===", title), false);
        }
    }

    /// Sub-section heading
    pub fn subsection(&self, title: &str) {
        if self.verbose && !self.quiet {
            self.emit(format!("\n--- {} ---", title), false);
        }
    }

    pub fn debug(&self, message: &str) {
        if self.verbose && !self.quiet {
            self.emit(format!("🐛 DEBUG: {}", message), false);
        }
    }

    pub fn verbose(&self, message: &str) {
        if self.verbose && !self.quiet {
            self.emit(format!("📝 {}", message), false);
        }
    }

    /// Information message
    pub fn info(&self, message: &str) {
        if !self.quiet {
            self.emit(format!("ℹ️  {}", message), false);
        }
    }

    /// Success message
    pub fn success(&self, message: &str) {
        if !self.quiet {
            self.emit(format!("✅ {}", message), false);
        }
    }

    /// Warning message
    pub fn warning(&self, message: &str) {
        if !self.quiet {
            self.emit(format!("⚠️  WARNING: {}", message), true);
        }
    }

    /// Error message, printed even in quiet mode
    pub fn error(&self, message: &str) {
        self.emit(format!("❌ ERROR: {}", message), true);
    }

    /// Step information
    pub fn step(&self, message: &str) {
        if !self.quiet {
            self.emit(format!("▶️  {}", message), false);
        }
    }

    /// Detailed information (only shown in verbose mode)
    pub fn detail(&self, message: &str) {
        if self.verbose && !self.quiet {
            self.emit(format!("   {}", message), false);
        }
    }

    /// Rewrite the current terminal line with transfer status
    pub fn live_progress(&self, operation: &str, transferred: u64, bytes_per_sec: u64) {
        if self.quiet || self.record.is_some() {
            return;
        }

        print!(
            "\r\x1b[K⏳ {}: {} | {}",
            operation,
            self.format_size(transferred),
            self.format_speed(bytes_per_sec)
        );
        let _ = io::stdout().flush();
    }

    /// Terminate the live progress line
    pub fn progress_done(&self) {
        if !self.quiet && self.record.is_none() {
            println!();
        }
    }

    /// Key-value pair summary display
    pub fn summary_kv(&self, title: &str, items: &[(&str, String)]) {
        if self.verbose && !self.quiet {
            self.emit(format!("\n📋 {}", title), false);
            for (key, value) in items {
                self.emit(format!("  {}: {}", key, value), false);
            }
        }
    }

    /// Format file size in human-readable units
    pub fn format_size(&self, bytes: u64) -> String {
        if bytes < 1024 {
            format!("{} B", bytes)
        } else if bytes < 1024 * 1024 {
            format!("{:.1} KB", bytes as f64 / 1024.0)
        } else if bytes < 1024 * 1024 * 1024 {
            format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
        } else {
            format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
        }
    }

    /// Format duration in human-readable format
    pub fn format_duration(&self, duration: Duration) -> String {
        let secs = duration.as_secs();
        if secs < 60 {
            format!("{:.1}s", duration.as_secs_f64())
        } else if secs < 3600 {
            format!("{}m{}s", secs / 60, secs % 60)
        } else {
            format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
    }

    /// Format transfer speed in human-readable format
    pub fn format_speed(&self, bytes_per_sec: u64) -> String {
        format!("{}/s", self.format_size(bytes_per_sec))
    }

    /// Time since the logger was created
    pub fn elapsed(&self) -> Duration {
        self.start_time
            .map(|start| start.elapsed())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        let logger = Logger::new_quiet();
        assert_eq!(logger.format_size(0), "0 B");
        assert_eq!(logger.format_size(1536), "1.5 KB");
        assert_eq!(logger.format_size(10 * 1024 * 1024), "10.0 MB");
        assert_eq!(logger.format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn test_format_duration() {
        let logger = Logger::new_quiet();
        assert_eq!(logger.format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(logger.format_duration(Duration::from_secs(125)), "2m5s");
        assert_eq!(logger.format_duration(Duration::from_secs(3725)), "1h2m5s");
    }

    #[test]
    fn test_recording_respects_verbosity() {
        let logger = Logger::recording(false);
        logger.info("pulling");
        logger.detail("hidden");
        logger.success("done");
        logger.live_progress("Receiving", 10, 10);
        assert_eq!(logger.lines(), vec!["ℹ️  pulling".to_string(), "✅ done".to_string()]);

        let clone = logger.clone();
        clone.error("boom");
        assert_eq!(logger.lines().len(), 3);
    }

    #[test]
    fn test_format_speed() {
        let logger = Logger::new(false);
        assert_eq!(logger.format_speed(2048), "2.0 KB/s");
    }
}
