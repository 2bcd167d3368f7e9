//! Console reporting of received lines
//!
//! `PropertyReporter` is the line handler used by the binary. It prints each
//! raw line followed by the parsed properties or the parse error.

use crate::properties::parse_line;
use crate::serial::LineHandler;
use anyhow::Context;
use chrono::Local;
use colored::Colorize;
use log::debug;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running totals, readable while the reporter is owned by a connection
#[derive(Debug, Default)]
pub struct ReportCounters {
    lines: AtomicU64,
    parsed: AtomicU64,
    failed: AtomicU64,
}

impl ReportCounters {
    pub fn lines(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }

    pub fn parsed(&self) -> u64 {
        self.parsed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

pub struct PropertyReporter<W> {
    out: W,
    show_timestamps: bool,
    counters: Arc<ReportCounters>,
}

impl PropertyReporter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> PropertyReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            show_timestamps: true,
            counters: Arc::default(),
        }
    }

    /// Enable or disable timestamp prefixes
    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.show_timestamps = enabled;
        self
    }

    pub fn counters(&self) -> Arc<ReportCounters> {
        Arc::clone(&self.counters)
    }

    /// Print one line and its parse result
    pub fn report(&mut self, line: &str) -> io::Result<()> {
        self.counters.lines.fetch_add(1, Ordering::Relaxed);

        let prefix = if self.show_timestamps {
            let timestamp = Local::now().format("%H:%M:%S%.3f");
            format!("{} ", timestamp.to_string().dimmed())
        } else {
            String::new()
        };

        writeln!(self.out, "{}{}", prefix, line)?;

        match parse_line(line) {
            Ok(props) => {
                self.counters.parsed.fetch_add(1, Ordering::Relaxed);
                writeln!(self.out, "{}{}", prefix, props.to_string().green())?;
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                debug!("Unparsed line {:?}: {}", line, e);
                writeln!(self.out, "{}{} {}", prefix, "[PARSE]".red().bold(), e)?;
            }
        }

        self.out.flush()
    }
}

impl<W: Write + Send> LineHandler for PropertyReporter<W> {
    fn handle_line(&mut self, line: String) -> anyhow::Result<()> {
        self.report(&line).context("Failed to write report")
    }
}
