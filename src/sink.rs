//! Sink abstraction
//!
//! Every consumer of a sampling cycle implements [`Sink`]. The collector
//! fans each cycle out to an explicit list of sinks built at startup; the
//! forwarding pipeline is itself a sink and reports its own failures through
//! another sink.

use crate::register::CRITICAL_MARKER;
use crate::source::{Register, TIME_FORMAT};
use chrono::Local;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Consumer of sampled registers and status text
///
/// Implementations must return within a bounded time; a sink that cannot
/// keep up sheds data instead of stalling the sampling loop.
pub trait Sink: Send + Sync {
    /// Consume one cycle's registers
    fn write_measurements(&self, registers: &[Register]);

    /// Consume a status or informational line
    fn write_text(&self, line: &str);
}

/// Prefix a line with the local wall-clock time
pub fn timestamped(line: &str) -> String {
    format!("{} ## {}", Local::now().format(TIME_FORMAT), line.trim_end())
}

/// Prints to stdout; used for one-shot runs
#[derive(Debug, Default)]
pub struct StdoutSink;

impl StdoutSink {
    /// Create a stdout sink
    pub fn new() -> Self {
        Self
    }
}

impl Sink for StdoutSink {
    fn write_measurements(&self, registers: &[Register]) {
        for register in registers {
            println!("{}", register.display_line());
        }
    }

    fn write_text(&self, line: &str) {
        println!("{}", timestamped(line));
    }
}

/// Which part of the snapshot to render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotView {
    /// Critical (`**`) registers and lines only
    #[default]
    Critical,
    /// Everything
    Full,
}

/// Default byte budget for each snapshot ring
pub const DEFAULT_SNAPSHOT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Default)]
struct Ring {
    blocks: VecDeque<String>,
    bytes: usize,
}

impl Ring {
    fn push(&mut self, block: String, max_bytes: usize) {
        self.bytes += block.len();
        self.blocks.push_front(block);
        // Keep at least the newest block even if it alone exceeds the budget
        while self.bytes > max_bytes && self.blocks.len() > 1 {
            if let Some(old) = self.blocks.pop_back() {
                self.bytes -= old.len();
            }
        }
    }

    fn render(&self) -> String {
        let mut out = String::with_capacity(self.bytes + self.blocks.len());
        for block in &self.blocks {
            out.push_str(block);
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Default)]
struct SnapshotBuffers {
    critical: Ring,
    full: Ring,
}

/// In-memory ring of recent formatted blocks, newest first
///
/// Served read-only by the collector's HTTP endpoint.
#[derive(Debug)]
pub struct SnapshotSink {
    max_bytes: usize,
    buffers: Mutex<SnapshotBuffers>,
}

impl SnapshotSink {
    /// Create a snapshot sink with the default byte budget
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SNAPSHOT_BYTES)
    }

    /// Create a snapshot sink bounded at `max_bytes` per view
    pub fn with_capacity(max_bytes: usize) -> Self {
        Self {
            max_bytes: max_bytes.max(1),
            buffers: Mutex::new(SnapshotBuffers::default()),
        }
    }

    fn update(&self, critical: Option<String>, full: String) {
        let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        buffers.full.push(full, self.max_bytes);
        if let Some(block) = critical {
            buffers.critical.push(block, self.max_bytes);
        }
    }

    /// Render a view, newest block first
    pub fn render(&self, view: SnapshotView) -> String {
        let buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        match view {
            SnapshotView::Critical => buffers.critical.render(),
            SnapshotView::Full => buffers.full.render(),
        }
    }

    /// Number of blocks held for a view
    pub fn len(&self, view: SnapshotView) -> usize {
        let buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        match view {
            SnapshotView::Critical => buffers.critical.blocks.len(),
            SnapshotView::Full => buffers.full.blocks.len(),
        }
    }

    /// Whether nothing has been written yet
    pub fn is_empty(&self) -> bool {
        self.len(SnapshotView::Full) == 0
    }
}

impl Default for SnapshotSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for SnapshotSink {
    fn write_measurements(&self, registers: &[Register]) {
        let mut full = String::new();
        let mut critical = String::new();
        for register in registers {
            let line = register.display_line();
            if register.spec().is_critical() {
                critical.push_str(&line);
                critical.push('\n');
            }
            full.push_str(&line);
            full.push('\n');
        }

        let critical = if critical.is_empty() {
            None
        } else {
            Some(critical)
        };
        self.update(critical, full);
    }

    fn write_text(&self, line: &str) {
        let block = timestamped(line);
        let critical = line.contains(CRITICAL_MARKER).then(|| block.clone());
        self.update(critical, block);
    }
}
