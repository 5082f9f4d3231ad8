//! Sampling loop
//!
//! Reads every register serially, fans the cycle out to an explicit list of
//! sinks, then sleeps until the next tick. With a [`NightSchedule`] the loop
//! skips sampling during the configured night window.

use crate::sink::Sink;
use crate::source::{RegisterBank, RegisterSource};
use chrono::{Local, Timelike};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Granularity at which sleeps observe the shutdown flag
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Night window during which sampling is suspended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NightSchedule {
    /// First night hour (local time)
    pub start_hour: u32,
    /// Last night hour (local time)
    pub end_hour: u32,
    /// Sleep between night checks
    pub sleep: Duration,
}

impl Default for NightSchedule {
    fn default() -> Self {
        Self {
            start_hour: 22,
            end_hour: 5,
            sleep: Duration::from_secs(300),
        }
    }
}

impl NightSchedule {
    /// Whether `hour` falls in the night window
    pub fn is_night(&self, hour: u32) -> bool {
        hour >= self.start_hour || hour <= self.end_hour
    }
}

/// Sampling loop configuration
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Run a single cycle and return
    pub once: bool,
    /// Delay between cycles
    pub interval: Duration,
    /// Optional night suspension
    pub night: Option<NightSchedule>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            once: false,
            interval: Duration::from_secs(10),
            night: None,
        }
    }
}

/// Durations of one sampling cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTiming {
    /// Time spent reading registers
    pub read: Duration,
    /// Time spent in sinks
    pub write: Duration,
    /// Registers whose read failed
    pub failures: usize,
}

/// What one tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Registers were sampled
    Sampled(CycleTiming),
    /// Night window, sampling skipped
    Night,
}

/// Drives a [`RegisterSource`] and a set of sinks
pub struct Collector<S: RegisterSource> {
    source: S,
    bank: Arc<RegisterBank>,
    sinks: Vec<Arc<dyn Sink>>,
    config: CollectorConfig,
}

impl<S: RegisterSource> Collector<S> {
    /// Create a collector
    pub fn new(
        source: S,
        bank: Arc<RegisterBank>,
        sinks: Vec<Arc<dyn Sink>>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            source,
            bank,
            sinks,
            config,
        }
    }

    /// Shared register bank
    pub fn bank(&self) -> &Arc<RegisterBank> {
        &self.bank
    }

    /// Active configuration
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    fn broadcast(&self, line: &str) {
        for sink in &self.sinks {
            sink.write_text(line);
        }
    }

    /// Read every register and hand the cycle to every sink
    pub fn run_cycle(&mut self) -> CycleTiming {
        let started = Instant::now();
        let failures = self.bank.read_all(&mut self.source);
        let read = started.elapsed();

        let started = Instant::now();
        for sink in &self.sinks {
            sink.write_measurements(self.bank.registers());
        }
        let write = started.elapsed();

        debug!(
            "cycle: {} registers, {} failed, read {:?}, write {:?}",
            self.bank.len(),
            failures,
            read,
            write
        );
        self.broadcast(&format!("{:?}, {:?}; **", read, write));

        CycleTiming {
            read,
            write,
            failures,
        }
    }

    /// One tick at local `hour`: sample, or report the night window
    pub fn tick(&mut self, hour: u32) -> Tick {
        if let Some(night) = self.night_window() {
            if night.is_night(hour) {
                self.broadcast(&format!(
                    "Nightmode from {} to {}",
                    night.start_hour, night.end_hour
                ));
                return Tick::Night;
            }
        }
        Tick::Sampled(self.run_cycle())
    }

    fn night_window(&self) -> Option<NightSchedule> {
        if self.config.once {
            return None;
        }
        self.config.night
    }

    /// Loop until `shutdown` is set (or after one cycle in once mode)
    ///
    /// The source is closed before returning.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        info!(
            "sampling {} registers every {:?}",
            self.bank.len(),
            self.config.interval
        );

        while !shutdown.load(Ordering::SeqCst) {
            let pause = match self.tick(Local::now().hour()) {
                Tick::Night => self
                    .night_window()
                    .map(|n| n.sleep)
                    .unwrap_or(self.config.interval),
                Tick::Sampled(_) => self.config.interval,
            };

            if self.config.once {
                break;
            }
            sleep_unless(pause, shutdown);
        }

        self.source.close();
        info!("sampling stopped");
    }

    /// Consume the collector, returning the source
    pub fn into_source(self) -> S {
        self.source
    }
}

/// Sleep for `total`, returning early once `shutdown` is set
fn sleep_unless(total: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + total;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(SHUTDOWN_POLL));
    }
}
