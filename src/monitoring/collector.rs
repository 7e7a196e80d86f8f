use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::NaiveDate;

use crate::capture::{CaptureError, PacketCapture};
use crate::config::Settings;
use crate::monitoring::connections::ConnectionTable;
use crate::monitoring::correlation::Correlator;
use crate::monitoring::process_cache::ProcessCache;
use crate::procinfo::ProcessProvider;
use crate::sink::BufferedSink;

/// How the collector loop ended. Both map to a zero exit code; the fatal
/// backend-unavailable path escapes as an error instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Stopped,
    Interrupted,
}

/// What one iteration of the state machine decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Start date not reached; sleep this long and re-check.
    Waiting(Duration),
    /// One capture window completed.
    Captured,
    /// Recoverable failure; sleep this long and re-enter capture.
    Backoff(Duration),
    /// End date passed; buffer flushed; terminal.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitingForStart,
    Capturing,
    Stopped,
}

/// Date-gated capture loop driving the whole pipeline: refresh the
/// connection table, run one bounded capture window routing every packet
/// through the correlator into the buffer, flush when due, classify
/// failures. Single-threaded and cooperative; the capture backend invokes
/// the packet callback synchronously within the window.
pub struct Collector<C, P> {
    capture: C,
    provider: P,
    table: ConnectionTable,
    cache: ProcessCache,
    correlator: Correlator,
    sink: BufferedSink,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    window: Duration,
    start_poll: Duration,
    backoff: Duration,
    state: State,
}

impl<C: PacketCapture, P: ProcessProvider> Collector<C, P> {
    pub fn new(
        capture: C,
        provider: P,
        correlator: Correlator,
        sink: BufferedSink,
        settings: &Settings,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Self {
        Self {
            capture,
            provider,
            table: ConnectionTable::new(Duration::from_secs(settings.snapshot_ttl_secs)),
            cache: ProcessCache::new(),
            correlator,
            sink,
            start_date,
            end_date,
            window: Duration::from_secs(settings.capture_window_secs),
            start_poll: Duration::from_secs(settings.start_poll_secs),
            backoff: Duration::from_secs(settings.error_backoff_secs),
            state: State::WaitingForStart,
        }
    }

    /// One iteration of the state machine. The only error that escapes is
    /// the fatal backend-unavailable condition; everything else is logged
    /// and classified into a [`Step`].
    pub fn step(&mut self, today: NaiveDate) -> Result<Step, CaptureError> {
        if self.state == State::Stopped {
            return Ok(Step::Stopped);
        }

        if let Some(start) = self.start_date {
            if today < start {
                self.state = State::WaitingForStart;
                return Ok(Step::Waiting(self.start_poll));
            }
        }
        self.state = State::Capturing;

        if let Some(end) = self.end_date {
            if today > end {
                log::info!("End date {} passed, stopping collector", end);
                self.sink.flush();
                self.state = State::Stopped;
                return Ok(Step::Stopped);
            }
        }

        self.table.refresh(Instant::now(), &mut self.provider);

        let window = self.window;
        let Self {
            capture,
            provider,
            table,
            cache,
            correlator,
            sink,
            ..
        } = self;
        let result = capture.run_window(window, &mut |packet| {
            let event = correlator.correlate(&packet, table, cache, provider);
            sink.append(event);
            sink.flush_if_due();
        });

        match result {
            Ok(()) => {
                self.sink.flush_if_due();
                Ok(Step::Captured)
            }
            Err(e @ CaptureError::BackendUnavailable(_)) => Err(e),
            Err(e) => {
                log::error!("Capture window failed: {}", e);
                Ok(Step::Backoff(self.backoff))
            }
        }
    }

    /// Drive the state machine until the end date is reached, the operator
    /// interrupts, or the capture backend turns out to be unavailable.
    /// Buffered events are flushed on every exit path except the fatal one.
    pub fn run(&mut self, running: &AtomicBool) -> Result<Outcome, CaptureError> {
        while running.load(Ordering::Relaxed) {
            let today = chrono::Local::now().date_naive();
            match self.step(today)? {
                Step::Waiting(delay) => {
                    log::info!("Start date not reached, sleeping {}s", delay.as_secs());
                    sleep_while_running(delay, running);
                }
                Step::Backoff(delay) => sleep_while_running(delay, running),
                Step::Captured => {}
                Step::Stopped => return Ok(Outcome::Stopped),
            }
        }

        log::info!("Shutdown requested, flushing buffered events");
        self.sink.flush();
        Ok(Outcome::Interrupted)
    }
}

/// Sleep in short slices so an operator interrupt is honored promptly.
fn sleep_while_running(total: Duration, running: &AtomicBool) {
    const SLICE: Duration = Duration::from_millis(200);
    let deadline = Instant::now() + total;
    while running.load(Ordering::Relaxed) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        thread::sleep(remaining.min(SLICE));
    }
}
