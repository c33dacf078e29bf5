use std::time::Instant;

/// Cross-cutting observer for loop health events.
///
/// Decouples the detection loop from specific output mechanisms so callers
/// can watch cadence, skip rate, and reacquisitions without changing the
/// loop itself. Result delivery is not telemetry; that goes through the
/// loop's result callback.
pub trait TickTelemetry: Send {
    /// One completed detection call, with its latency in milliseconds.
    fn tick(&mut self, latency_ms: f64);

    /// One tick skipped because the frame grab failed transiently.
    fn skipped(&mut self);

    /// The camera was reacquired after track loss, on the given attempt.
    fn reacquired(&mut self, attempt: usize);

    /// Emit an end-of-run summary. Default: no-op.
    fn summary(&self) {}
}

/// Silent telemetry that discards all events.
///
/// The default for embedders with their own observability, and for tests
/// where loop health is irrelevant.
pub struct NullTickTelemetry;

impl TickTelemetry for NullTickTelemetry {
    fn tick(&mut self, _latency_ms: f64) {}
    fn skipped(&mut self) {}
    fn reacquired(&mut self, _attempt: usize) {}
}

/// Aggregating telemetry that reports through the `log` crate.
///
/// Collects per-tick latencies and counts, then emits one summary line at
/// the end of the run.
pub struct LogTickTelemetry {
    latencies_ms: Vec<f64>,
    skipped: usize,
    reacquires: usize,
    started: Instant,
}

impl LogTickTelemetry {
    pub fn new() -> Self {
        Self {
            latencies_ms: Vec::new(),
            skipped: 0,
            reacquires: 0,
            started: Instant::now(),
        }
    }

    pub fn tick_count(&self) -> usize {
        self.latencies_ms.len()
    }

    pub fn skip_count(&self) -> usize {
        self.skipped
    }

    pub fn reacquire_count(&self) -> usize {
        self.reacquires
    }

    /// Formatted summary, or `None` if no ticks were recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.latencies_ms.is_empty() && self.skipped == 0 && self.reacquires == 0 {
            return None;
        }

        let elapsed_s = self.started.elapsed().as_secs_f64();
        let ticks = self.latencies_ms.len();
        let mut lines = Vec::new();

        lines.push(format!("Loop summary ({ticks} ticks, {elapsed_s:.1}s total):"));

        if ticks > 0 {
            let total: f64 = self.latencies_ms.iter().sum();
            let avg = total / ticks as f64;
            let max = self.latencies_ms.iter().cloned().fold(0.0, f64::max);
            lines.push(format!("  detect latency: avg {avg:.1}ms  max {max:.1}ms"));
            if elapsed_s > 0.0 {
                lines.push(format!("  rate: {:.1} results/s", ticks as f64 / elapsed_s));
            }
        }
        if self.skipped > 0 {
            lines.push(format!("  skipped grabs: {}", self.skipped));
        }
        if self.reacquires > 0 {
            lines.push(format!("  camera reacquired: {} time(s)", self.reacquires));
        }

        Some(lines.join("\n"))
    }
}

impl Default for LogTickTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl TickTelemetry for LogTickTelemetry {
    fn tick(&mut self, latency_ms: f64) {
        self.latencies_ms.push(latency_ms);
    }

    fn skipped(&mut self) {
        self.skipped += 1;
    }

    fn reacquired(&mut self, attempt: usize) {
        self.reacquires += 1;
        log::info!("camera reacquired on attempt {attempt}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n{text}");
        }
    }
}
