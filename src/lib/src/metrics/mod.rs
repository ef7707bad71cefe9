/// Metrics collection for verification calls
///
/// Provides observability for:
/// - Verification attempts and outcomes per mode
/// - Failures by error kind
/// - Latency tracking
///
/// Exports metrics in Prometheus exposition format.
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Labeled counter
#[derive(Debug, Default)]
pub struct LabeledCounter<L: Hash + Eq> {
    counts: RwLock<HashMap<L, u64>>,
}

impl<L: Hash + Eq + Clone + Ord> LabeledCounter<L> {
    pub fn new() -> Self {
        Self {
            counts: RwLock::new(HashMap::new()),
        }
    }

    /// Increment counter for a label
    pub fn increment(&self, label: L) {
        let mut counts = self.counts.write().unwrap_or_else(|e| e.into_inner());
        *counts.entry(label).or_insert(0) += 1;
    }

    /// Get current count for a label
    pub fn get(&self, label: &L) -> u64 {
        self.counts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(label)
            .copied()
            .unwrap_or(0)
    }

    /// All counts, ordered by label
    pub fn all(&self) -> Vec<(L, u64)> {
        let mut all: Vec<(L, u64)> = self
            .counts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(l, c)| (l.clone(), *c))
            .collect();
        all.sort();
        all
    }

    /// Get total across all labels
    pub fn total(&self) -> u64 {
        self.counts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .sum()
    }
}

/// Simple histogram for latency tracking
#[derive(Debug)]
pub struct Histogram {
    /// Bucket boundaries (upper limits in milliseconds)
    boundaries: Vec<u64>,
    /// Count per bucket (includes +Inf bucket)
    buckets: Vec<AtomicU64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(boundaries: Vec<u64>) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();

        Self {
            boundaries,
            buckets,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Default latency buckets (milliseconds)
    pub fn latency_default() -> Self {
        Self::new(vec![1, 5, 10, 50, 100, 250, 500, 1000, 5000])
    }

    pub fn record(&self, value_ms: u64) {
        self.sum.fetch_add(value_ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let bucket = self
            .boundaries
            .iter()
            .position(|&b| value_ms <= b)
            .unwrap_or(self.boundaries.len());
        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duration(&self, duration: Duration) {
        self.record(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
    }

    /// Bucket counts with boundaries; the last boundary is `u64::MAX` (+Inf)
    pub fn snapshot(&self) -> Vec<(u64, u64)> {
        self.boundaries
            .iter()
            .copied()
            .chain(std::iter::once(u64::MAX))
            .zip(self.buckets.iter().map(|b| b.load(Ordering::Relaxed)))
            .collect()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }
}

/// Verification metrics
#[derive(Debug)]
pub struct VerificationMetrics {
    /// Attempts by mode
    pub attempts: LabeledCounter<&'static str>,
    /// Successes by mode
    pub successes: LabeledCounter<&'static str>,
    /// Failures by (mode, error kind)
    pub failures: LabeledCounter<(&'static str, &'static str)>,
    /// Verification latency histogram (ms)
    pub duration: Histogram,
    /// Keyed signatures that failed validation
    pub signatures_rejected: AtomicU64,
}

impl Default for VerificationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl VerificationMetrics {
    pub fn new() -> Self {
        Self {
            attempts: LabeledCounter::new(),
            successes: LabeledCounter::new(),
            failures: LabeledCounter::new(),
            duration: Histogram::latency_default(),
            signatures_rejected: AtomicU64::new(0),
        }
    }

    /// Record a verification attempt start
    pub fn start(&self, mode: &'static str) -> VerificationTimer {
        self.attempts.increment(mode);
        VerificationTimer {
            mode,
            start: Instant::now(),
        }
    }

    pub fn record_success(&self, timer: VerificationTimer) {
        self.successes.increment(timer.mode);
        self.duration.record_duration(timer.elapsed());
    }

    pub fn record_failure(&self, timer: VerificationTimer, kind: &'static str) {
        self.failures.increment((timer.mode, kind));
        self.duration.record_duration(timer.elapsed());
    }

    pub fn record_signature_rejected(&self) {
        self.signatures_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus exposition format
    pub fn export_prometheus(&self, prefix: &str) -> String {
        let mut output = String::new();

        output.push_str(&format!("# TYPE {prefix}verification_attempts_total counter\n"));
        for (mode, count) in self.attempts.all() {
            output.push_str(&format!(
                "{prefix}verification_attempts_total{{mode=\"{}\"}} {}\n",
                mode, count
            ));
        }
        output.push('\n');

        output.push_str(&format!("# TYPE {prefix}verification_success_total counter\n"));
        for (mode, count) in self.successes.all() {
            output.push_str(&format!(
                "{prefix}verification_success_total{{mode=\"{}\"}} {}\n",
                mode, count
            ));
        }
        output.push('\n');

        output.push_str(&format!("# TYPE {prefix}verification_failures_total counter\n"));
        for ((mode, kind), count) in self.failures.all() {
            output.push_str(&format!(
                "{prefix}verification_failures_total{{mode=\"{}\",reason=\"{}\"}} {}\n",
                mode, kind, count
            ));
        }
        output.push('\n');

        output.push_str(&format!("# TYPE {prefix}verification_duration_ms histogram\n"));
        let mut cumulative = 0u64;
        for (boundary, count) in self.duration.snapshot() {
            cumulative += count;
            let le = if boundary == u64::MAX {
                "+Inf".to_string()
            } else {
                boundary.to_string()
            };
            output.push_str(&format!(
                "{prefix}verification_duration_ms_bucket{{le=\"{}\"}} {}\n",
                le, cumulative
            ));
        }
        output.push_str(&format!(
            "{prefix}verification_duration_ms_sum {}\n",
            self.duration.sum()
        ));
        output.push_str(&format!(
            "{prefix}verification_duration_ms_count {}\n\n",
            self.duration.count()
        ));

        output.push_str(&format!(
            "# TYPE {prefix}signatures_rejected_total counter\n\
             {prefix}signatures_rejected_total {}\n",
            self.signatures_rejected.load(Ordering::Relaxed)
        ));

        output
    }
}

/// Timer for one verification call
#[derive(Debug)]
pub struct VerificationTimer {
    mode: &'static str,
    start: Instant,
}

impl VerificationTimer {
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

static GLOBAL_METRICS: std::sync::OnceLock<Arc<VerificationMetrics>> = std::sync::OnceLock::new();

/// Get or create the global metrics instance
pub fn global_metrics() -> Arc<VerificationMetrics> {
    GLOBAL_METRICS
        .get_or_init(|| Arc::new(VerificationMetrics::new()))
        .clone()
}
