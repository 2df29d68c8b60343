use std::sync::Mutex;

/// Outcome counters shared by the workers of one batch run.
pub struct BatchMetrics {
    inner: Mutex<BatchSummary>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
    /// Traces across all successfully processed inputs.
    pub traces: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.processed + self.failed
    }
}

impl BatchMetrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BatchSummary::default()),
        }
    }

    pub fn record_processed(&self, traces: usize) {
        if let Ok(mut summary) = self.inner.lock() {
            summary.processed += 1;
            summary.traces += traces;
        }
    }

    pub fn record_failed(&self) {
        if let Ok(mut summary) = self.inner.lock() {
            summary.failed += 1;
        }
    }

    pub fn snapshot(&self) -> BatchSummary {
        self.inner
            .lock()
            .map(|summary| *summary)
            .unwrap_or_default()
    }
}

impl Default for BatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn counts_outcomes_across_threads() {
        let metrics = BatchMetrics::new();
        thread::scope(|scope| {
            for i in 0..8 {
                let metrics = &metrics;
                scope.spawn(move || {
                    if i % 4 == 0 {
                        metrics.record_failed();
                    } else {
                        metrics.record_processed(10);
                    }
                });
            }
        });
        let summary = metrics.snapshot();
        assert_eq!(summary.processed, 6);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.traces, 60);
        assert_eq!(summary.total(), 8);
    }
}
