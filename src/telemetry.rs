//! Telemetry utilities for operation timing.

use std::time::Instant;

/// Guard for timing an orchestrator operation.
///
/// Records latency into the operation histogram when dropped.
pub struct OpTimer {
    op: &'static str,
    start: Instant,
}

impl OpTimer {
    /// Start timing an operation.
    pub fn new(op: &'static str) -> Self {
        Self { op, start: Instant::now() }
    }
}

impl Drop for OpTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        crate::metrics::record_op(self.op, duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_timer_records_on_drop() {
        crate::metrics::register_metrics();
        {
            let _timer = OpTimer::new("test_op");
        }
        let text = crate::metrics::gather_metrics();
        assert!(text.contains("orc_op_duration_seconds"));
    }
}
