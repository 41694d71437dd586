//! Per-turn metrics tracker: named stopwatches plus a token count,
//! emitted to the client once a Turn completes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, serde::Serialize)]
pub struct TurnMetrics {
    #[serde(flatten)]
    pub durations_ms: HashMap<String, u64>,
    pub tps: f64,
    pub model: String,
}

#[derive(Debug, Default)]
struct Stopwatch {
    started_at: Option<Instant>,
    elapsed_ms: Option<u64>,
}

/// Tracks named timers and a token count for a single conversational Turn.
#[derive(Debug, Default)]
pub struct MetricsTracker {
    stopwatches: HashMap<String, Stopwatch>,
    token_count: u64,
    model: String,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, name: &str) {
        self.stopwatches.insert(
            name.to_string(),
            Stopwatch {
                started_at: Some(Instant::now()),
                elapsed_ms: None,
            },
        );
    }

    pub fn stop(&mut self, name: &str) {
        if let Some(sw) = self.stopwatches.get_mut(name) {
            if let Some(started_at) = sw.started_at.take() {
                sw.elapsed_ms = Some(started_at.elapsed().as_millis() as u64);
            }
        }
    }

    /// Records a duration measured outside this tracker's own `start()`
    /// (used for `stt_latency`, which begins at a VAD rising edge that
    /// may precede Turn creation).
    pub fn stop_with_elapsed(&mut self, name: &str, elapsed: Duration) {
        self.stopwatches.insert(
            name.to_string(),
            Stopwatch {
                started_at: None,
                elapsed_ms: Some(elapsed.as_millis() as u64),
            },
        );
    }

    pub fn add_tokens(&mut self, count: u64) {
        self.token_count += count;
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn duration_ms(&self, name: &str) -> Option<u64> {
        self.stopwatches.get(name).and_then(|sw| sw.elapsed_ms)
    }

    /// Collects all recorded durations plus derived tokens-per-second.
    pub fn get_all(&self) -> TurnMetrics {
        let durations_ms: HashMap<String, u64> = self
            .stopwatches
            .iter()
            .filter_map(|(name, sw)| sw.elapsed_ms.map(|ms| (name.clone(), ms)))
            .collect();

        let llm_seconds = durations_ms
            .get("llm_generation")
            .map(|ms| *ms as f64 / 1000.0)
            .filter(|s| *s > 0.0);

        let tps = match llm_seconds {
            Some(seconds) => self.token_count as f64 / seconds,
            None => 0.0,
        };

        TurnMetrics {
            durations_ms,
            tps,
            model: self.model.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn stopwatch_records_elapsed_time() {
        let mut tracker = MetricsTracker::new();
        tracker.start("stt_latency");
        sleep(Duration::from_millis(5));
        tracker.stop("stt_latency");
        assert!(tracker.duration_ms("stt_latency").unwrap() >= 5);
    }

    #[test]
    fn tps_is_zero_without_llm_duration() {
        let mut tracker = MetricsTracker::new();
        tracker.add_tokens(100);
        let metrics = tracker.get_all();
        assert_eq!(metrics.tps, 0.0);
    }

    #[test]
    fn tps_divides_tokens_by_seconds() {
        let mut tracker = MetricsTracker::new();
        tracker.add_tokens(50);
        tracker.start("llm_generation");
        sleep(Duration::from_millis(50));
        tracker.stop("llm_generation");
        tracker.set_model("planning");
        let metrics = tracker.get_all();
        assert!(metrics.tps > 0.0);
        assert_eq!(metrics.model, "planning");
    }
}
