use crate::shared::clock::Clock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Fixed-delay gate: consecutive callers are spaced at least `min_interval`
/// apart. Callers are serialized, so at most one request is in flight past
/// the gate at a time.
pub struct FixedDelayGate {
    min_interval: Duration,
    clock: Arc<dyn Clock>,
    last_pass: Mutex<Option<Instant>>,
}

impl FixedDelayGate {
    pub fn new(min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_interval,
            clock,
            last_pass: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the gate may be passed again. Returns how long the caller
    /// was held back.
    pub async fn wait(&self) -> Duration {
        let mut last_pass = self.last_pass.lock().await;
        let mut waited = Duration::ZERO;

        if let Some(previous) = *last_pass {
            let elapsed = self.clock.now().saturating_duration_since(previous);
            if elapsed < self.min_interval {
                waited = self.min_interval - elapsed;
                debug!(wait_ms = waited.as_millis() as u64, "Rate gate holding request");
                self.clock.sleep(waited).await;
            }
        }

        *last_pass = Some(self.clock.now());
        waited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::clock::ManualClock;

    #[tokio::test]
    async fn test_first_pass_is_free() {
        let clock = ManualClock::new();
        let gate = FixedDelayGate::new(Duration::from_millis(500), Arc::new(clock.clone()));

        assert_eq!(gate.wait().await, Duration::ZERO);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_back_to_back_passes_are_spaced() {
        let clock = ManualClock::new();
        let gate = FixedDelayGate::new(Duration::from_millis(500), Arc::new(clock.clone()));

        gate.wait().await;
        gate.wait().await;
        gate.wait().await;

        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(500), Duration::from_millis(500)]
        );
    }

    #[tokio::test]
    async fn test_elapsed_time_counts_toward_interval() {
        let clock = ManualClock::new();
        let gate = FixedDelayGate::new(Duration::from_millis(500), Arc::new(clock.clone()));

        gate.wait().await;
        clock.advance(Duration::from_millis(300));
        assert_eq!(gate.wait().await, Duration::from_millis(200));

        clock.advance(Duration::from_secs(1));
        assert_eq!(gate.wait().await, Duration::ZERO);
    }
}
