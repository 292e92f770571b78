use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info};

use crate::config::VadConfig;

/// Why a user turn was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOfTurn {
    Silence,
    MaxDuration,
}

/// Accumulates silence across fixed-interval RMS samples and decides when the
/// speaker is done. Terminal after the first trigger.
#[derive(Debug, Clone)]
pub struct SilenceDetector {
    threshold: f32,
    interval_ms: u64,
    silence_limit_ms: u64,
    max_recording_ms: u64,
    silence_ms: u64,
    elapsed_ms: u64,
    triggered: Option<EndOfTurn>,
}

impl SilenceDetector {
    pub fn new(
        threshold: f32,
        interval_ms: u64,
        silence_limit_ms: u64,
        max_recording_ms: u64,
    ) -> Self {
        Self {
            threshold,
            interval_ms: interval_ms.max(1),
            silence_limit_ms,
            max_recording_ms,
            silence_ms: 0,
            elapsed_ms: 0,
            triggered: None,
        }
    }

    pub fn from_config(config: &VadConfig) -> Self {
        Self::new(
            config.threshold,
            config.check_interval_ms,
            config.silence_duration_ms,
            config.max_recording_ms,
        )
    }

    /// Feeds the RMS measured for one interval.
    pub fn observe(&mut self, rms: f32) -> Option<EndOfTurn> {
        if self.triggered.is_some() {
            return None;
        }

        self.elapsed_ms += self.interval_ms;
        if rms >= self.threshold {
            self.silence_ms = 0;
        } else {
            self.silence_ms += self.interval_ms;
        }

        debug!(
            "rms={:.4} silence={}ms elapsed={}ms",
            rms, self.silence_ms, self.elapsed_ms
        );

        let reason = if self.silence_ms >= self.silence_limit_ms {
            Some(EndOfTurn::Silence)
        } else if self.elapsed_ms >= self.max_recording_ms {
            Some(EndOfTurn::MaxDuration)
        } else {
            None
        };

        if let Some(reason) = reason {
            info!(
                "End of turn ({:?}) after {}ms, {}ms of silence",
                reason, self.elapsed_ms, self.silence_ms
            );
            self.triggered = Some(reason);
        }
        reason
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn silence_ms(&self) -> u64 {
        self.silence_ms
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn is_finished(&self) -> bool {
        self.triggered.is_some()
    }
}

/// Samples `sample_rms` once per detector interval until end of turn.
pub async fn watch_for_end_of_turn(
    mut detector: SilenceDetector,
    mut sample_rms: impl FnMut() -> f32,
) -> EndOfTurn {
    let period = detector.interval();
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        ticker.tick().await;
        if let Some(reason) = detector.observe(sample_rms()) {
            return reason;
        }
    }
}
