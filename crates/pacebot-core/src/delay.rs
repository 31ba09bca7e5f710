//! Reply pacing: how long a human would take to read the message and type
//! the answer.

use std::time::Duration;

pub const BASE_DELAY_MS: u64 = 10_000;
/// Characters per second, for reading and typing alike.
pub const READING_RATE: u64 = 15;
pub const MAX_DELAY_MS: u64 = 60_000;

/// `min(base + read_time(incoming) + type_time(reply), max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayModel {
    pub base_ms: u64,
    pub reading_rate: u64,
    pub max_ms: u64,
}

impl Default for DelayModel {
    fn default() -> Self {
        Self {
            base_ms: BASE_DELAY_MS,
            reading_rate: READING_RATE,
            max_ms: MAX_DELAY_MS,
        }
    }
}

impl DelayModel {
    pub fn compute(&self, incoming_text: &str, reply_text: &str) -> Duration {
        // Length is counted in chars, so emoji and accents cost one unit each.
        // Both texts are summed before dividing so the rounding happens once.
        let chars = (incoming_text.chars().count() + reply_text.chars().count()) as u64;
        let rate = self.reading_rate.max(1);
        let total = Duration::from_millis(self.base_ms)
            + Duration::from_nanos(chars.saturating_mul(1_000_000_000) / rate);
        total.min(Duration::from_millis(self.max_ms))
    }
}

/// Pacing delay with the stock constants.
pub fn compute_delay(incoming_text: &str, reply_text: &str) -> Duration {
    DelayModel::default().compute(incoming_text, reply_text)
}
