//! 재연결 백오프 정책.
//!
//! 지연 = `min(base * 1.5^(n-1), max) + random(0, jitter)`, n은 1부터 시작.

use rand::Rng;
use ridelink_core::config::ReconnectConfig;
use std::time::Duration;

/// 지수 증가 배수
const MULTIPLIER: f64 = 1.5;

/// 상한이 있는 지수 백오프 + 지터
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: Duration,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            max: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
            max_attempts: config.max_attempts,
        }
    }

    /// 자동 재연결 최대 시도 횟수
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 지터를 제외한 n번째 시도의 지연
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let millis = self.base.as_millis() as f64 * MULTIPLIER.powi(exponent);
        let capped = millis.min(self.max.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// 지터를 포함한 n번째 시도의 지연
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }
}
