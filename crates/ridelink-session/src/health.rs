//! 핑/퐁 헬스체크.
//!
//! 연결 후 주기 T(포그라운드 30초, 백그라운드 60초)로 핑을 보내고,
//! 응답 없는 가장 오래된 핑으로부터 2T 안에 퐁이 오지 않으면 연결을 stale로 본다.

use chrono::{DateTime, Utc};
use ridelink_core::config::HealthConfig;
use ridelink_core::models::session::AppState;
use std::time::{Duration, Instant};

/// 연결 건강 상태 추적기
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    foreground_interval: Duration,
    background_interval: Duration,
    interval: Duration,
    connected_at: Option<Instant>,
    last_pong: Option<Instant>,
    last_pong_wall: Option<DateTime<Utc>>,
    /// 응답 받지 못한 가장 오래된 핑
    outstanding_since: Option<Instant>,
}

impl HealthMonitor {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            foreground_interval: config.foreground_interval(),
            background_interval: config.background_interval(),
            interval: config.foreground_interval(),
            connected_at: None,
            last_pong: None,
            last_pong_wall: None,
            outstanding_since: None,
        }
    }

    /// 현재 핑 간격
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 퐁 대기 한도 (2T)
    pub fn pong_deadline(&self) -> Duration {
        self.interval * 2
    }

    /// 앱 상태에 맞춰 핑 간격 전환
    pub fn set_app_state(&mut self, app_state: AppState) {
        self.interval = match app_state {
            AppState::Foreground => self.foreground_interval,
            AppState::Background => self.background_interval,
        };
    }

    /// 연결 수립
    pub fn on_connected(&mut self, now: Instant) {
        self.connected_at = Some(now);
        self.outstanding_since = None;
    }

    /// 연결 해제
    pub fn on_disconnected(&mut self) {
        self.connected_at = None;
        self.outstanding_since = None;
    }

    /// 핑 송신 기록. 새로 대기가 시작되면 `true` (퐁 기한 타이머 무장 필요).
    pub fn on_ping(&mut self, now: Instant) -> bool {
        if self.outstanding_since.is_some() {
            return false;
        }
        self.outstanding_since = Some(now);
        true
    }

    /// 퐁 수신 기록
    pub fn on_pong(&mut self, now: Instant) {
        self.last_pong = Some(now);
        self.last_pong_wall = Some(Utc::now());
        self.outstanding_since = None;
    }

    /// 마지막 퐁 수신 시각 (wall clock)
    pub fn last_pong_at(&self) -> Option<DateTime<Utc>> {
        self.last_pong_wall
    }

    /// 응답 대기 중인 핑 존재 여부
    pub fn awaiting_pong(&self) -> bool {
        self.outstanding_since.is_some()
    }

    /// 응답 없는 핑이 2T를 넘겼는지
    pub fn is_stale(&self, now: Instant) -> bool {
        self.outstanding_since
            .is_some_and(|since| now.saturating_duration_since(since) > self.pong_deadline())
    }

    /// 건강 여부
    ///
    /// 연결 중이고, 마지막 퐁(없으면 연결 시각)이 3T 이내이며,
    /// 2T를 넘긴 미응답 핑이 없을 때만 `true`.
    pub fn is_healthy(&self, now: Instant) -> bool {
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        if self.is_stale(now) {
            return false;
        }
        let baseline = match self.last_pong {
            Some(pong) if pong >= connected_at => pong,
            _ => connected_at,
        };
        now.saturating_duration_since(baseline) <= self.interval * 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(&HealthConfig::default())
    }

    #[test]
    fn not_healthy_before_connect() {
        assert!(!monitor().is_healthy(Instant::now()));
    }

    #[test]
    fn healthy_right_after_pong() {
        let mut m = monitor();
        let t0 = Instant::now();
        m.on_connected(t0);
        m.on_ping(t0 + Duration::from_secs(30));
        m.on_pong(t0 + Duration::from_secs(31));
        assert!(m.is_healthy(t0 + Duration::from_secs(31)));
        assert!(m.last_pong_at().is_some());
    }

    #[test]
    fn unhealthy_when_ping_unanswered_past_two_intervals() {
        let mut m = monitor();
        let t0 = Instant::now();
        m.on_connected(t0);
        assert!(m.on_ping(t0));
        assert!(m.is_healthy(t0 + Duration::from_secs(60)));
        assert!(m.is_stale(t0 + Duration::from_secs(61)));
        assert!(!m.is_healthy(t0 + Duration::from_secs(61)));
    }

    #[test]
    fn second_ping_does_not_extend_deadline() {
        let mut m = monitor();
        let t0 = Instant::now();
        m.on_connected(t0);
        assert!(m.on_ping(t0));
        assert!(!m.on_ping(t0 + Duration::from_secs(30)));
        assert!(m.is_stale(t0 + Duration::from_secs(61)));
    }

    #[test]
    fn background_doubles_interval() {
        let mut m = monitor();
        m.set_app_state(AppState::Background);
        assert_eq!(m.interval(), Duration::from_secs(60));
        assert_eq!(m.pong_deadline(), Duration::from_secs(120));
        m.set_app_state(AppState::Foreground);
        assert_eq!(m.interval(), Duration::from_secs(30));
    }

    #[test]
    fn disconnect_clears_health() {
        let mut m = monitor();
        let t0 = Instant::now();
        m.on_connected(t0);
        m.on_disconnected();
        assert!(!m.is_healthy(t0));
    }
}
