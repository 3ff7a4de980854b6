//! 운행 모델.
//!
//! 클라이언트가 추적하는 단일 운행(RideSession)과 그 상태를 표현.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 클라이언트 역할
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// 승객
    #[default]
    Rider,
    /// 기사
    Driver,
}

/// 운행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideState {
    Idle,
    Searching,
    Requested,
    Accepted,
    Arriving,
    Arrived,
    Started,
    InProgress,
    Completed,
    Cancelled,
    Timeout,
    /// 기사가 배차 제안을 거절 (기사 관점 전용)
    Rejected,
}

impl RideState {
    /// 해당 rideId에 더 이상 전이가 적용되지 않는 상태
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::Timeout | Self::Rejected
        )
    }

    /// 운행이 진행 중인 상태 (idle도 종료 상태도 아님)
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle) && !self.is_terminal()
    }

    /// 위치 업데이트를 받는 상태
    pub fn accepts_location(self) -> bool {
        matches!(
            self,
            Self::Accepted | Self::Arriving | Self::Started | Self::InProgress
        )
    }

    /// 와이어/로그 표기
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Searching => "searching",
            Self::Requested => "requested",
            Self::Accepted => "accepted",
            Self::Arriving => "arriving",
            Self::Arrived => "arrived",
            Self::Started => "started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for RideState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 위경도 좌표
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// 활성 운행 기록 — 클라이언트 세션당 최대 1개
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RideSession {
    /// 운행 ID (종료 후 재사용하지 않음)
    pub ride_id: String,
    /// 현재 상태
    pub state: RideState,
    /// 상대방 (기사 또는 승객) ID
    pub counterparty_id: Option<String>,
    /// 마지막 수신 위치
    pub last_location: Option<GeoPoint>,
    /// 생성 시각
    pub created_at: DateTime<Utc>,
    /// 종료 상태 진입 시각
    pub ended_at: Option<DateTime<Utc>>,
}

impl RideSession {
    /// 새 운행 생성
    pub fn new(ride_id: impl Into<String>, state: RideState) -> Self {
        Self {
            ride_id: ride_id.into(),
            state,
            counterparty_id: None,
            last_location: None,
            created_at: Utc::now(),
            ended_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_and_active_are_disjoint() {
        let all = [
            RideState::Idle,
            RideState::Searching,
            RideState::Requested,
            RideState::Accepted,
            RideState::Arriving,
            RideState::Arrived,
            RideState::Started,
            RideState::InProgress,
            RideState::Completed,
            RideState::Cancelled,
            RideState::Timeout,
            RideState::Rejected,
        ];
        for state in all {
            assert!(!(state.is_terminal() && state.is_active()), "{state}");
        }
        assert!(!RideState::Idle.is_active());
    }

    #[test]
    fn location_states() {
        assert!(RideState::Arriving.accepts_location());
        assert!(RideState::InProgress.accepts_location());
        assert!(!RideState::Arrived.accepts_location());
        assert!(!RideState::Requested.accepts_location());
    }

    #[test]
    fn role_serde_lowercase() {
        let json = serde_json::to_string(&Role::Driver).unwrap();
        assert_eq!(json, "\"driver\"");
    }
}
