//! 세션 모델.
//!
//! 서버와의 연결 세션 상태, 앱 생명주기/네트워크 신호, 상태 스냅샷을 표현.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 세션 연결 상태 — 항상 셋 중 정확히 하나
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// 연결 끊김
    #[default]
    Disconnected,
    /// 연결 중
    Connecting,
    /// 연결됨
    Connected,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "Disconnected"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Connected => write!(f, "Connected"),
        }
    }
}

/// 앱 생명주기 상태
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    #[default]
    Foreground,
    Background,
}

/// 네트워크 도달 가능 여부
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    #[default]
    Online,
    Offline,
}

/// 전송 종료 사유
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// 클라이언트가 의도적으로 종료
    ClientInitiated,
    /// 서버가 최종 종료 통보 (재연결 금지)
    ServerFinal,
    /// 그 외 비정상 종료 (재연결 대상)
    Abnormal(String),
}

impl CloseReason {
    /// 명시적 종료 여부 — 자동 재연결하지 않음
    pub fn is_explicit(&self) -> bool {
        matches!(self, Self::ClientInitiated | Self::ServerFinal)
    }
}

/// 연결 상태 스냅샷 (`get_connection_status`)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    /// 세션 상태
    pub state: SessionState,
    /// 연결 여부 (`state == Connected`)
    pub connected: bool,
    /// 네트워크 온라인 여부
    pub online: bool,
    /// 앱 생명주기 상태
    pub app_state: AppState,
    /// 현재 복구 주기의 연결 시도 번호 (연결 성공 시 0)
    pub reconnect_attempts: u32,
    /// 자동 재연결 활성 여부
    pub auto_reconnect: bool,
    /// 마지막 퐁 수신 시각
    pub last_pong_at: Option<DateTime<Utc>>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Disconnected,
            connected: false,
            online: true,
            app_state: AppState::Foreground,
            reconnect_attempts: 0,
            auto_reconnect: false,
            last_pong_at: None,
        }
    }
}
