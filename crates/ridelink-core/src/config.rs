//! 애플리케이션 설정 구조체.
//!
//! 서버 URL, 재연결 백오프, 헬스체크 주기, 운행 유예 기간 등
//! 런타임 설정을 정의한다. `ConfigManager`를 통해 JSON 파일에서 로드.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CoreError;
use crate::models::ride::Role;

/// 최상위 애플리케이션 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 서버 연결 설정
    #[serde(default)]
    pub server: ServerConfig,
    /// 재연결 백오프 설정
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// 헬스체크 설정
    #[serde(default)]
    pub health: HealthConfig,
    /// 운행 설정
    #[serde(default)]
    pub ride: RideConfig,
}

impl AppConfig {
    /// 기본 설정
    pub fn default_config() -> Self {
        Self::default()
    }

    /// 설정값 검증
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.server.url.trim().is_empty() {
            return Err(invalid("server.url", "비어 있음"));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(invalid("reconnect.max_attempts", "1 이상 필요"));
        }
        if self.reconnect.base_delay_ms == 0 {
            return Err(invalid("reconnect.base_delay_ms", "0보다 커야 함"));
        }
        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return Err(invalid(
                "reconnect.base_delay_ms",
                "max_delay_ms 이하여야 함",
            ));
        }
        if self.health.foreground_ping_secs == 0 || self.health.background_ping_secs == 0 {
            return Err(invalid("health", "핑 간격은 0보다 커야 함"));
        }
        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> CoreError {
    CoreError::Validation {
        field: field.to_string(),
        message: message.to_string(),
    }
}

// ============================================================
// 서버 설정
// ============================================================

/// 서버 연결 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 디스패치 서버 URL (http/https는 ws/wss로 변환)
    #[serde(default = "default_server_url")]
    pub url: String,
    /// 인증 토큰
    #[serde(default)]
    pub token: Option<String>,
    /// 채팅 발신자 ID (없으면 세션 시작 시 생성)
    #[serde(default)]
    pub client_id: Option<String>,
    /// 클라이언트 역할
    #[serde(default)]
    pub role: Role,
    /// 핸드셰이크 타임아웃 (밀리초)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            token: None,
            client_id: None,
            role: Role::Rider,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

fn default_server_url() -> String {
    "ws://localhost:8000/realtime".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

// ============================================================
// 재연결 설정
// ============================================================

/// 재연결 백오프 설정
///
/// 지연 = `min(base * 1.5^(n-1), max) + random(0, jitter)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// 기본 지연 (밀리초)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// 최대 지연 (밀리초, 지터 제외)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// 최대 시도 횟수 — 초과 시 자동 재연결 중단
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 지터 상한 (밀리초)
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_jitter_ms() -> u64 {
    1_000
}

// ============================================================
// 헬스체크 설정
// ============================================================

/// 핑/퐁 헬스체크 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// 포그라운드 핑 간격 (초)
    #[serde(default = "default_foreground_ping_secs")]
    pub foreground_ping_secs: u64,
    /// 백그라운드 핑 간격 (초)
    #[serde(default = "default_background_ping_secs")]
    pub background_ping_secs: u64,
    /// 포그라운드 복귀 후 재연결 디바운스 (밀리초)
    #[serde(default = "default_foreground_debounce_ms")]
    pub foreground_debounce_ms: u64,
}

impl HealthConfig {
    pub fn foreground_interval(&self) -> Duration {
        Duration::from_secs(self.foreground_ping_secs)
    }

    pub fn background_interval(&self) -> Duration {
        Duration::from_secs(self.background_ping_secs)
    }

    pub fn foreground_debounce(&self) -> Duration {
        Duration::from_millis(self.foreground_debounce_ms)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            foreground_ping_secs: default_foreground_ping_secs(),
            background_ping_secs: default_background_ping_secs(),
            foreground_debounce_ms: default_foreground_debounce_ms(),
        }
    }
}

fn default_foreground_ping_secs() -> u64 {
    30
}

fn default_background_ping_secs() -> u64 {
    60
}

fn default_foreground_debounce_ms() -> u64 {
    1_500
}

// ============================================================
// 운행 설정
// ============================================================

/// 운행 상태 머신 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideConfig {
    /// 운행 완료 후 채팅/평점을 허용하는 유예 기간 (초)
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

impl RideConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

impl Default for RideConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

fn default_grace_period_secs() -> u64 {
    300
}
