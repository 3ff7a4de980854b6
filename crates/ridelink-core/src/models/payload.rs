//! 이벤트 페이로드.
//!
//! 서버와 공유하는 카테고리별 페이로드 구조. 키는 camelCase.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// 운행 생명주기 페이로드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RidePayload {
    pub ride_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_id: Option<String>,
    /// 취소/거절 사유
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RidePayload {
    pub fn new(ride_id: impl Into<String>) -> Self {
        Self {
            ride_id: ride_id.into(),
            counterparty_id: None,
            reason: None,
        }
    }
}

/// 위치 업데이트 페이로드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPayload {
    pub ride_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// 진행 방향 (도)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
}

/// 채팅 페이로드 (메시지/입력 중/읽음 공용)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub ride_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// 평점 페이로드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingPayload {
    pub ride_id: String,
    /// 1~5
    pub stars: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl RatingPayload {
    /// 별점 범위 검증
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(1..=5).contains(&self.stars) {
            return Err(CoreError::Validation {
                field: "stars".to_string(),
                message: format!("1~5 범위 필요, 입력값 {}", self.stars),
            });
        }
        Ok(())
    }
}

/// 긴급 호출 페이로드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ride_id: Option<String>,
    /// 긴급 유형 (예: "sos", "accident")
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

/// 핑/퐁 페이로드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPayload {
    /// 핑 송신 시각 (epoch ms)
    pub timestamp: i64,
}
