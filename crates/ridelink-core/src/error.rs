//! RIDELINK 핵심 에러 타입.
//!
//! 모든 어댑터 crate는 자체 에러 타입에서 `#[from] CoreError`로 래핑한다.
//! 전송 계층 에러는 [`TransportError`]로 분류되어 재시도 여부를 결정하고,
//! 세션 구독자에게는 [`SessionError`]로 전달된다.

use thiserror::Error;

/// 코어 레이어 에러.
/// 직렬화, 설정, 유효성 검증, 세션/운행 상태 위반 등 도메인 공통 에러를 정의한다.
#[derive(Debug, Error)]
pub enum CoreError {
    /// JSON 직렬화/역직렬화 실패
    #[error("직렬화 에러: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 설정값 오류
    #[error("설정 에러: {0}")]
    Config(String),

    /// 필드 유효성 검증 실패
    #[error("유효성 검증 실패 — {field}: {message}")]
    Validation {
        /// 검증 실패한 필드명
        field: String,
        /// 실패 사유
        message: String,
    },

    /// 세션이 연결되지 않은 상태에서 송신 시도
    #[error("세션 미연결 상태")]
    NotConnected,

    /// 현재 운행 상태에서 허용되지 않는 명령
    #[error("운행 상태 위반: {command} (현재 상태: {state})")]
    InvalidRideState {
        /// 거부된 명령
        command: String,
        /// 명령 시점의 운행 상태
        state: String,
    },

    /// 전송 계층 에러
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// 세션 드라이버가 이미 종료됨
    #[error("세션 종료됨")]
    SessionClosed,

    /// 내부 에러 (예상치 못한 상황)
    #[error("내부 에러: {0}")]
    Internal(String),

    /// I/O 에러
    #[error("I/O 에러: {0}")]
    Io(#[from] std::io::Error),
}

/// 전송 에러 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// 연결/핸드셰이크 타임아웃
    Timeout,
    /// 서버가 연결 거부
    Refused,
    /// 연결이 중간에 끊김
    Reset,
    /// 네트워크 도달 불가
    Unreachable,
    /// 인증 거부 (토큰 만료, 권한 없음)
    AuthRejected,
    /// 프로토콜 버전 불일치
    VersionMismatch,
    /// 프레임 수준 프로토콜 위반
    Protocol,
}

impl TransportErrorKind {
    /// 백오프 재연결 대상 여부
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Refused | Self::Reset | Self::Unreachable
        )
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::Refused => "refused",
            Self::Reset => "reset",
            Self::Unreachable => "unreachable",
            Self::AuthRejected => "auth_rejected",
            Self::VersionMismatch => "version_mismatch",
            Self::Protocol => "protocol",
        };
        f.write_str(name)
    }
}

/// 전송 어댑터 에러
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("전송 에러({kind}): {message}")]
pub struct TransportError {
    /// 에러 분류
    pub kind: TransportErrorKind,
    /// 상세 메시지
    pub message: String,
}

impl TransportError {
    /// 새 전송 에러 생성
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// 백오프 재연결 대상 여부
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// 세션 구독자에게 전달되는 에러.
///
/// `RetriesExhausted`, `AuthRejected`, `VersionMismatch`만 치명적이며
/// 외부 호출자(UI)가 처리해야 한다. 나머지는 내부에서 복구된다.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// 일시적 전송 에러 (백오프로 복구)
    #[error(transparent)]
    Transport(TransportError),

    /// 알 수 없는 이벤트 타입, 잘못된 페이로드
    #[error("프로토콜 에러: {0}")]
    Protocol(String),

    /// 최대 재연결 시도 초과 — 명시적 `reconnect()` 필요
    #[error("재연결 {attempts}회 실패 — 오프라인")]
    RetriesExhausted {
        /// 실패한 시도 횟수
        attempts: u32,
    },

    /// 인증 거부 — 로그아웃 흐름 필요
    #[error("인증 거부: {0}")]
    AuthRejected(String),

    /// 프로토콜 버전 불일치 — 업그레이드 흐름 필요
    #[error("프로토콜 버전 불일치: {0}")]
    VersionMismatch(String),
}

impl SessionError {
    /// 외부 호출자에게 에스컬레이션해야 하는 에러인지 여부
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::RetriesExhausted { .. } | Self::AuthRejected(_) | Self::VersionMismatch(_)
        )
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err.kind {
            TransportErrorKind::AuthRejected => Self::AuthRejected(err.message),
            TransportErrorKind::VersionMismatch => Self::VersionMismatch(err.message),
            TransportErrorKind::Protocol => Self::Protocol(err.message),
            _ => Self::Transport(err),
        }
    }
}
