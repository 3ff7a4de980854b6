//! 이벤트 카탈로그.
//!
//! 세션에서 주고받는 모든 메시지 타입의 닫힌 집합.
//! 런타임에 확장할 수 없으며, 서버와 클라이언트가 동일한 어휘를 공유한다.
//! 와이어 이름은 `<카테고리>:<이름>` 형식이다.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CoreError;
use crate::models::ride::RideState;

/// 카탈로그 버전 (연결 시 `v` 쿼리 파라미터로 전송)
pub const PROTOCOL_VERSION: u32 = 1;

/// 이벤트 카테고리 — 구독 레지스트리의 라우팅 키
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// 연결 수립/재개
    Connection,
    /// 기사/승객 접속 상태
    Presence,
    /// 운행 생명주기
    Ride,
    /// 위치 업데이트
    Location,
    /// 채팅
    Chat,
    /// 결제 상태
    Payment,
    /// 평점
    Rating,
    /// 긴급 상황
    Emergency,
    /// 시스템 (핑/퐁, 공지)
    System,
}

macro_rules! event_catalog {
    ($( $(#[$meta:meta])* $variant:ident => $wire:literal, $category:ident; )+) => {
        /// 이벤트 타입 (닫힌 열거형)
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EventType {
            $( $(#[$meta])* $variant, )+
        }

        impl EventType {
            /// 카탈로그 전체 목록
            pub const ALL: &'static [EventType] = &[ $( EventType::$variant, )+ ];

            /// 와이어 이름
            pub fn as_str(self) -> &'static str {
                match self {
                    $( EventType::$variant => $wire, )+
                }
            }

            /// 와이어 이름에서 타입 조회. 카탈로그에 없으면 `None`.
            pub fn from_wire(name: &str) -> Option<Self> {
                match name {
                    $( $wire => Some(EventType::$variant), )+
                    _ => None,
                }
            }

            /// 소속 카테고리
            pub fn category(self) -> EventCategory {
                match self {
                    $( EventType::$variant => EventCategory::$category, )+
                }
            }
        }
    };
}

event_catalog! {
    /// 서버가 세션 수립을 확인
    ConnectionAck => "connection:ack", Connection;
    /// 재연결 후 세션 재개
    ConnectionResume => "connection:resume", Connection;
    /// 상대방 접속
    PresenceOnline => "presence:online", Presence;
    /// 상대방 접속 해제
    PresenceOffline => "presence:offline", Presence;
    /// 배차 탐색 중
    RideSearching => "ride:searching", Ride;
    /// 배차 요청됨 (기사에게는 배차 제안)
    RideRequested => "ride:requested", Ride;
    /// 기사 수락
    RideAccepted => "ride:accepted", Ride;
    /// 기사 거절 (기사 관점 전용)
    RideRejected => "ride:rejected", Ride;
    /// 기사 이동 중
    RideArriving => "ride:arriving", Ride;
    /// 기사 도착
    RideArrived => "ride:arrived", Ride;
    /// 탑승 시작
    RideStarted => "ride:started", Ride;
    /// 운행 중
    RideInProgress => "ride:in_progress", Ride;
    /// 운행 완료
    RideCompleted => "ride:completed", Ride;
    /// 운행 취소
    RideCancelled => "ride:cancelled", Ride;
    /// 배차 요청 시간 초과
    RideTimeout => "ride:timeout", Ride;
    /// 위치 업데이트
    LocationUpdate => "location:update", Location;
    /// 채팅 메시지
    ChatMessage => "chat:message", Chat;
    /// 입력 중 표시
    ChatTyping => "chat:typing", Chat;
    /// 읽음 확인
    ChatRead => "chat:read", Chat;
    /// 결제 상태 변경
    PaymentStatus => "payment:status", Payment;
    /// 평점 제출
    RatingSubmitted => "rating:submit", Rating;
    /// 긴급 호출
    EmergencySos => "emergency:sos", Emergency;
    /// 긴급 호출 접수 확인
    EmergencyAck => "emergency:ack", Emergency;
    /// 긴급 상황 해제
    EmergencyResolved => "emergency:resolved", Emergency;
    /// 헬스체크 핑
    SystemPing => "system:ping", System;
    /// 헬스체크 퐁
    SystemPong => "system:pong", System;
    /// 서버 공지
    SystemNotice => "system:notice", System;
}

impl EventType {
    /// 운행 이벤트가 지정하는 목표 상태
    pub fn ride_target(self) -> Option<RideState> {
        let state = match self {
            EventType::RideSearching => RideState::Searching,
            EventType::RideRequested => RideState::Requested,
            EventType::RideAccepted => RideState::Accepted,
            EventType::RideRejected => RideState::Rejected,
            EventType::RideArriving => RideState::Arriving,
            EventType::RideArrived => RideState::Arrived,
            EventType::RideStarted => RideState::Started,
            EventType::RideInProgress => RideState::InProgress,
            EventType::RideCompleted => RideState::Completed,
            EventType::RideCancelled => RideState::Cancelled,
            EventType::RideTimeout => RideState::Timeout,
            _ => return None,
        };
        Some(state)
    }

    /// 목표 상태에 대응하는 운행 이벤트 타입
    pub fn for_ride_state(state: RideState) -> Option<Self> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.ride_target() == Some(state))
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 세션 이벤트 — 생성 후 불변
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// 이벤트 타입
    pub event_type: EventType,
    /// 페이로드 (타입별 구조는 `models::payload` 참조)
    pub payload: serde_json::Value,
    /// 송신 시각
    pub sent_at: DateTime<Utc>,
}

impl Event {
    /// 직렬화 가능한 페이로드로 이벤트 생성 (송신 시각 = 현재)
    pub fn new<P: Serialize>(event_type: EventType, payload: &P) -> Result<Self, CoreError> {
        Ok(Self {
            event_type,
            payload: serde_json::to_value(payload)?,
            sent_at: Utc::now(),
        })
    }

    /// 카테고리 단축 접근
    pub fn category(&self) -> EventCategory {
        self.event_type.category()
    }

    /// 페이로드를 타입 지정 구조체로 해석
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, CoreError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}
