//! 운행 상태 머신.
//!
//! 네트워크 재전송/순서 뒤바뀜과 무관하게, 현실에서 가능한 순서로만
//! 운행 이벤트를 적용한다. 도달 불가능한 전이는 버려지고(debug 로그),
//! 현재 상태와 같은 목표 상태는 안전한 no-op이다 (at-least-once 전송).
//!
//! ```text
//! idle → searching → requested → accepted → arriving → arrived → started → in_progress → completed
//! searching|requested|accepted|arriving → cancelled
//! requested → timeout
//! requested → rejected            (기사 전용)
//! ```
//!
//! 종료 상태 이후의 `searching`/`requested`는 새 rideId로 새 운행을 시작한다.

use chrono::Utc;
use ridelink_core::error::CoreError;
use ridelink_core::models::payload::{LocationPayload, RidePayload};
use ridelink_core::models::ride::{GeoPoint, RideSession, RideState, Role};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// 전이 테이블 조회
pub fn is_reachable(from: RideState, to: RideState, role: Role) -> bool {
    use RideState::*;
    match (from, to) {
        (Idle, Searching | Requested) => true,
        (Searching, Requested | Cancelled) => true,
        (Requested, Accepted | Cancelled | Timeout) => true,
        (Requested, Rejected) => role == Role::Driver,
        (Accepted, Arriving | Cancelled) => true,
        (Arriving, Arrived | Cancelled) => true,
        (Arrived, Started) => true,
        (Started, InProgress) => true,
        (InProgress, Completed) => true,
        _ => false,
    }
}

/// 적용된 전이
#[derive(Debug, Clone, PartialEq)]
pub struct RideUpdate {
    pub from: RideState,
    pub to: RideState,
    /// 전이 후 운행 스냅샷
    pub ride: RideSession,
}

/// 운행 이벤트 적용 결과
#[derive(Debug, Clone, PartialEq)]
pub enum RideOutcome {
    /// 전이 적용
    Applied(RideUpdate),
    /// 이미 적용된 전이의 재전송
    Duplicate,
    /// 현재 상태에서 도달 불가 또는 다른 운행 대상
    Discarded(String),
}

/// 단일 활성 운행 추적기
#[derive(Debug, Clone)]
pub struct RideTracker {
    role: Role,
    grace_period: Duration,
    current: Option<RideSession>,
    /// 종료 상태 진입 시각 (유예 기간 계산용)
    ended_at: Option<Instant>,
}

impl RideTracker {
    pub fn new(role: Role, grace_period: Duration) -> Self {
        Self {
            role,
            grace_period,
            current: None,
            ended_at: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// 현재(또는 유예 기간 중인) 운행
    pub fn current(&self) -> Option<&RideSession> {
        self.current.as_ref()
    }

    /// 전이 판단 기준 상태. 운행이 없거나 종료되었으면 `Idle`.
    pub fn effective_state(&self) -> RideState {
        match &self.current {
            Some(ride) if !ride.state.is_terminal() => ride.state,
            _ => RideState::Idle,
        }
    }

    /// 유예 기간이 지난 종료 운행 정리
    pub fn expire(&mut self, now: Instant) {
        if let Some(ended_at) = self.ended_at {
            if now.saturating_duration_since(ended_at) >= self.grace_period {
                if let Some(ride) = self.current.take() {
                    debug!("운행 {} 유예 기간 만료", ride.ride_id);
                }
                self.ended_at = None;
            }
        }
    }

    /// 수신 운행 이벤트 적용
    pub fn apply(&mut self, target: RideState, payload: &RidePayload, now: Instant) -> RideOutcome {
        self.expire(now);

        let outcome = match &mut self.current {
            Some(ride) if !ride.state.is_terminal() => {
                if ride.ride_id != payload.ride_id {
                    RideOutcome::Discarded(format!(
                        "다른 운행 대상 ({} ≠ {})",
                        payload.ride_id, ride.ride_id
                    ))
                } else if ride.state == target {
                    RideOutcome::Duplicate
                } else if !is_reachable(ride.state, target, self.role) {
                    RideOutcome::Discarded(format!("{} → {} 도달 불가", ride.state, target))
                } else {
                    let from = ride.state;
                    ride.state = target;
                    if payload.counterparty_id.is_some() {
                        ride.counterparty_id = payload.counterparty_id.clone();
                    }
                    if target.is_terminal() {
                        ride.ended_at = Some(Utc::now());
                        self.ended_at = Some(now);
                    }
                    RideOutcome::Applied(RideUpdate {
                        from,
                        to: target,
                        ride: ride.clone(),
                    })
                }
            }
            previous => {
                let same_ride = previous
                    .as_ref()
                    .is_some_and(|ride| ride.ride_id == payload.ride_id);
                let same_state = previous.as_ref().is_some_and(|ride| ride.state == target);
                if same_ride && same_state {
                    RideOutcome::Duplicate
                } else if same_ride {
                    RideOutcome::Discarded(format!("종료된 운행 {} 재사용 불가", payload.ride_id))
                } else if !is_reachable(RideState::Idle, target, self.role) {
                    RideOutcome::Discarded(format!("idle → {target} 도달 불가"))
                } else {
                    let mut ride = RideSession::new(payload.ride_id.clone(), target);
                    ride.counterparty_id = payload.counterparty_id.clone();
                    *previous = Some(ride.clone());
                    self.ended_at = None;
                    RideOutcome::Applied(RideUpdate {
                        from: RideState::Idle,
                        to: target,
                        ride,
                    })
                }
            }
        };

        match &outcome {
            RideOutcome::Applied(update) => {
                info!(
                    "운행 {}: {} → {}",
                    update.ride.ride_id, update.from, update.to
                );
            }
            RideOutcome::Duplicate => debug!("중복 운행 이벤트 무시: {target}"),
            RideOutcome::Discarded(reason) => debug!("운행 이벤트 폐기: {reason}"),
        }
        outcome
    }

    /// 위치 업데이트 적용. 위치를 받는 상태의 같은 운행일 때만 `true`.
    pub fn apply_location(&mut self, payload: &LocationPayload, now: Instant) -> bool {
        self.expire(now);
        match self.current.as_mut() {
            Some(ride) if ride.ride_id == payload.ride_id && ride.state.accepts_location() => {
                ride.last_location = Some(GeoPoint {
                    latitude: payload.latitude,
                    longitude: payload.longitude,
                });
                true
            }
            _ => {
                debug!("위치 업데이트 폐기 (운행 {})", payload.ride_id);
                false
            }
        }
    }

    /// 채팅/평점이 해당 운행을 참조할 수 있는지.
    /// 진행 중이거나, 완료 후 유예 기간 이내일 때만 허용.
    pub fn accepts_ride_scoped(&mut self, ride_id: &str, now: Instant) -> bool {
        self.expire(now);
        match &self.current {
            Some(ride) if ride.ride_id == ride_id => {
                ride.state.is_active() || ride.state == RideState::Completed
            }
            _ => false,
        }
    }

    /// 송신 명령 검증. 전송할 운행 페이로드를 반환하며 상태는 바꾸지 않는다.
    pub fn prepare(&mut self, target: RideState, now: Instant) -> Result<RidePayload, CoreError> {
        self.expire(now);
        let from = self.effective_state();
        if !is_reachable(from, target, self.role) {
            return Err(CoreError::InvalidRideState {
                command: target.to_string(),
                state: from.to_string(),
            });
        }
        let ride_id = match (&self.current, from) {
            (Some(ride), state) if state != RideState::Idle => ride.ride_id.clone(),
            _ => format!("ride_{}", uuid::Uuid::new_v4().simple()),
        };
        Ok(RidePayload::new(ride_id))
    }

    /// 현재 운행 ID (진행 중 또는 유예 기간)
    pub fn ride_id(&self) -> Option<&str> {
        self.current.as_ref().map(|ride| ride.ride_id.as_str())
    }
}
