//! 연결 관리 상태 머신.
//!
//! I/O 없는 순수 상태 머신. 입력([`Input`])과 현재 시각을 받아
//! 드라이버가 실행할 [`Action`] 목록을 반환한다.
//!
//! ```text
//!                connect()/reconnect()/재연결 타이머
//! ┌──────────────┐ ───────────────────> ┌────────────┐  Opened  ┌───────────┐
//! │ Disconnected │                      │ Connecting │ ───────> │ Connected │
//! └──────────────┘ <─────────────────── └────────────┘          └───────────┘
//!        ^           실패 (재시도 가능 → 백오프)                      │
//!        └──────────────────────────────────────────────────────────┘
//!             비정상 종료 / 퐁 타임아웃 (백오프) / disconnect()
//! ```
//!
//! 자동 재연결은 `connect()` 이후 `disconnect()` 전까지만 동작하며,
//! 최대 시도 초과 또는 인증/버전 에러 시 비활성화된다.
//! 인증/버전 에러 후에는 네트워크 복구로도 되살아나지 않고
//! `connect()`/`reconnect()` 호출이 필요하다.

use ridelink_core::config::{HealthConfig, ReconnectConfig};
use ridelink_core::error::{SessionError, TransportError, TransportErrorKind};
use ridelink_core::models::session::{
    AppState, CloseReason, ConnectionStatus, Reachability, SessionState,
};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::health::HealthMonitor;

/// 타이머 종류 — 종류별로 최대 1개만 무장됨
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// 백오프 재연결
    Reconnect,
    /// 주기 핑
    Ping,
    /// 퐁 대기 기한
    PongDeadline,
    /// 포그라운드 복귀 디바운스
    ForegroundDebounce,
}

impl TimerKind {
    pub const ALL: [TimerKind; 4] = [
        TimerKind::Reconnect,
        TimerKind::Ping,
        TimerKind::PongDeadline,
        TimerKind::ForegroundDebounce,
    ];
}

/// 상태 머신 입력
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// 외부 `connect()` 호출
    Connect,
    /// 외부 `disconnect()` 호출
    Disconnect,
    /// 외부 `reconnect()` 호출
    Reconnect,
    /// 전송 연결 수립
    Opened,
    /// 전송 연결 종료
    Closed(CloseReason),
    /// 전송 에러 (연결 실패 포함)
    Failed(TransportError),
    /// 퐁 수신
    PongReceived,
    /// 타이머 만료
    TimerFired(TimerKind),
    /// 앱 생명주기 변경
    AppStateChanged(AppState),
    /// 네트워크 도달 가능성 변경
    ReachabilityChanged(Reachability),
}

/// 드라이버가 실행할 동작
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// 전송 연결 요청
    OpenTransport,
    /// 전송 연결 종료
    CloseTransport,
    /// 핑 송신
    SendPing,
    /// 타이머 무장 (같은 종류의 기존 타이머는 취소)
    ArmTimer(TimerKind, Duration),
    /// 타이머 취소
    CancelTimer(TimerKind),
    /// 세션 상태 변경 통지
    StateChanged(SessionState),
    /// 에러 통지
    ReportError(SessionError),
}

/// 세션 연결 상태 머신
#[derive(Debug, Clone)]
pub struct ConnectionCore {
    state: SessionState,
    /// `connect()` 이후 `disconnect()` 전까지 true
    wants_session: bool,
    auto_reconnect: bool,
    /// 현재 복구 주기의 시도 번호 (1부터, 연결 성공 시 0)
    attempt: u32,
    app_state: AppState,
    reachability: Reachability,
    backoff: Backoff,
    health: HealthMonitor,
    foreground_debounce: Duration,
}

impl ConnectionCore {
    pub fn new(reconnect: &ReconnectConfig, health: &HealthConfig) -> Self {
        Self {
            state: SessionState::Disconnected,
            wants_session: false,
            auto_reconnect: false,
            attempt: 0,
            app_state: AppState::Foreground,
            reachability: Reachability::Online,
            backoff: Backoff::new(reconnect),
            health: HealthMonitor::new(health),
            foreground_debounce: health.foreground_debounce(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// 연결 중이고 퐁이 기한 안에 수신되었는지
    pub fn is_healthy(&self, now: Instant) -> bool {
        self.state == SessionState::Connected && self.health.is_healthy(now)
    }

    /// 상태 스냅샷
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            connected: self.state == SessionState::Connected,
            online: self.reachability == Reachability::Online,
            app_state: self.app_state,
            reconnect_attempts: self.attempt,
            auto_reconnect: self.auto_reconnect,
            last_pong_at: self.health.last_pong_at(),
        }
    }

    /// 입력 처리
    pub fn handle(&mut self, input: Input, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();
        match input {
            Input::Connect => self.on_connect(&mut actions),
            Input::Disconnect => self.on_disconnect(&mut actions),
            Input::Reconnect => self.on_reconnect(&mut actions),
            Input::Opened => self.on_opened(now, &mut actions),
            Input::Closed(reason) => self.on_closed(reason, &mut actions),
            Input::Failed(err) => self.on_failed(err, &mut actions),
            Input::PongReceived => {
                if self.state == SessionState::Connected {
                    self.health.on_pong(now);
                    actions.push(Action::CancelTimer(TimerKind::PongDeadline));
                }
            }
            Input::TimerFired(kind) => self.on_timer(kind, now, &mut actions),
            Input::AppStateChanged(app_state) => self.on_app_state(app_state, &mut actions),
            Input::ReachabilityChanged(reachability) => {
                self.on_reachability(reachability, &mut actions)
            }
        }
        actions
    }

    fn on_connect(&mut self, actions: &mut Vec<Action>) {
        self.wants_session = true;
        self.auto_reconnect = true;
        if self.state != SessionState::Disconnected {
            debug!("connect() 무시: 이미 {}", self.state);
            return;
        }
        actions.push(Action::CancelTimer(TimerKind::Reconnect));
        actions.push(Action::CancelTimer(TimerKind::ForegroundDebounce));
        self.begin_attempt(1, actions);
    }

    fn on_disconnect(&mut self, actions: &mut Vec<Action>) {
        self.wants_session = false;
        self.auto_reconnect = false;
        self.attempt = 0;
        for kind in TimerKind::ALL {
            actions.push(Action::CancelTimer(kind));
        }
        self.health.on_disconnected();
        if self.state != SessionState::Disconnected {
            info!("세션 종료 요청");
            actions.push(Action::CloseTransport);
            self.set_state(SessionState::Disconnected, actions);
        }
    }

    fn on_reconnect(&mut self, actions: &mut Vec<Action>) {
        self.wants_session = true;
        self.auto_reconnect = true;
        for kind in TimerKind::ALL {
            actions.push(Action::CancelTimer(kind));
        }
        if self.state != SessionState::Disconnected {
            actions.push(Action::CloseTransport);
            self.health.on_disconnected();
        }
        info!("수동 재연결 — 백오프 초기화");
        self.begin_attempt(1, actions);
    }

    fn on_opened(&mut self, now: Instant, actions: &mut Vec<Action>) {
        if self.state != SessionState::Connecting {
            debug!("예상치 못한 Opened 무시 (상태: {})", self.state);
            if !self.wants_session {
                actions.push(Action::CloseTransport);
            }
            return;
        }
        info!("세션 연결됨 (시도 {}회차)", self.attempt);
        self.attempt = 0;
        self.health.on_connected(now);
        actions.push(Action::ArmTimer(TimerKind::Ping, self.health.interval()));
        self.set_state(SessionState::Connected, actions);
    }

    fn on_closed(&mut self, reason: CloseReason, actions: &mut Vec<Action>) {
        if self.state == SessionState::Disconnected {
            return;
        }
        let was = self.state;
        self.drop_connection(actions);
        match reason {
            CloseReason::ClientInitiated => {
                debug!("클라이언트 종료 확인");
            }
            CloseReason::ServerFinal => {
                info!("서버 최종 종료 — 자동 재연결 중단");
                self.auto_reconnect = false;
            }
            CloseReason::Abnormal(detail) => {
                warn!("연결 비정상 종료: {detail}");
                self.recover(was, actions);
            }
        }
    }

    fn on_failed(&mut self, err: TransportError, actions: &mut Vec<Action>) {
        let retryable = err.is_retryable();
        let was = self.state;
        actions.push(Action::ReportError(SessionError::from(err.clone())));

        match was {
            SessionState::Disconnected => {
                debug!("연결 해제 상태의 전송 에러: {err}");
            }
            SessionState::Connected if retryable => {
                // 종료 신호가 뒤따른다
                warn!("전송 에러: {err}");
            }
            _ => {
                if was == SessionState::Connected {
                    actions.push(Action::CloseTransport);
                }
                self.drop_connection(actions);
                if retryable {
                    warn!("연결 실패: {err}");
                    self.recover(was, actions);
                } else {
                    error!("재시도 불가 에러 — 자동 재연결 중단: {err}");
                    self.auto_reconnect = false;
                    // 새 토큰이나 업그레이드 전까지 세션 포기
                    if matches!(
                        err.kind,
                        TransportErrorKind::AuthRejected | TransportErrorKind::VersionMismatch
                    ) {
                        self.wants_session = false;
                    }
                }
            }
        }
    }

    fn on_timer(&mut self, kind: TimerKind, now: Instant, actions: &mut Vec<Action>) {
        match kind {
            TimerKind::Ping => {
                if self.state != SessionState::Connected {
                    return;
                }
                actions.push(Action::SendPing);
                if self.health.on_ping(now) {
                    actions.push(Action::ArmTimer(
                        TimerKind::PongDeadline,
                        self.health.pong_deadline(),
                    ));
                }
                actions.push(Action::ArmTimer(TimerKind::Ping, self.health.interval()));
            }
            TimerKind::PongDeadline => {
                if self.state != SessionState::Connected || !self.health.awaiting_pong() {
                    return;
                }
                warn!(
                    "퐁 미수신 {:?} 초과 — 연결 해체 후 재연결",
                    self.health.pong_deadline()
                );
                actions.push(Action::ReportError(SessionError::Transport(
                    TransportError::new(TransportErrorKind::Timeout, "pong timeout"),
                )));
                actions.push(Action::CloseTransport);
                self.drop_connection(actions);
                self.recover(SessionState::Connected, actions);
            }
            TimerKind::Reconnect => {
                if self.can_auto_connect() {
                    self.begin_attempt(self.attempt + 1, actions);
                }
            }
            TimerKind::ForegroundDebounce => {
                if self.can_auto_connect() {
                    info!("포그라운드 복귀 — 재연결");
                    actions.push(Action::CancelTimer(TimerKind::Reconnect));
                    self.begin_attempt(1, actions);
                }
            }
        }
    }

    fn on_app_state(&mut self, app_state: AppState, actions: &mut Vec<Action>) {
        if self.app_state == app_state {
            return;
        }
        self.app_state = app_state;
        self.health.set_app_state(app_state);
        debug!("앱 상태 {:?} — 핑 간격 {:?}", app_state, self.health.interval());

        if self.state == SessionState::Connected {
            actions.push(Action::ArmTimer(TimerKind::Ping, self.health.interval()));
        }
        match app_state {
            AppState::Background => {
                actions.push(Action::CancelTimer(TimerKind::ForegroundDebounce));
            }
            AppState::Foreground => {
                if self.can_auto_connect() {
                    actions.push(Action::ArmTimer(
                        TimerKind::ForegroundDebounce,
                        self.foreground_debounce,
                    ));
                }
            }
        }
    }

    fn on_reachability(&mut self, reachability: Reachability, actions: &mut Vec<Action>) {
        if self.reachability == reachability {
            return;
        }
        self.reachability = reachability;
        match reachability {
            Reachability::Offline => {
                // 전송이 스스로 실패하며 백오프 경로를 탄다
                info!("네트워크 오프라인");
            }
            Reachability::Online => {
                info!("네트워크 온라인 복구");
                if self.wants_session && self.state == SessionState::Disconnected {
                    self.on_reconnect(actions);
                }
            }
        }
    }

    fn can_auto_connect(&self) -> bool {
        self.state == SessionState::Disconnected && self.wants_session && self.auto_reconnect
    }

    fn begin_attempt(&mut self, attempt: u32, actions: &mut Vec<Action>) {
        self.attempt = attempt;
        debug!("연결 시도 {attempt}회차");
        actions.push(Action::OpenTransport);
        self.set_state(SessionState::Connecting, actions);
    }

    /// 헬스체크 타이머 해제 및 Disconnected 전환
    fn drop_connection(&mut self, actions: &mut Vec<Action>) {
        actions.push(Action::CancelTimer(TimerKind::Ping));
        actions.push(Action::CancelTimer(TimerKind::PongDeadline));
        self.health.on_disconnected();
        self.set_state(SessionState::Disconnected, actions);
    }

    /// 예기치 않은 연결 손실 후 백오프 재연결 예약
    fn recover(&mut self, was: SessionState, actions: &mut Vec<Action>) {
        if was == SessionState::Connected {
            self.attempt = 0;
        } else if self.attempt >= self.backoff.max_attempts() {
            error!("재연결 {}회 실패 — 자동 재연결 중단", self.attempt);
            self.auto_reconnect = false;
            actions.push(Action::ReportError(SessionError::RetriesExhausted {
                attempts: self.attempt,
            }));
            return;
        }
        if !self.wants_session || !self.auto_reconnect {
            return;
        }
        let delay = self.backoff.delay(self.attempt.max(1));
        info!("{:?} 후 재연결 ({}회차)", delay, self.attempt + 1);
        actions.push(Action::ArmTimer(TimerKind::Reconnect, delay));
    }

    fn set_state(&mut self, state: SessionState, actions: &mut Vec<Action>) {
        if self.state != state {
            self.state = state;
            actions.push(Action::StateChanged(state));
        }
    }
}
