//! 연결 관리자.
//!
//! [`ConnectionManager`]는 외부 호출자용 핸들이고, 실제 작업은 단일 드라이버 태스크가
//! 수행한다. 드라이버는 명령, 전송 신호, 타이머 만료, 생명주기/네트워크 신호를
//! 하나의 `select!` 루프에서 순서대로 처리하므로 전송 송신자는 항상 하나다.
//!
//! ```text
//! ConnectionManager ──Command──> Driver ──Action──> Transport / TimerSet / SubscriberRegistry
//!                                  ^  ^
//!           TransportSink(epoch) ──┘  └── LifecycleSource / ReachabilitySource (watch)
//! ```

use chrono::Utc;
use parking_lot::Mutex;
use ridelink_core::config::{AppConfig, HealthConfig, ReconnectConfig};
use ridelink_core::error::{CoreError, SessionError};
use ridelink_core::models::event::{Event, EventCategory, EventType};
use ridelink_core::models::payload::{
    ChatPayload, EmergencyPayload, LocationPayload, PingPayload, RatingPayload, RidePayload,
};
use ridelink_core::models::ride::{GeoPoint, RideSession, RideState, Role};
use ridelink_core::models::session::{AppState, ConnectionStatus, Reachability, SessionState};
use ridelink_core::ports::platform::{LifecycleSource, ReachabilitySource};
use ridelink_core::ports::transport::{Transport, TransportEvent, TransportSink};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::connection::{Action, ConnectionCore, Input, TimerKind};
use crate::registry::{Notification, SubscriberRegistry, SubscriptionId, Topic};
use crate::ride::{RideOutcome, RideTracker, RideUpdate};
use crate::timer::{Fired, TimerSet};

/// 세션 생성 옵션
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub reconnect: ReconnectConfig,
    pub health: HealthConfig,
    pub role: Role,
    /// 완료 후 채팅/평점 유예 기간
    pub grace_period: Duration,
    /// 채팅 발신자 ID
    pub client_id: String,
}

impl SessionOptions {
    /// 앱 설정에서 생성. `client_id`가 없으면 새로 발급한다.
    pub fn from_config(config: &AppConfig) -> Self {
        let client_id = config
            .server
            .client_id
            .clone()
            .unwrap_or_else(|| format!("client_{}", uuid::Uuid::new_v4().simple()));
        Self {
            reconnect: config.reconnect.clone(),
            health: config.health.clone(),
            role: config.server.role,
            grace_period: config.ride.grace_period(),
            client_id,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// 송신 명령
#[derive(Debug)]
enum Outbound {
    Ride {
        target: RideState,
        reason: Option<String>,
    },
    Location {
        point: GeoPoint,
        heading: Option<f64>,
    },
    Chat {
        text: String,
    },
    Rating {
        stars: u8,
        comment: Option<String>,
    },
    Emergency {
        kind: String,
        location: Option<GeoPoint>,
    },
}

enum Command {
    Session(Input),
    Send(Outbound, oneshot::Sender<Result<(), CoreError>>),
    Shutdown(oneshot::Sender<()>),
}

/// 세션 핸들 — 복제해서 여러 화면에서 공유 가능
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    core: Arc<Mutex<ConnectionCore>>,
    rides: Arc<Mutex<RideTracker>>,
    registry: Arc<SubscriberRegistry>,
    status_rx: watch::Receiver<ConnectionStatus>,
    driver: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ConnectionManager {
    /// 드라이버 태스크를 시작하고 핸들 반환 (tokio 런타임 안에서 호출)
    pub fn spawn(
        options: SessionOptions,
        transport: Arc<dyn Transport>,
        lifecycle: &dyn LifecycleSource,
        reachability: &dyn ReachabilitySource,
    ) -> Self {
        let core = Arc::new(Mutex::new(ConnectionCore::new(
            &options.reconnect,
            &options.health,
        )));
        let rides = Arc::new(Mutex::new(RideTracker::new(
            options.role,
            options.grace_period,
        )));
        let registry = Arc::new(SubscriberRegistry::new());
        let initial = core.lock().status();
        let (status_tx, status_rx) = watch::channel(initial);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            core: core.clone(),
            rides: rides.clone(),
            registry: registry.clone(),
            transport,
            transport_tx,
            timers: TimerSet::new(timer_tx),
            status_tx,
            epoch: 0,
            connecting: None,
            client_id: options.client_id,
        };
        let signals = Signals {
            commands: command_rx,
            transport: transport_rx,
            timers: timer_rx,
            lifecycle: Some(lifecycle.subscribe()),
            reachability: Some(reachability.subscribe()),
        };
        let handle = tokio::spawn(driver.run(signals));
        info!("세션 드라이버 시작 (역할: {:?})", options.role);

        Self {
            commands: command_tx,
            core,
            rides,
            registry,
            status_rx,
            driver: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// 세션 시작. 이미 연결 중/연결됨이면 no-op.
    pub fn connect(&self) -> Result<(), CoreError> {
        self.command(Command::Session(Input::Connect))
    }

    /// 의도적 종료. 다음 `connect()` 전까지 자동 재연결하지 않는다.
    pub fn disconnect(&self) -> Result<(), CoreError> {
        self.command(Command::Session(Input::Disconnect))
    }

    /// 백오프 초기화 후 즉시 재연결
    pub fn reconnect(&self) -> Result<(), CoreError> {
        self.command(Command::Session(Input::Reconnect))
    }

    /// 연결되어 있고 퐁이 3T 안에 수신되었는지
    pub fn is_healthy(&self) -> bool {
        self.core.lock().is_healthy(now())
    }

    /// 연결 상태 스냅샷
    pub fn status(&self) -> ConnectionStatus {
        self.core.lock().status()
    }

    /// 상태 스냅샷 구독
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// 진행 중(또는 유예 기간 중)인 운행
    pub fn current_ride(&self) -> Option<RideSession> {
        let mut rides = self.rides.lock();
        rides.expire(now());
        rides.current().cloned()
    }

    /// 세션 상태 변경 구독
    pub fn on_connection_change<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(SessionState) + Send + Sync + 'static,
    {
        self.registry.subscribe(
            Topic::Connection,
            Arc::new(move |notification: &Notification| {
                if let Notification::Connection(state) = notification {
                    listener(*state);
                }
            }),
        )
    }

    /// 세션 에러 구독
    pub fn on_error<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&SessionError) + Send + Sync + 'static,
    {
        self.registry.subscribe(
            Topic::Error,
            Arc::new(move |notification: &Notification| {
                if let Notification::Error(err) = notification {
                    listener(err);
                }
            }),
        )
    }

    /// 적용된 운행 전이 구독
    pub fn on_ride_update<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&RideUpdate) + Send + Sync + 'static,
    {
        self.registry.subscribe(
            Topic::Ride,
            Arc::new(move |notification: &Notification| {
                if let Notification::Ride(update) = notification {
                    listener(update);
                }
            }),
        )
    }

    /// 카테고리별 수신 이벤트 구독
    pub fn subscribe<F>(&self, category: EventCategory, listener: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.registry.subscribe(
            Topic::Category(category),
            Arc::new(move |notification: &Notification| {
                if let Notification::Event(event) = notification {
                    listener(event);
                }
            }),
        )
    }

    /// 구독 해제
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(id)
    }

    /// 배차 탐색 시작 (승객)
    pub async fn start_search(&self) -> Result<(), CoreError> {
        self.transition_ride(RideState::Searching).await
    }

    /// 배차 요청 (승객)
    pub async fn request_ride(&self) -> Result<(), CoreError> {
        self.transition_ride(RideState::Requested).await
    }

    /// 운행 취소
    pub async fn cancel_ride(&self, reason: Option<String>) -> Result<(), CoreError> {
        self.request(Outbound::Ride {
            target: RideState::Cancelled,
            reason,
        })
        .await
    }

    /// 임의 운행 전이 송신 (기사: 수락/거절/이동/도착/출발/운행/완료)
    pub async fn transition_ride(&self, target: RideState) -> Result<(), CoreError> {
        self.request(Outbound::Ride {
            target,
            reason: None,
        })
        .await
    }

    /// 위치 송신
    pub async fn send_location(
        &self,
        point: GeoPoint,
        heading: Option<f64>,
    ) -> Result<(), CoreError> {
        self.request(Outbound::Location { point, heading }).await
    }

    /// 채팅 송신
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<(), CoreError> {
        self.request(Outbound::Chat { text: text.into() }).await
    }

    /// 평점 제출 (완료 후 유예 기간 이내)
    pub async fn rate_ride(&self, stars: u8, comment: Option<String>) -> Result<(), CoreError> {
        self.request(Outbound::Rating { stars, comment }).await
    }

    /// 긴급 호출 — 연결되어 있으면 운행 상태와 무관하게 송신
    pub async fn send_emergency(
        &self,
        kind: impl Into<String>,
        location: Option<GeoPoint>,
    ) -> Result<(), CoreError> {
        self.request(Outbound::Emergency {
            kind: kind.into(),
            location,
        })
        .await
    }

    /// 세션 종료 후 드라이버 태스크 정지
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.command(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("세션 드라이버 종료 에러: {e}");
            }
        }
    }

    fn command(&self, command: Command) -> Result<(), CoreError> {
        self.commands
            .send(command)
            .map_err(|_| CoreError::SessionClosed)
    }

    async fn request(&self, outbound: Outbound) -> Result<(), CoreError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Send(outbound, tx))?;
        rx.await.map_err(|_| CoreError::SessionClosed)?
    }
}

/// 드라이버 입력 채널 묶음
struct Signals {
    commands: mpsc::UnboundedReceiver<Command>,
    transport: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    timers: mpsc::UnboundedReceiver<Fired<TimerKind>>,
    lifecycle: Option<watch::Receiver<AppState>>,
    reachability: Option<watch::Receiver<Reachability>>,
}

struct Driver {
    core: Arc<Mutex<ConnectionCore>>,
    rides: Arc<Mutex<RideTracker>>,
    registry: Arc<SubscriberRegistry>,
    transport: Arc<dyn Transport>,
    transport_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    timers: TimerSet<TimerKind>,
    status_tx: watch::Sender<ConnectionStatus>,
    /// 현재 전송 연결의 에포크 — 열기/닫기마다 증가
    epoch: u64,
    /// 아직 끝나지 않았을 수 있는 연결 태스크
    connecting: Option<JoinHandle<()>>,
    client_id: String,
}

impl Driver {
    async fn run(mut self, mut signals: Signals) {
        if let Some(rx) = signals.lifecycle.as_mut() {
            let app_state = *rx.borrow_and_update();
            self.apply(Input::AppStateChanged(app_state)).await;
        }
        if let Some(rx) = signals.reachability.as_mut() {
            let reachability = *rx.borrow_and_update();
            self.apply(Input::ReachabilityChanged(reachability)).await;
        }

        loop {
            tokio::select! {
                command = signals.commands.recv() => match command {
                    Some(Command::Session(input)) => self.apply(input).await,
                    Some(Command::Send(outbound, reply)) => {
                        let result = self.send_outbound(outbound).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Shutdown(reply)) => {
                        self.apply(Input::Disconnect).await;
                        self.timers.cancel_all();
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        debug!("모든 세션 핸들 해제됨");
                        self.apply(Input::Disconnect).await;
                        break;
                    }
                },
                Some((epoch, event)) = signals.transport.recv() => {
                    self.on_transport(epoch, event).await;
                }
                Some(fired) = signals.timers.recv() => {
                    if self.timers.accept(fired) {
                        self.apply(Input::TimerFired(fired.0)).await;
                    }
                }
                app_state = next_signal(&mut signals.lifecycle) => {
                    self.apply(Input::AppStateChanged(app_state)).await;
                }
                reachability = next_signal(&mut signals.reachability) => {
                    self.apply(Input::ReachabilityChanged(reachability)).await;
                }
            }
        }
        info!("세션 드라이버 종료");
    }

    /// 상태 머신 입력 처리 후 동작 실행
    async fn apply(&mut self, input: Input) {
        let actions = self.core.lock().handle(input, now());
        for action in actions {
            self.execute(action).await;
        }
        self.publish_status();
    }

    async fn execute(&mut self, action: Action) {
        match action {
            Action::OpenTransport => self.open_transport(),
            Action::CloseTransport => {
                self.epoch += 1;
                self.abort_connecting();
                if let Err(e) = self.transport.disconnect().await {
                    debug!("전송 종료 에러: {e}");
                }
            }
            Action::SendPing => {
                let ping = PingPayload {
                    timestamp: Utc::now().timestamp_millis(),
                };
                if let Err(e) = self.send_event(EventType::SystemPing, &ping).await {
                    warn!("핑 송신 실패: {e}");
                }
            }
            Action::ArmTimer(kind, delay) => self.timers.arm(kind, delay),
            Action::CancelTimer(kind) => self.timers.cancel(kind),
            Action::StateChanged(state) => {
                self.registry.publish(&Notification::Connection(state));
            }
            Action::ReportError(err) => {
                if err.is_fatal() {
                    error!("치명적 세션 에러: {err}");
                }
                self.registry.publish(&Notification::Error(err));
            }
        }
    }

    fn open_transport(&mut self) {
        self.abort_connecting();
        self.epoch += 1;
        let sink = TransportSink::new(self.epoch, self.transport_tx.clone());
        let transport = self.transport.clone();
        self.connecting = Some(tokio::spawn(async move {
            if let Err(e) = transport.connect(sink.clone()).await {
                sink.emit(TransportEvent::Error(e));
            }
        }));
    }

    /// 이전 에포크의 핸드셰이크가 늦게 붙지 않도록 취소
    fn abort_connecting(&mut self) {
        if let Some(task) = self.connecting.take() {
            if !task.is_finished() {
                debug!("진행 중인 연결 시도 취소 (에포크 {})", self.epoch);
                task.abort();
            }
        }
    }

    fn publish_status(&self) {
        let status = self.core.lock().status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    async fn on_transport(&mut self, epoch: u64, event: TransportEvent) {
        if epoch != self.epoch {
            debug!("이전 연결(에포크 {epoch})의 신호 무시: {event:?}");
            return;
        }
        match event {
            TransportEvent::Opened => self.apply(Input::Opened).await,
            TransportEvent::Message(text) => self.on_frame(&text).await,
            TransportEvent::Closed(reason) => self.apply(Input::Closed(reason)).await,
            TransportEvent::Error(err) => self.apply(Input::Failed(err)).await,
        }
    }

    async fn on_frame(&mut self, text: &str) {
        let state = self.core.lock().state();
        if state != SessionState::Connected {
            debug!("{state} 상태의 수신 프레임 폐기");
            return;
        }
        let event = match codec::decode(text) {
            Ok(event) => event,
            Err(e) => {
                warn!("수신 프레임 폐기: {e}");
                self.protocol_error(e.to_string());
                return;
            }
        };

        match event.event_type {
            EventType::SystemPong => {
                self.apply(Input::PongReceived).await;
                return;
            }
            EventType::SystemPing => {
                let timestamp = event
                    .payload_as::<PingPayload>()
                    .map(|p| p.timestamp)
                    .unwrap_or_else(|_| Utc::now().timestamp_millis());
                if let Err(e) = self
                    .send_event(EventType::SystemPong, &PingPayload { timestamp })
                    .await
                {
                    warn!("퐁 응답 실패: {e}");
                }
                return;
            }
            _ => {}
        }

        let now = now();
        if let Some(target) = event.event_type.ride_target() {
            let Some(payload) = self.payload::<RidePayload>(&event) else {
                return;
            };
            let outcome = self.rides.lock().apply(target, &payload, now);
            if let RideOutcome::Applied(update) = outcome {
                self.registry.publish(&Notification::Ride(update));
                self.registry.publish(&Notification::Event(event));
            }
            return;
        }

        let accepted = match event.category() {
            EventCategory::Location => match self.payload::<LocationPayload>(&event) {
                Some(payload) => self.rides.lock().apply_location(&payload, now),
                None => false,
            },
            EventCategory::Chat => match self.payload::<ChatPayload>(&event) {
                Some(payload) => self.ride_scoped(&payload.ride_id, now),
                None => false,
            },
            EventCategory::Rating => match self.payload::<RatingPayload>(&event) {
                Some(payload) => self.ride_scoped(&payload.ride_id, now),
                None => false,
            },
            _ => true,
        };
        if accepted {
            self.registry.publish(&Notification::Event(event));
        }
    }

    fn ride_scoped(&self, ride_id: &str, now: Instant) -> bool {
        let accepted = self.rides.lock().accepts_ride_scoped(ride_id, now);
        if !accepted {
            debug!("운행 {ride_id} 범위 밖 이벤트 폐기");
        }
        accepted
    }

    /// 페이로드 해석. 실패 시 프로토콜 에러 보고.
    fn payload<T: DeserializeOwned>(&self, event: &Event) -> Option<T> {
        match event.payload_as::<T>() {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!("{} 페이로드 해석 실패: {e}", event.event_type);
                self.protocol_error(format!("{}: {e}", event.event_type));
                None
            }
        }
    }

    fn protocol_error(&self, message: String) {
        self.registry
            .publish(&Notification::Error(SessionError::Protocol(message)));
    }

    async fn send_event<P: Serialize>(
        &self,
        event_type: EventType,
        payload: &P,
    ) -> Result<(), CoreError> {
        let event = Event::new(event_type, payload)?;
        let frame = codec::encode(&event)?;
        self.transport.send(frame).await?;
        Ok(())
    }

    async fn send_outbound(&mut self, outbound: Outbound) -> Result<(), CoreError> {
        let state = self.core.lock().state();
        if state != SessionState::Connected {
            return Err(CoreError::NotConnected);
        }
        let now = now();

        match outbound {
            Outbound::Ride { target, reason } => {
                let event_type = EventType::for_ride_state(target).ok_or_else(|| {
                    CoreError::InvalidRideState {
                        command: target.to_string(),
                        state: self.rides.lock().effective_state().to_string(),
                    }
                })?;
                let mut payload = self.rides.lock().prepare(target, now)?;
                payload.reason = reason;
                self.send_event(event_type, &payload).await?;
                let outcome = self.rides.lock().apply(target, &payload, now);
                if let RideOutcome::Applied(update) = outcome {
                    self.registry.publish(&Notification::Ride(update));
                }
            }
            Outbound::Location { point, heading } => {
                let ride_id = self.moving_ride_id(now)?;
                let payload = LocationPayload {
                    ride_id,
                    latitude: point.latitude,
                    longitude: point.longitude,
                    heading,
                };
                self.send_event(EventType::LocationUpdate, &payload).await?;
                self.rides.lock().apply_location(&payload, now);
            }
            Outbound::Chat { text } => {
                let ride_id = self.scoped_ride_id("chat", now)?;
                let payload = ChatPayload {
                    ride_id,
                    sender_id: self.client_id.clone(),
                    text,
                    message_id: Some(uuid::Uuid::new_v4().to_string()),
                };
                self.send_event(EventType::ChatMessage, &payload).await?;
            }
            Outbound::Rating { stars, comment } => {
                let ride_id = self.scoped_ride_id("rating", now)?;
                let payload = RatingPayload {
                    ride_id,
                    stars,
                    comment,
                };
                payload.validate()?;
                self.send_event(EventType::RatingSubmitted, &payload).await?;
            }
            Outbound::Emergency { kind, location } => {
                let ride_id = {
                    let mut rides = self.rides.lock();
                    rides.expire(now);
                    rides
                        .current()
                        .filter(|ride| ride.state.is_active())
                        .map(|ride| ride.ride_id.clone())
                };
                let payload = EmergencyPayload {
                    ride_id,
                    kind,
                    latitude: location.map(|p| p.latitude),
                    longitude: location.map(|p| p.longitude),
                };
                warn!("긴급 호출 송신: {}", payload.kind);
                self.send_event(EventType::EmergencySos, &payload).await?;
            }
        }
        Ok(())
    }

    /// 위치를 받는 상태의 운행 ID
    fn moving_ride_id(&self, now: Instant) -> Result<String, CoreError> {
        let mut rides = self.rides.lock();
        rides.expire(now);
        match rides.current() {
            Some(ride) if ride.state.accepts_location() => Ok(ride.ride_id.clone()),
            other => Err(CoreError::InvalidRideState {
                command: "location".to_string(),
                state: other.map_or(RideState::Idle, |ride| ride.state).to_string(),
            }),
        }
    }

    /// 채팅/평점이 참조할 운행 ID (진행 중 또는 완료 후 유예 기간)
    fn scoped_ride_id(&self, command: &str, now: Instant) -> Result<String, CoreError> {
        let mut rides = self.rides.lock();
        let current = rides
            .current()
            .map(|ride| (ride.ride_id.clone(), ride.state));
        match current {
            Some((ride_id, _)) if rides.accepts_ride_scoped(&ride_id, now) => Ok(ride_id),
            Some((_, state)) => Err(CoreError::InvalidRideState {
                command: command.to_string(),
                state: state.to_string(),
            }),
            None => Err(CoreError::InvalidRideState {
                command: command.to_string(),
                state: RideState::Idle.to_string(),
            }),
        }
    }
}

/// tokio 시계 기준 현재 시각 (일시정지된 테스트 시계와 일치)
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// watch 신호 대기. 신호원이 사라지면 이후로는 영원히 대기한다.
async fn next_signal<T: Copy>(rx: &mut Option<watch::Receiver<T>>) -> T {
    if let Some(inner) = rx.as_mut() {
        if inner.changed().await.is_ok() {
            return *inner.borrow_and_update();
        }
        debug!("신호원 종료");
    }
    *rx = None;
    std::future::pending().await
}
