//! 세션 시나리오 통합 테스트.
//!
//! 스크립트 가능한 가짜 전송과 일시정지된 tokio 시계로
//! 재연결, 헬스체크, 운행 상태 머신을 끝에서 끝까지 검증.

use async_trait::async_trait;
use parking_lot::Mutex;
use ridelink_core::error::{CoreError, SessionError, TransportError, TransportErrorKind};
use ridelink_core::models::ride::RideState;
use ridelink_core::models::session::{AppState, CloseReason, Reachability, SessionState};
use ridelink_core::ports::platform::{LifecycleSource, ReachabilitySource};
use ridelink_core::ports::transport::{Transport, TransportEvent, TransportSink};
use ridelink_session::{ConnectionManager, SessionOptions};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// 연결 거부 횟수, 자동 퐁 응답을 조절할 수 있는 가짜 전송
#[derive(Default)]
struct ScriptedTransport {
    /// 남은 연결 거부 횟수
    refusals: AtomicUsize,
    /// 핑에 자동으로 퐁 응답
    auto_pong: AtomicBool,
    /// 남은 응답 없는 핸드셰이크 횟수
    stalls: AtomicUsize,
    /// 완료 전에 취소된 핸드셰이크 수
    abandoned: Arc<AtomicUsize>,
    connects: AtomicUsize,
    sink: Mutex<Option<TransportSink>>,
    sent: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn refuse(&self, count: usize) {
        self.refusals.store(count, Ordering::SeqCst);
    }

    fn stall(&self, count: usize) {
        self.stalls.store(count, Ordering::SeqCst);
    }

    fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn current_sink(&self) -> TransportSink {
        self.sink.lock().clone().expect("연결되지 않음")
    }

    fn deliver(&self, event_type: &str, payload: serde_json::Value) {
        let frame = serde_json::json!({ "type": event_type, "payload": payload }).to_string();
        self.current_sink().emit(TransportEvent::Message(frame));
    }

    fn close(&self, reason: CloseReason) {
        self.current_sink().emit(TransportEvent::Closed(reason));
    }

    fn sent_count(&self, event_type: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|frame| {
                let v: serde_json::Value = serde_json::from_str(frame).unwrap();
                v["type"] == event_type
            })
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, sink: TransportSink) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::new(
                TransportErrorKind::Refused,
                "connection refused",
            ));
        }
        let stalled = self
            .stalls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stalled {
            let _guard = AbandonGuard(self.abandoned.clone());
            std::future::pending::<()>().await;
        }
        sink.emit(TransportEvent::Opened);
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.sink.lock().take();
        Ok(())
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        if value["type"] == "system:ping" && self.auto_pong.load(Ordering::SeqCst) {
            let pong = serde_json::json!({ "type": "system:pong", "payload": value["payload"] });
            if let Some(sink) = self.sink.lock().as_ref() {
                sink.emit(TransportEvent::Message(pong.to_string()));
            }
        }
        self.sent.lock().push(frame);
        Ok(())
    }
}

/// 핸드셰이크 future가 완료 전에 드롭되면 카운트
struct AbandonGuard(Arc<AtomicUsize>);

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// 테스트가 조작하는 앱 상태/네트워크 신호원
struct Platform {
    app: watch::Sender<AppState>,
    net: watch::Sender<Reachability>,
}

impl LifecycleSource for Platform {
    fn subscribe(&self) -> watch::Receiver<AppState> {
        self.app.subscribe()
    }
}

impl ReachabilitySource for Platform {
    fn subscribe(&self) -> watch::Receiver<Reachability> {
        self.net.subscribe()
    }
}

struct Harness {
    session: ConnectionManager,
    transport: Arc<ScriptedTransport>,
    platform: Platform,
    errors: Arc<Mutex<Vec<SessionError>>>,
    rides: Arc<Mutex<Vec<RideState>>>,
}

impl Harness {
    fn new() -> Self {
        let transport = Arc::new(ScriptedTransport::default());
        let platform = Platform {
            app: watch::channel(AppState::Foreground).0,
            net: watch::channel(Reachability::Online).0,
        };
        let session = ConnectionManager::spawn(
            SessionOptions::default(),
            transport.clone(),
            &platform,
            &platform,
        );

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        session.on_error(move |err| sink.lock().push(err.clone()));

        let rides = Arc::new(Mutex::new(Vec::new()));
        let sink = rides.clone();
        session.on_ride_update(move |update| sink.lock().push(update.to));

        Self {
            session,
            transport,
            platform,
            errors,
            rides,
        }
    }

    async fn connected() -> Self {
        let h = Self::new();
        h.session.connect().unwrap();
        h.until(SessionState::Connected).await;
        h
    }

    async fn until(&self, state: SessionState) {
        let mut status = self.session.subscribe_status();
        tokio::time::timeout(Duration::from_secs(120), async {
            while status.borrow_and_update().state != state {
                status.changed().await.unwrap();
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{state} 상태에 도달하지 못함"));
    }

    fn state(&self) -> SessionState {
        self.session.status().state
    }

    fn ride_id(&self) -> String {
        self.session.current_ride().unwrap().ride_id
    }

    fn deliver_ride(&self, event_type: &str) {
        let ride_id = self.ride_id();
        self.transport.deliver(
            event_type,
            serde_json::json!({ "rideId": ride_id, "counterpartyId": "driver_7" }),
        );
    }

    fn error_count(&self, pred: impl Fn(&SessionError) -> bool) -> usize {
        self.errors.lock().iter().filter(|e| pred(e)).count()
    }
}

/// 드라이버가 대기 중인 신호를 처리하도록 양보
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn duplicate_accept_after_reconnect_is_ignored() {
    let h = Harness::connected().await;
    h.session.request_ride().await.unwrap();
    h.deliver_ride("ride:accepted");
    settle().await;

    h.transport.close(CloseReason::Abnormal("1006".into()));
    settle().await;
    h.until(SessionState::Connected).await;
    assert_eq!(h.transport.connects(), 2);

    // 서버가 재연결 후 같은 이벤트를 다시 보냄
    h.deliver_ride("ride:accepted");
    settle().await;

    assert_eq!(
        *h.rides.lock(),
        vec![RideState::Requested, RideState::Accepted]
    );
    let ride = h.session.current_ride().unwrap();
    assert_eq!(ride.state, RideState::Accepted);
    assert_eq!(ride.counterparty_id.as_deref(), Some("driver_7"));
    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn refused_attempts_exhaust_then_manual_reconnect_resets() {
    let h = Harness::new();
    h.transport.refuse(5);
    h.session.connect().unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(h.transport.connects(), 5);
    assert_eq!(
        h.error_count(|e| matches!(e, SessionError::RetriesExhausted { attempts: 5 })),
        1
    );
    let status = h.session.status();
    assert_eq!(status.state, SessionState::Disconnected);
    assert!(!status.auto_reconnect);

    // 자동 재연결은 멈춰 있다
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.transport.connects(), 5);

    // 수동 재연결은 1회차부터 다시 센다
    h.transport.refuse(1);
    h.session.reconnect().unwrap();
    settle().await;
    let status = h.session.status();
    assert_eq!(status.reconnect_attempts, 1);
    assert!(status.auto_reconnect);

    h.until(SessionState::Connected).await;
    assert_eq!(h.transport.connects(), 7);
    assert_eq!(h.session.status().reconnect_attempts, 0);
    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn abnormal_close_reconnects_after_backoff() {
    let h = Harness::connected().await;
    h.transport.close(CloseReason::Abnormal("1006".into()));
    settle().await;
    assert_eq!(h.state(), SessionState::Disconnected);

    // 첫 재시도 지연은 최소 1초
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.transport.connects(), 1);

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(h.state(), SessionState::Connected);
    assert_eq!(h.transport.connects(), 2);
    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn server_final_close_is_not_retried() {
    let h = Harness::connected().await;
    h.transport.close(CloseReason::ServerFinal);
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(h.state(), SessionState::Disconnected);
    assert_eq!(h.transport.connects(), 1);
    assert!(!h.session.status().auto_reconnect);
    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn background_session_stays_healthy_with_pongs() {
    let h = Harness::new();
    h.transport.auto_pong.store(true, Ordering::SeqCst);
    h.session.connect().unwrap();
    h.until(SessionState::Connected).await;

    h.platform.app.send_replace(AppState::Background);
    settle().await;
    tokio::time::sleep(Duration::from_secs(600)).await;

    assert_eq!(h.state(), SessionState::Connected);
    assert!(h.session.is_healthy());
    assert_eq!(h.transport.connects(), 1);
    // 백그라운드 60초 간격
    let pings = h.transport.sent_count("system:ping");
    assert!((9..=10).contains(&pings), "핑 {pings}회");
    assert!(h.session.status().last_pong_at.is_some());
    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn missing_pong_tears_down_and_reconnects() {
    let h = Harness::connected().await;
    let timeouts = |e: &SessionError| {
        matches!(e, SessionError::Transport(err) if err.kind == TransportErrorKind::Timeout)
    };

    // 첫 핑 30초, 퐁 기한 2T = 60초 → 90초에 해체
    tokio::time::sleep(Duration::from_secs(85)).await;
    assert_eq!(h.state(), SessionState::Connected);
    assert_eq!(h.error_count(timeouts), 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.error_count(timeouts), 1);
    assert_eq!(h.transport.connects(), 2);
    assert_eq!(h.state(), SessionState::Connected);
    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancel_after_trip_start_is_discarded() {
    let h = Harness::connected().await;
    h.session.request_ride().await.unwrap();
    for event in ["ride:accepted", "ride:arriving", "ride:arrived", "ride:started"] {
        h.deliver_ride(event);
    }
    settle().await;
    assert_eq!(h.session.current_ride().unwrap().state, RideState::Started);

    h.deliver_ride("ride:cancelled");
    settle().await;
    assert_eq!(h.session.current_ride().unwrap().state, RideState::Started);

    assert!(matches!(
        h.session.cancel_ride(None).await,
        Err(CoreError::InvalidRideState { .. })
    ));
    assert_eq!(h.transport.sent_count("ride:cancelled"), 0);
    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn chat_and_rating_close_after_grace_period() {
    let h = Harness::new();
    h.transport.auto_pong.store(true, Ordering::SeqCst);
    h.session.connect().unwrap();
    h.until(SessionState::Connected).await;

    h.session.request_ride().await.unwrap();
    for event in [
        "ride:accepted",
        "ride:arriving",
        "ride:arrived",
        "ride:started",
        "ride:in_progress",
        "ride:completed",
    ] {
        h.deliver_ride(event);
    }
    settle().await;
    assert_eq!(h.session.current_ride().unwrap().state, RideState::Completed);

    h.session.send_chat("감사합니다").await.unwrap();
    h.session.rate_ride(5, None).await.unwrap();

    tokio::time::sleep(Duration::from_secs(301)).await;
    assert!(matches!(
        h.session.send_chat("늦은 메시지").await,
        Err(CoreError::InvalidRideState { .. })
    ));
    assert!(h.session.current_ride().is_none());
    assert_eq!(h.transport.sent_count("chat:message"), 1);
    assert_eq!(h.transport.sent_count("rating:submit"), 1);
    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_blocks_revival() {
    let h = Harness::connected().await;
    h.session.disconnect().unwrap();
    settle().await;
    assert_eq!(h.state(), SessionState::Disconnected);

    h.platform.net.send_replace(Reachability::Offline);
    settle().await;
    h.platform.net.send_replace(Reachability::Online);
    h.platform.app.send_replace(AppState::Background);
    settle().await;
    h.platform.app.send_replace(AppState::Foreground);
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(h.state(), SessionState::Disconnected);
    assert_eq!(h.transport.connects(), 1);
    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn network_recovery_revives_exhausted_session() {
    let h = Harness::new();
    h.transport.refuse(5);
    h.session.connect().unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(!h.session.status().auto_reconnect);

    h.platform.net.send_replace(Reachability::Offline);
    settle().await;
    h.platform.net.send_replace(Reachability::Online);
    h.until(SessionState::Connected).await;
    assert_eq!(h.transport.connects(), 6);
    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stale_connection_signals_are_ignored() {
    let h = Harness::connected().await;
    let stale = h.transport.current_sink();

    h.transport.close(CloseReason::Abnormal("1006".into()));
    settle().await;
    h.until(SessionState::Connected).await;
    assert_eq!(h.transport.connects(), 2);

    // 해체된 첫 연결의 늦은 신호
    stale.emit(TransportEvent::Closed(CloseReason::Abnormal("late".into())));
    stale.emit(TransportEvent::Message(
        r#"{"type":"ride:requested","payload":{"rideId":"ghost"}}"#.to_string(),
    ));
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(h.state(), SessionState::Connected);
    assert_eq!(h.transport.connects(), 2);
    assert!(h.session.current_ride().is_none());
    h.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_during_stalled_handshake_connects_new_attempt() {
    let h = Harness::new();
    h.transport.stall(1);
    h.session.connect().unwrap();
    settle().await;
    assert_eq!(h.state(), SessionState::Connecting);

    h.session.reconnect().unwrap();
    h.until(SessionState::Connected).await;
    settle().await;
    assert_eq!(h.transport.connects(), 2);
    assert_eq!(h.transport.abandoned(), 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.state(), SessionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_handshake() {
    let h = Harness::new();
    h.transport.stall(1);
    h.session.connect().unwrap();
    settle().await;

    h.session.disconnect().unwrap();
    settle().await;
    assert_eq!(h.transport.abandoned(), 1);
    assert_eq!(h.state(), SessionState::Disconnected);
    assert_eq!(h.transport.connects(), 1);
}
