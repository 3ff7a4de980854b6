//! 네트워크 도달 가능성 감시.
//!
//! 서버 호스트로의 TCP 프로브를 주기적으로 수행하여 온라인/오프라인을 판정하고,
//! [`ReachabilitySource`]로 세션에 전달한다. 플랫폼 네트워크 콜백이 있으면
//! [`ConnectivityMonitor::set_reachability`]로 직접 주입할 수도 있다.

use ridelink_core::error::CoreError;
use ridelink_core::models::session::Reachability;
use ridelink_core::ports::platform::ReachabilitySource;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// 프로브 연결 타임아웃
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// 네트워크 도달 가능성 감시기
///
/// 연속 프로브 실패가 임계값에 도달하면 오프라인, 한 번이라도 성공하면 온라인.
pub struct ConnectivityMonitor {
    /// 연속 실패 횟수
    failure_count: AtomicU64,
    /// 오프라인 전환 임계값
    offline_threshold: u64,
    /// 강제 오프라인 모드
    force_offline: AtomicBool,
    tx: watch::Sender<Reachability>,
}

impl ConnectivityMonitor {
    /// `offline_threshold`: 이 횟수만큼 연속 실패하면 오프라인 전환
    pub fn new(offline_threshold: u64) -> Self {
        let (tx, _) = watch::channel(Reachability::Online);
        Self {
            failure_count: AtomicU64::new(0),
            offline_threshold: offline_threshold.max(1),
            force_offline: AtomicBool::new(false),
            tx,
        }
    }

    /// 현재 도달 가능성
    pub fn reachability(&self) -> Reachability {
        *self.tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.reachability() == Reachability::Online
    }

    /// 외부 신호 주입 (플랫폼 콜백, 수동 토글)
    pub fn set_reachability(&self, reachability: Reachability) {
        if reachability == Reachability::Online && self.is_force_offline() {
            debug!("강제 오프라인 모드 — 온라인 신호 무시");
            return;
        }
        if reachability == Reachability::Online {
            self.failure_count.store(0, Ordering::Relaxed);
        }
        self.publish(reachability);
    }

    /// 강제 오프라인 모드 설정
    pub fn set_force_offline(&self, force: bool) {
        self.force_offline.store(force, Ordering::Relaxed);
        if force {
            info!("강제 오프라인 모드 활성화");
            self.publish(Reachability::Offline);
        } else {
            info!("강제 오프라인 모드 해제");
        }
    }

    pub fn is_force_offline(&self) -> bool {
        self.force_offline.load(Ordering::Relaxed)
    }

    /// 프로브 성공 기록 — 온라인 전환
    pub fn record_success(&self) {
        if self.is_force_offline() {
            return;
        }
        self.failure_count.store(0, Ordering::Relaxed);
        self.publish(Reachability::Online);
    }

    /// 프로브 실패 기록 — 임계값 도달 시 오프라인 전환
    pub fn record_failure(&self) {
        if self.is_force_offline() {
            return;
        }
        let count = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("프로브 실패 (연속 {}회)", count);
        if count >= self.offline_threshold {
            self.publish(Reachability::Offline);
        }
    }

    /// 연속 실패 횟수
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    fn publish(&self, reachability: Reachability) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == reachability {
                return false;
            }
            *current = reachability;
            true
        });
        if changed {
            match reachability {
                Reachability::Online => info!("네트워크 온라인"),
                Reachability::Offline => warn!("네트워크 오프라인"),
            }
        }
    }

    /// 주기 프로브 루프. `shutdown`이 `true`가 되면 종료.
    pub async fn run_probe(
        self: Arc<Self>,
        target: String,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("네트워크 프로브 시작: {target} ({interval:?} 간격)");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(&target)).await {
                        Ok(Ok(_)) => self.record_success(),
                        Ok(Err(e)) => {
                            debug!("프로브 실패: {e}");
                            self.record_failure();
                        }
                        Err(_) => {
                            debug!("프로브 시간 초과");
                            self.record_failure();
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("네트워크 프로브 종료");
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(2)
    }
}

impl ReachabilitySource for ConnectivityMonitor {
    fn subscribe(&self) -> watch::Receiver<Reachability> {
        self.tx.subscribe()
    }
}

/// 서버 URL에서 프로브 대상 `host:port` 추출
pub fn probe_target(server_url: &str) -> Result<String, CoreError> {
    let url = url::Url::parse(server_url)
        .map_err(|e| CoreError::Config(format!("서버 URL 오류 ({server_url}): {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| CoreError::Config(format!("호스트 없음: {server_url}")))?;
    let port = url
        .port_or_known_default()
        .unwrap_or(match url.scheme() {
            "wss" | "https" => 443,
            _ => 80,
        });
    Ok(format!("{host}:{port}"))
}
