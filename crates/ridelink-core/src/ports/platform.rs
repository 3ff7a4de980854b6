//! 플랫폼 신호 포트.
//!
//! 앱 생명주기(포그라운드/백그라운드)와 네트워크 도달 가능성.
//! 코어는 UI 프레임워크에 의존하지 않고 이 두 인터페이스만 구독한다.
//!
//! 구현: `ridelink-app` (LifecycleManager), `ridelink-network` (ConnectivityMonitor)

use tokio::sync::watch;

use crate::models::session::{AppState, Reachability};

/// 앱 생명주기 신호원
pub trait LifecycleSource: Send + Sync {
    /// 상태 변경 구독 (현재 값 포함)
    fn subscribe(&self) -> watch::Receiver<AppState>;
}

/// 네트워크 도달 가능성 신호원
pub trait ReachabilitySource: Send + Sync {
    /// 상태 변경 구독 (현재 값 포함)
    fn subscribe(&self) -> watch::Receiver<Reachability>;
}
