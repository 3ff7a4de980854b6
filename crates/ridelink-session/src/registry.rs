//! 구독 레지스트리.
//!
//! 토픽별 다중 리스너 fan-out. 리스너는 이벤트 처리 태스크에서 동기 호출되며,
//! 한 리스너의 panic은 개별적으로 잡혀 로그만 남기고 나머지 전달은 계속된다.

use parking_lot::RwLock;
use ridelink_core::error::SessionError;
use ridelink_core::models::event::{Event, EventCategory};
use ridelink_core::models::session::SessionState;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::ride::RideUpdate;

/// 구독 식별자 — `unsubscribe`에 사용
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// 구독 토픽
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// 세션 상태 변경
    Connection,
    /// 세션 에러
    Error,
    /// 적용된 운행 전이
    Ride,
    /// 카테고리별 수신 이벤트
    Category(EventCategory),
}

/// 리스너에 전달되는 알림
#[derive(Debug, Clone)]
pub enum Notification {
    Connection(SessionState),
    Error(SessionError),
    Ride(RideUpdate),
    Event(Event),
}

impl Notification {
    /// 알림이 전달될 토픽
    pub fn topic(&self) -> Topic {
        match self {
            Notification::Connection(_) => Topic::Connection,
            Notification::Error(_) => Topic::Error,
            Notification::Ride(_) => Topic::Ride,
            Notification::Event(event) => Topic::Category(event.category()),
        }
    }
}

/// 리스너 — 블로킹 I/O 금지
pub type Listener = Arc<dyn Fn(&Notification) + Send + Sync>;

/// 토픽별 리스너 목록
#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    listeners: RwLock<HashMap<Topic, Vec<(SubscriptionId, Listener)>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 리스너 등록
    pub fn subscribe(&self, topic: Topic, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(topic)
            .or_default()
            .push((id, listener));
        id
    }

    /// 리스너 해제. 등록되어 있었으면 `true`.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        for list in listeners.values_mut() {
            if let Some(pos) = list.iter().position(|(sid, _)| *sid == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// 토픽의 리스너 수
    pub fn listener_count(&self, topic: Topic) -> usize {
        self.listeners.read().get(&topic).map_or(0, Vec::len)
    }

    /// 알림 전달
    ///
    /// 리스너 목록을 복제한 뒤 잠금 밖에서 호출하므로,
    /// 리스너 안에서 구독/해제해도 교착되지 않는다.
    pub fn publish(&self, notification: &Notification) {
        let topic = notification.topic();
        let targets: Vec<(SubscriptionId, Listener)> = match self.listeners.read().get(&topic) {
            Some(list) => list.clone(),
            None => return,
        };
        for (id, listener) in targets {
            let result = catch_unwind(AssertUnwindSafe(|| listener(notification)));
            if result.is_err() {
                warn!("리스너 {:?} panic ({:?}) — 다음 리스너로 계속", id, topic);
            }
        }
    }
}
