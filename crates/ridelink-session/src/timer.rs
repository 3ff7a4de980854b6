//! 취소 가능한 타이머.
//!
//! 종류별로 최대 1개의 타이머만 유지한다. 재무장은 기존 타이머를 먼저 취소하며,
//! 이미 만료되어 채널에 들어간 신호는 세대 번호 불일치로 걸러진다.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// 만료 신호 (종류, 세대)
pub type Fired<K> = (K, u64);

struct Slot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

/// 종류별 타이머 집합
pub struct TimerSet<K> {
    slots: HashMap<K, Slot>,
    tx: mpsc::UnboundedSender<Fired<K>>,
}

impl<K> TimerSet<K>
where
    K: Copy + Eq + Hash + Send + 'static,
{
    /// 만료 신호를 `tx`로 보내는 타이머 집합 생성
    pub fn new(tx: mpsc::UnboundedSender<Fired<K>>) -> Self {
        Self {
            slots: HashMap::new(),
            tx,
        }
    }

    /// 타이머 무장 (같은 종류의 기존 타이머는 취소)
    pub fn arm(&mut self, kind: K, delay: Duration) {
        let slot = self.slots.entry(kind).or_insert(Slot {
            generation: 0,
            handle: None,
        });
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
        slot.generation += 1;
        let generation = slot.generation;
        let tx = self.tx.clone();
        slot.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send((kind, generation));
        }));
    }

    /// 타이머 취소
    pub fn cancel(&mut self, kind: K) {
        if let Some(slot) = self.slots.get_mut(&kind) {
            if let Some(handle) = slot.handle.take() {
                handle.abort();
            }
            slot.generation += 1;
        }
    }

    /// 전체 취소
    pub fn cancel_all(&mut self) {
        let kinds: Vec<K> = self.slots.keys().copied().collect();
        for kind in kinds {
            self.cancel(kind);
        }
    }

    /// 만료 신호 확인. 현재 세대면 슬롯을 비우고 `true`, 오래된 신호면 `false`.
    pub fn accept(&mut self, fired: Fired<K>) -> bool {
        let (kind, generation) = fired;
        match self.slots.get_mut(&kind) {
            Some(slot) if slot.generation == generation && slot.handle.is_some() => {
                slot.handle = None;
                true
            }
            _ => false,
        }
    }

    /// 무장 여부
    pub fn is_armed(&self, kind: K) -> bool {
        self.slots
            .get(&kind)
            .is_some_and(|slot| slot.handle.is_some())
    }
}

impl<K> Drop for TimerSet<K> {
    fn drop(&mut self) {
        for slot in self.slots.values_mut() {
            if let Some(handle) = slot.handle.take() {
                handle.abort();
            }
        }
    }
}
