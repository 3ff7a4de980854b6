//! 라이프사이클 관리.
//!
//! 종료 시그널, 앱 포그라운드/백그라운드 상태.
//! 앱 상태는 [`LifecycleSource`]로 세션에 전달된다.

use ridelink_core::models::session::AppState;
use ridelink_core::ports::platform::LifecycleSource;
use tokio::sync::watch;
use tracing::info;

/// 라이프사이클 관리자
pub struct LifecycleManager {
    shutdown_tx: watch::Sender<bool>,
    app_state_tx: watch::Sender<AppState>,
}

impl LifecycleManager {
    /// 새 라이프사이클 관리자 생성 (포그라운드로 시작)
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (app_state_tx, _) = watch::channel(AppState::Foreground);
        Self {
            shutdown_tx,
            app_state_tx,
        }
    }

    /// 종료 수신기
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// 종료 신호 발송
    pub fn shutdown(&self) {
        info!("종료 신호 발송");
        self.shutdown_tx.send_replace(true);
    }

    /// 현재 앱 상태
    pub fn app_state(&self) -> AppState {
        *self.app_state_tx.borrow()
    }

    /// 앱 상태 전환 (같은 상태면 무시)
    pub fn set_app_state(&self, app_state: AppState) {
        let changed = self.app_state_tx.send_if_modified(|current| {
            if *current == app_state {
                return false;
            }
            *current = app_state;
            true
        });
        if changed {
            info!("앱 상태 전환: {:?}", app_state);
        }
    }

    /// OS 시그널 대기 (SIGINT, SIGTERM) 후 종료 신호 발송
    pub async fn wait_for_signal(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigterm = signal(SignalKind::terminate())?;

            tokio::select! {
                _ = sigint.recv() => {
                    info!("SIGINT 수신");
                }
                _ = sigterm.recv() => {
                    info!("SIGTERM 수신");
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await?;
            info!("Ctrl+C 수신");
        }

        self.shutdown();
        Ok(())
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleSource for LifecycleManager {
    fn subscribe(&self) -> watch::Receiver<AppState> {
        self.app_state_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_signal() {
        let lm = LifecycleManager::new();
        let rx = lm.subscribe_shutdown();
        assert!(!*rx.borrow());
        lm.shutdown();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn app_state_changes_reach_subscribers() {
        let lm = LifecycleManager::new();
        let mut rx = LifecycleSource::subscribe(&lm);
        assert_eq!(*rx.borrow_and_update(), AppState::Foreground);

        lm.set_app_state(AppState::Foreground);
        assert!(!rx.has_changed().unwrap());

        lm.set_app_state(AppState::Background);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), AppState::Background);
        assert_eq!(lm.app_state(), AppState::Background);
    }
}
