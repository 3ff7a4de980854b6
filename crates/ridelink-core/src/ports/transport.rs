//! 전송 어댑터 포트.
//!
//! 구현: `ridelink-network` crate (tokio-tungstenite)
//!
//! 어댑터는 연결마다 부여되는 에포크로 태깅된 [`TransportSink`]로
//! 생명주기 신호를 보고한다. 이미 해체된 연결의 늦은 신호는
//! 에포크 불일치로 세션 드라이버에서 무시된다.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::models::session::CloseReason;

/// 전송 어댑터가 보고하는 신호
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// 연결 수립 (수신 루프 시작 전에 보고)
    Opened,
    /// 텍스트 프레임 수신
    Message(String),
    /// 연결 종료
    Closed(CloseReason),
    /// 전송 에러 (연결 실패 포함)
    Error(TransportError),
}

/// 에포크로 태깅된 전송 신호 송신기
#[derive(Debug, Clone)]
pub struct TransportSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl TransportSink {
    /// 새 송신기 생성
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { epoch, tx }
    }

    /// 이 연결의 에포크
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// 신호 보고. 드라이버가 종료되었으면 `false`.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.epoch, event)).is_ok()
    }
}

/// 양방향 소켓 전송 어댑터
#[async_trait]
pub trait Transport: Send + Sync {
    /// 연결 수립
    ///
    /// 성공 시 `sink`로 `Opened`를 보고한 뒤 수신 프레임/종료/에러를 보고한다.
    /// 핸드셰이크 실패는 `Err`로 반환한다.
    async fn connect(&self, sink: TransportSink) -> Result<(), TransportError>;

    /// 연결 종료 (이미 끊겨 있으면 no-op)
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// 텍스트 프레임 송신
    async fn send(&self, frame: String) -> Result<(), TransportError>;
}
