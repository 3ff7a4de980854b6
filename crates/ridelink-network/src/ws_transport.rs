//! WebSocket 전송 어댑터.
//!
//! `tokio-tungstenite` 기반 [`Transport`] 구현.
//! 세대 번호는 드라이버가 부여한 싱크 에포크를 그대로 쓴다. 더 새로운 에포크의
//! 연결이 시작됐거나 `disconnect()`가 호출된 뒤 끝난 핸드셰이크의 소켓은
//! 세션에 붙이지 않고 닫은 뒤 `Closed`를 보고한다.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use ridelink_core::config::ServerConfig;
use ridelink_core::error::{CoreError, TransportError, TransportErrorKind};
use ridelink_core::models::event::PROTOCOL_VERSION;
use ridelink_core::models::session::CloseReason;
use ridelink_core::ports::transport::{Transport, TransportEvent, TransportSink};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 정상 종료 (서버 최종 종료로 취급)
pub const CLOSE_NORMAL: u16 = 1000;
/// 서버가 세션을 끝냄 — 재연결 금지
pub const CLOSE_SESSION_ENDED: u16 = 4000;
/// 인증 만료/거부
pub const CLOSE_AUTH_REJECTED: u16 = 4401;

/// 종료 프레임 송신 대기 한도
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Link {
    writer: Option<SplitSink<WsStream, Message>>,
    reader: Option<JoinHandle<()>>,
}

/// WebSocket 전송 어댑터
pub struct WsTransport {
    url: String,
    connect_timeout: Duration,
    /// 연결을 붙일 수 있는 최신 에포크 (에포크는 단조 증가)
    generation: AtomicU64,
    link: Mutex<Link>,
}

impl WsTransport {
    /// 서버 설정으로 생성
    pub fn new(config: &ServerConfig) -> Result<Self, CoreError> {
        Ok(Self {
            url: session_url(&config.url, config.token.as_deref())?,
            connect_timeout: config.connect_timeout(),
            generation: AtomicU64::new(0),
            link: Mutex::new(Link::default()),
        })
    }

    /// 토큰을 제외한 접속 URL (로그용)
    pub fn display_url(&self) -> &str {
        self.url.split('?').next().unwrap_or(&self.url)
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, sink: TransportSink) -> Result<(), TransportError> {
        let epoch = sink.epoch();
        self.generation.fetch_max(epoch, Ordering::SeqCst);
        info!("WebSocket 연결 (에포크 {epoch}): {}", self.display_url());

        let handshake = tokio_tungstenite::connect_async(self.url.as_str());
        let (stream, _) = match tokio::time::timeout(self.connect_timeout, handshake).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => return Err(classify(&e)),
            Err(_) => {
                return Err(TransportError::new(
                    TransportErrorKind::Timeout,
                    format!("핸드셰이크 {:?} 초과", self.connect_timeout),
                ))
            }
        };
        let (write, read) = stream.split();

        let mut link = self.link.lock().await;
        if self.generation.load(Ordering::SeqCst) != epoch {
            debug!("에포크 {epoch} 연결 취소됨 — 늦게 수립된 소켓 종료");
            let mut write = write;
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, write.close()).await;
            sink.emit(TransportEvent::Closed(CloseReason::ClientInitiated));
            return Ok(());
        }
        if let Some(previous) = link.reader.take() {
            previous.abort();
        }
        link.writer = Some(write);
        sink.emit(TransportEvent::Opened);
        link.reader = Some(tokio::spawn(read_loop(read, sink)));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        // 진행 중인 핸드셰이크 무효화. 다음 connect()는 더 큰 에포크로 온다.
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut link = self.link.lock().await;
        if let Some(reader) = link.reader.take() {
            reader.abort();
        }
        if let Some(mut writer) = link.writer.take() {
            debug!("WebSocket 종료");
            match tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await {
                Ok(Err(e)) => return Err(classify(&e)),
                Err(_) => debug!("종료 프레임 송신 시간 초과"),
                Ok(Ok(())) => {}
            }
        }
        Ok(())
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        let mut link = self.link.lock().await;
        let writer = link
            .writer
            .as_mut()
            .ok_or_else(|| TransportError::new(TransportErrorKind::Reset, "연결 없음"))?;
        writer
            .send(Message::text(frame))
            .await
            .map_err(|e| classify(&e))
    }
}

/// 수신 루프 — 종료 사유를 보고하고 끝난다
async fn read_loop(mut read: SplitStream<WsStream>, sink: TransportSink) {
    let reason = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                if !sink.emit(TransportEvent::Message(text.to_string())) {
                    return;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                let (reason, error) = close_reason(frame.as_ref());
                if let Some(error) = error {
                    sink.emit(TransportEvent::Error(error));
                }
                break reason;
            }
            Some(Ok(Message::Binary(_))) => debug!("바이너리 프레임 무시"),
            Some(Ok(_)) => {} // Ping/Pong은 자동 처리
            Some(Err(e)) => {
                // 수립된 연결의 수신 실패는 모두 연결 끊김으로 보고 백오프 대상
                warn!("WebSocket 수신 에러: {e}");
                let error = TransportError::new(TransportErrorKind::Reset, e.to_string());
                let detail = error.message.clone();
                sink.emit(TransportEvent::Error(error));
                break CloseReason::Abnormal(detail);
            }
            None => break CloseReason::Abnormal("스트림 종료".to_string()),
        }
    };
    debug!("WebSocket 수신 루프 종료: {reason:?}");
    sink.emit(TransportEvent::Closed(reason));
}

/// 서버 종료 프레임 해석. 인증 거부는 에러도 함께 반환한다.
pub fn close_reason(frame: Option<&CloseFrame>) -> (CloseReason, Option<TransportError>) {
    let Some(frame) = frame else {
        return (
            CloseReason::Abnormal("종료 코드 없음".to_string()),
            None,
        );
    };
    let code = u16::from(frame.code);
    let reason: &str = &frame.reason;
    match code {
        CLOSE_NORMAL | CLOSE_SESSION_ENDED => (CloseReason::ServerFinal, None),
        CLOSE_AUTH_REJECTED => (
            CloseReason::ServerFinal,
            Some(TransportError::new(
                TransportErrorKind::AuthRejected,
                format!("{code} {reason}"),
            )),
        ),
        _ => (CloseReason::Abnormal(format!("{code} {reason}")), None),
    }
}

/// tungstenite 에러 분류
pub fn classify(err: &WsError) -> TransportError {
    let kind = match err {
        WsError::Http(response) => match response.status().as_u16() {
            401 | 403 => TransportErrorKind::AuthRejected,
            426 => TransportErrorKind::VersionMismatch,
            _ => TransportErrorKind::Refused,
        },
        WsError::Io(e) => io_kind(e.kind()),
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
        | WsError::Protocol(ProtocolError::SendAfterClosing)
        | WsError::Protocol(ProtocolError::ReceivedAfterClosing) => TransportErrorKind::Reset,
        WsError::Url(_) | WsError::Protocol(_) => TransportErrorKind::Protocol,
        _ => TransportErrorKind::Unreachable,
    };
    TransportError::new(kind, err.to_string())
}

fn io_kind(kind: std::io::ErrorKind) -> TransportErrorKind {
    use std::io::ErrorKind;
    match kind {
        ErrorKind::ConnectionRefused => TransportErrorKind::Refused,
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => TransportErrorKind::Reset,
        ErrorKind::TimedOut => TransportErrorKind::Timeout,
        _ => TransportErrorKind::Unreachable,
    }
}

/// 접속 URL 생성: http(s) → ws(s), `v`(카탈로그 버전)와 `token` 쿼리 추가
pub fn session_url(base: &str, token: Option<&str>) -> Result<String, CoreError> {
    let base = base.trim().trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };

    let mut url = url::Url::parse(&ws)
        .map_err(|e| CoreError::Config(format!("서버 URL 오류 ({base}): {e}")))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(CoreError::Config(format!(
            "지원하지 않는 스킴: {}",
            url.scheme()
        )));
    }
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("v", &PROTOCOL_VERSION.to_string());
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            query.append_pair("token", token);
        }
    }
    Ok(url.into())
}
