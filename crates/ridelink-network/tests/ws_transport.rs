//! 로컬 WebSocket 서버를 상대로 한 전송 어댑터 통합 테스트.

use futures::{SinkExt, StreamExt};
use ridelink_core::config::ServerConfig;
use ridelink_core::error::TransportErrorKind;
use ridelink_core::models::session::CloseReason;
use ridelink_core::ports::transport::{Transport, TransportEvent, TransportSink};
use ridelink_network::ws_transport::WsTransport;
use std::future::Future;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const TIMEOUT: Duration = Duration::from_secs(5);

/// 연결 1개를 받아 `handler`로 처리하는 서버. 접속 URL 반환.
async fn serve_once<F, Fut>(handler: F) -> String
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        handler(ws).await;
    });
    format!("http://{addr}/realtime")
}

fn transport(url: String) -> WsTransport {
    WsTransport::new(&ServerConfig {
        url,
        token: Some("test-token".into()),
        connect_timeout_ms: 2_000,
        ..ServerConfig::default()
    })
    .unwrap()
}

async fn next(rx: &mut mpsc::UnboundedReceiver<(u64, TransportEvent)>) -> TransportEvent {
    let (epoch, event) = timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(epoch, 7);
    event
}

fn close(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: reason.into(),
    }))
}

#[tokio::test]
async fn receives_frames_then_server_final_close() {
    let url = serve_once(|mut ws| async move {
        ws.send(Message::text(r#"{"type":"connection:ack","payload":{}}"#))
            .await
            .unwrap();
        ws.send(close(4000, "session ended")).await.unwrap();
    })
    .await;

    let transport = transport(url);
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.connect(TransportSink::new(7, tx)).await.unwrap();

    assert_eq!(next(&mut rx).await, TransportEvent::Opened);
    match next(&mut rx).await {
        TransportEvent::Message(text) => assert!(text.contains("connection:ack")),
        other => panic!("예상치 못한 이벤트: {other:?}"),
    }
    assert_eq!(
        next(&mut rx).await,
        TransportEvent::Closed(CloseReason::ServerFinal)
    );
}

#[tokio::test]
async fn sends_text_frames() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let url = serve_once(move |mut ws| async move {
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                seen_tx.send(text.to_string()).unwrap();
            }
        }
    })
    .await;

    let transport = transport(url);
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.connect(TransportSink::new(7, tx)).await.unwrap();
    assert_eq!(next(&mut rx).await, TransportEvent::Opened);

    transport
        .send(r#"{"type":"system:ping","payload":{"timestamp":1}}"#.to_string())
        .await
        .unwrap();
    let seen = timeout(TIMEOUT, seen_rx.recv()).await.unwrap().unwrap();
    assert!(seen.contains("system:ping"));

    transport.disconnect().await.unwrap();
    assert_eq!(
        transport.send("{}".to_string()).await.unwrap_err().kind,
        TransportErrorKind::Reset
    );
}

#[tokio::test]
async fn auth_close_reports_rejection() {
    let url = serve_once(|mut ws| async move {
        ws.send(close(4401, "token expired")).await.unwrap();
    })
    .await;

    let transport = transport(url);
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.connect(TransportSink::new(7, tx)).await.unwrap();
    assert_eq!(next(&mut rx).await, TransportEvent::Opened);

    match next(&mut rx).await {
        TransportEvent::Error(err) => assert_eq!(err.kind, TransportErrorKind::AuthRejected),
        other => panic!("예상치 못한 이벤트: {other:?}"),
    }
    assert_eq!(
        next(&mut rx).await,
        TransportEvent::Closed(CloseReason::ServerFinal)
    );
}

#[tokio::test]
async fn refused_connection_is_retryable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = transport(format!("ws://{addr}/realtime"));
    let (tx, _rx) = mpsc::unbounded_channel();
    let err = transport
        .connect(TransportSink::new(7, tx))
        .await
        .unwrap_err();
    assert_eq!(err.kind, TransportErrorKind::Refused);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn dropped_socket_without_close_frame_is_retryable() {
    let url = serve_once(|ws| async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        // 종료 프레임 없이 TCP만 끊김 (서버 크래시, 로드밸런서 리셋)
        drop(ws);
    })
    .await;

    let transport = transport(url);
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.connect(TransportSink::new(7, tx)).await.unwrap();
    assert_eq!(next(&mut rx).await, TransportEvent::Opened);

    match next(&mut rx).await {
        TransportEvent::Error(err) => {
            assert_eq!(err.kind, TransportErrorKind::Reset);
            assert!(err.is_retryable());
        }
        other => panic!("예상치 못한 이벤트: {other:?}"),
    }
    assert!(matches!(
        next(&mut rx).await,
        TransportEvent::Closed(CloseReason::Abnormal(_))
    ));
}

#[tokio::test]
async fn older_epoch_cannot_replace_newer_connection() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        for name in ["newer", "older"] {
            let (tcp, _) = listener.accept().await.unwrap();
            let seen_tx = seen_tx.clone();
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
                while let Some(Ok(message)) = ws.next().await {
                    if let Message::Text(text) = message {
                        seen_tx.send(format!("{name}:{text}")).unwrap();
                    }
                }
            });
        }
    });

    let transport = transport(format!("ws://{addr}/realtime"));
    let (newer_tx, mut newer_rx) = mpsc::unbounded_channel();
    transport
        .connect(TransportSink::new(9, newer_tx))
        .await
        .unwrap();
    let (epoch, event) = timeout(TIMEOUT, newer_rx.recv()).await.unwrap().unwrap();
    assert_eq!((epoch, event), (9, TransportEvent::Opened));

    // 늦게 실행된 이전 에포크의 연결 시도는 붙지 않는다
    let (older_tx, mut older_rx) = mpsc::unbounded_channel();
    transport
        .connect(TransportSink::new(8, older_tx))
        .await
        .unwrap();
    let (epoch, event) = timeout(TIMEOUT, older_rx.recv()).await.unwrap().unwrap();
    assert_eq!(epoch, 8);
    assert_eq!(event, TransportEvent::Closed(CloseReason::ClientInitiated));

    transport.send("hello".to_string()).await.unwrap();
    let seen = timeout(TIMEOUT, seen_rx.recv()).await.unwrap().unwrap();
    assert_eq!(seen, "newer:hello");
}
