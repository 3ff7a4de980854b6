//! # ridelink-network
//!
//! 네트워크 어댑터.
//! 디스패치 서버와의 WebSocket 전송(`tokio-tungstenite`)과
//! 네트워크 도달 가능성 감시를 담당한다.
//!
//! ## 사용 예시
//!
//! ```rust,ignore
//! use ridelink_network::ws_transport::WsTransport;
//! use ridelink_network::connectivity::ConnectivityMonitor;
//!
//! let transport = Arc::new(WsTransport::new(&config.server)?);
//! let monitor = Arc::new(ConnectivityMonitor::default());
//! ```

pub mod connectivity;
pub mod ws_transport;
