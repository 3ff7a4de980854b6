//! # ridelink-session
//!
//! 실시간 세션 관리.
//! 디스패치 서버와의 단일 논리 세션을 유지하고(백오프 재연결, 핑/퐁 헬스체크,
//! 앱 생명주기/네트워크 적응), 수신 이벤트를 운행 상태 머신과 구독자에게 전달한다.
//!
//! - [`manager`] — 외부 핸들 + tokio 드라이버
//! - [`connection`] — I/O 없는 연결 상태 머신
//! - [`ride`] — 운행 상태 머신
//! - [`registry`] — 구독 레지스트리

pub mod backoff;
pub mod codec;
pub mod connection;
pub mod health;
pub mod manager;
pub mod registry;
pub mod ride;
pub mod timer;

pub use manager::{ConnectionManager, SessionOptions};
pub use registry::SubscriptionId;
pub use ride::RideUpdate;
